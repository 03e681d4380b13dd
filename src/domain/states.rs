//! Immutable context-state rows loaded for one deterministic hour.
//!
//! These mirror the upstream tables consumed by the executor. Hash
//! columns stay as their stored hex strings; numeric columns are exact
//! decimals.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::enums::{DrawdownTier, ExposureMode, Horizon, RunMode};

/// run_context identity and replay anchors for the hour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContextState {
    pub run_id: Uuid,
    pub account_id: i64,
    pub run_mode: RunMode,
    pub hour_ts_utc: DateTime<Utc>,
    pub origin_hour_ts_utc: DateTime<Utc>,
    pub run_seed_hash: String,
    pub context_hash: String,
    pub replay_root_hash: String,
}

/// One model_prediction row with its lineage columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionState {
    pub run_id: Uuid,
    pub account_id: i64,
    pub run_mode: RunMode,
    pub asset_id: i64,
    pub hour_ts_utc: DateTime<Utc>,
    pub horizon: Horizon,
    pub model_version_id: i64,
    pub prob_up: Decimal,
    pub expected_return: Decimal,
    pub upstream_hash: String,
    pub row_hash: String,
    pub training_window_id: Option<i64>,
    pub lineage_backtest_run_id: Option<Uuid>,
    pub lineage_fold_index: Option<i64>,
    pub lineage_horizon: Option<Horizon>,
    pub activation_id: Option<i64>,
}

/// One regime_output row, parallel to predictions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegimeState {
    pub run_id: Uuid,
    pub account_id: i64,
    pub run_mode: RunMode,
    pub asset_id: i64,
    pub hour_ts_utc: DateTime<Utc>,
    pub model_version_id: i64,
    pub regime_label: String,
    pub upstream_hash: String,
    pub row_hash: String,
    pub training_window_id: Option<i64>,
    pub lineage_backtest_run_id: Option<Uuid>,
    pub lineage_fold_index: Option<i64>,
    pub lineage_horizon: Option<Horizon>,
    pub activation_id: Option<i64>,
}

/// Backtest training window used for forward-leakage validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingWindowState {
    pub training_window_id: i64,
    pub backtest_run_id: Uuid,
    pub model_version_id: i64,
    pub fold_index: i64,
    pub horizon: Horizon,
    pub train_end_utc: DateTime<Utc>,
    pub valid_start_utc: DateTime<Utc>,
    pub valid_end_utc: DateTime<Utc>,
    pub training_window_hash: String,
    pub row_hash: String,
}

/// risk_hourly_state projection for admission control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskState {
    pub run_mode: RunMode,
    pub account_id: i64,
    pub hour_ts_utc: DateTime<Utc>,
    pub source_run_id: Uuid,
    pub portfolio_value: Decimal,
    pub drawdown_pct: Decimal,
    pub drawdown_tier: DrawdownTier,
    pub base_risk_fraction: Decimal,
    pub max_concurrent_positions: i64,
    pub max_total_exposure_pct: Decimal,
    pub max_cluster_exposure_pct: Decimal,
    pub halt_new_entries: bool,
    pub kill_switch_active: bool,
    pub state_hash: String,
    pub row_hash: String,
}

/// portfolio_hourly_state projection (capital surface).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapitalState {
    pub run_mode: RunMode,
    pub account_id: i64,
    pub hour_ts_utc: DateTime<Utc>,
    pub source_run_id: Uuid,
    pub cash_balance: Decimal,
    pub portfolio_value: Decimal,
    pub total_exposure_pct: Decimal,
    pub open_position_count: i64,
    pub row_hash: String,
}

/// cluster_exposure_hourly_state projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterState {
    pub run_mode: RunMode,
    pub account_id: i64,
    pub cluster_id: i64,
    pub hour_ts_utc: DateTime<Utc>,
    pub source_run_id: Uuid,
    pub exposure_pct: Decimal,
    pub max_cluster_exposure_pct: Decimal,
    pub state_hash: String,
    pub parent_risk_hash: String,
    pub row_hash: String,
}

/// Most recent cash-ledger row strictly before the hour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorEconomicState {
    pub ledger_seq: i64,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub prev_ledger_hash: Option<String>,
    pub ledger_hash: String,
    pub row_hash: String,
    pub event_ts_utc: DateTime<Utc>,
}

/// Active venue cost profile at the hour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostProfileState {
    pub cost_profile_id: i64,
    pub fee_rate: Decimal,
    pub slippage_param_hash: String,
}

/// Active asset→cluster membership at the hour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMembershipState {
    pub membership_id: i64,
    pub asset_id: i64,
    pub cluster_id: i64,
    pub membership_hash: String,
}

/// Resolved account risk-profile assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskProfileState {
    pub profile_version: String,
    pub total_exposure_mode: ExposureMode,
    pub max_total_exposure_pct: Option<Decimal>,
    pub max_total_exposure_amount: Option<Decimal>,
    pub cluster_exposure_mode: ExposureMode,
    pub max_cluster_exposure_pct: Option<Decimal>,
    pub max_cluster_exposure_amount: Option<Decimal>,
    pub max_concurrent_positions: i64,
    pub severe_loss_drawdown_trigger: Decimal,
    pub volatility_feature_id: i64,
    pub volatility_target: Decimal,
    pub volatility_scale_floor: Decimal,
    pub volatility_scale_ceiling: Decimal,
    pub hold_min_expected_return: Decimal,
    pub exit_expected_return_threshold: Decimal,
    pub recovery_hold_prob_up_threshold: Decimal,
    pub recovery_exit_prob_up_threshold: Decimal,
    pub derisk_fraction: Decimal,
    pub signal_persistence_required: i64,
    pub row_hash: String,
}

/// Volatility feature snapshot for one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolatilityFeatureState {
    pub asset_id: i64,
    pub feature_id: i64,
    pub feature_value: Decimal,
    pub row_hash: String,
}

/// Open position snapshot for the hour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionState {
    pub run_mode: RunMode,
    pub account_id: i64,
    pub asset_id: i64,
    pub hour_ts_utc: DateTime<Utc>,
    pub source_run_id: Uuid,
    pub quantity: Decimal,
    pub exposure_pct: Decimal,
    pub unrealized_pnl: Decimal,
    pub row_hash: String,
}

/// Asset precision metadata (tick/lot sizes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPrecisionState {
    pub asset_id: i64,
    pub tick_size: Decimal,
    pub lot_size: Decimal,
}

/// Best bid/ask snapshot within the execution hour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBookSnapshotState {
    pub asset_id: i64,
    pub snapshot_ts_utc: DateTime<Utc>,
    pub hour_ts_utc: DateTime<Utc>,
    pub best_bid_price: Decimal,
    pub best_ask_price: Decimal,
    pub best_bid_size: Decimal,
    pub best_ask_size: Decimal,
    pub row_hash: String,
}

/// Hourly OHLCV close used as fill fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OhlcvState {
    pub asset_id: i64,
    pub hour_ts_utc: DateTime<Utc>,
    pub close_price: Decimal,
    pub row_hash: String,
}

/// Prior order_fill row (FIFO inventory source).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingOrderFillState {
    pub fill_id: Uuid,
    pub order_id: Uuid,
    pub run_id: Uuid,
    pub run_mode: RunMode,
    pub account_id: i64,
    pub asset_id: i64,
    pub fill_ts_utc: DateTime<Utc>,
    pub fill_price: Decimal,
    pub fill_qty: Decimal,
    pub fill_notional: Decimal,
    pub fee_paid: Decimal,
    pub realized_slippage_rate: Decimal,
    pub slippage_cost: Decimal,
    pub row_hash: String,
}

/// Prior position_lot row (FIFO inventory source).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingPositionLotState {
    pub lot_id: Uuid,
    pub open_fill_id: Uuid,
    pub run_id: Uuid,
    pub run_mode: RunMode,
    pub account_id: i64,
    pub asset_id: i64,
    pub open_ts_utc: DateTime<Utc>,
    pub open_price: Decimal,
    pub open_qty: Decimal,
    pub open_fee: Decimal,
    pub remaining_qty: Decimal,
    pub row_hash: String,
}

/// Prior executed_trade row (historical lot consumption).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingExecutedTradeState {
    pub trade_id: Uuid,
    pub lot_id: Uuid,
    pub run_id: Uuid,
    pub run_mode: RunMode,
    pub account_id: i64,
    pub asset_id: i64,
    pub quantity: Decimal,
    pub row_hash: String,
}
