//! Deterministic execution context for one (run, account, mode, hour).
//!
//! The builder loads every row the executor needs in canonical order and
//! cross-validates the whole surface before execution starts; the
//! resulting value is immutable and passed by reference.

mod loader;
mod validate;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::activation::ActivationRecord;
use crate::domain::{
    AssetPrecisionState, CapitalState, ClusterMembershipState, ClusterState, CostProfileState,
    ExistingExecutedTradeState, ExistingOrderFillState, ExistingPositionLotState, OhlcvState,
    OrderBookSnapshotState, PositionState, PredictionState, PriorEconomicState, RegimeState,
    RiskProfileState, RiskState, RunContextState, TrainingWindowState, VolatilityFeatureState,
};

pub use loader::DeterministicContextBuilder;

/// Immutable context consumed by the executor, writer, and replay path.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_context: RunContextState,
    pub predictions: Vec<PredictionState>,
    pub regimes: Vec<RegimeState>,
    pub risk_state: RiskState,
    pub capital_state: CapitalState,
    pub cluster_states: Vec<ClusterState>,
    pub prior_economic_state: Option<PriorEconomicState>,
    pub training_windows: Vec<TrainingWindowState>,
    pub activation_records: Vec<ActivationRecord>,
    pub memberships: Vec<ClusterMembershipState>,
    pub cost_profile: CostProfileState,
    pub risk_profile: RiskProfileState,
    pub volatility_features: Vec<VolatilityFeatureState>,
    pub positions: Vec<PositionState>,
    pub asset_precisions: Vec<AssetPrecisionState>,
    pub order_book_snapshots: Vec<OrderBookSnapshotState>,
    pub ohlcv_rows: Vec<OhlcvState>,
    pub existing_order_fills: Vec<ExistingOrderFillState>,
    pub existing_position_lots: Vec<ExistingPositionLotState>,
    pub existing_executed_trades: Vec<ExistingExecutedTradeState>,
}

impl ExecutionContext {
    pub fn find_training_window(&self, training_window_id: i64) -> Option<&TrainingWindowState> {
        self.training_windows
            .iter()
            .find(|window| window.training_window_id == training_window_id)
    }

    pub fn find_activation(&self, activation_id: i64) -> Option<&ActivationRecord> {
        self.activation_records
            .iter()
            .find(|activation| activation.activation_id == activation_id)
    }

    pub fn find_regime(&self, asset_id: i64, model_version_id: i64) -> Option<&RegimeState> {
        self.regimes
            .iter()
            .find(|regime| regime.asset_id == asset_id && regime.model_version_id == model_version_id)
    }

    pub fn find_membership(&self, asset_id: i64) -> Option<&ClusterMembershipState> {
        self.memberships
            .iter()
            .find(|membership| membership.asset_id == asset_id)
    }

    pub fn find_cluster_state(&self, cluster_id: i64) -> Option<&ClusterState> {
        self.cluster_states
            .iter()
            .find(|state| state.cluster_id == cluster_id)
    }

    pub fn find_volatility_feature(&self, asset_id: i64) -> Option<&VolatilityFeatureState> {
        self.volatility_features
            .iter()
            .find(|feature| feature.asset_id == asset_id)
    }

    pub fn find_position(&self, asset_id: i64) -> Option<&PositionState> {
        self.positions
            .iter()
            .find(|position| position.asset_id == asset_id)
    }

    pub fn find_asset_precision(&self, asset_id: i64) -> Option<&AssetPrecisionState> {
        self.asset_precisions
            .iter()
            .find(|asset| asset.asset_id == asset_id)
    }

    /// Most recent order-book snapshot at or before `as_of_ts_utc`.
    pub fn find_latest_order_book_snapshot(
        &self,
        asset_id: i64,
        as_of_ts_utc: DateTime<Utc>,
    ) -> Option<&OrderBookSnapshotState> {
        self.order_book_snapshots
            .iter()
            .filter(|snapshot| {
                snapshot.asset_id == asset_id && snapshot.snapshot_ts_utc <= as_of_ts_utc
            })
            .max_by_key(|snapshot| snapshot.snapshot_ts_utc)
    }

    pub fn find_ohlcv(&self, asset_id: i64) -> Option<&OhlcvState> {
        self.ohlcv_rows.iter().find(|row| row.asset_id == asset_id)
    }

    pub fn find_existing_fill(&self, fill_id: Uuid) -> Option<&ExistingOrderFillState> {
        self.existing_order_fills
            .iter()
            .find(|fill| fill.fill_id == fill_id)
    }

    /// Historical lots for one asset, in load order (open_ts, lot_id).
    pub fn lots_for_asset(&self, asset_id: i64) -> Vec<&ExistingPositionLotState> {
        self.existing_position_lots
            .iter()
            .filter(|lot| lot.asset_id == asset_id)
            .collect()
    }

    /// Total historical consumption booked against one lot.
    pub fn executed_qty_for_lot(&self, lot_id: Uuid) -> Decimal {
        self.existing_executed_trades
            .iter()
            .filter(|trade| trade.lot_id == lot_id)
            .map(|trade| trade.quantity)
            .sum()
    }
}
