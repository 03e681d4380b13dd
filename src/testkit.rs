//! Deterministic fixture factories for tests and local experiments.
//!
//! `insert_runtime_fixture` seeds one self-contained run/account/hour in
//! a substrate; `sample_execution_context` builds an in-memory context
//! for unit tests that do not need a database.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::activation::ActivationRecord;
use crate::canonical::stable_uuid;
use crate::context::ExecutionContext;
use crate::domain::{
    ActivationStatus, AssetPrecisionState, CapitalState, ClusterMembershipState, ClusterState,
    CostProfileState, DrawdownTier, ExposureMode, Horizon, PredictionState, RegimeState,
    RiskProfileState, RiskState, RunContextState, RunMode,
};
use crate::error::CoreResult;
use crate::store::{Database, Value};
use crate::tokens;

/// Prediction row hash that decides ENTER under the fixture hash set.
pub const PREDICTION_HASH_ENTER: &str =
    "4444444444444444444444444444444444444444444444444444444444444444";
/// Prediction row hash that decides EXIT under the fixture hash set.
pub const PREDICTION_HASH_EXIT: &str =
    "5555555555555555555555555555555555555555555555555555555555555555";
/// Prediction row hash that decides HOLD under the fixture hash set.
pub const PREDICTION_HASH_HOLD: &str =
    "3333333333333333333333333333333333333333333333333333333333333333";

fn repeat_hash(ch: char) -> String {
    std::iter::repeat(ch).take(64).collect()
}

/// Fixture hour shared by all seeded scenarios.
pub fn fixture_hour() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 4, 0, 0).unwrap()
}

/// Configuration knobs for one seeded scenario.
#[derive(Debug, Clone)]
pub struct FixtureConfig {
    pub seed: String,
    pub run_mode: RunMode,
    pub activation_status: ActivationStatus,
    pub activation_window_end_utc: Option<DateTime<Utc>>,
    pub backtest_valid_end_utc: Option<DateTime<Utc>>,
    pub halt_new_entries: bool,
    pub kill_switch_active: bool,
    pub drawdown_pct: Decimal,
    pub severe_loss_drawdown_trigger: Decimal,
    pub cluster_exposure_pct: Decimal,
    pub max_cluster_exposure_pct: Decimal,
    pub prediction_row_hash: String,
    pub prob_up: Decimal,
    pub expected_return: Decimal,
    pub cash_balance: Decimal,
    pub market_value: Decimal,
    pub total_exposure_pct: Decimal,
    pub open_position_count: i64,
    pub open_position_qty: Decimal,
    pub order_book: Option<OrderBookFixture>,
    pub ohlcv_close: Option<Decimal>,
    pub volatility_value: Option<Decimal>,
    pub fee_rate: Decimal,
    pub slippage_param_hash: String,
    pub lot_size: Decimal,
    pub signal_persistence_required: i64,
}

/// Best bid/ask snapshot knobs.
#[derive(Debug, Clone)]
pub struct OrderBookFixture {
    pub best_bid_price: Decimal,
    pub best_ask_price: Decimal,
    pub best_bid_size: Decimal,
    pub best_ask_size: Decimal,
}

impl Default for OrderBookFixture {
    fn default() -> Self {
        Self {
            best_bid_price: Decimal::from(99),
            best_ask_price: Decimal::from(100),
            best_bid_size: Decimal::from(1_000_000),
            best_ask_size: Decimal::from(1_000_000),
        }
    }
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            seed: "fixture".to_string(),
            run_mode: RunMode::Live,
            activation_status: ActivationStatus::Approved,
            activation_window_end_utc: None,
            backtest_valid_end_utc: None,
            halt_new_entries: false,
            kill_switch_active: false,
            drawdown_pct: Decimal::ZERO,
            severe_loss_drawdown_trigger: Decimal::new(2, 1),
            cluster_exposure_pct: Decimal::new(1, 2),
            max_cluster_exposure_pct: Decimal::new(8, 2),
            prediction_row_hash: PREDICTION_HASH_ENTER.to_string(),
            prob_up: Decimal::new(55, 2),
            expected_return: Decimal::new(2, 2),
            cash_balance: Decimal::from(10_000),
            market_value: Decimal::ZERO,
            total_exposure_pct: Decimal::ZERO,
            open_position_count: 0,
            open_position_qty: Decimal::ZERO,
            order_book: Some(OrderBookFixture::default()),
            ohlcv_close: Some(Decimal::from(100)),
            volatility_value: None,
            fee_rate: Decimal::new(26, 4),
            slippage_param_hash: repeat_hash('a'),
            lot_size: Decimal::new(1, 8),
            signal_persistence_required: 1,
        }
    }
}

/// Identifiers of the seeded scenario.
#[derive(Debug, Clone, Copy)]
pub struct FixtureIds {
    pub run_id: Uuid,
    pub account_id: i64,
    pub asset_id: i64,
    pub cluster_id: i64,
    pub membership_id: i64,
    pub model_version_id: i64,
    pub hour_ts_utc: DateTime<Utc>,
}

/// Identifiers of a preloaded lot chain.
#[derive(Debug, Clone, Copy)]
pub struct PreloadedLotIds {
    pub signal_id: Uuid,
    pub order_id: Uuid,
    pub fill_id: Uuid,
    pub lot_id: Uuid,
}

/// Insert the deterministic minimal fixture rows required by one
/// execution hour. The data is self-contained for one run/account/hour.
pub fn insert_runtime_fixture<D: Database>(
    db: &D,
    config: &FixtureConfig,
) -> CoreResult<FixtureIds> {
    let hour = fixture_hour();
    let seed = config.seed.as_str();
    let run_id = stable_uuid("fixture-run", tokens![seed]);
    let backtest_run_id = stable_uuid("fixture-backtest", tokens![seed]);
    let model_version_id = 3i64;

    let account_row = db
        .fetch_one(
            "INSERT INTO account (account_code, base_currency, is_active)
             VALUES (:account_code, 'USD', 1)
             RETURNING account_id",
            &[("account_code", Value::from(format!("ACC_{}", seed.to_uppercase())))],
        )?
        .ok_or_else(|| crate::error::CoreError::Substrate("account insert returned no id".into()))?;
    let account_id = account_row.get_i64("account_id")?;

    let asset_row = db
        .fetch_one(
            "INSERT INTO asset (
                venue, symbol, base_asset, quote_asset, tick_size, lot_size,
                is_active, listed_at_utc
             ) VALUES (
                'KRAKEN', :symbol, :symbol, 'USD', :tick_size, :lot_size, 1, :listed_at_utc
             )
             RETURNING asset_id",
            &[
                ("symbol", Value::from(format!("AS_{}", seed.to_uppercase()))),
                ("tick_size", Value::from(Decimal::new(1, 8))),
                ("lot_size", Value::from(config.lot_size)),
                ("listed_at_utc", Value::from(hour - Duration::days(365))),
            ],
        )?
        .ok_or_else(|| crate::error::CoreError::Substrate("asset insert returned no id".into()))?;
    let asset_id = asset_row.get_i64("asset_id")?;

    let cluster_row = db
        .fetch_one(
            "INSERT INTO correlation_cluster (cluster_code)
             VALUES (:cluster_code)
             RETURNING cluster_id",
            &[("cluster_code", Value::from(format!("CL_{}", seed.to_uppercase())))],
        )?
        .ok_or_else(|| crate::error::CoreError::Substrate("cluster insert returned no id".into()))?;
    let cluster_id = cluster_row.get_i64("cluster_id")?;

    let membership_row = db
        .fetch_one(
            "INSERT INTO asset_cluster_membership (
                asset_id, cluster_id, membership_hash, effective_from_utc, effective_to_utc
             ) VALUES (:asset_id, :cluster_id, :membership_hash, :effective_from_utc, NULL)
             RETURNING membership_id",
            &[
                ("asset_id", Value::from(asset_id)),
                ("cluster_id", Value::from(cluster_id)),
                ("membership_hash", Value::from(repeat_hash('9'))),
                ("effective_from_utc", Value::from(hour - Duration::days(30))),
            ],
        )?
        .ok_or_else(|| crate::error::CoreError::Substrate("membership insert returned no id".into()))?;
    let membership_id = membership_row.get_i64("membership_id")?;

    db.execute(
        "INSERT INTO cost_profile (
            venue, fee_rate, slippage_param_hash, is_active, effective_from_utc, effective_to_utc
         ) VALUES ('KRAKEN', :fee_rate, :slippage_param_hash, 1, :effective_from_utc, NULL)",
        &[
            ("fee_rate", Value::from(config.fee_rate)),
            (
                "slippage_param_hash",
                Value::from(config.slippage_param_hash.as_str()),
            ),
            ("effective_from_utc", Value::from(hour - Duration::days(30))),
        ],
    )?;

    let profile_version = format!("profile_{seed}");
    db.execute(
        "INSERT INTO risk_profile (
            profile_version, total_exposure_mode, max_total_exposure_pct,
            max_total_exposure_amount, cluster_exposure_mode, max_cluster_exposure_pct,
            max_cluster_exposure_amount, max_concurrent_positions,
            severe_loss_drawdown_trigger, volatility_feature_id, volatility_target,
            volatility_scale_floor, volatility_scale_ceiling, hold_min_expected_return,
            exit_expected_return_threshold, recovery_hold_prob_up_threshold,
            recovery_exit_prob_up_threshold, derisk_fraction, signal_persistence_required,
            row_hash
         ) VALUES (
            :profile_version, 'PERCENT_OF_PV', :max_total_exposure_pct,
            NULL, 'PERCENT_OF_PV', :max_cluster_exposure_pct,
            NULL, 10,
            :severe_loss_drawdown_trigger, 42, :volatility_target,
            :volatility_scale_floor, :volatility_scale_ceiling, :hold_min_expected_return,
            :exit_expected_return_threshold, :recovery_hold_prob_up_threshold,
            :recovery_exit_prob_up_threshold, :derisk_fraction, :signal_persistence_required,
            :row_hash
         )",
        &[
            ("profile_version", Value::from(profile_version.as_str())),
            ("max_total_exposure_pct", Value::from(Decimal::new(2, 1))),
            (
                "max_cluster_exposure_pct",
                Value::from(config.max_cluster_exposure_pct),
            ),
            (
                "severe_loss_drawdown_trigger",
                Value::from(config.severe_loss_drawdown_trigger),
            ),
            ("volatility_target", Value::from(Decimal::new(2, 2))),
            ("volatility_scale_floor", Value::from(Decimal::new(5, 1))),
            ("volatility_scale_ceiling", Value::from(Decimal::new(15, 1))),
            ("hold_min_expected_return", Value::from(Decimal::ZERO)),
            (
                "exit_expected_return_threshold",
                Value::from(Decimal::new(-5, 3)),
            ),
            (
                "recovery_hold_prob_up_threshold",
                Value::from(Decimal::new(6, 1)),
            ),
            (
                "recovery_exit_prob_up_threshold",
                Value::from(Decimal::new(35, 2)),
            ),
            ("derisk_fraction", Value::from(Decimal::new(5, 1))),
            (
                "signal_persistence_required",
                Value::from(config.signal_persistence_required),
            ),
            ("row_hash", Value::from(repeat_hash('1'))),
        ],
    )?;
    db.execute(
        "INSERT INTO account_risk_profile_assignment (
            account_id, profile_version, effective_from_utc, effective_to_utc
         ) VALUES (:account_id, :profile_version, :effective_from_utc, NULL)",
        &[
            ("account_id", Value::from(account_id)),
            ("profile_version", Value::from(profile_version.as_str())),
            ("effective_from_utc", Value::from(hour - Duration::days(30))),
        ],
    )?;

    // Lineage rows per run mode.
    let (training_window_id, activation_id) = if config.run_mode == RunMode::Backtest {
        let window_row = db
            .fetch_one(
                "INSERT INTO model_training_window (
                    backtest_run_id, model_version_id, fold_index, horizon,
                    train_end_utc, valid_start_utc, valid_end_utc,
                    training_window_hash, row_hash
                 ) VALUES (
                    :backtest_run_id, :model_version_id, 0, 'H1',
                    :train_end_utc, :valid_start_utc, :valid_end_utc,
                    :training_window_hash, :row_hash
                 )
                 RETURNING training_window_id",
                &[
                    ("backtest_run_id", Value::from(backtest_run_id)),
                    ("model_version_id", Value::from(model_version_id)),
                    ("train_end_utc", Value::from(hour - Duration::days(30))),
                    ("valid_start_utc", Value::from(hour - Duration::days(7))),
                    (
                        "valid_end_utc",
                        Value::from(
                            config
                                .backtest_valid_end_utc
                                .unwrap_or(hour + Duration::days(7)),
                        ),
                    ),
                    ("training_window_hash", Value::from(repeat_hash('2'))),
                    ("row_hash", Value::from(repeat_hash('2'))),
                ],
            )?
            .ok_or_else(|| crate::error::CoreError::Substrate("training window insert returned no id".into()))?;
        (Some(window_row.get_i64("training_window_id")?), None)
    } else {
        let window_end = config
            .activation_window_end_utc
            .unwrap_or(hour - Duration::hours(1));
        let activation_row = db
            .fetch_one(
                "INSERT INTO model_activation_gate (
                    model_version_id, run_mode, validation_window_end_utc, status, approval_hash
                 ) VALUES (:model_version_id, :run_mode, :validation_window_end_utc, :status, :approval_hash)
                 RETURNING activation_id",
                &[
                    ("model_version_id", Value::from(model_version_id)),
                    ("run_mode", Value::from(config.run_mode.as_str())),
                    ("validation_window_end_utc", Value::from(window_end)),
                    ("status", Value::from(config.activation_status.as_str())),
                    ("approval_hash", Value::from(repeat_hash('3'))),
                ],
            )?
            .ok_or_else(|| crate::error::CoreError::Substrate("activation insert returned no id".into()))?;
        (None, Some(activation_row.get_i64("activation_id")?))
    };

    db.execute(
        "INSERT INTO run_context (
            run_id, account_id, run_mode, hour_ts_utc, origin_hour_ts_utc,
            run_seed_hash, context_hash, replay_root_hash
         ) VALUES (
            :run_id, :account_id, :run_mode, :hour_ts_utc, :hour_ts_utc,
            :run_seed_hash, :context_hash, :replay_root_hash
         )",
        &[
            ("run_id", Value::from(run_id)),
            ("account_id", Value::from(account_id)),
            ("run_mode", Value::from(config.run_mode.as_str())),
            ("hour_ts_utc", Value::from(hour)),
            ("run_seed_hash", Value::from(repeat_hash('5'))),
            ("context_hash", Value::from(repeat_hash('c'))),
            ("replay_root_hash", Value::from(repeat_hash('f'))),
        ],
    )?;

    db.execute(
        "INSERT INTO model_prediction (
            run_id, account_id, run_mode, asset_id, hour_ts_utc, horizon, model_version_id,
            prob_up, expected_return, upstream_hash, row_hash,
            training_window_id, lineage_backtest_run_id, lineage_fold_index, lineage_horizon,
            activation_id
         ) VALUES (
            :run_id, :account_id, :run_mode, :asset_id, :hour_ts_utc, 'H1', :model_version_id,
            :prob_up, :expected_return, :upstream_hash, :row_hash,
            :training_window_id, :lineage_backtest_run_id, :lineage_fold_index, :lineage_horizon,
            :activation_id
         )",
        &[
            ("run_id", Value::from(run_id)),
            ("account_id", Value::from(account_id)),
            ("run_mode", Value::from(config.run_mode.as_str())),
            ("asset_id", Value::from(asset_id)),
            ("hour_ts_utc", Value::from(hour)),
            ("model_version_id", Value::from(model_version_id)),
            ("prob_up", Value::from(config.prob_up)),
            ("expected_return", Value::from(config.expected_return)),
            ("upstream_hash", Value::from(repeat_hash('6'))),
            ("row_hash", Value::from(config.prediction_row_hash.as_str())),
            ("training_window_id", Value::from(training_window_id)),
            (
                "lineage_backtest_run_id",
                Value::from(training_window_id.map(|_| backtest_run_id)),
            ),
            (
                "lineage_fold_index",
                Value::from(training_window_id.map(|_| 0i64)),
            ),
            (
                "lineage_horizon",
                Value::from(training_window_id.map(|_| "H1")),
            ),
            ("activation_id", Value::from(activation_id)),
        ],
    )?;

    db.execute(
        "INSERT INTO regime_output (
            run_id, account_id, run_mode, asset_id, hour_ts_utc, model_version_id,
            regime_label, upstream_hash, row_hash,
            training_window_id, lineage_backtest_run_id, lineage_fold_index, lineage_horizon,
            activation_id
         ) VALUES (
            :run_id, :account_id, :run_mode, :asset_id, :hour_ts_utc, :model_version_id,
            'TREND', :upstream_hash, :row_hash,
            :training_window_id, :lineage_backtest_run_id, :lineage_fold_index, :lineage_horizon,
            :activation_id
         )",
        &[
            ("run_id", Value::from(run_id)),
            ("account_id", Value::from(account_id)),
            ("run_mode", Value::from(config.run_mode.as_str())),
            ("asset_id", Value::from(asset_id)),
            ("hour_ts_utc", Value::from(hour)),
            ("model_version_id", Value::from(model_version_id)),
            ("upstream_hash", Value::from(repeat_hash('8'))),
            ("row_hash", Value::from(repeat_hash('7'))),
            ("training_window_id", Value::from(training_window_id)),
            (
                "lineage_backtest_run_id",
                Value::from(training_window_id.map(|_| backtest_run_id)),
            ),
            (
                "lineage_fold_index",
                Value::from(training_window_id.map(|_| 0i64)),
            ),
            (
                "lineage_horizon",
                Value::from(training_window_id.map(|_| "H1")),
            ),
            ("activation_id", Value::from(activation_id)),
        ],
    )?;

    let drawdown_tier = DrawdownTier::from_drawdown_pct(config.drawdown_pct);
    let halted_by_drawdown = config.drawdown_pct >= Decimal::new(2, 1);
    let halt_new_entries = config.halt_new_entries || halted_by_drawdown;
    let base_risk_fraction = if halted_by_drawdown {
        Decimal::ZERO
    } else {
        Decimal::new(2, 2)
    };
    let portfolio_value = config.cash_balance + config.market_value;
    db.execute(
        "INSERT INTO risk_hourly_state (
            run_mode, account_id, hour_ts_utc, source_run_id, portfolio_value,
            peak_portfolio_value, drawdown_pct, drawdown_tier, base_risk_fraction,
            max_concurrent_positions, max_total_exposure_pct, max_cluster_exposure_pct,
            halt_new_entries, kill_switch_active, kill_switch_reason, requires_manual_review,
            state_hash, row_hash
         ) VALUES (
            :run_mode, :account_id, :hour_ts_utc, :source_run_id, :portfolio_value,
            :peak_portfolio_value, :drawdown_pct, :drawdown_tier, :base_risk_fraction,
            10, :max_total_exposure_pct, :max_cluster_exposure_pct,
            :halt_new_entries, :kill_switch_active, :kill_switch_reason, :requires_manual_review,
            :state_hash, :row_hash
         )",
        &[
            ("run_mode", Value::from(config.run_mode.as_str())),
            ("account_id", Value::from(account_id)),
            ("hour_ts_utc", Value::from(hour)),
            ("source_run_id", Value::from(run_id)),
            ("portfolio_value", Value::from(portfolio_value)),
            ("peak_portfolio_value", Value::from(portfolio_value)),
            ("drawdown_pct", Value::from(config.drawdown_pct)),
            ("drawdown_tier", Value::from(drawdown_tier.as_str())),
            ("base_risk_fraction", Value::from(base_risk_fraction)),
            ("max_total_exposure_pct", Value::from(Decimal::new(2, 1))),
            (
                "max_cluster_exposure_pct",
                Value::from(config.max_cluster_exposure_pct),
            ),
            ("halt_new_entries", Value::from(halt_new_entries)),
            ("kill_switch_active", Value::from(config.kill_switch_active)),
            (
                "kill_switch_reason",
                Value::from(if config.kill_switch_active {
                    Some("fixture kill switch")
                } else {
                    None
                }),
            ),
            ("requires_manual_review", Value::from(halted_by_drawdown)),
            ("state_hash", Value::from(repeat_hash('b'))),
            ("row_hash", Value::from(repeat_hash('b'))),
        ],
    )?;

    db.execute(
        "INSERT INTO portfolio_hourly_state (
            run_mode, account_id, hour_ts_utc, source_run_id, cash_balance, market_value,
            portfolio_value, total_exposure_pct, open_position_count, halted, row_hash
         ) VALUES (
            :run_mode, :account_id, :hour_ts_utc, :source_run_id, :cash_balance, :market_value,
            :portfolio_value, :total_exposure_pct, :open_position_count, :halted, :row_hash
         )",
        &[
            ("run_mode", Value::from(config.run_mode.as_str())),
            ("account_id", Value::from(account_id)),
            ("hour_ts_utc", Value::from(hour)),
            ("source_run_id", Value::from(run_id)),
            ("cash_balance", Value::from(config.cash_balance)),
            ("market_value", Value::from(config.market_value)),
            ("portfolio_value", Value::from(portfolio_value)),
            ("total_exposure_pct", Value::from(config.total_exposure_pct)),
            (
                "open_position_count",
                Value::from(config.open_position_count),
            ),
            ("halted", Value::from(halt_new_entries)),
            ("row_hash", Value::from(repeat_hash('d'))),
        ],
    )?;

    db.execute(
        "INSERT INTO cluster_exposure_hourly_state (
            run_mode, account_id, cluster_id, hour_ts_utc, source_run_id,
            exposure_pct, max_cluster_exposure_pct, state_hash, parent_risk_hash, row_hash
         ) VALUES (
            :run_mode, :account_id, :cluster_id, :hour_ts_utc, :source_run_id,
            :exposure_pct, :max_cluster_exposure_pct, :state_hash, :parent_risk_hash, :row_hash
         )",
        &[
            ("run_mode", Value::from(config.run_mode.as_str())),
            ("account_id", Value::from(account_id)),
            ("cluster_id", Value::from(cluster_id)),
            ("hour_ts_utc", Value::from(hour)),
            ("source_run_id", Value::from(run_id)),
            ("exposure_pct", Value::from(config.cluster_exposure_pct)),
            (
                "max_cluster_exposure_pct",
                Value::from(config.max_cluster_exposure_pct),
            ),
            ("state_hash", Value::from(repeat_hash('e'))),
            ("parent_risk_hash", Value::from(repeat_hash('b'))),
            ("row_hash", Value::from(repeat_hash('a'))),
        ],
    )?;

    if config.open_position_qty > Decimal::ZERO {
        db.execute(
            "INSERT INTO position_hourly_state (
                run_mode, account_id, asset_id, hour_ts_utc, source_run_id,
                quantity, exposure_pct, unrealized_pnl, row_hash
             ) VALUES (
                :run_mode, :account_id, :asset_id, :hour_ts_utc, :source_run_id,
                :quantity, :exposure_pct, :unrealized_pnl, :row_hash
             )",
            &[
                ("run_mode", Value::from(config.run_mode.as_str())),
                ("account_id", Value::from(account_id)),
                ("asset_id", Value::from(asset_id)),
                ("hour_ts_utc", Value::from(hour)),
                ("source_run_id", Value::from(run_id)),
                ("quantity", Value::from(config.open_position_qty)),
                ("exposure_pct", Value::from(Decimal::new(1, 2))),
                ("unrealized_pnl", Value::from(Decimal::ZERO)),
                ("row_hash", Value::from(repeat_hash('4'))),
            ],
        )?;
    }

    if let Some(book) = &config.order_book {
        db.execute(
            "INSERT INTO order_book_snapshot (
                asset_id, snapshot_ts_utc, hour_ts_utc, best_bid_price, best_ask_price,
                best_bid_size, best_ask_size, row_hash
             ) VALUES (
                :asset_id, :snapshot_ts_utc, :hour_ts_utc, :best_bid_price, :best_ask_price,
                :best_bid_size, :best_ask_size, :row_hash
             )",
            &[
                ("asset_id", Value::from(asset_id)),
                ("snapshot_ts_utc", Value::from(hour)),
                ("hour_ts_utc", Value::from(hour)),
                ("best_bid_price", Value::from(book.best_bid_price)),
                ("best_ask_price", Value::from(book.best_ask_price)),
                ("best_bid_size", Value::from(book.best_bid_size)),
                ("best_ask_size", Value::from(book.best_ask_size)),
                ("row_hash", Value::from(repeat_hash('0'))),
            ],
        )?;
    }

    if let Some(close_price) = config.ohlcv_close {
        db.execute(
            "INSERT INTO market_ohlcv_hourly (
                asset_id, hour_ts_utc, source_venue, close_price, row_hash
             ) VALUES (:asset_id, :hour_ts_utc, 'KRAKEN', :close_price, :row_hash)",
            &[
                ("asset_id", Value::from(asset_id)),
                ("hour_ts_utc", Value::from(hour)),
                ("close_price", Value::from(close_price)),
                ("row_hash", Value::from(repeat_hash('0'))),
            ],
        )?;
    }

    if let Some(volatility) = config.volatility_value {
        db.execute(
            "INSERT INTO feature_snapshot (
                run_id, run_mode, hour_ts_utc, asset_id, feature_id, feature_value, row_hash
             ) VALUES (:run_id, :run_mode, :hour_ts_utc, :asset_id, 42, :feature_value, :row_hash)",
            &[
                ("run_id", Value::from(run_id)),
                ("run_mode", Value::from(config.run_mode.as_str())),
                ("hour_ts_utc", Value::from(hour)),
                ("asset_id", Value::from(asset_id)),
                ("feature_value", Value::from(volatility)),
                ("row_hash", Value::from(repeat_hash('0'))),
            ],
        )?;
    }

    Ok(FixtureIds {
        run_id,
        account_id,
        asset_id,
        cluster_id,
        membership_id,
        model_version_id,
        hour_ts_utc: hour,
    })
}

/// Seed a signal→order→fill→lot chain so the hour starts with inventory.
pub fn insert_preloaded_lot<D: Database>(
    db: &D,
    ids: &FixtureIds,
    run_mode: RunMode,
    quantity: Decimal,
    price: Decimal,
) -> CoreResult<PreloadedLotIds> {
    let hour = ids.hour_ts_utc;
    let signal_id = stable_uuid("fixture-lot-signal", tokens![ids.run_id]);
    let order_id = stable_uuid("fixture-lot-order", tokens![ids.run_id]);
    let fill_id = stable_uuid("fixture-lot-fill", tokens![ids.run_id]);
    let lot_id = stable_uuid("fixture-lot", tokens![ids.run_id]);
    let notional = price * quantity;

    db.execute(
        "INSERT INTO trade_signal (
            signal_id, run_id, run_mode, account_id, asset_id, hour_ts_utc, horizon, action,
            direction, confidence, expected_return, assumed_fee_rate, assumed_slippage_rate,
            net_edge, target_position_notional, position_size_fraction, risk_state_hour_ts_utc,
            decision_hash, risk_state_run_id, cluster_membership_id, upstream_hash, row_hash
         ) VALUES (
            :signal_id, :run_id, :run_mode, :account_id, :asset_id, :hour_ts_utc, 'H1', 'ENTER',
            'LONG', :confidence, :expected_return, :fee_rate, :slippage_rate,
            :net_edge, :notional, :fraction, :hour_ts_utc,
            :decision_hash, :run_id, :membership_id, :upstream_hash, :row_hash
         )",
        &[
            ("signal_id", Value::from(signal_id)),
            ("run_id", Value::from(ids.run_id)),
            ("run_mode", Value::from(run_mode.as_str())),
            ("account_id", Value::from(ids.account_id)),
            ("asset_id", Value::from(ids.asset_id)),
            ("hour_ts_utc", Value::from(hour)),
            ("confidence", Value::from(Decimal::new(5, 1))),
            ("expected_return", Value::from(Decimal::new(2, 2))),
            ("fee_rate", Value::from(Decimal::ZERO)),
            ("slippage_rate", Value::from(Decimal::ZERO)),
            ("net_edge", Value::from(Decimal::new(2, 2))),
            ("notional", Value::from(notional)),
            ("fraction", Value::from(Decimal::new(1, 2))),
            ("decision_hash", Value::from(repeat_hash('d'))),
            ("membership_id", Value::from(ids.membership_id)),
            ("upstream_hash", Value::from(repeat_hash('6'))),
            ("row_hash", Value::from(repeat_hash('8'))),
        ],
    )?;

    db.execute(
        "INSERT INTO order_request (
            order_id, signal_id, run_id, run_mode, account_id, asset_id, client_order_id,
            request_ts_utc, hour_ts_utc, side, order_type, tif, limit_price, requested_qty,
            requested_notional, pre_order_cash_available, risk_check_passed, status,
            cost_profile_id, origin_hour_ts_utc, risk_state_run_id, cluster_membership_id,
            attempt_seq, parent_signal_hash, row_hash
         ) VALUES (
            :order_id, :signal_id, :run_id, :run_mode, :account_id, :asset_id, :client_order_id,
            :hour_ts_utc, :hour_ts_utc, 'BUY', 'MARKET', 'IOC', NULL, :quantity,
            :notional, :cash, 1, 'FILLED',
            1, :hour_ts_utc, :run_id, :membership_id,
            0, :parent_signal_hash, :row_hash
         )",
        &[
            ("order_id", Value::from(order_id)),
            ("signal_id", Value::from(signal_id)),
            ("run_id", Value::from(ids.run_id)),
            ("run_mode", Value::from(run_mode.as_str())),
            ("account_id", Value::from(ids.account_id)),
            ("asset_id", Value::from(ids.asset_id)),
            (
                "client_order_id",
                Value::from(format!("det-preload-{}", &order_id.simple().to_string()[..16])),
            ),
            ("hour_ts_utc", Value::from(hour)),
            ("quantity", Value::from(quantity)),
            ("notional", Value::from(notional)),
            ("cash", Value::from(Decimal::from(10_000))),
            ("membership_id", Value::from(ids.membership_id)),
            ("parent_signal_hash", Value::from(repeat_hash('8'))),
            ("row_hash", Value::from(repeat_hash('9'))),
        ],
    )?;

    db.execute(
        "INSERT INTO order_fill (
            fill_id, order_id, run_id, run_mode, account_id, asset_id, exchange_trade_id,
            fill_ts_utc, hour_ts_utc, fill_price, fill_qty, fill_notional, fee_paid, fee_rate,
            realized_slippage_rate, slippage_cost, liquidity_flag, origin_hour_ts_utc,
            parent_order_hash, row_hash
         ) VALUES (
            :fill_id, :order_id, :run_id, :run_mode, :account_id, :asset_id, :exchange_trade_id,
            :hour_ts_utc, :hour_ts_utc, :price, :quantity, :notional, :zero, :zero,
            :zero, :zero, 'TAKER', :hour_ts_utc,
            :parent_order_hash, :row_hash
         )",
        &[
            ("fill_id", Value::from(fill_id)),
            ("order_id", Value::from(order_id)),
            ("run_id", Value::from(ids.run_id)),
            ("run_mode", Value::from(run_mode.as_str())),
            ("account_id", Value::from(ids.account_id)),
            ("asset_id", Value::from(ids.asset_id)),
            (
                "exchange_trade_id",
                Value::from(format!("sim-preload-{}", &fill_id.simple().to_string()[..16])),
            ),
            ("hour_ts_utc", Value::from(hour)),
            ("price", Value::from(price)),
            ("quantity", Value::from(quantity)),
            ("notional", Value::from(notional)),
            ("zero", Value::from(Decimal::ZERO)),
            ("parent_order_hash", Value::from(repeat_hash('9'))),
            ("row_hash", Value::from(repeat_hash('c'))),
        ],
    )?;

    db.execute(
        "INSERT INTO position_lot (
            lot_id, open_fill_id, run_id, run_mode, account_id, asset_id, hour_ts_utc,
            open_ts_utc, open_price, open_qty, open_notional, open_fee, remaining_qty,
            origin_hour_ts_utc, parent_fill_hash, row_hash
         ) VALUES (
            :lot_id, :open_fill_id, :run_id, :run_mode, :account_id, :asset_id, :hour_ts_utc,
            :hour_ts_utc, :price, :quantity, :notional, :zero, :quantity,
            :hour_ts_utc, :parent_fill_hash, :row_hash
         )",
        &[
            ("lot_id", Value::from(lot_id)),
            ("open_fill_id", Value::from(fill_id)),
            ("run_id", Value::from(ids.run_id)),
            ("run_mode", Value::from(run_mode.as_str())),
            ("account_id", Value::from(ids.account_id)),
            ("asset_id", Value::from(ids.asset_id)),
            ("hour_ts_utc", Value::from(hour)),
            ("price", Value::from(price)),
            ("quantity", Value::from(quantity)),
            ("notional", Value::from(notional)),
            ("zero", Value::from(Decimal::ZERO)),
            ("parent_fill_hash", Value::from(repeat_hash('c'))),
            ("row_hash", Value::from(repeat_hash('7'))),
        ],
    )?;

    Ok(PreloadedLotIds {
        signal_id,
        order_id,
        fill_id,
        lot_id,
    })
}

/// In-memory execution context for unit tests.
pub fn sample_execution_context() -> ExecutionContext {
    let hour = fixture_hour();
    let run_id = stable_uuid("fixture-run", tokens!["sample"]);
    ExecutionContext {
        run_context: RunContextState {
            run_id,
            account_id: 1,
            run_mode: RunMode::Live,
            hour_ts_utc: hour,
            origin_hour_ts_utc: hour,
            run_seed_hash: repeat_hash('5'),
            context_hash: repeat_hash('c'),
            replay_root_hash: repeat_hash('f'),
        },
        predictions: Vec::new(),
        regimes: Vec::new(),
        risk_state: RiskState {
            run_mode: RunMode::Live,
            account_id: 1,
            hour_ts_utc: hour,
            source_run_id: run_id,
            portfolio_value: Decimal::from(10_000),
            drawdown_pct: Decimal::ZERO,
            drawdown_tier: DrawdownTier::Normal,
            base_risk_fraction: Decimal::new(2, 2),
            max_concurrent_positions: 10,
            max_total_exposure_pct: Decimal::new(2, 1),
            max_cluster_exposure_pct: Decimal::new(8, 2),
            halt_new_entries: false,
            kill_switch_active: false,
            state_hash: repeat_hash('b'),
            row_hash: repeat_hash('b'),
        },
        capital_state: CapitalState {
            run_mode: RunMode::Live,
            account_id: 1,
            hour_ts_utc: hour,
            source_run_id: run_id,
            cash_balance: Decimal::from(10_000),
            portfolio_value: Decimal::from(10_000),
            total_exposure_pct: Decimal::ZERO,
            open_position_count: 0,
            row_hash: repeat_hash('d'),
        },
        cluster_states: vec![ClusterState {
            run_mode: RunMode::Live,
            account_id: 1,
            cluster_id: 5,
            hour_ts_utc: hour,
            source_run_id: run_id,
            exposure_pct: Decimal::new(1, 2),
            max_cluster_exposure_pct: Decimal::new(8, 2),
            state_hash: repeat_hash('e'),
            parent_risk_hash: repeat_hash('b'),
            row_hash: repeat_hash('a'),
        }],
        prior_economic_state: None,
        training_windows: Vec::new(),
        activation_records: vec![ActivationRecord {
            activation_id: 7,
            model_version_id: 3,
            run_mode: RunMode::Live,
            validation_window_end_utc: hour - Duration::hours(1),
            status: ActivationStatus::Approved,
            approval_hash: repeat_hash('3'),
        }],
        memberships: vec![ClusterMembershipState {
            membership_id: 11,
            asset_id: 9,
            cluster_id: 5,
            membership_hash: repeat_hash('9'),
        }],
        cost_profile: CostProfileState {
            cost_profile_id: 1,
            fee_rate: Decimal::new(26, 4),
            slippage_param_hash: repeat_hash('a'),
        },
        risk_profile: RiskProfileState {
            profile_version: "schema_baseline_v1".to_string(),
            total_exposure_mode: ExposureMode::PercentOfPv,
            max_total_exposure_pct: Some(Decimal::new(2, 1)),
            max_total_exposure_amount: None,
            cluster_exposure_mode: ExposureMode::PercentOfPv,
            max_cluster_exposure_pct: Some(Decimal::new(8, 2)),
            max_cluster_exposure_amount: None,
            max_concurrent_positions: 10,
            severe_loss_drawdown_trigger: Decimal::new(2, 1),
            volatility_feature_id: 42,
            volatility_target: Decimal::new(2, 2),
            volatility_scale_floor: Decimal::new(5, 1),
            volatility_scale_ceiling: Decimal::new(15, 1),
            hold_min_expected_return: Decimal::ZERO,
            exit_expected_return_threshold: Decimal::new(-5, 3),
            recovery_hold_prob_up_threshold: Decimal::new(6, 1),
            recovery_exit_prob_up_threshold: Decimal::new(35, 2),
            derisk_fraction: Decimal::new(5, 1),
            signal_persistence_required: 1,
            row_hash: repeat_hash('1'),
        },
        volatility_features: Vec::new(),
        positions: Vec::new(),
        asset_precisions: vec![AssetPrecisionState {
            asset_id: 9,
            tick_size: Decimal::new(1, 8),
            lot_size: Decimal::new(1, 8),
        }],
        order_book_snapshots: Vec::new(),
        ohlcv_rows: Vec::new(),
        existing_order_fills: Vec::new(),
        existing_position_lots: Vec::new(),
        existing_executed_trades: Vec::new(),
    }
}

/// A prediction aligned with [`sample_execution_context`].
pub fn sample_prediction(
    row_hash: &str,
    prob_up: Decimal,
    expected_return: Decimal,
) -> PredictionState {
    let hour = fixture_hour();
    PredictionState {
        run_id: stable_uuid("fixture-run", tokens!["sample"]),
        account_id: 1,
        run_mode: RunMode::Live,
        asset_id: 9,
        hour_ts_utc: hour,
        horizon: Horizon::H1,
        model_version_id: 3,
        prob_up,
        expected_return,
        upstream_hash: repeat_hash('6'),
        row_hash: row_hash.to_string(),
        training_window_id: None,
        lineage_backtest_run_id: None,
        lineage_fold_index: None,
        lineage_horizon: None,
        activation_id: Some(7),
    }
}

/// A regime row aligned with [`sample_execution_context`].
pub fn sample_regime() -> RegimeState {
    let hour = fixture_hour();
    RegimeState {
        run_id: stable_uuid("fixture-run", tokens!["sample"]),
        account_id: 1,
        run_mode: RunMode::Live,
        asset_id: 9,
        hour_ts_utc: hour,
        model_version_id: 3,
        regime_label: "TREND".to_string(),
        upstream_hash: repeat_hash('8'),
        row_hash: repeat_hash('7'),
        training_window_id: None,
        lineage_backtest_run_id: None,
        lineage_fold_index: None,
        lineage_horizon: None,
        activation_id: Some(7),
    }
}
