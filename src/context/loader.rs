//! Context loading: deterministic-ordered fetches for one execution key.

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::activation::ActivationRecord;
use crate::context::ExecutionContext;
use crate::domain::{
    AssetPrecisionState, CapitalState, ClusterMembershipState, ClusterState, CostProfileState,
    ExistingExecutedTradeState, ExistingOrderFillState, ExistingPositionLotState, OhlcvState,
    OrderBookSnapshotState, PositionState, PredictionState, PriorEconomicState, RegimeState,
    RiskProfileState, RiskState, RunContextState, RunMode, TrainingWindowState,
    VolatilityFeatureState,
};
use crate::error::{CoreError, CoreResult};
use crate::store::{Database, Row, Value};

/// Construct and validate the deterministic execution context.
pub struct DeterministicContextBuilder<'a, D: Database> {
    db: &'a D,
}

impl<'a, D: Database> DeterministicContextBuilder<'a, D> {
    pub fn new(db: &'a D) -> Self {
        Self { db }
    }

    pub fn build_context(
        &self,
        run_id: Uuid,
        account_id: i64,
        run_mode: RunMode,
        hour_ts_utc: DateTime<Utc>,
    ) -> CoreResult<ExecutionContext> {
        let run_context = self.load_run_context(run_id, account_id, run_mode, hour_ts_utc)?;
        let predictions = self.load_predictions(run_id, account_id, run_mode, hour_ts_utc)?;
        let regimes = self.load_regimes(run_id, account_id, run_mode, hour_ts_utc)?;
        let risk_state = self.load_risk_state(run_id, account_id, run_mode, hour_ts_utc)?;
        let capital_state = self.load_capital_state(run_id, account_id, run_mode, hour_ts_utc)?;
        let cluster_states = self.load_cluster_states(run_id, account_id, run_mode, hour_ts_utc)?;
        let prior_economic_state =
            self.load_prior_economic_state(account_id, run_mode, hour_ts_utc)?;
        let training_windows = self.load_training_windows(&predictions, &regimes)?;
        let activation_records = self.load_activation_records(&predictions, &regimes)?;
        let memberships = self.load_memberships(&predictions, hour_ts_utc)?;
        let cost_profile = self.load_cost_profile(hour_ts_utc)?;
        let risk_profile = self.load_risk_profile(account_id, hour_ts_utc)?;
        let volatility_features = self.load_volatility_features(
            run_id,
            run_mode,
            hour_ts_utc,
            &predictions,
            risk_profile.volatility_feature_id,
        )?;
        let positions = self.load_positions(run_id, account_id, run_mode, hour_ts_utc)?;
        let asset_precisions = self.load_asset_precisions(&predictions)?;
        let order_book_snapshots = self.load_order_book_snapshots(&predictions, hour_ts_utc)?;
        let ohlcv_rows = self.load_ohlcv_rows(&predictions, hour_ts_utc)?;
        let existing_order_fills = self.load_existing_order_fills(run_id, account_id, run_mode)?;
        let existing_position_lots =
            self.load_existing_position_lots(run_id, account_id, run_mode)?;
        let existing_executed_trades =
            self.load_existing_executed_trades(run_id, account_id, run_mode)?;

        debug!(
            run_id = %run_id,
            account_id,
            run_mode = %run_mode,
            predictions = predictions.len(),
            regimes = regimes.len(),
            "loaded deterministic context"
        );

        let context = ExecutionContext {
            run_context,
            predictions,
            regimes,
            risk_state,
            capital_state,
            cluster_states,
            prior_economic_state,
            training_windows,
            activation_records,
            memberships,
            cost_profile,
            risk_profile,
            volatility_features,
            positions,
            asset_precisions,
            order_book_snapshots,
            ohlcv_rows,
            existing_order_fills,
            existing_position_lots,
            existing_executed_trades,
        };
        super::validate::validate_context(&context)?;
        Ok(context)
    }

    fn load_run_context(
        &self,
        run_id: Uuid,
        account_id: i64,
        run_mode: RunMode,
        hour_ts_utc: DateTime<Utc>,
    ) -> CoreResult<RunContextState> {
        let row = self
            .db
            .fetch_one(
                "SELECT run_id, account_id, run_mode, hour_ts_utc, origin_hour_ts_utc,
                        run_seed_hash, context_hash, replay_root_hash
                 FROM run_context
                 WHERE run_id = :run_id
                   AND account_id = :account_id
                   AND run_mode = :run_mode
                   AND origin_hour_ts_utc = :hour_ts_utc",
                &[
                    ("run_id", Value::from(run_id)),
                    ("account_id", Value::from(account_id)),
                    ("run_mode", Value::from(run_mode.as_str())),
                    ("hour_ts_utc", Value::from(hour_ts_utc)),
                ],
            )?
            .ok_or_else(|| {
                CoreError::InputMissing(
                    "run_context row not found for deterministic execution key".to_string(),
                )
            })?;
        Ok(RunContextState {
            run_id: row.get_uuid("run_id")?,
            account_id: row.get_i64("account_id")?,
            run_mode: row.get_enum("run_mode")?,
            hour_ts_utc: row.get_timestamp("hour_ts_utc")?,
            origin_hour_ts_utc: row.get_timestamp("origin_hour_ts_utc")?,
            run_seed_hash: row.get_str("run_seed_hash")?,
            context_hash: row.get_str("context_hash")?,
            replay_root_hash: row.get_str("replay_root_hash")?,
        })
    }

    fn load_predictions(
        &self,
        run_id: Uuid,
        account_id: i64,
        run_mode: RunMode,
        hour_ts_utc: DateTime<Utc>,
    ) -> CoreResult<Vec<PredictionState>> {
        let rows = self.db.fetch_all(
            "SELECT run_id, account_id, run_mode, asset_id, hour_ts_utc, horizon,
                    model_version_id, prob_up, expected_return, upstream_hash, row_hash,
                    training_window_id, lineage_backtest_run_id, lineage_fold_index,
                    lineage_horizon, activation_id
             FROM model_prediction
             WHERE run_id = :run_id
               AND account_id = :account_id
               AND run_mode = :run_mode
               AND hour_ts_utc = :hour_ts_utc
             ORDER BY asset_id ASC, horizon ASC, model_version_id ASC, row_hash ASC",
            &[
                ("run_id", Value::from(run_id)),
                ("account_id", Value::from(account_id)),
                ("run_mode", Value::from(run_mode.as_str())),
                ("hour_ts_utc", Value::from(hour_ts_utc)),
            ],
        )?;
        rows.iter().map(decode_prediction).collect()
    }

    fn load_regimes(
        &self,
        run_id: Uuid,
        account_id: i64,
        run_mode: RunMode,
        hour_ts_utc: DateTime<Utc>,
    ) -> CoreResult<Vec<RegimeState>> {
        let rows = self.db.fetch_all(
            "SELECT run_id, account_id, run_mode, asset_id, hour_ts_utc, model_version_id,
                    regime_label, upstream_hash, row_hash,
                    training_window_id, lineage_backtest_run_id, lineage_fold_index,
                    lineage_horizon, activation_id
             FROM regime_output
             WHERE run_id = :run_id
               AND account_id = :account_id
               AND run_mode = :run_mode
               AND hour_ts_utc = :hour_ts_utc
             ORDER BY asset_id ASC, model_version_id ASC, row_hash ASC",
            &[
                ("run_id", Value::from(run_id)),
                ("account_id", Value::from(account_id)),
                ("run_mode", Value::from(run_mode.as_str())),
                ("hour_ts_utc", Value::from(hour_ts_utc)),
            ],
        )?;
        rows.iter().map(decode_regime).collect()
    }

    fn load_risk_state(
        &self,
        run_id: Uuid,
        account_id: i64,
        run_mode: RunMode,
        hour_ts_utc: DateTime<Utc>,
    ) -> CoreResult<RiskState> {
        let row = self
            .db
            .fetch_one(
                "SELECT run_mode, account_id, hour_ts_utc, source_run_id, portfolio_value,
                        drawdown_pct, drawdown_tier, base_risk_fraction, max_concurrent_positions,
                        max_total_exposure_pct, max_cluster_exposure_pct, halt_new_entries,
                        kill_switch_active, state_hash, row_hash
                 FROM risk_hourly_state
                 WHERE run_mode = :run_mode
                   AND account_id = :account_id
                   AND hour_ts_utc = :hour_ts_utc
                   AND source_run_id = :source_run_id",
                &[
                    ("run_mode", Value::from(run_mode.as_str())),
                    ("account_id", Value::from(account_id)),
                    ("hour_ts_utc", Value::from(hour_ts_utc)),
                    ("source_run_id", Value::from(run_id)),
                ],
            )?
            .ok_or_else(|| {
                CoreError::InputMissing(
                    "risk_hourly_state row not found for execution key".to_string(),
                )
            })?;
        Ok(RiskState {
            run_mode: row.get_enum("run_mode")?,
            account_id: row.get_i64("account_id")?,
            hour_ts_utc: row.get_timestamp("hour_ts_utc")?,
            source_run_id: row.get_uuid("source_run_id")?,
            portfolio_value: row.get_decimal("portfolio_value")?,
            drawdown_pct: row.get_decimal("drawdown_pct")?,
            drawdown_tier: row.get_enum("drawdown_tier")?,
            base_risk_fraction: row.get_decimal("base_risk_fraction")?,
            max_concurrent_positions: row.get_i64("max_concurrent_positions")?,
            max_total_exposure_pct: row.get_decimal("max_total_exposure_pct")?,
            max_cluster_exposure_pct: row.get_decimal("max_cluster_exposure_pct")?,
            halt_new_entries: row.get_bool("halt_new_entries")?,
            kill_switch_active: row.get_bool("kill_switch_active")?,
            state_hash: row.get_str("state_hash")?,
            row_hash: row.get_str("row_hash")?,
        })
    }

    fn load_capital_state(
        &self,
        run_id: Uuid,
        account_id: i64,
        run_mode: RunMode,
        hour_ts_utc: DateTime<Utc>,
    ) -> CoreResult<CapitalState> {
        let row = self
            .db
            .fetch_one(
                "SELECT run_mode, account_id, hour_ts_utc, source_run_id, cash_balance,
                        portfolio_value, total_exposure_pct, open_position_count, row_hash
                 FROM portfolio_hourly_state
                 WHERE run_mode = :run_mode
                   AND account_id = :account_id
                   AND hour_ts_utc = :hour_ts_utc
                   AND source_run_id = :source_run_id",
                &[
                    ("run_mode", Value::from(run_mode.as_str())),
                    ("account_id", Value::from(account_id)),
                    ("hour_ts_utc", Value::from(hour_ts_utc)),
                    ("source_run_id", Value::from(run_id)),
                ],
            )?
            .ok_or_else(|| {
                CoreError::InputMissing(
                    "portfolio_hourly_state row not found for execution key".to_string(),
                )
            })?;
        Ok(CapitalState {
            run_mode: row.get_enum("run_mode")?,
            account_id: row.get_i64("account_id")?,
            hour_ts_utc: row.get_timestamp("hour_ts_utc")?,
            source_run_id: row.get_uuid("source_run_id")?,
            cash_balance: row.get_decimal("cash_balance")?,
            portfolio_value: row.get_decimal("portfolio_value")?,
            total_exposure_pct: row.get_decimal("total_exposure_pct")?,
            open_position_count: row.get_i64("open_position_count")?,
            row_hash: row.get_str("row_hash")?,
        })
    }

    fn load_cluster_states(
        &self,
        run_id: Uuid,
        account_id: i64,
        run_mode: RunMode,
        hour_ts_utc: DateTime<Utc>,
    ) -> CoreResult<Vec<ClusterState>> {
        let rows = self.db.fetch_all(
            "SELECT run_mode, account_id, cluster_id, hour_ts_utc, source_run_id,
                    exposure_pct, max_cluster_exposure_pct, state_hash, parent_risk_hash, row_hash
             FROM cluster_exposure_hourly_state
             WHERE run_mode = :run_mode
               AND account_id = :account_id
               AND hour_ts_utc = :hour_ts_utc
               AND source_run_id = :source_run_id
             ORDER BY cluster_id ASC",
            &[
                ("run_mode", Value::from(run_mode.as_str())),
                ("account_id", Value::from(account_id)),
                ("hour_ts_utc", Value::from(hour_ts_utc)),
                ("source_run_id", Value::from(run_id)),
            ],
        )?;
        rows.iter()
            .map(|row| {
                Ok(ClusterState {
                    run_mode: row.get_enum("run_mode")?,
                    account_id: row.get_i64("account_id")?,
                    cluster_id: row.get_i64("cluster_id")?,
                    hour_ts_utc: row.get_timestamp("hour_ts_utc")?,
                    source_run_id: row.get_uuid("source_run_id")?,
                    exposure_pct: row.get_decimal("exposure_pct")?,
                    max_cluster_exposure_pct: row.get_decimal("max_cluster_exposure_pct")?,
                    state_hash: row.get_str("state_hash")?,
                    parent_risk_hash: row.get_str("parent_risk_hash")?,
                    row_hash: row.get_str("row_hash")?,
                })
            })
            .collect()
    }

    fn load_prior_economic_state(
        &self,
        account_id: i64,
        run_mode: RunMode,
        hour_ts_utc: DateTime<Utc>,
    ) -> CoreResult<Option<PriorEconomicState>> {
        let row = self.db.fetch_one(
            "SELECT ledger_seq, balance_before, balance_after, prev_ledger_hash, ledger_hash,
                    row_hash, event_ts_utc
             FROM cash_ledger
             WHERE account_id = :account_id
               AND run_mode = :run_mode
               AND event_ts_utc < :hour_ts_utc
             ORDER BY ledger_seq DESC
             LIMIT 1",
            &[
                ("account_id", Value::from(account_id)),
                ("run_mode", Value::from(run_mode.as_str())),
                ("hour_ts_utc", Value::from(hour_ts_utc)),
            ],
        )?;
        row.map(|row| {
            Ok(PriorEconomicState {
                ledger_seq: row.get_i64("ledger_seq")?,
                balance_before: row.get_decimal("balance_before")?,
                balance_after: row.get_decimal("balance_after")?,
                prev_ledger_hash: row.get_opt_str("prev_ledger_hash")?,
                ledger_hash: row.get_str("ledger_hash")?,
                row_hash: row.get_str("row_hash")?,
                event_ts_utc: row.get_timestamp("event_ts_utc")?,
            })
        })
        .transpose()
    }

    fn load_training_windows(
        &self,
        predictions: &[PredictionState],
        regimes: &[RegimeState],
    ) -> CoreResult<Vec<TrainingWindowState>> {
        let mut ids: Vec<i64> = Vec::new();
        for id in predictions
            .iter()
            .filter_map(|p| p.training_window_id)
            .chain(regimes.iter().filter_map(|r| r.training_window_id))
        {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids.sort_unstable();

        let mut out = Vec::with_capacity(ids.len());
        for training_window_id in ids {
            let row = self
                .db
                .fetch_one(
                    "SELECT training_window_id, backtest_run_id, model_version_id, fold_index,
                            horizon, train_end_utc, valid_start_utc, valid_end_utc,
                            training_window_hash, row_hash
                     FROM model_training_window
                     WHERE training_window_id = :training_window_id",
                    &[("training_window_id", Value::from(training_window_id))],
                )?
                .ok_or_else(|| {
                    CoreError::InputMissing(format!(
                        "training_window_id={training_window_id} not found"
                    ))
                })?;
            out.push(TrainingWindowState {
                training_window_id: row.get_i64("training_window_id")?,
                backtest_run_id: row.get_uuid("backtest_run_id")?,
                model_version_id: row.get_i64("model_version_id")?,
                fold_index: row.get_i64("fold_index")?,
                horizon: row.get_enum("horizon")?,
                train_end_utc: row.get_timestamp("train_end_utc")?,
                valid_start_utc: row.get_timestamp("valid_start_utc")?,
                valid_end_utc: row.get_timestamp("valid_end_utc")?,
                training_window_hash: row.get_str("training_window_hash")?,
                row_hash: row.get_str("row_hash")?,
            });
        }
        Ok(out)
    }

    fn load_activation_records(
        &self,
        predictions: &[PredictionState],
        regimes: &[RegimeState],
    ) -> CoreResult<Vec<ActivationRecord>> {
        let mut ids: Vec<i64> = Vec::new();
        for id in predictions
            .iter()
            .filter_map(|p| p.activation_id)
            .chain(regimes.iter().filter_map(|r| r.activation_id))
        {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids.sort_unstable();

        let mut out = Vec::with_capacity(ids.len());
        for activation_id in ids {
            let row = self
                .db
                .fetch_one(
                    "SELECT activation_id, model_version_id, run_mode, validation_window_end_utc,
                            status, approval_hash
                     FROM model_activation_gate
                     WHERE activation_id = :activation_id",
                    &[("activation_id", Value::from(activation_id))],
                )?
                .ok_or_else(|| {
                    CoreError::InputMissing(format!("activation_id={activation_id} not found"))
                })?;
            out.push(ActivationRecord {
                activation_id: row.get_i64("activation_id")?,
                model_version_id: row.get_i64("model_version_id")?,
                run_mode: row.get_enum("run_mode")?,
                validation_window_end_utc: row.get_timestamp("validation_window_end_utc")?,
                status: row.get_enum("status")?,
                approval_hash: row.get_str("approval_hash")?,
            });
        }
        Ok(out)
    }

    fn load_memberships(
        &self,
        predictions: &[PredictionState],
        hour_ts_utc: DateTime<Utc>,
    ) -> CoreResult<Vec<ClusterMembershipState>> {
        let mut asset_ids: Vec<i64> = predictions.iter().map(|p| p.asset_id).collect();
        asset_ids.sort_unstable();
        asset_ids.dedup();
        if asset_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self.db.fetch_all(
            "SELECT membership_id, asset_id, cluster_id, membership_hash, effective_from_utc
             FROM asset_cluster_membership
             WHERE effective_from_utc <= :hour_ts_utc
               AND (effective_to_utc IS NULL OR effective_to_utc > :hour_ts_utc)
             ORDER BY asset_id ASC, effective_from_utc DESC, membership_id DESC",
            &[("hour_ts_utc", Value::from(hour_ts_utc))],
        )?;

        let mut out: Vec<ClusterMembershipState> = Vec::new();
        for row in &rows {
            let asset_id = row.get_i64("asset_id")?;
            if !asset_ids.contains(&asset_id) {
                continue;
            }
            if out.iter().any(|m| m.asset_id == asset_id) {
                continue;
            }
            out.push(ClusterMembershipState {
                membership_id: row.get_i64("membership_id")?,
                asset_id,
                cluster_id: row.get_i64("cluster_id")?,
                membership_hash: row.get_str("membership_hash")?,
            });
        }
        Ok(out)
    }

    fn load_cost_profile(&self, hour_ts_utc: DateTime<Utc>) -> CoreResult<CostProfileState> {
        let row = self
            .db
            .fetch_one(
                "SELECT cost_profile_id, fee_rate, slippage_param_hash
                 FROM cost_profile
                 WHERE venue = 'KRAKEN'
                   AND is_active = 1
                   AND effective_from_utc <= :hour_ts_utc
                   AND (effective_to_utc IS NULL OR effective_to_utc > :hour_ts_utc)
                 ORDER BY effective_from_utc DESC, cost_profile_id DESC
                 LIMIT 1",
                &[("hour_ts_utc", Value::from(hour_ts_utc))],
            )?
            .ok_or_else(|| {
                CoreError::InputMissing("no active KRAKEN cost_profile for execution hour".into())
            })?;
        Ok(CostProfileState {
            cost_profile_id: row.get_i64("cost_profile_id")?,
            fee_rate: row.get_decimal("fee_rate")?,
            slippage_param_hash: row.get_str("slippage_param_hash")?,
        })
    }

    fn load_risk_profile(
        &self,
        account_id: i64,
        hour_ts_utc: DateTime<Utc>,
    ) -> CoreResult<RiskProfileState> {
        let rows = self.db.fetch_all(
            "SELECT a.assignment_id,
                    p.profile_version,
                    p.total_exposure_mode,
                    p.max_total_exposure_pct,
                    p.max_total_exposure_amount,
                    p.cluster_exposure_mode,
                    p.max_cluster_exposure_pct,
                    p.max_cluster_exposure_amount,
                    p.max_concurrent_positions,
                    p.severe_loss_drawdown_trigger,
                    p.volatility_feature_id,
                    p.volatility_target,
                    p.volatility_scale_floor,
                    p.volatility_scale_ceiling,
                    p.hold_min_expected_return,
                    p.exit_expected_return_threshold,
                    p.recovery_hold_prob_up_threshold,
                    p.recovery_exit_prob_up_threshold,
                    p.derisk_fraction,
                    p.signal_persistence_required,
                    p.row_hash
             FROM account_risk_profile_assignment a
             JOIN risk_profile p ON p.profile_version = a.profile_version
             WHERE a.account_id = :account_id
               AND a.effective_from_utc <= :hour_ts_utc
               AND (a.effective_to_utc IS NULL OR a.effective_to_utc > :hour_ts_utc)
             ORDER BY a.effective_from_utc DESC, a.assignment_id DESC",
            &[
                ("account_id", Value::from(account_id)),
                ("hour_ts_utc", Value::from(hour_ts_utc)),
            ],
        )?;
        if rows.is_empty() {
            return Err(CoreError::InputMissing(
                "no active risk_profile assignment for execution hour".into(),
            ));
        }
        if rows.len() > 1 {
            return Err(CoreError::InvariantViolation(
                "multiple active risk_profile assignments for execution hour".into(),
            ));
        }

        let row = &rows[0];
        Ok(RiskProfileState {
            profile_version: row.get_str("profile_version")?,
            total_exposure_mode: row.get_enum("total_exposure_mode")?,
            max_total_exposure_pct: row.get_opt_decimal("max_total_exposure_pct")?,
            max_total_exposure_amount: row.get_opt_decimal("max_total_exposure_amount")?,
            cluster_exposure_mode: row.get_enum("cluster_exposure_mode")?,
            max_cluster_exposure_pct: row.get_opt_decimal("max_cluster_exposure_pct")?,
            max_cluster_exposure_amount: row.get_opt_decimal("max_cluster_exposure_amount")?,
            max_concurrent_positions: row.get_i64("max_concurrent_positions")?,
            severe_loss_drawdown_trigger: row.get_decimal("severe_loss_drawdown_trigger")?,
            volatility_feature_id: row.get_i64("volatility_feature_id")?,
            volatility_target: row.get_decimal("volatility_target")?,
            volatility_scale_floor: row.get_decimal("volatility_scale_floor")?,
            volatility_scale_ceiling: row.get_decimal("volatility_scale_ceiling")?,
            hold_min_expected_return: row.get_decimal("hold_min_expected_return")?,
            exit_expected_return_threshold: row.get_decimal("exit_expected_return_threshold")?,
            recovery_hold_prob_up_threshold: row.get_decimal("recovery_hold_prob_up_threshold")?,
            recovery_exit_prob_up_threshold: row.get_decimal("recovery_exit_prob_up_threshold")?,
            derisk_fraction: row.get_decimal("derisk_fraction")?,
            signal_persistence_required: row.get_i64("signal_persistence_required")?,
            row_hash: row.get_str("row_hash")?,
        })
    }

    fn load_volatility_features(
        &self,
        run_id: Uuid,
        run_mode: RunMode,
        hour_ts_utc: DateTime<Utc>,
        predictions: &[PredictionState],
        volatility_feature_id: i64,
    ) -> CoreResult<Vec<VolatilityFeatureState>> {
        let rows = self.db.fetch_all(
            "SELECT asset_id, feature_id, feature_value, row_hash
             FROM feature_snapshot
             WHERE run_id = :run_id
               AND run_mode = :run_mode
               AND hour_ts_utc = :hour_ts_utc
               AND feature_id = :feature_id
             ORDER BY asset_id ASC",
            &[
                ("run_id", Value::from(run_id)),
                ("run_mode", Value::from(run_mode.as_str())),
                ("hour_ts_utc", Value::from(hour_ts_utc)),
                ("feature_id", Value::from(volatility_feature_id)),
            ],
        )?;
        let mut out = Vec::new();
        for row in &rows {
            let asset_id = row.get_i64("asset_id")?;
            if !predictions.iter().any(|p| p.asset_id == asset_id) {
                continue;
            }
            out.push(VolatilityFeatureState {
                asset_id,
                feature_id: row.get_i64("feature_id")?,
                feature_value: row.get_decimal("feature_value")?,
                row_hash: row.get_str("row_hash")?,
            });
        }
        Ok(out)
    }

    fn load_positions(
        &self,
        run_id: Uuid,
        account_id: i64,
        run_mode: RunMode,
        hour_ts_utc: DateTime<Utc>,
    ) -> CoreResult<Vec<PositionState>> {
        let rows = self.db.fetch_all(
            "SELECT run_mode, account_id, asset_id, hour_ts_utc, source_run_id,
                    quantity, exposure_pct, unrealized_pnl, row_hash
             FROM position_hourly_state
             WHERE run_mode = :run_mode
               AND account_id = :account_id
               AND hour_ts_utc = :hour_ts_utc
               AND source_run_id = :source_run_id
             ORDER BY asset_id ASC",
            &[
                ("run_mode", Value::from(run_mode.as_str())),
                ("account_id", Value::from(account_id)),
                ("hour_ts_utc", Value::from(hour_ts_utc)),
                ("source_run_id", Value::from(run_id)),
            ],
        )?;
        rows.iter()
            .map(|row| {
                Ok(PositionState {
                    run_mode: row.get_enum("run_mode")?,
                    account_id: row.get_i64("account_id")?,
                    asset_id: row.get_i64("asset_id")?,
                    hour_ts_utc: row.get_timestamp("hour_ts_utc")?,
                    source_run_id: row.get_uuid("source_run_id")?,
                    quantity: row.get_decimal("quantity")?,
                    exposure_pct: row.get_decimal("exposure_pct")?,
                    unrealized_pnl: row.get_decimal("unrealized_pnl")?,
                    row_hash: row.get_str("row_hash")?,
                })
            })
            .collect()
    }

    fn load_asset_precisions(
        &self,
        predictions: &[PredictionState],
    ) -> CoreResult<Vec<AssetPrecisionState>> {
        let rows = self.db.fetch_all(
            "SELECT asset_id, tick_size, lot_size
             FROM asset
             ORDER BY asset_id ASC",
            &[],
        )?;
        let mut out = Vec::new();
        for row in &rows {
            let asset_id = row.get_i64("asset_id")?;
            if !predictions.iter().any(|p| p.asset_id == asset_id) {
                continue;
            }
            out.push(AssetPrecisionState {
                asset_id,
                tick_size: row.get_decimal("tick_size")?,
                lot_size: row.get_decimal("lot_size")?,
            });
        }
        Ok(out)
    }

    fn load_order_book_snapshots(
        &self,
        predictions: &[PredictionState],
        hour_ts_utc: DateTime<Utc>,
    ) -> CoreResult<Vec<OrderBookSnapshotState>> {
        let rows = self.db.fetch_all(
            "SELECT asset_id, snapshot_ts_utc, hour_ts_utc, best_bid_price, best_ask_price,
                    best_bid_size, best_ask_size, row_hash
             FROM order_book_snapshot
             WHERE hour_ts_utc = :hour_ts_utc
             ORDER BY asset_id ASC, snapshot_ts_utc ASC, row_hash ASC",
            &[("hour_ts_utc", Value::from(hour_ts_utc))],
        )?;
        let mut out = Vec::new();
        for row in &rows {
            let asset_id = row.get_i64("asset_id")?;
            if !predictions.iter().any(|p| p.asset_id == asset_id) {
                continue;
            }
            out.push(OrderBookSnapshotState {
                asset_id,
                snapshot_ts_utc: row.get_timestamp("snapshot_ts_utc")?,
                hour_ts_utc: row.get_timestamp("hour_ts_utc")?,
                best_bid_price: row.get_decimal("best_bid_price")?,
                best_ask_price: row.get_decimal("best_ask_price")?,
                best_bid_size: row.get_decimal("best_bid_size")?,
                best_ask_size: row.get_decimal("best_ask_size")?,
                row_hash: row.get_str("row_hash")?,
            });
        }
        Ok(out)
    }

    fn load_ohlcv_rows(
        &self,
        predictions: &[PredictionState],
        hour_ts_utc: DateTime<Utc>,
    ) -> CoreResult<Vec<OhlcvState>> {
        let rows = self.db.fetch_all(
            "SELECT asset_id, hour_ts_utc, close_price, row_hash, source_venue
             FROM market_ohlcv_hourly
             WHERE hour_ts_utc = :hour_ts_utc
             ORDER BY asset_id ASC, source_venue ASC, row_hash ASC",
            &[("hour_ts_utc", Value::from(hour_ts_utc))],
        )?;
        let mut out: Vec<OhlcvState> = Vec::new();
        for row in &rows {
            let asset_id = row.get_i64("asset_id")?;
            if !predictions.iter().any(|p| p.asset_id == asset_id) {
                continue;
            }
            if out.iter().any(|existing| existing.asset_id == asset_id) {
                continue;
            }
            out.push(OhlcvState {
                asset_id,
                hour_ts_utc: row.get_timestamp("hour_ts_utc")?,
                close_price: row.get_decimal("close_price")?,
                row_hash: row.get_str("row_hash")?,
            });
        }
        Ok(out)
    }

    fn load_existing_order_fills(
        &self,
        run_id: Uuid,
        account_id: i64,
        run_mode: RunMode,
    ) -> CoreResult<Vec<ExistingOrderFillState>> {
        let rows = self.db.fetch_all(
            "SELECT fill_id, order_id, run_id, run_mode, account_id, asset_id, fill_ts_utc,
                    fill_price, fill_qty, fill_notional, fee_paid, realized_slippage_rate,
                    slippage_cost, row_hash
             FROM order_fill
             WHERE run_id = :run_id
               AND account_id = :account_id
               AND run_mode = :run_mode
             ORDER BY fill_ts_utc ASC, fill_id ASC",
            &[
                ("run_id", Value::from(run_id)),
                ("account_id", Value::from(account_id)),
                ("run_mode", Value::from(run_mode.as_str())),
            ],
        )?;
        rows.iter()
            .map(|row| {
                Ok(ExistingOrderFillState {
                    fill_id: row.get_uuid("fill_id")?,
                    order_id: row.get_uuid("order_id")?,
                    run_id: row.get_uuid("run_id")?,
                    run_mode: row.get_enum("run_mode")?,
                    account_id: row.get_i64("account_id")?,
                    asset_id: row.get_i64("asset_id")?,
                    fill_ts_utc: row.get_timestamp("fill_ts_utc")?,
                    fill_price: row.get_decimal("fill_price")?,
                    fill_qty: row.get_decimal("fill_qty")?,
                    fill_notional: row.get_decimal("fill_notional")?,
                    fee_paid: row.get_decimal("fee_paid")?,
                    realized_slippage_rate: row.get_decimal("realized_slippage_rate")?,
                    slippage_cost: row.get_decimal("slippage_cost")?,
                    row_hash: row.get_str("row_hash")?,
                })
            })
            .collect()
    }

    fn load_existing_position_lots(
        &self,
        run_id: Uuid,
        account_id: i64,
        run_mode: RunMode,
    ) -> CoreResult<Vec<ExistingPositionLotState>> {
        let rows = self.db.fetch_all(
            "SELECT lot_id, open_fill_id, run_id, run_mode, account_id, asset_id, open_ts_utc,
                    open_price, open_qty, open_fee, remaining_qty, row_hash
             FROM position_lot
             WHERE run_id = :run_id
               AND account_id = :account_id
               AND run_mode = :run_mode
             ORDER BY open_ts_utc ASC, lot_id ASC",
            &[
                ("run_id", Value::from(run_id)),
                ("account_id", Value::from(account_id)),
                ("run_mode", Value::from(run_mode.as_str())),
            ],
        )?;
        rows.iter()
            .map(|row| {
                Ok(ExistingPositionLotState {
                    lot_id: row.get_uuid("lot_id")?,
                    open_fill_id: row.get_uuid("open_fill_id")?,
                    run_id: row.get_uuid("run_id")?,
                    run_mode: row.get_enum("run_mode")?,
                    account_id: row.get_i64("account_id")?,
                    asset_id: row.get_i64("asset_id")?,
                    open_ts_utc: row.get_timestamp("open_ts_utc")?,
                    open_price: row.get_decimal("open_price")?,
                    open_qty: row.get_decimal("open_qty")?,
                    open_fee: row.get_decimal("open_fee")?,
                    remaining_qty: row.get_decimal("remaining_qty")?,
                    row_hash: row.get_str("row_hash")?,
                })
            })
            .collect()
    }

    fn load_existing_executed_trades(
        &self,
        run_id: Uuid,
        account_id: i64,
        run_mode: RunMode,
    ) -> CoreResult<Vec<ExistingExecutedTradeState>> {
        let rows = self.db.fetch_all(
            "SELECT trade_id, lot_id, run_id, run_mode, account_id, asset_id, quantity, row_hash
             FROM executed_trade
             WHERE run_id = :run_id
               AND account_id = :account_id
               AND run_mode = :run_mode
             ORDER BY exit_ts_utc ASC, trade_id ASC",
            &[
                ("run_id", Value::from(run_id)),
                ("account_id", Value::from(account_id)),
                ("run_mode", Value::from(run_mode.as_str())),
            ],
        )?;
        rows.iter()
            .map(|row| {
                Ok(ExistingExecutedTradeState {
                    trade_id: row.get_uuid("trade_id")?,
                    lot_id: row.get_uuid("lot_id")?,
                    run_id: row.get_uuid("run_id")?,
                    run_mode: row.get_enum("run_mode")?,
                    account_id: row.get_i64("account_id")?,
                    asset_id: row.get_i64("asset_id")?,
                    quantity: row.get_decimal("quantity")?,
                    row_hash: row.get_str("row_hash")?,
                })
            })
            .collect()
    }
}

fn decode_prediction(row: &Row) -> CoreResult<PredictionState> {
    Ok(PredictionState {
        run_id: row.get_uuid("run_id")?,
        account_id: row.get_i64("account_id")?,
        run_mode: row.get_enum("run_mode")?,
        asset_id: row.get_i64("asset_id")?,
        hour_ts_utc: row.get_timestamp("hour_ts_utc")?,
        horizon: row.get_enum("horizon")?,
        model_version_id: row.get_i64("model_version_id")?,
        prob_up: row.get_decimal("prob_up")?,
        expected_return: row.get_decimal("expected_return")?,
        upstream_hash: row.get_str("upstream_hash")?,
        row_hash: row.get_str("row_hash")?,
        training_window_id: row.get_opt_i64("training_window_id")?,
        lineage_backtest_run_id: row.get_opt_uuid("lineage_backtest_run_id")?,
        lineage_fold_index: row.get_opt_i64("lineage_fold_index")?,
        lineage_horizon: row.get_opt_enum("lineage_horizon")?,
        activation_id: row.get_opt_i64("activation_id")?,
    })
}

fn decode_regime(row: &Row) -> CoreResult<RegimeState> {
    Ok(RegimeState {
        run_id: row.get_uuid("run_id")?,
        account_id: row.get_i64("account_id")?,
        run_mode: row.get_enum("run_mode")?,
        asset_id: row.get_i64("asset_id")?,
        hour_ts_utc: row.get_timestamp("hour_ts_utc")?,
        model_version_id: row.get_i64("model_version_id")?,
        regime_label: row.get_str("regime_label")?,
        upstream_hash: row.get_str("upstream_hash")?,
        row_hash: row.get_str("row_hash")?,
        training_window_id: row.get_opt_i64("training_window_id")?,
        lineage_backtest_run_id: row.get_opt_uuid("lineage_backtest_run_id")?,
        lineage_fold_index: row.get_opt_i64("lineage_fold_index")?,
        lineage_horizon: row.get_opt_enum("lineage_horizon")?,
        activation_id: row.get_opt_i64("activation_id")?,
    })
}
