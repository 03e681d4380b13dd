//! Deterministic hour execution and replay orchestration.
//!
//! `execute_hour` runs the whole pipeline inside one substrate
//! transaction: context build, per-prediction decision + risk admission,
//! retry-scheduled simulated execution, FIFO sell allocation, ledger
//! emission, manifest finalization. `replay_hour` re-derives the same
//! artifacts read-only and reports every mismatch.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::activation::enforce_activation_gate;
use crate::canonical::{is_hour_aligned, quantize, stable_hash, SCALE_18};
use crate::context::{DeterministicContextBuilder, ExecutionContext};
use crate::decision::{deterministic_decision, DecisionResult};
use crate::domain::{
    Direction, OrderFillRow, OrderSide, OrderStatus, PositionLotRow, PredictionState,
    RiskEventRow, RiskEventType, RunMode, Severity, SignalAction, TradeSignalRow,
};
use crate::error::{CoreError, CoreResult};
use crate::exchange::{DeterministicExchangeSimulator, ExchangeAdapter, OrderAttemptRequest};
use crate::harness;
use crate::risk::{
    compute_volatility_adjusted_fraction, enforce_capital_preservation, enforce_cluster_cap,
    enforce_cross_account_isolation, enforce_position_count_cap, enforce_runtime_risk_gate,
    enforce_severe_loss_entry_gate, evaluate_adaptive_horizon_action,
    evaluate_risk_state_machine, evaluate_severe_loss_recovery_action, RiskViolation,
    NO_SEVERE_LOSS_RECOVERY, SEVERE_RECOVERY_DERISK_INTENT,
};
use crate::store::{Database, Value};
use crate::tokens;
use crate::writer::{AppendOnlyRuntimeWriter, RuntimeWriteResult};

/// One replay divergence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayMismatch {
    pub table_name: String,
    pub key: String,
    pub field_name: String,
    pub expected: String,
    pub actual: String,
}

/// Replay comparison outcome; zero mismatches means bit-exact replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub mismatch_count: usize,
    pub mismatches: Vec<ReplayMismatch>,
}

#[derive(Debug, Clone)]
struct OrderIntent {
    side: OrderSide,
    requested_qty: Decimal,
    reference_price: Option<Decimal>,
    source_reason_code: String,
}

#[derive(Debug, Clone)]
struct LotView {
    lot_id: Uuid,
    asset_id: i64,
    open_ts_utc: DateTime<Utc>,
    open_price: Decimal,
    open_qty: Decimal,
    open_fee: Decimal,
    open_slippage_cost: Decimal,
    parent_lot_hash: String,
    historical_consumed_qty: Decimal,
}

/// Running cash-ledger chain link carried across the hour's fills.
#[derive(Debug, Clone)]
struct LedgerChain {
    next_seq: i64,
    balance: Decimal,
    prev_hash: Option<String>,
}

/// Cumulative retry offsets from the hour origin: 0, +1, +3, +7 minutes.
const RETRY_BACKOFF_MINUTES: [i64; 3] = [1, 2, 4];

fn attempt_timestamps(origin_hour_ts_utc: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let mut ts = vec![origin_hour_ts_utc];
    let mut current = origin_hour_ts_utc;
    for backoff in RETRY_BACKOFF_MINUTES {
        current += Duration::minutes(backoff);
        ts.push(current);
    }
    ts
}

/// Execute deterministic runtime writes for one run/account/hour key.
pub fn execute_hour<D: Database>(
    db: &D,
    run_id: Uuid,
    account_id: i64,
    run_mode: RunMode,
    hour_ts_utc: DateTime<Utc>,
) -> CoreResult<RuntimeWriteResult> {
    if !is_hour_aligned(hour_ts_utc) {
        return Err(CoreError::InvariantViolation(format!(
            "hour_ts_utc must be hour-aligned, got {hour_ts_utc}"
        )));
    }

    let builder = DeterministicContextBuilder::new(db);
    let context = builder.build_context(run_id, account_id, run_mode, hour_ts_utc)?;
    let writer = AppendOnlyRuntimeWriter::new(db);

    db.begin()?;
    let result = execute_hour_in_tx(db, &writer, &context);
    match result {
        Ok(planned) => {
            db.commit()?;
            info!(
                run_id = %run_id,
                signals = planned.trade_signals.len(),
                orders = planned.order_requests.len(),
                fills = planned.order_fills.len(),
                "hour executed"
            );
            Ok(planned)
        }
        Err(err) => {
            warn!(run_id = %run_id, error = %err, "hour execution rolled back");
            db.rollback()?;
            Err(err)
        }
    }
}

fn execute_hour_in_tx<D: Database>(
    db: &D,
    writer: &AppendOnlyRuntimeWriter<'_, D>,
    context: &ExecutionContext,
) -> CoreResult<RuntimeWriteResult> {
    let account_id = context.run_context.account_id;
    let run_mode = context.run_context.run_mode;

    // Ledger continuity must hold both before and after the hour's writes.
    writer.assert_ledger_continuity(account_id, run_mode.as_str())?;

    let planned = plan_runtime_artifacts(context, writer)?;

    for signal in &planned.trade_signals {
        writer.insert_trade_signal(signal)?;
    }
    for order in &planned.order_requests {
        writer.insert_order_request(order)?;
    }
    for fill in &planned.order_fills {
        writer.insert_order_fill(fill)?;
    }
    for lot in &planned.position_lots {
        writer.insert_position_lot(lot)?;
    }
    for trade in &planned.executed_trades {
        writer.insert_executed_trade(trade)?;
    }
    for row in &planned.cash_ledger_rows {
        writer.insert_cash_ledger(row)?;
    }
    for event in &planned.risk_events {
        writer.insert_risk_event(event)?;
    }

    writer.assert_ledger_continuity(account_id, run_mode.as_str())?;

    // Finalize the replay manifest from the in-flight row surface.
    let boundary = harness::load_snapshot_boundary(
        db,
        context.run_context.run_id,
        account_id,
        context.run_context.origin_hour_ts_utc,
    )?;
    let dag = harness::recompute_hash_dag(db, &boundary)?;
    writer.insert_replay_manifest(context, &dag.root_hash, dag.authoritative_row_count)?;
    writer.finalize_run_context_root(context, &dag.root_hash)?;

    Ok(planned)
}

/// Reconstruct, recompute, and compare deterministic runtime artifacts.
pub fn replay_hour<D: Database>(
    db: &D,
    run_id: Uuid,
    account_id: i64,
    hour_ts_utc: DateTime<Utc>,
) -> CoreResult<ReplayReport> {
    let run_ctx = db
        .fetch_one(
            "SELECT run_mode
             FROM run_context
             WHERE run_id = :run_id
               AND account_id = :account_id
               AND origin_hour_ts_utc = :hour_ts_utc",
            &[
                ("run_id", Value::from(run_id)),
                ("account_id", Value::from(account_id)),
                ("hour_ts_utc", Value::from(hour_ts_utc)),
            ],
        )?
        .ok_or_else(|| CoreError::InputMissing("run_context not found for replay key".into()))?;
    let run_mode: RunMode = run_ctx.get_enum("run_mode")?;

    let builder = DeterministicContextBuilder::new(db);
    let context = builder.build_context(run_id, account_id, run_mode, hour_ts_utc)?;
    let writer = AppendOnlyRuntimeWriter::new(db);
    let expected = plan_runtime_artifacts(&context, &writer)?;

    let mut mismatches = Vec::new();
    compare_stored(
        db,
        "trade_signal",
        "SELECT signal_id AS key, decision_hash, row_hash
         FROM trade_signal
         WHERE run_id = :run_id AND account_id = :account_id AND hour_ts_utc = :hour_ts_utc
         ORDER BY signal_id ASC",
        run_id,
        account_id,
        hour_ts_utc,
        expected
            .trade_signals
            .iter()
            .map(|row| {
                (
                    row.signal_id.to_string(),
                    vec![
                        ("decision_hash".to_string(), row.decision_hash.clone()),
                        ("row_hash".to_string(), row.row_hash.clone()),
                    ],
                )
            })
            .collect(),
        &mut mismatches,
    )?;
    compare_stored(
        db,
        "order_request",
        "SELECT order_id AS key, row_hash
         FROM order_request
         WHERE run_id = :run_id AND account_id = :account_id AND origin_hour_ts_utc = :hour_ts_utc
         ORDER BY order_id ASC",
        run_id,
        account_id,
        hour_ts_utc,
        expected
            .order_requests
            .iter()
            .map(|row| {
                (
                    row.order_id.to_string(),
                    vec![("row_hash".to_string(), row.row_hash.clone())],
                )
            })
            .collect(),
        &mut mismatches,
    )?;
    compare_stored(
        db,
        "order_fill",
        "SELECT fill_id AS key, row_hash
         FROM order_fill
         WHERE run_id = :run_id AND account_id = :account_id AND origin_hour_ts_utc = :hour_ts_utc
         ORDER BY fill_id ASC",
        run_id,
        account_id,
        hour_ts_utc,
        expected
            .order_fills
            .iter()
            .map(|row| {
                (
                    row.fill_id.to_string(),
                    vec![("row_hash".to_string(), row.row_hash.clone())],
                )
            })
            .collect(),
        &mut mismatches,
    )?;
    compare_stored(
        db,
        "position_lot",
        "SELECT lot_id AS key, row_hash
         FROM position_lot
         WHERE run_id = :run_id AND account_id = :account_id AND origin_hour_ts_utc = :hour_ts_utc
         ORDER BY lot_id ASC",
        run_id,
        account_id,
        hour_ts_utc,
        expected
            .position_lots
            .iter()
            .map(|row| {
                (
                    row.lot_id.to_string(),
                    vec![("row_hash".to_string(), row.row_hash.clone())],
                )
            })
            .collect(),
        &mut mismatches,
    )?;
    compare_stored(
        db,
        "executed_trade",
        "SELECT trade_id AS key, row_hash
         FROM executed_trade
         WHERE run_id = :run_id AND account_id = :account_id AND origin_hour_ts_utc = :hour_ts_utc
         ORDER BY trade_id ASC",
        run_id,
        account_id,
        hour_ts_utc,
        expected
            .executed_trades
            .iter()
            .map(|row| {
                (
                    row.trade_id.to_string(),
                    vec![("row_hash".to_string(), row.row_hash.clone())],
                )
            })
            .collect(),
        &mut mismatches,
    )?;
    compare_stored(
        db,
        "cash_ledger",
        "SELECT ledger_seq AS key, row_hash
         FROM cash_ledger
         WHERE run_id = :run_id AND account_id = :account_id AND origin_hour_ts_utc = :hour_ts_utc
         ORDER BY ledger_seq ASC",
        run_id,
        account_id,
        hour_ts_utc,
        expected
            .cash_ledger_rows
            .iter()
            .map(|row| {
                (
                    row.ledger_seq.to_string(),
                    vec![("row_hash".to_string(), row.row_hash.clone())],
                )
            })
            .collect(),
        &mut mismatches,
    )?;
    compare_stored(
        db,
        "risk_event",
        "SELECT risk_event_id AS key, row_hash
         FROM risk_event
         WHERE run_id = :run_id AND account_id = :account_id AND origin_hour_ts_utc = :hour_ts_utc
         ORDER BY risk_event_id ASC",
        run_id,
        account_id,
        hour_ts_utc,
        expected
            .risk_events
            .iter()
            .map(|row| {
                (
                    row.risk_event_id.to_string(),
                    vec![("row_hash".to_string(), row.row_hash.clone())],
                )
            })
            .collect(),
        &mut mismatches,
    )?;

    Ok(ReplayReport {
        mismatch_count: mismatches.len(),
        mismatches,
    })
}

/// Compare expected rows (key → field/value pairs) against stored rows.
#[allow(clippy::too_many_arguments)]
fn compare_stored<D: Database>(
    db: &D,
    table_name: &str,
    sql: &str,
    run_id: Uuid,
    account_id: i64,
    hour_ts_utc: DateTime<Utc>,
    expected: Vec<(String, Vec<(String, String)>)>,
    mismatches: &mut Vec<ReplayMismatch>,
) -> CoreResult<()> {
    let stored_rows = db.fetch_all(
        sql,
        &[
            ("run_id", Value::from(run_id)),
            ("account_id", Value::from(account_id)),
            ("hour_ts_utc", Value::from(hour_ts_utc)),
        ],
    )?;

    let mut stored: Vec<(String, Vec<(String, String)>)> = Vec::with_capacity(stored_rows.len());
    for row in &stored_rows {
        let key = row.get_str("key")?;
        let mut fields = Vec::new();
        for (name, _) in expected.first().map(|(_, f)| f.as_slice()).unwrap_or(&[]) {
            fields.push((name.clone(), row.get_str(name)?));
        }
        if expected.is_empty() {
            fields.push(("row_hash".to_string(), row.get_str("row_hash")?));
        }
        stored.push((key, fields));
    }

    let mut all_keys: Vec<String> = expected
        .iter()
        .map(|(key, _)| key.clone())
        .chain(stored.iter().map(|(key, _)| key.clone()))
        .collect();
    all_keys.sort();
    all_keys.dedup();

    for key in all_keys {
        let expected_fields = expected.iter().find(|(k, _)| *k == key).map(|(_, f)| f);
        let stored_fields = stored.iter().find(|(k, _)| *k == key).map(|(_, f)| f);
        match (expected_fields, stored_fields) {
            (None, Some(_)) => mismatches.push(ReplayMismatch {
                table_name: table_name.to_string(),
                key,
                field_name: "presence".to_string(),
                expected: "expected_absent".to_string(),
                actual: "stored_present".to_string(),
            }),
            (Some(_), None) => mismatches.push(ReplayMismatch {
                table_name: table_name.to_string(),
                key,
                field_name: "presence".to_string(),
                expected: "expected_present".to_string(),
                actual: "stored_absent".to_string(),
            }),
            (Some(expected_fields), Some(stored_fields)) => {
                for (field_name, expected_value) in expected_fields {
                    let actual = stored_fields
                        .iter()
                        .find(|(name, _)| name == field_name)
                        .map(|(_, value)| value.clone())
                        .unwrap_or_default();
                    if actual != *expected_value {
                        mismatches.push(ReplayMismatch {
                            table_name: table_name.to_string(),
                            key: key.clone(),
                            field_name: field_name.clone(),
                            expected: expected_value.clone(),
                            actual,
                        });
                    }
                }
            }
            (None, None) => unreachable!("key came from one of the two sides"),
        }
    }
    Ok(())
}

fn plan_runtime_artifacts<D: Database>(
    context: &ExecutionContext,
    writer: &AppendOnlyRuntimeWriter<'_, D>,
) -> CoreResult<RuntimeWriteResult> {
    let mut planned = RuntimeWriteResult::default();
    let mut emitted_violation_events: Vec<(String, String, String, String)> = Vec::new();

    let adapter = DeterministicExchangeSimulator;
    let mut planned_lots_by_asset: Vec<PositionLotRow> = Vec::new();
    let mut planned_fills: Vec<OrderFillRow> = Vec::new();
    let mut planned_lot_consumed: Vec<(Uuid, Decimal)> = Vec::new();
    let mut ledger = match &context.prior_economic_state {
        Some(prior) => LedgerChain {
            next_seq: prior.ledger_seq + 1,
            balance: prior.balance_after,
            prev_hash: Some(prior.ledger_hash.clone()),
        },
        None => LedgerChain {
            next_seq: 1,
            balance: context.capital_state.cash_balance,
            prev_hash: None,
        },
    };

    for prediction in &context.predictions {
        let regime = context
            .find_regime(prediction.asset_id, prediction.model_version_id)
            .ok_or_else(|| {
                CoreError::InputMissing(format!(
                    "missing regime for asset_id={} model_version_id={}",
                    prediction.asset_id, prediction.model_version_id
                ))
            })?;

        let cluster_hash = cluster_state_hash_for_prediction(context, prediction)?;
        let decision = deterministic_decision(
            &prediction.row_hash,
            &regime.row_hash,
            &context.capital_state.row_hash,
            &context.risk_state.row_hash,
            &cluster_hash,
        );

        let adaptive_eval =
            evaluate_adaptive_horizon_action(decision.action, prediction, context, None);
        let severe_eval =
            evaluate_severe_loss_recovery_action(adaptive_eval.action, prediction, context, None);
        let sizing_eval = compute_volatility_adjusted_fraction(
            severe_eval.action,
            decision.position_size_fraction,
            prediction.asset_id,
            context,
            None,
        );
        let adjusted_decision = DecisionResult {
            decision_hash: decision.decision_hash.clone(),
            action: severe_eval.action,
            direction: if severe_eval.action == SignalAction::Enter {
                Direction::Long
            } else {
                Direction::Flat
            },
            confidence: decision.confidence,
            position_size_fraction: sizing_eval.adjusted_fraction,
        };

        let preliminary_signal =
            writer.build_trade_signal_row(context, prediction, regime, &adjusted_decision, None)?;

        let activation = prediction
            .activation_id
            .and_then(|activation_id| context.find_activation(activation_id));
        let activation_result = enforce_activation_gate(
            context.run_context.run_mode,
            context.run_context.origin_hour_ts_utc,
            prediction.model_version_id,
            activation,
        );

        let mut violations: Vec<RiskViolation> = Vec::new();
        violations.extend(enforce_cross_account_isolation(context));
        if !activation_result.allowed {
            violations.push(RiskViolation {
                event_type: RiskEventType::ActivationGate,
                severity: Severity::High,
                reason_code: activation_result.reason_code.to_string(),
                detail: activation_result.detail.clone(),
            });
        }
        violations.extend(enforce_runtime_risk_gate(preliminary_signal.action, context));
        violations.extend(enforce_position_count_cap(
            preliminary_signal.action,
            context,
            None,
        ));
        violations.extend(enforce_severe_loss_entry_gate(
            preliminary_signal.action,
            context,
            None,
        ));
        if preliminary_signal.action == SignalAction::Enter
            && preliminary_signal.net_edge <= Decimal::ZERO
        {
            violations.push(RiskViolation {
                event_type: RiskEventType::RiskGate,
                severity: Severity::Medium,
                reason_code: "ENTER_COST_GATE_FAILED".to_string(),
                detail: "Expected return does not exceed deterministic transaction cost."
                    .to_string(),
            });
        }
        violations.extend(enforce_capital_preservation(
            preliminary_signal.action,
            preliminary_signal.target_position_notional,
            context,
            None,
        ));
        violations.extend(enforce_cluster_cap(
            preliminary_signal.action,
            prediction.asset_id,
            preliminary_signal.target_position_notional,
            context,
            None,
        ));

        let action_override = if violations.is_empty() {
            None
        } else {
            Some(SignalAction::Hold)
        };
        let final_signal = writer.build_trade_signal_row(
            context,
            prediction,
            regime,
            &adjusted_decision,
            action_override,
        )?;
        planned.trade_signals.push(final_signal.clone());

        if violations.is_empty() {
            let (intent, intent_events) = derive_order_intent(
                context,
                writer,
                &final_signal,
                severe_eval.reason_code,
            )?;
            planned.risk_events.extend(intent_events);
            if let Some(intent) = intent {
                materialize_order_lifecycle(
                    context,
                    writer,
                    &adapter,
                    &final_signal,
                    &intent,
                    &mut planned,
                    &mut planned_lots_by_asset,
                    &mut planned_fills,
                    &mut planned_lot_consumed,
                    &mut ledger,
                )?;
            }
        } else {
            for violation in &violations {
                let event_key = (
                    violation.event_type.as_str().to_string(),
                    violation.severity.as_str().to_string(),
                    violation.reason_code.clone(),
                    violation.detail.clone(),
                );
                // De-duplicate semantically identical run-hour violations so
                // repeated asset-level blocks do not collide on deterministic IDs.
                if emitted_violation_events.contains(&event_key) {
                    continue;
                }
                emitted_violation_events.push(event_key);
                planned.risk_events.push(writer.build_risk_event_row(
                    context,
                    violation.event_type,
                    violation.severity,
                    &violation.reason_code,
                    &violation.detail,
                    None,
                ));
            }
        }

        let risk_state_eval = evaluate_risk_state_machine(context, None);
        let action_reason_code = if severe_eval.reason_code != NO_SEVERE_LOSS_RECOVERY {
            severe_eval.reason_code
        } else if final_signal.action == SignalAction::Enter {
            sizing_eval.reason_code
        } else {
            adaptive_eval.reason_code
        };
        let violation_reason_codes: Vec<&str> = violations
            .iter()
            .map(|violation| violation.reason_code.as_str())
            .collect();
        planned.risk_events.push(writer.build_risk_event_row(
            context,
            RiskEventType::DecisionTrace,
            Severity::Low,
            action_reason_code,
            &format!(
                "Decision trace for asset_id={} horizon={} model_version_id={} action={}.",
                prediction.asset_id,
                prediction.horizon,
                prediction.model_version_id,
                final_signal.action
            ),
            Some(json!({
                "profile_version": context.risk_profile.profile_version,
                "risk_state_mode": risk_state_eval.state.as_str(),
                "final_action": final_signal.action.as_str(),
                "action_reason_code": action_reason_code,
                "adaptive_reason_code": adaptive_eval.reason_code,
                "severe_recovery_reason_code": severe_eval.reason_code,
                "volatility_reason_code": sizing_eval.reason_code,
                "base_fraction": sizing_eval.base_fraction.to_string(),
                "observed_volatility": sizing_eval
                    .observed_volatility
                    .map(|value| value.to_string()),
                "volatility_scale": sizing_eval.volatility_scale.to_string(),
                "adjusted_fraction": sizing_eval.adjusted_fraction.to_string(),
                "derisk_fraction": context.risk_profile.derisk_fraction.to_string(),
                "violation_reason_codes": violation_reason_codes,
                "total_exposure_mode": context.risk_profile.total_exposure_mode.as_str(),
                "cluster_exposure_mode": context.risk_profile.cluster_exposure_mode.as_str(),
                "max_concurrent_positions": context.risk_profile.max_concurrent_positions,
            })),
        ));
    }

    debug!(
        signals = planned.trade_signals.len(),
        orders = planned.order_requests.len(),
        risk_events = planned.risk_events.len(),
        "planned runtime artifacts"
    );
    Ok(planned)
}

/// Deterministic reference price for intent sizing: order book first,
/// OHLCV close as fallback.
fn intent_reference_price(
    context: &ExecutionContext,
    asset_id: i64,
    side: OrderSide,
) -> Option<Decimal> {
    if let Some(snapshot) =
        context.find_latest_order_book_snapshot(asset_id, context.run_context.origin_hour_ts_utc)
    {
        return Some(match side {
            OrderSide::Buy => snapshot.best_ask_price,
            OrderSide::Sell => snapshot.best_bid_price,
        });
    }
    context.find_ohlcv(asset_id).map(|row| row.close_price)
}

fn derive_order_intent<D: Database>(
    context: &ExecutionContext,
    writer: &AppendOnlyRuntimeWriter<'_, D>,
    signal: &TradeSignalRow,
    severe_recovery_reason_code: &str,
) -> CoreResult<(Option<OrderIntent>, Vec<RiskEventRow>)> {
    let mut events = Vec::new();
    let precision = context.find_asset_precision(signal.asset_id).ok_or_else(|| {
        CoreError::InputMissing(format!(
            "missing asset precision for asset_id={}",
            signal.asset_id
        ))
    })?;
    if precision.lot_size <= Decimal::ZERO {
        return Err(CoreError::InvariantViolation(format!(
            "invalid lot_size for asset_id={}",
            signal.asset_id
        )));
    }

    let inventory_qty = context
        .find_position(signal.asset_id)
        .map(|position| quantize(position.quantity, SCALE_18))
        .unwrap_or_else(|| quantize(Decimal::ZERO, SCALE_18));

    let (side, mut raw_qty, source_reason_code) = if signal.action == SignalAction::Enter
        && signal.target_position_notional > Decimal::ZERO
    {
        let reference_price = match intent_reference_price(context, signal.asset_id, OrderSide::Buy)
        {
            Some(price) if price > Decimal::ZERO => price,
            _ => {
                events.push(writer.build_risk_event_row(
                    context,
                    RiskEventType::OrderLifecycle,
                    Severity::High,
                    "ORDER_PRICE_UNAVAILABLE",
                    &format!(
                        "signal_id={} has no deterministic price source for entry sizing.",
                        signal.signal_id
                    ),
                    None,
                ));
                return Ok((None, events));
            }
        };
        let qty = quantize(signal.target_position_notional / reference_price, SCALE_18);
        (OrderSide::Buy, qty, "SIGNAL_ENTER".to_string())
    } else if signal.action == SignalAction::Exit {
        if inventory_qty <= Decimal::ZERO {
            events.push(writer.build_risk_event_row(
                context,
                RiskEventType::OrderLifecycle,
                Severity::Medium,
                "NO_INVENTORY_FOR_SELL",
                &format!(
                    "signal_id={} has zero inventory for SELL intent.",
                    signal.signal_id
                ),
                None,
            ));
            return Ok((None, events));
        }
        (OrderSide::Sell, inventory_qty, "SIGNAL_EXIT".to_string())
    } else if signal.action == SignalAction::Hold
        && severe_recovery_reason_code == SEVERE_RECOVERY_DERISK_INTENT
    {
        if inventory_qty <= Decimal::ZERO {
            events.push(writer.build_risk_event_row(
                context,
                RiskEventType::OrderLifecycle,
                Severity::Medium,
                "NO_INVENTORY_FOR_SELL",
                &format!(
                    "signal_id={} has zero inventory for de-risk SELL intent.",
                    signal.signal_id
                ),
                None,
            ));
            return Ok((None, events));
        }
        let qty = quantize(
            inventory_qty * context.risk_profile.derisk_fraction,
            SCALE_18,
        );
        (
            OrderSide::Sell,
            qty,
            SEVERE_RECOVERY_DERISK_INTENT.to_string(),
        )
    } else {
        return Ok((None, events));
    };

    if side == OrderSide::Sell && raw_qty > inventory_qty {
        events.push(writer.build_risk_event_row(
            context,
            RiskEventType::OrderLifecycle,
            Severity::Low,
            "SELL_QTY_CLIPPED_TO_INVENTORY",
            &format!(
                "signal_id={} clipped sell qty from {} to inventory {}.",
                signal.signal_id, raw_qty, inventory_qty
            ),
            None,
        ));
        raw_qty = inventory_qty;
    }

    let normalized_qty = round_down_to_lot_size(raw_qty, precision.lot_size)?;
    if normalized_qty <= Decimal::ZERO {
        events.push(writer.build_risk_event_row(
            context,
            RiskEventType::OrderLifecycle,
            Severity::Medium,
            "ORDER_QTY_BELOW_LOT_SIZE",
            &format!(
                "signal_id={} normalized qty={} at lot_size={}.",
                signal.signal_id, normalized_qty, precision.lot_size
            ),
            None,
        ));
        return Ok((None, events));
    }

    if side == OrderSide::Sell && source_reason_code == SEVERE_RECOVERY_DERISK_INTENT {
        events.push(writer.build_risk_event_row(
            context,
            RiskEventType::OrderLifecycle,
            Severity::Low,
            "SEVERE_RECOVERY_DERISK_ORDER_EMITTED",
            &format!(
                "signal_id={} emitted de-risk SELL qty={} fraction={}.",
                signal.signal_id, normalized_qty, context.risk_profile.derisk_fraction
            ),
            None,
        ));
    }

    let reference_price = intent_reference_price(context, signal.asset_id, side);
    Ok((
        Some(OrderIntent {
            side,
            requested_qty: normalized_qty,
            reference_price,
            source_reason_code,
        }),
        events,
    ))
}

/// Requested notional for one attempt: priced when a reference exists,
/// quantity itself otherwise.
fn attempt_requested_notional(intent: &OrderIntent, requested_qty: Decimal) -> Decimal {
    match intent.reference_price {
        Some(price) if price > Decimal::ZERO => quantize(requested_qty * price, SCALE_18),
        _ => quantize(requested_qty, SCALE_18),
    }
}

#[allow(clippy::too_many_arguments)]
fn materialize_order_lifecycle<D: Database>(
    context: &ExecutionContext,
    writer: &AppendOnlyRuntimeWriter<'_, D>,
    adapter: &DeterministicExchangeSimulator,
    signal: &TradeSignalRow,
    intent: &OrderIntent,
    planned: &mut RuntimeWriteResult,
    planned_lots_by_asset: &mut Vec<PositionLotRow>,
    planned_fills: &mut Vec<OrderFillRow>,
    planned_lot_consumed: &mut Vec<(Uuid, Decimal)>,
    ledger: &mut LedgerChain,
) -> CoreResult<()> {
    debug!(
        signal_id = %signal.signal_id,
        side = %intent.side,
        reason = intent.source_reason_code.as_str(),
        qty = %intent.requested_qty,
        "materializing order intent"
    );

    let mut remaining_qty = quantize(intent.requested_qty, SCALE_18);
    let attempts = attempt_timestamps(context.run_context.origin_hour_ts_utc);
    let attempt_count = attempts.len();

    for (attempt_seq, ts) in attempts.into_iter().enumerate() {
        if remaining_qty <= Decimal::ZERO {
            break;
        }
        let attempt_seq = attempt_seq as i64;

        let request = OrderAttemptRequest {
            asset_id: signal.asset_id,
            side: intent.side,
            requested_qty: remaining_qty,
            attempt_ts_utc: ts,
        };
        let attempt_result = adapter.simulate_attempt(context, &request);

        let mut filled_qty = quantize(remaining_qty.min(attempt_result.filled_qty), SCALE_18);
        if attempt_result.fill_price.is_none() || attempt_result.reference_price.is_none() {
            filled_qty = quantize(Decimal::ZERO, SCALE_18);
            planned.risk_events.push(writer.build_risk_event_row(
                context,
                RiskEventType::OrderLifecycle,
                Severity::High,
                "ORDER_PRICE_UNAVAILABLE",
                &format!(
                    "signal_id={} attempt_seq={attempt_seq} has no deterministic price source.",
                    signal.signal_id
                ),
                None,
            ));
        }

        let status = if filled_qty >= remaining_qty && filled_qty > Decimal::ZERO {
            filled_qty = remaining_qty;
            OrderStatus::Filled
        } else if filled_qty > Decimal::ZERO {
            OrderStatus::Partial
        } else {
            OrderStatus::Cancelled
        };

        let requested_notional = attempt_requested_notional(intent, remaining_qty);
        let order = writer.build_order_request_attempt_row(
            context,
            signal,
            intent.side,
            ts,
            remaining_qty,
            requested_notional,
            status,
            attempt_seq,
        )?;
        planned.order_requests.push(order.clone());

        if filled_qty > Decimal::ZERO {
            let fill_price = attempt_result.fill_price.ok_or_else(|| {
                CoreError::InvariantViolation(
                    "simulator reported a fill without a fill price".into(),
                )
            })?;
            let fill = writer.build_order_fill_row(
                context,
                &order,
                ts,
                fill_price,
                filled_qty,
                attempt_result.liquidity_flag,
                attempt_seq,
            )?;
            planned.order_fills.push(fill.clone());
            planned_fills.push(fill.clone());

            let ledger_row = writer.build_cash_ledger_row(
                context,
                &fill,
                intent.side,
                ledger.next_seq,
                ledger.balance,
                ledger.prev_hash.as_deref(),
            )?;
            ledger.next_seq += 1;
            ledger.balance = ledger_row.balance_after;
            ledger.prev_hash = Some(ledger_row.ledger_hash.clone());
            planned.cash_ledger_rows.push(ledger_row);

            if intent.side == OrderSide::Buy {
                let lot = writer.build_position_lot_row(context, &fill)?;
                planned.position_lots.push(lot.clone());
                planned_lots_by_asset.push(lot);
            } else {
                let residual = allocate_sell_fill_fifo(
                    context,
                    writer,
                    &fill,
                    planned_lots_by_asset,
                    planned_fills,
                    planned_lot_consumed,
                    &mut planned.executed_trades,
                )?;
                if residual > Decimal::ZERO {
                    planned.risk_events.push(writer.build_risk_event_row(
                        context,
                        RiskEventType::OrderLifecycle,
                        Severity::High,
                        "SELL_ALLOCATION_INSUFFICIENT_LOTS",
                        &format!(
                            "fill_id={} residual_qty={residual} could not be allocated via FIFO lots.",
                            fill.fill_id
                        ),
                        None,
                    ));
                }
            }
        }

        remaining_qty = quantize(remaining_qty - filled_qty, SCALE_18);
    }

    if remaining_qty > Decimal::ZERO {
        planned.risk_events.push(writer.build_risk_event_row(
            context,
            RiskEventType::OrderLifecycle,
            Severity::Medium,
            "ORDER_RETRY_EXHAUSTED",
            &format!(
                "signal_id={} remaining_qty={remaining_qty} after {attempt_count} deterministic attempts.",
                signal.signal_id
            ),
            None,
        ));
    }

    Ok(())
}

fn allocate_sell_fill_fifo<D: Database>(
    context: &ExecutionContext,
    writer: &AppendOnlyRuntimeWriter<'_, D>,
    fill: &OrderFillRow,
    planned_lots_by_asset: &[PositionLotRow],
    planned_fills: &[OrderFillRow],
    planned_lot_consumed: &mut Vec<(Uuid, Decimal)>,
    trade_rows: &mut Vec<crate::domain::ExecutedTradeRow>,
) -> CoreResult<Decimal> {
    let mut remaining = quantize(fill.fill_qty, SCALE_18);
    let lot_views =
        build_fifo_lot_views(context, fill.asset_id, planned_lots_by_asset, planned_fills)?;

    for lot_view in lot_views {
        if remaining <= Decimal::ZERO {
            break;
        }
        let planned_consumed = planned_lot_consumed
            .iter()
            .find(|(lot_id, _)| *lot_id == lot_view.lot_id)
            .map(|(_, qty)| *qty)
            .unwrap_or(Decimal::ZERO);
        let available = quantize(
            lot_view.open_qty - lot_view.historical_consumed_qty - planned_consumed,
            SCALE_18,
        );
        if available <= Decimal::ZERO {
            continue;
        }
        let quantity = quantize(available.min(remaining), SCALE_18);
        let trade = writer.build_executed_trade_row(
            context,
            lot_view.lot_id,
            lot_view.asset_id,
            lot_view.open_ts_utc,
            lot_view.open_price,
            lot_view.open_qty,
            lot_view.open_fee,
            lot_view.open_slippage_cost,
            &lot_view.parent_lot_hash,
            fill,
            quantity,
        )?;
        trade_rows.push(trade);
        match planned_lot_consumed
            .iter_mut()
            .find(|(lot_id, _)| *lot_id == lot_view.lot_id)
        {
            Some((_, consumed)) => *consumed = quantize(*consumed + quantity, SCALE_18),
            None => planned_lot_consumed.push((lot_view.lot_id, quantity)),
        }
        remaining = quantize(remaining - quantity, SCALE_18);
    }
    Ok(remaining)
}

/// Ordered FIFO lot views: historical lots plus lots planned this hour,
/// by (open_ts_utc, lot_id).
fn build_fifo_lot_views(
    context: &ExecutionContext,
    asset_id: i64,
    planned_lots_by_asset: &[PositionLotRow],
    planned_fills: &[OrderFillRow],
) -> CoreResult<Vec<LotView>> {
    let mut views = Vec::new();
    for lot in context.lots_for_asset(asset_id) {
        let open_fill = context.find_existing_fill(lot.open_fill_id).ok_or_else(|| {
            CoreError::InputMissing(format!(
                "missing open_fill_id={} for lot_id={}",
                lot.open_fill_id, lot.lot_id
            ))
        })?;
        views.push(LotView {
            lot_id: lot.lot_id,
            asset_id: lot.asset_id,
            open_ts_utc: lot.open_ts_utc,
            open_price: lot.open_price,
            open_qty: lot.open_qty,
            open_fee: lot.open_fee,
            open_slippage_cost: open_fill.slippage_cost,
            parent_lot_hash: lot.row_hash.clone(),
            historical_consumed_qty: quantize(context.executed_qty_for_lot(lot.lot_id), SCALE_18),
        });
    }
    for lot in planned_lots_by_asset.iter().filter(|lot| lot.asset_id == asset_id) {
        let open_fill = planned_fills
            .iter()
            .find(|fill| fill.fill_id == lot.open_fill_id)
            .ok_or_else(|| {
                CoreError::InvariantViolation(format!(
                    "missing planned fill for open_fill_id={}",
                    lot.open_fill_id
                ))
            })?;
        views.push(LotView {
            lot_id: lot.lot_id,
            asset_id: lot.asset_id,
            open_ts_utc: lot.open_ts_utc,
            open_price: lot.open_price,
            open_qty: lot.open_qty,
            open_fee: lot.open_fee,
            open_slippage_cost: open_fill.slippage_cost,
            parent_lot_hash: lot.row_hash.clone(),
            historical_consumed_qty: quantize(Decimal::ZERO, SCALE_18),
        });
    }
    views.sort_by(|a, b| {
        a.open_ts_utc
            .cmp(&b.open_ts_utc)
            .then_with(|| a.lot_id.to_string().cmp(&b.lot_id.to_string()))
    });
    Ok(views)
}

fn round_down_to_lot_size(raw_qty: Decimal, lot_size: Decimal) -> CoreResult<Decimal> {
    if raw_qty <= Decimal::ZERO {
        return Ok(quantize(Decimal::ZERO, SCALE_18));
    }
    if lot_size <= Decimal::ZERO {
        return Err(CoreError::InvariantViolation("lot_size must be positive".into()));
    }
    let lot_steps = (raw_qty / lot_size).floor();
    let normalized = lot_steps * lot_size;
    if normalized <= Decimal::ZERO {
        return Ok(quantize(Decimal::ZERO, SCALE_18));
    }
    Ok(quantize(normalized, SCALE_18))
}

fn cluster_state_hash_for_prediction(
    context: &ExecutionContext,
    prediction: &PredictionState,
) -> CoreResult<String> {
    let membership = context.find_membership(prediction.asset_id).ok_or_else(|| {
        CoreError::InputMissing(format!(
            "missing cluster membership for asset_id={}",
            prediction.asset_id
        ))
    })?;
    let cluster_state = context.find_cluster_state(membership.cluster_id).ok_or_else(|| {
        CoreError::InputMissing(format!(
            "missing cluster state for cluster_id={}",
            membership.cluster_id
        ))
    })?;
    Ok(stable_hash(tokens![
        &context.run_context.run_seed_hash,
        &membership.membership_hash,
        &cluster_state.state_hash,
        &cluster_state.parent_risk_hash,
        &cluster_state.row_hash,
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn attempt_schedule_offsets_are_0_1_3_7_minutes() {
        let origin = Utc.with_ymd_and_hms(2026, 1, 1, 4, 0, 0).unwrap();
        let attempts = attempt_timestamps(origin);
        let offsets: Vec<i64> = attempts
            .iter()
            .map(|ts| (*ts - origin).num_minutes())
            .collect();
        assert_eq!(offsets, vec![0, 1, 3, 7]);
    }

    #[test]
    fn lot_size_floor() {
        assert_eq!(
            round_down_to_lot_size(dec!(1.25), dec!(0.5)).unwrap(),
            dec!(1.0)
        );
        assert_eq!(
            round_down_to_lot_size(dec!(0.4), dec!(0.5)).unwrap(),
            dec!(0)
        );
        assert_eq!(
            round_down_to_lot_size(dec!(-1), dec!(0.5)).unwrap(),
            dec!(0)
        );
        assert!(round_down_to_lot_size(dec!(1), dec!(0)).is_err());
    }
}
