//! Append-only runtime writer.
//!
//! Builds every output row with content-addressed identity and canonical
//! row hash, inserts them through the substrate contract, and asserts
//! ledger continuity around the hour's writes. Row hashes cover all
//! persisted fields in column order, prefixed by the run seed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::canonical::{
    canonical_serialize, hour_floor, quantize, quantize_rate, quantize_size_fraction, stable_hash,
    stable_uuid, SCALE_18,
};
use crate::context::ExecutionContext;
use crate::decision::DecisionResult;
use crate::domain::{
    CashLedgerRow, Direction, ExecutedTradeRow, LiquidityFlag, OrderFillRow, OrderRequestRow,
    OrderSide, OrderStatus, OrderType, PositionLotRow, PredictionState, RegimeState, RiskEventRow,
    RiskEventType, Severity, SignalAction, TimeInForce, TradeSignalRow,
};
use crate::error::{CoreError, CoreResult};
use crate::store::{Database, Value};
use crate::tokens;

/// All rows planned or written for one hour.
#[derive(Debug, Clone, Default)]
pub struct RuntimeWriteResult {
    pub trade_signals: Vec<TradeSignalRow>,
    pub order_requests: Vec<OrderRequestRow>,
    pub order_fills: Vec<OrderFillRow>,
    pub position_lots: Vec<PositionLotRow>,
    pub executed_trades: Vec<ExecutedTradeRow>,
    pub cash_ledger_rows: Vec<CashLedgerRow>,
    pub risk_events: Vec<RiskEventRow>,
}

/// Per-table emission counts (the caller-facing summary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeWriteCounts {
    pub trade_signals: usize,
    pub order_requests: usize,
    pub order_fills: usize,
    pub position_lots: usize,
    pub executed_trades: usize,
    pub cash_ledger_rows: usize,
    pub risk_events: usize,
}

impl RuntimeWriteResult {
    pub fn counts(&self) -> RuntimeWriteCounts {
        RuntimeWriteCounts {
            trade_signals: self.trade_signals.len(),
            order_requests: self.order_requests.len(),
            order_fills: self.order_fills.len(),
            position_lots: self.position_lots.len(),
            executed_trades: self.executed_trades.len(),
            cash_ledger_rows: self.cash_ledger_rows.len(),
            risk_events: self.risk_events.len(),
        }
    }
}

/// Insert-only writer for deterministic runtime artifacts.
pub struct AppendOnlyRuntimeWriter<'a, D: Database> {
    db: &'a D,
}

impl<'a, D: Database> AppendOnlyRuntimeWriter<'a, D> {
    pub fn new(db: &'a D) -> Self {
        Self { db }
    }

    /// Fail fast if the cash-ledger continuity invariant is broken.
    ///
    /// Chain equalities compare canonical strings exactly; the balance
    /// formula casts through REAL (the writer re-checks it in exact
    /// decimal arithmetic for every row it constructs).
    pub fn assert_ledger_continuity(&self, account_id: i64, run_mode: &str) -> CoreResult<()> {
        let row = self.db.fetch_one(
            "WITH ordered AS (
                 SELECT account_id,
                        run_mode,
                        ledger_seq,
                        balance_before,
                        balance_after,
                        delta_cash,
                        prev_ledger_hash,
                        ledger_hash,
                        LAG(balance_after) OVER (
                            PARTITION BY account_id, run_mode
                            ORDER BY ledger_seq
                        ) AS expected_before,
                        LAG(ledger_hash) OVER (
                            PARTITION BY account_id, run_mode
                            ORDER BY ledger_seq
                        ) AS expected_prev_hash
                 FROM cash_ledger
                 WHERE account_id = :account_id
                   AND run_mode = :run_mode
             )
             SELECT COUNT(*) AS violations
             FROM ordered
             WHERE ABS(CAST(balance_after AS REAL)
                       - (CAST(balance_before AS REAL) + CAST(delta_cash AS REAL))) > 1e-6
                OR (ledger_seq > 1 AND balance_before <> expected_before)
                OR (ledger_seq > 1 AND prev_ledger_hash <> expected_prev_hash)",
            &[
                ("account_id", Value::from(account_id)),
                ("run_mode", Value::from(run_mode)),
            ],
        )?;
        let violations = row.map(|r| r.get_i64("violations")).transpose()?.unwrap_or(0);
        if violations != 0 {
            return Err(CoreError::LedgerContinuityBroken { violations });
        }
        Ok(())
    }

    /// Derive the deterministic placeholder slippage rate from the cost
    /// profile's slippage parameter hash (first 8 hex mod 1000, in 1e-6).
    pub fn derive_slippage_rate(&self, slippage_param_hash: &str) -> CoreResult<Decimal> {
        let prefix = slippage_param_hash.get(..8).ok_or_else(|| {
            CoreError::InvariantViolation("slippage_param_hash shorter than 8 chars".into())
        })?;
        let basis = u64::from_str_radix(prefix, 16).map_err(|_| {
            CoreError::InvariantViolation("slippage_param_hash is not hex".into())
        })? % 1000;
        Ok(quantize_rate(
            Decimal::from(basis) / Decimal::from(1_000_000),
        ))
    }

    pub fn build_trade_signal_row(
        &self,
        context: &ExecutionContext,
        prediction: &PredictionState,
        regime: &RegimeState,
        decision: &DecisionResult,
        action_override: Option<SignalAction>,
    ) -> CoreResult<TradeSignalRow> {
        let action = action_override.unwrap_or(decision.action);
        let direction = if action == SignalAction::Enter {
            Direction::Long
        } else {
            Direction::Flat
        };

        let expected_return = quantize(prediction.expected_return, SCALE_18);
        let assumed_fee_rate = quantize_rate(context.cost_profile.fee_rate);
        let assumed_slippage_rate =
            self.derive_slippage_rate(&context.cost_profile.slippage_param_hash)?;
        let cost_rate = quantize_rate(assumed_fee_rate + assumed_slippage_rate);
        let net_edge = quantize(expected_return - cost_rate, SCALE_18);

        let position_size_fraction = if action == SignalAction::Enter {
            quantize_size_fraction(decision.position_size_fraction)
        } else {
            quantize_size_fraction(Decimal::ZERO)
        };
        let mut target_notional = if action == SignalAction::Enter {
            quantize(
                context.capital_state.portfolio_value * position_size_fraction,
                SCALE_18,
            )
        } else {
            quantize(Decimal::ZERO, SCALE_18)
        };
        if target_notional > context.capital_state.cash_balance {
            target_notional = quantize(context.capital_state.cash_balance, SCALE_18);
        }

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

        let run_ctx = &context.run_context;
        let upstream_hash = stable_hash(tokens![
            &run_ctx.run_seed_hash,
            &prediction.upstream_hash,
            &regime.upstream_hash,
            &context.capital_state.row_hash,
            &context.risk_state.row_hash,
            &cluster_state.row_hash,
        ]);
        let signal_id = stable_uuid(
            "trade_signal",
            tokens![
                &run_ctx.run_seed_hash,
                prediction.asset_id,
                prediction.horizon.as_str(),
                action.as_str(),
                &decision.decision_hash,
                &upstream_hash,
            ],
        );
        let row_hash = stable_hash(tokens![
            &run_ctx.run_seed_hash,
            signal_id,
            run_ctx.run_id,
            run_ctx.run_mode.as_str(),
            run_ctx.account_id,
            prediction.asset_id,
            run_ctx.origin_hour_ts_utc,
            prediction.horizon.as_str(),
            action.as_str(),
            direction.as_str(),
            decision.confidence,
            expected_return,
            assumed_fee_rate,
            assumed_slippage_rate,
            net_edge,
            target_notional,
            position_size_fraction,
            context.risk_state.hour_ts_utc,
            &decision.decision_hash,
            context.risk_state.source_run_id,
            membership.membership_id,
            &upstream_hash,
        ]);

        Ok(TradeSignalRow {
            signal_id,
            run_id: run_ctx.run_id,
            run_mode: run_ctx.run_mode,
            account_id: run_ctx.account_id,
            asset_id: prediction.asset_id,
            hour_ts_utc: run_ctx.origin_hour_ts_utc,
            horizon: prediction.horizon,
            action,
            direction,
            confidence: decision.confidence,
            expected_return,
            assumed_fee_rate,
            assumed_slippage_rate,
            net_edge,
            target_position_notional: target_notional,
            position_size_fraction,
            risk_state_hour_ts_utc: context.risk_state.hour_ts_utc,
            decision_hash: decision.decision_hash.clone(),
            risk_state_run_id: context.risk_state.source_run_id,
            cluster_membership_id: membership.membership_id,
            upstream_hash,
            row_hash,
        })
    }

    /// Build one order-request attempt row of the retry schedule.
    #[allow(clippy::too_many_arguments)]
    pub fn build_order_request_attempt_row(
        &self,
        context: &ExecutionContext,
        signal: &TradeSignalRow,
        side: OrderSide,
        request_ts_utc: DateTime<Utc>,
        requested_qty: Decimal,
        requested_notional: Decimal,
        status: OrderStatus,
        attempt_seq: i64,
    ) -> CoreResult<OrderRequestRow> {
        if requested_qty <= Decimal::ZERO {
            return Err(CoreError::InvariantViolation(
                "order attempt requested_qty must be positive".into(),
            ));
        }

        let run_ctx = &context.run_context;
        let requested_qty = quantize(requested_qty, SCALE_18);
        let requested_notional = quantize(requested_notional, SCALE_18);
        let pre_order_cash_available = quantize(context.capital_state.cash_balance, SCALE_18);

        let order_id = stable_uuid(
            "order_request",
            tokens![
                &run_ctx.run_seed_hash,
                signal.signal_id,
                &signal.row_hash,
                requested_notional,
                attempt_seq,
            ],
        );
        let client_order_id = format!("det-{}", &order_id.simple().to_string()[..24]);

        let row_hash = stable_hash(tokens![
            &run_ctx.run_seed_hash,
            order_id,
            signal.signal_id,
            run_ctx.run_id,
            run_ctx.run_mode.as_str(),
            run_ctx.account_id,
            signal.asset_id,
            &client_order_id,
            request_ts_utc,
            run_ctx.origin_hour_ts_utc,
            side.as_str(),
            OrderType::Market.as_str(),
            TimeInForce::Ioc.as_str(),
            Option::<Decimal>::None,
            requested_qty,
            requested_notional,
            pre_order_cash_available,
            true,
            status.as_str(),
            context.cost_profile.cost_profile_id,
            run_ctx.origin_hour_ts_utc,
            context.risk_state.source_run_id,
            signal.cluster_membership_id,
            attempt_seq,
            &signal.row_hash,
        ]);

        Ok(OrderRequestRow {
            order_id,
            signal_id: signal.signal_id,
            run_id: run_ctx.run_id,
            run_mode: run_ctx.run_mode,
            account_id: run_ctx.account_id,
            asset_id: signal.asset_id,
            client_order_id,
            request_ts_utc,
            hour_ts_utc: run_ctx.origin_hour_ts_utc,
            side,
            order_type: OrderType::Market,
            tif: TimeInForce::Ioc,
            limit_price: None,
            requested_qty,
            requested_notional,
            pre_order_cash_available,
            risk_check_passed: true,
            status,
            cost_profile_id: context.cost_profile.cost_profile_id,
            origin_hour_ts_utc: run_ctx.origin_hour_ts_utc,
            risk_state_run_id: context.risk_state.source_run_id,
            cluster_membership_id: signal.cluster_membership_id,
            attempt_seq,
            parent_signal_hash: signal.row_hash.clone(),
            row_hash,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn build_order_fill_row(
        &self,
        context: &ExecutionContext,
        order: &OrderRequestRow,
        fill_ts_utc: DateTime<Utc>,
        fill_price: Decimal,
        fill_qty: Decimal,
        liquidity_flag: LiquidityFlag,
        attempt_seq: i64,
    ) -> CoreResult<OrderFillRow> {
        if fill_qty <= Decimal::ZERO || fill_price <= Decimal::ZERO {
            return Err(CoreError::InvariantViolation(
                "order fill requires positive price and quantity".into(),
            ));
        }

        let run_ctx = &context.run_context;
        let fill_price = quantize(fill_price, SCALE_18);
        let fill_qty = quantize(fill_qty, SCALE_18);
        let fill_notional = quantize(fill_price * fill_qty, SCALE_18);
        let fee_rate = quantize_rate(context.cost_profile.fee_rate);
        let fee_paid = quantize(fill_notional * fee_rate, SCALE_18);
        let realized_slippage_rate =
            self.derive_slippage_rate(&context.cost_profile.slippage_param_hash)?;
        let slippage_cost = quantize(fill_notional * realized_slippage_rate, SCALE_18);

        let fill_id = stable_uuid(
            "order_fill",
            tokens![
                &run_ctx.run_seed_hash,
                order.order_id,
                &order.row_hash,
                fill_qty,
                attempt_seq,
            ],
        );
        let exchange_trade_id = format!("sim-{}", &fill_id.simple().to_string()[..24]);
        let hour_ts_utc = hour_floor(fill_ts_utc);

        let row_hash = stable_hash(tokens![
            &run_ctx.run_seed_hash,
            fill_id,
            order.order_id,
            run_ctx.run_id,
            run_ctx.run_mode.as_str(),
            run_ctx.account_id,
            order.asset_id,
            &exchange_trade_id,
            fill_ts_utc,
            hour_ts_utc,
            fill_price,
            fill_qty,
            fill_notional,
            fee_paid,
            fee_rate,
            realized_slippage_rate,
            slippage_cost,
            liquidity_flag.as_str(),
            run_ctx.origin_hour_ts_utc,
            &order.row_hash,
        ]);

        Ok(OrderFillRow {
            fill_id,
            order_id: order.order_id,
            run_id: run_ctx.run_id,
            run_mode: run_ctx.run_mode,
            account_id: run_ctx.account_id,
            asset_id: order.asset_id,
            exchange_trade_id,
            fill_ts_utc,
            hour_ts_utc,
            fill_price,
            fill_qty,
            fill_notional,
            fee_paid,
            fee_rate,
            realized_slippage_rate,
            slippage_cost,
            liquidity_flag,
            origin_hour_ts_utc: run_ctx.origin_hour_ts_utc,
            parent_order_hash: order.row_hash.clone(),
            row_hash,
        })
    }

    pub fn build_position_lot_row(
        &self,
        context: &ExecutionContext,
        fill: &OrderFillRow,
    ) -> CoreResult<PositionLotRow> {
        let run_ctx = &context.run_context;
        let lot_id = stable_uuid(
            "position_lot",
            tokens![&run_ctx.run_seed_hash, fill.fill_id, &fill.row_hash],
        );
        let hour_ts_utc = hour_floor(fill.fill_ts_utc);

        let row_hash = stable_hash(tokens![
            &run_ctx.run_seed_hash,
            lot_id,
            fill.fill_id,
            run_ctx.run_id,
            run_ctx.run_mode.as_str(),
            run_ctx.account_id,
            fill.asset_id,
            hour_ts_utc,
            fill.fill_ts_utc,
            fill.fill_price,
            fill.fill_qty,
            fill.fill_notional,
            fill.fee_paid,
            fill.fill_qty,
            run_ctx.origin_hour_ts_utc,
            &fill.row_hash,
        ]);

        Ok(PositionLotRow {
            lot_id,
            open_fill_id: fill.fill_id,
            run_id: run_ctx.run_id,
            run_mode: run_ctx.run_mode,
            account_id: run_ctx.account_id,
            asset_id: fill.asset_id,
            hour_ts_utc,
            open_ts_utc: fill.fill_ts_utc,
            open_price: fill.fill_price,
            open_qty: fill.fill_qty,
            open_notional: fill.fill_notional,
            open_fee: fill.fee_paid,
            remaining_qty: fill.fill_qty,
            origin_hour_ts_utc: run_ctx.origin_hour_ts_utc,
            parent_fill_hash: fill.row_hash.clone(),
            row_hash,
        })
    }

    /// Build one executed-trade slice allocating part of a sell fill to a lot.
    #[allow(clippy::too_many_arguments)]
    pub fn build_executed_trade_row(
        &self,
        context: &ExecutionContext,
        lot_id: Uuid,
        lot_asset_id: i64,
        entry_ts_utc: DateTime<Utc>,
        entry_price: Decimal,
        lot_open_qty: Decimal,
        lot_open_fee: Decimal,
        entry_fill_slippage_cost: Decimal,
        parent_lot_hash: &str,
        exit_fill: &OrderFillRow,
        quantity: Decimal,
    ) -> CoreResult<ExecutedTradeRow> {
        if quantity <= Decimal::ZERO {
            return Err(CoreError::InvariantViolation(
                "executed trade quantity must be positive".into(),
            ));
        }
        if lot_open_qty <= Decimal::ZERO || exit_fill.fill_qty <= Decimal::ZERO {
            return Err(CoreError::InvariantViolation(
                "executed trade requires positive lot and fill quantities".into(),
            ));
        }

        let run_ctx = &context.run_context;
        let quantity = quantize(quantity, SCALE_18);
        let exit_price = exit_fill.fill_price;
        let gross_pnl = quantize((exit_price - entry_price) * quantity, SCALE_18);

        let entry_fee_share = quantize(lot_open_fee * quantity / lot_open_qty, SCALE_18);
        let exit_fee_share =
            quantize(exit_fill.fee_paid * quantity / exit_fill.fill_qty, SCALE_18);
        let total_fee = quantize(entry_fee_share + exit_fee_share, SCALE_18);

        let entry_slippage_share =
            quantize(entry_fill_slippage_cost * quantity / lot_open_qty, SCALE_18);
        let exit_slippage_share =
            quantize(exit_fill.slippage_cost * quantity / exit_fill.fill_qty, SCALE_18);
        let total_slippage_cost = quantize(entry_slippage_share + exit_slippage_share, SCALE_18);

        let net_pnl = quantize(gross_pnl - total_fee - total_slippage_cost, SCALE_18);

        let exit_ts_utc = exit_fill.fill_ts_utc;
        let holding_hours = (exit_ts_utc - entry_ts_utc).num_hours().max(0);
        let hour_ts_utc = hour_floor(exit_ts_utc);

        let trade_id = stable_uuid(
            "executed_trade",
            tokens![
                &run_ctx.run_seed_hash,
                lot_id,
                parent_lot_hash,
                exit_fill.fill_id,
                &exit_fill.row_hash,
                quantity,
            ],
        );

        let row_hash = stable_hash(tokens![
            &run_ctx.run_seed_hash,
            trade_id,
            lot_id,
            run_ctx.run_id,
            run_ctx.run_mode.as_str(),
            run_ctx.account_id,
            lot_asset_id,
            hour_ts_utc,
            entry_ts_utc,
            exit_ts_utc,
            entry_price,
            exit_price,
            quantity,
            gross_pnl,
            net_pnl,
            total_fee,
            total_slippage_cost,
            holding_hours,
            run_ctx.origin_hour_ts_utc,
            parent_lot_hash,
        ]);

        Ok(ExecutedTradeRow {
            trade_id,
            lot_id,
            run_id: run_ctx.run_id,
            run_mode: run_ctx.run_mode,
            account_id: run_ctx.account_id,
            asset_id: lot_asset_id,
            hour_ts_utc,
            entry_ts_utc,
            exit_ts_utc,
            entry_price,
            exit_price,
            quantity,
            gross_pnl,
            net_pnl,
            total_fee,
            total_slippage_cost,
            holding_hours,
            origin_hour_ts_utc: run_ctx.origin_hour_ts_utc,
            parent_lot_hash: parent_lot_hash.to_string(),
            row_hash,
        })
    }

    /// Build the ledger row booking one fill's cash effect.
    ///
    /// BUY debits cash by notional + fee + slippage; SELL credits cash by
    /// notional − fee − slippage. The seq/balance/hash chain continues
    /// from the caller-supplied prior link.
    pub fn build_cash_ledger_row(
        &self,
        context: &ExecutionContext,
        fill: &OrderFillRow,
        side: OrderSide,
        ledger_seq: i64,
        balance_before: Decimal,
        prev_ledger_hash: Option<&str>,
    ) -> CoreResult<CashLedgerRow> {
        let run_ctx = &context.run_context;
        let delta_cash = match side {
            OrderSide::Buy => quantize(
                -(fill.fill_notional + fill.fee_paid + fill.slippage_cost),
                SCALE_18,
            ),
            OrderSide::Sell => quantize(
                fill.fill_notional - fill.fee_paid - fill.slippage_cost,
                SCALE_18,
            ),
        };
        let balance_before = quantize(balance_before, SCALE_18);
        let balance_after = quantize(balance_before + delta_cash, SCALE_18);
        if balance_after < Decimal::ZERO {
            return Err(CoreError::InvariantViolation(format!(
                "cash ledger balance would go negative (seq={ledger_seq})"
            )));
        }
        if ledger_seq == 1 && prev_ledger_hash.is_some() {
            return Err(CoreError::InvariantViolation(
                "ledger_seq=1 must not carry prev_ledger_hash".into(),
            ));
        }
        if ledger_seq > 1 && prev_ledger_hash.is_none() {
            return Err(CoreError::LedgerContinuityBroken { violations: 1 });
        }

        let event_type = match side {
            OrderSide::Buy => "ORDER_FILL_BUY",
            OrderSide::Sell => "ORDER_FILL_SELL",
        };
        let ref_type = "order_fill";
        let event_ts_utc = fill.fill_ts_utc;
        let hour_ts_utc = hour_floor(event_ts_utc);

        let economic_event_hash = stable_hash(tokens![
            "cash_ledger_event_v1",
            &run_ctx.run_seed_hash,
            ref_type,
            fill.fill_id,
            event_type,
            delta_cash,
            event_ts_utc,
        ]);
        let ledger_hash = stable_hash(tokens![
            "cash_ledger_chain_v1",
            &run_ctx.run_seed_hash,
            run_ctx.account_id,
            run_ctx.run_mode.as_str(),
            ledger_seq,
            balance_before,
            delta_cash,
            balance_after,
            prev_ledger_hash.map(str::to_string),
            &economic_event_hash,
        ]);
        let row_hash = stable_hash(tokens![
            &run_ctx.run_seed_hash,
            run_ctx.run_id,
            run_ctx.run_mode.as_str(),
            run_ctx.account_id,
            event_ts_utc,
            hour_ts_utc,
            event_type,
            ref_type,
            fill.fill_id,
            delta_cash,
            balance_before,
            balance_after,
            run_ctx.origin_hour_ts_utc,
            ledger_seq,
            prev_ledger_hash.map(str::to_string),
            &economic_event_hash,
            &ledger_hash,
        ]);

        Ok(CashLedgerRow {
            run_id: run_ctx.run_id,
            run_mode: run_ctx.run_mode,
            account_id: run_ctx.account_id,
            event_ts_utc,
            hour_ts_utc,
            event_type: event_type.to_string(),
            ref_type: ref_type.to_string(),
            ref_id: fill.fill_id,
            delta_cash,
            balance_before,
            balance_after,
            origin_hour_ts_utc: run_ctx.origin_hour_ts_utc,
            ledger_seq,
            prev_ledger_hash: prev_ledger_hash.map(str::to_string),
            economic_event_hash,
            ledger_hash,
            row_hash,
        })
    }

    /// Build a risk event; identity derives from the reason tuple, the
    /// row hash additionally covers the canonical details payload.
    pub fn build_risk_event_row(
        &self,
        context: &ExecutionContext,
        event_type: RiskEventType,
        severity: Severity,
        reason_code: &str,
        detail: &str,
        extra_details: Option<JsonValue>,
    ) -> RiskEventRow {
        let run_ctx = &context.run_context;
        let mut payload = json!({ "detail": detail });
        if let Some(JsonValue::Object(extra)) = extra_details {
            if let JsonValue::Object(ref mut base) = payload {
                for (key, value) in extra {
                    base.insert(key, value);
                }
            }
        }
        let details = canonical_serialize(&payload);

        let risk_event_id = stable_uuid(
            "risk_event",
            tokens![
                &run_ctx.run_seed_hash,
                event_type.as_str(),
                severity.as_str(),
                reason_code,
                detail,
                run_ctx.origin_hour_ts_utc,
            ],
        );
        let row_hash = stable_hash(tokens![
            &run_ctx.run_seed_hash,
            risk_event_id,
            run_ctx.run_id,
            run_ctx.run_mode.as_str(),
            run_ctx.account_id,
            run_ctx.origin_hour_ts_utc,
            run_ctx.origin_hour_ts_utc,
            event_type.as_str(),
            severity.as_str(),
            reason_code,
            &details,
            context.risk_state.hour_ts_utc,
            run_ctx.origin_hour_ts_utc,
            &context.risk_state.row_hash,
        ]);

        RiskEventRow {
            risk_event_id,
            run_id: run_ctx.run_id,
            run_mode: run_ctx.run_mode,
            account_id: run_ctx.account_id,
            event_ts_utc: run_ctx.origin_hour_ts_utc,
            hour_ts_utc: run_ctx.origin_hour_ts_utc,
            event_type,
            severity,
            reason_code: reason_code.to_string(),
            details,
            related_state_hour_ts_utc: context.risk_state.hour_ts_utc,
            origin_hour_ts_utc: run_ctx.origin_hour_ts_utc,
            parent_state_hash: context.risk_state.row_hash.clone(),
            row_hash,
        }
    }

    pub fn insert_trade_signal(&self, signal: &TradeSignalRow) -> CoreResult<()> {
        self.db.execute(
            "INSERT INTO trade_signal (
                signal_id, run_id, run_mode, account_id, asset_id, hour_ts_utc, horizon,
                action, direction, confidence, expected_return, assumed_fee_rate,
                assumed_slippage_rate, net_edge, target_position_notional,
                position_size_fraction, risk_state_hour_ts_utc, decision_hash,
                risk_state_run_id, cluster_membership_id, upstream_hash, row_hash
            ) VALUES (
                :signal_id, :run_id, :run_mode, :account_id, :asset_id, :hour_ts_utc, :horizon,
                :action, :direction, :confidence, :expected_return, :assumed_fee_rate,
                :assumed_slippage_rate, :net_edge, :target_position_notional,
                :position_size_fraction, :risk_state_hour_ts_utc, :decision_hash,
                :risk_state_run_id, :cluster_membership_id, :upstream_hash, :row_hash
            )",
            &[
                ("signal_id", Value::from(signal.signal_id)),
                ("run_id", Value::from(signal.run_id)),
                ("run_mode", Value::from(signal.run_mode.as_str())),
                ("account_id", Value::from(signal.account_id)),
                ("asset_id", Value::from(signal.asset_id)),
                ("hour_ts_utc", Value::from(signal.hour_ts_utc)),
                ("horizon", Value::from(signal.horizon.as_str())),
                ("action", Value::from(signal.action.as_str())),
                ("direction", Value::from(signal.direction.as_str())),
                ("confidence", Value::from(signal.confidence)),
                ("expected_return", Value::from(signal.expected_return)),
                ("assumed_fee_rate", Value::from(signal.assumed_fee_rate)),
                (
                    "assumed_slippage_rate",
                    Value::from(signal.assumed_slippage_rate),
                ),
                ("net_edge", Value::from(signal.net_edge)),
                (
                    "target_position_notional",
                    Value::from(signal.target_position_notional),
                ),
                (
                    "position_size_fraction",
                    Value::from(signal.position_size_fraction),
                ),
                (
                    "risk_state_hour_ts_utc",
                    Value::from(signal.risk_state_hour_ts_utc),
                ),
                ("decision_hash", Value::from(signal.decision_hash.as_str())),
                ("risk_state_run_id", Value::from(signal.risk_state_run_id)),
                (
                    "cluster_membership_id",
                    Value::from(signal.cluster_membership_id),
                ),
                ("upstream_hash", Value::from(signal.upstream_hash.as_str())),
                ("row_hash", Value::from(signal.row_hash.as_str())),
            ],
        )
    }

    pub fn insert_order_request(&self, order: &OrderRequestRow) -> CoreResult<()> {
        self.db.execute(
            "INSERT INTO order_request (
                order_id, signal_id, run_id, run_mode, account_id, asset_id, client_order_id,
                request_ts_utc, hour_ts_utc, side, order_type, tif, limit_price, requested_qty,
                requested_notional, pre_order_cash_available, risk_check_passed, status,
                cost_profile_id, origin_hour_ts_utc, risk_state_run_id, cluster_membership_id,
                attempt_seq, parent_signal_hash, row_hash
            ) VALUES (
                :order_id, :signal_id, :run_id, :run_mode, :account_id, :asset_id, :client_order_id,
                :request_ts_utc, :hour_ts_utc, :side, :order_type, :tif, :limit_price, :requested_qty,
                :requested_notional, :pre_order_cash_available, :risk_check_passed, :status,
                :cost_profile_id, :origin_hour_ts_utc, :risk_state_run_id, :cluster_membership_id,
                :attempt_seq, :parent_signal_hash, :row_hash
            )",
            &[
                ("order_id", Value::from(order.order_id)),
                ("signal_id", Value::from(order.signal_id)),
                ("run_id", Value::from(order.run_id)),
                ("run_mode", Value::from(order.run_mode.as_str())),
                ("account_id", Value::from(order.account_id)),
                ("asset_id", Value::from(order.asset_id)),
                (
                    "client_order_id",
                    Value::from(order.client_order_id.as_str()),
                ),
                ("request_ts_utc", Value::from(order.request_ts_utc)),
                ("hour_ts_utc", Value::from(order.hour_ts_utc)),
                ("side", Value::from(order.side.as_str())),
                ("order_type", Value::from(order.order_type.as_str())),
                ("tif", Value::from(order.tif.as_str())),
                ("limit_price", Value::from(order.limit_price)),
                ("requested_qty", Value::from(order.requested_qty)),
                ("requested_notional", Value::from(order.requested_notional)),
                (
                    "pre_order_cash_available",
                    Value::from(order.pre_order_cash_available),
                ),
                ("risk_check_passed", Value::from(order.risk_check_passed)),
                ("status", Value::from(order.status.as_str())),
                ("cost_profile_id", Value::from(order.cost_profile_id)),
                ("origin_hour_ts_utc", Value::from(order.origin_hour_ts_utc)),
                ("risk_state_run_id", Value::from(order.risk_state_run_id)),
                (
                    "cluster_membership_id",
                    Value::from(order.cluster_membership_id),
                ),
                ("attempt_seq", Value::from(order.attempt_seq)),
                (
                    "parent_signal_hash",
                    Value::from(order.parent_signal_hash.as_str()),
                ),
                ("row_hash", Value::from(order.row_hash.as_str())),
            ],
        )
    }

    pub fn insert_order_fill(&self, fill: &OrderFillRow) -> CoreResult<()> {
        self.db.execute(
            "INSERT INTO order_fill (
                fill_id, order_id, run_id, run_mode, account_id, asset_id, exchange_trade_id,
                fill_ts_utc, hour_ts_utc, fill_price, fill_qty, fill_notional, fee_paid,
                fee_rate, realized_slippage_rate, slippage_cost, liquidity_flag,
                origin_hour_ts_utc, parent_order_hash, row_hash
            ) VALUES (
                :fill_id, :order_id, :run_id, :run_mode, :account_id, :asset_id, :exchange_trade_id,
                :fill_ts_utc, :hour_ts_utc, :fill_price, :fill_qty, :fill_notional, :fee_paid,
                :fee_rate, :realized_slippage_rate, :slippage_cost, :liquidity_flag,
                :origin_hour_ts_utc, :parent_order_hash, :row_hash
            )",
            &[
                ("fill_id", Value::from(fill.fill_id)),
                ("order_id", Value::from(fill.order_id)),
                ("run_id", Value::from(fill.run_id)),
                ("run_mode", Value::from(fill.run_mode.as_str())),
                ("account_id", Value::from(fill.account_id)),
                ("asset_id", Value::from(fill.asset_id)),
                (
                    "exchange_trade_id",
                    Value::from(fill.exchange_trade_id.as_str()),
                ),
                ("fill_ts_utc", Value::from(fill.fill_ts_utc)),
                ("hour_ts_utc", Value::from(fill.hour_ts_utc)),
                ("fill_price", Value::from(fill.fill_price)),
                ("fill_qty", Value::from(fill.fill_qty)),
                ("fill_notional", Value::from(fill.fill_notional)),
                ("fee_paid", Value::from(fill.fee_paid)),
                ("fee_rate", Value::from(fill.fee_rate)),
                (
                    "realized_slippage_rate",
                    Value::from(fill.realized_slippage_rate),
                ),
                ("slippage_cost", Value::from(fill.slippage_cost)),
                ("liquidity_flag", Value::from(fill.liquidity_flag.as_str())),
                ("origin_hour_ts_utc", Value::from(fill.origin_hour_ts_utc)),
                (
                    "parent_order_hash",
                    Value::from(fill.parent_order_hash.as_str()),
                ),
                ("row_hash", Value::from(fill.row_hash.as_str())),
            ],
        )
    }

    pub fn insert_position_lot(&self, lot: &PositionLotRow) -> CoreResult<()> {
        self.db.execute(
            "INSERT INTO position_lot (
                lot_id, open_fill_id, run_id, run_mode, account_id, asset_id, hour_ts_utc,
                open_ts_utc, open_price, open_qty, open_notional, open_fee, remaining_qty,
                origin_hour_ts_utc, parent_fill_hash, row_hash
            ) VALUES (
                :lot_id, :open_fill_id, :run_id, :run_mode, :account_id, :asset_id, :hour_ts_utc,
                :open_ts_utc, :open_price, :open_qty, :open_notional, :open_fee, :remaining_qty,
                :origin_hour_ts_utc, :parent_fill_hash, :row_hash
            )",
            &[
                ("lot_id", Value::from(lot.lot_id)),
                ("open_fill_id", Value::from(lot.open_fill_id)),
                ("run_id", Value::from(lot.run_id)),
                ("run_mode", Value::from(lot.run_mode.as_str())),
                ("account_id", Value::from(lot.account_id)),
                ("asset_id", Value::from(lot.asset_id)),
                ("hour_ts_utc", Value::from(lot.hour_ts_utc)),
                ("open_ts_utc", Value::from(lot.open_ts_utc)),
                ("open_price", Value::from(lot.open_price)),
                ("open_qty", Value::from(lot.open_qty)),
                ("open_notional", Value::from(lot.open_notional)),
                ("open_fee", Value::from(lot.open_fee)),
                ("remaining_qty", Value::from(lot.remaining_qty)),
                ("origin_hour_ts_utc", Value::from(lot.origin_hour_ts_utc)),
                (
                    "parent_fill_hash",
                    Value::from(lot.parent_fill_hash.as_str()),
                ),
                ("row_hash", Value::from(lot.row_hash.as_str())),
            ],
        )
    }

    pub fn insert_executed_trade(&self, trade: &ExecutedTradeRow) -> CoreResult<()> {
        self.db.execute(
            "INSERT INTO executed_trade (
                trade_id, lot_id, run_id, run_mode, account_id, asset_id, hour_ts_utc,
                entry_ts_utc, exit_ts_utc, entry_price, exit_price, quantity, gross_pnl,
                net_pnl, total_fee, total_slippage_cost, holding_hours, origin_hour_ts_utc,
                parent_lot_hash, row_hash
            ) VALUES (
                :trade_id, :lot_id, :run_id, :run_mode, :account_id, :asset_id, :hour_ts_utc,
                :entry_ts_utc, :exit_ts_utc, :entry_price, :exit_price, :quantity, :gross_pnl,
                :net_pnl, :total_fee, :total_slippage_cost, :holding_hours, :origin_hour_ts_utc,
                :parent_lot_hash, :row_hash
            )",
            &[
                ("trade_id", Value::from(trade.trade_id)),
                ("lot_id", Value::from(trade.lot_id)),
                ("run_id", Value::from(trade.run_id)),
                ("run_mode", Value::from(trade.run_mode.as_str())),
                ("account_id", Value::from(trade.account_id)),
                ("asset_id", Value::from(trade.asset_id)),
                ("hour_ts_utc", Value::from(trade.hour_ts_utc)),
                ("entry_ts_utc", Value::from(trade.entry_ts_utc)),
                ("exit_ts_utc", Value::from(trade.exit_ts_utc)),
                ("entry_price", Value::from(trade.entry_price)),
                ("exit_price", Value::from(trade.exit_price)),
                ("quantity", Value::from(trade.quantity)),
                ("gross_pnl", Value::from(trade.gross_pnl)),
                ("net_pnl", Value::from(trade.net_pnl)),
                ("total_fee", Value::from(trade.total_fee)),
                (
                    "total_slippage_cost",
                    Value::from(trade.total_slippage_cost),
                ),
                ("holding_hours", Value::from(trade.holding_hours)),
                ("origin_hour_ts_utc", Value::from(trade.origin_hour_ts_utc)),
                (
                    "parent_lot_hash",
                    Value::from(trade.parent_lot_hash.as_str()),
                ),
                ("row_hash", Value::from(trade.row_hash.as_str())),
            ],
        )
    }

    pub fn insert_cash_ledger(&self, row: &CashLedgerRow) -> CoreResult<()> {
        self.db.execute(
            "INSERT INTO cash_ledger (
                run_id, run_mode, account_id, event_ts_utc, hour_ts_utc, event_type, ref_type,
                ref_id, delta_cash, balance_before, balance_after, origin_hour_ts_utc,
                ledger_seq, prev_ledger_hash, economic_event_hash, ledger_hash, row_hash
            ) VALUES (
                :run_id, :run_mode, :account_id, :event_ts_utc, :hour_ts_utc, :event_type, :ref_type,
                :ref_id, :delta_cash, :balance_before, :balance_after, :origin_hour_ts_utc,
                :ledger_seq, :prev_ledger_hash, :economic_event_hash, :ledger_hash, :row_hash
            )",
            &[
                ("run_id", Value::from(row.run_id)),
                ("run_mode", Value::from(row.run_mode.as_str())),
                ("account_id", Value::from(row.account_id)),
                ("event_ts_utc", Value::from(row.event_ts_utc)),
                ("hour_ts_utc", Value::from(row.hour_ts_utc)),
                ("event_type", Value::from(row.event_type.as_str())),
                ("ref_type", Value::from(row.ref_type.as_str())),
                ("ref_id", Value::from(row.ref_id)),
                ("delta_cash", Value::from(row.delta_cash)),
                ("balance_before", Value::from(row.balance_before)),
                ("balance_after", Value::from(row.balance_after)),
                ("origin_hour_ts_utc", Value::from(row.origin_hour_ts_utc)),
                ("ledger_seq", Value::from(row.ledger_seq)),
                (
                    "prev_ledger_hash",
                    Value::from(row.prev_ledger_hash.as_deref()),
                ),
                (
                    "economic_event_hash",
                    Value::from(row.economic_event_hash.as_str()),
                ),
                ("ledger_hash", Value::from(row.ledger_hash.as_str())),
                ("row_hash", Value::from(row.row_hash.as_str())),
            ],
        )
    }

    pub fn insert_risk_event(&self, event: &RiskEventRow) -> CoreResult<()> {
        self.db.execute(
            "INSERT INTO risk_event (
                risk_event_id, run_id, run_mode, account_id, event_ts_utc, hour_ts_utc,
                event_type, severity, reason_code, details, related_state_hour_ts_utc,
                origin_hour_ts_utc, parent_state_hash, row_hash
            ) VALUES (
                :risk_event_id, :run_id, :run_mode, :account_id, :event_ts_utc, :hour_ts_utc,
                :event_type, :severity, :reason_code, :details, :related_state_hour_ts_utc,
                :origin_hour_ts_utc, :parent_state_hash, :row_hash
            )",
            &[
                ("risk_event_id", Value::from(event.risk_event_id)),
                ("run_id", Value::from(event.run_id)),
                ("run_mode", Value::from(event.run_mode.as_str())),
                ("account_id", Value::from(event.account_id)),
                ("event_ts_utc", Value::from(event.event_ts_utc)),
                ("hour_ts_utc", Value::from(event.hour_ts_utc)),
                ("event_type", Value::from(event.event_type.as_str())),
                ("severity", Value::from(event.severity.as_str())),
                ("reason_code", Value::from(event.reason_code.as_str())),
                ("details", Value::from(event.details.as_str())),
                (
                    "related_state_hour_ts_utc",
                    Value::from(event.related_state_hour_ts_utc),
                ),
                ("origin_hour_ts_utc", Value::from(event.origin_hour_ts_utc)),
                (
                    "parent_state_hash",
                    Value::from(event.parent_state_hash.as_str()),
                ),
                ("row_hash", Value::from(event.row_hash.as_str())),
            ],
        )
    }

    /// Insert the hour's manifest row (inside the executing transaction).
    pub fn insert_replay_manifest(
        &self,
        context: &ExecutionContext,
        replay_root_hash: &str,
        authoritative_row_count: i64,
    ) -> CoreResult<()> {
        let run_ctx = &context.run_context;
        self.db.execute(
            "INSERT INTO replay_manifest (
                run_id, account_id, run_mode, origin_hour_ts_utc, run_seed_hash,
                replay_root_hash, authoritative_row_count, generated_at_utc
            ) VALUES (
                :run_id, :account_id, :run_mode, :origin_hour_ts_utc, :run_seed_hash,
                :replay_root_hash, :authoritative_row_count, :generated_at_utc
            )",
            &[
                ("run_id", Value::from(run_ctx.run_id)),
                ("account_id", Value::from(run_ctx.account_id)),
                ("run_mode", Value::from(run_ctx.run_mode.as_str())),
                (
                    "origin_hour_ts_utc",
                    Value::from(run_ctx.origin_hour_ts_utc),
                ),
                ("run_seed_hash", Value::from(run_ctx.run_seed_hash.as_str())),
                ("replay_root_hash", Value::from(replay_root_hash)),
                (
                    "authoritative_row_count",
                    Value::from(authoritative_row_count),
                ),
                (
                    "generated_at_utc",
                    Value::from(run_ctx.origin_hour_ts_utc),
                ),
            ],
        )
    }

    /// Finalize the run context's authoritative replay root. This is the
    /// single mutation the run_context trigger permits.
    pub fn finalize_run_context_root(
        &self,
        context: &ExecutionContext,
        replay_root_hash: &str,
    ) -> CoreResult<()> {
        self.db.execute(
            "UPDATE run_context
             SET replay_root_hash = :replay_root_hash
             WHERE run_id = :run_id
               AND account_id = :account_id
               AND run_mode = :run_mode
               AND origin_hour_ts_utc = :origin_hour_ts_utc",
            &[
                ("replay_root_hash", Value::from(replay_root_hash)),
                ("run_id", Value::from(context.run_context.run_id)),
                ("account_id", Value::from(context.run_context.account_id)),
                (
                    "run_mode",
                    Value::from(context.run_context.run_mode.as_str()),
                ),
                (
                    "origin_hour_ts_utc",
                    Value::from(context.run_context.origin_hour_ts_utc),
                ),
            ],
        )
    }
}

#[cfg(test)]
mod tests;
