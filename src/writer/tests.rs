use chrono::Duration;
use rust_decimal_macros::dec;
use serde_json::json;

use crate::canonical::quantize_size_fraction;
use crate::decision::deterministic_decision;
use crate::domain::{
    LiquidityFlag, OrderSide, OrderStatus, RiskEventType, Severity, SignalAction,
};
use crate::store::SqliteStore;
use crate::testkit::{
    sample_execution_context, sample_prediction, sample_regime, PREDICTION_HASH_ENTER,
};
use crate::writer::AppendOnlyRuntimeWriter;

use rust_decimal::Decimal;

fn writer_fixture() -> SqliteStore {
    SqliteStore::open_in_memory().unwrap()
}

#[test]
fn slippage_rate_derives_from_hash_prefix() {
    let store = writer_fixture();
    let writer = AppendOnlyRuntimeWriter::new(&store);
    // 0xaaaaaaaa % 1000 = 530 basis points of 1e-6.
    let rate = writer.derive_slippage_rate(&"a".repeat(64)).unwrap();
    assert_eq!(rate.to_string(), "0.000530");

    let zero = writer.derive_slippage_rate(&"0".repeat(64)).unwrap();
    assert_eq!(zero.to_string(), "0.000000");

    assert!(writer.derive_slippage_rate("zz").is_err());
}

#[test]
fn trade_signal_row_is_content_addressed() {
    let store = writer_fixture();
    let writer = AppendOnlyRuntimeWriter::new(&store);
    let context = sample_execution_context();
    let prediction = sample_prediction(PREDICTION_HASH_ENTER, dec!(0.55), dec!(0.02));
    let regime = sample_regime();
    let decision = deterministic_decision(
        &prediction.row_hash,
        &regime.row_hash,
        &context.capital_state.row_hash,
        &context.risk_state.row_hash,
        &"0".repeat(64),
    );

    let first = writer
        .build_trade_signal_row(&context, &prediction, &regime, &decision, None)
        .unwrap();
    let second = writer
        .build_trade_signal_row(&context, &prediction, &regime, &decision, None)
        .unwrap();
    assert_eq!(first.signal_id, second.signal_id);
    assert_eq!(first.row_hash, second.row_hash);
    assert_eq!(first.signal_id.get_version_num(), 5);

    // Overriding the action changes identity and zeroes sizing.
    let held = writer
        .build_trade_signal_row(&context, &prediction, &regime, &decision, Some(SignalAction::Hold))
        .unwrap();
    assert_ne!(held.signal_id, first.signal_id);
    assert_eq!(held.action, SignalAction::Hold);
    assert_eq!(held.position_size_fraction, quantize_size_fraction(Decimal::ZERO));
    assert!(held.target_position_notional.is_zero());
}

#[test]
fn net_edge_subtracts_fee_and_slippage() {
    let store = writer_fixture();
    let writer = AppendOnlyRuntimeWriter::new(&store);
    let context = sample_execution_context();
    let prediction = sample_prediction(PREDICTION_HASH_ENTER, dec!(0.55), dec!(0.02));
    let regime = sample_regime();
    let decision = deterministic_decision(
        &prediction.row_hash,
        &regime.row_hash,
        &context.capital_state.row_hash,
        &context.risk_state.row_hash,
        &"0".repeat(64),
    );
    let signal = writer
        .build_trade_signal_row(&context, &prediction, &regime, &decision, None)
        .unwrap();
    // 0.02 - (0.0026 + 0.000530)
    assert_eq!(signal.net_edge, dec!(0.016870));
    assert_eq!(signal.assumed_fee_rate, dec!(0.002600));
    assert_eq!(signal.assumed_slippage_rate, dec!(0.000530));
}

#[test]
fn order_fill_lot_trade_chain_hashes_are_deterministic() {
    let store = writer_fixture();
    let writer = AppendOnlyRuntimeWriter::new(&store);
    let context = sample_execution_context();
    let prediction = sample_prediction(PREDICTION_HASH_ENTER, dec!(0.55), dec!(0.02));
    let regime = sample_regime();
    let decision = deterministic_decision(
        &prediction.row_hash,
        &regime.row_hash,
        &context.capital_state.row_hash,
        &context.risk_state.row_hash,
        &"0".repeat(64),
    );
    let signal = writer
        .build_trade_signal_row(&context, &prediction, &regime, &decision, None)
        .unwrap();

    let hour = context.run_context.origin_hour_ts_utc;
    let order = writer
        .build_order_request_attempt_row(
            &context,
            &signal,
            OrderSide::Buy,
            hour,
            dec!(1.5),
            dec!(150),
            OrderStatus::Filled,
            0,
        )
        .unwrap();
    assert!(order.client_order_id.starts_with("det-"));
    assert_eq!(order.client_order_id.len(), 4 + 24);
    assert_eq!(order.parent_signal_hash, signal.row_hash);

    // A later attempt gets a distinct content-addressed identity.
    let retry = writer
        .build_order_request_attempt_row(
            &context,
            &signal,
            OrderSide::Buy,
            hour + Duration::minutes(1),
            dec!(1.5),
            dec!(150),
            OrderStatus::Cancelled,
            1,
        )
        .unwrap();
    assert_ne!(retry.order_id, order.order_id);

    let fill = writer
        .build_order_fill_row(&context, &order, hour, dec!(100), dec!(1.5), LiquidityFlag::Taker, 0)
        .unwrap();
    assert_eq!(fill.fill_notional, dec!(150));
    // fee = 150 * 0.0026, slippage = 150 * 0.000530
    assert_eq!(fill.fee_paid, dec!(0.39));
    assert_eq!(fill.slippage_cost, dec!(0.0795));
    assert_eq!(fill.parent_order_hash, order.row_hash);

    let lot = writer.build_position_lot_row(&context, &fill).unwrap();
    assert_eq!(lot.open_fill_id, fill.fill_id);
    assert_eq!(lot.remaining_qty, lot.open_qty);
    assert_eq!(lot.parent_fill_hash, fill.row_hash);

    let exit_fill = writer
        .build_order_fill_row(
            &context,
            &retry,
            hour + Duration::minutes(1),
            dec!(110),
            dec!(1.5),
            LiquidityFlag::Taker,
            1,
        )
        .unwrap();
    let trade = writer
        .build_executed_trade_row(
            &context,
            lot.lot_id,
            lot.asset_id,
            lot.open_ts_utc,
            lot.open_price,
            lot.open_qty,
            lot.open_fee,
            fill.slippage_cost,
            &lot.row_hash,
            &exit_fill,
            dec!(1.0),
        )
        .unwrap();
    // gross = (110 - 100) * 1.0
    assert_eq!(trade.gross_pnl, dec!(10));
    assert_eq!(
        trade.net_pnl,
        trade.gross_pnl - trade.total_fee - trade.total_slippage_cost
    );
    assert_eq!(trade.holding_hours, 0);
    assert_eq!(trade.parent_lot_hash, lot.row_hash);
}

#[test]
fn cash_ledger_chain_links_and_signs() {
    let store = writer_fixture();
    let writer = AppendOnlyRuntimeWriter::new(&store);
    let context = sample_execution_context();
    let prediction = sample_prediction(PREDICTION_HASH_ENTER, dec!(0.55), dec!(0.02));
    let regime = sample_regime();
    let decision = deterministic_decision(
        &prediction.row_hash,
        &regime.row_hash,
        &context.capital_state.row_hash,
        &context.risk_state.row_hash,
        &"0".repeat(64),
    );
    let signal = writer
        .build_trade_signal_row(&context, &prediction, &regime, &decision, None)
        .unwrap();
    let hour = context.run_context.origin_hour_ts_utc;
    let order = writer
        .build_order_request_attempt_row(
            &context,
            &signal,
            OrderSide::Buy,
            hour,
            dec!(1),
            dec!(100),
            OrderStatus::Filled,
            0,
        )
        .unwrap();
    let fill = writer
        .build_order_fill_row(&context, &order, hour, dec!(100), dec!(1), LiquidityFlag::Taker, 0)
        .unwrap();

    let buy = writer
        .build_cash_ledger_row(&context, &fill, OrderSide::Buy, 1, dec!(10000), None)
        .unwrap();
    assert_eq!(buy.event_type, "ORDER_FILL_BUY");
    assert!(buy.delta_cash < Decimal::ZERO);
    assert_eq!(buy.balance_after, buy.balance_before + buy.delta_cash);
    assert!(buy.prev_ledger_hash.is_none());

    let sell = writer
        .build_cash_ledger_row(
            &context,
            &fill,
            OrderSide::Sell,
            2,
            buy.balance_after,
            Some(&buy.ledger_hash),
        )
        .unwrap();
    assert_eq!(sell.event_type, "ORDER_FILL_SELL");
    assert!(sell.delta_cash > Decimal::ZERO);
    assert_eq!(sell.balance_before, buy.balance_after);
    assert_eq!(sell.prev_ledger_hash.as_deref(), Some(buy.ledger_hash.as_str()));

    // Chain-shape violations are rejected at construction.
    assert!(writer
        .build_cash_ledger_row(&context, &fill, OrderSide::Buy, 2, dec!(10000), None)
        .is_err());
    assert!(writer
        .build_cash_ledger_row(
            &context,
            &fill,
            OrderSide::Buy,
            1,
            dec!(10000),
            Some(&buy.ledger_hash)
        )
        .is_err());
    // Overdraw is fatal.
    assert!(writer
        .build_cash_ledger_row(&context, &fill, OrderSide::Buy, 1, dec!(10), None)
        .is_err());
}

#[test]
fn risk_event_identity_from_reason_tuple() {
    let store = writer_fixture();
    let writer = AppendOnlyRuntimeWriter::new(&store);
    let context = sample_execution_context();

    let first = writer.build_risk_event_row(
        &context,
        RiskEventType::RiskGate,
        Severity::High,
        "HALT_NEW_ENTRIES_ACTIVE",
        "halt_new_entries is TRUE; new entries are blocked.",
        None,
    );
    let second = writer.build_risk_event_row(
        &context,
        RiskEventType::RiskGate,
        Severity::High,
        "HALT_NEW_ENTRIES_ACTIVE",
        "halt_new_entries is TRUE; new entries are blocked.",
        None,
    );
    assert_eq!(first.risk_event_id, second.risk_event_id);
    assert_eq!(first.row_hash, second.row_hash);

    let other = writer.build_risk_event_row(
        &context,
        RiskEventType::RiskGate,
        Severity::Critical,
        "KILL_SWITCH_ACTIVE",
        "kill_switch_active is TRUE; new entries are blocked.",
        None,
    );
    assert_ne!(other.risk_event_id, first.risk_event_id);

    // Extra payload lands in the canonical details JSON with sorted keys.
    let traced = writer.build_risk_event_row(
        &context,
        RiskEventType::DecisionTrace,
        Severity::Low,
        "VOLATILITY_FALLBACK_BASE",
        "Decision trace.",
        Some(json!({"final_action": "ENTER", "base_fraction": "0.0100000000"})),
    );
    assert!(traced.details.starts_with("{\"base_fraction\""));
    assert!(traced.details.contains("\"detail\":\"Decision trace.\""));
}

#[test]
fn ledger_continuity_validator_counts_violations() {
    let store = writer_fixture();
    let writer = AppendOnlyRuntimeWriter::new(&store);
    // Empty ledger passes.
    writer.assert_ledger_continuity(1, "LIVE").unwrap();
}
