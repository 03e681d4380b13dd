//! End-to-end execution tests over the in-memory substrate.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use hourbot_backend::domain::{OrderSide, OrderStatus, RunMode, Severity, SignalAction};
use hourbot_backend::engine::{execute_hour, replay_hour};
use hourbot_backend::error::CoreError;
use hourbot_backend::harness::replay_manifest_parity;
use hourbot_backend::store::{Database, SqliteStore, Value};
use hourbot_backend::testkit::{
    insert_preloaded_lot, insert_runtime_fixture, FixtureConfig, OrderBookFixture,
    PREDICTION_HASH_ENTER, PREDICTION_HASH_EXIT, PREDICTION_HASH_HOLD,
};
use hourbot_backend::writer::AppendOnlyRuntimeWriter;

fn gate_events(result: &hourbot_backend::writer::RuntimeWriteResult) -> Vec<&str> {
    result
        .risk_events
        .iter()
        .filter(|event| event.severity != Severity::Low)
        .map(|event| event.reason_code.as_str())
        .collect()
}

#[test]
fn happy_enter_emits_full_lifecycle_and_replays() {
    let store = SqliteStore::open_in_memory().unwrap();
    let config = FixtureConfig {
        seed: "happy_enter".to_string(),
        ..FixtureConfig::default()
    };
    let ids = insert_runtime_fixture(&store, &config).unwrap();

    let result = execute_hour(&store, ids.run_id, ids.account_id, RunMode::Live, ids.hour_ts_utc)
        .unwrap();

    assert_eq!(result.trade_signals.len(), 1);
    assert_eq!(result.trade_signals[0].action, SignalAction::Enter);
    assert_eq!(result.order_requests.len(), 1);
    assert_eq!(result.order_requests[0].status, OrderStatus::Filled);
    assert_eq!(result.order_requests[0].side, OrderSide::Buy);
    assert_eq!(result.order_fills.len(), 1);
    assert_eq!(result.position_lots.len(), 1);
    assert_eq!(result.cash_ledger_rows.len(), 1);
    // No gate or lifecycle events; the decision trace is the only entry.
    assert!(gate_events(&result).is_empty());
    assert_eq!(result.risk_events.len(), 1);
    assert_eq!(result.risk_events[0].severity, Severity::Low);

    // Fill priced off the best ask; the ledger debits cash.
    assert_eq!(result.order_fills[0].fill_price, dec!(100));
    let ledger = &result.cash_ledger_rows[0];
    assert_eq!(ledger.ledger_seq, 1);
    assert!(ledger.prev_ledger_hash.is_none());
    assert!(ledger.delta_cash < Decimal::ZERO);
    assert_eq!(ledger.balance_after, ledger.balance_before + ledger.delta_cash);

    let report = replay_hour(&store, ids.run_id, ids.account_id, ids.hour_ts_utc).unwrap();
    assert_eq!(report.mismatch_count, 0, "mismatches: {:?}", report.mismatches);

    let parity = replay_manifest_parity(&store, ids.run_id, ids.account_id, ids.hour_ts_utc)
        .unwrap();
    assert!(parity.replay_parity, "failures: {:?}", parity.failures);
}

#[test]
fn execution_is_deterministic_across_fresh_substrates() {
    let run = || {
        let store = SqliteStore::open_in_memory().unwrap();
        let config = FixtureConfig {
            seed: "determinism".to_string(),
            ..FixtureConfig::default()
        };
        let ids = insert_runtime_fixture(&store, &config).unwrap();
        let result =
            execute_hour(&store, ids.run_id, ids.account_id, RunMode::Live, ids.hour_ts_utc)
                .unwrap();
        let parity =
            replay_manifest_parity(&store, ids.run_id, ids.account_id, ids.hour_ts_utc).unwrap();
        (result, parity.recomputed_root_hash)
    };

    let (first, first_root) = run();
    let (second, second_root) = run();

    let hashes = |result: &hourbot_backend::writer::RuntimeWriteResult| {
        let mut all: Vec<String> = result
            .trade_signals
            .iter()
            .map(|row| row.row_hash.clone())
            .chain(result.order_requests.iter().map(|row| row.row_hash.clone()))
            .chain(result.order_fills.iter().map(|row| row.row_hash.clone()))
            .chain(result.position_lots.iter().map(|row| row.row_hash.clone()))
            .chain(result.cash_ledger_rows.iter().map(|row| row.row_hash.clone()))
            .chain(result.risk_events.iter().map(|row| row.row_hash.clone()))
            .collect();
        all.sort();
        all
    };
    assert_eq!(hashes(&first), hashes(&second));
    assert_eq!(first_root, second_root);
}

#[test]
fn duplicate_hour_submission_fails_with_uniqueness_violation() {
    let store = SqliteStore::open_in_memory().unwrap();
    let config = FixtureConfig {
        seed: "duplicate".to_string(),
        ..FixtureConfig::default()
    };
    let ids = insert_runtime_fixture(&store, &config).unwrap();

    execute_hour(&store, ids.run_id, ids.account_id, RunMode::Live, ids.hour_ts_utc).unwrap();
    let second =
        execute_hour(&store, ids.run_id, ids.account_id, RunMode::Live, ids.hour_ts_utc);
    assert!(matches!(second, Err(CoreError::Substrate(_))));
}

#[test]
fn hold_decision_emits_signal_without_orders() {
    let store = SqliteStore::open_in_memory().unwrap();
    let config = FixtureConfig {
        seed: "plain_hold".to_string(),
        prediction_row_hash: PREDICTION_HASH_HOLD.to_string(),
        ..FixtureConfig::default()
    };
    let ids = insert_runtime_fixture(&store, &config).unwrap();

    let result = execute_hour(&store, ids.run_id, ids.account_id, RunMode::Live, ids.hour_ts_utc)
        .unwrap();

    assert_eq!(result.trade_signals.len(), 1);
    assert_eq!(result.trade_signals[0].action, SignalAction::Hold);
    assert!(result.trade_signals[0].position_size_fraction.is_zero());
    assert!(result.order_requests.is_empty());
    assert!(gate_events(&result).is_empty());

    let report = replay_hour(&store, ids.run_id, ids.account_id, ids.hour_ts_utc).unwrap();
    assert_eq!(report.mismatch_count, 0);
}

#[test]
fn activation_revoked_forces_hold_with_risk_event() {
    let store = SqliteStore::open_in_memory().unwrap();
    let config = FixtureConfig {
        seed: "act_revoked".to_string(),
        activation_status: hourbot_backend::domain::ActivationStatus::Revoked,
        ..FixtureConfig::default()
    };
    let ids = insert_runtime_fixture(&store, &config).unwrap();

    let result = execute_hour(&store, ids.run_id, ids.account_id, RunMode::Live, ids.hour_ts_utc)
        .unwrap();

    assert_eq!(result.trade_signals[0].action, SignalAction::Hold);
    assert!(result.order_requests.is_empty());
    assert!(gate_events(&result).contains(&"ACTIVATION_NOT_APPROVED"));

    let report = replay_hour(&store, ids.run_id, ids.account_id, ids.hour_ts_utc).unwrap();
    assert_eq!(report.mismatch_count, 0);
}

#[test]
fn activation_window_not_reached_blocks_orders() {
    let store = SqliteStore::open_in_memory().unwrap();
    let config = FixtureConfig {
        seed: "act_window".to_string(),
        activation_window_end_utc: Some(
            chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2099, 1, 1, 0, 0, 0).unwrap(),
        ),
        ..FixtureConfig::default()
    };
    let ids = insert_runtime_fixture(&store, &config).unwrap();

    let result = execute_hour(&store, ids.run_id, ids.account_id, RunMode::Live, ids.hour_ts_utc)
        .unwrap();

    assert!(result.order_requests.is_empty());
    assert!(gate_events(&result).contains(&"ACTIVATION_WINDOW_NOT_REACHED"));
}

#[test]
fn cluster_cap_exceeded_blocks_orders() {
    let store = SqliteStore::open_in_memory().unwrap();
    let config = FixtureConfig {
        seed: "cluster_cap".to_string(),
        cluster_exposure_pct: dec!(0.079),
        ..FixtureConfig::default()
    };
    let ids = insert_runtime_fixture(&store, &config).unwrap();

    let result = execute_hour(&store, ids.run_id, ids.account_id, RunMode::Live, ids.hour_ts_utc)
        .unwrap();

    assert_eq!(result.trade_signals[0].action, SignalAction::Hold);
    assert!(result.order_requests.is_empty());
    assert!(gate_events(&result).contains(&"CLUSTER_CAP_EXCEEDED"));

    let parity = replay_manifest_parity(&store, ids.run_id, ids.account_id, ids.hour_ts_utc)
        .unwrap();
    assert!(parity.replay_parity);
}

#[test]
fn entry_halt_blocks_orders() {
    let store = SqliteStore::open_in_memory().unwrap();
    let config = FixtureConfig {
        seed: "entry_halt".to_string(),
        halt_new_entries: true,
        ..FixtureConfig::default()
    };
    let ids = insert_runtime_fixture(&store, &config).unwrap();

    let result = execute_hour(&store, ids.run_id, ids.account_id, RunMode::Live, ids.hour_ts_utc)
        .unwrap();

    assert!(result.order_requests.is_empty());
    assert!(gate_events(&result).contains(&"HALT_NEW_ENTRIES_ACTIVE"));
}

#[test]
fn kill_switch_takes_precedence_over_halt() {
    let store = SqliteStore::open_in_memory().unwrap();
    let config = FixtureConfig {
        seed: "kill_switch".to_string(),
        halt_new_entries: true,
        kill_switch_active: true,
        ..FixtureConfig::default()
    };
    let ids = insert_runtime_fixture(&store, &config).unwrap();

    let result = execute_hour(&store, ids.run_id, ids.account_id, RunMode::Live, ids.hour_ts_utc)
        .unwrap();

    let events = gate_events(&result);
    assert!(events.contains(&"KILL_SWITCH_ACTIVE"));
    assert!(!events.contains(&"HALT_NEW_ENTRIES_ACTIVE"));
}

#[test]
fn severe_loss_derisk_sells_half_inventory_fifo() {
    let store = SqliteStore::open_in_memory().unwrap();
    let config = FixtureConfig {
        seed: "derisk".to_string(),
        prediction_row_hash: PREDICTION_HASH_EXIT.to_string(),
        prob_up: dec!(0.50),
        drawdown_pct: dec!(0.17),
        severe_loss_drawdown_trigger: dec!(0.15),
        open_position_qty: dec!(1.0),
        open_position_count: 1,
        market_value: dec!(100),
        ..FixtureConfig::default()
    };
    let ids = insert_runtime_fixture(&store, &config).unwrap();
    let lot = insert_preloaded_lot(&store, &ids, RunMode::Live, dec!(1.0), dec!(90)).unwrap();

    let result = execute_hour(&store, ids.run_id, ids.account_id, RunMode::Live, ids.hour_ts_utc)
        .unwrap();

    assert_eq!(result.trade_signals[0].action, SignalAction::Hold);
    assert_eq!(result.order_requests.len(), 1);
    let order = &result.order_requests[0];
    assert_eq!(order.side, OrderSide::Sell);
    assert_eq!(order.requested_qty, dec!(0.5));
    assert_eq!(order.status, OrderStatus::Filled);

    assert_eq!(result.order_fills.len(), 1);
    assert_eq!(result.order_fills[0].fill_price, dec!(99));

    assert_eq!(result.executed_trades.len(), 1);
    let trade = &result.executed_trades[0];
    assert_eq!(trade.lot_id, lot.lot_id);
    assert_eq!(trade.quantity, dec!(0.5));
    assert_eq!(trade.entry_price, dec!(90));
    assert_eq!(
        trade.net_pnl,
        trade.gross_pnl - trade.total_fee - trade.total_slippage_cost
    );

    let reasons: Vec<&str> = result
        .risk_events
        .iter()
        .map(|event| event.reason_code.as_str())
        .collect();
    assert!(reasons.contains(&"SEVERE_RECOVERY_DERISK_ORDER_EMITTED"));

    // The sale credits cash.
    assert_eq!(result.cash_ledger_rows.len(), 1);
    assert!(result.cash_ledger_rows[0].delta_cash > Decimal::ZERO);

    let parity = replay_manifest_parity(&store, ids.run_id, ids.account_id, ids.hour_ts_utc)
        .unwrap();
    assert!(parity.replay_parity, "failures: {:?}", parity.failures);
}

#[test]
fn partial_then_filled_across_attempts() {
    let store = SqliteStore::open_in_memory().unwrap();
    let config = FixtureConfig {
        seed: "partial_fill".to_string(),
        order_book: Some(OrderBookFixture {
            best_ask_size: dec!(1.0),
            ..OrderBookFixture::default()
        }),
        // No OHLCV fallback so the book is the only liquidity source.
        ohlcv_close: None,
        ..FixtureConfig::default()
    };
    let ids = insert_runtime_fixture(&store, &config).unwrap();

    let result = execute_hour(&store, ids.run_id, ids.account_id, RunMode::Live, ids.hour_ts_utc)
        .unwrap();

    // Entry qty 1.968 against ask size 1.0: PARTIAL then FILLED.
    assert_eq!(result.order_requests.len(), 2);
    assert_eq!(result.order_requests[0].status, OrderStatus::Partial);
    assert_eq!(result.order_requests[1].status, OrderStatus::Filled);
    assert_eq!(result.order_fills.len(), 2);
    assert_eq!(result.position_lots.len(), 2);
    assert_eq!(result.cash_ledger_rows.len(), 2);

    // The ledger chain links within the hour.
    let ledger = &result.cash_ledger_rows;
    assert_eq!(ledger[0].ledger_seq, 1);
    assert_eq!(ledger[1].ledger_seq, 2);
    assert_eq!(ledger[1].balance_before, ledger[0].balance_after);
    assert_eq!(
        ledger[1].prev_ledger_hash.as_deref(),
        Some(ledger[0].ledger_hash.as_str())
    );

    let report = replay_hour(&store, ids.run_id, ids.account_id, ids.hour_ts_utc).unwrap();
    assert_eq!(report.mismatch_count, 0);
}

#[test]
fn exhausted_retries_cancel_and_emit_event() {
    let store = SqliteStore::open_in_memory().unwrap();
    let config = FixtureConfig {
        seed: "exhausted".to_string(),
        order_book: Some(OrderBookFixture {
            best_ask_size: dec!(0),
            ..OrderBookFixture::default()
        }),
        ohlcv_close: None,
        ..FixtureConfig::default()
    };
    let ids = insert_runtime_fixture(&store, &config).unwrap();

    let result = execute_hour(&store, ids.run_id, ids.account_id, RunMode::Live, ids.hour_ts_utc)
        .unwrap();

    assert_eq!(result.order_requests.len(), 4);
    assert!(result
        .order_requests
        .iter()
        .all(|order| order.status == OrderStatus::Cancelled));
    assert!(result.order_fills.is_empty());
    assert!(gate_events(&result).contains(&"ORDER_RETRY_EXHAUSTED"));
}

#[test]
fn ohlcv_fallback_fills_when_book_is_missing() {
    let store = SqliteStore::open_in_memory().unwrap();
    let config = FixtureConfig {
        seed: "ohlcv_fallback".to_string(),
        order_book: None,
        ..FixtureConfig::default()
    };
    let ids = insert_runtime_fixture(&store, &config).unwrap();

    let result = execute_hour(&store, ids.run_id, ids.account_id, RunMode::Live, ids.hour_ts_utc)
        .unwrap();

    assert_eq!(result.order_fills.len(), 1);
    assert_eq!(result.order_fills[0].fill_price, dec!(100));
    assert_eq!(
        result.order_fills[0].liquidity_flag,
        hourbot_backend::domain::LiquidityFlag::Unknown
    );
}

#[test]
fn missing_price_sources_skip_order_with_event() {
    let store = SqliteStore::open_in_memory().unwrap();
    let config = FixtureConfig {
        seed: "no_price".to_string(),
        order_book: None,
        ohlcv_close: None,
        ..FixtureConfig::default()
    };
    let ids = insert_runtime_fixture(&store, &config).unwrap();

    let result = execute_hour(&store, ids.run_id, ids.account_id, RunMode::Live, ids.hour_ts_utc)
        .unwrap();

    assert!(result.order_requests.is_empty());
    assert!(gate_events(&result).contains(&"ORDER_PRICE_UNAVAILABLE"));
}

#[test]
fn quantity_below_lot_size_skips_order() {
    let store = SqliteStore::open_in_memory().unwrap();
    let config = FixtureConfig {
        seed: "below_lot".to_string(),
        // Entry qty ~1.968 floors to zero against a huge lot size.
        lot_size: dec!(10),
        ..FixtureConfig::default()
    };
    let ids = insert_runtime_fixture(&store, &config).unwrap();

    let result = execute_hour(&store, ids.run_id, ids.account_id, RunMode::Live, ids.hour_ts_utc)
        .unwrap();

    assert!(result.order_requests.is_empty());
    assert!(gate_events(&result).contains(&"ORDER_QTY_BELOW_LOT_SIZE"));
}

#[test]
fn order_book_qty_exactly_equal_to_requested_fills_single_attempt() {
    let store = SqliteStore::open_in_memory().unwrap();
    // Entry qty is 10000 * 0.01968 / 100 = 1.968.
    let config = FixtureConfig {
        seed: "exact_book".to_string(),
        order_book: Some(OrderBookFixture {
            best_ask_size: dec!(1.968),
            ..OrderBookFixture::default()
        }),
        ohlcv_close: None,
        ..FixtureConfig::default()
    };
    let ids = insert_runtime_fixture(&store, &config).unwrap();

    let result = execute_hour(&store, ids.run_id, ids.account_id, RunMode::Live, ids.hour_ts_utc)
        .unwrap();

    assert_eq!(result.order_requests.len(), 1);
    assert_eq!(result.order_requests[0].status, OrderStatus::Filled);
}

#[test]
fn sell_with_no_lots_reports_insufficient_allocation() {
    let store = SqliteStore::open_in_memory().unwrap();
    let config = FixtureConfig {
        seed: "no_lots".to_string(),
        prediction_row_hash: PREDICTION_HASH_EXIT.to_string(),
        // Below both recovery thresholds is irrelevant here: the position
        // exists but no lot rows back it.
        prob_up: dec!(0.50),
        expected_return: dec!(-0.01),
        open_position_qty: dec!(1.0),
        open_position_count: 1,
        market_value: dec!(100),
        ..FixtureConfig::default()
    };
    let ids = insert_runtime_fixture(&store, &config).unwrap();

    let result = execute_hour(&store, ids.run_id, ids.account_id, RunMode::Live, ids.hour_ts_utc)
        .unwrap();

    // EXIT with open position and negative expectation sells the full
    // inventory, but there are no lots to allocate against.
    assert_eq!(result.trade_signals[0].action, SignalAction::Exit);
    assert!(result.executed_trades.is_empty());
    assert!(gate_events(&result).contains(&"SELL_ALLOCATION_INSUFFICIENT_LOTS"));
}

#[test]
fn append_only_triggers_protect_outputs() {
    let store = SqliteStore::open_in_memory().unwrap();
    let config = FixtureConfig {
        seed: "append_only".to_string(),
        ..FixtureConfig::default()
    };
    let ids = insert_runtime_fixture(&store, &config).unwrap();
    execute_hour(&store, ids.run_id, ids.account_id, RunMode::Live, ids.hour_ts_utc).unwrap();

    let update = store.execute(
        "UPDATE trade_signal SET direction = 'FLAT' WHERE run_id = :run_id",
        &[("run_id", Value::from(ids.run_id))],
    );
    assert!(matches!(update, Err(CoreError::Substrate(message)) if message.contains("append-only")));

    let delete = store.execute(
        "DELETE FROM risk_event WHERE run_id = :run_id",
        &[("run_id", Value::from(ids.run_id))],
    );
    assert!(matches!(delete, Err(CoreError::Substrate(message)) if message.contains("append-only")));
}

#[test]
fn ledger_continuity_validator_passes_after_execution() {
    let store = SqliteStore::open_in_memory().unwrap();
    let config = FixtureConfig {
        seed: "ledger_ok".to_string(),
        ..FixtureConfig::default()
    };
    let ids = insert_runtime_fixture(&store, &config).unwrap();
    execute_hour(&store, ids.run_id, ids.account_id, RunMode::Live, ids.hour_ts_utc).unwrap();

    let writer = AppendOnlyRuntimeWriter::new(&store);
    writer
        .assert_ledger_continuity(ids.account_id, RunMode::Live.as_str())
        .unwrap();
}

#[test]
fn backtest_mode_executes_with_training_lineage() {
    let store = SqliteStore::open_in_memory().unwrap();
    let config = FixtureConfig {
        seed: "backtest".to_string(),
        run_mode: RunMode::Backtest,
        prediction_row_hash: PREDICTION_HASH_ENTER.to_string(),
        ..FixtureConfig::default()
    };
    let ids = insert_runtime_fixture(&store, &config).unwrap();

    let result =
        execute_hour(&store, ids.run_id, ids.account_id, RunMode::Backtest, ids.hour_ts_utc)
            .unwrap();
    assert_eq!(result.trade_signals.len(), 1);
    assert_eq!(result.trade_signals[0].action, SignalAction::Enter);
    assert_eq!(result.order_requests.len(), 1);

    let report = replay_hour(&store, ids.run_id, ids.account_id, ids.hour_ts_utc).unwrap();
    assert_eq!(report.mismatch_count, 0);
}

#[test]
fn backtest_hour_outside_validation_window_aborts() {
    let store = SqliteStore::open_in_memory().unwrap();
    let config = FixtureConfig {
        seed: "leakage".to_string(),
        run_mode: RunMode::Backtest,
        // Validation window closes a day before the execution hour, so
        // the prediction would leak beyond its fold.
        backtest_valid_end_utc: Some(
            hourbot_backend::testkit::fixture_hour() - chrono::Duration::days(1),
        ),
        ..FixtureConfig::default()
    };
    let ids = insert_runtime_fixture(&store, &config).unwrap();

    let result =
        execute_hour(&store, ids.run_id, ids.account_id, RunMode::Backtest, ids.hour_ts_utc);
    assert!(matches!(result, Err(CoreError::LineageMismatch(_))));

    // The abort left no partial writes behind.
    let row = store
        .fetch_one(
            "SELECT COUNT(*) AS n FROM trade_signal WHERE run_id = :run_id",
            &[("run_id", Value::from(ids.run_id))],
        )
        .unwrap()
        .unwrap();
    assert_eq!(row.get_i64("n").unwrap(), 0);
}

#[test]
fn misaligned_hour_is_rejected() {
    let store = SqliteStore::open_in_memory().unwrap();
    let config = FixtureConfig {
        seed: "misaligned".to_string(),
        ..FixtureConfig::default()
    };
    let ids = insert_runtime_fixture(&store, &config).unwrap();

    let result = execute_hour(
        &store,
        ids.run_id,
        ids.account_id,
        RunMode::Live,
        ids.hour_ts_utc + chrono::Duration::minutes(30),
    );
    assert!(matches!(result, Err(CoreError::InvariantViolation(_))));
}
