//! Relational schema for the deterministic execution substrate.
//!
//! Timestamps are canonical RFC-3339 `Z` text (lexicographic order equals
//! chronological order), decimals are canonical 1e-18 fixed-point text,
//! enums are CHECK-constrained text. Arithmetic CHECKs cast through REAL
//! with a 1e-9 tolerance; exact decimal enforcement of the same formulas
//! lives in the writer, which constructs every row it inserts.
//!
//! Append-only discipline: every output table rejects UPDATE and DELETE
//! via triggers. `run_context` permits exactly one mutation shape — the
//! post-execution finalization of `replay_root_hash` — and nothing else.

use rusqlite::Connection;

use crate::error::CoreResult;

/// Hour-aligned canonical timestamp pattern.
const HOUR_ALIGNED: &str = "LIKE '____-__-__T__:00:00Z'";

/// Tables that reject every UPDATE and DELETE.
const APPEND_ONLY_TABLES: &[&str] = &[
    "market_ohlcv_hourly",
    "order_book_snapshot",
    "feature_snapshot",
    "model_training_window",
    "model_prediction",
    "regime_output",
    "risk_hourly_state",
    "portfolio_hourly_state",
    "cluster_exposure_hourly_state",
    "position_hourly_state",
    "trade_signal",
    "order_request",
    "order_fill",
    "position_lot",
    "executed_trade",
    "cash_ledger",
    "risk_event",
    "replay_manifest",
];

/// Apply the full schema (idempotent).
pub fn apply_schema(conn: &Connection) -> CoreResult<()> {
    conn.execute_batch(&schema_sql())?;
    Ok(())
}

fn schema_sql() -> String {
    let mut sql = String::from(TABLES_SQL);
    for table in APPEND_ONLY_TABLES {
        sql.push_str(&append_only_triggers(table));
    }
    sql.push_str(RUN_CONTEXT_TRIGGERS_SQL);
    sql
}

fn append_only_triggers(table: &str) -> String {
    format!(
        "CREATE TRIGGER IF NOT EXISTS trg_{table}_no_update
         BEFORE UPDATE ON {table}
         BEGIN
             SELECT RAISE(ABORT, 'append-only violation on table {table}: UPDATE is not allowed');
         END;
         CREATE TRIGGER IF NOT EXISTS trg_{table}_no_delete
         BEFORE DELETE ON {table}
         BEGIN
             SELECT RAISE(ABORT, 'append-only violation on table {table}: DELETE is not allowed');
         END;\n"
    )
}

/// run_context is append-only except for replay-root finalization inside
/// the executing transaction.
const RUN_CONTEXT_TRIGGERS_SQL: &str = "
CREATE TRIGGER IF NOT EXISTS trg_run_context_no_delete
BEFORE DELETE ON run_context
BEGIN
    SELECT RAISE(ABORT, 'append-only violation on table run_context: DELETE is not allowed');
END;
CREATE TRIGGER IF NOT EXISTS trg_run_context_limited_update
BEFORE UPDATE ON run_context
WHEN NEW.run_id IS NOT OLD.run_id
  OR NEW.account_id IS NOT OLD.account_id
  OR NEW.run_mode IS NOT OLD.run_mode
  OR NEW.hour_ts_utc IS NOT OLD.hour_ts_utc
  OR NEW.origin_hour_ts_utc IS NOT OLD.origin_hour_ts_utc
  OR NEW.run_seed_hash IS NOT OLD.run_seed_hash
  OR NEW.context_hash IS NOT OLD.context_hash
BEGIN
    SELECT RAISE(ABORT, 'append-only violation on table run_context: only replay_root_hash may be finalized');
END;
";

const TABLES_SQL: &str = "
CREATE TABLE IF NOT EXISTS account (
    account_id INTEGER PRIMARY KEY,
    account_code TEXT NOT NULL UNIQUE CHECK (length(trim(account_code)) > 0),
    base_currency TEXT NOT NULL,
    is_active INTEGER NOT NULL CHECK (is_active IN (0, 1))
);

CREATE TABLE IF NOT EXISTS asset (
    asset_id INTEGER PRIMARY KEY,
    venue TEXT NOT NULL,
    symbol TEXT NOT NULL,
    base_asset TEXT NOT NULL,
    quote_asset TEXT NOT NULL,
    tick_size TEXT NOT NULL CHECK (CAST(tick_size AS REAL) > 0),
    lot_size TEXT NOT NULL CHECK (CAST(lot_size AS REAL) > 0),
    is_active INTEGER NOT NULL CHECK (is_active IN (0, 1)),
    listed_at_utc TEXT NOT NULL,
    UNIQUE (venue, symbol)
);

CREATE TABLE IF NOT EXISTS correlation_cluster (
    cluster_id INTEGER PRIMARY KEY,
    cluster_code TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS asset_cluster_membership (
    membership_id INTEGER PRIMARY KEY,
    asset_id INTEGER NOT NULL REFERENCES asset (asset_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    cluster_id INTEGER NOT NULL REFERENCES correlation_cluster (cluster_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    membership_hash TEXT NOT NULL CHECK (length(membership_hash) = 64),
    effective_from_utc TEXT NOT NULL,
    effective_to_utc TEXT,
    CHECK (effective_to_utc IS NULL OR effective_to_utc > effective_from_utc)
);

CREATE TABLE IF NOT EXISTS cost_profile (
    cost_profile_id INTEGER PRIMARY KEY,
    venue TEXT NOT NULL,
    fee_rate TEXT NOT NULL CHECK (CAST(fee_rate AS REAL) >= 0 AND CAST(fee_rate AS REAL) <= 1),
    slippage_param_hash TEXT NOT NULL CHECK (length(slippage_param_hash) = 64),
    is_active INTEGER NOT NULL CHECK (is_active IN (0, 1)),
    effective_from_utc TEXT NOT NULL,
    effective_to_utc TEXT
);

CREATE TABLE IF NOT EXISTS risk_profile (
    profile_version TEXT PRIMARY KEY CHECK (length(trim(profile_version)) > 0),
    total_exposure_mode TEXT NOT NULL
        CHECK (total_exposure_mode IN ('PERCENT_OF_PV', 'ABSOLUTE_AMOUNT')),
    max_total_exposure_pct TEXT,
    max_total_exposure_amount TEXT,
    cluster_exposure_mode TEXT NOT NULL
        CHECK (cluster_exposure_mode IN ('PERCENT_OF_PV', 'ABSOLUTE_AMOUNT')),
    max_cluster_exposure_pct TEXT,
    max_cluster_exposure_amount TEXT,
    max_concurrent_positions INTEGER NOT NULL CHECK (max_concurrent_positions >= 0),
    severe_loss_drawdown_trigger TEXT NOT NULL,
    volatility_feature_id INTEGER NOT NULL,
    volatility_target TEXT NOT NULL,
    volatility_scale_floor TEXT NOT NULL,
    volatility_scale_ceiling TEXT NOT NULL,
    hold_min_expected_return TEXT NOT NULL,
    exit_expected_return_threshold TEXT NOT NULL,
    recovery_hold_prob_up_threshold TEXT NOT NULL,
    recovery_exit_prob_up_threshold TEXT NOT NULL,
    derisk_fraction TEXT NOT NULL,
    signal_persistence_required INTEGER NOT NULL CHECK (signal_persistence_required >= 1),
    row_hash TEXT NOT NULL CHECK (length(row_hash) = 64),
    CHECK (CAST(volatility_scale_floor AS REAL) <= CAST(volatility_scale_ceiling AS REAL))
);

CREATE TABLE IF NOT EXISTS account_risk_profile_assignment (
    assignment_id INTEGER PRIMARY KEY,
    account_id INTEGER NOT NULL REFERENCES account (account_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    profile_version TEXT NOT NULL REFERENCES risk_profile (profile_version)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    effective_from_utc TEXT NOT NULL,
    effective_to_utc TEXT
);

CREATE TABLE IF NOT EXISTS market_ohlcv_hourly (
    asset_id INTEGER NOT NULL REFERENCES asset (asset_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    hour_ts_utc TEXT NOT NULL CHECK (hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    source_venue TEXT NOT NULL,
    close_price TEXT NOT NULL CHECK (CAST(close_price AS REAL) > 0),
    row_hash TEXT NOT NULL CHECK (length(row_hash) = 64),
    UNIQUE (asset_id, hour_ts_utc, source_venue)
);

CREATE TABLE IF NOT EXISTS order_book_snapshot (
    asset_id INTEGER NOT NULL REFERENCES asset (asset_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    snapshot_ts_utc TEXT NOT NULL,
    hour_ts_utc TEXT NOT NULL CHECK (hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    best_bid_price TEXT NOT NULL,
    best_ask_price TEXT NOT NULL,
    best_bid_size TEXT NOT NULL,
    best_ask_size TEXT NOT NULL,
    row_hash TEXT NOT NULL CHECK (length(row_hash) = 64),
    UNIQUE (asset_id, snapshot_ts_utc)
);

CREATE TABLE IF NOT EXISTS feature_snapshot (
    run_id TEXT NOT NULL,
    run_mode TEXT NOT NULL CHECK (run_mode IN ('BACKTEST', 'PAPER', 'LIVE')),
    hour_ts_utc TEXT NOT NULL CHECK (hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    asset_id INTEGER NOT NULL REFERENCES asset (asset_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    feature_id INTEGER NOT NULL,
    feature_value TEXT NOT NULL,
    row_hash TEXT NOT NULL CHECK (length(row_hash) = 64),
    UNIQUE (run_id, run_mode, hour_ts_utc, asset_id, feature_id)
);

CREATE TABLE IF NOT EXISTS model_training_window (
    training_window_id INTEGER PRIMARY KEY,
    backtest_run_id TEXT NOT NULL,
    model_version_id INTEGER NOT NULL,
    fold_index INTEGER NOT NULL CHECK (fold_index >= 0),
    horizon TEXT NOT NULL CHECK (horizon IN ('H1', 'H4', 'H24')),
    train_end_utc TEXT NOT NULL,
    valid_start_utc TEXT NOT NULL,
    valid_end_utc TEXT NOT NULL,
    training_window_hash TEXT NOT NULL CHECK (length(training_window_hash) = 64),
    row_hash TEXT NOT NULL CHECK (length(row_hash) = 64),
    CHECK (train_end_utc < valid_start_utc),
    CHECK (valid_start_utc < valid_end_utc)
);

CREATE TABLE IF NOT EXISTS model_activation_gate (
    activation_id INTEGER PRIMARY KEY,
    model_version_id INTEGER NOT NULL,
    run_mode TEXT NOT NULL CHECK (run_mode IN ('BACKTEST', 'PAPER', 'LIVE')),
    validation_window_end_utc TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('PENDING', 'APPROVED', 'REVOKED')),
    approval_hash TEXT NOT NULL CHECK (length(approval_hash) = 64)
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_model_activation_gate_approved
    ON model_activation_gate (model_version_id, run_mode)
    WHERE status = 'APPROVED';

CREATE TABLE IF NOT EXISTS run_context (
    run_id TEXT PRIMARY KEY,
    account_id INTEGER NOT NULL REFERENCES account (account_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    run_mode TEXT NOT NULL CHECK (run_mode IN ('BACKTEST', 'PAPER', 'LIVE')),
    hour_ts_utc TEXT NOT NULL CHECK (hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    origin_hour_ts_utc TEXT NOT NULL CHECK (origin_hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    run_seed_hash TEXT NOT NULL CHECK (length(run_seed_hash) = 64),
    context_hash TEXT NOT NULL CHECK (length(context_hash) = 64),
    replay_root_hash TEXT NOT NULL CHECK (length(replay_root_hash) = 64),
    UNIQUE (account_id, run_mode, hour_ts_utc),
    UNIQUE (run_id, account_id, run_mode, origin_hour_ts_utc)
);

CREATE TABLE IF NOT EXISTS model_prediction (
    run_id TEXT NOT NULL,
    account_id INTEGER NOT NULL,
    run_mode TEXT NOT NULL CHECK (run_mode IN ('BACKTEST', 'PAPER', 'LIVE')),
    asset_id INTEGER NOT NULL REFERENCES asset (asset_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    hour_ts_utc TEXT NOT NULL CHECK (hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    horizon TEXT NOT NULL CHECK (horizon IN ('H1', 'H4', 'H24')),
    model_version_id INTEGER NOT NULL,
    prob_up TEXT NOT NULL CHECK (CAST(prob_up AS REAL) >= 0 AND CAST(prob_up AS REAL) <= 1),
    expected_return TEXT NOT NULL,
    upstream_hash TEXT NOT NULL CHECK (length(upstream_hash) = 64),
    row_hash TEXT NOT NULL CHECK (length(row_hash) = 64),
    training_window_id INTEGER REFERENCES model_training_window (training_window_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    lineage_backtest_run_id TEXT,
    lineage_fold_index INTEGER,
    lineage_horizon TEXT CHECK (lineage_horizon IS NULL OR lineage_horizon IN ('H1', 'H4', 'H24')),
    activation_id INTEGER REFERENCES model_activation_gate (activation_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    UNIQUE (run_id, asset_id, horizon, model_version_id, hour_ts_utc),
    FOREIGN KEY (run_id, account_id, run_mode, hour_ts_utc)
        REFERENCES run_context (run_id, account_id, run_mode, origin_hour_ts_utc)
        ON UPDATE RESTRICT ON DELETE RESTRICT
);

CREATE TABLE IF NOT EXISTS regime_output (
    run_id TEXT NOT NULL,
    account_id INTEGER NOT NULL,
    run_mode TEXT NOT NULL CHECK (run_mode IN ('BACKTEST', 'PAPER', 'LIVE')),
    asset_id INTEGER NOT NULL REFERENCES asset (asset_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    hour_ts_utc TEXT NOT NULL CHECK (hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    model_version_id INTEGER NOT NULL,
    regime_label TEXT NOT NULL CHECK (length(trim(regime_label)) > 0),
    upstream_hash TEXT NOT NULL CHECK (length(upstream_hash) = 64),
    row_hash TEXT NOT NULL CHECK (length(row_hash) = 64),
    training_window_id INTEGER REFERENCES model_training_window (training_window_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    lineage_backtest_run_id TEXT,
    lineage_fold_index INTEGER,
    lineage_horizon TEXT CHECK (lineage_horizon IS NULL OR lineage_horizon IN ('H1', 'H4', 'H24')),
    activation_id INTEGER REFERENCES model_activation_gate (activation_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    UNIQUE (run_id, asset_id, model_version_id, hour_ts_utc),
    FOREIGN KEY (run_id, account_id, run_mode, hour_ts_utc)
        REFERENCES run_context (run_id, account_id, run_mode, origin_hour_ts_utc)
        ON UPDATE RESTRICT ON DELETE RESTRICT
);

CREATE TABLE IF NOT EXISTS risk_hourly_state (
    run_mode TEXT NOT NULL CHECK (run_mode IN ('BACKTEST', 'PAPER', 'LIVE')),
    account_id INTEGER NOT NULL REFERENCES account (account_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    hour_ts_utc TEXT NOT NULL CHECK (hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    source_run_id TEXT NOT NULL REFERENCES run_context (run_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    portfolio_value TEXT NOT NULL,
    peak_portfolio_value TEXT NOT NULL,
    drawdown_pct TEXT NOT NULL
        CHECK (CAST(drawdown_pct AS REAL) >= 0 AND CAST(drawdown_pct AS REAL) <= 1),
    drawdown_tier TEXT NOT NULL CHECK (drawdown_tier IN ('NORMAL', 'DD10', 'DD15', 'HALT20')),
    base_risk_fraction TEXT NOT NULL
        CHECK (CAST(base_risk_fraction AS REAL) >= 0 AND CAST(base_risk_fraction AS REAL) <= 0.02),
    max_concurrent_positions INTEGER NOT NULL
        CHECK (max_concurrent_positions >= 0 AND max_concurrent_positions <= 10),
    max_total_exposure_pct TEXT NOT NULL
        CHECK (CAST(max_total_exposure_pct AS REAL) > 0 AND CAST(max_total_exposure_pct AS REAL) <= 0.20),
    max_cluster_exposure_pct TEXT NOT NULL
        CHECK (CAST(max_cluster_exposure_pct AS REAL) > 0 AND CAST(max_cluster_exposure_pct AS REAL) <= 0.08),
    halt_new_entries INTEGER NOT NULL CHECK (halt_new_entries IN (0, 1)),
    kill_switch_active INTEGER NOT NULL CHECK (kill_switch_active IN (0, 1)),
    kill_switch_reason TEXT,
    requires_manual_review INTEGER NOT NULL CHECK (requires_manual_review IN (0, 1)),
    state_hash TEXT NOT NULL CHECK (length(state_hash) = 64),
    row_hash TEXT NOT NULL CHECK (length(row_hash) = 64),
    UNIQUE (run_mode, account_id, hour_ts_utc),
    CHECK (CAST(peak_portfolio_value AS REAL) >= CAST(portfolio_value AS REAL) - 1e-9),
    CHECK (kill_switch_active = 0 OR length(trim(coalesce(kill_switch_reason, ''))) > 0),
    CHECK (
        (CAST(drawdown_pct AS REAL) < 0.10 AND drawdown_tier = 'NORMAL')
        OR (CAST(drawdown_pct AS REAL) >= 0.10 AND CAST(drawdown_pct AS REAL) < 0.15 AND drawdown_tier = 'DD10')
        OR (CAST(drawdown_pct AS REAL) >= 0.15 AND CAST(drawdown_pct AS REAL) < 0.20 AND drawdown_tier = 'DD15')
        OR (CAST(drawdown_pct AS REAL) >= 0.20 AND drawdown_tier = 'HALT20')
    ),
    CHECK (
        CAST(drawdown_pct AS REAL) < 0.20
        OR (halt_new_entries = 1
            AND requires_manual_review = 1
            AND CAST(base_risk_fraction AS REAL) = 0.0
            AND drawdown_tier = 'HALT20')
    )
);

CREATE TABLE IF NOT EXISTS portfolio_hourly_state (
    run_mode TEXT NOT NULL CHECK (run_mode IN ('BACKTEST', 'PAPER', 'LIVE')),
    account_id INTEGER NOT NULL REFERENCES account (account_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    hour_ts_utc TEXT NOT NULL CHECK (hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    source_run_id TEXT NOT NULL REFERENCES run_context (run_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    cash_balance TEXT NOT NULL CHECK (CAST(cash_balance AS REAL) >= 0),
    market_value TEXT NOT NULL CHECK (CAST(market_value AS REAL) >= 0),
    portfolio_value TEXT NOT NULL,
    total_exposure_pct TEXT NOT NULL CHECK (CAST(total_exposure_pct AS REAL) >= 0),
    open_position_count INTEGER NOT NULL
        CHECK (open_position_count >= 0 AND open_position_count <= 10),
    halted INTEGER NOT NULL CHECK (halted IN (0, 1)),
    row_hash TEXT NOT NULL CHECK (length(row_hash) = 64),
    UNIQUE (run_mode, account_id, hour_ts_utc),
    CHECK (ABS(CAST(portfolio_value AS REAL) - (CAST(cash_balance AS REAL) + CAST(market_value AS REAL))) < 1e-9)
);

CREATE TABLE IF NOT EXISTS cluster_exposure_hourly_state (
    run_mode TEXT NOT NULL CHECK (run_mode IN ('BACKTEST', 'PAPER', 'LIVE')),
    account_id INTEGER NOT NULL REFERENCES account (account_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    cluster_id INTEGER NOT NULL REFERENCES correlation_cluster (cluster_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    hour_ts_utc TEXT NOT NULL CHECK (hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    source_run_id TEXT NOT NULL REFERENCES run_context (run_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    exposure_pct TEXT NOT NULL CHECK (CAST(exposure_pct AS REAL) >= 0),
    max_cluster_exposure_pct TEXT NOT NULL
        CHECK (CAST(max_cluster_exposure_pct AS REAL) > 0 AND CAST(max_cluster_exposure_pct AS REAL) <= 0.08),
    state_hash TEXT NOT NULL CHECK (length(state_hash) = 64),
    parent_risk_hash TEXT NOT NULL CHECK (length(parent_risk_hash) = 64),
    row_hash TEXT NOT NULL CHECK (length(row_hash) = 64),
    UNIQUE (run_mode, account_id, cluster_id, hour_ts_utc)
);

CREATE TABLE IF NOT EXISTS position_hourly_state (
    run_mode TEXT NOT NULL CHECK (run_mode IN ('BACKTEST', 'PAPER', 'LIVE')),
    account_id INTEGER NOT NULL REFERENCES account (account_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    asset_id INTEGER NOT NULL REFERENCES asset (asset_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    hour_ts_utc TEXT NOT NULL CHECK (hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    source_run_id TEXT NOT NULL REFERENCES run_context (run_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    quantity TEXT NOT NULL CHECK (CAST(quantity AS REAL) >= 0),
    exposure_pct TEXT NOT NULL CHECK (CAST(exposure_pct AS REAL) >= 0),
    unrealized_pnl TEXT NOT NULL,
    row_hash TEXT NOT NULL CHECK (length(row_hash) = 64),
    UNIQUE (run_mode, account_id, asset_id, hour_ts_utc)
);

CREATE TABLE IF NOT EXISTS trade_signal (
    signal_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    run_mode TEXT NOT NULL CHECK (run_mode IN ('BACKTEST', 'PAPER', 'LIVE')),
    account_id INTEGER NOT NULL,
    asset_id INTEGER NOT NULL REFERENCES asset (asset_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    hour_ts_utc TEXT NOT NULL CHECK (hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    horizon TEXT NOT NULL CHECK (horizon IN ('H1', 'H4', 'H24')),
    action TEXT NOT NULL CHECK (action IN ('ENTER', 'HOLD', 'EXIT')),
    direction TEXT NOT NULL CHECK (direction IN ('LONG', 'FLAT')),
    confidence TEXT NOT NULL
        CHECK (CAST(confidence AS REAL) >= 0 AND CAST(confidence AS REAL) <= 1),
    expected_return TEXT NOT NULL,
    assumed_fee_rate TEXT NOT NULL CHECK (CAST(assumed_fee_rate AS REAL) >= 0),
    assumed_slippage_rate TEXT NOT NULL CHECK (CAST(assumed_slippage_rate AS REAL) >= 0),
    net_edge TEXT NOT NULL,
    target_position_notional TEXT NOT NULL CHECK (CAST(target_position_notional AS REAL) >= 0),
    position_size_fraction TEXT NOT NULL
        CHECK (CAST(position_size_fraction AS REAL) >= 0 AND CAST(position_size_fraction AS REAL) <= 1),
    risk_state_hour_ts_utc TEXT NOT NULL,
    decision_hash TEXT NOT NULL CHECK (length(decision_hash) = 64),
    risk_state_run_id TEXT NOT NULL,
    cluster_membership_id INTEGER NOT NULL REFERENCES asset_cluster_membership (membership_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    upstream_hash TEXT NOT NULL CHECK (length(upstream_hash) = 64),
    row_hash TEXT NOT NULL CHECK (length(row_hash) = 64),
    UNIQUE (signal_id, run_id, run_mode, account_id, asset_id),
    UNIQUE (signal_id, cluster_membership_id),
    UNIQUE (signal_id, risk_state_run_id),
    FOREIGN KEY (run_id, account_id, run_mode, hour_ts_utc)
        REFERENCES run_context (run_id, account_id, run_mode, origin_hour_ts_utc)
        ON UPDATE RESTRICT ON DELETE RESTRICT
);

CREATE TABLE IF NOT EXISTS order_request (
    order_id TEXT PRIMARY KEY,
    signal_id TEXT NOT NULL REFERENCES trade_signal (signal_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    run_id TEXT NOT NULL,
    run_mode TEXT NOT NULL CHECK (run_mode IN ('BACKTEST', 'PAPER', 'LIVE')),
    account_id INTEGER NOT NULL,
    asset_id INTEGER NOT NULL,
    client_order_id TEXT NOT NULL UNIQUE CHECK (length(trim(client_order_id)) > 0),
    request_ts_utc TEXT NOT NULL,
    hour_ts_utc TEXT NOT NULL CHECK (hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    side TEXT NOT NULL CHECK (side IN ('BUY', 'SELL')),
    order_type TEXT NOT NULL CHECK (order_type IN ('LIMIT', 'MARKET')),
    tif TEXT NOT NULL CHECK (tif IN ('GTC', 'IOC', 'FOK')),
    limit_price TEXT,
    requested_qty TEXT NOT NULL CHECK (CAST(requested_qty AS REAL) > 0),
    requested_notional TEXT NOT NULL CHECK (CAST(requested_notional AS REAL) > 0),
    pre_order_cash_available TEXT NOT NULL CHECK (CAST(pre_order_cash_available AS REAL) >= 0),
    risk_check_passed INTEGER NOT NULL CHECK (risk_check_passed IN (0, 1)),
    status TEXT NOT NULL
        CHECK (status IN ('NEW', 'ACK', 'PARTIAL', 'FILLED', 'CANCELLED', 'REJECTED')),
    cost_profile_id INTEGER NOT NULL REFERENCES cost_profile (cost_profile_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    origin_hour_ts_utc TEXT NOT NULL CHECK (origin_hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    risk_state_run_id TEXT NOT NULL,
    cluster_membership_id INTEGER NOT NULL,
    attempt_seq INTEGER NOT NULL CHECK (attempt_seq >= 0),
    parent_signal_hash TEXT NOT NULL CHECK (length(parent_signal_hash) = 64),
    row_hash TEXT NOT NULL CHECK (length(row_hash) = 64),
    UNIQUE (order_id, run_id, run_mode, account_id, asset_id),
    FOREIGN KEY (signal_id, cluster_membership_id)
        REFERENCES trade_signal (signal_id, cluster_membership_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    FOREIGN KEY (signal_id, risk_state_run_id)
        REFERENCES trade_signal (signal_id, risk_state_run_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    FOREIGN KEY (run_id, account_id, run_mode, origin_hour_ts_utc)
        REFERENCES run_context (run_id, account_id, run_mode, origin_hour_ts_utc)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    CHECK ((order_type = 'LIMIT' AND limit_price IS NOT NULL AND CAST(limit_price AS REAL) > 0)
        OR (order_type = 'MARKET' AND limit_price IS NULL)),
    CHECK (side <> 'BUY'
        OR CAST(requested_notional AS REAL) <= CAST(pre_order_cash_available AS REAL) + 1e-9),
    CHECK (request_ts_utc >= origin_hour_ts_utc)
);

CREATE TABLE IF NOT EXISTS order_fill (
    fill_id TEXT PRIMARY KEY,
    order_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    run_mode TEXT NOT NULL CHECK (run_mode IN ('BACKTEST', 'PAPER', 'LIVE')),
    account_id INTEGER NOT NULL,
    asset_id INTEGER NOT NULL,
    exchange_trade_id TEXT NOT NULL CHECK (length(trim(exchange_trade_id)) > 0),
    fill_ts_utc TEXT NOT NULL,
    hour_ts_utc TEXT NOT NULL CHECK (hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    fill_price TEXT NOT NULL CHECK (CAST(fill_price AS REAL) > 0),
    fill_qty TEXT NOT NULL CHECK (CAST(fill_qty AS REAL) > 0),
    fill_notional TEXT NOT NULL CHECK (CAST(fill_notional AS REAL) > 0),
    fee_paid TEXT NOT NULL CHECK (CAST(fee_paid AS REAL) >= 0),
    fee_rate TEXT NOT NULL CHECK (CAST(fee_rate AS REAL) >= 0 AND CAST(fee_rate AS REAL) <= 1),
    realized_slippage_rate TEXT NOT NULL CHECK (CAST(realized_slippage_rate AS REAL) >= 0),
    slippage_cost TEXT NOT NULL CHECK (CAST(slippage_cost AS REAL) >= 0),
    liquidity_flag TEXT NOT NULL CHECK (liquidity_flag IN ('MAKER', 'TAKER', 'UNKNOWN')),
    origin_hour_ts_utc TEXT NOT NULL CHECK (origin_hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    parent_order_hash TEXT NOT NULL CHECK (length(parent_order_hash) = 64),
    row_hash TEXT NOT NULL CHECK (length(row_hash) = 64),
    UNIQUE (order_id, exchange_trade_id),
    UNIQUE (fill_id, run_id, run_mode, account_id, asset_id),
    FOREIGN KEY (order_id, run_id, run_mode, account_id, asset_id)
        REFERENCES order_request (order_id, run_id, run_mode, account_id, asset_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    FOREIGN KEY (run_id, account_id, run_mode, origin_hour_ts_utc)
        REFERENCES run_context (run_id, account_id, run_mode, origin_hour_ts_utc)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    CHECK (ABS(CAST(fill_notional AS REAL) - CAST(fill_price AS REAL) * CAST(fill_qty AS REAL)) < 1e-6),
    CHECK (fill_ts_utc >= origin_hour_ts_utc)
);

CREATE TABLE IF NOT EXISTS position_lot (
    lot_id TEXT PRIMARY KEY,
    open_fill_id TEXT NOT NULL UNIQUE,
    run_id TEXT NOT NULL,
    run_mode TEXT NOT NULL CHECK (run_mode IN ('BACKTEST', 'PAPER', 'LIVE')),
    account_id INTEGER NOT NULL,
    asset_id INTEGER NOT NULL,
    hour_ts_utc TEXT NOT NULL CHECK (hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    open_ts_utc TEXT NOT NULL,
    open_price TEXT NOT NULL CHECK (CAST(open_price AS REAL) > 0),
    open_qty TEXT NOT NULL CHECK (CAST(open_qty AS REAL) > 0),
    open_notional TEXT NOT NULL CHECK (CAST(open_notional AS REAL) > 0),
    open_fee TEXT NOT NULL CHECK (CAST(open_fee AS REAL) >= 0),
    remaining_qty TEXT NOT NULL
        CHECK (CAST(remaining_qty AS REAL) >= 0
           AND CAST(remaining_qty AS REAL) <= CAST(open_qty AS REAL) + 1e-9),
    origin_hour_ts_utc TEXT NOT NULL CHECK (origin_hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    parent_fill_hash TEXT NOT NULL CHECK (length(parent_fill_hash) = 64),
    row_hash TEXT NOT NULL CHECK (length(row_hash) = 64),
    UNIQUE (lot_id, run_id, run_mode, account_id, asset_id),
    FOREIGN KEY (open_fill_id, run_id, run_mode, account_id, asset_id)
        REFERENCES order_fill (fill_id, run_id, run_mode, account_id, asset_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    FOREIGN KEY (run_id, account_id, run_mode, origin_hour_ts_utc)
        REFERENCES run_context (run_id, account_id, run_mode, origin_hour_ts_utc)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    CHECK (open_ts_utc >= origin_hour_ts_utc)
);

CREATE TABLE IF NOT EXISTS executed_trade (
    trade_id TEXT PRIMARY KEY,
    lot_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    run_mode TEXT NOT NULL CHECK (run_mode IN ('BACKTEST', 'PAPER', 'LIVE')),
    account_id INTEGER NOT NULL,
    asset_id INTEGER NOT NULL,
    hour_ts_utc TEXT NOT NULL CHECK (hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    entry_ts_utc TEXT NOT NULL,
    exit_ts_utc TEXT NOT NULL,
    entry_price TEXT NOT NULL CHECK (CAST(entry_price AS REAL) > 0),
    exit_price TEXT NOT NULL CHECK (CAST(exit_price AS REAL) > 0),
    quantity TEXT NOT NULL CHECK (CAST(quantity AS REAL) > 0),
    gross_pnl TEXT NOT NULL,
    net_pnl TEXT NOT NULL,
    total_fee TEXT NOT NULL CHECK (CAST(total_fee AS REAL) >= 0),
    total_slippage_cost TEXT NOT NULL CHECK (CAST(total_slippage_cost AS REAL) >= 0),
    holding_hours INTEGER NOT NULL CHECK (holding_hours >= 0),
    origin_hour_ts_utc TEXT NOT NULL CHECK (origin_hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    parent_lot_hash TEXT NOT NULL CHECK (length(parent_lot_hash) = 64),
    row_hash TEXT NOT NULL CHECK (length(row_hash) = 64),
    UNIQUE (lot_id, exit_ts_utc, quantity),
    FOREIGN KEY (lot_id, run_id, run_mode, account_id, asset_id)
        REFERENCES position_lot (lot_id, run_id, run_mode, account_id, asset_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    FOREIGN KEY (run_id, account_id, run_mode, origin_hour_ts_utc)
        REFERENCES run_context (run_id, account_id, run_mode, origin_hour_ts_utc)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    CHECK (exit_ts_utc >= entry_ts_utc),
    CHECK (ABS(CAST(net_pnl AS REAL)
        - (CAST(gross_pnl AS REAL) - CAST(total_fee AS REAL) - CAST(total_slippage_cost AS REAL))) < 1e-6),
    CHECK (exit_ts_utc >= origin_hour_ts_utc)
);

CREATE TABLE IF NOT EXISTS cash_ledger (
    ledger_id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    run_mode TEXT NOT NULL CHECK (run_mode IN ('BACKTEST', 'PAPER', 'LIVE')),
    account_id INTEGER NOT NULL REFERENCES account (account_id)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    event_ts_utc TEXT NOT NULL,
    hour_ts_utc TEXT NOT NULL CHECK (hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    event_type TEXT NOT NULL CHECK (length(trim(event_type)) > 0),
    ref_type TEXT NOT NULL CHECK (length(trim(ref_type)) > 0),
    ref_id TEXT NOT NULL,
    delta_cash TEXT NOT NULL,
    balance_before TEXT NOT NULL,
    balance_after TEXT NOT NULL CHECK (CAST(balance_after AS REAL) >= -1e-9),
    origin_hour_ts_utc TEXT NOT NULL CHECK (origin_hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    ledger_seq INTEGER NOT NULL CHECK (ledger_seq >= 1),
    prev_ledger_hash TEXT,
    economic_event_hash TEXT NOT NULL CHECK (length(economic_event_hash) = 64),
    ledger_hash TEXT NOT NULL CHECK (length(ledger_hash) = 64),
    row_hash TEXT NOT NULL CHECK (length(row_hash) = 64),
    UNIQUE (account_id, run_mode, ledger_seq),
    UNIQUE (account_id, run_mode, event_ts_utc, ref_type, ref_id, event_type),
    FOREIGN KEY (run_id, account_id, run_mode, origin_hour_ts_utc)
        REFERENCES run_context (run_id, account_id, run_mode, origin_hour_ts_utc)
        ON UPDATE RESTRICT ON DELETE RESTRICT,
    CHECK (ABS(CAST(balance_after AS REAL)
        - (CAST(balance_before AS REAL) + CAST(delta_cash AS REAL))) < 1e-6),
    CHECK ((ledger_seq = 1 AND prev_ledger_hash IS NULL)
        OR (ledger_seq > 1 AND prev_ledger_hash IS NOT NULL)),
    CHECK (event_ts_utc >= origin_hour_ts_utc)
);

CREATE TABLE IF NOT EXISTS risk_event (
    risk_event_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    run_mode TEXT NOT NULL CHECK (run_mode IN ('BACKTEST', 'PAPER', 'LIVE')),
    account_id INTEGER NOT NULL,
    event_ts_utc TEXT NOT NULL,
    hour_ts_utc TEXT NOT NULL CHECK (hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    event_type TEXT NOT NULL CHECK (event_type IN
        ('RISK_GATE', 'CAPITAL_RULE', 'CLUSTER_CAP', 'ACTIVATION_GATE', 'ORDER_LIFECYCLE', 'DECISION_TRACE')),
    severity TEXT NOT NULL CHECK (severity IN ('LOW', 'MEDIUM', 'HIGH', 'CRITICAL')),
    reason_code TEXT NOT NULL CHECK (length(trim(reason_code)) > 0),
    details TEXT NOT NULL,
    related_state_hour_ts_utc TEXT NOT NULL,
    origin_hour_ts_utc TEXT NOT NULL CHECK (origin_hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    parent_state_hash TEXT NOT NULL CHECK (length(parent_state_hash) = 64),
    row_hash TEXT NOT NULL CHECK (length(row_hash) = 64),
    FOREIGN KEY (run_id, account_id, run_mode, origin_hour_ts_utc)
        REFERENCES run_context (run_id, account_id, run_mode, origin_hour_ts_utc)
        ON UPDATE RESTRICT ON DELETE RESTRICT
);

CREATE TABLE IF NOT EXISTS replay_manifest (
    run_id TEXT NOT NULL,
    account_id INTEGER NOT NULL,
    run_mode TEXT NOT NULL CHECK (run_mode IN ('BACKTEST', 'PAPER', 'LIVE')),
    origin_hour_ts_utc TEXT NOT NULL CHECK (origin_hour_ts_utc LIKE '____-__-__T__:00:00Z'),
    run_seed_hash TEXT NOT NULL CHECK (length(run_seed_hash) = 64),
    replay_root_hash TEXT NOT NULL CHECK (length(replay_root_hash) = 64),
    authoritative_row_count INTEGER NOT NULL CHECK (authoritative_row_count >= 0),
    generated_at_utc TEXT NOT NULL,
    UNIQUE (run_id, account_id, run_mode, origin_hour_ts_utc),
    FOREIGN KEY (run_id, account_id, run_mode, origin_hour_ts_utc)
        REFERENCES run_context (run_id, account_id, run_mode, origin_hour_ts_utc)
        ON UPDATE RESTRICT ON DELETE RESTRICT
);
";

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        apply_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn schema_applies_and_is_idempotent() {
        let conn = open();
        apply_schema(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'cash_ledger'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn append_only_trigger_blocks_update_and_delete() {
        let conn = open();
        conn.execute_batch(
            "INSERT INTO account (account_code, base_currency, is_active) VALUES ('A', 'USD', 1);
             INSERT INTO asset (venue, symbol, base_asset, quote_asset, tick_size, lot_size, is_active, listed_at_utc)
             VALUES ('KRAKEN', 'TST', 'TST', 'USD', '0.000000010000000000', '0.000000010000000000', 1, '2025-01-01T00:00:00Z');
             INSERT INTO market_ohlcv_hourly (asset_id, hour_ts_utc, source_venue, close_price, row_hash)
             VALUES (1, '2026-01-01T00:00:00Z', 'KRAKEN', '100.000000000000000000', '0000000000000000000000000000000000000000000000000000000000000000');",
        )
        .unwrap();

        let update = conn.execute(
            "UPDATE market_ohlcv_hourly SET close_price = '101.000000000000000000'",
            [],
        );
        assert!(update.unwrap_err().to_string().contains("append-only"));

        let delete = conn.execute("DELETE FROM market_ohlcv_hourly", []);
        assert!(delete.unwrap_err().to_string().contains("append-only"));
    }

    #[test]
    fn run_context_permits_only_root_finalization() {
        let conn = open();
        conn.execute_batch(
            "INSERT INTO account (account_code, base_currency, is_active) VALUES ('A', 'USD', 1);
             INSERT INTO run_context (run_id, account_id, run_mode, hour_ts_utc, origin_hour_ts_utc,
                                      run_seed_hash, context_hash, replay_root_hash)
             VALUES ('6f0f8cfa-0000-5000-8000-000000000001', 1, 'LIVE',
                     '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z',
                     substr(hex(zeroblob(32)), 1, 64), substr(hex(zeroblob(32)), 1, 64),
                     substr(hex(zeroblob(32)), 1, 64));",
        )
        .unwrap();

        // Finalizing the replay root alone is allowed.
        conn.execute(
            "UPDATE run_context SET replay_root_hash = lower(substr(hex(zeroblob(32)), 1, 64))",
            [],
        )
        .unwrap();

        // Touching any identity column is rejected.
        let blocked = conn.execute("UPDATE run_context SET run_mode = 'PAPER'", []);
        assert!(blocked.unwrap_err().to_string().contains("append-only"));
    }

    #[test]
    fn drawdown_tier_check_rejects_mismatch() {
        let conn = open();
        conn.execute_batch(
            "INSERT INTO account (account_code, base_currency, is_active) VALUES ('A', 'USD', 1);
             INSERT INTO run_context (run_id, account_id, run_mode, hour_ts_utc, origin_hour_ts_utc,
                                      run_seed_hash, context_hash, replay_root_hash)
             VALUES ('6f0f8cfa-0000-5000-8000-000000000001', 1, 'LIVE',
                     '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z',
                     substr(hex(zeroblob(32)), 1, 64), substr(hex(zeroblob(32)), 1, 64),
                     substr(hex(zeroblob(32)), 1, 64));",
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO risk_hourly_state (
                run_mode, account_id, hour_ts_utc, source_run_id, portfolio_value,
                peak_portfolio_value, drawdown_pct, drawdown_tier, base_risk_fraction,
                max_concurrent_positions, max_total_exposure_pct, max_cluster_exposure_pct,
                halt_new_entries, kill_switch_active, kill_switch_reason, requires_manual_review,
                state_hash, row_hash
             ) VALUES (
                'LIVE', 1, '2026-01-01T00:00:00Z', '6f0f8cfa-0000-5000-8000-000000000001',
                '10000.000000000000000000', '10000.000000000000000000',
                '0.150000000000000000', 'NORMAL', '0.020000000000000000',
                10, '0.200000000000000000', '0.080000000000000000',
                0, 0, NULL, 0,
                substr(hex(zeroblob(32)), 1, 64), substr(hex(zeroblob(32)), 1, 64)
             )",
            [],
        );
        assert!(result.is_err());
    }
}
