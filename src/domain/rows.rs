//! Append-only output rows emitted by the runtime writer.
//!
//! Column sets follow the relational contract one-for-one. Identities are
//! content-addressed UUIDv5 values, `row_hash` is the canonical SHA-256
//! over every persisted field, and each downstream row carries the
//! `parent_*_hash` of its immediate logical parent.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::enums::{
    Direction, Horizon, LiquidityFlag, OrderSide, OrderStatus, OrderType, RiskEventType, RunMode,
    Severity, SignalAction, TimeInForce,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeSignalRow {
    pub signal_id: Uuid,
    pub run_id: Uuid,
    pub run_mode: RunMode,
    pub account_id: i64,
    pub asset_id: i64,
    pub hour_ts_utc: DateTime<Utc>,
    pub horizon: Horizon,
    pub action: SignalAction,
    pub direction: Direction,
    pub confidence: Decimal,
    pub expected_return: Decimal,
    pub assumed_fee_rate: Decimal,
    pub assumed_slippage_rate: Decimal,
    pub net_edge: Decimal,
    pub target_position_notional: Decimal,
    pub position_size_fraction: Decimal,
    pub risk_state_hour_ts_utc: DateTime<Utc>,
    pub decision_hash: String,
    pub risk_state_run_id: Uuid,
    pub cluster_membership_id: i64,
    pub upstream_hash: String,
    pub row_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequestRow {
    pub order_id: Uuid,
    pub signal_id: Uuid,
    pub run_id: Uuid,
    pub run_mode: RunMode,
    pub account_id: i64,
    pub asset_id: i64,
    pub client_order_id: String,
    pub request_ts_utc: DateTime<Utc>,
    pub hour_ts_utc: DateTime<Utc>,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub tif: TimeInForce,
    pub limit_price: Option<Decimal>,
    pub requested_qty: Decimal,
    pub requested_notional: Decimal,
    pub pre_order_cash_available: Decimal,
    pub risk_check_passed: bool,
    pub status: OrderStatus,
    pub cost_profile_id: i64,
    pub origin_hour_ts_utc: DateTime<Utc>,
    pub risk_state_run_id: Uuid,
    pub cluster_membership_id: i64,
    pub attempt_seq: i64,
    pub parent_signal_hash: String,
    pub row_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderFillRow {
    pub fill_id: Uuid,
    pub order_id: Uuid,
    pub run_id: Uuid,
    pub run_mode: RunMode,
    pub account_id: i64,
    pub asset_id: i64,
    pub exchange_trade_id: String,
    pub fill_ts_utc: DateTime<Utc>,
    pub hour_ts_utc: DateTime<Utc>,
    pub fill_price: Decimal,
    pub fill_qty: Decimal,
    pub fill_notional: Decimal,
    pub fee_paid: Decimal,
    pub fee_rate: Decimal,
    pub realized_slippage_rate: Decimal,
    pub slippage_cost: Decimal,
    pub liquidity_flag: LiquidityFlag,
    pub origin_hour_ts_utc: DateTime<Utc>,
    pub parent_order_hash: String,
    pub row_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionLotRow {
    pub lot_id: Uuid,
    pub open_fill_id: Uuid,
    pub run_id: Uuid,
    pub run_mode: RunMode,
    pub account_id: i64,
    pub asset_id: i64,
    pub hour_ts_utc: DateTime<Utc>,
    pub open_ts_utc: DateTime<Utc>,
    pub open_price: Decimal,
    pub open_qty: Decimal,
    pub open_notional: Decimal,
    pub open_fee: Decimal,
    pub remaining_qty: Decimal,
    pub origin_hour_ts_utc: DateTime<Utc>,
    pub parent_fill_hash: String,
    pub row_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedTradeRow {
    pub trade_id: Uuid,
    pub lot_id: Uuid,
    pub run_id: Uuid,
    pub run_mode: RunMode,
    pub account_id: i64,
    pub asset_id: i64,
    pub hour_ts_utc: DateTime<Utc>,
    pub entry_ts_utc: DateTime<Utc>,
    pub exit_ts_utc: DateTime<Utc>,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub gross_pnl: Decimal,
    pub net_pnl: Decimal,
    pub total_fee: Decimal,
    pub total_slippage_cost: Decimal,
    pub holding_hours: i64,
    pub origin_hour_ts_utc: DateTime<Utc>,
    pub parent_lot_hash: String,
    pub row_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashLedgerRow {
    pub run_id: Uuid,
    pub run_mode: RunMode,
    pub account_id: i64,
    pub event_ts_utc: DateTime<Utc>,
    pub hour_ts_utc: DateTime<Utc>,
    pub event_type: String,
    pub ref_type: String,
    pub ref_id: Uuid,
    pub delta_cash: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub origin_hour_ts_utc: DateTime<Utc>,
    pub ledger_seq: i64,
    pub prev_ledger_hash: Option<String>,
    pub economic_event_hash: String,
    pub ledger_hash: String,
    pub row_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskEventRow {
    pub risk_event_id: Uuid,
    pub run_id: Uuid,
    pub run_mode: RunMode,
    pub account_id: i64,
    pub event_ts_utc: DateTime<Utc>,
    pub hour_ts_utc: DateTime<Utc>,
    pub event_type: RiskEventType,
    pub severity: Severity,
    pub reason_code: String,
    pub details: String,
    pub related_state_hour_ts_utc: DateTime<Utc>,
    pub origin_hour_ts_utc: DateTime<Utc>,
    pub parent_state_hash: String,
    pub row_hash: String,
}
