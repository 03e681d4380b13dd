//! Deterministic exchange adapter seam and reference simulator.
//!
//! The simulator prices one attempt from the most recent order-book
//! snapshot at or before the attempt timestamp, falls back to the hourly
//! OHLCV close, and reports an unavailable price source otherwise.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::canonical::{quantize, SCALE_18};
use crate::context::ExecutionContext;
use crate::domain::{LiquidityFlag, OrderSide, PriceSource};

/// Deterministic order-attempt input payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAttemptRequest {
    pub asset_id: i64,
    pub side: OrderSide,
    pub requested_qty: Decimal,
    pub attempt_ts_utc: DateTime<Utc>,
}

/// Deterministic fill-attempt output payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillAttemptResult {
    pub filled_qty: Decimal,
    pub reference_price: Option<Decimal>,
    pub fill_price: Option<Decimal>,
    pub liquidity_flag: LiquidityFlag,
    pub price_source: PriceSource,
}

/// Seam for deterministic execution adapters.
pub trait ExchangeAdapter {
    /// Simulate one deterministic order attempt and return the fill result.
    fn simulate_attempt(
        &self,
        context: &ExecutionContext,
        request: &OrderAttemptRequest,
    ) -> FillAttemptResult;
}

/// Order-book-first simulator with OHLCV-close fallback.
#[derive(Debug, Default)]
pub struct DeterministicExchangeSimulator;

impl ExchangeAdapter for DeterministicExchangeSimulator {
    fn simulate_attempt(
        &self,
        context: &ExecutionContext,
        request: &OrderAttemptRequest,
    ) -> FillAttemptResult {
        if let Some(snapshot) =
            context.find_latest_order_book_snapshot(request.asset_id, request.attempt_ts_utc)
        {
            let (reference_price, available_qty) = match request.side {
                OrderSide::Buy => (snapshot.best_ask_price, snapshot.best_ask_size),
                OrderSide::Sell => (snapshot.best_bid_price, snapshot.best_bid_size),
            };
            let available = quantize(available_qty.max(Decimal::ZERO), SCALE_18);
            let filled_qty = quantize(request.requested_qty.min(available), SCALE_18);
            return FillAttemptResult {
                filled_qty,
                reference_price: Some(reference_price),
                fill_price: Some(reference_price),
                liquidity_flag: LiquidityFlag::Taker,
                price_source: PriceSource::OrderBook,
            };
        }

        if let Some(candle) = context.find_ohlcv(request.asset_id) {
            return FillAttemptResult {
                filled_qty: quantize(request.requested_qty, SCALE_18),
                reference_price: Some(candle.close_price),
                fill_price: Some(candle.close_price),
                liquidity_flag: LiquidityFlag::Unknown,
                price_source: PriceSource::OhlcvClose,
            };
        }

        FillAttemptResult {
            filled_qty: quantize(Decimal::ZERO, SCALE_18),
            reference_price: None,
            fill_price: None,
            liquidity_flag: LiquidityFlag::Unknown,
            price_source: PriceSource::Unavailable,
        }
    }
}
