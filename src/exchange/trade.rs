//! Trade and execution-report records (spec.md section 3).

use crate::clock::Nanos;
use crate::fix::Side;
use crate::fix::message::OrdStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub price: f64,
    pub qty: u32,
    pub maker_order_id: u64,
    pub maker_source: String,
    pub taker_order_id: u64,
    pub taker_source: String,
    /// Taker's side.
    pub side: Side,
    pub wall_clock_ns: Nanos,
    /// Time from maker submission to match, milliseconds.
    pub latency_ms: f64,
    /// Maker's realised PnL on this fill.
    pub pnl: f64,
}

/// Mirrors the FIX ExecutionReport payload into shared state (spec.md
/// section 3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReportRecord {
    pub time: Nanos,
    pub cl_ord_id: String,
    pub order_id: u64,
    pub exec_id: String,
    pub ord_status: OrdStatus,
    pub symbol: String,
    pub side: Side,
    pub order_qty: u32,
    pub last_qty: Option<u32>,
    pub last_px: Option<f64>,
    pub leaves_qty: u32,
    pub cum_qty: u32,
    pub price: f64,
    pub source: String,
}
