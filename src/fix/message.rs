//! Message payloads exchanged over the FIX session (spec.md section 3, 4.1).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// FIX tag 54 code.
    pub fn fix_code(self) -> &'static str {
        match self {
            Side::Buy => "1",
            Side::Sell => "2",
        }
    }

    pub fn from_fix_code(code: &str) -> Option<Side> {
        match code {
            "1" => Some(Side::Buy),
            "2" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// FIX tag 39 / 150 status, restricted to the values this exchange emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrdStatus {
    /// "1" — PartiallyFilled
    PartiallyFilled,
    /// "2" — Filled
    Filled,
}

impl OrdStatus {
    pub fn ord_status_code(self) -> &'static str {
        match self {
            OrdStatus::PartiallyFilled => "1",
            OrdStatus::Filled => "2",
        }
    }

    pub fn exec_type_code(self) -> &'static str {
        match self {
            OrdStatus::PartiallyFilled => "1",
            OrdStatus::Filled => "F",
        }
    }
}

/// NewOrderSingle (35=D). One per order submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrderSingle {
    pub cl_ord_id: String,
    pub symbol: String,
    pub side: Side,
    /// Positive decimal, 8 fractional digits on the wire.
    pub price: f64,
    /// 1 <= qty <= 10_000.
    pub order_qty: u32,
    pub sending_time: String,
    /// Vendor tag 6007: the strategy/source tag.
    pub source: String,
}

/// Heartbeat (35=0). Standard header only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub sending_time: String,
}

/// ExecutionReport (35=8). Exchange -> client direction: Sender=EXCHANGE,
/// Target=MY_COMPANY (side swap relative to NewOrderSingle is intentional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub cl_ord_id: String,
    pub order_id: String,
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
    pub text: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FixMessage {
    NewOrderSingle(NewOrderSingle),
    Heartbeat(Heartbeat),
    ExecutionReport(ExecutionReport),
}

impl FixMessage {
    /// FIX tag 35 value for this message type.
    pub fn msg_type(&self) -> &'static str {
        match self {
            FixMessage::NewOrderSingle(_) => "D",
            FixMessage::Heartbeat(_) => "0",
            FixMessage::ExecutionReport(_) => "8",
        }
    }
}
