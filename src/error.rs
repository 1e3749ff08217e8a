//! Error taxonomy (spec.md section 7).
//!
//! `InvalidField`/`ParseError` are recovered at the point they're raised;
//! `TradingHalted` propagates exactly one level (engine -> scheduler);
//! `RiskRejected` and `CollaboratorUnavailable` never leave the subsystem
//! that raised them. `StateInvariant` is the only variant that may abort
//! the process in debug builds.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeError {
    /// FIX encode/decode rejected a field: (tag, reason).
    InvalidField(u32, String),
    /// Malformed incoming FIX message.
    ParseError(String),
    /// Circuit breaker fired; the engine will not match orders.
    TradingHalted,
    /// A strategy's own risk check denied an order.
    RiskRejected(String),
    /// The market-data collaborator timed out or returned non-200.
    CollaboratorUnavailable(String),
    /// A detected book/index invariant violation. Fatal in debug builds.
    StateInvariant(String),
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeError::InvalidField(tag, reason) => {
                write!(f, "invalid field (tag {tag}): {reason}")
            }
            ExchangeError::ParseError(reason) => write!(f, "parse error: {reason}"),
            ExchangeError::TradingHalted => write!(f, "trading halted"),
            ExchangeError::RiskRejected(reason) => write!(f, "risk rejected: {reason}"),
            ExchangeError::CollaboratorUnavailable(reason) => {
                write!(f, "collaborator unavailable: {reason}")
            }
            ExchangeError::StateInvariant(reason) => write!(f, "state invariant violated: {reason}"),
        }
    }
}

impl std::error::Error for ExchangeError {}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Abort in debug builds, log-and-degrade in release. Used wherever
/// `OrderBook` detects its index and per-level queues have drifted apart
/// (`add_order`, `pop_front`, `remove_order`).
#[macro_export]
macro_rules! state_invariant {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            let msg = format!($($arg)*);
            tracing::error!(invariant = %msg, "state invariant violated");
            debug_assert!($cond, "{}", msg);
        }
    };
}
