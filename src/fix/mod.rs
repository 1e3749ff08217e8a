//! FIX-4.4 tag-value codec (spec.md section 4.1).
//!
//! Only the subset needed by the exchange core: NewOrderSingle (35=D),
//! Heartbeat (35=0) and ExecutionReport (35=8). Session management beyond
//! heartbeats (logon/logout/gap fill/resend request) is explicitly a
//! non-goal (spec.md section 1).

pub mod codec;
pub mod message;

pub use codec::{Codec, SOH};
pub use message::{ExecutionReport, FixMessage, Heartbeat, NewOrderSingle, OrdStatus, Side};
