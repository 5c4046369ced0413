//! Core admission, completion, and join primitives.

pub mod error;
pub mod ledger;
pub mod permit;
pub mod stats;
pub mod thread_control;
#[cfg(feature = "tokio-runtime")]
pub mod async_control;

pub use error::{AppResult, LimiterError};
pub use ledger::Capacity;
pub use permit::{BatchPermit, OwnedWorkPermit, WorkPermit};
pub use stats::LimiterStats;
pub use thread_control::ThreadControl;
#[cfg(feature = "tokio-runtime")]
pub use async_control::{AsyncBatchPermit, AsyncThreadControl, AsyncWorkPermit};
