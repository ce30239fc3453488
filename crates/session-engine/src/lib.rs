//! Per-session decision pipeline and the multi-session service around it.
//!
//! `SessionEngine` wires the structure tracker, Greek smoother, classifiers,
//! setup detector and trade lifecycle into one synchronous tick handler.
//! `SessionService` hosts many engines behind a concurrent registry and
//! persists closed trades through the `TradeLogStore` seam.

pub mod engine;
pub mod service;
pub mod store;

pub use engine::{SessionConfig, SessionEngine, TickOutcome};
pub use service::SessionService;
pub use store::MemoryTradeLogStore;
