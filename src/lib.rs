//! Crash Engine - multiplayer crash betting rounds
//!
//! A single round scheduler drives each table through betting, a climbing
//! multiplier and a crash, settling every bet exactly once against the
//! wallet ledger and fanning ordered round events out to all subscribers.

pub mod api;
pub mod broadcast;
pub mod config;
pub mod crash;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod money;
pub mod wallet;

pub use broadcast::{BroadcastBus, BusSubscription, Delivery, EventEnvelope, RoundEvent, RoundSnapshot};
pub use config::{ConfigLoader, EngineConfig};
pub use engine::{CrashEngine, EngineTasks};
pub use errors::{EngineError, EngineResult, GameError, LedgerError, StorageError};
pub use metrics::EngineMetrics;
pub use money::{Amount, Multiplier, Ratio};
