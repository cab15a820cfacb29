//! Crash game: round lifecycle, bets and settlement

pub mod clock;
pub mod generator;
pub mod history;
pub mod registry;
pub mod round;
pub mod scheduler;
pub mod settlement;
pub mod types;

pub use clock::MultiplierClock;
pub use generator::{CrashPointGenerator, CrashPointSource, FixedCrashPoints};
pub use history::{RoundHistory, RoundSummary};
pub use registry::{BetRegistry, BetSlot, SlotStatus};
pub use round::{Round, RoundCell};
pub use scheduler::{RoundScheduler, TickOutcome, WatchdogAction};
pub use settlement::SettlementEngine;
pub use types::{Bet, BetId, BetReceipt, BetStatus, CashoutKind, CashoutReceipt, PlayerId, RoundId, RoundState};
