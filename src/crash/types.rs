use crate::money::{Amount, Multiplier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Verified player identity supplied by the authentication layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Monotonically increasing round identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(u64);

impl RoundId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BetId(Uuid);

impl BetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Round lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RoundState {
    /// Accepting bets, no multiplier yet
    Waiting,
    /// Multiplier advancing, cashouts allowed
    Running,
    /// Round over, cooling down
    Crashed,
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundState::Waiting => write!(f, "waiting"),
            RoundState::Running => write!(f, "running"),
            RoundState::Crashed => write!(f, "crashed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Open,
    CashedOut,
    Lost,
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetStatus::Open => write!(f, "open"),
            BetStatus::CashedOut => write!(f, "cashed_out"),
            BetStatus::Lost => write!(f, "lost"),
        }
    }
}

/// How a cashout was triggered
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CashoutKind {
    Manual,
    Auto,
}

/// Point-in-time view of a bet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bet {
    pub id: BetId,
    pub player: PlayerId,
    pub round_id: RoundId,
    pub stake: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_cashout: Option<Multiplier>,
    pub status: BetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cashed_out_multiplier: Option<Multiplier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout: Option<Amount>,
    pub placed_at: DateTime<Utc>,
}

/// Result of a successful bet placement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetReceipt {
    pub bet: Bet,
    pub new_balance: Amount,
    pub transaction_id: u64,
}

/// Result of a successful cashout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashoutReceipt {
    pub bet_id: BetId,
    pub round_id: RoundId,
    pub player: PlayerId,
    pub kind: CashoutKind,
    pub multiplier: Multiplier,
    pub winnings: Amount,
    pub new_balance: Amount,
    pub transaction_id: u64,
}
