//! Error types for the crash engine
//!
//! Game-level rejections are expected outcomes returned to callers; the
//! infrastructure errors below them (configuration, storage) follow the
//! same hand-written Display pattern and fold into `EngineError`.

use crate::crash::types::{BetId, PlayerId, RoundId, RoundState};
use crate::money::Amount;
use crate::money::Multiplier;
use std::fmt;

/// Root error type for engine startup and plumbing
#[derive(Debug)]
pub enum EngineError {
    /// Configuration related errors
    Configuration(ConfigurationError),

    /// Rejected game operation
    Game(GameError),

    /// Wallet ledger failures
    Ledger(LedgerError),

    /// Journal and file storage errors
    Storage(StorageError),

    /// HTTP server errors
    Server(String),
}

/// Configuration and validation errors
#[derive(Debug, Clone)]
pub enum ConfigurationError {
    ValidationFailed(String),
    MissingRequired(String),
    InvalidValue { field: String, value: String, reason: String },
    LoadFailed(String),
    SaveFailed(String),
}

/// Journal storage errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    OpenFailed(String),
    ReadFailed(String),
    WriteFailed(String),
    CorruptedRecord { line: usize, reason: String },
}

/// Wallet ledger errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient balance for {player}: available {available}, required {required}")]
    InsufficientBalance {
        player: PlayerId,
        available: Amount,
        required: Amount,
    },

    #[error("Wallet not found for player {0}")]
    AccountNotFound(PlayerId),

    #[error("Wallet already exists for player {0}")]
    AccountExists(PlayerId),

    #[error("Balance overflow for player {0}")]
    Overflow(PlayerId),

    #[error("Journal replay mismatch for {player} at transaction {transaction_id}: expected balance {expected}, found {found}")]
    ReplayMismatch {
        player: PlayerId,
        transaction_id: u64,
        expected: Amount,
        found: Amount,
    },

    #[error("Journal error: {0}")]
    Journal(#[from] StorageError),
}

/// Rejections for bet placement and settlement.
///
/// Every variant is an expected, locally handled outcome. `code()` gives
/// the stable machine-readable identifier sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("Invalid stake {stake}: must be between {min} and {max}")]
    InvalidStake { stake: Amount, min: Amount, max: Amount },

    #[error("Invalid auto-cashout {value}x: must be above 1.00x and at most {max}x")]
    InvalidAutoCashout { value: Multiplier, max: Multiplier },

    #[error("Insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: Amount, required: Amount },

    #[error("Player {player} already has a bet in round {round_id}")]
    DuplicateBet { player: PlayerId, round_id: RoundId },

    #[error("Cannot {operation} while the round is {state}")]
    StateConflict {
        operation: &'static str,
        state: RoundState,
    },

    #[error("No open bet for player {player} in round {round_id}")]
    BetNotFound { player: PlayerId, round_id: RoundId },

    #[error("Bet {bet_id} has already been settled")]
    AlreadySettled { bet_id: BetId },

    #[error("Wallet not found for player {0}")]
    WalletNotFound(PlayerId),

    #[error("Unknown game '{0}'")]
    UnknownGame(String),

    #[error("Ledger failure: {0}")]
    Ledger(LedgerError),
}

impl GameError {
    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            GameError::InvalidStake { .. } => "INVALID_STAKE",
            GameError::InvalidAutoCashout { .. } => "INVALID_AUTO_CASHOUT",
            GameError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            GameError::DuplicateBet { .. } => "DUPLICATE_BET",
            GameError::StateConflict { .. } => "STATE_CONFLICT",
            GameError::BetNotFound { .. } => "BET_NOT_FOUND",
            GameError::AlreadySettled { .. } => "ALREADY_SETTLED",
            GameError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            GameError::UnknownGame(_) => "UNKNOWN_GAME",
            GameError::Ledger(_) => "LEDGER_FAILURE",
        }
    }
}

impl From<LedgerError> for GameError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientBalance {
                available, required, ..
            } => GameError::InsufficientBalance { available, required },
            LedgerError::AccountNotFound(player) => GameError::WalletNotFound(player),
            other => GameError::Ledger(other),
        }
    }
}

// Display implementations
impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Configuration(e) => write!(f, "Configuration error: {}", e),
            EngineError::Game(e) => write!(f, "Game error: {}", e),
            EngineError::Ledger(e) => write!(f, "Ledger error: {}", e),
            EngineError::Storage(e) => write!(f, "Storage error: {}", e),
            EngineError::Server(msg) => write!(f, "Server error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::ValidationFailed(msg) => write!(f, "Validation failed: {}", msg),
            ConfigurationError::MissingRequired(field) => write!(f, "Missing required field: {}", field),
            ConfigurationError::InvalidValue { field, value, reason } => {
                write!(f, "Invalid value for {}: '{}' ({})", field, value, reason)
            }
            ConfigurationError::LoadFailed(msg) => write!(f, "Failed to load configuration: {}", msg),
            ConfigurationError::SaveFailed(msg) => write!(f, "Failed to save configuration: {}", msg),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::OpenFailed(msg) => write!(f, "Journal open failed: {}", msg),
            StorageError::ReadFailed(msg) => write!(f, "Read failed: {}", msg),
            StorageError::WriteFailed(msg) => write!(f, "Write failed: {}", msg),
            StorageError::CorruptedRecord { line, reason } => {
                write!(f, "Corrupted journal record at line {}: {}", line, reason)
            }
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Configuration(e) => Some(e),
            EngineError::Game(e) => Some(e),
            EngineError::Ledger(e) => Some(e),
            EngineError::Storage(e) => Some(e),
            EngineError::Server(_) => None,
        }
    }
}

impl std::error::Error for ConfigurationError {}
impl std::error::Error for StorageError {}

// From implementations for easy conversion
impl From<ConfigurationError> for EngineError {
    fn from(e: ConfigurationError) -> Self {
        EngineError::Configuration(e)
    }
}

impl From<GameError> for EngineError {
    fn from(e: GameError) -> Self {
        EngineError::Game(e)
    }
}

impl From<LedgerError> for EngineError {
    fn from(e: LedgerError) -> Self {
        EngineError::Ledger(e)
    }
}

impl From<StorageError> for EngineError {
    fn from(e: StorageError) -> Self {
        EngineError::Storage(e)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::Storage(StorageError::OpenFailed(e.to_string())),
            _ => EngineError::Storage(StorageError::ReadFailed(e.to_string())),
        }
    }
}

// Convenience type alias for Results
pub type EngineResult<T> = Result<T, EngineError>;
