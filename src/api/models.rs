//! API Request and Response Models

use crate::crash::types::{BetId, BetReceipt, CashoutKind, CashoutReceipt, PlayerId, RoundId, RoundState};
use crate::crash::RoundSummary;
use crate::money::{Amount, Multiplier};
use crate::wallet::WalletTransaction;
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub round_id: RoundId,
    pub state: RoundState,
    pub uptime_secs: u64,
}

/// POST /api/crash/bet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceBetRequest {
    pub stake: Amount,
    pub game_name: String,
    #[serde(default)]
    pub auto_cashout: Option<Multiplier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceBetResponse {
    pub bet_id: BetId,
    pub round_id: RoundId,
    pub stake: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_cashout: Option<Multiplier>,
    pub new_balance: Amount,
    pub transaction_id: u64,
}

impl From<BetReceipt> for PlaceBetResponse {
    fn from(receipt: BetReceipt) -> Self {
        Self {
            bet_id: receipt.bet.id,
            round_id: receipt.bet.round_id,
            stake: receipt.bet.stake,
            auto_cashout: receipt.bet.auto_cashout,
            new_balance: receipt.new_balance,
            transaction_id: receipt.transaction_id,
        }
    }
}

/// POST /api/crash/cashout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashoutResponse {
    pub bet_id: BetId,
    pub round_id: RoundId,
    pub winnings: Amount,
    pub cashed_out_multiplier: Multiplier,
    pub new_balance: Amount,
    pub transaction_id: u64,
    pub kind: CashoutKind,
}

impl From<CashoutReceipt> for CashoutResponse {
    fn from(receipt: CashoutReceipt) -> Self {
        Self {
            bet_id: receipt.bet_id,
            round_id: receipt.round_id,
            winnings: receipt.winnings,
            cashed_out_multiplier: receipt.multiplier,
            new_balance: receipt.new_balance,
            transaction_id: receipt.transaction_id,
            kind: receipt.kind,
        }
    }
}

/// GET /api/crash/history?limit={n}
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub rounds: Vec<RoundSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub player: PlayerId,
    pub balance: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionsResponse {
    pub player: PlayerId,
    pub transactions: Vec<WalletTransaction>,
}
