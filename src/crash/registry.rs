//! Bets for the current round
//!
//! One bet per player per round. Placement debits the wallet and records
//! the bet as a single step: the debit happens while the player's registry
//! entry is reserved, and the entry is only filled once the debit succeeded.

use crate::config::BettingConfig;
use crate::crash::types::{Bet, BetId, BetStatus, PlayerId, RoundId};
use crate::errors::GameError;
use crate::money::{Amount, Multiplier};
use crate::wallet::{TransactionContext, WalletLedger, WalletTransaction};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Settlement state guarded by the bet's own lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Open,
    CashedOut { multiplier: Multiplier, payout: Amount },
    Lost,
}

/// A placed bet. Everything but the status is fixed at placement.
#[derive(Debug)]
pub struct BetSlot {
    pub id: BetId,
    pub player: PlayerId,
    pub round_id: RoundId,
    pub stake: Amount,
    pub auto_cashout: Option<Multiplier>,
    pub placed_at: DateTime<Utc>,
    status: Mutex<SlotStatus>,
}

impl BetSlot {
    fn open(player: PlayerId, round_id: RoundId, stake: Amount, auto_cashout: Option<Multiplier>) -> Self {
        Self {
            id: BetId::new(),
            player,
            round_id,
            stake,
            auto_cashout,
            placed_at: Utc::now(),
            status: Mutex::new(SlotStatus::Open),
        }
    }

    pub fn status(&self) -> SlotStatus {
        *self.status.lock()
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status(), SlotStatus::Open)
    }

    /// Exclusive settlement right for this bet. Whoever holds the guard
    /// decides the outcome; later holders see it already settled.
    pub(crate) fn lock_status(&self) -> MutexGuard<'_, SlotStatus> {
        self.status.lock()
    }

    pub fn to_bet(&self) -> Bet {
        let (status, cashed_out_multiplier, payout) = match self.status() {
            SlotStatus::Open => (BetStatus::Open, None, None),
            SlotStatus::CashedOut { multiplier, payout } => (BetStatus::CashedOut, Some(multiplier), Some(payout)),
            SlotStatus::Lost => (BetStatus::Lost, None, None),
        };
        Bet {
            id: self.id,
            player: self.player.clone(),
            round_id: self.round_id,
            stake: self.stake,
            auto_cashout: self.auto_cashout,
            status,
            cashed_out_multiplier,
            payout,
            placed_at: self.placed_at,
        }
    }
}

pub struct BetRegistry {
    bets: DashMap<PlayerId, Arc<BetSlot>>,
    limits: BettingConfig,
}

impl BetRegistry {
    pub fn new(limits: BettingConfig) -> Self {
        Self {
            bets: DashMap::new(),
            limits,
        }
    }

    /// Check stake bounds and the auto-cashout threshold
    pub fn validate(&self, stake: Amount, auto_cashout: Option<Multiplier>) -> Result<(), GameError> {
        if stake.is_zero() || stake < self.limits.min_stake || stake > self.limits.max_stake {
            return Err(GameError::InvalidStake {
                stake,
                min: self.limits.min_stake,
                max: self.limits.max_stake,
            });
        }
        if let Some(threshold) = auto_cashout {
            if threshold <= Multiplier::ONE || threshold > self.limits.max_auto_cashout {
                return Err(GameError::InvalidAutoCashout {
                    value: threshold,
                    max: self.limits.max_auto_cashout,
                });
            }
        }
        Ok(())
    }

    /// Debit the stake and record the bet, or do neither.
    ///
    /// The caller must hold the round in WAITING for the duration of the call.
    pub fn place(
        &self,
        ledger: &WalletLedger,
        round_id: RoundId,
        player: &PlayerId,
        stake: Amount,
        auto_cashout: Option<Multiplier>,
    ) -> Result<(Arc<BetSlot>, WalletTransaction), GameError> {
        self.validate(stake, auto_cashout)?;

        match self.bets.entry(player.clone()) {
            Entry::Occupied(_) => Err(GameError::DuplicateBet {
                player: player.clone(),
                round_id,
            }),
            Entry::Vacant(vacant) => {
                let slot = Arc::new(BetSlot::open(player.clone(), round_id, stake, auto_cashout));
                let tx = ledger.debit(
                    player,
                    stake,
                    TransactionContext {
                        bet_id: slot.id,
                        round_id,
                        description: format!("Bet placed on {}", self.limits.game_name),
                    },
                )?;
                vacant.insert(Arc::clone(&slot));
                Ok((slot, tx))
            }
        }
    }

    pub fn get(&self, player: &PlayerId) -> Option<Arc<BetSlot>> {
        self.bets.get(player).map(|entry| Arc::clone(entry.value()))
    }

    /// Every bet of the round in placement order
    pub fn all(&self) -> Vec<Arc<BetSlot>> {
        let mut bets: Vec<_> = self.bets.iter().map(|entry| Arc::clone(entry.value())).collect();
        bets.sort_by_key(|slot| slot.placed_at);
        bets
    }

    pub fn active_bets(&self) -> Vec<Arc<BetSlot>> {
        self.all().into_iter().filter(|slot| slot.is_open()).collect()
    }

    pub fn len(&self) -> usize {
        self.bets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bets.is_empty()
    }

    /// Forget the finished round's bets
    pub fn clear(&self) {
        self.bets.clear();
    }
}
