//! Recently finished rounds, newest first

use crate::crash::registry::{BetSlot, SlotStatus};
use crate::crash::round::Round;
use crate::crash::types::RoundId;
use crate::money::{Amount, Multiplier};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round_id: RoundId,
    pub crash_point: Multiplier,
    pub final_multiplier: Multiplier,
    pub forced: bool,
    pub ticks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crashed_at: Option<DateTime<Utc>>,
    pub bet_count: usize,
    pub cashed_out_count: usize,
    pub lost_count: usize,
    pub total_staked: Amount,
    pub total_paid_out: Amount,
}

impl RoundSummary {
    /// Summarise a crashed round from its settled participants
    pub fn from_round(round: &Round) -> Option<Self> {
        let crash_point = round.revealed_crash_point()?;
        let participants: &[Arc<BetSlot>] = round.participants();

        let mut summary = Self {
            round_id: round.id(),
            crash_point,
            final_multiplier: round.multiplier().unwrap_or(crash_point),
            forced: round.forced(),
            ticks: round.tick(),
            started_at: round.started_at(),
            crashed_at: round.crashed_at(),
            bet_count: participants.len(),
            cashed_out_count: 0,
            lost_count: 0,
            total_staked: Amount::ZERO,
            total_paid_out: Amount::ZERO,
        };

        for slot in participants {
            summary.total_staked = summary.total_staked.saturating_add(slot.stake);
            match slot.status() {
                SlotStatus::CashedOut { payout, .. } => {
                    summary.cashed_out_count += 1;
                    summary.total_paid_out = summary.total_paid_out.saturating_add(payout);
                }
                SlotStatus::Lost => summary.lost_count += 1,
                SlotStatus::Open => {}
            }
        }

        Some(summary)
    }
}

/// Bounded ring of finished rounds
pub struct RoundHistory {
    capacity: usize,
    rounds: RwLock<VecDeque<RoundSummary>>,
}

impl RoundHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            rounds: RwLock::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    pub fn push(&self, summary: RoundSummary) {
        let mut rounds = self.rounds.write();
        rounds.push_front(summary);
        rounds.truncate(self.capacity);
    }

    /// Up to `limit` most recent rounds, newest first
    pub fn recent(&self, limit: usize) -> Vec<RoundSummary> {
        self.rounds.read().iter().take(limit).cloned().collect()
    }

    pub fn latest(&self) -> Option<RoundSummary> {
        self.rounds.read().front().cloned()
    }

    pub fn len(&self) -> usize {
        self.rounds.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.read().is_empty()
    }
}
