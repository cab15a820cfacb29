//! Round state machine
//!
//! WAITING -> RUNNING -> CRASHED -> (next round) WAITING. Any other
//! transition is rejected with a state conflict.

use crate::crash::registry::BetSlot;
use crate::crash::types::{RoundId, RoundState};
use crate::errors::GameError;
use crate::money::Multiplier;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared, lock-guarded current round
pub type RoundCell = RwLock<Round>;

#[derive(Debug)]
pub struct Round {
    id: RoundId,
    state: RoundState,
    crash_point: Option<Multiplier>,
    multiplier: Option<Multiplier>,
    tick: u64,
    forced: bool,
    started_at: Option<DateTime<Utc>>,
    crashed_at: Option<DateTime<Utc>>,
    participants: Vec<Arc<BetSlot>>,
    last_progress: Instant,
}

impl Round {
    /// A fresh round accepting bets
    pub fn waiting(id: RoundId, now: Instant) -> Self {
        Self {
            id,
            state: RoundState::Waiting,
            crash_point: None,
            multiplier: None,
            tick: 0,
            forced: false,
            started_at: None,
            crashed_at: None,
            participants: Vec::new(),
            last_progress: now,
        }
    }

    /// The round that follows this one
    pub fn successor(&self, now: Instant) -> Self {
        Self::waiting(self.id.next(), now)
    }

    pub fn id(&self) -> RoundId {
        self.id
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    /// Crash point; kept internal until the round has crashed
    pub(crate) fn crash_point(&self) -> Option<Multiplier> {
        self.crash_point
    }

    /// Crash point once it may be shown to clients
    pub fn revealed_crash_point(&self) -> Option<Multiplier> {
        match self.state {
            RoundState::Crashed => self.crash_point,
            _ => None,
        }
    }

    pub fn multiplier(&self) -> Option<Multiplier> {
        self.multiplier
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn forced(&self) -> bool {
        self.forced
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn crashed_at(&self) -> Option<DateTime<Utc>> {
        self.crashed_at
    }

    pub fn participants(&self) -> &[Arc<BetSlot>] {
        &self.participants
    }

    /// Time since the last state change or tick
    pub fn since_progress(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_progress)
    }

    pub fn require(&self, expected: RoundState, operation: &'static str) -> Result<(), GameError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(GameError::StateConflict {
                operation,
                state: self.state,
            })
        }
    }

    /// WAITING -> RUNNING. The crash point is fixed here, once.
    pub fn start(
        &mut self,
        crash_point: Multiplier,
        participants: Vec<Arc<BetSlot>>,
        now: Instant,
    ) -> Result<(), GameError> {
        self.require(RoundState::Waiting, "start the round")?;
        self.state = RoundState::Running;
        self.crash_point = Some(crash_point);
        self.multiplier = Some(Multiplier::ONE);
        self.tick = 0;
        self.started_at = Some(Utc::now());
        self.participants = participants;
        self.last_progress = now;
        Ok(())
    }

    /// Record one clock tick while RUNNING
    pub fn advance(&mut self, multiplier: Multiplier, now: Instant) -> Result<u64, GameError> {
        self.require(RoundState::Running, "advance the multiplier")?;
        self.tick += 1;
        self.multiplier = Some(multiplier);
        self.last_progress = now;
        Ok(self.tick)
    }

    /// RUNNING -> CRASHED at `final_multiplier`.
    ///
    /// A natural crash counts as one more tick; a forced crash stops where
    /// the clock was.
    pub fn crash(&mut self, final_multiplier: Multiplier, forced: bool, now: Instant) -> Result<(), GameError> {
        self.require(RoundState::Running, "crash the round")?;
        self.state = RoundState::Crashed;
        if !forced {
            self.tick += 1;
        }
        self.multiplier = Some(final_multiplier);
        self.forced = forced;
        self.crashed_at = Some(Utc::now());
        self.last_progress = now;
        Ok(())
    }
}
