//! Ordered fan-out of round events
//!
//! A single publisher assigns every event a gap-free sequence number and
//! folds it into the current `RoundSnapshot` under one lock, then sends it
//! on a tokio broadcast channel. Subscribing takes the same lock, so a new
//! subscriber's snapshot and its first live event are always adjacent.

use crate::crash::types::{BetId, BetStatus, CashoutKind, PlayerId, RoundId, RoundState};
use crate::metrics::EngineMetrics;
use crate::money::{Amount, Multiplier};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Round lifecycle events in generation order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoundEvent {
    /// Betting window opened
    RoundWaiting {
        round_id: RoundId,
        betting_closes_at: DateTime<Utc>,
    },
    RoundStarted {
        round_id: RoundId,
        started_at: DateTime<Utc>,
        bet_count: usize,
    },
    BetPlaced {
        round_id: RoundId,
        bet_id: BetId,
        player: PlayerId,
        stake: Amount,
        #[serde(skip_serializing_if = "Option::is_none")]
        auto_cashout: Option<Multiplier>,
    },
    Tick {
        round_id: RoundId,
        tick: u64,
        multiplier: Multiplier,
    },
    Settled {
        round_id: RoundId,
        bet_id: BetId,
        player: PlayerId,
        multiplier: Multiplier,
        payout: Amount,
        kind: CashoutKind,
    },
    Crashed {
        round_id: RoundId,
        crash_point: Multiplier,
        /// Where the multiplier stopped; below `crash_point` only when forced
        multiplier: Multiplier,
        tick: u64,
        forced: bool,
    },
}

impl RoundEvent {
    pub fn round_id(&self) -> RoundId {
        match self {
            RoundEvent::RoundWaiting { round_id, .. }
            | RoundEvent::RoundStarted { round_id, .. }
            | RoundEvent::BetPlaced { round_id, .. }
            | RoundEvent::Tick { round_id, .. }
            | RoundEvent::Settled { round_id, .. }
            | RoundEvent::Crashed { round_id, .. } => *round_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub seq: u64,
    pub round_id: RoundId,
    pub emitted_at: DateTime<Utc>,
    pub event: RoundEvent,
}

/// Public view of one bet inside a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetView {
    pub bet_id: BetId,
    pub player: PlayerId,
    pub stake: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_cashout: Option<Multiplier>,
    pub status: BetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cashed_out_multiplier: Option<Multiplier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout: Option<Amount>,
}

/// Current round state as seen by clients, derived only from events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    /// Sequence number of the last event folded in
    pub seq: u64,
    pub round_id: RoundId,
    pub state: RoundState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<Multiplier>,
    pub tick: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash_point: Option<Multiplier>,
    pub forced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub betting_closes_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub bets: Vec<BetView>,
}

impl Default for RoundSnapshot {
    fn default() -> Self {
        Self {
            seq: 0,
            round_id: RoundId::new(0),
            state: RoundState::Waiting,
            multiplier: None,
            tick: 0,
            crash_point: None,
            forced: false,
            betting_closes_at: None,
            started_at: None,
            bets: Vec::new(),
        }
    }
}

impl RoundSnapshot {
    /// Fold one event into the snapshot
    pub fn apply(&mut self, envelope: &EventEnvelope) {
        self.seq = envelope.seq;
        match &envelope.event {
            RoundEvent::RoundWaiting {
                round_id,
                betting_closes_at,
            } => {
                *self = RoundSnapshot {
                    seq: envelope.seq,
                    round_id: *round_id,
                    betting_closes_at: Some(*betting_closes_at),
                    ..RoundSnapshot::default()
                };
            }
            RoundEvent::RoundStarted { round_id, started_at, .. } => {
                self.round_id = *round_id;
                self.state = RoundState::Running;
                self.multiplier = Some(Multiplier::ONE);
                self.tick = 0;
                self.started_at = Some(*started_at);
            }
            RoundEvent::BetPlaced {
                bet_id,
                player,
                stake,
                auto_cashout,
                ..
            } => {
                self.bets.push(BetView {
                    bet_id: *bet_id,
                    player: player.clone(),
                    stake: *stake,
                    auto_cashout: *auto_cashout,
                    status: BetStatus::Open,
                    cashed_out_multiplier: None,
                    payout: None,
                });
            }
            RoundEvent::Tick { tick, multiplier, .. } => {
                self.tick = *tick;
                self.multiplier = Some(*multiplier);
            }
            RoundEvent::Settled {
                bet_id,
                multiplier,
                payout,
                ..
            } => {
                if let Some(bet) = self.bets.iter_mut().find(|b| b.bet_id == *bet_id) {
                    bet.status = BetStatus::CashedOut;
                    bet.cashed_out_multiplier = Some(*multiplier);
                    bet.payout = Some(*payout);
                }
            }
            RoundEvent::Crashed {
                crash_point,
                multiplier,
                tick,
                forced,
                ..
            } => {
                self.state = RoundState::Crashed;
                self.crash_point = Some(*crash_point);
                self.multiplier = Some(*multiplier);
                self.tick = *tick;
                self.forced = *forced;
                for bet in self.bets.iter_mut().filter(|b| b.status == BetStatus::Open) {
                    bet.status = BetStatus::Lost;
                }
            }
        }
    }
}

/// Injected event sink used by the scheduler and settlement path
pub trait RoundEventPublisher: Send + Sync {
    /// Publish and return the assigned sequence number
    fn publish(&self, event: RoundEvent) -> u64;
}

struct BusState {
    seq: u64,
    snapshot: RoundSnapshot,
}

pub struct BroadcastBus {
    sender: broadcast::Sender<Arc<EventEnvelope>>,
    state: Mutex<BusState>,
    metrics: Option<Arc<EngineMetrics>>,
}

impl BroadcastBus {
    pub fn new(capacity: usize, metrics: Option<Arc<EngineMetrics>>) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self {
            sender,
            state: Mutex::new(BusState {
                seq: 0,
                snapshot: RoundSnapshot::default(),
            }),
            metrics,
        })
    }

    /// Current snapshot
    pub fn snapshot(&self) -> RoundSnapshot {
        self.state.lock().snapshot.clone()
    }

    /// Sequence number of the most recent event
    pub fn last_seq(&self) -> u64 {
        self.state.lock().seq
    }

    /// Subscribe: the first delivery is the snapshot, then every later event
    pub fn subscribe(self: &Arc<Self>) -> BusSubscription {
        let (receiver, snapshot) = self.attach();
        BusSubscription {
            bus: Arc::clone(self),
            last_seq: snapshot.seq,
            receiver,
            pending: Some(Delivery::Snapshot(snapshot)),
        }
    }

    fn attach(&self) -> (broadcast::Receiver<Arc<EventEnvelope>>, RoundSnapshot) {
        let state = self.state.lock();
        (self.sender.subscribe(), state.snapshot.clone())
    }
}

impl RoundEventPublisher for BroadcastBus {
    fn publish(&self, event: RoundEvent) -> u64 {
        let mut state = self.state.lock();
        state.seq += 1;
        let envelope = Arc::new(EventEnvelope {
            seq: state.seq,
            round_id: event.round_id(),
            emitted_at: Utc::now(),
            event,
        });
        state.snapshot.apply(&envelope);

        // No receivers is fine; the snapshot still advanced
        let _ = self.sender.send(Arc::clone(&envelope));
        if let Some(ref metrics) = self.metrics {
            metrics.record_event();
        }
        envelope.seq
    }
}

/// What a subscriber receives next
#[derive(Debug, Clone)]
pub enum Delivery {
    /// Initial state on subscribe
    Snapshot(RoundSnapshot),
    /// Fresh state after falling behind the channel
    Resync(RoundSnapshot),
    Event(Arc<EventEnvelope>),
}

/// One subscriber's ordered, duplicate-free view of the bus
pub struct BusSubscription {
    bus: Arc<BroadcastBus>,
    receiver: broadcast::Receiver<Arc<EventEnvelope>>,
    last_seq: u64,
    pending: Option<Delivery>,
}

impl BusSubscription {
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Wait for the next delivery; `None` once the bus is gone
    pub async fn next(&mut self) -> Option<Delivery> {
        if let Some(pending) = self.pending.take() {
            return Some(pending);
        }
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => {
                    if let Some(delivery) = self.accept(envelope) {
                        return Some(delivery);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => return Some(self.resync(skipped)),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Everything available right now, without waiting
    pub fn drain(&mut self) -> Vec<Delivery> {
        let mut out: Vec<Delivery> = self.pending.take().into_iter().collect();
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) => out.extend(self.accept(envelope)),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => out.push(self.resync(skipped)),
                Err(_) => break,
            }
        }
        out
    }

    fn accept(&mut self, envelope: Arc<EventEnvelope>) -> Option<Delivery> {
        if envelope.seq <= self.last_seq {
            return None;
        }
        self.last_seq = envelope.seq;
        Some(Delivery::Event(envelope))
    }

    fn resync(&mut self, skipped: u64) -> Delivery {
        warn!("Subscriber lagged by {} events; resynchronising from snapshot", skipped);
        let (receiver, snapshot) = self.bus.attach();
        self.receiver = receiver;
        self.last_seq = snapshot.seq;
        debug!("Subscriber resynchronised at seq {}", snapshot.seq);
        Delivery::Resync(snapshot)
    }
}
