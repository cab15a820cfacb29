//! Round scheduler: the single authority that moves a table through
//! WAITING -> RUNNING -> CRASHED -> WAITING.
//!
//! Each transition is a public step method so tests can drive the state
//! machine directly; `spawn` runs the same steps on the configured cadence
//! and `spawn_watchdog` forces progress if the loop stalls.

use crate::broadcast::{RoundEvent, RoundEventPublisher};
use crate::config::EngineConfig;
use crate::crash::clock::MultiplierClock;
use crate::crash::generator::CrashPointSource;
use crate::crash::history::{RoundHistory, RoundSummary};
use crate::crash::registry::BetRegistry;
use crate::crash::round::{Round, RoundCell};
use crate::crash::settlement::SettlementEngine;
use crate::crash::types::{BetReceipt, CashoutReceipt, PlayerId, RoundId, RoundState};
use crate::errors::GameError;
use crate::metrics::EngineMetrics;
use crate::money::{Amount, Multiplier};
use crate::wallet::WalletLedger;
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Result of one clock step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Advanced {
        round_id: RoundId,
        tick: u64,
        multiplier: Multiplier,
    },
    Crashed {
        round_id: RoundId,
        multiplier: Multiplier,
        forced: bool,
    },
    /// The round changed underneath the tick (e.g. a forced crash)
    Idle,
}

/// Transition forced by the watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    ForcedStart(RoundId),
    ForcedCrash(RoundId),
    ForcedReopen(RoundId),
}

pub struct RoundScheduler {
    config: Arc<EngineConfig>,
    clock: MultiplierClock,
    source: Arc<dyn CrashPointSource>,
    round: RoundCell,
    registry: BetRegistry,
    settlement: SettlementEngine,
    ledger: Arc<WalletLedger>,
    publisher: Arc<dyn RoundEventPublisher>,
    history: RoundHistory,
    metrics: Arc<EngineMetrics>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl RoundScheduler {
    /// Create the scheduler with round 1 open for bets
    pub fn new(
        config: Arc<EngineConfig>,
        source: Arc<dyn CrashPointSource>,
        ledger: Arc<WalletLedger>,
        publisher: Arc<dyn RoundEventPublisher>,
        metrics: Arc<EngineMetrics>,
    ) -> Arc<Self> {
        let settlement = SettlementEngine::new(
            ledger.clone(),
            publisher.clone(),
            metrics.clone(),
            config.betting.game_name.clone(),
        );
        let round = Round::waiting(RoundId::new(1), Instant::now());
        let (shutdown, _) = watch::channel(false);

        let scheduler = Arc::new(Self {
            clock: MultiplierClock::new(&config.clock),
            registry: BetRegistry::new(config.betting.clone()),
            history: RoundHistory::new(config.round.history_size),
            round: RwLock::new(round),
            config,
            source,
            settlement,
            ledger,
            publisher,
            metrics,
            running: AtomicBool::new(false),
            shutdown,
        });
        scheduler.announce_waiting(RoundId::new(1));
        scheduler
    }

    pub fn state(&self) -> RoundState {
        self.round.read().state()
    }

    pub fn round_id(&self) -> RoundId {
        self.round.read().id()
    }

    pub fn history(&self) -> &RoundHistory {
        &self.history
    }

    pub fn registry(&self) -> &BetRegistry {
        &self.registry
    }

    pub fn clock(&self) -> &MultiplierClock {
        &self.clock
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Place a bet for the round currently taking bets
    pub fn place_bet(
        &self,
        player: &PlayerId,
        stake: Amount,
        auto_cashout: Option<Multiplier>,
    ) -> Result<BetReceipt, GameError> {
        let result = self.place_bet_inner(player, stake, auto_cashout);
        match result {
            Ok(ref receipt) => {
                self.metrics.record_bet(stake);
                debug!(
                    "🎟️ Bet {} from {} for {} in round {}",
                    receipt.bet.id, player, stake, receipt.bet.round_id
                );
            }
            Err(ref e) => {
                self.metrics.record_bet_rejected();
                debug!("Bet from {} rejected: {}", player, e);
            }
        }
        result
    }

    fn place_bet_inner(
        &self,
        player: &PlayerId,
        stake: Amount,
        auto_cashout: Option<Multiplier>,
    ) -> Result<BetReceipt, GameError> {
        self.registry.validate(stake, auto_cashout)?;

        // Held across placement so the round cannot start halfway through
        let round = self.round.read();
        round.require(RoundState::Waiting, "place a bet")?;
        let (slot, tx) = self
            .registry
            .place(&self.ledger, round.id(), player, stake, auto_cashout)?;
        self.publisher.publish(RoundEvent::BetPlaced {
            round_id: slot.round_id,
            bet_id: slot.id,
            player: slot.player.clone(),
            stake: slot.stake,
            auto_cashout: slot.auto_cashout,
        });
        drop(round);

        Ok(BetReceipt {
            bet: slot.to_bet(),
            new_balance: tx.balance_after,
            transaction_id: tx.id,
        })
    }

    /// Cash out the player's open bet at the current multiplier
    pub fn cash_out(&self, player: &PlayerId) -> Result<CashoutReceipt, GameError> {
        let result = self.settlement.try_cashout(&self.round, &self.registry, player);
        if let Err(ref e) = result {
            debug!("Cashout from {} rejected: {}", player, e);
        }
        result
    }

    /// WAITING -> RUNNING
    pub fn start_round(&self) -> Result<RoundId, GameError> {
        let mut round = self.round.write();
        round.require(RoundState::Waiting, "start the round")?;

        let crash_point = self.source.next_crash_point();
        let participants = self.registry.all();
        let bet_count = participants.len();
        let now = Instant::now();
        round.start(crash_point, participants, now)?;

        let round_id = round.id();
        self.publisher.publish(RoundEvent::RoundStarted {
            round_id,
            started_at: round.started_at().unwrap_or_else(Utc::now),
            bet_count,
        });
        self.metrics.record_round_started();
        info!("🚀 Round {} started with {} bets", round_id, bet_count);

        // Nothing can be won below the starting multiplier
        if crash_point <= Multiplier::ONE {
            self.crash_locked(&mut round, crash_point, false, now);
        }

        Ok(round_id)
    }

    /// Advance the clock one tick, paying due auto-cashouts first
    pub fn tick(&self) -> Result<TickOutcome, GameError> {
        let (round_id, current, crash_point) = {
            let round = self.round.read();
            round.require(RoundState::Running, "advance the multiplier")?;
            (
                round.id(),
                round.multiplier().unwrap_or(Multiplier::ONE),
                round.crash_point().unwrap_or(Multiplier::ONE),
            )
        };

        let next = self.clock.advance(current);
        self.settlement.run_auto_cashouts(&self.round, round_id, next);

        let mut round = self.round.write();
        if round.state() != RoundState::Running || round.id() != round_id {
            return Ok(TickOutcome::Idle);
        }
        let now = Instant::now();

        if next >= crash_point {
            self.crash_locked(&mut round, crash_point, false, now);
            return Ok(TickOutcome::Crashed {
                round_id,
                multiplier: crash_point,
                forced: false,
            });
        }

        let tick = round.advance(next, now)?;
        let shown = next.truncate_cents();
        self.publisher.publish(RoundEvent::Tick {
            round_id,
            tick,
            multiplier: shown,
        });
        trace!("Round {} tick {} at {}x", round_id, tick, next);

        if tick >= self.config.round.max_round_ticks {
            warn!(
                "⚠️ Round {} reached the {} tick cap; forcing crash at {}x",
                round_id, self.config.round.max_round_ticks, shown
            );
            self.crash_locked(&mut round, shown, true, now);
            return Ok(TickOutcome::Crashed {
                round_id,
                multiplier: shown,
                forced: true,
            });
        }

        Ok(TickOutcome::Advanced {
            round_id,
            tick,
            multiplier: next,
        })
    }

    /// RUNNING -> CRASHED at the current multiplier
    pub fn force_crash(&self) -> Result<RoundId, GameError> {
        let mut round = self.round.write();
        round.require(RoundState::Running, "force a crash")?;
        let at = round.multiplier().unwrap_or(Multiplier::ONE).truncate_cents();
        let round_id = round.id();
        self.crash_locked(&mut round, at, true, Instant::now());
        Ok(round_id)
    }

    /// CRASHED -> WAITING for the next round
    pub fn end_cooldown(&self) -> Result<RoundId, GameError> {
        let mut round = self.round.write();
        round.require(RoundState::Crashed, "open betting")?;

        self.registry.clear();
        *round = round.successor(Instant::now());
        let round_id = round.id();
        self.announce_waiting(round_id);
        info!("🎲 Round {} open for bets", round_id);
        Ok(round_id)
    }

    /// Force a stuck state machine forward. `now` is injectable for tests.
    pub fn check_watchdog(&self, now: Instant) -> Option<WatchdogAction> {
        let (state, round_id, idle) = {
            let round = self.round.read();
            (round.state(), round.id(), round.since_progress(now))
        };
        let stall = self.config.stall_timeout();

        match state {
            RoundState::Running if idle > stall => {
                warn!("⚠️ Round {} has not ticked for {:?}; forcing crash", round_id, idle);
                self.force_crash().ok().map(WatchdogAction::ForcedCrash)
            }
            RoundState::Waiting if idle > self.config.waiting_duration() + stall => {
                warn!("⚠️ Round {} waited {:?} without starting; forcing start", round_id, idle);
                let started = self.start_round().ok()?;
                self.metrics.record_forced_transition();
                Some(WatchdogAction::ForcedStart(started))
            }
            RoundState::Crashed if idle > self.config.cooldown_duration() + stall => {
                warn!("⚠️ Round {} stuck in cooldown for {:?}; reopening betting", round_id, idle);
                let reopened = self.end_cooldown().ok()?;
                self.metrics.record_forced_transition();
                Some(WatchdogAction::ForcedReopen(reopened))
            }
            _ => None,
        }
    }

    /// Run the state machine on the configured cadence until `stop`
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run().await })
    }

    pub fn spawn_watchdog(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown = scheduler.shutdown.subscribe();
            let mut interval = tokio::time::interval(scheduler.config.watchdog_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while scheduler.running.load(Ordering::SeqCst) {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => {
                        if let Some(action) = scheduler.check_watchdog(Instant::now()) {
                            debug!("Watchdog intervened: {:?}", action);
                        }
                    }
                }
            }
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(true);
    }

    async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("🎰 Round scheduler running (tick every {:?})", self.config.tick_interval());

        while self.running.load(Ordering::SeqCst) {
            let (state, idle) = {
                let round = self.round.read();
                (round.state(), round.since_progress(Instant::now()))
            };

            match state {
                RoundState::Waiting => {
                    let remaining = self.config.waiting_duration().saturating_sub(idle);
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(remaining) => {}
                    }
                    if let Err(e) = self.start_round() {
                        debug!("Round start skipped: {}", e);
                    }
                    ticker.reset();
                }
                RoundState::Running => {
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        _ = ticker.tick() => {}
                    }
                    if let Err(e) = self.tick() {
                        debug!("Tick skipped: {}", e);
                    }
                }
                RoundState::Crashed => {
                    let remaining = self.config.cooldown_duration().saturating_sub(idle);
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(remaining) => {}
                    }
                    if let Err(e) = self.end_cooldown() {
                        debug!("Cooldown end skipped: {}", e);
                    }
                }
            }
        }

        info!("🛑 Round scheduler stopped");
    }

    fn announce_waiting(&self, round_id: RoundId) {
        let window = chrono::Duration::from_std(self.config.waiting_duration())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.publisher.publish(RoundEvent::RoundWaiting {
            round_id,
            betting_closes_at: Utc::now() + window,
        });
    }

    /// RUNNING -> CRASHED with the round write lock held.
    ///
    /// Remaining open bets are lost before `Crashed` is published, so any
    /// cashout that won its race has already published `Settled`.
    fn crash_locked(&self, round: &mut Round, final_multiplier: Multiplier, forced: bool, now: Instant) {
        if let Err(e) = round.crash(final_multiplier, forced, now) {
            warn!("Crash transition rejected: {}", e);
            return;
        }
        let round_id = round.id();
        let crash_point = round.crash_point().unwrap_or(final_multiplier);
        let lost = self.settlement.settle_crash(round.participants());

        if !forced {
            self.publisher.publish(RoundEvent::Tick {
                round_id,
                tick: round.tick(),
                multiplier: final_multiplier,
            });
        }
        self.publisher.publish(RoundEvent::Crashed {
            round_id,
            crash_point,
            multiplier: final_multiplier,
            tick: round.tick(),
            forced,
        });

        if let Some(summary) = RoundSummary::from_round(round) {
            self.history.push(summary);
        }
        self.metrics.record_round_crashed(lost.len() as u64);
        if forced {
            self.metrics.record_forced_transition();
        }
        info!(
            "💥 Round {} crashed at {}x after {} ticks ({} bets lost{})",
            round_id,
            final_multiplier,
            round.tick(),
            lost.len(),
            if forced { ", forced" } else { "" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{BroadcastBus, Delivery};
    use crate::crash::generator::FixedCrashPoints;
    use std::time::Duration;

    fn scheduler_with(points: &[u64]) -> (Arc<RoundScheduler>, Arc<BroadcastBus>, Arc<WalletLedger>) {
        let config = Arc::new(EngineConfig::testing());
        let metrics = Arc::new(EngineMetrics::new());
        let bus = BroadcastBus::new(4096, Some(metrics.clone()));
        let ledger = Arc::new(WalletLedger::in_memory());
        let source = Arc::new(FixedCrashPoints::new(points.iter().map(|c| Multiplier::from_cents(*c))));
        let scheduler = RoundScheduler::new(config, source, ledger.clone(), bus.clone(), metrics);
        (scheduler, bus, ledger)
    }

    fn run_to_crash(scheduler: &RoundScheduler) -> TickOutcome {
        for _ in 0..10_000 {
            match scheduler.tick().unwrap() {
                TickOutcome::Advanced { .. } => continue,
                other => return other,
            }
        }
        panic!("round never crashed");
    }

    #[test]
    fn test_state_machine_cycle() {
        let (scheduler, bus, _) = scheduler_with(&[150]);
        assert_eq!(scheduler.state(), RoundState::Waiting);

        assert_eq!(scheduler.start_round().unwrap(), RoundId::new(1));
        assert_eq!(scheduler.state(), RoundState::Running);
        assert!(scheduler.start_round().is_err());

        let outcome = run_to_crash(&scheduler);
        assert_eq!(
            outcome,
            TickOutcome::Crashed {
                round_id: RoundId::new(1),
                multiplier: Multiplier::from_cents(150),
                forced: false
            }
        );
        assert!(matches!(scheduler.tick(), Err(GameError::StateConflict { .. })));

        assert_eq!(scheduler.end_cooldown().unwrap(), RoundId::new(2));
        assert_eq!(scheduler.state(), RoundState::Waiting);
        assert_eq!(bus.snapshot().round_id, RoundId::new(2));
        assert_eq!(scheduler.history().len(), 1);
    }

    #[test]
    fn test_ticks_follow_the_clock() {
        let (scheduler, bus, _) = scheduler_with(&[500]);
        let mut sub = bus.subscribe();
        scheduler.start_round().unwrap();
        for _ in 0..5 {
            scheduler.tick().unwrap();
        }

        let ticks: Vec<(u64, Multiplier)> = sub
            .drain()
            .into_iter()
            .filter_map(|d| match d {
                Delivery::Event(e) => match e.event {
                    RoundEvent::Tick { tick, multiplier, .. } => Some((tick, multiplier)),
                    _ => None,
                },
                _ => None,
            })
            .collect();
        let clock = scheduler.clock();
        let expected: Vec<(u64, Multiplier)> = (1..=5).map(|t| (t, clock.value_at(t).truncate_cents())).collect();
        assert_eq!(ticks, expected);
    }

    #[test]
    fn test_instant_crash_at_one() {
        let (scheduler, bus, _) = scheduler_with(&[100]);
        scheduler.start_round().unwrap();
        assert_eq!(scheduler.state(), RoundState::Crashed);
        assert_eq!(bus.snapshot().crash_point, Some(Multiplier::ONE));
    }

    #[test]
    fn test_tick_cap_forces_crash() {
        let config = EngineConfig {
            round: crate::config::RoundConfig {
                max_round_ticks: 3,
                ..EngineConfig::testing().round
            },
            ..EngineConfig::testing()
        };
        let metrics = Arc::new(EngineMetrics::new());
        let bus = BroadcastBus::new(64, None);
        let scheduler = RoundScheduler::new(
            Arc::new(config),
            Arc::new(FixedCrashPoints::always(Multiplier::from_cents(90_000))),
            Arc::new(WalletLedger::in_memory()),
            bus.clone(),
            metrics,
        );
        scheduler.start_round().unwrap();
        scheduler.tick().unwrap();
        scheduler.tick().unwrap();
        match scheduler.tick().unwrap() {
            TickOutcome::Crashed { forced, .. } => assert!(forced),
            other => panic!("Expected forced crash, got {:?}", other),
        }
        let snapshot = bus.snapshot();
        assert!(snapshot.forced);
        assert_eq!(snapshot.crash_point, Some(Multiplier::from_cents(90_000)));
        assert_eq!(snapshot.multiplier, Some(scheduler.clock().value_at(3).truncate_cents()));
    }

    #[test]
    fn test_watchdog_forces_each_transition() {
        let (scheduler, _, _) = scheduler_with(&[50_000]);
        let now = Instant::now();
        assert_eq!(scheduler.check_watchdog(now), None);

        let later = now + Duration::from_secs(60);
        assert_eq!(scheduler.check_watchdog(later), Some(WatchdogAction::ForcedStart(RoundId::new(1))));

        let later = Instant::now() + Duration::from_secs(60);
        assert_eq!(scheduler.check_watchdog(later), Some(WatchdogAction::ForcedCrash(RoundId::new(1))));
        assert_eq!(scheduler.state(), RoundState::Crashed);

        let later = Instant::now() + Duration::from_secs(60);
        assert_eq!(scheduler.check_watchdog(later), Some(WatchdogAction::ForcedReopen(RoundId::new(2))));
        assert_eq!(scheduler.state(), RoundState::Waiting);
    }

    #[test]
    fn test_bets_only_while_waiting() {
        let (scheduler, _, ledger) = scheduler_with(&[300]);
        let player = PlayerId::new("alice");
        ledger.open_account(&player, Amount::from_whole(500)).unwrap();

        scheduler.start_round().unwrap();
        let err = scheduler.place_bet(&player, Amount::from_whole(10), None).unwrap_err();
        assert!(matches!(err, GameError::StateConflict { state: RoundState::Running, .. }));
        assert_eq!(ledger.balance(&player).unwrap(), Amount::from_whole(500));
    }

    #[tokio::test]
    async fn test_spawned_loop_cycles_rounds() {
        let (scheduler, bus, _) = scheduler_with(&[105]);
        let mut sub = bus.subscribe();
        let handle = scheduler.spawn();
        let watchdog = scheduler.spawn_watchdog();

        let mut crashed = 0;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while crashed < 2 {
            let delivery = tokio::time::timeout_at(deadline, sub.next())
                .await
                .expect("rounds should keep cycling")
                .expect("bus open");
            if let Delivery::Event(e) = delivery {
                if matches!(e.event, RoundEvent::Crashed { .. }) {
                    crashed += 1;
                }
            }
        }

        scheduler.stop();
        handle.await.unwrap();
        watchdog.await.unwrap();
        assert!(!scheduler.is_running());
        assert!(scheduler.history().len() >= 2);
    }
}
