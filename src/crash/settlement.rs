//! Bet settlement
//!
//! Every bet is settled exactly once. Cashouts and the crash sweep both
//! take the bet's status lock before deciding; the first to get it wins and
//! the other observes the bet as already settled. A cashout credits the
//! wallet and publishes its `Settled` event before releasing that lock, so
//! the crash sweep (which runs before `Crashed` is published) always orders
//! after any cashout that beat it.

use crate::broadcast::{RoundEvent, RoundEventPublisher};
use crate::crash::registry::{BetRegistry, BetSlot, SlotStatus};
use crate::crash::round::RoundCell;
use crate::crash::types::{BetId, CashoutKind, CashoutReceipt, PlayerId, RoundId, RoundState};
use crate::errors::{GameError, LedgerError};
use crate::metrics::EngineMetrics;
use crate::money::Multiplier;
use crate::wallet::{TransactionContext, WalletLedger};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SettlementEngine {
    ledger: Arc<WalletLedger>,
    publisher: Arc<dyn RoundEventPublisher>,
    metrics: Arc<EngineMetrics>,
    game_name: String,
}

impl SettlementEngine {
    pub fn new(
        ledger: Arc<WalletLedger>,
        publisher: Arc<dyn RoundEventPublisher>,
        metrics: Arc<EngineMetrics>,
        game_name: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            publisher,
            metrics,
            game_name: game_name.into(),
        }
    }

    /// Manual cashout at the multiplier currently shown to clients
    pub fn try_cashout(
        &self,
        round: &RoundCell,
        registry: &BetRegistry,
        player: &PlayerId,
    ) -> Result<CashoutReceipt, GameError> {
        let (round_id, multiplier) = {
            let round = round.read();
            round.require(RoundState::Running, "cash out")?;
            let current = round.multiplier().unwrap_or(Multiplier::ONE);
            (round.id(), current.truncate_cents())
        };

        let slot = registry
            .get(player)
            .filter(|slot| slot.round_id == round_id)
            .ok_or_else(|| GameError::BetNotFound {
                player: player.clone(),
                round_id,
            })?;

        self.cash_out(&slot, multiplier, CashoutKind::Manual)
    }

    /// Settle one bet as cashed out at `multiplier`.
    ///
    /// If the wallet credit fails the bet stays open and nothing is published.
    pub fn cash_out(
        &self,
        slot: &BetSlot,
        multiplier: Multiplier,
        kind: CashoutKind,
    ) -> Result<CashoutReceipt, GameError> {
        let mut status = slot.lock_status();
        if *status != SlotStatus::Open {
            self.metrics.record_race_lost();
            debug!("Cashout for bet {} lost the race: {:?}", slot.id, *status);
            return Err(GameError::AlreadySettled { bet_id: slot.id });
        }

        let winnings = slot
            .stake
            .apply(multiplier)
            .ok_or_else(|| GameError::Ledger(LedgerError::Overflow(slot.player.clone())))?;

        let tx = self.ledger.credit(
            &slot.player,
            winnings,
            TransactionContext {
                bet_id: slot.id,
                round_id: slot.round_id,
                description: format!("Cashout at {}x on {}", multiplier, self.game_name),
            },
        )?;

        *status = SlotStatus::CashedOut {
            multiplier,
            payout: winnings,
        };
        self.publisher.publish(RoundEvent::Settled {
            round_id: slot.round_id,
            bet_id: slot.id,
            player: slot.player.clone(),
            multiplier,
            payout: winnings,
            kind,
        });
        drop(status);

        self.metrics.record_cashout(winnings, kind == CashoutKind::Auto);
        debug!(
            "💸 Bet {} of {} cashed out at {}x for {} ({:?})",
            slot.id, slot.player, multiplier, winnings, kind
        );

        Ok(CashoutReceipt {
            bet_id: slot.id,
            round_id: slot.round_id,
            player: slot.player.clone(),
            kind,
            multiplier,
            winnings,
            new_balance: tx.balance_after,
            transaction_id: tx.id,
        })
    }

    /// Cash out every open bet whose threshold the clock has reached,
    /// paying exactly the threshold. `reached` is capped at the crash point,
    /// so a threshold equal to the crash point still pays on the crash tick.
    ///
    /// The round read lock is held for the whole sweep. A crash that lands
    /// first leaves nothing to pay; one that lands later waits for the sweep.
    pub fn run_auto_cashouts(
        &self,
        round: &RoundCell,
        round_id: RoundId,
        reached: Multiplier,
    ) -> Vec<CashoutReceipt> {
        let round = round.read();
        if round.state() != RoundState::Running || round.id() != round_id {
            debug!("Skipping auto-cashouts for round {}: no longer running", round_id);
            return Vec::new();
        }
        let crash_point = round.crash_point().unwrap_or(Multiplier::ONE);
        let reached = reached.min(crash_point);

        round
            .participants()
            .iter()
            .filter(|slot| slot.is_open())
            .filter_map(|slot| {
                let threshold = slot.auto_cashout?;
                if threshold > reached {
                    return None;
                }
                match self.cash_out(slot, threshold, CashoutKind::Auto) {
                    Ok(receipt) => Some(receipt),
                    Err(GameError::AlreadySettled { .. }) => None,
                    Err(e) => {
                        warn!("Auto-cashout for bet {} failed: {}", slot.id, e);
                        None
                    }
                }
            })
            .collect()
    }

    /// Mark every bet still open as lost. Returns the ids that were lost.
    pub fn settle_crash(&self, participants: &[Arc<BetSlot>]) -> Vec<BetId> {
        let mut lost = Vec::new();
        for slot in participants {
            let mut status = slot.lock_status();
            if *status == SlotStatus::Open {
                *status = SlotStatus::Lost;
                lost.push(slot.id);
            }
        }
        if !lost.is_empty() {
            debug!("{} open bets lost at crash", lost.len());
        }
        lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::BroadcastBus;
    use crate::config::BettingConfig;
    use crate::crash::round::Round;
    use crate::errors::StorageError;
    use crate::money::Amount;
    use crate::wallet::{JournalRecord, LedgerJournal};
    use parking_lot::RwLock;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    /// Journal whose transaction appends fail while `failing` is set
    #[derive(Default)]
    struct FlakyJournal {
        failing: AtomicBool,
    }

    impl LedgerJournal for FlakyJournal {
        fn append(&self, record: &JournalRecord) -> Result<(), StorageError> {
            match record {
                JournalRecord::Transaction(_) if self.failing.load(Ordering::SeqCst) => {
                    Err(StorageError::WriteFailed("disk full".to_string()))
                }
                _ => Ok(()),
            }
        }
    }

    struct Fixture {
        ledger: Arc<WalletLedger>,
        registry: BetRegistry,
        round: RoundCell,
        engine: SettlementEngine,
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(WalletLedger::in_memory()))
    }

    fn fixture_with(ledger: Arc<WalletLedger>) -> Fixture {
        let bus = BroadcastBus::new(64, None);
        let engine = SettlementEngine::new(ledger.clone(), bus, Arc::new(EngineMetrics::new()), "crash");
        Fixture {
            ledger,
            registry: BetRegistry::new(BettingConfig::default()),
            round: RwLock::new(Round::waiting(RoundId::new(1), Instant::now())),
            engine,
        }
    }

    fn bet(f: &Fixture, name: &str, stake: u64, auto: Option<u64>) -> Arc<BetSlot> {
        let player = PlayerId::new(name);
        f.ledger.open_account(&player, Amount::from_whole(1_000)).unwrap();
        f.registry
            .place(&f.ledger, RoundId::new(1), &player, Amount::from_whole(stake), auto.map(Multiplier::from_cents))
            .unwrap()
            .0
    }

    fn bet_existing(f: &Fixture, player: &PlayerId, stake: u64) -> Arc<BetSlot> {
        f.registry
            .place(&f.ledger, RoundId::new(1), player, Amount::from_whole(stake), None)
            .unwrap()
            .0
    }

    fn start(f: &Fixture, crash_cents: u64) {
        f.round
            .write()
            .start(Multiplier::from_cents(crash_cents), f.registry.all(), Instant::now())
            .unwrap();
    }

    #[test]
    fn test_cashout_requires_running_round() {
        let f = fixture();
        bet(&f, "alice", 100, None);
        let err = f.engine.try_cashout(&f.round, &f.registry, &PlayerId::new("alice")).unwrap_err();
        assert!(matches!(err, GameError::StateConflict { state: RoundState::Waiting, .. }));
    }

    #[test]
    fn test_cashout_without_bet() {
        let f = fixture();
        start(&f, 300);
        let err = f.engine.try_cashout(&f.round, &f.registry, &PlayerId::new("nobody")).unwrap_err();
        assert_eq!(err.code(), "BET_NOT_FOUND");
    }

    #[test]
    fn test_manual_cashout_pays_displayed_multiplier() {
        let f = fixture();
        bet(&f, "alice", 100, None);
        start(&f, 300);
        f.round
            .write()
            .advance(Multiplier::from_micros(1_534_999), Instant::now())
            .unwrap();

        let receipt = f.engine.try_cashout(&f.round, &f.registry, &PlayerId::new("alice")).unwrap();
        assert_eq!(receipt.multiplier, Multiplier::from_cents(153));
        assert_eq!(receipt.winnings, Amount::from_whole(153));
        assert_eq!(receipt.new_balance, Amount::from_whole(1_053));

        // Second attempt loses to the first
        let err = f.engine.try_cashout(&f.round, &f.registry, &PlayerId::new("alice")).unwrap_err();
        assert_eq!(err.code(), "ALREADY_SETTLED");
    }

    #[test]
    fn test_auto_cashout_pays_threshold_not_overshoot() {
        let f = fixture();
        let slot = bet(&f, "bob", 100, Some(200));
        let at_crash = bet(&f, "carol", 100, Some(250));
        let above_crash = bet(&f, "dave", 100, Some(300));
        start(&f, 250);

        let receipts = f.engine.run_auto_cashouts(&f.round, RoundId::new(1), Multiplier::from_micros(2_031_000));
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].bet_id, slot.id);
        assert_eq!(receipts[0].multiplier, Multiplier::from_cents(200));
        assert_eq!(receipts[0].winnings, Amount::from_whole(200));

        // The crash tick overshoots; payment stops at the crash point
        let receipts = f.engine.run_auto_cashouts(&f.round, RoundId::new(1), Multiplier::from_cents(275));
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].bet_id, at_crash.id);
        assert_eq!(receipts[0].multiplier, Multiplier::from_cents(250));
        assert_eq!(receipts[0].winnings, Amount::from_whole(250));
        assert!(above_crash.is_open());
    }

    #[test]
    fn test_auto_cashout_skips_crashed_round() {
        let f = fixture();
        let slot = bet(&f, "frank", 100, Some(110));
        start(&f, 500);
        f.round
            .write()
            .crash(Multiplier::from_cents(105), true, Instant::now())
            .unwrap();

        let receipts = f.engine.run_auto_cashouts(&f.round, RoundId::new(1), Multiplier::from_cents(120));
        assert!(receipts.is_empty());
        assert!(slot.is_open());
        assert_eq!(f.ledger.balance(&slot.player).unwrap(), Amount::from_whole(900));

        // A sweep addressed to another round is ignored as well
        let f = fixture();
        bet(&f, "gina", 100, Some(110));
        start(&f, 500);
        assert!(f
            .engine
            .run_auto_cashouts(&f.round, RoundId::new(2), Multiplier::from_cents(120))
            .is_empty());
    }

    #[test]
    fn test_journal_failure_leaves_wallet_and_bet_untouched() {
        let journal = Arc::new(FlakyJournal::default());
        let f = fixture_with(Arc::new(WalletLedger::new(journal.clone())));
        let player = PlayerId::new("hank");
        f.ledger.open_account(&player, Amount::from_whole(1_000)).unwrap();

        journal.failing.store(true, Ordering::SeqCst);
        let err = f
            .registry
            .place(&f.ledger, RoundId::new(1), &player, Amount::from_whole(100), None)
            .unwrap_err();
        assert_eq!(err.code(), "LEDGER_FAILURE");
        assert_eq!(f.ledger.balance(&player).unwrap(), Amount::from_whole(1_000));
        assert!(f.registry.is_empty());

        journal.failing.store(false, Ordering::SeqCst);
        let slot = bet_existing(&f, &player, 100);
        start(&f, 300);
        f.round
            .write()
            .advance(Multiplier::from_cents(150), Instant::now())
            .unwrap();

        journal.failing.store(true, Ordering::SeqCst);
        let err = f.engine.try_cashout(&f.round, &f.registry, &player).unwrap_err();
        assert_eq!(err.code(), "LEDGER_FAILURE");
        assert_eq!(f.ledger.balance(&player).unwrap(), Amount::from_whole(900));
        assert!(slot.is_open());

        let lost = f.engine.settle_crash(&f.registry.all());
        assert_eq!(lost, vec![slot.id]);
        assert_eq!(slot.status(), SlotStatus::Lost);
        assert_eq!(f.ledger.balance(&player).unwrap(), Amount::from_whole(900));
    }

    #[test]
    fn test_crash_sweep_settles_remaining_bets_once() {
        let f = fixture();
        let winner = bet(&f, "dave", 50, None);
        let loser = bet(&f, "erin", 50, None);
        start(&f, 120);

        f.engine.cash_out(&winner, Multiplier::from_cents(110), CashoutKind::Manual).unwrap();
        let lost = f.engine.settle_crash(&f.registry.all());
        assert_eq!(lost, vec![loser.id]);
        assert_eq!(loser.status(), SlotStatus::Lost);

        // A cashout after the sweep never credits
        let before = f.ledger.balance(&loser.player).unwrap();
        assert!(f.engine.cash_out(&loser, Multiplier::from_cents(110), CashoutKind::Manual).is_err());
        assert_eq!(f.ledger.balance(&loser.player).unwrap(), before);
        assert!(f.engine.settle_crash(&f.registry.all()).is_empty());
    }
}
