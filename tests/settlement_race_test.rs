//! Cashouts racing the crash: every bet settles exactly once

use crash_engine::broadcast::{Delivery, RoundEvent};
use crash_engine::config::EngineConfig;
use crash_engine::crash::{BetStatus, FixedCrashPoints, PlayerId, RoundState, TickOutcome};
use crash_engine::engine::CrashEngine;
use crash_engine::errors::GameError;
use crash_engine::metrics::EngineMetrics;
use crash_engine::money::{Amount, Multiplier};
use crash_engine::wallet::{TransactionKind, WalletLedger};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

const PLAYERS: usize = 32;

fn engine(crash_cents: u64) -> Arc<CrashEngine> {
    Arc::new(
        CrashEngine::with_source(
            EngineConfig::testing(),
            Arc::new(WalletLedger::in_memory()),
            Arc::new(EngineMetrics::new()),
            Arc::new(FixedCrashPoints::always(Multiplier::from_cents(crash_cents))),
        )
        .expect("engine"),
    )
}

fn players() -> Vec<PlayerId> {
    (0..PLAYERS).map(|i| PlayerId::new(format!("player-{}", i))).collect()
}

fn payouts(engine: &CrashEngine, player: &PlayerId) -> Vec<Amount> {
    engine
        .transactions(player)
        .unwrap()
        .into_iter()
        .filter(|tx| tx.kind == TransactionKind::PayoutCredit)
        .map(|tx| tx.amount)
        .collect()
}

#[test]
fn test_cashouts_racing_forced_crash() {
    let engine = engine(10_000);
    let players = players();
    for player in &players {
        engine.place_bet(player, Amount::from_whole(10), "crash", None).unwrap();
    }
    let mut subscription = engine.subscribe();

    let scheduler = engine.scheduler().clone();
    scheduler.start_round().unwrap();
    for _ in 0..10 {
        scheduler.tick().unwrap();
    }

    let barrier = Arc::new(Barrier::new(PLAYERS + 1));
    let mut handles = Vec::new();
    for player in players.clone() {
        let engine = engine.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            (player.clone(), engine.cash_out(&player))
        }));
    }
    let crasher = {
        let scheduler = scheduler.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            barrier.wait();
            scheduler.force_crash()
        })
    };

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    crasher.join().unwrap().unwrap();
    assert_eq!(scheduler.state(), RoundState::Crashed);

    let mut winners = HashSet::new();
    for (player, result) in results {
        match result {
            Ok(receipt) => {
                assert_eq!(
                    engine.balance(&player).unwrap(),
                    Amount::from_whole(990).checked_add(receipt.winnings).unwrap()
                );
                assert_eq!(payouts(&engine, &player), vec![receipt.winnings]);
                winners.insert(player.clone());
            }
            Err(e) => {
                assert!(
                    matches!(e, GameError::StateConflict { .. } | GameError::AlreadySettled { .. }),
                    "unexpected rejection: {}",
                    e
                );
                assert_eq!(engine.balance(&player).unwrap(), Amount::from_whole(990));
                assert!(payouts(&engine, &player).is_empty());
            }
        }
        engine.ledger().verify_replay(&player).unwrap();
    }

    // The broadcast agrees with the wallet: winners settled before the crash
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.bets.len(), PLAYERS);
    for bet in &snapshot.bets {
        let expected = if winners.contains(&bet.player) {
            BetStatus::CashedOut
        } else {
            BetStatus::Lost
        };
        assert_eq!(bet.status, expected, "bet of {}", bet.player);
    }

    let mut crashed_seen = false;
    let mut settled_players = HashSet::new();
    for delivery in subscription.drain() {
        if let Delivery::Event(envelope) = delivery {
            match &envelope.event {
                RoundEvent::Settled { player, .. } => {
                    assert!(!crashed_seen, "settlement published after crash");
                    assert!(settled_players.insert(player.clone()), "settled twice");
                }
                RoundEvent::Crashed { forced, .. } => {
                    assert!(*forced);
                    crashed_seen = true;
                }
                _ => {}
            }
        }
    }
    assert!(crashed_seen);
    assert_eq!(settled_players, winners);
}

#[test]
fn test_auto_and_manual_cashouts_pay_once() {
    let engine = engine(300);
    let players = players();
    for (i, player) in players.iter().enumerate() {
        let auto = (i % 2 == 0).then(|| Multiplier::from_cents(110 + i as u64));
        engine.place_bet(player, Amount::from_whole(10), "crash", auto).unwrap();
    }

    let scheduler = engine.scheduler().clone();
    scheduler.start_round().unwrap();

    let ticker = {
        let scheduler = scheduler.clone();
        thread::spawn(move || loop {
            match scheduler.tick() {
                Ok(TickOutcome::Advanced { .. }) => continue,
                _ => break,
            }
        })
    };
    let cashers: Vec<_> = players
        .iter()
        .cloned()
        .map(|player| {
            let engine = engine.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    match engine.cash_out(&player) {
                        Ok(_) => return,
                        Err(GameError::StateConflict { state: RoundState::Crashed, .. }) => return,
                        Err(GameError::AlreadySettled { .. }) => return,
                        Err(_) => thread::yield_now(),
                    }
                }
            })
        })
        .collect();

    ticker.join().unwrap();
    for casher in cashers {
        casher.join().unwrap();
    }
    assert_eq!(scheduler.state(), RoundState::Crashed);

    let mut paid_out = Amount::ZERO;
    for player in &players {
        let credits = payouts(&engine, player);
        assert!(credits.len() <= 1, "{} paid {} times", player, credits.len());
        paid_out = paid_out.checked_add(credits.into_iter().next().unwrap_or(Amount::ZERO)).unwrap();
        engine.ledger().verify_replay(player).unwrap();
    }

    let summary = engine.history(1).remove(0);
    assert_eq!(summary.bet_count, PLAYERS);
    assert_eq!(summary.cashed_out_count + summary.lost_count, PLAYERS);
    assert_eq!(summary.total_paid_out, paid_out);
}
