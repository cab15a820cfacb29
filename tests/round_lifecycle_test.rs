//! End-to-end round lifecycle against the wallet ledger

use crash_engine::broadcast::{Delivery, RoundEvent};
use crash_engine::config::EngineConfig;
use crash_engine::crash::{BetStatus, FixedCrashPoints, PlayerId, RoundState, TickOutcome};
use crash_engine::engine::CrashEngine;
use crash_engine::metrics::EngineMetrics;
use crash_engine::money::{Amount, Multiplier};
use crash_engine::wallet::{read_journal, FileJournal, TransactionKind, WalletLedger};
use std::sync::Arc;
use std::time::Duration;

fn engine_with(points: &[u64], ledger: Arc<WalletLedger>) -> CrashEngine {
    CrashEngine::with_source(
        EngineConfig::testing(),
        ledger,
        Arc::new(EngineMetrics::new()),
        Arc::new(FixedCrashPoints::new(points.iter().map(|c| Multiplier::from_cents(*c)))),
    )
    .expect("engine")
}

fn run_round(engine: &CrashEngine) {
    let scheduler = engine.scheduler();
    scheduler.start_round().expect("start");
    while scheduler.state() == RoundState::Running {
        scheduler.tick().expect("tick");
    }
}

#[test]
fn test_auto_cashout_pays_threshold() {
    let engine = engine_with(&[250], Arc::new(WalletLedger::in_memory()));
    let player = PlayerId::new("alice");

    let receipt = engine
        .place_bet(&player, Amount::from_whole(100), "crash", Some(Multiplier::from_cents(200)))
        .expect("bet accepted");
    assert_eq!(receipt.new_balance, Amount::from_whole(900));

    run_round(&engine);

    assert_eq!(engine.balance(&player).unwrap(), Amount::from_whole(1_100));
    let transactions = engine.transactions(&player).unwrap();
    assert_eq!(transactions.len(), 2);
    assert_eq!(transactions[1].kind, TransactionKind::PayoutCredit);
    assert_eq!(transactions[1].amount, Amount::from_whole(200));
    assert_eq!(transactions[1].description, "Cashout at 2.00x on crash");

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.state, RoundState::Crashed);
    assert_eq!(snapshot.crash_point, Some(Multiplier::from_cents(250)));
    assert_eq!(snapshot.bets[0].status, BetStatus::CashedOut);
    assert_eq!(snapshot.bets[0].payout, Some(Amount::from_whole(200)));
    engine.ledger().verify_replay(&player).unwrap();
}

#[test]
fn test_auto_cashout_at_crash_point_pays() {
    let engine = engine_with(&[200], Arc::new(WalletLedger::in_memory()));
    let player = PlayerId::new("ivan");

    engine
        .place_bet(&player, Amount::from_whole(100), "crash", Some(Multiplier::from_cents(200)))
        .expect("bet accepted");
    run_round(&engine);

    assert_eq!(engine.balance(&player).unwrap(), Amount::from_whole(1_100));
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.crash_point, Some(Multiplier::from_cents(200)));
    assert_eq!(snapshot.bets[0].status, BetStatus::CashedOut);
    assert_eq!(snapshot.bets[0].payout, Some(Amount::from_whole(200)));
}

#[test]
fn test_bet_without_cashout_is_lost() {
    let engine = engine_with(&[120], Arc::new(WalletLedger::in_memory()));
    let player = PlayerId::new("bob");
    engine.place_bet(&player, Amount::from_whole(50), "crash", None).unwrap();

    run_round(&engine);

    assert_eq!(engine.balance(&player).unwrap(), Amount::from_whole(950));
    assert_eq!(engine.transactions(&player).unwrap().len(), 1);
    assert_eq!(engine.snapshot().bets[0].status, BetStatus::Lost);

    let summary = &engine.history(1)[0];
    assert_eq!(summary.lost_count, 1);
    assert_eq!(summary.total_staked, Amount::from_whole(50));
    assert_eq!(summary.total_paid_out, Amount::ZERO);
}

#[test]
fn test_duplicate_bet_debits_once() {
    let engine = engine_with(&[300], Arc::new(WalletLedger::in_memory()));
    let player = PlayerId::new("carol");
    engine.place_bet(&player, Amount::from_whole(100), "crash", None).unwrap();

    let err = engine
        .place_bet(&player, Amount::from_whole(100), "crash", None)
        .unwrap_err();
    assert_eq!(err.code(), "DUPLICATE_BET");
    assert_eq!(engine.balance(&player).unwrap(), Amount::from_whole(900));
    assert_eq!(engine.scheduler().registry().len(), 1);
}

#[test]
fn test_cashout_after_crash_is_rejected() {
    let engine = engine_with(&[110], Arc::new(WalletLedger::in_memory()));
    let player = PlayerId::new("dave");
    engine.place_bet(&player, Amount::from_whole(20), "crash", None).unwrap();
    run_round(&engine);

    let err = engine.cash_out(&player).unwrap_err();
    assert_eq!(err.code(), "STATE_CONFLICT");
    assert_eq!(engine.balance(&player).unwrap(), Amount::from_whole(980));
}

#[test]
fn test_rejections_leave_wallet_untouched() {
    let engine = engine_with(&[300], Arc::new(WalletLedger::in_memory()));
    let player = PlayerId::new("erin");

    let err = engine.place_bet(&player, Amount::from_whole(5), "crash", None).unwrap_err();
    assert_eq!(err.code(), "INVALID_STAKE");
    let err = engine
        .place_bet(&player, Amount::from_whole(10), "crash", Some(Multiplier::ONE))
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_AUTO_CASHOUT");
    let err = engine.place_bet(&player, Amount::from_whole(5_000), "crash", None).unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_BALANCE");

    assert_eq!(engine.balance(&player).unwrap(), Amount::from_whole(1_000));
    assert!(engine.transactions(&player).unwrap().is_empty());
}

#[test]
fn test_manual_cashout_mid_round() {
    let engine = engine_with(&[500], Arc::new(WalletLedger::in_memory()));
    let player = PlayerId::new("frank");
    engine.place_bet(&player, Amount::from_whole(100), "crash", None).unwrap();

    let scheduler = engine.scheduler();
    scheduler.start_round().unwrap();
    let mut last = Multiplier::ONE;
    for _ in 0..20 {
        if let TickOutcome::Advanced { multiplier, .. } = scheduler.tick().unwrap() {
            last = multiplier;
        }
    }

    let receipt = engine.cash_out(&player).unwrap();
    assert_eq!(receipt.multiplier, last.truncate_cents());
    assert_eq!(receipt.winnings, Amount::from_whole(100).apply(last.truncate_cents()).unwrap());
    assert_eq!(engine.cash_out(&player).unwrap_err().code(), "ALREADY_SETTLED");
}

#[test]
fn test_event_order_for_one_round() {
    let engine = engine_with(&[130], Arc::new(WalletLedger::in_memory()));
    let mut subscription = engine.subscribe();
    engine
        .place_bet(&PlayerId::new("gina"), Amount::from_whole(10), "crash", Some(Multiplier::from_cents(110)))
        .unwrap();
    engine.place_bet(&PlayerId::new("hank"), Amount::from_whole(10), "crash", None).unwrap();
    run_round(&engine);
    engine.scheduler().end_cooldown().unwrap();

    let deliveries = subscription.drain();
    assert!(matches!(deliveries[0], Delivery::Snapshot(_)));

    let envelopes: Vec<_> = deliveries
        .into_iter()
        .filter_map(|d| match d {
            Delivery::Event(e) => Some(e),
            _ => None,
        })
        .collect();
    for pair in envelopes.windows(2) {
        assert_eq!(pair[1].seq, pair[0].seq + 1);
    }

    let position = |kind: &str| {
        envelopes
            .iter()
            .position(|e| serde_json::to_value(&e.event).unwrap()["type"] == kind)
            .unwrap()
    };
    let started = position("round_started");
    let settled = position("settled");
    let crashed = position("crashed");
    let reopened = position("round_waiting");
    assert!(started < settled && settled < crashed && crashed < reopened);

    // Tick numbers are consecutive and the final tick shows the crash point
    let ticks: Vec<(u64, Multiplier)> = envelopes
        .iter()
        .filter_map(|e| match e.event {
            RoundEvent::Tick { tick, multiplier, .. } => Some((tick, multiplier)),
            _ => None,
        })
        .collect();
    for pair in ticks.windows(2) {
        assert_eq!(pair[1].0, pair[0].0 + 1);
        assert!(pair[1].1 >= pair[0].1);
    }
    assert_eq!(ticks.last().map(|t| t.1), Some(Multiplier::from_cents(130)));
}

#[tokio::test]
async fn test_journal_replay_restores_balances() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wallet.jsonl");

    let journal = Arc::new(FileJournal::open(&path, 3, Duration::from_millis(5), None).unwrap());
    let ledger = Arc::new(WalletLedger::new(journal.clone()));
    let engine = engine_with(&[250, 120], ledger);

    let alice = PlayerId::new("alice");
    let bob = PlayerId::new("bob");
    engine
        .place_bet(&alice, Amount::from_whole(100), "crash", Some(Multiplier::from_cents(200)))
        .unwrap();
    engine.place_bet(&bob, Amount::from_whole(40), "crash", None).unwrap();
    run_round(&engine);
    engine.scheduler().end_cooldown().unwrap();
    engine.place_bet(&bob, Amount::from_minor(1_050), "crash", None).unwrap();
    run_round(&engine);

    journal.close().await.unwrap();

    let records = read_journal(&path).unwrap();
    let restored = WalletLedger::restore(records, Arc::new(crash_engine::wallet::NullJournal)).unwrap();
    for player in [&alice, &bob] {
        assert_eq!(restored.balance(player).unwrap(), engine.balance(player).unwrap());
        assert_eq!(restored.transactions(player).unwrap(), engine.transactions(player).unwrap());
        restored.verify_replay(player).unwrap();
    }
    assert_eq!(restored.balance(&alice).unwrap(), Amount::from_whole(1_100));
    assert_eq!(restored.balance(&bob).unwrap(), Amount::from_minor(94_950));
}
