//! Engine counters and Prometheus text export

use crate::money::Amount;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free counters shared by the scheduler, settlement path and API
#[derive(Debug)]
pub struct EngineMetrics {
    start_time: Instant,
    rounds_started: AtomicU64,
    rounds_crashed: AtomicU64,
    forced_transitions: AtomicU64,
    bets_placed: AtomicU64,
    bets_rejected: AtomicU64,
    stake_volume_minor: AtomicU64,
    cashouts: AtomicU64,
    auto_cashouts: AtomicU64,
    losses: AtomicU64,
    payout_volume_minor: AtomicU64,
    settlement_races_lost: AtomicU64,
    events_published: AtomicU64,
    websocket_clients: AtomicU64,
    journal_failures: AtomicU64,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            rounds_started: AtomicU64::new(0),
            rounds_crashed: AtomicU64::new(0),
            forced_transitions: AtomicU64::new(0),
            bets_placed: AtomicU64::new(0),
            bets_rejected: AtomicU64::new(0),
            stake_volume_minor: AtomicU64::new(0),
            cashouts: AtomicU64::new(0),
            auto_cashouts: AtomicU64::new(0),
            losses: AtomicU64::new(0),
            payout_volume_minor: AtomicU64::new(0),
            settlement_races_lost: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            websocket_clients: AtomicU64::new(0),
            journal_failures: AtomicU64::new(0),
        }
    }

    pub fn record_round_started(&self) {
        self.rounds_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_round_crashed(&self, lost_bets: u64) {
        self.rounds_crashed.fetch_add(1, Ordering::Relaxed);
        self.losses.fetch_add(lost_bets, Ordering::Relaxed);
    }

    pub fn record_forced_transition(&self) {
        self.forced_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bet(&self, stake: Amount) {
        self.bets_placed.fetch_add(1, Ordering::Relaxed);
        self.stake_volume_minor.fetch_add(stake.minor(), Ordering::Relaxed);
    }

    pub fn record_bet_rejected(&self) {
        self.bets_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cashout(&self, payout: Amount, auto: bool) {
        if auto {
            self.auto_cashouts.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cashouts.fetch_add(1, Ordering::Relaxed);
        }
        self.payout_volume_minor.fetch_add(payout.minor(), Ordering::Relaxed);
    }

    pub fn record_race_lost(&self) {
        self.settlement_races_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_journal_failure(&self) {
        self.journal_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn websocket_connected(&self) {
        self.websocket_clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn websocket_disconnected(&self) {
        // Never wraps below zero on a double disconnect
        let _ = self
            .websocket_clients
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn websocket_clients(&self) -> u64 {
        self.websocket_clients.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Generate Prometheus metrics format
    pub fn to_prometheus_format(&self) -> String {
        let mut output = String::new();

        let counters = [
            ("crash_rounds_started_total", "Rounds moved to running", &self.rounds_started),
            ("crash_rounds_crashed_total", "Rounds that reached their crash point", &self.rounds_crashed),
            ("crash_forced_transitions_total", "State transitions forced by the watchdog or tick cap", &self.forced_transitions),
            ("crash_bets_placed_total", "Accepted bets", &self.bets_placed),
            ("crash_bets_rejected_total", "Rejected bet placements", &self.bets_rejected),
            ("crash_cashouts_total", "Manual cashouts", &self.cashouts),
            ("crash_auto_cashouts_total", "Automatic cashouts", &self.auto_cashouts),
            ("crash_losses_total", "Bets lost at crash", &self.losses),
            ("crash_settlement_races_lost_total", "Cashouts that found the bet already settled", &self.settlement_races_lost),
            ("crash_events_published_total", "Round events published to subscribers", &self.events_published),
            ("crash_journal_failures_total", "Journal writes abandoned after retries", &self.journal_failures),
        ];

        for (name, help, counter) in counters {
            output.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n\n",
                counter.load(Ordering::Relaxed)
            ));
        }

        output.push_str(&format!(
            "# HELP crash_stake_volume Total amount staked\n\
             # TYPE crash_stake_volume counter\n\
             crash_stake_volume {}\n\n",
            Amount::from_minor(self.stake_volume_minor.load(Ordering::Relaxed))
        ));

        output.push_str(&format!(
            "# HELP crash_payout_volume Total amount paid out\n\
             # TYPE crash_payout_volume counter\n\
             crash_payout_volume {}\n\n",
            Amount::from_minor(self.payout_volume_minor.load(Ordering::Relaxed))
        ));

        output.push_str(&format!(
            "# HELP crash_websocket_clients Connected WebSocket clients\n\
             # TYPE crash_websocket_clients gauge\n\
             crash_websocket_clients {}\n\n",
            self.websocket_clients()
        ));

        output.push_str(&format!(
            "# HELP crash_uptime_seconds Engine uptime\n\
             # TYPE crash_uptime_seconds gauge\n\
             crash_uptime_seconds {}\n",
            self.uptime().as_secs()
        ));

        output
    }
}
