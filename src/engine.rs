//! Engine wiring for one crash table
//!
//! Centralizes construction of the bus, scheduler and settlement path so the
//! binary, the API and the integration tests all build the table the same way.

use crate::broadcast::{BroadcastBus, BusSubscription, RoundSnapshot};
use crate::config::EngineConfig;
use crate::crash::{
    BetReceipt, CashoutReceipt, CrashPointGenerator, CrashPointSource, PlayerId, RoundScheduler, RoundSummary,
};
use crate::errors::{EngineResult, GameError};
use crate::metrics::EngineMetrics;
use crate::money::{Amount, Multiplier};
use crate::wallet::{WalletLedger, WalletTransaction};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Background tasks started by [`CrashEngine::start`]
pub struct EngineTasks {
    pub scheduler: JoinHandle<()>,
    pub watchdog: JoinHandle<()>,
}

impl EngineTasks {
    /// Wait for both tasks after `stop`
    pub async fn join(self) {
        let _ = self.scheduler.await;
        let _ = self.watchdog.await;
    }
}

pub struct CrashEngine {
    config: Arc<EngineConfig>,
    ledger: Arc<WalletLedger>,
    bus: Arc<BroadcastBus>,
    metrics: Arc<EngineMetrics>,
    scheduler: Arc<RoundScheduler>,
}

impl CrashEngine {
    /// Build a table drawing crash points from the configured generator
    pub fn new(config: EngineConfig, ledger: Arc<WalletLedger>, metrics: Arc<EngineMetrics>) -> EngineResult<Self> {
        let source = Arc::new(CrashPointGenerator::new(config.game.clone()));
        Self::with_source(config, ledger, metrics, source)
    }

    /// Build a table with an injected crash point source
    pub fn with_source(
        config: EngineConfig,
        ledger: Arc<WalletLedger>,
        metrics: Arc<EngineMetrics>,
        source: Arc<dyn CrashPointSource>,
    ) -> EngineResult<Self> {
        config.validate()?;

        let config = Arc::new(config);
        let bus = BroadcastBus::new(config.broadcast.channel_capacity, Some(metrics.clone()));
        let scheduler = RoundScheduler::new(
            config.clone(),
            source,
            ledger.clone(),
            bus.clone(),
            metrics.clone(),
        );

        info!(
            "🎮 Crash table '{}' ready (stakes {}..{}, max auto-cashout {}x)",
            config.betting.game_name, config.betting.min_stake, config.betting.max_stake, config.betting.max_auto_cashout
        );

        Ok(Self {
            config,
            ledger,
            bus,
            metrics,
            scheduler,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<WalletLedger> {
        &self.ledger
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn scheduler(&self) -> &Arc<RoundScheduler> {
        &self.scheduler
    }

    pub fn bus(&self) -> &Arc<BroadcastBus> {
        &self.bus
    }

    /// Place a bet on the round currently taking bets
    pub fn place_bet(
        &self,
        player: &PlayerId,
        stake: Amount,
        game_name: &str,
        auto_cashout: Option<Multiplier>,
    ) -> Result<BetReceipt, GameError> {
        if game_name != self.config.betting.game_name {
            self.metrics.record_bet_rejected();
            return Err(GameError::UnknownGame(game_name.to_string()));
        }
        self.ensure_wallet(player)?;
        self.scheduler.place_bet(player, stake, auto_cashout)
    }

    /// Cash out the player's bet in the running round
    pub fn cash_out(&self, player: &PlayerId) -> Result<CashoutReceipt, GameError> {
        self.scheduler.cash_out(player)
    }

    pub fn balance(&self, player: &PlayerId) -> Result<Amount, GameError> {
        self.ensure_wallet(player)?;
        Ok(self.ledger.balance(player)?)
    }

    pub fn transactions(&self, player: &PlayerId) -> Result<Vec<WalletTransaction>, GameError> {
        self.ensure_wallet(player)?;
        Ok(self.ledger.transactions(player)?)
    }

    /// Current round as clients see it
    pub fn snapshot(&self) -> RoundSnapshot {
        self.bus.snapshot()
    }

    pub fn history(&self, limit: usize) -> Vec<RoundSummary> {
        self.scheduler.history().recent(limit)
    }

    pub fn subscribe(&self) -> BusSubscription {
        self.bus.subscribe()
    }

    /// Start the round loop and the watchdog
    pub fn start(&self) -> EngineTasks {
        info!("▶️ Starting crash table '{}'", self.config.betting.game_name);
        EngineTasks {
            scheduler: self.scheduler.spawn(),
            watchdog: self.scheduler.spawn_watchdog(),
        }
    }

    pub fn stop(&self) {
        info!("⏹️ Stopping crash table '{}'", self.config.betting.game_name);
        self.scheduler.stop();
    }

    /// Open a demo wallet on first contact when configured to
    fn ensure_wallet(&self, player: &PlayerId) -> Result<(), GameError> {
        if let Some(opening_balance) = self.config.wallet.demo_opening_balance {
            if self.ledger.ensure_account(player, opening_balance)? {
                debug!("👛 Opened demo wallet for {} with {}", player, opening_balance);
            }
        }
        Ok(())
    }
}
