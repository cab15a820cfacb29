//! Configuration management with validation and defaults
//!
//! One `EngineConfig` drives a single game table. It is loaded from an
//! optional TOML file, overridden from `CRASH_*` environment variables and
//! validated before the engine starts.

use crate::errors::ConfigurationError;
use crate::money::{Amount, Multiplier, Ratio};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete engine configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub game: GameConfig,
    pub clock: ClockConfig,
    pub round: RoundConfig,
    pub betting: BettingConfig,
    pub wallet: WalletConfig,
    pub broadcast: BroadcastConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

/// Crash point distribution
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub house_edge: Ratio,
    pub min_multiplier: Multiplier,
    pub max_multiplier: Multiplier,
    pub jackpot_probability: Ratio,
    /// Jackpot only replaces crash points below this value
    pub jackpot_threshold: Multiplier,
    pub jackpot_min: Multiplier,
    pub jackpot_max: Multiplier,
    /// Deterministic generator seed. Audits and tests only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rng_seed: Option<u64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            house_edge: Ratio::from_ppm(30_000),
            min_multiplier: Multiplier::ONE,
            max_multiplier: Multiplier::from_cents(100_000),
            jackpot_probability: Ratio::from_ppm(5_000),
            jackpot_threshold: Multiplier::from_cents(10_000),
            jackpot_min: Multiplier::from_cents(10_000),
            jackpot_max: Multiplier::from_cents(100_000),
            rng_seed: None,
        }
    }
}

/// Multiplier growth per tick: `next = current + base_increment + current * growth_rate`
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub base_increment: Multiplier,
    pub growth_rate: Ratio,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            base_increment: Multiplier::from_cents(1),
            growth_rate: Ratio::from_ppm(5_000),
        }
    }
}

/// Round cadence and watchdog bounds
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    pub waiting_ms: u64,
    pub tick_interval_ms: u64,
    pub cooldown_ms: u64,
    pub watchdog_interval_ms: u64,
    pub stall_timeout_ms: u64,
    /// Hard cap on ticks per round; the round is force-crashed beyond it
    pub max_round_ticks: u64,
    pub history_size: usize,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            waiting_ms: 5_000,
            tick_interval_ms: 50,
            cooldown_ms: 3_000,
            watchdog_interval_ms: 250,
            stall_timeout_ms: 2_000,
            // The default clock passes 1000x in well under 2000 ticks
            max_round_ticks: 5_000,
            history_size: 50,
        }
    }
}

/// Bet acceptance limits
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BettingConfig {
    pub game_name: String,
    pub min_stake: Amount,
    pub max_stake: Amount,
    pub max_auto_cashout: Multiplier,
}

impl Default for BettingConfig {
    fn default() -> Self {
        Self {
            game_name: "crash".to_string(),
            min_stake: Amount::from_whole(10),
            max_stake: Amount::from_whole(20_000),
            max_auto_cashout: Multiplier::from_cents(100_000),
        }
    }
}

/// Wallet ledger persistence
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// JSON Lines journal; in-memory only when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_path: Option<String>,
    pub journal_retry_attempts: u32,
    pub journal_retry_backoff_ms: u64,
    /// Opens unknown players with this balance on first use (demo tables)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demo_opening_balance: Option<Amount>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            journal_path: None,
            journal_retry_attempts: 3,
            journal_retry_backoff_ms: 50,
            demo_opening_balance: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub channel_capacity: usize,
    pub heartbeat_interval_secs: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            heartbeat_interval_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "crash_engine=info,tower_http=info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Fast cadences, deterministic crash points and no jackpot, for tests
    pub fn testing() -> Self {
        Self {
            game: GameConfig {
                jackpot_probability: Ratio::ZERO,
                rng_seed: Some(42),
                ..Default::default()
            },
            round: RoundConfig {
                waiting_ms: 50,
                tick_interval_ms: 5,
                cooldown_ms: 50,
                watchdog_interval_ms: 10,
                stall_timeout_ms: 200,
                ..Default::default()
            },
            wallet: WalletConfig {
                demo_opening_balance: Some(Amount::from_whole(1_000)),
                ..Default::default()
            },
            broadcast: BroadcastConfig {
                channel_capacity: 256,
                heartbeat_interval_secs: 5,
            },
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let game = &self.game;
        if game.house_edge >= Ratio::ONE {
            return Err(invalid("game.house_edge", game.house_edge, "must be below 1.0"));
        }
        if game.min_multiplier < Multiplier::ONE {
            return Err(invalid("game.min_multiplier", game.min_multiplier, "must be at least 1.00"));
        }
        if game.max_multiplier < game.min_multiplier {
            return Err(invalid(
                "game.max_multiplier",
                game.max_multiplier,
                "must not be below game.min_multiplier",
            ));
        }
        if game.jackpot_probability > Ratio::ONE {
            return Err(invalid("game.jackpot_probability", game.jackpot_probability, "must be at most 1.0"));
        }
        if game.jackpot_probability > Ratio::ZERO {
            if game.jackpot_min > game.jackpot_max {
                return Err(invalid("game.jackpot_min", game.jackpot_min, "must not exceed game.jackpot_max"));
            }
            if game.jackpot_min < game.min_multiplier || game.jackpot_max > game.max_multiplier {
                return Err(ConfigurationError::ValidationFailed(
                    "jackpot range must lie inside the multiplier bounds".to_string(),
                ));
            }
        }

        if self.clock.base_increment == Multiplier::ZERO && self.clock.growth_rate == Ratio::ZERO {
            return Err(ConfigurationError::ValidationFailed(
                "clock must grow: base_increment and growth_rate cannot both be zero".to_string(),
            ));
        }

        let round = &self.round;
        for (field, value) in [
            ("round.tick_interval_ms", round.tick_interval_ms),
            ("round.watchdog_interval_ms", round.watchdog_interval_ms),
            ("round.stall_timeout_ms", round.stall_timeout_ms),
            ("round.max_round_ticks", round.max_round_ticks),
        ] {
            if value == 0 {
                return Err(invalid(field, value, "must be > 0"));
            }
        }
        if round.stall_timeout_ms <= round.tick_interval_ms {
            return Err(ConfigurationError::ValidationFailed(
                "round.stall_timeout_ms must exceed round.tick_interval_ms".to_string(),
            ));
        }

        let betting = &self.betting;
        if betting.game_name.trim().is_empty() {
            return Err(ConfigurationError::MissingRequired("betting.game_name".to_string()));
        }
        if betting.min_stake.is_zero() {
            return Err(invalid("betting.min_stake", betting.min_stake, "must be positive"));
        }
        if betting.max_stake < betting.min_stake {
            return Err(invalid("betting.max_stake", betting.max_stake, "must not be below betting.min_stake"));
        }
        if betting.max_auto_cashout <= Multiplier::ONE {
            return Err(invalid("betting.max_auto_cashout", betting.max_auto_cashout, "must be above 1.00"));
        }

        if self.broadcast.channel_capacity == 0 {
            return Err(invalid("broadcast.channel_capacity", 0, "must be > 0"));
        }
        if self.api.port == 0 {
            return Err(invalid("api.port", 0, "port cannot be zero"));
        }
        if self.wallet.journal_path.as_deref().is_some_and(|p| p.trim().is_empty()) {
            return Err(ConfigurationError::MissingRequired("wallet.journal_path".to_string()));
        }

        Ok(())
    }

    pub fn waiting_duration(&self) -> Duration {
        Duration::from_millis(self.round.waiting_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.round.tick_interval_ms)
    }

    pub fn cooldown_duration(&self) -> Duration {
        Duration::from_millis(self.round.cooldown_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.round.watchdog_interval_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.round.stall_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast.heartbeat_interval_secs)
    }

    pub fn journal_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.wallet.journal_retry_backoff_ms)
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Configuration loader with environment variable support
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> Result<EngineConfig, ConfigurationError> {
        self.load_with(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the process environment
    pub fn load_with<F>(&self, lookup: F) -> Result<EngineConfig, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match self.config_path {
            Some(ref path) => Self::load_from_file(path)?,
            None => EngineConfig::default(),
        };

        Self::apply_overrides(&mut config, lookup)?;
        config.validate()?;

        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<EngineConfig, ConfigurationError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path.display(), e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)))
    }

    fn apply_overrides<F>(config: &mut EngineConfig, lookup: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("CRASH_API_HOST") {
            config.api.host = host;
        }
        if let Some(port) = lookup("CRASH_API_PORT") {
            config.api.port = port.parse().map_err(|_| ConfigurationError::InvalidValue {
                field: "CRASH_API_PORT".to_string(),
                value: port,
                reason: "Invalid port number".to_string(),
            })?;
        }
        if let Some(path) = lookup("CRASH_JOURNAL_PATH") {
            config.wallet.journal_path = Some(path);
        }
        if let Some(edge) = lookup("CRASH_HOUSE_EDGE") {
            config.game.house_edge = edge.parse().map_err(|e| ConfigurationError::InvalidValue {
                field: "CRASH_HOUSE_EDGE".to_string(),
                value: edge.clone(),
                reason: format!("{}", e),
            })?;
        }
        if let Some(seed) = lookup("CRASH_RNG_SEED") {
            config.game.rng_seed = Some(seed.parse().map_err(|_| ConfigurationError::InvalidValue {
                field: "CRASH_RNG_SEED".to_string(),
                value: seed,
                reason: "Invalid integer seed".to_string(),
            })?);
        }
        if let Some(filter) = lookup("CRASH_LOG_FILTER") {
            config.logging.filter = filter;
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, config: &EngineConfig, path: P) -> Result<(), ConfigurationError> {
        let toml_string = Self::to_toml(config)?;
        std::fs::write(path.as_ref(), toml_string).map_err(|e| {
            ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path.as_ref().display(), e))
        })
    }

    pub fn to_toml(config: &EngineConfig) -> Result<String, ConfigurationError> {
        toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e)))
    }
}
