use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Bot configuration loaded from YAML file with environment overrides
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub markets: MarketsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// How often to poll market snapshots (ms)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// How often to sweep closed markets for settlement (seconds)
    #[serde(default = "default_settlement_sweep_secs")]
    pub settlement_sweep_secs: u64,
    /// API request timeout (ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// Shares bought per leg
    #[serde(default = "default_shares_per_leg")]
    pub shares_per_leg: f64,
    /// Max combined per-share cost of both legs for a hedge
    #[serde(default = "default_sum_target")]
    pub sum_target: f64,
    /// Fractional drop that qualifies as a dump (0.15 = 15%)
    #[serde(default = "default_move_threshold")]
    pub move_threshold: f64,
    /// Watch window after period open (minutes)
    #[serde(default = "default_watch_window_minutes")]
    pub watch_window_minutes: i64,
    /// Force the hedge after waiting this long (minutes)
    #[serde(default = "default_stop_loss_max_wait_minutes")]
    pub stop_loss_max_wait_minutes: i64,
    /// Stop-loss percentage (configured but not consumed by the current math)
    #[serde(default = "default_stop_loss_percentage")]
    pub stop_loss_percentage: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketsConfig {
    /// Asset symbols to trade (btc, eth, sol, xrp)
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (overridden by RUST_LOG)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Append-only history log path; empty disables the file sink
    #[serde(default = "default_history_path")]
    pub history_path: String,
}

fn default_interval_ms() -> u64 {
    1000
}
fn default_settlement_sweep_secs() -> u64 {
    20
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_shares_per_leg() -> f64 {
    10.0
}
fn default_sum_target() -> f64 {
    0.95
}
fn default_move_threshold() -> f64 {
    0.15
}
fn default_watch_window_minutes() -> i64 {
    2
}
fn default_stop_loss_max_wait_minutes() -> i64 {
    5
}
fn default_stop_loss_percentage() -> f64 {
    0.2
}
fn default_assets() -> Vec<String> {
    vec!["btc".to_string()]
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_history_path() -> String {
    "history.log".to_string()
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            settlement_sweep_secs: default_settlement_sweep_secs(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            shares_per_leg: default_shares_per_leg(),
            sum_target: default_sum_target(),
            move_threshold: default_move_threshold(),
            watch_window_minutes: default_watch_window_minutes(),
            stop_loss_max_wait_minutes: default_stop_loss_max_wait_minutes(),
            stop_loss_percentage: default_stop_loss_percentage(),
        }
    }
}

impl Default for MarketsConfig {
    fn default() -> Self {
        Self {
            assets: default_assets(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            history_path: default_history_path(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            polling: PollingConfig::default(),
            strategy: StrategyConfig::default(),
            markets: MarketsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn override_from_env<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(val) = std::env::var(key) {
        if let Ok(parsed) = val.parse() {
            *target = parsed;
        }
    }
}

impl BotConfig {
    /// Load configuration from YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: BotConfig =
            serde_yaml::from_str(&contents).context("Failed to parse YAML configuration")?;

        Ok(config)
    }

    /// Load with environment variable overrides. The env names match the
    /// original deployment's .env surface.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };

        override_from_env("CHECK_INTERVAL_MS", &mut config.polling.interval_ms);
        override_from_env(
            "MARKET_CLOSURE_CHECK_INTERVAL_SECONDS",
            &mut config.polling.settlement_sweep_secs,
        );
        override_from_env("DUMP_HEDGE_SHARES", &mut config.strategy.shares_per_leg);
        override_from_env("DUMP_HEDGE_SUM_TARGET", &mut config.strategy.sum_target);
        override_from_env(
            "DUMP_HEDGE_MOVE_THRESHOLD",
            &mut config.strategy.move_threshold,
        );
        override_from_env(
            "DUMP_HEDGE_WINDOW_MINUTES",
            &mut config.strategy.watch_window_minutes,
        );
        override_from_env(
            "DUMP_HEDGE_STOP_LOSS_MAX_WAIT_MINUTES",
            &mut config.strategy.stop_loss_max_wait_minutes,
        );
        override_from_env(
            "DUMP_HEDGE_STOP_LOSS_PERCENTAGE",
            &mut config.strategy.stop_loss_percentage,
        );
        override_from_env("HISTORY_LOG_PATH", &mut config.logging.history_path);

        if let Ok(val) = std::env::var("MARKETS") {
            let assets: Vec<String> = val
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !assets.is_empty() {
                config.markets.assets = assets;
            }
        }

        Ok(config)
    }
}

/// Whether live trading was requested via the PRODUCTION env flag.
pub fn production_from_env() -> bool {
    std::env::var("PRODUCTION")
        .map(|v| {
            let v = v.to_lowercase();
            v == "true" || v == "1"
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_strategy_parameters() {
        let config = BotConfig::default();
        assert_eq!(config.polling.interval_ms, 1000);
        assert_eq!(config.polling.settlement_sweep_secs, 20);
        assert_eq!(config.strategy.shares_per_leg, 10.0);
        assert_eq!(config.strategy.sum_target, 0.95);
        assert_eq!(config.strategy.move_threshold, 0.15);
        assert_eq!(config.strategy.watch_window_minutes, 2);
        assert_eq!(config.strategy.stop_loss_max_wait_minutes, 5);
        assert_eq!(config.markets.assets, vec!["btc".to_string()]);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "strategy:\n  sum_target: 0.93\n";
        let config: BotConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.strategy.sum_target, 0.93);
        assert_eq!(config.strategy.shares_per_leg, 10.0);
        assert_eq!(config.polling.interval_ms, 1000);
    }
}
