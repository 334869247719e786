use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;

use crate::execution::OrchestratorPolicy;
use crate::risk::{LiquidityFallback, ReservePolicy};

const DEFAULT_CONFIG_FILE: &str = "curvebot";
const ENV_PREFIX: &str = "CURVEBOT";

/// Runtime configuration
///
/// Layered: built-in defaults, then `curvebot.toml` (or the file given on the
/// command line), then `CURVEBOT__*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub wallet: String,
    pub quote_api_url: String,
    pub relay_api_url: String,
    #[serde(default)]
    pub relay_api_key: Option<String>,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub database_url: Option<String>,
    pub ledger_path: String,
    pub rate_limit_rpm: u32,
    pub confirm_timeout_secs: u64,
    pub reserve: ReservePolicy,
    pub liquidity_fallback: LiquidityFallback,
}

impl BotConfig {
    /// Load `.env`, then the config layers
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config = Self::defaults()?
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("Failed to read configuration")?;

        Self::finish(config)
    }

    /// Defaults overlaid with an inline TOML document
    pub fn from_toml(toml: &str) -> Result<Self> {
        let config = Self::defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .context("Failed to read configuration")?;

        Self::finish(config)
    }

    fn defaults() -> Result<ConfigBuilder<config::builder::DefaultState>> {
        let reserve = ReservePolicy::default();
        Ok(Config::builder()
            .set_default("wallet", "")?
            .set_default("quote_api_url", "http://127.0.0.1:8900")?
            .set_default("relay_api_url", "http://127.0.0.1:8901")?
            .set_default("ledger_path", "ledger.json")?
            .set_default("rate_limit_rpm", 120_i64)?
            .set_default("confirm_timeout_secs", 60_i64)?
            .set_default("reserve.cap_multiple", i64::from(reserve.cap_multiple))?
            .set_default("reserve.margin_multiple", i64::from(reserve.margin_multiple))?
            .set_default("liquidity_fallback", "proceed_unadjusted")?)
    }

    fn finish(config: Config) -> Result<Self> {
        let bot_config: BotConfig = config
            .try_deserialize()
            .context("Invalid configuration")?;
        bot_config.validate()?;
        Ok(bot_config)
    }

    fn validate(&self) -> Result<()> {
        if self.wallet.trim().is_empty() {
            anyhow::bail!("wallet is not configured (set CURVEBOT__WALLET)");
        }
        if self.rate_limit_rpm == 0 {
            anyhow::bail!("rate_limit_rpm must be positive");
        }
        if self.reserve.cap_multiple == 0 || self.reserve.margin_multiple == 0 {
            anyhow::bail!("reserve multiples must be positive");
        }
        Ok(())
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn policy(&self) -> OrchestratorPolicy {
        OrchestratorPolicy {
            reserve: self.reserve,
            liquidity_fallback: self.liquidity_fallback,
        }
    }
}
