//! Configuration loading from TOML.
//!
//! Every field has a default matching the public vLotto deployment, so the
//! tool runs with no file at all; a TOML file adjusts the pieces that vary
//! (currencies, timing) and CLI flags override the per-run knobs on top.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::poll::RetryPolicy;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub lottery: LotteryConfig,
    pub buy: BuyConfig,
    pub timing: TimingConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct NodeConfig {
    /// RPC URL override; when unset the URL comes from env/VRSC.conf
    /// discovery.
    pub url: Option<String>,
}

/// Names anchoring the lottery on chain.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LotteryConfig {
    /// Friendly name of the ticket currency; also the marketplace to query
    /// and the parent namespace of ticket identities.
    pub currency_name: String,
    /// i-address of the ticket currency; ticket identities carry it as
    /// their parent, and the deliver leg pays in it.
    pub currency_id: String,
    /// Currency converted from when the ticket balance falls short.
    pub base_currency: String,
    /// Identity publishing draw parameters in its content multimap.
    pub ledger_identity: String,
}

impl Default for LotteryConfig {
    fn default() -> Self {
        Self {
            currency_name: "vlotto".to_string(),
            currency_id: "iMLmoaN3SS8KdJwb7fG4WZxJMFrjJxHBfj".to_string(),
            base_currency: "VRSC".to_string(),
            ledger_identity: "ledger.vlotto@".to_string(),
        }
    }
}

/// Purchase-run knobs. All of these have CLI flag counterparts.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BuyConfig {
    /// Fixed ticket price in the ticket currency.
    pub ticket_price: Decimal,
    /// Fraction added to the conversion shortfall to absorb slippage
    /// between quote and execution.
    pub conversion_buffer: Decimal,
    /// Offer-refresh rounds allowed before the run gives up.
    pub max_rounds: u32,
    /// Confirmations a transaction needs before its outputs count as
    /// spendable.
    pub min_confirmations: u32,
    /// Base balances below this are ignored when listing funding
    /// addresses.
    pub dust_threshold: Decimal,
}

impl Default for BuyConfig {
    fn default() -> Self {
        Self {
            ticket_price: dec!(1.0),
            conversion_buffer: dec!(0.01),
            max_rounds: 10,
            min_confirmations: 1,
            dust_threshold: dec!(0.001),
        }
    }
}

/// Polling cadence and bounds. Every wait in the system is bounded by a
/// pair of values here; tests zero the intervals to run instantly.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimingConfig {
    /// Async operation status poll interval / attempts.
    pub status_poll_secs: u64,
    pub status_poll_attempts: u32,
    /// Confirmation poll interval / attempts.
    pub confirm_poll_secs: u64,
    pub confirm_poll_attempts: u32,
    /// Balance-settle poll interval / attempts.
    pub balance_poll_secs: u64,
    pub balance_poll_attempts: u32,
    /// Pause after an offer-refresh round that found nothing selectable.
    pub refresh_delay_secs: u64,
    /// Transient-failure retries per RPC read, and the fixed delay
    /// between them.
    pub rpc_retries: u32,
    pub rpc_retry_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            status_poll_secs: 3,
            status_poll_attempts: 100,
            confirm_poll_secs: 5,
            confirm_poll_attempts: 120,
            balance_poll_secs: 5,
            balance_poll_attempts: 24,
            refresh_delay_secs: 5,
            rpc_retries: 3,
            rpc_retry_delay_ms: 500,
        }
    }
}

impl TimingConfig {
    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_secs(self.status_poll_secs)
    }

    pub fn confirm_poll_interval(&self) -> Duration {
        Duration::from_secs(self.confirm_poll_secs)
    }

    pub fn balance_poll_interval(&self) -> Duration {
        Duration::from_secs(self.balance_poll_secs)
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_secs(self.refresh_delay_secs)
    }

    pub fn rpc_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.rpc_retries,
            Duration::from_millis(self.rpc_retry_delay_ms),
        )
    }

    /// Everything instant, small bounds. For tests.
    pub fn immediate() -> Self {
        Self {
            status_poll_secs: 0,
            status_poll_attempts: 5,
            confirm_poll_secs: 0,
            confirm_poll_attempts: 5,
            balance_poll_secs: 0,
            balance_poll_attempts: 5,
            refresh_delay_secs: 0,
            rpc_retries: 1,
            rpc_retry_delay_ms: 0,
        }
    }
}

impl AppConfig {
    /// Load configuration. An explicit path must exist; with no path the
    /// defaults apply, overlaid by `vlotto-buyer.toml` when present in the
    /// working directory.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = "vlotto-buyer.toml";
                if Path::new(default_path).exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }
}
