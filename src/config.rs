//! Bridge configuration from environment variables
//!
//! Controls the network, where the wallet backend lives and the defaults
//! used when building transactions. Defaults to testnet against a local
//! wallet service.

use std::env;
use std::time::Duration;

use crate::error::BridgeError;
use crate::fees::DEFAULT_RELAY_FEE_PER_KB;
use crate::types::{Amount, Network};
use crate::Result;

pub const DEFAULT_REQUIRED_CONFIRMATIONS: i32 = 2;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub network: Network,
    /// Base URL of the remote wallet service
    pub backend_url: String,
    /// Bound on a single connection attempt
    pub connect_timeout: Duration,
    /// Confirmations an output needs before it is spendable
    pub required_confirmations: i32,
    /// Relay fee, atoms per kB
    pub relay_fee_per_kb: Amount,
}

impl BridgeConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `DCR_NETWORK`: "testnet" (default), "mainnet" or "simnet"
    /// - `WALLET_BACKEND_URL`: wallet service endpoint (defaults to localhost on the network's port)
    /// - `BACKEND_CONNECT_TIMEOUT_SECS`: connection attempt timeout (default 5)
    /// - `REQUIRED_CONFIRMATIONS`: spendable confirmation depth (default 2)
    /// - `RELAY_FEE_PER_KB`: fee rate in atoms per kB (default 10000)
    ///
    /// # Examples
    ///
    /// ```bash
    /// # Testnet against a local wallet service
    /// cargo run -p wallet
    ///
    /// # Simnet against a wallet on another host
    /// DCR_NETWORK=simnet WALLET_BACKEND_URL=http://10.0.0.5:19558 cargo run -p wallet
    /// ```
    ///
    /// Returns [`BridgeError::Config`] for a negative fee rate.
    pub fn from_env() -> Result<Self> {
        let network = match env::var("DCR_NETWORK") {
            Ok(value) if !value.is_empty() => match value.parse::<Network>() {
                Ok(network) => {
                    log::info!("🌐 Using {} network", network);
                    network
                }
                Err(_) => {
                    log::warn!("⚠️  Unknown network '{}', defaulting to testnet", value);
                    Network::Testnet
                }
            },
            _ => {
                log::info!("🌐 Using {} network (default)", Network::Testnet);
                Network::Testnet
            }
        };

        let backend_url = env::var("WALLET_BACKEND_URL").unwrap_or_else(|_| {
            let url = format!("http://127.0.0.1:{}", network.default_port());
            log::info!("📡 Wallet backend URL: {} (default)", url);
            url
        });

        let connect_timeout = Duration::from_secs(parse_or(
            "BACKEND_CONNECT_TIMEOUT_SECS",
            DEFAULT_CONNECT_TIMEOUT_SECS,
        ));
        let required_confirmations = parse_or("REQUIRED_CONFIRMATIONS", DEFAULT_REQUIRED_CONFIRMATIONS);
        let relay_fee_per_kb = Amount(parse_or("RELAY_FEE_PER_KB", DEFAULT_RELAY_FEE_PER_KB));

        let config = Self {
            network,
            backend_url,
            connect_timeout,
            required_confirmations,
            relay_fee_per_kb,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.relay_fee_per_kb < Amount::ZERO {
            return Err(BridgeError::Config(format!(
                "RELAY_FEE_PER_KB cannot be negative (got {})",
                self.relay_fee_per_kb.atoms()
            )));
        }
        Ok(())
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let network = Network::Testnet;
        Self {
            network,
            backend_url: format!("http://127.0.0.1:{}", network.default_port()),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            required_confirmations: DEFAULT_REQUIRED_CONFIRMATIONS,
            relay_fee_per_kb: Amount(DEFAULT_RELAY_FEE_PER_KB),
        }
    }
}

fn parse_or<T: std::str::FromStr + std::fmt::Display + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("⚠️  Invalid {}='{}', using {}", key, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}
