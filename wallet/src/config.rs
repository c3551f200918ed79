//! Server configuration from environment variables
//!
//! Wraps the bridge configuration with the settings only the HTTP frontend
//! needs: where to listen, which backend to drive and which origins may call.

use std::env;

use dcrbridge::{BridgeConfig, BridgeError};

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Which wallet backend the server drives
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendMode {
    /// Remote wallet service over HTTP
    Remote,
    /// In-process wallet, nothing persisted
    Embedded,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub backend_mode: BackendMode,
    /// Comma-separated list, empty allows any origin
    pub allowed_origins: Vec<String>,
    pub bridge: BridgeConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `BIND_ADDRESS`: listen address (default 0.0.0.0:3000)
    /// - `WALLET_BACKEND`: "remote" (default) or "embedded"
    /// - `ALLOWED_ORIGINS`: CORS origins, comma separated (default: any)
    /// - everything read by [`BridgeConfig::from_env`]
    ///
    /// # Examples
    ///
    /// ```bash
    /// # Local development against an embedded wallet
    /// BIND_ADDRESS=127.0.0.1:3000 WALLET_BACKEND=embedded cargo run -p wallet
    /// ```
    pub fn from_env() -> Result<Self, BridgeError> {
        let bind_address = env::var("BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string());

        let backend_mode = match env::var("WALLET_BACKEND")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "embedded" | "memory" => {
                log::info!("🧪 Using embedded in-memory wallet backend");
                BackendMode::Embedded
            }
            "remote" | "" => BackendMode::Remote,
            other => {
                log::warn!("⚠️  Unknown wallet backend '{}', defaulting to remote", other);
                BackendMode::Remote
            }
        };

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            bind_address,
            backend_mode,
            allowed_origins,
            bridge: BridgeConfig::from_env()?,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            backend_mode: BackendMode::Remote,
            allowed_origins: Vec::new(),
            bridge: BridgeConfig::default(),
        }
    }
}
