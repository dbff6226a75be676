//! Client configuration

use neuro_core::{NeuroError, Result};
use std::time::Duration;

/// Environment variable holding the Neuro WebSocket URL
pub const WEBSOCKET_ENV_VAR: &str = "NEURO_SDK_WS_URL";

/// URL used when [`WEBSOCKET_ENV_VAR`] is unset
pub const DEFAULT_WEBSOCKET: &str = "ws://localhost:8000";

/// Configuration for a game client connection
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the Neuro server
    pub url: String,
    /// Deadline for the transport handshake
    pub connect_timeout: Duration,
    /// Deadline for each outbound frame
    pub write_timeout: Duration,
    /// Outbound frames queued before senders wait
    pub outbound_buffer: usize,
    /// How long a force stays outstanding without a successful result.
    /// Neuro may give up on a force without telling the game.
    pub force_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WEBSOCKET.into(),
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            outbound_buffer: 32,
            force_timeout: Duration::from_secs(180),
        }
    }
}

impl ClientConfig {
    /// Defaults, with the URL taken from `NEURO_SDK_WS_URL` when set
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(WEBSOCKET_ENV_VAR) {
            if !url.trim().is_empty() {
                config.url = url;
            }
        }
        config
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Reject configurations without usable deadlines
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(NeuroError::Config("url must not be empty".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(NeuroError::Config("connect_timeout must be non-zero".into()));
        }
        if self.write_timeout.is_zero() {
            return Err(NeuroError::Config("write_timeout must be non-zero".into()));
        }
        if self.force_timeout.is_zero() {
            return Err(NeuroError::Config("force_timeout must be non-zero".into()));
        }
        if self.outbound_buffer == 0 {
            return Err(NeuroError::Config("outbound_buffer must be non-zero".into()));
        }
        Ok(())
    }
}
