//! Server configuration

use neuro_core::{NeuroError, Result};
use std::time::Duration;

/// Configuration for the coordinator and its sessions
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Deadline for the WebSocket handshake of an accepted connection
    pub handshake_timeout: Duration,
    /// Deadline for each outbound frame
    pub write_timeout: Duration,
    /// How long a forced action may wait for its `action/result`
    pub force_timeout: Duration,
    /// Attempts per force before giving up on failed results
    pub force_attempts: u32,
    /// Queued outbound frames and session events before senders wait
    pub outbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            force_timeout: Duration::from_secs(60),
            force_attempts: 3,
            outbound_buffer: 32,
        }
    }
}

impl ServerConfig {
    /// Reject configurations without usable deadlines
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("handshake_timeout", self.handshake_timeout),
            ("write_timeout", self.write_timeout),
            ("force_timeout", self.force_timeout),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(NeuroError::Config(format!("{} must be non-zero", name)));
            }
        }
        if self.force_attempts == 0 {
            return Err(NeuroError::Config("force_attempts must be at least 1".into()));
        }
        if self.outbound_buffer == 0 {
            return Err(NeuroError::Config("outbound_buffer must be at least 1".into()));
        }
        Ok(())
    }
}
