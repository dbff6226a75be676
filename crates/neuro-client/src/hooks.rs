//! Game-side hooks
//!
//! The engine calls these at fixed points of the connection lifecycle. Every
//! method has a default, so games only override what they care about.

use crate::engine::NeuroClient;
use async_trait::async_trait;
use neuro_core::{NeuroAction, NeuroError, Result};
use serde_json::{Map, Value};
use tracing::debug;

/// Capabilities injected into a [`NeuroClient`]
#[async_trait]
pub trait ClientHooks: Send + Sync + 'static {
    /// The transport is up. Typically sends `startup`, registers actions and
    /// adds initial context. An error closes the connection.
    async fn connect_succeeded(&self, client: &NeuroClient) -> Result<()> {
        client.send_startup().await
    }

    /// The handshake failed; the client is back to disconnected
    async fn connect_failed(&self, _client: &NeuroClient, error: &NeuroError) {
        debug!("Connect failed: {}", error);
    }

    /// Neuro wants to run an action.
    ///
    /// Must eventually send exactly one result carrying `action.id`. The
    /// default routes the action through the registry's handlers.
    async fn handle_action(&self, client: &NeuroClient, action: NeuroAction) -> Result<()> {
        client.dispatch_action(action).await
    }

    /// Neuro asks the game to shut down at the next safe point, or cancels
    /// that request when `wants_shutdown` is false. The game should answer
    /// with `send_shutdown_ready` once it is safe.
    async fn shutdown_graceful(&self, _client: &NeuroClient, wants_shutdown: bool) -> Result<()> {
        debug!(wants_shutdown, "Graceful shutdown requested");
        Ok(())
    }

    /// Neuro is about to close the game. Save and send `shutdown/ready`.
    async fn shutdown_immediate(&self, _client: &NeuroClient) -> Result<()> {
        debug!("Immediate shutdown requested");
        Ok(())
    }

    /// Any command the engine does not know
    async fn handle_unknown_command(
        &self,
        _client: &NeuroClient,
        command: &str,
        _data: Option<&Map<String, Value>>,
    ) {
        debug!(command, "Ignoring unknown command");
    }

    /// The read loop ended. `reason` is `None` after an explicit stop.
    async fn disconnected(&self, _client: &NeuroClient, _reason: Option<&NeuroError>) {}
}

/// Hooks that keep every default
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl ClientHooks for DefaultHooks {}
