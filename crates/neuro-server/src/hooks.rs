//! Decision hook
//!
//! The coordinator handles wire traffic and bookkeeping; every decision a
//! model would make is delegated to a [`DecisionHook`].

use crate::session::SessionId;
use async_trait::async_trait;
use neuro_core::{Action, ActionResult, ForceActionRequest, Result};
use tracing::{debug, info, warn};

/// Which session, and which game, a call is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub session: SessionId,
    /// Title declared by the last `startup`, if any
    pub game: Option<String>,
}

/// The hook's answer to a force
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForceChoice {
    /// One of the eligible action names
    pub name: String,
    /// JSON-encoded arguments matching the action's schema
    pub data: Option<String>,
}

impl ForceChoice {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// Capabilities injected into a [`Coordinator`](crate::Coordinator)
#[async_trait]
pub trait DecisionHook: Send + Sync + 'static {
    /// The game described something. With `silent` it expects no reply.
    async fn add_context(&self, origin: &Origin, message: &str, silent: bool);

    /// Pick one of `actions` for a force. `actions` holds only names that are
    /// both requested and registered.
    async fn choose_force_action(
        &self,
        origin: &Origin,
        request: &ForceActionRequest,
        actions: &[Action],
    ) -> Result<ForceChoice>;

    /// A `startup` arrived; the session's registry is now empty
    async fn session_started(&self, origin: &Origin) {
        info!(session = %origin.session, game = ?origin.game, "Game started");
    }

    /// A correlated `action/result` arrived
    async fn action_result(&self, origin: &Origin, result: &ActionResult) {
        debug!(
            session = %origin.session,
            id = %result.action_id,
            success = result.success,
            "Action result"
        );
    }

    /// No result arrived within the force timeout
    async fn force_timed_out(&self, origin: &Origin, request: &ForceActionRequest) {
        warn!(session = %origin.session, query = %request.query, "Force action timed out");
    }

    /// The session ended, or the game restarted, while a force was open
    async fn force_cancelled(&self, origin: &Origin, request: &ForceActionRequest) {
        debug!(session = %origin.session, query = %request.query, "Force action cancelled");
    }

    /// The game confirmed it can be shut down
    async fn shutdown_ready(&self, origin: &Origin) {
        info!(session = %origin.session, game = ?origin.game, "Game ready for shutdown");
    }

    /// The session is gone and removed from the coordinator
    async fn session_closed(&self, session: SessionId) {
        debug!(%session, "Session closed");
    }
}
