//! Multi-session coordinator

use crate::config::ServerConfig;
use crate::hooks::DecisionHook;
use crate::session::{SessionHandle, SessionId, open_session};
use neuro_bridge::{BoxReader, BoxWriter, ws};
use neuro_core::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Pause after a failed `accept` before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts game connections and keeps one session per connection.
///
/// The session map is the only state shared between sessions.
pub struct Coordinator<H: DecisionHook> {
    hook: Arc<H>,
    config: ServerConfig,
    sessions: Arc<RwLock<HashMap<SessionId, SessionHandle>>>,
}

impl<H: DecisionHook> Clone for Coordinator<H> {
    fn clone(&self) -> Self {
        Self {
            hook: self.hook.clone(),
            config: self.config.clone(),
            sessions: self.sessions.clone(),
        }
    }
}

impl<H: DecisionHook> Coordinator<H> {
    /// Create a coordinator. Fails if `config` has a zero timeout.
    pub fn new(hook: H, config: ServerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            hook: Arc::new(hook),
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn hook(&self) -> &H {
        &self.hook
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Start a session over an established transport.
    ///
    /// The session is removed from the map and `session_closed` is called
    /// when its task ends, however it ends.
    pub async fn add_connection(&self, reader: BoxReader, writer: BoxWriter) -> SessionHandle {
        let id = SessionId::new();
        let (handle, closed_tx, session) =
            open_session(id, self.hook.clone(), self.config.clone(), reader, writer);
        self.sessions.write().await.insert(id, handle.clone());
        let task = tokio::spawn(session);

        let sessions = self.sessions.clone();
        let hook = self.hook.clone();
        tokio::spawn(async move {
            if let Err(err) = task.await {
                error!(session = %id, "Session task failed: {}", err);
            }
            sessions.write().await.remove(&id);
            hook.session_closed(id).await;
            let _ = closed_tx.send(true);
        });

        handle
    }

    /// Accept WebSocket connections until the future is dropped.
    ///
    /// Accept errors (out of descriptors, aborted connections) are logged and
    /// the loop keeps going after a short pause.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!("Listening on ws://{}", addr);
        }

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!("Accept failed: {}", err);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            let coordinator = self.clone();
            tokio::spawn(async move {
                match ws::accept(stream, coordinator.config.handshake_timeout).await {
                    Ok((reader, writer)) => {
                        let handle = coordinator
                            .add_connection(Box::new(reader), Box::new(writer))
                            .await;
                        info!(session = %handle.id(), %peer, "Game connected");
                    }
                    Err(err) => warn!(%peer, "Handshake failed: {}", err),
                }
            });
        }
    }

    pub async fn session(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn sessions(&self) -> Vec<SessionHandle> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Stop a session and wait until it is gone. Returns false for unknown ids.
    pub async fn remove(&self, id: SessionId) -> bool {
        let Some(handle) = self.session(id).await else {
            return false;
        };
        handle.stop();
        handle.closed().await;
        true
    }

    /// Stop every session and wait for all of them
    pub async fn shutdown(&self) {
        let handles = self.sessions().await;
        info!(count = handles.len(), "Shutting down sessions");
        for handle in &handles {
            handle.stop();
        }
        for handle in &handles {
            handle.closed().await;
        }
    }
}
