//! Game-side protocol engine
//!
//! One [`NeuroClient`] drives one connection through
//! `Disconnected -> Connecting -> Connected -> Closing -> Disconnected`.
//! Inbound frames are handled strictly in arrival order by a single read
//! loop; outbound frames go through the connection's writer task.

use crate::config::ClientConfig;
use crate::hooks::ClientHooks;
use neuro_bridge::{BoxReader, BoxWriter, Connector, FrameSender, preview, spawn_writer};
use neuro_core::command::{
    self, ACTION_REQUEST_FIELDS, Message, SHUTDOWN_GRACEFUL_FIELDS, ShutdownGracefulData, names,
    parse_payload,
};
use neuro_core::{
    ActionBinding, ActionRegistry, ActionResult, ForceActionRequest, GroupId, NeuroAction,
    NeuroError, Result, decode,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

struct Link {
    sender: FrameSender,
    stop_tx: watch::Sender<bool>,
}

struct PendingForce {
    request: ForceActionRequest,
    expires: Instant,
}

struct Inner {
    game_title: String,
    config: ClientConfig,
    hooks: Arc<dyn ClientHooks>,
    registry: ActionRegistry,
    state_tx: watch::Sender<ConnectionState>,
    link: Mutex<Option<Link>>,
    started: AtomicBool,
    pending_force: Mutex<Option<PendingForce>>,
    /// Action id -> action name, for requests still awaiting a result
    in_flight: Mutex<HashMap<String, String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(game = %self.game_title, ?previous, ?state, "Connection state changed");
        }
    }

    /// The outstanding force, forgotten once its deadline has passed
    fn pending_force(&self) -> MutexGuard<'_, Option<PendingForce>> {
        let mut pending = lock(&self.pending_force);
        if pending
            .as_ref()
            .is_some_and(|force| force.expires <= Instant::now())
        {
            if let Some(force) = pending.take() {
                debug!(game = %self.game_title, query = %force.request.query, "Pending force expired");
            }
        }
        pending
    }

    /// Drop everything tied to the current connection
    fn release(&self) {
        lock(&self.link).take();
        self.registry.clear();
        lock(&self.pending_force).take();
        lock(&self.in_flight).clear();
        self.started.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
    }
}

/// Runs [`Inner::release`] however the read loop ends, including panics
struct ReleaseGuard(Arc<Inner>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Game-side connection to Neuro. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct NeuroClient {
    inner: Arc<Inner>,
}

impl NeuroClient {
    pub fn new(
        game_title: impl Into<String>,
        hooks: Arc<dyn ClientHooks>,
        config: ClientConfig,
    ) -> Result<Self> {
        let game_title = game_title.into();
        if game_title.is_empty() {
            return Err(NeuroError::Config("game title must not be empty".into()));
        }
        config.validate()?;

        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            inner: Arc::new(Inner {
                game_title,
                config,
                hooks,
                registry: ActionRegistry::new(),
                state_tx,
                link: Mutex::new(None),
                started: AtomicBool::new(false),
                pending_force: Mutex::new(None),
                in_flight: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn game_title(&self) -> &str {
        &self.inner.game_title
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Local view of the registered actions
    pub fn registry(&self) -> &ActionRegistry {
        &self.inner.registry
    }

    pub fn get_registered(&self) -> Vec<String> {
        self.inner.registry.get_registered()
    }

    /// True once `startup` has been sent on the current connection
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// True while a force action is unresolved and has not expired
    pub fn has_pending_force(&self) -> bool {
        self.inner.pending_force().is_some()
    }

    /// Forget the outstanding force without waiting for Neuro, e.g. when the
    /// game state it asked about no longer exists
    pub fn clear_pending_force(&self) {
        lock(&self.inner.pending_force).take();
    }

    fn begin_connecting(&self) -> Result<()> {
        let moved = self.inner.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if moved {
            Ok(())
        } else {
            Err(NeuroError::ProtocolSequence(format!(
                "cannot connect while {:?}",
                self.state()
            )))
        }
    }

    /// Connect to `config.url` and start the read loop.
    ///
    /// Calls `connect_succeeded` before any inbound frame is processed, or
    /// `connect_failed` if the handshake does not complete in time.
    pub async fn connect(&self, connector: &dyn Connector) -> Result<()> {
        self.begin_connecting()?;
        let url = self.inner.config.url.clone();
        info!(game = %self.inner.game_title, "Connecting to {}", url);

        let connected = match tokio::time::timeout(
            self.inner.config.connect_timeout,
            connector.connect(&url, self.inner.config.connect_timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(NeuroError::Timeout(format!("connect to {} timed out", url))),
        };

        match connected {
            Ok((reader, writer)) => self.start(reader, writer).await,
            Err(err) => {
                warn!(game = %self.inner.game_title, "Failed to connect: {}", err);
                self.inner.set_state(ConnectionState::Disconnected);
                self.inner.hooks.connect_failed(self, &err).await;
                Err(err)
            }
        }
    }

    /// Run the engine over an already established transport
    pub async fn attach(&self, reader: BoxReader, writer: BoxWriter) -> Result<()> {
        self.begin_connecting()?;
        self.start(reader, writer).await
    }

    async fn start(&self, reader: BoxReader, writer: BoxWriter) -> Result<()> {
        let (sender, _writer_task) = spawn_writer(
            writer,
            self.inner.config.outbound_buffer,
            self.inner.config.write_timeout,
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        *lock(&self.inner.link) = Some(Link { sender, stop_tx });
        self.inner.set_state(ConnectionState::Connected);
        info!(game = %self.inner.game_title, "Connected");

        if let Err(err) = self.inner.hooks.connect_succeeded(self).await {
            error!(game = %self.inner.game_title, "Connect hook failed: {}", err);
            self.inner.release();
            return Err(err);
        }

        tokio::spawn(read_loop(self.clone(), reader, stop_rx));
        Ok(())
    }

    /// Close the connection. The read loop finishes its current message,
    /// then releases the registry and pending-force state.
    pub fn stop(&self) {
        let link = lock(&self.inner.link).take();
        if let Some(link) = link {
            self.inner.set_state(ConnectionState::Closing);
            let _ = link.stop_tx.send(true);
        }
    }

    /// Wait until the client is disconnected
    pub async fn wait_closed(&self) {
        let mut state_rx = self.inner.state_tx.subscribe();
        let _ = state_rx
            .wait_for(|state| *state == ConnectionState::Disconnected)
            .await;
    }

    fn sender(&self) -> Result<FrameSender> {
        lock(&self.inner.link)
            .as_ref()
            .map(|link| link.sender.clone())
            .ok_or(NeuroError::NotConnected)
    }

    /// Connected, and `startup` already sent
    fn require_started(&self, what: &str) -> Result<()> {
        self.sender()?;
        if self.is_started() {
            Ok(())
        } else {
            Err(NeuroError::ProtocolSequence(format!(
                "`startup` must be sent before {}",
                what
            )))
        }
    }

    async fn send(&self, message: Message) -> Result<()> {
        let sender = self.sender()?;
        let frame = message.with_game(self.inner.game_title.as_str()).encode()?;
        sender.send(frame).await
    }

    /// Send `startup`. Neuro drops every earlier registration, so the local
    /// registry is cleared as well.
    pub async fn send_startup(&self) -> Result<()> {
        self.sender()?;
        self.inner.registry.clear();
        lock(&self.inner.pending_force).take();
        lock(&self.inner.in_flight).clear();
        self.inner.started.store(false, Ordering::SeqCst);

        self.send(command::startup()).await?;
        self.inner.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Tell Neuro what is happening. With `silent` she will not reply.
    pub async fn send_context(&self, message: &str, silent: bool) -> Result<()> {
        self.require_started("context")?;
        self.send(command::context(message, silent)).await
    }

    /// Register actions locally and with Neuro, all or nothing
    pub async fn register_actions(&self, bindings: Vec<ActionBinding>) -> Result<()> {
        self.require_started("registering actions")?;
        let actions = self.inner.registry.register(bindings)?;
        self.announce(&actions).await
    }

    /// Register a mutually exclusive group that unregisters itself once any
    /// member's handler succeeds
    pub async fn register_temporary_actions(&self, bindings: Vec<ActionBinding>) -> Result<GroupId> {
        self.require_started("registering actions")?;
        let (group, actions) = self.inner.registry.register_temporary_group(bindings)?;
        self.announce(&actions).await?;
        Ok(group)
    }

    async fn announce(&self, actions: &[neuro_core::Action]) -> Result<()> {
        if actions.is_empty() {
            return Ok(());
        }
        let result = self.send(command::actions_register(actions)).await;
        if result.is_err() {
            // Neuro never saw them; keep the local view honest
            let names: Vec<String> = actions.iter().map(|a| a.name.clone()).collect();
            self.inner.registry.unregister(&names);
        }
        result
    }

    /// Unregister actions. Names that are not registered are ignored locally
    /// but still forwarded.
    pub async fn unregister_actions(&self, action_names: &[String]) -> Result<()> {
        self.require_started("unregistering actions")?;
        if action_names.is_empty() {
            return Ok(());
        }
        self.inner.registry.unregister(action_names);
        self.send(command::actions_unregister(action_names)).await
    }

    /// Force Neuro to pick one of `action_names` now.
    ///
    /// Only one force may be outstanding; a second call before the first is
    /// resolved fails with `ConcurrentForceAction`. The force resolves when a
    /// successful result is sent for one of its actions, or expires after
    /// `config.force_timeout`.
    pub async fn send_force_action(
        &self,
        state: Option<&str>,
        query: &str,
        action_names: &[&str],
        ephemeral: bool,
    ) -> Result<()> {
        self.require_started("forcing actions")?;
        if action_names.is_empty() {
            return Err(NeuroError::ProtocolSequence(
                "force needs at least one action".into(),
            ));
        }
        if let Some(missing) = action_names
            .iter()
            .find(|name| !self.inner.registry.contains(name))
        {
            return Err(NeuroError::ProtocolSequence(format!(
                "cannot force unregistered action '{}'",
                missing
            )));
        }

        let request = ForceActionRequest {
            state: state.map(str::to_string),
            query: query.to_string(),
            action_names: action_names.iter().map(|name| name.to_string()).collect(),
            ephemeral,
        };
        {
            let mut pending = self.inner.pending_force();
            if pending.is_some() {
                return Err(NeuroError::ConcurrentForceAction);
            }
            *pending = Some(PendingForce {
                request: request.clone(),
                expires: Instant::now() + self.inner.config.force_timeout,
            });
        }

        let result = self.send(command::actions_force(&request)).await;
        if result.is_err() {
            lock(&self.inner.pending_force).take();
        }
        result
    }

    /// Report the outcome of an action Neuro asked for
    pub async fn send_action_result(
        &self,
        action_id: &str,
        success: bool,
        message: Option<&str>,
    ) -> Result<()> {
        let result = ActionResult {
            action_id: action_id.to_string(),
            success,
            message: message.map(str::to_string),
        };
        self.send_result(&result).await
    }

    async fn send_result(&self, result: &ActionResult) -> Result<()> {
        let name = lock(&self.inner.in_flight).remove(&result.action_id);
        match &name {
            Some(name) if result.success => {
                let mut pending = self.inner.pending_force();
                if pending
                    .as_ref()
                    .is_some_and(|force| force.request.action_names.contains(name))
                {
                    debug!(action = %name, "Force action resolved");
                    pending.take();
                }
            }
            Some(_) => {}
            None => warn!(id = %result.action_id, "Sending result for an action that is not in flight"),
        }
        self.send(command::action_result(result)).await
    }

    /// Tell Neuro the game is ready to be closed
    pub async fn send_shutdown_ready(&self) -> Result<()> {
        self.send(command::shutdown_ready()).await
    }

    /// Route an action through the registry and send its single result.
    /// If a temporary group completed, its members are unregistered with Neuro.
    pub async fn dispatch_action(&self, action: NeuroAction) -> Result<()> {
        let invocation = self.inner.registry.invoke(&action).await;
        self.send_result(&invocation.result).await?;
        if !invocation.retired.is_empty() {
            self.send(command::actions_unregister(&invocation.retired))
                .await?;
        }
        Ok(())
    }

    /// Re-send `actions/register` for everything in the local registry
    async fn reregister_all(&self) -> Result<()> {
        let actions = self.inner.registry.actions();
        debug!(count = actions.len(), "Re-registering all actions");
        if actions.is_empty() {
            return Ok(());
        }
        self.send(command::actions_register(&actions)).await
    }

    async fn handle_frame(&self, frame: &str) -> Result<()> {
        debug!("[recv] len={} json={}", frame.len(), preview(frame));
        let message = decode(frame)?;
        if message.game.is_some() {
            debug!(command = %message.command, "Ignoring `game` on inbound message");
        }

        match message.command.as_str() {
            names::ACTION => {
                let action: NeuroAction = parse_payload(&message, ACTION_REQUEST_FIELDS)?;
                let id = action.id.clone();
                lock(&self.inner.in_flight).insert(id.clone(), action.name.clone());
                let outcome = self.inner.hooks.handle_action(self, action).await;
                let unanswered = lock(&self.inner.in_flight).contains_key(&id);
                match outcome {
                    Err(err) if unanswered && !err.is_disconnect() => {
                        // Neuro still waits on this id
                        warn!(%id, "Action hook failed: {}", err);
                        self.send_result(&ActionResult::failure(id.as_str(), err.to_string()))
                            .await
                    }
                    outcome => outcome,
                }
            }
            names::ACTIONS_REREGISTER_ALL => self.reregister_all().await,
            names::SHUTDOWN_GRACEFUL => {
                let data: ShutdownGracefulData = parse_payload(&message, SHUTDOWN_GRACEFUL_FIELDS)?;
                self.inner
                    .hooks
                    .shutdown_graceful(self, data.wants_shutdown)
                    .await
            }
            names::SHUTDOWN_IMMEDIATE => self.inner.hooks.shutdown_immediate(self).await,
            other => {
                self.inner
                    .hooks
                    .handle_unknown_command(self, other, message.data.as_ref())
                    .await;
                Ok(())
            }
        }
    }
}

async fn read_loop(client: NeuroClient, mut reader: BoxReader, mut stop_rx: watch::Receiver<bool>) {
    let _release = ReleaseGuard(client.inner.clone());
    let game = client.inner.game_title.clone();

    let reason = loop {
        let frame = tokio::select! {
            biased;
            _ = stop_rx.changed() => break None,
            frame = reader.read_frame() => frame,
        };

        let outcome = match frame {
            Ok(frame) => client.handle_frame(&frame).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {}
            Err(err) if err.is_disconnect() => {
                info!(%game, "Connection ended: {}", err);
                break Some(err);
            }
            Err(err) if err.is_format_error() => {
                warn!(%game, "Dropping malformed message: {}", err);
            }
            Err(err) => {
                warn!(%game, "Failed to handle message: {}", err);
            }
        }
    };

    client.inner.set_state(ConnectionState::Closing);
    client.inner.hooks.disconnected(&client, reason.as_ref()).await;
}
