//! Per-connection session actor
//!
//! Each connected game gets one task that exclusively owns its game title,
//! action registry, pending force and result correlation table. Everything
//! else talks to it through a [`SessionHandle`].

use crate::config::ServerConfig;
use crate::hooks::{DecisionHook, Origin};
use neuro_bridge::{BoxReader, BoxWriter, FrameSender, preview, spawn_writer};
use neuro_core::command::{
    self, ActionResultData, CONTEXT_FIELDS, ContextData, FORCE_FIELDS, ForceActionsData, Message,
    REGISTER_FIELDS, RESULT_FIELDS, RegisterActionsData, UNREGISTER_FIELDS,
    UnregisterActionsData, names, parse_payload,
};
use neuro_core::{
    Action, ActionBinding, ActionRegistry, ActionResult, ForceActionRequest, NeuroAction,
    NeuroError, Result, decode, deserialize_actions,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Unique identifier of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Point-in-time view of a session, produced by the session task
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub game_title: Option<String>,
    /// Registered action names in registration order
    pub registered: Vec<String>,
    pub force_pending: bool,
}

pub(crate) enum Event {
    /// Send an `action` and hand back a receiver for its result
    Submit {
        action: NeuroAction,
        reply: oneshot::Sender<Result<oneshot::Receiver<ActionResult>>>,
    },
    /// Stop waiting for the result of `id`
    Expire { id: String },
    ForceFinished { generation: u64 },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Send {
        message: Message,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Send `name` to the game and wait up to `wait` for its result
pub(crate) async fn request_action(
    events: &mpsc::Sender<Event>,
    name: &str,
    data: Option<String>,
    wait: Duration,
) -> Result<ActionResult> {
    if wait.is_zero() {
        return Err(NeuroError::Config("action timeout must be non-zero".into()));
    }

    let action = NeuroAction {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        data,
    };
    let id = action.id.clone();
    let (reply, reply_rx) = oneshot::channel();
    events
        .send(Event::Submit { action, reply })
        .await
        .map_err(|_| NeuroError::NotConnected)?;
    let result_rx = reply_rx.await.map_err(|_| NeuroError::NotConnected)??;

    match tokio::time::timeout(wait, result_rx).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(_)) => Err(NeuroError::Cancelled),
        Err(_) => {
            let _ = events.send(Event::Expire { id: id.clone() }).await;
            Err(NeuroError::Timeout(format!(
                "no result for action {} within {:?}",
                id, wait
            )))
        }
    }
}

/// Handle to a running session. Cheap to clone.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    events: mpsc::Sender<Event>,
    stop_tx: Arc<watch::Sender<bool>>,
    closed_rx: watch::Receiver<bool>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Ask the session task for its current state
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, reply_rx) = oneshot::channel();
        self.events
            .send(Event::Snapshot(reply))
            .await
            .map_err(|_| NeuroError::NotConnected)?;
        reply_rx.await.map_err(|_| NeuroError::NotConnected)
    }

    /// Run a registered action outside of any force and wait for its result
    pub async fn submit_action(
        &self,
        name: &str,
        data: Option<String>,
        timeout: Duration,
    ) -> Result<ActionResult> {
        request_action(&self.events, name, data, timeout).await
    }

    /// Ask the game to register all of its actions again
    pub async fn request_reregister_all(&self) -> Result<()> {
        self.post(command::reregister_all()).await
    }

    /// Ask the game to shut down at the next safe point, or cancel that ask
    pub async fn request_graceful_shutdown(&self, wants_shutdown: bool) -> Result<()> {
        self.post(command::shutdown_graceful(wants_shutdown)).await
    }

    pub async fn request_immediate_shutdown(&self) -> Result<()> {
        self.post(command::shutdown_immediate()).await
    }

    async fn post(&self, message: Message) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.events
            .send(Event::Send { message, reply })
            .await
            .map_err(|_| NeuroError::NotConnected)?;
        reply_rx.await.map_err(|_| NeuroError::NotConnected)?
    }

    /// Close the connection. Pending waits resolve as cancelled.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// True once the session is gone and removed from its coordinator
    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Wait until the session is gone and removed from its coordinator
    pub async fn closed(&self) {
        let mut closed_rx = self.closed_rx.clone();
        let _ = closed_rx.wait_for(|closed| *closed).await;
    }
}

struct PendingForce {
    generation: u64,
    request: ForceActionRequest,
    /// Dropping this cancels the force task
    _cancel: oneshot::Sender<()>,
}

struct Session<H> {
    id: SessionId,
    hook: Arc<H>,
    config: ServerConfig,
    game_title: Option<String>,
    registry: ActionRegistry,
    force: Option<PendingForce>,
    force_generation: u64,
    results: HashMap<String, oneshot::Sender<ActionResult>>,
    sender: FrameSender,
    events_tx: mpsc::Sender<Event>,
}

/// Set up a session for an accepted connection.
///
/// Returns the handle, the sender that marks the handle closed, and the
/// session task for the caller to spawn.
pub(crate) fn open_session<H: DecisionHook>(
    id: SessionId,
    hook: Arc<H>,
    config: ServerConfig,
    reader: BoxReader,
    writer: BoxWriter,
) -> (
    SessionHandle,
    watch::Sender<bool>,
    impl Future<Output = ()> + Send + 'static,
) {
    let (sender, _writer_task) = spawn_writer(writer, config.outbound_buffer, config.write_timeout);
    let (events_tx, events_rx) = mpsc::channel(config.outbound_buffer);
    let (stop_tx, stop_rx) = watch::channel(false);
    let (closed_tx, closed_rx) = watch::channel(false);

    let handle = SessionHandle {
        id,
        events: events_tx.clone(),
        stop_tx: Arc::new(stop_tx),
        closed_rx,
    };
    let session = Session {
        id,
        hook,
        config,
        game_title: None,
        registry: ActionRegistry::new(),
        force: None,
        force_generation: 0,
        results: HashMap::new(),
        sender,
        events_tx,
    };
    (handle, closed_tx, session.run(reader, events_rx, stop_rx))
}

impl<H: DecisionHook> Session<H> {
    fn origin(&self) -> Origin {
        Origin {
            session: self.id,
            game: self.game_title.clone(),
        }
    }

    async fn run(
        mut self,
        mut reader: BoxReader,
        mut events: mpsc::Receiver<Event>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        info!(session = %self.id, "Session opened");

        let reason = loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => break None,
                Some(event) = events.recv() => {
                    if let Err(err) = self.handle_event(event).await {
                        if err.is_disconnect() {
                            break Some(err);
                        }
                        warn!(session = %self.id, "Session event failed: {}", err);
                    }
                }
                frame = reader.read_frame() => {
                    let outcome = match frame {
                        Ok(frame) => self.handle_frame(&frame).await,
                        Err(err) => Err(err),
                    };
                    match outcome {
                        Ok(()) => {}
                        Err(err) if err.is_disconnect() => break Some(err),
                        Err(err) if err.is_format_error() => {
                            warn!(session = %self.id, "Dropping malformed message: {}", err);
                        }
                        Err(err) => warn!(session = %self.id, "Failed to handle message: {}", err),
                    }
                }
            }
        };

        match reason {
            Some(err) => info!(session = %self.id, game = ?self.game_title, "Session ended: {}", err),
            None => info!(session = %self.id, game = ?self.game_title, "Session stopped"),
        }
        // Dropping self releases the registry, cancels the force task and
        // fails every outstanding result wait.
    }

    async fn send(&self, message: &Message) -> Result<()> {
        let frame = message.encode()?;
        self.sender.send(frame).await
    }

    async fn handle_event(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Submit { action, reply } => {
                if !self.registry.contains(&action.name) {
                    let _ = reply.send(Err(NeuroError::ProtocolSequence(format!(
                        "action '{}' is not registered",
                        action.name
                    ))));
                    return Ok(());
                }

                let (result_tx, result_rx) = oneshot::channel();
                self.results.insert(action.id.clone(), result_tx);
                debug!(session = %self.id, id = %action.id, action = %action.name, "Sending action");
                match self.send(&command::action(&action)).await {
                    Ok(()) => {
                        let _ = reply.send(Ok(result_rx));
                        Ok(())
                    }
                    Err(err) => {
                        self.results.remove(&action.id);
                        let _ = reply.send(Err(NeuroError::Transport(err.to_string())));
                        Err(err)
                    }
                }
            }
            Event::Expire { id } => {
                if self.results.remove(&id).is_some() {
                    debug!(session = %self.id, %id, "Stopped waiting for action result");
                }
                Ok(())
            }
            Event::ForceFinished { generation } => {
                if self
                    .force
                    .as_ref()
                    .is_some_and(|force| force.generation == generation)
                {
                    self.force = None;
                }
                Ok(())
            }
            Event::Snapshot(reply) => {
                let _ = reply.send(SessionSnapshot {
                    id: self.id,
                    game_title: self.game_title.clone(),
                    registered: self.registry.get_registered(),
                    force_pending: self.force.is_some(),
                });
                Ok(())
            }
            Event::Send { message, reply } => {
                let result = self.send(&message).await;
                let disconnected = matches!(&result, Err(err) if err.is_disconnect());
                let _ = reply.send(result);
                if disconnected {
                    Err(NeuroError::ConnectionClosed)
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn handle_frame(&mut self, frame: &str) -> Result<()> {
        debug!(session = %self.id, "[recv] len={} json={}", frame.len(), preview(frame));
        let message = decode(frame)?;
        let Some(game) = message.game.as_deref() else {
            return Err(NeuroError::ProtocolFormat(format!(
                "`{}` message without `game`",
                message.command
            )));
        };
        self.track_game(&message.command, game);

        match message.command.as_str() {
            names::STARTUP => {
                self.reset();
                self.hook.session_started(&self.origin()).await;
                Ok(())
            }
            names::CONTEXT => {
                let data: ContextData = parse_payload(&message, CONTEXT_FIELDS)?;
                self.hook
                    .add_context(&self.origin(), &data.message, data.silent)
                    .await;
                Ok(())
            }
            names::ACTIONS_REGISTER => {
                let data: RegisterActionsData = parse_payload(&message, REGISTER_FIELDS)?;
                self.register(&data.actions)
            }
            names::ACTIONS_UNREGISTER => {
                let data: UnregisterActionsData = parse_payload(&message, UNREGISTER_FIELDS)?;
                let removed = self.registry.unregister(&data.action_names);
                debug!(session = %self.id, ?removed, "Unregistered actions");
                Ok(())
            }
            names::ACTIONS_FORCE => {
                let data: ForceActionsData = parse_payload(&message, FORCE_FIELDS)?;
                self.start_force(data.into());
                Ok(())
            }
            names::ACTION_RESULT => {
                let data: ActionResultData = parse_payload(&message, RESULT_FIELDS)?;
                self.complete(data.into()).await;
                Ok(())
            }
            names::SHUTDOWN_READY => {
                self.hook.shutdown_ready(&self.origin()).await;
                Ok(())
            }
            other => {
                warn!(session = %self.id, command = other, "Ignoring unknown command");
                Ok(())
            }
        }
    }

    fn track_game(&mut self, command: &str, game: &str) {
        if command == names::STARTUP {
            if let Some(previous) = self.game_title.as_deref().filter(|title| *title != game) {
                warn!(session = %self.id, "Game title changed from '{}' to '{}'", previous, game);
            }
            self.game_title = Some(game.to_string());
            return;
        }

        match self.game_title.as_deref() {
            None => warn!(session = %self.id, command, "Message received before `startup`"),
            Some(title) if title != game => {
                warn!(session = %self.id, command, expected = title, got = game, "Game title mismatch")
            }
            Some(_) => {}
        }
    }

    /// `startup`: the game forgot everything, so do we
    fn reset(&mut self) {
        let cleared = self.registry.clear();
        if !cleared.is_empty() {
            debug!(session = %self.id, count = cleared.len(), "Startup cleared registered actions");
        }
        self.results.clear();
        if self.force.take().is_some() {
            debug!(session = %self.id, "Startup cancelled the open force");
        }
    }

    /// Register what the game sent, skipping names that are already known
    fn register(&mut self, raw: &[serde_json::Value]) -> Result<()> {
        let actions = deserialize_actions(raw)?;
        let mut seen = HashSet::new();
        let mut fresh = Vec::with_capacity(actions.len());
        for action in actions {
            if self.registry.contains(&action.name) || !seen.insert(action.name.clone()) {
                warn!(session = %self.id, action = %action.name, "Ignoring duplicate registration");
                continue;
            }
            fresh.push(ActionBinding::from(action));
        }

        let added = self.registry.register(fresh)?;
        debug!(session = %self.id, count = added.len(), "Registered actions");
        Ok(())
    }

    fn start_force(&mut self, request: ForceActionRequest) {
        if let Some(pending) = &self.force {
            warn!(
                session = %self.id,
                query = %request.query,
                pending = %pending.request.query,
                "Dropping `actions/force` while another force is pending"
            );
            return;
        }

        let actions: Vec<Action> = request
            .action_names
            .iter()
            .filter_map(|name| {
                let action = self.registry.get(name);
                if action.is_none() {
                    warn!(session = %self.id, action = %name, "Force names an unregistered action");
                }
                action
            })
            .collect();
        if actions.is_empty() {
            warn!(session = %self.id, query = %request.query, "Dropping force with no registered actions");
            return;
        }

        let request = ForceActionRequest {
            action_names: actions.iter().map(|action| action.name.clone()).collect(),
            ..request
        };
        self.force_generation += 1;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.force = Some(PendingForce {
            generation: self.force_generation,
            request: request.clone(),
            _cancel: cancel_tx,
        });

        let task = ForceTask {
            hook: self.hook.clone(),
            origin: self.origin(),
            events: self.events_tx.clone(),
            timeout: self.config.force_timeout,
            attempts: self.config.force_attempts,
            generation: self.force_generation,
        };
        tokio::spawn(task.run(request, actions, cancel_rx));
    }

    async fn complete(&mut self, result: ActionResult) {
        let Some(waiter) = self.results.remove(&result.action_id) else {
            let err = NeuroError::UnknownResultCorrelation(result.action_id.clone());
            warn!(session = %self.id, "Ignoring result: {}", err);
            return;
        };

        let origin = self.origin();
        self.hook.action_result(&origin, &result).await;
        if let Some(message) = result.message.as_deref().filter(|m| !m.is_empty()) {
            self.hook.add_context(&origin, message, true).await;
        }
        let _ = waiter.send(result);
    }
}

/// Drives one force: ask the hook, send the action, wait, retry on failure
struct ForceTask<H> {
    hook: Arc<H>,
    origin: Origin,
    events: mpsc::Sender<Event>,
    timeout: Duration,
    attempts: u32,
    generation: u64,
}

impl<H: DecisionHook> ForceTask<H> {
    async fn run(
        self,
        request: ForceActionRequest,
        actions: Vec<Action>,
        mut cancel: oneshot::Receiver<()>,
    ) {
        let outcome = tokio::select! {
            _ = &mut cancel => Err(NeuroError::Cancelled),
            outcome = self.attempt_all(&request, &actions) => outcome,
        };

        match outcome {
            Ok(Some(result)) => {
                debug!(session = %self.origin.session, id = %result.action_id, "Force resolved")
            }
            Ok(None) => warn!(
                session = %self.origin.session,
                attempts = self.attempts,
                "Forced action failed on every attempt"
            ),
            Err(NeuroError::Timeout(_)) => self.hook.force_timed_out(&self.origin, &request).await,
            Err(NeuroError::Cancelled | NeuroError::NotConnected) => {
                self.hook.force_cancelled(&self.origin, &request).await
            }
            Err(err) => warn!(session = %self.origin.session, "Force aborted: {}", err),
        }

        let _ = self
            .events
            .send(Event::ForceFinished {
                generation: self.generation,
            })
            .await;
    }

    async fn attempt_all(
        &self,
        request: &ForceActionRequest,
        actions: &[Action],
    ) -> Result<Option<ActionResult>> {
        for attempt in 1..=self.attempts {
            let choice = self
                .hook
                .choose_force_action(&self.origin, request, actions)
                .await?;
            if !request.action_names.contains(&choice.name) {
                return Err(NeuroError::Handler(format!(
                    "decision hook chose ineligible action '{}'",
                    choice.name
                )));
            }

            let result = request_action(&self.events, &choice.name, choice.data, self.timeout).await?;
            if result.success {
                return Ok(Some(result));
            }
            debug!(
                session = %self.origin.session,
                attempt,
                action = %choice.name,
                "Forced action failed, retrying"
            );
        }
        Ok(None)
    }
}
