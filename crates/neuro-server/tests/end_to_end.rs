//! A real game client talking to the coordinator over the in-memory transport

use async_trait::async_trait;
use neuro_bridge::memory;
use neuro_client::{ClientConfig, ClientHooks, ConnectionState, NeuroClient};
use neuro_core::{
    Action, ActionBinding, ActionOutcome, ActionResult, ForceActionRequest, NeuroError, Result,
};
use neuro_server::{Coordinator, DecisionHook, ForceChoice, Origin, ServerConfig, SessionHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_test::assert_ok;

const WAIT: Duration = Duration::from_secs(2);

/// Neuro side: picks the last eligible action
struct Picker {
    results: mpsc::UnboundedSender<ActionResult>,
    context: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl DecisionHook for Picker {
    async fn add_context(&self, _origin: &Origin, message: &str, _silent: bool) {
        let _ = self.context.send(message.to_string());
    }

    async fn choose_force_action(
        &self,
        _origin: &Origin,
        _request: &ForceActionRequest,
        actions: &[Action],
    ) -> Result<ForceChoice> {
        actions
            .last()
            .map(|action| ForceChoice::new(action.name.clone()).with_data(r#"{"cell":4}"#))
            .ok_or_else(|| NeuroError::Handler("nothing to choose".into()))
    }

    async fn action_result(&self, _origin: &Origin, result: &ActionResult) {
        let _ = self.results.send(result.clone());
    }
}

/// Game side: registers a board once connected
struct TicTacToe {
    moves: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl ClientHooks for TicTacToe {
    async fn connect_succeeded(&self, client: &NeuroClient) -> Result<()> {
        client.send_startup().await?;
        let moves = self.moves.clone();
        client
            .register_actions(vec![
                ActionBinding::new(Action::new("forfeit", "Give up")).with_fn(|_| {
                    Ok(ActionOutcome::failure("Not allowed"))
                }),
                ActionBinding::new(Action::new("play", "Place an O").with_schema(
                    serde_json::json!({
                        "type": "object",
                        "properties": {"cell": {"type": "integer"}},
                        "required": ["cell"]
                    }),
                ))
                .with_fn(move |action| {
                    let data = action.data.clone().unwrap_or_default();
                    let _ = moves.send(data);
                    Ok(ActionOutcome::success(Some("Placed".into())))
                }),
            ])
            .await?;
        client.send_context("Game started, you are O", true).await
    }
}

struct Setup {
    client: NeuroClient,
    session: SessionHandle,
    coordinator: Coordinator<Picker>,
    results: mpsc::UnboundedReceiver<ActionResult>,
    context: mpsc::UnboundedReceiver<String>,
    moves: mpsc::UnboundedReceiver<String>,
}

async fn setup() -> Setup {
    setup_with(ServerConfig::default(), ClientConfig::default()).await
}

async fn setup_with(server_config: ServerConfig, client_config: ClientConfig) -> Setup {
    let (results_tx, results) = mpsc::unbounded_channel();
    let (context_tx, context) = mpsc::unbounded_channel();
    let (moves_tx, moves) = mpsc::unbounded_channel();

    let coordinator = Coordinator::new(
        Picker {
            results: results_tx,
            context: context_tx,
        },
        server_config,
    )
    .unwrap();
    let client = NeuroClient::new(
        "Tic Tac Toe",
        Arc::new(TicTacToe { moves: moves_tx }),
        client_config,
    )
    .unwrap();

    let ((server_reader, server_writer), (game_reader, game_writer)) = memory::pair();
    let session = coordinator
        .add_connection(Box::new(server_reader), Box::new(server_writer))
        .await;
    assert_ok!(
        client
            .attach(Box::new(game_reader), Box::new(game_writer))
            .await
    );

    Setup {
        client,
        session,
        coordinator,
        results,
        context,
        moves,
    }
}

async fn wait_registered(session: &SessionHandle, count: usize) {
    timeout(WAIT, async {
        while session.snapshot().await.unwrap().registered.len() != count {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registrations never arrived");
}

#[tokio::test]
async fn test_client_and_coordinator_agree_on_registrations() {
    let mut setup = setup().await;
    wait_registered(&setup.session, 2).await;

    let snapshot = setup.session.snapshot().await.unwrap();
    assert_eq!(snapshot.game_title.as_deref(), Some("Tic Tac Toe"));
    assert_eq!(snapshot.registered, setup.client.get_registered());

    let context = timeout(WAIT, setup.context.recv()).await.unwrap().unwrap();
    assert_eq!(context, "Game started, you are O");
}

#[tokio::test]
async fn test_force_is_answered_by_game_handler() {
    let mut setup = setup().await;
    wait_registered(&setup.session, 2).await;

    assert_ok!(
        setup
            .client
            .send_force_action(Some("X in the corner"), "Your move", &["forfeit", "play"], false)
            .await
    );

    let data = timeout(WAIT, setup.moves.recv()).await.unwrap().unwrap();
    assert_eq!(data, r#"{"cell":4}"#);

    let result = timeout(WAIT, setup.results.recv()).await.unwrap().unwrap();
    assert!(result.success);
    assert_eq!(result.message.as_deref(), Some("Placed"));

    timeout(WAIT, async {
        while setup.client.has_pending_force() || setup.session.snapshot().await.unwrap().force_pending {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("force never resolved");
}

#[tokio::test]
async fn test_force_failing_every_attempt_expires_on_both_sides() {
    let server_config = ServerConfig {
        force_attempts: 2,
        ..Default::default()
    };
    let client_config = ClientConfig {
        force_timeout: Duration::from_millis(300),
        ..Default::default()
    };
    let mut setup = setup_with(server_config, client_config).await;
    wait_registered(&setup.session, 2).await;

    assert_ok!(
        setup
            .client
            .send_force_action(None, "Concede?", &["forfeit"], false)
            .await
    );
    for _ in 0..2 {
        let result = timeout(WAIT, setup.results.recv()).await.unwrap().unwrap();
        assert!(!result.success);
    }

    timeout(WAIT, async {
        while setup.session.snapshot().await.unwrap().force_pending {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server never gave up");

    timeout(WAIT, async {
        while setup.client.has_pending_force() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client force never expired");

    assert_ok!(
        setup
            .client
            .send_force_action(None, "Your move", &["play"], false)
            .await
    );
    let data = timeout(WAIT, setup.moves.recv()).await.unwrap().unwrap();
    assert_eq!(data, r#"{"cell":4}"#);
}

#[tokio::test]
async fn test_reregister_all_round_trip() {
    let setup = setup().await;
    wait_registered(&setup.session, 2).await;

    assert_ok!(setup.session.request_reregister_all().await);
    // Duplicates are ignored on the Neuro side, so nothing changes
    sleep(Duration::from_millis(50)).await;
    assert_eq!(setup.session.snapshot().await.unwrap().registered.len(), 2);
    assert_eq!(setup.client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_direct_submission_of_failing_action() {
    let setup = setup().await;
    wait_registered(&setup.session, 2).await;

    let result = setup
        .session
        .submit_action("forfeit", None, WAIT)
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.message.as_deref(), Some("Not allowed"));
}

#[tokio::test]
async fn test_server_shutdown_disconnects_client() {
    let setup = setup().await;
    wait_registered(&setup.session, 2).await;

    setup.coordinator.shutdown().await;
    timeout(WAIT, setup.client.wait_closed()).await.unwrap();
    assert_eq!(setup.client.state(), ConnectionState::Disconnected);
    assert!(setup.client.get_registered().is_empty());
}

#[tokio::test]
async fn test_client_stop_closes_session() {
    let setup = setup().await;
    wait_registered(&setup.session, 2).await;

    setup.client.stop();
    timeout(WAIT, setup.session.closed()).await.unwrap();
    assert_eq!(setup.coordinator.session_count().await, 0);
}
