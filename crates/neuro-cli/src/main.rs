//! Neuro protocol server
//!
//! Listens for game connections and answers every force with the first
//! eligible action. Useful for exercising a game integration without a model.
//!
//! Usage: `neuro-server [address] [port]` (default `127.0.0.1 8000`).
//! Set `RUST_LOG` to change verbosity.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use neuro_core::{Action, ForceActionRequest, NeuroError};
use neuro_server::{Coordinator, DecisionHook, ForceChoice, Origin, ServerConfig};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDRESS: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;

/// Stand-in for a model: logs context and always takes the first choice
struct AutoDecision;

#[async_trait]
impl DecisionHook for AutoDecision {
    async fn add_context(&self, origin: &Origin, message: &str, silent: bool) {
        info!(session = %origin.session, game = ?origin.game, silent, "Context: {}", message);
    }

    async fn choose_force_action(
        &self,
        origin: &Origin,
        request: &ForceActionRequest,
        actions: &[Action],
    ) -> neuro_core::Result<ForceChoice> {
        let action = actions
            .first()
            .ok_or_else(|| NeuroError::Handler("no eligible actions".into()))?;
        info!(
            session = %origin.session,
            query = %request.query,
            action = %action.name,
            "Answering force"
        );
        Ok(auto_choice(action))
    }
}

/// Actions with a schema get an empty object, the rest no data
fn auto_choice(action: &Action) -> ForceChoice {
    let choice = ForceChoice::new(action.name.clone());
    match action.schema {
        Some(_) => choice.with_data("{}"),
        None => choice,
    }
}

fn parse_args(args: &[String]) -> Result<(String, u16)> {
    let address = args.first().map(String::as_str).unwrap_or(DEFAULT_ADDRESS);
    let port = match args.get(1) {
        Some(port) => port
            .parse()
            .with_context(|| format!("invalid port '{}'", port))?,
        None => DEFAULT_PORT,
    };
    if args.len() > 2 {
        bail!("usage: neuro-server [address] [port]");
    }
    Ok((address.to_string(), port))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (address, port) = parse_args(&args)?;

    let coordinator = Coordinator::new(AutoDecision, ServerConfig::default())?;
    let listener = TcpListener::bind((address.as_str(), port))
        .await
        .with_context(|| format!("failed to bind {}:{}", address, port))?;
    info!("Neuro server starting on ws://{}:{}", address, port);

    tokio::select! {
        result = coordinator.serve(listener) => result?,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutting down");
            coordinator.shutdown().await;
        }
    }

    Ok(())
}
