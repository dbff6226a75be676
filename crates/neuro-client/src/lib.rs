//! # neuro-client
//!
//! Game-side engine for the Neuro protocol.
//!
//! A game builds a [`NeuroClient`] with its title and a [`ClientHooks`]
//! implementation, connects it, and then registers actions, sends context,
//! and forces choices. Incoming action requests are routed to the hooks or,
//! by default, to the handlers bound in the action registry.
//!
//! ```ignore
//! let client = NeuroClient::new("Tic Tac Toe", Arc::new(MyGame), ClientConfig::from_env())?;
//! client.connect(&WsConnector).await?;
//! client.wait_closed().await;
//! ```

pub mod config;
pub mod engine;
pub mod hooks;

pub use config::ClientConfig;
pub use engine::{ConnectionState, NeuroClient};
pub use hooks::{ClientHooks, DefaultHooks};
