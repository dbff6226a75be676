//! # neuro-server
//!
//! Neuro-side coordinator for the Neuro game protocol.
//!
//! This crate provides:
//! - `Coordinator`, which accepts game connections and owns the session map
//! - A session actor per connection with its own action registry
//! - Force-action correlation with timeouts, retries and cancellation
//! - `DecisionHook`, the trait a model integration implements

pub mod config;
pub mod coordinator;
pub mod hooks;
pub mod session;

pub use config::ServerConfig;
pub use coordinator::Coordinator;
pub use hooks::{DecisionHook, ForceChoice, Origin};
pub use session::{SessionHandle, SessionId, SessionSnapshot};
