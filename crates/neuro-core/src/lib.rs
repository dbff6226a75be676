//! # neuro-core
//!
//! Core types for the Neuro game protocol.
//!
//! This crate provides the pieces shared by game clients and the Neuro-side
//! server:
//! - The wire envelope codec and command builders
//! - Declarative structural validation of payloads
//! - Action name and schema checks
//! - The action registry
//! - The error taxonomy

pub mod action;
pub mod command;
pub mod error;
pub mod registry;
pub mod schema;
pub mod structure;

pub use action::{
    Action, ActionResult, ForceActionRequest, NeuroAction, check_action, check_action_name,
    deserialize_actions,
};
pub use command::{Message, decode, encode};
pub use error::{NeuroError, Result};
pub use registry::{ActionBinding, ActionHandler, ActionOutcome, ActionRegistry, GroupId, Invocation};
pub use structure::{Field, Kind, validate_structure};
