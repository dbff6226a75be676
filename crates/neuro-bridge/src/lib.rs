//! Transports for the Neuro protocol
//!
//! This crate provides:
//! - Frame reader/writer traits the protocol engines are written against
//! - A WebSocket transport (one JSON message per text frame)
//! - An in-memory transport for tests and embedding
//! - The per-connection writer task

pub mod memory;
pub mod transport;
pub mod ws;

pub use transport::{
    BoxReader, BoxWriter, Connector, FrameReader, FrameSender, FrameWriter, preview, spawn_writer,
};
