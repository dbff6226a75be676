//! In-memory transport
//!
//! Two connected ends backed by channels. Used by tests and by hosts that run
//! a game and the Neuro-side server in the same process.

use crate::transport::{BoxReader, BoxWriter, Connector, FrameReader, FrameWriter};
use async_trait::async_trait;
use neuro_core::{NeuroError, Result};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 64;

/// Reading half of an in-memory connection
pub struct MemoryReader {
    rx: mpsc::Receiver<String>,
}

/// Writing half of an in-memory connection
pub struct MemoryWriter {
    tx: Option<mpsc::Sender<String>>,
}

/// Create two connected ends. Frames written on one end are read on the other.
pub fn pair() -> ((MemoryReader, MemoryWriter), (MemoryReader, MemoryWriter)) {
    let (a_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (b_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);
    (
        (MemoryReader { rx: b_rx }, MemoryWriter { tx: Some(a_tx) }),
        (MemoryReader { rx: a_rx }, MemoryWriter { tx: Some(b_tx) }),
    )
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn read_frame(&mut self) -> Result<String> {
        self.rx.recv().await.ok_or(NeuroError::ConnectionClosed)
    }
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn write_frame(&mut self, frame: &str) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(NeuroError::ConnectionClosed)?;
        tx.send(frame.to_string())
            .await
            .map_err(|_| NeuroError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

/// Connector that hands out one prepared in-memory end
pub struct MemoryConnector {
    end: Mutex<Option<(MemoryReader, MemoryWriter)>>,
}

impl MemoryConnector {
    pub fn new(end: (MemoryReader, MemoryWriter)) -> Self {
        Self {
            end: Mutex::new(Some(end)),
        }
    }

    /// A connector whose handshake always fails
    pub fn refusing() -> Self {
        Self {
            end: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str, _timeout: Duration) -> Result<(BoxReader, BoxWriter)> {
        let end = self
            .end
            .lock()
            .map_err(|_| NeuroError::HandshakeFailed(format!("{url}: connector poisoned")))?
            .take();
        match end {
            Some((reader, writer)) => {
                let reader: BoxReader = Box::new(reader);
                let writer: BoxWriter = Box::new(writer);
                Ok((reader, writer))
            }
            None => Err(NeuroError::HandshakeFailed(format!("{url}: connection refused"))),
        }
    }
}
