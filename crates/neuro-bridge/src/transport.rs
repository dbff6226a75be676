//! Transport abstractions
//!
//! Engines read and write whole text frames through [`FrameReader`] and
//! [`FrameWriter`]. Writes go through a dedicated writer task so that any
//! task holding a [`FrameSender`] can send while the read loop stays busy.

use async_trait::async_trait;
use neuro_core::{NeuroError, Result};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Trait for reading frames from a transport
#[async_trait]
pub trait FrameReader: Send {
    /// Read the next text frame.
    /// Returns `NeuroError::ConnectionClosed` once the peer has gone away.
    async fn read_frame(&mut self) -> Result<String>;
}

/// Trait for writing frames to a transport
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one text frame
    async fn write_frame(&mut self, frame: &str) -> Result<()>;

    /// Close the connection
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub type BoxReader = Box<dyn FrameReader>;
pub type BoxWriter = Box<dyn FrameWriter>;

/// Opens client connections
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `url`, giving up after `timeout`
    async fn connect(&self, url: &str, timeout: Duration) -> Result<(BoxReader, BoxWriter)>;
}

/// First 200 characters of a frame, for logs
pub fn preview(frame: &str) -> String {
    frame.chars().take(200).collect()
}

struct Outbound {
    frame: String,
    done: oneshot::Sender<Result<()>>,
}

/// Handle for queueing frames on a connection's writer task
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Outbound>,
    write_timeout: Duration,
}

impl FrameSender {
    /// Queue a frame and wait until it has been written.
    ///
    /// Fails with `Timeout` if queueing plus writing takes longer than the
    /// configured write timeout.
    pub async fn send(&self, frame: String) -> Result<()> {
        let (done, done_rx) = oneshot::channel();
        let write = async {
            self.tx
                .send(Outbound { frame, done })
                .await
                .map_err(|_| NeuroError::NotConnected)?;
            done_rx.await.map_err(|_| NeuroError::ConnectionClosed)?
        };

        tokio::time::timeout(self.write_timeout, write)
            .await
            .map_err(|_| NeuroError::Timeout(format!("write exceeded {:?}", self.write_timeout)))?
    }

    /// True once the writer task has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task for a connection.
///
/// The task exits and closes `writer` when every [`FrameSender`] clone has
/// been dropped, or after the first failed write.
pub fn spawn_writer(
    writer: BoxWriter,
    buffer: usize,
    write_timeout: Duration,
) -> (FrameSender, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let handle = tokio::spawn(writer_task(writer, rx, write_timeout));
    (FrameSender { tx, write_timeout }, handle)
}

async fn writer_task(mut writer: BoxWriter, mut rx: mpsc::Receiver<Outbound>, write_timeout: Duration) {
    while let Some(Outbound { frame, done }) = rx.recv().await {
        debug!("[send] len={} json={}", frame.len(), preview(&frame));

        let result = match tokio::time::timeout(write_timeout, writer.write_frame(&frame)).await {
            Ok(result) => result,
            Err(_) => Err(NeuroError::Timeout(format!(
                "write exceeded {:?}",
                write_timeout
            ))),
        };
        let failed = result.as_ref().err().map(|e| e.to_string());
        let _ = done.send(result);

        if let Some(reason) = failed {
            error!("Writer task failed: {}", reason);
            break;
        }
    }

    // Best effort; the peer may already be gone
    let _ = tokio::time::timeout(write_timeout, writer.close()).await;
    debug!("Writer task exiting");
}
