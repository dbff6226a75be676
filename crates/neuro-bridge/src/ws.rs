//! WebSocket transport
//!
//! One JSON message per text frame. Ping/pong is handled by tungstenite;
//! binary frames are accepted if they hold UTF-8 text.

use crate::transport::{BoxReader, BoxWriter, Connector, FrameReader, FrameWriter};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use neuro_core::{NeuroError, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// WebSocket read wrapper
pub struct WsReader<S>(pub SplitStream<WebSocketStream<S>>);

/// WebSocket write wrapper
pub struct WsWriter<S>(pub SplitSink<WebSocketStream<S>, Message>);

#[async_trait]
impl<S> FrameReader for WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read_frame(&mut self) -> Result<String> {
        loop {
            match self.0.next().await {
                None => return Err(NeuroError::ConnectionClosed),
                Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data.to_vec()).map_err(|e| {
                        NeuroError::ProtocolFormat(format!("binary frame is not UTF-8: {}", e))
                    });
                }
                Some(Ok(Message::Close(_))) => return Err(NeuroError::ConnectionClosed),
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    return Err(NeuroError::ConnectionClosed);
                }
                Some(Err(e)) => {
                    return Err(NeuroError::Transport(format!("WebSocket read failed: {}", e)));
                }
            }
        }
    }
}

#[async_trait]
impl<S> FrameWriter for WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn write_frame(&mut self, frame: &str) -> Result<()> {
        self.0
            .send(Message::Text(frame.to_string().into()))
            .await
            .map_err(|e| match e {
                WsError::ConnectionClosed | WsError::AlreadyClosed => NeuroError::ConnectionClosed,
                other => NeuroError::Transport(format!("WebSocket write failed: {}", other)),
            })
    }

    async fn close(&mut self) -> Result<()> {
        self.0
            .close()
            .await
            .map_err(|e| NeuroError::Transport(format!("WebSocket close failed: {}", e)))
    }
}

fn split<S>(stream: WebSocketStream<S>) -> (WsReader<S>, WsWriter<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (sink, stream) = stream.split();
    (WsReader(stream), WsWriter(sink))
}

/// Connect to a Neuro WebSocket server
pub async fn connect(
    url: &str,
    timeout: Duration,
) -> Result<(
    WsReader<MaybeTlsStream<TcpStream>>,
    WsWriter<MaybeTlsStream<TcpStream>>,
)> {
    let (stream, _response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url))
        .await
        .map_err(|_| NeuroError::Timeout(format!("connect to {} exceeded {:?}", url, timeout)))?
        .map_err(|e| NeuroError::HandshakeFailed(format!("{}: {}", url, e)))?;
    Ok(split(stream))
}

/// Accept the WebSocket handshake on an inbound TCP connection
pub async fn accept(
    stream: TcpStream,
    timeout: Duration,
) -> Result<(WsReader<TcpStream>, WsWriter<TcpStream>)> {
    // Disable Nagle's algorithm for low latency
    stream
        .set_nodelay(true)
        .map_err(|e| NeuroError::Transport(format!("Failed to set TCP_NODELAY: {}", e)))?;

    let stream = tokio::time::timeout(timeout, tokio_tungstenite::accept_async(stream))
        .await
        .map_err(|_| NeuroError::Timeout(format!("handshake exceeded {:?}", timeout)))?
        .map_err(|e| NeuroError::HandshakeFailed(e.to_string()))?;
    Ok(split(stream))
}

/// [`Connector`] for `ws://` URLs
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str, timeout: Duration) -> Result<(BoxReader, BoxWriter)> {
        let (reader, writer) = connect(url, timeout).await?;
        let reader: BoxReader = Box::new(reader);
        let writer: BoxWriter = Box::new(writer);
        Ok((reader, writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_text_frames_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut reader, mut writer) = accept(stream, Duration::from_secs(5)).await.unwrap();
            let frame = reader.read_frame().await.unwrap();
            writer.write_frame(&format!("echo:{frame}")).await.unwrap();
            writer.close().await.unwrap();
        });

        let (mut reader, mut writer) = connect(&format!("ws://{addr}"), Duration::from_secs(5))
            .await
            .unwrap();
        writer.write_frame(r#"{"command":"startup","game":"g"}"#).await.unwrap();
        assert_eq!(
            reader.read_frame().await.unwrap(),
            r#"echo:{"command":"startup","game":"g"}"#
        );
        assert!(matches!(
            reader.read_frame().await,
            Err(NeuroError::ConnectionClosed)
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused_is_handshake_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = WsConnector
            .connect(&format!("ws://{addr}"), Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(NeuroError::HandshakeFailed(_))));
    }
}
