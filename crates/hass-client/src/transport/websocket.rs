//! WebSocket transport built on tokio-tungstenite
//!
//! `wss://` endpoints use rustls with the webpki root store.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use super::{FrameSink, FrameSource};
use crate::error::{ClientError, ClientResult};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Outbound half of a WebSocket connection
pub struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

/// Inbound half of a WebSocket connection
pub struct WsSource {
    inner: SplitStream<WsStream>,
}

/// Open a WebSocket connection to `url` and split it into halves
pub async fn connect(url: &str, connect_timeout: Duration) -> ClientResult<(WsSink, WsSource)> {
    // Fails harmlessly when a provider is already installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    debug!(url = %url, "Opening WebSocket");
    let (stream, _response) = timeout(connect_timeout, connect_async(url))
        .await
        .map_err(|_| ClientError::Transport(format!("connect to {} timed out", url)))??;
    let (sink, source) = stream.split();
    Ok((WsSink { inner: sink }, WsSource { inner: source }))
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_frame(&mut self, frame: String) -> ClientResult<()> {
        trace!(frame = %frame, "WS SEND");
        self.inner.send(Message::Text(frame)).await?;
        Ok(())
    }

    async fn close(&mut self) -> ClientResult<()> {
        self.inner.close().await?;
        Ok(())
    }
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> ClientResult<Option<String>> {
        while let Some(msg) = self.inner.next().await {
            match msg? {
                Message::Text(text) => {
                    trace!(frame = %text, "WS RECV");
                    return Ok(Some(text));
                }
                Message::Binary(data) => {
                    let text = String::from_utf8(data).map_err(|e| {
                        ClientError::protocol(format!("binary frame is not UTF-8: {}", e))
                    })?;
                    return Ok(Some(text));
                }
                Message::Close(frame) => {
                    debug!(?frame, "WebSocket closed by hub");
                    return Ok(None);
                }
                // Pings are answered by tungstenite
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        Ok(None)
    }
}
