//! Transport boundary
//!
//! The engine talks to the hub through a pair of halves: a [`FrameSink`]
//! used only by the writer task and a [`FrameSource`] owned by the single
//! read loop. Each frame is one JSON message.

pub mod memory;
pub mod websocket;

use async_trait::async_trait;

use crate::error::ClientResult;

/// Outbound half of a transport
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Send one text frame
    async fn send_frame(&mut self, frame: String) -> ClientResult<()>;

    /// Close the transport; further sends fail
    async fn close(&mut self) -> ClientResult<()>;
}

/// Inbound half of a transport
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Receive the next text frame, `Ok(None)` once the transport closed
    async fn next_frame(&mut self) -> ClientResult<Option<String>>;
}

/// Get the WebSocket API URL from a hub base URL
///
/// `http://host:8123` becomes `ws://host:8123/api/websocket`. URLs that
/// already use `ws://` or `wss://` are taken as the full endpoint.
pub fn websocket_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.starts_with("ws://") || base.starts_with("wss://") {
        return base.to_string();
    }
    let url = base
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    if url.ends_with("/api/websocket") {
        url
    } else {
        format!("{}/api/websocket", url)
    }
}
