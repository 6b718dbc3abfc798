//! In-process transport
//!
//! Connects a client to a [`HubPeer`] over channels. The peer plays the
//! hub's role: it reads what the client sent and pushes frames back. Used by
//! tests and by embedders that bridge the protocol over another medium.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{FrameSink, FrameSource};
use crate::error::{ClientError, ClientResult};

type PeerFrame = Result<String, String>;

/// Client-side outbound half
pub struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

/// Client-side inbound half
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<PeerFrame>,
}

/// The hub's end of an in-process transport
pub struct HubPeer {
    to_client: Option<mpsc::UnboundedSender<PeerFrame>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

/// Create a connected sink/source pair and the peer on the other side
pub fn channel() -> (MemorySink, MemorySource, HubPeer) {
    let (client_tx, peer_rx) = mpsc::unbounded_channel();
    let (peer_tx, client_rx) = mpsc::unbounded_channel();
    (
        MemorySink {
            tx: Some(client_tx),
        },
        MemorySource { rx: client_rx },
        HubPeer {
            to_client: Some(peer_tx),
            from_client: peer_rx,
        },
    )
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_frame(&mut self, frame: String) -> ClientResult<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| ClientError::Transport("transport closed".to_string()))?;
        tx.send(frame)
            .map_err(|_| ClientError::Transport("peer went away".to_string()))
    }

    async fn close(&mut self) -> ClientResult<()> {
        self.tx = None;
        Ok(())
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_frame(&mut self) -> ClientResult<Option<String>> {
        match self.rx.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(message)) => Err(ClientError::Transport(message)),
            None => Ok(None),
        }
    }
}

impl HubPeer {
    /// Push a raw text frame to the client
    pub fn send_text(&self, frame: impl Into<String>) -> bool {
        match &self.to_client {
            Some(tx) => tx.send(Ok(frame.into())).is_ok(),
            None => false,
        }
    }

    /// Push a JSON frame to the client
    pub fn send_json(&self, value: &Value) -> bool {
        self.send_text(value.to_string())
    }

    /// Make the client's next read fail with a transport error
    pub fn fail(&self, message: impl Into<String>) -> bool {
        match &self.to_client {
            Some(tx) => tx.send(Err(message.into())).is_ok(),
            None => false,
        }
    }

    /// Next frame sent by the client, `None` once the client closed
    pub async fn recv_text(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next frame sent by the client, decoded as JSON
    ///
    /// Frames that are not JSON are skipped.
    pub async fn recv_json(&mut self) -> Option<Value> {
        while let Some(text) = self.recv_text().await {
            if let Ok(value) = serde_json::from_str(&text) {
                return Some(value);
            }
        }
        None
    }

    /// Close the hub side; the client's source reports end of stream
    pub fn close(&mut self) {
        self.to_client = None;
    }
}
