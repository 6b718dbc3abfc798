//! Connection supervision
//!
//! Owns the two tasks of an authenticated connection:
//!
//! - the read loop, the only place inbound frames are decoded, so frames are
//!   processed in arrival order. Results go to the correlator, events to the
//!   dispatcher. It never runs caller code: settling a slot only wakes the
//!   awaiting task, handlers run on dispatcher workers and the disconnect
//!   notification goes to the blocking pool.
//! - the writer, which drains the outbound queue into the sink.
//!
//! Either task stopping stops the other. When the read loop ends, every
//! outstanding command is failed and all subscriptions are dropped. There
//! is no reconnection here.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::decode_frame;
use crate::correlator::CommandCorrelator;
use crate::dispatcher::EventDispatcher;
use crate::error::{ClientError, ClientResult};
use crate::messages::{CommandResultMessage, IncomingMessage};
use crate::observer::{ClientObserver, ConnectionState, DisconnectReason};
use crate::transport::{FrameSink, FrameSource};

type ShutdownSender = Arc<watch::Sender<Option<DisconnectReason>>>;

/// Running connection tasks
pub struct Supervisor {
    outbound: mpsc::Sender<String>,
    shutdown: ShutdownSender,
    state: watch::Receiver<ConnectionState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Everything the read loop routes frames to
pub struct Routes {
    pub correlator: Arc<CommandCorrelator>,
    pub dispatcher: Arc<EventDispatcher>,
    pub observer: Arc<dyn ClientObserver>,
}

impl Supervisor {
    /// Start the read loop and writer for an authenticated transport
    pub fn spawn<K, S>(
        sink: K,
        source: S,
        ha_version: Option<String>,
        routes: Routes,
        outbound_buffer: usize,
    ) -> Self
    where
        K: FrameSink,
        S: FrameSource,
    {
        let (outbound, outbound_rx) = mpsc::channel(outbound_buffer.max(1));
        let (shutdown_tx, _) = watch::channel(None);
        let shutdown = Arc::new(shutdown_tx);

        let connected = ConnectionState::Connected { ha_version };
        routes.observer.connection_state_changed(&connected);
        let (state_tx, state) = watch::channel(connected);

        let writer = tokio::spawn(write_loop(
            sink,
            outbound_rx,
            Arc::clone(&shutdown),
            shutdown.subscribe(),
        ));
        let reader = tokio::spawn(read_loop(
            source,
            routes,
            Arc::clone(&shutdown),
            shutdown.subscribe(),
            state_tx,
        ));

        Self {
            outbound,
            shutdown,
            state,
            tasks: Mutex::new(vec![reader, writer]),
        }
    }

    /// Queue feeding the writer task
    pub fn outbound(&self) -> &mpsc::Sender<String> {
        &self.outbound
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Watch connection state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Ask both tasks to stop; the first reason given wins
    pub fn shutdown(&self, reason: DisconnectReason) {
        request_shutdown(&self.shutdown, reason);
    }

    /// Stop the connection and wait for both tasks to finish
    pub async fn close(&self) {
        self.shutdown(DisconnectReason::ClosedByClient);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Connection task ended abnormally");
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown(DisconnectReason::ClosedByClient);
    }
}

fn request_shutdown(shutdown: &watch::Sender<Option<DisconnectReason>>, reason: DisconnectReason) {
    shutdown.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(reason);
        true
    });
}

async fn read_loop<S: FrameSource>(
    mut source: S,
    routes: Routes,
    shutdown: ShutdownSender,
    mut shutdown_rx: watch::Receiver<Option<DisconnectReason>>,
    state_tx: watch::Sender<ConnectionState>,
) {
    let reason = loop {
        if let Some(reason) = shutdown_rx.borrow_and_update().clone() {
            break reason;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break DisconnectReason::ClosedByClient;
                }
            }
            frame = source.next_frame() => match frame {
                Ok(Some(text)) => {
                    if let Err(e) = route_frame(&text, &routes) {
                        break DisconnectReason::Protocol(e.to_string());
                    }
                }
                Ok(None) => break DisconnectReason::ClosedByHub,
                Err(ClientError::Protocol { message }) => break DisconnectReason::Protocol(message),
                Err(e) => break DisconnectReason::Transport(e.to_string()),
            }
        }
    };

    // Stop the writer too, unless it already stopped with its own reason
    request_shutdown(&shutdown, reason.clone());

    let failed = routes.correlator.fail_all(&reason.to_string());
    routes.dispatcher.clear();
    info!(reason = %reason, failed_commands = failed, "Connection closed");

    let disconnected = ConnectionState::Disconnected { reason };
    let observer = Arc::clone(&routes.observer);
    let notified = disconnected.clone();
    // Observer code is the caller's and may block
    tokio::task::spawn_blocking(move || observer.connection_state_changed(&notified));
    let _ = state_tx.send(disconnected);
}

/// Decode one frame and hand it to its consumer
fn route_frame(text: &str, routes: &Routes) -> ClientResult<()> {
    match decode_frame(text)? {
        IncomingMessage::Result(result) => {
            routes.correlator.resolve(result);
        }
        IncomingMessage::Pong(pong) => {
            routes.correlator.resolve(CommandResultMessage {
                id: pong.id,
                success: true,
                result: None,
                error: None,
            });
        }
        IncomingMessage::Event(event) => {
            routes.dispatcher.dispatch(event.id, event.event);
        }
        other @ (IncomingMessage::AuthRequired(_)
        | IncomingMessage::AuthOk(_)
        | IncomingMessage::AuthInvalid(_)) => {
            return Err(ClientError::protocol(format!(
                "unexpected {} after authentication",
                other.kind()
            )));
        }
    }
    Ok(())
}

async fn write_loop<K: FrameSink>(
    mut sink: K,
    mut outbound: mpsc::Receiver<String>,
    shutdown: ShutdownSender,
    mut shutdown_rx: watch::Receiver<Option<DisconnectReason>>,
) {
    loop {
        if shutdown_rx.borrow_and_update().is_some() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send_frame(frame).await {
                        warn!(error = %e, "Failed to send frame");
                        request_shutdown(&shutdown, DisconnectReason::Transport(e.to_string()));
                        break;
                    }
                }
                None => break,
            }
        }
    }

    if let Err(e) = sink.close().await {
        debug!(error = %e, "Error closing transport");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConcurrency;
    use crate::observer::TracingObserver;
    use crate::transport::memory;
    use serde_json::json;
    use std::time::Duration;

    fn routes() -> Routes {
        let observer: Arc<dyn ClientObserver> = Arc::new(TracingObserver);
        Routes {
            correlator: Arc::new(CommandCorrelator::new()),
            dispatcher: Arc::new(EventDispatcher::new(
                Arc::clone(&observer),
                DispatchConcurrency::Unbounded,
            )),
            observer,
        }
    }

    #[tokio::test]
    async fn test_pong_settles_ping_with_null() {
        let routes = routes();
        let (tx, mut rx) = mpsc::channel(4);
        let pending = routes
            .correlator
            .send(json!({"type": "ping"}), &tx)
            .await
            .unwrap();
        rx.recv().await.unwrap();

        route_frame(&format!(r#"{{"id":{},"type":"pong"}}"#, pending.id()), &routes).unwrap();
        assert_eq!(pending.wait(None).await.unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn test_auth_frame_after_handshake_is_rejected() {
        let routes = routes();
        let err = route_frame(r#"{"type":"auth_ok","ha_version":"2026.1.1"}"#, &routes).unwrap_err();
        assert!(matches!(err, ClientError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_writer_forwards_outbound_frames() {
        let (sink, source, mut peer) = memory::channel();
        let supervisor = Supervisor::spawn(sink, source, None, routes(), 8);

        supervisor
            .outbound()
            .send(r#"{"id":1,"type":"ping"}"#.to_string())
            .await
            .unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(1), peer.recv_text())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, r#"{"id":1,"type":"ping"}"#);
        assert!(supervisor.state().is_connected());
    }

    #[tokio::test]
    async fn test_first_shutdown_reason_wins() {
        let (sink, source, _peer) = memory::channel();
        let supervisor = Supervisor::spawn(sink, source, None, routes(), 8);

        supervisor.shutdown(DisconnectReason::Transport("reset".to_string()));
        supervisor.close().await;

        assert_eq!(
            supervisor.state(),
            ConnectionState::Disconnected {
                reason: DisconnectReason::Transport("reset".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_hub_close_clears_subscriptions() {
        let (sink, source, mut peer) = memory::channel();
        let routes = routes();
        let dispatcher = Arc::clone(&routes.dispatcher);
        dispatcher.register_events(
            7,
            None,
            Arc::new(|_event: hass_core::Event| async { Ok::<_, anyhow::Error>(()) }),
        );
        let supervisor = Supervisor::spawn(sink, source, None, routes, 8);

        peer.close();
        let mut state = supervisor.watch_state();
        tokio::time::timeout(Duration::from_secs(1), state.wait_for(|s| !s.is_connected()))
            .await
            .unwrap()
            .unwrap();
        assert!(dispatcher.is_empty());
    }

    /// Blocks on the disconnect notification until released
    struct SlowDisconnectObserver {
        release: parking_lot::Mutex<std::sync::mpsc::Receiver<()>>,
        notified: mpsc::UnboundedSender<ConnectionState>,
    }

    impl ClientObserver for SlowDisconnectObserver {
        fn connection_state_changed(&self, state: &ConnectionState) {
            if state.is_connected() {
                return;
            }
            let _ = self.release.lock().recv_timeout(Duration::from_secs(5));
            let _ = self.notified.send(state.clone());
        }
    }

    #[tokio::test]
    async fn test_disconnect_published_while_observer_blocks() {
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let (notified_tx, mut notified) = mpsc::unbounded_channel();
        let observer: Arc<dyn ClientObserver> = Arc::new(SlowDisconnectObserver {
            release: parking_lot::Mutex::new(release_rx),
            notified: notified_tx,
        });
        let routes = Routes {
            correlator: Arc::new(CommandCorrelator::new()),
            dispatcher: Arc::new(EventDispatcher::new(
                Arc::clone(&observer),
                DispatchConcurrency::Unbounded,
            )),
            observer,
        };

        let (sink, source, mut peer) = memory::channel();
        let supervisor = Supervisor::spawn(sink, source, None, routes, 8);
        peer.close();

        let mut state = supervisor.watch_state();
        tokio::time::timeout(Duration::from_secs(1), state.wait_for(|s| !s.is_connected()))
            .await
            .unwrap()
            .unwrap();

        release_tx.send(()).unwrap();
        let seen = tokio::time::timeout(Duration::from_secs(1), notified.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            seen,
            ConnectionState::Disconnected {
                reason: DisconnectReason::ClosedByHub
            }
        );
    }
}
