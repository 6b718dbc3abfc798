//! Command/response correlation
//!
//! Many callers share one socket. Each command gets the next identifier
//! (starting at 1, never reused for the connection) and a single-use result
//! slot. The read loop settles slots as results arrive; `fail_all` settles
//! whatever is left when the connection goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::codec::{encode_command, validate_command};
use crate::error::{ClientError, ClientResult};
use crate::messages::CommandResultMessage;

type ResultSlot = oneshot::Sender<ClientResult<Value>>;

/// Tracks outstanding commands for one connection
pub struct CommandCorrelator {
    /// Next identifier to hand out; held while the frame is queued
    next_id: Mutex<u64>,
    /// Outstanding request id -> result slot
    pending: DashMap<u64, ResultSlot>,
    /// Set once the connection is gone; no new commands are accepted
    closed: AtomicBool,
}

impl CommandCorrelator {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(1),
            pending: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Send a command under a fresh identifier
    pub async fn send(
        self: &Arc<Self>,
        payload: Value,
        outbound: &mpsc::Sender<String>,
    ) -> ClientResult<PendingCommand> {
        self.send_with(payload, outbound, |_| {}).await
    }

    /// Send a command, calling `before_send` with its identifier just
    /// before the frame is queued
    ///
    /// Identifiers are allocated and frames queued under one lock, so the
    /// writer sees them in strictly increasing order. `before_send` runs
    /// inside that lock and must not block; it is how local state keyed by
    /// the id (subscriptions) is in place before the hub can answer.
    pub async fn send_with<F>(
        self: &Arc<Self>,
        payload: Value,
        outbound: &mpsc::Sender<String>,
        before_send: F,
    ) -> ClientResult<PendingCommand>
    where
        F: FnOnce(u64),
    {
        let payload = validate_command(payload)?;
        if self.is_closed() {
            return Err(ClientError::closed("client is closed"));
        }

        let command_type = payload
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();

        let permit = outbound
            .reserve()
            .await
            .map_err(|_| ClientError::closed("writer stopped"))?;

        let (tx, rx) = oneshot::channel();
        let id = {
            let mut next_id = self.next_id.lock();
            let id = *next_id;
            let frame = encode_command(id, payload)?;
            *next_id += 1;

            self.pending.insert(id, tx);
            // fail_all may have drained the table between the check above and
            // the insert; whoever removes the entry settles it.
            if self.is_closed() {
                self.pending.remove(&id);
                return Err(ClientError::closed("client is closed"));
            }

            before_send(id);
            permit.send(frame);
            id
        };

        debug!(id, command = %command_type, "Sent command");
        Ok(PendingCommand {
            id,
            rx,
            correlator: Arc::clone(self),
        })
    }

    /// Settle the slot for a result frame
    ///
    /// Returns false when the id is not outstanding (never issued, already
    /// settled, or timed out); such frames are dropped.
    pub fn resolve(&self, message: CommandResultMessage) -> bool {
        let Some((id, slot)) = self.pending.remove(&message.id) else {
            warn!(id = message.id, "Dropping result for unknown command id");
            return false;
        };

        let outcome = if message.success {
            Ok(message.result.unwrap_or(Value::Null))
        } else {
            Err(match message.error {
                Some(error) => ClientError::from_result_error(&error.code, &error.message),
                None => ClientError::CommandFailed {
                    code: "unknown_error".to_string(),
                    message: "command failed without error details".to_string(),
                },
            })
        };

        trace!(id, success = outcome.is_ok(), "Settling command");
        // The caller may have stopped waiting; that is not an error here
        let _ = slot.send(outcome);
        true
    }

    /// Fail every outstanding command and refuse new ones
    ///
    /// Returns the number of commands that were settled.
    pub fn fail_all(&self, reason: &str) -> usize {
        self.closed.store(true, Ordering::SeqCst);

        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, slot)) = self.pending.remove(&id) {
                let _ = slot.send(Err(ClientError::closed(reason)));
                failed += 1;
            }
        }
        if failed > 0 {
            debug!(failed, reason = %reason, "Failed outstanding commands");
        }
        failed
    }

    /// Stop tracking a command whose caller gave up on it
    pub fn forget(&self, id: u64) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Number of commands awaiting a result
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for CommandCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a command awaiting its result
pub struct PendingCommand {
    id: u64,
    rx: oneshot::Receiver<ClientResult<Value>>,
    correlator: Arc<CommandCorrelator>,
}

impl PendingCommand {
    /// Identifier the command was sent under
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the result, optionally bounded by `timeout`
    ///
    /// On timeout the command is forgotten, so a late result is dropped.
    pub async fn wait(self, timeout: Option<Duration>) -> ClientResult<Value> {
        let PendingCommand { id, rx, correlator } = self;
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    correlator.forget(id);
                    return Err(ClientError::Timeout { id });
                }
            },
            None => rx.await,
        };
        received.unwrap_or_else(|_| Err(ClientError::closed("result slot dropped")))
    }
}
