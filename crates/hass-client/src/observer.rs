//! Injected observer for connection-wide notifications
//!
//! One observer is handed to the client at construction and dropped with
//! it. It receives everything that is not tied to a single caller:
//! connection state transitions, failing event handlers and diff
//! inconsistencies.

use std::fmt;

use tracing::{error, info, warn};

use crate::diff::DiffWarning;

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `close()` was called
    ClosedByClient,
    /// The hub closed the socket
    ClosedByHub,
    /// The transport failed
    Transport(String),
    /// A frame could not be decoded or was out of sequence
    Protocol(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ClosedByClient => write!(f, "closed by client"),
            DisconnectReason::ClosedByHub => write!(f, "closed by hub"),
            DisconnectReason::Transport(msg) => write!(f, "transport error: {}", msg),
            DisconnectReason::Protocol(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

/// Lifecycle of a client connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Authenticated and processing frames
    Connected { ha_version: Option<String> },
    /// The read loop stopped; outstanding commands were failed
    Disconnected { reason: DisconnectReason },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}

/// Receives connection-wide notifications
///
/// Every method has a default that logs through `tracing`, so implementors
/// only override what they care about.
pub trait ClientObserver: Send + Sync + 'static {
    /// The connection state changed
    fn connection_state_changed(&self, state: &ConnectionState) {
        match state {
            ConnectionState::Connected { ha_version } => {
                info!(ha_version = ?ha_version, "Connected to hub")
            }
            ConnectionState::Disconnected { reason } => {
                warn!(reason = %reason, "Disconnected from hub")
            }
        }
    }

    /// An event handler returned an error or panicked
    fn handler_failed(&self, subscription_id: u64, error: &anyhow::Error) {
        error!(subscription_id, error = %error, "Event handler failed");
    }

    /// A diff fragment did not fit the tracked entity states
    fn diff_inconsistency(&self, subscription_id: u64, warning: &DiffWarning) {
        warn!(subscription_id, warning = %warning, "Entity state diff inconsistency");
    }
}

/// Observer that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ClientObserver for TracingObserver {}
