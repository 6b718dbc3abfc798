//! WebSocket message types
//!
//! Defines the frames exchanged with the hub. Incoming frames form a closed
//! set discriminated by their `type` field.

use serde::{Deserialize, Serialize};

// =============================================================================
// Incoming Messages
// =============================================================================

/// Incoming WebSocket message from the hub
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingMessage {
    AuthRequired(AuthRequiredMessage),
    AuthOk(AuthResultMessage),
    AuthInvalid(AuthResultMessage),
    Result(CommandResultMessage),
    Event(EventMessage),
    Pong(PongMessage),
}

impl IncomingMessage {
    /// Wire name of the message type, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            IncomingMessage::AuthRequired(_) => "auth_required",
            IncomingMessage::AuthOk(_) => "auth_ok",
            IncomingMessage::AuthInvalid(_) => "auth_invalid",
            IncomingMessage::Result(_) => "result",
            IncomingMessage::Event(_) => "event",
            IncomingMessage::Pong(_) => "pong",
        }
    }
}

/// First frame sent by the hub after the socket opens
#[derive(Debug, Clone, Deserialize)]
pub struct AuthRequiredMessage {
    #[serde(default)]
    pub ha_version: Option<String>,
}

/// Answer to the auth command (`auth_ok` or `auth_invalid`)
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResultMessage {
    #[serde(default)]
    pub ha_version: Option<String>,
    /// Reason given by the hub when authentication failed
    #[serde(default)]
    pub message: Option<String>,
}

/// Result of a command, correlated by `id`
#[derive(Debug, Clone, Deserialize)]
pub struct CommandResultMessage {
    pub id: u64,
    pub success: bool,
    /// A mapping or a sequence of mappings, depending on the command
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Pushed event for the subscription created by command `id`
#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    pub id: u64,
    pub event: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PongMessage {
    pub id: u64,
}

// =============================================================================
// Outgoing Messages
// =============================================================================

/// Auth command, the only frame the client sends during the handshake
#[derive(Debug, Serialize)]
pub struct AuthCommandMessage<'a> {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub access_token: &'a str,
}

/// Command sent in the command phase
///
/// The payload carries the command `type` and its arguments; `id` is
/// stamped by the correlator.
#[derive(Debug, Serialize)]
pub struct CommandMessage {
    pub id: u64,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}
