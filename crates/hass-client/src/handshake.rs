//! Authentication handshake
//!
//! auth_required (hub) -> auth (client) -> auth_ok | auth_invalid (hub).
//! Runs once per connection, before the read loop starts.

use tracing::{debug, info, warn};

use crate::codec::{decode_frame, encode_auth};
use crate::error::{ClientError, ClientResult};
use crate::messages::IncomingMessage;
use crate::transport::{FrameSink, FrameSource};

/// Successful handshake
#[derive(Debug, Clone)]
pub struct HandshakeOutcome {
    /// Version reported by the hub, if any
    pub ha_version: Option<String>,
}

/// Authenticate a freshly opened transport
///
/// On rejection the sink is closed and `Authentication` is returned.
pub async fn perform_handshake<K, S>(
    sink: &mut K,
    source: &mut S,
    access_token: &str,
) -> ClientResult<HandshakeOutcome>
where
    K: FrameSink + ?Sized,
    S: FrameSource + ?Sized,
{
    // 1. Receive auth_required
    let auth_required = match next_message(source).await? {
        IncomingMessage::AuthRequired(msg) => msg,
        other => {
            return Err(ClientError::protocol(format!(
                "expected auth_required, got {}",
                other.kind()
            )))
        }
    };
    debug!(ha_version = ?auth_required.ha_version, "Hub requires authentication");

    // 2. Send auth
    sink.send_frame(encode_auth(access_token)?).await?;

    // 3. Receive auth_ok or auth_invalid
    match next_message(source).await? {
        IncomingMessage::AuthOk(msg) => {
            let ha_version = msg.ha_version.or(auth_required.ha_version);
            info!(ha_version = ?ha_version, "Authenticated with hub");
            Ok(HandshakeOutcome { ha_version })
        }
        IncomingMessage::AuthInvalid(msg) => {
            let message = msg
                .message
                .unwrap_or_else(|| "invalid access token".to_string());
            warn!(message = %message, "Authentication rejected");
            let _ = sink.close().await;
            Err(ClientError::Authentication { message })
        }
        other => {
            warn!(frame = other.kind(), "Unexpected frame during authentication");
            let _ = sink.close().await;
            Err(ClientError::protocol(format!(
                "expected auth result, got {}",
                other.kind()
            )))
        }
    }
}

async fn next_message<S: FrameSource + ?Sized>(source: &mut S) -> ClientResult<IncomingMessage> {
    match source.next_frame().await? {
        Some(text) => decode_frame(&text),
        None => Err(ClientError::closed("connection closed during authentication")),
    }
}
