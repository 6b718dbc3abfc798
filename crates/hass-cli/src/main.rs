//! Home Assistant WebSocket client example
//!
//! Connects to a hub, logs state changes and the number of tracked
//! entities, and ticks once per second until Ctrl-C.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use hass_client::{ClientConfig, ClientError, ClientResult, EntityUpdate, HassClient};
use hass_core::events::StateChangedData;
use hass_core::Event;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Home Assistant simple client
#[derive(Parser, Debug)]
#[command(name = "hass-client-example")]
#[command(about = "Home Assistant WebSocket client example")]
#[command(version)]
struct Args {
    /// URL of the hub, e.g. http://homeassistant:8123
    url: String,

    /// Long-lived access token
    token: String,

    /// Log with debug level
    #[arg(long)]
    debug: bool,
}

/// Await `operation`, logging and swallowing errors that only affect it
///
/// Connection-level errors are returned so the caller can stop.
async fn log_known_errors<T, F>(operation: &str, fut: F) -> ClientResult<Option<T>>
where
    F: Future<Output = ClientResult<T>>,
{
    match fut.await {
        Ok(value) => Ok(Some(value)),
        Err(ClientError::NotFound { message }) => {
            error!(operation, %message, "Not found error");
            Ok(None)
        }
        Err(ClientError::CommandFailed { code, message }) => {
            error!(operation, %code, %message, "Command failed");
            Ok(None)
        }
        Err(ClientError::Timeout { id }) => {
            error!(operation, id, "Command timed out");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn log_state_changes(event: Event) -> Result<()> {
    let Some(change) = StateChangedData::from_event(&event) else {
        return Ok(());
    };
    let old = change.old_state.as_ref().map(|s| s.state.as_str());
    let new = change.new_state.as_ref().map(|s| s.state.as_str());
    info!(entity_id = %change.entity_id, ?old, ?new, "State changed");
    Ok(())
}

async fn log_entity_count(update: EntityUpdate) -> Result<()> {
    info!(
        subscription_id = update.subscription_id,
        tracked = update.states.len(),
        "Entity states updated"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt().with_env_filter(filter).with_target(true).init();

    let config = ClientConfig::from_env()?;
    let client = HassClient::connect(&args.url, &args.token, config).await?;
    info!(ha_version = ?client.ha_version(), "Connected");

    client.subscribe_events(log_state_changes, None).await?;
    client.subscribe_entities(log_entity_count, None).await?;

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down...");
                break;
            }
            _ = ticker.tick() => {
                if !client.is_connected() {
                    warn!(state = ?client.connection_state(), "Connection lost");
                    break;
                }
                info!("Tick");
                log_known_errors("ping", client.ping()).await?;
            }
        }
    }

    client.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_known_errors_are_swallowed() {
        let outcome = log_known_errors("lookup", async {
            Err::<(), _>(ClientError::NotFound {
                message: "entity light.x not found".to_string(),
            })
        })
        .await
        .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_connection_errors_are_returned() {
        let outcome = log_known_errors("ping", async {
            Err::<(), _>(ClientError::ConnectionClosed {
                reason: "closed by hub".to_string(),
            })
        })
        .await;
        assert!(matches!(outcome, Err(ClientError::ConnectionClosed { .. })));
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let outcome = log_known_errors("ping", async { Ok(5) }).await.unwrap();
        assert_eq!(outcome, Some(5));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["hass-client-example", "http://hub:8123", "token", "--debug"]);
        assert_eq!(args.url, "http://hub:8123");
        assert_eq!(args.token, "token");
        assert!(args.debug);
    }
}
