//! Caller-facing client
//!
//! A [`HassClient`] only exists once the handshake has succeeded, so no
//! command can reach the hub before authentication.

use std::collections::HashMap;
use std::sync::Arc;

use hass_core::{Area, CallServiceResult, Config, Context, Device, Entity, State};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::correlator::{CommandCorrelator, PendingCommand};
use crate::diff::EntityStates;
use crate::dispatcher::{EntityStateHandler, EventDispatcher, EventHandler};
use crate::error::{ClientError, ClientResult};
use crate::handshake::perform_handshake;
use crate::observer::{ClientObserver, ConnectionState, TracingObserver};
use crate::supervisor::{Routes, Supervisor};
use crate::transport::{websocket, websocket_url, FrameSink, FrameSource};

/// Handle returned by [`HassClient::subscribe_entities`]
#[derive(Debug, Clone)]
pub struct EntitySubscription {
    /// Subscription id, for [`HassClient::unsubscribe`]
    pub id: u64,
    /// Live view of the merged entity states
    pub states: EntityStates,
}

#[derive(Debug, Deserialize)]
struct FireEventResult {
    context: Context,
}

/// Authenticated connection to a Home Assistant hub
pub struct HassClient {
    config: ClientConfig,
    ha_version: Option<String>,
    correlator: Arc<CommandCorrelator>,
    dispatcher: Arc<EventDispatcher>,
    supervisor: Supervisor,
}

impl HassClient {
    /// Connect to `url` (http, https, ws or wss) and authenticate
    pub async fn connect(url: &str, access_token: &str, config: ClientConfig) -> ClientResult<Self> {
        Self::connect_with_observer(url, access_token, config, Arc::new(TracingObserver)).await
    }

    /// Like [`connect`](Self::connect), reporting to `observer`
    pub async fn connect_with_observer(
        url: &str,
        access_token: &str,
        config: ClientConfig,
        observer: Arc<dyn ClientObserver>,
    ) -> ClientResult<Self> {
        let ws_url = websocket_url(url);
        info!(url = %ws_url, "Connecting to Home Assistant");
        let (sink, source) = websocket::connect(&ws_url, config.connect_timeout).await?;
        Self::with_transport(sink, source, access_token, config, observer).await
    }

    /// Authenticate over an already open transport
    pub async fn with_transport<K, S>(
        mut sink: K,
        mut source: S,
        access_token: &str,
        config: ClientConfig,
        observer: Arc<dyn ClientObserver>,
    ) -> ClientResult<Self>
    where
        K: FrameSink,
        S: FrameSource,
    {
        let handshake = perform_handshake(&mut sink, &mut source, access_token);
        let outcome = match tokio::time::timeout(config.connect_timeout, handshake).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                let _ = sink.close().await;
                return Err(ClientError::Transport(format!(
                    "authentication timed out after {:?}",
                    config.connect_timeout
                )));
            }
        };

        let correlator = Arc::new(CommandCorrelator::new());
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&observer),
            config.event_dispatch_concurrency,
        ));
        let supervisor = Supervisor::spawn(
            sink,
            source,
            outcome.ha_version.clone(),
            Routes {
                correlator: Arc::clone(&correlator),
                dispatcher: Arc::clone(&dispatcher),
                observer,
            },
            config.outbound_buffer,
        );

        Ok(Self {
            config,
            ha_version: outcome.ha_version,
            correlator,
            dispatcher,
            supervisor,
        })
    }

    /// Version reported by the hub during the handshake
    pub fn ha_version(&self) -> Option<&str> {
        self.ha_version.as_deref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Receiver that changes when the connection goes down
    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.watch_state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// Send a command and wait for its result
    ///
    /// `payload` must be an object with a string `type`; any `id` in it is
    /// replaced. Waits at most `command_timeout` if one is configured.
    pub async fn send_command(&self, payload: Value) -> ClientResult<Value> {
        let pending = self
            .correlator
            .send(payload, self.supervisor.outbound())
            .await?;
        pending.wait(self.config.command_timeout).await
    }

    /// Send a command and decode its result into `T`
    pub async fn send_command_as<T: DeserializeOwned>(&self, payload: Value) -> ClientResult<T> {
        let result = self.send_command(payload).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Subscribe to hub events, optionally only those of `event_type`
    ///
    /// Returns the subscription id. The handler may see events before this
    /// returns.
    pub async fn subscribe_events<H: EventHandler>(
        &self,
        handler: H,
        event_type: Option<&str>,
    ) -> ClientResult<u64> {
        let mut payload = json!({"type": "subscribe_events"});
        if let Some(event_type) = event_type {
            payload["event_type"] = json!(event_type);
        }

        let handler: Arc<dyn EventHandler> = Arc::new(handler);
        let filter = event_type.map(str::to_string);
        let pending = self
            .correlator
            .send_with(payload, self.supervisor.outbound(), |id| {
                self.dispatcher.register_events(id, filter, handler)
            })
            .await?;
        let id = pending.id();
        self.confirm_subscription(pending).await?;
        debug!(subscription_id = id, event_type = ?event_type, "Subscribed to events");
        Ok(id)
    }

    /// Subscribe to compressed entity state updates
    ///
    /// The returned mapping starts empty and fills as batches arrive; the
    /// first batch normally adds every matching entity.
    pub async fn subscribe_entities<H: EntityStateHandler>(
        &self,
        handler: H,
        entity_ids: Option<Vec<String>>,
    ) -> ClientResult<EntitySubscription> {
        let mut payload = json!({"type": "subscribe_entities"});
        if let Some(entity_ids) = entity_ids {
            payload["entity_ids"] = json!(entity_ids);
        }

        let handler: Arc<dyn EntityStateHandler> = Arc::new(handler);
        let mut registered = None;
        let pending = self
            .correlator
            .send_with(payload, self.supervisor.outbound(), |id| {
                registered = Some(self.dispatcher.register_entities(id, handler))
            })
            .await?;
        let id = pending.id();
        self.confirm_subscription(pending).await?;
        let states = registered
            .ok_or_else(|| ClientError::closed("subscription was not registered"))?;
        debug!(subscription_id = id, "Subscribed to entities");
        Ok(EntitySubscription { id, states })
    }

    /// Wait for the subscribe result; undo the local registration if the
    /// hub refuses it or does not answer in time
    async fn confirm_subscription(&self, pending: PendingCommand) -> ClientResult<()> {
        let id = pending.id();
        let Err(e) = pending.wait(self.config.command_timeout).await else {
            return Ok(());
        };
        self.dispatcher.remove(id);
        if matches!(e, ClientError::Timeout { .. }) {
            self.release_abandoned_subscription(id).await;
        }
        Err(e)
    }

    /// Ask the hub to drop a subscription whose result we gave up on
    ///
    /// The answer is awaited in the background and only logged.
    async fn release_abandoned_subscription(&self, subscription_id: u64) {
        let payload = json!({
            "type": "unsubscribe_events",
            "subscription": subscription_id,
        });
        match self
            .correlator
            .send(payload, self.supervisor.outbound())
            .await
        {
            Ok(pending) => {
                let timeout = self.config.command_timeout;
                tokio::spawn(async move {
                    if let Err(e) = pending.wait(timeout).await {
                        debug!(subscription_id, error = %e, "Release of abandoned subscription failed");
                    }
                });
            }
            Err(e) => {
                debug!(subscription_id, error = %e, "Could not release abandoned subscription");
            }
        }
    }

    /// Cancel a subscription
    ///
    /// The local registration is dropped first, so no further events reach
    /// the handler whatever the hub answers. Unknown ids are a no-op.
    pub async fn unsubscribe(&self, subscription_id: u64) -> ClientResult<()> {
        if !self.dispatcher.remove(subscription_id) {
            debug!(subscription_id, "Unsubscribe for unknown subscription ignored");
            return Ok(());
        }

        let payload = json!({
            "type": "unsubscribe_events",
            "subscription": subscription_id,
        });
        match self.send_command(payload).await {
            Ok(_) => Ok(()),
            Err(ClientError::ConnectionClosed { .. }) => Ok(()),
            Err(e) => {
                warn!(subscription_id, error = %e, "Hub did not confirm unsubscribe");
                Err(e)
            }
        }
    }

    /// Close the connection
    ///
    /// Outstanding commands fail with `ConnectionClosed`. Safe to call more
    /// than once.
    pub async fn close(&self) {
        self.supervisor.close().await;
    }

    // =========================================================================
    // Convenience commands
    // =========================================================================

    pub async fn ping(&self) -> ClientResult<()> {
        self.send_command(json!({"type": "ping"})).await?;
        Ok(())
    }

    pub async fn get_states(&self) -> ClientResult<Vec<State>> {
        self.send_command_as(json!({"type": "get_states"})).await
    }

    /// Current state of one entity, `NotFound` if the hub doesn't know it
    pub async fn get_state(&self, entity_id: &str) -> ClientResult<State> {
        self.get_states()
            .await?
            .into_iter()
            .find(|state| state.entity_id == entity_id)
            .ok_or_else(|| ClientError::NotFound {
                message: format!("entity {} not found", entity_id),
            })
    }

    pub async fn get_config(&self) -> ClientResult<Config> {
        self.send_command_as(json!({"type": "get_config"})).await
    }

    /// Services by domain, then by service name
    pub async fn get_services(&self) -> ClientResult<HashMap<String, HashMap<String, Value>>> {
        self.send_command_as(json!({"type": "get_services"})).await
    }

    pub async fn get_areas(&self) -> ClientResult<Vec<Area>> {
        self.send_command_as(json!({"type": "config/area_registry/list"}))
            .await
    }

    pub async fn get_devices(&self) -> ClientResult<Vec<Device>> {
        self.send_command_as(json!({"type": "config/device_registry/list"}))
            .await
    }

    pub async fn get_entities(&self) -> ClientResult<Vec<Entity>> {
        self.send_command_as(json!({"type": "config/entity_registry/list"}))
            .await
    }

    /// Call a service, e.g. `light.turn_on`
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        service_data: Option<Value>,
        target: Option<Value>,
    ) -> ClientResult<CallServiceResult> {
        let mut payload = json!({
            "type": "call_service",
            "domain": domain,
            "service": service,
        });
        if let Some(data) = service_data {
            payload["service_data"] = data;
        }
        if let Some(target) = target {
            payload["target"] = target;
        }
        self.send_command_as(payload).await
    }

    /// Fire an event on the hub's bus, returning its context
    pub async fn fire_event(&self, event_type: &str, event_data: Option<Value>) -> ClientResult<Context> {
        let mut payload = json!({
            "type": "fire_event",
            "event_type": event_type,
        });
        if let Some(data) = event_data {
            payload["event_data"] = data;
        }
        let result: FireEventResult = self.send_command_as(payload).await?;
        Ok(result.context)
    }
}

impl std::fmt::Debug for HassClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HassClient")
            .field("ha_version", &self.ha_version)
            .field("state", &self.connection_state())
            .field("outstanding", &self.correlator.outstanding())
            .field("subscriptions", &self.dispatcher.len())
            .finish()
    }
}
