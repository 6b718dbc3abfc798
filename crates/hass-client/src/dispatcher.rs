//! Event subscription dispatch
//!
//! Subscriptions are keyed by the id of the command that created them.
//! The read loop calls [`EventDispatcher::dispatch`], which only decodes,
//! filters, merges entity diffs and queues; handlers and observer callbacks
//! run on a per-subscription worker task so a slow or failing handler never
//! stalls the read loop or other subscribers. Each subscription sees its events in arrival order.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use hass_core::Event;
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, trace, warn};

use crate::config::DispatchConcurrency;
use crate::diff::{DiffWarning, EntityStateEvent, EntityStates};
use crate::observer::ClientObserver;

// =============================================================================
// Handlers
// =============================================================================

/// Receives events from a `subscribe_events` subscription
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle_event(&self, event: Event) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle_event(&self, event: Event) -> anyhow::Result<()> {
        (self)(event).await
    }
}

/// One merged batch from a `subscribe_entities` subscription
#[derive(Debug, Clone)]
pub struct EntityUpdate {
    pub subscription_id: u64,
    /// The batch as received
    pub diff: EntityStateEvent,
    /// The subscription's mapping, already merged with `diff`
    pub states: EntityStates,
}

/// Receives merged batches from a `subscribe_entities` subscription
#[async_trait]
pub trait EntityStateHandler: Send + Sync + 'static {
    async fn handle_entities(&self, update: EntityUpdate) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> EntityStateHandler for F
where
    F: Fn(EntityUpdate) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle_entities(&self, update: EntityUpdate) -> anyhow::Result<()> {
        (self)(update).await
    }
}

enum Handler {
    Events(Arc<dyn EventHandler>),
    Entities(Arc<dyn EntityStateHandler>),
}

enum Delivery {
    Event(Event),
    /// Merged batch plus the inconsistencies found while merging it
    Entities(EntityUpdate, Vec<DiffWarning>),
}

// =============================================================================
// Dispatcher
// =============================================================================

enum Route {
    Events { event_type: Option<String> },
    Entities { states: EntityStates },
}

struct Subscription {
    route: Route,
    queue: mpsc::UnboundedSender<Delivery>,
    active: Arc<AtomicBool>,
}

/// Registry of subscriptions for one connection
pub struct EventDispatcher {
    subscriptions: DashMap<u64, Subscription>,
    observer: Arc<dyn ClientObserver>,
    /// Shared limit on running handler invocations, if bounded
    limiter: Option<Arc<Semaphore>>,
}

impl EventDispatcher {
    pub fn new(observer: Arc<dyn ClientObserver>, concurrency: DispatchConcurrency) -> Self {
        let limiter = match concurrency {
            DispatchConcurrency::Unbounded => None,
            DispatchConcurrency::Bounded(n) => Some(Arc::new(Semaphore::new(n.max(1)))),
        };
        Self {
            subscriptions: DashMap::new(),
            observer,
            limiter,
        }
    }

    /// Register an event handler under `id`, optionally filtered by event type
    pub fn register_events(
        &self,
        id: u64,
        event_type: Option<String>,
        handler: Arc<dyn EventHandler>,
    ) {
        self.register(id, Route::Events { event_type }, Handler::Events(handler));
    }

    /// Register an entity state handler under `id`
    ///
    /// Returns the mapping the subscription's diffs are merged into. It
    /// starts empty.
    pub fn register_entities(&self, id: u64, handler: Arc<dyn EntityStateHandler>) -> EntityStates {
        let states = EntityStates::new();
        self.register(
            id,
            Route::Entities {
                states: states.clone(),
            },
            Handler::Entities(handler),
        );
        states
    }

    fn register(&self, id: u64, route: Route, handler: Handler) {
        let (queue, rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));
        self.spawn_worker(id, rx, Arc::clone(&active), handler);

        let subscription = Subscription {
            route,
            queue,
            active,
        };
        if let Some(previous) = self.subscriptions.insert(id, subscription) {
            warn!(subscription_id = id, "Replaced existing subscription");
            previous.active.store(false, Ordering::SeqCst);
        }
        debug!(subscription_id = id, "Registered subscription");
    }

    fn spawn_worker(
        &self,
        id: u64,
        mut rx: mpsc::UnboundedReceiver<Delivery>,
        active: Arc<AtomicBool>,
        handler: Handler,
    ) {
        let observer = Arc::clone(&self.observer);
        let limiter = self.limiter.clone();

        tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                let _permit = match &limiter {
                    Some(limiter) => match Arc::clone(limiter).acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                    None => None,
                };
                // Checked after waiting for a permit so unsubscribe takes effect
                if !active.load(Ordering::SeqCst) {
                    break;
                }

                let invocation = match (&handler, delivery) {
                    (Handler::Events(h), Delivery::Event(event)) => h.handle_event(event),
                    (Handler::Entities(h), Delivery::Entities(update, warnings)) => {
                        for warning in &warnings {
                            observer.diff_inconsistency(id, warning);
                        }
                        h.handle_entities(update)
                    }
                    _ => continue,
                };

                match AssertUnwindSafe(invocation).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => observer.handler_failed(id, &err),
                    Err(panic) => {
                        let err = anyhow!("handler panicked: {}", panic_message(panic.as_ref()));
                        observer.handler_failed(id, &err);
                    }
                }
            }
            trace!(subscription_id = id, "Subscription worker stopped");
        });
    }

    /// Route an event frame's payload to the subscription `id`
    ///
    /// Called from the read loop; never runs handler code.
    pub fn dispatch(&self, id: u64, event: Value) {
        let (queue, delivery) = {
            let Some(subscription) = self.subscriptions.get(&id) else {
                debug!(subscription_id = id, "Event for unknown subscription");
                return;
            };
            let Some(delivery) = decode_delivery(id, &subscription.route, event) else {
                return;
            };
            (subscription.queue.clone(), delivery)
        };

        if queue.send(delivery).is_err() {
            debug!(subscription_id = id, "Subscription worker gone");
        }
    }

    /// Remove a subscription; pending deliveries are discarded
    ///
    /// Returns false if nothing was registered under `id`.
    pub fn remove(&self, id: u64) -> bool {
        match self.subscriptions.remove(&id) {
            Some((_, subscription)) => {
                subscription.active.store(false, Ordering::SeqCst);
                debug!(subscription_id = id, "Removed subscription");
                true
            }
            None => false,
        }
    }

    /// Remove every subscription
    pub fn clear(&self) {
        let ids: Vec<u64> = self.subscriptions.iter().map(|s| *s.key()).collect();
        for id in ids {
            self.remove(id);
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.subscriptions.contains_key(&id)
    }

    /// Number of registered subscriptions
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

/// Decode, filter and (for entity subscriptions) merge one event payload
///
/// Diff warnings travel with the delivery; the observer hears about them
/// on the subscription worker, not here.
fn decode_delivery(id: u64, route: &Route, event: Value) -> Option<Delivery> {
    match route {
        Route::Events { event_type } => {
            let event: Event = match serde_json::from_value(event) {
                Ok(event) => event,
                Err(e) => {
                    warn!(subscription_id = id, error = %e, "Undecodable event payload");
                    return None;
                }
            };
            if let Some(filter) = event_type {
                if event.event_type.as_str() != filter {
                    trace!(subscription_id = id, event_type = %event.event_type, "Filtered event");
                    return None;
                }
            }
            Some(Delivery::Event(event))
        }
        Route::Entities { states } => {
            let diff: EntityStateEvent = match serde_json::from_value(event) {
                Ok(diff) => diff,
                Err(e) => {
                    warn!(subscription_id = id, error = %e, "Undecodable entity state diff");
                    return None;
                }
            };
            let warnings = states.apply(&diff);
            let update = EntityUpdate {
                subscription_id: id,
                diff,
                states: states.clone(),
            };
            Some(Delivery::Entities(update, warnings))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
