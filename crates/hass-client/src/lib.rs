//! Home Assistant WebSocket client engine
//!
//! Connects to a hub, authenticates, multiplexes commands over one socket,
//! dispatches subscribed events and keeps entity state mirrors up to date.
//! Based on: https://developers.home-assistant.io/docs/api/websocket

pub mod codec;
pub mod config;
pub mod correlator;
pub mod diff;
pub mod dispatcher;
pub mod error;
pub mod handshake;
pub mod messages;
pub mod observer;
pub mod supervisor;
pub mod transport;

mod client;

pub use client::{EntitySubscription, HassClient};
pub use config::{ClientConfig, ConfigError, DispatchConcurrency};
pub use diff::{DiffWarning, EntityStateEvent, EntityStates};
pub use dispatcher::{EntityStateHandler, EntityUpdate, EventHandler};
pub use error::{ClientError, ClientResult};
pub use observer::{ClientObserver, ConnectionState, DisconnectReason, TracingObserver};
