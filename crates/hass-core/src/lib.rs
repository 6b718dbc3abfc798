//! Core types for the Home Assistant WebSocket API
//!
//! This crate provides the data model exchanged with a Home Assistant hub:
//! State, Event, Context, and the plain payload models returned by
//! commands (config, registries, service call results).

mod context;
mod event;
mod models;
mod state;

pub use context::Context;
pub use event::{Event, EventOrigin, EventType};
pub use models::{Area, CallServiceResult, Config, Device, Entity, UnitSystemDetails};
pub use state::State;

/// State value used when the hub did not report one
pub const STATE_UNKNOWN: &str = "unknown";

/// State value of an entity that is currently unavailable
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// Standard event types pushed by Home Assistant
pub mod events {
    use super::*;

    /// Event type for state changes
    pub const STATE_CHANGED: &str = "state_changed";

    /// Event type for state reported (unchanged state was written)
    pub const STATE_REPORTED: &str = "state_reported";

    /// Event type for service calls
    pub const CALL_SERVICE: &str = "call_service";

    /// Event type for core config update
    pub const CORE_CONFIG_UPDATE: &str = "core_config_update";

    /// Data for STATE_CHANGED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: String,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl StateChangedData {
        /// Decode the data of a STATE_CHANGED event
        pub fn from_event(event: &Event) -> Option<Self> {
            if event.event_type.as_str() != STATE_CHANGED {
                return None;
            }
            serde_json::from_value(event.data.clone()).ok()
        }
    }
}
