//! Event types pushed by the Home Assistant event bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Context;

/// Event type identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    /// Create a new event type
    pub fn new(event_type: impl Into<String>) -> Self {
        Self(event_type.into())
    }

    /// Get the event type as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An event received from a subscription
///
/// `data` is specific to the event type; it defaults to raw JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T = serde_json::Value> {
    /// The type of event (e.g., "state_changed")
    pub event_type: EventType,

    /// The event data
    #[serde(default)]
    pub data: T,

    /// Origin of the event (LOCAL, REMOTE)
    #[serde(default)]
    pub origin: EventOrigin,

    /// When the event was fired
    pub time_fired: DateTime<Utc>,

    /// Context tracking the origin and causality
    pub context: Context,
}

impl Event<serde_json::Value> {
    /// Convert the raw event data into a typed payload
    pub fn into_typed<T: serde::de::DeserializeOwned>(self) -> Result<Event<T>, serde_json::Error> {
        Ok(Event {
            event_type: self.event_type,
            data: serde_json::from_value(self.data)?,
            origin: self.origin,
            time_fired: self.time_fired,
            context: self.context,
        })
    }
}

/// Origin of an event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventOrigin {
    /// Event originated on the hub itself
    #[default]
    Local,
    /// Event was fired through the API by a remote caller
    Remote,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StateChangedData;

    const STATE_CHANGED_EVENT: &str = r#"{
        "event_type": "state_changed",
        "data": {
            "entity_id": "light.kitchen",
            "old_state": null,
            "new_state": {
                "entity_id": "light.kitchen",
                "state": "on",
                "attributes": {"brightness": 180},
                "last_changed": "2024-05-11T19:18:36.072648+00:00",
                "last_updated": "2024-05-11T19:18:36.072648+00:00",
                "context": {"id": "01H0640ES8JCY1NGTNW3V41T5T"}
            }
        },
        "origin": "LOCAL",
        "time_fired": "2024-05-11T19:18:36.072648+00:00",
        "context": {"id": "01H0640ES8JCY1NGTNW3V41T5T", "parent_id": null, "user_id": null}
    }"#;

    #[test]
    fn test_parse_state_changed_event() {
        let event: Event = serde_json::from_str(STATE_CHANGED_EVENT).unwrap();
        assert_eq!(event.event_type.as_str(), "state_changed");
        assert_eq!(event.origin, EventOrigin::Local);

        let data = StateChangedData::from_event(&event).unwrap();
        assert_eq!(data.entity_id, "light.kitchen");
        assert!(data.old_state.is_none());
        assert_eq!(data.new_state.unwrap().state, "on");
    }

    #[test]
    fn test_into_typed() {
        let event: Event = serde_json::from_str(STATE_CHANGED_EVENT).unwrap();
        let typed: Event<StateChangedData> = event.into_typed().unwrap();
        assert_eq!(typed.data.entity_id, "light.kitchen");
    }

    #[test]
    fn test_remote_origin() {
        let origin: EventOrigin = serde_json::from_str(r#""REMOTE""#).unwrap();
        assert_eq!(origin, EventOrigin::Remote);
    }
}
