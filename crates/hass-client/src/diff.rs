//! Compressed entity state diffs
//!
//! `subscribe_entities` pushes batches of additions (`a`), changes (`c`)
//! and removals (`r`) in an abbreviated format. This module decodes them and
//! merges them, in arrival order, into a mapping of entity id to full
//! [`State`].
//!
//! ```text
//! {"a":{"light.test":{"s":"on","a":{"brightness":255},"c":"01H0640E...","lc":1683832716.07}}}
//! {"c":{"light.test":{"+":{"lu":1683838800.73,"c":"01H069T4...","a":{"brightness":89}}}}}
//! {"c":{"light.test":{"-":{"a":["effect"]}}}}
//! {"r":["light.test"]}
//! ```
//!
//! Merging never fails. Fragments that do not fit the tracked state are
//! skipped and reported as [`DiffWarning`]s.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hass_core::{Context, State, STATE_UNKNOWN};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// =============================================================================
// Wire Types
// =============================================================================

/// Context in compressed form: a bare id, or the full object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompressedContext {
    Id(String),
    Full(Context),
}

/// Partial entity state with abbreviated keys
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressedState {
    /// State value, when it changed
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Only the attributes that changed
    #[serde(rename = "a", default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<HashMap<String, Value>>,
    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<CompressedContext>,
    /// last_changed as epoch seconds
    #[serde(rename = "lc", default, skip_serializing_if = "Option::is_none")]
    pub last_changed: Option<f64>,
    /// last_updated as epoch seconds; equals `lc` when absent
    #[serde(rename = "lu", default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<f64>,
}

/// Attribute names listed in the subtractive half of a diff
///
/// The hub sends a list of names; a mapping is accepted too and its keys
/// are used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemovedAttributes {
    Keys(Vec<String>),
    Map(HashMap<String, Value>),
}

impl RemovedAttributes {
    fn keys(&self) -> Vec<&str> {
        match self {
            RemovedAttributes::Keys(keys) => keys.iter().map(String::as_str).collect(),
            RemovedAttributes::Map(map) => map.keys().map(String::as_str).collect(),
        }
    }
}

/// Subtractive half of a diff
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressedRemoval {
    #[serde(rename = "a", default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<RemovedAttributes>,
}

/// One change to one entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDiff {
    #[serde(rename = "+", default, skip_serializing_if = "Option::is_none")]
    pub additions: Option<CompressedState>,
    #[serde(rename = "-", default, skip_serializing_if = "Option::is_none")]
    pub removals: Option<CompressedRemoval>,
}

/// A batch of additions, changes and removals pushed in one event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityStateEvent {
    #[serde(rename = "a", default, skip_serializing_if = "Option::is_none")]
    pub added: Option<HashMap<String, CompressedState>>,
    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub changed: Option<HashMap<String, StateDiff>>,
    #[serde(rename = "r", default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<Vec<String>>,
}

impl EntityStateEvent {
    /// Whether the batch carries no fragments at all
    pub fn is_empty(&self) -> bool {
        self.added.as_ref().map_or(true, HashMap::is_empty)
            && self.changed.as_ref().map_or(true, HashMap::is_empty)
            && self.removed.as_ref().map_or(true, Vec::is_empty)
    }
}

// =============================================================================
// Warnings
// =============================================================================

/// A fragment that did not fit the tracked state
///
/// Non-fatal: the merge skips the fragment (or the offending field) and
/// continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffWarning {
    #[error("change for untracked entity {entity_id} without additive half, skipped")]
    ChangeForUntrackedEntity { entity_id: String },

    #[error("change for untracked entity {entity_id} treated as an addition")]
    ChangeRecoveredAsAddition { entity_id: String },

    #[error("removal of untracked entity {entity_id}")]
    RemoveUntrackedEntity { entity_id: String },

    #[error("addition for {entity_id} has no state value")]
    MissingState { entity_id: String },

    #[error("invalid {field} timestamp for {entity_id}")]
    InvalidTimestamp {
        entity_id: String,
        field: &'static str,
    },
}

// =============================================================================
// Merge
// =============================================================================

/// Apply one batch to `current`
///
/// Additions first, then changes, then removals, so an entity added and
/// changed in the same batch converges.
pub fn apply_entity_state_event(
    current: &mut HashMap<String, State>,
    event: &EntityStateEvent,
) -> Vec<DiffWarning> {
    let mut warnings = Vec::new();

    if let Some(added) = &event.added {
        for (entity_id, compressed) in added {
            let state = materialize(entity_id, compressed, &mut warnings);
            current.insert(entity_id.clone(), state);
        }
    }

    if let Some(changed) = &event.changed {
        for (entity_id, diff) in changed {
            match current.get_mut(entity_id) {
                Some(stored) => apply_diff(stored, diff, &mut warnings),
                None => match &diff.additions {
                    Some(additions) => {
                        warnings.push(DiffWarning::ChangeRecoveredAsAddition {
                            entity_id: entity_id.clone(),
                        });
                        let state = materialize(entity_id, additions, &mut warnings);
                        current.insert(entity_id.clone(), state);
                    }
                    None => warnings.push(DiffWarning::ChangeForUntrackedEntity {
                        entity_id: entity_id.clone(),
                    }),
                },
            }
        }
    }

    if let Some(removed) = &event.removed {
        for entity_id in removed {
            if current.remove(entity_id).is_none() {
                warnings.push(DiffWarning::RemoveUntrackedEntity {
                    entity_id: entity_id.clone(),
                });
            }
        }
    }

    warnings
}

/// Build a full state from a first sighting
fn materialize(
    entity_id: &str,
    compressed: &CompressedState,
    warnings: &mut Vec<DiffWarning>,
) -> State {
    let state = match &compressed.state {
        Some(state) => state.clone(),
        None => {
            warnings.push(DiffWarning::MissingState {
                entity_id: entity_id.to_string(),
            });
            STATE_UNKNOWN.to_string()
        }
    };

    let last_changed = timestamp(entity_id, "last_changed", compressed.last_changed, warnings);
    let last_updated = timestamp(entity_id, "last_updated", compressed.last_updated, warnings);
    let last_changed = last_changed.or(last_updated).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let last_updated = last_updated.unwrap_or(last_changed);

    let context = match &compressed.context {
        Some(CompressedContext::Full(context)) => context.clone(),
        Some(CompressedContext::Id(id)) => Context::with_id(id.clone()),
        None => Context::with_id(String::new()),
    };

    State {
        entity_id: entity_id.to_string(),
        state,
        attributes: compressed.attributes.clone().unwrap_or_default(),
        last_changed,
        last_updated,
        last_reported: Some(last_updated),
        context,
    }
}

/// Apply `-` then `+` to a tracked state
fn apply_diff(stored: &mut State, diff: &StateDiff, warnings: &mut Vec<DiffWarning>) {
    if let Some(removed) = diff.removals.as_ref().and_then(|r| r.attributes.as_ref()) {
        for key in removed.keys() {
            stored.attributes.remove(key);
        }
    }

    let Some(additions) = &diff.additions else {
        return;
    };

    if let Some(state) = &additions.state {
        stored.state = state.clone();
    }

    if let Some(attributes) = &additions.attributes {
        for (key, value) in attributes {
            stored.attributes.insert(key.clone(), value.clone());
        }
    }

    match &additions.context {
        Some(CompressedContext::Id(id)) => stored.context = stored.context.with_replaced_id(id.clone()),
        Some(CompressedContext::Full(context)) => stored.context = context.clone(),
        None => {}
    }

    let entity_id = stored.entity_id.clone();
    let last_changed = timestamp(&entity_id, "last_changed", additions.last_changed, warnings);
    let last_updated = timestamp(&entity_id, "last_updated", additions.last_updated, warnings);

    if let Some(changed) = last_changed {
        stored.last_changed = changed;
    }
    if let Some(updated) = last_updated.or(last_changed) {
        stored.last_updated = updated;
        stored.last_reported = Some(updated);
    }
}

fn timestamp(
    entity_id: &str,
    field: &'static str,
    value: Option<f64>,
    warnings: &mut Vec<DiffWarning>,
) -> Option<DateTime<Utc>> {
    let secs = value?;
    let parsed = if secs.is_finite() {
        DateTime::<Utc>::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
    } else {
        None
    };
    if parsed.is_none() {
        warnings.push(DiffWarning::InvalidTimestamp {
            entity_id: entity_id.to_string(),
            field,
        });
    }
    parsed
}

// =============================================================================
// Shared State Mapping
// =============================================================================

/// Entity states tracked by one `subscribe_entities` subscription
///
/// The read loop is the only writer; any number of tasks may read.
#[derive(Debug, Clone, Default)]
pub struct EntityStates {
    inner: Arc<RwLock<HashMap<String, State>>>,
}

impl EntityStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one batch; see [`apply_entity_state_event`]
    pub fn apply(&self, event: &EntityStateEvent) -> Vec<DiffWarning> {
        let mut states = self.inner.write();
        apply_entity_state_event(&mut states, event)
    }

    /// Current state of one entity
    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.inner.read().get(entity_id).cloned()
    }

    /// Copy of the whole mapping
    pub fn snapshot(&self) -> HashMap<String, State> {
        self.inner.read().clone()
    }

    /// Sorted ids of the tracked entities
    pub fn entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Drop every tracked entity
    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: Value) -> EntityStateEvent {
        serde_json::from_value(value).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_add_change_remove_sequence() {
        let mut current = HashMap::new();

        let warnings = apply_entity_state_event(
            &mut current,
            &event(json!({"a": {"light.x": {"s": "on", "a": {"brightness": 100}, "lc": 1000}}})),
        );
        assert!(warnings.is_empty());
        let light = &current["light.x"];
        assert_eq!(light.state, "on");
        assert_eq!(light.attributes["brightness"], json!(100));
        assert_eq!(light.last_changed, at(1000));
        assert_eq!(light.last_updated, at(1000));

        let warnings = apply_entity_state_event(
            &mut current,
            &event(json!({"c": {"light.x": {"+": {"a": {"brightness": 50}, "lu": 1001}}}})),
        );
        assert!(warnings.is_empty());
        let light = &current["light.x"];
        assert_eq!(light.state, "on");
        assert_eq!(light.attributes.len(), 1);
        assert_eq!(light.attributes["brightness"], json!(50));
        assert_eq!(light.last_updated, at(1001));
        assert_eq!(light.last_changed, at(1000));

        let warnings = apply_entity_state_event(&mut current, &event(json!({"r": ["light.x"]})));
        assert!(warnings.is_empty());
        assert!(!current.contains_key("light.x"));
    }

    #[test]
    fn test_replay_is_deterministic() {
        let batches = vec![
            event(json!({"a": {
                "light.a": {"s": "on", "a": {"brightness": 10}, "c": "ctx1", "lc": 1.5},
                "switch.b": {"s": "off", "lc": 2.0, "lu": 3.0}
            }})),
            event(json!({"c": {"light.a": {"+": {"s": "off", "lc": 4.0, "c": "ctx2"}}}})),
            event(json!({"c": {"switch.b": {"-": {"a": ["missing"]}}}, "r": ["light.a"]})),
            event(json!({"a": {"sensor.c": {"s": "21.5", "a": {"unit": "°C"}, "lc": 5.0}}})),
        ];

        let replay = || {
            let mut current = HashMap::new();
            for batch in &batches {
                apply_entity_state_event(&mut current, batch);
            }
            current
        };

        let first = replay();
        let second = replay();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first["switch.b"].last_updated, at(3));
    }

    #[test]
    fn test_added_and_changed_in_same_batch() {
        let mut current = HashMap::new();
        let warnings = apply_entity_state_event(
            &mut current,
            &event(json!({
                "a": {"light.x": {"s": "off", "lc": 10}},
                "c": {"light.x": {"+": {"s": "on", "lc": 11}}}
            })),
        );
        assert!(warnings.is_empty());
        assert_eq!(current["light.x"].state, "on");
        assert_eq!(current["light.x"].last_changed, at(11));
        assert_eq!(current["light.x"].last_updated, at(11));
    }

    #[test]
    fn test_last_updated_defaults_to_last_changed() {
        let mut current = HashMap::new();
        apply_entity_state_event(
            &mut current,
            &event(json!({"a": {"light.x": {"s": "off", "lc": 10, "lu": 12}}})),
        );
        apply_entity_state_event(
            &mut current,
            &event(json!({"c": {"light.x": {"+": {"s": "on", "lc": 20}}}})),
        );
        assert_eq!(current["light.x"].last_changed, at(20));
        assert_eq!(current["light.x"].last_updated, at(20));
        assert_eq!(current["light.x"].last_reported, Some(at(20)));
    }

    #[test]
    fn test_fractional_timestamps() {
        let mut current = HashMap::new();
        apply_entity_state_event(
            &mut current,
            &event(json!({"a": {"light.x": {"s": "on", "lc": 1683832716.072648}}})),
        );
        let expected = DateTime::<Utc>::from_timestamp_micros(1_683_832_716_072_648).unwrap();
        assert_eq!(current["light.x"].last_changed, expected);
    }

    #[test]
    fn test_attribute_removal() {
        let mut current = HashMap::new();
        apply_entity_state_event(
            &mut current,
            &event(json!({"a": {"light.x": {"s": "on", "a": {"effect": "fire", "brightness": 1, "hs": [1, 2]}, "lc": 1}}})),
        );

        apply_entity_state_event(
            &mut current,
            &event(json!({"c": {"light.x": {"-": {"a": ["effect"]}, "+": {"a": {"brightness": 2}, "lu": 2}}}})),
        );
        let light = &current["light.x"];
        assert!(!light.attributes.contains_key("effect"));
        assert_eq!(light.attributes["brightness"], json!(2));

        // Mapping form of the removal half
        apply_entity_state_event(
            &mut current,
            &event(json!({"c": {"light.x": {"-": {"a": {"hs": null}}}}})),
        );
        assert!(!current["light.x"].attributes.contains_key("hs"));
        assert_eq!(current["light.x"].attributes.len(), 1);
    }

    #[test]
    fn test_context_id_reuses_stored_context() {
        let mut current = HashMap::new();
        apply_entity_state_event(
            &mut current,
            &event(json!({"a": {"light.x": {
                "s": "on",
                "lc": 1,
                "c": {"id": "ctx1", "parent_id": "parent", "user_id": "user"}
            }}})),
        );
        assert_eq!(current["light.x"].context.user_id.as_deref(), Some("user"));

        apply_entity_state_event(
            &mut current,
            &event(json!({"c": {"light.x": {"+": {"c": "ctx2", "lu": 2}}}})),
        );
        let context = &current["light.x"].context;
        assert_eq!(context.id, "ctx2");
        assert_eq!(context.parent_id.as_deref(), Some("parent"));
        assert_eq!(context.user_id.as_deref(), Some("user"));

        apply_entity_state_event(
            &mut current,
            &event(json!({"c": {"light.x": {"+": {"c": {"id": "ctx3", "user_id": null}, "lu": 3}}}})),
        );
        assert_eq!(current["light.x"].context, Context::with_id("ctx3"));
    }

    #[test]
    fn test_addition_context_from_bare_id() {
        let mut current = HashMap::new();
        apply_entity_state_event(
            &mut current,
            &event(json!({"a": {"light.x": {"s": "on", "lc": 1, "c": "01H0640ES8JCY1NGTNW3V41T5T"}}})),
        );
        assert_eq!(
            current["light.x"].context,
            Context::with_id("01H0640ES8JCY1NGTNW3V41T5T")
        );
    }

    #[test]
    fn test_change_for_untracked_entity() {
        let mut current = HashMap::new();

        let warnings = apply_entity_state_event(
            &mut current,
            &event(json!({"c": {"light.gap": {"+": {"s": "on", "lc": 5}}}})),
        );
        assert_eq!(
            warnings,
            vec![DiffWarning::ChangeRecoveredAsAddition {
                entity_id: "light.gap".to_string()
            }]
        );
        assert_eq!(current["light.gap"].state, "on");

        let warnings = apply_entity_state_event(
            &mut current,
            &event(json!({"c": {"light.other": {"-": {"a": ["x"]}}}})),
        );
        assert_eq!(
            warnings,
            vec![DiffWarning::ChangeForUntrackedEntity {
                entity_id: "light.other".to_string()
            }]
        );
        assert!(!current.contains_key("light.other"));
    }

    #[test]
    fn test_remove_untracked_entity_warns() {
        let mut current = HashMap::new();
        let warnings = apply_entity_state_event(&mut current, &event(json!({"r": ["light.nope"]})));
        assert_eq!(
            warnings,
            vec![DiffWarning::RemoveUntrackedEntity {
                entity_id: "light.nope".to_string()
            }]
        );
    }

    #[test]
    fn test_addition_without_state_value() {
        let mut current = HashMap::new();
        let warnings =
            apply_entity_state_event(&mut current, &event(json!({"a": {"light.x": {"lc": 1}}})));
        assert_eq!(current["light.x"].state, STATE_UNKNOWN);
        assert_eq!(
            warnings,
            vec![DiffWarning::MissingState {
                entity_id: "light.x".to_string()
            }]
        );
    }

    #[test]
    fn test_entity_states_handle() {
        let states = EntityStates::new();
        assert!(states.is_empty());

        let warnings = states.apply(&event(json!({"a": {
            "light.b": {"s": "on", "lc": 1},
            "light.a": {"s": "off", "lc": 1}
        }})));
        assert!(warnings.is_empty());
        assert_eq!(states.len(), 2);
        assert_eq!(states.entity_ids(), vec!["light.a", "light.b"]);
        assert_eq!(states.get("light.b").unwrap().state, "on");

        let reader = states.clone();
        states.apply(&event(json!({"r": ["light.b"]})));
        assert!(reader.get("light.b").is_none());
        assert_eq!(reader.snapshot().len(), 1);
    }

    #[test]
    fn test_empty_event() {
        assert!(event(json!({})).is_empty());
        assert!(!event(json!({"r": ["x"]})).is_empty());
    }
}
