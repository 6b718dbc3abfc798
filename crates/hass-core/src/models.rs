//! Plain payload models returned by hub commands
//!
//! These are data carriers only. Fields the hub may omit or send as null are
//! optional so that payloads from older and newer hub versions still decode.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::Context;

/// An area from the area registry (`config/area_registry/list`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub area_id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// A device from the device registry (`config/device_registry/list`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub name_by_user: Option<String>,
    #[serde(default)]
    pub area_id: Option<String>,
    #[serde(default)]
    pub configuration_url: Option<String>,
    #[serde(default)]
    pub config_entries: Vec<String>,
    /// (connection type, identifier) pairs, e.g. ("mac", "aa:bb:cc:dd:ee:ff")
    #[serde(default)]
    pub connections: Vec<(String, String)>,
    /// (integration domain, identifier) pairs
    #[serde(default)]
    pub identifiers: Vec<(String, String)>,
    #[serde(default)]
    pub disabled_by: Option<String>,
    #[serde(default)]
    pub entry_type: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub hw_version: Option<String>,
    #[serde(default)]
    pub sw_version: Option<String>,
    #[serde(default)]
    pub via_device_id: Option<String>,
}

/// An entry from the entity registry (`config/entity_registry/list`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub entity_id: String,
    pub platform: String,
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub has_entity_name: bool,
    #[serde(default)]
    pub area_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub config_entry_id: Option<String>,
    #[serde(default)]
    pub disabled_by: Option<String>,
    #[serde(default)]
    pub hidden_by: Option<String>,
    #[serde(default)]
    pub entity_category: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub original_icon: Option<String>,
    #[serde(default)]
    pub translation_key: Option<String>,
    #[serde(default)]
    pub device_class: Option<String>,
    #[serde(default)]
    pub original_device_class: Option<String>,
    #[serde(default)]
    pub aliases: Option<Vec<String>>,
    #[serde(default)]
    pub capabilities: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

/// Result of a `call_service` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallServiceResult {
    pub context: Context,
    /// Service response data, only present when a response was requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
}

/// Units used by the hub's configured unit system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSystemDetails {
    pub length: String,
    #[serde(default)]
    pub accumulated_precipitation: Option<String>,
    pub mass: String,
    pub pressure: String,
    pub temperature: String,
    pub volume: String,
    #[serde(default)]
    pub wind_speed: Option<String>,
}

/// Hub configuration as returned by `get_config`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
    pub unit_system: UnitSystemDetails,
    pub location_name: String,
    pub time_zone: String,
    #[serde(default)]
    pub components: Vec<String>,
    pub config_dir: String,
    #[serde(default)]
    pub whitelist_external_dirs: Vec<String>,
    #[serde(default)]
    pub allowlist_external_dirs: Vec<String>,
    #[serde(default)]
    pub allowlist_external_urls: Vec<String>,
    pub version: String,
    pub config_source: String,
    #[serde(default)]
    pub safe_mode: bool,
    pub state: String,
    #[serde(default)]
    pub external_url: Option<String>,
    #[serde(default)]
    pub internal_url: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}
