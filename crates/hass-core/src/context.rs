//! Context type for tracking request origin and causality

use serde::{Deserialize, Serialize};

/// Context for tracking the origin and causality of events and state changes
///
/// Every event, state and command result in Home Assistant carries a Context
/// that identifies who initiated the action. On the client side it is purely
/// informational and never used for correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Unique identifier for this context (ULID)
    pub id: String,

    /// Parent context ID for tracking causality chains
    #[serde(default)]
    pub parent_id: Option<String>,

    /// User ID that initiated this action (if any)
    #[serde(default)]
    pub user_id: Option<String>,
}

impl Context {
    /// Create a context with a specific ID and no parent or user
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            user_id: None,
        }
    }

    /// Copy of this context carrying a different ID
    ///
    /// Parent and user are kept.
    pub fn with_replaced_id(&self, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: self.parent_id.clone(),
            user_id: self.user_id.clone(),
        }
    }
}
