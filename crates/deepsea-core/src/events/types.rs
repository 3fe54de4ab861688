//! Event types.
//!
//! - `EventMessage` - outbound messages delivered to live subscribers
//! - `ChangeNotification` - create/update/delete of a registry record, consumed by controllers

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::quantity::Quantity;
use crate::resource::{Resource, ResourceKind};

// ============================================================================
// Subscriber Events
// ============================================================================

/// Type of an outbound event message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    /// A device value changed
    Value,
    ModuleCreated,
    ModuleUpdated,
    ModuleDeleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Value => "value",
            EventType::ModuleCreated => "module-created",
            EventType::ModuleUpdated => "module-updated",
            EventType::ModuleDeleted => "module-deleted",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One message on the outbound event stream.
///
/// Serialized as `{"type": "value", "path": "m.d.v", "value": "10.25"}`.
/// Module lifecycle messages use the module name as path and carry no value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl EventMessage {
    pub fn value(path: impl Into<String>, value: &Quantity) -> Self {
        Self {
            event_type: EventType::Value,
            path: path.into(),
            value: Some(value.to_string()),
        }
    }

    pub fn module_created(module: impl Into<String>) -> Self {
        Self::module(EventType::ModuleCreated, module)
    }

    pub fn module_updated(module: impl Into<String>) -> Self {
        Self::module(EventType::ModuleUpdated, module)
    }

    pub fn module_deleted(module: impl Into<String>) -> Self {
        Self::module(EventType::ModuleDeleted, module)
    }

    fn module(event_type: EventType, module: impl Into<String>) -> Self {
        Self {
            event_type,
            path: module.into(),
            value: None,
        }
    }
}

/// Path of a device value as seen by subscribers: `<module>.<device>.<value>`.
pub fn value_path(module: &str, device: &str, value: &str) -> String {
    format!("{module}.{device}.{value}")
}

// ============================================================================
// Change Notifications
// ============================================================================

/// Kind of registry change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Add => "add",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

/// A create/update/delete of one registry record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub kind: ChangeKind,
    pub resource_kind: ResourceKind,
    pub name: String,
    /// Record before the change (None for additions)
    pub old: Option<Resource>,
    /// Record after the change (None for deletions)
    pub new: Option<Resource>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ChangeNotification {
    pub fn new(kind: ChangeKind, old: Option<Resource>, new: Option<Resource>) -> Option<Self> {
        let current = new.as_ref().or(old.as_ref())?;
        Some(Self {
            kind,
            resource_kind: current.kind(),
            name: current.name().to_string(),
            old,
            new,
            timestamp: OffsetDateTime::now_utc(),
        })
    }

    pub fn added(new: impl Into<Resource>) -> Self {
        let new = new.into();
        Self {
            kind: ChangeKind::Add,
            resource_kind: new.kind(),
            name: new.name().to_string(),
            old: None,
            new: Some(new),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn updated(old: impl Into<Resource>, new: impl Into<Resource>) -> Self {
        let new = new.into();
        Self {
            kind: ChangeKind::Update,
            resource_kind: new.kind(),
            name: new.name().to_string(),
            old: Some(old.into()),
            new: Some(new),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn deleted(old: impl Into<Resource>) -> Self {
        let old = old.into();
        Self {
            kind: ChangeKind::Delete,
            resource_kind: old.kind(),
            name: old.name().to_string(),
            old: Some(old),
            new: None,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}
