//! Resource - Declared configuration, remote objects and local records

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Attribute value of a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Whether this is the zero value of its type
    ///
    /// Remote services commonly omit zero-valued fields from responses.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Bool(b) => !b,
            Value::Int(i) => *i == 0,
            Value::Float(f) => *f == 0.0,
            Value::String(s) => s.is_empty(),
            Value::List(l) => l.is_empty(),
            Value::Map(m) => m.is_empty(),
        }
    }
}

/// Attribute map shared by specs, remote objects and records
pub type Attributes = HashMap<String, Value>;

/// Static description of a resource type that lives under a parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKind {
    /// Resource type name (e.g., "digitalocean_database_log_sink")
    pub name: &'static str,
    /// Type name of the owning parent (e.g., "digitalocean_database_cluster")
    pub parent_kind: &'static str,
    /// Attribute holding the parent identifier (e.g., "cluster_id")
    pub parent_attribute: &'static str,
    /// Segment used in local identifiers (e.g., "logsink")
    pub subkind: &'static str,
    /// Collection name used in lock keys (e.g., "log_sinks")
    pub lock_scope: &'static str,
}

impl ResourceKind {
    /// Key serializing mutations of this kind under one parent
    ///
    /// Format: `<parent_kind>/<parent_id>/<lock_scope>`
    pub fn lock_key(&self, parent_id: &str) -> String {
        format!("{}/{}/{}", self.parent_kind, parent_id, self.lock_scope)
    }

    /// Stable local identifier for a child of `parent_id` named `name`
    pub fn local_id(&self, parent_id: &str, name: &str) -> LocalId {
        LocalId(format!("{}/{}/{}", parent_id, self.subkind, name))
    }

    pub fn resource_id(&self, name: impl Into<String>) -> ResourceId {
        ResourceId::new(self.name, name)
    }
}

/// Local identifier of a managed resource: `<parent_id>/<subkind>/<name>`
///
/// Callers treat it as opaque. It is only ever built through
/// [`ResourceKind::local_id`] or restored from persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(String);

impl LocalId {
    /// Restore an identifier previously produced by [`ResourceKind::local_id`]
    pub fn from_persisted(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Human-facing address of a resource, used in errors and output
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    /// Resource type (e.g., "digitalocean_database_log_sink")
    pub resource_type: String,
    /// Natural name of the resource
    pub name: String,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

/// Desired configuration declared by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Identifier of the owning parent; changing it forces replacement
    pub parent_id: String,
    /// Natural name; changing it forces replacement
    pub name: String,
    /// Mutable attributes, always sent in full
    #[serde(default)]
    pub attributes: Attributes,
}

impl ResourceSpec {
    pub fn new(parent_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            parent_id: parent_id.into(),
            name: name.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Object as reported by the remote API
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    /// Remote identifier assigned by the service
    pub id: String,
    /// Natural name echoed by the service
    pub name: String,
    pub attributes: Attributes,
}

impl RemoteObject {
    pub fn new(id: impl Into<String>, name: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            attributes,
        }
    }
}

/// Where a record stands relative to the remote object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Identity is known (e.g., imported) but nothing has been read yet
    Pending,
    /// Created by us; observed holds the create response
    Created,
    /// Observed holds the result of the latest successful read or update
    Synced,
    /// Remote object is gone; the record should be dropped
    Deleted,
}

/// Local declarative state for one managed instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub local_id: Option<LocalId>,
    /// Identifier assigned by the remote service, once known
    pub remote_id: Option<String>,
    pub parent_id: String,
    pub name: String,
    pub spec: Attributes,
    pub observed: Option<Attributes>,
    pub lifecycle: Lifecycle,
}

impl ResourceRecord {
    /// Record for an object whose identity is known but not yet read
    pub fn pending(kind: &ResourceKind, parent_id: impl Into<String>, name: impl Into<String>) -> Self {
        let parent_id = parent_id.into();
        let name = name.into();
        Self {
            local_id: Some(kind.local_id(&parent_id, &name)),
            remote_id: None,
            parent_id,
            name,
            spec: HashMap::new(),
            observed: None,
            lifecycle: Lifecycle::Pending,
        }
    }

    /// Identifier to address the remote object with
    ///
    /// Falls back to the natural name until the service-assigned id is known.
    pub fn remote_identifier(&self) -> &str {
        self.remote_id.as_deref().unwrap_or(&self.name)
    }

    /// Replace observed state with `object` (no merging with stale fields)
    pub fn observe(&mut self, object: RemoteObject, lifecycle: Lifecycle) {
        self.remote_id = Some(object.id);
        self.observed = Some(object.attributes);
        self.lifecycle = lifecycle;
    }

    /// The remote object no longer exists
    pub fn mark_deleted(&mut self) {
        self.local_id = None;
        self.remote_id = None;
        self.observed = None;
        self.lifecycle = Lifecycle::Deleted;
    }

    pub fn is_deleted(&self) -> bool {
        self.lifecycle == Lifecycle::Deleted
    }

    /// Attributes to compare desired configuration against
    pub fn current_attributes(&self) -> &Attributes {
        self.observed.as_ref().unwrap_or(&self.spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIND: ResourceKind = ResourceKind {
        name: "digitalocean_database_log_sink",
        parent_kind: "digitalocean_database_cluster",
        parent_attribute: "cluster_id",
        subkind: "logsink",
        lock_scope: "log_sinks",
    };

    #[test]
    fn lock_key_is_scoped_to_parent() {
        assert_eq!(
            KIND.lock_key("cluster123"),
            "digitalocean_database_cluster/cluster123/log_sinks"
        );
        assert_ne!(KIND.lock_key("a"), KIND.lock_key("b"));
    }

    #[test]
    fn local_id_format() {
        let id = KIND.local_id("cluster123", "mysink");
        assert_eq!(id.as_str(), "cluster123/logsink/mysink");
        assert_eq!(id.to_string(), "cluster123/logsink/mysink");
    }

    #[test]
    fn observe_replaces_stale_fields() {
        let mut record = ResourceRecord::pending(&KIND, "c1", "sink");
        let mut first = HashMap::new();
        first.insert("type".to_string(), Value::String("rsyslog".to_string()));
        first.insert("stale".to_string(), Value::Bool(true));
        record.observe(RemoteObject::new("id-1", "sink", first), Lifecycle::Created);

        let mut second = HashMap::new();
        second.insert("type".to_string(), Value::String("opensearch".to_string()));
        record.observe(RemoteObject::new("id-1", "sink", second), Lifecycle::Synced);

        let observed = record.observed.as_ref().unwrap();
        assert_eq!(observed.len(), 1);
        assert!(!observed.contains_key("stale"));
        assert_eq!(record.lifecycle, Lifecycle::Synced);
        assert_eq!(record.remote_identifier(), "id-1");
    }

    #[test]
    fn mark_deleted_clears_identity() {
        let mut record = ResourceRecord::pending(&KIND, "c1", "sink");
        record.remote_id = Some("id-1".to_string());
        record.mark_deleted();
        assert!(record.local_id.is_none());
        assert!(record.is_deleted());
        assert_eq!(record.remote_identifier(), "sink");
    }

    #[test]
    fn value_deserializes_untagged() {
        let value: Value = serde_json::from_str(r#"{"port": 514, "tls": true, "timeout": 1.5}"#)
            .unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map.get("port"), Some(&Value::Int(514)));
        assert_eq!(map.get("tls"), Some(&Value::Bool(true)));
        assert_eq!(map.get("timeout"), Some(&Value::Float(1.5)));
    }
}
