//! State file structures for persisting resource records

use std::collections::HashMap;

use moorage_core::resource::{Attributes, Lifecycle, LocalId, ResourceRecord, Value};
use serde::{Deserialize, Serialize};

use crate::backend::{BackendError, BackendResult};

/// The main state file structure that persists to the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State file format version
    pub version: u32,
    /// Monotonically increasing number for each state modification
    pub serial: u64,
    /// Unique identifier for this state lineage (prevents accidental overwrites)
    pub lineage: String,
    /// Version of Moorage that last modified this state
    pub moorage_version: String,
    pub resources: Vec<ResourceState>,
}

impl StateFile {
    /// Current state file format version
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self::with_lineage(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_lineage(lineage: String) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage,
            moorage_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: Vec::new(),
        }
    }

    /// Increment serial and update the writer version for a new state write
    pub fn increment_serial(&mut self) {
        self.serial += 1;
        self.moorage_version = env!("CARGO_PKG_VERSION").to_string();
    }

    pub fn find_resource(&self, resource_type: &str, local_id: &str) -> Option<&ResourceState> {
        self.resources
            .iter()
            .find(|r| r.resource_type == resource_type && r.local_id == local_id)
    }

    pub fn find_resource_mut(&mut self, resource_type: &str, local_id: &str) -> Option<&mut ResourceState> {
        self.resources
            .iter_mut()
            .find(|r| r.resource_type == resource_type && r.local_id == local_id)
    }

    /// Add or replace a resource, keyed by type and local id
    pub fn upsert_resource(&mut self, resource: ResourceState) {
        if let Some(existing) = self.find_resource_mut(&resource.resource_type, &resource.local_id) {
            *existing = resource;
        } else {
            self.resources.push(resource);
        }
    }

    pub fn remove_resource(&mut self, resource_type: &str, local_id: &str) -> Option<ResourceState> {
        let pos = self
            .resources
            .iter()
            .position(|r| r.resource_type == resource_type && r.local_id == local_id)?;
        Some(self.resources.remove(pos))
    }

    /// Store `record`, or drop its entry once the record is deleted
    ///
    /// A deleted record has already lost its local id, so the id it was
    /// stored under is passed separately.
    pub fn sync_record(
        &mut self,
        resource_type: &str,
        stored_as: Option<&LocalId>,
        record: &ResourceRecord,
    ) -> BackendResult<()> {
        match ResourceState::from_record(resource_type, record)? {
            Some(resource) => self.upsert_resource(resource),
            None => {
                if let Some(local_id) = stored_as {
                    self.remove_resource(resource_type, local_id.as_str());
                }
            }
        }
        Ok(())
    }

    /// All records of one resource type
    pub fn records(&self, resource_type: &str) -> BackendResult<Vec<ResourceRecord>> {
        self.resources
            .iter()
            .filter(|r| r.resource_type == resource_type)
            .map(ResourceState::to_record)
            .collect()
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a single managed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource type (e.g., "digitalocean_database_log_sink")
    pub resource_type: String,
    /// Composite local id, `<parent>/<subkind>/<name>`
    pub local_id: String,
    pub parent_id: String,
    pub name: String,
    /// Identifier assigned by the remote service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    /// Declared attributes as JSON values
    #[serde(default)]
    pub spec: HashMap<String, serde_json::Value>,
    /// Last observed attributes as JSON values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<HashMap<String, serde_json::Value>>,
    pub lifecycle: Lifecycle,
}

impl ResourceState {
    /// Persistable form of a live record; `None` for deleted records
    pub fn from_record(resource_type: impl Into<String>, record: &ResourceRecord) -> BackendResult<Option<Self>> {
        let local_id = match &record.local_id {
            Some(local_id) if !record.is_deleted() => local_id.as_str(),
            _ => return Ok(None),
        };
        let observed = match &record.observed {
            Some(observed) => Some(attributes_to_json(local_id, observed)?),
            None => None,
        };
        Ok(Some(Self {
            resource_type: resource_type.into(),
            local_id: local_id.to_string(),
            parent_id: record.parent_id.clone(),
            name: record.name.clone(),
            remote_id: record.remote_id.clone(),
            spec: attributes_to_json(local_id, &record.spec)?,
            observed,
            lifecycle: record.lifecycle,
        }))
    }

    pub fn to_record(&self) -> BackendResult<ResourceRecord> {
        let observed = match &self.observed {
            Some(observed) => Some(attributes_from_json(&self.local_id, observed)?),
            None => None,
        };
        Ok(ResourceRecord {
            local_id: Some(LocalId::from_persisted(self.local_id.clone())),
            remote_id: self.remote_id.clone(),
            parent_id: self.parent_id.clone(),
            name: self.name.clone(),
            spec: attributes_from_json(&self.local_id, &self.spec)?,
            observed,
            lifecycle: self.lifecycle,
        })
    }
}

/// Non-finite floats have no JSON form and serialize to `null`, which would
/// not load back, so they are rejected here.
fn attributes_to_json(
    local_id: &str,
    attributes: &Attributes,
) -> BackendResult<HashMap<String, serde_json::Value>> {
    attributes
        .iter()
        .map(|(k, v)| {
            let invalid = |reason: String| {
                BackendError::Serialization(format!(
                    "Invalid attribute '{}' of {}: {}",
                    k, local_id, reason
                ))
            };
            match serde_json::to_value(v) {
                Ok(serde_json::Value::Null) => Err(invalid("value has no JSON form".to_string())),
                Ok(json) => Ok((k.clone(), json)),
                Err(e) => Err(invalid(e.to_string())),
            }
        })
        .collect()
}

fn attributes_from_json(
    local_id: &str,
    attributes: &HashMap<String, serde_json::Value>,
) -> BackendResult<Attributes> {
    attributes
        .iter()
        .map(|(k, json)| {
            serde_json::from_value::<Value>(json.clone())
                .map(|v| (k.clone(), v))
                .map_err(|e| {
                    BackendError::InvalidState(format!(
                        "Invalid attribute '{}' of {}: {}",
                        k, local_id, e
                    ))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use moorage_core::resource::{RemoteObject, ResourceKind};

    const KIND: ResourceKind = ResourceKind {
        name: "digitalocean_database_log_sink",
        parent_kind: "digitalocean_database_cluster",
        parent_attribute: "cluster_id",
        subkind: "logsink",
        lock_scope: "log_sinks",
    };

    fn record(name: &str) -> ResourceRecord {
        let mut record = ResourceRecord::pending(&KIND, "c1", name);
        record.spec.insert("type".to_string(), Value::String("rsyslog".to_string()));
        let mut attributes = HashMap::new();
        attributes.insert("type".to_string(), Value::String("rsyslog".to_string()));
        attributes.insert("port".to_string(), Value::Int(514));
        record.observe(RemoteObject::new("sink-1", name, attributes), Lifecycle::Synced);
        record
    }

    #[test]
    fn test_state_file_new() {
        let state = StateFile::new();
        assert_eq!(state.version, StateFile::CURRENT_VERSION);
        assert_eq!(state.serial, 0);
        assert!(!state.lineage.is_empty());
        assert!(state.resources.is_empty());
    }

    #[test]
    fn test_state_file_increment_serial() {
        let mut state = StateFile::new();
        state.increment_serial();
        state.increment_serial();
        assert_eq!(state.serial, 2);
    }

    #[test]
    fn test_record_survives_state_round_trip() {
        let original = record("app");
        let resource = ResourceState::from_record(KIND.name, &original).unwrap().unwrap();
        assert_eq!(resource.local_id, "c1/logsink/app");
        assert_eq!(resource.remote_id.as_deref(), Some("sink-1"));

        let restored = resource.to_record().unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_deleted_record_is_not_persisted() {
        let mut deleted = record("app");
        deleted.mark_deleted();
        assert!(ResourceState::from_record(KIND.name, &deleted).unwrap().is_none());
    }

    #[test]
    fn test_sync_record_upserts_then_removes() {
        let mut state = StateFile::new();
        let mut app = record("app");
        let local_id = app.local_id.clone();

        state.sync_record(KIND.name, local_id.as_ref(), &app).unwrap();
        state.sync_record(KIND.name, local_id.as_ref(), &app).unwrap();
        assert_eq!(state.resources.len(), 1);

        app.mark_deleted();
        state.sync_record(KIND.name, local_id.as_ref(), &app).unwrap();
        assert!(state.resources.is_empty());
    }

    #[test]
    fn test_records_filters_by_type() {
        let mut state = StateFile::new();
        state.upsert_resource(ResourceState::from_record(KIND.name, &record("a")).unwrap().unwrap());
        state.upsert_resource(ResourceState::from_record(KIND.name, &record("b")).unwrap().unwrap());
        state.upsert_resource(ResourceState::from_record("other_type", &record("c")).unwrap().unwrap());

        let records = state.records(KIND.name).unwrap();
        assert_eq!(records.len(), 2);
        assert!(state.find_resource("other_type", "c1/logsink/c").is_some());
        assert!(state.remove_resource(KIND.name, "c1/logsink/zzz").is_none());
    }

    #[test]
    fn test_invalid_attribute_is_reported() {
        let mut resource = ResourceState::from_record(KIND.name, &record("app")).unwrap().unwrap();
        resource.spec.insert("broken".to_string(), serde_json::Value::Null);
        let err = resource.to_record().unwrap_err();
        assert!(err.to_string().contains("Invalid attribute 'broken'"));
    }

    #[test]
    fn test_unserializable_attribute_is_reported() {
        let mut app = record("app");
        app.spec.insert("ratio".to_string(), Value::Float(f64::NAN));

        let err = ResourceState::from_record(KIND.name, &app).unwrap_err();
        assert!(matches!(err, BackendError::Serialization(_)));
        assert!(err.to_string().contains("Invalid attribute 'ratio' of c1/logsink/app"));

        let mut state = StateFile::new();
        assert!(state.sync_record(KIND.name, app.local_id.as_ref(), &app).is_err());
        assert!(state.resources.is_empty());
    }

    #[test]
    fn test_state_file_serialization() {
        let mut state = StateFile::new();
        state.upsert_resource(ResourceState::from_record(KIND.name, &record("app")).unwrap().unwrap());

        let json = serde_json::to_string_pretty(&state).unwrap();
        assert!(json.contains("\"lifecycle\": \"synced\""));
        let deserialized: StateFile = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.lineage, state.lineage);
        assert_eq!(deserialized.resources, state.resources);
    }
}
