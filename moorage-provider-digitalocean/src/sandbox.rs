//! Sandbox databases service
//!
//! An in-process stand-in for the managed databases API, optionally persisted
//! to a JSON file so it survives across CLI invocations.
//!
//! Like the real service, it rejects a log sink mutation while another one is
//! in progress on the same cluster (409). Each mutation takes `latency` to
//! complete, which makes overlapping requests easy to provoke.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::logsink::{DatabaseCreateLogsinkRequest, DatabaseLogsink, DatabaseUpdateLogsinkRequest};
use crate::service::{DatabasesError, DatabasesResult, DatabasesService, RawResponse};

/// Persisted sandbox contents: cluster id -> log sinks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxSnapshot {
    pub clusters: BTreeMap<String, Vec<DatabaseLogsink>>,
}

pub struct SandboxDatabases {
    snapshot: Mutex<SandboxSnapshot>,
    busy: Mutex<HashSet<String>>,
    path: Option<PathBuf>,
    latency: Duration,
}

impl Default for SandboxDatabases {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxDatabases {
    /// Default sandbox file name
    pub const DEFAULT_SANDBOX_FILE: &'static str = "moorage.sandbox.json";

    /// Create an empty, purely in-memory sandbox
    pub fn new() -> Self {
        Self {
            snapshot: Mutex::new(SandboxSnapshot::default()),
            busy: Mutex::new(HashSet::new()),
            path: None,
            latency: Duration::ZERO,
        }
    }

    /// Open a file-backed sandbox, starting empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> DatabasesResult<Self> {
        let path = path.into();
        let snapshot = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| DatabasesError::Io(format!("Failed to read sandbox file: {}", e)))?;
            serde_json::from_str(&content).map_err(|e| {
                DatabasesError::Serialization(format!("Failed to parse sandbox file: {}", e))
            })?
        } else {
            SandboxSnapshot::default()
        };

        Ok(Self {
            snapshot: Mutex::new(snapshot),
            path: Some(path),
            ..Self::new()
        })
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Register a database cluster that log sinks can be attached to
    pub fn add_cluster(&self, cluster_id: impl Into<String>) -> DatabasesResult<()> {
        let mut snapshot = self.snapshot();
        snapshot.clusters.entry(cluster_id.into()).or_default();
        self.persist(&snapshot)
    }

    /// Copy of the current contents
    pub fn snapshot_clone(&self) -> SandboxSnapshot {
        self.snapshot().clone()
    }

    fn snapshot(&self) -> MutexGuard<'_, SandboxSnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, snapshot: &SandboxSnapshot) -> DatabasesResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(snapshot).map_err(|e| {
            DatabasesError::Serialization(format!("Failed to serialize sandbox: {}", e))
        })?;
        std::fs::write(path, content)
            .map_err(|e| DatabasesError::Io(format!("Failed to write sandbox file: {}", e)))
    }

    /// Claim the cluster for one mutation, failing if another is in flight
    fn begin_mutation(&self, cluster_id: &str) -> DatabasesResult<MutationSlot<'_>> {
        let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
        if !busy.insert(cluster_id.to_string()) {
            return Err(DatabasesError::status(
                409,
                format!(
                    "cluster {} has another log sink operation in progress",
                    cluster_id
                ),
            ));
        }
        Ok(MutationSlot {
            sandbox: self,
            cluster_id: cluster_id.to_string(),
        })
    }

    async fn mutate<T>(
        &self,
        cluster_id: &str,
        op: impl FnOnce(&mut SandboxSnapshot) -> DatabasesResult<T>,
    ) -> DatabasesResult<T> {
        let _slot = self.begin_mutation(cluster_id)?;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut snapshot = self.snapshot();
        let value = op(&mut *snapshot)?;
        self.persist(&snapshot)?;
        Ok(value)
    }
}

/// Marks a cluster as busy until dropped
struct MutationSlot<'a> {
    sandbox: &'a SandboxDatabases,
    cluster_id: String,
}

impl Drop for MutationSlot<'_> {
    fn drop(&mut self) {
        self.sandbox
            .busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.cluster_id);
    }
}

fn cluster_not_found(cluster_id: &str) -> DatabasesError {
    DatabasesError::not_found(format!("database cluster {} not found", cluster_id))
}

fn logsink_not_found(logsink_id: &str) -> DatabasesError {
    DatabasesError::not_found(format!("log sink {} not found", logsink_id))
}

fn find_sink<'a>(sinks: &'a mut [DatabaseLogsink], logsink_id: &str) -> Option<&'a mut DatabaseLogsink> {
    sinks
        .iter_mut()
        .find(|s| s.id == logsink_id || s.name == logsink_id)
}

#[async_trait]
impl DatabasesService for SandboxDatabases {
    async fn create_logsink(
        &self,
        cluster_id: &str,
        request: &DatabaseCreateLogsinkRequest,
    ) -> DatabasesResult<DatabaseLogsink> {
        self.mutate(cluster_id, |snapshot| {
            let sinks = snapshot
                .clusters
                .get_mut(cluster_id)
                .ok_or_else(|| cluster_not_found(cluster_id))?;
            if sinks.iter().any(|s| s.name == request.name) {
                return Err(DatabasesError::status(
                    422,
                    format!("log sink {} already exists", request.name),
                ));
            }

            let logsink = DatabaseLogsink {
                id: uuid::Uuid::new_v4().to_string(),
                name: request.name.clone(),
                sink_type: request.sink_type,
                config: request.config.clone(),
            };
            debug!("sandbox: created log sink {} in {}", logsink.id, cluster_id);
            sinks.push(logsink.clone());
            Ok(logsink)
        })
        .await
    }

    async fn get_logsink(&self, cluster_id: &str, logsink_id: &str) -> DatabasesResult<DatabaseLogsink> {
        let mut snapshot = self.snapshot();
        let sinks = snapshot
            .clusters
            .get_mut(cluster_id)
            .ok_or_else(|| cluster_not_found(cluster_id))?;
        find_sink(sinks, logsink_id)
            .map(|s| s.clone())
            .ok_or_else(|| logsink_not_found(logsink_id))
    }

    async fn update_logsink(
        &self,
        cluster_id: &str,
        logsink_id: &str,
        request: &DatabaseUpdateLogsinkRequest,
    ) -> DatabasesResult<RawResponse> {
        self.mutate(cluster_id, |snapshot| {
            let sinks = snapshot
                .clusters
                .get_mut(cluster_id)
                .ok_or_else(|| cluster_not_found(cluster_id))?;
            let sink = find_sink(sinks, logsink_id).ok_or_else(|| logsink_not_found(logsink_id))?;
            sink.sink_type = request.sink_type;
            sink.config = request.config.clone();
            Ok(RawResponse {
                status: 200,
                body: Vec::new(),
            })
        })
        .await
    }

    async fn delete_logsink(&self, cluster_id: &str, logsink_id: &str) -> DatabasesResult<()> {
        self.mutate(cluster_id, |snapshot| {
            let sinks = snapshot
                .clusters
                .get_mut(cluster_id)
                .ok_or_else(|| cluster_not_found(cluster_id))?;
            let before = sinks.len();
            sinks.retain(|s| s.id != logsink_id && s.name != logsink_id);
            if sinks.len() == before {
                return Err(logsink_not_found(logsink_id));
            }
            Ok(())
        })
        .await
    }
}
