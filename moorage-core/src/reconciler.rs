//! Reconciler - Lifecycle of resources that live under a shared parent
//!
//! Every mutating call (create, update, delete) runs while holding the lock
//! keyed by the resource's parent, so siblings under one parent are mutated
//! one at a time. Reads are never locked.
//!
//! Not-found answers from the remote API are mapped to lifecycle transitions:
//! a read that finds nothing marks the record deleted, and deleting something
//! that is already gone counts as success.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::config::ReconcilerConfig;
use crate::error::ReconcileError;
use crate::lock_table::{KeyGuard, KeyedLockTable};
use crate::provider::{Deletion, ProviderError, RemoteApi, UpdateResponse};
use crate::resource::{Lifecycle, ResourceId, ResourceKind, ResourceRecord, ResourceSpec};

/// Result of reading a record back from the remote API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Observed state was refreshed
    Present,
    /// The remote object is gone; the record is marked deleted
    Gone,
}

/// Reconciles records of one resource kind against its remote API
pub struct Reconciler<A> {
    api: A,
    locks: Arc<KeyedLockTable>,
    config: ReconcilerConfig,
}

impl<A: RemoteApi> Reconciler<A> {
    pub fn new(api: A, locks: Arc<KeyedLockTable>) -> Self {
        Self {
            api,
            locks,
            config: ReconcilerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.api.kind()
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn locks(&self) -> &Arc<KeyedLockTable> {
        &self.locks
    }

    fn resource_id(&self, name: &str) -> ResourceId {
        self.kind().resource_id(name)
    }

    async fn lock_parent(&self, parent_id: &str) -> Result<KeyGuard<'_>, ReconcileError> {
        let key = self.kind().lock_key(parent_id);
        match self.config.lock_timeout {
            Some(timeout) => Ok(self.locks.lock_timeout(key, timeout).await?),
            None => Ok(self.locks.lock(key).await),
        }
    }

    fn ensure_created(&self, record: &ResourceRecord) -> Result<(), ReconcileError> {
        if record.local_id.is_none() {
            return Err(ReconcileError::NotCreated {
                resource: self.resource_id(&record.name),
            });
        }
        Ok(())
    }

    /// Create a resource and return its record
    ///
    /// Nothing is returned on failure; a failed create leaves no local state.
    pub async fn create(&self, spec: ResourceSpec) -> Result<ResourceRecord, ReconcileError> {
        let kind = self.kind();

        let created = {
            let _guard = self.lock_parent(&spec.parent_id).await?;
            debug!("{} create configuration: {:?}", kind.name, spec);
            self.api.create(&spec.parent_id, &spec).await
        };
        let object = created.map_err(|source| ReconcileError::CreateFailed {
            resource: self.resource_id(&spec.name),
            source,
        })?;

        let local_id = kind.local_id(&spec.parent_id, &spec.name);
        info!("{} created: {} (remote id {})", kind.name, local_id, object.id);

        let mut record = ResourceRecord {
            local_id: Some(local_id),
            remote_id: None,
            parent_id: spec.parent_id,
            name: spec.name,
            spec: spec.attributes,
            observed: None,
            lifecycle: Lifecycle::Created,
        };
        record.observe(object, Lifecycle::Created);
        Ok(record)
    }

    /// Refresh `record.observed` from the remote API
    ///
    /// If the remote object has disappeared the record is marked deleted and
    /// [`ReadOutcome::Gone`] is returned instead of an error.
    pub async fn read(&self, record: &mut ResourceRecord) -> Result<ReadOutcome, ReconcileError> {
        self.ensure_created(record)?;

        let found = self
            .api
            .get(&record.parent_id, record.remote_identifier())
            .await
            .map_err(|source| ReconcileError::ReadFailed {
                resource: self.resource_id(&record.name),
                source,
            })?;

        match found {
            Some(object) => {
                record.observe(object, Lifecycle::Synced);
                Ok(ReadOutcome::Present)
            }
            None => {
                warn!(
                    "{} {} not found remotely, removing from state",
                    self.kind().name,
                    record.local_id.as_ref().map_or("", |id| id.as_str())
                );
                record.mark_deleted();
                Ok(ReadOutcome::Gone)
            }
        }
    }

    /// Send the full `spec` as the new configuration of `record`
    ///
    /// On failure the record keeps its last synced state.
    pub async fn update(&self, record: &mut ResourceRecord, spec: ResourceSpec) -> Result<(), ReconcileError> {
        self.ensure_created(record)?;
        let resource = self.resource_id(&record.name);

        if spec.parent_id != record.parent_id {
            return Err(ReconcileError::ReplacementRequired {
                resource,
                attribute: self.kind().parent_attribute.to_string(),
            });
        }
        if spec.name != record.name {
            return Err(ReconcileError::ReplacementRequired {
                resource,
                attribute: "name".to_string(),
            });
        }

        let updated = {
            let _guard = self.lock_parent(&record.parent_id).await?;
            debug!("{} update configuration: {:?}", self.kind().name, spec);
            self.api
                .update(&record.parent_id, record.remote_identifier(), &spec)
                .await
        };
        let response = updated.map_err(|source| ReconcileError::UpdateFailed {
            resource: resource.clone(),
            source,
        })?;

        let object = match response {
            UpdateResponse::Object(object) => object,
            UpdateResponse::Accepted => {
                debug!("{} update returned no object, reading back", self.kind().name);
                let found = self
                    .api
                    .get(&record.parent_id, record.remote_identifier())
                    .await
                    .map_err(|source| ReconcileError::ReadFailed {
                        resource: resource.clone(),
                        source,
                    })?;
                found.ok_or_else(|| ReconcileError::UpdateFailed {
                    resource,
                    source: ProviderError::new("resource disappeared right after update"),
                })?
            }
        };

        record.spec = spec.attributes;
        record.observe(object, Lifecycle::Synced);
        Ok(())
    }

    /// Delete the remote object behind `record`
    ///
    /// Deleting an object that is already gone succeeds with
    /// [`Deletion::NotFound`]. On failure the record is left untouched.
    pub async fn delete(&self, record: &mut ResourceRecord) -> Result<Deletion, ReconcileError> {
        let deleted = {
            let _guard = self.lock_parent(&record.parent_id).await?;
            info!(
                "Deleting {}: {}/{}",
                self.kind().name,
                record.parent_id,
                record.remote_identifier()
            );
            self.api
                .delete(&record.parent_id, record.remote_identifier())
                .await
        };
        let deletion = deleted.map_err(|source| ReconcileError::DeleteFailed {
            resource: self.resource_id(&record.name),
            source,
        })?;

        if deletion == Deletion::NotFound {
            debug!("{} {} was already gone", self.kind().name, record.name);
        }
        record.mark_deleted();
        Ok(deletion)
    }

    /// Build a pending record from an import key `<parent_id>,<name>`
    ///
    /// Follow up with [`read`](Self::read) to populate the rest.
    pub fn import(&self, key: &str) -> Result<ResourceRecord, ReconcileError> {
        let (parent_id, name) = parse_import_key(key)?;
        Ok(ResourceRecord::pending(&self.kind(), parent_id, name))
    }
}

/// Split an import key into `(parent_id, name)`
///
/// Exactly one comma with non-empty text on both sides.
pub fn parse_import_key(key: &str) -> Result<(&str, &str), ReconcileError> {
    match key.split_once(',') {
        Some((parent_id, name)) if !parent_id.is_empty() && !name.is_empty() && !name.contains(',') => {
            Ok((parent_id, name))
        }
        _ => Err(ReconcileError::InvalidImportFormat {
            key: key.to_string(),
        }),
    }
}
