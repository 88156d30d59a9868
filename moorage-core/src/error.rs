//! Reconciler errors

use std::time::Duration;

use thiserror::Error;

use crate::lock_table::LockError;
use crate::provider::ProviderError;
use crate::resource::ResourceId;

/// Errors surfaced by reconciler operations
///
/// Not-found answers from the remote API never show up here; they are
/// turned into lifecycle transitions instead.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Error creating {resource}: {source}")]
    CreateFailed {
        resource: ResourceId,
        #[source]
        source: ProviderError,
    },

    #[error("Error retrieving {resource}: {source}")]
    ReadFailed {
        resource: ResourceId,
        #[source]
        source: ProviderError,
    },

    #[error("Error updating {resource}: {source}")]
    UpdateFailed {
        resource: ResourceId,
        #[source]
        source: ProviderError,
    },

    #[error("Error deleting {resource}: {source}")]
    DeleteFailed {
        resource: ResourceId,
        #[source]
        source: ProviderError,
    },

    /// Import key was not `<parent_id>,<name>`
    #[error(
        "Invalid import ID {key:?}: must use the ID of the parent and the name joined with a comma (e.g. `id,name`)"
    )]
    InvalidImportFormat { key: String },

    /// Waited too long for the parent's lock; nothing was sent
    #[error("Timed out after {timeout:?} waiting for lock {key}")]
    LockTimeout { key: String, timeout: Duration },

    /// A force-new attribute changed; the resource must be destroyed and recreated
    #[error("Changing {attribute} of {resource} requires replacement")]
    ReplacementRequired {
        resource: ResourceId,
        attribute: String,
    },

    /// The record has no local identifier (never created, or already deleted)
    #[error("{resource} has not been created")]
    NotCreated { resource: ResourceId },

    /// The task running the operation died before reporting back
    #[error("Operation on {resource} aborted: {reason}")]
    Aborted { resource: ResourceId, reason: String },
}

impl From<LockError> for ReconcileError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout { key, timeout } => Self::LockTimeout { key, timeout },
        }
    }
}
