//! Provider - Trait abstracting the remote API of one resource type
//!
//! A RemoteApi performs the raw create/get/update/delete calls for a resource
//! kind. It knows nothing about locking or local records; the
//! [`Reconciler`](crate::reconciler::Reconciler) layers those on top.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::resource::{RemoteObject, ResourceId, ResourceKind, ResourceSpec};

/// Error type for remote API operations
#[derive(Debug)]
pub struct ProviderError {
    pub message: String,
    pub resource_id: Option<ResourceId>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref id) = self.resource_id {
            write!(f, "[{}] {}", id, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            resource_id: None,
            cause: None,
        }
    }

    pub fn for_resource(mut self, id: ResourceId) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What an update call handed back
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateResponse {
    /// The service returned the mutated object
    Object(RemoteObject),
    /// The update was accepted but no usable object came back
    Accepted,
}

/// Result of a delete call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    Deleted,
    /// Nothing to delete; the object was already gone
    NotFound,
}

/// Remote API for one resource kind
///
/// All calls address objects by `(parent_id, id)`. Not-found is reported
/// through the return value (`None`, [`Deletion::NotFound`]), never as an error.
pub trait RemoteApi: Send + Sync {
    /// Resource kind served by this API
    fn kind(&self) -> ResourceKind;

    /// Create an object under `parent_id`
    fn create(&self, parent_id: &str, spec: &ResourceSpec) -> BoxFuture<'_, ProviderResult<RemoteObject>>;

    /// Fetch an object; `None` if it does not exist
    fn get(&self, parent_id: &str, id: &str) -> BoxFuture<'_, ProviderResult<Option<RemoteObject>>>;

    /// Replace the mutable configuration of an object with `spec`
    fn update(
        &self,
        parent_id: &str,
        id: &str,
        spec: &ResourceSpec,
    ) -> BoxFuture<'_, ProviderResult<UpdateResponse>>;

    /// Delete an object
    fn delete(&self, parent_id: &str, id: &str) -> BoxFuture<'_, ProviderResult<Deletion>>;
}

/// RemoteApi implementation for Box<dyn RemoteApi>
/// This enables dynamic dispatch for APIs
impl RemoteApi for Box<dyn RemoteApi> {
    fn kind(&self) -> ResourceKind {
        (**self).kind()
    }

    fn create(&self, parent_id: &str, spec: &ResourceSpec) -> BoxFuture<'_, ProviderResult<RemoteObject>> {
        (**self).create(parent_id, spec)
    }

    fn get(&self, parent_id: &str, id: &str) -> BoxFuture<'_, ProviderResult<Option<RemoteObject>>> {
        (**self).get(parent_id, id)
    }

    fn update(
        &self,
        parent_id: &str,
        id: &str,
        spec: &ResourceSpec,
    ) -> BoxFuture<'_, ProviderResult<UpdateResponse>> {
        (**self).update(parent_id, id, spec)
    }

    fn delete(&self, parent_id: &str, id: &str) -> BoxFuture<'_, ProviderResult<Deletion>> {
        (**self).delete(parent_id, id)
    }
}

impl<T: RemoteApi + ?Sized> RemoteApi for Arc<T> {
    fn kind(&self) -> ResourceKind {
        (**self).kind()
    }

    fn create(&self, parent_id: &str, spec: &ResourceSpec) -> BoxFuture<'_, ProviderResult<RemoteObject>> {
        (**self).create(parent_id, spec)
    }

    fn get(&self, parent_id: &str, id: &str) -> BoxFuture<'_, ProviderResult<Option<RemoteObject>>> {
        (**self).get(parent_id, id)
    }

    fn update(
        &self,
        parent_id: &str,
        id: &str,
        spec: &ResourceSpec,
    ) -> BoxFuture<'_, ProviderResult<UpdateResponse>> {
        (**self).update(parent_id, id, spec)
    }

    fn delete(&self, parent_id: &str, id: &str) -> BoxFuture<'_, ProviderResult<Deletion>> {
        (**self).delete(parent_id, id)
    }
}
