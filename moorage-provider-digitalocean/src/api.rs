//! Remote API adapter for database log sinks
//!
//! Turns a [`DatabasesService`] into a [`RemoteApi`]: expands declarations
//! into service requests, flattens service responses into remote objects,
//! and maps 404 answers to not-found results.

use log::debug;
use moorage_core::provider::{
    BoxFuture, Deletion, ProviderError, ProviderResult, RemoteApi, UpdateResponse,
};
use moorage_core::resource::{RemoteObject, ResourceKind, ResourceSpec};

use crate::logsink::{
    DatabaseLogsink, LOGSINK_KIND, expand_create_request, expand_update_request, flatten_logsink,
};
use crate::service::{DatabasesError, DatabasesService, RawResponse};

/// Log sink API backed by a databases service
pub struct LogsinkApi<S> {
    service: S,
}

impl<S: DatabasesService> LogsinkApi<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    fn service_error(action: &str, name: &str, err: DatabasesError) -> ProviderError {
        ProviderError::new(format!("{}: {}", action, err))
            .for_resource(LOGSINK_KIND.resource_id(name))
            .with_cause(err)
    }
}

/// Try to recover the mutated sink from a raw update response
fn decode_update_body(response: &RawResponse) -> Option<RemoteObject> {
    if response.body.is_empty() {
        return None;
    }
    serde_json::from_slice::<DatabaseLogsink>(&response.body)
        .ok()
        .map(|logsink| flatten_logsink(&logsink))
}

impl<S: DatabasesService> RemoteApi for LogsinkApi<S> {
    fn kind(&self) -> ResourceKind {
        LOGSINK_KIND
    }

    fn create(&self, parent_id: &str, spec: &ResourceSpec) -> BoxFuture<'_, ProviderResult<RemoteObject>> {
        let cluster_id = parent_id.to_string();
        let spec = spec.clone();
        Box::pin(async move {
            let request = expand_create_request(&spec)
                .map_err(|e| e.for_resource(LOGSINK_KIND.resource_id(&spec.name)))?;
            debug!("Database Logsink create configuration: {:?}", request);

            let logsink = self
                .service
                .create_logsink(&cluster_id, &request)
                .await
                .map_err(|e| Self::service_error("Error creating Database Logsink", &spec.name, e))?;
            Ok(flatten_logsink(&logsink))
        })
    }

    fn get(&self, parent_id: &str, id: &str) -> BoxFuture<'_, ProviderResult<Option<RemoteObject>>> {
        let cluster_id = parent_id.to_string();
        let id = id.to_string();
        Box::pin(async move {
            match self.service.get_logsink(&cluster_id, &id).await {
                Ok(logsink) => Ok(Some(flatten_logsink(&logsink))),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(Self::service_error("Error retrieving Database Logsink", &id, e)),
            }
        })
    }

    fn update(
        &self,
        parent_id: &str,
        id: &str,
        spec: &ResourceSpec,
    ) -> BoxFuture<'_, ProviderResult<UpdateResponse>> {
        let cluster_id = parent_id.to_string();
        let id = id.to_string();
        let spec = spec.clone();
        Box::pin(async move {
            let request = expand_update_request(&spec)
                .map_err(|e| e.for_resource(LOGSINK_KIND.resource_id(&spec.name)))?;
            debug!("Database Logsink update configuration: {:?}", request);

            let response = self
                .service
                .update_logsink(&cluster_id, &id, &request)
                .await
                .map_err(|e| Self::service_error("Error updating Database Logsink", &spec.name, e))?;

            Ok(match decode_update_body(&response) {
                Some(object) => UpdateResponse::Object(object),
                None => UpdateResponse::Accepted,
            })
        })
    }

    fn delete(&self, parent_id: &str, id: &str) -> BoxFuture<'_, ProviderResult<Deletion>> {
        let cluster_id = parent_id.to_string();
        let id = id.to_string();
        Box::pin(async move {
            match self.service.delete_logsink(&cluster_id, &id).await {
                Ok(()) => Ok(Deletion::Deleted),
                Err(e) if e.is_not_found() => Ok(Deletion::NotFound),
                Err(e) => Err(Self::service_error("Error deleting Database Logsink", &id, e)),
            }
        })
    }
}
