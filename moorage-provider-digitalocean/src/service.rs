//! Database log sink service trait and error types

use async_trait::async_trait;
use thiserror::Error;

use crate::logsink::{DatabaseCreateLogsinkRequest, DatabaseLogsink, DatabaseUpdateLogsinkRequest};

/// Errors returned by a databases service
#[derive(Debug, Error)]
pub enum DatabasesError {
    /// The service answered with a non-success status
    #[error("{status} {message}")]
    Status { status: u16, message: String },

    /// The request never produced a response
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DatabasesError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::status(404, message)
    }

    /// Whether the service reported that the target does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

/// Raw response of a call that does not return a decoded object
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Result type for databases service calls
pub type DatabasesResult<T> = Result<T, DatabasesError>;

/// The log sink endpoints of a managed databases service
///
/// Transport, authentication and retries are the implementation's business.
#[async_trait]
pub trait DatabasesService: Send + Sync {
    async fn create_logsink(
        &self,
        cluster_id: &str,
        request: &DatabaseCreateLogsinkRequest,
    ) -> DatabasesResult<DatabaseLogsink>;

    async fn get_logsink(&self, cluster_id: &str, logsink_id: &str) -> DatabasesResult<DatabaseLogsink>;

    /// Replace a sink's settings
    ///
    /// The service does not hand back the mutated sink, only the raw response.
    async fn update_logsink(
        &self,
        cluster_id: &str,
        logsink_id: &str,
        request: &DatabaseUpdateLogsinkRequest,
    ) -> DatabasesResult<RawResponse>;

    async fn delete_logsink(&self, cluster_id: &str, logsink_id: &str) -> DatabasesResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_status_404() {
        let err = DatabasesError::not_found("logsink not found");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "404 logsink not found");

        let err = DatabasesError::status(422, "invalid config");
        assert!(!err.is_not_found());
        assert!(!DatabasesError::Io("reset".to_string()).is_not_found());
    }
}
