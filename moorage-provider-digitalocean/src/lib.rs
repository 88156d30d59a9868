//! Moorage DigitalOcean Provider
//!
//! Database log sink resources of DigitalOcean managed database clusters.
//!
//! ## Module Structure
//!
//! - `logsink` - Wire models and attribute expand/flatten helpers
//! - `service` - The databases service trait and its error type
//! - `api` - `LogsinkApi`, the remote API adapter used by the reconciler
//! - `sandbox` - In-process databases service, optionally file-backed

pub mod api;
pub mod logsink;
pub mod sandbox;
pub mod service;

// Re-export main types
pub use api::LogsinkApi;
pub use logsink::{LOGSINK_KIND, LogsinkConfig, LogsinkType};
pub use sandbox::SandboxDatabases;
pub use service::{DatabasesError, DatabasesService};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use moorage_core::resource::{Lifecycle, ResourceSpec, Value};
    use moorage_core::{KeyedLockTable, ReadOutcome, ReconcileError, Reconciler};

    fn rsyslog_spec(cluster_id: &str, name: &str, port: i64) -> ResourceSpec {
        let mut config = HashMap::new();
        config.insert("server".to_string(), Value::String("logs.example.com".to_string()));
        config.insert("port".to_string(), Value::Int(port));
        ResourceSpec::new(cluster_id, name)
            .with_attribute("type", Value::String("rsyslog".to_string()))
            .with_attribute("config", Value::Map(config))
    }

    fn reconciler(sandbox: SandboxDatabases) -> Reconciler<LogsinkApi<SandboxDatabases>> {
        Reconciler::new(LogsinkApi::new(sandbox), Arc::new(KeyedLockTable::new()))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sibling_creates_never_conflict() {
        let sandbox = SandboxDatabases::new().with_latency(Duration::from_millis(20));
        sandbox.add_cluster("c1").unwrap();
        let reconciler = Arc::new(reconciler(sandbox));

        let mut handles = Vec::new();
        for i in 0..8 {
            let reconciler = Arc::clone(&reconciler);
            handles.push(tokio::spawn(async move {
                reconciler
                    .create(rsyslog_spec("c1", &format!("sink-{}", i), 514))
                    .await
            }));
        }
        for handle in handles {
            let record = handle.await.unwrap().unwrap();
            assert_eq!(record.lifecycle, Lifecycle::Created);
        }

        let snapshot = reconciler.api().service().snapshot_clone();
        assert_eq!(snapshot.clusters["c1"].len(), 8);
        assert!(reconciler.locks().is_empty());
    }

    #[tokio::test]
    async fn test_update_reads_back_when_body_is_empty() {
        let sandbox = SandboxDatabases::new();
        sandbox.add_cluster("c1").unwrap();
        let reconciler = reconciler(sandbox);

        let mut record = reconciler.create(rsyslog_spec("c1", "app", 514)).await.unwrap();
        reconciler
            .update(&mut record, rsyslog_spec("c1", "app", 6514))
            .await
            .unwrap();

        assert_eq!(record.lifecycle, Lifecycle::Synced);
        let config = record
            .observed
            .as_ref()
            .and_then(|o| o.get("config"))
            .and_then(Value::as_map)
            .unwrap();
        assert_eq!(config.get("port"), Some(&Value::Int(6514)));
    }

    #[tokio::test]
    async fn test_out_of_band_delete_is_drift() {
        let sandbox = SandboxDatabases::new();
        sandbox.add_cluster("c1").unwrap();
        let reconciler = reconciler(sandbox);

        let mut record = reconciler.create(rsyslog_spec("c1", "app", 514)).await.unwrap();
        let remote_id = record.remote_id.clone().unwrap();
        reconciler
            .api()
            .service()
            .delete_logsink("c1", &remote_id)
            .await
            .unwrap();

        assert_eq!(reconciler.read(&mut record).await.unwrap(), ReadOutcome::Gone);
        assert!(record.is_deleted());
    }

    #[tokio::test]
    async fn test_import_by_cluster_and_name() {
        let sandbox = SandboxDatabases::new();
        sandbox.add_cluster("c1").unwrap();
        let reconciler = reconciler(sandbox);
        reconciler.create(rsyslog_spec("c1", "app", 514)).await.unwrap();

        let mut record = reconciler.import("c1,app").unwrap();
        assert_eq!(reconciler.read(&mut record).await.unwrap(), ReadOutcome::Present);
        assert_eq!(record.local_id.as_ref().unwrap().as_str(), "c1/logsink/app");
        assert!(record.remote_id.is_some());

        let err = reconciler.import("c1/app").unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidImportFormat { .. }));
    }

    #[tokio::test]
    async fn test_create_in_unknown_cluster_fails() {
        let reconciler = reconciler(SandboxDatabases::new());
        let err = reconciler.create(rsyslog_spec("missing", "app", 514)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::CreateFailed { .. }));
        assert!(err.to_string().contains("Error creating Database Logsink"));
    }
}
