//! Manifest file (`moorage.json`): settings plus declared log sinks

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use moorage_core::ReconcilerConfig;
use moorage_core::resource::{ResourceSpec, Value};
use moorage_provider_digitalocean::{LOGSINK_KIND, LogsinkType, SandboxDatabases};
use moorage_state::LocalBackend;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("log_sinks[{index}]: {message}")]
    InvalidLogSink { index: usize, message: String },

    #[error("Log sink '{name}' is declared twice in cluster {cluster_id}")]
    Duplicate { cluster_id: String, name: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(flatten)]
    pub reconciler: ReconcilerConfig,
    pub state_path: String,
    pub sandbox_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            reconciler: ReconcilerConfig::default(),
            state_path: LocalBackend::DEFAULT_STATE_FILE.to_string(),
            sandbox_path: SandboxDatabases::DEFAULT_SANDBOX_FILE.to_string(),
        }
    }
}

/// One declared `digitalocean_database_log_sink`
#[derive(Debug, Clone, Deserialize)]
pub struct LogSinkDecl {
    pub name: String,
    pub cluster_id: String,
    #[serde(rename = "type")]
    pub sink_type: String,
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

impl LogSinkDecl {
    pub fn to_spec(&self) -> ResourceSpec {
        ResourceSpec::new(&self.cluster_id, &self.name)
            .with_attribute("type", Value::String(self.sink_type.clone()))
            .with_attribute("config", Value::Map(self.config.clone()))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub settings: Settings,
    pub log_sinks: Vec<LogSinkDecl>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest: Manifest = serde_json::from_str(&content).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        let mut seen = HashSet::new();
        for (index, sink) in self.log_sinks.iter().enumerate() {
            let invalid = |message: String| ManifestError::InvalidLogSink { index, message };

            if sink.name.is_empty() {
                return Err(invalid("name must not be empty".to_string()));
            }
            if sink.cluster_id.is_empty() {
                return Err(invalid(format!("{} must not be empty", LOGSINK_KIND.parent_attribute)));
            }
            sink.sink_type
                .parse::<LogsinkType>()
                .map_err(|e| invalid(e.message))?;

            if !seen.insert((sink.cluster_id.as_str(), sink.name.as_str())) {
                return Err(ManifestError::Duplicate {
                    cluster_id: sink.cluster_id.clone(),
                    name: sink.name.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn specs(&self) -> Vec<ResourceSpec> {
        self.log_sinks.iter().map(LogSinkDecl::to_spec).collect()
    }

    /// Every cluster referenced by a declaration, sorted
    pub fn cluster_ids(&self) -> BTreeSet<&str> {
        self.log_sinks.iter().map(|s| s.cluster_id.as_str()).collect()
    }
}
