//! Database log sink models and attribute mapping
//!
//! Wire types follow the DigitalOcean database log sink API. The
//! `expand_*`/`flatten_*` helpers convert between these types and the
//! attribute maps used by declarations and records.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use moorage_core::provider::ProviderError;
use moorage_core::resource::{Attributes, RemoteObject, ResourceKind, ResourceSpec, Value};
use serde::{Deserialize, Serialize};

/// Log sinks live under a database cluster; mutations are serialized per cluster
pub const LOGSINK_KIND: ResourceKind = ResourceKind {
    name: "digitalocean_database_log_sink",
    parent_kind: "digitalocean_database_cluster",
    parent_attribute: "cluster_id",
    subkind: "logsink",
    lock_scope: "log_sinks",
};

/// Destination type of a log sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogsinkType {
    Rsyslog,
    Elasticsearch,
    Opensearch,
}

impl LogsinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogsinkType::Rsyslog => "rsyslog",
            LogsinkType::Elasticsearch => "elasticsearch",
            LogsinkType::Opensearch => "opensearch",
        }
    }
}

impl fmt::Display for LogsinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogsinkType {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rsyslog" => Ok(LogsinkType::Rsyslog),
            "elasticsearch" => Ok(LogsinkType::Elasticsearch),
            "opensearch" => Ok(LogsinkType::Opensearch),
            other => Err(ProviderError::new(format!(
                "Invalid log sink type '{}', expected one of: rsyslog, elasticsearch, opensearch",
                other
            ))),
        }
    }
}

fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

fn is_false(v: &bool) -> bool {
    !v
}

/// Sink configuration; zero-valued fields are omitted on the wire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsinkConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub index_prefix: String,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub index_days_max: i64,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub timeout: f64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub server: String,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub port: i64,
    #[serde(skip_serializing_if = "is_false")]
    pub tls: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub logline: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sd: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ca: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cert: String,
}

/// A log sink as returned by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseLogsink {
    #[serde(rename = "sink_id")]
    pub id: String,
    #[serde(rename = "sink_name")]
    pub name: String,
    #[serde(rename = "sink_type")]
    pub sink_type: LogsinkType,
    #[serde(default)]
    pub config: LogsinkConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseCreateLogsinkRequest {
    #[serde(rename = "sink_name")]
    pub name: String,
    #[serde(rename = "sink_type")]
    pub sink_type: LogsinkType,
    pub config: LogsinkConfig,
}

/// Full replacement of a sink's mutable settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseUpdateLogsinkRequest {
    #[serde(rename = "sink_type")]
    pub sink_type: LogsinkType,
    pub config: LogsinkConfig,
}

/// Convert the `config` attribute map into a typed configuration
pub fn expand_logsink_config(value: Option<&Value>) -> Result<LogsinkConfig, ProviderError> {
    let Some(value) = value else {
        return Ok(LogsinkConfig::default());
    };
    let json = serde_json::to_value(value)
        .map_err(|e| ProviderError::new(format!("Invalid log sink config: {}", e)))?;
    serde_json::from_value(json)
        .map_err(|e| ProviderError::new(format!("Invalid log sink config: {}", e)).with_cause(e))
}

/// Convert a typed configuration into the `config` attribute map
///
/// Zero-valued fields are left out, matching what the service reports.
pub fn flatten_logsink_config(config: &LogsinkConfig) -> Value {
    serde_json::to_value(config)
        .ok()
        .and_then(|json| serde_json::from_value(json).ok())
        .unwrap_or_else(|| Value::Map(HashMap::new()))
}

fn expand_logsink_type(attributes: &Attributes) -> Result<LogsinkType, ProviderError> {
    match attributes.get("type") {
        Some(Value::String(s)) => s.parse(),
        Some(other) => Err(ProviderError::new(format!(
            "Invalid log sink type {:?}, expected a string",
            other
        ))),
        None => Err(ProviderError::new("Missing required attribute: type")),
    }
}

/// Build a create request from a declaration
pub fn expand_create_request(spec: &ResourceSpec) -> Result<DatabaseCreateLogsinkRequest, ProviderError> {
    Ok(DatabaseCreateLogsinkRequest {
        name: spec.name.clone(),
        sink_type: expand_logsink_type(&spec.attributes)?,
        config: expand_logsink_config(spec.attributes.get("config"))?,
    })
}

/// Build an update request carrying every mutable field of a declaration
pub fn expand_update_request(spec: &ResourceSpec) -> Result<DatabaseUpdateLogsinkRequest, ProviderError> {
    Ok(DatabaseUpdateLogsinkRequest {
        sink_type: expand_logsink_type(&spec.attributes)?,
        config: expand_logsink_config(spec.attributes.get("config"))?,
    })
}

/// Map a service log sink onto the generic remote object
pub fn flatten_logsink(logsink: &DatabaseLogsink) -> RemoteObject {
    let mut attributes = HashMap::new();
    attributes.insert("id".to_string(), Value::String(logsink.id.clone()));
    attributes.insert("name".to_string(), Value::String(logsink.name.clone()));
    attributes.insert(
        "type".to_string(),
        Value::String(logsink.sink_type.as_str().to_string()),
    );
    attributes.insert("config".to_string(), flatten_logsink_config(&logsink.config));
    RemoteObject::new(logsink.id.clone(), logsink.name.clone(), attributes)
}
