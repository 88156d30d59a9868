//! Reconciler configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default time to wait for a parent's lock (20 minutes)
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 1200;

/// Settings shared by every reconciler operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// How long a mutation may wait for its parent's lock; `None` waits forever
    #[serde(rename = "lock_timeout_secs", with = "optional_secs")]
    pub lock_timeout: Option<Duration>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Some(Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS)),
        }
    }
}

impl ReconcilerConfig {
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}

/// (De)serialize `Option<Duration>` as fractional seconds
mod optional_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}
