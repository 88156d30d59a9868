//! Effect - A single remote mutation, described as a value
//!
//! Nothing happens until an Effect is handed to [`apply`](crate::apply).

use std::fmt;

use crate::resource::{ResourceRecord, ResourceSpec};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Create a resource that has no record yet
    Create(ResourceSpec),
    /// Resend the full configuration of an existing resource
    Update {
        record: ResourceRecord,
        to: ResourceSpec,
        changed_attributes: Vec<String>,
    },
    /// Delete a recorded resource that is no longer declared
    Delete(ResourceRecord),
}

impl Effect {
    pub fn parent_id(&self) -> &str {
        match self {
            Effect::Create(spec) => &spec.parent_id,
            Effect::Update { record, .. } | Effect::Delete(record) => &record.parent_id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Effect::Create(spec) => &spec.name,
            Effect::Update { record, .. } | Effect::Delete(record) => &record.name,
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Create(spec) => write!(f, "create {}/{}", spec.parent_id, spec.name),
            Effect::Update {
                record,
                changed_attributes,
                ..
            } => write!(
                f,
                "update {}/{} ({})",
                record.parent_id,
                record.name,
                changed_attributes.join(", ")
            ),
            Effect::Delete(record) => write!(f, "delete {}/{}", record.parent_id, record.name),
        }
    }
}
