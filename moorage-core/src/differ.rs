//! Differ - Compare declared resources with recorded state to generate a Plan
//!
//! Declarations and records are matched by local identifier. Because the
//! identifier is derived from the force-new attributes (parent and name),
//! changing either one shows up as a delete of the old record plus a create
//! of the new declaration.

use std::collections::{HashMap, HashSet};

use crate::effect::Effect;
use crate::plan::Plan;
use crate::resource::{Attributes, LocalId, ResourceKind, ResourceRecord, ResourceSpec, Value};

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// No record exists -> needs creation
    Create(ResourceSpec),
    /// Record exists with differences -> needs update
    Update {
        record: ResourceRecord,
        to: ResourceSpec,
        changed_attributes: Vec<String>,
    },
    /// Record matches the declaration -> no action needed
    NoChange(LocalId),
}

/// Compare one declaration with its record, if any
pub fn diff(kind: &ResourceKind, desired: &ResourceSpec, current: Option<&ResourceRecord>) -> Diff {
    let record = match current {
        Some(record) if !record.is_deleted() => record,
        _ => return Diff::Create(desired.clone()),
    };

    let changed = find_changed_attributes(&desired.attributes, record.current_attributes());
    if changed.is_empty() {
        Diff::NoChange(kind.local_id(&desired.parent_id, &desired.name))
    } else {
        Diff::Update {
            record: record.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    }
}

/// Find declared attributes whose current value differs
fn find_changed_attributes(desired: &Attributes, current: &Attributes) -> Vec<String> {
    let mut changed: Vec<String> = desired
        .iter()
        .filter(|(key, value)| !value_matches(value, current.get(key.as_str())))
        .map(|(key, _)| key.clone())
        .collect();
    changed.sort();
    changed
}

/// Whether the current value satisfies the declared one
///
/// A missing current value matches a declared zero value, since services
/// omit those from responses. Likewise a map entry that is not declared must
/// be absent or zero.
fn value_matches(desired: &Value, current: Option<&Value>) -> bool {
    match (desired, current) {
        (Value::Map(want), Some(Value::Map(have))) => {
            want.iter().all(|(key, value)| value_matches(value, have.get(key)))
                && have
                    .iter()
                    .all(|(key, value)| want.contains_key(key) || value.is_zero())
        }
        (Value::Int(want), Some(Value::Float(have))) => (*want as f64) == *have,
        (Value::Float(want), Some(Value::Int(have))) => *want == (*have as f64),
        (want, Some(have)) => want == have,
        (want, None) => want.is_zero(),
    }
}

/// Compute Diffs for all declarations and generate a Plan
///
/// Records without a matching declaration are scheduled for deletion.
pub fn create_plan(kind: &ResourceKind, desired: &[ResourceSpec], records: &[ResourceRecord]) -> Plan {
    let by_id: HashMap<&LocalId, &ResourceRecord> = records
        .iter()
        .filter_map(|r| r.local_id.as_ref().map(|id| (id, r)))
        .collect();

    let mut plan = Plan::new();
    let mut declared = HashSet::new();

    for spec in desired {
        let local_id = kind.local_id(&spec.parent_id, &spec.name);
        match diff(kind, spec, by_id.get(&local_id).copied()) {
            Diff::Create(spec) => plan.add(Effect::Create(spec)),
            Diff::Update {
                record,
                to,
                changed_attributes,
            } => plan.add(Effect::Update {
                record,
                to,
                changed_attributes,
            }),
            Diff::NoChange(_) => {}
        }
        declared.insert(local_id);
    }

    for record in records {
        if let Some(id) = &record.local_id
            && !declared.contains(id)
        {
            plan.add(Effect::Delete(record.clone()));
        }
    }

    plan
}

/// Plan that deletes every recorded resource
pub fn destroy_plan(records: &[ResourceRecord]) -> Plan {
    let mut plan = Plan::new();
    for record in records.iter().filter(|r| r.local_id.is_some()) {
        plan.add(Effect::Delete(record.clone()));
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Lifecycle, RemoteObject};
    use crate::test_support::KIND;

    fn synced(parent: &str, name: &str, attrs: Attributes) -> ResourceRecord {
        let mut record = ResourceRecord::pending(&KIND, parent, name);
        record.observe(RemoteObject::new("id", name, attrs), Lifecycle::Synced);
        record
    }

    fn config(entries: &[(&str, Value)]) -> Value {
        Value::Map(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn diff_create_when_no_record() {
        let desired = ResourceSpec::new("c1", "s");
        assert!(matches!(diff(&KIND, &desired, None), Diff::Create(_)));
    }

    #[test]
    fn diff_create_when_record_deleted() {
        let desired = ResourceSpec::new("c1", "s");
        let mut record = synced("c1", "s", Attributes::new());
        record.mark_deleted();
        assert!(matches!(diff(&KIND, &desired, Some(&record)), Diff::Create(_)));
    }

    #[test]
    fn diff_no_change_ignores_omitted_zero_values() {
        let desired = ResourceSpec::new("c1", "s").with_attribute(
            "config",
            config(&[
                ("server", Value::String("logs.example.com".to_string())),
                ("tls", Value::Bool(false)),
            ]),
        );
        let mut observed = Attributes::new();
        observed.insert(
            "config".to_string(),
            config(&[
                ("server", Value::String("logs.example.com".to_string())),
                ("port", Value::Int(0)),
            ]),
        );

        let result = diff(&KIND, &desired, Some(&synced("c1", "s", observed)));
        assert!(matches!(result, Diff::NoChange(_)));
    }

    #[test]
    fn diff_update_when_config_key_removed() {
        let desired = ResourceSpec::new("c1", "s").with_attribute(
            "config",
            config(&[("server", Value::String("logs.example.com".to_string()))]),
        );
        let mut observed = Attributes::new();
        observed.insert(
            "config".to_string(),
            config(&[
                ("server", Value::String("logs.example.com".to_string())),
                ("tls", Value::Bool(true)),
            ]),
        );

        match diff(&KIND, &desired, Some(&synced("c1", "s", observed))) {
            Diff::Update {
                changed_attributes, ..
            } => assert_eq!(changed_attributes, vec!["config".to_string()]),
            other => panic!("Expected Update, got {:?}", other),
        }
    }

    #[test]
    fn diff_update_when_different() {
        let desired = ResourceSpec::new("c1", "s")
            .with_attribute("config", config(&[("port", Value::Int(6514))]));
        let mut observed = Attributes::new();
        observed.insert("config".to_string(), config(&[("port", Value::Int(514))]));

        match diff(&KIND, &desired, Some(&synced("c1", "s", observed))) {
            Diff::Update {
                changed_attributes, ..
            } => assert_eq!(changed_attributes, vec!["config".to_string()]),
            other => panic!("Expected Update, got {:?}", other),
        }
    }

    #[test]
    fn create_plan_from_declarations() {
        let desired = vec![
            ResourceSpec::new("c1", "new-sink"),
            ResourceSpec::new("c1", "existing")
                .with_attribute("type", Value::String("opensearch".to_string())),
        ];

        let mut attrs = Attributes::new();
        attrs.insert("type".to_string(), Value::String("rsyslog".to_string()));
        let records = vec![synced("c1", "existing", attrs), synced("c2", "orphan", Attributes::new())];

        let plan = create_plan(&KIND, &desired, &records);

        assert_eq!(plan.effects().len(), 3);
        assert!(matches!(plan.effects()[0], Effect::Create(_)));
        assert!(matches!(plan.effects()[1], Effect::Update { .. }));
        assert!(matches!(plan.effects()[2], Effect::Delete(ref r) if r.name == "orphan"));
    }

    #[test]
    fn renamed_sink_is_delete_plus_create() {
        let desired = vec![ResourceSpec::new("c1", "renamed")];
        let records = vec![synced("c1", "original", Attributes::new())];

        let summary = create_plan(&KIND, &desired, &records).summary();
        assert_eq!(summary.create, 1);
        assert_eq!(summary.delete, 1);
        assert_eq!(summary.update, 0);
    }

    #[test]
    fn destroy_plan_deletes_everything_recorded() {
        let records = vec![synced("c1", "a", Attributes::new()), synced("c1", "b", Attributes::new())];
        let plan = destroy_plan(&records);
        assert_eq!(plan.summary().delete, 2);
    }
}
