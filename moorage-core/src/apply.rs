//! Apply - Execute a Plan concurrently
//!
//! Every effect runs in its own task. Effects under different parents run in
//! parallel; effects under the same parent are serialized by the reconciler's
//! lock table. Outcomes are reported in plan order.

use std::sync::Arc;

use crate::effect::Effect;
use crate::error::ReconcileError;
use crate::plan::Plan;
use crate::provider::{Deletion, RemoteApi};
use crate::reconciler::Reconciler;
use crate::resource::{LocalId, ResourceRecord};

/// What a successful effect left behind
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// The resource exists; persist this record
    Record(ResourceRecord),
    /// The resource is gone; drop the record with this id
    Removed {
        local_id: Option<LocalId>,
        deletion: Deletion,
    },
}

#[derive(Debug)]
pub struct EffectOutcome {
    pub effect: Effect,
    pub result: Result<Applied, ReconcileError>,
}

impl EffectOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run a single effect to completion
pub async fn apply_effect<A: RemoteApi>(
    reconciler: &Reconciler<A>,
    effect: Effect,
) -> Result<Applied, ReconcileError> {
    match effect {
        Effect::Create(spec) => reconciler.create(spec).await.map(Applied::Record),
        Effect::Update { mut record, to, .. } => {
            reconciler.update(&mut record, to).await?;
            Ok(Applied::Record(record))
        }
        Effect::Delete(mut record) => {
            let local_id = record.local_id.clone();
            let deletion = reconciler.delete(&mut record).await?;
            Ok(Applied::Removed { local_id, deletion })
        }
    }
}

/// Run all effects of `plan` concurrently and collect their outcomes
pub async fn apply_plan<A>(reconciler: Arc<Reconciler<A>>, plan: Plan) -> Vec<EffectOutcome>
where
    A: RemoteApi + 'static,
{
    let handles: Vec<_> = plan
        .into_effects()
        .into_iter()
        .map(|effect| {
            let reconciler = Arc::clone(&reconciler);
            let task_effect = effect.clone();
            let handle = tokio::spawn(async move { apply_effect(&reconciler, task_effect).await });
            (effect, handle)
        })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for (effect, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(ReconcileError::Aborted {
                resource: reconciler.kind().resource_id(effect.name()),
                reason: e.to_string(),
            }),
        };
        outcomes.push(EffectOutcome { effect, result });
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::differ::{create_plan, destroy_plan};
    use crate::lock_table::KeyedLockTable;
    use crate::resource::{Lifecycle, ResourceSpec, Value};
    use crate::test_support::{KIND, StubApi};

    fn reconciler(api: StubApi) -> Arc<Reconciler<StubApi>> {
        Arc::new(Reconciler::new(api, Arc::new(KeyedLockTable::new())))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn apply_plan_serializes_per_parent() {
        let r = reconciler(StubApi::new().with_latency(Duration::from_millis(2)));

        let desired: Vec<ResourceSpec> = (0..6)
            .flat_map(|i| {
                ["cluster-a", "cluster-b"].map(|parent| {
                    ResourceSpec::new(parent, format!("sink-{}", i))
                        .with_attribute("type", Value::String("rsyslog".to_string()))
                })
            })
            .collect();
        let plan = create_plan(&KIND, &desired, &[]);
        assert_eq!(plan.summary().create, 12);

        let outcomes = apply_plan(Arc::clone(&r), plan).await;

        assert_eq!(outcomes.len(), 12);
        assert!(outcomes.iter().all(EffectOutcome::is_success));
        assert_eq!(outcomes[0].effect.name(), "sink-0");
        assert_eq!(r.api().max_concurrent_mutations("cluster-a"), 1);
        assert_eq!(r.api().max_concurrent_mutations("cluster-b"), 1);
        assert!(r.locks().is_empty());
    }

    #[tokio::test]
    async fn apply_then_destroy() {
        let r = reconciler(StubApi::new());
        let plan = create_plan(&KIND, &[ResourceSpec::new("c1", "s")], &[]);

        let records: Vec<ResourceRecord> = apply_plan(Arc::clone(&r), plan)
            .await
            .into_iter()
            .filter_map(|o| match o.result {
                Ok(Applied::Record(record)) => Some(record),
                _ => None,
            })
            .collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].lifecycle, Lifecycle::Created);

        let outcomes = apply_plan(Arc::clone(&r), destroy_plan(&records)).await;
        match &outcomes[0].result {
            Ok(Applied::Removed { local_id, deletion }) => {
                assert_eq!(local_id.as_ref().unwrap().as_str(), "c1/logsink/s");
                assert_eq!(*deletion, Deletion::Deleted);
            }
            other => panic!("Expected Removed, got {:?}", other),
        }
        assert_eq!(r.api().object_count(), 0);
    }

    #[tokio::test]
    async fn failed_effect_is_reported() {
        let api = StubApi::new();
        api.fail_next("create");
        let r = reconciler(api);
        let plan = create_plan(&KIND, &[ResourceSpec::new("c1", "s")], &[]);

        let outcomes = apply_plan(r, plan).await;
        assert!(matches!(
            outcomes[0].result,
            Err(ReconcileError::CreateFailed { .. })
        ));
    }
}
