//! In-memory remote API used by unit tests
//!
//! Records call counts and tracks how many mutating calls are in flight per
//! parent, so tests can detect overlapping critical sections.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::provider::{BoxFuture, Deletion, ProviderError, ProviderResult, RemoteApi, UpdateResponse};
use crate::resource::{RemoteObject, ResourceKind, ResourceSpec};

pub const KIND: ResourceKind = ResourceKind {
    name: "digitalocean_database_log_sink",
    parent_kind: "digitalocean_database_cluster",
    parent_attribute: "cluster_id",
    subkind: "logsink",
    lock_scope: "log_sinks",
};

#[derive(Default)]
struct Inner {
    objects: HashMap<String, Vec<RemoteObject>>,
    calls: HashMap<&'static str, usize>,
    fail_next: HashSet<&'static str>,
    in_flight: HashMap<String, usize>,
    max_in_flight: HashMap<String, usize>,
}

pub struct StubApi {
    inner: Mutex<Inner>,
    next_id: AtomicUsize,
    total_in_flight: AtomicUsize,
    max_total_in_flight: AtomicUsize,
    latency: Duration,
    update_returns_object: bool,
}

impl StubApi {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_id: AtomicUsize::new(1),
            total_in_flight: AtomicUsize::new(0),
            max_total_in_flight: AtomicUsize::new(0),
            latency: Duration::ZERO,
            update_returns_object: true,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_update_returning_object(mut self, returns_object: bool) -> Self {
        self.update_returns_object = returns_object;
        self
    }

    /// Make the next call of `op` fail
    pub fn fail_next(&self, op: &'static str) {
        self.inner.lock().unwrap().fail_next.insert(op);
    }

    pub fn calls(&self, op: &str) -> usize {
        self.inner.lock().unwrap().calls.get(op).copied().unwrap_or(0)
    }

    pub fn object_count(&self) -> usize {
        self.inner.lock().unwrap().objects.values().map(Vec::len).sum()
    }

    /// Delete an object behind the reconciler's back
    pub fn remove_out_of_band(&self, parent_id: &str, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(children) = inner.objects.get_mut(parent_id) {
            children.retain(|o| o.name != name);
        }
    }

    pub fn max_concurrent_mutations(&self, parent_id: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.max_in_flight.get(parent_id).copied().unwrap_or(0)
    }

    pub fn max_concurrent_total(&self) -> usize {
        self.max_total_in_flight.load(Ordering::SeqCst)
    }

    fn record_call(&self, op: &'static str) -> ProviderResult<()> {
        let mut inner = self.inner.lock().unwrap();
        *inner.calls.entry(op).or_insert(0) += 1;
        if inner.fail_next.remove(op) {
            return Err(ProviderError::new(format!("injected {} failure", op)));
        }
        Ok(())
    }

    fn enter(&self, parent_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        let now = {
            let n = inner.in_flight.entry(parent_id.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        let max = inner.max_in_flight.entry(parent_id.to_string()).or_insert(0);
        *max = (*max).max(now);
        drop(inner);

        let total = self.total_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_total_in_flight.fetch_max(total, Ordering::SeqCst);
    }

    fn exit(&self, parent_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(n) = inner.in_flight.get_mut(parent_id) {
            *n -= 1;
        }
        self.total_in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    async fn mutate<T>(&self, parent_id: &str, op: impl FnOnce(&mut Inner) -> T) -> T {
        self.enter(parent_id);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let result = op(&mut *self.inner.lock().unwrap());
        self.exit(parent_id);
        result
    }

    fn find<'a>(inner: &'a mut Inner, parent_id: &str, id: &str) -> Option<&'a mut RemoteObject> {
        inner
            .objects
            .get_mut(parent_id)?
            .iter_mut()
            .find(|o| o.id == id || o.name == id)
    }
}

impl RemoteApi for StubApi {
    fn kind(&self) -> ResourceKind {
        KIND
    }

    fn create(&self, parent_id: &str, spec: &ResourceSpec) -> BoxFuture<'_, ProviderResult<RemoteObject>> {
        let parent_id = parent_id.to_string();
        let spec = spec.clone();
        Box::pin(async move {
            self.record_call("create")?;
            let id = format!("id-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            let object = RemoteObject::new(id, spec.name, spec.attributes);
            self.mutate(&parent_id, |inner| {
                inner
                    .objects
                    .entry(parent_id.clone())
                    .or_default()
                    .push(object.clone());
            })
            .await;
            Ok(object)
        })
    }

    fn get(&self, parent_id: &str, id: &str) -> BoxFuture<'_, ProviderResult<Option<RemoteObject>>> {
        let parent_id = parent_id.to_string();
        let id = id.to_string();
        Box::pin(async move {
            self.record_call("get")?;
            let mut inner = self.inner.lock().unwrap();
            Ok(Self::find(&mut inner, &parent_id, &id).map(|o| o.clone()))
        })
    }

    fn update(
        &self,
        parent_id: &str,
        id: &str,
        spec: &ResourceSpec,
    ) -> BoxFuture<'_, ProviderResult<UpdateResponse>> {
        let parent_id = parent_id.to_string();
        let id = id.to_string();
        let spec = spec.clone();
        Box::pin(async move {
            self.record_call("update")?;
            let updated = self
                .mutate(&parent_id, |inner| {
                    Self::find(inner, &parent_id, &id).map(|o| {
                        o.attributes = spec.attributes.clone();
                        o.clone()
                    })
                })
                .await
                .ok_or_else(|| ProviderError::new("404 not found"))?;

            if self.update_returns_object {
                Ok(UpdateResponse::Object(updated))
            } else {
                Ok(UpdateResponse::Accepted)
            }
        })
    }

    fn delete(&self, parent_id: &str, id: &str) -> BoxFuture<'_, ProviderResult<Deletion>> {
        let parent_id = parent_id.to_string();
        let id = id.to_string();
        Box::pin(async move {
            self.record_call("delete")?;
            let removed = self
                .mutate(&parent_id, |inner| {
                    let children = inner.objects.entry(parent_id.clone()).or_default();
                    let before = children.len();
                    children.retain(|o| o.id != id && o.name != id);
                    before != children.len()
                })
                .await;
            Ok(if removed {
                Deletion::Deleted
            } else {
                Deletion::NotFound
            })
        })
    }
}
