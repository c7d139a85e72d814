//! In-process [`ChildStore`] with API-server-like semantics: `generateName`
//! resolution, resourceVersion conflicts, UIDs and creation timestamps.
//! Used by tests and offline rendering.

use super::kind::ChildKind;
use super::store::{ChildStore, StoreError};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct Inner<K> {
    objects: Vec<K>,
    counter: u64,
    conflict_next_replace: bool,
}

/// In-memory child store
#[derive(Debug)]
pub struct MemoryStore<K> {
    inner: Mutex<Inner<K>>,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                objects: Vec::new(),
                counter: 0,
                conflict_next_replace: false,
            }),
        }
    }
}

fn same_object<K: Resource>(a: &K, namespace: Option<&str>, name: &str) -> bool {
    a.meta().namespace.as_deref() == namespace && a.meta().name.as_deref() == Some(name)
}

fn matches_labels<K: Resource>(obj: &K, selector: &BTreeMap<String, String>) -> bool {
    let labels = obj.meta().labels.as_ref();
    selector
        .iter()
        .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}

impl<K: ChildKind> MemoryStore<K> {
    fn lock(&self) -> MutexGuard<'_, Inner<K>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an object as the API server would on create, bypassing conflict checks
    pub fn insert(&self, obj: K) -> K {
        let mut inner = self.lock();
        let stored = admit(&mut inner, obj);
        inner.objects.push(stored.clone());
        stored
    }

    /// Snapshot of all stored objects in creation order
    pub fn objects(&self) -> Vec<K> {
        self.lock().objects.clone()
    }

    /// Mutate every stored object out of band, bumping resourceVersions
    pub fn mutate_all(&self, mut f: impl FnMut(&mut K)) {
        let mut inner = self.lock();
        inner.counter += 1;
        let version = inner.counter.to_string();
        for obj in &mut inner.objects {
            f(obj);
            obj.meta_mut().resource_version = Some(version.clone());
        }
    }

    /// Make the next replace fail as if the object changed concurrently
    pub fn fail_next_replace_with_conflict(&self) {
        self.lock().conflict_next_replace = true;
    }
}

/// Fill in server-populated metadata
fn admit<K: Resource>(inner: &mut Inner<K>, mut obj: K) -> K {
    inner.counter += 1;
    let counter = inner.counter;
    let meta = obj.meta_mut();
    if meta.name.is_none() {
        let base = meta.generate_name.clone().unwrap_or_default();
        meta.name = Some(format!("{base}{counter:05}"));
    }
    meta.uid = Some(format!("uid-{counter}"));
    meta.resource_version = Some(counter.to_string());
    meta.creation_timestamp = i64::try_from(counter)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(1_700_000_000 + secs, 0))
        .and_then(|created| {
            let rfc3339 = created.format("%Y-%m-%dT%H:%M:%SZ").to_string();
            serde_json::from_value::<Time>(serde_json::Value::String(rfc3339)).ok()
        });
    obj
}

#[async_trait]
impl<K: ChildKind> ChildStore<K> for MemoryStore<K> {
    async fn list(
        &self,
        namespace: Option<&str>,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<K>, StoreError> {
        Ok(self
            .lock()
            .objects
            .iter()
            .filter(|o| namespace.is_none() || o.meta().namespace.as_deref() == namespace)
            .filter(|o| matches_labels(*o, selector))
            .cloned()
            .collect())
    }

    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>, StoreError> {
        Ok(self
            .lock()
            .objects
            .iter()
            .find(|o| same_object(*o, namespace, name))
            .cloned())
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let mut inner = self.lock();
        if let Some(name) = obj.meta().name.as_deref() {
            let namespace = obj.meta().namespace.as_deref();
            if inner.objects.iter().any(|o| same_object(o, namespace, name)) {
                return Err(StoreError::AlreadyExists(name.to_string()));
            }
        }
        let mut obj = obj.clone();
        obj.meta_mut().uid = None;
        let stored = admit(&mut inner, obj);
        inner.objects.push(stored.clone());
        Ok(stored)
    }

    async fn replace(&self, obj: &K) -> Result<K, StoreError> {
        let mut inner = self.lock();
        let name = obj.meta().name.clone().ok_or(StoreError::Unnamed)?;
        let namespace = obj.namespace();
        if std::mem::take(&mut inner.conflict_next_replace) {
            return Err(StoreError::Conflict(name));
        }
        inner.counter += 1;
        let version = inner.counter.to_string();
        let slot = inner
            .objects
            .iter_mut()
            .find(|o| same_object(&**o, namespace.as_deref(), &name))
            .ok_or_else(|| StoreError::NotFound(name.clone()))?;
        if slot.meta().resource_version != obj.meta().resource_version {
            return Err(StoreError::Conflict(name));
        }
        let mut updated = obj.clone();
        updated.meta_mut().resource_version = Some(version);
        *slot = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, obj: &K) -> Result<(), StoreError> {
        let name = obj.meta().name.clone().ok_or(StoreError::Unnamed)?;
        let namespace = obj.namespace();
        self.lock()
            .objects
            .retain(|o| !same_object(o, namespace.as_deref(), &name));
        Ok(())
    }
}
