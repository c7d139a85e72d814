//! # Owned Resource Engine
//!
//! Drives one child kind toward the desired object generated for a parent.
//!
//! For each (parent, child purpose) the engine lists the children selected by the
//! parent's owner labels and then:
//!
//! - **none exist**: creates the desired object
//! - **one exists**: merges owned metadata, converges the payload when the
//!   fingerprint changed (or enforcement is on), and replaces the object when
//!   anything differs
//! - **several exist**: keeps the most ready (then oldest) one, deletes the rest,
//!   and asks for a requeue so the next pass starts from a single object
//!
//! Conflicts from optimistic concurrency are surfaced as requeue errors; the next
//! pass re-reads and tries again.

mod kind;
mod memory;
mod owner;
mod store;

pub use kind::ChildKind;
pub use memory::MemoryStore;
pub use owner::{owner_from_labels, IncompleteOwner, OwnerIdentity};
pub use store::{label_selector, ChildStore, KubeStore, StoreError};

use crate::constants::FINGERPRINT_ANNOTATION;
use crate::fingerprint::Fingerprint;
use crate::observability::metrics;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Outcome of converging one child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpResult {
    Created,
    Updated,
    Deleted,
    Noop,
}

impl OpResult {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Noop => "noop",
        }
    }

    /// Whether the pass wrote anything
    pub fn changed(self) -> bool {
        self != Self::Noop
    }
}

impl fmt::Display for OpResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from converging owned children
#[derive(Debug, thiserror::Error)]
pub enum OwnedError {
    /// Duplicates were deleted; the caller should requeue
    #[error("found {count} {kind} objects for one owner, reduced to one")]
    Reduced { kind: &'static str, count: usize },

    /// The child was deleted because it cannot be updated in place
    #[error("{kind} {name} deleted for recreation: {reason}")]
    StaleBinding {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OwnedError {
    /// Errors that a short requeue resolves
    pub fn is_requeue(&self) -> bool {
        match self {
            Self::Reduced { .. } | Self::StaleBinding { .. } => true,
            Self::Store(e) => e.is_conflict(),
        }
    }
}

/// A generated child plus what the engine needs to find and fingerprint it
#[derive(Debug, Clone)]
pub struct Desired<K> {
    pub object: K,
    pub fingerprint: Fingerprint,
    /// Labels selecting exactly the children of this purpose
    pub selector: BTreeMap<String, String>,
}

impl<K: ChildKind> Desired<K> {
    pub fn new(object: K, fingerprint: Fingerprint, selector: BTreeMap<String, String>) -> Self {
        Self {
            object,
            fingerprint,
            selector,
        }
    }

    fn namespace(&self) -> Option<String> {
        self.object.meta().namespace.clone()
    }
}

/// Converge one child toward `desired`.
///
/// Returns the result and the object as stored after the pass.
pub async fn ensure_owned<K, S>(
    store: &S,
    desired: Desired<K>,
    enforce: bool,
) -> Result<(OpResult, K), OwnedError>
where
    K: ChildKind,
    S: ChildStore<K> + ?Sized,
{
    let namespace = desired.namespace();
    let mut existing = store.list(namespace.as_deref(), &desired.selector).await?;

    if existing.len() > 1 {
        let count = existing.len();
        reduce(store, existing).await?;
        return Err(OwnedError::Reduced {
            kind: K::NAME,
            count,
        });
    }

    let outcome = match existing.pop() {
        Some(current) => converge_one(store, current, &desired, enforce).await?,
        None => {
            let mut object = desired.object;
            desired.fingerprint.annotate(&mut object);
            let created = store.create(&object).await?;
            info!(kind = K::NAME, name = %created.name_any(), "Created owned resource");
            (OpResult::Created, created)
        }
    };

    metrics::increment_owned_operations(K::NAME, outcome.0.as_str());
    Ok(outcome)
}

async fn converge_one<K, S>(
    store: &S,
    existing: K,
    desired: &Desired<K>,
    enforce: bool,
) -> Result<(OpResult, K), OwnedError>
where
    K: ChildKind,
    S: ChildStore<K> + ?Sized,
{
    if let Some(reason) = K::must_recreate(&existing, &desired.object) {
        warn!(
            kind = K::NAME,
            name = %existing.name_any(),
            %reason,
            "Deleting owned resource for recreation"
        );
        store.delete(&existing).await?;
        return Err(OwnedError::StaleBinding {
            kind: K::NAME,
            name: existing.name_any(),
            reason,
        });
    }

    let mut current = existing.clone();
    let mut changed = merge_metadata(current.meta_mut(), desired.object.meta());
    changed |= K::converge_always(&mut current, &desired.object);

    if enforce || !desired.fingerprint.matches(&current) {
        changed |= K::converge_payload(&mut current, &desired.object);
        if !desired.fingerprint.matches(&current) {
            desired.fingerprint.annotate(&mut current);
            changed = true;
        }
    }

    if !changed {
        debug!(kind = K::NAME, name = %current.name_any(), "Owned resource up to date");
        return Ok((OpResult::Noop, existing));
    }

    let updated = store.replace(&current).await?;
    info!(kind = K::NAME, name = %updated.name_any(), "Updated owned resource");
    Ok((OpResult::Updated, updated))
}

/// Merge the desired labels, annotations and owner references into `existing`.
///
/// Keys the operator does not set are preserved. The fingerprint annotation is
/// left to the caller.
pub fn merge_metadata(existing: &mut ObjectMeta, desired: &ObjectMeta) -> bool {
    let mut changed = merge_map(&mut existing.labels, desired.labels.as_ref(), None);
    changed |= merge_map(
        &mut existing.annotations,
        desired.annotations.as_ref(),
        Some(FINGERPRINT_ANNOTATION),
    );
    if let Some(wanted) = desired.owner_references.as_ref() {
        let refs = existing.owner_references.get_or_insert_with(Vec::new);
        for owner in wanted {
            if !refs.iter().any(|r| r.uid == owner.uid) {
                refs.push(owner.clone());
                changed = true;
            }
        }
    }
    changed
}

fn merge_map(
    existing: &mut Option<BTreeMap<String, String>>,
    desired: Option<&BTreeMap<String, String>>,
    skip: Option<&str>,
) -> bool {
    let Some(desired) = desired else {
        return false;
    };
    let mut changed = false;
    let existing = existing.get_or_insert_with(BTreeMap::new);
    for (key, value) in desired {
        if Some(key.as_str()) == skip {
            continue;
        }
        if existing.get(key) != Some(value) {
            existing.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

/// Keep the best duplicate and delete the rest. Returns the survivor.
///
/// Ranking: highest readiness first, then oldest creation timestamp, then name.
pub async fn reduce<K, S>(store: &S, mut duplicates: Vec<K>) -> Result<Option<K>, OwnedError>
where
    K: ChildKind,
    S: ChildStore<K> + ?Sized,
{
    duplicates.sort_by_key(|obj| (Reverse(obj.readiness()), created_at(obj), obj.name_any()));
    let mut duplicates = duplicates.into_iter();
    let survivor = duplicates.next();
    for extra in duplicates {
        warn!(kind = K::NAME, name = %extra.name_any(), "Deleting duplicate owned resource");
        store.delete(&extra).await?;
        metrics::increment_duplicates_reduced(K::NAME);
    }
    Ok(survivor)
}

/// Sortable creation timestamp; objects without one sort last
fn created_at<K: Resource>(obj: &K) -> String {
    obj.meta()
        .creation_timestamp
        .as_ref()
        .and_then(|t| serde_json::to_value(t).ok())
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "~".to_string())
}

/// Delete every child matching `selector`
pub async fn delete_owned<K, S>(
    store: &S,
    namespace: Option<&str>,
    selector: &BTreeMap<String, String>,
) -> Result<OpResult, OwnedError>
where
    K: ChildKind,
    S: ChildStore<K> + ?Sized,
{
    prune_owned(store, namespace, selector, |_: &K| false).await
}

/// Delete children matching `selector` for which `keep` returns false
pub async fn prune_owned<K, S, F>(
    store: &S,
    namespace: Option<&str>,
    selector: &BTreeMap<String, String>,
    keep: F,
) -> Result<OpResult, OwnedError>
where
    K: ChildKind,
    S: ChildStore<K> + ?Sized,
    F: Fn(&K) -> bool + Send,
{
    let mut result = OpResult::Noop;
    for obj in store.list(namespace, selector).await? {
        if keep(&obj) {
            continue;
        }
        info!(
            kind = K::NAME,
            name = %obj.name_any(),
            namespace = ?obj.namespace(),
            "Deleting owned resource"
        );
        store.delete(&obj).await?;
        metrics::increment_owned_operations(K::NAME, OpResult::Deleted.as_str());
        result = OpResult::Deleted;
    }
    Ok(result)
}
