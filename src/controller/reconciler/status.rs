//! Status writes for parents.

use super::ReconcilerError;
use crate::constants::{DEFAULT_RESYNC_SECS, FIELD_MANAGER, TRANSIENT_REQUEUE_SECS};
use crate::observability::metrics;
use kube::api::{Patch, PatchParams};
use kube::core::NamespaceResourceScope;
use kube::runtime::controller::Action;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt::Debug;
use std::time::Duration;
use tracing::debug;

/// Outcome of a pass that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Everything converged; come back on the periodic resync
    Done,
    /// A step wrote something the next step depends on
    Requeue,
}

impl Pass {
    pub fn action(self) -> Action {
        match self {
            Self::Done => Action::requeue(Duration::from_secs(DEFAULT_RESYNC_SECS)),
            Self::Requeue => Action::requeue(Duration::from_secs(TRANSIENT_REQUEUE_SECS)),
        }
    }
}

/// Merge-patch the status subresource.
///
/// The patch carries the resourceVersion the status was computed from, so a
/// concurrent writer makes it fail with a conflict instead of being
/// overwritten. A parent deleted meanwhile is not an error.
pub async fn patch_status<K, S>(
    client: &Client,
    obj: &K,
    status: &S,
) -> Result<(), ReconcilerError>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Debug,
    S: Serialize + Sync,
{
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();
    let api: Api<K> = Api::namespaced(client.clone(), &namespace);
    let patch = json!({
        "metadata": { "resourceVersion": obj.resource_version() },
        "status": status,
    });

    match api
        .patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => {
            debug!(kind = %K::kind(&()), %namespace, %name, "Status updated");
            Ok(())
        }
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 409 => Err(ReconcilerError::StatusConflict(
            format!("{}/{namespace}/{name}", K::kind(&())),
        )),
        Err(e) => Err(e.into()),
    }
}

/// What [`write_status`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusWrite {
    Unchanged,
    Written,
    /// Someone else updated the parent first; retry the pass
    Conflict,
}

/// Patch the status only when it differs from what the parent carries.
///
/// A conflict is returned as [`StatusWrite::Conflict`] rather than an error.
pub(crate) async fn write_status<K, S>(
    client: &Client,
    obj: &K,
    current: Option<&S>,
    desired: &S,
) -> Result<StatusWrite, ReconcilerError>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Debug,
    S: Serialize + PartialEq + Sync,
{
    if current == Some(desired) {
        debug!(name = %obj.name_any(), "Status unchanged, skipping update");
        return Ok(StatusWrite::Unchanged);
    }
    match patch_status(client, obj, desired).await {
        Ok(()) => Ok(StatusWrite::Written),
        Err(ReconcilerError::StatusConflict(key)) => {
            debug!(%key, "Status update conflicted, retrying");
            metrics::increment_requeues_total("status-conflict");
            Ok(StatusWrite::Conflict)
        }
        Err(e) => Err(e),
    }
}

/// Combine the outcome of a pass with the result of its status write.
///
/// A failed pass stays an error even when the status write conflicted, so it
/// is still counted and backed off. A successful pass whose status lost the
/// race is requeued.
pub(crate) fn settle(
    outcome: Result<Pass, ReconcilerError>,
    write: StatusWrite,
) -> Result<Pass, ReconcilerError> {
    let pass = outcome?;
    Ok(match write {
        StatusWrite::Conflict => Pass::Requeue,
        StatusWrite::Unchanged | StatusWrite::Written => pass,
    })
}
