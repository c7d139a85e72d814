//! # Error Policy
//!
//! Requeue decisions for failed reconcile passes, and classification of
//! controller stream errors.

use crate::constants;
use crate::controller::reconciler::{backoff_key, ErrorClass, Reconciler, ReconcilerError};
use crate::observability;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Requeue a failed pass according to the class of its error.
///
/// Transient failures (write conflicts, duplicates reduced, stale bindings)
/// come back almost immediately. Every other class backs off per parent on a
/// Fibonacci schedule that resets after the next successful pass.
pub fn handle_reconciliation_error<K>(
    obj: Arc<K>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let kind = K::kind(&());
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();
    let class = error.class();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.kind = %kind,
        resource.name = %name,
        resource.namespace = %namespace,
        error.class = class.metric_label(),
    );
    let _error_guard = error_span.enter();

    observability::metrics::increment_reconciliation_errors(&kind, class.metric_label());

    if class == ErrorClass::Requeue {
        info!(%error, "Transient reconcile failure, requeueing");
        observability::metrics::increment_requeues_total("transient");
        return Action::requeue(Duration::from_secs(constants::TRANSIENT_REQUEUE_SECS));
    }

    error!(%error, "Reconciliation error for {kind} {namespace}/{name}");

    let (backoff_seconds, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(backoff_key(obj.as_ref())).or_default();
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {e}, using default backoff");
            (constants::DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS, 0)
        }
    };

    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));
    info!(
        "Retrying with Fibonacci backoff: {backoff_seconds}s (error count: {error_count}, next retry: {})",
        next_trigger_time.to_rfc3339()
    );

    observability::metrics::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// Kinds of controller stream errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// Credentials rejected; RBAC revoked or token expired
    Unauthorized,
    /// Resource version too old, the watch relists
    Expired,
    /// API server throttling or storage reinitializing
    Throttled,
    /// Object deleted while queued
    NotFound,
    Other,
}

/// Classify a stream error by its rendered message
pub fn classify_watch_error(error: &str) -> WatchErrorKind {
    if error.contains("401") || error.contains("Unauthorized") {
        WatchErrorKind::Unauthorized
    } else if error.contains("410")
        || error.contains("too old resource version")
        || error.contains("Expired")
        || error.contains("Gone")
    {
        WatchErrorKind::Expired
    } else if error.contains("429")
        || error.contains("storage is (re)initializing")
        || error.contains("TooManyRequests")
    {
        WatchErrorKind::Throttled
    } else if error.contains("ObjectNotFound")
        || (error.contains("404") && error.contains("not found"))
    {
        WatchErrorKind::NotFound
    } else {
        WatchErrorKind::Other
    }
}

/// Log a stream error and wait as long as its kind requires.
///
/// Throttling doubles `backoff` up to `max_backoff_ms`.
pub async fn handle_watch_stream_error(error: &str, backoff: &Arc<AtomicU64>, max_backoff_ms: u64) {
    let error_span = tracing::span!(tracing::Level::WARN, "controller.watch.error", error = %error);
    let _error_guard = error_span.enter();

    match classify_watch_error(error) {
        WatchErrorKind::Unauthorized => {
            error!(
                "Watch authentication failed (401 Unauthorized), RBAC may have been revoked or the token expired"
            );
            error!("Check the operator ClusterRole and ClusterRoleBinding:");
            error!(
                "  kubectl auth can-i list controlplanes.gateway-operator.konghq.com --as=system:serviceaccount:kong-system:gateway-operator --all-namespaces"
            );
            warn!(
                "Waiting {}s before retrying watch",
                constants::DEFAULT_WATCH_RESTART_DELAY_SECS
            );
            tokio::time::sleep(Duration::from_secs(
                constants::DEFAULT_WATCH_RESTART_DELAY_SECS,
            ))
            .await;
        }
        WatchErrorKind::Expired => {
            warn!(error_type = "410", "Watch resource version expired, watch will restart");
        }
        WatchErrorKind::Throttled => {
            let current = backoff.load(Ordering::Relaxed);
            warn!("API server throttling watch (429), backing off for {current}ms");
            tokio::time::sleep(Duration::from_millis(current)).await;
            backoff.store(current.saturating_mul(2).min(max_backoff_ms), Ordering::Relaxed);
        }
        WatchErrorKind::NotFound => {
            warn!("Resource not found (likely deleted), continuing watch");
        }
        WatchErrorKind::Other => {
            error!("Controller stream error: {error}");
            tokio::time::sleep(Duration::from_secs(
                constants::DEFAULT_WATCH_RESTART_DELAY_SECS,
            ))
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_watch_errors() {
        assert_eq!(
            classify_watch_error("ApiError: Unauthorized (401)"),
            WatchErrorKind::Unauthorized
        );
        assert_eq!(
            classify_watch_error("too old resource version: 123 (456)"),
            WatchErrorKind::Expired
        );
        assert_eq!(
            classify_watch_error("storage is (re)initializing"),
            WatchErrorKind::Throttled
        );
        assert_eq!(
            classify_watch_error("ObjectNotFound: controlplanes kong"),
            WatchErrorKind::NotFound
        );
        assert_eq!(classify_watch_error("connection reset"), WatchErrorKind::Other);
    }

    #[tokio::test]
    async fn test_throttled_backoff_doubles_up_to_max() {
        let backoff = Arc::new(AtomicU64::new(1));
        handle_watch_stream_error("429 TooManyRequests", &backoff, 3).await;
        assert_eq!(backoff.load(Ordering::Relaxed), 2);
        handle_watch_stream_error("429 TooManyRequests", &backoff, 3).await;
        assert_eq!(backoff.load(Ordering::Relaxed), 3);
    }
}
