//! # Watch Loop
//!
//! One controller per parent kind. Each watches its parents, the children it
//! owns, and the other parents its status depends on, and they run until a
//! shutdown signal arrives.

use crate::constants::*;
use crate::controller::reconciler::{
    reconcile_control_plane, reconcile_data_plane, reconcile_konnect_extension, ExtensionConsumer,
    Reconciler, ReconcilerError,
};
use crate::controller::server::ServerState;
use crate::crd::{
    ControlPlane, ControlPlaneRefType, DataPlane, KonnectExtension, KonnectGatewayControlPlane,
};
use crate::owned::owner_from_labels;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::admissionregistration::v1::ValidatingWebhookConfiguration;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher;
use kube::{Api, Client, Resource, ResourceExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

type ControllerResult<K> =
    Result<(ObjectRef<K>, Action), controller::Error<ReconcilerError, watcher::Error>>;

fn watch_config() -> watcher::Config {
    watcher::Config::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Children managed for one parent kind
fn owned_config(managed_by: &str) -> watcher::Config {
    watch_config().labels(&format!("{MANAGED_BY_LABEL}={managed_by}"))
}

/// Parent of a child that cannot carry an owner reference (cluster-scoped, or
/// in another namespace), recovered from its owner labels
fn labeled_owner<K, C>(child: &C) -> Option<ObjectRef<K>>
where
    K: Resource<DynamicType = ()>,
    C: Resource,
{
    let (namespace, name) = owner_from_labels(child.labels(), &K::kind(&()))?;
    Some(ObjectRef::new(&name).within(&namespace))
}

/// Consumers in `store` whose extension refs point at `ext`
fn consumers_of<P>(store: &Store<P>, ext: &KonnectExtension) -> Vec<ObjectRef<P>>
where
    P: ExtensionConsumer + Clone + 'static,
{
    store
        .state()
        .iter()
        .filter(|consumer| consumer.references(ext))
        .map(|consumer| ObjectRef::from_obj(consumer.as_ref()))
        .collect()
}

/// Extensions a consumer points at; cross-namespace refs included so the
/// extension can report them
fn extensions_of<P: ExtensionConsumer>(consumer: &P) -> Vec<ObjectRef<KonnectExtension>> {
    let namespace = consumer.namespace().unwrap_or_default();
    consumer
        .extension_refs()
        .iter()
        .filter(|r| r.group == KONNECT_GROUP && r.kind == KonnectExtension::kind(&()))
        .map(|r| {
            ObjectRef::new(&r.name).within(r.namespace.as_deref().unwrap_or(&namespace))
        })
        .collect()
}

fn control_plane_controller(client: &Client) -> Controller<ControlPlane> {
    let controller = Controller::new(Api::<ControlPlane>::all(client.clone()), watch_config());
    let by_data_plane = controller.store();
    let by_extension = controller.store();
    let owned = || owned_config(MANAGED_BY_CONTROL_PLANE);

    controller
        .owns(Api::<Deployment>::all(client.clone()), owned())
        .owns(Api::<ServiceAccount>::all(client.clone()), owned())
        .owns(Api::<Service>::all(client.clone()), owned())
        .owns(Api::<Secret>::all(client.clone()), owned())
        .watches(Api::<Role>::all(client.clone()), owned(), |r| labeled_owner(&r))
        .watches(Api::<RoleBinding>::all(client.clone()), owned(), |b| labeled_owner(&b))
        .watches(Api::<ClusterRole>::all(client.clone()), owned(), |r| labeled_owner(&r))
        .watches(Api::<ClusterRoleBinding>::all(client.clone()), owned(), |b| {
            labeled_owner(&b)
        })
        .watches(
            Api::<ValidatingWebhookConfiguration>::all(client.clone()),
            owned(),
            |w| labeled_owner(&w),
        )
        .watches(Api::<DataPlane>::all(client.clone()), watch_config(), move |dp| {
            let namespace = dp.namespace();
            by_data_plane
                .state()
                .iter()
                .filter(|cp| {
                    cp.namespace() == namespace
                        && cp.data_plane_name() == Some(dp.name_any().as_str())
                })
                .map(|cp| ObjectRef::from_obj(cp.as_ref()))
                .collect::<Vec<_>>()
        })
        .watches(
            Api::<KonnectExtension>::all(client.clone()),
            watch_config(),
            move |ext| consumers_of(&by_extension, &ext),
        )
}

fn data_plane_controller(client: &Client) -> Controller<DataPlane> {
    let controller = Controller::new(Api::<DataPlane>::all(client.clone()), watch_config());
    let by_extension = controller.store();
    let owned = || owned_config(MANAGED_BY_DATA_PLANE);

    controller
        .owns(Api::<Deployment>::all(client.clone()), owned())
        .owns(Api::<Service>::all(client.clone()), owned())
        .watches(
            Api::<KonnectExtension>::all(client.clone()),
            watch_config(),
            move |ext| consumers_of(&by_extension, &ext),
        )
}

fn konnect_extension_controller(client: &Client) -> Controller<KonnectExtension> {
    let controller = Controller::new(Api::<KonnectExtension>::all(client.clone()), watch_config());
    let by_control_plane = controller.store();

    controller
        .owns(
            Api::<Secret>::all(client.clone()),
            owned_config(MANAGED_BY_KONNECT_EXTENSION),
        )
        .watches(Api::<DataPlane>::all(client.clone()), watch_config(), |dp| extensions_of(&dp))
        .watches(Api::<ControlPlane>::all(client.clone()), watch_config(), |cp| extensions_of(&cp))
        .watches(
            Api::<KonnectGatewayControlPlane>::all(client.clone()),
            watch_config(),
            move |kgcp| {
                let namespace = kgcp.namespace();
                by_control_plane
                    .state()
                    .iter()
                    .filter(|ext| ext.namespace() == namespace)
                    .filter(|ext| {
                        let reference = &ext.spec.konnect.control_plane.r#ref;
                        match reference.r#type {
                            ControlPlaneRefType::KonnectNamespacedRef => reference
                                .konnect_namespaced_ref
                                .as_ref()
                                .is_some_and(|r| r.name == kgcp.name_any()),
                            ControlPlaneRefType::KonnectId => reference.konnect_id.is_some()
                                && reference.konnect_id.as_deref() == kgcp.konnect_id(),
                        }
                    })
                    .map(|ext| ObjectRef::from_obj(ext.as_ref()))
                    .collect::<Vec<_>>()
            },
        )
}

async fn report<K>(result: ControllerResult<K>, backoff: Arc<AtomicU64>)
where
    K: Resource<DynamicType = ()>,
{
    match result {
        Ok((obj, _)) => {
            debug!(
                kind = %K::kind(&()),
                name = %obj.name,
                namespace = ?obj.namespace,
                "Reconciled"
            );
            backoff.store(DEFAULT_WATCH_BACKOFF_MS, Ordering::Relaxed);
        }
        // Already handled by the error policy
        Err(controller::Error::ReconcilerFailed(e, obj)) => {
            debug!(
                kind = %K::kind(&()),
                name = %obj.name,
                error = %e,
                "Reconcile failed, requeued"
            );
        }
        Err(e) => handle_watch_stream_error(&e.to_string(), &backoff, MAX_WATCH_BACKOFF_MS).await,
    }
}

/// Run every controller until shutdown
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<()> {
    info!("Starting ControlPlane, DataPlane and KonnectExtension controllers");
    let backoff = Arc::new(AtomicU64::new(DEFAULT_WATCH_BACKOFF_MS));

    let control_planes = control_plane_controller(&client)
        .shutdown_on_signal()
        .run(
            reconcile_control_plane,
            handle_reconciliation_error::<ControlPlane>,
            Arc::clone(&reconciler),
        )
        .for_each(|result| report(result, Arc::clone(&backoff)));

    let data_planes = data_plane_controller(&client)
        .shutdown_on_signal()
        .run(
            reconcile_data_plane,
            handle_reconciliation_error::<DataPlane>,
            Arc::clone(&reconciler),
        )
        .for_each(|result| report(result, Arc::clone(&backoff)));

    let extensions = konnect_extension_controller(&client)
        .shutdown_on_signal()
        .run(
            reconcile_konnect_extension,
            handle_reconciliation_error::<KonnectExtension>,
            Arc::clone(&reconciler),
        )
        .for_each(|result| report(result, Arc::clone(&backoff)));

    futures::join!(control_planes, data_planes, extensions);

    server_state.is_ready.store(false, Ordering::Relaxed);
    info!("Controllers stopped");
    Ok(())
}
