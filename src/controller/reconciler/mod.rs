//! # Reconciler
//!
//! Per-kind reconcile flows for `ControlPlane`, `DataPlane` and
//! `KonnectExtension`, and the context they share.
//!
//! Each flow is split in two: a cluster-facing `reconcile_*` entry point that
//! handles the finalizer and writes status, and an [`Engine`] method that
//! converges children and computes the new status from injected stores and
//! lookups.

mod controlplane;
mod dataplane;
mod dependents;
mod error;
mod extension;
mod lookup;
mod status;

pub use controlplane::reconcile_control_plane;
pub use dataplane::reconcile_data_plane;
pub use dependents::{applied_dependents, ExtensionConsumer};
pub use error::{ErrorClass, ReconcilerError};
pub use extension::reconcile_konnect_extension;
pub use lookup::{
    map_cluster_type, ClusterTypeLookup, KubeParents, ParentLookup, SpecClusterType,
    StaticParents, CLUSTER_TYPE_CONTROL_PLANE, CLUSTER_TYPE_K8S_INGRESS_CONTROLLER,
};
pub use status::{patch_status, Pass, StatusWrite};

use crate::certificates::CaRef;
use crate::config::SharedOperatorConfig;
use crate::constants::{BACKOFF_MAX_MINUTES, BACKOFF_MIN_MINUTES, ENFORCE_CONFIG_ANNOTATION};
use crate::controller::backoff::FibonacciBackoff;
use crate::grants::{GrantLookup, KubeGrantLookup};
use crate::owned::{ChildStore, KubeStore, OwnerIdentity};
use crate::rbac::{CachedDiscovery, DiscoverySource};
use k8s_openapi::api::admissionregistration::v1::ValidatingWebhookConfiguration;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::{Client, Resource, ResourceExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Child stores, one per kind
#[derive(Clone)]
pub struct Stores {
    pub deployments: Arc<dyn ChildStore<Deployment>>,
    pub service_accounts: Arc<dyn ChildStore<ServiceAccount>>,
    pub cluster_roles: Arc<dyn ChildStore<ClusterRole>>,
    pub cluster_role_bindings: Arc<dyn ChildStore<ClusterRoleBinding>>,
    pub roles: Arc<dyn ChildStore<Role>>,
    pub role_bindings: Arc<dyn ChildStore<RoleBinding>>,
    pub services: Arc<dyn ChildStore<Service>>,
    pub secrets: Arc<dyn ChildStore<Secret>>,
    pub webhooks: Arc<dyn ChildStore<ValidatingWebhookConfiguration>>,
}

impl Stores {
    /// Every kind backed by the Kubernetes API
    pub fn kube(client: &Client) -> Self {
        let store = Arc::new(KubeStore::new(client.clone()));
        Self {
            deployments: Arc::<KubeStore>::clone(&store),
            service_accounts: Arc::<KubeStore>::clone(&store),
            cluster_roles: Arc::<KubeStore>::clone(&store),
            cluster_role_bindings: Arc::<KubeStore>::clone(&store),
            roles: Arc::<KubeStore>::clone(&store),
            role_bindings: Arc::<KubeStore>::clone(&store),
            services: Arc::<KubeStore>::clone(&store),
            secrets: Arc::<KubeStore>::clone(&store),
            webhooks: store,
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

/// Cluster-independent part of the reconcile context
#[derive(Clone)]
pub struct Engine {
    pub config: SharedOperatorConfig,
    pub stores: Stores,
    pub discovery: Arc<dyn DiscoverySource>,
    pub grants: Arc<dyn GrantLookup>,
    pub parents: Arc<dyn ParentLookup>,
    pub cluster_types: Arc<dyn ClusterTypeLookup>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine wired to the cluster
    pub fn kube(client: &Client, config: SharedOperatorConfig) -> Self {
        Self {
            discovery: Arc::new(CachedDiscovery::new(client.clone(), config.discovery_ttl())),
            stores: Stores::kube(client),
            grants: Arc::new(KubeGrantLookup::new(client.clone())),
            parents: Arc::new(KubeParents::new(client.clone())),
            cluster_types: Arc::new(SpecClusterType),
            config,
        }
    }

    pub(crate) fn ca_ref(&self) -> CaRef {
        CaRef {
            namespace: self.config.cluster_ca_secret_namespace.clone(),
            name: self.config.cluster_ca_secret.clone(),
        }
    }
}

/// Whether the parent asks for convergence regardless of fingerprints
pub(crate) fn enforce_config<K: Resource>(parent: &K) -> bool {
    parent
        .annotations()
        .get(ENFORCE_CONFIG_ANNOTATION)
        .is_some_and(|v| v == "true")
}

/// Owner selector narrowed to children of one purpose
pub(crate) fn purpose_selector(
    owner: &OwnerIdentity,
    key: &str,
    value: &str,
) -> BTreeMap<String, String> {
    let mut selector = owner.selector();
    selector.insert(key.to_string(), value.to_string());
    selector
}

/// Consecutive error tracking for one parent
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl Default for BackoffState {
    fn default() -> Self {
        Self {
            backoff: FibonacciBackoff::new(BACKOFF_MIN_MINUTES, BACKOFF_MAX_MINUTES),
            error_count: 0,
        }
    }
}

impl BackoffState {
    pub fn increment_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }
}

/// Shared context of every controller
pub struct Reconciler {
    pub client: Client,
    pub engine: Engine,
    /// Keyed by `kind/namespace/name`
    pub backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(client: Client, config: SharedOperatorConfig) -> Self {
        Self {
            engine: Engine::kube(&client, config),
            client,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    /// Forget the error streak of a parent after a successful pass
    pub fn reset_backoff(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(key);
        }
    }
}

/// Backoff key of a parent
pub fn backoff_key<K: Resource<DynamicType = ()>>(obj: &K) -> String {
    format!(
        "{}/{}/{}",
        K::kind(&()),
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    )
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ControlPlane, ControlPlaneSpec};

    #[test]
    fn test_enforce_config_annotation() {
        let mut cp = ControlPlane::new("kong", ControlPlaneSpec::default());
        assert!(!enforce_config(&cp));
        cp.metadata.annotations = Some(
            [(ENFORCE_CONFIG_ANNOTATION.to_string(), "true".to_string())]
                .into_iter()
                .collect(),
        );
        assert!(enforce_config(&cp));
    }

    #[test]
    fn test_backoff_key_includes_kind() {
        let mut cp = ControlPlane::new("kong", ControlPlaneSpec::default());
        cp.metadata.namespace = Some("gateway".to_string());
        assert_eq!(backoff_key(&cp), "ControlPlane/gateway/kong");
    }
}
