//! # Child kinds
//!
//! Per-kind convergence rules. Each child kind decides which payload fields the
//! operator owns and how an existing object is brought back to the desired state
//! without clobbering fields the API server or other controllers manage.

use crate::resources::compare::semantically_contains;
use k8s_openapi::api::admissionregistration::v1::ValidatingWebhookConfiguration;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, RoleBinding, Role, Subject};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// A Kubernetes kind the operator creates and converges on behalf of a parent
pub trait ChildKind:
    Resource<DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Kind name used in logs and metric labels
    const NAME: &'static str;

    /// API handle for the given namespace; `None` means all namespaces (or cluster scope)
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;

    /// Bring the owned payload of `existing` to `desired`. Returns true if anything changed.
    ///
    /// Only runs when the fingerprint differs or enforcement is requested.
    fn converge_payload(existing: &mut Self, desired: &Self) -> bool;

    /// Fields converged on every pass, regardless of fingerprint
    fn converge_always(_existing: &mut Self, _desired: &Self) -> bool {
        false
    }

    /// Reason the existing object cannot be updated in place and must be recreated
    fn must_recreate(_existing: &Self, _desired: &Self) -> Option<String> {
        None
    }

    /// Rank used to pick a survivor among duplicates; higher wins
    fn readiness(&self) -> i64 {
        0
    }
}

fn namespaced_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Replace `existing` with `desired` when they differ
fn converge_field<T: Clone + PartialEq>(existing: &mut T, desired: &T) -> bool {
    if existing == desired {
        return false;
    }
    *existing = desired.clone();
    true
}

/// Replace `existing` with `desired` unless it already contains it semantically
fn converge_semantic<T: Clone + Serialize>(existing: &mut T, desired: &T) -> bool {
    if semantically_contains(existing, desired) {
        return false;
    }
    *existing = desired.clone();
    true
}

impl ChildKind for Deployment {
    const NAME: &'static str = "Deployment";

    fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
        namespaced_api(client, namespace)
    }

    fn converge_payload(existing: &mut Self, desired: &Self) -> bool {
        let Some(want) = desired.spec.as_ref() else {
            return false;
        };
        let have = existing.spec.get_or_insert_with(Default::default);
        converge_semantic(&mut have.template, &want.template)
    }

    /// Replica count is pinned whenever the desired object sets it
    fn converge_always(existing: &mut Self, desired: &Self) -> bool {
        let Some(replicas) = desired.spec.as_ref().and_then(|s| s.replicas) else {
            return false;
        };
        let have = existing.spec.get_or_insert_with(Default::default);
        converge_field(&mut have.replicas, &Some(replicas))
    }

    fn readiness(&self) -> i64 {
        self.status
            .as_ref()
            .map_or(0, |s| i64::from(s.ready_replicas.unwrap_or(0)))
    }
}

impl ChildKind for ServiceAccount {
    const NAME: &'static str = "ServiceAccount";

    fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
        namespaced_api(client, namespace)
    }

    fn converge_payload(_existing: &mut Self, _desired: &Self) -> bool {
        false
    }
}

impl ChildKind for Role {
    const NAME: &'static str = "Role";

    fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
        namespaced_api(client, namespace)
    }

    fn converge_payload(existing: &mut Self, desired: &Self) -> bool {
        converge_field(&mut existing.rules, &desired.rules)
    }
}

impl ChildKind for ClusterRole {
    const NAME: &'static str = "ClusterRole";

    fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
        Api::all(client)
    }

    fn converge_payload(existing: &mut Self, desired: &Self) -> bool {
        let rules = converge_field(&mut existing.rules, &desired.rules);
        let aggregation = converge_field(&mut existing.aggregation_rule, &desired.aggregation_rule);
        rules || aggregation
    }
}

/// Subjects must contain every desired subject; extra subjects are replaced too
fn converge_subjects(existing: &mut Option<Vec<Subject>>, desired: &Option<Vec<Subject>>) -> bool {
    let want = desired.as_deref().unwrap_or_default();
    let have = existing.as_deref().unwrap_or_default();
    if want.iter().all(|s| have.contains(s)) && have.len() == want.len() {
        return false;
    }
    *existing = desired.clone();
    true
}

impl ChildKind for RoleBinding {
    const NAME: &'static str = "RoleBinding";

    fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
        namespaced_api(client, namespace)
    }

    fn converge_payload(existing: &mut Self, desired: &Self) -> bool {
        converge_subjects(&mut existing.subjects, &desired.subjects)
    }

    fn converge_always(existing: &mut Self, desired: &Self) -> bool {
        converge_subjects(&mut existing.subjects, &desired.subjects)
    }

    /// roleRef is immutable
    fn must_recreate(existing: &Self, desired: &Self) -> Option<String> {
        (existing.role_ref != desired.role_ref).then(|| {
            format!(
                "roleRef changed from {} {} to {} {}",
                existing.role_ref.kind,
                existing.role_ref.name,
                desired.role_ref.kind,
                desired.role_ref.name
            )
        })
    }
}

impl ChildKind for ClusterRoleBinding {
    const NAME: &'static str = "ClusterRoleBinding";

    fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
        Api::all(client)
    }

    fn converge_payload(existing: &mut Self, desired: &Self) -> bool {
        converge_subjects(&mut existing.subjects, &desired.subjects)
    }

    fn converge_always(existing: &mut Self, desired: &Self) -> bool {
        converge_subjects(&mut existing.subjects, &desired.subjects)
    }

    /// roleRef is immutable
    fn must_recreate(existing: &Self, desired: &Self) -> Option<String> {
        (existing.role_ref != desired.role_ref).then(|| {
            format!(
                "roleRef changed from {} {} to {} {}",
                existing.role_ref.kind,
                existing.role_ref.name,
                desired.role_ref.kind,
                desired.role_ref.name
            )
        })
    }
}

impl ChildKind for Service {
    const NAME: &'static str = "Service";

    fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
        namespaced_api(client, namespace)
    }

    fn converge_payload(existing: &mut Self, desired: &Self) -> bool {
        let Some(want) = desired.spec.as_ref() else {
            return false;
        };
        let have = existing.spec.get_or_insert_with(Default::default);
        let selector = converge_field(&mut have.selector, &want.selector);
        let ports = converge_semantic(&mut have.ports, &want.ports);
        let service_type = want.type_.is_some() && converge_field(&mut have.type_, &want.type_);
        selector || ports || service_type
    }
}

impl ChildKind for Secret {
    const NAME: &'static str = "Secret";

    fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
        namespaced_api(client, namespace)
    }

    fn converge_payload(existing: &mut Self, desired: &Self) -> bool {
        let data = converge_field(&mut existing.data, &desired.data);
        let kind = desired.type_.is_some() && converge_field(&mut existing.type_, &desired.type_);
        data || kind
    }
}

impl ChildKind for ValidatingWebhookConfiguration {
    const NAME: &'static str = "ValidatingWebhookConfiguration";

    fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
        Api::all(client)
    }

    fn converge_payload(existing: &mut Self, desired: &Self) -> bool {
        converge_semantic(&mut existing.webhooks, &desired.webhooks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use k8s_openapi::api::rbac::v1::RoleRef;

    fn subject(name: &str) -> Subject {
        Subject {
            kind: "ServiceAccount".to_string(),
            name: name.to_string(),
            namespace: Some("kong".to_string()),
            ..Subject::default()
        }
    }

    fn deployment(replicas: Option<i32>) -> Deployment {
        Deployment {
            spec: Some(DeploymentSpec {
                replicas,
                ..DeploymentSpec::default()
            }),
            ..Deployment::default()
        }
    }

    #[test]
    fn test_deployment_replicas_are_pinned_when_set() {
        let mut existing = deployment(Some(3));
        assert!(Deployment::converge_always(&mut existing, &deployment(Some(0))));
        assert_eq!(existing.spec.as_ref().and_then(|s| s.replicas), Some(0));
        assert!(!Deployment::converge_always(&mut existing, &deployment(None)));
        assert_eq!(existing.spec.as_ref().and_then(|s| s.replicas), Some(0));
    }

    #[test]
    fn test_deployment_readiness() {
        let mut d = deployment(Some(1));
        assert_eq!(d.readiness(), 0);
        d.status = Some(DeploymentStatus {
            ready_replicas: Some(2),
            ..DeploymentStatus::default()
        });
        assert_eq!(d.readiness(), 2);
    }

    #[test]
    fn test_binding_subjects_converge() {
        let mut existing = ClusterRoleBinding {
            subjects: Some(vec![subject("old")]),
            ..ClusterRoleBinding::default()
        };
        let desired = ClusterRoleBinding {
            subjects: Some(vec![subject("new")]),
            ..ClusterRoleBinding::default()
        };
        assert!(ClusterRoleBinding::converge_always(&mut existing, &desired));
        assert_eq!(existing.subjects, desired.subjects);
        assert!(!ClusterRoleBinding::converge_always(&mut existing, &desired));
    }

    #[test]
    fn test_binding_role_ref_change_requires_recreate() {
        let role_ref = |name: &str| RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: name.to_string(),
        };
        let existing = ClusterRoleBinding {
            role_ref: role_ref("controlplane-kong-abcde"),
            ..ClusterRoleBinding::default()
        };
        let desired = ClusterRoleBinding {
            role_ref: role_ref("controlplane-kong-fghij"),
            ..ClusterRoleBinding::default()
        };
        assert!(ClusterRoleBinding::must_recreate(&existing, &desired).is_some());
        assert!(ClusterRoleBinding::must_recreate(&existing, &existing).is_none());
    }
}
