//! Service account and RBAC objects of the control plane.

use super::child_meta;
use crate::owned::OwnerIdentity;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

fn rule(group: &str, resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![group.to_string()]),
        resources: Some(resources.iter().map(|r| (*r).to_string()).collect()),
        verbs: verbs.iter().map(|v| (*v).to_string()).collect(),
        ..PolicyRule::default()
    }
}

const READ: &[&str] = &["get", "list", "watch"];
const STATUS: &[&str] = &["get", "patch", "update"];

/// Permissions the ingress controller needs, before scope partitioning
pub fn control_plane_cluster_role_template() -> Vec<PolicyRule> {
    vec![
        rule(
            "",
            &["configmaps", "endpoints", "nodes", "pods", "secrets", "namespaces", "services"],
            READ,
        ),
        rule("", &["events"], &["create", "patch"]),
        rule("", &["services/status"], STATUS),
        rule("discovery.k8s.io", &["endpointslices"], READ),
        rule("networking.k8s.io", &["ingresses", "ingressclasses"], READ),
        rule("networking.k8s.io", &["ingresses/status"], STATUS),
        rule("coordination.k8s.io", &["leases"], &["create", "get", "list", "update", "watch"]),
        rule("apiextensions.k8s.io", &["customresourcedefinitions"], READ),
        rule(
            "configuration.konghq.com",
            &[
                "kongplugins",
                "kongclusterplugins",
                "kongconsumers",
                "kongconsumergroups",
                "kongingresses",
                "kongupstreampolicies",
                "kongvaults",
                "kongcustomentities",
                "kongcredentialbasicauths",
                "tcpingresses",
                "udpingresses",
            ],
            READ,
        ),
        rule(
            "configuration.konghq.com",
            &[
                "kongplugins/status",
                "kongclusterplugins/status",
                "kongconsumers/status",
                "kongconsumergroups/status",
                "kongupstreampolicies/status",
                "kongvaults/status",
                "kongcustomentities/status",
                "tcpingresses/status",
                "udpingresses/status",
            ],
            STATUS,
        ),
        rule(
            "gateway.networking.k8s.io",
            &[
                "gatewayclasses",
                "gateways",
                "httproutes",
                "grpcroutes",
                "tcproutes",
                "tlsroutes",
                "udproutes",
                "referencegrants",
                "backendtlspolicies",
            ],
            READ,
        ),
        rule(
            "gateway.networking.k8s.io",
            &[
                "gatewayclasses/status",
                "gateways/status",
                "httproutes/status",
                "grpcroutes/status",
                "tcproutes/status",
                "tlsroutes/status",
                "udproutes/status",
                "referencegrants/status",
                "backendtlspolicies/status",
            ],
            STATUS,
        ),
        rule(
            "incubator.ingress-controller.konghq.com",
            &["kongservicefacades"],
            READ,
        ),
    ]
}

pub fn generate_service_account(owner: &OwnerIdentity) -> ServiceAccount {
    let mut sa = ServiceAccount {
        metadata: child_meta(owner, Some(&owner.namespace), ""),
        ..ServiceAccount::default()
    };
    owner.mark(&mut sa);
    sa
}

pub fn generate_cluster_role(owner: &OwnerIdentity, rules: Vec<PolicyRule>) -> ClusterRole {
    let mut role = ClusterRole {
        metadata: child_meta(owner, None, ""),
        rules: Some(rules),
        ..ClusterRole::default()
    };
    owner.mark(&mut role);
    role
}

fn service_account_subject(owner: &OwnerIdentity, service_account: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: service_account.to_string(),
        namespace: Some(owner.namespace.clone()),
        ..Subject::default()
    }
}

/// Binds the cluster role to the control plane service account
pub fn generate_cluster_role_binding(
    owner: &OwnerIdentity,
    cluster_role: &str,
    service_account: &str,
) -> ClusterRoleBinding {
    let mut binding = ClusterRoleBinding {
        metadata: child_meta(owner, None, ""),
        role_ref: RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: cluster_role.to_string(),
        },
        subjects: Some(vec![service_account_subject(owner, service_account)]),
    };
    owner.mark(&mut binding);
    binding
}

/// Namespaced rules for one watched namespace
pub fn generate_role(owner: &OwnerIdentity, namespace: &str, rules: Vec<PolicyRule>) -> Role {
    let mut role = Role {
        metadata: child_meta(owner, Some(namespace), ""),
        rules: Some(rules),
    };
    owner.mark(&mut role);
    role
}

/// Binds a namespaced role to the control plane service account, which lives in
/// the owner's namespace
pub fn generate_role_binding(
    owner: &OwnerIdentity,
    namespace: &str,
    role: &str,
    service_account: &str,
) -> RoleBinding {
    let mut binding = RoleBinding {
        metadata: child_meta(owner, Some(namespace), ""),
        role_ref: RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: "Role".to_string(),
            name: role.to_string(),
        },
        subjects: Some(vec![service_account_subject(owner, service_account)]),
    };
    owner.mark(&mut binding);
    binding
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::test_support::{control_plane, owner};

    #[test]
    fn test_role_in_other_namespace_has_labels_but_no_owner_reference() {
        let cp = control_plane("kong", "gateway");
        let owner = owner(&cp);
        let role = generate_role(&owner, "team-a", vec![]);
        assert_eq!(role.metadata.namespace.as_deref(), Some("team-a"));
        assert!(role.metadata.owner_references.is_none());
        assert_eq!(
            role.metadata.labels.as_ref().map(|l| l.len()),
            Some(owner.labels().len())
        );

        let own = generate_role(&owner, "gateway", vec![]);
        assert_eq!(own.metadata.owner_references.map(|r| r.len()), Some(1));
    }

    #[test]
    fn test_role_binding_subject_lives_in_owner_namespace() {
        let cp = control_plane("kong", "gateway");
        let binding = generate_role_binding(&owner(&cp), "team-a", "role-x", "sa-y");
        assert_eq!(binding.role_ref.kind, "Role");
        assert_eq!(binding.role_ref.name, "role-x");
        let subject = &binding.subjects.unwrap()[0];
        assert_eq!(subject.name, "sa-y");
        assert_eq!(subject.namespace.as_deref(), Some("gateway"));
    }

    #[test]
    fn test_cluster_scoped_children_have_no_namespace() {
        let cp = control_plane("kong", "gateway");
        let owner = owner(&cp);
        let role = generate_cluster_role(&owner, control_plane_cluster_role_template());
        assert!(role.metadata.namespace.is_none());
        assert!(role.metadata.owner_references.is_none());
        assert_eq!(
            role.metadata.generate_name.as_deref(),
            Some("controlplane-kong-")
        );
        let binding = generate_cluster_role_binding(&owner, "cr", "sa");
        assert_eq!(binding.role_ref.kind, "ClusterRole");
    }
}
