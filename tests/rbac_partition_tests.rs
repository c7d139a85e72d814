//! # RBAC Scope Partitioner Tests
//!
//! The controller permission template is split against discovery snapshots;
//! every (group, resource) pair must land in exactly one of the two sets.

use gateway_operator::rbac::{partition_rules, DiscoveryMapping, Partition, ResourceScope};
use gateway_operator::resources::control_plane_cluster_role_template;
use k8s_openapi::api::rbac::v1::PolicyRule;
use std::collections::BTreeSet;

fn pairs(rules: &[PolicyRule]) -> BTreeSet<(String, String)> {
    rules
        .iter()
        .flat_map(|rule| {
            let groups = rule.api_groups.clone().unwrap_or_default();
            let resources = rule.resources.clone().unwrap_or_default();
            groups.into_iter().flat_map(move |group| {
                resources
                    .clone()
                    .into_iter()
                    .map(move |resource| (group.clone(), resource))
            })
        })
        .collect()
}

fn cluster_discovery() -> DiscoveryMapping {
    DiscoveryMapping::default()
        .with("", "v1", "configmaps", ResourceScope::Namespaced)
        .with("", "v1", "endpoints", ResourceScope::Namespaced)
        .with("", "v1", "pods", ResourceScope::Namespaced)
        .with("", "v1", "secrets", ResourceScope::Namespaced)
        .with("", "v1", "services", ResourceScope::Namespaced)
        .with("", "v1", "events", ResourceScope::Namespaced)
        .with("", "v1", "nodes", ResourceScope::Cluster)
        .with("", "v1", "namespaces", ResourceScope::Cluster)
        .with("networking.k8s.io", "v1", "ingresses", ResourceScope::Namespaced)
        .with("networking.k8s.io", "v1", "ingressclasses", ResourceScope::Cluster)
        .with("gateway.networking.k8s.io", "v1", "gateways", ResourceScope::Namespaced)
        .with("gateway.networking.k8s.io", "v1", "gatewayclasses", ResourceScope::Cluster)
}

#[test]
fn test_template_pairs_are_partitioned_exactly_once() {
    let template = control_plane_cluster_role_template();
    let Partition { namespaced, cluster } = partition_rules(&template, &cluster_discovery());

    let namespaced_pairs = pairs(&namespaced);
    let cluster_pairs = pairs(&cluster);
    assert!(namespaced_pairs.is_disjoint(&cluster_pairs));

    let union: BTreeSet<_> = namespaced_pairs.union(&cluster_pairs).cloned().collect();
    assert_eq!(union, pairs(&template));
}

#[test]
fn test_partitioned_rules_name_a_single_resource() {
    let template = control_plane_cluster_role_template();
    let partition = partition_rules(&template, &cluster_discovery());
    for rule in partition.namespaced {
        assert_eq!(rule.api_groups.as_ref().map(Vec::len), Some(1));
        assert_eq!(rule.resources.as_ref().map(Vec::len), Some(1));
        assert!(!rule.verbs.is_empty());
    }
}

#[test]
fn test_known_scopes_are_respected() {
    let template = control_plane_cluster_role_template();
    let partition = partition_rules(&template, &cluster_discovery());
    let namespaced = pairs(&partition.namespaced);
    let cluster = pairs(&partition.cluster);

    assert!(namespaced.contains(&(String::new(), "services".to_string())));
    assert!(cluster.contains(&(String::new(), "nodes".to_string())));
    assert!(!namespaced.contains(&(String::new(), "namespaces".to_string())));
}

#[test]
fn test_empty_discovery_grants_everything_cluster_wide() {
    let template = control_plane_cluster_role_template();
    let partition = partition_rules(&template, &DiscoveryMapping::default());
    assert!(partition.namespaced.is_empty());
    assert_eq!(pairs(&partition.cluster), pairs(&template));
}
