//! # Dependency Status Aggregator Tests
//!
//! Dependents of a KonnectExtension across namespaces and parent kinds.

use gateway_operator::constants::KONNECT_GROUP;
use gateway_operator::controller::reconciler::applied_dependents;
use gateway_operator::crd::{
    condition_reason, condition_type, set_condition, Condition, ConditionStatus, ControlPlane,
    ControlPlaneSpec, ControlPlaneStatus, ExtensionRef, KonnectExtension, KonnectExtensionSpec,
    NamespacedRef,
};
use serde_json::json;

fn extension() -> KonnectExtension {
    let mut ext = KonnectExtension::new(
        "konnect",
        KonnectExtensionSpec {
            konnect: Default::default(),
            client_auth: None,
        },
    );
    ext.metadata.namespace = Some("gateway".to_string());
    ext
}

fn control_plane(namespace: &str, name: &str, ref_namespace: Option<&str>) -> ControlPlane {
    let mut cp = ControlPlane::new(
        name,
        ControlPlaneSpec {
            extensions: vec![ExtensionRef {
                group: KONNECT_GROUP.to_string(),
                kind: "KonnectExtension".to_string(),
                name: "konnect".to_string(),
                namespace: ref_namespace.map(str::to_string),
            }],
            ..ControlPlaneSpec::default()
        },
    );
    cp.metadata.namespace = Some(namespace.to_string());
    let mut status = ControlPlaneStatus::default();
    set_condition(
        &mut status.conditions,
        Condition::new(
            condition_type::KONNECT_EXTENSION_APPLIED,
            ConditionStatus::True,
            condition_reason::APPLIED,
            "",
        ),
    );
    cp.status = Some(status);
    cp
}

#[test]
fn test_sorted_by_namespace_then_name() {
    let cps = vec![
        control_plane("team-b", "a", Some("gateway")),
        control_plane("gateway", "z", None),
        control_plane("gateway", "b", Some("gateway")),
        control_plane("team-a", "a", Some("gateway")),
    ];
    let refs = applied_dependents(&extension(), &cps);
    let keys: Vec<_> = refs.iter().map(NamespacedRef::key).collect();
    assert_eq!(keys, vec!["gateway/b", "gateway/z", "team-a/a", "team-b/a"]);
}

#[test]
fn test_implicit_namespace_is_the_consumer_namespace() {
    let cps = vec![control_plane("team-a", "kong", None)];
    assert!(applied_dependents(&extension(), &cps).is_empty());
}

#[test]
fn test_no_candidates_no_dependents() {
    let cps: Vec<ControlPlane> = Vec::new();
    assert!(applied_dependents(&extension(), &cps).is_empty());
}

#[test]
fn test_refs_serialize_with_namespace() {
    let cps = vec![control_plane("gateway", "kong", None)];
    let refs = applied_dependents(&extension(), &cps);
    assert_eq!(
        serde_json::to_value(&refs).unwrap(),
        json!([{"name": "kong", "namespace": "gateway"}])
    );
}
