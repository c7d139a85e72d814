//! # Namespace Grant Validator Tests
//!
//! End-to-end validation of ControlPlane watch scopes against an in-memory
//! grant lookup.

use gateway_operator::constants::OPERATOR_GROUP;
use gateway_operator::crd::{
    ControlPlane, ControlPlaneSpec, WatchNamespaceGrant, WatchNamespaceGrantFrom,
    WatchNamespaceGrantSpec, WatchNamespaces, WatchNamespacesType,
};
use gateway_operator::grants::{validate_watch_namespaces, GrantError, StaticGrants};
use serde_json::json;

fn control_plane(list: &[&str]) -> ControlPlane {
    let mut cp = ControlPlane::new(
        "kong",
        ControlPlaneSpec {
            watch_namespaces: Some(WatchNamespaces {
                r#type: WatchNamespacesType::List,
                list: list.iter().map(|s| (*s).to_string()).collect(),
            }),
            ..ControlPlaneSpec::default()
        },
    );
    cp.metadata.namespace = Some("gateway".to_string());
    cp
}

fn from(group: &str, kind: &str, namespace: &str) -> WatchNamespaceGrantFrom {
    WatchNamespaceGrantFrom {
        group: group.to_string(),
        kind: kind.to_string(),
        namespace: namespace.to_string(),
    }
}

fn grant(namespace: &str, from: Vec<WatchNamespaceGrantFrom>) -> WatchNamespaceGrant {
    let mut grant = WatchNamespaceGrant::new("allow-gateway", WatchNamespaceGrantSpec { from });
    grant.metadata.namespace = Some(namespace.to_string());
    grant
}

#[tokio::test]
async fn test_granted_list_keeps_order_and_appends_own() {
    let mut grants = StaticGrants::default();
    grants.insert(grant("team-a", vec![from(OPERATOR_GROUP, "ControlPlane", "gateway")]));
    grants.insert(grant(
        "team-b",
        vec![
            from(OPERATOR_GROUP, "ControlPlane", "other"),
            from(OPERATOR_GROUP, "ControlPlane", "gateway"),
        ],
    ));

    let namespaces =
        validate_watch_namespaces(&control_plane(&["team-b", "team-a", "team-b"]), &grants)
            .await
            .unwrap();
    assert_eq!(namespaces, vec!["team-b", "team-a", "gateway"]);
}

#[tokio::test]
async fn test_first_missing_grant_is_reported() {
    let mut grants = StaticGrants::default();
    grants.insert(grant("team-a", vec![from(OPERATOR_GROUP, "ControlPlane", "gateway")]));

    let err = validate_watch_namespaces(&control_plane(&["team-a", "team-b", "team-c"]), &grants)
        .await
        .unwrap_err();
    assert_eq!(err.missing_namespace(), Some("team-b"));
    assert_eq!(
        err.to_string(),
        "WatchNamespaceGrant in Namespace team-b to ControlPlane in Namespace gateway not found"
    );
}

#[tokio::test]
async fn test_grant_for_wrong_kind_or_group_does_not_count() {
    let mut grants = StaticGrants::default();
    grants.insert(grant(
        "team-a",
        vec![
            from(OPERATOR_GROUP, "DataPlane", "gateway"),
            from("example.com", "ControlPlane", "gateway"),
        ],
    ));

    let err = validate_watch_namespaces(&control_plane(&["team-a"]), &grants)
        .await
        .unwrap_err();
    assert!(matches!(err, GrantError::GrantMissing { .. }));
}

#[tokio::test]
async fn test_own_namespace_in_list_needs_no_grant() {
    let namespaces =
        validate_watch_namespaces(&control_plane(&["gateway"]), &StaticGrants::default())
            .await
            .unwrap();
    assert_eq!(namespaces, vec!["gateway"]);
}

#[tokio::test]
async fn test_missing_watch_namespaces_means_all() {
    let mut cp = control_plane(&[]);
    cp.spec.watch_namespaces = None;
    let namespaces = validate_watch_namespaces(&cp, &StaticGrants::default())
        .await
        .unwrap();
    assert!(namespaces.is_empty());
}

#[test]
fn test_unknown_watch_type_rejected_at_deserialization() {
    let parsed = serde_json::from_value::<WatchNamespaces>(json!({"type": "Some"}));
    assert!(parsed.is_err());
    let parsed = serde_json::from_value::<WatchNamespaces>(json!({"type": "Own"})).unwrap();
    assert_eq!(parsed.r#type, WatchNamespacesType::Own);
}
