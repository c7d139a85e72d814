//! # Change Detector Tests
//!
//! Fingerprints are computed over spec subtrees and compared against the
//! annotation recorded on a child.

use gateway_operator::constants::FINGERPRINT_ANNOTATION;
use gateway_operator::crd::{DeploymentOptions, IngressServiceOptions};
use gateway_operator::fingerprint::{fingerprint_matches, Fingerprint};
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use serde_json::json;

#[test]
fn test_fingerprint_is_hex_sha256() {
    let fingerprint = Fingerprint::of(&DeploymentOptions::default()).unwrap();
    assert_eq!(fingerprint.as_str().len(), 64);
    assert!(fingerprint.as_str().chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_replica_change_changes_fingerprint() {
    let one = DeploymentOptions {
        replicas: Some(1),
        ..DeploymentOptions::default()
    };
    let two = DeploymentOptions {
        replicas: Some(2),
        ..DeploymentOptions::default()
    };
    assert_ne!(Fingerprint::of(&one).unwrap(), Fingerprint::of(&two).unwrap());
}

#[test]
fn test_nested_key_order_is_irrelevant() {
    let a = json!({"ports": [{"name": "http", "port": 80}], "type": "LoadBalancer"});
    let b = json!({"type": "LoadBalancer", "ports": [{"port": 80, "name": "http"}]});
    assert_eq!(Fingerprint::of(&a).unwrap(), Fingerprint::of(&b).unwrap());
}

#[test]
fn test_array_order_is_relevant() {
    let a = json!(["team-a", "team-b"]);
    let b = json!(["team-b", "team-a"]);
    assert_ne!(Fingerprint::of(&a).unwrap(), Fingerprint::of(&b).unwrap());
}

#[test]
fn test_child_without_annotation_never_matches() {
    let deployment = Deployment::default();
    assert!(Fingerprint::recorded_on(&deployment).is_none());
    assert!(!fingerprint_matches(&deployment, &IngressServiceOptions::default()).unwrap());
}

#[test]
fn test_annotated_child_matches_its_inputs_only() {
    let options = IngressServiceOptions {
        r#type: Some("ClusterIP".to_string()),
        ..IngressServiceOptions::default()
    };
    let mut deployment = Deployment::default();
    Fingerprint::of(&options).unwrap().annotate(&mut deployment);

    assert!(deployment.annotations().contains_key(FINGERPRINT_ANNOTATION));
    assert!(fingerprint_matches(&deployment, &options).unwrap());
    assert!(!fingerprint_matches(&deployment, &IngressServiceOptions::default()).unwrap());
}
