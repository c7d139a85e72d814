//! # Manifest Generator
//!
//! Pure functions from a parent spec (plus ancillary inputs such as the service
//! account name, certificate secret names, and the validated watch namespaces) to
//! the desired child objects. Nothing here talks to the cluster.
//!
//! Every generated child carries the owner's label set and, when it lives in the
//! parent's namespace, an owner reference.

pub mod compare;
mod deployment;
mod image;
mod rbac;
mod service;
mod webhook;

pub use deployment::{
    generate_control_plane_deployment, generate_data_plane_deployment, ControlPlaneDeploymentInputs,
};
pub use image::{resolve_image, validate_control_plane_image};
pub use rbac::{
    control_plane_cluster_role_template, generate_cluster_role, generate_cluster_role_binding,
    generate_role, generate_role_binding, generate_service_account,
};
pub use service::{
    generate_admin_service, generate_ingress_service, generate_webhook_service,
};
pub use webhook::generate_validating_webhook_configuration;

use crate::owned::OwnerIdentity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// Errors from manifest generation
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GenerateError {
    /// The parent spec cannot be turned into a valid child
    #[error("{0}")]
    InvalidSpec(String),

    /// A container the generator relies on is missing from the template
    #[error("{0} container not found")]
    ContainerNotFound(&'static str),

    /// The certificate secret has no CA bundle
    #[error("ca.crt not found in secret")]
    CaBundleMissing,
}

/// Label key selecting a parent's pods
pub const APP_LABEL: &str = "app";

/// Pod selector labels of a parent's workload
pub fn selector_labels(owner: &OwnerIdentity) -> BTreeMap<String, String> {
    BTreeMap::from([(
        APP_LABEL.to_string(),
        format!("{}-{}", owner.managed_by, owner.name),
    )])
}

/// Metadata for a child in `namespace` (`None` for cluster-scoped kinds)
/// whose name the server generates from the owner's prefix.
pub(crate) fn child_meta(
    owner: &OwnerIdentity,
    namespace: Option<&str>,
    suffix: &str,
) -> ObjectMeta {
    ObjectMeta {
        generate_name: Some(format!("{}{suffix}", owner.generate_name())),
        namespace: namespace.map(str::to_string),
        ..ObjectMeta::default()
    }
}

/// Add one label to the child's metadata
pub(crate) fn with_label(mut meta: ObjectMeta, key: &str, value: &str) -> ObjectMeta {
    meta.labels
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
    meta
}
