//! # Konnect resources
//!
//! `KonnectExtension` binds DataPlanes and ControlPlanes to an externally hosted
//! Konnect control plane. `KonnectGatewayControlPlane` is the in-cluster handle of
//! that control plane; the operator only reads it.

use super::status::{Condition, NamespacedRef, SecretRef};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// KonnectExtension Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: konnect.konghq.com/v1alpha1
/// kind: KonnectExtension
/// metadata:
///   name: konnect
///   namespace: default
/// spec:
///   konnect:
///     controlPlane:
///       ref:
///         type: konnectNamespacedRef
///         konnectNamespacedRef:
///           name: gateway-cp
///   clientAuth:
///     certificateSecret:
///       provisioning: Automatic
/// ```
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "KonnectExtension",
    group = "konnect.konghq.com",
    version = "v1alpha1",
    namespaced,
    status = "KonnectExtensionStatus",
    shortname = "ke",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KonnectExtensionSpec {
    /// Konnect control plane to attach to
    pub konnect: KonnectExtensionKonnectSpec,
    /// Data plane client certificate configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_auth: Option<KonnectExtensionClientAuth>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KonnectExtensionKonnectSpec {
    pub control_plane: KonnectExtensionControlPlane,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KonnectExtensionControlPlane {
    pub r#ref: ControlPlaneRef,
}

/// Reference to a Konnect control plane, by object name or by Konnect ID
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneRef {
    pub r#type: ControlPlaneRefType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub konnect_namespaced_ref: Option<KonnectNamespacedRef>,
    #[serde(default, rename = "konnectID", skip_serializing_if = "Option::is_none")]
    pub konnect_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ControlPlaneRefType {
    #[default]
    #[serde(rename = "konnectNamespacedRef")]
    KonnectNamespacedRef,
    #[serde(rename = "konnectID")]
    KonnectId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KonnectNamespacedRef {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KonnectExtensionClientAuth {
    pub certificate_secret: CertificateSecret,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSecret {
    /// Manual: use `certificateSecretRef`. Automatic: the operator issues the certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning: Option<ProvisioningMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_secret_ref: Option<SecretRef>,
}

/// How a certificate secret is provisioned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ProvisioningMode {
    Manual,
    #[default]
    Automatic,
}

/// Konnect cluster type of the attached control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum KonnectExtensionClusterType {
    ControlPlane,
    K8sIngressController,
}

/// Status of the KonnectExtension resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KonnectExtensionStatus {
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// DataPlanes the extension is applied to, sorted by namespace/name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_plane_refs: Vec<NamespacedRef>,
    /// ControlPlanes the extension is applied to, sorted by namespace/name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub control_plane_refs: Vec<NamespacedRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_plane_client_auth: Option<DataPlaneClientAuthStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub konnect: Option<KonnectControlPlaneStatus>,
    /// Observed generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataPlaneClientAuthStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_secret_ref: Option<SecretRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KonnectControlPlaneStatus {
    #[serde(default, rename = "controlPlaneID", skip_serializing_if = "Option::is_none")]
    pub control_plane_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_type: Option<KonnectExtensionClusterType>,
}

impl KonnectExtension {
    pub fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }

    /// Provisioning mode of the client certificate, Automatic when unset
    pub fn provisioning_mode(&self) -> ProvisioningMode {
        self.spec
            .client_auth
            .as_ref()
            .and_then(|auth| auth.certificate_secret.provisioning)
            .unwrap_or_default()
    }
}

/// KonnectGatewayControlPlane Custom Resource Definition (read-only for this operator)
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "KonnectGatewayControlPlane",
    group = "konnect.konghq.com",
    version = "v1alpha1",
    namespaced,
    status = "KonnectGatewayControlPlaneStatus",
    shortname = "kgcp"
)]
#[serde(rename_all = "camelCase")]
pub struct KonnectGatewayControlPlaneSpec {
    /// Display name in Konnect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Konnect cluster type, e.g. CLUSTER_TYPE_CONTROL_PLANE
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KonnectGatewayControlPlaneStatus {
    /// Konnect ID of the control plane
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl KonnectGatewayControlPlane {
    pub fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }

    pub fn konnect_id(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.id.as_deref())
    }
}
