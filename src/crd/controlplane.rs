//! # ControlPlane
//!
//! A gateway control plane: a controller deployment with its RBAC, certificates,
//! and admission webhook, pointed at a companion DataPlane.

use super::common::{DeploymentOptions, ExtensionRef};
use super::status::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ControlPlane Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: gateway-operator.konghq.com/v1beta1
/// kind: ControlPlane
/// metadata:
///   name: kong
///   namespace: default
/// spec:
///   dataPlane: kong-dp
///   watchNamespaces:
///     type: List
///     list: [team-a]
///   deployment:
///     podTemplateSpec:
///       spec:
///         containers:
///           - name: controller
///             image: kong/kubernetes-ingress-controller:3.4.1
/// ```
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "ControlPlane",
    group = "gateway-operator.konghq.com",
    version = "v1beta1",
    namespaced,
    status = "ControlPlaneStatus",
    shortname = "kocp",
    printcolumn = r#"{"name":"DataPlane", "type":"string", "jsonPath":".spec.dataPlane"}, {"name":"Provisioned", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Provisioned\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneSpec {
    /// Name of the DataPlane this control plane configures.
    /// While unset the controller deployment is scaled to zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_plane: Option<String>,
    /// Controller deployment options
    #[serde(default)]
    pub deployment: DeploymentOptions,
    /// Namespaces the controller is allowed to watch
    #[serde(default = "default_watch_namespaces")]
    pub watch_namespaces: Option<WatchNamespaces>,
    /// Extensions applied to this control plane
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<ExtensionRef>,
}

#[allow(clippy::unnecessary_wraps, reason = "serde default for an optional field")]
fn default_watch_namespaces() -> Option<WatchNamespaces> {
    Some(WatchNamespaces::default())
}

/// Watch scope of the controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WatchNamespaces {
    /// All, Own, or List
    pub r#type: WatchNamespacesType,
    /// Namespaces to watch when the type is List
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub list: Vec<String>,
}

/// Watch scope mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum WatchNamespacesType {
    /// Every namespace, no grants required
    #[default]
    All,
    /// Only the control plane's own namespace
    Own,
    /// The listed namespaces, each authorized by a WatchNamespaceGrant
    List,
}

/// Status of the ControlPlane resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneStatus {
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Namespaces the controller was granted to watch
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub watch_namespaces: Vec<String>,
    /// Observed generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl ControlPlane {
    /// Whether a DataPlane is set
    pub fn data_plane_name(&self) -> Option<&str> {
        self.spec.data_plane.as_deref().filter(|name| !name.is_empty())
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }
}
