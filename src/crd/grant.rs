//! # WatchNamespaceGrant
//!
//! Authorizes ControlPlanes from other namespaces to watch the grant's namespace.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// WatchNamespaceGrant Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: gateway-operator.konghq.com/v1alpha1
/// kind: WatchNamespaceGrant
/// metadata:
///   name: allow-kong
///   namespace: team-a
/// spec:
///   from:
///     - group: gateway-operator.konghq.com
///       kind: ControlPlane
///       namespace: kong
/// ```
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "WatchNamespaceGrant",
    group = "gateway-operator.konghq.com",
    version = "v1alpha1",
    namespaced,
    shortname = "kownsg"
)]
#[serde(rename_all = "camelCase")]
pub struct WatchNamespaceGrantSpec {
    /// Objects allowed to watch this namespace
    pub from: Vec<WatchNamespaceGrantFrom>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WatchNamespaceGrantFrom {
    pub group: String,
    pub kind: String,
    pub namespace: String,
}
