//! # DataPlane
//!
//! A gateway data plane: proxy deployment plus its ingress and admin services.

use super::common::{DeploymentOptions, ExtensionRef};
use super::status::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// DataPlane Custom Resource Definition
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "DataPlane",
    group = "gateway-operator.konghq.com",
    version = "v1beta1",
    namespaced,
    status = "DataPlaneStatus",
    shortname = "kodp",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}, {"name":"Service", "type":"string", "jsonPath":".status.service"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DataPlaneSpec {
    /// Proxy deployment options
    #[serde(default)]
    pub deployment: DeploymentOptions,
    /// Network options
    #[serde(default)]
    pub network: DataPlaneNetworkOptions,
    /// Extensions applied to this data plane
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<ExtensionRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataPlaneNetworkOptions {
    #[serde(default)]
    pub services: DataPlaneServices,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataPlaneServices {
    #[serde(default)]
    pub ingress: IngressServiceOptions,
}

/// Options for the proxy ingress service
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressServiceOptions {
    /// Service type; LoadBalancer when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    /// Exposed ports; HTTP and HTTPS proxy ports when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<DataPlaneServicePort>,
    /// Extra annotations for the service
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataPlaneServicePort {
    pub name: String,
    pub port: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<i32>,
}

/// Status of the DataPlane resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataPlaneStatus {
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Name of the ingress service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Desired replicas of the proxy deployment
    #[serde(default)]
    pub replicas: i32,
    /// Ready replicas of the proxy deployment
    #[serde(default)]
    pub ready_replicas: i32,
    /// All desired proxy replicas are ready
    #[serde(default)]
    pub ready: bool,
    /// Observed generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl DataPlane {
    pub fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }
}
