//! # Custom Resource Definitions
//!
//! CRD types reconciled by the operator: the `ControlPlane`, `DataPlane`, and
//! `KonnectExtension` parents, the `WatchNamespaceGrant` authorization object, and
//! the read-only `KonnectGatewayControlPlane`.

mod common;
mod controlplane;
mod dataplane;
mod grant;
mod konnect;
pub mod status;

pub use common::*;
pub use controlplane::*;
pub use dataplane::*;
pub use grant::*;
pub use konnect::*;
pub use status::{
    condition_reason, condition_type, find_condition, is_condition_true, remove_condition,
    set_condition, Condition, ConditionStatus, NamespacedRef, SecretRef,
};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// All CRDs served by the operator, in installation order
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        ControlPlane::crd(),
        DataPlane::crd(),
        WatchNamespaceGrant::crd(),
        KonnectExtension::crd(),
        KonnectGatewayControlPlane::crd(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crd_names() {
        let names: Vec<_> = all_crds()
            .into_iter()
            .filter_map(|crd| crd.metadata.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "controlplanes.gateway-operator.konghq.com",
                "dataplanes.gateway-operator.konghq.com",
                "watchnamespacegrants.gateway-operator.konghq.com",
                "konnectextensions.konnect.konghq.com",
                "konnectgatewaycontrolplanes.konnect.konghq.com",
            ]
        );
    }
}
