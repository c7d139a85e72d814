//! Read access to other parents and to Konnect control planes.
//!
//! Reconcile passes only read these objects; writes go through their own
//! controllers. [`StaticParents`] backs the flows in tests.

use super::ReconcilerError;
use crate::crd::{
    ControlPlane, DataPlane, KonnectExtension, KonnectExtensionClusterType,
    KonnectGatewayControlPlane,
};
use async_trait::async_trait;
use kube::api::ListParams;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// Konnect cluster type of a control plane created for a self-managed controller
pub const CLUSTER_TYPE_CONTROL_PLANE: &str = "CLUSTER_TYPE_CONTROL_PLANE";
/// Konnect cluster type of a control plane backed by an in-cluster ingress controller
pub const CLUSTER_TYPE_K8S_INGRESS_CONTROLLER: &str = "CLUSTER_TYPE_K8S_INGRESS_CONTROLLER";

/// Namespaced reads of the objects parents refer to
#[async_trait]
pub trait ParentLookup: Send + Sync {
    async fn data_plane(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DataPlane>, kube::Error>;

    async fn data_planes(&self, namespace: &str) -> Result<Vec<DataPlane>, kube::Error>;

    async fn control_planes(&self, namespace: &str) -> Result<Vec<ControlPlane>, kube::Error>;

    async fn konnect_extension(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KonnectExtension>, kube::Error>;

    async fn konnect_control_plane(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KonnectGatewayControlPlane>, kube::Error>;

    async fn konnect_control_planes(
        &self,
        namespace: &str,
    ) -> Result<Vec<KonnectGatewayControlPlane>, kube::Error>;
}

/// Lookups against the Kubernetes API
#[derive(Clone)]
pub struct KubeParents {
    client: Client,
}

impl KubeParents {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = kube::core::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl std::fmt::Debug for KubeParents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeParents").finish_non_exhaustive()
    }
}

async fn get<K>(api: Api<K>, name: &str) -> Result<Option<K>, kube::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.get_opt(name).await
}

async fn list<K>(api: Api<K>) -> Result<Vec<K>, kube::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    Ok(api.list(&ListParams::default()).await?.items)
}

#[async_trait]
impl ParentLookup for KubeParents {
    async fn data_plane(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DataPlane>, kube::Error> {
        get(self.api(namespace), name).await
    }

    async fn data_planes(&self, namespace: &str) -> Result<Vec<DataPlane>, kube::Error> {
        list(self.api(namespace)).await
    }

    async fn control_planes(&self, namespace: &str) -> Result<Vec<ControlPlane>, kube::Error> {
        list(self.api(namespace)).await
    }

    async fn konnect_extension(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KonnectExtension>, kube::Error> {
        get(self.api(namespace), name).await
    }

    async fn konnect_control_plane(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KonnectGatewayControlPlane>, kube::Error> {
        get(self.api(namespace), name).await
    }

    async fn konnect_control_planes(
        &self,
        namespace: &str,
    ) -> Result<Vec<KonnectGatewayControlPlane>, kube::Error> {
        list(self.api(namespace)).await
    }
}

/// Fixed object set
#[derive(Debug, Clone, Default)]
pub struct StaticParents {
    pub data_planes: Vec<DataPlane>,
    pub control_planes: Vec<ControlPlane>,
    pub konnect_extensions: Vec<KonnectExtension>,
    pub konnect_control_planes: Vec<KonnectGatewayControlPlane>,
}

fn in_namespace<K: Resource>(objects: &[K], namespace: &str) -> Vec<K>
where
    K: Clone,
{
    objects
        .iter()
        .filter(|o| o.meta().namespace.as_deref() == Some(namespace))
        .cloned()
        .collect()
}

fn named<K: Resource + Clone>(objects: &[K], namespace: &str, name: &str) -> Option<K> {
    in_namespace(objects, namespace)
        .into_iter()
        .find(|o| o.name_any() == name)
}

#[async_trait]
impl ParentLookup for StaticParents {
    async fn data_plane(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DataPlane>, kube::Error> {
        Ok(named(&self.data_planes, namespace, name))
    }

    async fn data_planes(&self, namespace: &str) -> Result<Vec<DataPlane>, kube::Error> {
        Ok(in_namespace(&self.data_planes, namespace))
    }

    async fn control_planes(&self, namespace: &str) -> Result<Vec<ControlPlane>, kube::Error> {
        Ok(in_namespace(&self.control_planes, namespace))
    }

    async fn konnect_extension(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KonnectExtension>, kube::Error> {
        Ok(named(&self.konnect_extensions, namespace, name))
    }

    async fn konnect_control_plane(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KonnectGatewayControlPlane>, kube::Error> {
        Ok(named(&self.konnect_control_planes, namespace, name))
    }

    async fn konnect_control_planes(
        &self,
        namespace: &str,
    ) -> Result<Vec<KonnectGatewayControlPlane>, kube::Error> {
        Ok(in_namespace(&self.konnect_control_planes, namespace))
    }
}

/// Maps a Konnect control plane to the cluster type recorded on extensions.
///
/// The default implementation reads the control plane's spec; a deployment
/// talking to the Konnect API can substitute a remote lookup.
#[async_trait]
pub trait ClusterTypeLookup: Send + Sync {
    async fn cluster_type(
        &self,
        control_plane: &KonnectGatewayControlPlane,
    ) -> Result<KonnectExtensionClusterType, ReconcilerError>;
}

/// Cluster type taken from `spec.clusterType`
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecClusterType;

/// Map a Konnect cluster type name; an unset type is a plain control plane
pub fn map_cluster_type(value: Option<&str>) -> Option<KonnectExtensionClusterType> {
    match value.unwrap_or_default() {
        "" | CLUSTER_TYPE_CONTROL_PLANE => Some(KonnectExtensionClusterType::ControlPlane),
        CLUSTER_TYPE_K8S_INGRESS_CONTROLLER => {
            Some(KonnectExtensionClusterType::K8sIngressController)
        }
        _ => None,
    }
}

#[async_trait]
impl ClusterTypeLookup for SpecClusterType {
    async fn cluster_type(
        &self,
        control_plane: &KonnectGatewayControlPlane,
    ) -> Result<KonnectExtensionClusterType, ReconcilerError> {
        let value = control_plane.spec.cluster_type.as_deref();
        map_cluster_type(value).ok_or_else(|| {
            ReconcilerError::InvalidInput(format!(
                "unsupported Konnect cluster type {} on {}",
                value.unwrap_or_default(),
                control_plane.name_any()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::DataPlaneSpec;

    #[test]
    fn test_map_cluster_type() {
        assert_eq!(map_cluster_type(None), Some(KonnectExtensionClusterType::ControlPlane));
        assert_eq!(
            map_cluster_type(Some(CLUSTER_TYPE_K8S_INGRESS_CONTROLLER)),
            Some(KonnectExtensionClusterType::K8sIngressController)
        );
        assert_eq!(map_cluster_type(Some("CLUSTER_TYPE_SERVERLESS")), None);
    }

    #[tokio::test]
    async fn test_static_parents_filter_by_namespace() {
        let mut dp = DataPlane::new("proxy", DataPlaneSpec::default());
        dp.metadata.namespace = Some("a".to_string());
        let parents = StaticParents {
            data_planes: vec![dp],
            ..StaticParents::default()
        };
        assert!(parents.data_plane("a", "proxy").await.unwrap().is_some());
        assert!(parents.data_plane("b", "proxy").await.unwrap().is_none());
        assert_eq!(parents.data_planes("a").await.unwrap().len(), 1);
    }
}
