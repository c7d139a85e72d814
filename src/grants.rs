//! # Namespace Grant Validator
//!
//! A ControlPlane may only watch namespaces other than its own when each of them
//! holds a `WatchNamespaceGrant` naming the ControlPlane's namespace.

use crate::constants::OPERATOR_GROUP;
use crate::crd::{ControlPlane, WatchNamespaceGrant, WatchNamespacesType};
use async_trait::async_trait;
use kube::api::ListParams;
use kube::{Api, Client, Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::debug;

/// Errors from watch namespace validation
#[derive(Debug, thiserror::Error)]
pub enum GrantError {
    #[error("spec.watchNamespaces cannot be empty")]
    EmptyWatchNamespaces,

    #[error("WatchNamespaceGrant in Namespace {namespace} to ControlPlane in Namespace {from_namespace} not found")]
    GrantMissing {
        namespace: String,
        from_namespace: String,
    },

    #[error("failed to list WatchNamespaceGrants: {0}")]
    Lookup(#[from] kube::Error),
}

impl GrantError {
    /// Namespace lacking a grant, if that is the failure
    pub fn missing_namespace(&self) -> Option<&str> {
        match self {
            Self::GrantMissing { namespace, .. } => Some(namespace),
            _ => None,
        }
    }
}

/// Source of grants by namespace
#[async_trait]
pub trait GrantLookup: Send + Sync {
    async fn grants_in(&self, namespace: &str) -> Result<Vec<WatchNamespaceGrant>, GrantError>;
}

/// Grants read from the cluster
#[derive(Clone)]
pub struct KubeGrantLookup {
    client: Client,
}

impl KubeGrantLookup {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl std::fmt::Debug for KubeGrantLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeGrantLookup").finish_non_exhaustive()
    }
}

#[async_trait]
impl GrantLookup for KubeGrantLookup {
    async fn grants_in(&self, namespace: &str) -> Result<Vec<WatchNamespaceGrant>, GrantError> {
        let api: Api<WatchNamespaceGrant> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }
}

/// Fixed set of grants keyed by namespace
#[derive(Debug, Clone, Default)]
pub struct StaticGrants {
    by_namespace: BTreeMap<String, Vec<WatchNamespaceGrant>>,
}

impl StaticGrants {
    /// Add a grant; it must carry a namespace
    pub fn insert(&mut self, grant: WatchNamespaceGrant) {
        let namespace = grant.namespace().unwrap_or_default();
        self.by_namespace.entry(namespace).or_default().push(grant);
    }
}

#[async_trait]
impl GrantLookup for StaticGrants {
    async fn grants_in(&self, namespace: &str) -> Result<Vec<WatchNamespaceGrant>, GrantError> {
        Ok(self.by_namespace.get(namespace).cloned().unwrap_or_default())
    }
}

fn grants_control_plane(grant: &WatchNamespaceGrant, from_namespace: &str) -> bool {
    let kind = ControlPlane::kind(&());
    grant
        .spec
        .from
        .iter()
        .any(|f| f.group == OPERATOR_GROUP && f.kind == kind && f.namespace == from_namespace)
}

/// Validate the ControlPlane's watch scope and return the effective namespaces.
///
/// An empty result means all namespaces. In `List` mode the ControlPlane's own
/// namespace is appended without needing a grant.
pub async fn validate_watch_namespaces<L>(
    cp: &ControlPlane,
    lookup: &L,
) -> Result<Vec<String>, GrantError>
where
    L: GrantLookup + ?Sized,
{
    let own = cp.namespace().unwrap_or_default();
    let Some(watch) = cp.spec.watch_namespaces.as_ref() else {
        return Ok(Vec::new());
    };

    match watch.r#type {
        WatchNamespacesType::All => Ok(Vec::new()),
        WatchNamespacesType::Own => Ok(vec![own]),
        WatchNamespacesType::List => {
            if watch.list.is_empty() {
                return Err(GrantError::EmptyWatchNamespaces);
            }
            let mut namespaces = Vec::with_capacity(watch.list.len() + 1);
            for namespace in &watch.list {
                if namespaces.contains(namespace) {
                    continue;
                }
                if *namespace != own {
                    let grants = lookup.grants_in(namespace).await?;
                    if !grants.iter().any(|g| grants_control_plane(g, &own)) {
                        return Err(GrantError::GrantMissing {
                            namespace: namespace.clone(),
                            from_namespace: own,
                        });
                    }
                    debug!(%namespace, "Watch namespace granted");
                }
                namespaces.push(namespace.clone());
            }
            if !namespaces.contains(&own) {
                namespaces.push(own);
            }
            Ok(namespaces)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        ControlPlaneSpec, WatchNamespaceGrantFrom, WatchNamespaceGrantSpec, WatchNamespaces,
    };

    fn control_plane(r#type: WatchNamespacesType, list: &[&str]) -> ControlPlane {
        let mut cp = ControlPlane::new(
            "kong",
            ControlPlaneSpec {
                watch_namespaces: Some(WatchNamespaces {
                    r#type,
                    list: list.iter().map(|s| (*s).to_string()).collect(),
                }),
                ..ControlPlaneSpec::default()
            },
        );
        cp.metadata.namespace = Some("gateway".to_string());
        cp
    }

    fn grant(namespace: &str, from_namespace: &str) -> WatchNamespaceGrant {
        let mut grant = WatchNamespaceGrant::new(
            "allow",
            WatchNamespaceGrantSpec {
                from: vec![WatchNamespaceGrantFrom {
                    group: OPERATOR_GROUP.to_string(),
                    kind: "ControlPlane".to_string(),
                    namespace: from_namespace.to_string(),
                }],
            },
        );
        grant.metadata.namespace = Some(namespace.to_string());
        grant
    }

    #[tokio::test]
    async fn test_all_needs_no_grants() {
        let cp = control_plane(WatchNamespacesType::All, &["ignored"]);
        let namespaces = validate_watch_namespaces(&cp, &StaticGrants::default())
            .await
            .unwrap();
        assert!(namespaces.is_empty());
    }

    #[tokio::test]
    async fn test_own_is_own_namespace() {
        let cp = control_plane(WatchNamespacesType::Own, &[]);
        let namespaces = validate_watch_namespaces(&cp, &StaticGrants::default())
            .await
            .unwrap();
        assert_eq!(namespaces, vec!["gateway"]);
    }

    #[tokio::test]
    async fn test_list_requires_grant_per_namespace() {
        let cp = control_plane(WatchNamespacesType::List, &["a", "b"]);
        let mut grants = StaticGrants::default();
        grants.insert(grant("a", "gateway"));
        let err = validate_watch_namespaces(&cp, &grants).await.unwrap_err();
        assert_eq!(err.missing_namespace(), Some("b"));
        assert_eq!(
            err.to_string(),
            "WatchNamespaceGrant in Namespace b to ControlPlane in Namespace gateway not found"
        );
    }

    #[tokio::test]
    async fn test_grant_for_other_namespace_does_not_count() {
        let cp = control_plane(WatchNamespacesType::List, &["a"]);
        let mut grants = StaticGrants::default();
        grants.insert(grant("a", "elsewhere"));
        assert!(validate_watch_namespaces(&cp, &grants).await.is_err());
    }

    #[tokio::test]
    async fn test_list_appends_own_namespace() {
        let cp = control_plane(WatchNamespacesType::List, &["a", "gateway"]);
        let mut grants = StaticGrants::default();
        grants.insert(grant("a", "gateway"));
        let namespaces = validate_watch_namespaces(&cp, &grants).await.unwrap();
        assert_eq!(namespaces, vec!["a", "gateway"]);
    }

    #[tokio::test]
    async fn test_empty_list_rejected() {
        let cp = control_plane(WatchNamespacesType::List, &[]);
        let err = validate_watch_namespaces(&cp, &StaticGrants::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GrantError::EmptyWatchNamespaces));
    }
}
