//! # RBAC Scope Partitioner
//!
//! Splits a permission template into the rules that can be granted per namespace
//! (a `Role` in every watched namespace) and the rules that need a `ClusterRole`.
//!
//! The scope of each resource comes from an API discovery snapshot. Resources the
//! snapshot does not know about are treated as cluster-scoped, so an incomplete
//! discovery over-grants rather than breaking the controller.

use async_trait::async_trait;
use k8s_openapi::api::rbac::v1::PolicyRule;
use kube::discovery::{Discovery, Scope};
use kube::Client;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Scope of one API resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
    Namespaced,
    Cluster,
}

/// Point-in-time snapshot of API group → resource → scope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryMapping {
    groups: BTreeMap<String, BTreeMap<String, ResourceScope>>,
    versions: BTreeMap<String, BTreeSet<String>>,
}

impl DiscoveryMapping {
    /// Record a resource served under `group/version`
    pub fn insert(&mut self, group: &str, version: &str, resource: &str, scope: ResourceScope) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(resource.to_string(), scope);
        self.versions
            .entry(group.to_string())
            .or_default()
            .insert(version.to_string());
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(
        mut self,
        group: &str,
        version: &str,
        resource: &str,
        scope: ResourceScope,
    ) -> Self {
        self.insert(group, version, resource, scope);
        self
    }

    /// Scope of a resource; subresources (`ingresses/status`) take the scope of
    /// their parent resource
    pub fn scope(&self, group: &str, resource: &str) -> Option<ResourceScope> {
        let base = resource.split('/').next().unwrap_or(resource);
        self.groups.get(group)?.get(base).copied()
    }

    /// Versions served for a group
    pub fn versions(&self, group: &str) -> impl Iterator<Item = &str> {
        self.versions
            .get(group)
            .into_iter()
            .flat_map(|v| v.iter().map(String::as_str))
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Build a snapshot from a completed kube discovery run
    pub fn from_discovery(discovery: &Discovery) -> Self {
        let mut mapping = Self::default();
        for group in discovery.groups() {
            for (resource, caps) in group.recommended_resources() {
                let scope = match caps.scope {
                    Scope::Namespaced => ResourceScope::Namespaced,
                    Scope::Cluster => ResourceScope::Cluster,
                };
                mapping.insert(&resource.group, &resource.version, &resource.plural, scope);
            }
        }
        mapping
    }
}

/// Result of partitioning a rule set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    /// Rules for a `Role` in each watched namespace
    pub namespaced: Vec<PolicyRule>,
    /// Rules for the single `ClusterRole`
    pub cluster: Vec<PolicyRule>,
}

/// Split `rules` by resource scope.
///
/// Every (group, resource) pair of every rule ends up in exactly one of the two
/// sets as a single-resource copy of its rule. Rules without resources
/// (non-resource URLs) go to the cluster set unchanged.
pub fn partition_rules(rules: &[PolicyRule], mapping: &DiscoveryMapping) -> Partition {
    let mut partition = Partition::default();
    for rule in rules {
        let groups = rule.api_groups.as_deref().unwrap_or_default();
        let resources = rule.resources.as_deref().unwrap_or_default();
        if groups.is_empty() || resources.is_empty() {
            partition.cluster.push(rule.clone());
            continue;
        }
        for group in groups {
            for resource in resources {
                let single = PolicyRule {
                    api_groups: Some(vec![group.clone()]),
                    resources: Some(vec![resource.clone()]),
                    ..rule.clone()
                };
                match mapping.scope(group, resource) {
                    Some(ResourceScope::Namespaced) => partition.namespaced.push(single),
                    Some(ResourceScope::Cluster) => partition.cluster.push(single),
                    None => {
                        debug!(
                            %group,
                            %resource,
                            "Resource not in discovery, granting cluster-wide"
                        );
                        partition.cluster.push(single);
                    }
                }
            }
        }
    }
    partition
}

/// Discovery errors
#[derive(Debug, thiserror::Error)]
#[error("API discovery failed: {0}")]
pub struct DiscoveryError(#[from] pub kube::Error);

/// Source of discovery snapshots
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    async fn snapshot(&self) -> Result<Arc<DiscoveryMapping>, DiscoveryError>;
}

/// Fixed snapshot, for tests and offline rendering
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery(pub Arc<DiscoveryMapping>);

impl StaticDiscovery {
    pub fn new(mapping: DiscoveryMapping) -> Self {
        Self(Arc::new(mapping))
    }
}

#[async_trait]
impl DiscoverySource for StaticDiscovery {
    async fn snapshot(&self) -> Result<Arc<DiscoveryMapping>, DiscoveryError> {
        Ok(Arc::clone(&self.0))
    }
}

/// Live discovery, re-run once the cached snapshot is older than `ttl`
pub struct CachedDiscovery {
    client: Client,
    ttl: Duration,
    cached: Mutex<Option<(Instant, Arc<DiscoveryMapping>)>>,
}

impl CachedDiscovery {
    pub fn new(client: Client, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            cached: Mutex::new(None),
        }
    }
}

impl std::fmt::Debug for CachedDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedDiscovery")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DiscoverySource for CachedDiscovery {
    async fn snapshot(&self) -> Result<Arc<DiscoveryMapping>, DiscoveryError> {
        let mut cached = self.cached.lock().await;
        if let Some((taken, mapping)) = cached.as_ref() {
            if taken.elapsed() < self.ttl {
                return Ok(Arc::clone(mapping));
            }
        }
        let discovery = Discovery::new(self.client.clone()).run().await?;
        let mapping = Arc::new(DiscoveryMapping::from_discovery(&discovery));
        info!(groups = mapping.groups.len(), "Refreshed API discovery snapshot");
        *cached = Some((Instant::now(), Arc::clone(&mapping)));
        Ok(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(group: &str, resources: &[&str]) -> PolicyRule {
        PolicyRule {
            api_groups: Some(vec![group.to_string()]),
            resources: Some(resources.iter().map(|r| (*r).to_string()).collect()),
            verbs: vec!["get".to_string()],
            ..PolicyRule::default()
        }
    }

    #[test]
    fn test_splits_by_scope() {
        let mapping = DiscoveryMapping::default()
            .with("", "v1", "services", ResourceScope::Namespaced)
            .with("", "v1", "nodes", ResourceScope::Cluster);
        let p = partition_rules(&[rule("", &["services", "nodes"])], &mapping);
        assert_eq!(p.namespaced, vec![rule("", &["services"])]);
        assert_eq!(p.cluster, vec![rule("", &["nodes"])]);
    }

    #[test]
    fn test_unknown_resource_is_cluster_scoped() {
        let p = partition_rules(&[rule("example.com", &["widgets"])], &DiscoveryMapping::default());
        assert!(p.namespaced.is_empty());
        assert_eq!(p.cluster, vec![rule("example.com", &["widgets"])]);
    }

    #[test]
    fn test_subresource_follows_parent() {
        let mapping = DiscoveryMapping::default().with(
            "networking.k8s.io",
            "v1",
            "ingresses",
            ResourceScope::Namespaced,
        );
        let p = partition_rules(&[rule("networking.k8s.io", &["ingresses/status"])], &mapping);
        assert_eq!(p.namespaced.len(), 1);
        assert!(p.cluster.is_empty());
    }

    #[test]
    fn test_non_resource_rule_kept_whole() {
        let metrics = PolicyRule {
            non_resource_urls: Some(vec!["/metrics".to_string()]),
            verbs: vec!["get".to_string()],
            ..PolicyRule::default()
        };
        let p = partition_rules(std::slice::from_ref(&metrics), &DiscoveryMapping::default());
        assert_eq!(p.cluster, vec![metrics]);
    }

    #[tokio::test]
    async fn test_static_discovery_returns_snapshot() {
        let source = StaticDiscovery::new(DiscoveryMapping::default().with(
            "apps",
            "v1",
            "deployments",
            ResourceScope::Namespaced,
        ));
        let snapshot = source.snapshot().await.unwrap();
        assert_eq!(
            snapshot.scope("apps", "deployments"),
            Some(ResourceScope::Namespaced)
        );
        assert_eq!(snapshot.versions("apps").collect::<Vec<_>>(), vec!["v1"]);
    }
}
