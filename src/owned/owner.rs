//! # Owner identity
//!
//! Children point back at their parent through a label set rather than an
//! in-memory reference. The labels are enough to list exactly one parent's children
//! and to reconstruct the parent's namespace and name from a child.

use crate::constants::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

/// Identity of the parent owning a set of children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerIdentity {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub managed_by: &'static str,
}

/// Parent is missing metadata needed to own children
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{kind} {name} has no {field}; it cannot own resources yet")]
pub struct IncompleteOwner {
    pub kind: String,
    pub name: String,
    pub field: &'static str,
}

impl OwnerIdentity {
    /// Build the identity of a namespaced parent
    pub fn of<P>(parent: &P, managed_by: &'static str) -> Result<Self, IncompleteOwner>
    where
        P: Resource<DynamicType = ()>,
    {
        let kind = P::kind(&()).to_string();
        let name = parent.name_any();
        let missing = |field| IncompleteOwner {
            kind: kind.clone(),
            name: name.clone(),
            field,
        };
        let namespace = parent.namespace().ok_or_else(|| missing("namespace"))?;
        let uid = parent.uid().ok_or_else(|| missing("uid"))?;
        Ok(Self {
            api_version: P::api_version(&()).to_string(),
            kind,
            namespace,
            name,
            uid,
            managed_by,
        })
    }

    /// Labels that select exactly this owner's children
    pub fn selector(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (MANAGED_BY_LABEL.to_string(), self.managed_by.to_string()),
            (OWNER_UID_LABEL.to_string(), self.uid.clone()),
        ])
    }

    /// Full owner label set written on every child
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.selector();
        labels.insert(OWNER_KIND_LABEL.to_string(), self.kind.clone());
        labels.insert(OWNER_NAME_LABEL.to_string(), self.name.clone());
        labels.insert(OWNER_NAMESPACE_LABEL.to_string(), self.namespace.clone());
        labels
    }

    /// Controller owner reference, valid only for children in the parent's namespace
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// Write the owner labels on a child, plus an owner reference when the child
    /// lives in the parent's namespace
    pub fn mark<K: Resource>(&self, child: &mut K) {
        let same_namespace = child.meta().namespace.as_deref() == Some(self.namespace.as_str());
        let meta = child.meta_mut();
        meta.labels
            .get_or_insert_with(BTreeMap::new)
            .extend(self.labels());
        if same_namespace {
            let refs = meta.owner_references.get_or_insert_with(Vec::new);
            if !refs.iter().any(|r| r.uid == self.uid) {
                refs.push(self.owner_reference());
            }
        }
    }

    /// Base name for generated children, e.g. `controlplane-kong-`
    pub fn generate_name(&self) -> String {
        format!("{}-{}-", self.managed_by, self.name)
    }
}

/// Recover the owning parent's (namespace, name) of the given kind from a child's labels
pub fn owner_from_labels(
    labels: &BTreeMap<String, String>,
    kind: &str,
) -> Option<(String, String)> {
    if labels.get(OWNER_KIND_LABEL).map(String::as_str) != Some(kind) {
        return None;
    }
    let namespace = labels.get(OWNER_NAMESPACE_LABEL)?;
    let name = labels.get(OWNER_NAME_LABEL)?;
    Some((namespace.clone(), name.clone()))
}
