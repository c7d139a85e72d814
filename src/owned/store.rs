//! # Child Store
//!
//! The narrow read/write surface the ownership engine needs from the API server.
//! [`KubeStore`] is the production implementation; tests use an in-memory store.

use super::kind::ChildKind;
use crate::constants::FIELD_MANAGER;
use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;

/// Errors from child store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The object changed since it was read (optimistic concurrency)
    #[error("conflict: {0}")]
    Conflict(String),
    /// An object with that name already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("object has no name")]
    Unnamed,
    #[error("Kubernetes API error: {0}")]
    Kube(kube::Error),
}

impl From<kube::Error> for StoreError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(response)
                if response.code == 409 && response.reason == "AlreadyExists" =>
            {
                Self::AlreadyExists(response.message)
            }
            kube::Error::Api(response) if response.code == 409 => Self::Conflict(response.message),
            kube::Error::Api(response) if response.code == 404 => Self::NotFound(response.message),
            other => Self::Kube(other),
        }
    }
}

impl StoreError {
    /// Conflicts resolve themselves on the next pass
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::AlreadyExists(_))
    }
}

/// Read/write access to one kind of child object
#[async_trait]
pub trait ChildStore<K: ChildKind>: Send + Sync {
    /// List objects carrying every label in `selector`. `None` lists cluster-wide.
    async fn list(
        &self,
        namespace: Option<&str>,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<K>, StoreError>;

    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>, StoreError>;

    /// Create the object; `generateName` is resolved by the server
    async fn create(&self, obj: &K) -> Result<K, StoreError>;

    /// Replace the object, failing with [`StoreError::Conflict`] on a stale resourceVersion
    async fn replace(&self, obj: &K) -> Result<K, StoreError>;

    /// Delete the object; an already deleted object is not an error
    async fn delete(&self, obj: &K) -> Result<(), StoreError>;
}

/// Render a label map as a selector string
pub fn label_selector(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// [`ChildStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PostParams::default()
        }
    }
}

#[async_trait]
impl<K: ChildKind> ChildStore<K> for KubeStore {
    async fn list(
        &self,
        namespace: Option<&str>,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<K>, StoreError> {
        let api = K::api(self.client.clone(), namespace);
        let params = ListParams::default().labels(&label_selector(selector));
        Ok(api.list(&params).await?.items)
    }

    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>, StoreError> {
        let api = K::api(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let api = K::api(self.client.clone(), obj.namespace().as_deref());
        Ok(api.create(&Self::post_params(), obj).await?)
    }

    async fn replace(&self, obj: &K) -> Result<K, StoreError> {
        let name = obj.meta().name.clone().ok_or(StoreError::Unnamed)?;
        let api = K::api(self.client.clone(), obj.namespace().as_deref());
        Ok(api.replace(&name, &Self::post_params(), obj).await?)
    }

    async fn delete(&self, obj: &K) -> Result<(), StoreError> {
        let name = obj.meta().name.clone().ok_or(StoreError::Unnamed)?;
        let api = K::api(self.client.clone(), obj.namespace().as_deref());
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_selector_is_sorted() {
        let selector = BTreeMap::from([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]);
        assert_eq!(label_selector(&selector), "a=1,b=2");
    }
}
