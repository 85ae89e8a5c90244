//! Platform client seam
//!
//! The reconciliation core only needs get/create/update/list against the
//! Kubernetes API. Keeping those behind a trait lets the generic reconciler
//! and the fleet tracker run against the real API server in production and
//! against a mockall mock in tests.

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use kube::api::{Api, ListParams, PostParams};
use kube::core::NamespaceResourceScope;
use kube::{Client, Resource, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Bound shared by every namespaced resource the operator manages.
pub trait ManagedResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> ManagedResource for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Operations the reconciliation core performs against the platform.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Fetch a resource. A missing resource is `Ok(None)`, not an error.
    async fn get<K: ManagedResource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, kube::Error>;

    /// Create a resource, returning it with server-assigned fields populated.
    async fn create<K: ManagedResource>(&self, obj: &K) -> Result<K, kube::Error>;

    /// Replace a resource. The object's resourceVersion is checked by the
    /// server, so a stale write fails with HTTP 409.
    async fn update<K: ManagedResource>(&self, obj: &K) -> Result<K, kube::Error>;

    /// List resources in a namespace carrying every given label.
    async fn list<K: ManagedResource>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>, kube::Error>;
}

/// `PlatformClient` backed by a live `kube::Client`
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: ManagedResource>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Render a label map as an equality-based selector string
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl PlatformClient for KubeClient {
    async fn get<K: ManagedResource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, kube::Error> {
        self.api::<K>(namespace).get_opt(name).await
    }

    async fn create<K: ManagedResource>(&self, obj: &K) -> Result<K, kube::Error> {
        let namespace = obj.namespace().unwrap_or_default();
        self.api::<K>(&namespace)
            .create(&PostParams::default(), obj)
            .await
    }

    async fn update<K: ManagedResource>(&self, obj: &K) -> Result<K, kube::Error> {
        let namespace = obj.namespace().unwrap_or_default();
        self.api::<K>(&namespace)
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await
    }

    async fn list<K: ManagedResource>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>, kube::Error> {
        let params = ListParams::default().labels(&label_selector(labels));
        Ok(self.api::<K>(namespace).list(&params).await?.items)
    }
}
