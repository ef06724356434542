//! kube-rs backed cluster client
//!
//! Resolves every GroupVersionKind through API discovery once and caches the
//! resulting `ApiResource` and scope, so dynamic objects of any kind can be
//! read and written without compile-time knowledge of the type.

use crate::cluster_trait::ClusterClient;
use crate::error::ClientError;
use kube::api::{Api, DeleteParams, DynamicObject, GroupVersionKind, ListParams, PostParams};
use kube::discovery::{ApiCapabilities, ApiResource, Scope};
use kube::Client;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Cluster client talking to a live API server
pub struct KubeClusterClient {
    client: Client,
    resources: RwLock<HashMap<String, (ApiResource, ApiCapabilities)>>,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

fn cache_key(gvk: &GroupVersionKind) -> String {
    format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
}

fn object_name(obj: &DynamicObject) -> Result<&str, ClientError> {
    obj.metadata
        .name
        .as_deref()
        .ok_or_else(|| ClientError::Api("object has no metadata.name".to_string()))
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: RwLock::new(HashMap::new()),
        }
    }

    /// Underlying kube client, used to build watchers
    pub fn kube_client(&self) -> Client {
        self.client.clone()
    }

    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, ApiCapabilities), ClientError> {
        let key = cache_key(gvk);
        if let Some(found) = self.resources.read().await.get(&key) {
            return Ok(found.clone());
        }

        debug!("Discovering API resource for {}", key);
        let resolved = match kube::discovery::pinned_kind(&self.client, gvk).await {
            Ok(resolved) => resolved,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                return Err(ClientError::NoKindMatch(key));
            }
            Err(kube::Error::Discovery(_)) => return Err(ClientError::NoKindMatch(key)),
            Err(e) => return Err(e.into()),
        };
        self.resources.write().await.insert(key, resolved.clone());
        Ok(resolved)
    }

    async fn api(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<Api<DynamicObject>, ClientError> {
        let (ar, caps) = self.resolve(gvk).await?;
        let api = match (&caps.scope, namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        };
        Ok(api)
    }
}

#[async_trait::async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClientError> {
        let api = self.api(gvk, namespace).await?;
        Ok(api.get_opt(name).await?)
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ClientError> {
        let api = self.api(gvk, namespace).await?;
        let mut lp = ListParams::default();
        if let Some(selector) = label_selector {
            lp = lp.labels(selector);
        }
        Ok(api.list(&lp).await?.items)
    }

    async fn create(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let api = self.api(gvk, obj.metadata.namespace.as_deref()).await?;
        Ok(api.create(&PostParams::default(), obj).await?)
    }

    async fn update(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let api = self.api(gvk, obj.metadata.namespace.as_deref()).await?;
        Ok(api.replace(object_name(obj)?, &PostParams::default(), obj).await?)
    }

    async fn update_status(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let api = self.api(gvk, obj.metadata.namespace.as_deref()).await?;
        let body = serde_json::to_vec(obj)?;
        Ok(api.replace_status(object_name(obj)?, &PostParams::default(), body).await?)
    }

    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, ClientError> {
        let api = self.api(gvk, namespace).await?;
        let dp = DeleteParams::background();
        match api.delete(name, &dp).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn has_api(&self, gvk: &GroupVersionKind) -> Result<bool, ClientError> {
        match self.resolve(gvk).await {
            Ok(_) => Ok(true),
            Err(ClientError::NoKindMatch(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
