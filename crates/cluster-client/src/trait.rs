//! ClusterClient trait for mocking
//!
//! The engine never builds a `kube::Api` directly. Every read and write goes
//! through this trait so that reconciliation passes can run against the
//! in-memory store in unit tests.

use crate::error::ClientError;
use kube::api::{DynamicObject, GroupVersionKind};

/// Object store operations used by the reconcilers
///
/// `namespace` is `None` for cluster-scoped kinds. For `create`, `update` and
/// `update_status` the object coordinates are taken from the object metadata.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClientError>;

    /// List objects, optionally filtered by a `k=v,k2` style label selector
    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ClientError>;

    async fn create(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError>;

    /// Replace the object; the status subresource is left untouched
    async fn update(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError>;

    /// Replace only the status subresource
    async fn update_status(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError>;

    /// Delete an object. Returns false when it was already gone.
    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, ClientError>;

    /// Whether the API server serves the kind
    async fn has_api(&self, gvk: &GroupVersionKind) -> Result<bool, ClientError>;
}
