//! Create-or-heal for objects that live outside the HyperConverged pass
//!
//! The Perses and admission-policy reconcilers own fixed objects whose
//! desired state never depends on the HyperConverged spec. Drift is healed
//! by restoring `spec` and the managed labels; an owner reference is only
//! added when the object has none.

use crate::error::ControllerError;
use crate::operands::labels;
use cluster_client::ClusterClient;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DynamicObject, GroupVersionKind};
use tracing::info;

/// What [`sync_object`] did to the live object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
}

pub async fn sync_object(
    client: &dyn ClusterClient,
    gvk: &GroupVersionKind,
    desired: &DynamicObject,
    owner: Option<&OwnerReference>,
) -> Result<SyncOutcome, ControllerError> {
    let name = desired.metadata.name.as_deref().unwrap_or_default();
    let namespace = desired.metadata.namespace.as_deref();

    let Some(mut found) = client.get(gvk, namespace, name).await? else {
        info!("{} {} does not exist; creating it", gvk.kind, name);
        let mut obj = desired.clone();
        obj.metadata.owner_references = owner.map(|o| vec![o.clone()]);
        client.create(gvk, &obj).await?;
        return Ok(SyncOutcome::Created);
    };

    let mut modified = false;
    if let Some(spec) = desired.data.get("spec")
        && found.data.get("spec") != Some(spec)
        && let Some(map) = found.data.as_object_mut()
    {
        map.insert("spec".to_string(), spec.clone());
        modified = true;
    }
    if let Some(owner) = owner
        && found.metadata.owner_references.as_ref().is_none_or(Vec::is_empty)
    {
        found.metadata.owner_references = Some(vec![owner.clone()]);
        modified = true;
    }
    if let Some(managed) = desired.metadata.labels.as_ref()
        && !labels::contains_managed(managed, found.metadata.labels.as_ref())
    {
        found.metadata.labels = Some(labels::merge(managed, found.metadata.labels.as_ref()));
        modified = true;
    }

    if !modified {
        return Ok(SyncOutcome::Unchanged);
    }
    info!("{} {} was modified; updating it", gvk.kind, name);
    client.update(gvk, &found).await?;
    Ok(SyncOutcome::Updated)
}
