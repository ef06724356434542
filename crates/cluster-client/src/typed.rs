//! Typed helpers over the dynamic client
//!
//! Core kinds are built with `k8s-openapi` structs and crossed into
//! `DynamicObject` through serde, so the store only ever sees one shape.

use crate::cluster_trait::ClusterClient;
use crate::error::ClientError;
use kube::api::{DynamicObject, GroupVersionKind};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// GroupVersionKind of a statically typed resource
pub fn gvk_of<K>() -> GroupVersionKind
where
    K: Resource<DynamicType = ()>,
{
    GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()))
}

pub fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject, ClientError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

pub fn from_dynamic<K: DeserializeOwned>(obj: &DynamicObject) -> Result<K, ClientError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// `apiVersion` string for a GroupVersionKind
pub fn api_version(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        gvk.version.clone()
    } else {
        format!("{}/{}", gvk.group, gvk.version)
    }
}

pub async fn get_typed<K>(
    client: &dyn ClusterClient,
    namespace: Option<&str>,
    name: &str,
) -> Result<Option<K>, ClientError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    match client.get(&gvk_of::<K>(), namespace, name).await? {
        Some(obj) => Ok(Some(from_dynamic(&obj)?)),
        None => Ok(None),
    }
}

pub async fn list_typed<K>(
    client: &dyn ClusterClient,
    namespace: Option<&str>,
    label_selector: Option<&str>,
) -> Result<Vec<K>, ClientError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    client
        .list(&gvk_of::<K>(), namespace, label_selector)
        .await?
        .iter()
        .map(from_dynamic)
        .collect()
}

pub async fn update_status_typed<K>(client: &dyn ClusterClient, obj: &K) -> Result<K, ClientError>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let updated = client.update_status(&gvk_of::<K>(), &to_dynamic(obj)?).await?;
    from_dynamic(&updated)
}

pub async fn update_typed<K>(client: &dyn ClusterClient, obj: &K) -> Result<K, ClientError>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let updated = client.update(&gvk_of::<K>(), &to_dynamic(obj)?).await?;
    from_dynamic(&updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    #[test]
    fn test_gvk_of_core_kind() {
        let gvk = gvk_of::<ConfigMap>();
        assert_eq!(gvk.group, "");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.kind, "ConfigMap");
        assert_eq!(api_version(&gvk), "v1");
    }

    #[test]
    fn test_dynamic_conversion_keeps_payload() {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("virtio-win".to_string()),
                namespace: Some("kubevirt-hyperconverged".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("virtio-win-image".to_string(), "img:1".to_string())])),
            ..Default::default()
        };
        let dynamic = to_dynamic(&cm).unwrap();
        assert_eq!(dynamic.metadata.name.as_deref(), Some("virtio-win"));
        assert_eq!(dynamic.data["data"]["virtio-win-image"], "img:1");
        assert_eq!(dynamic.types.as_ref().map(|t| t.kind.as_str()), Some("ConfigMap"));

        let back: ConfigMap = from_dynamic(&dynamic).unwrap();
        assert_eq!(back, cm);
    }
}
