//! Perses dashboards and datasource
//!
//! The objects are parsed from the embedded manifests once at startup and
//! kept in a [`PersesStore`]. The reconciler runs outside the
//! HyperConverged pass: a startup request syncs everything, and a watch
//! event on one managed object syncs only that object.

use crate::error::ControllerError;
use crate::kinds;
use crate::operands::generic::new_object;
use crate::operands::labels::{self, AppComponent};
use crate::sync::sync_object;
use cluster_client::ClusterClient;
use crds::HYPERCONVERGED_NAME;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DynamicObject, GroupVersionKind};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

const DASHBOARDS: &[&str] = &[
    include_str!("../../resources/perses/dashboards/kubevirt-hco-overview.yaml"),
    include_str!("../../resources/perses/dashboards/kubevirt-vm-resources.yaml"),
];

const DATASOURCE: &str = include_str!("../../resources/perses/datasource-default.yaml");

const STARTUP_PREFIX: &str = "startup-";

/// Desired Perses objects, keyed by name
#[derive(Debug, Clone)]
pub struct PersesStore {
    dashboards: BTreeMap<String, DynamicObject>,
    datasource: DynamicObject,
}

fn parse(raw: &str, namespace: &str, version: &str) -> Result<DynamicObject, ControllerError> {
    let doc: Value = serde_yaml::from_str(raw)?;
    let name = doc
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .ok_or_else(|| ControllerError::InvalidConfig("embedded Perses object without a name".to_string()))?;
    let mut obj = new_object(serde_json::json!({"spec": doc.get("spec").cloned().unwrap_or(Value::Null)}));
    obj.metadata.name = Some(name.to_string());
    obj.metadata.namespace = Some(namespace.to_string());
    obj.metadata.labels = Some(labels::managed_labels(HYPERCONVERGED_NAME, version, AppComponent::Monitoring));
    Ok(obj)
}

impl PersesStore {
    pub fn load(namespace: &str, version: &str) -> Result<Self, ControllerError> {
        let mut dashboards = BTreeMap::new();
        for raw in DASHBOARDS {
            let dashboard = parse(raw, namespace, version)?;
            let name = dashboard.metadata.name.clone().unwrap_or_default();
            dashboards.insert(name, dashboard);
        }
        Ok(Self {
            dashboards,
            datasource: parse(DATASOURCE, namespace, version)?,
        })
    }

    pub fn dashboard_names(&self) -> impl Iterator<Item = &str> {
        self.dashboards.keys().map(String::as_str)
    }

    pub fn datasource_name(&self) -> &str {
        self.datasource.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn is_managed_dashboard(&self, name: &str) -> bool {
        self.dashboards.contains_key(name)
    }
}

pub struct PersesReconciler {
    client: Arc<dyn ClusterClient>,
    store: PersesStore,
    namespace: String,
    owner: Option<OwnerReference>,
    startup: String,
}

impl PersesReconciler {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        store: PersesStore,
        namespace: &str,
        owner: Option<OwnerReference>,
    ) -> Self {
        Self {
            client,
            store,
            namespace: namespace.to_string(),
            owner,
            startup: format!("{STARTUP_PREFIX}{}", uuid::Uuid::new_v4().simple()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name of the request that syncs every object
    pub fn startup_request(&self) -> &str {
        &self.startup
    }

    pub fn store(&self) -> &PersesStore {
        &self.store
    }

    pub async fn reconcile(&self, name: &str) -> Result<(), ControllerError> {
        if name == self.startup {
            return self.reconcile_all().await;
        }
        if let Some(dashboard) = self.store.dashboards.get(name) {
            return self.sync(&kinds::perses_dashboard(), dashboard).await;
        }
        if name == self.store.datasource_name() {
            return self.sync(&kinds::perses_datasource(), &self.store.datasource).await;
        }
        debug!("{} is not a managed Perses object; ignoring", name);
        Ok(())
    }

    /// Sync every object; all of them are attempted and the errors joined
    pub async fn reconcile_all(&self) -> Result<(), ControllerError> {
        let mut errors = Vec::new();
        for dashboard in self.store.dashboards.values() {
            if let Err(e) = self.sync(&kinds::perses_dashboard(), dashboard).await {
                warn!("Failed to reconcile PersesDashboard {:?}: {}", dashboard.metadata.name, e);
                errors.push(e.to_string());
            }
        }
        if let Err(e) = self.sync(&kinds::perses_datasource(), &self.store.datasource).await {
            warn!("Failed to reconcile PersesDatasource {}: {}", self.store.datasource_name(), e);
            errors.push(e.to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ControllerError::Watch(errors.join("; ")))
        }
    }

    async fn sync(&self, gvk: &GroupVersionKind, desired: &DynamicObject) -> Result<(), ControllerError> {
        sync_object(self.client.as_ref(), gvk, desired, self.owner.as_ref()).await?;
        Ok(())
    }
}
