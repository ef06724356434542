//! The operator's own Pod, Deployment and CSV
//!
//! Resolved once at startup by walking the controller owner references
//! Pod -> ReplicaSet -> Deployment, then the Deployment owner references to
//! the ClusterServiceVersion. Monitoring assets and the admission policy are
//! owned by the Deployment found here.

use crate::config::{OperatorConfig, RunMode};
use crate::error::ControllerError;
use crate::kinds;
use cluster_client::{api_version, get_typed, ClusterClient};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{ObjectReference, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use tracing::{info, warn};

/// Deployment name used when running outside the cluster
const LOCAL_DEPLOYMENT_NAME: &str = "hyperconverged-cluster-operator";

#[derive(Debug, Clone, Default)]
pub struct OwnResources {
    pod: Option<Pod>,
    deployment: Option<Deployment>,
    csv: Option<ObjectReference>,
}

fn controller_of(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller == Some(true))
}

impl OwnResources {
    /// Walk the owner chain. API errors abort; missing links only log.
    pub async fn resolve(client: &dyn ClusterClient, config: &OperatorConfig) -> Result<Self, ControllerError> {
        let ns = config.namespace.as_str();

        if config.run_mode == RunMode::Local {
            let name = config.deployment_name.as_deref().unwrap_or(LOCAL_DEPLOYMENT_NAME);
            let deployment = get_typed::<Deployment>(client, Some(ns), name).await?;
            if deployment.is_none() {
                warn!("Can't get deployment {}/{}", ns, name);
            }
            return Ok(Self {
                pod: None,
                deployment,
                csv: None,
            });
        }

        let pod_name = config
            .pod_name
            .as_deref()
            .ok_or_else(|| ControllerError::MissingOwner("POD_NAME is not set".to_string()))?;
        let Some(pod) = get_typed::<Pod>(client, Some(ns), pod_name).await? else {
            return Err(ControllerError::MissingOwner(format!("pod {ns}/{pod_name} not found")));
        };
        info!("Found Pod {}/{}", ns, pod_name);

        let deployment = Self::deployment_of(client, ns, &pod).await?;
        let csv = match &deployment {
            Some(d) => Self::csv_of(client, d).await?,
            None => None,
        };

        Ok(Self {
            pod: Some(pod),
            deployment,
            csv,
        })
    }

    /// Known resources, for tests
    #[cfg(test)]
    pub fn with_deployment(deployment: Deployment) -> Self {
        Self {
            pod: None,
            deployment: Some(deployment),
            csv: None,
        }
    }

    /// Known resources with the owning CSV, for tests
    #[cfg(test)]
    pub fn with_csv(mut self, csv: ObjectReference) -> Self {
        self.csv = Some(csv);
        self
    }

    async fn deployment_of(
        client: &dyn ClusterClient,
        ns: &str,
        pod: &Pod,
    ) -> Result<Option<Deployment>, ControllerError> {
        let Some(rs_ref) = controller_of(&pod.metadata).filter(|r| r.kind == "ReplicaSet") else {
            warn!("Failed getting HCO replicaSet reference");
            return Ok(None);
        };
        let Some(rs) = get_typed::<ReplicaSet>(client, Some(ns), &rs_ref.name).await? else {
            warn!("Failed to get HCO ReplicaSet {}", rs_ref.name);
            return Ok(None);
        };
        let Some(d_ref) = controller_of(&rs.metadata).filter(|r| r.kind == "Deployment") else {
            warn!("Failed getting HCO deployment reference");
            return Ok(None);
        };
        let deployment = get_typed::<Deployment>(client, Some(ns), &d_ref.name).await?;
        if deployment.is_none() {
            warn!("Failed to get HCO Deployment {}", d_ref.name);
        }
        Ok(deployment)
    }

    async fn csv_of(client: &dyn ClusterClient, deployment: &Deployment) -> Result<Option<ObjectReference>, ControllerError> {
        let Some(csv_ref) = deployment
            .metadata
            .owner_references
            .as_ref()
            .and_then(|refs| refs.iter().find(|r| r.kind == "ClusterServiceVersion"))
        else {
            warn!(
                "Can't find CSV owner reference in deployment {:?}",
                deployment.metadata.name.as_deref().unwrap_or_default()
            );
            return Ok(None);
        };
        let gvk = kinds::cluster_service_version();
        let ns = deployment.metadata.namespace.as_deref();
        let Some(csv) = client.get(&gvk, ns, &csv_ref.name).await? else {
            warn!("Failed to get HCO CSV {}", csv_ref.name);
            return Ok(None);
        };
        Ok(Some(ObjectReference {
            api_version: Some(api_version(&gvk)),
            kind: Some(gvk.kind.clone()),
            name: csv.metadata.name.clone(),
            namespace: csv.metadata.namespace.clone(),
            uid: csv.metadata.uid.clone(),
            resource_version: csv.metadata.resource_version.clone(),
            ..Default::default()
        }))
    }

    pub fn pod(&self) -> Option<&Pod> {
        self.pod.as_ref()
    }

    pub fn deployment_name(&self) -> Option<&str> {
        self.deployment.as_ref()?.metadata.name.as_deref()
    }

    /// Non-controller owner reference to the operator Deployment
    pub fn deployment_ref(&self) -> Option<OwnerReference> {
        let deployment = self.deployment.as_ref()?;
        Some(OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
            name: deployment.metadata.name.clone()?,
            uid: deployment.metadata.uid.clone().unwrap_or_default(),
            block_owner_deletion: Some(false),
            controller: Some(false),
        })
    }

    pub fn csv_ref(&self) -> Option<&ObjectReference> {
        self.csv.as_ref()
    }
}
