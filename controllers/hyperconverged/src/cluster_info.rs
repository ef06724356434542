//! Cluster capability probe
//!
//! Answers the questions the operand set depends on: is this OpenShift,
//! is the operator installed by OLM, which optional CRDs are served. The
//! answers are cached and re-read by [`ClusterInfo::refresh`] at the start
//! of every pass.

use crate::config::{OperatorConfig, RunMode};
use crate::kinds;
use crate::tls_profile;
use cluster_client::{ClientError, ClusterClient};
use crds::TlsSecurityProfile;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Name of the OpenShift cluster configuration singletons
const CLUSTER_CONFIG_NAME: &str = "cluster";

const PROMETHEUS_RULE_CRD: &str = "prometheusrules.monitoring.coreos.com";
const SERVICE_MONITOR_CRD: &str = "servicemonitors.monitoring.coreos.com";
const DESCHEDULER_CRD: &str = "kubedeschedulers.operator.openshift.io";
const NAD_CRD: &str = "network-attachment-definitions.k8s.cni.cncf.io";
const PERSES_DASHBOARD_CRD: &str = "persesdashboards.perses.dev";
const PERSES_DATASOURCE_CRD: &str = "persesdatasources.perses.dev";

/// One consistent reading of the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub openshift: bool,
    pub managed_by_olm: bool,
    pub running_locally: bool,
    pub monitoring_available: bool,
    pub descheduler_available: bool,
    pub nad_available: bool,
    pub perses_available: bool,
    pub single_stack_ipv6: bool,
    pub base_domain: Option<String>,
    /// TLS profile of the OpenShift `APIServer` resource
    pub api_server_tls_profile: Option<TlsSecurityProfile>,
}

pub struct ClusterInfo {
    client: Arc<dyn ClusterClient>,
    managed_by_olm: bool,
    running_locally: bool,
    state: RwLock<Capabilities>,
}

impl std::fmt::Debug for ClusterInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterInfo")
            .field("managed_by_olm", &self.managed_by_olm)
            .field("running_locally", &self.running_locally)
            .finish_non_exhaustive()
    }
}

/// Treat an unserved kind like a missing object
async fn optional_get(
    client: &dyn ClusterClient,
    gvk: &kube::api::GroupVersionKind,
    name: &str,
) -> Result<Option<kube::api::DynamicObject>, ClientError> {
    match client.get(gvk, None, name).await {
        Err(e) if e.is_no_kind_match() || e.is_not_found() => Ok(None),
        other => other,
    }
}

impl ClusterInfo {
    /// Probe the cluster for the first time
    pub async fn init(client: Arc<dyn ClusterClient>, config: &OperatorConfig) -> Result<Self, ClientError> {
        let info = Self {
            client,
            managed_by_olm: config.is_managed_by_olm(),
            running_locally: config.run_mode == RunMode::Local,
            state: RwLock::new(Capabilities::default()),
        };
        info.refresh().await?;
        let caps = info.snapshot().await;
        if caps.openshift {
            info!("Cluster type = openshift");
        } else {
            info!("Cluster type = kubernetes");
        }
        info!(
            "Cluster capabilities: managed_by_olm={}, monitoring={}, descheduler={}, nad={}, perses={}, ipv6_single_stack={}",
            caps.managed_by_olm,
            caps.monitoring_available,
            caps.descheduler_available,
            caps.nad_available,
            caps.perses_available,
            caps.single_stack_ipv6
        );
        Ok(info)
    }

    /// Fixed capabilities, for tests
    #[cfg(test)]
    pub fn fixed(client: Arc<dyn ClusterClient>, caps: Capabilities) -> Self {
        Self {
            client,
            managed_by_olm: caps.managed_by_olm,
            running_locally: caps.running_locally,
            state: RwLock::new(caps),
        }
    }

    pub async fn snapshot(&self) -> Capabilities {
        self.state.read().await.clone()
    }

    /// Re-read every probe. Returns whether anything changed.
    pub async fn refresh(&self) -> Result<bool, ClientError> {
        let probed = self.probe().await?;
        let mut state = self.state.write().await;
        if *state == probed {
            return Ok(false);
        }
        debug!("Cluster capabilities changed: {:?}", probed);
        *state = probed;
        Ok(true)
    }

    async fn crd_exists(&self, name: &str) -> Result<bool, ClientError> {
        Ok(optional_get(self.client.as_ref(), &kinds::crd(), name).await?.is_some())
    }

    async fn probe(&self) -> Result<Capabilities, ClientError> {
        let client = self.client.as_ref();
        let openshift = optional_get(client, &kinds::cluster_version(), "version").await?.is_some();

        let mut caps = Capabilities {
            openshift,
            managed_by_olm: self.managed_by_olm,
            running_locally: self.running_locally,
            monitoring_available: self.crd_exists(PROMETHEUS_RULE_CRD).await? && self.crd_exists(SERVICE_MONITOR_CRD).await?,
            descheduler_available: self.crd_exists(DESCHEDULER_CRD).await?,
            nad_available: self.crd_exists(NAD_CRD).await?,
            perses_available: self.crd_exists(PERSES_DASHBOARD_CRD).await?
                && self.crd_exists(PERSES_DATASOURCE_CRD).await?,
            ..Default::default()
        };

        if openshift {
            if let Some(dns) = optional_get(client, &kinds::dns(), CLUSTER_CONFIG_NAME).await? {
                caps.base_domain = dns
                    .data
                    .pointer("/spec/baseDomain")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
            }
            if let Some(network) = optional_get(client, &kinds::cluster_network(), CLUSTER_CONFIG_NAME).await? {
                caps.single_stack_ipv6 = network
                    .data
                    .pointer("/status/clusterNetwork")
                    .and_then(|v| v.as_array())
                    .is_some_and(|nets| {
                        !nets.is_empty()
                            && nets
                                .iter()
                                .all(|n| n.get("cidr").and_then(|c| c.as_str()).is_some_and(|c| c.contains(':')))
                    });
            }
            if let Some(api_server) = optional_get(client, &kinds::api_server(), CLUSTER_CONFIG_NAME).await? {
                caps.api_server_tls_profile = tls_profile::from_api_server(&api_server.data);
            }
        }

        Ok(caps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use cluster_client::MockClusterClient;
    use kube::api::{DynamicObject, ObjectMeta};
    use serde_json::json;

    fn named(name: &str, data: serde_json::Value) -> DynamicObject {
        DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            data,
        }
    }

    #[tokio::test]
    async fn test_vanilla_cluster_has_no_optional_features() {
        let mock = MockClusterClient::new();
        let info = ClusterInfo::init(Arc::new(mock), &test_config()).await.unwrap();
        let caps = info.snapshot().await;
        assert!(!caps.openshift);
        assert!(!caps.monitoring_available);
        assert!(!caps.managed_by_olm);
        assert!(caps.running_locally);
    }

    #[tokio::test]
    async fn test_openshift_probes() {
        let mock = MockClusterClient::new();
        mock.insert(&kinds::cluster_version(), named("version", json!({})));
        mock.insert(&kinds::dns(), named("cluster", json!({"spec": {"baseDomain": "example.com"}})));
        mock.insert(
            &kinds::cluster_network(),
            named("cluster", json!({"status": {"clusterNetwork": [{"cidr": "fd01::/48"}]}})),
        );
        mock.insert(&kinds::crd(), named(PROMETHEUS_RULE_CRD, json!({})));
        mock.insert(&kinds::crd(), named(SERVICE_MONITOR_CRD, json!({})));

        let info = ClusterInfo::init(Arc::new(mock), &test_config()).await.unwrap();
        let caps = info.snapshot().await;
        assert!(caps.openshift);
        assert!(caps.monitoring_available);
        assert!(caps.single_stack_ipv6);
        assert_eq!(caps.base_domain.as_deref(), Some("example.com"));
        assert!(!caps.nad_available);
    }

    #[tokio::test]
    async fn test_refresh_reports_changes() {
        let mock = MockClusterClient::new();
        let info = ClusterInfo::init(Arc::new(mock.clone()), &test_config()).await.unwrap();
        assert!(!info.refresh().await.unwrap());

        mock.insert(&kinds::crd(), named(NAD_CRD, json!({})));
        assert!(info.refresh().await.unwrap());
        assert!(info.snapshot().await.nad_available);
    }

    #[tokio::test]
    async fn test_unserved_openshift_kinds_mean_vanilla() {
        let mock = MockClusterClient::new();
        mock.remove_api("config.openshift.io", "ClusterVersion");
        let info = ClusterInfo::init(Arc::new(mock), &test_config()).await.unwrap();
        assert!(!info.snapshot().await.openshift);
    }
}
