//! Operator configuration
//!
//! Everything the engine needs from its environment is read once at
//! startup into an [`OperatorConfig`]. Nothing reads the environment after
//! that, which keeps reconciliation passes deterministic under test.

use crate::error::ControllerError;
use std::path::PathBuf;

/// Namespaces the operator may be deployed to besides `OPERATOR_NAMESPACE`
const ALLOWED_NAMESPACES: [&str; 4] = [
    "test-operators",
    "operators",
    "community-kubevirt-hyperconverged",
    "community-kubevirt-hyperconverged-target",
];

const DEFAULT_OPERATOR_NAME: &str = "hyperconverged-cluster-operator";
const DEFAULT_UPGRADE_PATCHES_PATH: &str = "./upgradePatches.json";
const DEFAULT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Whether the engine runs inside the cluster it manages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Cluster,
    /// Outside the cluster: pod and CSV lookups are skipped
    Local,
}

/// Version pins of the managed components
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentVersions {
    pub kubevirt: String,
    pub cdi: String,
    pub network_addons: String,
    pub ssp: String,
    pub aaq: String,
}

/// Images of the engine's own auxiliary workloads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageConfig {
    pub virtio_win: String,
    pub console_plugin: String,
    pub console_proxy: String,
    pub passt_binding_cni: String,
    pub wasp_agent: String,
}

#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub namespace: String,
    pub pod_name: Option<String>,
    pub operator_name: String,
    /// Set when the operator is installed by OLM
    pub operator_condition_name: Option<String>,
    /// Engine version recorded in `status.versions["operator"]`
    pub version: String,
    pub component_versions: ComponentVersions,
    pub images: ImageConfig,
    pub run_mode: RunMode,
    pub upgrade_patches_path: PathBuf,
    pub token_path: PathBuf,
    pub deployment_name: Option<String>,
    pub webhook_port: u16,
    pub metrics_port: u16,
    pub health_port: u16,
}

impl OperatorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let namespace = non_empty("OPERATOR_NAMESPACE").ok_or_else(|| {
            ControllerError::InvalidConfig("OPERATOR_NAMESPACE environment variable is required".to_string())
        })?;
        let version = non_empty("HCO_KV_IO_VERSION").ok_or_else(|| {
            ControllerError::InvalidConfig("HCO_KV_IO_VERSION environment variable is required".to_string())
        })?;

        let run_mode = match non_empty("RUN_MODE").as_deref() {
            Some("local") => RunMode::Local,
            _ => RunMode::Cluster,
        };

        let pod_name = non_empty("POD_NAME");
        if run_mode == RunMode::Cluster && pod_name.is_none() {
            return Err(ControllerError::InvalidConfig(
                "POD_NAME environment variable is required when running in the cluster".to_string(),
            ));
        }

        let port = |key: &str, default: u16| -> Result<u16, ControllerError> {
            match non_empty(key) {
                Some(v) => v
                    .parse()
                    .map_err(|_| ControllerError::InvalidConfig(format!("{key} must be a port number, got {v:?}"))),
                None => Ok(default),
            }
        };

        Ok(Self {
            namespace,
            pod_name,
            operator_name: non_empty("OPERATOR_NAME").unwrap_or_else(|| DEFAULT_OPERATOR_NAME.to_string()),
            operator_condition_name: non_empty("OPERATOR_CONDITION_NAME"),
            version,
            component_versions: ComponentVersions {
                kubevirt: lookup("KUBEVIRT_VERSION").unwrap_or_default(),
                cdi: lookup("CDI_VERSION").unwrap_or_default(),
                network_addons: lookup("NETWORK_ADDONS_VERSION").unwrap_or_default(),
                ssp: lookup("SSP_VERSION").unwrap_or_default(),
                aaq: lookup("AAQ_VERSION").unwrap_or_default(),
            },
            images: ImageConfig {
                virtio_win: lookup("VIRTIOWIN_CONTAINER").unwrap_or_default(),
                console_plugin: lookup("KV_CONSOLE_PLUGIN_IMAGE").unwrap_or_default(),
                console_proxy: lookup("KV_CONSOLE_PROXY_IMAGE").unwrap_or_default(),
                passt_binding_cni: lookup("PASST_BINDING_CNI_IMAGE").unwrap_or_default(),
                wasp_agent: lookup("WASP_AGENT_IMAGE").unwrap_or_default(),
            },
            run_mode,
            upgrade_patches_path: PathBuf::from(
                non_empty("UPGRADE_PATCHES_PATH").unwrap_or_else(|| DEFAULT_UPGRADE_PATCHES_PATH.to_string()),
            ),
            token_path: PathBuf::from(
                non_empty("KUBERNETES_SERVICE_TOKEN_PATH").unwrap_or_else(|| DEFAULT_TOKEN_PATH.to_string()),
            ),
            deployment_name: non_empty("DEPLOYMENT_NAME"),
            webhook_port: port("WEBHOOK_PORT", 4343)?,
            metrics_port: port("METRICS_PORT", 8443)?,
            health_port: port("HEALTH_PORT", 6060)?,
        })
    }

    /// OLM installs always carry an OperatorCondition name
    pub fn is_managed_by_olm(&self) -> bool {
        self.operator_condition_name.is_some()
    }

    /// Reject deployment to a namespace outside the allow-list
    pub fn check_namespace(&self, actual: &str) -> Result<(), ControllerError> {
        if actual == self.namespace || ALLOWED_NAMESPACES.contains(&actual) {
            return Ok(());
        }
        Err(ControllerError::InvalidConfig(format!(
            "the operator is running in namespace {actual:?}, which is neither {:?} nor one of {ALLOWED_NAMESPACES:?}",
            self.namespace
        )))
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> OperatorConfig {
    OperatorConfig {
        namespace: "kubevirt-hyperconverged".to_string(),
        pod_name: Some("hco-operator-7d9c8b6f5-abcde".to_string()),
        operator_name: DEFAULT_OPERATOR_NAME.to_string(),
        operator_condition_name: None,
        version: "1.14.0".to_string(),
        component_versions: ComponentVersions {
            kubevirt: "1.5.0".to_string(),
            cdi: "1.61.0".to_string(),
            network_addons: "0.98.0".to_string(),
            ssp: "0.23.0".to_string(),
            aaq: "1.4.0".to_string(),
        },
        images: ImageConfig {
            virtio_win: "quay.io/kubevirt/virtio-container-disk:v1.14.0".to_string(),
            console_plugin: "quay.io/kubevirt-ui/kubevirt-plugin:v1.14.0".to_string(),
            console_proxy: "quay.io/kubevirt-ui/kubevirt-apiserver-proxy:v1.14.0".to_string(),
            passt_binding_cni: "quay.io/kubevirt/network-passt-binding-cni:v1.14.0".to_string(),
            wasp_agent: "quay.io/openshift-virtualization/wasp-agent:v1.14.0".to_string(),
        },
        run_mode: RunMode::Local,
        upgrade_patches_path: PathBuf::from(DEFAULT_UPGRADE_PATCHES_PATH),
        token_path: PathBuf::from("/nonexistent/token"),
        deployment_name: Some("hco-operator".to_string()),
        webhook_port: 4343,
        metrics_port: 8443,
        health_port: 6060,
    }
}
