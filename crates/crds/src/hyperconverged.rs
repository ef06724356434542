//! HyperConverged CRD
//!
//! The single user-facing resource of the engine. It carries the desired
//! configuration of every sibling operator (virtualization, storage import,
//! network add-ons, templates, quota) and the aggregated status the engine
//! reports back.

use crate::data_import_cron::DataImportCronTemplate;
use crate::status::HyperConvergedStatus;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// API group of the HyperConverged resource
pub const HCO_GROUP: &str = "hco.kubevirt.io";

/// Served API version of the HyperConverged resource
pub const HCO_VERSION: &str = "v1beta1";

/// Name of the HyperConverged CRD
pub const HCO_CRD_NAME: &str = "hyperconvergeds.hco.kubevirt.io";

/// The only name a HyperConverged resource may have
pub const HYPERCONVERGED_NAME: &str = "kubevirt-hyperconverged";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "hco.kubevirt.io",
    version = "v1beta1",
    kind = "HyperConverged",
    plural = "hyperconvergeds",
    shortname = "hco",
    namespaced,
    status = "HyperConvergedStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedSpec {
    /// Feature toggles passed down to the operands
    #[serde(default)]
    pub feature_gates: HyperConvergedFeatureGates,

    /// Placement of infrastructure components (controllers, webhooks)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infra: Option<HyperConvergedConfig>,

    /// Placement of workload components (handlers, launchers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workloads: Option<HyperConvergedConfig>,

    /// Live migration tuning
    #[serde(default)]
    pub live_migration_config: LiveMigrationConfigurations,

    /// TLS profile applied to every operand that terminates TLS.
    /// When unset, the cluster-wide profile (or Intermediate) is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_security_profile: Option<TlsSecurityProfile>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub higher_workload_density: Option<HigherWorkloadDensityConfiguration>,

    /// Import the golden boot images of the common templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_common_boot_image_import: Option<bool>,

    /// Namespace of the imported golden images; each template may still name
    /// its own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_boot_image_namespace: Option<String>,

    /// Golden images on top of the common ones. A template named like a
    /// common one customises or disables it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_import_cron_templates: Vec<DataImportCronTemplate>,

    /// Namespace the common templates are deployed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_templates_namespace: Option<String>,

    /// Deploys the application aware quota operand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_application_aware_quota: Option<bool>,

    /// What the operands do with existing workloads on removal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uninstall_strategy: Option<UninstallStrategy>,

    /// Storage class used by CDI for scratch space
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_space_storage_class: Option<String>,

    /// VDDK init image passed to CDI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vddk_init_image: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedFeatureGates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downward_metrics: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_config: Option<bool>,

    #[serde(default, rename = "deployKubeSecondaryDNS", skip_serializing_if = "Option::is_none")]
    pub deploy_kube_secondary_dns: Option<bool>,

    #[serde(default, rename = "alignCPUs", skip_serializing_if = "Option::is_none")]
    pub align_cpus: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_reservation: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decentralized_live_migration: Option<bool>,
}

/// Placement block shared by `infra` and `workloads`
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_placement: Option<NodePlacement>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodePlacement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    /// Pod affinity, passed through verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toleration_seconds: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LiveMigrationConfigurations {
    /// Bandwidth limit of each migration (quantity string, e.g. "64Mi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_per_migration: Option<String>,

    #[serde(default, rename = "completionTimeoutPerGiB", skip_serializing_if = "Option::is_none")]
    pub completion_timeout_per_gib: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_migrations_per_cluster: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_outbound_migrations_per_node: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_timeout: Option<i64>,

    /// Name of the network attachment dedicated to migrations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_auto_converge: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_post_copy: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TlsSecurityProfile {
    #[serde(rename = "type")]
    pub profile_type: TlsProfileType,

    /// Only honoured with `type: Custom`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<CustomTlsProfile>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum TlsProfileType {
    Old,
    #[default]
    Intermediate,
    Modern,
    Custom,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CustomTlsProfile {
    #[serde(default)]
    pub ciphers: Vec<String>,

    #[serde(default, rename = "minTLSVersion", skip_serializing_if = "Option::is_none")]
    pub min_tls_version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HigherWorkloadDensityConfiguration {
    /// Memory overcommit applied to guests, in percent
    #[serde(default = "default_memory_overcommit")]
    pub memory_overcommit_percentage: i32,
}

fn default_memory_overcommit() -> i32 {
    100
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum UninstallStrategy {
    /// Refuse removal while workloads exist
    #[default]
    BlockUninstallIfWorkloadsExist,
    /// Remove workloads together with the operands
    RemoveWorkloads,
}

impl UninstallStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            UninstallStrategy::BlockUninstallIfWorkloadsExist => "BlockUninstallIfWorkloadsExist",
            UninstallStrategy::RemoveWorkloads => "RemoveWorkloads",
        }
    }
}

impl HyperConvergedSpec {
    /// Node placement of the infra block, if any
    pub fn infra_placement(&self) -> Option<&NodePlacement> {
        self.infra.as_ref().and_then(|c| c.node_placement.as_ref())
    }

    /// Node placement of the workloads block, if any
    pub fn workloads_placement(&self) -> Option<&NodePlacement> {
        self.workloads.as_ref().and_then(|c| c.node_placement.as_ref())
    }

    pub fn memory_overcommit_percentage(&self) -> i32 {
        self.higher_workload_density
            .as_ref()
            .map_or_else(default_memory_overcommit, |d| d.memory_overcommit_percentage)
    }

    pub fn uninstall_strategy(&self) -> UninstallStrategy {
        self.uninstall_strategy.unwrap_or_default()
    }
}

impl HyperConverged {
    /// Minimal HyperConverged document with defaults, used as the
    /// reference document when validating upgrade patches.
    pub fn with_defaults(namespace: &str) -> Self {
        let mut hc = HyperConverged::new(HYPERCONVERGED_NAME, HyperConvergedSpec::default());
        hc.metadata.namespace = Some(namespace.to_string());
        hc
    }

    /// Whether the resource is being deleted
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|x| x == finalizer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_deserializes_camel_case_fields() {
        let spec: HyperConvergedSpec = serde_json::from_value(serde_json::json!({
            "featureGates": {"downwardMetrics": true, "deployKubeSecondaryDNS": false},
            "infra": {"nodePlacement": {"nodeSelector": {"key1": "value1"}}},
            "liveMigrationConfig": {"bandwidthPerMigration": "64Mi", "completionTimeoutPerGiB": 800},
            "higherWorkloadDensity": {},
            "uninstallStrategy": "RemoveWorkloads"
        }))
        .unwrap();

        assert_eq!(spec.feature_gates.downward_metrics, Some(true));
        assert_eq!(spec.feature_gates.deploy_kube_secondary_dns, Some(false));
        assert_eq!(
            spec.infra_placement().unwrap().node_selector.as_ref().unwrap()["key1"],
            "value1"
        );
        assert_eq!(spec.live_migration_config.bandwidth_per_migration.as_deref(), Some("64Mi"));
        assert_eq!(spec.live_migration_config.completion_timeout_per_gib, Some(800));
        assert_eq!(spec.memory_overcommit_percentage(), 100, "missing percentage falls back to 100");
        assert_eq!(spec.uninstall_strategy(), UninstallStrategy::RemoveWorkloads);
    }

    #[test]
    fn test_default_spec_serializes_without_optional_fields() {
        let value = serde_json::to_value(HyperConvergedSpec::default()).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("featureGates"));
        assert!(obj.contains_key("liveMigrationConfig"));
        assert!(!obj.contains_key("infra"), "unset placement must be omitted");
        assert!(!obj.contains_key("tlsSecurityProfile"));
    }

    #[test]
    fn test_with_defaults_uses_canonical_identity() {
        let hc = HyperConverged::with_defaults("kubevirt-hyperconverged");
        assert_eq!(hc.metadata.name.as_deref(), Some(HYPERCONVERGED_NAME));
        assert_eq!(hc.metadata.namespace.as_deref(), Some("kubevirt-hyperconverged"));
        assert!(!hc.is_deleting());
        assert!(!hc.has_finalizer("kubevirt.io/hyperconverged"));
    }
}
