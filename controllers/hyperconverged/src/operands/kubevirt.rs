//! KubeVirt CR
//!
//! The virtualization component. Besides placement and the uninstall
//! strategy, the HyperConverged spec is translated into the developer
//! configuration (feature gates), the migration tuning, the TLS settings and
//! the seccomp profile of the virt handlers.

use super::generic::{new_object, ComponentInfo, OperandHooks};
use super::labels::AppComponent;
use super::placement::{component_config, insert_opt};
use super::{annotations, OperandContext};
use crate::error::{ControllerError, UninstallKind};
use crate::kinds;
use crate::request::HcoRequest;
use crate::tls_profile;
use crds::{HyperConvergedConfig, HyperConvergedFeatureGates, LiveMigrationConfigurations};
use kube::api::{DynamicObject, GroupVersionKind};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

pub const NAME: &str = "kubevirt-kubevirt-hyperconverged";

const KIND: &str = "KubeVirt";

/// Set on the CR when the CPUs of the emulator thread must be aligned
pub const ALIGN_CPUS_ANNOTATION: &str = "kubevirt.kubevirt.io/emulator-thread-complete-to-even-parity";

const SECCOMP_PROFILE: &str = "kubevirt/kubevirt.json";

/// Gates enabled on every installation
pub const MANDATORY_FEATURE_GATES: &[&str] = &[
    "DataVolumes",
    "SRIOV",
    "CPUManager",
    "CPUNodeDiscovery",
    "Snapshot",
    "HotplugVolumes",
    "GPU",
    "HostDevices",
    "ExpandDisks",
    "NUMA",
    "VMExport",
    "DisableCustomSELinuxPolicy",
    "KubevirtSeccompProfile",
    "HotplugNICs",
    "VMPersistentState",
    "NetworkBindingPlugins",
];

pub struct KubeVirtHooks;

/// Mandatory gates plus the ones switched on in the HyperConverged spec
pub fn feature_gates(gates: &HyperConvergedFeatureGates) -> Vec<String> {
    let mut out: Vec<String> = MANDATORY_FEATURE_GATES.iter().map(|g| g.to_string()).collect();
    let optional = [
        ("DownwardMetrics", gates.downward_metrics.is_none_or(|on| on)),
        ("PersistentReservation", gates.persistent_reservation == Some(true)),
        ("AlignCPUs", gates.align_cpus == Some(true)),
        ("VideoConfig", gates.video_config == Some(true)),
        ("DecentralizedLiveMigration", gates.decentralized_live_migration == Some(true)),
    ];
    out.extend(optional.into_iter().filter(|(_, on)| *on).map(|(g, _)| g.to_string()));
    out
}

/// `infra`/`workloads` block of the CR; `None` when there is nothing to set
fn component(config: Option<&HyperConvergedConfig>, highly_available: bool) -> Option<Value> {
    let mut out = match component_config(config) {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if !highly_available {
        out.insert("replicas".to_string(), json!(1));
    }
    (!out.is_empty()).then_some(Value::Object(out))
}

/// Whether `value` reads as a Kubernetes resource quantity
fn is_quantity(value: &str) -> bool {
    const SUFFIXES: &[&str] = &["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "k", "M", "G", "T", "P", "E", "m"];
    let split = value
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map_or(value.len(), |(i, _)| i);
    let (number, suffix) = value.split_at(split);
    !number.is_empty() && number.parse::<f64>().is_ok() && SUFFIXES.contains(&suffix)
}

fn migrations(config: &LiveMigrationConfigurations) -> Result<Value, ControllerError> {
    let mut out = Map::new();
    if let Some(bandwidth) = config.bandwidth_per_migration.as_deref() {
        if !is_quantity(bandwidth) {
            return Err(ControllerError::operand_build(
                KIND,
                format!("failed to parse the LiveMigrationConfig.bandwidthPerMigration field: {bandwidth:?} is not a quantity"),
            ));
        }
        out.insert("bandwidthPerMigration".to_string(), json!(bandwidth));
    }
    insert_opt(&mut out, "completionTimeoutPerGiB", config.completion_timeout_per_gib);
    insert_opt(&mut out, "parallelMigrationsPerCluster", config.parallel_migrations_per_cluster);
    insert_opt(
        &mut out,
        "parallelOutboundMigrationsPerNode",
        config.parallel_outbound_migrations_per_node,
    );
    insert_opt(&mut out, "progressTimeout", config.progress_timeout);
    insert_opt(&mut out, "network", config.network.as_ref());
    insert_opt(&mut out, "allowAutoConverge", config.allow_auto_converge);
    insert_opt(&mut out, "allowPostCopy", config.allow_post_copy);
    Ok(Value::Object(out))
}

impl KubeVirtHooks {
    fn configuration(&self, req: &HcoRequest) -> Result<Value, ControllerError> {
        let spec = &req.hc.spec;
        let tls = tls_profile::settings(&req.tls_profile());

        let mut developer = Map::new();
        developer.insert("featureGates".to_string(), json!(feature_gates(&spec.feature_gates)));
        developer.insert("diskVerification".to_string(), json!({"memoryLimit": "2Gi"}));
        let overcommit = spec.memory_overcommit_percentage();
        if overcommit != 100 {
            developer.insert("memoryOvercommit".to_string(), json!(overcommit));
        }

        Ok(json!({
            "developerConfiguration": developer,
            "network": {"defaultNetworkInterface": "masquerade"},
            "migrations": migrations(&spec.live_migration_config)?,
            "tlsConfiguration": {
                "minTLSVersion": tls.min_tls_version,
                "ciphers": tls.ciphers,
            },
            "seccompConfiguration": {
                "virtualMachineInstanceProfile": {
                    "customProfile": {"localhostProfile": SECCOMP_PROFILE}
                }
            },
        }))
    }
}

impl OperandHooks for KubeVirtHooks {
    fn gvk(&self) -> GroupVersionKind {
        kinds::kubevirt()
    }

    fn name(&self) -> &str {
        NAME
    }

    fn component(&self) -> AppComponent {
        AppComponent::Compute
    }

    fn build(&self, ctx: &OperandContext, req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let spec = &req.hc.spec;

        let mut kv_spec = Map::new();
        kv_spec.insert("uninstallStrategy".to_string(), json!(spec.uninstall_strategy().as_str()));
        insert_opt(
            &mut kv_spec,
            "infra",
            component(spec.infra.as_ref(), req.infra_highly_available()),
        );
        insert_opt(&mut kv_spec, "workloads", component(spec.workloads.as_ref(), true));
        kv_spec.insert("configuration".to_string(), self.configuration(req)?);
        kv_spec.insert("certificateRotateStrategy".to_string(), json!({}));
        kv_spec.insert(
            "workloadUpdateStrategy".to_string(),
            json!({
                "workloadUpdateMethods": ["LiveMigrate"],
                "batchEvictionSize": 10,
                "batchEvictionInterval": "1m0s",
            }),
        );
        kv_spec.insert("productName".to_string(), json!("hyperconverged-cluster"));
        kv_spec.insert("productVersion".to_string(), json!(ctx.config.version));
        kv_spec.insert("productComponent".to_string(), json!(AppComponent::Compute.as_str()));
        kv_spec.insert("serviceMonitorNamespace".to_string(), json!(req.namespace()));

        let mut kv = new_object(json!({ "spec": kv_spec }));
        if spec.feature_gates.align_cpus == Some(true) {
            kv.metadata.annotations = Some(BTreeMap::from([(ALIGN_CPUS_ANNOTATION.to_string(), String::new())]));
        }
        annotations::apply(&req.hc, annotations::KUBEVIRT, KIND, &mut kv)?;
        Ok(kv)
    }

    fn component_info(&self, ctx: &OperandContext) -> Option<ComponentInfo> {
        Some(ComponentInfo {
            display: KIND,
            version_path: "/status/observedKubeVirtVersion",
            version: ctx.config.component_versions.kubevirt.clone(),
        })
    }

    fn uninstall_kind(&self) -> UninstallKind {
        UninstallKind::KubeVirt
    }
}
