//! Grafana dashboards of the OpenShift console
//!
//! The console picks up ConfigMaps labelled
//! `console.openshift.io/dashboard` from `openshift-config-managed`. The
//! payloads are embedded at build time and copied as they are.

use super::generic::{DiffRule, OperandHooks, OwnerPolicy, Scope};
use super::labels::AppComponent;
use super::OperandContext;
use crate::error::ControllerError;
use crate::request::HcoRequest;
use cluster_client::{gvk_of, to_dynamic};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{DynamicObject, GroupVersionKind};

pub const DASHBOARD_NAMESPACE: &str = "openshift-config-managed";

const DASHBOARDS: &[(&str, &str)] = &[(
    "grafana-dashboard-kubevirt-top-consumers",
    include_str!("../../resources/dashboards/grafana-dashboard-kubevirt-top-consumers.yaml"),
)];

pub struct DashboardHooks {
    name: &'static str,
    manifest: &'static str,
}

/// One operand per embedded dashboard
pub fn hooks() -> Vec<DashboardHooks> {
    DASHBOARDS
        .iter()
        .map(|&(name, manifest)| DashboardHooks { name, manifest })
        .collect()
}

impl OperandHooks for DashboardHooks {
    fn gvk(&self) -> GroupVersionKind {
        gvk_of::<ConfigMap>()
    }

    fn name(&self) -> &str {
        self.name
    }

    fn scope(&self) -> Scope {
        Scope::Namespace(DASHBOARD_NAMESPACE)
    }

    fn component(&self) -> AppComponent {
        AppComponent::Compute
    }

    fn build(&self, _ctx: &OperandContext, _req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let manifest: ConfigMap = serde_yaml::from_str(self.manifest)?;
        let cm = ConfigMap {
            data: manifest.data,
            binary_data: manifest.binary_data,
            ..Default::default()
        };
        let mut obj = to_dynamic(&cm)?;
        obj.metadata.labels = manifest.metadata.labels;
        Ok(obj)
    }

    fn diff_rule(&self) -> DiffRule {
        DiffRule::ConfigMapData
    }

    fn owner(&self) -> OwnerPolicy {
        OwnerPolicy::None
    }
}
