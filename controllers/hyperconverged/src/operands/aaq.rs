//! AAQ CR (application aware quota)
//!
//! Only deployed while `spec.enableApplicationAwareQuota` is set.

use super::generic::{new_object, ComponentInfo, OperandHooks};
use super::labels::AppComponent;
use super::placement::{component_config, insert_opt};
use super::OperandContext;
use crate::error::ControllerError;
use crate::kinds;
use crate::request::HcoRequest;
use kube::api::{DynamicObject, GroupVersionKind};
use serde_json::{json, Map};

pub const NAME: &str = "aaq-kubevirt-hyperconverged";

pub struct AaqHooks;

pub fn enabled(req: &HcoRequest) -> bool {
    req.hc.spec.enable_application_aware_quota == Some(true)
}

impl OperandHooks for AaqHooks {
    fn gvk(&self) -> GroupVersionKind {
        kinds::aaq()
    }

    fn name(&self) -> &str {
        NAME
    }

    fn component(&self) -> AppComponent {
        AppComponent::QuotaManagement
    }

    fn build(&self, _ctx: &OperandContext, req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let spec = &req.hc.spec;
        let mut aaq = Map::new();
        insert_opt(&mut aaq, "infra", spec.infra.as_ref().map(|c| component_config(Some(c))));
        insert_opt(&mut aaq, "workloads", spec.workloads.as_ref().map(|c| component_config(Some(c))));
        aaq.insert(
            "configuration".to_string(),
            json!({"vmiCalculatorConfiguration": {"configName": "DedicatedVirtualResources"}}),
        );
        Ok(new_object(json!({ "spec": aaq })))
    }

    fn component_info(&self, ctx: &OperandContext) -> Option<ComponentInfo> {
        Some(ComponentInfo {
            display: "AAQ",
            version_path: "/status/observedVersion",
            version: ctx.config.component_versions.aaq.clone(),
        })
    }
}
