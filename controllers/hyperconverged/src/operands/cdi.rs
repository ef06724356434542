//! CDI CR

use super::generic::{new_object, ComponentInfo, OperandHooks};
use super::labels::AppComponent;
use super::placement::{insert_opt, node_placement};
use super::{annotations, OperandContext};
use crate::error::{ControllerError, UninstallKind};
use crate::kinds;
use crate::request::HcoRequest;
use crate::tls_profile;
use kube::api::{DynamicObject, GroupVersionKind};
use serde_json::{json, Map, Value};

pub const NAME: &str = "cdi-kubevirt-hyperconverged";

const KIND: &str = "CDI";

const FEATURE_GATES: &[&str] = &["HonorWaitForFirstConsumer", "DataVolumeClaimAdoption"];

pub struct CdiHooks;

fn config(req: &HcoRequest) -> Value {
    let spec = &req.hc.spec;
    let mut config = Map::new();
    config.insert("featureGates".to_string(), json!(FEATURE_GATES));
    config.insert("tlsSecurityProfile".to_string(), tls_profile::to_wire(&req.tls_profile()));
    insert_opt(&mut config, "scratchSpaceStorageClass", spec.scratch_space_storage_class.as_ref());
    insert_opt(&mut config, "vddkInitImage", spec.vddk_init_image.as_ref());
    Value::Object(config)
}

impl OperandHooks for CdiHooks {
    fn gvk(&self) -> GroupVersionKind {
        kinds::cdi()
    }

    fn name(&self) -> &str {
        NAME
    }

    fn component(&self) -> AppComponent {
        AppComponent::Storage
    }

    fn build(&self, _ctx: &OperandContext, req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let spec = &req.hc.spec;
        let mut cdi_spec = Map::new();
        cdi_spec.insert("uninstallStrategy".to_string(), json!(spec.uninstall_strategy().as_str()));
        insert_opt(&mut cdi_spec, "infra", spec.infra_placement().map(node_placement));
        insert_opt(&mut cdi_spec, "workload", spec.workloads_placement().map(node_placement));
        cdi_spec.insert("config".to_string(), config(req));
        cdi_spec.insert(
            "certConfig".to_string(),
            json!({
                "ca": {"duration": "48h0m0s", "renewBefore": "24h0m0s"},
                "server": {"duration": "24h0m0s", "renewBefore": "12h0m0s"},
            }),
        );

        let mut cdi = new_object(json!({ "spec": cdi_spec }));
        annotations::apply(&req.hc, annotations::CDI, KIND, &mut cdi)?;
        Ok(cdi)
    }

    fn component_info(&self, ctx: &OperandContext) -> Option<ComponentInfo> {
        Some(ComponentInfo {
            display: KIND,
            version_path: "/status/observedVersion",
            version: ctx.config.component_versions.cdi.clone(),
        })
    }

    fn uninstall_kind(&self) -> UninstallKind {
        UninstallKind::Cdi
    }
}
