//! NetworkAddonsConfig CR
//!
//! Cluster-scoped; the operator only reconciles the object named `cluster`.

use super::generic::{new_object, ComponentInfo, OperandHooks, Scope};
use super::labels::AppComponent;
use super::placement::node_placement;
use super::{annotations, OperandContext};
use crate::error::ControllerError;
use crate::kinds;
use crate::request::HcoRequest;
use crate::tls_profile;
use kube::api::{DynamicObject, GroupVersionKind};
use serde_json::{json, Map, Value};

pub const NAME: &str = "cluster";

const KIND: &str = "NetworkAddonsConfig";

pub struct CnaoHooks;

fn placement_configuration(req: &HcoRequest) -> Value {
    let spec = &req.hc.spec;
    let mut placement = Map::new();
    if let Some(infra) = spec.infra_placement() {
        placement.insert("infra".to_string(), node_placement(infra));
    }
    if let Some(workloads) = spec.workloads_placement() {
        placement.insert("workloads".to_string(), node_placement(workloads));
    }
    Value::Object(placement)
}

impl OperandHooks for CnaoHooks {
    fn gvk(&self) -> GroupVersionKind {
        kinds::network_addons()
    }

    fn name(&self) -> &str {
        NAME
    }

    fn scope(&self) -> Scope {
        Scope::Cluster
    }

    fn component(&self) -> AppComponent {
        AppComponent::Network
    }

    fn build(&self, _ctx: &OperandContext, req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let mut spec = Map::new();
        spec.insert("multus".to_string(), json!({}));
        spec.insert("linuxBridge".to_string(), json!({}));
        spec.insert("kubeMacPool".to_string(), json!({}));
        if !req.caps.openshift {
            spec.insert("ovs".to_string(), json!({}));
        }
        spec.insert("imagePullPolicy".to_string(), json!("IfNotPresent"));
        spec.insert("placementConfiguration".to_string(), placement_configuration(req));
        spec.insert(
            "selfSignConfiguration".to_string(),
            json!({
                "caRotateInterval": "48h0m0s",
                "caOverlapInterval": "24h0m0s",
                "certRotateInterval": "24h0m0s",
                "certOverlapInterval": "12h0m0s",
            }),
        );
        spec.insert("tlsSecurityProfile".to_string(), tls_profile::to_wire(&req.tls_profile()));
        if req.hc.spec.feature_gates.deploy_kube_secondary_dns == Some(true) {
            spec.insert("kubeSecondaryDNS".to_string(), json!({}));
        }

        let mut cnao = new_object(json!({ "spec": spec }));
        annotations::apply(&req.hc, annotations::CNAO, KIND, &mut cnao)?;
        Ok(cnao)
    }

    fn component_info(&self, ctx: &OperandContext) -> Option<ComponentInfo> {
        Some(ComponentInfo {
            display: KIND,
            version_path: "/status/observedVersion",
            version: ctx.config.component_versions.network_addons.clone(),
        })
    }
}
