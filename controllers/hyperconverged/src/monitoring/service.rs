//! Service in front of the operator's metrics port

use crate::error::ControllerError;
use crate::operands::generic::{DiffRule, OperandHooks, OwnerPolicy};
use crate::operands::labels::AppComponent;
use crate::operands::OperandContext;
use crate::request::HcoRequest;
use cluster_client::{gvk_of, to_dynamic};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{DynamicObject, GroupVersionKind};
use std::collections::BTreeMap;

pub const SERVICE_NAME: &str = "kubevirt-hyperconverged-operator-metrics";

pub const PORT_NAME: &str = "http-metrics";

pub const METRICS_PORT: i32 = 8443;

pub struct MetricsServiceHooks;

impl OperandHooks for MetricsServiceHooks {
    fn gvk(&self) -> GroupVersionKind {
        gvk_of::<Service>()
    }

    fn name(&self) -> &str {
        SERVICE_NAME
    }

    fn component(&self) -> AppComponent {
        AppComponent::Monitoring
    }

    fn build(&self, ctx: &OperandContext, _req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let svc = Service {
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some(PORT_NAME.to_string()),
                    port: METRICS_PORT,
                    protocol: Some("TCP".to_string()),
                    target_port: Some(IntOrString::Int(METRICS_PORT)),
                    ..Default::default()
                }]),
                selector: Some(BTreeMap::from([("name".to_string(), ctx.config.operator_name.clone())])),
                ..Default::default()
            }),
            ..Default::default()
        };
        Ok(to_dynamic(&svc)?)
    }

    fn diff_rule(&self) -> DiffRule {
        DiffRule::Service
    }

    fn owner(&self) -> OwnerPolicy {
        OwnerPolicy::Deployment
    }

    fn deleted_on_teardown(&self) -> bool {
        false
    }
}
