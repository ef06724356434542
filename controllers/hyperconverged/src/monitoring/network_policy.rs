//! Egress from the operator pod to Alertmanager

use crate::error::ControllerError;
use crate::operands::generic::{new_object, OperandHooks, OwnerPolicy};
use crate::operands::labels::AppComponent;
use crate::operands::OperandContext;
use crate::request::HcoRequest;
use cluster_client::gvk_of;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::api::{DynamicObject, GroupVersionKind};
use serde_json::{json, Value};

pub const POLICY_NAME: &str = "hco-allow-egress-to-alert-manager";

const OPENSHIFT_MONITORING_NAMESPACE: &str = "openshift-monitoring";
const DEFAULT_MONITORING_NAMESPACE: &str = "monitoring";

const ALERTMANAGER_PORTS: [u16; 2] = [9093, 9094];

pub fn monitoring_namespace(req: &HcoRequest) -> &'static str {
    if req.caps.openshift {
        OPENSHIFT_MONITORING_NAMESPACE
    } else {
        DEFAULT_MONITORING_NAMESPACE
    }
}

pub struct AlertManagerPolicyHooks;

impl OperandHooks for AlertManagerPolicyHooks {
    fn gvk(&self) -> GroupVersionKind {
        gvk_of::<NetworkPolicy>()
    }

    fn name(&self) -> &str {
        POLICY_NAME
    }

    fn component(&self) -> AppComponent {
        AppComponent::Monitoring
    }

    fn build(&self, ctx: &OperandContext, req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let ports: Vec<Value> = ALERTMANAGER_PORTS
            .iter()
            .map(|port| json!({"protocol": "TCP", "port": port}))
            .collect();
        Ok(new_object(json!({
            "spec": {
                "podSelector": {"matchLabels": {"name": ctx.config.operator_name}},
                "policyTypes": ["Egress"],
                "egress": [{
                    "to": [{
                        "namespaceSelector": {
                            "matchLabels": {"kubernetes.io/metadata.name": monitoring_namespace(req)}
                        },
                        "podSelector": {
                            "matchLabels": {
                                "alertmanager": "main",
                                "app.kubernetes.io/component": "alert-router",
                                "app.kubernetes.io/instance": "main",
                            }
                        },
                    }],
                    "ports": ports,
                }],
            }
        })))
    }

    fn owner(&self) -> OwnerPolicy {
        OwnerPolicy::Deployment
    }

    fn deleted_on_teardown(&self) -> bool {
        false
    }
}
