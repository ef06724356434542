//! PrometheusRule with the operator alerts

use crate::error::ControllerError;
use crate::kinds;
use crate::operands::generic::{new_object, OperandHooks, OwnerPolicy};
use crate::operands::labels::AppComponent;
use crate::operands::OperandContext;
use crate::request::HcoRequest;
use kube::api::{DynamicObject, GroupVersionKind};
use serde_json::{json, Value};

pub const RULE_NAME: &str = "kubevirt-hyperconverged-prometheus-rule";

pub const RULE_GROUP: &str = "kubevirt.hyperconverged.rules";

pub const OUT_OF_BAND_UPDATE_ALERT: &str = "KubeVirtCRModified";
pub const UNSAFE_MODIFICATION_ALERT: &str = "UnsupportedHCOModification";
pub const INSTALLATION_NOT_COMPLETED_ALERT: &str = "HCOInstallationIncomplete";

const RUNBOOK_URL_BASE: &str = "https://kubevirt.io/monitoring/runbooks";

struct Alert {
    name: &'static str,
    expr: &'static str,
    for_: Option<&'static str>,
    description: &'static str,
    summary: &'static str,
    severity: &'static str,
    health_impact: &'static str,
}

const ALERTS: [Alert; 3] = [
    Alert {
        name: OUT_OF_BAND_UPDATE_ALERT,
        expr: "sum by(component_name) ((round(increase(kubevirt_hco_out_of_band_modifications_total[10m]))>0 and kubevirt_hco_out_of_band_modifications_total offset 10m) or (kubevirt_hco_out_of_band_modifications_total != 0 unless kubevirt_hco_out_of_band_modifications_total offset 10m))",
        for_: None,
        description: "Out-of-band modification for {{ $labels.component_name }}.",
        summary: "{{ $value }} out-of-band CR modifications were detected in the last 10 minutes.",
        severity: "warning",
        health_impact: "warning",
    },
    Alert {
        name: UNSAFE_MODIFICATION_ALERT,
        expr: "sum by(annotation_name, namespace) ((kubevirt_hco_unsafe_modifications)>0)",
        for_: None,
        description: "unsafe modification for the {{ $labels.annotation_name }} annotation in the HyperConverged resource.",
        summary: "{{ $value }} unsafe modifications were detected in the HyperConverged resource.",
        severity: "info",
        health_impact: "none",
    },
    Alert {
        name: INSTALLATION_NOT_COMPLETED_ALERT,
        expr: "kubevirt_hco_hyperconverged_cr_exists == 0",
        for_: Some("1h"),
        description: "the installation was not completed; the HyperConverged custom resource is missing. In order to complete the installation of the Hyperconverged Cluster Operator you should create the HyperConverged custom resource.",
        summary: "the installation was not completed; to complete the installation, create a HyperConverged custom resource.",
        severity: "info",
        health_impact: "critical",
    },
];

const VMI_CPU_RECORD: &str = "cluster:vmi_request_cpu_cores:sum";
const VMI_CPU_EXPR: &str = r#"sum(kube_pod_container_resource_requests{resource="cpu"} and on (pod) kube_pod_status_phase{phase="Running"} * on (pod) group_left kube_pod_labels{ label_kubevirt_io="virt-launcher"} > 0)"#;

fn alert_rule(alert: &Alert) -> Value {
    let mut rule = json!({
        "alert": alert.name,
        "expr": alert.expr,
        "annotations": {
            "description": alert.description,
            "summary": alert.summary,
            "runbook_url": format!("{RUNBOOK_URL_BASE}/{}", alert.name),
        },
        "labels": {
            "severity": alert.severity,
            "operator_health_impact": alert.health_impact,
            "kubernetes_operator_part_of": "kubevirt",
            "kubernetes_operator_component": "hyperconverged-cluster-operator",
        },
    });
    if let (Some(for_), Some(map)) = (alert.for_, rule.as_object_mut()) {
        map.insert("for".to_string(), json!(for_));
    }
    rule
}

pub struct PrometheusRuleHooks;

impl OperandHooks for PrometheusRuleHooks {
    fn gvk(&self) -> GroupVersionKind {
        kinds::prometheus_rule()
    }

    fn name(&self) -> &str {
        RULE_NAME
    }

    fn component(&self) -> AppComponent {
        AppComponent::Monitoring
    }

    fn build(&self, _ctx: &OperandContext, _req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let mut rules: Vec<Value> = ALERTS.iter().map(alert_rule).collect();
        rules.push(json!({"record": VMI_CPU_RECORD, "expr": VMI_CPU_EXPR}));
        Ok(new_object(json!({
            "spec": {"groups": [{"name": RULE_GROUP, "rules": rules}]}
        })))
    }

    fn owner(&self) -> OwnerPolicy {
        OwnerPolicy::Deployment
    }

    fn deleted_on_teardown(&self) -> bool {
        false
    }
}
