//! passt network binding
//!
//! A DaemonSet copies the binding CNI plugin onto every node; the
//! NetworkAttachmentDefinition lets primary user-defined networks use it.
//! Opted in with the `hco.kubevirt.io/deployPasstNetworkBinding`
//! annotation.

use super::generic::{new_object, DiffRule, OperandHooks, OwnerPolicy, Scope};
use super::labels::AppComponent;
use super::placement::node_placement;
use super::OperandContext;
use crate::error::ControllerError;
use crate::kinds;
use crate::request::HcoRequest;
use cluster_client::{gvk_of, to_dynamic};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::{DynamicObject, GroupVersionKind};
use serde_json::{json, Value};

pub const DEPLOY_ANNOTATION: &str = "hco.kubevirt.io/deployPasstNetworkBinding";

pub const CNI_OBJECT_NAME: &str = "passt-binding-cni";

pub const NAD_NAME: &str = "primary-udn-kubevirt-binding";

pub const NAD_NAMESPACE: &str = "default";

const NAD_CONFIG: &str = r#"{
  "cniVersion": "1.0.0",
  "name": "primary-udn-kubevirt-binding",
  "plugins": [
    {
      "type": "kubevirt-passt-binding"
    }
  ]
}"#;

const INSTALL_SCRIPT: &str = r#"ls -la "/cni/kubevirt-passt-binding"
cp -f "/cni/kubevirt-passt-binding" "/opt/cni/bin"
echo "passt binding CNI plugin installation complete..sleep infinity"
sleep 2147483647"#;

pub fn enabled(req: &HcoRequest) -> bool {
    req.hc.annotation(DEPLOY_ANNOTATION) == Some("true")
}

/// The CNI installer runs privileged, which OpenShift only admits with its
/// own SecurityContextConstraints
pub fn scc_enabled(req: &HcoRequest) -> bool {
    enabled(req) && req.caps.openshift
}

/// The attachment also needs the NetworkAttachmentDefinition CRD
pub fn nad_enabled(req: &HcoRequest) -> bool {
    enabled(req) && req.caps.nad_available
}

pub struct PasstServiceAccount;

impl OperandHooks for PasstServiceAccount {
    fn gvk(&self) -> GroupVersionKind {
        gvk_of::<ServiceAccount>()
    }

    fn name(&self) -> &str {
        CNI_OBJECT_NAME
    }

    fn component(&self) -> AppComponent {
        AppComponent::Network
    }

    fn build(&self, _ctx: &OperandContext, _req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        Ok(to_dynamic(&ServiceAccount::default())?)
    }

    fn diff_rule(&self) -> DiffRule {
        DiffRule::MetadataOnly
    }
}

pub struct PasstDaemonSet;

fn pod_spec(ctx: &OperandContext, req: &HcoRequest) -> Value {
    let host_path = if req.caps.openshift {
        "/var/lib/cni/bin"
    } else {
        "/opt/cni/bin"
    };
    let mut spec = json!({
        "priorityClassName": "system-cluster-critical",
        "containers": [{
            "name": "installer",
            "image": ctx.config.images.passt_binding_cni,
            "command": ["/bin/sh", "-ce"],
            "args": [INSTALL_SCRIPT],
            "resources": {"requests": {"cpu": "10m", "memory": "15Mi"}},
            "securityContext": {"privileged": true},
            "volumeMounts": [{"name": "cnibin", "mountPath": "/opt/cni/bin"}],
            "imagePullPolicy": "IfNotPresent",
        }],
        "volumes": [{"name": "cnibin", "hostPath": {"path": host_path}}],
    });
    if let Some(map) = spec.as_object_mut() {
        if req.caps.openshift {
            map.insert("serviceAccountName".to_string(), json!(CNI_OBJECT_NAME));
        }
        if let Some(Value::Object(placement)) = req.hc.spec.infra_placement().map(node_placement) {
            map.extend(placement);
        }
    }
    spec
}

impl OperandHooks for PasstDaemonSet {
    fn gvk(&self) -> GroupVersionKind {
        gvk_of::<DaemonSet>()
    }

    fn name(&self) -> &str {
        CNI_OBJECT_NAME
    }

    fn component(&self) -> AppComponent {
        AppComponent::Network
    }

    fn build(&self, ctx: &OperandContext, req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let mut ds = new_object(json!({
            "spec": {
                "selector": {"matchLabels": {"name": CNI_OBJECT_NAME}},
                "updateStrategy": {
                    "type": "RollingUpdate",
                    "rollingUpdate": {"maxUnavailable": "10%"},
                },
                "template": {
                    "metadata": {
                        "labels": {"name": CNI_OBJECT_NAME, "tier": "node", "app": CNI_OBJECT_NAME},
                        "annotations": {
                            "description": format!("{CNI_OBJECT_NAME} installs 'passt binding' CNI on cluster nodes"),
                        },
                    },
                    "spec": pod_spec(ctx, req),
                },
            }
        }));
        ds.metadata.labels = Some([("tier".to_string(), "node".to_string())].into());
        Ok(ds)
    }

    fn diff_rule(&self) -> DiffRule {
        DiffRule::SpecSubset
    }
}

pub struct PasstNetworkAttachment;

impl OperandHooks for PasstNetworkAttachment {
    fn gvk(&self) -> GroupVersionKind {
        kinds::network_attachment_definition()
    }

    fn name(&self) -> &str {
        NAD_NAME
    }

    fn scope(&self) -> Scope {
        Scope::Namespace(NAD_NAMESPACE)
    }

    fn component(&self) -> AppComponent {
        AppComponent::Network
    }

    fn build(&self, _ctx: &OperandContext, _req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        Ok(new_object(json!({"spec": {"config": NAD_CONFIG}})))
    }

    fn owner(&self) -> OwnerPolicy {
        OwnerPolicy::None
    }
}

pub struct PasstScc;

impl OperandHooks for PasstScc {
    fn gvk(&self) -> GroupVersionKind {
        kinds::security_context_constraints()
    }

    fn name(&self) -> &str {
        CNI_OBJECT_NAME
    }

    fn scope(&self) -> Scope {
        Scope::Cluster
    }

    fn component(&self) -> AppComponent {
        AppComponent::Network
    }

    fn build(&self, _ctx: &OperandContext, req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        Ok(new_object(json!({
            "allowPrivilegedContainer": true,
            "allowHostDirVolumePlugin": true,
            "allowHostIPC": false,
            "allowHostNetwork": false,
            "allowHostPID": false,
            "allowHostPorts": false,
            "readOnlyRootFilesystem": false,
            "runAsUser": {"type": "RunAsAny"},
            "seLinuxContext": {"type": "RunAsAny"},
            "users": [format!("system:serviceaccount:{}:{CNI_OBJECT_NAME}", req.namespace())],
            "volumes": ["*"],
        })))
    }

    fn diff_rule(&self) -> DiffRule {
        DiffRule::Scc
    }

    fn owner(&self) -> OwnerPolicy {
        OwnerPolicy::None
    }
}
