//! wasp-agent
//!
//! Node agent that lets guests use swap once memory is overcommitted. It is
//! deployed only while `higherWorkloadDensity.memoryOvercommitPercentage` is
//! above 100.

use super::generic::{new_object, DiffRule, OperandHooks, OwnerPolicy, Scope};
use super::labels::{self, AppComponent, APP_LABEL_COMPONENT};
use super::placement::node_placement;
use super::OperandContext;
use crate::error::ControllerError;
use crate::kinds;
use crate::request::HcoRequest;
use cluster_client::{gvk_of, to_dynamic};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use kube::api::{DynamicObject, GroupVersionKind};
use serde_json::{json, Value};

pub const DAEMON_SET_NAME: &str = "wasp-agent";
pub const SERVICE_ACCOUNT_NAME: &str = "wasp";
pub const SCC_NAME: &str = "wasp";
pub const CLUSTER_ROLE_NAME: &str = "wasp-cluster";

/// Pods with this label may reach the cluster DNS and the API server
pub const ALLOW_CLUSTER_SERVICES_LABEL: &str = "np.kubevirt.io/allow-access-cluster-services";

const NO_OVERCOMMIT_PERCENTAGE: i32 = 100;

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

pub fn enabled(req: &HcoRequest) -> bool {
    req.hc.spec.memory_overcommit_percentage() > NO_OVERCOMMIT_PERCENTAGE
}

pub fn scc_enabled(req: &HcoRequest) -> bool {
    enabled(req) && req.caps.openshift
}

fn service_account_user(req: &HcoRequest) -> String {
    format!("system:serviceaccount:{}:{SERVICE_ACCOUNT_NAME}", req.namespace())
}

pub struct WaspServiceAccount;

impl OperandHooks for WaspServiceAccount {
    fn gvk(&self) -> GroupVersionKind {
        gvk_of::<ServiceAccount>()
    }

    fn name(&self) -> &str {
        SERVICE_ACCOUNT_NAME
    }

    fn component(&self) -> AppComponent {
        AppComponent::WaspAgent
    }

    fn build(&self, _ctx: &OperandContext, _req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        Ok(to_dynamic(&ServiceAccount::default())?)
    }

    fn diff_rule(&self) -> DiffRule {
        DiffRule::MetadataOnly
    }
}

pub struct WaspClusterRole;

impl OperandHooks for WaspClusterRole {
    fn gvk(&self) -> GroupVersionKind {
        gvk_of::<ClusterRole>()
    }

    fn name(&self) -> &str {
        CLUSTER_ROLE_NAME
    }

    fn scope(&self) -> Scope {
        Scope::Cluster
    }

    fn component(&self) -> AppComponent {
        AppComponent::WaspAgent
    }

    fn build(&self, _ctx: &OperandContext, _req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let role = ClusterRole {
            rules: Some(vec![PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec!["pods".to_string()]),
                verbs: vec!["watch".to_string(), "list".to_string()],
                ..Default::default()
            }]),
            ..Default::default()
        };
        Ok(to_dynamic(&role)?)
    }

    fn diff_rule(&self) -> DiffRule {
        DiffRule::Role
    }

    fn owner(&self) -> OwnerPolicy {
        OwnerPolicy::None
    }
}

pub struct WaspClusterRoleBinding;

impl OperandHooks for WaspClusterRoleBinding {
    fn gvk(&self) -> GroupVersionKind {
        gvk_of::<ClusterRoleBinding>()
    }

    fn name(&self) -> &str {
        CLUSTER_ROLE_NAME
    }

    fn scope(&self) -> Scope {
        Scope::Cluster
    }

    fn component(&self) -> AppComponent {
        AppComponent::WaspAgent
    }

    fn build(&self, _ctx: &OperandContext, req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let binding = ClusterRoleBinding {
            role_ref: RoleRef {
                api_group: RBAC_GROUP.to_string(),
                kind: "ClusterRole".to_string(),
                name: CLUSTER_ROLE_NAME.to_string(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: SERVICE_ACCOUNT_NAME.to_string(),
                namespace: Some(req.namespace().to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        };
        Ok(to_dynamic(&binding)?)
    }

    fn diff_rule(&self) -> DiffRule {
        DiffRule::RoleBinding
    }

    fn owner(&self) -> OwnerPolicy {
        OwnerPolicy::None
    }
}

pub struct WaspDaemonSet;

/// Spread the agents when there is more than one infra node
fn anti_affinity() -> Value {
    json!({
        "podAntiAffinity": {
            "preferredDuringSchedulingIgnoredDuringExecution": [{
                "weight": 90,
                "podAffinityTerm": {
                    "labelSelector": {
                        "matchExpressions": [{
                            "key": APP_LABEL_COMPONENT,
                            "operator": "In",
                            "values": [AppComponent::WaspAgent.as_str()],
                        }]
                    },
                    "topologyKey": "kubernetes.io/hostname",
                },
            }]
        }
    })
}

impl OperandHooks for WaspDaemonSet {
    fn gvk(&self) -> GroupVersionKind {
        gvk_of::<DaemonSet>()
    }

    fn name(&self) -> &str {
        DAEMON_SET_NAME
    }

    fn component(&self) -> AppComponent {
        AppComponent::WaspAgent
    }

    fn build(&self, ctx: &OperandContext, req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let mut pod_labels = labels::managed_labels(req.name(), &ctx.config.version, AppComponent::WaspAgent);
        pod_labels.insert(ALLOW_CLUSTER_SERVICES_LABEL.to_string(), "true".to_string());
        pod_labels.insert("name".to_string(), DAEMON_SET_NAME.to_string());

        let mut pod_spec = json!({
            "serviceAccountName": SERVICE_ACCOUNT_NAME,
            "hostPID": true,
            "hostUsers": true,
            "terminationGracePeriodSeconds": 5,
            "priorityClassName": "system-node-critical",
            "containers": [{
                "name": DAEMON_SET_NAME,
                "image": ctx.config.images.wasp_agent,
                "imagePullPolicy": "IfNotPresent",
                "resources": {"requests": {"cpu": "100m", "memory": "50M"}},
                "securityContext": {"privileged": true},
                "volumeMounts": [
                    {"name": "host", "mountPath": "/host"},
                    {"name": "rootfs", "mountPath": "/rootfs"},
                ],
                "env": [
                    {"name": "VERBOSITY", "value": "1"},
                    {"name": "NODE_NAME", "valueFrom": {"fieldRef": {"fieldPath": "spec.nodeName"}}},
                ],
            }],
            "volumes": [
                {"name": "host", "hostPath": {"path": "/"}},
                {"name": "rootfs", "hostPath": {"path": "/"}},
            ],
        });
        if let Some(map) = pod_spec.as_object_mut() {
            match req.hc.spec.infra_placement().map(node_placement) {
                Some(Value::Object(placement)) => map.extend(placement),
                _ if req.infra_highly_available() => {
                    map.insert("affinity".to_string(), anti_affinity());
                }
                _ => {}
            }
        }

        Ok(new_object(json!({
            "spec": {
                "selector": {"matchLabels": {"name": DAEMON_SET_NAME}},
                "template": {
                    "metadata": {"labels": pod_labels},
                    "spec": pod_spec,
                },
            }
        })))
    }

    fn diff_rule(&self) -> DiffRule {
        DiffRule::SpecSubset
    }
}

pub struct WaspScc;

impl OperandHooks for WaspScc {
    fn gvk(&self) -> GroupVersionKind {
        kinds::security_context_constraints()
    }

    fn name(&self) -> &str {
        SCC_NAME
    }

    fn scope(&self) -> Scope {
        Scope::Cluster
    }

    fn component(&self) -> AppComponent {
        AppComponent::WaspAgent
    }

    fn build(&self, _ctx: &OperandContext, req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        Ok(new_object(json!({
            "allowPrivilegedContainer": true,
            "allowHostDirVolumePlugin": true,
            "allowHostIPC": true,
            "allowHostNetwork": true,
            "allowHostPID": true,
            "allowHostPorts": true,
            "readOnlyRootFilesystem": false,
            "runAsUser": {"type": "RunAsAny"},
            "seLinuxContext": {"type": "RunAsAny"},
            "supplementalGroups": {"type": "RunAsAny"},
            "allowedCapabilities": ["*"],
            "allowedUnsafeSysctls": ["*"],
            "seccompProfiles": ["*"],
            "users": [service_account_user(req)],
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crds::HigherWorkloadDensityConfiguration;

    fn overcommitted(percentage: i32) -> crds::HyperConverged {
        let mut hc = create_test_hc();
        hc.spec.higher_workload_density = Some(HigherWorkloadDensityConfiguration {
            memory_overcommit_percentage: percentage,
        });
        hc
    }

    #[test]
    fn test_agent_follows_memory_overcommit() {
        assert!(!enabled(&create_test_request(create_test_hc(), openshift_caps())));
        assert!(!enabled(&create_test_request(overcommitted(100), openshift_caps())));
        assert!(enabled(&create_test_request(overcommitted(150), kubernetes_caps())));
        assert!(!scc_enabled(&create_test_request(overcommitted(150), kubernetes_caps())));
        assert!(scc_enabled(&create_test_request(overcommitted(150), openshift_caps())));
    }
}
