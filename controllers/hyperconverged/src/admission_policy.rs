//! Namespace admission policy
//!
//! A ValidatingAdmissionPolicy and its binding reject any HyperConverged
//! created outside the operator namespace. Both objects are cluster
//! scoped and synced outside the HyperConverged pass.

use crate::error::ControllerError;
use crate::kinds;
use crate::operands::generic::new_object;
use crate::operands::labels::{self, AppComponent};
use crate::sync::sync_object;
use cluster_client::ClusterClient;
use crds::{HCO_GROUP, HCO_VERSION, HYPERCONVERGED_NAME};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

pub const POLICY_NAME: &str = "hyperconverged-namespace-policy";

pub const BINDING_NAME: &str = "hyperconverged-namespace-policy-binding";

const STARTUP_PREFIX: &str = "startup-req-";

fn required_policy(namespace: &str, version: &str) -> DynamicObject {
    let mut policy = new_object(json!({
        "spec": {
            "failurePolicy": "Fail",
            "matchConstraints": {
                "matchPolicy": "Equivalent",
                "namespaceSelector": {},
                "objectSelector": {},
                "resourceRules": [{
                    "apiGroups": [HCO_GROUP],
                    "apiVersions": [HCO_VERSION],
                    "resources": ["hyperconvergeds"],
                    "scope": "Namespaced",
                    "operations": ["CREATE"],
                }],
            },
            "validations": [{
                "expression": format!("request.namespace == '{namespace}'"),
                "message": format!("HyperConverged CR can only be created in the '{namespace}' namespace."),
            }],
        }
    }));
    policy.metadata.name = Some(POLICY_NAME.to_string());
    policy.metadata.labels = Some(labels::managed_labels(HYPERCONVERGED_NAME, version, AppComponent::Deployment));
    policy
}

fn required_binding(version: &str) -> DynamicObject {
    let mut binding = new_object(json!({
        "spec": {
            "policyName": POLICY_NAME,
            "validationActions": ["Deny"],
        }
    }));
    binding.metadata.name = Some(BINDING_NAME.to_string());
    binding.metadata.labels = Some(labels::managed_labels(HYPERCONVERGED_NAME, version, AppComponent::Deployment));
    binding
}

pub struct AdmissionPolicyReconciler {
    client: Arc<dyn ClusterClient>,
    policy: DynamicObject,
    binding: DynamicObject,
    owner: Option<OwnerReference>,
    startup: String,
}

impl AdmissionPolicyReconciler {
    pub fn new(client: Arc<dyn ClusterClient>, namespace: &str, version: &str, owner: Option<OwnerReference>) -> Self {
        Self {
            client,
            policy: required_policy(namespace, version),
            binding: required_binding(version),
            owner,
            startup: format!("{STARTUP_PREFIX}{}", uuid::Uuid::new_v4()),
        }
    }

    /// Name of the placeholder request that syncs both objects
    pub fn startup_request(&self) -> &str {
        &self.startup
    }

    /// Whether a watch event on `name` concerns this reconciler
    pub fn is_managed(name: &str) -> bool {
        name == POLICY_NAME || name == BINDING_NAME
    }

    pub async fn reconcile(&self, name: &str) -> Result<(), ControllerError> {
        let client = self.client.as_ref();
        let owner = self.owner.as_ref();
        if name == self.startup {
            debug!("Initial reconciliation of the namespace admission policy");
            sync_object(client, &kinds::validating_admission_policy(), &self.policy, owner).await?;
            sync_object(client, &kinds::validating_admission_policy_binding(), &self.binding, owner).await?;
            return Ok(());
        }
        match name {
            POLICY_NAME => {
                sync_object(client, &kinds::validating_admission_policy(), &self.policy, owner).await?;
            }
            BINDING_NAME => {
                sync_object(client, &kinds::validating_admission_policy_binding(), &self.binding, owner).await?;
            }
            _ => debug!("{} is not the namespace admission policy; ignoring", name),
        }
        Ok(())
    }
}
