//! PriorityClass of the KubeVirt core components
//!
//! Cluster-scoped and kept on teardown: workloads scheduled with it may
//! outlive the HyperConverged resource.

use super::generic::{DiffRule, OperandHooks, OwnerPolicy, Scope};
use super::labels::AppComponent;
use super::OperandContext;
use crate::error::ControllerError;
use crate::request::HcoRequest;
use cluster_client::{gvk_of, to_dynamic};
use k8s_openapi::api::scheduling::v1::PriorityClass;
use kube::api::{DynamicObject, GroupVersionKind};

pub const NAME: &str = "kubevirt-cluster-critical";

const VALUE: i32 = 1_000_000_000;

pub struct KubeVirtPriorityClass;

impl OperandHooks for KubeVirtPriorityClass {
    fn gvk(&self) -> GroupVersionKind {
        gvk_of::<PriorityClass>()
    }

    fn name(&self) -> &str {
        NAME
    }

    fn scope(&self) -> Scope {
        Scope::Cluster
    }

    fn component(&self) -> AppComponent {
        AppComponent::Compute
    }

    fn build(&self, _ctx: &OperandContext, _req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let pc = PriorityClass {
            value: VALUE,
            global_default: Some(false),
            description: Some("This priority class should be used for KubeVirt core components only.".to_string()),
            ..Default::default()
        };
        Ok(to_dynamic(&pc)?)
    }

    fn diff_rule(&self) -> DiffRule {
        DiffRule::PriorityClass
    }

    fn owner(&self) -> OwnerPolicy {
        OwnerPolicy::None
    }

    fn deleted_on_teardown(&self) -> bool {
        false
    }
}
