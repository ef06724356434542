//! SSP CR (common templates and their validator)

use super::generic::{new_object, ComponentInfo, OperandHooks};
use super::labels::AppComponent;
use super::placement::{insert_opt, node_placement};
use super::{annotations, golden_images, OperandContext};
use crate::error::ControllerError;
use crate::kinds;
use crate::request::HcoRequest;
use crate::tls_profile;
use kube::api::{DynamicObject, GroupVersionKind};
use serde_json::{json, Map};

pub const NAME: &str = "ssp-kubevirt-hyperconverged";

const KIND: &str = "SSP";

/// Namespace of the common templates unless the spec names another one
pub const DEFAULT_COMMON_TEMPLATES_NAMESPACE: &str = "openshift";

const TEMPLATE_VALIDATOR_REPLICAS: u32 = 2;

pub struct SspHooks;

impl OperandHooks for SspHooks {
    fn gvk(&self) -> GroupVersionKind {
        kinds::ssp()
    }

    fn name(&self) -> &str {
        NAME
    }

    fn component(&self) -> AppComponent {
        AppComponent::Schedule
    }

    fn build(&self, _ctx: &OperandContext, req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let spec = &req.hc.spec;
        let replicas = if req.infra_highly_available() {
            TEMPLATE_VALIDATOR_REPLICAS
        } else {
            1
        };

        let mut validator = Map::new();
        validator.insert("replicas".to_string(), json!(replicas));
        insert_opt(&mut validator, "placement", spec.infra_placement().map(node_placement));

        let mut labeller = Map::new();
        insert_opt(&mut labeller, "placement", spec.workloads_placement().map(node_placement));

        let namespace = spec
            .common_templates_namespace
            .as_deref()
            .unwrap_or(DEFAULT_COMMON_TEMPLATES_NAMESPACE);
        let mut templates = Map::new();
        templates.insert("namespace".to_string(), json!(namespace));
        let dicts = golden_images::templates(&req.hc)?;
        if !dicts.is_empty() {
            templates.insert(
                "dataImportCronTemplates".to_string(),
                json!(golden_images::to_ssp(&dicts)),
            );
        }

        let mut ssp = new_object(json!({
            "spec": {
                "templateValidator": validator,
                "commonTemplates": templates,
                "nodeLabeller": labeller,
                "tlsSecurityProfile": tls_profile::to_wire(&req.tls_profile()),
            }
        }));
        annotations::apply(&req.hc, annotations::SSP, KIND, &mut ssp)?;
        Ok(ssp)
    }

    fn component_info(&self, ctx: &OperandContext) -> Option<ComponentInfo> {
        Some(ComponentInfo {
            display: KIND,
            version_path: "/status/observedVersion",
            version: ctx.config.component_versions.ssp.clone(),
        })
    }
}
