//! Console quick starts
//!
//! Guided tours shipped with the engine; the embedded manifests are copied
//! into `ConsoleQuickStart` objects.

use super::generic::{new_object, OperandHooks, Scope};
use super::labels::AppComponent;
use super::OperandContext;
use crate::error::ControllerError;
use crate::kinds;
use crate::request::HcoRequest;
use kube::api::{DynamicObject, GroupVersionKind};
use serde_json::{json, Value};

const QUICK_STARTS: &[(&str, &str)] = &[
    (
        "connect-ext-net-to-vm",
        include_str!("../../resources/quickstarts/connect-ext-net-to-vm.yaml"),
    ),
    (
        "creating-virtual-machine-from-volume",
        include_str!("../../resources/quickstarts/creating-vm-from-volume.yaml"),
    ),
];

pub struct QuickStartHooks {
    name: &'static str,
    manifest: &'static str,
}

/// One operand per embedded quick start
pub fn hooks() -> Vec<QuickStartHooks> {
    QUICK_STARTS
        .iter()
        .map(|&(name, manifest)| QuickStartHooks { name, manifest })
        .collect()
}

impl OperandHooks for QuickStartHooks {
    fn gvk(&self) -> GroupVersionKind {
        kinds::console_quick_start()
    }

    fn name(&self) -> &str {
        self.name
    }

    fn scope(&self) -> Scope {
        Scope::Cluster
    }

    fn component(&self) -> AppComponent {
        AppComponent::Compute
    }

    fn build(&self, _ctx: &OperandContext, _req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let manifest: Value = serde_yaml::from_str(self.manifest)?;
        let spec = manifest.get("spec").cloned().ok_or_else(|| {
            ControllerError::operand_build("ConsoleQuickStart", format!("{} has no spec", self.name))
        })?;
        Ok(new_object(json!({ "spec": spec })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_quick_starts_match_their_names() {
        for (name, manifest) in QUICK_STARTS {
            let value: Value = serde_yaml::from_str(manifest).unwrap();
            assert_eq!(value["metadata"]["name"], *name);
            assert!(value["spec"]["tasks"].as_array().is_some_and(|t| !t.is_empty()));
        }
    }
}
