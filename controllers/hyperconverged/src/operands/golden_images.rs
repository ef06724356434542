//! Golden image templates handed to SSP
//!
//! The common templates are embedded in the binary. The spec can add its own,
//! customise a common one by reusing its name, or switch one off with the
//! enable annotation. Common templates are left out entirely when boot image
//! import is disabled.

use crate::error::ControllerError;
use crate::request::HcoRequest;
use crds::{DataImportCronStatus, DataImportCronTemplate, DataImportCronTemplateStatus, HyperConverged};
use serde_json::{json, Value};
use std::collections::BTreeMap;

const COMMON_TEMPLATES: &str = include_str!("../../resources/dataImportCronTemplates/dataImportCronTemplates.yaml");

/// Binds the volume right away instead of waiting for a first consumer
pub const IMMEDIATE_BIND_ANNOTATION: &str = "cdi.kubevirt.io/storage.bind.immediate.requested";

const KIND: &str = "DataImportCronTemplate";

/// Where the image streams of the golden images live by default
pub const DEFAULT_BOOT_IMAGE_NAMESPACE: &str = "openshift-virtualization-os-images";

pub fn boot_image_import_enabled(hc: &HyperConverged) -> bool {
    hc.spec.enable_common_boot_image_import.is_none_or(|on| on)
}

/// `commonBootImageNamespace`, or the default
pub fn boot_image_namespace(req: &HcoRequest) -> &str {
    req.hc
        .spec
        .common_boot_image_namespace
        .as_deref()
        .filter(|ns| !ns.is_empty())
        .unwrap_or(DEFAULT_BOOT_IMAGE_NAMESPACE)
}

/// Embedded common templates by name
pub fn common_templates() -> Result<BTreeMap<String, DataImportCronTemplate>, ControllerError> {
    parse_templates(COMMON_TEMPLATES)
}

fn parse_templates(manifest: &str) -> Result<BTreeMap<String, DataImportCronTemplate>, ControllerError> {
    let list: Vec<DataImportCronTemplate> = serde_yaml::from_str(manifest)?;
    Ok(list.into_iter().map(|t| (t.metadata.name.clone(), t)).collect())
}

/// Merged template list, sorted by name
pub fn templates(hc: &HyperConverged) -> Result<Vec<DataImportCronTemplateStatus>, ControllerError> {
    merge(&common_templates()?, hc)
}

fn merge(
    common: &BTreeMap<String, DataImportCronTemplate>,
    hc: &HyperConverged,
) -> Result<Vec<DataImportCronTemplateStatus>, ControllerError> {
    let mut requested = BTreeMap::new();
    for dict in &hc.spec.data_import_cron_templates {
        if requested.insert(dict.name().to_string(), dict).is_some() {
            return Err(ControllerError::operand_build(
                KIND,
                format!("{} is defined more than once", dict.name()),
            ));
        }
    }

    let mut list = Vec::new();
    if boot_image_import_enabled(hc) {
        let boot_namespace = hc
            .spec
            .common_boot_image_namespace
            .as_deref()
            .filter(|ns| !ns.is_empty());
        for (name, dict) in common {
            let mut target = DataImportCronTemplateStatus {
                template: dict.clone(),
                status: DataImportCronStatus {
                    common_template: true,
                    modified: false,
                },
            };
            match requested.get(name) {
                Some(custom) if !custom.is_enabled() => continue,
                Some(custom) => customise(&mut target, custom),
                None => {
                    if let Some(ns) = boot_namespace {
                        target.template.metadata.namespace = Some(ns.to_string());
                    }
                }
            }
            list.push(target);
        }
    }

    for (name, dict) in requested {
        if common.contains_key(&name) || !dict.is_enabled() {
            continue;
        }
        list.push(DataImportCronTemplateStatus {
            template: dict.clone(),
            status: DataImportCronStatus::default(),
        });
    }

    list.sort_by(|a, b| a.template.name().cmp(b.template.name()));
    Ok(list)
}

/// A common template overridden from the spec; the schedule is kept unless
/// the spec sets one
fn customise(target: &mut DataImportCronTemplateStatus, custom: &DataImportCronTemplate) {
    let mut spec = custom.spec.clone().unwrap_or_else(|| json!({}));
    if custom.schedule().is_none()
        && let Some(schedule) = target.template.schedule()
        && let Some(map) = spec.as_object_mut()
    {
        map.insert("schedule".to_string(), json!(schedule));
    }

    if let Some(extra) = custom.metadata.annotations.as_ref() {
        target
            .template
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    target.template.spec = Some(spec);
    target.template.metadata.namespace = custom.metadata.namespace.clone();
    target.status.modified = true;
}

/// SSP form of the merged list
pub fn to_ssp(list: &[DataImportCronTemplateStatus]) -> Vec<Value> {
    list.iter()
        .map(|dict| {
            let mut metadata = dict.template.metadata.clone();
            metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .entry(IMMEDIATE_BIND_ANNOTATION.to_string())
                .or_insert_with(|| "true".to_string());
            json!({
                "metadata": metadata,
                "spec": dict.template.spec.clone().unwrap_or_else(|| json!({})),
            })
        })
        .collect()
}
