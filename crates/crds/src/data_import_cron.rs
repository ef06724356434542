//! Golden image templates
//!
//! A `DataImportCronTemplate` describes a periodically refreshed boot image.
//! The engine ships a set of common templates and merges them with the ones
//! listed in the HyperConverged spec; the merged list is reported back in the
//! status.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Set to anything but `true` on a template to switch it off
pub const DICT_ENABLE_ANNOTATION: &str = "dataimportcrontemplate.kubevirt.io/enable";

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DictMetadata {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataImportCronTemplate {
    #[serde(default)]
    pub metadata: DictMetadata,

    /// DataImportCron spec, passed through to SSP verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<serde_json::Value>,
}

impl DataImportCronTemplate {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Templates are on unless the enable annotation says otherwise
    pub fn is_enabled(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(DICT_ENABLE_ANNOTATION))
            .is_none_or(|v| v.eq_ignore_ascii_case("true"))
    }

    pub fn schedule(&self) -> Option<&str> {
        self.spec
            .as_ref()
            .and_then(|s| s.get("schedule"))
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DataImportCronStatus {
    /// Shipped with the engine rather than listed in the spec
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub common_template: bool,

    /// A common template customised by the spec
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub modified: bool,
}

/// A template as handed to SSP, with its origin
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataImportCronTemplateStatus {
    #[serde(flatten)]
    pub template: DataImportCronTemplate,

    #[serde(default)]
    pub status: DataImportCronStatus,
}
