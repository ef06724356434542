//! HyperConverged status types
//!
//! Conditions, related object references and version markers. The
//! condition helpers follow the usual Kubernetes convention: the
//! transition time only moves when the status value changes, so two
//! passes over an unchanged cluster serialize to the same bytes.

use crate::data_import_cron::DataImportCronTemplateStatus;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition types reported on the HyperConverged resource
pub mod condition_types {
    pub const RECONCILE_COMPLETE: &str = "ReconcileComplete";
    pub const AVAILABLE: &str = "Available";
    pub const PROGRESSING: &str = "Progressing";
    pub const DEGRADED: &str = "Degraded";
    pub const UPGRADEABLE: &str = "Upgradeable";
    pub const TAINTED_CONFIGURATION: &str = "TaintedConfiguration";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Objects produced by the last reconciliation pass
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_objects: Vec<ObjectReference>,

    /// Last fully reconciled version per component; `operator` is the engine
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<Version>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_health_status: Option<SystemHealthStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_highly_available: Option<bool>,

    /// Golden images as handed to SSP
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_import_cron_templates: Vec<DataImportCronTemplateStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: None,
            observed_generation: None,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    pub fn is_false(&self) -> bool {
        self.status == ConditionStatus::False
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl ConditionStatus {
    pub fn from_bool(value: bool) -> Self {
        if value { ConditionStatus::True } else { ConditionStatus::False }
    }
}

/// Reference to a managed child, refreshed on every pass
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl ObjectReference {
    /// Two references denote the same object regardless of version markers
    pub fn same_object(&self, other: &ObjectReference) -> bool {
        self.kind == other.kind && self.name == other.name && self.namespace == other.namespace
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Version {
    pub name: String,
    pub version: String,
}

/// Summary health of the whole installation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SystemHealthStatus {
    Healthy,
    Warning,
    Error,
}

impl SystemHealthStatus {
    /// Value exported by the system health gauge
    pub fn metric_value(self) -> f64 {
        match self {
            SystemHealthStatus::Healthy => 0.0,
            SystemHealthStatus::Warning => 1.0,
            SystemHealthStatus::Error => 2.0,
        }
    }
}

/// Upsert `condition` into `conditions`. Returns true when anything
/// observable changed. The transition time only moves with the status.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition, now: DateTime<Utc>) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            let mut changed = false;
            if existing.status != condition.status {
                existing.status = condition.status;
                existing.last_transition_time = Some(now);
                changed = true;
            }
            if existing.reason != condition.reason {
                existing.reason = condition.reason;
                changed = true;
            }
            if existing.message != condition.message {
                existing.message = condition.message;
                changed = true;
            }
            if condition.observed_generation.is_some()
                && existing.observed_generation != condition.observed_generation
            {
                existing.observed_generation = condition.observed_generation;
                changed = true;
            }
            changed
        }
        None => {
            condition.last_transition_time = Some(now);
            conditions.push(condition);
            true
        }
    }
}

impl HyperConvergedStatus {
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Upsert a condition. Returns true when anything observable changed.
    pub fn set_condition(&mut self, condition: Condition, now: DateTime<Utc>) -> bool {
        set_condition(&mut self.conditions, condition, now)
    }

    pub fn remove_condition(&mut self, type_: &str) -> bool {
        let before = self.conditions.len();
        self.conditions.retain(|c| c.type_ != type_);
        before != self.conditions.len()
    }

    pub fn version(&self, name: &str) -> Option<&str> {
        self.versions
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.version.as_str())
    }

    /// Record the version of a component. Returns true on change.
    pub fn update_version(&mut self, name: &str, version: &str) -> bool {
        match self.versions.iter_mut().find(|v| v.name == name) {
            Some(existing) if existing.version == version => false,
            Some(existing) => {
                existing.version = version.to_string();
                true
            }
            None => {
                self.versions.push(Version {
                    name: name.to_string(),
                    version: version.to_string(),
                });
                true
            }
        }
    }
}
