//! Status aggregation
//!
//! Component conditions are folded into the request's [`ConditionSet`] by
//! [`handle_component_conditions`] while the operands run; [`aggregate`]
//! then fills in the canonical conditions nobody reported, and
//! [`system_health`] summarizes the result.

use crate::request::HcoRequest;
use crds::condition_types::{AVAILABLE, DEGRADED, PROGRESSING, RECONCILE_COMPLETE, UPGRADEABLE};
use crds::{ConditionStatus, HyperConvergedStatus, SystemHealthStatus};
use serde_json::Value;

pub const REASON_INIT: &str = "Init";
pub const MESSAGE_INIT: &str = "Initializing HyperConverged cluster";
pub const REASON_COMPLETED: &str = "ReconcileCompleted";
pub const MESSAGE_COMPLETED: &str = "Reconcile completed successfully";
pub const REASON_FAILED: &str = "ReconcileFailed";
pub const REASON_INVALID_REQUEST: &str = "InvalidRequest";
pub const REASON_DEGRADED: &str = "HCODegraded";
pub const MESSAGE_DEGRADED: &str = "HCO is not available due to degraded components";
pub const MESSAGE_DEGRADED_UPGRADEABLE: &str = "HCO is not Upgradeable due to degraded components";
pub const REASON_UPGRADING: &str = "HCOUpgrading";
pub const REASON_TAINTED: &str = "UnsupportedFeatureAnnotation";
pub const MESSAGE_TAINTED: &str = "Unsupported feature was activated via an HCO annotation";

pub fn upgrading_message(version: &str) -> String {
    format!("HCO is now upgrading to version {version}")
}

pub fn failed_message(err: &impl std::fmt::Display) -> String {
    format!("Error while reconciling: {err}")
}

pub fn invalid_request_message(name: &str, namespace: &str) -> String {
    format!("Request does not match expected name ({name}) and namespace ({namespace})")
}

/// Condition reported by a sibling operator on its own CR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentCondition {
    pub type_: String,
    pub status: String,
    pub message: String,
}

impl ComponentCondition {
    fn is(&self, status: &str) -> bool {
        self.status == status
    }
}

/// Read `status.conditions` of an operand CR
pub fn component_conditions(data: &Value) -> Vec<ComponentCondition> {
    let Some(conditions) = data.pointer("/status/conditions").and_then(Value::as_array) else {
        return Vec::new();
    };
    conditions
        .iter()
        .filter_map(|c| {
            Some(ComponentCondition {
                type_: c.get("type")?.as_str()?.to_string(),
                status: c.get("status")?.as_str()?.to_string(),
                message: c.get("message").and_then(Value::as_str).unwrap_or_default().to_string(),
            })
        })
        .collect()
}

/// Fold the conditions of one operand into the request.
///
/// Returns true when the operand is ready: it reports Available, Progressing
/// and Degraded and none of them is unfavorable.
pub fn handle_component_conditions(req: &mut HcoRequest, kind: &str, conditions: &[ComponentCondition]) -> bool {
    if conditions.is_empty() {
        let reason = format!("{kind}Conditions");
        let message = format!("{kind} resource has no conditions");
        for (type_, status) in [
            (AVAILABLE, ConditionStatus::False),
            (PROGRESSING, ConditionStatus::True),
            (UPGRADEABLE, ConditionStatus::False),
        ] {
            let condition = req.condition(type_, status, reason.clone(), message.clone());
            req.conditions.set(condition);
        }
        return false;
    }

    let mut found_available = false;
    let mut found_progressing = false;
    let mut found_degraded = false;
    let mut negative = false;

    for c in conditions {
        match c.type_.as_str() {
            AVAILABLE => {
                found_available = true;
                if c.is("False") {
                    negative = true;
                    let cond = req.condition(
                        AVAILABLE,
                        ConditionStatus::False,
                        format!("{kind}NotAvailable"),
                        format!("{kind} is not available: {}", c.message),
                    );
                    req.conditions.set(cond);
                }
            }
            PROGRESSING => {
                found_progressing = true;
                if c.is("True") {
                    negative = true;
                    let reason = format!("{kind}Progressing");
                    let progressing = req.condition(
                        PROGRESSING,
                        ConditionStatus::True,
                        reason.clone(),
                        format!("{kind} is progressing: {}", c.message),
                    );
                    let upgradeable = req.condition(
                        UPGRADEABLE,
                        ConditionStatus::False,
                        reason,
                        format!("{kind} is progressing: {}", c.message),
                    );
                    req.conditions.set(progressing);
                    req.conditions.set_if_unset(upgradeable);
                }
            }
            DEGRADED => {
                found_degraded = true;
                if c.is("True") {
                    negative = true;
                    let cond = req.condition(
                        DEGRADED,
                        ConditionStatus::True,
                        format!("{kind}Degraded"),
                        format!("{kind} is degraded: {}", c.message),
                    );
                    req.conditions.set(cond);
                }
            }
            UPGRADEABLE => {
                if c.is("False") {
                    req.upgradeable = false;
                    let cond = req.condition(
                        UPGRADEABLE,
                        ConditionStatus::False,
                        format!("{kind}NotUpgradeable"),
                        format!("{kind} is not upgradeable: {}", c.message),
                    );
                    req.conditions.set(cond);
                }
            }
            _ => {}
        }
    }

    if !found_available {
        let cond = req.condition(
            AVAILABLE,
            ConditionStatus::False,
            format!("{kind}NotAvailable"),
            format!("{kind} resource has no \"Available\" condition"),
        );
        req.conditions.set(cond);
    }

    !negative && found_available && found_progressing && found_degraded
}

/// Conditions of the first pass on a fresh HyperConverged resource
pub fn init_conditions(req: &mut HcoRequest) {
    for (type_, status) in [
        (RECONCILE_COMPLETE, ConditionStatus::Unknown),
        (AVAILABLE, ConditionStatus::False),
        (PROGRESSING, ConditionStatus::True),
        (DEGRADED, ConditionStatus::False),
        (UPGRADEABLE, ConditionStatus::Unknown),
    ] {
        let condition = req.condition(type_, status, REASON_INIT, MESSAGE_INIT);
        req.conditions.set(condition);
    }
}

/// Fill in the canonical conditions no component reported.
///
/// Returns true when no component reported anything, i.e. every operand is
/// up.
pub fn aggregate(req: &mut HcoRequest) -> bool {
    let all_up = req.conditions.is_empty();

    let completed = req.condition(RECONCILE_COMPLETE, ConditionStatus::True, REASON_COMPLETED, MESSAGE_COMPLETED);
    req.conditions.set_if_unset(completed);

    if req.conditions.has(DEGRADED) {
        let progressing = req.condition(PROGRESSING, ConditionStatus::False, REASON_COMPLETED, MESSAGE_COMPLETED);
        let upgradeable = req.condition(UPGRADEABLE, ConditionStatus::False, REASON_DEGRADED, MESSAGE_DEGRADED_UPGRADEABLE);
        let available = req.condition(AVAILABLE, ConditionStatus::False, REASON_DEGRADED, MESSAGE_DEGRADED);
        req.conditions.set_if_unset(progressing);
        req.conditions.set_if_unset(upgradeable);
        req.conditions.set_if_unset(available);
        return all_up;
    }

    let not_degraded = req.condition(DEGRADED, ConditionStatus::False, REASON_COMPLETED, MESSAGE_COMPLETED);
    req.conditions.set(not_degraded);

    if req.conditions.has(PROGRESSING) {
        let upgradeable = req.condition(UPGRADEABLE, ConditionStatus::False, REASON_COMPLETED, MESSAGE_COMPLETED);
        let available = req.condition(AVAILABLE, ConditionStatus::True, REASON_COMPLETED, MESSAGE_COMPLETED);
        req.conditions.set_if_unset(upgradeable);
        req.conditions.set_if_unset(available);
    } else {
        let progressing = req.condition(PROGRESSING, ConditionStatus::False, REASON_COMPLETED, MESSAGE_COMPLETED);
        let upgradeable = req.condition(UPGRADEABLE, ConditionStatus::True, REASON_COMPLETED, MESSAGE_COMPLETED);
        let available = req.condition(AVAILABLE, ConditionStatus::True, REASON_COMPLETED, MESSAGE_COMPLETED);
        req.conditions.set(progressing);
        req.conditions.set_if_unset(upgradeable);
        req.conditions.set_if_unset(available);
    }

    all_up
}

/// Mark the pass as still upgrading
pub fn set_upgrading(req: &mut HcoRequest, version: &str) {
    let message = upgrading_message(version);
    let progressing = req.condition(PROGRESSING, ConditionStatus::True, REASON_UPGRADING, message.clone());
    let upgradeable = req.condition(UPGRADEABLE, ConditionStatus::False, REASON_UPGRADING, message);
    req.conditions.set(progressing);
    req.conditions.set(upgradeable);
}

/// Summary of the stored conditions
pub fn system_health(status: &HyperConvergedStatus) -> SystemHealthStatus {
    let is_true = |type_: &str| status.condition(type_).is_some_and(|c| c.is_true());
    if !is_true(AVAILABLE) || is_true(DEGRADED) {
        SystemHealthStatus::Error
    } else if is_true(PROGRESSING) || !is_true(RECONCILE_COMPLETE) {
        SystemHealthStatus::Warning
    } else {
        SystemHealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_info::Capabilities;
    use crds::HyperConverged;
    use serde_json::json;

    fn request() -> HcoRequest {
        HcoRequest::new(HyperConverged::with_defaults("kubevirt-hyperconverged"), Capabilities::default(), true)
    }

    fn conditions(available: &str, progressing: &str, degraded: &str) -> Vec<ComponentCondition> {
        component_conditions(&json!({
            "status": {"conditions": [
                {"type": "Available", "status": available, "message": "a"},
                {"type": "Progressing", "status": progressing, "message": "p"},
                {"type": "Degraded", "status": degraded, "message": "d"},
            ]}
        }))
    }

    fn reason_of(req: &HcoRequest, type_: &str) -> String {
        req.conditions.get(type_).map(|c| c.reason.clone()).unwrap_or_default()
    }

    #[test]
    fn test_favorable_component_is_ready() {
        let mut req = request();
        assert!(handle_component_conditions(&mut req, "KubeVirt", &conditions("True", "False", "False")));
        assert!(req.conditions.is_empty());

        assert!(aggregate(&mut req));
        for (type_, status) in [
            (RECONCILE_COMPLETE, ConditionStatus::True),
            (AVAILABLE, ConditionStatus::True),
            (PROGRESSING, ConditionStatus::False),
            (DEGRADED, ConditionStatus::False),
            (UPGRADEABLE, ConditionStatus::True),
        ] {
            let c = req.conditions.get(type_).unwrap();
            assert_eq!(c.status, status, "{type_}");
            assert_eq!(c.reason, REASON_COMPLETED);
        }
    }

    #[test]
    fn test_component_without_conditions() {
        let mut req = request();
        assert!(!handle_component_conditions(&mut req, "CDI", &[]));
        let available = req.conditions.get(AVAILABLE).unwrap();
        assert_eq!(available.reason, "CDIConditions");
        assert_eq!(available.message, "CDI resource has no conditions");
        assert!(req.conditions.get(PROGRESSING).unwrap().is_true());
        assert!(req.conditions.get(UPGRADEABLE).unwrap().is_false());
    }

    #[test]
    fn test_missing_available_condition() {
        let mut req = request();
        let conds = component_conditions(&json!({
            "status": {"conditions": [{"type": "Degraded", "status": "False"}]}
        }));
        assert!(!handle_component_conditions(&mut req, "SSP", &conds));
        assert_eq!(
            req.conditions.get(AVAILABLE).unwrap().message,
            "SSP resource has no \"Available\" condition"
        );
    }

    #[test]
    fn test_degraded_component_forces_common_degraded_reason() {
        let mut req = request();
        handle_component_conditions(&mut req, "KubeVirt", &conditions("True", "False", "False"));
        assert!(!handle_component_conditions(&mut req, "CDI", &conditions("True", "False", "True")));
        assert!(!aggregate(&mut req));

        assert!(req.conditions.get(DEGRADED).unwrap().is_true());
        assert_eq!(reason_of(&req, DEGRADED), "CDIDegraded");
        assert!(req.conditions.get(AVAILABLE).unwrap().is_false());
        assert_eq!(reason_of(&req, AVAILABLE), REASON_DEGRADED);
        assert!(req.conditions.get(UPGRADEABLE).unwrap().is_false());
        assert_eq!(reason_of(&req, UPGRADEABLE), REASON_DEGRADED);
        assert!(req.conditions.get(PROGRESSING).unwrap().is_false());
        assert!(req.upgradeable, "degradation alone does not block the operator upgrade");
    }

    #[test]
    fn test_not_upgradeable_wins_over_progressing() {
        let mut req = request();
        let conds = component_conditions(&json!({
            "status": {"conditions": [
                {"type": "Available", "status": "True"},
                {"type": "Progressing", "status": "True", "message": "rolling"},
                {"type": "Degraded", "status": "False"},
                {"type": "Upgradeable", "status": "False", "message": "pinned"},
            ]}
        }));
        handle_component_conditions(&mut req, "SSP", &conds);
        aggregate(&mut req);
        assert_eq!(reason_of(&req, UPGRADEABLE), "SSPNotUpgradeable");
        assert_eq!(req.conditions.get(UPGRADEABLE).unwrap().message, "SSP is not upgradeable: pinned");
        assert_eq!(reason_of(&req, PROGRESSING), "SSPProgressing");
        assert!(req.conditions.get(AVAILABLE).unwrap().is_true());
        assert!(!req.upgradeable);
    }

    #[test]
    fn test_last_faulty_component_wins() {
        let mut req = request();
        handle_component_conditions(&mut req, "KubeVirt", &conditions("False", "False", "False"));
        handle_component_conditions(&mut req, "CDI", &conditions("False", "False", "False"));
        assert_eq!(reason_of(&req, AVAILABLE), "CDINotAvailable");
    }

    #[test]
    fn test_system_health_mapping() {
        let mut status = HyperConvergedStatus::default();
        let now = chrono::Utc::now();
        for (type_, value) in [
            (RECONCILE_COMPLETE, ConditionStatus::True),
            (AVAILABLE, ConditionStatus::True),
            (PROGRESSING, ConditionStatus::False),
            (DEGRADED, ConditionStatus::False),
        ] {
            status.set_condition(crds::Condition::new(type_, value, REASON_COMPLETED, ""), now);
        }
        assert_eq!(system_health(&status), SystemHealthStatus::Healthy);

        status.set_condition(crds::Condition::new(PROGRESSING, ConditionStatus::True, "x", ""), now);
        assert_eq!(system_health(&status), SystemHealthStatus::Warning);

        status.set_condition(crds::Condition::new(DEGRADED, ConditionStatus::True, "x", ""), now);
        assert_eq!(system_health(&status), SystemHealthStatus::Error);
    }
}
