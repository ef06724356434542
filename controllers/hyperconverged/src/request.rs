//! State carried through one reconciliation pass

use crate::cluster_info::Capabilities;
use crate::tls_profile;
use cluster_client::api_version;
use crds::{Condition, HyperConverged, ObjectReference, TlsSecurityProfile};
use kube::api::{DynamicObject, GroupVersionKind};
use std::collections::BTreeMap;

/// Conditions collected from the components during a pass, one per type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionSet {
    conditions: BTreeMap<String, Condition>,
}

impl ConditionSet {
    pub fn set(&mut self, condition: Condition) {
        self.conditions.insert(condition.type_.clone(), condition);
    }

    /// Set the condition unless one of the same type is already present
    pub fn set_if_unset(&mut self, condition: Condition) {
        self.conditions.entry(condition.type_.clone()).or_insert(condition);
    }

    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.conditions.get(type_)
    }

    pub fn has(&self, type_: &str) -> bool {
        self.conditions.contains_key(type_)
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.conditions.values()
    }
}

#[derive(Debug, Clone)]
pub struct HcoRequest {
    /// Working copy of the HyperConverged resource
    pub hc: HyperConverged,
    pub caps: Capabilities,
    pub conditions: ConditionSet,
    pub upgrade_mode: bool,
    /// AND of the handlers' upgrade-done flags; starts equal to `upgrade_mode`
    pub component_upgrade_in_progress: bool,
    /// Spec or metadata must be written back
    pub dirty: bool,
    /// False only for passes triggered by a child change
    pub hco_triggered: bool,
    /// False once a component reported `Upgradeable=False`
    pub upgradeable: bool,
    related_objects: Vec<ObjectReference>,
}

impl HcoRequest {
    pub fn new(hc: HyperConverged, caps: Capabilities, hco_triggered: bool) -> Self {
        Self {
            hc,
            caps,
            conditions: ConditionSet::default(),
            upgrade_mode: false,
            component_upgrade_in_progress: false,
            dirty: false,
            hco_triggered,
            upgradeable: true,
            related_objects: Vec::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        self.hc.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.hc.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn generation(&self) -> Option<i64> {
        self.hc.metadata.generation
    }

    /// Condition stamped with the generation of the resource
    pub fn condition(
        &self,
        type_: &str,
        status: crds::ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Condition {
        let mut condition = Condition::new(type_, status, reason, message);
        condition.observed_generation = self.generation();
        condition
    }

    /// Record an object produced in this pass
    pub fn add_related_object(&mut self, gvk: &GroupVersionKind, obj: &DynamicObject) {
        let reference = ObjectReference {
            api_version: api_version(gvk),
            kind: gvk.kind.clone(),
            name: obj.metadata.name.clone().unwrap_or_default(),
            namespace: obj.metadata.namespace.clone(),
            resource_version: obj.metadata.resource_version.clone(),
            uid: obj.metadata.uid.clone(),
        };
        match self.related_objects.iter_mut().find(|r| r.same_object(&reference)) {
            Some(existing) => *existing = reference,
            None => self.related_objects.push(reference),
        }
    }

    pub fn related_objects(&self) -> &[ObjectReference] {
        &self.related_objects
    }

    /// TLS profile handed to the operands in this pass
    pub fn tls_profile(&self) -> TlsSecurityProfile {
        tls_profile::effective(
            self.hc.spec.tls_security_profile.as_ref(),
            self.caps.api_server_tls_profile.as_ref(),
        )
    }

    /// Whether the control plane can run more than one replica of the
    /// infrastructure components
    pub fn infra_highly_available(&self) -> bool {
        self.hc
            .status
            .as_ref()
            .and_then(|s| s.infrastructure_highly_available)
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::ConditionStatus;
    use kube::api::ObjectMeta;

    #[test]
    fn test_set_if_unset_keeps_first() {
        let mut set = ConditionSet::default();
        set.set_if_unset(Condition::new("Upgradeable", ConditionStatus::False, "CDIProgressing", ""));
        set.set_if_unset(Condition::new("Upgradeable", ConditionStatus::False, "KubeVirtProgressing", ""));
        assert_eq!(set.get("Upgradeable").unwrap().reason, "CDIProgressing");
        set.set(Condition::new("Upgradeable", ConditionStatus::False, "SSPNotUpgradeable", ""));
        assert_eq!(set.get("Upgradeable").unwrap().reason, "SSPNotUpgradeable");
    }

    #[test]
    fn test_related_objects_are_upserted() {
        let mut req = HcoRequest::new(HyperConverged::with_defaults("ns"), Capabilities::default(), true);
        let gvk = GroupVersionKind::gvk("", "v1", "ConfigMap");
        let mut obj = DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some("virtio-win".to_string()),
                namespace: Some("ns".to_string()),
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            data: serde_json::json!({}),
        };
        req.add_related_object(&gvk, &obj);
        obj.metadata.resource_version = Some("2".to_string());
        req.add_related_object(&gvk, &obj);
        assert_eq!(req.related_objects().len(), 1);
        assert_eq!(req.related_objects()[0].resource_version.as_deref(), Some("2"));
        assert_eq!(req.related_objects()[0].api_version, "v1");
    }
}
