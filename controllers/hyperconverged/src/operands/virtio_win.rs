//! virtio-win driver image
//!
//! The image reference is published in a ConfigMap that every
//! authenticated user may read, so UIs can attach the driver disk to new
//! Windows guests.

use super::generic::{DiffRule, OperandHooks};
use super::labels::AppComponent;
use super::OperandContext;
use crate::error::ControllerError;
use crate::request::HcoRequest;
use cluster_client::{gvk_of, to_dynamic};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use kube::api::{DynamicObject, GroupVersionKind};
use std::collections::BTreeMap;

pub const CONFIG_MAP_NAME: &str = "virtio-win";

pub const READER_NAME: &str = "hco.kubevirt.io:config-reader";

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

pub struct VirtioWinConfigMap;

impl OperandHooks for VirtioWinConfigMap {
    fn gvk(&self) -> GroupVersionKind {
        gvk_of::<ConfigMap>()
    }

    fn name(&self) -> &str {
        CONFIG_MAP_NAME
    }

    fn component(&self) -> AppComponent {
        AppComponent::Storage
    }

    fn build(&self, ctx: &OperandContext, _req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let cm = ConfigMap {
            data: Some(BTreeMap::from([(
                "virtio-win-image".to_string(),
                ctx.config.images.virtio_win.clone(),
            )])),
            ..Default::default()
        };
        Ok(to_dynamic(&cm)?)
    }

    fn diff_rule(&self) -> DiffRule {
        DiffRule::ConfigMapData
    }
}

pub struct ConfigReaderRole;

impl OperandHooks for ConfigReaderRole {
    fn gvk(&self) -> GroupVersionKind {
        gvk_of::<Role>()
    }

    fn name(&self) -> &str {
        READER_NAME
    }

    fn component(&self) -> AppComponent {
        AppComponent::Storage
    }

    fn build(&self, _ctx: &OperandContext, _req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let role = Role {
            rules: Some(vec![PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec!["configmaps".to_string()]),
                resource_names: Some(vec![CONFIG_MAP_NAME.to_string()]),
                verbs: vec!["get".to_string(), "watch".to_string(), "list".to_string()],
                ..Default::default()
            }]),
            ..Default::default()
        };
        Ok(to_dynamic(&role)?)
    }

    fn diff_rule(&self) -> DiffRule {
        DiffRule::Role
    }
}

pub struct ConfigReaderRoleBinding;

impl OperandHooks for ConfigReaderRoleBinding {
    fn gvk(&self) -> GroupVersionKind {
        gvk_of::<RoleBinding>()
    }

    fn name(&self) -> &str {
        READER_NAME
    }

    fn component(&self) -> AppComponent {
        AppComponent::Storage
    }

    fn build(&self, _ctx: &OperandContext, _req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let binding = RoleBinding {
            role_ref: RoleRef {
                api_group: RBAC_GROUP.to_string(),
                kind: "Role".to_string(),
                name: READER_NAME.to_string(),
            },
            subjects: Some(vec![Subject {
                api_group: Some(RBAC_GROUP.to_string()),
                kind: "Group".to_string(),
                name: "system:authenticated".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        };
        Ok(to_dynamic(&binding)?)
    }

    fn diff_rule(&self) -> DiffRule {
        DiffRule::RoleBinding
    }
}
