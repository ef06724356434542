//! Build-then-reconcile template shared by every operand
//!
//! The hooks supply the desired object and say which parts of it the engine
//! owns; the template does the rest: fetch, create, diff, heal labels and
//! owner references, update, and report the component state.

use super::golden_images;
use super::labels::{self, AppComponent, APP_LABEL};
use super::{EnsureResult, Operand, OperandContext};
use crate::error::{ControllerError, UninstallKind};
use crate::request::HcoRequest;
use crate::status::{component_conditions, handle_component_conditions};
use crds::{HCO_GROUP, HCO_VERSION};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DynamicObject, GroupVersionKind};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Where the child lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Namespace of the HyperConverged resource
    Hc,
    Cluster,
    Namespace(&'static str),
    /// Namespace of the imported golden images
    BootImages,
}

/// Which fields of the child the engine owns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffRule {
    /// `spec` must equal the desired one
    Spec,
    /// Every field set in the desired `spec` must match; fields defaulted by
    /// the API server are left alone
    SpecSubset,
    /// `spec`, keeping the cluster-assigned `clusterIP` and `clusterIPs`
    Service,
    /// `spec`, keeping the generated `host`
    Route,
    ConfigMapData,
    Role,
    RoleBinding,
    /// `value`, `globalDefault` and `description`; a new value recreates the
    /// object since the field is immutable
    PriorityClass,
    /// Top-level fields of a SecurityContextConstraints
    Scc,
    /// Only labels and owner references
    MetadataOnly,
}

impl DiffRule {
    fn fields(self) -> &'static [&'static str] {
        match self {
            DiffRule::Spec | DiffRule::SpecSubset | DiffRule::Service | DiffRule::Route => &["spec"],
            DiffRule::ConfigMapData => &["data", "binaryData"],
            DiffRule::Role => &["rules"],
            DiffRule::RoleBinding => &["roleRef", "subjects"],
            DiffRule::PriorityClass => &["value", "globalDefault", "description"],
            DiffRule::Scc => &[
                "allowPrivilegedContainer",
                "allowHostDirVolumePlugin",
                "allowHostIPC",
                "allowHostNetwork",
                "allowHostPID",
                "allowHostPorts",
                "readOnlyRootFilesystem",
                "runAsUser",
                "seLinuxContext",
                "supplementalGroups",
                "allowedCapabilities",
                "allowedUnsafeSysctls",
                "seccompProfiles",
                "users",
                "volumes",
            ],
            DiffRule::MetadataOnly => &[],
        }
    }
}

/// Who owns the child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerPolicy {
    /// Controller reference to the HyperConverged resource
    Hc,
    /// Non-controller reference to the operator Deployment
    Deployment,
    /// Cluster-scoped or cross-namespace children; removed by the teardown
    None,
}

/// Status reporting of a sibling operator CR
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    /// Prefix of the condition reasons, e.g. `KubeVirt`
    pub display: &'static str,
    /// JSON pointer to the observed version
    pub version_path: &'static str,
    /// Configured version; empty never matches
    pub version: String,
}

pub trait OperandHooks: Send + Sync + 'static {
    fn gvk(&self) -> GroupVersionKind;

    fn name(&self) -> &str;

    fn scope(&self) -> Scope {
        Scope::Hc
    }

    fn component(&self) -> AppComponent;

    /// Desired object; metadata name, namespace, labels and owners are
    /// filled in by the template
    fn build(&self, ctx: &OperandContext, req: &HcoRequest) -> Result<DynamicObject, ControllerError>;

    fn diff_rule(&self) -> DiffRule {
        DiffRule::Spec
    }

    fn owner(&self) -> OwnerPolicy {
        OwnerPolicy::Hc
    }

    fn component_info(&self, _ctx: &OperandContext) -> Option<ComponentInfo> {
        None
    }

    fn deleted_on_teardown(&self) -> bool {
        true
    }

    fn uninstall_kind(&self) -> UninstallKind {
        UninstallKind::Hco
    }
}

/// Empty object of a kind, ready to be filled by a builder
pub fn new_object(data: Value) -> DynamicObject {
    DynamicObject {
        types: None,
        metadata: Default::default(),
        data,
    }
}

pub struct GenericOperand<H: OperandHooks> {
    hooks: H,
    ctx: Arc<OperandContext>,
    kind: String,
    desired: Mutex<Option<Arc<DynamicObject>>>,
}

impl<H: OperandHooks> GenericOperand<H> {
    pub fn new(hooks: H, ctx: Arc<OperandContext>) -> Self {
        let kind = hooks.gvk().kind;
        Self {
            hooks,
            ctx,
            kind,
            desired: Mutex::new(None),
        }
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn context(&self) -> &OperandContext {
        &self.ctx
    }

    fn namespace(&self, req: &HcoRequest) -> Option<String> {
        match self.hooks.scope() {
            Scope::Hc => Some(req.namespace().to_string()),
            Scope::Cluster => None,
            Scope::Namespace(ns) => Some(ns.to_string()),
            Scope::BootImages => Some(golden_images::boot_image_namespace(req).to_string()),
        }
    }

    fn owner_reference(&self, req: &HcoRequest) -> Option<OwnerReference> {
        match self.hooks.owner() {
            OwnerPolicy::Hc => Some(OwnerReference {
                api_version: format!("{HCO_GROUP}/{HCO_VERSION}"),
                kind: "HyperConverged".to_string(),
                name: req.name().to_string(),
                uid: req.hc.metadata.uid.clone()?,
                controller: Some(true),
                block_owner_deletion: Some(true),
            }),
            OwnerPolicy::Deployment => self.ctx.own.deployment_ref(),
            OwnerPolicy::None => None,
        }
    }

    /// Desired child, built once per pass
    pub fn desired(&self, req: &HcoRequest) -> Result<Arc<DynamicObject>, ControllerError> {
        let mut cached = self.desired.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(desired) = cached.as_ref() {
            return Ok(Arc::clone(desired));
        }

        let mut obj = self.hooks.build(&self.ctx, req)?;
        obj.metadata.name = Some(self.hooks.name().to_string());
        obj.metadata.namespace = self.namespace(req);
        let managed = labels::managed_labels(req.name(), &self.ctx.config.version, self.hooks.component());
        obj.metadata.labels = Some(labels::merge(&managed, obj.metadata.labels.as_ref()));
        obj.metadata.owner_references = self.owner_reference(req).map(|o| vec![o]);

        let desired = Arc::new(obj);
        *cached = Some(Arc::clone(&desired));
        Ok(desired)
    }

    /// Delete the child from `namespace` if it carries our `app` label
    pub async fn delete_from(&self, req: &HcoRequest, namespace: Option<&str>) -> Result<bool, ControllerError> {
        let gvk = self.hooks.gvk();
        let found = match self.ctx.client.get(&gvk, namespace, self.hooks.name()).await {
            Ok(found) => found,
            Err(e) if e.is_no_kind_match() => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let Some(found) = found else {
            return Ok(false);
        };
        if !managed_by(&found, req.name()) {
            debug!("{} {} is not managed by {}, leaving it", self.kind, self.hooks.name(), req.name());
            return Ok(false);
        }
        info!("Removing {} {}", self.kind, self.hooks.name());
        Ok(self.ctx.client.delete(&gvk, namespace, self.hooks.name()).await?)
    }

    /// Desired body field, with the parts the cluster assigns carried over
    fn desired_field(&self, field: &str, desired: &DynamicObject, found: &DynamicObject) -> Option<Value> {
        let mut value = desired.data.get(field).cloned()?;
        let carried: &[&str] = match self.hooks.diff_rule() {
            DiffRule::Service => &["clusterIP", "clusterIPs"],
            DiffRule::Route => &["host"],
            _ => &[],
        };
        if let Some(spec) = value.as_object_mut() {
            for key in carried {
                if let Some(v) = found.data.get(field).and_then(|f| f.get(*key)) {
                    spec.insert((*key).to_string(), v.clone());
                }
            }
        }
        Some(value)
    }

    fn field_matches(&self, desired: Option<&Value>, found: Option<&Value>) -> bool {
        match (self.hooks.diff_rule(), desired, found) {
            (DiffRule::SpecSubset, Some(d), Some(f)) => is_subset(d, f),
            (_, d, f) => d == f,
        }
    }

    async fn reconcile_existing(
        &self,
        desired: &DynamicObject,
        found: DynamicObject,
    ) -> Result<(DynamicObject, bool), ControllerError> {
        let gvk = self.hooks.gvk();
        let rule = self.hooks.diff_rule();

        if rule == DiffRule::PriorityClass && desired.data.get("value") != found.data.get("value") {
            info!("Value of {} {} changed, recreating it", self.kind, self.hooks.name());
            self.ctx
                .client
                .delete(&gvk, found.metadata.namespace.as_deref(), self.hooks.name())
                .await?;
            let mut fresh = desired.clone();
            fresh.metadata.resource_version = None;
            return Ok((self.ctx.client.create(&gvk, &fresh).await?, true));
        }

        let mut target = found.clone();
        let mut changed = false;

        for field in rule.fields() {
            let want = self.desired_field(field, desired, &found);
            // fields a constraints object leaves unset are not ours
            if rule == DiffRule::Scc && want.is_none() {
                continue;
            }
            if self.field_matches(want.as_ref(), found.data.get(*field)) {
                continue;
            }
            debug!("{} {} differs in {}", self.kind, self.hooks.name(), field);
            if let Some(map) = target.data.as_object_mut() {
                match want {
                    Some(v) => map.insert((*field).to_string(), v),
                    None => map.remove(*field),
                };
            }
            changed = true;
        }

        if let Some(managed) = desired.metadata.labels.as_ref()
            && !labels::contains_managed(managed, found.metadata.labels.as_ref())
        {
            target.metadata.labels = Some(labels::merge(managed, found.metadata.labels.as_ref()));
            changed = true;
        }

        if let Some(managed) = desired.metadata.annotations.as_ref()
            && !labels::contains_managed(managed, found.metadata.annotations.as_ref())
        {
            target.metadata.annotations = Some(labels::merge(managed, found.metadata.annotations.as_ref()));
            changed = true;
        }

        if let Some(owners) = reconcile_owners(desired, &found) {
            target.metadata.owner_references = Some(owners);
            changed = true;
        }

        if !changed {
            return Ok((found, false));
        }

        info!("Updating existing {} {} to the new desired state", self.kind, self.hooks.name());
        Ok((self.ctx.client.update(&gvk, &target).await?, true))
    }

    fn component_upgrade_done(&self, req: &mut HcoRequest, info: &ComponentInfo, current: &DynamicObject) -> bool {
        let conditions = component_conditions(&current.data);
        let ready = handle_component_conditions(req, info.display, &conditions);
        let observed = current.data.pointer(info.version_path).and_then(Value::as_str);
        let version_matches = !info.version.is_empty() && observed == Some(info.version.as_str());
        if req.upgrade_mode && !version_matches {
            debug!(
                "{} reports version {:?}, expecting {:?}",
                info.display, observed, info.version
            );
        }
        req.upgrade_mode && ready && version_matches
    }
}

/// Our owner reference in place of any other controller reference. `None`
/// when `found` is already right.
fn reconcile_owners(desired: &DynamicObject, found: &DynamicObject) -> Option<Vec<OwnerReference>> {
    let ours = desired.metadata.owner_references.as_ref()?.first()?;
    let existing = found.metadata.owner_references.clone().unwrap_or_default();
    let has_ours = existing.iter().any(|o| o.uid == ours.uid);
    let rogue = existing
        .iter()
        .any(|o| o.uid != ours.uid && o.controller == Some(true) && ours.controller == Some(true));
    if has_ours && !rogue {
        return None;
    }
    let mut owners: Vec<OwnerReference> = existing
        .into_iter()
        .filter(|o| o.uid != ours.uid && !(o.controller == Some(true) && ours.controller == Some(true)))
        .collect();
    owners.push(ours.clone());
    Some(owners)
}

/// Every field set in `desired` has the same value in `actual`
pub fn is_subset(desired: &Value, actual: &Value) -> bool {
    match (desired, actual) {
        (Value::Object(d), Value::Object(a)) => d
            .iter()
            .all(|(k, v)| a.get(k).is_some_and(|av| is_subset(v, av))),
        (Value::Array(d), Value::Array(a)) => d.len() == a.len() && d.iter().zip(a).all(|(x, y)| is_subset(x, y)),
        (d, a) => d == a,
    }
}

fn managed_by(obj: &DynamicObject, hc_name: &str) -> bool {
    obj.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(APP_LABEL))
        .is_some_and(|v| v == hc_name)
}

#[async_trait::async_trait]
impl<H: OperandHooks> Operand for GenericOperand<H> {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn name(&self) -> &str {
        self.hooks.name()
    }

    async fn ensure(&self, req: &mut HcoRequest) -> Result<EnsureResult, ControllerError> {
        let gvk = self.hooks.gvk();
        let desired = self.desired(req)?;
        let namespace = self.namespace(req);
        let mut res = EnsureResult::new(&self.kind, self.hooks.name());

        let found = self.ctx.client.get(&gvk, namespace.as_deref(), self.hooks.name()).await?;
        let current = match found {
            None => {
                info!("Creating {} {}", self.kind, self.hooks.name());
                res.created = true;
                self.ctx.client.create(&gvk, &desired).await?
            }
            Some(found) => {
                let (current, updated) = self.reconcile_existing(&desired, found).await?;
                if updated {
                    res.updated = true;
                    res.overwritten = !req.hco_triggered;
                }
                current
            }
        };

        req.add_related_object(&gvk, &current);

        res.upgrade_done = match self.hooks.component_info(&self.ctx) {
            Some(info) => self.component_upgrade_done(req, &info, &current),
            None => req.component_upgrade_in_progress,
        };
        Ok(res)
    }

    async fn ensure_deleted(&self, req: &HcoRequest) -> Result<bool, ControllerError> {
        let namespace = self.namespace(req);
        self.delete_from(req, namespace.as_deref()).await
    }

    fn reset(&self) {
        *self.desired.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn deleted_on_teardown(&self) -> bool {
        self.hooks.deleted_on_teardown()
    }

    fn uninstall_kind(&self) -> UninstallKind {
        self.hooks.uninstall_kind()
    }
}
