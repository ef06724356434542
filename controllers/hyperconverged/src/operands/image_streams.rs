//! Image streams of the golden images
//!
//! On OpenShift the common boot images are imported through `ImageStream`s
//! in the boot image namespace. They exist only while boot image import is
//! on, and move with `commonBootImageNamespace`.

use super::generic::{new_object, DiffRule, GenericOperand, OperandHooks, OwnerPolicy, Scope};
use super::golden_images;
use super::labels::AppComponent;
use super::{EnsureResult, Operand, OperandContext};
use crate::error::{ControllerError, UninstallKind};
use crate::kinds;
use crate::request::HcoRequest;
use kube::api::{DynamicObject, GroupVersionKind};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

const IMAGE_STREAMS: &[(&str, &str)] = &[
    ("centos-stream10", include_str!("../../resources/imageStreams/centos-stream10.yaml")),
    ("centos-stream9", include_str!("../../resources/imageStreams/centos-stream9.yaml")),
    ("fedora", include_str!("../../resources/imageStreams/fedora.yaml")),
];

pub fn enabled(req: &HcoRequest) -> bool {
    req.caps.openshift && golden_images::boot_image_import_enabled(&req.hc)
}

pub struct ImageStreamHooks {
    name: &'static str,
    manifest: &'static str,
}

impl OperandHooks for ImageStreamHooks {
    fn gvk(&self) -> GroupVersionKind {
        kinds::image_stream()
    }

    fn name(&self) -> &str {
        self.name
    }

    fn scope(&self) -> Scope {
        Scope::BootImages
    }

    fn component(&self) -> AppComponent {
        AppComponent::Compute
    }

    fn build(&self, _ctx: &OperandContext, _req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let manifest: Value = serde_yaml::from_str(self.manifest)?;
        let spec = manifest
            .get("spec")
            .cloned()
            .ok_or_else(|| ControllerError::operand_build("ImageStream", format!("{} has no spec", self.name)))?;
        Ok(new_object(serde_json::json!({ "spec": spec })))
    }

    /// Tags are compared on what the engine sets; extra or missing tags
    /// still count as a difference
    fn diff_rule(&self) -> DiffRule {
        DiffRule::SpecSubset
    }

    fn owner(&self) -> OwnerPolicy {
        OwnerPolicy::None
    }
}

/// One image stream; removed from the previous namespace when the boot
/// image namespace changes
pub struct ImageStreamOperand {
    inner: GenericOperand<ImageStreamHooks>,
    namespace: Mutex<String>,
}

impl ImageStreamOperand {
    pub fn new(hooks: ImageStreamHooks, ctx: Arc<OperandContext>) -> Self {
        Self {
            inner: GenericOperand::new(hooks, ctx),
            namespace: Mutex::new(golden_images::DEFAULT_BOOT_IMAGE_NAMESPACE.to_string()),
        }
    }

    pub fn desired(&self, req: &HcoRequest) -> Result<Arc<DynamicObject>, ControllerError> {
        self.inner.desired(req)
    }
}

/// One operand per embedded image stream
pub fn operands(ctx: &Arc<OperandContext>) -> Vec<ImageStreamOperand> {
    IMAGE_STREAMS
        .iter()
        .map(|&(name, manifest)| ImageStreamOperand::new(ImageStreamHooks { name, manifest }, Arc::clone(ctx)))
        .collect()
}

#[async_trait::async_trait]
impl Operand for ImageStreamOperand {
    fn kind(&self) -> &str {
        self.inner.kind()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn ensure(&self, req: &mut HcoRequest) -> Result<EnsureResult, ControllerError> {
        let target = golden_images::boot_image_namespace(req).to_string();
        let previous = self.namespace.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if previous != target {
            info!("Boot image namespace moved from {} to {}", previous, target);
            self.inner.delete_from(req, Some(&previous)).await?;
            *self.namespace.lock().unwrap_or_else(PoisonError::into_inner) = target;
        }
        self.inner.ensure(req).await
    }

    async fn ensure_deleted(&self, req: &HcoRequest) -> Result<bool, ControllerError> {
        self.inner.ensure_deleted(req).await
    }

    fn reset(&self) {
        self.inner.reset();
    }

    fn deleted_on_teardown(&self) -> bool {
        self.inner.deleted_on_teardown()
    }

    fn uninstall_kind(&self) -> UninstallKind {
        self.inner.uninstall_kind()
    }
}
