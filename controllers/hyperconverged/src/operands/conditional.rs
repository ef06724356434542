//! Operands switched on and off per pass

use super::{EnsureResult, Operand};
use crate::error::{ControllerError, UninstallKind};
use crate::request::HcoRequest;

/// Decides from the pass state whether the child should exist
pub type Gate = fn(&HcoRequest) -> bool;

/// Runs the inner operand while the gate is open and removes its child
/// once the gate closes
pub struct ConditionalOperand {
    inner: Box<dyn Operand>,
    gate: Gate,
}

impl ConditionalOperand {
    pub fn new(inner: Box<dyn Operand>, gate: Gate) -> Self {
        Self { inner, gate }
    }
}

/// OpenShift-only children
pub fn on_openshift(req: &HcoRequest) -> bool {
    req.caps.openshift
}

#[async_trait::async_trait]
impl Operand for ConditionalOperand {
    fn kind(&self) -> &str {
        self.inner.kind()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn ensure(&self, req: &mut HcoRequest) -> Result<EnsureResult, ControllerError> {
        if (self.gate)(req) {
            return self.inner.ensure(req).await;
        }
        let mut res = EnsureResult::new(self.inner.kind(), self.inner.name());
        res.deleted = self.inner.ensure_deleted(req).await?;
        res.upgrade_done = req.component_upgrade_in_progress;
        Ok(res)
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
