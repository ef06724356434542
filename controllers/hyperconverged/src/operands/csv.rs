//! Operand deletion policy on the operator's own CSV
//!
//! The console deletes the operands together with the operator unless the
//! CSV carries the disable-operand-delete annotation. It is kept `true`
//! unless the uninstall strategy says workloads go away with the operator.

use super::{EnsureResult, Operand, OperandContext};
use crate::error::ControllerError;
use crate::kinds;
use crate::request::HcoRequest;
use crds::UninstallStrategy;
use std::sync::Arc;
use tracing::{debug, info};

pub const DISABLE_OPERAND_DELETION_ANNOTATION: &str = "console.openshift.io/disable-operand-delete";

const KIND: &str = "ClusterServiceVersion";

/// Expected annotation value for the uninstall strategy
pub fn disable_operand_deletion(req: &HcoRequest) -> &'static str {
    match req.hc.spec.uninstall_strategy() {
        UninstallStrategy::RemoveWorkloads => "false",
        UninstallStrategy::BlockUninstallIfWorkloadsExist => "true",
    }
}

/// Never creates or deletes the CSV; it belongs to OLM
pub struct CsvAnnotation {
    ctx: Arc<OperandContext>,
}

impl CsvAnnotation {
    pub fn new(ctx: Arc<OperandContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Operand for CsvAnnotation {
    fn kind(&self) -> &str {
        KIND
    }

    fn name(&self) -> &str {
        self.ctx
            .own
            .csv_ref()
            .and_then(|r| r.name.as_deref())
            .unwrap_or_default()
    }

    async fn ensure(&self, req: &mut HcoRequest) -> Result<EnsureResult, ControllerError> {
        let mut res = EnsureResult::new(KIND, self.name());
        res.upgrade_done = req.component_upgrade_in_progress;
        if !req.caps.managed_by_olm {
            return Ok(res);
        }
        let Some(name) = self.ctx.own.csv_ref().and_then(|r| r.name.as_deref()) else {
            debug!("The operator CSV is unknown, leaving its annotations");
            return Ok(res);
        };
        let gvk = kinds::cluster_service_version();
        let namespace = self.ctx.config.namespace.as_str();
        let Some(mut csv) = self.ctx.client.get(&gvk, Some(namespace), name).await? else {
            debug!("CSV {} is gone", name);
            return Ok(res);
        };

        let want = disable_operand_deletion(req);
        let annotations = csv.metadata.annotations.get_or_insert_with(Default::default);
        if annotations.get(DISABLE_OPERAND_DELETION_ANNOTATION).map(String::as_str) == Some(want) {
            return Ok(res);
        }
        if req.hco_triggered {
            info!("Updating the {} annotation of CSV {} to {}", DISABLE_OPERAND_DELETION_ANNOTATION, name, want);
        } else {
            info!(
                "Reverting an external change of the {} annotation of CSV {}",
                DISABLE_OPERAND_DELETION_ANNOTATION, name
            );
        }
        annotations.insert(DISABLE_OPERAND_DELETION_ANNOTATION.to_string(), want.to_string());
        self.ctx.client.update(&gvk, &csv).await?;
        res.updated = true;
        Ok(res)
    }

    async fn ensure_deleted(&self, _req: &HcoRequest) -> Result<bool, ControllerError> {
        Ok(false)
    }

    fn reset(&self) {}

    fn deleted_on_teardown(&self) -> bool {
        false
    }
}
