//! Runs the registered operands and reports their results

use super::conditional::{on_openshift, ConditionalOperand};
use super::generic::GenericOperand;
use super::{
    aaq, cdi, cli_download, cnao, console_plugin, csv, dashboards, image_streams, kubevirt, passt, priority_class,
    quickstart, ssp, virtio_win, wasp_agent,
};
use super::{EnsureResult, Operand, OperandContext};
use crate::error::{ControllerError, UninstallKind};
use crate::events::{reasons, EventEmitter};
use crate::metrics::HcoMetrics;
use crate::request::HcoRequest;
use crate::status::{failed_message, REASON_FAILED};
use crds::condition_types::RECONCILE_COMPLETE;
use crds::ConditionStatus;
use futures::future::join_all;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use kube::Resource;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Deadline of the whole teardown fan-out
pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Every operand of the engine except monitoring, in registration order.
/// `monitoring` is appended last.
pub fn registry(ctx: &Arc<OperandContext>, monitoring: Vec<Box<dyn Operand>>) -> Vec<Box<dyn Operand>> {
    fn generic<H: super::generic::OperandHooks>(hooks: H, ctx: &Arc<OperandContext>) -> Box<dyn Operand> {
        Box::new(GenericOperand::new(hooks, Arc::clone(ctx)))
    }
    fn openshift_only(inner: Box<dyn Operand>) -> Box<dyn Operand> {
        Box::new(ConditionalOperand::new(inner, on_openshift))
    }

    let mut operands: Vec<Box<dyn Operand>> = vec![
        generic(priority_class::KubeVirtPriorityClass, ctx),
        generic(kubevirt::KubeVirtHooks, ctx),
        generic(cdi::CdiHooks, ctx),
        generic(cnao::CnaoHooks, ctx),
        openshift_only(generic(ssp::SspHooks, ctx)),
        Box::new(ConditionalOperand::new(generic(aaq::AaqHooks, ctx), aaq::enabled)),
        Box::new(ConditionalOperand::new(generic(passt::PasstServiceAccount, ctx), passt::enabled)),
        Box::new(ConditionalOperand::new(generic(passt::PasstScc, ctx), passt::scc_enabled)),
        Box::new(ConditionalOperand::new(generic(passt::PasstDaemonSet, ctx), passt::enabled)),
        Box::new(ConditionalOperand::new(generic(passt::PasstNetworkAttachment, ctx), passt::nad_enabled)),
        Box::new(ConditionalOperand::new(generic(wasp_agent::WaspServiceAccount, ctx), wasp_agent::enabled)),
        Box::new(ConditionalOperand::new(generic(wasp_agent::WaspClusterRole, ctx), wasp_agent::enabled)),
        Box::new(ConditionalOperand::new(generic(wasp_agent::WaspClusterRoleBinding, ctx), wasp_agent::enabled)),
        Box::new(ConditionalOperand::new(generic(wasp_agent::WaspScc, ctx), wasp_agent::scc_enabled)),
        Box::new(ConditionalOperand::new(generic(wasp_agent::WaspDaemonSet, ctx), wasp_agent::enabled)),
        openshift_only(generic(cli_download::CliDownloadHooks, ctx)),
        openshift_only(generic(cli_download::CliDownloadService, ctx)),
        openshift_only(generic(cli_download::CliDownloadRoute, ctx)),
    ];
    operands.extend(console_plugin::operands(ctx).into_iter().map(openshift_only));
    operands.push(generic(virtio_win::VirtioWinConfigMap, ctx));
    operands.push(generic(virtio_win::ConfigReaderRole, ctx));
    operands.push(generic(virtio_win::ConfigReaderRoleBinding, ctx));
    operands.extend(
        dashboards::hooks()
            .into_iter()
            .map(|h| openshift_only(generic(h, ctx))),
    );
    operands.extend(
        quickstart::hooks()
            .into_iter()
            .map(|h| openshift_only(generic(h, ctx))),
    );
    operands.extend(
        image_streams::operands(ctx)
            .into_iter()
            .map(|o| Box::new(ConditionalOperand::new(Box::new(o), image_streams::enabled)) as Box<dyn Operand>),
    );
    operands.push(Box::new(csv::CsvAnnotation::new(Arc::clone(ctx))));
    operands.extend(monitoring);
    operands
}

pub struct OperandHandler {
    operands: Vec<Box<dyn Operand>>,
    emitter: Arc<dyn EventEmitter>,
    metrics: HcoMetrics,
}

impl OperandHandler {
    pub fn new(operands: Vec<Box<dyn Operand>>, emitter: Arc<dyn EventEmitter>, metrics: HcoMetrics) -> Self {
        Self {
            operands,
            emitter,
            metrics,
        }
    }

    pub fn operands(&self) -> &[Box<dyn Operand>] {
        &self.operands
    }

    /// Ensure every operand in order; stops at the first error
    pub async fn ensure(&self, req: &mut HcoRequest) -> Result<(), ControllerError> {
        let target = req.hc.object_ref(&());
        for operand in &self.operands {
            let res = match operand.ensure(req).await {
                Ok(res) => res,
                Err(e) if e.is_conflict() => return Err(e),
                Err(e) => {
                    error!("Failed to ensure {} {}: {}", operand.kind(), operand.name(), e);
                    req.component_upgrade_in_progress = false;
                    let failed = req.condition(RECONCILE_COMPLETE, ConditionStatus::False, REASON_FAILED, failed_message(&e));
                    req.conditions.set(failed);
                    self.emitter
                        .emit(&target, EventType::Warning, reasons::RECONCILE_HCO, &e.to_string())
                        .await;
                    return Err(e);
                }
            };
            self.report(&target, req, &res).await;
            req.component_upgrade_in_progress &= res.upgrade_done;
        }
        Ok(())
    }

    async fn report(&self, target: &ObjectReference, req: &HcoRequest, res: &EnsureResult) {
        if res.created {
            self.emitter
                .emit(target, EventType::Normal, reasons::CREATED, &format!("Created {} {}", res.kind, res.name))
                .await;
        }
        if res.overwritten {
            self.emitter
                .emit(
                    target,
                    EventType::Warning,
                    reasons::OVERWRITTEN,
                    &format!("Overwritten {} {}", res.kind, res.name),
                )
                .await;
            if !req.upgrade_mode {
                self.metrics.inc_overwritten_modifications(&res.kind, &res.name);
            }
        } else if res.updated {
            self.emitter
                .emit(target, EventType::Normal, reasons::UPDATED, &format!("Updated {} {}", res.kind, res.name))
                .await;
        }
        if res.deleted {
            self.emitter
                .emit(target, EventType::Normal, reasons::KILLING, &format!("Removed {} {}", res.kind, res.name))
                .await;
        }
    }

    /// Remove every operand child in parallel.
    ///
    /// All deletions are attempted; their errors are joined. The whole
    /// fan-out is bounded by [`TEARDOWN_TIMEOUT`].
    pub async fn ensure_deleted(&self, req: &HcoRequest) -> Result<(), ControllerError> {
        let target = req.hc.object_ref(&());
        let deletions = self
            .operands
            .iter()
            .filter(|o| o.deleted_on_teardown())
            .map(|o| async move { (o, o.ensure_deleted(req).await) });

        let Ok(results) = tokio::time::timeout(TEARDOWN_TIMEOUT, join_all(deletions)).await else {
            let kind = UninstallKind::Hco;
            let message = format!("timed out after {}s deleting the operands", TEARDOWN_TIMEOUT.as_secs());
            self.emitter
                .emit(&target, EventType::Warning, kind.event_reason(), &kind.event_message(&message))
                .await;
            return Err(ControllerError::Uninstall { kind, message });
        };

        let mut first_kind = None;
        let mut errors = Vec::new();
        for (operand, result) in results {
            match result {
                Ok(true) => {
                    self.emitter
                        .emit(
                            &target,
                            EventType::Normal,
                            reasons::KILLING,
                            &format!("Removed {} {}", operand.kind(), operand.name()),
                        )
                        .await;
                }
                Ok(false) => {}
                Err(e) => {
                    let kind = operand.uninstall_kind();
                    warn!("Failed to delete {} {}: {}", operand.kind(), operand.name(), e);
                    self.emitter
                        .emit(&target, EventType::Warning, kind.event_reason(), &kind.event_message(&e.to_string()))
                        .await;
                    first_kind.get_or_insert(kind);
                    errors.push(format!("{} {}: {}", operand.kind(), operand.name(), e));
                }
            }
        }

        match first_kind {
            None => {
                info!("All the operands of {} were removed", req.name());
                Ok(())
            }
            Some(kind) => Err(ControllerError::Uninstall {
                kind,
                message: errors.join("; "),
            }),
        }
    }

    /// Drop the desired objects memoized during the pass
    pub fn reset(&self) {
        for operand in &self.operands {
            operand.reset();
        }
    }
}
