//! Reconciliation of the HyperConverged resource.
//!
//! One pass resolves the request, runs every operand in registration order,
//! folds their findings into the five canonical conditions and persists the
//! status. The upgrade state machine lives here as well: while
//! `versions["operator"]` differs from the running version the pass applies
//! the upgrade patches, removes leftovers and keeps `Upgradeable=False`
//! until every component reports the expected version.

#[cfg(test)]
mod reconciler_test;

use crate::backoff::FibonacciBackoff;
use crate::cluster_info::ClusterInfo;
use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::events::{reasons, EventEmitter};
use crate::metrics::HcoMetrics;
use crate::operands::{annotations, golden_images};
use crate::operands::handler::OperandHandler;
use crate::operator_condition::OperatorCondition;
use crate::req_resolver::{ReconcileRequest, RequestResolver};
use crate::request::HcoRequest;
use crate::status::{self, REASON_INVALID_REQUEST, REASON_TAINTED, MESSAGE_TAINTED};
use crate::upgrade_patches::{parse_version, UpgradePatches};
use crate::watcher::Requeue;
use cluster_client::{get_typed, update_status_typed, update_typed, ClusterClient};
use crds::condition_types::{RECONCILE_COMPLETE, TAINTED_CONFIGURATION};
use crds::{Condition, ConditionStatus, HyperConverged, HyperConvergedStatus};
use kube::runtime::events::EventType;
use kube::Resource;
use semver::Version;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Finalizer guarding the teardown of the operands
pub const FINALIZER: &str = "kubevirt.io/hyperconverged";

/// Name of the engine entry in `status.versions`
pub const OPERATOR_VERSION_NAME: &str = "operator";

/// Requeue delay while initializing or upgrading
pub const REQUEUE_AFTER: Duration = Duration::from_secs(5);

/// Requeue delay after an optimistic-concurrency conflict
pub const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

/// Backoff state of the failed passes
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(5, 300), // 5 seconds min, 5 minutes max
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Reconciles the HyperConverged resource.
pub struct HcoReconciler {
    client: Arc<dyn ClusterClient>,
    config: Arc<OperatorConfig>,
    cluster_info: Arc<ClusterInfo>,
    resolver: RequestResolver,
    patches: UpgradePatches,
    handler: OperandHandler,
    emitter: Arc<dyn EventEmitter>,
    metrics: HcoMetrics,
    operator_condition: OperatorCondition,
    backoff: Mutex<BackoffState>,
    /// Set while an upgrade is announced and not yet completed
    upgrading: Mutex<bool>,
}

impl HcoReconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ClusterClient>,
        config: Arc<OperatorConfig>,
        cluster_info: Arc<ClusterInfo>,
        patches: UpgradePatches,
        handler: OperandHandler,
        emitter: Arc<dyn EventEmitter>,
        metrics: HcoMetrics,
        operator_condition: OperatorCondition,
    ) -> Self {
        Self {
            resolver: RequestResolver::new(&config.namespace),
            client,
            config,
            cluster_info,
            patches,
            handler,
            emitter,
            metrics,
            operator_condition,
            backoff: Mutex::new(BackoffState::new()),
            upgrading: Mutex::new(false),
        }
    }

    pub fn resolver(&self) -> &RequestResolver {
        &self.resolver
    }

    /// Delay before retrying a failed pass
    pub fn error_policy(&self, err: &ControllerError) -> Duration {
        if err.is_conflict() {
            debug!("Conflict while reconciling, retrying: {}", err);
            return CONFLICT_REQUEUE;
        }
        let mut state = self.backoff.lock().unwrap_or_else(PoisonError::into_inner);
        state.increment_error();
        let delay = state.backoff.next_backoff();
        error!(
            "Reconciliation failed ({} consecutive errors), retrying in {}s: {}",
            state.error_count,
            delay.as_secs(),
            err
        );
        delay
    }

    pub async fn reconcile(&self, request: &ReconcileRequest) -> Result<Requeue, ControllerError> {
        let (resolved, hco_triggered) = self.resolver.resolve(request);
        info!("Reconciling HyperConverged {} (request {})", resolved, request);

        let client = self.client.as_ref();
        let Some(hc) = get_typed::<HyperConverged>(client, Some(&resolved.namespace), &resolved.name).await? else {
            info!("No HyperConverged resource");
            self.metrics.clear();
            if let Err(e) = self.operator_condition.allow().await {
                warn!("Failed to update the operator condition: {}", e);
            }
            self.reset_backoff();
            return Ok(Requeue::None);
        };

        if resolved != *self.resolver.primary() {
            return self.reject(hc).await;
        }
        self.metrics.set_hyperconverged_exists(true);

        if self.cluster_info.refresh().await? {
            info!("Cluster capabilities changed");
        }
        let caps = self.cluster_info.snapshot().await;
        let mut req = HcoRequest::new(hc, caps, hco_triggered);

        if req.hc.is_deleting() {
            return self.finalize(req).await;
        }

        let outcome = self.run_pass(&mut req).await;
        self.handler.reset();
        let requeue = outcome?;

        if let Err(e) = self.operator_condition.update_from(&req).await {
            warn!("Failed to update the operator condition: {}", e);
        }
        self.reset_backoff();
        Ok(requeue)
    }

    async fn run_pass(&self, req: &mut HcoRequest) -> Result<Requeue, ControllerError> {
        let original = req.hc.status.clone().unwrap_or_default();
        let mut requeue = Requeue::None;

        if !req.hc.has_finalizer(FINALIZER) {
            debug!("Adding the {} finalizer", FINALIZER);
            req.hc
                .metadata
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(FINALIZER.to_string());
            req.dirty = true;
            requeue = Requeue::After(REQUEUE_AFTER);
        }

        let init = original.conditions.is_empty();
        let mut status = original.clone();
        if init {
            info!("Initiating the HyperConverged {}", req.name());
            self.event(req, EventType::Normal, reasons::INIT_HCO, "Initiating the HyperConverged")
                .await;
            status.update_version(OPERATOR_VERSION_NAME, &self.config.version);
            requeue = Requeue::After(REQUEUE_AFTER);
        } else {
            self.detect_upgrade(req, original.version(OPERATOR_VERSION_NAME)).await?;
        }

        for annotation in annotations::ALL {
            self.metrics
                .set_unsafe_modifications(annotation, annotations::operation_count(&req.hc, annotation));
        }
        self.metrics
            .set_memory_overcommit_percentage(req.hc.spec.memory_overcommit_percentage());

        if let Err(e) = self.handler.ensure(req).await {
            if !e.is_conflict() {
                self.fill_status(req, &mut status);
                if let Err(pe) = self.persist(req, status, &original).await {
                    warn!("Failed to record the reconcile failure: {}", pe);
                }
            }
            return Err(e);
        }

        if init {
            status::init_conditions(req);
        } else {
            let all_up = status::aggregate(req);
            if req.upgrade_mode {
                if all_up && req.component_upgrade_in_progress && !req.dirty {
                    self.complete_upgrade(req, &mut status).await;
                } else {
                    status::set_upgrading(req, &self.config.version);
                    requeue = Requeue::After(REQUEUE_AFTER);
                }
            }
        }

        self.fill_status(req, &mut status);
        self.persist(req, status, &original).await?;
        Ok(requeue)
    }

    /// Enter upgrade mode when the recorded version is not ours
    async fn detect_upgrade(&self, req: &mut HcoRequest, recorded: Option<&str>) -> Result<(), ControllerError> {
        if recorded == Some(self.config.version.as_str()) {
            *self.upgrading.lock().unwrap_or_else(PoisonError::into_inner) = false;
            return Ok(());
        }
        req.upgrade_mode = true;
        req.component_upgrade_in_progress = true;

        let announce = !std::mem::replace(&mut *self.upgrading.lock().unwrap_or_else(PoisonError::into_inner), true);
        if announce {
            info!("Upgrading from version {:?} to {}", recorded, self.config.version);
            let message = format!("Upgrading the HyperConverged to version {}", self.config.version);
            self.event(req, EventType::Normal, reasons::UPGRADE_HCO, &message).await;
        }

        let Some(from) = recorded.and_then(parse_version) else {
            warn!("Unknown previous version {:?}; upgrade patches are not applied", recorded);
            return Ok(());
        };
        self.apply_upgrade_patches(req, &from)?;
        self.remove_leftovers(req, &from).await
    }

    fn apply_upgrade_patches(&self, req: &mut HcoRequest, from: &Version) -> Result<(), ControllerError> {
        let mut doc = serde_json::to_value(&req.hc)?;
        if !self.patches.apply(&mut doc, from)? {
            return Ok(());
        }
        let patched: HyperConverged = serde_json::from_value(doc)?;
        info!("Upgrade patches modified the HyperConverged spec");
        req.hc.spec = patched.spec;
        req.dirty = true;
        Ok(())
    }

    async fn remove_leftovers(&self, req: &HcoRequest, from: &Version) -> Result<(), ControllerError> {
        for leftover in self.patches.removals_for(from) {
            let namespace = leftover.namespace.as_deref();
            match self.client.delete(&leftover.gvk, namespace, &leftover.name).await {
                Ok(true) => {
                    info!("Removed leftover {} {}", leftover.gvk.kind, leftover.name);
                    let message = format!("Removed {} {}", leftover.gvk.kind, leftover.name);
                    self.event(req, EventType::Normal, reasons::KILLING, &message).await;
                }
                Ok(false) => debug!("Leftover {} {} is already gone", leftover.gvk.kind, leftover.name),
                Err(e) if e.is_no_kind_match() => {
                    warn!(
                        "Kind {} is not served; cannot remove leftover {}: {}",
                        leftover.gvk.kind, leftover.name, e
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn complete_upgrade(&self, req: &mut HcoRequest, status: &mut HyperConvergedStatus) {
        info!("Upgrade to version {} completed", self.config.version);
        status.update_version(OPERATOR_VERSION_NAME, &self.config.version);
        req.upgrade_mode = false;
        *self.upgrading.lock().unwrap_or_else(PoisonError::into_inner) = false;
        let message = format!("Successfully upgraded to version {}", self.config.version);
        self.event(req, EventType::Normal, reasons::UPGRADE_HCO, &message).await;
    }

    /// Copy the outcome of the pass into `status`
    fn fill_status(&self, req: &HcoRequest, status: &mut HyperConvergedStatus) {
        let now = chrono::Utc::now();
        for condition in req.conditions.iter() {
            status.set_condition(condition.clone(), now);
        }
        if annotations::tainted(&req.hc) {
            status.set_condition(
                req.condition(TAINTED_CONFIGURATION, ConditionStatus::True, REASON_TAINTED, MESSAGE_TAINTED),
                now,
            );
        } else {
            status.remove_condition(TAINTED_CONFIGURATION);
        }
        if !req.related_objects().is_empty() {
            status.related_objects = req.related_objects().to_vec();
        }
        status.observed_generation = req.generation();
        // same list the SSP operand was built with
        if req.caps.openshift
            && let Ok(dicts) = golden_images::templates(&req.hc)
        {
            status.data_import_cron_templates = dicts;
        }
        let health = status::system_health(status);
        status.system_health_status = Some(health);
        self.metrics.set_system_health_status(health);
    }

    /// Write spec and metadata when the pass changed them, then the status
    async fn persist(
        &self,
        req: &mut HcoRequest,
        status: HyperConvergedStatus,
        original: &HyperConvergedStatus,
    ) -> Result<(), ControllerError> {
        let client = self.client.as_ref();
        if req.dirty {
            let updated = update_typed(client, &req.hc).await?;
            req.hc.metadata.resource_version = updated.metadata.resource_version;
            req.dirty = false;
        }
        if status != *original {
            let mut hc = req.hc.clone();
            hc.status = Some(status);
            let updated = update_status_typed(client, &hc).await?;
            req.hc.metadata.resource_version = updated.metadata.resource_version;
            req.hc.status = updated.status;
        }
        Ok(())
    }

    /// Tear the operands down, then release the resource
    async fn finalize(&self, mut req: HcoRequest) -> Result<Requeue, ControllerError> {
        info!("HyperConverged {} is being deleted", req.name());
        self.handler.ensure_deleted(&req).await?;

        if req.hc.has_finalizer(FINALIZER) {
            if let Some(finalizers) = req.hc.metadata.finalizers.as_mut() {
                finalizers.retain(|f| f != FINALIZER);
            }
            update_typed(self.client.as_ref(), &req.hc).await?;
            info!("Removed the {} finalizer", FINALIZER);
        }
        self.reset_backoff();
        Ok(Requeue::None)
    }

    /// A HyperConverged resource with any other identity is never reconciled
    async fn reject(&self, mut hc: HyperConverged) -> Result<Requeue, ControllerError> {
        let primary = self.resolver.primary();
        warn!(
            "Ignoring HyperConverged {}/{}: only {} is reconciled",
            hc.metadata.namespace.as_deref().unwrap_or_default(),
            hc.metadata.name.as_deref().unwrap_or_default(),
            primary
        );
        let mut condition = Condition::new(
            RECONCILE_COMPLETE,
            ConditionStatus::False,
            REASON_INVALID_REQUEST,
            status::invalid_request_message(&primary.name, &primary.namespace),
        );
        condition.observed_generation = hc.metadata.generation;
        let status = hc.status.get_or_insert_with(Default::default);
        if status.set_condition(condition, chrono::Utc::now()) {
            update_status_typed(self.client.as_ref(), &hc).await?;
        }
        Ok(Requeue::None)
    }

    async fn event(&self, req: &HcoRequest, type_: EventType, reason: &str, message: &str) {
        let target = req.hc.object_ref(&());
        self.emitter.emit(&target, type_, reason, message).await;
    }

    fn reset_backoff(&self) {
        self.backoff.lock().unwrap_or_else(PoisonError::into_inner).reset();
    }
}
