//! Operand handlers
//!
//! Every managed child is driven by one [`Operand`]. Most of them are a
//! [`generic::GenericOperand`] parameterised with the kind-specific hooks
//! (desired-object builder and diff rule); the few that depend on a per-pass
//! switch are wrapped in a [`conditional::ConditionalOperand`].
//!
//! [`handler::OperandHandler`] runs the registered operands in order and turns
//! their results into events, metrics and conditions.

pub mod aaq;
pub mod annotations;
pub mod cdi;
pub mod cli_download;
pub mod cnao;
pub mod conditional;
pub mod console_plugin;
pub mod csv;
pub mod dashboards;
pub mod generic;
pub mod golden_images;
pub mod handler;
pub mod image_streams;
pub mod kubevirt;
pub mod labels;
pub mod passt;
pub mod placement;
pub mod priority_class;
pub mod quickstart;
pub mod ssp;
pub mod virtio_win;
pub mod wasp_agent;

#[cfg(test)]
mod operands_test;

use crate::config::OperatorConfig;
use crate::error::{ControllerError, UninstallKind};
use crate::own_resources::OwnResources;
use crate::request::HcoRequest;
use cluster_client::ClusterClient;
use std::sync::Arc;

/// Shared collaborators of the operands
pub struct OperandContext {
    pub client: Arc<dyn ClusterClient>,
    pub config: Arc<OperatorConfig>,
    pub own: Arc<OwnResources>,
}

impl std::fmt::Debug for OperandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperandContext")
            .field("namespace", &self.config.namespace)
            .finish_non_exhaustive()
    }
}

/// Outcome of one `ensure` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnsureResult {
    pub kind: String,
    pub name: String,
    pub created: bool,
    pub updated: bool,
    pub deleted: bool,
    /// The update reverted a change nobody asked the engine for
    pub overwritten: bool,
    pub upgrade_done: bool,
}

impl EnsureResult {
    pub fn new(kind: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// One managed child
#[async_trait::async_trait]
pub trait Operand: Send + Sync {
    /// Kind of the child, as used in events and metrics
    fn kind(&self) -> &str;

    fn name(&self) -> &str;

    /// Create or heal the child
    async fn ensure(&self, req: &mut HcoRequest) -> Result<EnsureResult, ControllerError>;

    /// Delete the child if the engine created it. Returns whether an object
    /// was removed.
    async fn ensure_deleted(&self, req: &HcoRequest) -> Result<bool, ControllerError>;

    /// Drop the memoized desired object
    fn reset(&self);

    /// Part of the teardown of the HyperConverged resource
    fn deleted_on_teardown(&self) -> bool {
        true
    }

    /// Error category of a failed teardown
    fn uninstall_kind(&self) -> UninstallKind {
        UninstallKind::Hco
    }
}
