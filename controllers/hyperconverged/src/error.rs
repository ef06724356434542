//! Controller-specific error types.
//!
//! This module defines error types specific to the HyperConverged engine
//! that are not covered by upstream library errors.

use cluster_client::ClientError;
use kube::Error as KubeError;
use thiserror::Error;

/// Component whose teardown failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UninstallKind {
    KubeVirt,
    Cdi,
    Hco,
}

impl UninstallKind {
    /// Reason of the warning event emitted on the HyperConverged resource
    pub fn event_reason(self) -> &'static str {
        match self {
            UninstallKind::KubeVirt => "ErrKubeVirtUninstall",
            UninstallKind::Cdi => "ErrCDIUninstall",
            UninstallKind::Hco => "ErrHCOUninstall",
        }
    }

    /// Message of the warning event; `cause` is ignored for the generic kind
    pub fn event_message(self, cause: &str) -> String {
        match self {
            UninstallKind::KubeVirt => format!("The uninstall request failed on virt component: {cause}"),
            UninstallKind::Cdi => format!("The uninstall request failed on CDI component: {cause}"),
            UninstallKind::Hco => {
                "The uninstall request failed on dependent components, please check their logs.".to_string()
            }
        }
    }
}

/// Errors that can occur in the HyperConverged controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Object store error (transient API errors and optimistic-concurrency conflicts)
    #[error("Cluster error: {0}")]
    Client(#[from] ClientError),

    /// Converting the HyperConverged resource into a desired child failed
    #[error("failed to build {kind}: {message}")]
    OperandBuild { kind: String, message: String },

    /// An upgrade patch could not be applied
    #[error("failed to apply upgrade patch: {0}")]
    PatchApply(String),

    /// Malformed upgrade-patch manifest
    #[error("invalid upgrade patches: {0}")]
    Validation(String),

    /// Teardown of a component failed
    #[error("{message}")]
    Uninstall { kind: UninstallKind, message: String },

    /// The operator cannot find its own Pod or Deployment
    #[error("Own resource not found: {0}")]
    MissingOwner(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Embedded YAML payload error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Bearer token signing failed
    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    /// Metrics registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// The service-cert Secret does not carry the OLM CA bundle yet
    #[error("CA bundle unavailable: {0}")]
    CaBundle(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    pub fn operand_build(kind: &str, message: impl Into<String>) -> Self {
        ControllerError::OperandBuild {
            kind: kind.to_string(),
            message: message.into(),
        }
    }

    /// Optimistic-concurrency conflict; retried silently
    pub fn is_conflict(&self) -> bool {
        matches!(self, ControllerError::Client(e) if e.is_conflict())
    }
}
