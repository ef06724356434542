//! Cluster client errors

use thiserror::Error;

/// Errors that can occur when talking to the Kubernetes object store
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport or API-server error not covered by a more specific variant
    #[error("Kubernetes error: {0}")]
    Kube(#[source] kube::Error),

    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency failure (stale resourceVersion)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Create of an object that already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The API server has no REST mapping for the kind
    #[error("No matches for kind {0}")]
    NoKindMatch(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic API failure
    #[error("API error: {0}")]
    Api(String),
}

impl ClientError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }

    pub fn is_no_kind_match(&self) -> bool {
        matches!(self, ClientError::NoKindMatch(_))
    }
}

impl From<kube::Error> for ClientError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => ClientError::NotFound(ae.message),
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                ClientError::AlreadyExists(ae.message)
            }
            kube::Error::Api(ae) if ae.code == 409 => ClientError::Conflict(ae.message),
            kube::Error::Discovery(de) => ClientError::NoKindMatch(de.to_string()),
            other => ClientError::Kube(other),
        }
    }
}
