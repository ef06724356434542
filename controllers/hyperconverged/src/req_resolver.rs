//! Reconcile request resolution
//!
//! The engine watches hundreds of object kinds but reconciles exactly one
//! logical object, the HyperConverged resource. Watch events on managed
//! children are funnelled into a placeholder request whose name nobody can
//! guess, so a later pass can tell a child-triggered pass from one caused
//! by a change to the HyperConverged resource itself.

use crds::HYPERCONVERGED_NAME;
use std::fmt;

const SECONDARY_PREFIX: &str = "hco-controlled-cr-";
const API_SERVER_PREFIX: &str = "api-server-cr-";

/// Namespace/name of a reconcile request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReconcileRequest {
    pub namespace: String,
    pub name: String,
}

impl ReconcileRequest {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct RequestResolver {
    primary: ReconcileRequest,
    secondary: ReconcileRequest,
    api_server: ReconcileRequest,
}

impl RequestResolver {
    /// Generate fresh placeholder identities in the operator namespace
    pub fn new(namespace: &str) -> Self {
        let random = uuid::Uuid::new_v4().simple().to_string();
        Self {
            primary: ReconcileRequest::new(namespace, HYPERCONVERGED_NAME),
            secondary: ReconcileRequest::new(namespace, format!("{SECONDARY_PREFIX}{random}")),
            api_server: ReconcileRequest::new(namespace, format!("{API_SERVER_PREFIX}{random}")),
        }
    }

    pub fn primary(&self) -> &ReconcileRequest {
        &self.primary
    }

    /// Request every child watch maps its events to
    pub fn secondary(&self) -> &ReconcileRequest {
        &self.secondary
    }

    /// Request raised when the cluster API server configuration changes
    pub fn api_server(&self) -> &ReconcileRequest {
        &self.api_server
    }

    /// Map a raw request to the canonical one.
    ///
    /// The flag is false only for child-triggered passes; an update made
    /// during such a pass reverts an out-of-band modification.
    pub fn resolve(&self, original: &ReconcileRequest) -> (ReconcileRequest, bool) {
        if *original == self.secondary {
            (self.primary.clone(), false)
        } else if *original == self.api_server {
            (self.primary.clone(), true)
        } else {
            (original.clone(), true)
        }
    }
}
