//! HyperConverged CRD Definitions
//!
//! Kubernetes Custom Resource Definitions owned by the hyperconverged
//! reconciliation engine.

pub mod data_import_cron;
pub mod hyperconverged;
pub mod status;

pub use data_import_cron::*;
pub use hyperconverged::*;
pub use status::*;
