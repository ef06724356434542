//! HyperConverged Controller
//!
//! Meta-operator that turns one `HyperConverged` resource into the custom
//! resources of the virtualization stack (KubeVirt, CDI, network add-ons,
//! SSP, AAQ) and their supporting objects, and aggregates their health
//! back into the HyperConverged status.

mod admission_policy;
mod backoff;
mod cluster_info;
mod config;
mod controller;
mod conversion_webhook;
mod error;
mod events;
mod jsonpatch;
mod kinds;
mod metrics;
mod monitoring;
mod nodes;
mod operands;
mod operator_condition;
mod own_resources;
mod reconciler;
mod req_resolver;
mod request;
mod server;
mod status;
mod sync;
mod tls_profile;
mod upgrade_patches;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting HyperConverged Controller");

    let config = OperatorConfig::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace);
    info!("  Version: {}", config.version);
    info!("  Run mode: {:?}", config.run_mode);
    info!("  Managed by OLM: {}", config.is_managed_by_olm());

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
