//! ServiceMonitor scraping the metrics Service with the bearer token

use super::refresher::Refresher;
use super::secret::{SECRET_NAME, TOKEN_KEY};
use super::service::{PORT_NAME, SERVICE_NAME};
use crate::error::ControllerError;
use crate::kinds;
use crate::operands::generic::{new_object, GenericOperand, OperandHooks, OwnerPolicy};
use crate::operands::labels::{self, AppComponent};
use crate::operands::{EnsureResult, Operand, OperandContext};
use crate::request::HcoRequest;
use kube::api::{DynamicObject, GroupVersionKind};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

pub struct ServiceMonitorHooks;

impl OperandHooks for ServiceMonitorHooks {
    fn gvk(&self) -> GroupVersionKind {
        kinds::service_monitor()
    }

    fn name(&self) -> &str {
        SERVICE_NAME
    }

    fn component(&self) -> AppComponent {
        AppComponent::Monitoring
    }

    fn build(&self, ctx: &OperandContext, req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let selector = labels::managed_labels(req.name(), &ctx.config.version, AppComponent::Monitoring);
        Ok(new_object(json!({
            "spec": {
                "selector": {"matchLabels": selector},
                "endpoints": [{
                    "port": PORT_NAME,
                    "scheme": "https",
                    "authorization": {
                        "credentials": {"name": SECRET_NAME, "key": TOKEN_KEY}
                    },
                    "tlsConfig": {"insecureSkipVerify": true},
                }],
            }
        })))
    }

    fn owner(&self) -> OwnerPolicy {
        OwnerPolicy::Deployment
    }

    fn deleted_on_teardown(&self) -> bool {
        false
    }
}

/// Recreates the ServiceMonitor after the token Secret was replaced
pub struct RefreshingServiceMonitor {
    inner: GenericOperand<ServiceMonitorHooks>,
    refresher: Arc<Refresher>,
}

impl RefreshingServiceMonitor {
    pub fn new(ctx: Arc<OperandContext>, refresher: Arc<Refresher>) -> Self {
        Self {
            inner: GenericOperand::new(ServiceMonitorHooks, ctx),
            refresher,
        }
    }
}

#[async_trait::async_trait]
impl Operand for RefreshingServiceMonitor {
    fn kind(&self) -> &str {
        self.inner.kind()
    }

    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn ensure(&self, req: &mut HcoRequest) -> Result<EnsureResult, ControllerError> {
        let client = &self.inner.context().client;
        let namespace = req.namespace().to_string();
        let namespace = namespace.as_str();
        self.refresher
            .refresh(move || async move {
                info!("Deleting ServiceMonitor {} to reload the bearer token", SERVICE_NAME);
                match client.delete(&kinds::service_monitor(), Some(namespace), SERVICE_NAME).await {
                    Err(e) if !e.is_no_kind_match() => Err(e.into()),
                    _ => Ok(()),
                }
            })
            .await?;

        self.inner.ensure(req).await
    }

    async fn ensure_deleted(&self, req: &HcoRequest) -> Result<bool, ControllerError> {
        self.inner.ensure_deleted(req).await
    }

    fn reset(&self) {
        self.inner.reset();
    }

    fn deleted_on_teardown(&self) -> bool {
        false
    }
}
