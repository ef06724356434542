//! Secret holding the metrics bearer token

use super::refresher::Refresher;
use super::token::BearerToken;
use crate::error::ControllerError;
use crate::operands::generic::{DiffRule, GenericOperand, OperandHooks, OwnerPolicy};
use crate::operands::labels::AppComponent;
use crate::operands::{EnsureResult, Operand, OperandContext};
use crate::request::HcoRequest;
use base64::Engine;
use cluster_client::{gvk_of, to_dynamic};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{DynamicObject, GroupVersionKind};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

pub const SECRET_NAME: &str = "hco-bearer-auth";

pub const TOKEN_KEY: &str = "token";

pub struct SecretHooks {
    token: Arc<BearerToken>,
}

impl OperandHooks for SecretHooks {
    fn gvk(&self) -> GroupVersionKind {
        gvk_of::<Secret>()
    }

    fn name(&self) -> &str {
        SECRET_NAME
    }

    fn component(&self) -> AppComponent {
        AppComponent::Monitoring
    }

    fn build(&self, _ctx: &OperandContext, _req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let secret = Secret {
            data: Some(BTreeMap::from([(
                TOKEN_KEY.to_string(),
                ByteString(self.token.create()?.into_bytes()),
            )])),
            ..Default::default()
        };
        Ok(to_dynamic(&secret)?)
    }

    // The token itself is compared by `BearerSecret`
    fn diff_rule(&self) -> DiffRule {
        DiffRule::MetadataOnly
    }

    fn owner(&self) -> OwnerPolicy {
        OwnerPolicy::Deployment
    }

    fn deleted_on_teardown(&self) -> bool {
        false
    }
}

/// Decoded token of a Secret
fn stored_token(obj: &DynamicObject) -> Option<Vec<u8>> {
    let encoded = obj.data.pointer(&format!("/data/{TOKEN_KEY}")).and_then(Value::as_str)?;
    base64::engine::general_purpose::STANDARD.decode(encoded).ok()
}

/// Replaces the Secret when its token is stale and asks for the
/// ServiceMonitor to be recreated
pub struct BearerSecret {
    inner: GenericOperand<SecretHooks>,
    refresher: Arc<Refresher>,
}

impl BearerSecret {
    pub fn new(ctx: Arc<OperandContext>, token: Arc<BearerToken>, refresher: Arc<Refresher>) -> Self {
        Self {
            inner: GenericOperand::new(SecretHooks { token }, ctx),
            refresher,
        }
    }
}

#[async_trait::async_trait]
impl Operand for BearerSecret {
    fn kind(&self) -> &str {
        self.inner.kind()
    }

    fn name(&self) -> &str {
        SECRET_NAME
    }

    async fn ensure(&self, req: &mut HcoRequest) -> Result<EnsureResult, ControllerError> {
        let desired = self.inner.desired(req)?;
        let client = &self.inner.context().client;
        let gvk = gvk_of::<Secret>();

        if let Some(found) = client.get(&gvk, Some(req.namespace()), SECRET_NAME).await?
            && stored_token(&found) != stored_token(&desired)
        {
            info!("The Secret token is outdated, deleting the old secret and creating a new one");
            self.refresher.set_should_refresh().await;
            client.delete(&gvk, Some(req.namespace()), SECRET_NAME).await?;
        }

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
