//! Conversion stanza of the HyperConverged CRD
//!
//! The CRD must route conversions to the webhook served by the operator
//! Deployment. The CA bundle is injected by the platform (an annotation
//! asks for it) except under OLM, where it is copied from the service-cert
//! Secret.

use crate::error::ControllerError;
use crate::kinds;
use cluster_client::ClusterClient;
use crds::HCO_CRD_NAME;
use k8s_openapi::api::core::v1::Secret;
use kube::api::DynamicObject;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

pub const CONVERSION_PATH: &str = "/convert";

const K8S_CERT_ANNOTATION: &str = "cert-manager.io/inject-ca-from";

const OPENSHIFT_CERT_ANNOTATION: &str = "service.beta.openshift.io/inject-cabundle";

const OLM_CA_BUNDLE_KEY: &str = "olmCAKey";

const REVIEW_VERSIONS: [&str; 2] = ["v1", "v1beta1"];

pub struct ConversionWebhookReconciler {
    client: Arc<dyn ClusterClient>,
    namespace: String,
    secret_name: String,
    service_name: String,
    port: u16,
    cert_annotation: (&'static str, String),
    managed_by_olm: bool,
}

impl ConversionWebhookReconciler {
    /// `deployment` is the name of the operator Deployment; the webhook
    /// Service and its cert Secret are named after it
    pub fn new(
        client: Arc<dyn ClusterClient>,
        namespace: &str,
        deployment: &str,
        port: u16,
        openshift: bool,
        managed_by_olm: bool,
    ) -> Self {
        let secret_name = format!("{deployment}-service-cert");
        let cert_annotation = if openshift {
            (OPENSHIFT_CERT_ANNOTATION, "true".to_string())
        } else {
            (K8S_CERT_ANNOTATION, format!("{namespace}/{secret_name}"))
        };
        Self {
            client,
            namespace: namespace.to_string(),
            service_name: format!("{deployment}-service"),
            secret_name,
            port,
            cert_annotation,
            managed_by_olm,
        }
    }

    pub fn secret_name(&self) -> &str {
        &self.secret_name
    }

    /// Whether the service-cert Secret has to be watched as well
    pub fn managed_by_olm(&self) -> bool {
        self.managed_by_olm
    }

    pub async fn reconcile(&self) -> Result<(), ControllerError> {
        let Some(mut crd) = self.client.get(&kinds::crd(), None, HCO_CRD_NAME).await? else {
            info!("HyperConverged CRD not found, skipping reconciliation");
            return Ok(());
        };

        let ca_bundle = if self.managed_by_olm {
            Some(self.olm_ca_bundle().await?)
        } else {
            None
        };

        if !self.needs_update(&crd, ca_bundle.as_deref()) {
            debug!("CRD conversion webhook configuration is up to date");
            return Ok(());
        }

        if !self.managed_by_olm {
            let (key, value) = &self.cert_annotation;
            crd.metadata
                .annotations
                .get_or_insert_with(Default::default)
                .insert((*key).to_string(), value.clone());
        }
        let mut client_config = json!({
            "service": {
                "namespace": self.namespace,
                "name": self.service_name,
                "path": CONVERSION_PATH,
                "port": self.port,
            }
        });
        if let Some(bundle) = ca_bundle {
            client_config["caBundle"] = Value::String(bundle);
        }
        let conversion = json!({
            "strategy": "Webhook",
            "webhook": {
                "clientConfig": client_config,
                "conversionReviewVersions": REVIEW_VERSIONS,
            }
        });
        match crd.data.get_mut("spec").and_then(Value::as_object_mut) {
            Some(spec) => {
                spec.insert("conversion".to_string(), conversion);
            }
            None => return Err(ControllerError::InvalidConfig(format!("{HCO_CRD_NAME} has no spec"))),
        }

        self.client.update(&kinds::crd(), &crd).await?;
        info!("Successfully updated CRD conversion webhook configuration");
        Ok(())
    }

    fn needs_update(&self, crd: &DynamicObject, ca_bundle: Option<&str>) -> bool {
        if !self.managed_by_olm {
            let (key, value) = &self.cert_annotation;
            let current = crd.metadata.annotations.as_ref().and_then(|a| a.get(*key));
            if current != Some(value) {
                return true;
            }
        }

        let Some(conversion) = crd.data.pointer("/spec/conversion") else {
            return true;
        };
        if conversion.get("strategy").and_then(Value::as_str) != Some("Webhook") {
            return true;
        }
        let Some(client_config) = conversion.pointer("/webhook/clientConfig") else {
            return true;
        };
        let Some(service) = client_config.get("service") else {
            return true;
        };
        if self.managed_by_olm && client_config.get("caBundle").and_then(Value::as_str) != ca_bundle {
            return true;
        }

        service.get("name").and_then(Value::as_str) != Some(self.service_name.as_str())
            || service.get("namespace").and_then(Value::as_str) != Some(self.namespace.as_str())
            || service.get("path").and_then(Value::as_str).unwrap_or_default() != CONVERSION_PATH
            || service.get("port").and_then(Value::as_u64).unwrap_or_default() != u64::from(self.port)
    }

    /// Base64 CA bundle from the service-cert Secret
    async fn olm_ca_bundle(&self) -> Result<String, ControllerError> {
        let secret = self
            .client
            .get(&cluster_client::gvk_of::<Secret>(), Some(&self.namespace), &self.secret_name)
            .await?
            .ok_or_else(|| ControllerError::CaBundle(format!("secret {} not found", self.secret_name)))?;
        secret
            .data
            .pointer(&format!("/data/{OLM_CA_BUNDLE_KEY}"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ControllerError::CaBundle(format!("{OLM_CA_BUNDLE_KEY} not found in secret {}", self.secret_name))
            })
    }
}
