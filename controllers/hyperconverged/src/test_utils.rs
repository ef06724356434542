//! Test utilities for the engine
//!
//! Fixtures shared by the operand and reconciler tests: a HyperConverged
//! resource, the operator Deployment, and an operand context over a
//! [`MockClusterClient`].

use crate::cluster_info::Capabilities;
use crate::config::{test_config, OperatorConfig};
use crate::operands::OperandContext;
use crate::own_resources::OwnResources;
use crate::request::HcoRequest;
use cluster_client::{to_dynamic, MockClusterClient};
use crds::HyperConverged;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use std::sync::Arc;

pub const TEST_NAMESPACE: &str = "kubevirt-hyperconverged";

pub const TEST_HC_UID: &str = "5c5a61c4-3f29-4b43-9f0b-6f2b8d0f7a11";

/// Helper to create the HyperConverged resource as the API server returns it
pub fn create_test_hc() -> HyperConverged {
    let mut hc = HyperConverged::with_defaults(TEST_NAMESPACE);
    hc.metadata.uid = Some(TEST_HC_UID.to_string());
    hc.metadata.generation = Some(1);
    hc
}

/// Helper to create the operator Deployment
pub fn create_test_deployment() -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some("hco-operator".to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            uid: Some("0f3e1a8e-51d7-4c55-9a55-2b1f6d0c4e22".to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Capabilities of an OpenShift cluster with every optional API installed
pub fn openshift_caps() -> Capabilities {
    Capabilities {
        openshift: true,
        monitoring_available: true,
        nad_available: true,
        perses_available: true,
        base_domain: Some("example.com".to_string()),
        ..Default::default()
    }
}

/// Capabilities of a plain Kubernetes cluster
pub fn kubernetes_caps() -> Capabilities {
    Capabilities::default()
}

pub fn create_test_config() -> Arc<OperatorConfig> {
    Arc::new(test_config())
}

/// Operand context over `client`
pub fn create_test_context(client: &MockClusterClient) -> Arc<OperandContext> {
    Arc::new(OperandContext {
        client: Arc::new(client.clone()),
        config: create_test_config(),
        own: Arc::new(OwnResources::with_deployment(create_test_deployment())),
    })
}

pub fn create_test_request(hc: HyperConverged, caps: Capabilities) -> HcoRequest {
    HcoRequest::new(hc, caps, true)
}

/// The HyperConverged resource in its dynamic form
pub fn hc_object(hc: &HyperConverged) -> DynamicObject {
    to_dynamic(hc).unwrap_or_else(|e| panic!("HyperConverged does not serialize: {e}"))
}

