//! virtctl downloads in the OpenShift console
//!
//! The binaries are served by the `hyperconverged-cluster-cli-download`
//! pod behind a Service and an edge-terminated Route; the
//! ConsoleCLIDownload points the console at that Route.

use super::generic::{new_object, DiffRule, OperandHooks, Scope};
use super::labels::AppComponent;
use super::OperandContext;
use crate::error::ControllerError;
use crate::kinds;
use crate::request::HcoRequest;
use cluster_client::{gvk_of, to_dynamic};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{DynamicObject, GroupVersionKind};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const CLI_DOWNLOAD_NAME: &str = "virtctl-clidownloads-kubevirt-hyperconverged";

pub const SERVICE_NAME: &str = "hyperconverged-cluster-cli-download";

pub const PORT: i32 = 8080;

/// (path, text) of every published binary
const BINARIES: &[(&str, &str)] = &[
    ("amd64/linux/virtctl.tar.gz", "Download virtctl for Linux for x86_64"),
    ("amd64/mac/virtctl.zip", "Download virtctl for Mac for x86_64"),
    ("amd64/windows/virtctl.zip", "Download virtctl for Windows for x86_64"),
    ("arm64/linux/virtctl.tar.gz", "Download virtctl for Linux for ARM 64"),
    ("arm64/mac/virtctl.zip", "Download virtctl for Mac for ARM 64"),
    ("arm64/windows/virtctl.zip", "Download virtctl for Windows for ARM 64"),
    ("s390x/linux/virtctl.tar.gz", "Download virtctl for Linux for IBM Z"),
];

/// Host the router assigns to the download Route
fn route_host(req: &HcoRequest) -> Option<String> {
    let domain = req.caps.base_domain.as_deref()?;
    Some(format!("{SERVICE_NAME}-{}.apps.{domain}", req.namespace()))
}

fn links(ctx: &OperandContext, req: &HcoRequest) -> Value {
    match route_host(req) {
        Some(host) => BINARIES
            .iter()
            .map(|(path, text)| json!({"href": format!("https://{host}/{path}"), "text": text}))
            .collect(),
        None => {
            let kv = &ctx.config.component_versions.kubevirt;
            json!([{
                "href": format!("https://github.com/kubevirt/kubevirt/releases/{kv}"),
                "text": format!("KubeVirt {kv} release downloads"),
            }])
        }
    }
}

pub struct CliDownloadHooks;

impl OperandHooks for CliDownloadHooks {
    fn gvk(&self) -> GroupVersionKind {
        kinds::console_cli_download()
    }

    fn name(&self) -> &str {
        CLI_DOWNLOAD_NAME
    }

    fn scope(&self) -> Scope {
        Scope::Cluster
    }

    fn component(&self) -> AppComponent {
        AppComponent::Compute
    }

    fn build(&self, ctx: &OperandContext, req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        Ok(new_object(json!({
            "spec": {
                "description": "The virtctl client is a supplemental command-line utility for managing virtualization resources from the command line.",
                "displayName": "virtctl - KubeVirt command line interface",
                "links": links(ctx, req),
            }
        })))
    }
}

pub struct CliDownloadService;

impl OperandHooks for CliDownloadService {
    fn gvk(&self) -> GroupVersionKind {
        gvk_of::<Service>()
    }

    fn name(&self) -> &str {
        SERVICE_NAME
    }

    fn component(&self) -> AppComponent {
        AppComponent::Compute
    }

    fn build(&self, _ctx: &OperandContext, _req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let svc = Service {
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some("http".to_string()),
                    port: PORT,
                    protocol: Some("TCP".to_string()),
                    target_port: Some(IntOrString::Int(PORT)),
                    ..Default::default()
                }]),
                selector: Some(BTreeMap::from([("name".to_string(), SERVICE_NAME.to_string())])),
                ..Default::default()
            }),
            ..Default::default()
        };
        Ok(to_dynamic(&svc)?)
    }

    fn diff_rule(&self) -> DiffRule {
        DiffRule::Service
    }
}

pub struct CliDownloadRoute;

impl OperandHooks for CliDownloadRoute {
    fn gvk(&self) -> GroupVersionKind {
        kinds::route()
    }

    fn name(&self) -> &str {
        SERVICE_NAME
    }

    fn component(&self) -> AppComponent {
        AppComponent::Compute
    }

    fn build(&self, _ctx: &OperandContext, _req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        Ok(new_object(json!({
            "spec": {
                "to": {"kind": "Service", "name": SERVICE_NAME, "weight": 100},
                "port": {"targetPort": PORT},
                "tls": {"termination": "edge", "insecureEdgeTerminationPolicy": "Redirect"},
                "wildcardPolicy": "None",
            }
        })))
    }

    fn diff_rule(&self) -> DiffRule {
        DiffRule::Route
    }
}
