//! KubeVirt console plugin
//!
//! Two small deployments back the plugin: the nginx server with the UI
//! bundle and the API server proxy it calls. Each is fronted by a Service
//! with an OpenShift serving certificate, and the `ConsolePlugin` ties them
//! together. The plugin is then switched on in the console operator config.

use super::generic::{new_object, DiffRule, GenericOperand, OperandHooks, Scope};
use super::labels::{AppComponent, APP_LABEL, APP_LABEL_COMPONENT};
use super::placement::node_placement;
use super::{EnsureResult, Operand, OperandContext};
use crate::error::ControllerError;
use crate::kinds;
use crate::request::HcoRequest;
use crate::tls_profile;
use cluster_client::{gvk_of, to_dynamic};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{DynamicObject, GroupVersionKind};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub const PLUGIN_NAME: &str = "kubevirt-plugin";

pub const PLUGIN_DEPLOYMENT: &str = "kubevirt-console-plugin";
pub const PROXY_DEPLOYMENT: &str = "kubevirt-apiserver-proxy";

const PLUGIN_SERVICE: &str = "kubevirt-console-plugin-service";
const PROXY_SERVICE: &str = "kubevirt-apiserver-proxy-service";

const PLUGIN_PORT: i32 = 9443;
const PROXY_PORT: i32 = 8080;

const NGINX_CONFIG_MAP: &str = "nginx-conf";

const SERVING_CERT_ANNOTATION: &str = "service.beta.openshift.io/serving-cert-secret-name";

fn nginx_conf() -> String {
    format!(
        r#"error_log /dev/stdout info;
events {{}}
http {{
    access_log         /dev/stdout;
    include            /etc/nginx/mime.types;
    default_type       application/octet-stream;
    keepalive_timeout  65;
    server {{
        listen              {PLUGIN_PORT} ssl;
        listen              [::]:{PLUGIN_PORT} ssl;
        ssl_certificate     /var/serving-cert/tls.crt;
        ssl_certificate_key /var/serving-cert/tls.key;
        root                /usr/share/nginx/html;
    }}
}}
"#
    )
}

/// One of the two plugin deployments
pub struct PluginDeployment {
    name: &'static str,
    component: AppComponent,
    port: i32,
    serving_cert: &'static str,
    cert_path: &'static str,
}

impl PluginDeployment {
    fn plugin() -> Self {
        Self {
            name: PLUGIN_DEPLOYMENT,
            component: AppComponent::UiPlugin,
            port: PLUGIN_PORT,
            serving_cert: "plugin-serving-cert",
            cert_path: "/var/serving-cert",
        }
    }

    fn proxy() -> Self {
        Self {
            name: PROXY_DEPLOYMENT,
            component: AppComponent::UiProxy,
            port: PROXY_PORT,
            serving_cert: "kubevirt-apiserver-proxy-serving-cert",
            cert_path: "/app/cert",
        }
    }

    fn is_proxy(&self) -> bool {
        self.name == PROXY_DEPLOYMENT
    }

    fn container(&self, ctx: &OperandContext, req: &HcoRequest) -> Value {
        let image = if self.is_proxy() {
            &ctx.config.images.console_proxy
        } else {
            &ctx.config.images.console_plugin
        };
        let mut mounts = vec![json!({"name": self.serving_cert, "mountPath": self.cert_path, "readOnly": true})];
        let mut container = json!({
            "name": self.name,
            "image": image,
            "imagePullPolicy": "IfNotPresent",
            "resources": {"requests": {"cpu": "10m", "memory": "100Mi"}},
            "ports": [{"containerPort": self.port, "protocol": "TCP"}],
            "securityContext": {
                "allowPrivilegeEscalation": false,
                "capabilities": {"drop": ["ALL"]},
            },
            "terminationMessagePath": "/dev/termination-log",
            "terminationMessagePolicy": "FallbackToLogsOnError",
        });
        if self.is_proxy() {
            let tls = tls_profile::settings(&req.tls_profile());
            let mut args = Vec::new();
            if !tls.ciphers.is_empty() {
                args.push(format!("--tls-cipher-suites={}", tls.ciphers.join(",")));
            }
            args.push(format!("--tls-min-version={}", tls.min_tls_version));
            container["args"] = json!(args);
        } else {
            mounts.push(json!({
                "name": NGINX_CONFIG_MAP,
                "mountPath": "/etc/nginx/nginx.conf",
                "subPath": "nginx.conf",
                "readOnly": true,
            }));
        }
        container["volumeMounts"] = json!(mounts);
        container
    }

    fn pod_spec(&self, ctx: &OperandContext, req: &HcoRequest) -> Value {
        let mut volumes = vec![json!({
            "name": self.serving_cert,
            "secret": {"secretName": self.serving_cert, "defaultMode": 420},
        })];
        if !self.is_proxy() {
            volumes.push(json!({"name": NGINX_CONFIG_MAP, "configMap": {"name": NGINX_CONFIG_MAP}}));
        }
        let mut spec = json!({
            "securityContext": {"runAsNonRoot": true, "seccompProfile": {"type": "RuntimeDefault"}},
            "containers": [self.container(ctx, req)],
            "priorityClassName": super::priority_class::NAME,
            "volumes": volumes,
        });
        if let (Some(map), Some(Value::Object(placement))) =
            (spec.as_object_mut(), req.hc.spec.infra_placement().map(node_placement))
        {
            map.extend(placement);
        }
        spec
    }
}

impl OperandHooks for PluginDeployment {
    fn gvk(&self) -> GroupVersionKind {
        gvk_of::<Deployment>()
    }

    fn name(&self) -> &str {
        self.name
    }

    fn component(&self) -> AppComponent {
        self.component
    }

    fn build(&self, ctx: &OperandContext, req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let replicas = if req.infra_highly_available() { 2 } else { 1 };
        Ok(new_object(json!({
            "spec": {
                "replicas": replicas,
                "selector": {"matchLabels": {"name": self.name}},
                "strategy": {"type": "RollingUpdate"},
                "template": {
                    "metadata": {
                        "labels": {
                            "name": self.name,
                            APP_LABEL: req.name(),
                            APP_LABEL_COMPONENT: self.component.as_str(),
                        },
                        "annotations": {"openshift.io/required-scc": "restricted-v2"},
                    },
                    "spec": self.pod_spec(ctx, req),
                },
            }
        })))
    }

    fn diff_rule(&self) -> DiffRule {
        DiffRule::SpecSubset
    }
}

/// Service in front of one plugin deployment
pub struct PluginService {
    name: &'static str,
    target: &'static str,
    component: AppComponent,
    port: i32,
    serving_cert: &'static str,
}

impl OperandHooks for PluginService {
    fn gvk(&self) -> GroupVersionKind {
        gvk_of::<Service>()
    }

    fn name(&self) -> &str {
        self.name
    }

    fn component(&self) -> AppComponent {
        self.component
    }

    fn build(&self, _ctx: &OperandContext, _req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let svc = Service {
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some(format!("{}-port", self.target)),
                    port: self.port,
                    protocol: Some("TCP".to_string()),
                    target_port: Some(IntOrString::Int(self.port)),
                    ..Default::default()
                }]),
                selector: Some(BTreeMap::from([("name".to_string(), self.target.to_string())])),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut svc = to_dynamic(&svc)?;
        svc.metadata.annotations = Some(BTreeMap::from([(
            SERVING_CERT_ANNOTATION.to_string(),
            self.serving_cert.to_string(),
        )]));
        Ok(svc)
    }

    fn diff_rule(&self) -> DiffRule {
        DiffRule::Service
    }
}

const PLUGIN_POLICY: &str = "kubevirt-console-plugin-np";
const PROXY_POLICY: &str = "kubevirt-apiserver-proxy-np";

const API_SERVER_PORT: i32 = 6443;

/// Namespace, pod label and port of the cluster DNS
fn cluster_dns(req: &HcoRequest) -> (&'static str, (&'static str, &'static str), i32) {
    if req.caps.openshift {
        ("openshift-dns", ("dns.operator.openshift.io/daemonset-dns", "default"), 5353)
    } else {
        ("kube-system", ("k8s-app", "kube-dns"), 53)
    }
}

/// Lets the console reach the plugin, and the proxy reach the API server
pub struct PluginNetworkPolicy {
    name: &'static str,
    component: AppComponent,
    port: i32,
}

impl PluginNetworkPolicy {
    fn pod_selector(&self, req: &HcoRequest) -> Value {
        json!({"matchLabels": {APP_LABEL: req.name(), APP_LABEL_COMPONENT: self.component.as_str()}})
    }

    fn ingress(&self) -> Value {
        let ports = json!([{"protocol": "TCP", "port": self.port}]);
        if self.component == AppComponent::UiProxy {
            return json!([{"ports": ports}]);
        }
        json!([{
            "ports": ports,
            "from": [{
                "namespaceSelector": {"matchLabels": {"kubernetes.io/metadata.name": "openshift-console"}},
                "podSelector": {"matchLabels": {"app": "console", "component": "ui"}},
            }],
        }])
    }
}

impl OperandHooks for PluginNetworkPolicy {
    fn gvk(&self) -> GroupVersionKind {
        gvk_of::<NetworkPolicy>()
    }

    fn name(&self) -> &str {
        self.name
    }

    fn component(&self) -> AppComponent {
        self.component
    }

    fn build(&self, _ctx: &OperandContext, req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        if self.component != AppComponent::UiProxy {
            return Ok(new_object(json!({
                "spec": {
                    "podSelector": self.pod_selector(req),
                    "ingress": self.ingress(),
                    "policyTypes": ["Ingress"],
                }
            })));
        }
        let (dns_namespace, (dns_label, dns_value), dns_port) = cluster_dns(req);
        Ok(new_object(json!({
            "spec": {
                "podSelector": self.pod_selector(req),
                "ingress": self.ingress(),
                "egress": [
                    {
                        "ports": [
                            {"protocol": "TCP", "port": dns_port},
                            {"protocol": "UDP", "port": dns_port},
                        ],
                        "to": [{
                            "namespaceSelector": {"matchLabels": {"kubernetes.io/metadata.name": dns_namespace}},
                            "podSelector": {"matchLabels": {dns_label: dns_value}},
                        }],
                    },
                    {"ports": [{"protocol": "TCP", "port": API_SERVER_PORT}]},
                ],
                "policyTypes": ["Egress", "Ingress"],
            }
        })))
    }
}

pub struct NginxConfigMap;

impl OperandHooks for NginxConfigMap {
    fn gvk(&self) -> GroupVersionKind {
        gvk_of::<ConfigMap>()
    }

    fn name(&self) -> &str {
        NGINX_CONFIG_MAP
    }

    fn component(&self) -> AppComponent {
        AppComponent::UiPlugin
    }

    fn build(&self, _ctx: &OperandContext, _req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let cm = ConfigMap {
            data: Some(BTreeMap::from([("nginx.conf".to_string(), nginx_conf())])),
            ..Default::default()
        };
        Ok(to_dynamic(&cm)?)
    }

    fn diff_rule(&self) -> DiffRule {
        DiffRule::ConfigMapData
    }
}

pub struct ConsolePluginHooks;

impl OperandHooks for ConsolePluginHooks {
    fn gvk(&self) -> GroupVersionKind {
        kinds::console_plugin()
    }

    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn scope(&self) -> Scope {
        Scope::Cluster
    }

    fn component(&self) -> AppComponent {
        AppComponent::UiPlugin
    }

    fn build(&self, _ctx: &OperandContext, req: &HcoRequest) -> Result<DynamicObject, ControllerError> {
        let ns = req.namespace();
        Ok(new_object(json!({
            "spec": {
                "displayName": "Kubevirt Console Plugin",
                "backend": {
                    "type": "Service",
                    "service": {"name": PLUGIN_SERVICE, "namespace": ns, "port": PLUGIN_PORT, "basePath": "/"},
                },
                "proxy": [{
                    "alias": PROXY_DEPLOYMENT,
                    "authorization": "UserToken",
                    "endpoint": {
                        "type": "Service",
                        "service": {"name": PROXY_SERVICE, "namespace": ns, "port": PROXY_PORT},
                    },
                }],
            }
        })))
    }
}

/// Adds the plugin to `spec.plugins` of the console operator config. The
/// config belongs to the console operator, so nothing is removed on
/// teardown and a missing config is not an error.
pub struct ConsoleEnabler {
    ctx: Arc<OperandContext>,
}

fn console_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("operator.openshift.io", "v1", "Console")
}

#[async_trait::async_trait]
impl Operand for ConsoleEnabler {
    fn kind(&self) -> &str {
        "Console"
    }

    fn name(&self) -> &str {
        "cluster"
    }

    async fn ensure(&self, req: &mut HcoRequest) -> Result<EnsureResult, ControllerError> {
        let mut res = EnsureResult::new(self.kind(), self.name());
        res.upgrade_done = req.component_upgrade_in_progress;
        let gvk = console_gvk();
        let found = match self.ctx.client.get(&gvk, None, "cluster").await {
            Ok(found) => found,
            Err(e) if e.is_no_kind_match() => None,
            Err(e) => return Err(e.into()),
        };
        let Some(mut console) = found else {
            debug!("No console operator config, not enabling {}", PLUGIN_NAME);
            return Ok(res);
        };

        let plugins = console
            .data
            .pointer("/spec/plugins")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if plugins.iter().any(|p| p.as_str() == Some(PLUGIN_NAME)) {
            return Ok(res);
        }

        info!("Enabling the {} console plugin", PLUGIN_NAME);
        let mut plugins = plugins;
        plugins.push(json!(PLUGIN_NAME));
        if !console.data.get("spec").is_some_and(Value::is_object) {
            console.data["spec"] = json!({});
        }
        console.data["spec"]["plugins"] = Value::Array(plugins);
        self.ctx.client.update(&gvk, &console).await?;
        res.updated = true;
        Ok(res)
    }

    async fn ensure_deleted(&self, _req: &HcoRequest) -> Result<bool, ControllerError> {
        Ok(false)
    }

    fn reset(&self) {}

    fn deleted_on_teardown(&self) -> bool {
        false
    }
}

/// Every operand of the console plugin, in creation order
pub fn operands(ctx: &Arc<OperandContext>) -> Vec<Box<dyn Operand>> {
    fn boxed<H: OperandHooks>(hooks: H, ctx: &Arc<OperandContext>) -> Box<dyn Operand> {
        Box::new(GenericOperand::new(hooks, Arc::clone(ctx)))
    }
    vec![
        boxed(NginxConfigMap, ctx),
        boxed(PluginDeployment::plugin(), ctx),
        boxed(
            PluginNetworkPolicy {
                name: PLUGIN_POLICY,
                component: AppComponent::UiPlugin,
                port: PLUGIN_PORT,
            },
            ctx,
        ),
        boxed(
            PluginService {
                name: PLUGIN_SERVICE,
                target: PLUGIN_DEPLOYMENT,
                component: AppComponent::UiPlugin,
                port: PLUGIN_PORT,
                serving_cert: "plugin-serving-cert",
            },
            ctx,
        ),
        boxed(PluginDeployment::proxy(), ctx),
        boxed(
            PluginNetworkPolicy {
                name: PROXY_POLICY,
                component: AppComponent::UiProxy,
                port: PROXY_PORT,
            },
            ctx,
        ),
        boxed(
            PluginService {
                name: PROXY_SERVICE,
                target: PROXY_DEPLOYMENT,
                component: AppComponent::UiProxy,
                port: PROXY_PORT,
                serving_cert: "kubevirt-apiserver-proxy-serving-cert",
            },
            ctx,
        ),
        boxed(ConsolePluginHooks, ctx),
        Box::new(ConsoleEnabler { ctx: Arc::clone(ctx) }),
    ]
}
