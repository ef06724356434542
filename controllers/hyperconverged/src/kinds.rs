//! GroupVersionKinds of the non-core kinds the engine reads or writes.
//! Core kinds go through [`cluster_client::gvk_of`].

use kube::api::GroupVersionKind;

pub fn hyperconverged() -> GroupVersionKind {
    GroupVersionKind::gvk(crds::HCO_GROUP, crds::HCO_VERSION, "HyperConverged")
}

pub fn kubevirt() -> GroupVersionKind {
    GroupVersionKind::gvk("kubevirt.io", "v1", "KubeVirt")
}

pub fn cdi() -> GroupVersionKind {
    GroupVersionKind::gvk("cdi.kubevirt.io", "v1beta1", "CDI")
}

pub fn network_addons() -> GroupVersionKind {
    GroupVersionKind::gvk("networkaddonsoperator.network.kubevirt.io", "v1", "NetworkAddonsConfig")
}

pub fn ssp() -> GroupVersionKind {
    GroupVersionKind::gvk("ssp.kubevirt.io", "v1beta2", "SSP")
}

pub fn aaq() -> GroupVersionKind {
    GroupVersionKind::gvk("aaq.kubevirt.io", "v1alpha1", "AAQ")
}

pub fn network_attachment_definition() -> GroupVersionKind {
    GroupVersionKind::gvk("k8s.cni.cncf.io", "v1", "NetworkAttachmentDefinition")
}

pub fn console_cli_download() -> GroupVersionKind {
    GroupVersionKind::gvk("console.openshift.io", "v1", "ConsoleCLIDownload")
}

pub fn console_plugin() -> GroupVersionKind {
    GroupVersionKind::gvk("console.openshift.io", "v1", "ConsolePlugin")
}

pub fn console_quick_start() -> GroupVersionKind {
    GroupVersionKind::gvk("console.openshift.io", "v1", "ConsoleQuickStart")
}

pub fn security_context_constraints() -> GroupVersionKind {
    GroupVersionKind::gvk("security.openshift.io", "v1", "SecurityContextConstraints")
}

pub fn image_stream() -> GroupVersionKind {
    GroupVersionKind::gvk("image.openshift.io", "v1", "ImageStream")
}

pub fn route() -> GroupVersionKind {
    GroupVersionKind::gvk("route.openshift.io", "v1", "Route")
}

pub fn prometheus_rule() -> GroupVersionKind {
    GroupVersionKind::gvk("monitoring.coreos.com", "v1", "PrometheusRule")
}

pub fn service_monitor() -> GroupVersionKind {
    GroupVersionKind::gvk("monitoring.coreos.com", "v1", "ServiceMonitor")
}

pub fn perses_dashboard() -> GroupVersionKind {
    GroupVersionKind::gvk("perses.dev", "v1alpha1", "PersesDashboard")
}

pub fn perses_datasource() -> GroupVersionKind {
    GroupVersionKind::gvk("perses.dev", "v1alpha1", "PersesDatasource")
}

pub fn operator_condition() -> GroupVersionKind {
    GroupVersionKind::gvk("operators.coreos.com", "v2", "OperatorCondition")
}

pub fn cluster_service_version() -> GroupVersionKind {
    GroupVersionKind::gvk("operators.coreos.com", "v1alpha1", "ClusterServiceVersion")
}

pub fn cluster_version() -> GroupVersionKind {
    GroupVersionKind::gvk("config.openshift.io", "v1", "ClusterVersion")
}

pub fn api_server() -> GroupVersionKind {
    GroupVersionKind::gvk("config.openshift.io", "v1", "APIServer")
}

pub fn dns() -> GroupVersionKind {
    GroupVersionKind::gvk("config.openshift.io", "v1", "DNS")
}

pub fn cluster_network() -> GroupVersionKind {
    GroupVersionKind::gvk("config.openshift.io", "v1", "Network")
}

pub fn crd() -> GroupVersionKind {
    GroupVersionKind::gvk("apiextensions.k8s.io", "v1", "CustomResourceDefinition")
}

pub fn validating_admission_policy() -> GroupVersionKind {
    GroupVersionKind::gvk("admissionregistration.k8s.io", "v1", "ValidatingAdmissionPolicy")
}

pub fn validating_admission_policy_binding() -> GroupVersionKind {
    GroupVersionKind::gvk("admissionregistration.k8s.io", "v1", "ValidatingAdmissionPolicyBinding")
}
