//! Managed label set
//!
//! Every child carries the same `app` and `app.kubernetes.io/*` labels. On
//! reconcile the managed keys are healed and every other key is left alone.

use std::collections::BTreeMap;

pub const APP_LABEL: &str = "app";
pub const APP_LABEL_VERSION: &str = "app.kubernetes.io/version";
pub const APP_LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const APP_LABEL_PART_OF: &str = "app.kubernetes.io/part-of";
pub const APP_LABEL_COMPONENT: &str = "app.kubernetes.io/component";

/// Value of the managed-by label
pub const OPERATOR_NAME: &str = "hco-operator";
const PART_OF: &str = "hyperconverged-cluster";

/// Value of the component label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppComponent {
    Compute,
    Storage,
    Network,
    Monitoring,
    Schedule,
    Deployment,
    UiPlugin,
    UiProxy,
    QuotaManagement,
    WaspAgent,
}

impl AppComponent {
    pub fn as_str(self) -> &'static str {
        match self {
            AppComponent::Compute => "compute",
            AppComponent::Storage => "storage",
            AppComponent::Network => "network",
            AppComponent::Monitoring => "monitoring",
            AppComponent::Schedule => "schedule",
            AppComponent::Deployment => "deployment",
            AppComponent::UiPlugin => "kubevirt-console-plugin",
            AppComponent::UiProxy => "kubevirt-apiserver-proxy",
            AppComponent::QuotaManagement => "quota-management",
            AppComponent::WaspAgent => "wasp-agent",
        }
    }
}

/// Managed labels of a child of the HyperConverged resource `hc_name`
pub fn managed_labels(hc_name: &str, version: &str, component: AppComponent) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), hc_name.to_string()),
        (APP_LABEL_MANAGED_BY.to_string(), OPERATOR_NAME.to_string()),
        (APP_LABEL_VERSION.to_string(), version.to_string()),
        (APP_LABEL_PART_OF.to_string(), PART_OF.to_string()),
        (APP_LABEL_COMPONENT.to_string(), component.as_str().to_string()),
    ])
}

/// Whether every managed key is present with its managed value
pub fn contains_managed(managed: &BTreeMap<String, String>, existing: Option<&BTreeMap<String, String>>) -> bool {
    managed
        .iter()
        .all(|(k, v)| existing.and_then(|labels| labels.get(k)) == Some(v))
}

/// Existing labels with the managed keys written over them
pub fn merge(managed: &BTreeMap<String, String>, existing: Option<&BTreeMap<String, String>>) -> BTreeMap<String, String> {
    let mut merged = existing.cloned().unwrap_or_default();
    merged.extend(managed.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
