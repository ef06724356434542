//! Engine metrics
//!
//! All metrics live in a registry owned by [`HcoMetrics`] rather than the
//! process-global default registry, so concurrent tests never share
//! counters.

use crds::SystemHealthStatus;
use prometheus::{Encoder, Gauge, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

#[derive(Debug, Clone)]
pub struct HcoMetrics {
    registry: Registry,
    out_of_band_modifications: IntCounterVec,
    unsafe_modifications: IntGaugeVec,
    hyperconverged_exists: IntGauge,
    system_health_status: Gauge,
    memory_overcommit_percentage: IntGauge,
}

/// Label value identifying a managed child
fn component_name(kind: &str, name: &str) -> String {
    format!("{kind}/{name}").to_lowercase()
}

impl HcoMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let out_of_band_modifications = IntCounterVec::new(
            Opts::new(
                "kubevirt_hco_out_of_band_modifications_total",
                "Count of out-of-band modifications overwritten by HCO",
            ),
            &["component_name"],
        )?;
        let unsafe_modifications = IntGaugeVec::new(
            Opts::new(
                "kubevirt_hco_unsafe_modifications",
                "Count of unsafe modifications in the HyperConverged annotations",
            ),
            &["annotation_name"],
        )?;
        let hyperconverged_exists = IntGauge::new(
            "kubevirt_hco_hyperconverged_cr_exists",
            "Indicates whether the HyperConverged custom resource exists (1) or not (0)",
        )?;
        let system_health_status = Gauge::new(
            "kubevirt_hco_system_health_status",
            "Indicates whether the system health status is healthy (0), warning (1), or error (2)",
        )?;
        let memory_overcommit_percentage = IntGauge::new(
            "kubevirt_hco_memory_overcommit_percentage",
            "Indicates the cluster-wide configured VM memory overcommit percentage",
        )?;

        registry.register(Box::new(out_of_band_modifications.clone()))?;
        registry.register(Box::new(unsafe_modifications.clone()))?;
        registry.register(Box::new(hyperconverged_exists.clone()))?;
        registry.register(Box::new(system_health_status.clone()))?;
        registry.register(Box::new(memory_overcommit_percentage.clone()))?;

        Ok(Self {
            registry,
            out_of_band_modifications,
            unsafe_modifications,
            hyperconverged_exists,
            system_health_status,
            memory_overcommit_percentage,
        })
    }

    pub fn inc_overwritten_modifications(&self, kind: &str, name: &str) {
        self.out_of_band_modifications
            .with_label_values(&[component_name(kind, name).as_str()])
            .inc();
    }

    pub fn overwritten_modifications(&self, kind: &str, name: &str) -> u64 {
        self.out_of_band_modifications
            .with_label_values(&[component_name(kind, name).as_str()])
            .get()
    }

    pub fn set_unsafe_modifications(&self, annotation: &str, count: usize) {
        self.unsafe_modifications
            .with_label_values(&[annotation.to_lowercase().as_str()])
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn unsafe_modifications(&self, annotation: &str) -> i64 {
        self.unsafe_modifications
            .with_label_values(&[annotation.to_lowercase().as_str()])
            .get()
    }

    pub fn set_hyperconverged_exists(&self, exists: bool) {
        self.hyperconverged_exists.set(i64::from(exists));
    }

    pub fn hyperconverged_exists(&self) -> bool {
        self.hyperconverged_exists.get() == 1
    }

    pub fn set_system_health_status(&self, status: SystemHealthStatus) {
        self.system_health_status.set(status.metric_value());
    }

    pub fn system_health_status(&self) -> f64 {
        self.system_health_status.get()
    }

    pub fn set_memory_overcommit_percentage(&self, percentage: i32) {
        self.memory_overcommit_percentage.set(i64::from(percentage));
    }

    /// Called when the HyperConverged resource is gone
    pub fn clear(&self) {
        self.set_hyperconverged_exists(false);
        self.unsafe_modifications.reset();
    }

    /// Render the registry in the Prometheus text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_name_is_lowercase() {
        let metrics = HcoMetrics::new().unwrap();
        metrics.inc_overwritten_modifications("KubeVirt", "kubevirt-kubevirt-hyperconverged");
        metrics.inc_overwritten_modifications("KubeVirt", "kubevirt-kubevirt-hyperconverged");
        assert_eq!(
            metrics.overwritten_modifications("KubeVirt", "kubevirt-kubevirt-hyperconverged"),
            2
        );
        let text = metrics.render().unwrap();
        assert!(text.contains("component_name=\"kubevirt/kubevirt-kubevirt-hyperconverged\""));
    }

    #[test]
    fn test_clear_resets_unsafe_gauges() {
        let metrics = HcoMetrics::new().unwrap();
        metrics.set_hyperconverged_exists(true);
        metrics.set_unsafe_modifications("jsonpatch.hco.kubevirt.io/kv", 3);
        assert_eq!(metrics.unsafe_modifications("jsonpatch.hco.kubevirt.io/kv"), 3);

        metrics.clear();
        assert!(!metrics.hyperconverged_exists());
        assert_eq!(metrics.unsafe_modifications("jsonpatch.hco.kubevirt.io/kv"), 0);
    }

    #[test]
    fn test_system_health_gauge_values() {
        let metrics = HcoMetrics::new().unwrap();
        metrics.set_system_health_status(SystemHealthStatus::Error);
        assert!((metrics.system_health_status() - 2.0).abs() < f64::EPSILON);
        metrics.set_system_health_status(SystemHealthStatus::Healthy);
        assert!(metrics.system_health_status().abs() < f64::EPSILON);
    }
}
