//! Unit tests for the HyperConverged pass

#[cfg(test)]
mod tests {
    use crate::cluster_info::ClusterInfo;
    use crate::config::{test_config, OperatorConfig, RunMode};
    use crate::error::ControllerError;
    use crate::events::{reasons, RecordingEmitter};
    use crate::kinds;
    use crate::metrics::HcoMetrics;
    use crate::monitoring::{self, refresher::Refresher, token::BearerToken};
    use crate::operands::generic::new_object;
    use crate::operands::handler::{registry, OperandHandler};
    use crate::operands::{annotations, cdi, cnao, kubevirt, priority_class, ssp};
    use crate::operator_condition::OperatorCondition;
    use crate::reconciler::{HcoReconciler, CONFLICT_REQUEUE, FINALIZER, REQUEUE_AFTER};
    use crate::req_resolver::ReconcileRequest;
    use crate::test_utils::*;
    use crate::upgrade_patches::UpgradePatches;
    use crate::watcher::Requeue;
    use cluster_client::{from_dynamic, gvk_of, ClusterClient, MockClusterClient, MockFailure, MockOp};
    use crds::condition_types::*;
    use crds::{ConditionStatus, HyperConverged, HyperConvergedStatus, SystemHealthStatus, HYPERCONVERGED_NAME};
    use k8s_openapi::api::scheduling::v1::PriorityClass;
    use kube::api::{DynamicObject, GroupVersionKind};
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const CONDITION_NAME: &str = "kubevirt-hyperconverged-operator.v1.14.0";

    struct Fixture {
        mock: MockClusterClient,
        emitter: Arc<RecordingEmitter>,
        metrics: HcoMetrics,
        reconciler: HcoReconciler,
    }

    fn named(name: &str, data: Value) -> DynamicObject {
        let mut obj = new_object(data);
        obj.metadata.name = Some(name.to_string());
        obj
    }

    /// The objects the capability probe looks for on OpenShift
    fn seed_openshift(mock: &MockClusterClient) {
        mock.insert(&kinds::cluster_version(), named("version", json!({})));
        mock.insert(&kinds::dns(), named("cluster", json!({"spec": {"baseDomain": "example.com"}})));
        for crd in ["prometheusrules.monitoring.coreos.com", "servicemonitors.monitoring.coreos.com"] {
            mock.insert(&kinds::crd(), named(crd, json!({})));
        }
    }

    async fn fixture_with(mock: MockClusterClient, config: OperatorConfig, patches: UpgradePatches) -> Fixture {
        let client: Arc<dyn ClusterClient> = Arc::new(mock.clone());
        let config = Arc::new(config);
        let ctx = create_test_context(&mock);
        let metrics = HcoMetrics::new().unwrap();
        let emitter = Arc::new(RecordingEmitter::default());
        let monitoring = monitoring::operands(
            &ctx,
            Arc::new(BearerToken::new("/nonexistent/token")),
            Arc::new(Refresher::new()),
        );
        let handler = OperandHandler::new(registry(&ctx, monitoring), emitter.clone(), metrics.clone());
        let cluster_info = Arc::new(ClusterInfo::init(Arc::clone(&client), &config).await.unwrap());
        let operator_condition = OperatorCondition::new(Arc::clone(&client), &config);
        let reconciler = HcoReconciler::new(
            client,
            config,
            cluster_info,
            patches,
            handler,
            emitter.clone(),
            metrics.clone(),
            operator_condition,
        );
        Fixture {
            mock,
            emitter,
            metrics,
            reconciler,
        }
    }

    async fn kubernetes_fixture() -> Fixture {
        fixture_with(MockClusterClient::new(), test_config(), UpgradePatches::default()).await
    }

    async fn openshift_fixture() -> Fixture {
        let mock = MockClusterClient::new();
        seed_openshift(&mock);
        fixture_with(mock, test_config(), UpgradePatches::default()).await
    }

    impl Fixture {
        fn seed_hc(&self, hc: &HyperConverged) {
            self.mock.insert(&kinds::hyperconverged(), hc_object(hc));
        }

        fn hc(&self) -> HyperConverged {
            let obj = self
                .mock
                .object(&kinds::hyperconverged(), Some(TEST_NAMESPACE), HYPERCONVERGED_NAME)
                .unwrap();
            from_dynamic(&obj).unwrap()
        }

        fn status(&self) -> HyperConvergedStatus {
            self.hc().status.unwrap()
        }

        /// Pretend the last recorded engine version was `version`
        fn record_version(&self, version: &str) {
            let mut hc = self.hc();
            hc.status.as_mut().unwrap().update_version("operator", version);
            self.seed_hc(&hc);
        }

        async fn reconcile(&self) -> Result<Requeue, ControllerError> {
            let primary = self.reconciler.resolver().primary().clone();
            self.reconciler.reconcile(&primary).await
        }

        /// Pass triggered by a watch event on a child
        async fn reconcile_child_event(&self) -> Result<Requeue, ControllerError> {
            let secondary = self.reconciler.resolver().secondary().clone();
            self.reconciler.reconcile(&secondary).await
        }

        fn child(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Option<DynamicObject> {
            self.mock.object(gvk, namespace, name)
        }

        /// Write the status a sibling operator would report
        fn report(
            &self,
            gvk: &GroupVersionKind,
            namespace: Option<&str>,
            name: &str,
            version_field: &str,
            version: &str,
            degraded: bool,
        ) {
            let mut obj = self.child(gvk, namespace, name).unwrap();
            obj.data["status"] = json!({
                "conditions": [
                    {"type": "Available", "status": "True", "message": ""},
                    {"type": "Progressing", "status": "False", "message": ""},
                    {"type": "Degraded", "status": if degraded { "True" } else { "False" }, "message": "disk pressure"},
                ],
                (version_field): version,
            });
            self.mock.insert(gvk, obj);
        }

        fn all_ready(&self, openshift: bool) {
            self.report(&kinds::kubevirt(), Some(TEST_NAMESPACE), kubevirt::NAME, "observedKubeVirtVersion", "1.5.0", false);
            self.report(&kinds::cdi(), Some(TEST_NAMESPACE), cdi::NAME, "observedVersion", "1.61.0", false);
            self.report(&kinds::network_addons(), None, cnao::NAME, "observedVersion", "0.98.0", false);
            if openshift {
                self.report(&kinds::ssp(), Some(TEST_NAMESPACE), ssp::NAME, "observedVersion", "0.23.0", false);
            }
        }
    }

    fn condition(status: &HyperConvergedStatus, type_: &str) -> (ConditionStatus, String) {
        let c = status
            .condition(type_)
            .unwrap_or_else(|| panic!("no {type_} condition"));
        (c.status, c.reason.clone())
    }

    #[tokio::test]
    async fn test_cold_install_reports_init_then_available() {
        let f = openshift_fixture().await;
        f.seed_hc(&create_test_hc());

        assert_eq!(f.reconcile().await.unwrap(), Requeue::After(REQUEUE_AFTER));
        let hc = f.hc();
        assert!(hc.has_finalizer(FINALIZER));
        let status = hc.status.unwrap();
        assert_eq!(condition(&status, PROGRESSING), (ConditionStatus::True, "Init".to_string()));
        assert_eq!(condition(&status, RECONCILE_COMPLETE).0, ConditionStatus::Unknown);
        assert_eq!(status.version("operator"), Some("1.14.0"));
        assert_eq!(f.emitter.with_reason(reasons::INIT_HCO).len(), 1);

        f.all_ready(true);
        assert_eq!(f.reconcile().await.unwrap(), Requeue::None);
        let status = f.status();
        assert_eq!(condition(&status, AVAILABLE), (ConditionStatus::True, "ReconcileCompleted".to_string()));
        assert_eq!(condition(&status, PROGRESSING).0, ConditionStatus::False);
        assert_eq!(condition(&status, DEGRADED).0, ConditionStatus::False);
        assert_eq!(condition(&status, UPGRADEABLE).0, ConditionStatus::True);
        assert_eq!(condition(&status, RECONCILE_COMPLETE).0, ConditionStatus::True);
        assert_eq!(status.system_health_status, Some(SystemHealthStatus::Healthy));
        assert!(status.related_objects.len() >= 23, "got {} related objects", status.related_objects.len());
        assert!(status.related_objects.iter().any(|r| r.kind == "PrometheusRule"));
        assert!(f.metrics.hyperconverged_exists());
        assert_eq!(f.metrics.system_health_status(), 0.0);
    }

    #[tokio::test]
    async fn test_status_lists_the_golden_images_given_to_ssp() {
        let f = openshift_fixture().await;
        let mut hc = create_test_hc();
        hc.spec.data_import_cron_templates = vec![serde_json::from_value(json!({
            "metadata": {"name": "fedora-image-cron", "namespace": "golden"},
            "spec": {"managedDataSource": "fedora"}
        }))
        .unwrap()];
        f.seed_hc(&hc);
        f.reconcile().await.unwrap();

        let status = f.status();
        let ssp = f.child(&kinds::ssp(), Some(TEST_NAMESPACE), ssp::NAME).unwrap();
        let deployed = ssp.data["spec"]["commonTemplates"]["dataImportCronTemplates"].as_array().unwrap();
        assert_eq!(status.data_import_cron_templates.len(), deployed.len());
        let fedora = status
            .data_import_cron_templates
            .iter()
            .find(|d| d.template.name() == "fedora-image-cron")
            .unwrap();
        assert!(fedora.status.common_template);
        assert!(fedora.status.modified);
        assert_eq!(fedora.template.metadata.namespace.as_deref(), Some("golden"));
    }

    #[tokio::test]
    async fn test_idle_pass_writes_nothing() {
        let f = kubernetes_fixture().await;
        f.seed_hc(&create_test_hc());
        f.reconcile().await.unwrap();
        f.all_ready(false);
        f.reconcile().await.unwrap();
        let before = f.status();
        f.mock.clear_writes();

        f.reconcile().await.unwrap();
        assert!(f.mock.writes().is_empty(), "unexpected writes {:?}", f.mock.writes());
        assert_eq!(f.status(), before);
    }

    #[tokio::test]
    async fn test_related_objects_track_child_versions() {
        let f = kubernetes_fixture().await;
        f.seed_hc(&create_test_hc());
        f.reconcile().await.unwrap();
        f.all_ready(false);
        f.reconcile().await.unwrap();

        let status = f.status();
        let kv = f.child(&kinds::kubevirt(), Some(TEST_NAMESPACE), kubevirt::NAME).unwrap();
        let entries: Vec<_> = status.related_objects.iter().filter(|r| r.kind == "KubeVirt").collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].resource_version, kv.metadata.resource_version);
    }

    #[tokio::test]
    async fn test_patch_annotation_taints_the_installation() {
        let f = kubernetes_fixture().await;
        let mut hc = create_test_hc();
        hc.metadata.annotations = Some(BTreeMap::from([(
            annotations::KUBEVIRT.to_string(),
            r#"[{"op":"add","path":"/spec/configuration/migrations","value":{"allowPostCopy":true}}]"#.to_string(),
        )]));
        f.seed_hc(&hc);

        f.reconcile().await.unwrap();
        let kv = f.child(&kinds::kubevirt(), Some(TEST_NAMESPACE), kubevirt::NAME).unwrap();
        assert_eq!(kv.data["spec"]["configuration"]["migrations"]["allowPostCopy"], true);
        let status = f.status();
        assert_eq!(
            condition(&status, TAINTED_CONFIGURATION),
            (ConditionStatus::True, "UnsupportedFeatureAnnotation".to_string())
        );
        assert_eq!(f.metrics.unsafe_modifications(annotations::KUBEVIRT), 1);
        assert_eq!(f.metrics.unsafe_modifications(annotations::CDI), 0);
    }

    #[tokio::test]
    async fn test_removing_the_annotation_clears_the_taint() {
        let f = kubernetes_fixture().await;
        let mut hc = create_test_hc();
        hc.metadata.annotations = Some(BTreeMap::from([(
            annotations::CDI.to_string(),
            r#"[{"op":"add","path":"/spec/config/featureGates","value":["HonorWaitForFirstConsumer"]}]"#.to_string(),
        )]));
        f.seed_hc(&hc);
        f.reconcile().await.unwrap();
        assert!(f.status().condition(TAINTED_CONFIGURATION).is_some());

        let mut hc = f.hc();
        hc.metadata.annotations = None;
        f.seed_hc(&hc);
        f.reconcile().await.unwrap();
        assert!(f.status().condition(TAINTED_CONFIGURATION).is_none());
        assert_eq!(f.metrics.unsafe_modifications(annotations::CDI), 0);
    }

    #[tokio::test]
    async fn test_out_of_band_drift_is_reverted_and_counted() {
        let f = kubernetes_fixture().await;
        let mut hc = create_test_hc();
        hc.spec.infra = serde_json::from_value(json!({"nodePlacement": {"nodeSelector": {"key1": "value1"}}})).unwrap();
        f.seed_hc(&hc);
        f.reconcile().await.unwrap();
        f.all_ready(false);
        f.reconcile().await.unwrap();

        let gvk = kinds::kubevirt();
        let drift = |f: &Fixture| {
            let mut kv = f.child(&gvk, Some(TEST_NAMESPACE), kubevirt::NAME).unwrap();
            kv.data["spec"]["infra"]["nodePlacement"]["nodeSelector"]["key1"] = json!("BADvalue1");
            f.mock.insert(&gvk, kv);
        };

        drift(&f);
        f.reconcile_child_event().await.unwrap();
        let kv = f.child(&gvk, Some(TEST_NAMESPACE), kubevirt::NAME).unwrap();
        assert_eq!(kv.data["spec"]["infra"]["nodePlacement"]["nodeSelector"]["key1"], "value1");
        assert_eq!(f.metrics.overwritten_modifications("KubeVirt", kubevirt::NAME), 1);
        assert_eq!(f.emitter.with_reason(reasons::OVERWRITTEN).len(), 1);

        // the same drift while upgrading is not counted
        f.record_version("1.13.0");
        drift(&f);
        f.reconcile_child_event().await.unwrap();
        let kv = f.child(&gvk, Some(TEST_NAMESPACE), kubevirt::NAME).unwrap();
        assert_eq!(kv.data["spec"]["infra"]["nodePlacement"]["nodeSelector"]["key1"], "value1");
        assert_eq!(f.metrics.overwritten_modifications("KubeVirt", kubevirt::NAME), 1);
    }

    #[tokio::test]
    async fn test_upgrade_completes_once_components_report_their_versions() {
        let f = kubernetes_fixture().await;
        f.seed_hc(&create_test_hc());
        f.reconcile().await.unwrap();
        f.record_version("1.13.0");
        f.all_ready(false);
        f.report(&kinds::kubevirt(), Some(TEST_NAMESPACE), kubevirt::NAME, "observedKubeVirtVersion", "1.4.0", false);

        assert_eq!(f.reconcile().await.unwrap(), Requeue::After(REQUEUE_AFTER));
        let status = f.status();
        assert_eq!(condition(&status, UPGRADEABLE), (ConditionStatus::False, "HCOUpgrading".to_string()));
        assert_eq!(condition(&status, PROGRESSING).0, ConditionStatus::True);
        assert_eq!(status.version("operator"), Some("1.13.0"));
        assert_eq!(f.emitter.with_reason(reasons::UPGRADE_HCO).len(), 1);

        // still behind: no second announcement
        f.reconcile().await.unwrap();
        assert_eq!(f.emitter.with_reason(reasons::UPGRADE_HCO).len(), 1);

        f.report(&kinds::kubevirt(), Some(TEST_NAMESPACE), kubevirt::NAME, "observedKubeVirtVersion", "1.5.0", false);
        assert_eq!(f.reconcile().await.unwrap(), Requeue::None);
        let status = f.status();
        assert_eq!(status.version("operator"), Some("1.14.0"));
        assert_eq!(condition(&status, UPGRADEABLE), (ConditionStatus::True, "ReconcileCompleted".to_string()));
        assert_eq!(condition(&status, PROGRESSING).0, ConditionStatus::False);
        let upgrade_events = f.emitter.with_reason(reasons::UPGRADE_HCO);
        assert_eq!(upgrade_events.len(), 2);
        assert_eq!(upgrade_events[1].message, "Successfully upgraded to version 1.14.0");
    }

    fn bandwidth_patches() -> UpgradePatches {
        UpgradePatches::parse(
            &json!({
                "hcoCRPatchList": [{
                    "semverRange": "<1.5.0",
                    "jsonPatch": [
                        {"op": "test", "path": "/spec/liveMigrationConfig/bandwidthPerMigration", "value": "64Mi"},
                        {"op": "remove", "path": "/spec/liveMigrationConfig/bandwidthPerMigration"}
                    ],
                    "jsonPatchApplyOptions": {"allowMissingPathOnRemove": true}
                }],
                "objectsToBeRemoved": [{
                    "semverRange": ">=1.2.0 <1.4.0",
                    "groupVersionKind": {"group": "monitoring.coreos.com", "version": "v1", "kind": "PrometheusRule"},
                    "objectKey": {"name": "old-rule", "namespace": TEST_NAMESPACE}
                }]
            })
            .to_string(),
            TEST_NAMESPACE,
        )
        .unwrap()
    }

    async fn upgrade_from(version: &str) -> Fixture {
        let f = fixture_with(MockClusterClient::new(), test_config(), bandwidth_patches()).await;
        let mut hc = create_test_hc();
        hc.spec.live_migration_config.bandwidth_per_migration = Some("64Mi".to_string());
        f.seed_hc(&hc);
        f.reconcile().await.unwrap();
        f.record_version(version);
        f
    }

    #[tokio::test]
    async fn test_legacy_bandwidth_is_stripped_when_upgrading_from_old_version() {
        let f = upgrade_from("1.4.99").await;
        f.reconcile().await.unwrap();
        assert_eq!(f.hc().spec.live_migration_config.bandwidth_per_migration, None);
        let kv = f.child(&kinds::kubevirt(), Some(TEST_NAMESPACE), kubevirt::NAME).unwrap();
        assert!(kv.data["spec"]["configuration"]["migrations"].get("bandwidthPerMigration").is_none());
    }

    #[tokio::test]
    async fn test_bandwidth_is_kept_when_upgrading_from_recent_version() {
        let f = upgrade_from("1.5.1").await;
        f.reconcile().await.unwrap();
        assert_eq!(f.hc().spec.live_migration_config.bandwidth_per_migration.as_deref(), Some("64Mi"));
    }

    #[tokio::test]
    async fn test_leftover_objects_are_removed_on_upgrade() {
        let f = upgrade_from("1.3.0").await;
        let gvk = kinds::prometheus_rule();
        let mut rule = named("old-rule", json!({"spec": {}}));
        rule.metadata.namespace = Some(TEST_NAMESPACE.to_string());
        f.mock.insert(&gvk, rule);

        f.reconcile().await.unwrap();
        assert!(f.child(&gvk, Some(TEST_NAMESPACE), "old-rule").is_none());
        assert!(f
            .emitter
            .with_reason(reasons::KILLING)
            .iter()
            .any(|e| e.message == "Removed PrometheusRule old-rule"));
    }

    #[tokio::test]
    async fn test_unserved_leftover_kind_does_not_fail_the_pass() {
        let f = upgrade_from("1.3.0").await;
        f.mock.remove_api("monitoring.coreos.com", "PrometheusRule");
        f.all_ready(false);
        assert!(f.reconcile().await.is_ok());
    }

    #[tokio::test]
    async fn test_degraded_component_does_not_block_operator_upgrades() {
        let mock = MockClusterClient::new();
        let mut oc = named(CONDITION_NAME, json!({"spec": {}}));
        oc.metadata.namespace = Some(TEST_NAMESPACE.to_string());
        mock.insert(&kinds::operator_condition(), oc);
        let mut config = test_config();
        config.run_mode = RunMode::Cluster;
        config.operator_condition_name = Some(CONDITION_NAME.to_string());
        let f = fixture_with(mock, config, UpgradePatches::default()).await;
        f.seed_hc(&create_test_hc());
        f.reconcile().await.unwrap();

        f.all_ready(false);
        f.report(&kinds::cdi(), Some(TEST_NAMESPACE), cdi::NAME, "observedVersion", "1.61.0", true);
        f.reconcile().await.unwrap();

        let status = f.status();
        assert_eq!(condition(&status, AVAILABLE), (ConditionStatus::False, "HCODegraded".to_string()));
        assert_eq!(condition(&status, DEGRADED), (ConditionStatus::True, "CDIDegraded".to_string()));
        assert_eq!(condition(&status, UPGRADEABLE), (ConditionStatus::False, "HCODegraded".to_string()));
        assert_eq!(status.system_health_status, Some(SystemHealthStatus::Error));

        let oc = f
            .mock
            .object(&kinds::operator_condition(), Some(TEST_NAMESPACE), CONDITION_NAME)
            .unwrap();
        assert_eq!(oc.data["spec"]["conditions"][0]["type"], "Upgradeable");
        assert_eq!(oc.data["spec"]["conditions"][0]["status"], "True");
    }

    #[tokio::test]
    async fn test_deletion_removes_operands_and_finalizer() {
        let f = kubernetes_fixture().await;
        f.seed_hc(&create_test_hc());
        f.reconcile().await.unwrap();
        f.emitter.clear();

        f.mock
            .delete(&kinds::hyperconverged(), Some(TEST_NAMESPACE), HYPERCONVERGED_NAME)
            .await
            .unwrap();
        assert!(f.hc().is_deleting());

        assert_eq!(f.reconcile().await.unwrap(), Requeue::None);
        assert!(f.child(&kinds::kubevirt(), Some(TEST_NAMESPACE), kubevirt::NAME).is_none());
        assert!(f.child(&kinds::cdi(), Some(TEST_NAMESPACE), cdi::NAME).is_none());
        assert!(f.child(&kinds::network_addons(), None, cnao::NAME).is_none());
        // Workloads may still be scheduled with it
        assert!(f.child(&gvk_of::<PriorityClass>(), None, priority_class::NAME).is_some());
        assert!(f
            .mock
            .object(&kinds::hyperconverged(), Some(TEST_NAMESPACE), HYPERCONVERGED_NAME)
            .is_none());
        let removed: Vec<String> = f.emitter.with_reason(reasons::KILLING).into_iter().map(|e| e.message).collect();
        assert!(removed.contains(&format!("Removed KubeVirt {}", kubevirt::NAME)));
        assert!(removed.contains(&format!("Removed CDI {}", cdi::NAME)));

        assert_eq!(f.reconcile().await.unwrap(), Requeue::None);
        assert!(!f.metrics.hyperconverged_exists());
    }

    #[tokio::test]
    async fn test_failed_teardown_keeps_the_finalizer() {
        let f = kubernetes_fixture().await;
        f.seed_hc(&create_test_hc());
        f.reconcile().await.unwrap();
        f.mock
            .delete(&kinds::hyperconverged(), Some(TEST_NAMESPACE), HYPERCONVERGED_NAME)
            .await
            .unwrap();
        f.mock
            .fail_on(MockOp::Delete, "CDI", None, MockFailure::Api("webhook denied".to_string()));

        let err = f.reconcile().await.unwrap_err();
        assert!(matches!(err, ControllerError::Uninstall { .. }));
        assert!(f.child(&kinds::kubevirt(), Some(TEST_NAMESPACE), kubevirt::NAME).is_none());
        assert!(f.hc().has_finalizer(FINALIZER));
        assert_eq!(f.emitter.with_reason("ErrCDIUninstall").len(), 1);
    }

    #[tokio::test]
    async fn test_non_canonical_name_is_rejected() {
        let f = kubernetes_fixture().await;
        let mut hc = create_test_hc();
        hc.metadata.name = Some("other-hc".to_string());
        f.seed_hc(&hc);

        let request = ReconcileRequest::new(TEST_NAMESPACE, "other-hc");
        assert_eq!(f.reconciler.reconcile(&request).await.unwrap(), Requeue::None);

        let stored: HyperConverged = from_dynamic(
            &f.mock
                .object(&kinds::hyperconverged(), Some(TEST_NAMESPACE), "other-hc")
                .unwrap(),
        )
        .unwrap();
        let status = stored.status.unwrap();
        let c = status.condition(RECONCILE_COMPLETE).unwrap();
        assert_eq!(c.status, ConditionStatus::False);
        assert_eq!(c.reason, "InvalidRequest");
        assert_eq!(
            c.message,
            "Request does not match expected name (kubevirt-hyperconverged) and namespace (kubevirt-hyperconverged)"
        );
        assert_eq!(f.mock.len(), 1, "no operand is created");
    }

    #[tokio::test]
    async fn test_missing_hyperconverged_clears_metrics() {
        let f = kubernetes_fixture().await;
        f.metrics.set_hyperconverged_exists(true);
        assert_eq!(f.reconcile().await.unwrap(), Requeue::None);
        assert!(!f.metrics.hyperconverged_exists());
        assert!(f.mock.is_empty());
    }

    #[tokio::test]
    async fn test_status_conflict_is_retried_quickly() {
        let f = kubernetes_fixture().await;
        f.seed_hc(&create_test_hc());
        f.reconcile().await.unwrap();
        f.all_ready(false);
        f.mock
            .fail_once(MockOp::UpdateStatus, "HyperConverged", None, MockFailure::Conflict);

        let err = f.reconcile().await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(f.reconciler.error_policy(&err), CONFLICT_REQUEUE);

        f.reconcile().await.unwrap();
        assert_eq!(condition(&f.status(), AVAILABLE).0, ConditionStatus::True);
    }

    #[tokio::test]
    async fn test_operand_failure_is_recorded_and_backs_off() {
        let f = kubernetes_fixture().await;
        f.seed_hc(&create_test_hc());
        f.reconcile().await.unwrap();
        f.mock
            .fail_on(MockOp::Get, "CDI", None, MockFailure::Api("etcd timeout".to_string()));

        let err = f.reconcile().await.unwrap_err();
        let c = f.status().condition(RECONCILE_COMPLETE).cloned().unwrap();
        assert_eq!(c.status, ConditionStatus::False);
        assert_eq!(c.reason, "ReconcileFailed");
        assert!(c.message.contains("etcd timeout"));
        assert_eq!(f.emitter.with_reason(reasons::RECONCILE_HCO).len(), 1);

        let delays: Vec<u64> = (0..3).map(|_| f.reconciler.error_policy(&err).as_secs()).collect();
        assert_eq!(delays, [5, 5, 10]);
    }
}
