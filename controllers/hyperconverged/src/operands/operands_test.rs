//! Unit tests for the operand template and the handler

#[cfg(test)]
mod tests {
    use crate::error::{ControllerError, UninstallKind};
    use crate::events::{reasons, RecordingEmitter};
    use crate::kinds;
    use crate::metrics::HcoMetrics;
    use crate::operands::conditional::ConditionalOperand;
    use crate::operands::generic::GenericOperand;
    use crate::operands::handler::{registry, OperandHandler};
    use crate::operands::labels::APP_LABEL;
    use crate::operands::{aaq, annotations, cli_download, console_plugin, kubevirt, passt, priority_class, wasp_agent, Operand};
    use crate::request::HcoRequest;
    use crate::test_utils::*;
    use cluster_client::{gvk_of, MockClusterClient, MockFailure, MockOp};
    use crds::condition_types::RECONCILE_COMPLETE;
    use crds::{ConditionStatus, HigherWorkloadDensityConfiguration};
    use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
    use k8s_openapi::api::core::v1::Service;
    use k8s_openapi::api::networking::v1::NetworkPolicy;
    use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
    use k8s_openapi::api::scheduling::v1::PriorityClass;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn kubevirt_operand(client: &MockClusterClient) -> GenericOperand<kubevirt::KubeVirtHooks> {
        GenericOperand::new(kubevirt::KubeVirtHooks, create_test_context(client))
    }

    fn handler(client: &MockClusterClient, emitter: Arc<RecordingEmitter>) -> (OperandHandler, HcoMetrics) {
        let metrics = HcoMetrics::new().unwrap();
        let operands = registry(&create_test_context(client), Vec::new());
        (OperandHandler::new(operands, emitter, metrics.clone()), metrics)
    }

    #[test]
    fn test_desired_object_is_built_once_per_pass() {
        let client = MockClusterClient::new();
        let operand = kubevirt_operand(&client);
        let req = create_test_request(create_test_hc(), kubernetes_caps());

        let first = operand.desired(&req).unwrap();
        let second = operand.desired(&req).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        operand.reset();
        let third = operand.desired(&req).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(*first, *third);
    }

    #[test]
    fn test_desired_object_carries_identity_labels_and_owner() {
        let client = MockClusterClient::new();
        let operand = kubevirt_operand(&client);
        let req = create_test_request(create_test_hc(), kubernetes_caps());

        let desired = operand.desired(&req).unwrap();
        assert_eq!(desired.metadata.name.as_deref(), Some(kubevirt::NAME));
        assert_eq!(desired.metadata.namespace.as_deref(), Some(TEST_NAMESPACE));
        let labels = desired.metadata.labels.as_ref().unwrap();
        assert_eq!(labels[APP_LABEL], "kubevirt-hyperconverged");
        assert_eq!(labels["app.kubernetes.io/component"], "compute");
        assert_eq!(labels["app.kubernetes.io/version"], "1.14.0");

        let owners = desired.metadata.owner_references.as_ref().unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "HyperConverged");
        assert_eq!(owners[0].uid, TEST_HC_UID);
        assert_eq!(owners[0].controller, Some(true));

        let config = &desired.data["spec"]["configuration"];
        assert_eq!(config["network"]["defaultNetworkInterface"], "masquerade");
        assert_eq!(
            config["seccompConfiguration"]["virtualMachineInstanceProfile"]["customProfile"]["localhostProfile"],
            "kubevirt/kubevirt.json"
        );
        assert_eq!(desired.data["spec"]["uninstallStrategy"], "BlockUninstallIfWorkloadsExist");
    }

    #[tokio::test]
    async fn test_first_ensure_creates_and_records_related_object() {
        let client = MockClusterClient::new();
        let operand = kubevirt_operand(&client);
        let mut req = create_test_request(create_test_hc(), kubernetes_caps());

        let res = operand.ensure(&mut req).await.unwrap();
        assert!(res.created);
        assert!(!res.updated);
        assert!(client.object(&kinds::kubevirt(), Some(TEST_NAMESPACE), kubevirt::NAME).is_some());
        assert_eq!(req.related_objects().len(), 1);
        assert_eq!(req.related_objects()[0].kind, "KubeVirt");

        // A fresh CR has no status yet
        let available = req.conditions.get("Available").unwrap();
        assert_eq!(available.status, ConditionStatus::False);
        assert_eq!(available.reason, "KubeVirtConditions");
    }

    #[tokio::test]
    async fn test_idle_pass_writes_nothing() {
        let client = MockClusterClient::new();
        let operand = kubevirt_operand(&client);
        let mut req = create_test_request(create_test_hc(), kubernetes_caps());
        operand.ensure(&mut req).await.unwrap();
        client.clear_writes();

        operand.reset();
        let mut req = create_test_request(create_test_hc(), kubernetes_caps());
        let res = operand.ensure(&mut req).await.unwrap();
        assert!(!res.created && !res.updated);
        assert!(client.writes().is_empty());
    }

    #[tokio::test]
    async fn test_external_change_is_reverted_and_flagged() {
        let client = MockClusterClient::new();
        let operand = kubevirt_operand(&client);
        let mut req = create_test_request(create_test_hc(), kubernetes_caps());
        operand.ensure(&mut req).await.unwrap();

        let gvk = kinds::kubevirt();
        let mut found = client.object(&gvk, Some(TEST_NAMESPACE), kubevirt::NAME).unwrap();
        found.data["spec"]["infra"] = json!({"nodePlacement": {"nodeSelector": {"key1": "BADVALUE1"}}});
        found
            .metadata
            .labels
            .as_mut()
            .unwrap()
            .insert("user-label".to_string(), "keep-me".to_string());
        found.metadata.labels.as_mut().unwrap().remove(APP_LABEL);
        client.insert(&gvk, found);

        operand.reset();
        let mut req = HcoRequest::new(create_test_hc(), kubernetes_caps(), false);
        let res = operand.ensure(&mut req).await.unwrap();
        assert!(res.updated);
        assert!(res.overwritten);

        let healed = client.object(&gvk, Some(TEST_NAMESPACE), kubevirt::NAME).unwrap();
        assert!(healed.data["spec"].get("infra").is_none());
        let labels = healed.metadata.labels.unwrap();
        assert_eq!(labels["user-label"], "keep-me");
        assert_eq!(labels[APP_LABEL], "kubevirt-hyperconverged");
    }

    #[tokio::test]
    async fn test_service_keeps_cluster_ip() {
        let client = MockClusterClient::new();
        let operand = GenericOperand::new(cli_download::CliDownloadService, create_test_context(&client));
        let mut req = create_test_request(create_test_hc(), openshift_caps());
        operand.ensure(&mut req).await.unwrap();

        let gvk = gvk_of::<Service>();
        let mut found = client
            .object(&gvk, Some(TEST_NAMESPACE), cli_download::SERVICE_NAME)
            .unwrap();
        found.data["spec"]["clusterIP"] = json!("172.30.0.10");
        found.data["spec"]["clusterIPs"] = json!(["172.30.0.10"]);
        client.insert(&gvk, found);
        client.clear_writes();

        operand.reset();
        let res = operand.ensure(&mut req).await.unwrap();
        assert!(!res.updated, "cluster assigned addresses are not drift");
        assert!(client.writes().is_empty());
    }

    #[tokio::test]
    async fn test_priority_class_value_change_recreates_it() {
        let client = MockClusterClient::new();
        let gvk = gvk_of::<PriorityClass>();
        let operand = GenericOperand::new(priority_class::KubeVirtPriorityClass, create_test_context(&client));
        let mut req = create_test_request(create_test_hc(), kubernetes_caps());
        operand.ensure(&mut req).await.unwrap();

        let mut found = client.object(&gvk, None, priority_class::NAME).unwrap();
        found.data["value"] = json!(5);
        client.insert(&gvk, found);
        client.clear_writes();

        operand.reset();
        let res = operand.ensure(&mut req).await.unwrap();
        assert!(res.updated);
        let ops: Vec<MockOp> = client.writes().into_iter().map(|(op, _, _)| op).collect();
        assert_eq!(ops, [MockOp::Delete, MockOp::Create]);
        let recreated = client.object(&gvk, None, priority_class::NAME).unwrap();
        assert_eq!(recreated.data["value"], 1_000_000_000);
    }

    #[tokio::test]
    async fn test_closed_gate_removes_the_child() {
        let client = MockClusterClient::new();
        let ctx = create_test_context(&client);
        let operand = ConditionalOperand::new(Box::new(GenericOperand::new(aaq::AaqHooks, ctx)), aaq::enabled);

        let mut hc = create_test_hc();
        hc.spec.enable_application_aware_quota = Some(true);
        let mut req = create_test_request(hc.clone(), kubernetes_caps());
        assert!(operand.ensure(&mut req).await.unwrap().created);

        operand.reset();
        hc.spec.enable_application_aware_quota = Some(false);
        let mut req = create_test_request(hc, kubernetes_caps());
        let res = operand.ensure(&mut req).await.unwrap();
        assert!(res.deleted);
        assert!(client.object(&kinds::aaq(), Some(TEST_NAMESPACE), aaq::NAME).is_none());
    }

    #[tokio::test]
    async fn test_objects_of_other_owners_are_not_deleted() {
        let client = MockClusterClient::new();
        let operand = kubevirt_operand(&client);
        let mut foreign = crate::operands::generic::new_object(json!({"spec": {}}));
        foreign.metadata.name = Some(kubevirt::NAME.to_string());
        foreign.metadata.namespace = Some(TEST_NAMESPACE.to_string());
        foreign.metadata.labels = Some(BTreeMap::from([(APP_LABEL.to_string(), "someone-else".to_string())]));
        client.insert(&kinds::kubevirt(), foreign);

        let req = create_test_request(create_test_hc(), kubernetes_caps());
        assert!(!operand.ensure_deleted(&req).await.unwrap());
        assert!(client.object(&kinds::kubevirt(), Some(TEST_NAMESPACE), kubevirt::NAME).is_some());
    }

    #[tokio::test]
    async fn test_unserved_kind_counts_as_absent_on_delete() {
        let client = MockClusterClient::new();
        client.remove_api("aaq.kubevirt.io", "AAQ");
        let operand = GenericOperand::new(aaq::AaqHooks, create_test_context(&client));
        let req = create_test_request(create_test_hc(), kubernetes_caps());
        assert!(!operand.ensure_deleted(&req).await.unwrap());
    }

    #[tokio::test]
    async fn test_handler_emits_created_events_on_kubernetes() {
        let client = MockClusterClient::new();
        let emitter = Arc::new(RecordingEmitter::default());
        let (handler, _) = handler(&client, emitter.clone());
        let mut req = create_test_request(create_test_hc(), kubernetes_caps());

        handler.ensure(&mut req).await.unwrap();

        let created: Vec<String> = emitter
            .with_reason(reasons::CREATED)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert!(created.contains(&"Created KubeVirt kubevirt-kubevirt-hyperconverged".to_string()));
        assert!(created.contains(&"Created CDI cdi-kubevirt-hyperconverged".to_string()));
        assert!(created.contains(&"Created NetworkAddonsConfig cluster".to_string()));
        assert!(created.contains(&"Created ConfigMap virtio-win".to_string()));
        assert!(!created.iter().any(|m| m.contains("SSP")), "SSP is OpenShift only");
        assert!(client.object(&kinds::ssp(), Some(TEST_NAMESPACE), "ssp-kubevirt-hyperconverged").is_none());
    }

    #[tokio::test]
    async fn test_handler_counts_overwritten_children() {
        let client = MockClusterClient::new();
        let emitter = Arc::new(RecordingEmitter::default());
        let (handler, metrics) = handler(&client, emitter.clone());
        let mut req = create_test_request(create_test_hc(), kubernetes_caps());
        handler.ensure(&mut req).await.unwrap();

        let gvk = kinds::cdi();
        let mut found = client.object(&gvk, Some(TEST_NAMESPACE), "cdi-kubevirt-hyperconverged").unwrap();
        found.data["spec"]["uninstallStrategy"] = json!("RemoveWorkloads");
        client.insert(&gvk, found);
        emitter.clear();

        handler.reset();
        let mut req = HcoRequest::new(create_test_hc(), kubernetes_caps(), false);
        handler.ensure(&mut req).await.unwrap();

        let overwritten = emitter.with_reason(reasons::OVERWRITTEN);
        assert_eq!(overwritten.len(), 1);
        assert!(overwritten[0].warning);
        assert_eq!(overwritten[0].message, "Overwritten CDI cdi-kubevirt-hyperconverged");
        assert_eq!(metrics.overwritten_modifications("CDI", "cdi-kubevirt-hyperconverged"), 1);
    }

    #[tokio::test]
    async fn test_handler_reports_build_errors() {
        let client = MockClusterClient::new();
        let emitter = Arc::new(RecordingEmitter::default());
        let (handler, _) = handler(&client, emitter.clone());
        let mut hc = create_test_hc();
        hc.metadata.annotations = Some(BTreeMap::from([(annotations::CDI.to_string(), "[{".to_string())]));
        let mut req = create_test_request(hc, kubernetes_caps());

        let err = handler.ensure(&mut req).await.unwrap_err();
        assert!(matches!(err, ControllerError::OperandBuild { ref kind, .. } if kind == "CDI"));

        let failed = req.conditions.get(RECONCILE_COMPLETE).unwrap();
        assert_eq!(failed.status, ConditionStatus::False);
        assert_eq!(failed.reason, "ReconcileFailed");
        assert!(failed.message.starts_with("Error while reconciling: "));
        assert_eq!(emitter.with_reason(reasons::RECONCILE_HCO).len(), 1);
        assert!(client.object(&kinds::network_addons(), None, "cluster").is_none(), "later operands are skipped");
    }

    #[tokio::test]
    async fn test_handler_passes_conflicts_through_silently() {
        let client = MockClusterClient::new();
        let emitter = Arc::new(RecordingEmitter::default());
        let (handler, _) = handler(&client, emitter.clone());
        client.fail_once(MockOp::Create, "CDI", None, MockFailure::Conflict);
        let mut req = create_test_request(create_test_hc(), kubernetes_caps());

        let err = handler.ensure(&mut req).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(!req.conditions.has(RECONCILE_COMPLETE));
        assert!(emitter.with_reason(reasons::RECONCILE_HCO).is_empty());
    }

    #[tokio::test]
    async fn test_teardown_attempts_every_operand_and_joins_errors() {
        let client = MockClusterClient::new();
        let emitter = Arc::new(RecordingEmitter::default());
        let (handler, _) = handler(&client, emitter.clone());
        let mut req = create_test_request(create_test_hc(), kubernetes_caps());
        handler.ensure(&mut req).await.unwrap();
        emitter.clear();

        client.fail_on(MockOp::Delete, "KubeVirt", None, MockFailure::Api("webhook denied".to_string()));
        let err = handler.ensure_deleted(&req).await.unwrap_err();
        match err {
            ControllerError::Uninstall { kind, message } => {
                assert_eq!(kind, UninstallKind::KubeVirt);
                assert!(message.contains("webhook denied"));
            }
            other => panic!("unexpected error {other}"),
        }

        assert!(client.object(&kinds::cdi(), Some(TEST_NAMESPACE), "cdi-kubevirt-hyperconverged").is_none());
        assert!(
            client.object(&gvk_of::<PriorityClass>(), None, priority_class::NAME).is_some(),
            "the priority class outlives the teardown"
        );
        let failures = emitter.with_reason("ErrKubeVirtUninstall");
        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.starts_with("The uninstall request failed on virt component: "));
        assert!(!emitter.with_reason(reasons::KILLING).is_empty());
    }

    fn overcommitted_hc() -> crds::HyperConverged {
        let mut hc = create_test_hc();
        hc.spec.higher_workload_density = Some(HigherWorkloadDensityConfiguration {
            memory_overcommit_percentage: 150,
        });
        hc
    }

    #[tokio::test]
    async fn test_wasp_agent_follows_memory_overcommit() {
        let client = MockClusterClient::new();
        let emitter = Arc::new(RecordingEmitter::default());
        let (handler, _) = handler(&client, emitter.clone());
        let scc = kinds::security_context_constraints();

        let mut req = create_test_request(overcommitted_hc(), openshift_caps());
        handler.ensure(&mut req).await.unwrap();
        let ds = client
            .object(&gvk_of::<DaemonSet>(), Some(TEST_NAMESPACE), wasp_agent::DAEMON_SET_NAME)
            .unwrap();
        let pod = &ds.data["spec"]["template"];
        assert_eq!(pod["spec"]["serviceAccountName"], wasp_agent::SERVICE_ACCOUNT_NAME);
        assert_eq!(pod["metadata"]["labels"][wasp_agent::ALLOW_CLUSTER_SERVICES_LABEL], "true");
        assert_eq!(pod["spec"]["containers"][0]["image"], "quay.io/openshift-virtualization/wasp-agent:v1.14.0");
        let binding = client
            .object(&gvk_of::<ClusterRoleBinding>(), None, wasp_agent::CLUSTER_ROLE_NAME)
            .unwrap();
        assert_eq!(binding.data["subjects"][0]["namespace"], TEST_NAMESPACE);
        let wasp_scc = client.object(&scc, None, wasp_agent::SCC_NAME).unwrap();
        assert_eq!(wasp_scc.data["users"][0], "system:serviceaccount:kubevirt-hyperconverged:wasp");

        handler.reset();
        let mut req = create_test_request(create_test_hc(), openshift_caps());
        handler.ensure(&mut req).await.unwrap();
        assert!(client
            .object(&gvk_of::<DaemonSet>(), Some(TEST_NAMESPACE), wasp_agent::DAEMON_SET_NAME)
            .is_none());
        assert!(client.object(&scc, None, wasp_agent::SCC_NAME).is_none());
        assert!(client
            .object(&gvk_of::<ClusterRoleBinding>(), None, wasp_agent::CLUSTER_ROLE_NAME)
            .is_none());
    }

    #[tokio::test]
    async fn test_passt_scc_is_openshift_only() {
        let mut hc = create_test_hc();
        hc.metadata.annotations = Some(BTreeMap::from([(passt::DEPLOY_ANNOTATION.to_string(), "true".to_string())]));
        let scc = kinds::security_context_constraints();

        let client = MockClusterClient::new();
        let (handler, _) = handler(&client, Arc::new(RecordingEmitter::default()));
        handler
            .ensure(&mut create_test_request(hc.clone(), kubernetes_caps()))
            .await
            .unwrap();
        assert!(client.object(&scc, None, passt::CNI_OBJECT_NAME).is_none());
        assert!(client
            .object(&gvk_of::<DaemonSet>(), Some(TEST_NAMESPACE), passt::CNI_OBJECT_NAME)
            .is_some());

        let client = MockClusterClient::new();
        let (handler, _) = self::handler(&client, Arc::new(RecordingEmitter::default()));
        handler.ensure(&mut create_test_request(hc, openshift_caps())).await.unwrap();
        let found = client.object(&scc, None, passt::CNI_OBJECT_NAME).unwrap();
        assert_eq!(found.data["allowPrivilegedContainer"], true);
        assert_eq!(found.data["allowHostNetwork"], false);
        assert_eq!(found.data["volumes"], json!(["*"]));
    }

    #[tokio::test]
    async fn test_scc_drift_is_reverted() {
        let client = MockClusterClient::new();
        let operand = GenericOperand::new(wasp_agent::WaspScc, create_test_context(&client));
        let mut req = create_test_request(overcommitted_hc(), openshift_caps());
        operand.ensure(&mut req).await.unwrap();

        let scc = kinds::security_context_constraints();
        let mut found = client.object(&scc, None, wasp_agent::SCC_NAME).unwrap();
        found.data["allowHostPID"] = json!(false);
        found.data["priority"] = json!(10);
        client.insert(&scc, found);

        req.hco_triggered = false;
        let res = operand.ensure(&mut req).await.unwrap();
        assert!(res.updated);
        assert!(res.overwritten);
        let healed = client.object(&scc, None, wasp_agent::SCC_NAME).unwrap();
        assert_eq!(healed.data["allowHostPID"], true);
        assert_eq!(healed.data["priority"], 10, "fields the engine does not set are kept");
    }

    #[tokio::test]
    async fn test_console_network_policies_select_the_plugin_pods() {
        let client = MockClusterClient::new();
        let (handler, _) = handler(&client, Arc::new(RecordingEmitter::default()));
        let mut req = create_test_request(create_test_hc(), openshift_caps());
        handler.ensure(&mut req).await.unwrap();

        for (policy, deployment) in [
            ("kubevirt-console-plugin-np", console_plugin::PLUGIN_DEPLOYMENT),
            ("kubevirt-apiserver-proxy-np", console_plugin::PROXY_DEPLOYMENT),
        ] {
            let np = client
                .object(&gvk_of::<NetworkPolicy>(), Some(TEST_NAMESPACE), policy)
                .unwrap();
            let pods = client
                .object(&gvk_of::<Deployment>(), Some(TEST_NAMESPACE), deployment)
                .unwrap();
            let pod_labels = pods.data["spec"]["template"]["metadata"]["labels"].as_object().unwrap();
            let selector = np.data["spec"]["podSelector"]["matchLabels"].as_object().unwrap();
            assert!(selector.iter().all(|(k, v)| pod_labels.get(k) == Some(v)), "{policy} selects no pod");
        }

        let proxy = client
            .object(&gvk_of::<NetworkPolicy>(), Some(TEST_NAMESPACE), "kubevirt-apiserver-proxy-np")
            .unwrap();
        assert_eq!(proxy.data["spec"]["policyTypes"], json!(["Egress", "Ingress"]));
        assert_eq!(proxy.data["spec"]["egress"][0]["ports"][0]["port"], 5353);
        assert_eq!(proxy.data["spec"]["egress"][1]["ports"][0]["port"], 6443);
    }
}
