//! Main controller implementation.
//!
//! Builds the process-wide singletons once (own resources, cluster info,
//! upgrade patches, Perses store), then starts the watch loops and the
//! HTTP endpoints as background tasks.

use crate::admission_policy::{AdmissionPolicyReconciler, BINDING_NAME, POLICY_NAME};
use crate::cluster_info::ClusterInfo;
use crate::config::{OperatorConfig, RunMode};
use crate::conversion_webhook::ConversionWebhookReconciler;
use crate::error::ControllerError;
use crate::events::KubeEventEmitter;
use crate::kinds;
use crate::metrics::HcoMetrics;
use crate::monitoring::perses::{PersesReconciler, PersesStore};
use crate::monitoring::{self, refresher::Refresher, token::BearerToken};
use crate::nodes::NodesReconciler;
use crate::operands::handler::{registry, OperandHandler};
use crate::operands::labels::{APP_LABEL_MANAGED_BY, OPERATOR_NAME};
use crate::operands::OperandContext;
use crate::operator_condition::OperatorCondition;
use crate::own_resources::OwnResources;
use crate::reconciler::HcoReconciler;
use crate::server::{self, Readiness};
use crate::upgrade_patches::UpgradePatches;
use crate::watcher::{self, QueueConfig, Requeue, Trigger, NODES_KEY};
use cluster_client::{ClusterClient, KubeClusterClient};
use k8s_openapi::api::admissionregistration::v1::{ValidatingAdmissionPolicy, ValidatingAdmissionPolicyBinding};
use kube::api::DynamicObject;
use kube::{Api, Client, ResourceExt};
use kube_runtime::watcher::Config as WatcherConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Retry delay of the ancillary loops
const ANCILLARY_RETRY: Duration = Duration::from_secs(30);

const EVENT_REPORTER: &str = "hyperconverged-controller";

type Task = (&'static str, JoinHandle<Result<(), ControllerError>>);

/// Main controller for the HyperConverged engine.
pub struct Controller {
    tasks: Vec<Task>,
}

impl Controller {
    /// Creates a new controller instance and starts every loop.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing HyperConverged controller");
        let kube_client = Client::try_default().await?;
        if config.run_mode == RunMode::Cluster {
            config.check_namespace(kube_client.default_namespace())?;
        }

        let client: Arc<dyn ClusterClient> = Arc::new(KubeClusterClient::new(kube_client.clone()));
        let config = Arc::new(config);

        let own = Arc::new(OwnResources::resolve(client.as_ref(), &config).await?);
        let cluster_info = Arc::new(ClusterInfo::init(Arc::clone(&client), &config).await?);
        let caps = cluster_info.snapshot().await;
        info!(
            "Cluster: openshift={} olm={} monitoring={} perses={} nad={}",
            caps.openshift, caps.managed_by_olm, caps.monitoring_available, caps.perses_available, caps.nad_available
        );

        let patches = UpgradePatches::load(&config.upgrade_patches_path, &config.namespace)?;
        let metrics = HcoMetrics::new()?;
        let emitter = Arc::new(KubeEventEmitter::new(
            kube_client.clone(),
            EVENT_REPORTER,
            config.pod_name.clone(),
        ));

        let operator_condition = OperatorCondition::new(Arc::clone(&client), &config);
        operator_condition.init().await?;

        let ctx = Arc::new(OperandContext {
            client: Arc::clone(&client),
            config: Arc::clone(&config),
            own: Arc::clone(&own),
        });
        let monitoring = monitoring::operands(
            &ctx,
            Arc::new(BearerToken::new(config.token_path.clone())),
            Arc::new(Refresher::new()),
        );
        let handler = OperandHandler::new(registry(&ctx, monitoring), emitter.clone(), metrics.clone());
        let reconciler = Arc::new(HcoReconciler::new(
            Arc::clone(&client),
            Arc::clone(&config),
            Arc::clone(&cluster_info),
            patches,
            handler,
            emitter,
            metrics.clone(),
            operator_condition,
        ));

        let mut tasks = Vec::new();
        tasks.push(("HyperConverged", spawn_hyperconverged(&kube_client, reconciler, caps.openshift).await));
        let admission = AdmissionPolicyReconciler::new(
            Arc::clone(&client),
            &config.namespace,
            &config.version,
            own.deployment_ref(),
        );
        tasks.push(("admission policy", spawn_admission_policy(&kube_client, Arc::new(admission))));
        let nodes = NodesReconciler::new(Arc::clone(&client), &config.namespace);
        tasks.push(("nodes", spawn_nodes(&kube_client, nodes, &config.namespace)));

        if caps.perses_available {
            let store = PersesStore::load(&config.namespace, &config.version)?;
            let perses = PersesReconciler::new(Arc::clone(&client), store, &config.namespace, own.deployment_ref());
            tasks.push(("perses", spawn_perses(&kube_client, Arc::new(perses)).await));
        } else {
            info!("Perses CRDs are not installed; not managing dashboards");
        }

        let deployment = config
            .deployment_name
            .clone()
            .or_else(|| own.deployment_name().map(str::to_string));
        match deployment {
            Some(deployment) => {
                let webhook = Arc::new(ConversionWebhookReconciler::new(
                    Arc::clone(&client),
                    &config.namespace,
                    &deployment,
                    config.webhook_port,
                    caps.openshift,
                    config.is_managed_by_olm(),
                ));
                let namespace = config.namespace.clone();
                let kube_client = kube_client.clone();
                tasks.push((
                    "conversion webhook",
                    tokio::spawn(async move { watcher::watch_conversion_webhook(kube_client, namespace, webhook).await }),
                ));
            }
            None => warn!("Own Deployment is unknown; the CRD conversion webhook is not managed"),
        }

        let readiness = Readiness::default();
        tasks.push(("health server", spawn_server(config.health_port, server::health_router(readiness.clone()))));
        tasks.push(("metrics server", spawn_server(config.metrics_port, server::metrics_router(metrics))));
        readiness.set_ready();

        Ok(Self { tasks })
    }

    /// Runs until a loop stops or the process is interrupted.
    pub async fn run(self) -> Result<(), ControllerError> {
        let (names, handles): (Vec<&str>, Vec<_>) = self.tasks.into_iter().unzip();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                Ok(())
            }
            (result, index, _) = futures::future::select_all(handles) => {
                let name = names[index];
                result
                    .map_err(|e| ControllerError::Watch(format!("{name} task panicked: {e}")))?
                    .map_err(|e| ControllerError::Watch(format!("{name} task error: {e}")))?;
                error!("{} task stopped", name);
                Err(ControllerError::Watch(format!("{name} task stopped")))
            }
        }
    }
}

async fn spawn_hyperconverged(
    client: &Client,
    reconciler: Arc<HcoReconciler>,
    openshift: bool,
) -> JoinHandle<Result<(), ControllerError>> {
    let resolver = reconciler.resolver().clone();
    let api_server = openshift.then(|| resolver.api_server().clone());
    let triggers = watcher::hyperconverged_triggers(client, resolver.secondary().clone(), api_server).await;
    let initial = vec![resolver.primary().clone()];
    tokio::spawn(async move {
        let policy = Arc::clone(&reconciler);
        watcher::run_queue(
            QueueConfig {
                name: "HyperConverged",
                debounce: Duration::ZERO,
            },
            triggers,
            initial,
            move |request| {
                let reconciler = Arc::clone(&reconciler);
                async move { reconciler.reconcile(&request).await }
            },
            move |e| policy.error_policy(e),
        )
        .await;
        Ok(())
    })
}

fn name_of<R: ResourceExt>(obj: &R) -> Option<String> {
    Some(obj.name_any())
}

fn spawn_admission_policy(
    client: &Client,
    reconciler: Arc<AdmissionPolicyReconciler>,
) -> JoinHandle<Result<(), ControllerError>> {
    let policies: Api<ValidatingAdmissionPolicy> = Api::all(client.clone());
    let bindings: Api<ValidatingAdmissionPolicyBinding> = Api::all(client.clone());
    let triggers = vec![
        watcher::typed_trigger(
            policies,
            WatcherConfig::default().fields(&format!("metadata.name={POLICY_NAME}")),
            name_of::<ValidatingAdmissionPolicy>,
        ),
        watcher::typed_trigger(
            bindings,
            WatcherConfig::default().fields(&format!("metadata.name={BINDING_NAME}")),
            name_of::<ValidatingAdmissionPolicyBinding>,
        ),
    ];
    let initial = vec![reconciler.startup_request().to_string()];
    tokio::spawn(async move {
        watcher::run_queue(
            QueueConfig {
                name: "admission policy",
                debounce: Duration::ZERO,
            },
            triggers,
            initial,
            move |name: String| {
                let reconciler = Arc::clone(&reconciler);
                async move { reconciler.reconcile(&name).await.map(|()| Requeue::None) }
            },
            |_| ANCILLARY_RETRY,
        )
        .await;
        Ok(())
    })
}

async fn spawn_perses(client: &Client, reconciler: Arc<PersesReconciler>) -> JoinHandle<Result<(), ControllerError>> {
    let managed = WatcherConfig::default().labels(&format!("{APP_LABEL_MANAGED_BY}={OPERATOR_NAME}"));
    let mut triggers: Vec<Trigger<String>> = Vec::new();
    for gvk in [kinds::perses_dashboard(), kinds::perses_datasource()] {
        let Some(resource) = watcher::served(client, &gvk).await else {
            continue;
        };
        let api = Api::<DynamicObject>::namespaced_with(client.clone(), reconciler.namespace(), &resource);
        triggers.push(watcher::dynamic_trigger(api, managed.clone(), name_of::<DynamicObject>));
    }
    let initial = vec![reconciler.startup_request().to_string()];
    tokio::spawn(async move {
        watcher::run_queue(
            QueueConfig {
                name: "perses",
                debounce: Duration::ZERO,
            },
            triggers,
            initial,
            move |name: String| {
                let reconciler = Arc::clone(&reconciler);
                async move { reconciler.reconcile(&name).await.map(|()| Requeue::None) }
            },
            |_| ANCILLARY_RETRY,
        )
        .await;
        Ok(())
    })
}

fn spawn_nodes(client: &Client, reconciler: NodesReconciler, namespace: &str) -> JoinHandle<Result<(), ControllerError>> {
    let triggers = watcher::node_triggers(client, namespace);
    let reconciler = Arc::new(reconciler);
    tokio::spawn(async move {
        watcher::run_queue(
            QueueConfig {
                name: "nodes",
                debounce: Duration::from_secs(1),
            },
            triggers,
            vec![NODES_KEY.to_string()],
            move |_key: String| {
                let reconciler = Arc::clone(&reconciler);
                async move { reconciler.reconcile().await.map(|_| Requeue::None) }
            },
            |_| ANCILLARY_RETRY,
        )
        .await;
        Ok(())
    })
}

fn spawn_server(port: u16, router: axum::Router) -> JoinHandle<Result<(), ControllerError>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tokio::spawn(async move {
        server::serve(addr, router)
            .await
            .map_err(|e| ControllerError::Watch(format!("HTTP server on {addr}: {e}")))
    })
}
