//! Kubernetes resource watchers.
//!
//! The HyperConverged pass, the admission-policy, Perses and node loops all
//! reconcile names that may not exist in the cluster (placeholder startup
//! requests, the aliased child-event request), so they do not run on top of
//! a reflector. Each one drains its watch streams into a serialized
//! [`WorkQueue`]: a key is queued at most once and keys are processed one at
//! a time. The conversion-webhook loop watches a single real object and is
//! a plain `kube_runtime::Controller`.

use crate::conversion_webhook::ConversionWebhookReconciler;
use crate::error::ControllerError;
use crate::kinds;
use crate::nodes::NodeLabelCache;
use crate::operands::labels::{APP_LABEL_MANAGED_BY, OPERATOR_NAME};
use crate::req_resolver::ReconcileRequest;
use cluster_client::gvk_of;
use crds::HCO_CRD_NAME;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::api::scheduling::v1::PriorityClass;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller, WatchStreamExt};
use std::collections::VecDeque;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// What to do with a key after it was processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Wait for the next watch event
    None,
    /// Process the key again after the delay
    After(Duration),
}

/// Pending keys, in arrival order, without duplicates
#[derive(Debug)]
pub struct WorkQueue<K> {
    pending: VecDeque<K>,
}

impl<K> Default for WorkQueue<K> {
    fn default() -> Self {
        Self { pending: VecDeque::new() }
    }
}

impl<K: PartialEq> WorkQueue<K> {
    /// Returns false when the key was already pending
    pub fn push(&mut self, key: K) -> bool {
        if self.pending.contains(&key) {
            return false;
        }
        self.pending.push_back(key);
        true
    }

    pub fn pop(&mut self) -> Option<K> {
        self.pending.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Stream of keys produced by one watch
pub type Trigger<K> = BoxStream<'static, K>;

/// Settings of one serialized loop
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: &'static str,
    /// Quiet period after the first trigger before the queue is drained
    pub debounce: Duration,
}

/// Run a serialized loop until every trigger stream ends.
///
/// `initial` keys are processed before any trigger. A failed key is
/// requeued after the delay returned by `error_policy`.
pub async fn run_queue<K, F, Fut, E>(
    config: QueueConfig,
    triggers: Vec<Trigger<K>>,
    initial: Vec<K>,
    reconcile: F,
    error_policy: E,
) where
    K: Clone + PartialEq + Display + Send + 'static,
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<Requeue, ControllerError>>,
    E: Fn(&ControllerError) -> Duration,
{
    info!("Starting {} watcher", config.name);
    let mut triggers = stream::select_all(triggers);
    let (requeue_tx, mut requeue_rx) = mpsc::unbounded_channel::<K>();
    let mut queue = WorkQueue::default();
    for key in initial {
        queue.push(key);
    }

    loop {
        if queue.is_empty() {
            tokio::select! {
                Some(key) = triggers.next() => { queue.push(key); }
                Some(key) = requeue_rx.recv() => { queue.push(key); }
                else => break,
            }
            if !config.debounce.is_zero() {
                tokio::time::sleep(config.debounce).await;
            }
        }
        while let Some(Some(key)) = triggers.next().now_or_never() {
            queue.push(key);
        }
        while let Ok(key) = requeue_rx.try_recv() {
            queue.push(key);
        }

        let Some(key) = queue.pop() else {
            continue;
        };
        debug!("{}: reconciling {}", config.name, key);
        let delay = match reconcile(key.clone()).await {
            Ok(Requeue::None) => None,
            Ok(Requeue::After(delay)) => Some(delay),
            Err(e) => {
                let delay = error_policy(&e);
                if e.is_conflict() {
                    debug!("{}: conflict on {}, retrying in {:?}", config.name, key, delay);
                } else {
                    error!("{}: reconciliation of {} failed: {}", config.name, key, e);
                }
                Some(delay)
            }
        };
        if let Some(delay) = delay {
            let tx = requeue_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                // the loop is gone when the receiver is closed
                let _ = tx.send(key);
            });
        }
    }
    info!("{} watcher stopped", config.name);
}

/// Map every touched object of a typed watch onto a key
pub fn typed_trigger<R, K, M>(api: Api<R>, config: watcher::Config, map: M) -> Trigger<K>
where
    R: Resource + Clone + Debug + serde::de::DeserializeOwned + Send + 'static,
    R::DynamicType: Default,
    K: Send + 'static,
    M: Fn(&R) -> Option<K> + Send + 'static,
{
    watcher(api, config)
        .default_backoff()
        .touched_objects()
        .filter_map(move |res| {
            let key = match res {
                Ok(obj) => map(&obj),
                Err(e) => {
                    warn!("Watch error: {}", e);
                    None
                }
            };
            futures::future::ready(key)
        })
        .boxed()
}

/// Map every touched object of a dynamic watch onto a key
pub fn dynamic_trigger<K, M>(api: Api<DynamicObject>, config: watcher::Config, map: M) -> Trigger<K>
where
    K: Send + 'static,
    M: Fn(&DynamicObject) -> Option<K> + Send + 'static,
{
    watcher(api, config)
        .default_backoff()
        .touched_objects()
        .filter_map(move |res| {
            let key = match res {
                Ok(obj) => map(&obj),
                Err(e) => {
                    warn!("Watch error: {}", e);
                    None
                }
            };
            futures::future::ready(key)
        })
        .boxed()
}

/// Kinds of the objects the HyperConverged pass produces
pub fn child_kinds() -> Vec<GroupVersionKind> {
    vec![
        kinds::kubevirt(),
        kinds::cdi(),
        kinds::network_addons(),
        kinds::ssp(),
        kinds::aaq(),
        kinds::console_cli_download(),
        kinds::console_plugin(),
        kinds::console_quick_start(),
        kinds::route(),
        kinds::prometheus_rule(),
        kinds::service_monitor(),
        kinds::network_attachment_definition(),
        kinds::security_context_constraints(),
        kinds::image_stream(),
        gvk_of::<PriorityClass>(),
        gvk_of::<ConfigMap>(),
        gvk_of::<Service>(),
        gvk_of::<ServiceAccount>(),
        gvk_of::<Secret>(),
        gvk_of::<Deployment>(),
        gvk_of::<DaemonSet>(),
        gvk_of::<NetworkPolicy>(),
        gvk_of::<Role>(),
        gvk_of::<RoleBinding>(),
        gvk_of::<ClusterRole>(),
        gvk_of::<ClusterRoleBinding>(),
    ]
}

/// Resolve a kind, or None when the cluster does not serve it
pub async fn served(client: &Client, gvk: &GroupVersionKind) -> Option<ApiResource> {
    match kube::discovery::pinned_kind(client, gvk).await {
        Ok((resource, _)) => Some(resource),
        Err(e) => {
            info!("{}/{} is not served, not watching it: {}", gvk.group, gvk.kind, e);
            None
        }
    }
}

/// Triggers of the HyperConverged pass
pub async fn hyperconverged_triggers(
    client: &Client,
    secondary: ReconcileRequest,
    api_server: Option<ReconcileRequest>,
) -> Vec<Trigger<ReconcileRequest>> {
    let mut triggers = Vec::new();
    let hcs: Api<crds::HyperConverged> = Api::all(client.clone());
    triggers.push(typed_trigger(hcs, watcher::Config::default(), |hc: &crds::HyperConverged| {
        Some(ReconcileRequest::new(hc.namespace().unwrap_or_default(), hc.name_any()))
    }));

    let managed = watcher::Config::default().labels(&format!("{APP_LABEL_MANAGED_BY}={OPERATOR_NAME}"));
    for gvk in child_kinds() {
        let Some(resource) = served(client, &gvk).await else {
            continue;
        };
        let api = Api::<DynamicObject>::all_with(client.clone(), &resource);
        // every child event funnels into the one aliased request
        let request = secondary.clone();
        triggers.push(dynamic_trigger(api, managed.clone(), move |_| Some(request.clone())));
    }

    if let Some(request) = api_server
        && let Some(resource) = served(client, &kinds::api_server()).await
    {
        let api = Api::<DynamicObject>::all_with(client.clone(), &resource);
        let config = watcher::Config::default().fields("metadata.name=cluster");
        triggers.push(dynamic_trigger(api, config, move |_| Some(request.clone())));
    }
    triggers
}

/// Key of the node loop; there is only one thing to recompute
pub const NODES_KEY: &str = "nodes";

/// Node events that can change the topology, plus HyperConverged events
pub fn node_triggers(client: &Client, namespace: &str) -> Vec<Trigger<String>> {
    let nodes: Api<Node> = Api::all(client.clone());
    let mut cache = NodeLabelCache::default();
    let node_events = watcher(nodes, watcher::Config::default())
        .default_backoff()
        .filter_map(move |res| {
            let key = match res {
                Ok(event) => cache.observe(&event).then(|| NODES_KEY.to_string()),
                Err(e) => {
                    warn!("Node watch error: {}", e);
                    None
                }
            };
            futures::future::ready(key)
        })
        .boxed();

    let hcs: Api<crds::HyperConverged> = Api::namespaced(client.clone(), namespace);
    let hc_events = typed_trigger(hcs, watcher::Config::default(), |_: &crds::HyperConverged| {
        Some(NODES_KEY.to_string())
    });
    vec![node_events, hc_events]
}

/// Error policy of the conversion-webhook loop
fn webhook_error_policy(
    _crd: Arc<CustomResourceDefinition>,
    error: &ControllerError,
    _ctx: Arc<ConversionWebhookReconciler>,
) -> Action {
    error!("Reconciliation error for the conversion webhook: {}", error);
    Action::requeue(Duration::from_secs(60))
}

/// Keep the conversion stanza of the HyperConverged CRD in place
pub async fn watch_conversion_webhook(
    client: Client,
    namespace: String,
    reconciler: Arc<ConversionWebhookReconciler>,
) -> Result<(), ControllerError> {
    info!("Starting CRD conversion webhook watcher");
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let crd_config = watcher::Config::default().fields(&format!("metadata.name={HCO_CRD_NAME}"));
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(1);

    let mut controller = Controller::new(crds, crd_config).with_config(controller_config);
    if reconciler.managed_by_olm() {
        // the CA bundle is copied from this Secret; follow its rotation
        let secrets: Api<Secret> = Api::namespaced(client, &namespace);
        let secret_config = watcher::Config::default().fields(&format!("metadata.name={}", reconciler.secret_name()));
        controller = controller.watches(secrets, secret_config, |_: Secret| {
            Some(ObjectRef::<CustomResourceDefinition>::new(HCO_CRD_NAME))
        });
    }

    controller
        .run(
            |_crd: Arc<CustomResourceDefinition>, ctx: Arc<ConversionWebhookReconciler>| async move {
                ctx.reconcile().await.map(|()| Action::await_change())
            },
            webhook_error_policy,
            reconciler,
        )
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled conversion webhook of {}", obj.name),
                Err(e) => warn!("Conversion webhook controller error: {}", e),
            }
        })
        .await;
    Ok(())
}
