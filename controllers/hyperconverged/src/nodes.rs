//! Node topology probe
//!
//! Counts worker and control-plane nodes and records in the HyperConverged
//! status whether the infrastructure components can run highly available.
//! The status write is picked up by the main watch, which then re-renders
//! replica counts and anti-affinity.

use crate::error::ControllerError;
use cluster_client::{get_typed, list_typed, update_status_typed, ClusterClient};
use crds::{HyperConverged, HYPERCONVERGED_NAME};
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use kube_runtime::watcher::Event;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

pub const WORKER_LABEL: &str = "node-role.kubernetes.io/worker";

pub const CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/control-plane";

pub const LEGACY_MASTER_LABEL: &str = "node-role.kubernetes.io/master";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeTopology {
    pub workers: usize,
    pub control_plane: usize,
}

impl NodeTopology {
    pub fn from_nodes(nodes: &[Node]) -> Self {
        let mut topology = Self::default();
        for labels in nodes.iter().filter_map(|n| n.metadata.labels.as_ref()) {
            if labels.contains_key(WORKER_LABEL) {
                topology.workers += 1;
            }
            if labels.contains_key(CONTROL_PLANE_LABEL) || labels.contains_key(LEGACY_MASTER_LABEL) {
                topology.control_plane += 1;
            }
        }
        topology
    }

    pub fn infrastructure_highly_available(&self) -> bool {
        self.workers >= 2 && self.control_plane >= 2
    }
}

/// Only label changes can move a node between roles
pub fn labels_changed(old: Option<&BTreeMap<String, String>>, new: Option<&BTreeMap<String, String>>) -> bool {
    let empty = BTreeMap::new();
    old.unwrap_or(&empty) != new.unwrap_or(&empty)
}

/// Last seen labels per node, used to drop events that cannot change roles
#[derive(Debug, Default)]
pub struct NodeLabelCache {
    labels: HashMap<String, BTreeMap<String, String>>,
}

impl NodeLabelCache {
    /// Record the event; returns whether the topology may have changed
    pub fn observe(&mut self, event: &Event<Node>) -> bool {
        match event {
            Event::Apply(node) | Event::InitApply(node) => {
                let labels = node.metadata.labels.clone().unwrap_or_default();
                match self.labels.insert(node.name_any(), labels.clone()) {
                    None => true,
                    Some(old) => labels_changed(Some(&old), Some(&labels)),
                }
            }
            Event::Delete(node) => {
                self.labels.remove(&node.name_any());
                true
            }
            Event::Init | Event::InitDone => false,
        }
    }
}

pub struct NodesReconciler {
    client: Arc<dyn ClusterClient>,
    namespace: String,
}

impl NodesReconciler {
    pub fn new(client: Arc<dyn ClusterClient>, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    /// Returns whether the HyperConverged status was rewritten
    pub async fn reconcile(&self) -> Result<bool, ControllerError> {
        let client = self.client.as_ref();
        let Some(mut hc) = get_typed::<HyperConverged>(client, Some(&self.namespace), HYPERCONVERGED_NAME).await?
        else {
            debug!("HyperConverged not found; node topology is not recorded");
            return Ok(false);
        };
        if hc.is_deleting() {
            return Ok(false);
        }

        let nodes = list_typed::<Node>(client, None, None).await?;
        let topology = NodeTopology::from_nodes(&nodes);
        let highly_available = topology.infrastructure_highly_available();

        let status = hc.status.get_or_insert_with(Default::default);
        if status.infrastructure_highly_available == Some(highly_available) {
            return Ok(false);
        }
        info!(
            "Infrastructure highly available: {} ({} workers, {} control-plane nodes)",
            highly_available, topology.workers, topology.control_plane
        );
        status.infrastructure_highly_available = Some(highly_available);
        update_status_typed(client, &hc).await?;
        Ok(true)
    }
}
