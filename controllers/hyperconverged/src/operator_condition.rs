//! OLM `Upgradeable` operator condition
//!
//! OLM blocks an upgrade of the operator bundle while this condition is
//! False. Outside OLM, or when running locally, every write is a no-op.

use crate::backoff::FibonacciBackoff;
use crate::config::{OperatorConfig, RunMode};
use crate::error::ControllerError;
use crate::kinds;
use crate::request::HcoRequest;
use cluster_client::{ClientError, ClusterClient};
use crds::condition_types::UPGRADEABLE;
use crds::{set_condition, Condition, ConditionStatus};
use kube::api::DynamicObject;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub const REASON_ALLOW: &str = "Upgradeable";
pub const REASON_INIT: &str = "Initializing";
pub const MESSAGE_INIT: &str = "HCO is initializing";
pub const REASON_UPGRADING: &str = "AlreadyPerformingUpgrade";
pub const MESSAGE_UPGRADING: &str = "upgrade is in progress";

const INIT_ATTEMPTS: usize = 5;

pub struct OperatorCondition {
    client: Arc<dyn ClusterClient>,
    namespace: String,
    /// None when there is nothing to write
    name: Option<String>,
}

impl OperatorCondition {
    pub fn new(client: Arc<dyn ClusterClient>, config: &OperatorConfig) -> Self {
        let name = match config.run_mode {
            RunMode::Local => None,
            RunMode::Cluster => config.operator_condition_name.clone(),
        };
        Self {
            client,
            namespace: config.namespace.clone(),
            name,
        }
    }

    /// Block upgrades until the first pass has run, retrying briefly
    pub async fn init(&self) -> Result<(), ControllerError> {
        let mut backoff = FibonacciBackoff::new(1, 5);
        let mut attempt = 1;
        loop {
            match self.set(ConditionStatus::False, REASON_INIT, MESSAGE_INIT).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < INIT_ATTEMPTS => {
                    warn!("Cannot set the Upgradeable operator condition (attempt {}): {}", attempt, e);
                    tokio::time::sleep(backoff.next_backoff()).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reflect the outcome of a pass
    pub async fn update_from(&self, req: &HcoRequest) -> Result<(), ControllerError> {
        if req.upgrade_mode {
            return self.set(ConditionStatus::False, REASON_UPGRADING, MESSAGE_UPGRADING).await;
        }
        if !req.upgradeable {
            let blocking = req.conditions.get(UPGRADEABLE);
            let reason = blocking.map_or(REASON_UPGRADING, |c| c.reason.as_str());
            let message = blocking.map_or("", |c| c.message.as_str());
            return self.set(ConditionStatus::False, reason, message).await;
        }
        self.set(ConditionStatus::True, REASON_ALLOW, "").await
    }

    /// With no HyperConverged there is nothing left to protect
    pub async fn allow(&self) -> Result<(), ControllerError> {
        self.set(ConditionStatus::True, REASON_ALLOW, "").await
    }

    pub async fn set(&self, status: ConditionStatus, reason: &str, message: &str) -> Result<(), ControllerError> {
        let Some(name) = self.name.as_deref() else {
            return Ok(());
        };
        let gvk = kinds::operator_condition();
        let mut found = self
            .client
            .get(&gvk, Some(&self.namespace), name)
            .await?
            .ok_or_else(|| ClientError::NotFound(format!("OperatorCondition {}/{}", self.namespace, name)))?;

        let mut conditions = spec_conditions(&found)?;
        let changed = set_condition(
            &mut conditions,
            Condition::new(UPGRADEABLE, status, reason, message),
            chrono::Utc::now(),
        );
        if !changed {
            return Ok(());
        }
        debug!("Setting the Upgradeable operator condition to {:?} ({})", status, reason);
        write_spec_conditions(&mut found, &conditions)?;
        self.client.update(&gvk, &found).await?;
        Ok(())
    }
}

fn spec_conditions(obj: &DynamicObject) -> Result<Vec<Condition>, ControllerError> {
    match obj.data.pointer("/spec/conditions") {
        Some(list) => Ok(serde_json::from_value(list.clone())?),
        None => Ok(Vec::new()),
    }
}

fn write_spec_conditions(obj: &mut DynamicObject, conditions: &[Condition]) -> Result<(), ControllerError> {
    let list = serde_json::to_value(conditions)?;
    let Some(root) = obj.data.as_object_mut() else {
        return Err(ControllerError::InvalidConfig("OperatorCondition is not an object".to_string()));
    };
    let spec = root
        .entry("spec")
        .or_insert_with(|| Value::Object(Default::default()));
    match spec.as_object_mut() {
        Some(spec) => {
            spec.insert("conditions".to_string(), list);
            Ok(())
        }
        None => Err(ControllerError::InvalidConfig("OperatorCondition spec is not an object".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::operands::generic::new_object;
    use crate::test_utils::{create_test_hc, create_test_request, openshift_caps, TEST_NAMESPACE};
    use cluster_client::MockClusterClient;
    use serde_json::json;

    const CONDITION_NAME: &str = "kubevirt-hyperconverged-operator.v1.14.0";

    fn olm_config() -> OperatorConfig {
        let mut config = test_config();
        config.run_mode = RunMode::Cluster;
        config.operator_condition_name = Some(CONDITION_NAME.to_string());
        config
    }

    fn seed(mock: &MockClusterClient) {
        let mut oc = new_object(json!({"spec": {}}));
        oc.metadata.name = Some(CONDITION_NAME.to_string());
        oc.metadata.namespace = Some(TEST_NAMESPACE.to_string());
        mock.insert(&kinds::operator_condition(), oc);
    }

    fn upgradeable(mock: &MockClusterClient) -> (String, String) {
        let oc = mock
            .object(&kinds::operator_condition(), Some(TEST_NAMESPACE), CONDITION_NAME)
            .unwrap();
        let c = &oc.data["spec"]["conditions"][0];
        (c["status"].as_str().unwrap().to_string(), c["reason"].as_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_init_then_allow() {
        let mock = MockClusterClient::new();
        seed(&mock);
        let oc = OperatorCondition::new(Arc::new(mock.clone()), &olm_config());

        oc.init().await.unwrap();
        assert_eq!(upgradeable(&mock), ("False".to_string(), REASON_INIT.to_string()));

        let req = create_test_request(create_test_hc(), openshift_caps());
        oc.update_from(&req).await.unwrap();
        assert_eq!(upgradeable(&mock), ("True".to_string(), REASON_ALLOW.to_string()));

        mock.clear_writes();
        oc.update_from(&req).await.unwrap();
        assert!(mock.writes().is_empty());
    }

    #[tokio::test]
    async fn test_upgrade_mode_blocks_upgrades() {
        let mock = MockClusterClient::new();
        seed(&mock);
        let oc = OperatorCondition::new(Arc::new(mock.clone()), &olm_config());

        let mut req = create_test_request(create_test_hc(), openshift_caps());
        req.upgrade_mode = true;
        oc.update_from(&req).await.unwrap();
        assert_eq!(upgradeable(&mock), ("False".to_string(), REASON_UPGRADING.to_string()));
    }

    #[tokio::test]
    async fn test_without_olm_nothing_is_written() {
        let mock = MockClusterClient::new();
        let oc = OperatorCondition::new(Arc::new(mock.clone()), &test_config());
        oc.init().await.unwrap();
        oc.allow().await.unwrap();
        assert!(mock.is_empty());
    }
}
