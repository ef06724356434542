//! Monitoring assets of the operator
//!
//! The PrometheusRule, the metrics Service, the bearer token Secret, the
//! ServiceMonitor and the Alertmanager NetworkPolicy are owned by the
//! operator Deployment rather than the HyperConverged resource, so alerts
//! keep firing while no HyperConverged resource exists. They are
//! registered after every other operand and only while the Prometheus
//! operator CRDs are served.
//!
//! The Perses dashboards are reconciled by their own [`perses`] loop.

pub mod network_policy;
pub mod perses;
pub mod refresher;
pub mod rules;
pub mod secret;
pub mod service;
pub mod service_monitor;
pub mod token;


use crate::operands::conditional::ConditionalOperand;
use crate::operands::generic::GenericOperand;
use crate::operands::{Operand, OperandContext};
use crate::request::HcoRequest;
use refresher::Refresher;
use token::BearerToken;
use std::sync::Arc;

pub fn enabled(req: &HcoRequest) -> bool {
    req.caps.monitoring_available
}

/// Monitoring operands in registration order; the Secret comes before the
/// ServiceMonitor so a token rotation is seen in the same pass
pub fn operands(ctx: &Arc<OperandContext>, token: Arc<BearerToken>, refresher: Arc<Refresher>) -> Vec<Box<dyn Operand>> {
    let operands: Vec<Box<dyn Operand>> = vec![
        Box::new(GenericOperand::new(rules::PrometheusRuleHooks, Arc::clone(ctx))),
        Box::new(GenericOperand::new(service::MetricsServiceHooks, Arc::clone(ctx))),
        Box::new(secret::BearerSecret::new(Arc::clone(ctx), token, Arc::clone(&refresher))),
        Box::new(service_monitor::RefreshingServiceMonitor::new(Arc::clone(ctx), refresher)),
        Box::new(GenericOperand::new(network_policy::AlertManagerPolicyHooks, Arc::clone(ctx))),
    ];
    operands
        .into_iter()
        .map(|inner| Box::new(ConditionalOperand::new(inner, enabled)) as Box<dyn Operand>)
        .collect()
}
