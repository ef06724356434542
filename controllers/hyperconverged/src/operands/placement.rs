//! Node placement blocks shared by the operand builders

use crds::{HyperConvergedConfig, NodePlacement};
use serde::Serialize;
use serde_json::{Map, Value};

/// `{nodeSelector, affinity, tolerations}` with unset parts left out
pub fn node_placement(placement: &NodePlacement) -> Value {
    let mut out = Map::new();
    insert_opt(&mut out, "nodeSelector", placement.node_selector.as_ref());
    insert_opt(&mut out, "affinity", placement.affinity.as_ref());
    insert_opt(&mut out, "tolerations", placement.tolerations.as_ref());
    Value::Object(out)
}

/// `{nodePlacement}` wrapper used by the CRs that nest it one level deeper
pub fn component_config(config: Option<&HyperConvergedConfig>) -> Value {
    let mut out = Map::new();
    if let Some(placement) = config.and_then(|c| c.node_placement.as_ref()) {
        out.insert("nodePlacement".to_string(), node_placement(placement));
    }
    Value::Object(out)
}

/// Insert `value` under `key` when it is set
pub fn insert_opt<T: Serialize>(map: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(v) = value.and_then(|v| serde_json::to_value(v).ok()) {
        map.insert(key.to_string(), v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_unset_parts_are_omitted() {
        let placement = NodePlacement {
            node_selector: Some(BTreeMap::from([("key1".to_string(), "value1".to_string())])),
            ..Default::default()
        };
        assert_eq!(node_placement(&placement), json!({"nodeSelector": {"key1": "value1"}}));
        assert_eq!(component_config(None), json!({}));
    }
}
