//! RFC 6902 helpers shared by the jsonpatch annotations and the upgrade
//! patches.
//!
//! Operations are kept as raw JSON values until they are applied one at a
//! time, so that path checks and the apply options can look at them before
//! `json-patch` does.

use json_patch::Patch;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Options of an upgrade patch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchOptions {
    /// A `remove` of a missing path is a no-op instead of an error
    #[serde(default)]
    pub allow_missing_path_on_remove: bool,
    /// An `add` creates missing parent objects
    #[serde(default)]
    pub ensure_path_exists_on_add: bool,
}

/// Parse a JSON array of patch operations
pub fn parse_operations(raw: &str) -> Result<Vec<Value>, String> {
    let value: Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    operations_from_value(value)
}

pub fn operations_from_value(value: Value) -> Result<Vec<Value>, String> {
    let Value::Array(ops) = value else {
        return Err("a JSON patch must be an array of operations".to_string());
    };
    for op in &ops {
        if op_name(op).is_none() || op_path(op).is_none() {
            return Err(format!("malformed patch operation: {op}"));
        }
    }
    Ok(ops)
}

fn op_name(op: &Value) -> Option<&str> {
    op.get("op").and_then(Value::as_str)
}

fn op_path(op: &Value) -> Option<&str> {
    op.get("path").and_then(Value::as_str)
}

/// Every operation must target a field below `/spec/`
pub fn validate_spec_paths(ops: &[Value]) -> Result<(), String> {
    for op in ops {
        let path = op_path(op).unwrap_or_default();
        if !path.starts_with("/spec/") {
            return Err(format!("can only modify spec fields; invalid path {path:?}"));
        }
        if let Some(from) = op.get("from").and_then(Value::as_str)
            && !from.starts_with("/spec/")
        {
            return Err(format!("can only modify spec fields; invalid from {from:?}"));
        }
    }
    Ok(())
}

fn unescape(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

/// Create the missing parent objects of `path`
fn ensure_parents(doc: &mut Value, path: &str) {
    let segments: Vec<String> = path.split('/').skip(1).map(unescape).collect();
    let Some((_, parents)) = segments.split_last() else {
        return;
    };
    let mut current = doc;
    for segment in parents {
        let Value::Object(map) = current else {
            return;
        };
        current = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Apply `ops` to a copy of `doc`.
///
/// Returns `Ok(None)` when a `test` operation fails; the patch is then
/// skipped as a whole. Any other failure is an error.
pub fn apply(doc: &Value, ops: &[Value], options: PatchOptions) -> Result<Option<Value>, String> {
    let mut working = doc.clone();
    for op in ops {
        let name = op_name(op).unwrap_or_default();
        let path = op_path(op).unwrap_or_default();

        if name == "remove" && options.allow_missing_path_on_remove && working.pointer(path).is_none() {
            continue;
        }
        if name == "add" && options.ensure_path_exists_on_add {
            ensure_parents(&mut working, path);
        }

        let single: Patch = serde_json::from_value(Value::Array(vec![op.clone()])).map_err(|e| e.to_string())?;
        if let Err(e) = json_patch::patch(&mut working, &single) {
            if name == "test" {
                return Ok(None);
            }
            return Err(e.to_string());
        }
    }
    Ok(Some(working))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_paths_outside_spec_are_rejected() {
        let ops = parse_operations(r#"[{"op":"add","path":"/metadata/labels/x","value":"y"}]"#).unwrap();
        let err = validate_spec_paths(&ops).unwrap_err();
        assert!(err.contains("can only modify spec fields"));

        let ops = parse_operations(r#"[{"op":"add","path":"/spec/x","value":"y"}]"#).unwrap();
        assert!(validate_spec_paths(&ops).is_ok());
    }

    #[test]
    fn test_not_an_array_is_rejected() {
        assert!(parse_operations(r#"{"op":"add"}"#).is_err());
        assert!(parse_operations("not json").is_err());
        assert!(parse_operations(r#"[{"value":1}]"#).is_err());
    }

    #[test]
    fn test_failed_test_operation_skips_whole_patch() {
        let doc = json!({"spec": {"bw": "128Mi", "other": 1}});
        let ops = operations_from_value(json!([
            {"op": "test", "path": "/spec/bw", "value": "64Mi"},
            {"op": "remove", "path": "/spec/bw"}
        ]))
        .unwrap();
        assert_eq!(apply(&doc, &ops, PatchOptions::default()).unwrap(), None);

        let doc = json!({"spec": {"bw": "64Mi"}});
        let patched = apply(&doc, &ops, PatchOptions::default()).unwrap().unwrap();
        assert_eq!(patched, json!({"spec": {}}));
    }

    #[test]
    fn test_remove_missing_path_needs_option() {
        let doc = json!({"spec": {}});
        let ops = operations_from_value(json!([{"op": "remove", "path": "/spec/gone"}])).unwrap();
        assert!(apply(&doc, &ops, PatchOptions::default()).is_err());

        let options = PatchOptions {
            allow_missing_path_on_remove: true,
            ..Default::default()
        };
        assert_eq!(apply(&doc, &ops, options).unwrap(), Some(doc));
    }

    #[test]
    fn test_add_creates_parents_with_option() {
        let doc = json!({"spec": {}});
        let ops = operations_from_value(json!([
            {"op": "add", "path": "/spec/configuration/migrations/allowPostCopy", "value": true}
        ]))
        .unwrap();
        assert!(apply(&doc, &ops, PatchOptions::default()).is_err());

        let options = PatchOptions {
            ensure_path_exists_on_add: true,
            ..Default::default()
        };
        let patched = apply(&doc, &ops, options).unwrap().unwrap();
        assert_eq!(patched["spec"]["configuration"]["migrations"]["allowPostCopy"], true);
    }
}
