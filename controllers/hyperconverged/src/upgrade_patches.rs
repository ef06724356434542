//! Upgrade patches
//!
//! A manifest shipped next to the binary lists fixes to apply when the
//! engine takes over an installation recorded at an older version:
//! JSON patches for the HyperConverged spec and leftover objects to delete.
//!
//! ```json
//! {
//!   "hcoCRPatchList": [
//!     {
//!       "semverRange": "<1.5.0",
//!       "jsonPatch": [
//!         {"op": "test", "path": "/spec/liveMigrationConfig/bandwidthPerMigration", "value": "64Mi"},
//!         {"op": "remove", "path": "/spec/liveMigrationConfig/bandwidthPerMigration"}
//!       ],
//!       "jsonPatchApplyOptions": {"allowMissingPathOnRemove": true}
//!     }
//!   ],
//!   "objectsToBeRemoved": [
//!     {
//!       "semverRange": "<1.9.0",
//!       "groupVersionKind": {"group": "monitoring.coreos.com", "version": "v1", "kind": "PrometheusRule"},
//!       "objectKey": {"name": "kubevirt-hyperconverged-prometheus-rule-old", "namespace": "kubevirt-hyperconverged"}
//!     }
//!   ]
//! }
//! ```
//!
//! Ranges use the space-separated comparator syntax (`>=1.2.0 <1.5.0`,
//! alternatives joined by `||`). An empty range never matches.

use crate::error::ControllerError;
use crate::jsonpatch::{self, PatchOptions};
use crds::HyperConverged;
use kube::api::GroupVersionKind;
use semver::{Version, VersionReq};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpgradePatchesFile {
    #[serde(default, rename = "hcoCRPatchList")]
    hco_cr_patch_list: Vec<RawCrPatch>,
    #[serde(default)]
    objects_to_be_removed: Vec<RawObjectToRemove>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCrPatch {
    #[serde(default)]
    semver_range: String,
    json_patch: Value,
    #[serde(default)]
    json_patch_apply_options: PatchOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawGroupVersionKind {
    #[serde(default)]
    group: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawObjectKey {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawObjectToRemove {
    #[serde(default)]
    semver_range: String,
    #[serde(default)]
    group_version_kind: RawGroupVersionKind,
    #[serde(default)]
    object_key: RawObjectKey,
}

/// Version range in comparator syntax
#[derive(Debug, Clone)]
pub struct SemverRange {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl SemverRange {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut alternatives = Vec::new();
        if !raw.trim().is_empty() {
            for alternative in raw.split("||") {
                let comparators: Vec<&str> = alternative.split_whitespace().collect();
                if comparators.is_empty() {
                    return Err(format!("empty alternative in range {raw:?}"));
                }
                let req = VersionReq::parse(&comparators.join(", ")).map_err(|e| format!("{raw:?}: {e}"))?;
                alternatives.push(req);
            }
        }
        Ok(Self {
            raw: raw.to_string(),
            alternatives,
        })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }
}

impl std::fmt::Display for SemverRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parse a recorded version, tolerating a leading `v`
pub fn parse_version(raw: &str) -> Option<Version> {
    Version::parse(raw.trim().trim_start_matches('v')).ok()
}

#[derive(Debug, Clone)]
pub struct CrPatch {
    pub range: SemverRange,
    operations: Vec<Value>,
    options: PatchOptions,
}

/// A leftover object deleted when upgrading from a matching version
#[derive(Debug, Clone)]
pub struct ObjectToRemove {
    pub range: SemverRange,
    pub gvk: GroupVersionKind,
    pub name: String,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpgradePatches {
    patches: Vec<CrPatch>,
    removals: Vec<ObjectToRemove>,
}

impl UpgradePatches {
    /// Read and validate the manifest
    pub fn load(path: &Path, namespace: &str) -> Result<Self, ControllerError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::Validation(format!("can't read upgrade patches file {}: {e}", path.display()))
        })?;
        let patches = Self::parse(&raw, namespace)?;
        info!(
            "Loaded {} upgrade patches and {} leftover object directives from {}",
            patches.patches.len(),
            patches.removals.len(),
            path.display()
        );
        Ok(patches)
    }

    /// Parse and validate; every patch is dry-run against a default document
    pub fn parse(raw: &str, namespace: &str) -> Result<Self, ControllerError> {
        let file: UpgradePatchesFile = serde_json::from_str(raw)
            .map_err(|e| ControllerError::Validation(format!("malformed upgrade patches file: {e}")))?;

        let reference = serde_json::to_value(HyperConverged::with_defaults(namespace))?;

        let mut patches = Vec::with_capacity(file.hco_cr_patch_list.len());
        for raw_patch in file.hco_cr_patch_list {
            let range = SemverRange::parse(&raw_patch.semver_range).map_err(ControllerError::Validation)?;
            let operations = jsonpatch::operations_from_value(raw_patch.json_patch).map_err(ControllerError::Validation)?;
            jsonpatch::validate_spec_paths(&operations).map_err(ControllerError::Validation)?;
            jsonpatch::apply(&reference, &operations, raw_patch.json_patch_apply_options).map_err(|e| {
                ControllerError::Validation(format!("patch for range {range} does not apply: {e}"))
            })?;
            patches.push(CrPatch {
                range,
                operations,
                options: raw_patch.json_patch_apply_options,
            });
        }

        let mut removals = Vec::with_capacity(file.objects_to_be_removed.len());
        for raw_removal in file.objects_to_be_removed {
            let gvk = &raw_removal.group_version_kind;
            if gvk.kind.is_empty() {
                return Err(ControllerError::Validation("missing object kind".to_string()));
            }
            if gvk.version.is_empty() {
                return Err(ControllerError::Validation("missing object API version".to_string()));
            }
            if raw_removal.object_key.name.is_empty() {
                return Err(ControllerError::Validation("missing object name".to_string()));
            }
            removals.push(ObjectToRemove {
                range: SemverRange::parse(&raw_removal.semver_range).map_err(ControllerError::Validation)?,
                gvk: GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind),
                name: raw_removal.object_key.name.clone(),
                namespace: Some(raw_removal.object_key.namespace.clone()).filter(|ns| !ns.is_empty()),
            });
        }

        Ok(Self { patches, removals })
    }

    /// Apply every patch whose range contains `version` to the HyperConverged
    /// document. Returns whether the document changed.
    pub fn apply(&self, hc: &mut Value, version: &Version) -> Result<bool, ControllerError> {
        let mut changed = false;
        for patch in self.patches.iter().filter(|p| p.range.matches(version)) {
            match jsonpatch::apply(hc, &patch.operations, patch.options).map_err(ControllerError::PatchApply)? {
                Some(patched) => {
                    if patched != *hc {
                        debug!("Applied upgrade patch for range {}", patch.range);
                        *hc = patched;
                        changed = true;
                    }
                }
                None => debug!("Upgrade patch for range {} skipped by its test operation", patch.range),
            }
        }
        Ok(changed)
    }

    /// Leftover objects to delete when upgrading from `version`
    pub fn removals_for<'a>(&'a self, version: &'a Version) -> impl Iterator<Item = &'a ObjectToRemove> + 'a {
        self.removals.iter().filter(move |r| r.range.matches(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operands::generic::OperandHooks;
    use serde_json::json;

    const NS: &str = "kubevirt-hyperconverged";

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
                    "objectKey": {"name": "old-rule", "namespace": NS}
                }]
            })
            .to_string(),
            NS,
        )
        .unwrap()
    }

    fn hc_with_bandwidth(bandwidth: &str) -> Value {
        let mut hc = HyperConverged::with_defaults(NS);
        hc.spec.live_migration_config.bandwidth_per_migration = Some(bandwidth.to_string());
        serde_json::to_value(hc).unwrap()
    }

    #[test]
    fn test_legacy_bandwidth_is_stripped_below_range() {
        let patches = bandwidth_patches();
        let mut hc = hc_with_bandwidth("64Mi");
        assert!(patches.apply(&mut hc, &Version::new(1, 4, 99)).unwrap());
        assert!(hc["spec"]["liveMigrationConfig"].get("bandwidthPerMigration").is_none());

        let mut hc = hc_with_bandwidth("64Mi");
        assert!(!patches.apply(&mut hc, &Version::new(1, 5, 1)).unwrap());
        assert_eq!(hc["spec"]["liveMigrationConfig"]["bandwidthPerMigration"], "64Mi");
    }

    #[test]
    fn test_apply_is_idempotent() {
        let patches = bandwidth_patches();
        let version = Version::new(1, 4, 0);
        let mut once = hc_with_bandwidth("64Mi");
        patches.apply(&mut once, &version).unwrap();
        let mut twice = once.clone();
        assert!(!patches.apply(&mut twice, &version).unwrap());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_custom_bandwidth_is_kept() {
        let patches = bandwidth_patches();
        let mut hc = hc_with_bandwidth("128Mi");
        assert!(!patches.apply(&mut hc, &Version::new(1, 4, 0)).unwrap());
        assert_eq!(hc["spec"]["liveMigrationConfig"]["bandwidthPerMigration"], "128Mi");
    }

    #[test]
    fn test_removal_ranges() {
        let patches = bandwidth_patches();
        assert_eq!(patches.removals_for(&Version::new(1, 3, 2)).count(), 1);
        assert_eq!(patches.removals_for(&Version::new(1, 4, 0)).count(), 0);
        let old = Version::new(1, 2, 0);
        let removal = patches.removals_for(&old).next().unwrap();
        assert_eq!(removal.gvk.kind, "PrometheusRule");
        assert_eq!(removal.namespace.as_deref(), Some(NS));
    }

    #[test]
    fn test_shipped_manifest_is_valid() {
        let patches = UpgradePatches::parse(include_str!("../resources/upgradePatches.json"), NS).unwrap();
        assert_eq!(patches.removals_for(&Version::new(1, 3, 0)).count(), 2);
        assert_eq!(patches.removals_for(&Version::new(1, 14, 0)).count(), 0);

        // nothing the engine still ships may be removed on upgrade
        let oldest = Version::new(0, 0, 1);
        let shipped: Vec<String> = crate::operands::quickstart::hooks()
            .iter()
            .map(|h| h.name().to_string())
            .collect();
        assert!(patches
            .removals_for(&oldest)
            .all(|r| !(r.gvk.kind == "ConsoleQuickStart" && shipped.contains(&r.name))));

        let mut hc = hc_with_bandwidth("64Mi");
        assert!(patches.apply(&mut hc, &Version::new(1, 4, 0)).unwrap());
    }

    #[test]
    fn test_empty_range_never_matches() {
        let range = SemverRange::parse("").unwrap();
        assert!(!range.matches(&Version::new(0, 0, 1)));
        let range = SemverRange::parse("<1.0.0 || >=2.0.0").unwrap();
        assert!(range.matches(&Version::new(0, 9, 0)));
        assert!(range.matches(&Version::new(2, 1, 0)));
        assert!(!range.matches(&Version::new(1, 5, 0)));
    }

    #[test]
    fn test_validation_errors() {
        let outside_spec = json!({"hcoCRPatchList": [{
            "semverRange": "<1.0.0",
            "jsonPatch": [{"op": "add", "path": "/metadata/labels/a", "value": "b"}]
        }]});
        let err = UpgradePatches::parse(&outside_spec.to_string(), NS).unwrap_err();
        assert!(err.to_string().contains("can only modify spec fields"));

        let does_not_apply = json!({"hcoCRPatchList": [{
            "semverRange": "<1.0.0",
            "jsonPatch": [{"op": "replace", "path": "/spec/no/such/field", "value": 1}]
        }]});
        assert!(matches!(
            UpgradePatches::parse(&does_not_apply.to_string(), NS),
            Err(ControllerError::Validation(_))
        ));

        for (gvk, key, message) in [
            (json!({"version": "v1"}), json!({"name": "x"}), "missing object kind"),
            (json!({"kind": "ConfigMap"}), json!({"name": "x"}), "missing object API version"),
            (json!({"kind": "ConfigMap", "version": "v1"}), json!({}), "missing object name"),
        ] {
            let manifest = json!({"objectsToBeRemoved": [{
                "semverRange": "<1.0.0", "groupVersionKind": gvk, "objectKey": key
            }]});
            let err = UpgradePatches::parse(&manifest.to_string(), NS).unwrap_err();
            assert!(err.to_string().contains(message), "{err}");
        }
    }

    #[test]
    fn test_version_parsing_tolerates_prefix() {
        assert_eq!(parse_version("v1.14.0"), Some(Version::new(1, 14, 0)));
        assert_eq!(parse_version("1.4.99"), Some(Version::new(1, 4, 99)));
        assert_eq!(parse_version("garbage"), None);
    }
}
