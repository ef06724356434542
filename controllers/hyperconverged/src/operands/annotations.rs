//! JSON patch annotations
//!
//! Users can reach fields the HyperConverged API does not expose by
//! annotating the resource with an RFC 6902 patch for one of the operand
//! CRs. The patch is applied to the desired CR before the diff, so the
//! engine keeps the patched state rather than reverting it. Using any of
//! them taints the installation.

use crate::error::ControllerError;
use crate::jsonpatch::{self, PatchOptions};
use crds::HyperConverged;
use kube::api::DynamicObject;
use tracing::debug;

pub const KUBEVIRT: &str = "jsonpatch.hco.kubevirt.io/kv";
pub const CDI: &str = "jsonpatch.hco.kubevirt.io/cdi";
pub const CNAO: &str = "jsonpatch.hco.kubevirt.io/cnao";
pub const SSP: &str = "jsonpatch.hco.kubevirt.io/ssp";

pub const ALL: [&str; 4] = [KUBEVIRT, CDI, CNAO, SSP];

fn invalid(kind: &str, annotation: &str, cause: impl std::fmt::Display) -> ControllerError {
    ControllerError::operand_build(kind, format!("invalid jsonPatch in the {annotation} annotation: {cause}"))
}

/// Apply the patch carried by `annotation`, if any, to the desired object
pub fn apply(hc: &HyperConverged, annotation: &str, kind: &str, obj: &mut DynamicObject) -> Result<(), ControllerError> {
    let Some(raw) = hc.annotation(annotation) else {
        return Ok(());
    };
    let ops = jsonpatch::parse_operations(raw).map_err(|e| invalid(kind, annotation, e))?;
    jsonpatch::validate_spec_paths(&ops).map_err(|e| invalid(kind, annotation, e))?;
    match jsonpatch::apply(&obj.data, &ops, PatchOptions::default()).map_err(|e| invalid(kind, annotation, e))? {
        Some(patched) => {
            debug!("Applied {} operations from {} to {}", ops.len(), annotation, kind);
            obj.data = patched;
        }
        None => debug!("The test operation in {} did not match, patch skipped", annotation),
    }
    Ok(())
}

/// Number of operations in an annotation; a missing or malformed one counts
/// as zero
pub fn operation_count(hc: &HyperConverged, annotation: &str) -> usize {
    hc.annotation(annotation)
        .and_then(|raw| jsonpatch::parse_operations(raw).ok())
        .map_or(0, |ops| ops.len())
}

/// Whether any patch annotation is in use
pub fn tainted(hc: &HyperConverged) -> bool {
    ALL.iter().any(|a| operation_count(hc, a) > 0)
}
