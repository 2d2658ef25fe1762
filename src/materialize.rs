//! Writes a chosen assignment as property writes onto an atomic request,
//! and, during search exploration, undoes them again on backtrack.

use std::collections::HashMap;

use tracing::trace;

use crate::backend::AtomicRequest;
use crate::plane::Plane;
use crate::property::PropertyId;
use crate::scene::LayerId;
use crate::search::Plan;

/// Stages one tentative (plane, layer) write during search exploration:
/// `CRTC_ID` plus every mutable property the layer has set that this plane
/// recognises, in property-id ascending order. The caller truncates the
/// request back to a checkpoint taken before this call if the branch is
/// abandoned.
pub(crate) fn stage_assignment(
    plane: &Plane,
    crtc_value: u64,
    properties: &HashMap<String, u64>,
    request: &mut dyn AtomicRequest,
) {
    write_plane_properties(plane, crtc_value, properties, request);
}

/// Writes the final, accepted plan onto `request`: every assigned plane
/// gets its layer's properties, every other plane reachable from the
/// output is explicitly detached (`CRTC_ID` = 0), so a plane this output
/// used last frame but not this one is cleanly released.
///
/// Properties are written in plane-id ascending, then property-id
/// ascending order (`reachable_planes` must already be plane-id
/// ascending), so that test-commit rejections are reproducible for a given
/// input, per the ordering guarantee in §5.
pub(crate) fn stage(
    plan: &Plan,
    crtc_value: u64,
    reachable_planes: &[&Plane],
    layer_properties: impl Fn(LayerId) -> HashMap<String, u64>,
    request: &mut dyn AtomicRequest,
) {
    for plane in reachable_planes {
        if let Some(layer_id) = plan.layer_for_plane(plane.id()) {
            trace!(plane = plane.id(), layer = ?layer_id, "Materialising assignment.");
            write_plane_properties(plane, crtc_value, &layer_properties(layer_id), request);
        } else {
            detach(plane, request);
        }
    }
}

fn write_plane_properties(
    plane: &Plane,
    crtc_value: u64,
    properties: &HashMap<String, u64>,
    request: &mut dyn AtomicRequest,
) {
    let mut writes: Vec<(PropertyId, u64)> = Vec::new();

    if let Some(crtc_id) = plane.property("CRTC_ID") {
        writes.push((crtc_id.id(), crtc_value));
    }

    for (name, &value) in properties {
        if name == "CRTC_ID" {
            continue;
        }
        let Some(schema) = plane.property(name) else {
            continue;
        };
        if !schema.is_mutable() {
            continue;
        }
        writes.push((schema.id(), value));
    }

    writes.sort_unstable_by_key(|&(id, _)| id);
    for (id, value) in writes {
        let _cursor = request.append(plane.id(), id, value);
    }
}

/// Detaches a plane from its output by zeroing `CRTC_ID`, leaving every
/// other property untouched.
fn detach(plane: &Plane, request: &mut dyn AtomicRequest) {
    if let Some(crtc_id) = plane.property("CRTC_ID") {
        trace!(plane = plane.id(), "Detaching unused plane.");
        let _cursor = request.append(plane.id(), crtc_id.id(), 0);
    }
}
