//! Cheaply rejects (layer, plane) pairs that cannot possibly work, before
//! ever consulting the kernel test-commit oracle.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::backend::DeviceBackend;
use crate::format::FormatModifier;
use crate::plane::{Plane, PlaneId};

/// The conventional "no constraint" value for a handful of named
/// properties the core interprets specially, even on a plane that doesn't
/// expose them. A layer setting one of these to its conventional default
/// is equivalent to not having set it at all, from a candidate plane's
/// point of view.
fn conventional_default(name: &str) -> Option<u64> {
    match name {
        "alpha" => Some(ALPHA_OPAQUE),
        "rotation" => Some(ROTATE_0),
        _ => None,
    }
}

/// Fully opaque, the default value of the `alpha` property.
pub const ALPHA_OPAQUE: u64 = 0xFFFF;
/// No rotation, the default value of the `rotation` property.
pub const ROTATE_0: u64 = 0;

/// Returns whether a layer with these pending properties contributes
/// nothing to the final image: no framebuffer, or fully transparent.
///
/// No-op layers never enter the allocation search; they are reported as
/// not needing composition without ever touching a plane.
#[must_use]
pub(crate) fn is_noop(properties: &HashMap<String, u64>) -> bool {
    let fb_is_zero = properties.get("FB_ID").copied().unwrap_or(0) == 0;
    let fully_transparent = properties.get("alpha").copied() == Some(0);
    fb_is_zero || fully_transparent
}

/// Computes the candidate plane set for one layer: every plane this layer
/// could conceivably be assigned to, before the search or the oracle get
/// involved.
#[must_use]
pub(crate) fn candidate_planes(
    planes: &[Plane],
    crtc_index: u32,
    properties: &HashMap<String, u64>,
    candidate_hint: Option<&HashSet<PlaneId>>,
    backend: &dyn DeviceBackend,
) -> Vec<PlaneId> {
    planes
        .iter()
        .filter(|plane| is_candidate(plane, crtc_index, properties, candidate_hint, backend))
        .map(Plane::id)
        .collect()
}

fn is_candidate(
    plane: &Plane,
    crtc_index: u32,
    properties: &HashMap<String, u64>,
    candidate_hint: Option<&HashSet<PlaneId>>,
    backend: &dyn DeviceBackend,
) -> bool {
    if !plane.drives_pipe(crtc_index) {
        return false;
    }

    if let Some(hint) = candidate_hint {
        if !hint.contains(&plane.id()) {
            trace!(plane = plane.id(), "Rejected: outside candidate hint.");
            return false;
        }
    }

    for (name, &value) in properties {
        if plane.property(name).is_some() {
            continue;
        }

        if name == "zpos" {
            // Purely a stacking-order hint (see apply::stacking_order); a
            // plane with no zpos property imposes no constraint on it.
            continue;
        }

        match conventional_default(name) {
            Some(default) if value == default => {}
            _ => {
                trace!(
                    plane = plane.id(),
                    name,
                    "Rejected: property unknown to plane."
                );
                return false;
            }
        }
    }

    if !fb_format_fits(plane, properties, backend) {
        trace!(plane = plane.id(), "Rejected: format/modifier mismatch.");
        return false;
    }

    true
}

fn fb_format_fits(
    plane: &Plane,
    properties: &HashMap<String, u64>,
    backend: &dyn DeviceBackend,
) -> bool {
    let Some(&fb_id) = properties.get("FB_ID") else {
        return true;
    };
    if fb_id == 0 {
        return true;
    }

    let Some(info) = backend.read_framebuffer_info(fb_id) else {
        return false;
    };

    plane.accepts_format(FormatModifier::new(info.format.format, info.format.modifier))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{is_candidate, is_noop, ALPHA_OPAQUE};
    use crate::mock::MockBackend;
    use crate::plane::{Plane, PlaneKind};
    use crate::property::{PropertyRange, PropertySchema};

    #[test]
    fn test_is_noop_zero_fb() {
        let mut props = HashMap::new();
        props.insert("FB_ID".to_owned(), 0);
        assert!(is_noop(&props));
    }

    #[test]
    fn test_is_noop_transparent() {
        let mut props = HashMap::new();
        props.insert("FB_ID".to_owned(), 42);
        props.insert("alpha".to_owned(), 0);
        assert!(is_noop(&props));
    }

    #[test]
    fn test_is_not_noop() {
        let mut props = HashMap::new();
        props.insert("FB_ID".to_owned(), 42);
        props.insert("alpha".to_owned(), ALPHA_OPAQUE);
        assert!(!is_noop(&props));
    }

    #[test]
    fn test_no_fb_id_is_noop() {
        let props = HashMap::new();
        assert!(is_noop(&props));
    }

    #[test]
    fn test_zpos_stacking_hint_does_not_block_candidacy() {
        let mut schema = HashMap::new();
        schema.insert(
            "FB_ID".to_owned(),
            PropertySchema::new(1, "FB_ID", true, 0, PropertyRange::Unrestricted),
        );
        let plane = Plane::new(0, PlaneKind::Primary, 1, schema, None);

        let mut properties = HashMap::new();
        properties.insert("FB_ID".to_owned(), 0);
        properties.insert("zpos".to_owned(), 5);

        let backend = MockBackend::new(Vec::new());
        assert!(is_candidate(&plane, 0, &properties, None, &backend));
    }
}
