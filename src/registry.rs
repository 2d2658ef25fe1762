//! Enumerates planes from a [`DeviceBackend`] and caches their schema.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::backend::DeviceBackend;
use crate::plane::Plane;
use crate::Result;

/// Enumerates every plane the device exposes and caches its immutable
/// description: property schema, pipe mask, and `IN_FORMATS` set.
///
/// Planes not usable by any output (an empty `possible_crtcs` mask) are
/// skipped; a caller never sees them, since no output could ever assign a
/// layer to one.
///
/// # Errors
///
/// Propagates any enumeration failure from the backend. The device handle
/// this is called for should be considered unusable afterwards.
pub(crate) fn register_all_planes(backend: &dyn DeviceBackend) -> Result<Vec<Plane>> {
    debug!("Enumerating planes.");

    let descriptors = backend.enumerate_planes()?;

    let mut planes = Vec::with_capacity(descriptors.len());
    for desc in descriptors {
        if desc.possible_crtcs == 0 {
            trace!(plane_id = desc.id, "Skipping plane usable by no output.");
            continue;
        }

        let in_formats = desc
            .in_formats
            .map(|formats| formats.into_iter().collect::<HashSet<_>>());

        trace!(
            plane_id = desc.id,
            kind = ?desc.kind,
            properties = desc.properties.len(),
            "Registered plane."
        );

        planes.push(Plane::new(
            desc.id,
            desc.kind,
            desc.possible_crtcs,
            desc.properties,
            in_formats,
        ));
    }

    Ok(planes)
}
