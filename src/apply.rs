//! Ties the [registry](crate::registry), [filter](crate::filter),
//! [search](crate::search) and [materialiser](crate::materialize) together
//! into the single operation a compositor actually calls: "make this
//! output's layer stack match hardware as closely as possible".

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::backend::{AtomicRequest, TestCommitResult};
use crate::config::AllocatorConfig;
use crate::filter;
use crate::materialize;
use crate::plane::Plane;
use crate::scene::{Device, LayerId, Output};
use crate::search::{self, LayerCandidate};
use crate::Result;

/// A summary of one [`Output::apply`] call.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Outcome {
    /// How many layers landed on a hardware plane.
    pub assigned: usize,
    /// How many layers did not, and must be composited by the GPU instead.
    pub needs_composition: usize,
}

/// Ranks layers by stacking position: ascending `zpos` property value where
/// set, creation order as a tiebreak and fallback. Returns the rank for
/// each input index.
fn stacking_order(layers: &[&PendingLayer]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..layers.len()).collect();
    order.sort_by_key(|&i| {
        (
            layers[i].properties.get("zpos").copied().unwrap_or(i as u64),
            i,
        )
    });
    let mut rank = vec![0usize; layers.len()];
    for (position, &original_index) in order.iter().enumerate() {
        rank[original_index] = position;
    }
    rank
}

struct PendingLayer {
    id: LayerId,
    properties: HashMap<String, u64>,
    priority: u32,
    candidate_hint: Option<std::collections::HashSet<crate::plane::PlaneId>>,
}

impl Output {
    /// Allocates hardware planes for this output's current layer stack and
    /// writes the result onto `request`.
    ///
    /// Every non-empty-framebuffer, non-fully-transparent layer is a
    /// candidate for a plane; layers that lose out are left for the caller
    /// to composite with the GPU, reported via
    /// [`Layer::needs_composition`](crate::scene::Layer::needs_composition).
    ///
    /// With [`AllocatorConfig::with_incremental_reuse`], the previous
    /// successful plan is re-tested first; if the oracle still accepts it
    /// unchanged, the full search is skipped entirely.
    ///
    /// # Errors
    ///
    /// Propagates a transport error from the test-commit oracle. On success
    /// (even a partial one, with some layers left needing composition),
    /// `request` holds every property write the winning plan requires.
    /// On total allocation failure, `request` is left untouched.
    pub fn apply(&self, request: &mut dyn AtomicRequest, config: &AllocatorConfig) -> Result<Outcome> {
        let inner_rc = self
            .dev
            .upgrade()
            .expect("device dropped while an output handle is still alive");

        let (crtc_index, pending) = {
            let inner = inner_rc.borrow();
            let output = inner.output(self.id)?;
            let crtc_index = output.crtc_index;
            let mut pending = Vec::with_capacity(output.layers.len());
            for &layer_id in &output.layers {
                let slot = inner.layer(layer_id)?;
                pending.push(PendingLayer {
                    id: layer_id,
                    properties: slot.properties.clone(),
                    priority: slot.priority,
                    candidate_hint: slot.candidate_hint.clone(),
                });
            }
            (crtc_index, pending)
        };

        let crtc_value = u64::from(crtc_index);
        let properties_by_layer: HashMap<LayerId, HashMap<String, u64>> = pending
            .iter()
            .map(|l| (l.id, l.properties.clone()))
            .collect();

        let non_noop: Vec<&PendingLayer> = pending
            .iter()
            .filter(|l| !filter::is_noop(&l.properties))
            .collect();
        let non_noop_ids: Vec<LayerId> = non_noop.iter().map(|l| l.id).collect();

        let plan = {
            let inner = inner_rc.borrow();
            let backend = inner.backend();
            let all_planes: &[Plane] = &inner.planes;

            let mut candidates = HashMap::new();
            for layer in &non_noop {
                let set = filter::candidate_planes(
                    all_planes,
                    crtc_index,
                    &layer.properties,
                    layer.candidate_hint.as_ref(),
                    backend,
                );
                candidates.insert(layer.id, set);
            }

            let mut reachable: Vec<&Plane> =
                all_planes.iter().filter(|p| p.drives_pipe(crtc_index)).collect();
            reachable.sort_by_key(|p| p.id());

            // Stacking order is the layer's `zpos` property when the caller
            // has set one, falling back to creation order otherwise, so a
            // compositor can re-stack layers without an explicit reorder
            // call.
            let stacking_index = stacking_order(&non_noop);

            let layer_candidates: Vec<LayerCandidate<'_>> = non_noop
                .iter()
                .enumerate()
                .map(|(i, layer)| LayerCandidate {
                    id: layer.id,
                    priority: layer.priority,
                    stacking_index: stacking_index[i],
                    candidates: candidates.remove(&layer.id).unwrap_or_default(),
                    properties: &layer.properties,
                })
                .collect();

            let reused = if config.incremental_reuse() {
                try_reuse(
                    &inner.output(self.id)?.last_plan,
                    &non_noop_ids,
                    crtc_value,
                    &reachable,
                    &properties_by_layer,
                    request,
                )
            } else {
                None
            };

            match reused {
                Some(plan) => plan,
                None => {
                    let ordered_planes = search::order_planes(all_planes);
                    search::run(
                        &ordered_planes,
                        &layer_candidates,
                        crtc_value,
                        config.deadline(),
                        request,
                    )?
                }
            }
        };

        if !plan.is_empty() {
            let inner = inner_rc.borrow();
            let mut reachable: Vec<&Plane> = inner
                .planes
                .iter()
                .filter(|p| p.drives_pipe(crtc_index))
                .collect();
            reachable.sort_by_key(|p| p.id());
            materialize::stage(&plan, crtc_value, &reachable, |id| {
                properties_by_layer.get(&id).cloned().unwrap_or_default()
            }, request);
        }

        let assigned = plan.assignments().count();
        let needs_composition = non_noop_ids.len() - assigned;

        {
            let mut inner = inner_rc.borrow_mut();
            for &layer_id in &non_noop_ids {
                if let Ok(slot) = inner.layer_mut(layer_id) {
                    slot.assigned_plane = plan.plane_for_layer(layer_id);
                }
            }
            if let Ok(output) = inner.output_mut(self.id) {
                output.last_plan = Some(plan);
            }
        }

        debug!(assigned, needs_composition, "Output applied.");
        Ok(Outcome {
            assigned,
            needs_composition,
        })
    }
}

impl Device {
    /// Applies every still-live output on this device against the same
    /// `request`, in creation order, and returns the combined tally.
    ///
    /// # Errors
    ///
    /// Stops and propagates at the first output whose oracle call fails;
    /// outputs already applied before that point keep their writes on
    /// `request`.
    pub fn apply_all(&self, request: &mut dyn AtomicRequest, config: &AllocatorConfig) -> Result<Outcome> {
        let mut total = Outcome::default();
        for output in self.live_outputs() {
            let outcome = output.apply(request, config)?;
            total.assigned += outcome.assigned;
            total.needs_composition += outcome.needs_composition;
        }
        Ok(total)
    }
}

/// Re-tests a previously accepted plan unchanged; returns it if the oracle
/// still accepts it, otherwise leaves `request` exactly as it found it.
fn try_reuse(
    last_plan: &Option<search::Plan>,
    current_layers: &[LayerId],
    crtc_value: u64,
    reachable: &[&Plane],
    properties_by_layer: &HashMap<LayerId, HashMap<String, u64>>,
    request: &mut dyn AtomicRequest,
) -> Option<search::Plan> {
    let last = last_plan.as_ref()?;
    if !last.covers_same_layers(current_layers) {
        return None;
    }

    let checkpoint = request.snapshot_cursor();
    materialize::stage(last, crtc_value, reachable, |id| {
        properties_by_layer.get(&id).cloned().unwrap_or_default()
    }, request);

    let accepted = matches!(request.test_commit(), Ok(TestCommitResult::Accepted));
    request.truncate(checkpoint);

    if accepted {
        trace!("Reused previous plan without running a full search.");
        Some(last.clone())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::backend::{FramebufferInfo, PlaneDescriptor};
    use crate::format::{Format, FormatModifier, Modifier};
    use crate::mock::{MockBackend, MockRequest};
    use crate::plane::PlaneKind;
    use crate::property::PropertyRange;

    fn full_properties(next_id: &mut u32, zpos: Option<(bool, u64)>) -> crate::property::PropertyMap {
        let mut id = move || {
            *next_id += 1;
            *next_id
        };
        let mut props = HashMap::new();
        for name in [
            "CRTC_ID", "FB_ID", "CRTC_X", "CRTC_Y", "CRTC_W", "CRTC_H", "SRC_X", "SRC_Y", "SRC_W",
            "SRC_H",
        ] {
            props.insert(
                name.to_owned(),
                crate::property::PropertySchema::new(id(), name, true, 0, PropertyRange::Unrestricted),
            );
        }
        props.insert(
            "alpha".to_owned(),
            crate::property::PropertySchema::new(id(), "alpha", true, 0xFFFF, PropertyRange::Unrestricted),
        );
        props.insert(
            "rotation".to_owned(),
            crate::property::PropertySchema::new(id(), "rotation", true, 0, PropertyRange::Unrestricted),
        );
        if let Some((mutable, default)) = zpos {
            props.insert(
                "zpos".to_owned(),
                crate::property::PropertySchema::new(id(), "zpos", mutable, default, PropertyRange::Unrestricted),
            );
        }
        props
    }

    fn geometry(layer: &crate::scene::Layer) {
        layer.set_property("CRTC_X", 0);
        layer.set_property("CRTC_Y", 0);
        layer.set_property("CRTC_W", 1920);
        layer.set_property("CRTC_H", 1080);
        layer.set_property("SRC_X", 0);
        layer.set_property("SRC_Y", 0);
        layer.set_property("SRC_W", 1920);
        layer.set_property("SRC_H", 1080);
    }

    fn linear_argb_fb() -> FramebufferInfo {
        FramebufferInfo {
            format: FormatModifier::new(Format::ARGB8888, Modifier::LINEAR),
            width: 1920,
            height: 1080,
        }
    }

    #[test]
    fn test_primary_match() {
        let mut next_id = 0;
        let backend = MockBackend::new(vec![PlaneDescriptor {
            id: 0,
            kind: PlaneKind::Primary,
            possible_crtcs: 1,
            properties: full_properties(&mut next_id, None),
            in_formats: None,
        }])
        .with_framebuffer(1, linear_argb_fb());

        let device = Device::new(backend);
        device.register_all_planes().unwrap();
        let output = device.create_output(0);
        let layer = output.create_layer();
        layer.set_property("FB_ID", 1);
        geometry(&layer);

        let backend_ref = MockBackend::new(vec![]);
        let mut request = MockRequest::new(&backend_ref);
        let outcome = output.apply(&mut request, &AllocatorConfig::new()).unwrap();

        assert_eq!(outcome.assigned, 1);
        assert_eq!(layer.plane_id(), Some(0));
        assert!(!layer.needs_composition());
    }

    #[test]
    fn test_primary_nomatch_leaves_request_untouched() {
        let mut next_id = 0;
        let backend = MockBackend::new(vec![PlaneDescriptor {
            id: 0,
            kind: PlaneKind::Primary,
            possible_crtcs: 1,
            properties: full_properties(&mut next_id, None),
            in_formats: None,
        }])
        .with_framebuffer(1, linear_argb_fb());

        let device = Device::new(backend);
        device.register_all_planes().unwrap();
        let output = device.create_output(0);
        let layer = output.create_layer();
        layer.set_property("FB_ID", 1);
        geometry(&layer);
        layer.set_candidate_hint(std::iter::empty());

        let backend_ref = MockBackend::new(vec![]);
        let mut request = MockRequest::new(&backend_ref);
        let before = request.writes().to_vec();
        let outcome = output.apply(&mut request, &AllocatorConfig::new()).unwrap();

        assert_eq!(outcome.assigned, 0);
        assert_eq!(layer.plane_id(), None);
        assert!(layer.needs_composition());
        assert_eq!(request.writes(), before.as_slice());
    }

    #[test]
    fn test_ignore_alpha_is_noop() {
        let mut next_id = 0;
        let backend = MockBackend::new(vec![PlaneDescriptor {
            id: 0,
            kind: PlaneKind::Primary,
            possible_crtcs: 1,
            properties: full_properties(&mut next_id, None),
            in_formats: None,
        }]);

        let device = Device::new(backend);
        device.register_all_planes().unwrap();
        let output = device.create_output(0);
        let layer = output.create_layer();
        layer.set_property("FB_ID", 1);
        layer.set_property("alpha", 0);

        let backend_ref = MockBackend::new(vec![]);
        let mut request = MockRequest::new(&backend_ref);
        let outcome = output.apply(&mut request, &AllocatorConfig::new()).unwrap();

        assert_eq!(outcome.assigned, 0);
        assert_eq!(layer.plane_id(), None);
        assert!(!layer.needs_composition());
    }

    #[test]
    fn test_immutable_zpos_respects_stacking() {
        let mut next_id = 0;
        let backend = MockBackend::new(vec![
            PlaneDescriptor {
                id: 0,
                kind: PlaneKind::Overlay,
                possible_crtcs: 1,
                properties: full_properties(&mut next_id, Some((false, 1))),
                in_formats: None,
            },
            PlaneDescriptor {
                id: 1,
                kind: PlaneKind::Overlay,
                possible_crtcs: 1,
                properties: full_properties(&mut next_id, Some((false, 2))),
                in_formats: None,
            },
        ])
        .with_framebuffer(1, linear_argb_fb());

        let device = Device::new(backend);
        device.register_all_planes().unwrap();
        let output = device.create_output(0);
        let layer1 = output.create_layer();
        layer1.set_property("FB_ID", 1);
        layer1.set_property("zpos", 42);
        let layer2 = output.create_layer();
        layer2.set_property("FB_ID", 1);
        layer2.set_property("zpos", 43);

        let backend_ref = MockBackend::new(vec![]);
        let mut request = MockRequest::new(&backend_ref);
        output.apply(&mut request, &AllocatorConfig::new()).unwrap();

        assert_eq!(layer1.plane_id(), Some(0));
        assert_eq!(layer2.plane_id(), Some(1));

        layer1.set_property("zpos", 43);
        layer2.set_property("zpos", 42);
        let mut request = MockRequest::new(&backend_ref);
        output.apply(&mut request, &AllocatorConfig::new()).unwrap();

        assert_eq!(layer1.plane_id(), Some(1));
        assert_eq!(layer2.plane_id(), Some(0));
    }

    #[test]
    fn test_unknown_property_blocks_until_unset() {
        let mut next_id = 0;
        let backend = MockBackend::new(vec![PlaneDescriptor {
            id: 0,
            kind: PlaneKind::Primary,
            possible_crtcs: 1,
            properties: full_properties(&mut next_id, None),
            in_formats: None,
        }])
        .with_framebuffer(1, linear_argb_fb());

        let device = Device::new(backend);
        device.register_all_planes().unwrap();
        let output = device.create_output(0);
        let layer = output.create_layer();
        layer.set_property("FB_ID", 1);
        layer.set_property("alpha", 0xFFFF);
        layer.set_property("asdf", 0);

        let backend_ref = MockBackend::new(vec![]);
        let mut request = MockRequest::new(&backend_ref);
        output.apply(&mut request, &AllocatorConfig::new()).unwrap();
        assert_eq!(layer.plane_id(), None);

        layer.unset_property("asdf");
        let mut request = MockRequest::new(&backend_ref);
        output.apply(&mut request, &AllocatorConfig::new()).unwrap();
        assert_eq!(layer.plane_id(), Some(0));
    }

    #[test]
    fn test_in_formats_restricts_modifier() {
        let mut next_id = 0;
        let backend = MockBackend::new(vec![PlaneDescriptor {
            id: 0,
            kind: PlaneKind::Primary,
            possible_crtcs: 1,
            properties: full_properties(&mut next_id, None),
            in_formats: Some(vec![FormatModifier::new(Format::ARGB8888, Modifier::LINEAR)]),
        }])
        .with_framebuffer(
            1,
            FramebufferInfo {
                format: FormatModifier::new(Format::ARGB8888, Modifier(999)),
                width: 1920,
                height: 1080,
            },
        )
        .with_framebuffer(2, linear_argb_fb());

        let device = Device::new(backend);
        device.register_all_planes().unwrap();
        let output = device.create_output(0);
        let layer = output.create_layer();
        layer.set_property("FB_ID", 1);

        let backend_ref = MockBackend::new(vec![]);
        let mut request = MockRequest::new(&backend_ref);
        output.apply(&mut request, &AllocatorConfig::new()).unwrap();
        assert_eq!(layer.plane_id(), None);

        layer.set_property("FB_ID", 2);
        let mut request = MockRequest::new(&backend_ref);
        output.apply(&mut request, &AllocatorConfig::new()).unwrap();
        assert_eq!(layer.plane_id(), Some(0));
    }

    #[test]
    fn test_incremental_reuse_skips_search_when_scene_unchanged() {
        let mut next_id = 0;
        let backend = MockBackend::new(vec![PlaneDescriptor {
            id: 0,
            kind: PlaneKind::Primary,
            possible_crtcs: 1,
            properties: full_properties(&mut next_id, None),
            in_formats: None,
        }])
        .with_framebuffer(1, linear_argb_fb());

        let device = Device::new(backend);
        device.register_all_planes().unwrap();
        let output = device.create_output(0);
        let layer = output.create_layer();
        layer.set_property("FB_ID", 1);
        geometry(&layer);

        let backend_ref = MockBackend::new(vec![]);
        let config = AllocatorConfig::new().with_incremental_reuse(true);

        let mut request = MockRequest::new(&backend_ref);
        output.apply(&mut request, &config).unwrap();
        assert_eq!(layer.plane_id(), Some(0));

        let mut request = MockRequest::new(&backend_ref);
        let outcome = output.apply(&mut request, &config).unwrap();
        assert_eq!(outcome.assigned, 1);
        assert_eq!(layer.plane_id(), Some(0));
    }

    #[test]
    fn test_incremental_reuse_runs_full_search_when_layer_set_grows() {
        let mut next_id = 0;
        let backend = MockBackend::new(vec![
            PlaneDescriptor {
                id: 0,
                kind: PlaneKind::Primary,
                possible_crtcs: 1,
                properties: full_properties(&mut next_id, None),
                in_formats: None,
            },
            PlaneDescriptor {
                id: 1,
                kind: PlaneKind::Overlay,
                possible_crtcs: 1,
                properties: full_properties(&mut next_id, None),
                in_formats: None,
            },
        ])
        .with_framebuffer(1, linear_argb_fb());

        let device = Device::new(backend);
        device.register_all_planes().unwrap();
        let output = device.create_output(0);
        let layer1 = output.create_layer();
        layer1.set_property("FB_ID", 1);
        geometry(&layer1);

        let backend_ref = MockBackend::new(vec![]);
        let config = AllocatorConfig::new().with_incremental_reuse(true);

        let mut request = MockRequest::new(&backend_ref);
        output.apply(&mut request, &config).unwrap();
        assert_eq!(layer1.plane_id(), Some(0));

        // A second, non-no-op layer appears without touching the first:
        // the stale single-layer plan must not be reused verbatim, or
        // this new layer would be stuck needing composition forever even
        // though a free plane exists for it.
        let layer2 = output.create_layer();
        layer2.set_property("FB_ID", 1);
        geometry(&layer2);

        let mut request = MockRequest::new(&backend_ref);
        let outcome = output.apply(&mut request, &config).unwrap();

        assert_eq!(outcome.assigned, 2);
        assert_eq!(layer1.plane_id(), Some(0));
        assert_eq!(layer2.plane_id(), Some(1));
    }
}
