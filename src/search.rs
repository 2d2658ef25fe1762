//! The allocation search: a depth-first branch-and-bound search over
//! layer-to-plane assignments, pruned by the kernel test-commit oracle and
//! by a cost heuristic.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use tracing::{trace, warn};

use crate::backend::{AtomicRequest, TestCommitResult};
use crate::config::DeadlineCheck;
use crate::materialize;
use crate::plane::{Plane, PlaneId, PlaneKind};
use crate::scene::LayerId;
use crate::Result;

/// A bonus added to a complete plan's score for using the primary plane,
/// nudging the search to prefer filling it over an equally-scored plan
/// that leaves it idle.
const PRIMARY_PLANE_BONUS: u64 = 1;

/// A complete or partial layer-to-plane assignment.
///
/// Planes and layers each appear at most once; this invariant is enforced
/// structurally by the search, never checked after the fact.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct Plan {
    assignments: BTreeMap<PlaneId, LayerId>,
}

impl Plan {
    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    #[must_use]
    pub(crate) fn plane_for_layer(&self, layer: LayerId) -> Option<PlaneId> {
        self.assignments
            .iter()
            .find_map(|(&plane, &l)| (l == layer).then_some(plane))
    }

    #[must_use]
    pub(crate) fn layer_for_plane(&self, plane: PlaneId) -> Option<LayerId> {
        self.assignments.get(&plane).copied()
    }

    /// Iterates assignments in plane-id ascending order, matching the
    /// deterministic materialisation order required by §5.
    pub(crate) fn assignments(&self) -> impl Iterator<Item = (PlaneId, LayerId)> + '_ {
        self.assignments.iter().map(|(&p, &l)| (p, l))
    }

    #[must_use]
    pub(crate) fn covers_same_layers(&self, layers: &[LayerId]) -> bool {
        let plan_layers: std::collections::HashSet<_> = self.assignments.values().copied().collect();
        let scene_layers: std::collections::HashSet<_> = layers.iter().copied().collect();
        plan_layers == scene_layers
    }
}

/// One non-no-op layer as seen by the search: its candidate plane set (as
/// computed by the [filter](crate::filter)), priority, stacking position,
/// and the pending properties to write if it lands on a plane.
#[derive(Debug)]
pub(crate) struct LayerCandidate<'a> {
    pub(crate) id: LayerId,
    pub(crate) priority: u32,
    pub(crate) stacking_index: usize,
    pub(crate) candidates: Vec<PlaneId>,
    pub(crate) properties: &'a HashMap<String, u64>,
}

fn plane_score(priority: u32) -> u64 {
    2_u64.saturating_pow(priority)
}

/// Orders planes the way the search explores them: primary first, then
/// overlays by descending `zpos` (falling back to ascending plane id when
/// `zpos` is mutable, so the order is still deterministic), then cursor.
#[must_use]
pub(crate) fn order_planes(planes: &[Plane]) -> Vec<&Plane> {
    let mut ordered: Vec<&Plane> = planes.iter().collect();
    ordered.sort_by_key(|plane| {
        let kind_rank = match plane.kind() {
            PlaneKind::Primary => 0,
            PlaneKind::Overlay => 1,
            PlaneKind::Cursor => 2,
        };
        let zpos_for_sort = plane
            .immutable_zpos()
            .or_else(|| plane.property("zpos").map(crate::property::PropertySchema::default));
        (kind_rank, Reverse(zpos_for_sort), plane.id())
    });
    ordered
}

struct SearchState<'a> {
    planes: &'a [&'a Plane],
    by_plane: HashMap<PlaneId, Vec<&'a LayerCandidate<'a>>>,
    best: Plan,
    best_score: u64,
    deadline: Option<&'a DeadlineCheck>,
    deadline_hit: bool,
}

/// Runs the branch-and-bound search to completion and returns the
/// highest-scoring plan that passed the oracle. A plan with no assignments
/// at all is always a valid (if worthless) fallback, so this never fails
/// outright; allocation failure is the caller observing an empty plan.
///
/// # Errors
///
/// Propagates a transport error from the oracle. The request is left
/// exactly as it was on entry either way: every tentative write the search
/// makes is truncated again before returning.
pub(crate) fn run(
    planes: &[&Plane],
    layers: &[LayerCandidate<'_>],
    crtc_value: u64,
    deadline: Option<&DeadlineCheck>,
    request: &mut dyn AtomicRequest,
) -> Result<Plan> {
    let mut by_plane: HashMap<PlaneId, Vec<&LayerCandidate<'_>>> = HashMap::new();
    for layer in layers {
        for &plane_id in &layer.candidates {
            by_plane.entry(plane_id).or_default().push(layer);
        }
    }
    for candidates in by_plane.values_mut() {
        candidates.sort_by_key(|l| Reverse(l.priority));
    }

    let mut state = SearchState {
        planes,
        by_plane,
        best: Plan::default(),
        best_score: 0,
        deadline,
        deadline_hit: false,
    };

    let mut assigned = std::collections::HashSet::new();
    let mut current = Plan::default();
    let mut zorder_ceiling = None;

    recurse(
        &mut state,
        0,
        &mut current,
        0,
        &mut assigned,
        &mut zorder_ceiling,
        crtc_value,
        request,
    )?;

    if state.deadline_hit {
        warn!("Search stopped early by deadline hook; returning best plan found so far.");
    }
    trace!(score = state.best_score, "Search finished.");
    Ok(state.best)
}

#[allow(clippy::too_many_arguments)]
fn recurse(
    state: &mut SearchState<'_>,
    plane_idx: usize,
    current: &mut Plan,
    current_score: u64,
    assigned: &mut std::collections::HashSet<LayerId>,
    zorder_ceiling: &mut Option<usize>,
    crtc_value: u64,
    request: &mut dyn AtomicRequest,
) -> Result<()> {
    if plane_idx == state.planes.len() {
        if current_score > state.best_score {
            state.best_score = current_score;
            state.best = current.clone();
        }
        return Ok(());
    }

    if state.deadline.is_some_and(|check| check()) {
        state.deadline_hit = true;
        if current_score > state.best_score {
            state.best_score = current_score;
            state.best = current.clone();
        }
        return Ok(());
    }

    if current_score + upper_bound(state, plane_idx, assigned) <= state.best_score {
        return Ok(());
    }

    let plane = state.planes[plane_idx];
    let immutable_zpos = plane.immutable_zpos();

    if let Some(candidates) = state.by_plane.get(&plane.id()) {
        let candidates: Vec<_> = candidates.clone();
        for candidate in candidates {
            if assigned.contains(&candidate.id) {
                continue;
            }
            if immutable_zpos.is_some() {
                if let Some(ceiling) = *zorder_ceiling {
                    if candidate.stacking_index >= ceiling {
                        continue;
                    }
                }
            }

            let checkpoint = request.snapshot_cursor();
            materialize::stage_assignment(plane, crtc_value, candidate.properties, request);

            let outcome = request.test_commit().map_err(crate::Error::Oracle);
            let accepted = match outcome {
                Ok(TestCommitResult::Accepted) => true,
                Ok(TestCommitResult::Rejected) => false,
                Err(e) => {
                    request.truncate(checkpoint);
                    return Err(e);
                }
            };

            if accepted {
                assigned.insert(candidate.id);
                current.assignments.insert(plane.id(), candidate.id);
                let prior_ceiling = *zorder_ceiling;
                if immutable_zpos.is_some() {
                    *zorder_ceiling = Some(candidate.stacking_index);
                }

                recurse(
                    state,
                    plane_idx + 1,
                    current,
                    current_score + plane_score(candidate.priority) + primary_bonus(plane),
                    assigned,
                    zorder_ceiling,
                    crtc_value,
                    request,
                )?;

                *zorder_ceiling = prior_ceiling;
                current.assignments.remove(&plane.id());
                assigned.remove(&candidate.id);
            } else {
                warn!(
                    plane = plane.id(),
                    layer = ?candidate.id,
                    "Oracle rejected a candidate the filter had allowed."
                );
            }

            request.truncate(checkpoint);
        }
    }

    recurse(
        state,
        plane_idx + 1,
        current,
        current_score,
        assigned,
        zorder_ceiling,
        crtc_value,
        request,
    )
}

fn primary_bonus(plane: &Plane) -> u64 {
    if matches!(plane.kind(), PlaneKind::Primary) {
        PRIMARY_PLANE_BONUS
    } else {
        0
    }
}

fn upper_bound(
    state: &SearchState<'_>,
    from_plane_idx: usize,
    assigned: &std::collections::HashSet<LayerId>,
) -> u64 {
    state.planes[from_plane_idx..]
        .iter()
        .map(|plane| {
            state
                .by_plane
                .get(&plane.id())
                .into_iter()
                .flatten()
                .filter(|l| !assigned.contains(&l.id))
                .map(|l| plane_score(l.priority) + primary_bonus(plane))
                .max()
                .unwrap_or(0)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{order_planes, Plan};
    use crate::plane::{Plane, PlaneKind};
    use crate::property::{PropertyRange, PropertySchema};

    #[test]
    fn test_order_planes_primary_first() {
        let overlay = Plane::new(1, PlaneKind::Overlay, 1, HashMap::new(), None);
        let primary = Plane::new(0, PlaneKind::Primary, 1, HashMap::new(), None);
        let cursor = Plane::new(2, PlaneKind::Cursor, 1, HashMap::new(), None);

        let planes = vec![overlay, cursor, primary];
        let ordered = order_planes(&planes);

        assert_eq!(ordered[0].kind(), PlaneKind::Primary);
        assert_eq!(ordered[2].kind(), PlaneKind::Cursor);
    }

    #[test]
    fn test_order_overlays_by_descending_zpos() {
        let mut low = HashMap::new();
        low.insert(
            "zpos".to_owned(),
            PropertySchema::new(1, "zpos", false, 1, PropertyRange::Unrestricted),
        );
        let mut high = HashMap::new();
        high.insert(
            "zpos".to_owned(),
            PropertySchema::new(1, "zpos", false, 2, PropertyRange::Unrestricted),
        );

        let plane_low = Plane::new(0, PlaneKind::Overlay, 1, low, None);
        let plane_high = Plane::new(1, PlaneKind::Overlay, 1, high, None);

        let planes = vec![plane_low, plane_high];
        let ordered = order_planes(&planes);

        assert_eq!(ordered[0].id(), 1);
        assert_eq!(ordered[1].id(), 0);
    }

    #[test]
    fn test_empty_plan_covers_nothing() {
        let plan = Plan::default();
        assert!(plan.is_empty());
        assert!(plan.covers_same_layers(&[]));
    }
}
