//! The compositor-supplied scene description: outputs, their ordered
//! layers, and each layer's pending property values.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::backend::DeviceBackend;
use crate::error::Error;
use crate::plane::{Plane, PlaneId};
use crate::registry;
use crate::search::Plan;
use crate::Result;

/// Opaque id of an [Output] inside its owning [Device].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct OutputId(usize);

/// Opaque id of a [Layer] inside its owning [Output].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct LayerId(usize);

#[derive(Debug)]
pub(crate) struct LayerSlot {
    pub(crate) properties: HashMap<String, u64>,
    pub(crate) priority: u32,
    pub(crate) assigned_plane: Option<PlaneId>,
    pub(crate) candidate_hint: Option<HashSet<PlaneId>>,
}

impl LayerSlot {
    fn new() -> Self {
        Self {
            properties: HashMap::new(),
            priority: 0,
            assigned_plane: None,
            candidate_hint: None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct OutputSlot {
    pub(crate) crtc_index: u32,
    /// Stacking order, front-to-back: index 0 is the bottommost layer.
    pub(crate) layers: Vec<LayerId>,
    pub(crate) last_plan: Option<Plan>,
}

#[derive(Debug)]
pub(crate) struct DeviceInner {
    backend: Box<dyn DeviceBackend>,
    pub(crate) planes: Vec<Plane>,
    pub(crate) outputs: Vec<Option<OutputSlot>>,
    pub(crate) layers: Vec<Option<LayerSlot>>,
}

impl DeviceInner {
    pub(crate) fn backend(&self) -> &dyn DeviceBackend {
        self.backend.as_ref()
    }

    pub(crate) fn output(&self, id: OutputId) -> Result<&OutputSlot> {
        self.outputs
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::InvalidArgument("output no longer exists".to_owned()))
    }

    pub(crate) fn output_mut(&mut self, id: OutputId) -> Result<&mut OutputSlot> {
        self.outputs
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::InvalidArgument("output no longer exists".to_owned()))
    }

    pub(crate) fn layer(&self, id: LayerId) -> Result<&LayerSlot> {
        self.layers
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::InvalidArgument("layer no longer exists".to_owned()))
    }

    pub(crate) fn layer_mut(&mut self, id: LayerId) -> Result<&mut LayerSlot> {
        self.layers
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::InvalidArgument("layer no longer exists".to_owned()))
    }
}

/// The top-level handle to a display device: owns the [`Plane`] catalogue,
/// every [`Output`] created from it, and every [`Layer`] created on those
/// outputs.
///
/// Mirrors `nucleid::Device`'s `Rc<RefCell<Inner>>` ownership model:
/// [`Output`] and [`Layer`] hold only a `Weak` back-pointer plus their id,
/// never a second strong owner of the device state.
#[derive(Debug)]
pub struct Device {
    pub(crate) inner: Rc<RefCell<DeviceInner>>,
}

impl Device {
    /// Creates a new, empty [Device] around a caller-supplied backend.
    ///
    /// No planes are registered yet; call [`register_all_planes`] before
    /// creating outputs.
    ///
    /// [`register_all_planes`]: Device::register_all_planes
    pub fn new(backend: impl DeviceBackend + 'static) -> Self {
        Self {
            inner: Rc::new(RefCell::new(DeviceInner {
                backend: Box::new(backend),
                planes: Vec::new(),
                outputs: Vec::new(),
                layers: Vec::new(),
            })),
        }
    }

    /// Enumerates planes from the backend and caches their schema.
    ///
    /// # Errors
    ///
    /// Propagates a backend enumeration failure; the [Device] should be
    /// considered unusable afterwards.
    pub fn register_all_planes(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let planes = registry::register_all_planes(inner.backend())?;
        debug!(count = planes.len(), "Registered planes.");
        inner.planes = planes;
        Ok(())
    }

    /// Creates a new [Output] for the pipe at `crtc_index`.
    ///
    /// `crtc_index` is the bit position this output occupies in every
    /// plane's `possible_crtcs` mask, i.e. the same index DRM calls a
    /// CRTC's pipe index.
    pub fn create_output(&self, crtc_index: u32) -> Output {
        let mut inner = self.inner.borrow_mut();
        inner.outputs.push(Some(OutputSlot {
            crtc_index,
            layers: Vec::new(),
            last_plan: None,
        }));
        let id = OutputId(inner.outputs.len() - 1);
        trace!(crtc_index, "Created output.");

        Output {
            dev: Rc::downgrade(&self.inner),
            id,
        }
    }

    /// Returns every plane this device registered.
    #[must_use]
    pub(crate) fn planes(&self) -> std::cell::Ref<'_, [Plane]> {
        std::cell::Ref::map(self.inner.borrow(), |inner| inner.planes.as_slice())
    }

    /// Returns a handle to every output still alive on this device, in
    /// creation order.
    #[must_use]
    pub(crate) fn live_outputs(&self) -> Vec<Output> {
        let inner = self.inner.borrow();
        inner
            .outputs
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                slot.as_ref().map(|_| Output {
                    dev: Rc::downgrade(&self.inner),
                    id: OutputId(idx),
                })
            })
            .collect()
    }
}

/// A logical display pipe: an ordered, front-to-back stack of [`Layer`]s a
/// compositor wants shown on one output.
#[derive(Debug)]
pub struct Output {
    pub(crate) dev: Weak<RefCell<DeviceInner>>,
    pub(crate) id: OutputId,
}

impl Output {
    fn inner(&self) -> Rc<RefCell<DeviceInner>> {
        self.dev
            .upgrade()
            .expect("device dropped while an output handle is still alive")
    }

    /// Creates a new, topmost [Layer] on this output. No properties are
    /// set.
    pub fn create_layer(&self) -> Layer {
        let inner_rc = self.inner();
        let mut inner = inner_rc.borrow_mut();
        inner.layers.push(Some(LayerSlot::new()));
        let layer_id = LayerId(inner.layers.len() - 1);

        let Ok(output) = inner.output_mut(self.id) else {
            unreachable!("creating a layer on an output we hold a handle to")
        };
        output.layers.push(layer_id);
        trace!(output = self.id.0, layer = layer_id.0, "Created layer.");

        Layer {
            dev: Weak::clone(&self.dev),
            output: self.id,
            id: layer_id,
        }
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        let Some(inner_rc) = self.dev.upgrade() else {
            return;
        };
        let mut inner = inner_rc.borrow_mut();

        let layer_ids = inner
            .outputs
            .get_mut(self.id.0)
            .and_then(Option::as_mut)
            .map(|output| std::mem::take(&mut output.layers))
            .unwrap_or_default();
        for layer_id in layer_ids {
            if let Some(slot) = inner.layers.get_mut(layer_id.0) {
                *slot = None;
            }
        }
        if let Some(slot) = inner.outputs.get_mut(self.id.0) {
            *slot = None;
        }
    }
}

/// A visual surface a compositor wants placed on hardware, or composited
/// by the GPU if no plane can take it.
#[derive(Debug)]
pub struct Layer {
    pub(crate) dev: Weak<RefCell<DeviceInner>>,
    pub(crate) output: OutputId,
    pub(crate) id: LayerId,
}

impl Layer {
    fn inner(&self) -> Rc<RefCell<DeviceInner>> {
        self.dev
            .upgrade()
            .expect("device dropped while a layer handle is still alive")
    }

    /// Records a pending property value. Does not validate against any
    /// plane; validation happens lazily, during the next `apply`.
    pub fn set_property(&self, name: &str, value: u64) {
        let inner_rc = self.inner();
        let mut inner = inner_rc.borrow_mut();
        trace!(layer = self.id.0, name, value, "Setting property.");
        if let Ok(layer) = inner.layer_mut(self.id) {
            layer.properties.insert(name.to_owned(), value);
        }
    }

    /// Removes `name` from the pending property map. Distinct from
    /// setting the property to its default value: an unset property
    /// imposes no constraint on which plane can take this layer.
    pub fn unset_property(&self, name: &str) {
        let inner_rc = self.inner();
        let mut inner = inner_rc.borrow_mut();
        trace!(layer = self.id.0, name, "Unsetting property.");
        if let Ok(layer) = inner.layer_mut(self.id) {
            layer.properties.remove(name);
        }
    }

    /// Sets this layer's priority weight, used by the allocation search's
    /// cost function (`2^priority` per assigned layer).
    pub fn set_priority(&self, priority: u32) {
        let inner_rc = self.inner();
        let mut inner = inner_rc.borrow_mut();
        if let Ok(layer) = inner.layer_mut(self.id) {
            layer.priority = priority;
        }
    }

    /// Restricts, for testing or caller-side policy, which planes this
    /// layer may ever be assigned to. The candidate filter intersects this
    /// hint with its own compatibility checks.
    pub fn set_candidate_hint(&self, planes: impl IntoIterator<Item = PlaneId>) {
        let inner_rc = self.inner();
        let mut inner = inner_rc.borrow_mut();
        if let Ok(layer) = inner.layer_mut(self.id) {
            layer.candidate_hint = Some(planes.into_iter().collect());
        }
    }

    /// Returns the plane this layer was assigned to by the last `apply`,
    /// or `None` if it is unassigned.
    #[must_use]
    pub fn plane_id(&self) -> Option<PlaneId> {
        let inner_rc = self.inner();
        let inner = inner_rc.borrow();
        inner.layer(self.id).ok().and_then(|l| l.assigned_plane)
    }

    /// Returns whether the caller must fall back to GPU composition for
    /// this layer: true for a non-no-op layer with no plane assigned,
    /// always false for a no-op layer.
    #[must_use]
    pub fn needs_composition(&self) -> bool {
        let inner_rc = self.inner();
        let inner = inner_rc.borrow();
        let Ok(layer) = inner.layer(self.id) else {
            return false;
        };
        if crate::filter::is_noop(&layer.properties) {
            return false;
        }
        layer.assigned_plane.is_none()
    }

    pub(crate) fn output_id(&self) -> OutputId {
        self.output
    }

    pub(crate) fn id(&self) -> LayerId {
        self.id
    }
}

impl Drop for Layer {
    fn drop(&mut self) {
        let Some(inner_rc) = self.dev.upgrade() else {
            return;
        };
        let mut inner = inner_rc.borrow_mut();
        if let Ok(output) = inner.output_mut(self.output) {
            output.layers.retain(|&id| id != self.id);
        }
        if let Some(slot) = inner.layers.get_mut(self.id.0) {
            *slot = None;
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("layer-{}", self.id.0))
    }
}
