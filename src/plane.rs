use std::collections::HashSet;
use std::fmt;

use facet_derive::Facet;
use facet_enum_repr::FacetEnumRepr;

use crate::format::FormatModifier;
use crate::property::{PropertyMap, PropertySchema};

/// The kernel-assigned id of a [Plane].
pub type PlaneId = u32;

/// The [Plane] kind.
#[derive(Clone, Copy, Debug, Eq, Facet, FacetEnumRepr, PartialEq)]
#[repr(u32)]
pub enum PlaneKind {
    /// The plane is an overlay, aka a sprite. Any plane that is neither a
    /// primary nor a cursor plane.
    Overlay = 0,

    /// The main plane the CRTC is acting upon during modesetting.
    Primary,

    /// The plane is a cursor plane.
    Cursor,
}

/// A hardware scan-out surface, as cached by the [device
/// registry](crate::registry) during enumeration.
///
/// A plane's schema, pipe mask and format set are immutable for the
/// lifetime of the [`Device`](crate::Device) that owns it: they are read
/// once during [`Device::register_all_planes`](crate::Device::register_all_planes)
/// and never refreshed.
#[derive(Debug)]
pub struct Plane {
    id: PlaneId,
    kind: PlaneKind,
    possible_crtcs: u32,
    properties: PropertyMap,
    in_formats: Option<HashSet<FormatModifier>>,
    immutable_zpos: Option<u64>,
}

impl Plane {
    /// Builds a [Plane] from the schema the registry read from the kernel.
    #[must_use]
    pub(crate) fn new(
        id: PlaneId,
        kind: PlaneKind,
        possible_crtcs: u32,
        properties: PropertyMap,
        in_formats: Option<HashSet<FormatModifier>>,
    ) -> Self {
        let immutable_zpos = properties.get("zpos").and_then(|zpos| {
            if zpos.is_mutable() {
                None
            } else {
                Some(zpos.default())
            }
        });

        Self {
            id,
            kind,
            possible_crtcs,
            properties,
            in_formats,
            immutable_zpos,
        }
    }

    /// Returns this plane's kernel id.
    #[must_use]
    pub const fn id(&self) -> PlaneId {
        self.id
    }

    /// Returns this plane's kind.
    #[must_use]
    pub const fn kind(&self) -> PlaneKind {
        self.kind
    }

    /// Returns the pipe-compatibility bitmask: bit `n` set means this plane
    /// can drive the CRTC at index `n`.
    #[must_use]
    pub(crate) const fn possible_crtcs(&self) -> u32 {
        self.possible_crtcs
    }

    /// Returns whether this plane can drive the pipe at index `crtc_index`.
    #[must_use]
    pub(crate) const fn drives_pipe(&self, crtc_index: u32) -> bool {
        (self.possible_crtcs & (1 << crtc_index)) != 0
    }

    /// Looks up a property by name in this plane's schema.
    #[must_use]
    pub(crate) fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.get(name)
    }

    /// Returns whether this plane's `IN_FORMATS` blob, when present,
    /// contains `fmt`. Planes without an `IN_FORMATS` blob accept any
    /// format.
    #[must_use]
    pub(crate) fn accepts_format(&self, fmt: FormatModifier) -> bool {
        self.in_formats
            .as_ref()
            .is_none_or(|formats| formats.contains(&fmt))
    }

    /// Returns this plane's immutable `zpos`, if the kernel reports `zpos`
    /// as a read-only property on it.
    #[must_use]
    pub(crate) const fn immutable_zpos(&self) -> Option<u64> {
        self.immutable_zpos
    }
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("plane-{}", self.id))
    }
}
