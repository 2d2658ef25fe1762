use facet_derive::Facet;
use facet_enum_repr::FacetEnumRepr;

macro_rules! fourcc_code {
    ($a:expr, $b:expr, $c:expr, $d:expr) => {
        (($a as u32) | (($b as u32) << 8) | (($c as u32) << 16) | (($d as u32) << 24)) as u32
    };
}

/// Representation of a pixel format, as a DRM FourCC code.
#[derive(Clone, Copy, Debug, Eq, Facet, FacetEnumRepr, Hash, PartialEq)]
#[repr(u32)]
pub enum Format {
    /// \[23:0\] R:G:B 8:8:8 little endian
    RGB888 = fourcc_code!('R', 'G', '2', '4'),

    /// \[31:0\] x:R:G:B 8:8:8:8 little endian
    XRGB8888 = fourcc_code!('X', 'R', '2', '4'),

    /// \[31:0\] A:R:G:B 8:8:8:8 little endian
    ARGB8888 = fourcc_code!('A', 'R', '2', '4'),
}

/// A layout modifier, paired with a [Format] in a plane's `IN_FORMATS` set.
///
/// Modifiers are opaque 64-bit values defined by `drm_fourcc.h`; this crate
/// only needs to compare them for equality, never to interpret their bits.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Modifier(pub u64);

impl Modifier {
    /// The "no modifier" / linear layout, `DRM_FORMAT_MOD_LINEAR`.
    pub const LINEAR: Self = Self(0);
}

impl From<u64> for Modifier {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A (format, modifier) pair, as found in a plane's `IN_FORMATS` blob or a
/// framebuffer's metadata.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct FormatModifier {
    /// The pixel format.
    pub format: Format,
    /// The layout modifier the framebuffer was allocated with.
    pub modifier: Modifier,
}

impl FormatModifier {
    /// Creates a new format/modifier pair.
    #[must_use]
    pub const fn new(format: Format, modifier: Modifier) -> Self {
        Self { format, modifier }
    }
}
