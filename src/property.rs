use std::collections::HashMap;

/// The kernel-assigned id of a KMS property.
pub type PropertyId = u32;

/// The valid-value description of a property, as read from the kernel.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyRange {
    /// Any 64-bit value is accepted.
    Unrestricted,
    /// The value must fall within `[min, max]`, inclusive.
    Range(u64, u64),
    /// The value must be one of these named enum members.
    Enum(Vec<(String, u64)>),
}

impl PropertyRange {
    #[must_use]
    fn contains(&self, value: u64) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Range(min, max) => (*min..=*max).contains(&value),
            Self::Enum(members) => members.iter().any(|(_name, val)| *val == value),
        }
    }
}

/// A single property a plane exposes, as cached by the [device
/// registry](crate::registry) during enumeration.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertySchema {
    id: PropertyId,
    name: String,
    mutable: bool,
    default: u64,
    range: PropertyRange,
}

impl PropertySchema {
    /// Creates a new schema entry.
    #[must_use]
    pub fn new(
        id: PropertyId,
        name: impl Into<String>,
        mutable: bool,
        default: u64,
        range: PropertyRange,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            mutable,
            default,
            range,
        }
    }

    /// Returns the kernel id of this property.
    #[must_use]
    pub const fn id(&self) -> PropertyId {
        self.id
    }

    /// Returns the property's name, e.g. `"zpos"`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns whether the kernel allows writing a new value to this
    /// property. An immutable property, such as a fixed `zpos`, can only be
    /// read.
    #[must_use]
    pub const fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Returns the property's default value.
    #[must_use]
    pub const fn default(&self) -> u64 {
        self.default
    }

    /// Returns whether `value` falls within this property's valid range or
    /// enum set.
    #[must_use]
    pub fn accepts(&self, value: u64) -> bool {
        self.range.contains(value)
    }

    /// Returns whether `value` is this property's default value.
    #[must_use]
    pub fn is_default(&self, value: u64) -> bool {
        value == self.default
    }
}

/// A plane's full set of properties, keyed by name.
pub type PropertyMap = HashMap<String, PropertySchema>;
