/// Generic Result type with [Error] as its error variant
pub type Result<T> = std::result::Result<T, Error>;

/// Error Type for scanout
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Plane or property enumeration failed; the device handle is unusable.
    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    /// A call referenced a layer, output or plane that doesn't belong
    /// together, or an object that no longer exists.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The test-commit oracle failed for a reason other than rejecting the
    /// request (e.g. the underlying transport errored out). Allocation
    /// failure itself, the oracle rejecting every candidate plan, is not an
    /// error; see [`crate::apply::Outcome`].
    #[error("test-commit oracle failed")]
    Oracle(#[source] Box<dyn std::error::Error + Send + Sync>),
}
