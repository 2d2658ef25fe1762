//! The abstract collaborators the allocation core requires of its caller.
//!
//! None of the types here talk to a real kernel driver: enumerating planes,
//! reading properties, building and testing an atomic request are someone
//! else's job (a real `ioctl`-based implementation, or, in tests, a small
//! in-memory fake). The core only ever sees these traits.

use std::error::Error as StdError;

use crate::format::FormatModifier;
use crate::plane::{PlaneId, PlaneKind};
use crate::property::{PropertyId, PropertyMap};

/// The plane-enumeration result the [`DeviceBackend`] hands to the
/// [registry](crate::registry) for a single plane.
#[derive(Debug)]
pub struct PlaneDescriptor {
    /// The plane's kernel id.
    pub id: PlaneId,
    /// The plane's kind.
    pub kind: PlaneKind,
    /// The pipe-compatibility bitmask.
    pub possible_crtcs: u32,
    /// The plane's property schema, as read from the kernel.
    pub properties: PropertyMap,
    /// The plane's `IN_FORMATS` blob, already decoded into (format,
    /// modifier) pairs. `None` means the plane has no `IN_FORMATS`
    /// property and accepts any format the kernel otherwise allows.
    pub in_formats: Option<Vec<FormatModifier>>,
}

/// A framebuffer's metadata, as read from the kernel by `FB_ID`.
#[derive(Clone, Copy, Debug)]
pub struct FramebufferInfo {
    /// The framebuffer's pixel format and layout modifier.
    pub format: FormatModifier,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// The read side of the kernel atomic-modesetting interface.
///
/// A production implementation enumerates planes and properties with
/// `DRM_IOCTL_MODE_GETPLANERESOURCES`/`DRM_IOCTL_MODE_OBJ_GETPROPERTIES` and
/// friends; see `nucleid`'s own `raw` module for the shape such an
/// implementation takes. This crate never issues those ioctls itself.
pub trait DeviceBackend {
    /// Enumerates every plane the kernel exposes, including ones unusable
    /// by any output; the [registry](crate::registry) filters those out.
    ///
    /// # Errors
    ///
    /// Any enumeration failure is fatal for the device handle.
    fn enumerate_planes(&self) -> crate::Result<Vec<PlaneDescriptor>>;

    /// Resolves a layer's `FB_ID` property value into framebuffer
    /// metadata, or `None` if the id is unknown to the kernel.
    fn read_framebuffer_info(&self, fb_id: u64) -> Option<FramebufferInfo>;
}

/// An opaque position inside an [`AtomicRequest`]'s write log, returned by
/// [`AtomicRequest::append`] and [`AtomicRequest::snapshot_cursor`].
///
/// The allocation search never inspects a cursor's value; it only ever
/// feeds one back into [`AtomicRequest::truncate`].
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Cursor(pub usize);

/// The outcome of [`AtomicRequest::test_commit`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TestCommitResult {
    /// The kernel would accept this request as-is.
    Accepted,
    /// The kernel would reject this request.
    Rejected,
}

/// The write side of the kernel atomic-modesetting interface: a
/// transactional, append-only batch of property writes.
///
/// The allocation search treats an `AtomicRequest` as a log-structured
/// buffer: every tentative write is preceded by a [`snapshot_cursor`]
/// checkpoint, and a rejected branch is undone with [`truncate`] back to
/// that checkpoint, never by any other means.
///
/// [`snapshot_cursor`]: AtomicRequest::snapshot_cursor
/// [`truncate`]: AtomicRequest::truncate
pub trait AtomicRequest {
    /// Appends a single property write and returns the cursor position
    /// immediately after it.
    fn append(&mut self, object_id: u32, property_id: PropertyId, value: u64) -> Cursor;

    /// Discards every write appended after `cursor`.
    fn truncate(&mut self, cursor: Cursor);

    /// Returns the cursor for the request's current end, to be restored
    /// later with [`truncate`](Self::truncate).
    fn snapshot_cursor(&self) -> Cursor;

    /// Dry-runs the request as it currently stands.
    ///
    /// # Errors
    ///
    /// Returns an error only for a transport failure (the oracle itself
    /// could not be consulted), never for a plain rejection, which is
    /// reported as `Ok(TestCommitResult::Rejected)`.
    fn test_commit(&mut self) -> Result<TestCommitResult, Box<dyn StdError + Send + Sync>>;
}
