//! An in-memory [`DeviceBackend`]/[`AtomicRequest`] pair for exercising the
//! allocator without a real display controller. Used by this crate's own
//! tests and by the demo binary.

use std::collections::HashMap;

use crate::backend::{AtomicRequest, Cursor, DeviceBackend, FramebufferInfo, PlaneDescriptor, TestCommitResult};
use crate::property::PropertyId;

/// A fixed catalogue of planes and framebuffers, with a caller-supplied
/// predicate standing in for the kernel's atomic-modesetting validation.
pub struct MockBackend {
    planes: Vec<PlaneDescriptor>,
    framebuffers: HashMap<u64, FramebufferInfo>,
    /// Decides whether a full batch of writes would be accepted. Receives
    /// the final value of every `(object_id, property_id)` pair touched by
    /// the batch.
    accept: Box<dyn Fn(&HashMap<(u32, PropertyId), u64>) -> bool>,
}

impl MockBackend {
    /// Creates a backend with the given planes, no known framebuffers, and
    /// a policy accepting every commit.
    #[must_use]
    pub fn new(planes: Vec<PlaneDescriptor>) -> Self {
        Self {
            planes,
            framebuffers: HashMap::new(),
            accept: Box::new(|_| true),
        }
    }

    /// Registers a framebuffer's format/modifier for `fb_id`.
    #[must_use]
    pub fn with_framebuffer(mut self, fb_id: u64, info: FramebufferInfo) -> Self {
        self.framebuffers.insert(fb_id, info);
        self
    }

    /// Installs a custom commit-acceptance policy in place of the
    /// accept-everything default.
    #[must_use]
    pub fn with_commit_policy(
        mut self,
        accept: impl Fn(&HashMap<(u32, PropertyId), u64>) -> bool + 'static,
    ) -> Self {
        self.accept = Box::new(accept);
        self
    }
}

impl DeviceBackend for MockBackend {
    fn enumerate_planes(&self) -> crate::Result<Vec<PlaneDescriptor>> {
        Ok(self
            .planes
            .iter()
            .map(|p| PlaneDescriptor {
                id: p.id,
                kind: p.kind,
                possible_crtcs: p.possible_crtcs,
                properties: p.properties.clone(),
                in_formats: p.in_formats.clone(),
            })
            .collect())
    }

    fn read_framebuffer_info(&self, fb_id: u64) -> Option<FramebufferInfo> {
        self.framebuffers.get(&fb_id).copied()
    }
}

/// An append-only write log plus the [`MockBackend`]'s accept policy,
/// implementing the test-commit oracle.
pub struct MockRequest<'a> {
    writes: Vec<(u32, PropertyId, u64)>,
    accept: &'a dyn Fn(&HashMap<(u32, PropertyId), u64>) -> bool,
}

impl<'a> MockRequest<'a> {
    /// Creates an empty request against `backend`'s commit policy.
    #[must_use]
    pub fn new(backend: &'a MockBackend) -> Self {
        Self {
            writes: Vec::new(),
            accept: &*backend.accept,
        }
    }

    /// Returns every write currently in the log, in append order.
    #[must_use]
    pub fn writes(&self) -> &[(u32, PropertyId, u64)] {
        &self.writes
    }
}

impl AtomicRequest for MockRequest<'_> {
    fn append(&mut self, object_id: u32, property_id: PropertyId, value: u64) -> Cursor {
        self.writes.push((object_id, property_id, value));
        Cursor(self.writes.len())
    }

    fn truncate(&mut self, cursor: Cursor) {
        self.writes.truncate(cursor.0);
    }

    fn snapshot_cursor(&self) -> Cursor {
        Cursor(self.writes.len())
    }

    fn test_commit(&mut self) -> Result<TestCommitResult, Box<dyn std::error::Error + Send + Sync>> {
        let mut latest: HashMap<(u32, PropertyId), u64> = HashMap::new();
        for &(object_id, property_id, value) in &self.writes {
            latest.insert((object_id, property_id), value);
        }
        Ok(if (self.accept)(&latest) {
            TestCommitResult::Accepted
        } else {
            TestCommitResult::Rejected
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{MockBackend, MockRequest};
    use crate::backend::{AtomicRequest, DeviceBackend, PlaneDescriptor};
    use crate::plane::PlaneKind;
    use std::collections::HashMap;

    #[test]
    fn test_enumerate_planes_roundtrips() {
        let backend = MockBackend::new(vec![PlaneDescriptor {
            id: 1,
            kind: PlaneKind::Primary,
            possible_crtcs: 1,
            properties: HashMap::new(),
            in_formats: None,
        }]);
        assert_eq!(backend.enumerate_planes().unwrap().len(), 1);
    }

    #[test]
    fn test_request_truncate_undoes_writes() {
        let backend = MockBackend::new(vec![]);
        let mut request = MockRequest::new(&backend);
        let checkpoint = request.snapshot_cursor();
        request.append(1, 2, 3);
        request.truncate(checkpoint);
        assert!(request.writes().is_empty());
    }

    #[test]
    fn test_commit_policy_rejects() {
        let backend = MockBackend::new(vec![]).with_commit_policy(|_| false);
        let mut request = MockRequest::new(&backend);
        request.append(1, 2, 3);
        assert_eq!(
            request.test_commit().unwrap(),
            crate::backend::TestCommitResult::Rejected
        );
    }
}
