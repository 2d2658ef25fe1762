//! Tunables for the allocation search, set once per [`Device`](crate::Device)
//! or overridden per call to [`Output::apply`](crate::scene::Output::apply).

/// A deadline hook the search consults between candidates, so a caller
/// driving this from a frame-budget-constrained compositor can bail out of
/// an expensive search early. Returning `true` makes the search stop
/// exploring and fall back to its best plan found so far.
pub type DeadlineCheck = std::rc::Rc<dyn Fn() -> bool>;

/// Search tunables. Cloning an `AllocatorConfig` is cheap; the deadline
/// hook, if any, is reference-counted.
#[derive(Clone, Default)]
pub struct AllocatorConfig {
    incremental_reuse: bool,
    deadline: Option<DeadlineCheck>,
}

impl AllocatorConfig {
    /// Returns a config with every tunable at its default: incremental
    /// reuse off, no deadline hook.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// When enabled, `apply` first re-tests the previous successful plan
    /// for this output before running a full search, and keeps it if the
    /// oracle still accepts it unchanged. Scene changes that leave the
    /// same layers wanting the same planes skip the search entirely.
    #[must_use]
    pub fn with_incremental_reuse(mut self, enabled: bool) -> Self {
        self.incremental_reuse = enabled;
        self
    }

    #[must_use]
    pub(crate) const fn incremental_reuse(&self) -> bool {
        self.incremental_reuse
    }

    /// Installs a hook the search polls between candidates; once it
    /// returns `true`, the search stops branching and returns its best
    /// plan so far instead of continuing to completion.
    #[must_use]
    pub fn with_deadline_check(mut self, check: impl Fn() -> bool + 'static) -> Self {
        self.deadline = Some(std::rc::Rc::new(check));
        self
    }

    #[must_use]
    pub(crate) fn deadline(&self) -> Option<&DeadlineCheck> {
        self.deadline.as_ref()
    }
}

impl std::fmt::Debug for AllocatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocatorConfig")
            .field("incremental_reuse", &self.incremental_reuse)
            .field("deadline", &self.deadline.is_some())
            .finish()
    }
}
