//! # Auto-management policies for groups.
//!
//! [`AutoPolicy`] decides whether a group asks its own parent to start or
//! pause it, based on how its active set changed.
//!
//! - [`AutoPolicy::Disabled`] the group never issues commands on its own.
//! - [`AutoPolicy::OnlyWhenEmpty`] react only to a transition (first child
//!   started, last child paused).
//! - [`AutoPolicy::Always`] react whenever the group is in the wrong state.
//!
//! ## Start side
//! ```text
//! Always         → not running in parent             → Start(self)
//! OnlyWhenEmpty  → not running and 0 → 1 transition  → Start(self)
//! ```
//!
//! ## Stop side
//! ```text
//! Always         → active empty after any Pause      → Pause(self)
//! OnlyWhenEmpty  → this Pause emptied the active set → Pause(self)
//! ```
//! Neither fires while queued actions remain.

/// Policy controlling whether a group starts/pauses itself in its parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoPolicy {
    /// Never propagate.
    Disabled,
    /// Propagate only on the empty/non-empty transition.
    OnlyWhenEmpty,
    /// Propagate whenever the group's state disagrees with its parent.
    Always,
}

impl AutoPolicy {
    /// Should a group that just accepted a Start ask its parent to start it?
    ///
    /// `was_empty` is the occupancy before the insertion.
    pub fn wants_start(self, running: bool, was_empty: bool) -> bool {
        if running {
            return false;
        }
        match self {
            AutoPolicy::Disabled => false,
            AutoPolicy::OnlyWhenEmpty => was_empty,
            AutoPolicy::Always => true,
        }
    }

    /// Should a group that just handled a Pause ask its parent to pause it?
    ///
    /// `removed` tells whether the Pause actually removed an entry.
    pub fn wants_stop(self, is_empty: bool, removed: bool, has_pending: bool) -> bool {
        if !is_empty || has_pending {
            return false;
        }
        match self {
            AutoPolicy::Disabled => false,
            AutoPolicy::OnlyWhenEmpty => removed,
            AutoPolicy::Always => true,
        }
    }
}

impl Default for AutoPolicy {
    /// Returns [`AutoPolicy::Always`].
    fn default() -> Self {
        AutoPolicy::Always
    }
}
