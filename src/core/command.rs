//! # Commands exchanged between a child and its owning group.
//!
//! [`Command`] is the only verb set used to change active-set membership.
//! [`CommandArgs`] carries the optional modifiers a caller may attach:
//!
//! ```text
//! Start + force          → evict one active entry when at max_active
//! Start + at(i)          → ordered groups: insert at position i
//! Start + duplicate      → ordered groups: run an already-active entry twice
//! Pause + completed      → stop hook sees interrupted = false
//! ```

/// A request to change a child's membership in the active set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Command {
    /// Do nothing; always succeeds.
    #[default]
    None,
    /// Put the child into the active set.
    Start,
    /// Remove the child from the active set.
    Pause,
}

/// Modifiers for a [`Command`].
///
/// # Example
/// ```
/// use tickvisor::CommandArgs;
///
/// let args = CommandArgs::new().forced().at(0);
/// assert!(args.force);
/// assert_eq!(args.index, Some(0));
/// assert!(args.interrupted);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandArgs {
    /// Evict an active entry instead of rejecting a Start at capacity.
    pub force: bool,
    /// Value passed to the stop hook on Pause (`false` = natural completion).
    pub interrupted: bool,
    /// Position in the execution order of an ordered group.
    pub index: Option<usize>,
    /// Allow an already-active entry to be ordered twice.
    pub allow_duplicate: bool,
}

impl CommandArgs {
    /// Default modifiers: unforced, interrupted, appended, no duplicates.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows eviction at capacity.
    #[inline]
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    /// Marks a Pause as a natural completion.
    #[inline]
    pub fn completed(mut self) -> Self {
        self.interrupted = false;
        self
    }

    /// Requests a position in an ordered group.
    #[inline]
    pub fn at(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    /// Allows a second ordered occurrence of an active entry.
    #[inline]
    pub fn duplicate(mut self) -> Self {
        self.allow_duplicate = true;
        self
    }
}

impl Default for CommandArgs {
    fn default() -> Self {
        Self {
            force: false,
            interrupted: true,
            index: None,
            allow_duplicate: false,
        }
    }
}
