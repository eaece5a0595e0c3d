//! Error types used by the scheduling core.
//!
//! This module defines the error enums returned across the crate:
//!
//! - [`CommandError`]: a Start/Pause request was rejected (recoverable).
//! - [`TopologyError`]: an attach would break the tree (misconfiguration).
//! - [`ContractError`]: an API was used in a way that would desync a task.
//! - [`RunError`]: an action failed while a group was ticking.
//! - [`EventError`]: an event path could not be resolved or a callback failed.
//!
//! All types provide an `as_label` helper for logs/metrics.

use thiserror::Error;

/// Result type returned by user-supplied actions and event callbacks.
pub type ActionResult = anyhow::Result<()>;

/// # Rejections of a [`Command`](crate::Command).
///
/// These are normal negative outcomes, not failures of the scheduler:
/// a caller can inspect them and retry or force.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The command needs a parent group but the node is detached.
    #[error("'{name}' is not attached to a group")]
    NoParent {
        /// Name of the detached node.
        name: String,
    },

    /// No child is registered under the key.
    #[error("group '{group}' has no child '{key}'")]
    UnknownChild {
        /// Group that received the command.
        group: String,
        /// Requested key.
        key: String,
    },

    /// The group already runs `max` children and the start was not forced.
    #[error("group '{group}' is at capacity ({max} active)")]
    AtCapacity {
        /// Group that rejected the start.
        group: String,
        /// Configured ceiling.
        max: usize,
    },

    /// The child is locked; its start/pause state is frozen.
    #[error("child '{key}' of group '{group}' is locked")]
    Locked {
        /// Owning group.
        group: String,
        /// Locked child key.
        key: String,
    },
}

impl CommandError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use tickvisor::CommandError;
    ///
    /// let err = CommandError::AtCapacity { group: "drive".into(), max: 1 };
    /// assert_eq!(err.as_label(), "command_at_capacity");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            CommandError::NoParent { .. } => "command_no_parent",
            CommandError::UnknownChild { .. } => "command_unknown_child",
            CommandError::AtCapacity { .. } => "command_at_capacity",
            CommandError::Locked { .. } => "command_locked",
        }
    }

    /// True for capacity rejections (the only case `force` can overcome).
    pub fn is_capacity(&self) -> bool {
        matches!(self, CommandError::AtCapacity { .. })
    }
}

/// # Errors raised while wiring the tree.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// Children must be attached under a non-empty key.
    #[error("cannot attach '{name}' under an empty key")]
    EmptyKey {
        /// Name of the node being attached.
        name: String,
    },

    /// The group would become its own ancestor.
    #[error("attaching '{child}' to '{parent}' would create a cycle")]
    Cycle {
        /// Group being attached.
        child: String,
        /// Target parent.
        parent: String,
    },

    /// A path segment does not name an existing child group.
    #[error("no group '{segment}' under '{at}'")]
    UnknownPath {
        /// Missing segment.
        segment: String,
        /// Group the lookup stopped at.
        at: String,
    },
}

impl TopologyError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TopologyError::EmptyKey { .. } => "topology_empty_key",
            TopologyError::Cycle { .. } => "topology_cycle",
            TopologyError::UnknownPath { .. } => "topology_unknown_path",
        }
    }
}

/// # Contract violations on tasks.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    /// The action of a step task is owned by its step list.
    #[error("the action of step task '{task}' can't be set directly")]
    StepManaged {
        /// Task name.
        task: String,
    },

    /// The task is locked.
    #[error("task '{task}' is locked")]
    Locked {
        /// Task name.
        task: String,
    },
}

impl ContractError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ContractError::StepManaged { .. } => "contract_step_managed",
            ContractError::Locked { .. } => "contract_locked",
        }
    }
}

/// # Failures surfaced by [`Group::tick`](crate::Group::tick).
///
/// A failing child aborts the rest of the tick. The error is wrapped once per
/// group it crosses, so a failure three groups deep reads like a path.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RunError {
    /// A user action (task body, routine, step predicate owner) failed.
    #[error("action failed")]
    Action(#[source] anyhow::Error),

    /// A queued group action failed while draining.
    #[error("queued action failed in group '{group}'")]
    Queued {
        /// Group whose queue was draining.
        group: String,
        /// Underlying failure.
        #[source]
        source: anyhow::Error,
    },

    /// A child failed; `source` carries the child's own error.
    #[error("error running '{key}' in group '{group}'")]
    Child {
        /// Key of the failing child.
        key: String,
        /// Group that ran the child.
        group: String,
        /// Error raised by the child.
        #[source]
        source: Box<RunError>,
    },
}

impl RunError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RunError::Action(_) => "run_action_failed",
            RunError::Queued { .. } => "run_queued_failed",
            RunError::Child { .. } => "run_child_failed",
        }
    }

    /// Keys of the children crossed, outermost first.
    ///
    /// # Example
    /// ```
    /// use tickvisor::RunError;
    ///
    /// let err = RunError::Child {
    ///     key: "arm".into(),
    ///     group: "robot".into(),
    ///     source: Box::new(RunError::Child {
    ///         key: "lift".into(),
    ///         group: "arm".into(),
    ///         source: Box::new(RunError::Action(anyhow::anyhow!("stall"))),
    ///     }),
    /// };
    /// assert_eq!(err.path(), vec!["arm", "lift"]);
    /// ```
    pub fn path(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        let mut cur = self;
        while let RunError::Child { key, source, .. } = cur {
            keys.push(key.as_str());
            cur = source;
        }
        keys
    }

    /// The innermost error (the one the user action produced).
    pub fn root_cause(&self) -> &RunError {
        let mut cur = self;
        while let RunError::Child { source, .. } = cur {
            cur = source;
        }
        cur
    }
}

/// # Errors raised by the event tree.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum EventError {
    /// A path segment names no child manager.
    #[error("no event manager '{segment}' under '{dir}'")]
    UnknownManager {
        /// Missing segment.
        segment: String,
        /// Directory of the manager that was searched.
        dir: String,
    },

    /// At least one callback failed; the remaining callbacks still ran.
    #[error("error while running '{subscriber}' in event '{event}' at directory '{dir}' ({failed} failed)")]
    Callback {
        /// Triggered event name.
        event: String,
        /// Directory of the manager owning the event.
        dir: String,
        /// First failing subscriber.
        subscriber: String,
        /// Number of callbacks that failed during the dispatch.
        failed: usize,
        /// Error of the first failing subscriber.
        #[source]
        source: anyhow::Error,
    },
}

impl EventError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventError::UnknownManager { .. } => "event_unknown_manager",
            EventError::Callback { .. } => "event_callback_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_error_path_and_root_cause() {
        let err = RunError::Child {
            key: "sub".into(),
            group: "main".into(),
            source: Box::new(RunError::Child {
                key: "test".into(),
                group: "sub".into(),
                source: Box::new(RunError::Action(anyhow::anyhow!("can you catch me?"))),
            }),
        };

        assert_eq!(err.path(), vec!["sub", "test"]);
        assert_eq!(err.root_cause().as_label(), "run_action_failed");
        assert_eq!(err.to_string(), "error running 'sub' in group 'main'");
    }

    #[test]
    fn test_callback_error_message_names_directory() {
        let err = EventError::Callback {
            event: "test".into(),
            dir: "main/sub".into(),
            subscriber: "throw".into(),
            failed: 1,
            source: anyhow::anyhow!("boom"),
        };
        assert_eq!(
            err.to_string(),
            "error while running 'throw' in event 'test' at directory 'main/sub' (1 failed)"
        );
    }

    #[test]
    fn test_capacity_label() {
        let err = CommandError::AtCapacity {
            group: "g".into(),
            max: 1,
        };
        assert!(err.is_capacity());
        assert!(
            !CommandError::NoParent { name: "x".into() }.is_capacity()
        );
    }
}
