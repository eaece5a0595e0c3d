//! # Schedulable units owned by a group.
//!
//! [`Child`] is the closed set of things a [`Group`] can own and run:
//! a leaf [`Task`] (plain action, step machine or routine) or a nested
//! [`Group`]. Both implement [`Runnable`], the single capability the
//! scheduler relies on.

use crate::core::group::Group;
use crate::core::node::ParentLink;
use crate::error::RunError;
use crate::tasks::{Task, TaskEx};

/// # Something a group can run once per tick.
///
/// # Example
/// ```
/// use tickvisor::{Group, Runnable, Task};
///
/// let root = Group::new("root");
/// let hello = Task::new("hello", || Ok(()));
/// root.attach(&hello).unwrap();
/// root.start("hello").unwrap();
///
/// assert!(!root.is_done());
/// root.run().unwrap();
/// ```
pub trait Runnable {
    /// Advances the unit by one tick.
    fn run(&self) -> Result<(), RunError>;

    /// Returns `true` once the unit has nothing left to do.
    fn is_done(&self) -> bool;
}

/// A child of a [`Group`].
#[derive(Clone)]
pub enum Child {
    /// A task: plain action, step machine or routine.
    Leaf(Task),
    /// A nested group.
    Composite(Group),
}

impl Child {
    /// Name of the underlying unit (not necessarily its key).
    pub fn name(&self) -> &str {
        match self {
            Child::Leaf(t) => t.name(),
            Child::Composite(g) => g.name(),
        }
    }

    /// Returns the task if this is a leaf.
    pub fn as_task(&self) -> Option<&Task> {
        match self {
            Child::Leaf(t) => Some(t),
            Child::Composite(_) => None,
        }
    }

    /// Returns the group if this is a composite.
    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Child::Composite(g) => Some(g),
            Child::Leaf(_) => None,
        }
    }

    /// True if the child's start/pause state is frozen.
    pub fn is_locked(&self) -> bool {
        match self {
            Child::Leaf(t) => t.is_locked(),
            Child::Composite(_) => false,
        }
    }

    /// True if the child (or anything below it) is suspended on an event.
    pub fn is_waiting(&self) -> bool {
        match self {
            Child::Leaf(t) => t.is_waiting_for_event(),
            Child::Composite(g) => g.is_waiting(),
        }
    }

    pub(crate) fn link(&self) -> Option<(Group, String)> {
        match self {
            Child::Leaf(t) => t.node().link(),
            Child::Composite(g) => g.node().link(),
        }
    }

    pub(crate) fn set_link(&self, link: Option<ParentLink>) {
        match self {
            Child::Leaf(t) => t.node().set_link(link),
            Child::Composite(g) => g.node().set_link(link),
        }
    }

    pub(crate) fn on_start(&self) {
        if let Child::Leaf(t) = self {
            t.on_start();
        }
    }

    pub(crate) fn on_stop(&self, interrupted: bool) {
        if let Child::Leaf(t) = self {
            t.on_stop(interrupted);
        }
    }
}

impl Runnable for Child {
    fn run(&self) -> Result<(), RunError> {
        match self {
            Child::Leaf(t) => t.run(),
            Child::Composite(g) => g.run(),
        }
    }

    fn is_done(&self) -> bool {
        match self {
            Child::Leaf(t) => t.is_done(),
            Child::Composite(g) => g.is_done(),
        }
    }
}

impl From<Task> for Child {
    fn from(t: Task) -> Self {
        Child::Leaf(t)
    }
}

impl From<&Task> for Child {
    fn from(t: &Task) -> Self {
        Child::Leaf(t.clone())
    }
}

impl From<TaskEx> for Child {
    fn from(t: TaskEx) -> Self {
        Child::Leaf(t.as_task().clone())
    }
}

impl From<&TaskEx> for Child {
    fn from(t: &TaskEx) -> Self {
        Child::Leaf(t.as_task().clone())
    }
}

impl From<Group> for Child {
    fn from(g: Group) -> Self {
        Child::Composite(g)
    }
}

impl From<&Group> for Child {
    fn from(g: &Group) -> Self {
        Child::Composite(g.clone())
    }
}

impl std::fmt::Debug for Child {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Child::Leaf(t) => f.debug_tuple("Leaf").field(&t.name()).finish(),
            Child::Composite(g) => f.debug_tuple("Composite").field(&g.name()).finish(),
        }
    }
}
