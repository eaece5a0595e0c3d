//! # Task registry - opt-in lookup of tasks by name.
//!
//! Applications that want a "find task by name" facility create a
//! [`Registry`] and hand it to the code that builds tasks. Nothing in the
//! scheduler consults it.
//!
//! ## Rules
//! - Entries are weak: the registry never keeps a task alive
//! - Dead entries are pruned on every read
//! - Names are not unique; lookups return the first live match

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::tasks::{Task, TaskCore};

/// Weak, insertion-ordered list of tasks.
///
/// # Example
/// ```
/// use tickvisor::{Registry, Task};
///
/// let registry = Registry::new();
/// let lift = Task::new("lift", || Ok(()));
/// registry.track(&lift);
///
/// assert!(registry.find("lift").is_some_and(|t| t.ptr_eq(&lift)));
/// drop(lift);
/// assert!(registry.is_empty());
/// ```
#[derive(Default)]
pub struct Registry {
    tasks: RefCell<Vec<Weak<TaskCore>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `task`. Tracking the same task twice is a no-op.
    pub fn track(&self, task: &Task) {
        let mut tasks = self.tasks.borrow_mut();
        let ptr = Rc::as_ptr(task.core());
        if !tasks.iter().any(|w| w.as_ptr() == ptr) {
            tasks.push(Rc::downgrade(task.core()));
        }
    }

    /// First live task named `name`.
    pub fn find(&self, name: &str) -> Option<Task> {
        self.live().into_iter().find(|t| t.name() == name)
    }

    /// Names of the live tasks, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.live().iter().map(|t| t.name().to_string()).collect()
    }

    /// Number of live tasks.
    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every task.
    pub fn clear(&self) {
        self.tasks.borrow_mut().clear();
    }

    fn live(&self) -> Vec<Task> {
        let mut tasks = self.tasks.borrow_mut();
        tasks.retain(|w| w.strong_count() > 0);
        tasks
            .iter()
            .filter_map(|w| w.upgrade().map(Task::from_core))
            .collect()
    }
}
