//! # Leaf units of work.
//!
//! This module provides the task types a group can own:
//! - [`Task`] - one action (or [`Routine`]) run every tick while active
//! - [`TaskEx`] - ordered `(action, predicate)` steps run one at a time
//! - [`Routine`] - command-pattern body with start/stop hooks
//! - [`Action`], [`Predicate`] - shared closure types
//!
//! Timed, delay and counted steps are builders on [`TaskEx`].

mod routine;
mod steps;
mod task;
mod timed;

pub use routine::Routine;
pub use steps::TaskEx;
pub use task::{Action, Predicate, Task, WeakTask};

pub(crate) use task::TaskCore;
