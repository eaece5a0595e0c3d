//! Scheduling core: the tree and its command protocol.
//!
//! ```text
//!                   ┌──────────── Group (root) ────────────┐
//!   driver.tick() ─►│ pending: VecDeque<deferred action>   │
//!                   │ children: key → Child                │
//!                   │ active:   key → Child  (⊆ children)  │
//!                   └───────┬──────────────────────┬───────┘
//!                  Child::Leaf(Task)      Child::Composite(Group)
//!                           │                      │
//!                 run_command(Start|Pause)   auto-management
//!                           └────► parent.dispatch ◄┘ (loop upward)
//! ```
//!
//! Internal modules:
//! - [`node`]: weak parent link shared by tasks and groups;
//! - [`command`]: `Command` verbs and `CommandArgs` modifiers;
//! - [`child`]: `Child` enum and the `Runnable` capability;
//! - [`group`]: keyed container, ordered variant, tick and dispatch;
//! - [`registry`]: opt-in lookup of tasks by name;
//! - [`driver`]: async loop ticking a root group.

mod child;
mod command;
mod driver;
mod group;
pub(crate) mod node;
mod registry;

pub use child::{Child, Runnable};
pub use command::{Command, CommandArgs};
pub use driver::drive;
pub use group::Group;
pub use registry::Registry;
