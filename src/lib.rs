//! # tickvisor
//!
//! **Tickvisor** is a single-threaded cooperative scheduler for control
//! loops. A driver calls [`Group::tick`] on a root group once per period;
//! every tick advances a tree of groups and tasks without blocking.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                    driver (drive() or your own loop)
//!                                  │ tick()
//!                                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Group "root"                                                     │
//! │  - pending: deferred commands and queued actions (FIFO)           │
//! │  - children: key → Child       active: key → Child (⊆ children)   │
//! │  - auto_start / auto_stop policies, max_active ceiling            │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │ Task         │   │ TaskEx       │   │ Group "arm"  │
//!     │ (one action) │   │ (step list)  │   │ (nested)     │
//!     └──────────────┘   └──────┬───────┘   └──────┬───────┘
//!                               │ wait_for_event   │ run_command(Start|Pause)
//!                               ▼                  ▼
//!                    ┌────────────────────┐   parent.dispatch(key, cmd)
//!                    │ EventManager tree  │     (loop upward under the
//!                    │ "arm/gripper/done" │      auto-management policy)
//!                    └────────────────────┘
//! ```
//!
//! ### Tick
//! ```text
//! Group::tick()
//!   ├─► drain pending (queued actions may enqueue more; all run now)
//!   ├─► waiting on an event? → run placeholder, return
//!   ├─► active empty?        → run idle action, return
//!   └─► for each active child (insertion or explicit order):
//!         ├─ Task    → action(); auto_pause → Pause(self) (deferred)
//!         ├─ TaskEx  → step.action(); step.predicate() → next step
//!         └─ Group   → nested tick
//!       a failing child aborts the tick with RunError::Child { key, group }
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                      |
//! |-------------------|--------------------------------------------------------------|-----------------------------------------|
//! | **Scheduling**    | Keyed containers running an active subset every tick.        | [`Group`], [`Child`], [`Runnable`]      |
//! | **Commands**      | Start/Pause requests routed up the tree.                     | [`Command`], [`CommandArgs`]            |
//! | **Tasks**         | Plain actions, step machines, command-pattern bodies.        | [`Task`], [`TaskEx`], [`Routine`]       |
//! | **Events**        | Hierarchical pub/sub used to suspend and resume branches.    | [`EventManager`], [`EventRef`], [`WaitForAll`] |
//! | **Policies**      | Auto-management and forced-start eviction.                   | [`AutoPolicy`], [`Eviction`]            |
//! | **Errors**        | Typed errors for commands, topology, contracts and runs.     | [`CommandError`], [`RunError`], ...     |
//! | **Configuration** | Centralized defaults and the async driver.                   | [`Config`], [`drive`]                   |
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tickvisor::{Config, EventManager, Group, TaskEx, drive};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let events = EventManager::new("robot");
//!     let root = Group::new("root");
//!     let arm = Group::new("arm");
//!     root.attach(&arm)?;
//!
//!     // raise, wait for the gripper, lower
//!     let cycle = TaskEx::new("cycle");
//!     cycle.add_action_step(|| Ok(()));
//!     cycle.wait_for_event(&events.child("gripper").event("closed"));
//!     cycle.add_action_step(|| Ok(()));
//!     arm.attach(&cycle)?;
//!     cycle.start()?;
//!
//!     root.tick()?;
//!     root.tick()?;
//!     assert!(root.is_waiting());
//!     events.trigger("gripper/closed")?;
//!
//!     let cfg = Config {
//!         tick_period: Duration::from_millis(1),
//!         stop_when_done: true,
//!         ..Config::default()
//!     };
//!     drive(&root, &cfg, CancellationToken::new()).await?;
//!     assert!(cycle.is_done());
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod policies;
mod tasks;

// ---- Public re-exports ----

pub use config::Config;
pub use core::{Child, Command, CommandArgs, Group, Registry, Runnable, drive};
pub use error::{ActionResult, CommandError, ContractError, EventError, RunError, TopologyError};
pub use events::{Callback, EventManager, EventRef, WaitForAll};
pub use policies::{AutoPolicy, Eviction};
pub use tasks::{Action, Predicate, Routine, Task, TaskEx, WeakTask};
