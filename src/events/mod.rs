//! Event tree: named callbacks addressed by path.
//!
//! This module groups the event **registry** used to suspend and resume
//! branches of the scheduling tree without polling.
//!
//! ## Contents
//! - [`EventManager`] tree of `event → subscriber → callback` registries
//! - [`EventRef`] a manager plus one event name
//! - [`WaitForAll`] output event fired once several inputs fired
//!
//! ## Quick reference
//! - **Publishers**: any code calling `trigger`, `trigger_recursively`.
//! - **Consumers**: `TaskEx::wait_for_event`, `Group::wait_for_event`,
//!   `WaitForAll` and user callbacks.

mod event_ref;
mod manager;
mod wait_all;

pub use event_ref::EventRef;
pub use manager::{Callback, EventManager};
pub use wait_all::WaitForAll;
