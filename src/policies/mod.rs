//! Group management policies.
//!
//! This module groups the knobs that control **when** a group starts/pauses
//! itself and **which** entry makes room on a forced start.
//!
//! ## Contents
//! - [`AutoPolicy`] when a group propagates Start/Pause to its parent
//! - [`Eviction`]   which active entry a forced Start displaces
//!
//! ## Quick wiring
//! ```text
//! Group { auto_start: AutoPolicy, auto_stop: AutoPolicy, eviction: Eviction, max_active }
//!      └─► Group::run_keyed_command uses:
//!           - auto_start/auto_stop to decide the follow-up command for its parent
//!           - eviction.pick(len) when Start is forced past max_active
//! ```
//!
//! ## Defaults
//! - `AutoPolicy::Always` on both sides.
//! - `Eviction::Random`.

mod auto;
mod eviction;

pub use auto::AutoPolicy;
pub use eviction::Eviction;
