//! # WaitForAll: fires an output event once every input event fired.
//!
//! ```text
//! in_a ──┐
//! in_b ──┼──► [a ✓, b ✓, c ✓] ──► output.trigger() ──► clear()
//! in_c ──┘
//! ```
//!
//! Inputs are watched with single-time subscriptions named
//! `trigger for environment - {name}`. The subscriptions keep the
//! aggregator alive until it completes or is cleared.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::error::{ActionResult, EventError};
use crate::events::EventRef;

struct WaitCore {
    name: String,
    entries: RefCell<Vec<(EventRef, bool)>>,
    output: RefCell<Option<EventRef>>,
}

/// Aggregates several events into one.
///
/// # Example
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use tickvisor::{EventManager, WaitForAll};
///
/// let events = EventManager::new("events");
/// let done = Rc::new(Cell::new(false));
/// let d = done.clone();
/// events.attach("both", "flag", move || { d.set(true); Ok(()) });
///
/// let wait = WaitForAll::new("both", Some(events.event("both")));
/// wait.attach_events(&[events.event("left"), events.event("right")]);
///
/// events.trigger("left").unwrap();
/// assert!(!done.get());
/// events.trigger("right").unwrap();
/// assert!(done.get());
/// ```
#[derive(Clone)]
pub struct WaitForAll {
    core: Rc<WaitCore>,
}

impl WaitForAll {
    pub fn new(name: impl Into<String>, output: Option<EventRef>) -> Self {
        Self {
            core: Rc::new(WaitCore {
                name: name.into(),
                entries: RefCell::new(Vec::new()),
                output: RefCell::new(output),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    fn subscriber(&self) -> String {
        format!("trigger for environment - {}", self.core.name)
    }

    pub fn output(&self) -> Option<EventRef> {
        self.core.output.borrow().clone()
    }

    pub fn set_output(&self, output: Option<EventRef>) {
        *self.core.output.borrow_mut() = output;
    }

    /// Events being watched, in attach order.
    pub fn events(&self) -> Vec<EventRef> {
        self.core.entries.borrow().iter().map(|(e, _)| e.clone()).collect()
    }

    /// Number of watched events that have not fired yet.
    pub fn remaining(&self) -> usize {
        self.core.entries.borrow().iter().filter(|(_, fired)| !fired).count()
    }

    /// Starts watching `events`. An event already watched is reset to unfired.
    pub fn attach_events(&self, events: &[EventRef]) {
        for event in events {
            let this = self.clone();
            let fired = event.clone();
            event.single_time_attach(self.subscriber(), move || this.on_trigger(&fired));

            let mut entries = self.core.entries.borrow_mut();
            match entries.iter_mut().find(|(e, _)| e == event) {
                Some(entry) => entry.1 = false,
                None => entries.push((event.clone(), false)),
            }
        }
    }

    /// Stops watching `events`.
    ///
    /// If every event still watched has fired, the output triggers now.
    pub fn detach_events(&self, events: &[EventRef]) -> Result<(), EventError> {
        let subscriber = self.subscriber();
        for event in events {
            event.detach(&subscriber);
            self.core.entries.borrow_mut().retain(|(e, _)| e != event);
        }
        if self.remaining() == 0 {
            self.trigger_out()?;
        }
        Ok(())
    }

    /// Drops every watched event without triggering the output.
    pub fn clear(&self) {
        let subscriber = self.subscriber();
        let entries = std::mem::take(&mut *self.core.entries.borrow_mut());
        for (event, _) in entries {
            event.detach(&subscriber);
        }
    }

    fn on_trigger(&self, event: &EventRef) -> ActionResult {
        let complete = {
            let mut entries = self.core.entries.borrow_mut();
            if let Some(entry) = entries.iter_mut().find(|(e, _)| e == event) {
                entry.1 = true;
            }
            entries.iter().all(|(_, fired)| *fired)
        };
        if complete {
            self.trigger_out()?;
        }
        Ok(())
    }

    fn trigger_out(&self) -> Result<(), EventError> {
        debug!(name = %self.core.name, "all events fired");
        self.clear();
        match self.output() {
            Some(output) => output.trigger(),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for WaitForAll {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitForAll")
            .field("name", &self.core.name)
            .field("events", &self.events())
            .field("remaining", &self.remaining())
            .finish()
    }
}
