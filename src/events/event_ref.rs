use crate::error::{ActionResult, EventError};
use crate::events::EventManager;

/// A manager plus one of its event names.
///
/// Lets code subscribe to or trigger an event without knowing where the
/// manager sits in the tree. Two refs are equal when they name the same
/// event of the same manager.
///
/// # Example
/// ```
/// use tickvisor::EventManager;
///
/// let robot = EventManager::new("robot");
/// let arm = robot.child("arm");
/// let ready = arm.event("ready");
/// ready.attach("log", || Ok(()));
/// assert_eq!(ready.dir(), "robot/arm/ready");
/// ready.trigger().unwrap();
/// ```
#[derive(Clone)]
pub struct EventRef {
    manager: EventManager,
    event: String,
}

impl EventRef {
    pub fn new(manager: EventManager, event: impl Into<String>) -> Self {
        Self {
            manager,
            event: event.into(),
        }
    }

    pub fn manager(&self) -> &EventManager {
        &self.manager
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Full path of the event.
    pub fn dir(&self) -> String {
        self.manager.dir_of(&self.event)
    }

    /// Runs the event's subscribers.
    pub fn trigger(&self) -> Result<(), EventError> {
        self.manager.trigger(&self.event)
    }

    pub fn attach<F>(&self, subscriber: impl Into<String>, callback: F)
    where
        F: Fn() -> ActionResult + 'static,
    {
        self.manager.attach(&self.event, subscriber, callback);
    }

    pub fn single_time_attach<F>(&self, subscriber: impl Into<String>, callback: F)
    where
        F: Fn() -> ActionResult + 'static,
    {
        self.manager.single_time_attach(&self.event, subscriber, callback);
    }

    pub fn detach(&self, subscriber: &str) -> bool {
        self.manager.detach_from_event(&self.event, subscriber)
    }

    pub fn subscribers(&self) -> Vec<String> {
        self.manager.subscribers(&self.event)
    }
}

impl PartialEq for EventRef {
    fn eq(&self, other: &Self) -> bool {
        self.manager.ptr_eq(&other.manager) && self.event == other.event
    }
}

impl Eq for EventRef {}

impl std::fmt::Debug for EventRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EventRef").field(&self.dir()).finish()
    }
}
