//! # EventManager: hierarchical named-callback registry.
//!
//! Each manager maps `event → subscriber → callback` and owns a set of
//! child managers. Events are addressed by path from any manager:
//!
//! ```text
//! root ── arm ── gripper          root.trigger("arm/gripper/closed")
//!          │                        └─► arm.trigger("gripper/closed")
//!          └── lift                       └─► gripper.trigger("closed")
//! ```
//!
//! ## Rules
//! - Subscriber names are unique per event; re-attaching a name replaces it.
//! - Subscribers run in attach order.
//! - A trigger runs a snapshot of the subscribers. Entries removed or
//!   replaced by an earlier callback are skipped; the others run once.
//! - A failing callback does not stop the remaining ones; the first failure
//!   is reported once all have run.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{ActionResult, EventError, TopologyError};
use crate::events::EventRef;

/// Shared event callback.
pub type Callback = Rc<dyn Fn() -> ActionResult>;

struct Subscription {
    id: u64,
    callback: Callback,
}

pub(crate) struct ManagerCore {
    name: String,
    separator: char,
    events: RefCell<IndexMap<String, IndexMap<String, Subscription>>>,
    children: RefCell<IndexMap<String, EventManager>>,
    parent: RefCell<Weak<ManagerCore>>,
    next_id: Cell<u64>,
}

/// Node of the event tree.
///
/// `EventManager` is a handle; clones share the same manager. Children are
/// owned by their parent, the parent link is weak.
///
/// # Example
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use tickvisor::EventManager;
///
/// let root = EventManager::new("root");
/// let fired = Rc::new(Cell::new(0));
/// let f = fired.clone();
/// root.child("c").attach("e", "count", move || {
///     f.set(f.get() + 1);
///     Ok(())
/// });
///
/// root.trigger("c/e").unwrap();
/// assert_eq!(fired.get(), 1);
/// assert_eq!(root.child("c").dir_of("e"), "root/c/e");
/// ```
#[derive(Clone)]
pub struct EventManager {
    core: Rc<ManagerCore>,
}

impl EventManager {
    /// Creates a detached manager using the default `/` separator.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, &Config::default())
    }

    /// Creates a detached manager using `cfg.separator`.
    pub fn with_config(name: impl Into<String>, cfg: &Config) -> Self {
        Self::with_separator(name, cfg.separator)
    }

    fn with_separator(name: impl Into<String>, separator: char) -> Self {
        Self {
            core: Rc::new(ManagerCore {
                name: name.into(),
                separator,
                events: RefCell::new(IndexMap::new()),
                children: RefCell::new(IndexMap::new()),
                parent: RefCell::new(Weak::new()),
                next_id: Cell::new(0),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<ManagerCore> {
        Rc::downgrade(&self.core)
    }

    pub(crate) fn from_weak(weak: &Weak<ManagerCore>) -> Option<Self> {
        weak.upgrade().map(|core| Self { core })
    }

    /// True if both handles point at the same manager.
    pub fn ptr_eq(&self, other: &EventManager) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn separator(&self) -> char {
        self.core.separator
    }

    pub fn parent(&self) -> Option<EventManager> {
        Self::from_weak(&self.core.parent.borrow())
    }

    /// Names from the root down to this manager, joined by the separator.
    pub fn dir(&self) -> String {
        let mut names = vec![self.name().to_string()];
        let mut cur = self.parent();
        while let Some(m) = cur {
            names.push(m.name().to_string());
            cur = m.parent();
        }
        names.reverse();
        let separator = self.core.separator.to_string();
        names.join(separator.as_str())
    }

    /// Full path of `event` in this manager.
    pub fn dir_of(&self, event: &str) -> String {
        format!("{}{}{}", self.dir(), self.core.separator, event)
    }

    /// Handle to `event` in this manager.
    pub fn event(&self, event: impl Into<String>) -> EventRef {
        EventRef::new(self.clone(), event)
    }

    // ---------------------------
    // Children
    // ---------------------------

    /// Child manager `name`, created on first use.
    pub fn child(&self, name: &str) -> EventManager {
        if let Some(existing) = self.get_child(name) {
            return existing;
        }
        let child = Self::with_separator(name, self.core.separator);
        *child.core.parent.borrow_mut() = self.downgrade();
        self.core
            .children
            .borrow_mut()
            .insert(name.to_string(), child.clone());
        child
    }

    /// Existing child manager `name`.
    pub fn get_child(&self, name: &str) -> Option<EventManager> {
        self.core.children.borrow().get(name).cloned()
    }

    /// Names of the child managers, in attach order.
    pub fn children_names(&self) -> Vec<String> {
        self.core.children.borrow().keys().cloned().collect()
    }

    /// Adopts `child` under its own name, moving it from its old parent.
    ///
    /// A child with the same name is replaced.
    pub fn attach_child(&self, child: &EventManager) -> Result<(), TopologyError> {
        if child.name().is_empty() {
            return Err(TopologyError::EmptyKey {
                name: child.name().to_string(),
            });
        }
        let mut cur = Some(self.clone());
        while let Some(m) = cur {
            if m.ptr_eq(child) {
                return Err(TopologyError::Cycle {
                    child: child.name().to_string(),
                    parent: self.name().to_string(),
                });
            }
            cur = m.parent();
        }

        if let Some(old) = child.parent() {
            old.detach(child.name());
        }
        self.detach(child.name());

        *child.core.parent.borrow_mut() = self.downgrade();
        self.core
            .children
            .borrow_mut()
            .insert(child.name().to_string(), child.clone());
        Ok(())
    }

    /// Removes child `name` and clears its parent link.
    pub fn detach(&self, name: &str) -> Option<EventManager> {
        let child = self.core.children.borrow_mut().shift_remove(name)?;
        *child.core.parent.borrow_mut() = Weak::new();
        Some(child)
    }

    // ---------------------------
    // Subscriptions
    // ---------------------------

    fn next_id(&self) -> u64 {
        let id = self.core.next_id.get();
        self.core.next_id.set(id + 1);
        id
    }

    fn insert(&self, event: &str, subscriber: String, index: Option<usize>, sub: Subscription) {
        let mut events = self.core.events.borrow_mut();
        let subs = events.entry(event.to_string()).or_default();
        match index {
            Some(i) => {
                subs.shift_remove(&subscriber);
                let i = i.min(subs.len());
                subs.shift_insert(i, subscriber, sub);
            }
            None => {
                subs.shift_remove(&subscriber);
                subs.insert(subscriber, sub);
            }
        }
    }

    /// Subscribes `callback` to `event` under `subscriber`.
    pub fn attach<F>(&self, event: &str, subscriber: impl Into<String>, callback: F)
    where
        F: Fn() -> ActionResult + 'static,
    {
        let id = self.next_id();
        let sub = Subscription {
            id,
            callback: Rc::new(callback),
        };
        self.insert(event, subscriber.into(), None, sub);
    }

    /// Subscribes at position `index` among the event's subscribers.
    pub fn attach_at<F>(&self, event: &str, index: usize, subscriber: impl Into<String>, callback: F)
    where
        F: Fn() -> ActionResult + 'static,
    {
        let id = self.next_id();
        let sub = Subscription {
            id,
            callback: Rc::new(callback),
        };
        self.insert(event, subscriber.into(), Some(index), sub);
    }

    /// Subscribes a callback that detaches itself after its first run.
    ///
    /// The detach happens whether or not the callback succeeded.
    pub fn single_time_attach<F>(&self, event: &str, subscriber: impl Into<String>, callback: F)
    where
        F: Fn() -> ActionResult + 'static,
    {
        let subscriber = subscriber.into();
        let id = self.next_id();
        let weak = self.downgrade();
        let ev = event.to_string();
        let name = subscriber.clone();

        let wrapped = move || {
            let result = callback();
            if let Some(manager) = EventManager::from_weak(&weak) {
                manager.detach_if_same(&ev, &name, id);
            }
            result
        };
        self.insert(
            event,
            subscriber,
            None,
            Subscription {
                id,
                callback: Rc::new(wrapped),
            },
        );
    }

    fn detach_if_same(&self, event: &str, subscriber: &str, id: u64) {
        let mut events = self.core.events.borrow_mut();
        if let Some(subs) = events.get_mut(event) {
            if subs.get(subscriber).is_some_and(|s| s.id == id) {
                subs.shift_remove(subscriber);
            }
        }
    }

    /// Removes `subscriber` from `event`; returns whether it was present.
    pub fn detach_from_event(&self, event: &str, subscriber: &str) -> bool {
        let mut events = self.core.events.borrow_mut();
        events
            .get_mut(event)
            .is_some_and(|subs| subs.shift_remove(subscriber).is_some())
    }

    /// Drops every subscriber of `event`.
    pub fn clear_event(&self, event: &str) {
        self.core.events.borrow_mut().shift_remove(event);
    }

    /// Names of the events with subscribers.
    pub fn events(&self) -> Vec<String> {
        self.core
            .events
            .borrow()
            .iter()
            .filter(|(_, subs)| !subs.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Subscriber names of `event`, in run order.
    pub fn subscribers(&self, event: &str) -> Vec<String> {
        self.core
            .events
            .borrow()
            .get(event)
            .map(|subs| subs.keys().cloned().collect())
            .unwrap_or_default()
    }

    // ---------------------------
    // Triggering
    // ---------------------------

    /// Triggers `path` relative to this manager.
    ///
    /// Every separator-delimited prefix names a child manager; the last
    /// segment is the event.
    ///
    /// # Errors
    /// - [`EventError::UnknownManager`] if a prefix segment names no child
    /// - [`EventError::Callback`] if any callback failed
    pub fn trigger(&self, path: &str) -> Result<(), EventError> {
        let mut manager = self.clone();
        let mut rest = path;
        while let Some((segment, tail)) = rest.split_once(self.core.separator) {
            manager = manager
                .get_child(segment)
                .ok_or_else(|| EventError::UnknownManager {
                    segment: segment.to_string(),
                    dir: manager.dir(),
                })?;
            rest = tail;
        }
        manager.trigger_local(rest)
    }

    /// Triggers `event` on every descendant (children first), then here.
    pub fn trigger_recursively(&self, event: &str) -> Result<(), EventError> {
        self.trigger_recursively_to_depth(event, usize::MAX)
    }

    /// [`trigger_recursively`](EventManager::trigger_recursively) limited to
    /// `depth` levels: `1` triggers only this manager, `0` nothing.
    ///
    /// Every manager in range is triggered; the first failure is returned.
    pub fn trigger_recursively_to_depth(&self, event: &str, depth: usize) -> Result<(), EventError> {
        if depth == 0 {
            return Ok(());
        }
        let children: Vec<EventManager> = self.core.children.borrow().values().cloned().collect();
        let mut first_err = None;
        for child in children {
            if let Err(e) = child.trigger_recursively_to_depth(event, depth - 1) {
                first_err = first_err.or(Some(e));
            }
        }
        if let Err(e) = self.trigger_local(event) {
            first_err = first_err.or(Some(e));
        }
        first_err.map_or(Ok(()), Err)
    }

    fn trigger_local(&self, event: &str) -> Result<(), EventError> {
        let snapshot: Vec<(String, u64, Callback)> = match self.core.events.borrow().get(event) {
            Some(subs) => subs
                .iter()
                .map(|(name, s)| (name.clone(), s.id, s.callback.clone()))
                .collect(),
            None => return Ok(()),
        };
        trace!(dir = %self.dir(), event, subscribers = snapshot.len(), "trigger");

        let mut failed = 0;
        let mut first: Option<(String, anyhow::Error)> = None;
        for (name, id, callback) in snapshot {
            if !self.is_subscribed(event, &name, id) {
                debug!(dir = %self.dir(), event, subscriber = %name, "skipping detached subscriber");
                continue;
            }
            if let Err(e) = callback() {
                failed += 1;
                if first.is_none() {
                    first = Some((name, e));
                }
            }
        }

        match first {
            None => Ok(()),
            Some((subscriber, source)) => Err(EventError::Callback {
                event: event.to_string(),
                dir: self.dir(),
                subscriber,
                failed,
                source,
            }),
        }
    }

    fn is_subscribed(&self, event: &str, subscriber: &str, id: u64) -> bool {
        self.core
            .events
            .borrow()
            .get(event)
            .and_then(|subs| subs.get(subscriber))
            .is_some_and(|s| s.id == id)
    }
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("dir", &self.dir())
            .field("events", &self.events())
            .field("children", &self.children_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> (Rc<Cell<u32>>, impl Fn() -> ActionResult + Clone + 'static) {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        (count, move || {
            c.set(c.get() + 1);
            Ok(())
        })
    }

    #[test]
    fn test_path_trigger_reaches_child_once() {
        let root = EventManager::new("root");
        let (count, cb) = counter();
        root.child("c").attach("e", "sub", cb);

        root.trigger("c/e").unwrap();
        assert_eq!(count.get(), 1);
        // local event of the same name is a different event
        root.trigger("e").unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_unknown_segment_fails_loudly() {
        let root = EventManager::new("root");
        root.child("a");
        let err = root.trigger("a/missing/e").unwrap_err();
        assert!(
            matches!(err, EventError::UnknownManager { ref segment, ref dir } if segment == "missing" && dir == "root/a")
        );
    }

    #[test]
    fn test_three_single_time_subscribers_fire_once() {
        let m = EventManager::new("m");
        let (count, cb) = counter();
        for name in ["one", "two", "three"] {
            m.single_time_attach("E", name, cb.clone());
        }

        m.trigger("E").unwrap();
        assert_eq!(count.get(), 3);
        assert!(m.subscribers("E").is_empty());

        m.trigger("E").unwrap();
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn test_subscriber_detached_by_sibling_is_skipped() {
        let m = EventManager::new("m");
        let (count, cb) = counter();
        let handle = m.clone();
        m.attach("E", "remover", move || {
            handle.detach_from_event("E", "victim");
            Ok(())
        });
        m.attach("E", "victim", cb.clone());
        m.attach("E", "survivor", cb);

        m.trigger("E").unwrap();
        assert_eq!(count.get(), 1);
        assert_eq!(m.subscribers("E"), vec!["remover", "survivor"]);
    }

    #[test]
    fn test_failures_do_not_stop_siblings() {
        let m = EventManager::new("sub");
        let root = EventManager::new("main");
        root.attach_child(&m).unwrap();

        let (count, cb) = counter();
        m.attach("test", "throw", || Err(anyhow::anyhow!("boom")));
        m.attach("test", "after", cb);
        m.attach("test", "throw-again", || Err(anyhow::anyhow!("again")));

        let err = root.trigger("sub/test").unwrap_err();
        assert_eq!(count.get(), 1);
        match err {
            EventError::Callback {
                subscriber, dir, failed, ..
            } => {
                assert_eq!(subscriber, "throw");
                assert_eq!(dir, "main/sub");
                assert_eq!(failed, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_recursive_trigger_runs_children_first() {
        let root = EventManager::new("root");
        let order = Rc::new(RefCell::new(Vec::new()));
        for (m, tag) in [
            (root.clone(), "root"),
            (root.child("a"), "a"),
            (root.child("a").child("deep"), "deep"),
            (root.child("b"), "b"),
        ] {
            let o = order.clone();
            m.attach("init", "log", move || {
                o.borrow_mut().push(tag);
                Ok(())
            });
        }

        root.trigger_recursively("init").unwrap();
        assert_eq!(*order.borrow(), vec!["deep", "a", "b", "root"]);

        order.borrow_mut().clear();
        root.trigger_recursively_to_depth("init", 2).unwrap();
        assert_eq!(*order.borrow(), vec!["a", "b", "root"]);

        order.borrow_mut().clear();
        root.trigger_recursively_to_depth("init", 0).unwrap();
        assert!(order.borrow().is_empty());
    }

    #[test]
    fn test_recursive_trigger_tolerates_topology_changes() {
        let root = EventManager::new("root");
        let a = root.child("a");
        let (count, cb) = counter();
        let (r, h) = (root.clone(), a.clone());
        a.attach("init", "grow", move || {
            h.child("b").attach("init", "late", cb.clone());
            r.child("sibling");
            Ok(())
        });

        root.trigger_recursively("init").unwrap();
        assert_eq!(root.children_names(), vec!["a", "sibling"]);
        assert_eq!(a.children_names(), vec!["b"]);
        // managers created during the trigger are not part of it
        assert_eq!(count.get(), 0);

        root.trigger_recursively("init").unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_attach_at_and_replacement_keep_order() {
        let m = EventManager::new("m");
        m.attach("E", "a", || Ok(()));
        m.attach("E", "b", || Ok(()));
        m.attach_at("E", 0, "first", || Ok(()));
        m.attach("E", "a", || Ok(()));
        assert_eq!(m.subscribers("E"), vec!["first", "b", "a"]);

        m.clear_event("E");
        assert!(m.events().is_empty());
    }

    #[test]
    fn test_attach_child_moves_and_rejects_cycles() {
        let a = EventManager::new("a");
        let b = EventManager::new("b");
        let c = EventManager::new("c");
        a.attach_child(&c).unwrap();
        b.attach_child(&c).unwrap();

        assert!(a.get_child("c").is_none());
        assert_eq!(c.dir(), "b/c");
        assert!(matches!(c.attach_child(&b), Err(TopologyError::Cycle { .. })));

        let detached = b.detach("c").unwrap();
        assert!(detached.parent().is_none());
        assert_eq!(detached.dir(), "c");
    }

    #[test]
    fn test_custom_separator() {
        let cfg = Config {
            separator: '.',
            ..Config::default()
        };
        let root = EventManager::with_config("root", &cfg);
        let (count, cb) = counter();
        root.child("x").attach("e", "s", cb);
        root.trigger("x.e").unwrap();
        assert_eq!(count.get(), 1);
        assert_eq!(root.child("x").dir_of("e"), "root.x.e");
    }
}
