//! # Group: keyed container that runs its active children every tick.
//!
//! A [`Group`] owns a keyed set of children ([`Child`]) and an **active**
//! subset. Each [`tick`](Group::tick) first drains the queued actions, then
//! runs every active child once.
//!
//! ## Architecture
//! ```text
//! driver ──► root.tick()
//!              ├─► drain pending (FIFO; may enqueue more, all run now)
//!              └─► for child in active (insertion or explicit order)
//!                    └─► child.run()  ──► Task action / step / nested tick
//!
//! child.run_command(Start|Pause)
//!   └─► parent.dispatch(key, cmd)
//!         ├─ parent iterating? → push to parent.pending
//!         └─ apply(key, cmd)   → follow-up from auto policy?
//!                                   └─► loop upward: grandparent.dispatch(...)
//! ```
//!
//! ## Rules
//! - `active ⊆ children` at all times; detach removes from `active` first.
//! - Start/Pause issued while the group iterates its active set are queued
//!   and applied at the start of the next tick, before iteration. Anywhere
//!   else they apply at once and return their outcome.
//! - A queued command is dropped when a newer command for the same key was
//!   applied before it drained.
//! - Auto-management walks up the tree in a loop, never by recursion.
//! - A failing child aborts the tick; the error names the child key and
//!   the group.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::core::child::{Child, Runnable};
use crate::core::command::{Command, CommandArgs};
use crate::core::node::{Node, ParentLink};
use crate::error::{ActionResult, CommandError, RunError, TopologyError};
use crate::events::EventRef;
use crate::policies::{AutoPolicy, Eviction};
use crate::tasks::{Action, Task};

/// Deferred closure run at the start of the next tick.
type PendingAction = Box<dyn FnOnce(&Group) -> Result<(), RunError>>;

struct GroupState {
    children: IndexMap<String, Child>,
    active: IndexMap<String, Child>,
    /// Execution order for ordered groups; `None` iterates `active` directly.
    order: Option<Vec<String>>,
    pending: VecDeque<PendingAction>,
    /// Issue number of the last applied command per key.
    applied: IndexMap<String, u64>,
    issued: u64,
    auto_start: AutoPolicy,
    auto_stop: AutoPolicy,
    max_active: Option<usize>,
    eviction: Eviction,
    idle: Option<Action>,
    placeholder: Option<Action>,
}

pub(crate) struct GroupCore {
    node: Node,
    state: RefCell<GroupState>,
    iterating: Cell<bool>,
    /// Auto-stop held back by queued actions.
    stop_held: Cell<bool>,
    waiting: Cell<bool>,
    separator: char,
}

/// Restores a tick-phase flag even when a child fails mid-tick.
struct PhaseGuard<'a> {
    flag: &'a Cell<bool>,
    prev: bool,
}

impl<'a> PhaseGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        let prev = flag.replace(true);
        Self { flag, prev }
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(self.prev);
    }
}

/// Keyed container of tasks and nested groups.
///
/// `Group` is a cheap handle: clones point at the same group. The tree owns
/// its children; the only upward references are weak.
///
/// # Example
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use tickvisor::{Group, Task};
///
/// let root = Group::new("root");
/// let count = Rc::new(Cell::new(0));
/// let c = count.clone();
/// let counter = Task::new("counter", move || {
///     c.set(c.get() + 1);
///     Ok(())
/// });
/// root.attach(&counter).unwrap();
/// root.start("counter").unwrap();
///
/// root.tick().unwrap();
/// root.tick().unwrap();
/// assert_eq!(count.get(), 2);
/// ```
#[derive(Clone)]
pub struct Group {
    core: Rc<GroupCore>,
}

impl Group {
    /// Creates a detached, unordered group with default configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, &Config::default())
    }

    /// Creates a detached, unordered group from `cfg`.
    pub fn with_config(name: impl Into<String>, cfg: &Config) -> Self {
        Self::build(name, cfg, None)
    }

    /// Creates a group that runs its active children in an explicit order.
    pub fn ordered(name: impl Into<String>) -> Self {
        Self::ordered_with_config(name, &Config::default())
    }

    /// Ordered variant of [`Group::with_config`].
    pub fn ordered_with_config(name: impl Into<String>, cfg: &Config) -> Self {
        Self::build(name, cfg, Some(Vec::new()))
    }

    fn build(name: impl Into<String>, cfg: &Config, order: Option<Vec<String>>) -> Self {
        let state = GroupState {
            children: IndexMap::new(),
            active: IndexMap::new(),
            order,
            pending: VecDeque::new(),
            applied: IndexMap::new(),
            issued: 0,
            auto_start: cfg.auto_start,
            auto_stop: cfg.auto_stop,
            max_active: cfg.active_limit(),
            eviction: cfg.eviction,
            idle: None,
            placeholder: None,
        };
        Self {
            core: Rc::new(GroupCore {
                node: Node::new(name),
                state: RefCell::new(state),
                iterating: Cell::new(false),
                stop_held: Cell::new(false),
                waiting: Cell::new(false),
                separator: cfg.separator,
            }),
        }
    }

    pub(crate) fn from_core(core: Rc<GroupCore>) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &Rc<GroupCore> {
        &self.core
    }

    pub(crate) fn node(&self) -> &Node {
        &self.core.node
    }

    /// True if both handles point at the same group.
    pub fn ptr_eq(&self, other: &Group) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }

    // ---------------------------
    // Identity and linkage
    // ---------------------------

    /// Name of this group.
    pub fn name(&self) -> &str {
        self.core.node.name()
    }

    /// Key under which the parent stores this group.
    pub fn key(&self) -> Option<String> {
        self.core.node.key()
    }

    /// Owning group, if attached.
    pub fn parent(&self) -> Option<Group> {
        self.core.node.parent()
    }

    /// True if attached to a live parent.
    pub fn is_attached(&self) -> bool {
        self.core.node.is_attached()
    }

    /// True for groups created with [`Group::ordered`].
    pub fn is_ordered(&self) -> bool {
        self.core.state.borrow().order.is_some()
    }

    // ---------------------------
    // Children
    // ---------------------------

    /// Attaches a child under its own name.
    pub fn attach(&self, child: impl Into<Child>) -> Result<(), TopologyError> {
        let child = child.into();
        let key = child.name().to_string();
        self.attach_as(key, child)
    }

    /// Attaches a child under `key`.
    ///
    /// The child is detached from its previous parent first. An existing
    /// child stored under the same key is detached and replaced.
    pub fn attach_as(&self, key: impl Into<String>, child: impl Into<Child>) -> Result<(), TopologyError> {
        let key = key.into();
        let child = child.into();
        if key.is_empty() {
            return Err(TopologyError::EmptyKey {
                name: child.name().to_string(),
            });
        }
        if let Child::Composite(g) = &child {
            if self.has_ancestor_or_self(g) {
                return Err(TopologyError::Cycle {
                    child: g.name().to_string(),
                    parent: self.name().to_string(),
                });
            }
        }

        if let Some((old_parent, old_key)) = child.link() {
            old_parent.detach(&old_key);
        }
        self.detach(&key);

        child.set_link(Some(ParentLink::new(key.clone(), self.core())));
        self.core.state.borrow_mut().children.insert(key, child);
        Ok(())
    }

    /// Wraps `action` in a [`Task`] named `key` and attaches it.
    pub fn attach_action<F>(&self, key: impl Into<String>, action: F) -> Result<Task, TopologyError>
    where
        F: Fn() -> ActionResult + 'static,
    {
        let key = key.into();
        let task = Task::new(key.clone(), action);
        self.attach_as(key, &task)?;
        Ok(task)
    }

    /// Attaches `child` under `key` inside the group addressed by `path`.
    ///
    /// An empty path targets this group.
    pub fn attach_at_path(
        &self,
        path: &str,
        key: impl Into<String>,
        child: impl Into<Child>,
    ) -> Result<(), TopologyError> {
        let target = self.resolve_group(path)?;
        target.attach_as(key, child)
    }

    /// Removes the child stored under `key` and unlinks it.
    ///
    /// An active child is removed from the active set first (its stop hook
    /// sees `interrupted = true`), which may auto-pause this group.
    pub fn detach(&self, key: &str) -> Option<Child> {
        let (child, was_active, wants_stop) = {
            let mut st = self.core.state.borrow_mut();
            if !st.children.contains_key(key) {
                return None;
            }
            let was_active = st.active.shift_remove(key).is_some();
            if let Some(order) = st.order.as_mut() {
                order.retain(|k| k != key);
            }
            let child = st.children.shift_remove(key)?;
            st.applied.shift_remove(key);
            let wants_stop = was_active && self.stop_decision(&st);
            (child, was_active, wants_stop)
        };

        child.set_link(None);
        if was_active {
            child.on_stop(true);
        }
        debug!(group = %self.name(), key, "detached child");
        if wants_stop {
            self.request_parent(Command::Pause);
        }
        Some(child)
    }

    /// Child stored under `key`.
    pub fn child(&self, key: &str) -> Option<Child> {
        self.core.state.borrow().children.get(key).cloned()
    }

    /// Looks up a descendant by separator-joined keys (`"arm/lift"`).
    pub fn find(&self, path: &str) -> Option<Child> {
        let mut segments = path.split(self.core.separator).peekable();
        let mut current = self.clone();
        while let Some(seg) = segments.next() {
            let child = current.child(seg)?;
            if segments.peek().is_none() {
                return Some(child);
            }
            current = child.as_group()?.clone();
        }
        None
    }

    fn resolve_group(&self, path: &str) -> Result<Group, TopologyError> {
        let mut current = self.clone();
        if path.is_empty() {
            return Ok(current);
        }
        for seg in path.split(self.core.separator) {
            let next = current.child(seg).and_then(|c| c.as_group().cloned());
            match next {
                Some(g) => current = g,
                None => {
                    return Err(TopologyError::UnknownPath {
                        segment: seg.to_string(),
                        at: current.name().to_string(),
                    });
                }
            }
        }
        Ok(current)
    }

    fn has_ancestor_or_self(&self, candidate: &Group) -> bool {
        let mut cur = Some(self.clone());
        while let Some(g) = cur {
            if g.ptr_eq(candidate) {
                return true;
            }
            cur = g.parent();
        }
        false
    }

    /// Keys of all children, in attach order.
    pub fn children_keys(&self) -> Vec<String> {
        self.core.state.borrow().children.keys().cloned().collect()
    }

    /// Keys of the active children, in activation order.
    pub fn active_keys(&self) -> Vec<String> {
        self.core.state.borrow().active.keys().cloned().collect()
    }

    /// Execution order of an ordered group (may contain duplicates).
    ///
    /// For unordered groups this equals [`Group::active_keys`].
    pub fn order(&self) -> Vec<String> {
        let st = self.core.state.borrow();
        match &st.order {
            Some(order) => order.clone(),
            None => st.active.keys().cloned().collect(),
        }
    }

    /// Number of children.
    pub fn children_len(&self) -> usize {
        self.core.state.borrow().children.len()
    }

    /// Number of active children.
    pub fn active_len(&self) -> usize {
        self.core.state.borrow().active.len()
    }

    /// Number of queued actions awaiting the next tick.
    pub fn pending_len(&self) -> usize {
        self.core.state.borrow().pending.len()
    }

    // ---------------------------
    // State queries
    // ---------------------------

    /// True if `key` is in the active set.
    pub fn is_child_running(&self, key: &str) -> bool {
        self.core.state.borrow().active.contains_key(key)
    }

    /// True if this group is in its parent's active set.
    ///
    /// A root group always reports `false`; the driver decides when it runs.
    pub fn is_running(&self) -> bool {
        self.core.node.is_running()
    }

    /// True if this group, or any descendant, is suspended on an event.
    pub fn is_waiting(&self) -> bool {
        if self.core.waiting.get() {
            return true;
        }
        let children: Vec<Child> = self.core.state.borrow().children.values().cloned().collect();
        children.iter().any(Child::is_waiting)
    }

    // ---------------------------
    // Policies
    // ---------------------------

    /// Active ceiling, if bounded.
    pub fn max_active(&self) -> Option<usize> {
        self.core.state.borrow().max_active
    }

    /// Sets the active ceiling. Already-active entries are not evicted.
    pub fn set_max_active(&self, max: Option<usize>) {
        self.core.state.borrow_mut().max_active = max;
    }

    pub fn auto_start(&self) -> AutoPolicy {
        self.core.state.borrow().auto_start
    }

    pub fn set_auto_start(&self, policy: AutoPolicy) {
        self.core.state.borrow_mut().auto_start = policy;
    }

    pub fn auto_stop(&self) -> AutoPolicy {
        self.core.state.borrow().auto_stop
    }

    pub fn set_auto_stop(&self, policy: AutoPolicy) {
        self.core.state.borrow_mut().auto_stop = policy;
    }

    /// Victim selection for forced starts.
    pub fn set_eviction(&self, eviction: Eviction) {
        self.core.state.borrow_mut().eviction = eviction;
    }

    /// Action run by a tick that finds no active child.
    pub fn set_idle_action<F>(&self, action: Option<F>)
    where
        F: Fn() -> ActionResult + 'static,
    {
        self.core.state.borrow_mut().idle = action.map(|f| Rc::new(f) as Action);
    }

    // ---------------------------
    // Commands
    // ---------------------------

    /// Shorthand for `run_keyed_command(key, Command::Start)`.
    pub fn start(&self, key: &str) -> Result<(), CommandError> {
        self.run_keyed_command(key, Command::Start)
    }

    /// Starts `key`, evicting an active entry if the group is full.
    pub fn start_forced(&self, key: &str) -> Result<(), CommandError> {
        self.run_keyed_command_with(key, Command::Start, CommandArgs::new().forced())
    }

    /// Shorthand for `run_keyed_command(key, Command::Pause)`.
    pub fn pause(&self, key: &str) -> Result<(), CommandError> {
        self.run_keyed_command(key, Command::Pause)
    }

    /// Applies `cmd` to the child stored under `key`.
    pub fn run_keyed_command(&self, key: &str, cmd: Command) -> Result<(), CommandError> {
        self.run_keyed_command_with(key, cmd, CommandArgs::default())
    }

    /// Applies `cmd` with explicit modifiers.
    ///
    /// Called while this group iterates its children, the command is queued
    /// for the next tick and `Ok(())` is returned; a later rejection is only
    /// logged. Anywhere else it applies at once.
    ///
    /// # Example
    /// ```
    /// use tickvisor::{CommandError, Group, Task};
    ///
    /// let g = Group::new("g");
    /// g.set_max_active(Some(1));
    /// g.attach(&Task::new("a", || Ok(()))).unwrap();
    /// g.attach(&Task::new("b", || Ok(()))).unwrap();
    ///
    /// g.start("a").unwrap();
    /// assert!(matches!(g.start("b"), Err(CommandError::AtCapacity { .. })));
    /// g.start_forced("b").unwrap();
    /// assert_eq!(g.active_keys(), vec!["b"]);
    /// ```
    pub fn run_keyed_command_with(
        &self,
        key: &str,
        cmd: Command,
        args: CommandArgs,
    ) -> Result<(), CommandError> {
        self.dispatch(key, cmd, args)
    }

    /// Asks the parent to apply `cmd` to this group.
    pub fn run_command(&self, cmd: Command) -> Result<(), CommandError> {
        self.run_command_with(cmd, CommandArgs::default())
    }

    /// [`Group::run_command`] with explicit modifiers.
    pub fn run_command_with(&self, cmd: Command, args: CommandArgs) -> Result<(), CommandError> {
        match self.core.node.link() {
            Some((parent, key)) => parent.dispatch(&key, cmd, args),
            None => Err(CommandError::NoParent {
                name: self.name().to_string(),
            }),
        }
    }

    /// Queues `action` to run at the start of the next tick.
    pub fn queue_action<F>(&self, action: F)
    where
        F: FnOnce() -> ActionResult + 'static,
    {
        self.push_pending(Box::new(move |g: &Group| {
            action().map_err(|source| RunError::Queued {
                group: g.name().to_string(),
                source,
            })
        }));
    }

    fn push_pending(&self, action: PendingAction) {
        self.core.state.borrow_mut().pending.push_back(action);
    }

    /// Routes a command through this group and up the tree.
    ///
    /// Only the first hop's rejection reaches the caller; rejections of
    /// propagated follow-ups are logged.
    pub(crate) fn dispatch(&self, key: &str, cmd: Command, args: CommandArgs) -> Result<(), CommandError> {
        self.dispatch_issued(key, cmd, args, None)
    }

    /// `issued` carries the issue number of a command drained from the queue.
    fn dispatch_issued(
        &self,
        key: &str,
        cmd: Command,
        args: CommandArgs,
        issued: Option<u64>,
    ) -> Result<(), CommandError> {
        let mut target = self.clone();
        let mut issued = issued;
        let mut key = key.to_string();
        let mut cmd = cmd;
        let mut args = args;
        let mut first = true;
        // group whose auto-management produced the current follow-up
        let mut origin: Option<Group> = None;

        loop {
            if target.must_defer() {
                debug!(group = %target.name(), key = %key, ?cmd, "deferring command to next tick");
                let seq = target.next_issue();
                target.push_pending(Box::new(move |g: &Group| {
                    if origin.as_ref().is_some_and(|o| o.is_stale_request(cmd)) {
                        debug!(group = %g.name(), key = %key, ?cmd, "dropping stale auto-management request");
                        return Ok(());
                    }
                    if g.is_superseded(&key, seq) {
                        debug!(group = %g.name(), key = %key, ?cmd, "dropping superseded command");
                        return Ok(());
                    }
                    if let Err(e) = g.dispatch_issued(&key, cmd, args, Some(seq)) {
                        warn!(group = %g.name(), key = %key, ?cmd, label = e.as_label(), "deferred command rejected");
                    }
                    Ok(())
                }));
                return Ok(());
            }

            let seq = match issued.take() {
                Some(seq) => seq,
                None => target.next_issue(),
            };
            let follow = match target.apply(&key, cmd, args) {
                Ok(follow) => follow,
                Err(e) if first => return Err(e),
                Err(e) => {
                    warn!(group = %target.name(), key = %key, ?cmd, label = e.as_label(), "propagated command rejected");
                    return Ok(());
                }
            };
            first = false;
            target.record_applied(&key, cmd, seq);

            let Some(next) = follow else { return Ok(()) };
            let Some((parent, parent_key)) = target.core.node.link() else {
                return Ok(());
            };
            debug!(group = %target.name(), parent = %parent.name(), ?next, "auto-managing in parent");
            origin = Some(target);
            target = parent;
            key = parent_key;
            cmd = next;
            args = CommandArgs::default();
        }
    }

    fn must_defer(&self) -> bool {
        self.core.iterating.get()
    }

    fn next_issue(&self) -> u64 {
        let mut st = self.core.state.borrow_mut();
        st.issued += 1;
        st.issued
    }

    fn record_applied(&self, key: &str, cmd: Command, seq: u64) {
        if cmd == Command::None {
            return;
        }
        let mut st = self.core.state.borrow_mut();
        let last = st.applied.entry(key.to_string()).or_insert(seq);
        *last = (*last).max(seq);
    }

    fn is_superseded(&self, key: &str, seq: u64) -> bool {
        self.core
            .state
            .borrow()
            .applied
            .get(key)
            .is_some_and(|&last| last > seq)
    }

    /// Auto-stop decision after a removal; remembers a stop held back by
    /// queued actions so the next drain can release it.
    fn stop_decision(&self, st: &GroupState) -> bool {
        let empty = st.active.is_empty();
        let has_pending = !st.pending.is_empty();
        if has_pending && st.auto_stop.wants_stop(empty, true, false) {
            self.core.stop_held.set(true);
        }
        st.auto_stop.wants_stop(empty, true, has_pending)
    }

    fn release_held_stop(&self) {
        if !self.core.stop_held.replace(false) {
            return;
        }
        let empty = self.core.state.borrow().active.is_empty();
        if empty && self.is_running() {
            debug!(group = %self.name(), "releasing held auto-stop");
            self.request_parent(Command::Pause);
        }
    }

    /// True if a deferred self-request no longer matches this group's state.
    fn is_stale_request(&self, cmd: Command) -> bool {
        match cmd {
            Command::Start => self.active_len() == 0,
            Command::Pause => self.active_len() > 0,
            Command::None => false,
        }
    }

    /// Applies one command to this group's own sets.
    ///
    /// Returns the follow-up command this group wants from its parent.
    fn apply(&self, key: &str, cmd: Command, args: CommandArgs) -> Result<Option<Command>, CommandError> {
        match cmd {
            Command::None => Ok(None),
            Command::Start => self.apply_start(key, args),
            Command::Pause => self.apply_pause(key, args),
        }
    }

    fn apply_start(&self, key: &str, args: CommandArgs) -> Result<Option<Command>, CommandError> {
        let (inserted, evicted, was_empty, policy) = {
            let mut st = self.core.state.borrow_mut();
            let Some(child) = st.children.get(key).cloned() else {
                return Err(CommandError::UnknownChild {
                    group: self.name().to_string(),
                    key: key.to_string(),
                });
            };
            if child.is_locked() {
                return Err(CommandError::Locked {
                    group: self.name().to_string(),
                    key: key.to_string(),
                });
            }

            if st.active.contains_key(key) {
                if args.allow_duplicate {
                    insert_ordered(&mut st.order, key, args.index);
                }
                (None, None, false, st.auto_start)
            } else {
                let was_empty = st.active.is_empty();
                let mut evicted = None;
                if let Some(max) = st.max_active {
                    if st.active.len() >= max {
                        let victim = if args.force {
                            st.eviction.pick(st.active.len())
                        } else {
                            None
                        };
                        let Some(i) = victim else {
                            return Err(CommandError::AtCapacity {
                                group: self.name().to_string(),
                                max,
                            });
                        };
                        if let Some((victim_key, victim)) = st.active.shift_remove_index(i) {
                            if let Some(order) = st.order.as_mut() {
                                order.retain(|k| *k != victim_key);
                            }
                            debug!(group = %self.name(), evicted = %victim_key, "forced start evicted entry");
                            evicted = Some(victim);
                        }
                    }
                }
                st.active.insert(key.to_string(), child.clone());
                insert_ordered(&mut st.order, key, args.index);
                (Some(child), evicted, was_empty, st.auto_start)
            }
        };

        if let Some(victim) = evicted {
            victim.on_stop(true);
        }
        if let Some(child) = inserted {
            child.on_start();
        }

        let running = self.is_running() && !self.parent_has_pending();
        if self.is_attached() && policy.wants_start(running, was_empty) {
            return Ok(Some(Command::Start));
        }
        Ok(None)
    }

    fn apply_pause(&self, key: &str, args: CommandArgs) -> Result<Option<Command>, CommandError> {
        let (removed, wants_stop) = {
            let mut st = self.core.state.borrow_mut();
            if st.children.get(key).is_some_and(Child::is_locked) {
                return Err(CommandError::Locked {
                    group: self.name().to_string(),
                    key: key.to_string(),
                });
            }
            let removed = st.active.shift_remove(key);
            if let Some(order) = st.order.as_mut() {
                order.retain(|k| k != key);
            }
            let wants_stop = if removed.is_some() {
                self.stop_decision(&st)
            } else {
                st.auto_stop
                    .wants_stop(st.active.is_empty(), false, !st.pending.is_empty())
            };
            (removed, wants_stop)
        };

        if let Some(child) = removed {
            child.on_stop(args.interrupted);
        }
        if wants_stop && self.is_attached() {
            Ok(Some(Command::Pause))
        } else {
            Ok(None)
        }
    }

    fn parent_has_pending(&self) -> bool {
        self.parent().is_some_and(|p| p.pending_len() > 0)
    }

    fn request_parent(&self, cmd: Command) {
        if !self.is_attached() {
            return;
        }
        if let Err(e) = self.run_command(cmd) {
            warn!(group = %self.name(), ?cmd, label = e.as_label(), "auto-management rejected by parent");
        }
    }

    // ---------------------------
    // Event suspension
    // ---------------------------

    /// Runs `placeholder` instead of the children until `event` fires.
    ///
    /// Queued actions still drain every tick. While suspended the group
    /// reports [`is_waiting`](Group::is_waiting) and is never done.
    pub fn wait_for_event<F>(&self, event: &EventRef, placeholder: F)
    where
        F: Fn() -> ActionResult + 'static,
    {
        self.core.state.borrow_mut().placeholder = Some(Rc::new(placeholder));
        self.core.waiting.set(true);

        let weak = Rc::downgrade(&self.core);
        event.single_time_attach(format!("resume group - {}", self.name()), move || {
            if let Some(core) = weak.upgrade() {
                core.waiting.set(false);
                core.state.borrow_mut().placeholder = None;
            }
            Ok(())
        });
    }

    // ---------------------------
    // Ticking
    // ---------------------------

    /// Runs one scheduling step.
    ///
    /// 1. Drains queued actions in FIFO order (including ones they enqueue).
    /// 2. Runs every active child once, in iteration order.
    ///
    /// Commands issued during step 2 are deferred to the next tick.
    pub fn tick(&self) -> Result<(), RunError> {
        trace!(group = %self.name(), "tick");

        loop {
            let next = self.core.state.borrow_mut().pending.pop_front();
            let Some(action) = next else { break };
            action(self)?;
        }
        self.release_held_stop();

        let _iterating = PhaseGuard::enter(&self.core.iterating);

        if self.core.waiting.get() {
            let placeholder = self.core.state.borrow().placeholder.clone();
            if let Some(action) = placeholder {
                action().map_err(RunError::Action)?;
            }
            return Ok(());
        }

        let (snapshot, idle) = {
            let st = self.core.state.borrow();
            let snapshot: Vec<(String, Child)> = match &st.order {
                Some(order) => order
                    .iter()
                    .filter_map(|k| st.active.get(k).map(|c| (k.clone(), c.clone())))
                    .collect(),
                None => st.active.iter().map(|(k, c)| (k.clone(), c.clone())).collect(),
            };
            (snapshot, st.idle.clone())
        };

        if snapshot.is_empty() {
            if let Some(action) = idle {
                action().map_err(RunError::Action)?;
            }
            return Ok(());
        }

        for (key, child) in snapshot {
            if !self.is_child_running(&key) {
                continue;
            }
            child.run().map_err(|source| RunError::Child {
                key,
                group: self.name().to_string(),
                source: Box::new(source),
            })?;
        }
        Ok(())
    }

    /// Ticks until [`is_done`](Runnable::is_done) or `limit` ticks elapsed.
    ///
    /// Returns the number of ticks run.
    pub fn tick_until_done(&self, limit: usize) -> Result<usize, RunError> {
        let mut ticks = 0;
        while ticks < limit && !self.is_done() {
            self.tick()?;
            ticks += 1;
        }
        Ok(ticks)
    }
}

impl Runnable for Group {
    fn run(&self) -> Result<(), RunError> {
        self.tick()
    }

    /// Done once nothing is active, nothing is queued and nothing waits.
    fn is_done(&self) -> bool {
        let idle = {
            let st = self.core.state.borrow();
            st.active.is_empty() && st.pending.is_empty()
        };
        idle && !self.is_waiting()
    }
}

fn insert_ordered(order: &mut Option<Vec<String>>, key: &str, index: Option<usize>) {
    let Some(order) = order.as_mut() else { return };
    match index {
        Some(i) => {
            let i = i.min(order.len());
            order.insert(i, key.to_string());
        }
        None => order.push(key.to_string()),
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name())
            .field("active", &self.active_keys())
            .field("children", &self.children_keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Task) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        let make = move |name: &str| {
            let l = l.clone();
            let n = name.to_string();
            Task::new(name, move || {
                l.borrow_mut().push(n.clone());
                Ok(())
            })
        };
        (log, make)
    }

    fn assert_active_subset(g: &Group) {
        let children = g.children_keys();
        for k in g.active_keys() {
            assert!(children.contains(&k), "active key {k} missing from children");
        }
    }

    #[test]
    fn test_capacity_scenario() {
        let g = Group::new("g");
        g.set_max_active(Some(1));
        g.attach(&Task::new("a", || Ok(()))).unwrap();
        g.attach(&Task::new("b", || Ok(()))).unwrap();

        g.start("a").unwrap();
        assert_eq!(g.active_keys(), vec!["a"]);

        let err = g.start("b").unwrap_err();
        assert!(err.is_capacity());
        assert_eq!(g.active_keys(), vec!["a"]);

        g.start_forced("b").unwrap();
        assert_eq!(g.active_keys(), vec!["b"]);
        assert_active_subset(&g);
    }

    #[test]
    fn test_n_plus_one_start_fails() {
        let g = Group::new("g");
        g.set_max_active(Some(3));
        for name in ["a", "b", "c", "d"] {
            g.attach(&Task::new(name, || Ok(()))).unwrap();
        }
        for name in ["a", "b", "c"] {
            g.start(name).unwrap();
        }
        assert!(g.start("d").is_err());
        assert_eq!(g.active_len(), 3);
    }

    #[test]
    fn test_restart_of_active_entry_is_noop_even_at_capacity() {
        let g = Group::new("g");
        g.set_max_active(Some(1));
        g.attach(&Task::new("a", || Ok(()))).unwrap();
        g.start("a").unwrap();
        g.start("a").unwrap();
        assert_eq!(g.active_keys(), vec!["a"]);
    }

    #[test]
    fn test_unknown_child_and_idempotent_pause() {
        let g = Group::new("g");
        assert!(matches!(
            g.start("ghost"),
            Err(CommandError::UnknownChild { .. })
        ));
        assert!(g.pause("ghost").is_ok());
        assert!(g.run_keyed_command("ghost", Command::None).is_ok());
    }

    #[test]
    fn test_run_command_without_parent_fails() {
        let g = Group::new("lonely");
        assert!(matches!(
            g.run_command(Command::Start),
            Err(CommandError::NoParent { .. })
        ));
    }

    #[test]
    fn test_tick_runs_active_in_insertion_order() {
        let (log, make) = recorder();
        let g = Group::new("g");
        for name in ["c", "a", "b"] {
            g.attach(&make(name)).unwrap();
        }
        g.start("b").unwrap();
        g.start("c").unwrap();
        g.start("a").unwrap();

        g.tick().unwrap();
        assert_eq!(*log.borrow(), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_pause_during_tick_is_deferred() {
        let g = Group::new("g");
        let runs = Rc::new(Cell::new(0));

        let task = Task::empty("self-pausing");
        let r = runs.clone();
        let weak_task = task.downgrade();
        task.set_action(move || {
            r.set(r.get() + 1);
            if let Some(t) = weak_task.upgrade() {
                t.pause()?;
            }
            Ok(())
        })
        .unwrap();
        g.attach(&task).unwrap();
        g.start("self-pausing").unwrap();

        g.tick().unwrap();
        assert_eq!(runs.get(), 1);
        // still active until the queued pause drains
        assert!(g.is_child_running("self-pausing"));
        assert_eq!(g.pending_len(), 1);
        assert!(!g.is_done());

        g.tick().unwrap();
        assert_eq!(runs.get(), 1);
        assert!(g.is_done());
    }

    #[test]
    fn test_queued_actions_run_before_children_and_chain() {
        let (log, make) = recorder();
        let g = Group::new("g");
        g.attach(&make("child")).unwrap();
        g.start("child").unwrap();

        let l = log.clone();
        let g2 = g.clone();
        g.queue_action(move || {
            l.borrow_mut().push("first".into());
            let l2 = l.clone();
            g2.queue_action(move || {
                l2.borrow_mut().push("second".into());
                Ok(())
            });
            Ok(())
        });

        g.tick().unwrap();
        assert_eq!(*log.borrow(), vec!["first", "second", "child"]);
        assert_eq!(g.pending_len(), 0);
    }

    #[test]
    fn test_auto_start_propagates_three_levels() {
        let root = Group::new("root");
        let g1 = Group::new("g1");
        let g2 = Group::new("g2");
        let leaf = Group::new("leaf");
        for g in [&g1, &g2, &leaf] {
            g.set_auto_start(AutoPolicy::OnlyWhenEmpty);
        }
        root.attach(&g1).unwrap();
        g1.attach(&g2).unwrap();
        g2.attach(&leaf).unwrap();
        leaf.attach(&Task::new("work", || Ok(()))).unwrap();

        leaf.start("work").unwrap();
        root.tick().unwrap();

        assert!(leaf.is_running());
        assert!(g2.is_running());
        assert!(g1.is_running());
        assert!(root.is_child_running("g1"));
    }

    #[test]
    fn test_auto_stop_bubbles_up_after_last_child_pauses() {
        let root = Group::new("root");
        let sub = Group::new("sub");
        root.attach(&sub).unwrap();
        sub.attach(&Task::new("work", || Ok(()))).unwrap();

        sub.start("work").unwrap();
        assert!(sub.is_running());

        sub.pause("work").unwrap();
        assert!(!sub.is_running());
        assert!(root.is_done());
    }

    #[test]
    fn test_disabled_policies_do_not_propagate() {
        let root = Group::new("root");
        let sub = Group::new("sub");
        sub.set_auto_start(AutoPolicy::Disabled);
        root.attach(&sub).unwrap();
        sub.attach(&Task::new("work", || Ok(()))).unwrap();

        sub.start("work").unwrap();
        assert!(!sub.is_running());
    }

    #[test]
    fn test_auto_stop_waits_for_queued_actions() {
        let root = Group::new("root");
        let sub = Group::new("sub");
        root.attach(&sub).unwrap();
        sub.attach(&Task::new("work", || Ok(()))).unwrap();
        sub.start("work").unwrap();

        sub.queue_action(|| Ok(()));
        sub.pause("work").unwrap();
        assert!(!sub.is_child_running("work"));
        assert!(sub.is_running());
        assert!(!sub.is_done());

        // drained while root iterates, so the stop request is queued in root
        root.tick().unwrap();
        assert_eq!(sub.pending_len(), 0);
        assert!(sub.is_running());

        root.tick().unwrap();
        assert!(!sub.is_running());
        assert!(root.is_done());
    }

    #[test]
    fn test_start_at_capacity_fails_with_queued_actions() {
        let g = Group::new("g");
        g.set_max_active(Some(1));
        g.attach(&Task::new("a", || Ok(()))).unwrap();
        g.attach(&Task::new("b", || Ok(()))).unwrap();
        g.start("a").unwrap();

        g.queue_action(|| Ok(()));
        let err = g.start("b").unwrap_err();
        assert!(err.is_capacity());

        g.tick().unwrap();
        assert_eq!(g.active_keys(), vec!["a"]);
    }

    #[test]
    fn test_newer_start_supersedes_queued_pause() {
        let g = Group::new("g");
        let runs = Rc::new(Cell::new(0));

        let task = Task::empty("worker");
        let r = runs.clone();
        let weak_task = task.downgrade();
        task.set_action(move || {
            r.set(r.get() + 1);
            if r.get() == 1 {
                if let Some(t) = weak_task.upgrade() {
                    t.pause()?;
                }
            }
            Ok(())
        })
        .unwrap();
        g.attach(&task).unwrap();
        g.start("worker").unwrap();

        g.tick().unwrap();
        assert_eq!(g.pending_len(), 1);

        // issued after the queued pause, applied at once as a no-op
        g.start("worker").unwrap();
        g.tick().unwrap();
        assert!(g.is_child_running("worker"));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_child_failure_is_annotated_and_aborts_tick() {
        let (log, make) = recorder();
        let main = Group::new("main");
        let sub = Group::new("sub");
        main.attach(&sub).unwrap();
        sub.attach(&Task::new("test", || Err(anyhow::anyhow!("can you catch me?"))))
            .unwrap();
        main.attach(&make("after")).unwrap();

        sub.start("test").unwrap();
        main.start("after").unwrap();

        let err = main.tick().unwrap_err();
        assert_eq!(err.path(), vec!["sub", "test"]);
        assert_eq!(err.to_string(), "error running 'sub' in group 'main'");
        assert!(log.borrow().is_empty());

        // iteration flag restored: commands apply immediately again
        main.pause("after").unwrap();
        assert!(!main.is_child_running("after"));
    }

    #[test]
    fn test_failed_queued_action_reports_group() {
        let g = Group::new("g");
        g.queue_action(|| Err(anyhow::anyhow!("nope")));
        let err = g.tick().unwrap_err();
        assert!(matches!(err, RunError::Queued { ref group, .. } if group == "g"));
    }

    #[test]
    fn test_attach_moves_child_between_parents() {
        let a = Group::new("a");
        let b = Group::new("b");
        let t = Task::new("t", || Ok(()));
        a.attach(&t).unwrap();
        a.start("t").unwrap();

        b.attach(&t).unwrap();
        assert!(a.child("t").is_none());
        assert!(!a.is_child_running("t"));
        assert_eq!(t.parent().map(|p| p.name().to_string()).as_deref(), Some("b"));
        assert_active_subset(&a);
    }

    #[test]
    fn test_key_collision_overwrites_and_unlinks_previous() {
        let g = Group::new("g");
        let first = Task::new("first", || Ok(()));
        let second = Task::new("second", || Ok(()));
        g.attach_as("slot", &first).unwrap();
        g.start("slot").unwrap();
        g.attach_as("slot", &second).unwrap();

        assert!(!first.is_attached());
        assert_eq!(g.child("slot").unwrap().name(), "second");
        assert!(!g.is_child_running("slot"));
    }

    #[test]
    fn test_topology_errors() {
        let a = Group::new("a");
        let b = Group::new("b");
        a.attach(&b).unwrap();

        assert!(matches!(b.attach(&a), Err(TopologyError::Cycle { .. })));
        assert!(matches!(a.attach(&a), Err(TopologyError::Cycle { .. })));
        assert!(matches!(
            a.attach_as("", &Task::empty("x")),
            Err(TopologyError::EmptyKey { .. })
        ));
        assert!(matches!(
            a.attach_at_path("b/missing", "t", &Task::empty("t")),
            Err(TopologyError::UnknownPath { ref segment, .. }) if segment == "missing"
        ));
    }

    #[test]
    fn test_find_and_attach_at_path() {
        let robot = Group::new("robot");
        let drive = Group::new("drive");
        robot.attach(&drive).unwrap();
        robot
            .attach_at_path("drive", "motor", &Task::empty("motor"))
            .unwrap();

        assert_eq!(robot.find("drive/motor").unwrap().name(), "motor");
        assert!(robot.find("drive/none").is_none());
        assert!(robot.find("drive/motor/deeper").is_none());
    }

    #[test]
    fn test_detach_active_child_auto_pauses_group() {
        let root = Group::new("root");
        let sub = Group::new("sub");
        root.attach(&sub).unwrap();
        sub.attach(&Task::new("t", || Ok(()))).unwrap();
        sub.start("t").unwrap();
        assert!(sub.is_running());

        let removed = sub.detach("t").unwrap();
        assert_eq!(removed.name(), "t");
        assert!(!sub.is_running());
        assert_active_subset(&sub);
    }

    #[test]
    fn test_detach_during_tick_skips_removed_sibling() {
        let (log, make) = recorder();
        let g = Group::new("g");
        let g2 = g.clone();
        g.attach_action("remover", move || {
            g2.detach("victim");
            Ok(())
        })
        .unwrap();
        g.attach(&make("victim")).unwrap();
        g.start("remover").unwrap();
        g.start("victim").unwrap();

        g.tick().unwrap();
        assert!(log.borrow().is_empty());
        assert_active_subset(&g);
    }

    #[test]
    fn test_ordered_group_respects_index_and_duplicates() {
        let (log, make) = recorder();
        let g = Group::ordered("ordered");
        for name in ["a", "b", "c"] {
            g.attach(&make(name)).unwrap();
        }
        g.start("a").unwrap();
        g.start("b").unwrap();
        g.run_keyed_command_with("c", Command::Start, CommandArgs::new().at(0))
            .unwrap();
        g.start("a").unwrap();
        assert_eq!(g.order(), vec!["c", "a", "b"]);

        g.run_keyed_command_with("a", Command::Start, CommandArgs::new().duplicate())
            .unwrap();
        g.tick().unwrap();
        assert_eq!(*log.borrow(), vec!["c", "a", "b", "a"]);

        g.pause("a").unwrap();
        assert_eq!(g.order(), vec!["c", "b"]);
    }

    #[test]
    fn test_ordered_group_defers_mutation_by_its_entries() {
        let (log, make) = recorder();
        let g = Group::ordered("ordered");
        let g2 = g.clone();
        g.attach_action("first", move || {
            g2.pause("second")?;
            g2.start("third")?;
            Ok(())
        })
        .unwrap();
        g.attach(&make("second")).unwrap();
        g.attach(&make("third")).unwrap();
        g.start("first").unwrap();
        g.start("second").unwrap();

        g.tick().unwrap();
        assert_eq!(*log.borrow(), vec!["second"]);

        g.tick().unwrap();
        assert_eq!(*log.borrow(), vec!["second", "third"]);
        assert_eq!(g.order(), vec!["first", "third"]);
    }

    #[test]
    fn test_idle_action_runs_when_nothing_active() {
        let g = Group::new("g");
        let idle = Rc::new(Cell::new(0));
        let i = idle.clone();
        g.set_idle_action(Some(move || {
            i.set(i.get() + 1);
            Ok(())
        }));
        g.tick().unwrap();
        g.attach(&Task::new("t", || Ok(()))).unwrap();
        g.start("t").unwrap();
        g.tick().unwrap();
        assert_eq!(idle.get(), 1);
    }

    #[test]
    fn test_group_wait_runs_placeholder_until_event() {
        let (log, make) = recorder();
        let events = crate::events::EventManager::new("events");
        let g = Group::new("g");
        g.attach(&make("child")).unwrap();
        g.start("child").unwrap();

        let l = log.clone();
        g.wait_for_event(&events.event("go"), move || {
            l.borrow_mut().push("placeholder".into());
            Ok(())
        });
        g.pause("child").unwrap();
        assert!(g.is_waiting());
        assert!(!g.is_done());

        g.tick().unwrap();
        assert_eq!(*log.borrow(), vec!["placeholder"]);

        events.trigger("go").unwrap();
        assert!(!g.is_waiting());
        g.start("child").unwrap();
        g.tick().unwrap();
        assert_eq!(*log.borrow(), vec!["placeholder", "child"]);
    }

    #[test]
    fn test_tick_until_done_stops_early() {
        let g = Group::new("g");
        let t = Task::new("once", || Ok(()));
        t.set_auto_pause(true);
        g.attach(&t).unwrap();
        g.start("once").unwrap();

        let ticks = g.tick_until_done(10).unwrap();
        assert_eq!(ticks, 2);
        assert!(g.is_done());
    }
}
