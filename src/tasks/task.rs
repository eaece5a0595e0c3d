//! # Task: leaf schedulable unit.
//!
//! A [`Task`] wraps one body and asks its owning group whether it runs.
//! There is no local running flag: [`Task::is_running`] is always answered
//! by the parent's active set.
//!
//! ## Bodies
//! ```text
//! Empty    → nothing to run (placeholder until set_action)
//! Action   → zero-argument closure, run once per tick
//! Steps    → step machine, see TaskEx
//! Routine  → command-pattern object with start/stop hooks
//! ```

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{trace, warn};

use crate::core::{Command, CommandArgs, Group, Runnable};
use crate::core::node::Node;
use crate::error::{ActionResult, CommandError, ContractError, RunError};
use crate::tasks::routine::Routine;
use crate::tasks::steps::{self, StepState};

/// Shared zero-argument action.
pub type Action = Rc<dyn Fn() -> ActionResult>;

/// Shared zero-argument completion check.
pub type Predicate = Rc<dyn Fn() -> bool>;

pub(crate) enum Body {
    Empty,
    Action(Action),
    Steps(Rc<RefCell<StepState>>),
    Routine(Rc<RefCell<dyn Routine>>),
}

pub(crate) struct TaskCore {
    node: Node,
    body: RefCell<Body>,
    locked: Cell<bool>,
    auto_start: Cell<bool>,
    auto_pause: Cell<bool>,
}

/// Leaf unit of work owned by a [`Group`].
///
/// `Task` is a handle; clones share the same task.
///
/// # Example
/// ```
/// use tickvisor::{Group, Task};
///
/// let root = Group::new("root");
/// let blink = Task::empty("blink");
/// root.attach(&blink).unwrap();
///
/// // installing an action on an attached task starts it
/// blink.set_action(|| Ok(())).unwrap();
/// assert!(blink.is_running());
///
/// blink.pause().unwrap();
/// assert!(!blink.is_running());
/// ```
#[derive(Clone)]
pub struct Task {
    core: Rc<TaskCore>,
}

/// Non-owning handle to a [`Task`].
///
/// Use it inside the task's own action to avoid a reference cycle.
#[derive(Clone)]
pub struct WeakTask {
    core: Weak<TaskCore>,
}

impl WeakTask {
    /// Returns the task if it is still alive.
    pub fn upgrade(&self) -> Option<Task> {
        self.core.upgrade().map(|core| Task { core })
    }
}

impl Task {
    fn with_body(name: impl Into<String>, body: Body, auto_pause: bool) -> Self {
        Self {
            core: Rc::new(TaskCore {
                node: Node::new(name),
                body: RefCell::new(body),
                locked: Cell::new(false),
                auto_start: Cell::new(true),
                auto_pause: Cell::new(auto_pause),
            }),
        }
    }

    /// Creates a task running `action` once per tick while active.
    pub fn new<F>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> ActionResult + 'static,
    {
        Self::with_body(name, Body::Action(Rc::new(action)), false)
    }

    /// Creates a task without an action; see [`Task::set_action`].
    pub fn empty(name: impl Into<String>) -> Self {
        Self::with_body(name, Body::Empty, false)
    }

    /// Creates a task driven by a [`Routine`].
    pub fn from_routine<R>(name: impl Into<String>, routine: R) -> Self
    where
        R: Routine + 'static,
    {
        Self::with_body(name, Body::Routine(Rc::new(RefCell::new(routine))), false)
    }

    pub(crate) fn with_steps(name: impl Into<String>, state: Rc<RefCell<StepState>>) -> Self {
        Self::with_body(name, Body::Steps(state), true)
    }

    pub(crate) fn node(&self) -> &Node {
        &self.core.node
    }

    pub(crate) fn core(&self) -> &Rc<TaskCore> {
        &self.core
    }

    pub(crate) fn from_core(core: Rc<TaskCore>) -> Self {
        Self { core }
    }

    /// Returns a non-owning handle.
    pub fn downgrade(&self) -> WeakTask {
        WeakTask {
            core: Rc::downgrade(&self.core),
        }
    }

    /// True if both handles point at the same task.
    pub fn ptr_eq(&self, other: &Task) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }

    pub fn name(&self) -> &str {
        self.core.node.name()
    }

    /// Key under which the parent stores this task.
    pub fn key(&self) -> Option<String> {
        self.core.node.key()
    }

    pub fn parent(&self) -> Option<Group> {
        self.core.node.parent()
    }

    pub fn is_attached(&self) -> bool {
        self.core.node.is_attached()
    }

    /// True if the owning group has this task in its active set.
    pub fn is_running(&self) -> bool {
        self.core.node.is_running()
    }

    /// True if this task is a step machine.
    pub fn is_step_task(&self) -> bool {
        matches!(&*self.core.body.borrow(), Body::Steps(_))
    }

    /// True while a step machine is suspended on an event.
    pub fn is_waiting_for_event(&self) -> bool {
        match &*self.core.body.borrow() {
            Body::Steps(state) => state.borrow().is_waiting(),
            _ => false,
        }
    }

    // ---------------------------
    // Body
    // ---------------------------

    /// Replaces the action.
    ///
    /// With auto-start enabled, an attached task that is not running asks
    /// its parent to start it.
    ///
    /// # Errors
    /// - [`ContractError::StepManaged`] for step machines
    /// - [`ContractError::Locked`] while the task is locked
    pub fn set_action<F>(&self, action: F) -> Result<(), ContractError>
    where
        F: Fn() -> ActionResult + 'static,
    {
        self.replace_body(Body::Action(Rc::new(action)))
    }

    /// Replaces the body with a [`Routine`]. Same rules as [`Task::set_action`].
    pub fn set_routine<R>(&self, routine: R) -> Result<(), ContractError>
    where
        R: Routine + 'static,
    {
        self.replace_body(Body::Routine(Rc::new(RefCell::new(routine))))
    }

    fn replace_body(&self, body: Body) -> Result<(), ContractError> {
        if self.is_step_task() {
            return Err(ContractError::StepManaged {
                task: self.name().to_string(),
            });
        }
        if self.is_locked() {
            return Err(ContractError::Locked {
                task: self.name().to_string(),
            });
        }
        *self.core.body.borrow_mut() = body;

        if self.core.auto_start.get() && self.is_attached() && !self.is_running() {
            self.request(Command::Start, CommandArgs::default());
        }
        Ok(())
    }

    // ---------------------------
    // Flags
    // ---------------------------

    /// Freezes the body and the start/pause state.
    pub fn lock(&self) {
        self.core.locked.set(true);
    }

    pub fn unlock(&self) {
        self.core.locked.set(false);
    }

    pub fn is_locked(&self) -> bool {
        self.core.locked.get()
    }

    pub fn auto_start(&self) -> bool {
        self.core.auto_start.get()
    }

    pub fn set_auto_start(&self, enabled: bool) {
        self.core.auto_start.set(enabled);
    }

    pub fn auto_pause(&self) -> bool {
        self.core.auto_pause.get()
    }

    /// When enabled, the task pauses itself after its work completes.
    ///
    /// Plain actions complete after every run; step machines after their
    /// last step.
    pub fn set_auto_pause(&self, enabled: bool) {
        self.core.auto_pause.set(enabled);
    }

    // ---------------------------
    // Commands
    // ---------------------------

    /// Asks the parent to start this task.
    pub fn start(&self) -> Result<(), CommandError> {
        self.run_command(Command::Start)
    }

    /// Asks the parent to pause this task.
    pub fn pause(&self) -> Result<(), CommandError> {
        self.run_command(Command::Pause)
    }

    /// Routes `cmd` to the parent under this task's key.
    pub fn run_command(&self, cmd: Command) -> Result<(), CommandError> {
        self.run_command_with(cmd, CommandArgs::default())
    }

    /// [`Task::run_command`] with explicit modifiers.
    pub fn run_command_with(&self, cmd: Command, args: CommandArgs) -> Result<(), CommandError> {
        match self.core.node.link() {
            Some((parent, key)) => parent.dispatch(&key, cmd, args),
            None => Err(CommandError::NoParent {
                name: self.name().to_string(),
            }),
        }
    }

    /// Self-issued command: skipped when detached, logged when rejected.
    pub(crate) fn request(&self, cmd: Command, args: CommandArgs) {
        if !self.is_attached() {
            trace!(task = %self.name(), ?cmd, "detached, skipping self command");
            return;
        }
        if let Err(e) = self.run_command_with(cmd, args) {
            warn!(task = %self.name(), ?cmd, label = e.as_label(), "self command rejected");
        }
    }

    // ---------------------------
    // Lifecycle hooks
    // ---------------------------

    pub(crate) fn on_start(&self) {
        let Some(routine) = self.routine() else { return };
        match routine.try_borrow_mut() {
            Ok(mut r) => r.start(),
            Err(_) => warn!(task = %self.name(), "routine busy, start hook skipped"),
        };
    }

    pub(crate) fn on_stop(&self, interrupted: bool) {
        let Some(routine) = self.routine() else { return };
        match routine.try_borrow_mut() {
            Ok(mut r) => r.stop(interrupted),
            Err(_) => warn!(task = %self.name(), "routine busy, stop hook skipped"),
        };
    }

    fn routine(&self) -> Option<Rc<RefCell<dyn Routine>>> {
        match &*self.core.body.borrow() {
            Body::Routine(r) => Some(r.clone()),
            _ => None,
        }
    }
}

enum Work {
    Nothing,
    Action(Action),
    Steps(Rc<RefCell<StepState>>),
    Routine(Rc<RefCell<dyn Routine>>),
}

impl Runnable for Task {
    fn run(&self) -> Result<(), RunError> {
        // the body borrow is released before user code runs
        let work = match &*self.core.body.borrow() {
            Body::Empty => Work::Nothing,
            Body::Action(a) => Work::Action(a.clone()),
            Body::Steps(s) => Work::Steps(s.clone()),
            Body::Routine(r) => Work::Routine(r.clone()),
        };

        match work {
            Work::Nothing => Ok(()),
            Work::Action(action) => {
                action().map_err(RunError::Action)?;
                if self.core.auto_pause.get() && self.is_running() {
                    self.request(Command::Pause, CommandArgs::new().completed());
                }
                Ok(())
            }
            Work::Steps(state) => steps::run(self, &state),
            Work::Routine(routine) => {
                let finished = {
                    let mut r = routine.borrow_mut();
                    r.execute().map_err(RunError::Action)?;
                    r.is_finished()
                };
                if finished {
                    self.request(Command::Pause, CommandArgs::new().completed());
                }
                Ok(())
            }
        }
    }

    /// Step machines are done past their last step; every other task is
    /// done whenever it is not running.
    fn is_done(&self) -> bool {
        match &*self.core.body.borrow() {
            Body::Steps(state) => state.borrow().is_done(),
            _ => !self.is_running(),
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name())
            .field("running", &self.is_running())
            .field("locked", &self.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskEx;

    #[derive(Default)]
    struct Probe {
        starts: Rc<Cell<u32>>,
        stops: Rc<RefCell<Vec<bool>>>,
        runs: u32,
        limit: u32,
    }

    impl Routine for Probe {
        fn start(&mut self) {
            self.starts.set(self.starts.get() + 1);
            self.runs = 0;
        }

        fn execute(&mut self) -> ActionResult {
            self.runs += 1;
            Ok(())
        }

        fn is_finished(&self) -> bool {
            self.runs >= self.limit
        }

        fn stop(&mut self, interrupted: bool) {
            self.stops.borrow_mut().push(interrupted);
        }
    }

    #[test]
    fn test_detached_task_reports_no_parent() {
        let t = Task::new("t", || Ok(()));
        assert!(!t.is_running());
        assert!(t.is_done());
        assert!(matches!(t.start(), Err(CommandError::NoParent { .. })));
    }

    #[test]
    fn test_set_action_auto_starts_only_when_enabled() {
        let g = Group::new("g");
        let t = Task::empty("t");
        t.set_auto_start(false);
        g.attach(&t).unwrap();
        t.set_action(|| Ok(())).unwrap();
        assert!(!t.is_running());

        t.set_auto_start(true);
        t.set_action(|| Ok(())).unwrap();
        assert!(t.is_running());
    }

    #[test]
    fn test_step_task_rejects_direct_action() {
        let ex = TaskEx::new("steps");
        let err = ex.as_task().set_action(|| Ok(())).unwrap_err();
        assert_eq!(err.as_label(), "contract_step_managed");
    }

    #[test]
    fn test_lock_freezes_action_and_commands() {
        let g = Group::new("g");
        let t = Task::new("t", || Ok(()));
        g.attach(&t).unwrap();
        t.lock();

        assert!(matches!(t.set_action(|| Ok(())), Err(ContractError::Locked { .. })));
        assert!(matches!(t.start(), Err(CommandError::Locked { .. })));
        assert!(!t.is_running());

        t.unlock();
        t.start().unwrap();
        t.lock();
        assert!(matches!(t.pause(), Err(CommandError::Locked { .. })));
        assert!(t.is_running());
    }

    #[test]
    fn test_auto_pause_after_one_run() {
        let g = Group::new("g");
        let t = Task::new("once", || Ok(()));
        t.set_auto_pause(true);
        g.attach(&t).unwrap();
        t.start().unwrap();

        g.tick().unwrap();
        assert!(t.is_running());
        g.tick().unwrap();
        assert!(!t.is_running());
        assert!(t.is_done());
    }

    #[test]
    fn test_failing_action_surfaces_as_run_error() {
        let t = Task::new("bad", || Err(anyhow::anyhow!("boom")));
        let err = t.run().unwrap_err();
        assert_eq!(err.as_label(), "run_action_failed");
    }

    #[test]
    fn test_routine_hooks_follow_active_set() {
        let starts = Rc::new(Cell::new(0));
        let stops = Rc::new(RefCell::new(Vec::new()));
        let probe = Probe {
            starts: starts.clone(),
            stops: stops.clone(),
            limit: 2,
            ..Probe::default()
        };

        let g = Group::new("g");
        let t = Task::from_routine("probe", probe);
        g.attach(&t).unwrap();

        t.start().unwrap();
        t.start().unwrap();
        assert_eq!(starts.get(), 1);

        g.tick().unwrap();
        g.tick().unwrap();
        g.tick().unwrap();
        assert!(!t.is_running());
        assert_eq!(*stops.borrow(), vec![false]);

        t.start().unwrap();
        t.pause().unwrap();
        assert_eq!(starts.get(), 2);
        assert_eq!(*stops.borrow(), vec![false, true]);
    }

    #[test]
    fn test_weak_handle_does_not_keep_task_alive() {
        let weak = {
            let t = Task::empty("short-lived");
            t.downgrade()
        };
        assert!(weak.upgrade().is_none());
    }
}
