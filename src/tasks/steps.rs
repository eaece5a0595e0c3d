//! # TaskEx: a task made of ordered steps.
//!
//! Each step is an `(action, predicate)` pair. While the task is active,
//! every tick runs the current step's action and then checks its predicate;
//! a satisfied predicate advances to the next step.
//!
//! ```text
//! set_current_step(i)
//!   ├─ i >= len → done; auto_pause → Pause(self); auto_reset && i != 0 → queue reset
//!   └─ i <  len → install steps[i]; waiting for event → Pause(self)
//!
//! run()
//!   ├─ queued reset → set_current_step(0)
//!   ├─ installed.action()
//!   └─ step still installed && installed.predicate() → advance
//! ```
//!
//! `done ⇔ current >= steps.len()` holds at every observable point.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::core::{Command, CommandArgs, Runnable};
use crate::error::{ActionResult, CommandError, RunError};
use crate::events::EventRef;
use crate::tasks::task::{Action, Predicate, Task, TaskCore};

#[derive(Clone)]
struct Step {
    id: u64,
    action: Action,
    predicate: Predicate,
}

pub(crate) struct StepState {
    steps: Vec<Step>,
    current: usize,
    installed: Option<Step>,
    next_id: u64,
    auto_reset: bool,
    reset_queued: bool,
    waiting_for_event: bool,
    /// Finished steps are removed instead of skipped.
    consuming: bool,
}

impl StepState {
    fn new() -> Self {
        Self {
            steps: Vec::new(),
            current: 0,
            installed: None,
            next_id: 0,
            auto_reset: true,
            reset_queued: false,
            waiting_for_event: false,
            consuming: false,
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.current >= self.steps.len()
    }

    pub(crate) fn is_waiting(&self) -> bool {
        self.waiting_for_event
    }

    fn make_step(&mut self, action: Action, predicate: Predicate) -> Step {
        let id = self.next_id;
        self.next_id += 1;
        Step { id, action, predicate }
    }
}

/// Moves the step cursor; see the module docs for the rules.
fn set_current_step(task: &Task, state: &RefCell<StepState>, index: usize) {
    let pause = {
        let mut st = state.borrow_mut();
        if index >= st.steps.len() {
            st.current = st.steps.len();
            st.installed = None;
            if st.auto_reset && index != 0 {
                st.reset_queued = true;
            }
            task.auto_pause()
        } else {
            st.current = index;
            st.installed = Some(st.steps[index].clone());
            st.waiting_for_event
        }
    };

    if pause {
        task.request(Command::Pause, CommandArgs::new().completed());
    }
}

fn reset(task: &Task, state: &RefCell<StepState>) {
    state.borrow_mut().reset_queued = false;
    set_current_step(task, state, 0);
}

/// One tick of a step machine.
pub(crate) fn run(task: &Task, state: &Rc<RefCell<StepState>>) -> Result<(), RunError> {
    if state.borrow().reset_queued {
        debug!(task = %task.name(), "applying queued reset");
        reset(task, state);
    }

    let (index, step) = {
        let st = state.borrow();
        match &st.installed {
            Some(step) => (st.current, step.clone()),
            None => return Ok(()),
        }
    };

    (step.action)().map_err(RunError::Action)?;

    let still_installed = {
        let st = state.borrow();
        st.current == index && st.installed.as_ref().is_some_and(|s| s.id == step.id)
    };
    if !still_installed || !(step.predicate)() {
        return Ok(());
    }

    advance(task, state, index, step.id);
    Ok(())
}

/// Moves past the step `id` found at `index`.
fn advance(task: &Task, state: &RefCell<StepState>, index: usize, id: u64) {
    let next = {
        let mut st = state.borrow_mut();
        // a step removed by its own action leaves its successor at `index`
        let in_place = st.steps.get(index).is_some_and(|s| s.id == id);
        if in_place && st.consuming {
            st.steps.remove(index);
            index
        } else if in_place {
            index + 1
        } else {
            index
        }
    };
    set_current_step(task, state, next);
}

/// # Task that runs a sequence of steps.
///
/// Auto-pause is enabled by default: the task pauses itself after its last
/// step. Auto-reset is enabled too: the next run after completion starts
/// again from the first step.
///
/// # Example
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use tickvisor::{Group, TaskEx};
///
/// let out = Rc::new(RefCell::new(String::new()));
/// let root = Group::new("root");
/// let seq = TaskEx::new("seq");
///
/// let o = out.clone();
/// seq.add_action_step(move || { o.borrow_mut().push('x'); Ok(()) });
/// let o = out.clone();
/// seq.add_action_step(move || { o.borrow_mut().push('y'); Ok(()) });
///
/// root.attach(&seq).unwrap();
/// seq.start().unwrap();
/// root.tick().unwrap();
/// root.tick().unwrap();
/// assert_eq!(*out.borrow(), "xy");
/// assert!(seq.is_done());
/// ```
#[derive(Clone)]
pub struct TaskEx {
    task: Task,
    state: Rc<RefCell<StepState>>,
}

impl TaskEx {
    /// Creates an empty step machine.
    pub fn new(name: impl Into<String>) -> Self {
        let state = Rc::new(RefCell::new(StepState::new()));
        let task = Task::with_steps(name, state.clone());
        Self { task, state }
    }

    /// Creates a step machine that drops each step once it finishes.
    ///
    /// Steps behave as a queue: the task works through whatever was added
    /// and is done when the list is empty. Adding a step to a finished
    /// queue installs it right away.
    pub fn consuming(name: impl Into<String>) -> Self {
        let ex = Self::new(name);
        ex.state.borrow_mut().consuming = true;
        ex
    }

    pub fn is_consuming(&self) -> bool {
        self.state.borrow().consuming
    }

    /// The underlying task handle.
    pub fn as_task(&self) -> &Task {
        &self.task
    }

    pub fn name(&self) -> &str {
        self.task.name()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    pub fn start(&self) -> Result<(), CommandError> {
        self.task.start()
    }

    pub fn pause(&self) -> Result<(), CommandError> {
        self.task.pause()
    }

    /// Runs one step tick outside of a group.
    pub fn run(&self) -> Result<(), RunError> {
        self.task.run()
    }

    /// True once the cursor is past the last step.
    pub fn is_done(&self) -> bool {
        self.state.borrow().is_done()
    }

    pub fn is_waiting_for_event(&self) -> bool {
        self.state.borrow().is_waiting()
    }

    pub fn step_count(&self) -> usize {
        self.state.borrow().steps.len()
    }

    pub fn current_step_index(&self) -> usize {
        self.state.borrow().current
    }

    pub fn auto_reset(&self) -> bool {
        self.state.borrow().auto_reset
    }

    pub fn set_auto_reset(&self, enabled: bool) {
        self.state.borrow_mut().auto_reset = enabled;
    }

    pub fn set_auto_pause(&self, enabled: bool) {
        self.task.set_auto_pause(enabled);
    }

    /// True if a reset will be applied at the start of the next run.
    pub fn is_reset_queued(&self) -> bool {
        self.state.borrow().reset_queued
    }

    // ---------------------------
    // Building
    // ---------------------------

    /// Appends a step; returns its index.
    ///
    /// The first step added becomes current immediately.
    pub fn add_step<F, P>(&self, action: F, predicate: P) -> usize
    where
        F: Fn() -> ActionResult + 'static,
        P: Fn() -> bool + 'static,
    {
        let len = self.step_count();
        self.insert_step(len, Rc::new(action), Rc::new(predicate))
    }

    /// Inserts a step at `index` (clamped to the step count).
    ///
    /// The cursor keeps pointing at the same logical step.
    pub fn add_step_at<F, P>(&self, index: usize, action: F, predicate: P) -> usize
    where
        F: Fn() -> ActionResult + 'static,
        P: Fn() -> bool + 'static,
    {
        self.insert_step(index, Rc::new(action), Rc::new(predicate))
    }

    /// Appends a single-shot step.
    pub fn add_action_step<F>(&self, action: F) -> usize
    where
        F: Fn() -> ActionResult + 'static,
    {
        self.add_step(action, || true)
    }

    /// Appends a step that only waits for `predicate`.
    pub fn add_wait_step<P>(&self, predicate: P) -> usize
    where
        P: Fn() -> bool + 'static,
    {
        self.add_step(|| Ok(()), predicate)
    }

    /// Appends a step that runs `unit` every tick until it reports done.
    pub fn add_task_step<R>(&self, unit: R) -> usize
    where
        R: Runnable + 'static,
    {
        let unit = Rc::new(unit);
        let check = unit.clone();
        self.add_step(
            move || unit.run().map_err(anyhow::Error::from),
            move || check.is_done(),
        )
    }

    pub(crate) fn insert_step(&self, index: usize, action: Action, predicate: Predicate) -> usize {
        enum After {
            Nothing,
            Install(usize),
        }

        let (index, after) = {
            let mut st = self.state.borrow_mut();
            let old_len = st.steps.len();
            let index = index.min(old_len);
            let step = st.make_step(action, predicate);
            st.steps.insert(index, step);

            let after = if old_len == 0 {
                After::Install(0)
            } else if index < st.current || (index == st.current && st.current < old_len) {
                st.current += 1;
                After::Nothing
            } else if st.current >= old_len {
                After::Install(st.current)
            } else {
                After::Nothing
            };
            (index, after)
        };

        if let After::Install(i) = after {
            set_current_step(&self.task, &self.state, i);
        }
        index
    }

    /// Removes the step at `index`; returns `false` if out of range.
    ///
    /// Removing the current step with `stop_if_active` makes its successor
    /// current right away; otherwise the removed step finishes its run.
    pub fn remove_step(&self, index: usize, stop_if_active: bool) -> bool {
        let reinstall = {
            let mut st = self.state.borrow_mut();
            if index >= st.steps.len() {
                return false;
            }
            st.steps.remove(index);
            if index < st.current {
                st.current -= 1;
                false
            } else {
                index == st.current && stop_if_active
            }
        };
        if reinstall {
            set_current_step(&self.task, &self.state, index);
        }
        true
    }

    /// Removes every step; the task becomes done.
    pub fn clear(&self) {
        {
            let mut st = self.state.borrow_mut();
            st.steps.clear();
            st.installed = None;
        }
        self.reset();
    }

    // ---------------------------
    // Cursor
    // ---------------------------

    /// Jumps to step `index`; past the end marks the task done.
    pub fn set_current_step(&self, index: usize) {
        set_current_step(&self.task, &self.state, index);
    }

    /// Skips to the next step; a consuming task drops the current one.
    pub fn next_step(&self) {
        let (index, id) = {
            let st = self.state.borrow();
            (st.current, st.steps.get(st.current).map(|s| s.id))
        };
        match id {
            Some(id) => advance(&self.task, &self.state, index, id),
            None => self.set_current_step(index + 1),
        }
    }

    /// Rewinds to the first step.
    pub fn reset(&self) {
        reset(&self.task, &self.state);
    }

    /// Rewinds and asks the parent to start the task.
    pub fn restart(&self) -> Result<(), CommandError> {
        self.reset();
        self.task.start()
    }

    // ---------------------------
    // Events
    // ---------------------------

    /// Appends a step that suspends the task until `event` fires.
    ///
    /// When the step runs, the task subscribes once to the event and pauses
    /// itself. While suspended it reports
    /// [`is_waiting_for_event`](TaskEx::is_waiting_for_event) and every
    /// ancestor group reports waiting. The event clears the flag and starts
    /// the task again unless it has no steps left.
    pub fn wait_for_event(&self, event: &EventRef) -> usize {
        let weak_core: Weak<TaskCore> = Rc::downgrade(self.task.core());
        let weak_state = Rc::downgrade(&self.state);
        let event = event.clone();

        self.add_step(
            move || {
                let (Some(core), Some(state)) = (weak_core.upgrade(), weak_state.upgrade()) else {
                    return Ok(());
                };
                let task = Task::from_core(core);
                state.borrow_mut().waiting_for_event = true;

                let resume_core = Rc::downgrade(task.core());
                let resume_state = Rc::downgrade(&state);
                event.single_time_attach(format!("resume task - {}", task.name()), move || {
                    resume(&resume_core, &resume_state)
                });

                task.request(Command::Pause, CommandArgs::new().completed());
                Ok(())
            },
            || true,
        )
    }
}

fn resume(core: &Weak<TaskCore>, state: &Weak<RefCell<StepState>>) -> ActionResult {
    let (Some(core), Some(state)) = (core.upgrade(), state.upgrade()) else {
        return Ok(());
    };
    let done = {
        let mut st = state.borrow_mut();
        st.waiting_for_event = false;
        st.is_done()
    };
    if !done {
        Task::from_core(core).start()?;
    }
    Ok(())
}

impl Runnable for TaskEx {
    fn run(&self) -> Result<(), RunError> {
        self.task.run()
    }

    fn is_done(&self) -> bool {
        TaskEx::is_done(self)
    }
}

impl std::fmt::Debug for TaskEx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.borrow();
        f.debug_struct("TaskEx")
            .field("name", &self.name())
            .field("current", &st.current)
            .field("steps", &st.steps.len())
            .field("waiting_for_event", &st.waiting_for_event)
            .finish()
    }
}
