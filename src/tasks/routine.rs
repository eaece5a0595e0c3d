use crate::error::ActionResult;

/// # Command-pattern body for a [`Task`](crate::Task).
///
/// The owning group calls [`start`](Routine::start) once each time the task
/// enters its active set and [`stop`](Routine::stop) when it leaves it.
/// [`execute`](Routine::execute) runs once per tick in between; after it,
/// a finished routine pauses its task with `interrupted = false`.
///
/// # Example
/// ```
/// use tickvisor::{ActionResult, Group, Routine, Task};
///
/// struct Countdown(u32);
///
/// impl Routine for Countdown {
///     fn start(&mut self) {
///         self.0 = 3;
///     }
///     fn execute(&mut self) -> ActionResult {
///         self.0 = self.0.saturating_sub(1);
///         Ok(())
///     }
///     fn is_finished(&self) -> bool {
///         self.0 == 0
///     }
/// }
///
/// let root = Group::new("root");
/// let task = Task::from_routine("countdown", Countdown(0));
/// root.attach(&task).unwrap();
/// task.start().unwrap();
///
/// // three executions, then the queued pause drains
/// assert_eq!(root.tick_until_done(10).unwrap(), 4);
/// ```
pub trait Routine {
    /// Called when the task is inserted into the active set.
    fn start(&mut self) {}

    /// One unit of work.
    fn execute(&mut self) -> ActionResult;

    /// Checked after every `execute`.
    fn is_finished(&self) -> bool {
        false
    }

    /// Called when the task leaves the active set.
    ///
    /// `interrupted` is `false` only for natural completion.
    fn stop(&mut self, _interrupted: bool) {}
}
