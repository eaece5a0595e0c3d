//! Time- and count-bounded steps for [`TaskEx`].
//!
//! Each builder appends two steps: a single-shot setup step that arms the
//! deadline or counter, then the step doing the work. Re-running the task
//! re-arms them.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::error::ActionResult;
use crate::tasks::TaskEx;

impl TaskEx {
    /// Repeats `action` every tick until `duration` has elapsed.
    ///
    /// A zero duration adds nothing.
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use tickvisor::TaskEx;
    ///
    /// let t = TaskEx::new("spin");
    /// t.add_timed_step(|| Ok(()), Duration::from_millis(50));
    /// assert_eq!(t.step_count(), 2);
    /// t.add_delay(Duration::ZERO);
    /// assert_eq!(t.step_count(), 2);
    /// ```
    pub fn add_timed_step<F>(&self, action: F, duration: Duration)
    where
        F: Fn() -> ActionResult + 'static,
    {
        if duration.is_zero() {
            return;
        }
        let started = Rc::new(Cell::new(Instant::now()));

        let arm = started.clone();
        self.add_action_step(move || {
            arm.set(Instant::now());
            Ok(())
        });
        self.add_step(action, move || started.get().elapsed() >= duration);
    }

    /// Waits `duration` without doing anything.
    pub fn add_delay(&self, duration: Duration) {
        self.add_timed_step(|| Ok(()), duration);
    }

    /// Runs `action(i)` for `i = start, start + increment, ...` until `i`
    /// reaches `end` (inclusive of `start`, exclusive of `end`).
    ///
    /// Negative increments count down. A zero increment adds nothing.
    pub fn add_incremented_step<F>(&self, action: F, start: i64, increment: i64, end: i64)
    where
        F: Fn(i64) -> ActionResult + 'static,
    {
        if increment == 0 {
            return;
        }
        let counter = Rc::new(Cell::new(start));

        let arm = counter.clone();
        self.add_action_step(move || {
            arm.set(start);
            Ok(())
        });

        let step = counter.clone();
        self.add_step(
            move || {
                let i = step.get();
                action(i)?;
                step.set(i + increment);
                Ok(())
            },
            move || {
                let i = counter.get();
                if increment > 0 { i >= end } else { i <= end }
            },
        );
    }

    /// Runs `action(i)` for `i = 0..times`, one call per tick.
    pub fn add_repeated_step<F>(&self, action: F, times: i64)
    where
        F: Fn(i64) -> ActionResult + 'static,
    {
        self.add_incremented_step(action, 0, 1, times);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_incremented_step_counts_up_and_down() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let t = TaskEx::new("count");
        let s = seen.clone();
        t.add_incremented_step(
            move |i| {
                s.borrow_mut().push(i);
                Ok(())
            },
            10,
            -5,
            0,
        );

        while !t.is_done() {
            t.run().unwrap();
        }
        assert_eq!(*seen.borrow(), vec![10, 5]);
    }

    #[test]
    fn test_repeated_step_rearms_after_reset() {
        let runs = Rc::new(Cell::new(0));
        let t = TaskEx::new("repeat");
        t.set_auto_reset(false);
        let r = runs.clone();
        t.add_repeated_step(
            move |_| {
                r.set(r.get() + 1);
                Ok(())
            },
            3,
        );

        while !t.is_done() {
            t.run().unwrap();
        }
        assert_eq!(runs.get(), 3);

        t.reset();
        while !t.is_done() {
            t.run().unwrap();
        }
        assert_eq!(runs.get(), 6);
    }

    #[test]
    fn test_zero_increment_is_ignored() {
        let t = TaskEx::new("noop");
        t.add_incremented_step(|_| Ok(()), 0, 0, 10);
        assert_eq!(t.step_count(), 0);
        assert!(t.is_done());
    }

    #[test]
    fn test_delay_holds_until_deadline() {
        let t = TaskEx::new("wait");
        t.add_delay(Duration::from_millis(30));
        t.run().unwrap();
        t.run().unwrap();
        assert!(!t.is_done());

        std::thread::sleep(Duration::from_millis(40));
        t.run().unwrap();
        assert!(t.is_done());
    }
}
