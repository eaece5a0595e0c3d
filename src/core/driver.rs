//! # Driver: ticks a root group on a fixed period.
//!
//! The scheduling core never blocks and never sleeps; something outside has
//! to call [`Group::tick`] repeatedly. [`drive`] is that loop for programs
//! already running a tokio runtime.
//!
//! ```text
//! loop:
//!   select! (biased)
//!     token.cancelled()  → return Ok(ticks)
//!     interval.tick()    → root.tick()?; ticks += 1
//!                          stop_when_done && root.is_done() → return Ok(ticks)
//! ```
//!
//! Missed periods are skipped rather than bursted. The future is `!Send`
//! (the tree uses `Rc`), so run it on a current-thread runtime or a
//! `LocalSet`.

use tokio::select;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::core::{Group, Runnable};
use crate::error::RunError;

/// Ticks `root` every `config.tick_period` until cancelled.
///
/// With `config.stop_when_done`, also returns once the root reports done.
/// Returns the number of ticks run; the first tick error ends the loop.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use tickvisor::{Config, Group, Task, drive};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let root = Group::new("root");
/// let once = Task::new("once", || Ok(()));
/// once.set_auto_pause(true);
/// root.attach(&once).unwrap();
/// once.start().unwrap();
///
/// let cfg = Config {
///     tick_period: Duration::from_millis(1),
///     stop_when_done: true,
///     ..Config::default()
/// };
/// let ticks = drive(&root, &cfg, CancellationToken::new()).await.unwrap();
/// assert_eq!(ticks, 2);
/// # }
/// ```
pub async fn drive(root: &Group, config: &Config, token: CancellationToken) -> Result<u64, RunError> {
    let mut ticker = interval(config.tick_period_clamped());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticks: u64 = 0;

    debug!(group = %root.name(), period = ?config.tick_period_clamped(), "driver started");
    loop {
        select! {
            biased;
            _ = token.cancelled() => {
                debug!(group = %root.name(), ticks, "driver cancelled");
                return Ok(ticks);
            }
            _ = ticker.tick() => {
                if let Err(e) = root.tick() {
                    warn!(group = %root.name(), label = e.as_label(), error = %e, "tick failed");
                    return Err(e);
                }
                ticks += 1;
                if config.stop_when_done && root.is_done() {
                    debug!(group = %root.name(), ticks, "root done");
                    return Ok(ticks);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;

    use crate::tasks::Task;

    fn fast() -> Config {
        Config {
            tick_period: Duration::from_millis(1),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_the_loop() {
        let root = Group::new("root");
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let token = CancellationToken::new();
        let stop = token.clone();
        root.attach(&Task::new("count", move || {
            c.set(c.get() + 1);
            if c.get() == 5 {
                stop.cancel();
            }
            Ok(())
        }))
        .unwrap();
        root.start("count").unwrap();

        let ticks = drive(&root, &fast(), token).await.unwrap();
        assert_eq!(ticks, 5);
        assert_eq!(count.get(), 5);
    }

    #[tokio::test]
    async fn test_tick_error_ends_the_loop() {
        let root = Group::new("root");
        root.attach(&Task::new("bad", || Err(anyhow::anyhow!("stall")))).unwrap();
        root.start("bad").unwrap();

        let err = drive(&root, &fast(), CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.path(), vec!["bad"]);
    }

    #[tokio::test]
    async fn test_stop_when_done_on_empty_root() {
        let root = Group::new("root");
        let cfg = Config {
            stop_when_done: true,
            ..fast()
        };
        let ticks = drive(&root, &cfg, CancellationToken::new()).await.unwrap();
        assert_eq!(ticks, 1);
    }
}
