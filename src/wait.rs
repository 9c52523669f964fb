//! Wait-for-condition primitive
//!
//! Polls a condition on a fixed interval until it holds, a deadline passes,
//! or the caller cancels. Runs on tokio's clock, so paused-time tests drive
//! it deterministically.

use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

use crate::cancel::CancellationToken;

/// Why a wait ended without the condition holding
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("condition not met after {waited:?}")]
    TimedOut { waited: Duration },

    #[error("wait cancelled")]
    Cancelled,
}

/// Poll `condition` every `poll` until it returns true or `timeout` elapses.
///
/// The condition is checked immediately, then once per poll interval. A
/// condition that becomes true exactly at the deadline still succeeds.
/// A zero `poll` is treated as one millisecond.
pub async fn wait_for<F>(
    mut condition: F,
    poll: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Duration, WaitError>
where
    F: FnMut() -> bool,
{
    let started = Instant::now();
    let deadline = started + timeout;
    let mut ticker = tokio::time::interval(poll.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WaitError::Cancelled),
            _ = ticker.tick() => {}
        }

        if condition() {
            return Ok(started.elapsed());
        }
        if Instant::now() >= deadline {
            return Err(WaitError::TimedOut {
                waited: started.elapsed(),
            });
        }
    }
}

/// Sleep that returns early with `WaitError::Cancelled`
pub async fn sleep(duration: Duration, cancel: &CancellationToken) -> Result<(), WaitError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WaitError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
