//! Deadline-bounded polling.

use std::time::{Duration, Instant};

/// The outcome of polling until a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Polled<T> {
    /// The poll produced a value before the deadline.
    Ready(T),
    /// The deadline passed without a value.
    TimedOut,
}

impl<T> Polled<T> {
    /// Convert into an `Option`, discarding the reason a value is missing.
    pub fn ready(self) -> Option<T> {
        match self {
            Polled::Ready(value) => Some(value),
            Polled::TimedOut => None,
        }
    }
}

/// Call `attempt` until it produces a value or `timeout` elapses.
///
/// `attempt` is always called at least once. Between unsuccessful attempts
/// the thread sleeps for `interval`, or for the time remaining before the
/// deadline if that is shorter. Errors returned by `attempt` end the poll
/// immediately.
pub fn until_deadline<T, E, F>(timeout: Duration, interval: Duration, mut attempt: F) -> Result<Polled<T>, E>
where
    F: FnMut() -> Result<Option<T>, E>,
{
    let deadline = Instant::now().checked_add(timeout);
    loop {
        if let Some(value) = attempt()? {
            return Ok(Polled::Ready(value));
        }
        let now = Instant::now();
        let remaining = match deadline {
            Some(deadline) if now >= deadline => return Ok(Polled::TimedOut),
            Some(deadline) => deadline - now,
            // A timeout too large to represent never expires.
            None => interval,
        };
        std::thread::sleep(interval.min(remaining));
    }
}
