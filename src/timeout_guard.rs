//! A "scope guard" that will reset a session's timeout when it goes out of scope.

use crate::{backend::Backend, session::Session};
use std::time::Duration;

/// A "scope guard" that will update the session's timeout and then reset it
/// when it goes out of scope.
///
/// To create a guard, use the session's [`timeout_guard`](Session::timeout_guard) method.
///
/// While the guard is in scope, the session can only be accessed through the guard.
/// However, because the guard implements [`Deref`](std::ops::Deref) and
/// [`DerefMut`](std::ops::DerefMut) callers can treat the guard as the session.
#[derive(Debug)]
pub struct TimeoutGuard<'a, B: Backend> {
    /// The underlying session.
    session: &'a mut Session<B>,
    /// The original timeout that will be restored when the guard is dropped.
    original_timeout: Duration,
}

impl<'a, B: Backend> TimeoutGuard<'a, B> {
    /// Update the session's timeout and return a [`TimeoutGuard`] wrapping the session.
    pub(crate) fn new(session: &'a mut Session<B>, timeout: Duration) -> Self {
        let original_timeout = session.set_timeout(timeout);
        TimeoutGuard {
            session,
            original_timeout,
        }
    }

    /// The timeout that will be restored when the guard is dropped.
    pub fn original_timeout(&self) -> Duration {
        self.original_timeout
    }
}

impl<B: Backend> std::ops::Deref for TimeoutGuard<'_, B> {
    type Target = Session<B>;
    /// Get a shared reference to the underlying session.
    fn deref(&self) -> &Self::Target {
        self.session
    }
}

impl<B: Backend> std::ops::DerefMut for TimeoutGuard<'_, B> {
    /// Get an exclusive reference to the underlying session.
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
    }
}

impl<B: Backend> std::ops::Drop for TimeoutGuard<'_, B> {
    fn drop(&mut self) {
        self.session.set_timeout(self.original_timeout);
    }
}
