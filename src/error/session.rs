//! Error types raised while talking to an instrument.

use crate::{
    session::ConnectStage,
    status::{StatusByte, StatusEvent},
};
use std::time::Duration;

/// Write the drained events, if any, after an error message.
fn fmt_events(f: &mut std::fmt::Formatter<'_>, events: &[StatusEvent]) -> std::fmt::Result {
    if events.is_empty() {
        return Ok(());
    }
    write!(f, "; event log:")?;
    for event in events {
        write!(f, " [{event}]")?;
    }
    Ok(())
}

/// A connection to an instrument could not be established.
///
/// No session is produced. The stage at which the attempt failed and the
/// underlying cause are available for diagnostics.
#[derive(Debug)]
pub struct ConnectError {
    stage: ConnectStage,
    address: Box<str>,
    cause: Box<dyn std::error::Error + Send + Sync>,
}

impl_error_display! {
    ConnectError,
    self => "unable to connect to {} while {}: {}", self.address, self.stage, self.cause
}

impl ConnectError {
    /// Create an instance of the error.
    pub(crate) fn new<E>(stage: ConnectStage, address: &str, cause: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        ConnectError {
            stage,
            address: address.into(),
            cause: cause.into(),
        }
    }

    /// The stage of the connection handshake that failed.
    pub fn stage(&self) -> ConnectStage {
        self.stage
    }

    /// The address that was being connected to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The underlying reason the stage failed.
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.cause
    }
}

/// The instrument replied with something that could not be interpreted.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct MalformedResponseError {
    command: Box<str>,
    response: Box<str>,
    reason: &'static str,
}

impl_error_display! {
    MalformedResponseError,
    self => "malformed response to `{}` ({}): {:?}", self.command, self.reason, self.response
}

impl MalformedResponseError {
    /// Create an instance of the error.
    pub(crate) fn new(command: &str, response: &str, reason: &'static str) -> Self {
        MalformedResponseError {
            command: command.into(),
            response: response.into(),
            reason,
        }
    }

    /// The command that elicited the response.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The offending response.
    pub fn response(&self) -> &str {
        &self.response
    }
}

/// The instrument's status byte reported something other than an idle state.
///
/// The instrument's event log was drained while diagnosing the anomaly and
/// the events are attached.
#[derive(Debug, PartialEq)]
pub struct StatusAnomalyError {
    status: StatusByte,
    events: Vec<StatusEvent>,
}

impl std::error::Error for StatusAnomalyError {}

impl std::fmt::Display for StatusAnomalyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "expected an idle status byte (0, 64 or 128) but the instrument reported {}",
            self.status
        )?;
        fmt_events(f, &self.events)
    }
}

impl StatusAnomalyError {
    /// Create an instance of the error.
    pub(crate) fn new(status: StatusByte, events: Vec<StatusEvent>) -> Self {
        StatusAnomalyError { status, events }
    }

    /// The anomalous status byte.
    pub fn status(&self) -> StatusByte {
        self.status
    }

    /// The events drained from the instrument's event log.
    pub fn events(&self) -> &[StatusEvent] {
        &self.events
    }
}

error_enum! {
    /// The instrument did not behave as the protocol requires.
    #[derive(Debug, PartialEq)]
    #[non_exhaustive]
    pub enum ProtocolError {
        MalformedResponse(MalformedResponseError),
        StatusAnomaly(StatusAnomalyError),
    }
}

/// An operation did not complete before its deadline.
///
/// When this comes from waiting on a sweep, the sweep's outcome is
/// indeterminate. It should not be retried without operator judgement.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct TimeoutError {
    operation: Box<str>,
    timeout: Duration,
}

impl_error_display! {
    TimeoutError,
    self => "`{}` did not complete within {} ms", self.operation, self.timeout.as_millis()
}

impl TimeoutError {
    /// Create an instance of the error.
    pub(crate) fn new(operation: &str, timeout: Duration) -> Self {
        TimeoutError {
            operation: operation.into(),
            timeout,
        }
    }

    /// The operation that timed out.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// The timeout that elapsed.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// The instrument captured a different number of samples than requested.
#[derive(Debug, PartialEq)]
pub struct MismatchedCountError {
    expected: usize,
    actual: usize,
    unpaired_value: bool,
    events: Vec<StatusEvent>,
}

impl std::error::Error for MismatchedCountError {}

impl std::fmt::Display for MismatchedCountError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "expected {} data points, but the instrument's data buffer contained {}",
            self.expected, self.actual
        )?;
        if self.unpaired_value {
            f.write_str(" and an unpaired value")?;
        }
        fmt_events(f, &self.events)
    }
}

impl MismatchedCountError {
    /// Create an instance of the error.
    pub(crate) fn new(expected: usize, actual: usize, events: Vec<StatusEvent>) -> Self {
        MismatchedCountError {
            expected,
            actual,
            unpaired_value: false,
            events,
        }
    }

    /// Create an instance of the error from the number of `values` read,
    /// where each sample is a (source, reading) pair of values.
    pub(crate) fn from_values(expected: usize, values: usize, events: Vec<StatusEvent>) -> Self {
        MismatchedCountError {
            expected,
            actual: values / 2,
            unpaired_value: values % 2 == 1,
            events,
        }
    }

    /// The number of samples that were requested.
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// The number of samples the instrument reported.
    pub fn actual(&self) -> usize {
        self.actual
    }

    /// Whether the instrument returned an odd number of values, leaving one
    /// that is not part of a whole sample.
    pub fn has_unpaired_value(&self) -> bool {
        self.unpaired_value
    }

    /// The events drained from the instrument's event log after the sweep.
    pub fn events(&self) -> &[StatusEvent] {
        &self.events
    }
}

/// A binary payload could not be decoded into values.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DecodeError {
    reason: Box<str>,
    len: usize,
}

impl_error_display! {
    DecodeError,
    self => "cannot decode {} byte binary payload: {}", self.len, self.reason
}

impl DecodeError {
    /// Create an instance of the error.
    pub(crate) fn new(reason: &str, len: usize) -> Self {
        DecodeError {
            reason: reason.into(),
            len,
        }
    }

    /// The number of bytes in the offending payload.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the offending payload was empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A sweep parameter violates one of the sweep's invariants.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct InvalidParameterError(Box<str>);

impl_error_display! {
    InvalidParameterError,
    self => "invalid sweep parameter: {}", self.0
}

impl InvalidParameterError {
    /// Create an instance of the error.
    pub(crate) fn new<S: Into<Box<str>>>(reason: S) -> Self {
        InvalidParameterError(reason.into())
    }
}
