//! Starting sweeps and reading back their samples.

use super::{
    configure,
    configure::{BUFFER, CLEAR_BUFFER},
    SweepMode, SweepParameters, SweepResult, Trace,
};
use crate::{
    backend::Backend,
    error::{Error, MalformedResponseError, MismatchedCountError},
    session::Session,
};
use std::time::Instant;

const SAMPLE_COUNT: &str = ":TRACE:ACTUAL?";

/// Start a configured sweep.
///
/// The status byte is checked first. If the instrument is not idle, the sweep
/// is not started and a [`StatusAnomalyError`](crate::error::StatusAnomalyError)
/// carrying the drained event log is returned.
pub fn trigger<B: Backend>(session: &mut Session<B>) -> Result<(), Error> {
    session.check_status()?;
    log::info!("starting sweep");
    session.write(":INITIATE:IMMEDIATE")?;
    session.write("*WAI")?;
    Ok(())
}

/// Wait for a triggered sweep to finish and read its samples.
///
/// The wait is bounded by [`SweepParameters::timeout_estimate`]. If it runs
/// out, a [`TimeoutError`](crate::error::TimeoutError) is returned and the
/// state of the sweep is unknown; it is not retried.
///
/// The event log is drained after every sweep. If the instrument captured a
/// different number of samples than expected, a [`MismatchedCountError`]
/// carrying those events is returned. The reading buffer is cleared after the
/// samples are read and when their count is wrong.
pub fn fetch<B: Backend>(session: &mut Session<B>, params: &SweepParameters) -> Result<SweepResult, Error> {
    let expected = params.expected_samples();
    let estimate = params.timeout_estimate();
    let started = Instant::now();
    if let Err(e) = session.scoped_timeout(estimate, Session::wait_for_operation_complete) {
        if e.is_timeout() {
            log::error!(
                "sweep did not finish within {} ms, its state is unknown",
                estimate.as_millis()
            );
        }
        return Err(e);
    }
    let elapsed = started.elapsed();

    let response = session.query(SAMPLE_COUNT)?;
    let actual = response
        .parse::<usize>()
        .map_err(|_| MalformedResponseError::new(SAMPLE_COUNT, &response, "not a sample count"));
    let events = session.drain_event_log()?;
    let actual = actual?;
    if actual != expected {
        log::warn!("expected {expected} samples but the instrument captured {actual}");
        session.write(CLEAR_BUFFER)?;
        return Err(MismatchedCountError::new(expected, actual, events).into());
    }

    let values = session.query_binary_values(
        &format!("TRACE:DATA? 1, {expected}, {BUFFER}, SOUR, READ"),
        2 * expected,
    )?;
    session.write(CLEAR_BUFFER)?;
    if values.len() != 2 * expected {
        log::warn!(
            "expected {} values but the instrument returned {}",
            2 * expected,
            values.len()
        );
        return Err(MismatchedCountError::from_values(expected, values.len(), events).into());
    }

    let samples: Trace = values.chunks_exact(2).map(|pair| (pair[0], pair[1])).collect();
    let result = SweepResult::from_samples(params, samples, elapsed);
    if let Some(rate) = result.sample_rate() {
        log::info!(
            "captured {} samples in {} ms ({rate:.1} samples/s)",
            result.samples(),
            elapsed.as_millis()
        );
    }
    Ok(result)
}

fn sweep_once<B: Backend>(session: &mut Session<B>, params: &SweepParameters) -> Result<SweepResult, Error> {
    configure(session, params)?;
    trigger(session)?;
    fetch(session, params)
}

/// Configure, trigger and fetch a sweep.
///
/// A [`SweepMode::ResistanceProbe`] sweep runs twice, the second time with
/// the start and end swapped, and the second sweep is reported as the
/// [reverse](SweepResult::reverse) trace.
pub fn run<B: Backend>(session: &mut Session<B>, params: &SweepParameters) -> Result<SweepResult, Error> {
    match params.get_mode() {
        SweepMode::Single | SweepMode::DualDirection => sweep_once(session, params),
        SweepMode::ResistanceProbe => {
            let forward = sweep_once(session, params)?;
            let reverse = sweep_once(session, &params.reversed())?;
            Ok(SweepResult::combine(forward, reverse))
        }
    }
}
