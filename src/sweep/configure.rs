//! Pushing sweep parameters to the instrument.

use super::{Quantity, SweepMode, SweepParameters};
use crate::{backend::Backend, error::Error, session::Session};
use std::time::Duration;

/// The shortest timeout allowed for auto-zeroing.
const AUTO_ZERO_TIMEOUT: Duration = Duration::from_millis(5000);
/// The reading buffer every sweep stores its samples in.
pub(crate) const BUFFER: &str = "\"defbuffer1\"";
/// Clears the reading buffer.
pub(crate) const CLEAR_BUFFER: &str = ":TRACE:CLEAR";

fn on_off(value: bool) -> &'static str {
    if value {
        "ON"
    } else {
        "OFF"
    }
}

/// The name of the compliance limit on the quantity measured while `source`
/// is sourced.
fn limit_name(source: Quantity) -> &'static str {
    match source {
        Quantity::Voltage => "ILIMIT",
        Quantity::Current => "VLIMIT",
    }
}

/// The command that programs the sweep itself.
pub(crate) fn linear_sweep_command(params: &SweepParameters) -> String {
    format!(
        ":SOURCE1:SWEEP:{}:LINEAR {}, {}, {}, {}, 1, {}, {}, {}, {}",
        params.source_function().scpi_name(),
        params.start(),
        params.end(),
        params.points(),
        params.get_step_delay().scpi_value(),
        params.get_range_mode().scpi_name(),
        on_off(params.is_abort_on_limit()),
        on_off(params.get_mode() == SweepMode::DualDirection),
        BUFFER,
    )
}

/// Configure the instrument to perform the sweep described by `params`.
///
/// The parameters are validated before anything is sent. The reading
/// buffer is cleared first, discarding the samples of any earlier sweep that
/// was not fetched. The source and
/// sense functions, ranges, compliance limit, sensing mode, auto-zero and
/// integration time are set, the output is turned on at the start level,
/// and finally the sweep is programmed. The status byte is checked before
/// and after programming the sweep, so an instrument that rejects any of the
/// settings is reported as a [`StatusAnomalyError`](crate::error::StatusAnomalyError)
/// along with its event log.
///
/// The sweep does not start until it is [triggered](super::trigger).
pub fn configure<B: Backend>(session: &mut Session<B>, params: &SweepParameters) -> Result<(), Error> {
    params.validate()?;
    let source = params.source_function();
    let src = source.scpi_name();
    let sense = params.sense_function().scpi_name();
    log::info!(
        "configuring a {} point {} sweep from {} {unit} to {} {unit}",
        params.points(),
        source,
        params.start(),
        params.end(),
        unit = source.unit(),
    );

    // Samples left by an earlier sweep that failed or was abandoned would
    // be counted with this sweep's.
    session.write(CLEAR_BUFFER)?;
    session.write(&format!(":SOURCE1:FUNCTION {src}"))?;
    session.write(&format!(
        ":SOURCE1:{src}:RANGE {}",
        params.start().abs().max(params.end().abs())
    ))?;
    session.write(&format!(
        ":SOURCE1:{src}:{} {}",
        limit_name(source),
        params.get_limit()
    ))?;
    session.write(&format!(":SENSE1:FUNCTION \"{sense}\""))?;
    session.write(&format!(":SENSE1:{sense}:RANGE {}", params.get_limit()))?;
    session.write(&format!(
        ":SENSE1:{sense}:RSENSE {}",
        on_off(params.is_four_wire())
    ))?;
    session.write(":ROUTE:TERMINALS FRONT")?;
    session.write(&format!(
        ":SOURCE1:{src}:LEVEL:IMMEDIATE:AMPLITUDE {}",
        params.start()
    ))?;

    let auto_zero_timeout = session.timeout().max(AUTO_ZERO_TIMEOUT);
    session.scoped_timeout(auto_zero_timeout, |session| -> Result<(), Error> {
        if params.is_auto_zero() {
            session.write(&format!(":SENSE1:{sense}:AZERO ON"))?;
        } else {
            session.write(":SENSE1:AZERO:ONCE")?;
            session.write(&format!(":SENSE1:{sense}:AZERO OFF"))?;
        }
        session.wait_for_operation_complete()
    })?;

    session.write(&format!(":SENSE1:{sense}:NPLC {}", params.get_nplc()))?;
    if !params.is_readback() {
        session.write(&format!(":SOURCE1:{src}:READ:BACK OFF"))?;
    }

    session.write(":OUTPUT1:STATE ON")?;
    session.wait_for_operation_complete()?;
    session.check_status()?;

    session.write(&linear_sweep_command(params))?;
    session.check_status()?;
    Ok(())
}
