//! Linear sweeps: their parameters, how long they take, and their results.
//!
//! A sweep steps the instrument's source through evenly spaced levels while
//! measuring the complementary quantity at each one. Running a sweep has
//! three parts, which can be called separately or all together via [`run`]:
//!
//!  1. [`configure`] pushes the [`SweepParameters`] to the instrument,
//!  2. [`trigger`] starts the sweep,
//!  3. [`fetch`] waits for it to finish and reads the samples back.
//!
//! ## Example
//!
//! ```rust
//! # use sourcemeter::{session::Session, sweep::{self, SweepParameters}};
//! # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = Session::open("TCPIP::192.168.1.20::INSTR")?;
//! let params = SweepParameters::voltage(-0.003, 0.003, 101)
//!     .four_wire(true)
//!     .clone();
//! let result = sweep::run(&mut session, &params)?;
//! for (v, i) in result.forward().iter() {
//!     println!("{v} V, {i} A");
//! }
//! # Ok(())
//! # }
//! ```

mod configure;
mod execute;
#[cfg(test)]
mod test;

pub use configure::configure;
pub use execute::{fetch, run, trigger};

use crate::error::InvalidParameterError;
use std::time::Duration;

/// The quantities a SourceMeter can source or measure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Quantity {
    /// Voltage, in volts.
    Voltage,
    /// Current, in amperes.
    Current,
}

impl Quantity {
    /// The name of the quantity in SCPI commands.
    pub fn scpi_name(self) -> &'static str {
        match self {
            Quantity::Voltage => "VOLTAGE",
            Quantity::Current => "CURRENT",
        }
    }

    /// The other quantity, which is measured while this one is sourced.
    pub fn complement(self) -> Quantity {
        match self {
            Quantity::Voltage => Quantity::Current,
            Quantity::Current => Quantity::Voltage,
        }
    }

    /// The unit symbol.
    pub fn unit(self) -> &'static str {
        match self {
            Quantity::Voltage => "V",
            Quantity::Current => "A",
        }
    }
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Quantity::Voltage => f.write_str("voltage"),
            Quantity::Current => f.write_str("current"),
        }
    }
}

/// The delay between setting a source level and measuring.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum StepDelay {
    /// The shortest delay the instrument allows.
    Auto,
    /// A delay in seconds.
    Seconds(f64),
}

impl StepDelay {
    /// The value sent to the instrument, where `-1` selects the automatic delay.
    pub fn scpi_value(self) -> f64 {
        match self {
            StepDelay::Auto => -1.0,
            StepDelay::Seconds(seconds) => seconds,
        }
    }

    /// The delay in seconds, counting the automatic delay as zero.
    pub fn seconds(self) -> f64 {
        match self {
            StepDelay::Auto => 0.0,
            StepDelay::Seconds(seconds) => seconds,
        }
    }
}

/// How the instrument selects the source range during a sweep.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RangeMode {
    /// Use the range set before the sweep.
    Fixed,
    /// Pick the best range for each level.
    Auto,
    /// Pick a single range that fits every level.
    Best,
}

impl RangeMode {
    /// The name of the mode in SCPI commands.
    pub fn scpi_name(self) -> &'static str {
        match self {
            RangeMode::Fixed => "FIXED",
            RangeMode::Auto => "AUTO",
            RangeMode::Best => "BEST",
        }
    }
}

/// The shape of a sweep.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SweepMode {
    /// From start to end.
    Single,
    /// From start to end and back to start in one sweep, sharing the end point.
    DualDirection,
    /// From start to end, then a second sweep from end to start.
    ResistanceProbe,
}

/// Parameters of a linear sweep.
///
/// Create them with [`voltage`](SweepParameters::voltage) or
/// [`current`](SweepParameters::current) and then customize them with the
/// setters, which can be chained.
///
/// ## Example
///
/// ```rust
/// # use sourcemeter::sweep::{StepDelay, SweepMode, SweepParameters};
/// let mut params = SweepParameters::voltage(-1.0, 1.0, 21);
/// params
///     .limit(0.01)
///     .step_delay(StepDelay::Seconds(0.005))
///     .mode(SweepMode::DualDirection);
/// assert_eq!(params.expected_samples(), 41);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SweepParameters {
    source: Quantity,
    start: f64,
    end: f64,
    points: usize,
    step_delay: StepDelay,
    limit: f64,
    four_wire: bool,
    auto_zero: bool,
    nplc: f64,
    range_mode: RangeMode,
    abort_on_limit: bool,
    mode: SweepMode,
    readback: bool,
}

impl SweepParameters {
    /// The default compliance limit of a voltage sweep, in amperes.
    pub const DEFAULT_CURRENT_LIMIT: f64 = 0.05;
    /// The default compliance limit of a current sweep, in volts.
    pub const DEFAULT_VOLTAGE_LIMIT: f64 = 2.0;

    /// Parameters for sourcing `points` voltage levels from `start` to `end`
    /// volts while measuring current.
    ///
    /// The defaults are:
    ///  * a compliance limit of 0.05 A,
    ///  * the automatic step delay,
    ///  * 1 NPLC,
    ///  * auto-zero on and two-wire sensing,
    ///  * the best fixed range, without aborting on the limit,
    ///  * a single sweep with source readback on.
    pub fn voltage(start: f64, end: f64, points: usize) -> Self {
        SweepParameters::new(Quantity::Voltage, start, end, points)
    }

    /// Parameters for sourcing `points` current levels from `start` to `end`
    /// amperes while measuring voltage.
    ///
    /// The defaults are those of [`voltage`](SweepParameters::voltage),
    /// except that the compliance limit is 2 V.
    pub fn current(start: f64, end: f64, points: usize) -> Self {
        SweepParameters::new(Quantity::Current, start, end, points)
    }

    fn new(source: Quantity, start: f64, end: f64, points: usize) -> Self {
        SweepParameters {
            source,
            start,
            end,
            points,
            step_delay: StepDelay::Auto,
            limit: match source {
                Quantity::Voltage => SweepParameters::DEFAULT_CURRENT_LIMIT,
                Quantity::Current => SweepParameters::DEFAULT_VOLTAGE_LIMIT,
            },
            four_wire: false,
            auto_zero: true,
            nplc: 1.0,
            range_mode: RangeMode::Best,
            abort_on_limit: false,
            mode: SweepMode::Single,
            readback: true,
        }
    }

    /// Set the delay between setting each level and measuring.
    pub fn step_delay(&mut self, step_delay: StepDelay) -> &mut Self {
        self.step_delay = step_delay;
        self
    }

    /// Set the compliance limit on the measured quantity.
    ///
    /// The measurement range is set to the same value.
    pub fn limit(&mut self, limit: f64) -> &mut Self {
        self.limit = limit;
        self
    }

    /// Set whether to sense with separate leads (four-wire sensing).
    pub fn four_wire(&mut self, four_wire: bool) -> &mut Self {
        self.four_wire = four_wire;
        self
    }

    /// Set whether to auto-zero before every measurement. When off, the
    /// instrument is auto-zeroed once while configuring.
    pub fn auto_zero(&mut self, auto_zero: bool) -> &mut Self {
        self.auto_zero = auto_zero;
        self
    }

    /// Set the integration time, in power line cycles.
    pub fn nplc(&mut self, nplc: f64) -> &mut Self {
        self.nplc = nplc;
        self
    }

    /// Set how the source range is selected.
    pub fn range_mode(&mut self, range_mode: RangeMode) -> &mut Self {
        self.range_mode = range_mode;
        self
    }

    /// Set whether the sweep aborts when the limit is reached.
    pub fn abort_on_limit(&mut self, abort_on_limit: bool) -> &mut Self {
        self.abort_on_limit = abort_on_limit;
        self
    }

    /// Set the shape of the sweep.
    pub fn mode(&mut self, mode: SweepMode) -> &mut Self {
        self.mode = mode;
        self
    }

    /// Set whether the instrument measures the source level it actually
    /// applied, rather than reporting the programmed level.
    pub fn readback(&mut self, readback: bool) -> &mut Self {
        self.readback = readback;
        self
    }

    /// The sourced quantity.
    pub fn source_function(&self) -> Quantity {
        self.source
    }

    /// The measured quantity.
    pub fn sense_function(&self) -> Quantity {
        self.source.complement()
    }

    /// The first source level.
    pub fn start(&self) -> f64 {
        self.start
    }

    /// The last source level.
    pub fn end(&self) -> f64 {
        self.end
    }

    /// The number of levels between `start` and `end`, inclusive.
    pub fn points(&self) -> usize {
        self.points
    }

    /// The delay between setting each level and measuring.
    pub fn get_step_delay(&self) -> StepDelay {
        self.step_delay
    }

    /// The compliance limit on the measured quantity.
    pub fn get_limit(&self) -> f64 {
        self.limit
    }

    /// Whether four-wire sensing is used.
    pub fn is_four_wire(&self) -> bool {
        self.four_wire
    }

    /// Whether the instrument auto-zeroes before every measurement.
    pub fn is_auto_zero(&self) -> bool {
        self.auto_zero
    }

    /// The integration time, in power line cycles.
    pub fn get_nplc(&self) -> f64 {
        self.nplc
    }

    /// How the source range is selected.
    pub fn get_range_mode(&self) -> RangeMode {
        self.range_mode
    }

    /// Whether the sweep aborts when the limit is reached.
    pub fn is_abort_on_limit(&self) -> bool {
        self.abort_on_limit
    }

    /// The shape of the sweep.
    pub fn get_mode(&self) -> SweepMode {
        self.mode
    }

    /// Whether source readback is on.
    pub fn is_readback(&self) -> bool {
        self.readback
    }

    /// Check the parameters for values the instrument cannot sweep with.
    pub fn validate(&self) -> Result<(), InvalidParameterError> {
        let invalid = |reason: String| Err(InvalidParameterError::new(reason));
        if !self.start.is_finite() || !self.end.is_finite() {
            return invalid(format!(
                "start ({}) and end ({}) must be finite",
                self.start, self.end
            ));
        }
        if self.start == self.end {
            return invalid(format!("start and end are both {}", self.start));
        }
        if self.points < 2 {
            return invalid(format!("expected at least 2 points, got {}", self.points));
        }
        if !(self.limit.is_finite() && self.limit > 0.0) {
            return invalid(format!("limit must be positive, got {}", self.limit));
        }
        if !(self.nplc.is_finite() && self.nplc > 0.0) {
            return invalid(format!("NPLC must be positive, got {}", self.nplc));
        }
        if let StepDelay::Seconds(seconds) = self.step_delay {
            if !(seconds.is_finite() && seconds >= 0.0) {
                return invalid(format!(
                    "step delay must be a non-negative number of seconds, got {seconds}"
                ));
            }
        }
        Ok(())
    }

    /// The same sweep with `start` and `end` swapped.
    pub fn reversed(&self) -> Self {
        SweepParameters {
            start: self.end,
            end: self.start,
            ..self.clone()
        }
    }

    /// The number of samples one sweep captures: `2 * points - 1` for a
    /// dual-direction sweep, otherwise `points`.
    pub fn expected_samples(&self) -> usize {
        match self.mode {
            SweepMode::DualDirection => (2 * self.points).saturating_sub(1),
            SweepMode::Single | SweepMode::ResistanceProbe => self.points,
        }
    }

    /// Estimate how long one sweep takes, using the default [`TimeoutEstimator`].
    pub fn timeout_estimate(&self) -> Duration {
        self.timeout_estimate_with(&TimeoutEstimator::default())
    }

    /// Estimate how long one sweep takes.
    pub fn timeout_estimate_with(&self, estimator: &TimeoutEstimator) -> Duration {
        estimator.estimate(self.expected_samples(), self.step_delay, self.nplc)
    }
}

/// Estimates how long a sweep will take, for use as a timeout.
///
/// Each sample is assumed to take the step delay plus the integration time,
/// stretched by a fudge factor, and a fixed overhead is added for setting up
/// the sweep. The estimate is monotonically non-decreasing in the number of
/// samples, the step delay, and the NPLC.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutEstimator {
    line_frequency_hz: f64,
    fudge_factor: f64,
    setup_overhead: Duration,
}

impl TimeoutEstimator {
    /// Create an estimator for a 50 Hz power line, with a fudge factor of 4
    /// and 500 ms of overhead.
    pub fn new() -> Self {
        TimeoutEstimator {
            line_frequency_hz: 50.0,
            fudge_factor: 4.0,
            setup_overhead: Duration::from_millis(500),
        }
    }

    /// Set the power line frequency.
    pub fn line_frequency_hz(&mut self, hz: f64) -> &mut Self {
        self.line_frequency_hz = hz;
        self
    }

    /// Set the factor applied to the integration time.
    pub fn fudge_factor(&mut self, factor: f64) -> &mut Self {
        self.fudge_factor = factor;
        self
    }

    /// Set the fixed overhead.
    pub fn setup_overhead(&mut self, overhead: Duration) -> &mut Self {
        self.setup_overhead = overhead;
        self
    }

    /// The time, in seconds, allowed for one measurement.
    pub fn measurement_time(&self, nplc: f64) -> f64 {
        nplc / self.line_frequency_hz * self.fudge_factor
    }

    /// Estimate how long `samples` samples take.
    pub fn estimate(&self, samples: usize, step_delay: StepDelay, nplc: f64) -> Duration {
        let per_sample_ms = step_delay.seconds() * 1000.0 + self.measurement_time(nplc) * 1000.0;
        let sweep_ms = (samples as f64 * per_sample_ms).round().max(0.0);
        self.setup_overhead + Duration::from_millis(sweep_ms as u64)
    }
}

impl Default for TimeoutEstimator {
    fn default() -> Self {
        TimeoutEstimator::new()
    }
}

/// Source levels and the readings measured at each one, paired by index.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Trace {
    source: Vec<f64>,
    measured: Vec<f64>,
}

impl Trace {
    /// The source levels.
    pub fn source(&self) -> &[f64] {
        &self.source
    }

    /// The readings.
    pub fn measured(&self) -> &[f64] {
        &self.measured
    }

    /// The number of samples.
    pub fn len(&self) -> usize {
        self.source.len()
    }

    /// Whether there are no samples.
    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Iterate over `(source, measured)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.source.iter().copied().zip(self.measured.iter().copied())
    }

    /// A trace of the samples in `range`.
    fn slice(&self, range: std::ops::Range<usize>) -> Trace {
        Trace {
            source: self.source[range.clone()].to_vec(),
            measured: self.measured[range].to_vec(),
        }
    }
}

impl FromIterator<(f64, f64)> for Trace {
    fn from_iter<I: IntoIterator<Item = (f64, f64)>>(iter: I) -> Self {
        let (source, measured) = iter.into_iter().unzip();
        Trace { source, measured }
    }
}

/// The outcome of a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepResult {
    forward: Trace,
    reverse: Option<Trace>,
    elapsed: Duration,
    samples: usize,
}

impl SweepResult {
    /// Organize the samples of one sweep according to its mode.
    ///
    /// The samples of a dual-direction sweep are split in two traces that
    /// share the end point.
    pub(crate) fn from_samples(params: &SweepParameters, samples: Trace, elapsed: Duration) -> Self {
        let count = samples.len();
        let (forward, reverse) = match params.get_mode() {
            SweepMode::DualDirection if count >= params.points() => {
                let points = params.points();
                (samples.slice(0..points), Some(samples.slice(points - 1..count)))
            }
            _ => (samples, None),
        };
        SweepResult {
            forward,
            reverse,
            elapsed,
            samples: count,
        }
    }

    /// Combine two single sweeps, the second run in reverse.
    pub(crate) fn combine(forward: SweepResult, reverse: SweepResult) -> Self {
        SweepResult {
            forward: forward.forward,
            reverse: Some(reverse.forward),
            elapsed: forward.elapsed + reverse.elapsed,
            samples: forward.samples + reverse.samples,
        }
    }

    /// The samples from start to end.
    pub fn forward(&self) -> &Trace {
        &self.forward
    }

    /// The samples from end back to start, if the sweep had them.
    pub fn reverse(&self) -> Option<&Trace> {
        self.reverse.as_ref()
    }

    /// How long the instrument took to acquire the samples.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// The total number of samples captured.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// The number of samples captured per second.
    pub fn sample_rate(&self) -> Option<f64> {
        let seconds = self.elapsed.as_secs_f64();
        (seconds > 0.0).then(|| self.samples as f64 / seconds)
    }
}
