//! Estimating resistance and sheet resistance from I-V sweeps.
//!
//! A line is fit to the sweep by ordinary least squares and its slope is
//! converted into a resistance, which is in turn converted into the sheet
//! resistance of a Van der Pauw sample. Before the fit is trusted, the sweep
//! is checked against a set of [`SanityGates`].
//!
//! ```rust
//! # use sourcemeter::{resistance::{self, SanityGates}, sweep::{Quantity, Trace}};
//! let trace: Trace = [(-0.002, -2e-5), (0.0, 0.0), (0.002, 2e-5)].into_iter().collect();
//! let estimate = resistance::estimate(&trace, Quantity::Voltage, &SanityGates::default())?;
//! assert!((estimate.resistance().value() - 100.0).abs() < 1e-6);
//! # Ok::<(), sourcemeter::error::EstimateError>(())
//! ```

use crate::{
    error::{
        BelowNoiseFloorError, DegenerateFitError, EstimateError, InsufficientDataError,
        UnstableSourceError,
    },
    sweep::{Quantity, Trace},
};
use std::f64::consts::{LN_2, PI};

/// The fewest points that a line can be fit to with an uncertainty.
pub const MIN_FIT_POINTS: usize = 3;

/// The significant digits shown when displaying a [`Measurement`].
const DISPLAY_DIGITS: usize = 6;

/// A straight line fit to paired data.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LinearFit {
    slope: f64,
    intercept: f64,
    slope_uncertainty: f64,
    intercept_uncertainty: f64,
    points: usize,
}

impl LinearFit {
    /// The slope of the line.
    pub fn slope(&self) -> f64 {
        self.slope
    }

    /// Where the line crosses zero on the x axis.
    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// The standard uncertainty of the slope.
    pub fn slope_uncertainty(&self) -> f64 {
        self.slope_uncertainty
    }

    /// The standard uncertainty of the intercept.
    pub fn intercept_uncertainty(&self) -> f64 {
        self.intercept_uncertainty
    }

    /// The number of points the line was fit to.
    pub fn points(&self) -> usize {
        self.points
    }

    /// Evaluate the line at `x`.
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Fit `measured = slope * source + intercept` by ordinary least squares.
///
/// The uncertainties are derived from the residual variance with `n - 2`
/// degrees of freedom. At least [`MIN_FIT_POINTS`] points are required and
/// the source values must vary.
pub fn fit(source: &[f64], measured: &[f64]) -> Result<LinearFit, EstimateError> {
    if source.len() != measured.len() {
        return Err(DegenerateFitError::new("source and measured values are not paired").into());
    }
    let points = source.len();
    if points < MIN_FIT_POINTS {
        return Err(InsufficientDataError::new(MIN_FIT_POINTS, points).into());
    }

    let n = points as f64;
    let mean_x = source.iter().sum::<f64>() / n;
    let mean_y = measured.iter().sum::<f64>() / n;
    let (sxx, sxy) = source
        .iter()
        .zip(measured)
        .fold((0.0, 0.0), |(sxx, sxy), (x, y)| {
            let dx = x - mean_x;
            (sxx + dx * dx, sxy + dx * (y - mean_y))
        });
    if !(sxx.is_finite() && sxx > 0.0) {
        return Err(DegenerateFitError::new("the source values do not vary").into());
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let residuals: f64 = source
        .iter()
        .zip(measured)
        .map(|(x, y)| {
            let r = y - (slope * x + intercept);
            r * r
        })
        .sum();
    let variance = residuals / (n - 2.0);

    Ok(LinearFit {
        slope,
        intercept,
        slope_uncertainty: (variance / sxx).sqrt(),
        intercept_uncertainty: (variance * (1.0 / n + mean_x * mean_x / sxx)).sqrt(),
        points,
    })
}

/// A value with its standard uncertainty.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Measurement {
    value: f64,
    uncertainty: f64,
}

impl Measurement {
    /// Create a measurement.
    pub fn new(value: f64, uncertainty: f64) -> Self {
        Measurement { value, uncertainty }
    }

    /// The best estimate.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// The standard uncertainty.
    pub fn uncertainty(&self) -> f64 {
        self.uncertainty
    }

    /// The uncertainty relative to the value.
    pub fn relative_uncertainty(&self) -> f64 {
        (self.uncertainty / self.value).abs()
    }

    fn scale(self, factor: f64) -> Self {
        Measurement {
            value: self.value * factor,
            uncertainty: self.uncertainty * factor.abs(),
        }
    }
}

impl std::fmt::Display for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ± {}",
            significant(self.value, DISPLAY_DIGITS),
            significant(self.uncertainty, DISPLAY_DIGITS)
        )
    }
}

/// Format `value` with `digits` significant digits, switching to scientific
/// notation for very large or small magnitudes. Trailing zeros are dropped.
fn significant(value: f64, digits: usize) -> String {
    if value == 0.0 || !value.is_finite() {
        return value.to_string();
    }
    let digits = digits.max(1);
    let scientific = format!("{:.*e}", digits - 1, value);
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if exponent < -4 || exponent >= digits as i32 {
        format!("{}e{exponent}", trim_fraction(mantissa))
    } else {
        let decimals = (digits as i32 - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{value:.decimals$}")).to_string()
    }
}

fn trim_fraction(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}

/// Checks applied to a sweep before its fit is trusted.
#[derive(Debug, Clone, PartialEq)]
pub struct SanityGates {
    noise_floor: f64,
    max_step_spread: f64,
}

impl SanityGates {
    /// Create gates with a 1 µV noise floor and a maximum relative spread of
    /// the source steps of 0.1.
    pub fn new() -> Self {
        SanityGates {
            noise_floor: 1e-6,
            max_step_spread: 0.1,
        }
    }

    /// Set the smallest voltage magnitude, in volts, that the largest
    /// voltage in the sweep must reach.
    pub fn noise_floor(&mut self, volts: f64) -> &mut Self {
        self.noise_floor = volts;
        self
    }

    /// Set the largest allowed relative spread (standard deviation over mean)
    /// of the magnitudes of successive source steps.
    pub fn max_step_spread(&mut self, spread: f64) -> &mut Self {
        self.max_step_spread = spread;
        self
    }

    /// Check the trace, where `source` is the sourced quantity.
    fn check(&self, trace: &Trace, source: Quantity) -> Result<(), EstimateError> {
        let voltages = match source {
            Quantity::Voltage => trace.source(),
            Quantity::Current => trace.measured(),
        };
        let max_voltage = voltages.iter().fold(0.0_f64, |max, v| max.max(v.abs()));
        if max_voltage < self.noise_floor {
            return Err(BelowNoiseFloorError::new(max_voltage, self.noise_floor).into());
        }

        let steps: Vec<f64> = trace
            .source()
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).abs())
            .collect();
        if steps.is_empty() {
            return Ok(());
        }
        let n = steps.len() as f64;
        let mean = steps.iter().sum::<f64>() / n;
        let spread = if mean > 0.0 {
            let variance = steps.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / n;
            variance.sqrt() / mean
        } else {
            f64::INFINITY
        };
        if spread > self.max_step_spread {
            return Err(UnstableSourceError::new(spread, self.max_step_spread).into());
        }
        Ok(())
    }
}

impl Default for SanityGates {
    fn default() -> Self {
        SanityGates::new()
    }
}

/// The resistance of a sample, estimated from a sweep.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ResistanceEstimate {
    fit: LinearFit,
    resistance: Measurement,
    sheet_resistance: Measurement,
}

impl ResistanceEstimate {
    /// The line fit to the sweep, as measured quantity against sourced quantity.
    pub fn fit(&self) -> &LinearFit {
        &self.fit
    }

    /// The resistance, in ohms.
    pub fn resistance(&self) -> Measurement {
        self.resistance
    }

    /// The Van der Pauw sheet resistance, in ohms per square.
    pub fn sheet_resistance(&self) -> Measurement {
        self.sheet_resistance
    }
}

impl std::fmt::Display for ResistanceEstimate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "R = {} Ω, Rs = {} Ω/sq",
            self.resistance, self.sheet_resistance
        )
    }
}

/// Estimate the resistance of the sample swept in `trace`, where `source` is
/// the quantity that was sourced.
///
/// The trace must pass the `gates` first. A voltage sweep measures current,
/// so the resistance is the reciprocal of the fitted slope; a current sweep
/// measures voltage, so it is the slope itself.
pub fn estimate(trace: &Trace, source: Quantity, gates: &SanityGates) -> Result<ResistanceEstimate, EstimateError> {
    let fit = fit(trace.source(), trace.measured())?;
    gates.check(trace, source)?;

    let resistance = match source {
        Quantity::Voltage => {
            if fit.slope == 0.0 {
                return Err(DegenerateFitError::new("the measured current does not change").into());
            }
            Measurement::new(
                1.0 / fit.slope,
                fit.slope_uncertainty / (fit.slope * fit.slope),
            )
        }
        Quantity::Current => Measurement::new(fit.slope, fit.slope_uncertainty),
    };
    let sheet_resistance = resistance.scale(PI / LN_2);
    log::debug!(
        "fit {} points: R = {resistance} Ω, Rs = {sheet_resistance} Ω/sq",
        fit.points
    );
    Ok(ResistanceEstimate {
        fit,
        resistance,
        sheet_resistance,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn trace(pairs: &[(f64, f64)]) -> Trace {
        pairs.iter().copied().collect()
    }

    fn linear(points: usize, f: impl Fn(f64) -> f64) -> Trace {
        (0..points)
            .map(|i| {
                let x = -1.0 + 2.0 * i as f64 / (points - 1) as f64;
                (x, f(x))
            })
            .collect()
    }

    #[test]
    fn exact_line() {
        let data = linear(50, |v| 2.0 * v);
        let fit = fit(data.source(), data.measured()).unwrap();
        assert!((fit.slope() - 2.0).abs() < 1e-12);
        assert!(fit.intercept().abs() < 1e-12);
        assert!(fit.slope_uncertainty() < 1e-12);
        assert_eq!(fit.points(), 50);
        assert!((fit.predict(0.25) - 0.5).abs() < 1e-12);

        let estimate = estimate(&data, Quantity::Voltage, &SanityGates::default()).unwrap();
        assert!((estimate.resistance().value() - 0.5).abs() < 1e-12);
        assert!(estimate.resistance().uncertainty() < 1e-12);
        let sheet = estimate.sheet_resistance().value();
        assert!((sheet - 0.5 * PI / LN_2).abs() < 1e-12);
    }

    #[test]
    fn uncertainty_from_residuals() {
        // Residuals of +e, -2e, +e around y = x give a slope uncertainty of
        // sqrt(6e^2 / (3 - 2) / 2).
        let e = 0.01;
        let data = trace(&[(-1.0, -1.0 + e), (0.0, -2.0 * e), (1.0, 1.0 + e)]);
        let fit = fit(data.source(), data.measured()).unwrap();
        assert!((fit.slope() - 1.0).abs() < 1e-12);
        assert!(fit.intercept().abs() < 1e-12);
        assert!((fit.slope_uncertainty() - (3.0 * e * e).sqrt()).abs() < 1e-12);
        assert!((fit.intercept_uncertainty() - (2.0 * e * e).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn current_sweep_slope_is_resistance() {
        let data = linear(5, |i| 1_000.0 * i + 0.002);
        let estimate = estimate(&data, Quantity::Current, &SanityGates::default()).unwrap();
        assert!((estimate.resistance().value() - 1_000.0).abs() < 1e-9);
        assert!((estimate.fit().intercept() - 0.002).abs() < 1e-12);
    }

    #[test]
    fn too_few_points() {
        let data = trace(&[(0.0, 0.0), (1.0, 1.0)]);
        assert_eq!(
            fit(data.source(), data.measured()),
            Err(EstimateError::from(InsufficientDataError::new(3, 2)))
        );
        assert!(matches!(
            fit(&[0.0, 1.0, 2.0], &[0.0, 1.0]),
            Err(EstimateError::DegenerateFit(_))
        ));
    }

    #[test]
    fn constant_source_is_degenerate() {
        let data = trace(&[(1.0, 0.0), (1.0, 1.0), (1.0, 2.0)]);
        assert!(matches!(
            fit(data.source(), data.measured()),
            Err(EstimateError::DegenerateFit(_))
        ));
    }

    #[test]
    fn zero_current_is_degenerate() {
        let data = linear(5, |_| 0.0);
        assert!(matches!(
            estimate(&data, Quantity::Voltage, &SanityGates::default()),
            Err(EstimateError::DegenerateFit(_))
        ));
    }

    #[test]
    fn rejects_voltages_below_the_noise_floor() {
        let data = trace(&[(-1e-7, -1e-9), (0.0, 0.0), (1e-7, 1e-9)]);
        let err = estimate(&data, Quantity::Voltage, &SanityGates::default()).unwrap_err();
        assert!(matches!(err, EstimateError::BelowNoiseFloor(_)), "{err}");

        // A current sweep is judged by the measured voltage.
        let data = trace(&[(-1e-3, -1e-7), (0.0, 0.0), (1e-3, 1e-7)]);
        let err = estimate(&data, Quantity::Current, &SanityGates::default()).unwrap_err();
        assert!(matches!(err, EstimateError::BelowNoiseFloor(_)), "{err}");

        let mut gates = SanityGates::new();
        gates.noise_floor(1e-8);
        assert!(estimate(&data, Quantity::Current, &gates).is_ok());
    }

    #[test]
    fn rejects_unstable_source() {
        let data = trace(&[(0.0, 0.0), (0.1, 0.1), (0.5, 0.5), (0.6, 0.6)]);
        let err = estimate(&data, Quantity::Voltage, &SanityGates::default()).unwrap_err();
        let EstimateError::UnstableSource(err) = err else {
            panic!("unexpected error {err}");
        };
        assert!(err.spread() > 0.1);

        let mut gates = SanityGates::new();
        gates.max_step_spread(1.0);
        assert!(estimate(&data, Quantity::Voltage, &gates).is_ok());
    }

    #[test]
    fn display() {
        assert_eq!(Measurement::new(0.5, 0.0).to_string(), "0.5 ± 0");
        assert_eq!(Measurement::new(1234.5678, 0.012345).to_string(), "1234.57 ± 0.012345");
        assert_eq!(Measurement::new(1.0 / 3.0, 1.5e-7).to_string(), "0.333333 ± 1.5e-7");
        assert_eq!(Measurement::new(-2.5e9, 1e6).to_string(), "-2.5e9 ± 1e6");
        assert_eq!(significant(999_999.5, 6), "1e6");
    }
}
