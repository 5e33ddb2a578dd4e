//! Error types raised while estimating resistance from sweep data.

/// Too few data points to fit a line with an uncertainty.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct InsufficientDataError {
    required: usize,
    actual: usize,
}

impl_error_display! {
    InsufficientDataError,
    self => "expected at least {} paired data points, got {}", self.required, self.actual
}

impl InsufficientDataError {
    /// Create an instance of the error.
    pub(crate) fn new(required: usize, actual: usize) -> Self {
        InsufficientDataError { required, actual }
    }

    /// The minimum number of points.
    pub fn required(&self) -> usize {
        self.required
    }

    /// The number of points that were supplied.
    pub fn actual(&self) -> usize {
        self.actual
    }
}

/// The data does not determine a usable line.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DegenerateFitError(&'static str);

impl_error_display! {
    DegenerateFitError,
    self => "degenerate fit: {}", self.0
}

impl DegenerateFitError {
    /// Create an instance of the error.
    pub(crate) fn new(reason: &'static str) -> Self {
        DegenerateFitError(reason)
    }
}

/// The largest voltage in the sweep is below the noise floor.
#[derive(Debug, PartialEq)]
pub struct BelowNoiseFloorError {
    max_voltage: f64,
    noise_floor: f64,
}

impl_error_display! {
    BelowNoiseFloorError,
    self => "largest voltage magnitude {:e} V is below the {:e} V noise floor",
    self.max_voltage,
    self.noise_floor
}

impl BelowNoiseFloorError {
    /// Create an instance of the error.
    pub(crate) fn new(max_voltage: f64, noise_floor: f64) -> Self {
        BelowNoiseFloorError {
            max_voltage,
            noise_floor,
        }
    }

    /// The largest voltage magnitude observed.
    pub fn max_voltage(&self) -> f64 {
        self.max_voltage
    }
}

/// The source levels were not stepped evenly, indicating an unstable source.
#[derive(Debug, PartialEq)]
pub struct UnstableSourceError {
    spread: f64,
    threshold: f64,
}

impl_error_display! {
    UnstableSourceError,
    self => "relative spread {:.3} of the source steps exceeds the {:.3} threshold",
    self.spread,
    self.threshold
}

impl UnstableSourceError {
    /// Create an instance of the error.
    pub(crate) fn new(spread: f64, threshold: f64) -> Self {
        UnstableSourceError { spread, threshold }
    }

    /// The observed relative spread (standard deviation over mean).
    pub fn spread(&self) -> f64 {
        self.spread
    }
}

error_enum! {
    /// Any error returned while estimating resistance.
    #[derive(Debug, PartialEq)]
    #[non_exhaustive]
    pub enum EstimateError {
        InsufficientData(InsufficientDataError),
        DegenerateFit(DegenerateFitError),
        BelowNoiseFloor(BelowNoiseFloorError),
        UnstableSource(UnstableSourceError),
    }
}
