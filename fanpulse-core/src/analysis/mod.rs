//! Per-tick signal analysis: windowed spectrum, rolling baseline statistics,
//! and chant pattern detection. Everything in this module is owned by the
//! processing context; nothing here is shared or locked.

pub mod baseline;
pub mod chant;
pub mod spectral;

pub use baseline::{BaselineEstimator, BaselineSnapshot, Thresholds};
pub use chant::{ChantDetector, ChantObservation};
pub use spectral::{SpectralAnalyzer, WindowMeasurement};
