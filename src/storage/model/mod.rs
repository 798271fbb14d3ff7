//! Data model for sampled actor metrics.

mod sample;

pub use sample::{ERROR_MAGNITUDE, Metric, Sample, TIMEOUT_MAGNITUDE, Value};
