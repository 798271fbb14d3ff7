//! In-memory storage for sampled actor metrics.
//!
//! Nothing here touches disk: samples live for one sampling run and are
//! discarded when the next run starts.

pub mod model;
mod store;

pub use model::{Metric, Sample, Value};
pub use store::{SampleStore, peak};
