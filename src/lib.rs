//! actop - remote actor sampling agent library.
//!
//! Connects to the debug console of an actor runtime, polls per-actor cpu,
//! message and memory statistics on a fixed interval and keeps the samples
//! in memory for top-N reporting.
//!
//! - `collector` - console protocol, transport and the sampling session
//! - `storage` - per-actor time series and ranking
//! - `report` - chart-ready top-N data for consumers

pub mod collector;
pub mod report;
pub mod storage;

/// Crate version, reported at startup.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
