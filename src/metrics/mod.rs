// src/metrics/mod.rs

//! Metrics aggregation. Snapshots are recomputed on every read and never
//! stored.

pub mod aggregate;
pub mod snapshot;

pub use aggregate::{mean, percentile, ratio, success_rate};
pub use snapshot::{MetricsInput, MetricsSnapshot};
