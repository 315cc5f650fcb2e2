//! Per-operation performance tracking.

mod tracker;

pub use tracker::{OperationStats, PerformanceSummary, PerformanceTracker};
