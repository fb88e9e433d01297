//! # bookwright-metrics
//!
//! Duration recording for Bookwright.
//!
//! This crate provides:
//! - The [`MetricsRecorder`] interface consumed by the planner, agent and gateway
//! - [`PerformanceMonitor`], a bounded in-memory recorder with summaries
//! - [`timed`], a wrapper that measures an awaited call

pub mod monitor;
pub mod timing;

pub use monitor::{MetricRecord, MetricSummary, MetricsRecorder, NoopRecorder, PerformanceMonitor};
pub use timing::timed;
