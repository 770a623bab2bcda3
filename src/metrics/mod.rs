//! Prometheus metrics for the Mimir rules operator
//!
//! This module exposes the controller's counters and the HTTP endpoint that
//! serves them together with health and readiness.

pub mod prometheus;

pub use prometheus::*;
