//! Mimir Rules Operator
//!
//! Keeps the rule groups of PrometheusRule resources synchronized into a
//! Mimir ruler. Every PrometheusRule owns one ruler namespace; ruler
//! namespaces this operator did not create are never touched.

pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod k8s;
pub mod metrics;
pub mod queue;
pub mod reconcilers;
pub mod ruler;
pub mod rules;

pub use error::{Error, Result};
