//! Reconciliation of PrometheusRules into the remote ruler

pub mod rules;

pub use rules::{Reconciler, RECONCILE_TIMEOUT};
