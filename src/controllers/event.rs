//! Events processed by the rules event loop

use std::fmt;

/// Work item of the event loop.
///
/// Reconciliation always reads the current cache state, so events only say
/// *that* something should be looked at, not what changed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// A watched Namespace or PrometheusRule was added, updated or deleted.
    /// Carries the object key for logging.
    ResourceChanged(String),

    /// Periodic tick: re-read the ruler before reconciling.
    SyncRemote,
}

impl Event {
    /// Value of the `type` metric label
    pub fn type_label(&self) -> &'static str {
        match self {
            Event::ResourceChanged(_) => "resource-changed",
            Event::SyncRemote => "sync-remote",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::ResourceChanged(key) => write!(f, "resource-changed({})", key),
            Event::SyncRemote => f.write_str("sync-remote"),
        }
    }
}
