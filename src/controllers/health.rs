//! Health reporting shared by the controller, the event loop and the HTTP server

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use crate::metrics::OPERATOR_HEALTH;
use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthType {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Last reported health
#[derive(Clone, Debug, Serialize)]
pub struct Health {
    pub health: HealthType,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

/// Publishes the controller's health. Clones share one value.
#[derive(Clone)]
pub struct HealthReporter {
    tx: Arc<watch::Sender<Health>>,
}

impl HealthReporter {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Health {
            health: HealthType::Unknown,
            message: "starting".to_string(),
            updated_at: Utc::now(),
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn report_healthy(&self) {
        self.report(HealthType::Healthy, "rules synced".to_string());
    }

    pub fn report_unhealthy(&self, error: &Error) {
        self.report(HealthType::Unhealthy, error.to_string());
    }

    fn report(&self, health: HealthType, message: String) {
        OPERATOR_HEALTH.set(if health == HealthType::Unhealthy { 0.0 } else { 1.0 });
        self.tx.send_replace(Health {
            health,
            message,
            updated_at: Utc::now(),
        });
    }

    pub fn current(&self) -> Health {
        self.tx.borrow().clone()
    }
}

impl Default for HealthReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unknown_and_tracks_reports() {
        let reporter = HealthReporter::new();
        assert_eq!(reporter.current().health, HealthType::Unknown);

        reporter.report_unhealthy(&Error::Timeout(std::time::Duration::from_secs(5)));
        let health = reporter.current();
        assert_eq!(health.health, HealthType::Unhealthy);
        assert!(health.message.contains("Timed out"));

        reporter.clone().report_healthy();
        assert_eq!(reporter.current().health, HealthType::Healthy);
    }

    #[test]
    fn serializes_for_the_health_endpoint() {
        let reporter = HealthReporter::new();
        reporter.report_healthy();
        let json = serde_json::to_value(reporter.current()).unwrap();
        assert_eq!(json["health"], "healthy");
        assert!(json["updated_at"].is_string());
    }
}
