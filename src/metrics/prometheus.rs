//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::controllers::{ControllerState, HealthReporter, HealthType};

const SUBSYSTEM: &str = "mimir_rules";

lazy_static::lazy_static! {
    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: prometheus::Gauge = prometheus::register_gauge!(
        "mimir_rules_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

/// Metrics of one rules controller
#[derive(Clone)]
pub struct Metrics {
    pub config_updates_total: IntCounter,
    pub events_total: IntCounterVec,
    pub events_failed: IntCounterVec,
    pub events_retried: IntCounterVec,
    pub ruler_client_duration: HistogramVec,
}

impl Metrics {
    /// Create unregistered metrics
    pub fn new() -> Self {
        Self {
            config_updates_total: IntCounter::with_opts(
                Opts::new(
                    "config_updates_total",
                    "Total number of times the configuration has been updated.",
                )
                .subsystem(SUBSYSTEM),
            )
            .unwrap(),
            events_total: IntCounterVec::new(
                Opts::new(
                    "events_total",
                    "Total number of events processed, partitioned by event type.",
                )
                .subsystem(SUBSYSTEM),
                &["type"],
            )
            .unwrap(),
            events_failed: IntCounterVec::new(
                Opts::new(
                    "events_failed_total",
                    "Total number of events that failed to be processed, even after retries, partitioned by event type.",
                )
                .subsystem(SUBSYSTEM),
                &["type"],
            )
            .unwrap(),
            events_retried: IntCounterVec::new(
                Opts::new(
                    "events_retried_total",
                    "Total number of retries across all events, partitioned by event type.",
                )
                .subsystem(SUBSYSTEM),
                &["type"],
            )
            .unwrap(),
            ruler_client_duration: HistogramVec::new(
                HistogramOpts::new(
                    "ruler_client_request_duration_seconds",
                    "Duration of requests to the Mimir ruler API.",
                )
                .subsystem(SUBSYSTEM)
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
                &["operation", "status_code"],
            )
            .unwrap(),
        }
    }

    /// Register every metric with `registry`
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.config_updates_total.clone()))?;
        registry.register(Box::new(self.events_total.clone()))?;
        registry.register(Box::new(self.events_failed.clone()))?;
        registry.register(Box::new(self.events_retried.clone()))?;
        registry.register(Box::new(self.ruler_client_duration.clone()))?;
        Ok(())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// What the health and readiness endpoints report on
#[derive(Clone)]
pub struct ServerState {
    pub health: HealthReporter,
    pub lifecycle: watch::Receiver<ControllerState>,
}

/// Start the metrics HTTP server
pub async fn serve(port: u16, state: ServerState) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { handle_request(req, &state) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

/// Handle HTTP requests
fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: &ServerState,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    Ok(route(req.uri().path(), state))
}

fn route(path: &str, state: &ServerState) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" => health_response(state),
        "/readyz" | "/ready" => ready_response(state),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// Generate metrics response
fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = text_response(StatusCode::OK, buffer);
    if let Ok(content_type) = encoder.format_type().parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, content_type);
    }
    response
}

/// Health check response: the last reported health as JSON
fn health_response(state: &ServerState) -> Response<Full<Bytes>> {
    let health = state.health.current();
    let status = match health.health {
        HealthType::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthType::Healthy | HealthType::Unknown => StatusCode::OK,
    };
    let body = serde_json::to_vec(&health).unwrap_or_default();
    text_response(status, body)
}

/// Readiness check response: ready while watches are running
fn ready_response(state: &ServerState) -> Response<Full<Bytes>> {
    let current = *state.lifecycle.borrow();
    match current {
        ControllerState::Watching => text_response(StatusCode::OK, "ok"),
        other => text_response(StatusCode::SERVICE_UNAVAILABLE, other.to_string()),
    }
}
