//! The single consumer of the event queue

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Event, HealthReporter};
use crate::metrics::Metrics;
use crate::queue::WorkQueue;
use crate::reconcilers::Reconciler;
use crate::Error;

/// Failed attempts after which an event is dropped
pub const MAX_RETRIES: u32 = 5;

/// Process events until the queue is shut down and drained.
///
/// Each event is raced against `cancel`, so in-flight ruler calls are
/// abandoned promptly on shutdown.
pub async fn run(
    queue: WorkQueue<Event>,
    mut reconciler: Reconciler,
    health: HealthReporter,
    metrics: Metrics,
    cancel: CancellationToken,
) {
    info!("event loop started");

    while let Some(event) = queue.get().await {
        let kind = event.type_label();
        metrics.events_total.with_label_values(&[kind]).inc();

        let result = tokio::select! {
            result = reconciler.process_event(&event) => result,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        };

        match result {
            Ok(()) => {
                queue.forget(&event);
                health.report_healthy();
            }
            Err(Error::Cancelled) => debug!(%event, "event cancelled by shutdown"),
            Err(err) => {
                let retries = queue.num_requeues(&event);
                if retries < MAX_RETRIES {
                    metrics.events_retried.with_label_values(&[kind]).inc();
                    warn!(%event, error = %err, retries, "failed to process event, will retry");
                    queue.add_rate_limited(event.clone());
                } else {
                    metrics.events_failed.with_label_values(&[kind]).inc();
                    error!(%event, error = %err, retries, "failed to process event, giving up");
                    health.report_unhealthy(&err);
                    queue.forget(&event);
                }
            }
        }

        queue.done(&event);
    }

    info!("event loop stopped");
}
