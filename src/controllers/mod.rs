//! The rules controller: watches, event loop and lifecycle

pub mod event;
pub mod event_loop;
pub mod health;
pub mod rules_controller;

pub use event::Event;
pub use health::{Health, HealthReporter, HealthType};
pub use rules_controller::{Controller, ControllerHandle, ControllerState};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::reflector;
use kube::{Api, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Arguments;
use crate::crd::PrometheusRule;
use crate::k8s::{spawn_watch, wait_for_cache_sync, Selectors, StoreLister, Watches};
use crate::metrics::Metrics;
use crate::queue::WorkQueue;
use crate::ruler::{HttpRulerClient, RulerClient};
use crate::Result;

/// How long a fresh watch may take to deliver its initial listing
pub const CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the outside-world collaborators of a controller for one configuration
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Client for the ruler described by `args`
    fn ruler_client(&self, args: &Arguments, metrics: &Metrics) -> Result<Arc<dyn RulerClient>>;

    /// Start the Namespace and PrometheusRule watches, enqueueing a
    /// `ResourceChanged` event for every touched object. Returns once the
    /// caches hold their initial listing.
    async fn start_watches(&self, selectors: &Selectors, queue: WorkQueue<Event>)
        -> Result<Watches>;
}

/// Connector backed by the Kubernetes API server and the HTTP ruler client
#[derive(Clone)]
pub struct KubeConnector {
    client: Client,
}

impl KubeConnector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn enqueue_changes(queue: WorkQueue<Event>) -> impl Fn(String) + Send + 'static {
    move |key| queue.add(Event::ResourceChanged(key))
}

#[async_trait]
impl Connector for KubeConnector {
    fn ruler_client(&self, args: &Arguments, metrics: &Metrics) -> Result<Arc<dyn RulerClient>> {
        let client = HttpRulerClient::new(args, metrics.ruler_client_duration.clone())?;
        Ok(Arc::new(client))
    }

    async fn start_watches(
        &self,
        selectors: &Selectors,
        queue: WorkQueue<Event>,
    ) -> Result<Watches> {
        let stop = CancellationToken::new();
        let (namespaces, namespace_writer) = reflector::store::<Namespace>();
        let (rules, rule_writer) = reflector::store::<PrometheusRule>();

        let tasks = vec![
            spawn_watch(
                Api::<Namespace>::all(self.client.clone()),
                &selectors.namespaces,
                namespace_writer,
                enqueue_changes(queue.clone()),
                stop.child_token(),
            ),
            spawn_watch(
                Api::<PrometheusRule>::all(self.client.clone()),
                &selectors.rules,
                rule_writer,
                enqueue_changes(queue),
                stop.child_token(),
            ),
        ];

        let lister = Arc::new(StoreLister::new(namespaces.clone(), rules.clone()));
        let watches = Watches::new(lister, stop, tasks);

        let synced = match wait_for_cache_sync(&namespaces, CACHE_SYNC_TIMEOUT).await {
            Ok(()) => wait_for_cache_sync(&rules, CACHE_SYNC_TIMEOUT).await,
            Err(e) => Err(e),
        };
        if let Err(e) = synced {
            watches.stop().await;
            return Err(e);
        }
        Ok(watches)
    }
}
