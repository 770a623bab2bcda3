//! Lifecycle of the rules controller
//!
//! The controller owns the watches, the work queue and the event loop task
//! for the current configuration. A configuration update is validated up
//! front and only then replaces the running pieces; the requester is answered
//! once the new pieces have synced with the ruler.

use backoff::backoff::Backoff as _;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{event_loop, Connector, Event, HealthReporter};
use crate::config::Arguments;
use crate::k8s::{Selectors, Watches};
use crate::metrics::Metrics;
use crate::queue::{RateLimiter, WorkQueue};
use crate::reconcilers::Reconciler;
use crate::ruler::RulerClient;
use crate::rules::ManagedNamespaces;
use crate::{Error, Result};

const STARTUP_MIN_BACKOFF: Duration = Duration::from_secs(1);
const STARTUP_MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Initializing,
    Watching,
    Reconfiguring,
    ShuttingDown,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ControllerState::Initializing => "initializing",
            ControllerState::Watching => "watching",
            ControllerState::Reconfiguring => "reconfiguring",
            ControllerState::ShuttingDown => "shutting down",
        })
    }
}

struct ConfigUpdate {
    args: Arguments,
    reply: oneshot::Sender<Result<()>>,
}

/// Handle for talking to a running [`Controller`]
#[derive(Clone)]
pub struct ControllerHandle {
    updates: mpsc::Sender<ConfigUpdate>,
    state: watch::Receiver<ControllerState>,
    health: HealthReporter,
}

impl ControllerHandle {
    /// Replace the configuration and wait until the controller runs with it.
    ///
    /// An invalid configuration is rejected and the previous one keeps running.
    pub async fn update(&self, args: Arguments) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.updates
            .send(ConfigUpdate { args, reply })
            .await
            .map_err(|_| Error::Cancelled)?;
        response.await.map_err(|_| Error::Cancelled)?
    }

    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ControllerState> {
        self.state.clone()
    }

    pub fn health(&self) -> HealthReporter {
        self.health.clone()
    }
}

/// A configuration that passed validation, with its client and selectors built
struct Prepared {
    args: Arguments,
    ruler: Arc<dyn RulerClient>,
    selectors: Selectors,
    namespaces: ManagedNamespaces,
}

impl Prepared {
    fn new<C: Connector>(connector: &C, args: Arguments, metrics: &Metrics) -> Result<Self> {
        args.validate()?;
        let selectors = Selectors {
            namespaces: args.namespace_selector()?,
            rules: args.rule_selector()?,
        };
        let ruler = connector.ruler_client(&args, metrics)?;
        let namespaces = ManagedNamespaces::new(&args.mimir_namespace_prefix);
        Ok(Self {
            args,
            ruler,
            selectors,
            namespaces,
        })
    }
}

struct Running {
    queue: WorkQueue<Event>,
    watches: Watches,
    event_loop: JoinHandle<()>,
}

/// Keeps PrometheusRules synchronized into the ruler for one configuration at a time
pub struct Controller<C> {
    connector: C,
    args: Arguments,
    metrics: Metrics,
    health: HealthReporter,
    updates: mpsc::Receiver<ConfigUpdate>,
    state: watch::Sender<ControllerState>,
    running: Option<Running>,
}

fn startup_backoff() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(STARTUP_MIN_BACKOFF)
        .with_multiplier(2.0)
        .with_randomization_factor(0.0)
        .with_max_interval(STARTUP_MAX_BACKOFF)
        .with_max_elapsed_time(None)
        .build()
}

fn sync_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

impl<C: Connector> Controller<C> {
    pub fn new(connector: C, args: Arguments, metrics: Metrics) -> (Self, ControllerHandle) {
        let (updates_tx, updates) = mpsc::channel(1);
        let (state, state_rx) = watch::channel(ControllerState::Initializing);
        let health = HealthReporter::new();

        let handle = ControllerHandle {
            updates: updates_tx,
            state: state_rx,
            health: health.clone(),
        };
        let controller = Self {
            connector,
            args,
            metrics,
            health,
            updates,
            state,
            running: None,
        };
        (controller, handle)
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Starting rules controller");

        if self.startup_with_retries(&shutdown).await {
            let mut ticker = sync_ticker(self.args.sync_interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    Some(update) = self.updates.recv() => {
                        let result = self.reconfigure(update.args, &shutdown).await;
                        ticker = sync_ticker(self.args.sync_interval);
                        // The requester may have given up waiting.
                        let _ = update.reply.send(result);
                    }
                    _ = ticker.tick() => self.on_tick(&shutdown).await,
                }
            }
        }

        self.state.send_replace(ControllerState::ShuttingDown);
        info!("Shutting down rules controller");
        self.stop().await;
        info!("Rules controller stopped");
    }

    /// Start with the initial configuration, backing off between attempts.
    /// A configuration update received meanwhile replaces the configuration.
    ///
    /// Returns `false` if `shutdown` fired first.
    async fn startup_with_retries(&mut self, shutdown: &CancellationToken) -> bool {
        let mut backoff = startup_backoff();
        loop {
            match self.startup(shutdown).await {
                Ok(()) => return true,
                Err(Error::Cancelled) => return false,
                Err(e) => self.startup_failed(&e),
            }

            let delay = backoff.next_backoff().unwrap_or(STARTUP_MAX_BACKOFF);
            tokio::select! {
                _ = shutdown.cancelled() => return false,
                Some(update) = self.updates.recv() => {
                    let result = self.reconfigure(update.args, shutdown).await;
                    let started = result.is_ok();
                    let _ = update.reply.send(result);
                    if started {
                        return true;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn startup(&mut self, shutdown: &CancellationToken) -> Result<()> {
        let prepared = Prepared::new(&self.connector, self.args.clone(), &self.metrics)?;
        self.start(prepared, shutdown).await
    }

    /// Start watches and the event loop for `prepared`.
    ///
    /// Both the watch start and the initial ruler sync give way to `shutdown`,
    /// returning [`Error::Cancelled`] with anything already started stopped.
    async fn start(&mut self, prepared: Prepared, shutdown: &CancellationToken) -> Result<()> {
        let Prepared {
            args,
            ruler,
            selectors,
            namespaces,
        } = prepared;
        self.args = args;

        let queue = WorkQueue::new(RateLimiter::default());
        let started = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(Error::Cancelled),
            result = self.connector.start_watches(&selectors, queue.clone()) => result,
        };
        let watches = match started {
            Ok(watches) => watches,
            Err(e) => {
                queue.shut_down();
                return Err(e);
            }
        };

        let mut reconciler = Reconciler::new(ruler, watches.lister(), selectors, namespaces);
        let synced = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(Error::Cancelled),
            result = reconciler.sync_remote() => result,
        };
        if let Err(e) = synced {
            watches.stop().await;
            queue.shut_down();
            return Err(e);
        }

        let event_loop = tokio::spawn(event_loop::run(
            queue.clone(),
            reconciler,
            self.health.clone(),
            self.metrics.clone(),
            shutdown.clone(),
        ));
        self.running = Some(Running {
            queue,
            watches,
            event_loop,
        });
        self.state.send_replace(ControllerState::Watching);
        info!(address = %self.args.address, "Rules controller watching");
        Ok(())
    }

    /// Stop watches, drain the queue and wait for the event loop.
    async fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.watches.stop().await;
            running.queue.shut_down_with_drain().await;
            if let Err(e) = running.event_loop.await {
                error!(error = %e, "Event loop task failed");
            }
        }
    }

    async fn reconfigure(&mut self, args: Arguments, shutdown: &CancellationToken) -> Result<()> {
        self.metrics.config_updates_total.inc();
        info!("Updating rules controller configuration");

        let prepared = match Prepared::new(&self.connector, args, &self.metrics) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(error = %e, "Rejected configuration update, keeping the current one");
                return Err(e);
            }
        };

        self.state.send_replace(ControllerState::Reconfiguring);
        self.stop().await;

        if let Err(e) = self.start(prepared, shutdown).await {
            self.startup_failed(&e);
            self.state.send_replace(ControllerState::Initializing);
            return Err(e);
        }
        Ok(())
    }

    async fn on_tick(&mut self, shutdown: &CancellationToken) {
        match &self.running {
            Some(running) => running.queue.add(Event::SyncRemote),
            None => {
                info!("Retrying rules controller startup");
                if let Err(e) = self.startup(shutdown).await {
                    self.startup_failed(&e);
                }
            }
        }
    }

    fn startup_failed(&self, e: &Error) {
        if matches!(e, Error::Cancelled) {
            debug!("Rules controller startup interrupted by shutdown");
            return;
        }
        error!(error = %e, "Failed to start rules controller, will retry");
        self.health.report_unhealthy(e);
    }
}
