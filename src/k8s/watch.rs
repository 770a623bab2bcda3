//! Label-filtered watches feeding reflector stores

use futures::StreamExt;
use kube::core::Selector;
use kube::runtime::reflector::{self, store::Writer, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{object_key, ResourceLister};
use crate::{Error, Result};

/// Running watches and the lister reading their stores.
///
/// Dropping `Watches` cancels the watches without waiting for them.
pub struct Watches {
    lister: Arc<dyn ResourceLister>,
    stop: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Watches {
    pub fn new(
        lister: Arc<dyn ResourceLister>,
        stop: CancellationToken,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            lister,
            stop,
            tasks,
        }
    }

    pub fn lister(&self) -> Arc<dyn ResourceLister> {
        self.lister.clone()
    }

    /// Stop every watch and wait for its task to finish.
    pub async fn stop(mut self) {
        self.stop.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(error) = task.await {
                warn!(%error, "watch task failed");
            }
        }
    }
}

impl Drop for Watches {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Watch objects of `api` selected by `selector`, keeping `writer`'s store current
/// and calling `on_change` with the key of every added, updated or deleted object.
///
/// The watch runs until `stop` is cancelled.
pub fn spawn_watch<K, F>(
    api: Api<K>,
    selector: &Selector,
    writer: Writer<K>,
    on_change: F,
    stop: CancellationToken,
) -> JoinHandle<()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
    F: Fn(String) + Send + 'static,
{
    let mut config = watcher::Config::default();
    if !selector.selects_all() {
        config = config.labels_from(selector);
    }

    let kind = K::kind(&K::DynamicType::default()).to_string();
    let stream = reflector::reflector(writer, watcher(api, config).default_backoff())
        .touched_objects();

    tokio::spawn(async move {
        let mut stream = std::pin::pin!(stream);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(obj)) => {
                        let key = object_key(&obj);
                        debug!(kind = %kind, key = %key, "object changed");
                        on_change(key);
                    }
                    Some(Err(error)) => warn!(kind = %kind, %error, "watch failed, retrying"),
                    None => break,
                },
            }
        }
        debug!(kind = %kind, "watch stopped");
    })
}

/// Wait until `store` has received its initial listing.
pub async fn wait_for_cache_sync<K>(store: &Store<K>, timeout: Duration) -> Result<()>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    let kind = K::kind(&K::DynamicType::default()).to_string();
    match tokio::time::timeout(timeout, store.wait_until_ready()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(Error::KubeError(format!("{} watch stopped before syncing", kind))),
        Err(_) => Err(Error::KubeError(format!(
            "timed out after {:?} waiting for {} cache to sync",
            timeout, kind
        ))),
    }
}
