//! Reconciliation logic for PrometheusRules
//!
//! One pass loads the desired rule groups from the watched caches, diffs them
//! against the cached ruler state and applies the difference namespace by
//! namespace. The cached ruler state is then re-read, so a partially applied
//! pass is picked up by the next one.

use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::controllers::Event;
use crate::k8s::{ResourceLister, Selectors};
use crate::rules::{
    convert_crd_rule_groups, diff_rule_state, ManagedNamespaces, RuleGroupDiff,
    RuleGroupsByNamespace,
};
use crate::ruler::RulerClient;
use crate::{Error, Result};

/// Upper bound of one reconciliation pass
pub const RECONCILE_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the cached ruler state and drives it towards the desired state.
pub struct Reconciler {
    ruler: Arc<dyn RulerClient>,
    lister: Arc<dyn ResourceLister>,
    selectors: Selectors,
    namespaces: ManagedNamespaces,
    current_state: RuleGroupsByNamespace,
    timeout: Duration,
}

impl Reconciler {
    pub fn new(
        ruler: Arc<dyn RulerClient>,
        lister: Arc<dyn ResourceLister>,
        selectors: Selectors,
        namespaces: ManagedNamespaces,
    ) -> Self {
        Self {
            ruler,
            lister,
            selectors,
            namespaces,
            current_state: RuleGroupsByNamespace::new(),
            timeout: RECONCILE_TIMEOUT,
        }
    }

    /// Override the per-pass timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The ruler state as of the last refresh, managed namespaces only
    pub fn current_state(&self) -> &RuleGroupsByNamespace {
        &self.current_state
    }

    /// Handle one event: `SyncRemote` refreshes the ruler state first, every
    /// event then reconciles.
    #[instrument(skip(self, event), fields(event = %event))]
    pub async fn process_event(&mut self, event: &Event) -> Result<()> {
        match event {
            Event::ResourceChanged(key) => debug!(key = %key, "resource changed"),
            Event::SyncRemote => self.sync_remote().await?,
        }
        self.reconcile().await
    }

    /// Replace the cached ruler state with the managed namespaces currently in the ruler.
    pub async fn sync_remote(&mut self) -> Result<()> {
        let mut listing = self.ruler.list_rules(None).await.map_err(|e| {
            error!(error = %e, "failed to list rules from ruler");
            e
        })?;
        listing.retain(|ns, _| self.namespaces.is_managed(ns));

        debug!(namespaces = listing.len(), "synced ruler state");
        self.current_state = listing;
        Ok(())
    }

    /// One reconciliation pass, bounded by the configured timeout.
    #[instrument(skip(self))]
    pub async fn reconcile(&mut self) -> Result<()> {
        let timeout = self.timeout;
        match tokio::time::timeout(timeout, self.reconcile_state()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(?timeout, "reconciliation timed out");
                Err(Error::Timeout(timeout))
            }
        }
    }

    async fn reconcile_state(&mut self) -> Result<()> {
        let desired = self.desired_state()?;
        let diffs = diff_rule_state(&desired, &self.current_state);
        if diffs.is_empty() {
            debug!("ruler is up to date");
            return Ok(());
        }

        let mut errors = Vec::new();
        for (namespace, changes) in &diffs {
            if let Err(e) = self.apply_changes(namespace, changes).await {
                errors.push(e);
            }
        }

        if let Err(e) = self.sync_remote().await {
            errors.push(e);
        }

        match Error::aggregate(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Rule groups of every selected PrometheusRule in every selected namespace,
    /// keyed by the ruler namespace each rule owns.
    pub fn desired_state(&self) -> Result<RuleGroupsByNamespace> {
        let mut desired = BTreeMap::new();

        for ns in self.lister.list_namespaces(&self.selectors.namespaces)? {
            let ns_name = ns.name_any();
            for rule in self.lister.list_rules(&ns_name, &self.selectors.rules)? {
                let name = rule.name_any();
                let Some(uid) = rule.uid() else {
                    warn!(namespace = %ns_name, name = %name, "PrometheusRule has no uid, skipping");
                    continue;
                };

                let remote = self.namespaces.namespace_for(&ns_name, &name, &uid);
                if !self.namespaces.is_managed(&remote) {
                    warn!(namespace = %ns_name, name = %name, uid = %uid, "PrometheusRule uid is not a UUID, skipping");
                    continue;
                }

                let groups = convert_crd_rule_groups(&rule.spec).map_err(|e| {
                    error!(namespace = %ns_name, name = %name, error = %e, "failed to convert PrometheusRule");
                    match e {
                        Error::ValidationError(msg) => {
                            Error::ValidationError(format!("{}/{}: {}", ns_name, name, msg))
                        }
                        other => other,
                    }
                })?;
                desired.insert(remote, groups);
            }
        }

        Ok(desired)
    }

    /// Apply the changes of one ruler namespace in order, stopping at the first failure.
    async fn apply_changes(&self, namespace: &str, changes: &[RuleGroupDiff]) -> Result<()> {
        for change in changes {
            let group = change.group_name();
            let result = match change {
                RuleGroupDiff::Add { desired } | RuleGroupDiff::Update { desired, .. } => {
                    self.ruler.create_rule_group(namespace, desired).await
                }
                RuleGroupDiff::Remove { actual } => {
                    self.ruler.delete_rule_group(namespace, &actual.name).await
                }
            };

            match result {
                Ok(()) => info!(namespace, group, change = change.kind(), "applied rule group change"),
                Err(e) => {
                    error!(namespace, group, change = change.kind(), error = %e, "failed to apply rule group change");
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
