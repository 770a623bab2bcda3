//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{Selector, SelectorExt};
use kube::ResourceExt;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use mimir_rules_operator::config::Arguments;
use mimir_rules_operator::controllers::{Connector, Event};
use mimir_rules_operator::crd::{PrometheusRule, PrometheusRuleSpec};
use mimir_rules_operator::k8s::{ResourceLister, Selectors, Watches};
use mimir_rules_operator::metrics::Metrics;
use mimir_rules_operator::queue::WorkQueue;
use mimir_rules_operator::ruler::RulerClient;
use mimir_rules_operator::rules::{RuleGroup, RuleGroupsByNamespace};
use mimir_rules_operator::{Error, Result};

pub const UID_A: &str = "3f2b6c1e-8a4d-4e2f-9b1a-0c5d7e8f9a01";
pub const UID_B: &str = "7c9e6679-7425-40de-944b-e07fc1f90ae7";

// ============================================================================
// Ruler
// ============================================================================

/// A call made against the fake ruler
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Create(String, String),
    Delete(String, String),
    List,
}

/// Ruler keeping its rule groups in memory
#[derive(Default)]
pub struct FakeRuler {
    state: Mutex<RuleGroupsByNamespace>,
    calls: Mutex<Vec<Call>>,
    failing_namespaces: Mutex<HashSet<String>>,
    fail_list: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FakeRuler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Put groups into the ruler without recording a call
    pub fn seed(&self, namespace: &str, groups: Vec<RuleGroup>) {
        self.state
            .lock()
            .unwrap()
            .insert(namespace.to_string(), groups);
    }

    pub fn state(&self) -> RuleGroupsByNamespace {
        self.state.lock().unwrap().clone()
    }

    pub fn group_names(&self, namespace: &str) -> Vec<String> {
        self.state()
            .get(namespace)
            .map(|groups| groups.iter().map(|g| g.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than listings
    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| *c != Call::List)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Make every write to `namespace` fail with a 500
    pub fn fail_writes_to(&self, namespace: &str) {
        self.failing_namespaces
            .lock()
            .unwrap()
            .insert(namespace.to_string());
    }

    pub fn heal(&self) {
        self.failing_namespaces.lock().unwrap().clear();
        self.fail_list.store(false, Ordering::SeqCst);
    }

    pub fn fail_listing(&self) {
        self.fail_list.store(true, Ordering::SeqCst);
    }

    /// Delay every call by `delay`
    pub fn slow_down(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    async fn call(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_write(&self, namespace: &str) -> Result<()> {
        if self.failing_namespaces.lock().unwrap().contains(namespace) {
            return Err(Error::RulerError {
                status: 500,
                message: format!("injected failure for {}", namespace),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RulerClient for FakeRuler {
    async fn create_rule_group(&self, namespace: &str, group: &RuleGroup) -> Result<()> {
        self.call(Call::Create(namespace.to_string(), group.name.clone()))
            .await;
        self.check_write(namespace)?;

        let mut state = self.state.lock().unwrap();
        let groups = state.entry(namespace.to_string()).or_default();
        match groups.iter_mut().find(|g| g.name == group.name) {
            Some(existing) => *existing = group.clone(),
            None => groups.push(group.clone()),
        }
        Ok(())
    }

    async fn delete_rule_group(&self, namespace: &str, group: &str) -> Result<()> {
        self.call(Call::Delete(namespace.to_string(), group.to_string()))
            .await;
        self.check_write(namespace)?;

        let mut state = self.state.lock().unwrap();
        if let Some(groups) = state.get_mut(namespace) {
            groups.retain(|g| g.name != group);
            if groups.is_empty() {
                state.remove(namespace);
            }
        }
        Ok(())
    }

    async fn list_rules(&self, namespace: Option<&str>) -> Result<RuleGroupsByNamespace> {
        self.call(Call::List).await;
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Error::TransportError("connection refused".to_string()));
        }

        let state = self.state();
        Ok(match namespace {
            Some(ns) => state.into_iter().filter(|(k, _)| k == ns).collect(),
            None => state,
        })
    }
}

// ============================================================================
// Kubernetes
// ============================================================================

/// Lister over objects held in memory
#[derive(Default)]
pub struct FakeLister {
    namespaces: Mutex<Vec<Namespace>>,
    rules: Mutex<Vec<PrometheusRule>>,
}

impl FakeLister {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_namespace(&self, ns: Namespace) {
        self.namespaces.lock().unwrap().push(ns);
    }

    pub fn add_rule(&self, rule: PrometheusRule) {
        let mut rules = self.rules.lock().unwrap();
        rules.retain(|r| {
            r.namespace() != rule.namespace() || r.name_any() != rule.name_any()
        });
        rules.push(rule);
    }

    pub fn remove_rule(&self, namespace: &str, name: &str) {
        self.rules
            .lock()
            .unwrap()
            .retain(|r| r.namespace().as_deref() != Some(namespace) || r.name_any() != name);
    }
}

impl ResourceLister for FakeLister {
    fn list_namespaces(&self, selector: &Selector) -> Result<Vec<Arc<Namespace>>> {
        let mut out: Vec<_> = self
            .namespaces
            .lock()
            .unwrap()
            .iter()
            .filter(|ns| selector.matches(ns.labels()))
            .cloned()
            .map(Arc::new)
            .collect();
        out.sort_by_key(|ns| ns.name_any());
        Ok(out)
    }

    fn list_rules(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<Arc<PrometheusRule>>> {
        let mut out: Vec<_> = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.namespace().as_deref() == Some(namespace))
            .filter(|r| selector.matches(r.labels()))
            .cloned()
            .map(Arc::new)
            .collect();
        out.sort_by_key(|r| r.name_any());
        Ok(out)
    }
}

pub fn namespace(name: &str, labels: &[(&str, &str)]) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(to_map(labels)),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A PrometheusRule whose spec is given as YAML
pub fn prometheus_rule(namespace: &str, name: &str, uid: &str, spec: &str) -> PrometheusRule {
    let spec: PrometheusRuleSpec = serde_yaml::from_str(spec).unwrap();
    let mut rule = PrometheusRule::new(name, spec);
    rule.metadata.namespace = Some(namespace.to_string());
    rule.metadata.uid = Some(uid.to_string());
    rule
}

pub fn to_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn remote_namespace(namespace: &str, name: &str, uid: &str) -> String {
    format!("agent/{}/{}/{}", namespace, name, uid)
}

pub const ONE_GROUP: &str = r#"
groups:
  - name: g1
    interval: 1m
    rules:
      - record: job:up:sum
        expr: sum by (job) (up)
"#;

pub const TWO_GROUPS: &str = r#"
groups:
  - name: g1
    rules:
      - record: job:up:sum
        expr: sum by (job) (up)
  - name: g2
    rules:
      - alert: TargetDown
        expr: up == 0
        for: 5m
        labels:
          severity: page
"#;

// ============================================================================
// Connector
// ============================================================================

/// Connector handing out the fakes and recording the queue of the latest watches
#[derive(Clone)]
pub struct FakeConnector {
    pub ruler: Arc<FakeRuler>,
    pub lister: Arc<FakeLister>,
    queue: Arc<Mutex<Option<WorkQueue<Event>>>>,
    selectors: Arc<Mutex<Option<Selectors>>>,
    starts: Arc<AtomicUsize>,
    fail_watches: Arc<AtomicBool>,
    start_delay: Arc<Mutex<Option<Duration>>>,
    stops: Arc<Mutex<Vec<CancellationToken>>>,
}

impl FakeConnector {
    pub fn new(ruler: Arc<FakeRuler>, lister: Arc<FakeLister>) -> Self {
        Self {
            ruler,
            lister,
            queue: Arc::default(),
            selectors: Arc::default(),
            starts: Arc::default(),
            fail_watches: Arc::default(),
            start_delay: Arc::default(),
            stops: Arc::default(),
        }
    }

    /// Number of times watches were started
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn selectors(&self) -> Option<Selectors> {
        self.selectors.lock().unwrap().clone()
    }

    pub fn fail_watches(&self, fail: bool) {
        self.fail_watches.store(fail, Ordering::SeqCst);
    }

    /// Make starting watches take `delay`
    pub fn slow_start(&self, delay: Duration) {
        *self.start_delay.lock().unwrap() = Some(delay);
    }

    /// Whether every set of watches handed out has been stopped
    pub fn all_watches_stopped(&self) -> bool {
        self.stops.lock().unwrap().iter().all(|t| t.is_cancelled())
    }

    /// Deliver a change notification the way a watch would
    pub fn notify(&self, key: &str) {
        if let Some(queue) = self.queue.lock().unwrap().as_ref() {
            queue.add(Event::ResourceChanged(key.to_string()));
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    fn ruler_client(&self, _args: &Arguments, _metrics: &Metrics) -> Result<Arc<dyn RulerClient>> {
        let ruler: Arc<dyn RulerClient> = self.ruler.clone();
        Ok(ruler)
    }

    async fn start_watches(
        &self,
        selectors: &Selectors,
        queue: WorkQueue<Event>,
    ) -> Result<Watches> {
        let delay = *self.start_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_watches.load(Ordering::SeqCst) {
            return Err(Error::KubeError("watch failed".to_string()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.selectors.lock().unwrap() = Some(selectors.clone());
        *self.queue.lock().unwrap() = Some(queue);

        let stop = CancellationToken::new();
        self.stops.lock().unwrap().push(stop.clone());
        Ok(Watches::new(self.lister.clone(), stop, Vec::new()))
    }
}

/// Poll `condition` until it holds, failing the test after `timeout`
pub async fn eventually<F>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {:?}",
            timeout
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
