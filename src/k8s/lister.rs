//! Cached, label-selector-filtered access to watched objects

use k8s_openapi::api::core::v1::Namespace;
use kube::core::{Selector, SelectorExt};
use kube::runtime::reflector::Store;
use kube::ResourceExt;
use std::sync::Arc;

use crate::crd::PrometheusRule;
use crate::Result;

/// Read access to the watched objects.
///
/// Results come from a local cache and may lag the API server.
pub trait ResourceLister: Send + Sync {
    /// Namespaces matching `selector`, sorted by name
    fn list_namespaces(&self, selector: &Selector) -> Result<Vec<Arc<Namespace>>>;

    /// PrometheusRules in `namespace` matching `selector`, sorted by name
    fn list_rules(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<Arc<PrometheusRule>>>;
}

/// Lister backed by reflector stores
#[derive(Clone)]
pub struct StoreLister {
    namespaces: Store<Namespace>,
    rules: Store<PrometheusRule>,
}

impl StoreLister {
    pub fn new(namespaces: Store<Namespace>, rules: Store<PrometheusRule>) -> Self {
        Self { namespaces, rules }
    }
}

impl ResourceLister for StoreLister {
    fn list_namespaces(&self, selector: &Selector) -> Result<Vec<Arc<Namespace>>> {
        let mut out: Vec<_> = self
            .namespaces
            .state()
            .into_iter()
            .filter(|ns| selector.matches(ns.labels()))
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
            .state()
            .into_iter()
            .filter(|rule| rule.namespace().as_deref() == Some(namespace))
            .filter(|rule| selector.matches(rule.labels()))
            .collect();
        out.sort_by_key(|rule| rule.name_any());
        Ok(out)
    }
}
