//! Custom Resource Definitions watched by the Mimir rules operator

mod prometheus_rule;

pub use prometheus_rule::*;

use kube::CustomResourceExt;

/// Generate CRD YAML manifests for all custom resources
pub fn generate_crds() -> Vec<String> {
    serde_yaml::to_string(&PrometheusRule::crd())
        .into_iter()
        .collect()
}
