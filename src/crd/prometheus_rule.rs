//! PrometheusRule Custom Resource Definition
//!
//! Mirrors the subset of the Prometheus Operator's `monitoring.coreos.com/v1`
//! PrometheusRule that the ruler understands.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// PrometheusRule resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "PrometheusRule",
    plural = "prometheusrules",
    singular = "prometheusrule",
    shortname = "promrule",
    namespaced,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusRuleSpec {
    /// Rule groups to evaluate
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<RuleGroupSpec>,
}

/// A named group of rules evaluated together
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleGroupSpec {
    /// Group name, unique within the resource
    pub name: String,

    /// Evaluation interval (Prometheus duration, e.g. `1m`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    /// Limit on the number of alerts or series a rule can produce (0 is no limit)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    /// Rules in evaluation order
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

/// A recording or alerting rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    /// Name of the time series to output to (recording rules)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<String>,

    /// Name of the alert (alerting rules)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,

    /// PromQL expression to evaluate
    pub expr: RuleExpr,

    /// Pending period before an alert fires
    #[serde(rename = "for", skip_serializing_if = "Option::is_none")]
    pub for_: Option<String>,

    /// How long an alert keeps firing after its condition clears
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_firing_for: Option<String>,

    /// Labels to add or overwrite
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Annotations to add to each alert
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Rule expression; the CRD accepts either a string or a bare integer
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(untagged)]
pub enum RuleExpr {
    Int(i64),
    String(String),
}

impl Default for RuleExpr {
    fn default() -> Self {
        RuleExpr::String(String::new())
    }
}

impl fmt::Display for RuleExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleExpr::Int(v) => write!(f, "{}", v),
            RuleExpr::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for RuleExpr {
    fn from(s: &str) -> Self {
        RuleExpr::String(s.to_string())
    }
}
