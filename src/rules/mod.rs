//! Rule group model shared by the Kubernetes side and the ruler side

mod convert;
pub mod diff;
mod duration;
pub mod namespace;

pub use convert::convert_crd_rule_groups;
pub use diff::{diff_namespace, diff_rule_state, RuleGroupDiff};
pub use duration::PromDuration;
pub use namespace::{is_managed_namespace, namespace_for_rule, ManagedNamespaces};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rule groups indexed by ruler namespace
pub type RuleGroupsByNamespace = BTreeMap<String, Vec<RuleGroup>>;

/// A named collection of rules evaluated together at a fixed interval
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct RuleGroup {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<PromDuration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_tenants: Vec<String>,

    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// A recording or alerting rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,

    pub expr: String,

    #[serde(rename = "for", default, skip_serializing_if = "Option::is_none")]
    pub for_: Option<PromDuration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_firing_for: Option<PromDuration>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl RuleGroup {
    /// Bring the group into the one form both the CRD conversion and the ruler
    /// listing are compared in: zero durations and zero limits mean "unset".
    pub fn normalize(mut self) -> Self {
        self.interval = self.interval.filter(|d| !d.is_zero());
        self.limit = self.limit.filter(|l| *l != 0);
        for rule in &mut self.rules {
            rule.for_ = rule.for_.filter(|d| !d.is_zero());
            rule.keep_firing_for = rule.keep_firing_for.filter(|d| !d.is_zero());
        }
        self
    }

    /// Stable structural encoding used for equality.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        // Every field is a string, integer, list or BTreeMap, so encoding cannot fail.
        serde_yaml::to_string(&self.clone().normalize())
            .map(String::into_bytes)
            .unwrap_or_default()
    }

    /// Whether two groups have byte-identical canonical encodings.
    pub fn equivalent(&self, other: &RuleGroup) -> bool {
        self.canonical_bytes() == other.canonical_bytes()
    }
}
