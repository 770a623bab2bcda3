//! Client side of the Mimir ruler's rule-group API

mod client;

pub use client::HttpRulerClient;

use async_trait::async_trait;

use crate::rules::{RuleGroup, RuleGroupsByNamespace};
use crate::Result;

/// Rule-group operations of a remote ruler, scoped by ruler namespace
#[async_trait]
pub trait RulerClient: Send + Sync {
    /// Create `group` in `namespace`, replacing any group with the same name.
    async fn create_rule_group(&self, namespace: &str, group: &RuleGroup) -> Result<()>;

    /// Delete the group named `group` from `namespace`.
    async fn delete_rule_group(&self, namespace: &str, group: &str) -> Result<()>;

    /// Rule groups of one namespace, or of every namespace when `namespace` is `None`.
    async fn list_rules(&self, namespace: Option<&str>) -> Result<RuleGroupsByNamespace>;
}
