//! Mapping between PrometheusRule identities and ruler namespaces
//!
//! Every PrometheusRule owns exactly one ruler namespace named
//! `{prefix}/{namespace}/{name}/{uid}`. Ruler namespaces that do not have
//! this shape belong to someone else and are never read or written.

use regex::Regex;

const UUID_PATTERN: &str =
    r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}";

/// Ruler namespace that stores the groups of one PrometheusRule.
///
/// No escaping is applied; the UID keeps identifiers unique.
pub fn namespace_for_rule(prefix: &str, namespace: &str, name: &str, uid: &str) -> String {
    format!("{}/{}/{}/{}", prefix, namespace, name, uid)
}

/// Whether `namespace` is a ruler namespace managed under `prefix`.
pub fn is_managed_namespace(prefix: &str, namespace: &str) -> bool {
    ManagedNamespaces::new(prefix).is_managed(namespace)
}

/// Compiled ownership test for one prefix
#[derive(Clone, Debug)]
pub struct ManagedNamespaces {
    prefix: String,
    pattern: Regex,
}

impl ManagedNamespaces {
    pub fn new(prefix: &str) -> Self {
        let pattern = format!("^{}/.+/.+/{}$", regex::escape(prefix), UUID_PATTERN);
        Self {
            prefix: prefix.to_string(),
            // Built from an escaped literal and a fixed pattern.
            pattern: Regex::new(&pattern).expect("managed namespace pattern is valid"),
        }
    }

    pub fn is_managed(&self, namespace: &str) -> bool {
        self.pattern.is_match(namespace)
    }

    pub fn namespace_for(&self, namespace: &str, name: &str, uid: &str) -> String {
        namespace_for_rule(&self.prefix, namespace, name, uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UID: &str = "3f2b6c1e-8a4d-4e2f-9b1a-0c5d7e8f9a01";

    #[test]
    fn builds_namespace_from_identity() {
        assert_eq!(
            namespace_for_rule("agent", "team-x", "alerts", "u"),
            "agent/team-x/alerts/u"
        );
    }

    #[test]
    fn own_namespaces_are_managed() {
        let ns = namespace_for_rule("agent", "team-x", "alerts", UID);
        assert!(is_managed_namespace("agent", &ns));
        assert!(is_managed_namespace("agent", &ns.to_uppercase().replacen("AGENT", "agent", 1)));
    }

    #[test]
    fn foreign_namespaces_are_not_managed() {
        let other = namespace_for_rule("other", "team-x", "alerts", UID);
        assert!(!is_managed_namespace("agent", &other));
        assert!(!is_managed_namespace("agent", "agent/team-x/alerts/not-a-uuid"));
        assert!(!is_managed_namespace("agent", "agent/team-x/alerts"));
        assert!(!is_managed_namespace("agent", "agent//alerts/"));
        assert!(!is_managed_namespace("agent", "my-hand-written-rules"));
        assert!(!is_managed_namespace("agent", &format!("xagent/team-x/alerts/{}", UID)));
    }

    #[test]
    fn prefix_is_matched_literally() {
        let ns = namespace_for_rule("a.b", "team-x", "alerts", UID);
        assert!(is_managed_namespace("a.b", &ns));
        assert!(!is_managed_namespace("a.b", &format!("axb/team-x/alerts/{}", UID)));
    }

    #[test]
    fn distinct_uids_never_collide() {
        let codec = ManagedNamespaces::new("agent");
        let a = codec.namespace_for("team-x", "alerts", UID);
        let b = codec.namespace_for("team-x", "alerts", "9f2b6c1e-8a4d-4e2f-9b1a-0c5d7e8f9a01");
        assert_ne!(a, b);
    }
}
