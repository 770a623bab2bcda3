//! Differences between desired and actual rule state

use std::collections::{BTreeMap, HashMap, HashSet};

use super::{RuleGroup, RuleGroupsByNamespace};

/// One change needed to turn the actual groups of a namespace into the desired ones
#[derive(Clone, Debug, PartialEq)]
pub enum RuleGroupDiff {
    Add { desired: RuleGroup },
    Remove { actual: RuleGroup },
    Update { desired: RuleGroup, actual: RuleGroup },
}

impl RuleGroupDiff {
    pub fn kind(&self) -> &'static str {
        match self {
            RuleGroupDiff::Add { .. } => "add",
            RuleGroupDiff::Remove { .. } => "remove",
            RuleGroupDiff::Update { .. } => "update",
        }
    }

    pub fn group_name(&self) -> &str {
        match self {
            RuleGroupDiff::Add { desired } | RuleGroupDiff::Update { desired, .. } => {
                &desired.name
            }
            RuleGroupDiff::Remove { actual } => &actual.name,
        }
    }
}

/// Per-namespace differences between `desired` and `actual`.
///
/// Namespaces only present in `actual` are diffed against an empty desired
/// list. Namespaces without differences are left out of the result.
pub fn diff_rule_state(
    desired: &RuleGroupsByNamespace,
    actual: &RuleGroupsByNamespace,
) -> BTreeMap<String, Vec<RuleGroupDiff>> {
    let mut out = BTreeMap::new();

    for (ns, desired_groups) in desired {
        let actual_groups = actual.get(ns).map(Vec::as_slice).unwrap_or_default();
        let diff = diff_namespace(desired_groups, actual_groups);
        if !diff.is_empty() {
            out.insert(ns.clone(), diff);
        }
    }

    for (ns, actual_groups) in actual {
        if desired.contains_key(ns) {
            continue;
        }
        let diff = diff_namespace(&[], actual_groups);
        if !diff.is_empty() {
            out.insert(ns.clone(), diff);
        }
    }

    out
}

/// Differences between the groups of a single namespace.
///
/// Adds and updates come in desired order, followed by removes in actual order.
pub fn diff_namespace(desired: &[RuleGroup], actual: &[RuleGroup]) -> Vec<RuleGroupDiff> {
    let index: HashMap<&str, &RuleGroup> = actual.iter().map(|g| (g.name.as_str(), g)).collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(desired.len());
    let mut out = Vec::new();

    for group in desired {
        seen.insert(group.name.as_str());

        match index.get(group.name.as_str()) {
            Some(actual) if actual.equivalent(group) => {}
            Some(actual) => out.push(RuleGroupDiff::Update {
                desired: group.clone(),
                actual: (*actual).clone(),
            }),
            None => out.push(RuleGroupDiff::Add {
                desired: group.clone(),
            }),
        }
    }

    for group in actual {
        if !seen.contains(group.name.as_str()) {
            out.push(RuleGroupDiff::Remove {
                actual: group.clone(),
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Rule;
    use pretty_assertions::assert_eq;

    fn group(name: &str, expr: &str) -> RuleGroup {
        RuleGroup {
            name: name.to_string(),
            interval: Some("1m".parse().unwrap()),
            rules: vec![Rule {
                record: Some("r1".to_string()),
                expr: expr.to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn state(entries: &[(&str, Vec<RuleGroup>)]) -> RuleGroupsByNamespace {
        entries
            .iter()
            .map(|(ns, groups)| (ns.to_string(), groups.clone()))
            .collect()
    }

    #[test]
    fn missing_group_is_added() {
        let desired = state(&[("ns-a", vec![group("g1", "1")])]);
        let diff = diff_rule_state(&desired, &RuleGroupsByNamespace::new());

        let expected: BTreeMap<_, _> = [(
            "ns-a".to_string(),
            vec![RuleGroupDiff::Add {
                desired: group("g1", "1"),
            }],
        )]
        .into();
        assert_eq!(diff, expected);
    }

    #[test]
    fn undesired_namespace_is_removed() {
        let actual = state(&[("ns-a", vec![group("g1", "1")])]);
        let diff = diff_rule_state(&RuleGroupsByNamespace::new(), &actual);

        let expected: BTreeMap<_, _> = [(
            "ns-a".to_string(),
            vec![RuleGroupDiff::Remove {
                actual: group("g1", "1"),
            }],
        )]
        .into();
        assert_eq!(diff, expected);
    }

    #[test]
    fn changed_body_is_updated() {
        let desired = state(&[("ns-a", vec![group("g1", "1")])]);
        let actual = state(&[("ns-a", vec![group("g1", "3")])]);
        let diff = diff_rule_state(&desired, &actual);

        let expected: BTreeMap<_, _> = [(
            "ns-a".to_string(),
            vec![RuleGroupDiff::Update {
                desired: group("g1", "1"),
                actual: group("g1", "3"),
            }],
        )]
        .into();
        assert_eq!(diff, expected);
    }

    #[test]
    fn identical_state_has_no_namespaces() {
        let x = state(&[
            ("ns-a", vec![group("g1", "1"), group("g2", "2")]),
            ("ns-b", vec![group("g1", "1")]),
        ]);
        assert!(diff_rule_state(&x, &x).is_empty());
    }

    #[test]
    fn empty_desired_list_for_empty_actual_is_omitted() {
        let desired = state(&[("ns-a", vec![])]);
        assert!(diff_rule_state(&desired, &RuleGroupsByNamespace::new()).is_empty());
    }

    #[test]
    fn namespace_order_is_adds_and_updates_then_removes() {
        let desired = vec![group("new", "1"), group("changed", "2"), group("same", "3")];
        let actual = vec![
            group("gone-1", "0"),
            group("same", "3"),
            group("changed", "9"),
            group("gone-2", "0"),
        ];

        let kinds: Vec<(&str, String)> = diff_namespace(&desired, &actual)
            .iter()
            .map(|d| (d.kind(), d.group_name().to_string()))
            .collect();

        assert_eq!(
            kinds,
            vec![
                ("add", "new".to_string()),
                ("update", "changed".to_string()),
                ("remove", "gone-1".to_string()),
                ("remove", "gone-2".to_string()),
            ]
        );
    }

    #[test]
    fn disjoint_states_count_every_group() {
        let desired = state(&[
            ("ns-a", vec![group("a1", "1"), group("a2", "1")]),
            ("ns-b", vec![group("b1", "1")]),
        ]);
        let actual = state(&[
            ("ns-c", vec![group("c1", "1")]),
            ("ns-d", vec![group("d1", "1"), group("d2", "1")]),
        ]);

        let diff = diff_rule_state(&desired, &actual);
        let adds = diff.values().flatten().filter(|d| d.kind() == "add").count();
        let removes = diff.values().flatten().filter(|d| d.kind() == "remove").count();
        let updates = diff.values().flatten().filter(|d| d.kind() == "update").count();

        assert_eq!((adds, removes, updates), (3, 3, 0));
        assert_eq!(diff.len(), 4);
    }
}
