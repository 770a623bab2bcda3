//! Conversion of PrometheusRule specs into ruler rule groups

use regex::Regex;
use std::collections::HashSet;

use super::{PromDuration, Rule, RuleGroup};
use crate::crd::{PrometheusRuleSpec, RuleGroupSpec, RuleSpec};
use crate::{Error, Result};

lazy_static::lazy_static! {
    static ref METRIC_NAME_RE: Regex =
        Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("metric name pattern is valid");
    static ref LABEL_NAME_RE: Regex =
        Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("label name pattern is valid");
}

/// Convert the groups of a PrometheusRule into normalized rule groups.
///
/// Every problem in the resource is reported, not just the first one; a resource
/// with any problem yields no groups at all.
pub fn convert_crd_rule_groups(spec: &PrometheusRuleSpec) -> Result<Vec<RuleGroup>> {
    let mut problems = Vec::new();
    let mut seen = HashSet::new();
    let mut groups = Vec::with_capacity(spec.groups.len());

    for group in &spec.groups {
        if group.name.is_empty() {
            problems.push("group name must not be empty".to_string());
        } else if !seen.insert(group.name.as_str()) {
            problems.push(format!("group {:?} is repeated", group.name));
        }

        if let Some(converted) = convert_group(group, &mut problems) {
            groups.push(converted.normalize());
        }
    }

    if problems.is_empty() {
        Ok(groups)
    } else {
        Err(Error::ValidationError(problems.join("; ")))
    }
}

fn convert_group(group: &RuleGroupSpec, problems: &mut Vec<String>) -> Option<RuleGroup> {
    let before = problems.len();
    let interval = parse_duration(&group.name, "interval", group.interval.as_deref(), problems);

    let rules: Vec<Rule> = group
        .rules
        .iter()
        .enumerate()
        .filter_map(|(idx, rule)| convert_rule(&group.name, idx, rule, problems))
        .collect();

    if problems.len() > before {
        return None;
    }

    Some(RuleGroup {
        name: group.name.clone(),
        interval,
        limit: group.limit,
        source_tenants: Vec::new(),
        rules,
    })
}

fn convert_rule(
    group: &str,
    idx: usize,
    rule: &RuleSpec,
    problems: &mut Vec<String>,
) -> Option<Rule> {
    let before = problems.len();
    let at = format!("group {:?}, rule {}", group, idx + 1);
    let expr = rule.expr.to_string();

    match (&rule.record, &rule.alert) {
        (Some(_), Some(_)) => problems.push(format!("{}: only one of 'record' and 'alert' may be set", at)),
        (None, None) => problems.push(format!("{}: one of 'record' or 'alert' must be set", at)),
        (Some(record), None) => {
            if !METRIC_NAME_RE.is_match(record) {
                problems.push(format!("{}: invalid recording rule name {:?}", at, record));
            }
            if !rule.annotations.is_empty() {
                problems.push(format!("{}: invalid field 'annotations' in recording rule", at));
            }
            if rule.for_.is_some() {
                problems.push(format!("{}: invalid field 'for' in recording rule", at));
            }
            if rule.keep_firing_for.is_some() {
                problems.push(format!("{}: invalid field 'keep_firing_for' in recording rule", at));
            }
        }
        (None, Some(alert)) => {
            if alert.is_empty() {
                problems.push(format!("{}: alert name must not be empty", at));
            }
        }
    }

    if expr.trim().is_empty() {
        problems.push(format!("{}: field 'expr' must be set in rule", at));
    }

    for name in rule.labels.keys() {
        if !LABEL_NAME_RE.is_match(name) {
            problems.push(format!("{}: invalid label name {:?}", at, name));
        }
    }

    let for_ = parse_duration(group, "for", rule.for_.as_deref(), problems);
    let keep_firing_for =
        parse_duration(group, "keep_firing_for", rule.keep_firing_for.as_deref(), problems);

    if problems.len() > before {
        return None;
    }

    Some(Rule {
        record: rule.record.clone(),
        alert: rule.alert.clone(),
        expr,
        for_,
        keep_firing_for,
        labels: rule.labels.clone(),
        annotations: rule.annotations.clone(),
    })
}

fn parse_duration(
    group: &str,
    field: &str,
    value: Option<&str>,
    problems: &mut Vec<String>,
) -> Option<PromDuration> {
    match value?.parse() {
        Ok(d) => Some(d),
        Err(e) => {
            problems.push(format!("group {:?}: field '{}': {}", group, field, e));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::RuleExpr;

    fn spec(yaml: &str) -> PrometheusRuleSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn converts_recording_and_alerting_rules() {
        let groups = convert_crd_rule_groups(&spec(
            r#"
groups:
  - name: g1
    interval: 60s
    rules:
      - record: r1
        expr: 1
      - alert: Down
        expr: up == 0
        for: 5m
        labels:
          severity: page
"#,
        ))
        .unwrap();

        assert_eq!(groups.len(), 1);
        let g = &groups[0];
        assert_eq!(g.name, "g1");
        assert_eq!(g.interval.unwrap().to_string(), "1m");
        assert_eq!(g.rules[0].record.as_deref(), Some("r1"));
        assert_eq!(g.rules[0].expr, "1");
        assert_eq!(g.rules[1].for_.unwrap().to_string(), "5m");
    }

    #[test]
    fn empty_spec_has_no_groups() {
        assert!(convert_crd_rule_groups(&PrometheusRuleSpec::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn repeated_group_names_are_rejected() {
        let err = convert_crd_rule_groups(&spec(
            r#"
groups:
  - name: g1
    rules: [{record: r1, expr: "1"}]
  - name: g1
    rules: [{record: r2, expr: "2"}]
"#,
        ))
        .unwrap_err();

        assert!(err.to_string().contains("repeated"));
    }

    #[test]
    fn every_problem_is_reported() {
        let bad = PrometheusRuleSpec {
            groups: vec![RuleGroupSpec {
                name: "g1".to_string(),
                interval: Some("soon".to_string()),
                limit: None,
                rules: vec![
                    RuleSpec {
                        record: Some("r1".to_string()),
                        alert: Some("a1".to_string()),
                        expr: RuleExpr::from("1"),
                        ..Default::default()
                    },
                    RuleSpec {
                        record: Some("bad name".to_string()),
                        expr: RuleExpr::from(""),
                        ..Default::default()
                    },
                ],
            }],
        };

        let msg = convert_crd_rule_groups(&bad).unwrap_err().to_string();
        assert!(msg.contains("interval"));
        assert!(msg.contains("only one of 'record' and 'alert'"));
        assert!(msg.contains("invalid recording rule name"));
        assert!(msg.contains("'expr' must be set"));
    }

    #[test]
    fn recording_rules_cannot_carry_alert_fields() {
        let err = convert_crd_rule_groups(&spec(
            r#"
groups:
  - name: g1
    rules:
      - record: r1
        expr: "1"
        for: 5m
"#,
        ))
        .unwrap_err();

        assert!(matches!(err, Error::ValidationError(_)));
        assert!(err.to_string().contains("'for'"));
    }
}
