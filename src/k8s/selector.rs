//! Label selectors for namespaces and PrometheusRules
//!
//! Selectors are configured in the Kubernetes `LabelSelector` shape and
//! converted to [`Selector`], which both the watch list options and local
//! matching use.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use kube::core::Selector;
use lazy_static::lazy_static;
use regex::Regex;

use crate::{Error, Result};

const MAX_NAME_LENGTH: usize = 63;
const MAX_PREFIX_LENGTH: usize = 253;

lazy_static! {
    static ref NAME: Regex = Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$").unwrap();
    static ref DNS_SUBDOMAIN: Regex =
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap();
}

/// The pair of selectors the controller watches and lists with
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Selectors {
    /// Which namespaces PrometheusRules are taken from
    pub namespaces: Selector,
    /// Which PrometheusRules are synchronized
    pub rules: Selector,
}

/// Validate a configured selector and convert it for watching and matching.
///
/// Keys must be qualified names and values valid label values, so that the
/// rendered list option selects exactly what local matching selects.
pub fn parse_label_selector(selector: &LabelSelector) -> Result<Selector> {
    if let Some(labels) = &selector.match_labels {
        for (key, value) in labels {
            validate_key(key)?;
            validate_value(key, value)?;
        }
    }
    for requirement in selector.match_expressions.iter().flatten() {
        validate_requirement(requirement)?;
    }

    Selector::try_from(selector.clone()).map_err(|e| Error::SelectorError(e.to_string()))
}

fn validate_requirement(requirement: &LabelSelectorRequirement) -> Result<()> {
    let key = &requirement.key;
    validate_key(key)?;

    let values = requirement.values.as_deref().unwrap_or_default();
    match requirement.operator.as_str() {
        "In" | "NotIn" if values.is_empty() => Err(Error::SelectorError(format!(
            "operator {} on key {:?} requires at least one value",
            requirement.operator, key
        ))),
        "In" | "NotIn" => values.iter().try_for_each(|v| validate_value(key, v)),
        "Exists" | "DoesNotExist" if !values.is_empty() => Err(Error::SelectorError(format!(
            "operator {} on key {:?} must not have values",
            requirement.operator, key
        ))),
        "Exists" | "DoesNotExist" => Ok(()),
        other => Err(Error::SelectorError(format!(
            "unknown operator {:?} on key {:?}",
            other, key
        ))),
    }
}

fn validate_key(key: &str) -> Result<()> {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };

    if let Some(prefix) = prefix {
        if prefix.is_empty() || prefix.len() > MAX_PREFIX_LENGTH || !DNS_SUBDOMAIN.is_match(prefix)
        {
            return Err(Error::SelectorError(format!(
                "invalid label key {:?}: prefix must be a DNS subdomain",
                key
            )));
        }
    }
    if name.is_empty() || name.len() > MAX_NAME_LENGTH || !NAME.is_match(name) {
        return Err(Error::SelectorError(format!(
            "invalid label key {:?}: name must be at most {} alphanumeric, '-', '_' or '.' characters",
            key, MAX_NAME_LENGTH
        )));
    }
    Ok(())
}

fn validate_value(key: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > MAX_NAME_LENGTH || !NAME.is_match(value) {
        return Err(Error::SelectorError(format!(
            "invalid value {:?} for label key {:?}",
            value, key
        )));
    }
    Ok(())
}
