//! Node, namespace and pod selection.
//!
//! Selectors are parsed once from the command line. Filtering happens
//! before aggregation, so anything excluded here never reaches a total.

use std::collections::{BTreeMap, BTreeSet};

use crate::lib::error::ConfigError;
use crate::lib::snapshot::{RawNode, RawPod, RawTaint};

const TAINT_EFFECTS: [&str; 3] = ["NoSchedule", "PreferNoSchedule", "NoExecute"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(key, value) => labels.get(key) == Some(value),
            Requirement::NotEquals(key, value) => labels.get(key) != Some(value),
            Requirement::In(key, values) => labels.get(key).is_some_and(|v| values.contains(v)),
            Requirement::NotIn(key, values) => !labels.get(key).is_some_and(|v| values.contains(v)),
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::DoesNotExist(key) => !labels.contains_key(key),
        }
    }
}

/// A Kubernetes label selector (`app=web,tier!=db,env in (prod,stage)`).
///
/// The empty selector matches every object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    raw: String,
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn parse(selector: &str) -> Result<Self, ConfigError> {
        let raw = selector.trim().to_string();
        let invalid = |reason: &str| ConfigError::InvalidLabelSelector {
            selector: raw.clone(),
            reason: reason.to_string(),
        };

        let mut requirements = Vec::new();
        for term in split_top_level(&raw).map_err(|reason| invalid(&reason))? {
            requirements.push(parse_requirement(term).map_err(|reason| invalid(&reason))?);
        }

        Ok(Self { raw, requirements })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// The selector as typed, suitable for `ListParams::labels`
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

/// Split on commas that are not inside a `( ... )` value set
fn split_top_level(selector: &str) -> Result<Vec<&str>, String> {
    if selector.is_empty() {
        return Ok(Vec::new());
    }

    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unbalanced ')'".to_string())?
            }
            ',' if depth == 0 => {
                terms.push(selector[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unterminated '('".to_string());
    }
    terms.push(selector[start..].trim());

    if terms.iter().any(|t| t.is_empty()) {
        return Err("empty requirement".to_string());
    }
    Ok(terms)
}

fn parse_requirement(term: &str) -> Result<Requirement, String> {
    if let Some(key) = term.strip_prefix('!') {
        let key = key.trim();
        validate_key(key)?;
        return Ok(Requirement::DoesNotExist(key.to_string()));
    }

    if let Some(open) = term.find('(') {
        let close = term
            .strip_suffix(')')
            .map(|_| term.len() - 1)
            .ok_or_else(|| format!("expected ')' at end of '{term}'"))?;
        let mut head = term[..open].split_whitespace();
        let (key, operator) = match (head.next(), head.next(), head.next()) {
            (Some(key), Some(operator), None) => (key, operator),
            _ => return Err(format!("expected '<key> in|notin (...)' in '{term}'")),
        };
        validate_key(key)?;
        let values = term[open + 1..close]
            .split(',')
            .map(|v| {
                let v = v.trim();
                validate_value(v).map(|_| v.to_string())
            })
            .collect::<Result<BTreeSet<_>, _>>()?;
        return match operator {
            "in" => Ok(Requirement::In(key.to_string(), values)),
            "notin" => Ok(Requirement::NotIn(key.to_string(), values)),
            other => Err(format!("unknown set operator '{other}'")),
        };
    }

    let (key, value, negated) = if let Some((k, v)) = term.split_once("!=") {
        (k, v, true)
    } else if let Some((k, v)) = term.split_once("==") {
        (k, v, false)
    } else if let Some((k, v)) = term.split_once('=') {
        (k, v, false)
    } else {
        let key = term.trim();
        validate_key(key)?;
        return Ok(Requirement::Exists(key.to_string()));
    };

    let (key, value) = (key.trim(), value.trim());
    validate_key(key)?;
    validate_value(value)?;
    Ok(if negated {
        Requirement::NotEquals(key.to_string(), value.to_string())
    } else {
        Requirement::Equals(key.to_string(), value.to_string())
    })
}

fn validate_key(key: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err("empty label key".to_string());
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
    {
        return Err(format!("invalid label key '{key}'"));
    }
    Ok(())
}

fn validate_value(value: &str) -> Result<(), String> {
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(format!("invalid label value '{value}'"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TaintTerm {
    key: String,
    value: Option<String>,
    effect: Option<String>,
    /// `key:effect-` form: the node must not carry this taint
    negated: bool,
}

impl TaintTerm {
    fn matches(&self, taint: &RawTaint) -> bool {
        taint.key == self.key
            && self
                .value
                .as_deref()
                .is_none_or(|v| taint.value.as_deref().unwrap_or("") == v)
            && self.effect.as_deref().is_none_or(|e| taint.effect == e)
    }
}

/// Taint filter in `key[=value][:effect][-]` form, comma-separated.
///
/// Every term must hold. A plain term holds when at least one of the
/// node's taints matches it; a term ending in `-` holds when none does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaintSelector {
    terms: Vec<TaintTerm>,
}

impl TaintSelector {
    pub fn parse(selector: &str) -> Result<Self, ConfigError> {
        let selector = selector.trim();
        let invalid = |reason: String| ConfigError::InvalidTaintSelector {
            selector: selector.to_string(),
            reason,
        };
        if selector.is_empty() {
            return Ok(Self::default());
        }

        let mut terms = Vec::new();
        for term in selector.split(',').map(str::trim) {
            let (term, negated) = match term.strip_suffix('-') {
                Some(rest) => (rest, true),
                None => (term, false),
            };
            let (key_value, effect) = match term.rsplit_once(':') {
                Some((kv, effect)) => (kv, Some(effect.to_string())),
                None => (term, None),
            };
            if let Some(effect) = &effect {
                if !TAINT_EFFECTS.contains(&effect.as_str()) {
                    return Err(invalid(format!("unknown taint effect '{effect}'")));
                }
            }
            let (key, value) = match key_value.split_once('=') {
                Some((k, v)) => (k, Some(v.to_string())),
                None => (key_value, None),
            };
            if key.is_empty() {
                return Err(invalid("empty taint key".to_string()));
            }
            terms.push(TaintTerm {
                key: key.to_string(),
                value,
                effect,
                negated,
            });
        }

        Ok(Self { terms })
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn matches(&self, taints: &[RawTaint]) -> bool {
        self.terms.iter().all(|term| {
            let present = taints.iter().any(|t| term.matches(t));
            present != term.negated
        })
    }
}

/// Decides which nodes and pods take part in the report.
///
/// `Default` selects everything.
#[derive(Debug, Clone, Default)]
pub struct SelectionFilter {
    pub pod_labels: LabelSelector,
    pub node_labels: LabelSelector,
    pub node_taints: TaintSelector,
    pub exclude_tainted: bool,
    pub namespace_labels: LabelSelector,
    /// Empty means every namespace
    pub namespaces: Vec<String>,
}

impl SelectionFilter {
    /// True when any node-level selector is in effect
    pub fn filters_nodes(&self) -> bool {
        !self.node_labels.is_empty() || !self.node_taints.is_empty() || self.exclude_tainted
    }

    pub fn includes_node(&self, node: &RawNode) -> bool {
        if !self.node_labels.matches(&node.labels) {
            return false;
        }
        if self.exclude_tainted {
            return node.taints.is_empty();
        }
        self.node_taints.matches(&node.taints)
    }

    /// `labels` is `None` when the namespace's labels are unknown. That only
    /// passes when no namespace label selector is in use.
    pub fn includes_namespace(
        &self,
        namespace: &str,
        labels: Option<&BTreeMap<String, String>>,
    ) -> bool {
        if !self.namespaces.is_empty() && !self.namespaces.iter().any(|n| n == namespace) {
            return false;
        }
        if self.namespace_labels.is_empty() {
            return true;
        }
        labels.is_some_and(|l| self.namespace_labels.matches(l))
    }

    pub fn includes_pod(
        &self,
        pod: &RawPod,
        namespace_labels: Option<&BTreeMap<String, String>>,
    ) -> bool {
        self.includes_namespace(&pod.namespace, namespace_labels)
            && self.pod_labels.matches(&pod.labels)
    }
}
