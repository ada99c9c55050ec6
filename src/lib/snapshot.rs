//! Raw, unvalidated data as returned by the Kubernetes and metrics APIs.
//!
//! Quantities stay as strings here; they are parsed (and rejected if
//! malformed) when the metric tree is built.

use std::collections::BTreeMap;

use log::warn;
use serde::Serialize;

#[derive(Debug, Clone, Default)]
pub struct RawPod {
    pub name: String,
    pub namespace: String,
    /// Empty when the pod is not scheduled yet
    pub node_name: String,
    pub labels: BTreeMap<String, String>,
    pub containers: Vec<RawContainer>,
}

#[derive(Debug, Clone, Default)]
pub struct RawContainer {
    pub name: String,
    pub cpu_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_request: Option<String>,
    pub memory_limit: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RawNode {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub taints: Vec<RawTaint>,
    pub allocatable_cpu: Option<String>,
    pub allocatable_memory: Option<String>,
    pub allocatable_pods: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTaint {
    pub key: String,
    pub value: Option<String>,
    pub effect: String,
}

#[derive(Debug, Clone, Default)]
pub struct RawNamespace {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct RawPodMetrics {
    pub name: String,
    pub namespace: String,
    pub containers: Vec<RawContainerUsage>,
}

#[derive(Debug, Clone, Default)]
pub struct RawContainerUsage {
    pub name: String,
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RawNodeMetrics {
    pub name: String,
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

/// Which fetch a non-fatal failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchSource {
    Pods,
    Nodes,
    PodMetrics,
    NodeMetrics,
}

impl FetchSource {
    fn describe(&self) -> &'static str {
        match self {
            FetchSource::Pods => "pods",
            FetchSource::Nodes => "nodes",
            FetchSource::PodMetrics => "pod metrics",
            FetchSource::NodeMetrics => "node metrics",
        }
    }
}

/// A fetch that failed without aborting the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub source: FetchSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub message: String,
}

/// Everything the tree builder needs, gathered before it starts.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub pods: Vec<RawPod>,
    /// `None` when nodes were not listed; pods are then not grouped by node
    pub nodes: Option<Vec<RawNode>>,
    /// Only listed when a namespace label selector is in use
    pub namespaces: Option<Vec<RawNamespace>>,
    /// Present only in utilization mode
    pub pod_metrics: Option<Vec<RawPodMetrics>>,
    pub node_metrics: Option<Vec<RawNodeMetrics>>,
    pub failures: Vec<FetchFailure>,
}

/// Combine per-namespace listings into one list.
///
/// Namespaces that failed are recorded in `failures` and skipped. The
/// result is an error, carrying the last message, only when every
/// namespace failed.
pub(crate) fn merge_namespace_results<T>(
    results: Vec<(String, Result<Vec<T>, String>)>,
    source: FetchSource,
    failures: &mut Vec<FetchFailure>,
) -> Result<Vec<T>, String> {
    let mut items = Vec::new();
    let mut succeeded = 0usize;
    let mut last_error = None;

    for (namespace, result) in results {
        match result {
            Ok(listed) => {
                succeeded += 1;
                items.extend(listed);
            }
            Err(message) => {
                warn!(
                    "Error listing {} in namespace {namespace}: {message}",
                    source.describe()
                );
                failures.push(FetchFailure {
                    source,
                    namespace: Some(namespace),
                    message: message.clone(),
                });
                last_error = Some(message);
            }
        }
    }

    match last_error {
        Some(message) if succeeded == 0 => Err(message),
        _ => Ok(items),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CapacityError, KubernetesError, MetricsError};

    type Listing = (String, Result<Vec<&'static str>, String>);

    fn listing(namespace: &str, result: Result<Vec<&'static str>, &str>) -> Listing {
        (namespace.to_string(), result.map_err(str::to_string))
    }

    #[test]
    fn failed_namespace_is_recorded_and_skipped() {
        let mut failures = Vec::new();
        let merged = merge_namespace_results(
            vec![
                listing("a", Ok(vec!["p1", "p2", "p3"])),
                listing("b", Err("forbidden")),
            ],
            FetchSource::Pods,
            &mut failures,
        );

        assert_eq!(merged, Ok(vec!["p1", "p2", "p3"]));
        assert_eq!(
            failures,
            vec![FetchFailure {
                source: FetchSource::Pods,
                namespace: Some("b".to_string()),
                message: "forbidden".to_string(),
            }]
        );
    }

    #[test]
    fn every_namespace_failing_is_an_error() {
        let mut failures = Vec::new();
        let merged = merge_namespace_results(
            vec![listing("a", Err("timeout")), listing("b", Err("forbidden"))],
            FetchSource::Pods,
            &mut failures,
        );

        assert_eq!(merged, Err("forbidden".to_string()));
        assert_eq!(failures.len(), 2);

        let pods: CapacityError = KubernetesError::PodListFailed("forbidden".into()).into();
        assert_eq!(pods.exit_code(), 3);
        let metrics: CapacityError = MetricsError::PodMetricsUnavailable("forbidden".into()).into();
        assert_eq!(metrics.exit_code(), 6);
    }

    #[test]
    fn empty_namespace_listing_is_not_a_failure() {
        let mut failures = Vec::new();
        let merged = merge_namespace_results(
            vec![listing("a", Ok(Vec::new()))],
            FetchSource::PodMetrics,
            &mut failures,
        );
        assert_eq!(merged, Ok(Vec::new()));
        assert!(failures.is_empty());
    }
}
