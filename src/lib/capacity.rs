use log::{debug, info, warn};

use crate::lib::config::Config;
use crate::lib::kubernetes::KubernetesLoader;
use crate::lib::metrics::MetricsLoader;
use crate::lib::output::emit;
use crate::lib::selector::SelectionFilter;
use crate::lib::snapshot::{ClusterSnapshot, FetchFailure, FetchSource, RawNode};
use crate::lib::sort::sort_cluster;
use crate::lib::tree::{ClusterMetric, build_cluster_metric};
use crate::{CapacityError, KubernetesError, Result};

/// Gather cluster resource data and print the report.
pub async fn run(config: &Config) -> Result<()> {
    let loader = KubernetesLoader::new(&config.connection).await?;
    let snapshot = collect_snapshot(&loader, config).await?;
    let cluster = build_report(&snapshot, config);
    emit(&cluster, &config.display)
}

/// Build and order the metric tree for an already-fetched snapshot
pub fn build_report(snapshot: &ClusterSnapshot, config: &Config) -> ClusterMetric {
    let mut cluster = build_cluster_metric(snapshot, &config.filter);
    sort_cluster(&mut cluster, config.sort_by);

    if cluster.is_partial() {
        warn!(
            "Report is partial: {} listing(s) failed",
            cluster.failures.len()
        );
    }
    debug!(
        "Built report with {} nodes and {} pods",
        cluster.nodes.len(),
        cluster.pod_count()
    );
    cluster
}

/// Fetch every list the configured report needs.
///
/// Returns only once all of them have succeeded or failed; the tree
/// builder never sees a list that is still being fetched.
pub async fn collect_snapshot(loader: &KubernetesLoader, config: &Config) -> Result<ClusterSnapshot> {
    let filter = &config.filter;
    let mut failures = Vec::new();

    let namespaces = if filter.namespace_labels.is_empty() {
        None
    } else {
        Some(loader.list_namespaces(&filter.namespace_labels).await?)
    };

    let pods = loader.list_pods(filter, &mut failures).await?;
    let nodes = degrade_node_listing(filter, loader.list_nodes(filter).await, &mut failures)?;

    let (pod_metrics, node_metrics) = if config.display.show_util {
        let metrics = MetricsLoader::new(loader.client().clone()).await?;
        let pod_metrics = metrics
            .list_pod_metrics(&filter.namespaces, &mut failures)
            .await?;
        let node_metrics = if nodes.is_some() {
            metrics.list_node_metrics(&mut failures).await
        } else {
            None
        };
        (Some(pod_metrics), node_metrics)
    } else {
        (None, None)
    };

    info!(
        "Collected {} pods, {} nodes",
        pods.len(),
        nodes.as_ref().map_or(0, Vec::len)
    );

    Ok(ClusterSnapshot {
        pods,
        nodes,
        namespaces,
        pod_metrics,
        node_metrics,
        failures,
    })
}

/// Without a node selector, losing the node list only loses the grouping
fn degrade_node_listing(
    filter: &SelectionFilter,
    listed: Result<Vec<RawNode>>,
    failures: &mut Vec<FetchFailure>,
) -> Result<Option<Vec<RawNode>>> {
    match listed {
        Ok(nodes) => Ok(Some(nodes)),
        Err(e) if filter.filters_nodes() => Err(e),
        Err(CapacityError::Kubernetes(KubernetesError::NodeListFailed(message))) => {
            warn!("Error listing nodes, reporting pods without node grouping: {message}");
            failures.push(FetchFailure {
                source: FetchSource::Nodes,
                namespace: None,
                message,
            });
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
