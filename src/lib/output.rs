use std::io::Write;

use serde::Serialize;

use crate::lib::cli::OutputFormat;
use crate::lib::config::DisplayOptions;
use crate::lib::quantity::{percentage, ResourceKind, ResourceQuantity};
use crate::lib::snapshot::FetchFailure;
use crate::lib::tree::{
    AllocationField, ClusterMetric, ContainerMetric, NodeMetric, PodMetric, ResourceAllocation,
    ResourceAmounts,
};
use crate::lib::tui::display_table;
use crate::{OutputError, Result};

/// Rendered in place of unknown values and undefined percentages
pub const UNKNOWN: &str = "—";

const KINDS: [ResourceKind; 2] = [ResourceKind::Cpu, ResourceKind::Memory];

/// Print the finished report in the configured format
pub fn emit(cluster: &ClusterMetric, display: &DisplayOptions) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match display.output {
        OutputFormat::Table => {
            out.write_all(render_text(&ReportTable::new(cluster, display)).as_bytes())?;
        }
        OutputFormat::Tui => {
            drop(out);
            let title = if cluster.is_partial() {
                " Cluster Capacity (partial: some listings failed, press 'q' to quit) "
            } else {
                " Cluster Capacity (Press 'q' to quit) "
            };
            display_table(&ReportTable::new(cluster, display), title)?;
            return Ok(());
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&CapacityOutput::new(cluster, display))
                .map_err(OutputError::from)?;
            writeln!(out, "{json}")?;
        }
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(&CapacityOutput::new(cluster, display))
                .map_err(OutputError::from)?;
            out.write_all(yaml.as_bytes())?;
        }
    }

    out.flush()?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Node,
    Namespace,
    Pod,
    Container,
    Value(ResourceKind, AllocationField),
    PodCount,
}

impl Column {
    fn header(&self) -> String {
        match self {
            Column::Node => "NODE".to_string(),
            Column::Namespace => "NAMESPACE".to_string(),
            Column::Pod => "POD".to_string(),
            Column::Container => "CONTAINER".to_string(),
            Column::PodCount => "POD COUNT".to_string(),
            Column::Value(kind, field) => {
                let resource = match kind {
                    ResourceKind::Cpu => "CPU",
                    ResourceKind::Memory => "MEMORY",
                };
                let field = match field {
                    AllocationField::Requested => "REQUESTS",
                    AllocationField::Limited => "LIMITS",
                    AllocationField::Used => "UTIL",
                };
                format!("{resource} {field}")
            }
        }
    }
}

/// One line of the report and the tree entry it describes
enum Subject<'a> {
    Cluster(&'a ClusterMetric),
    Node(&'a NodeMetric),
    Pod(&'a NodeMetric, &'a PodMetric),
    Container(&'a NodeMetric, &'a PodMetric, &'a ContainerMetric),
}

/// The report as rows of display strings
#[derive(Debug, Clone, PartialEq)]
pub struct ReportTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ReportTable {
    pub fn new(cluster: &ClusterMetric, display: &DisplayOptions) -> Self {
        let columns = columns(cluster, display);

        let mut subjects = vec![Subject::Cluster(cluster)];
        for node in cluster.nodes_with_bucket() {
            subjects.push(Subject::Node(node));
            if display.show_pods {
                for pod in &node.pods {
                    subjects.push(Subject::Pod(node, pod));
                    if display.show_containers {
                        for container in &pod.containers {
                            subjects.push(Subject::Container(node, pod, container));
                        }
                    }
                }
            }
        }

        Self {
            headers: columns.iter().map(Column::header).collect(),
            rows: subjects
                .iter()
                .map(|subject| {
                    columns
                        .iter()
                        .map(|column| cell(*column, subject, display.available))
                        .collect()
                })
                .collect(),
        }
    }
}

fn columns(cluster: &ClusterMetric, display: &DisplayOptions) -> Vec<Column> {
    let mut columns = vec![Column::Node];
    if display.show_pods {
        columns.push(Column::Namespace);
        columns.push(Column::Pod);
    }
    if display.show_containers {
        columns.push(Column::Container);
    }
    for kind in KINDS {
        if !display.hide_requests {
            columns.push(Column::Value(kind, AllocationField::Requested));
        }
        if !display.hide_limits {
            columns.push(Column::Value(kind, AllocationField::Limited));
        }
        if display.show_util && cluster.utilization {
            columns.push(Column::Value(kind, AllocationField::Used));
        }
    }
    if display.show_pod_count {
        columns.push(Column::PodCount);
    }
    columns
}

fn cell(column: Column, subject: &Subject<'_>, available: bool) -> String {
    match (column, subject) {
        (Column::Node, Subject::Cluster(_)) => "*".to_string(),
        (Column::Node, Subject::Node(node))
        | (Column::Node, Subject::Pod(node, _))
        | (Column::Node, Subject::Container(node, _, _)) => node.name.clone(),

        (Column::Namespace, Subject::Pod(_, pod))
        | (Column::Namespace, Subject::Container(_, pod, _)) => pod.namespace.clone(),
        (Column::Pod, Subject::Pod(_, pod)) | (Column::Pod, Subject::Container(_, pod, _)) => {
            pod.name.clone()
        }
        (Column::Container, Subject::Container(_, _, container)) => container.name.clone(),
        (Column::Namespace | Column::Pod | Column::Container, _) => "*".to_string(),

        (Column::Value(kind, field), Subject::Cluster(cluster)) => {
            if available {
                available_cell(kind, cluster.available(kind, field), cluster.allocatable.get(kind))
            } else {
                value_cell(
                    kind,
                    cluster.resources.get(kind).get(field),
                    cluster.percent(kind, field),
                )
            }
        }
        (Column::Value(kind, field), Subject::Node(node)) => {
            if available {
                available_cell(kind, node.available(kind, field), node.allocatable.get(kind))
            } else {
                value_cell(kind, node.resources.get(kind).get(field), node.percent(kind, field))
            }
        }
        (Column::Value(kind, field), Subject::Pod(node, pod)) => value_cell(
            kind,
            pod.resources.get(kind).get(field),
            pod.percent(&node.allocatable, kind, field),
        ),
        (Column::Value(kind, field), Subject::Container(node, _, container)) => value_cell(
            kind,
            container.resources.get(kind).get(field),
            container.percent(&node.allocatable, kind, field),
        ),

        (Column::PodCount, Subject::Cluster(cluster)) => {
            count_cell(cluster.pod_count(), cluster.pod_capacity)
        }
        (Column::PodCount, Subject::Node(node)) => count_cell(node.pod_count(), node.pod_capacity),
        (Column::PodCount, _) => String::new(),
    }
}

fn value_cell(kind: ResourceKind, value: Option<ResourceQuantity>, percent: Option<f64>) -> String {
    match value {
        Some(value) => format!("{} ({})", kind.format(value), format_percent(percent)),
        None => UNKNOWN.to_string(),
    }
}

fn available_cell(
    kind: ResourceKind,
    available: Option<ResourceQuantity>,
    allocatable: Option<ResourceQuantity>,
) -> String {
    match (available, allocatable) {
        (Some(available), Some(allocatable)) => {
            format!("{}/{}", kind.format(available), kind.format(allocatable))
        }
        _ => UNKNOWN.to_string(),
    }
}

fn count_cell(count: usize, capacity: Option<i64>) -> String {
    match capacity {
        Some(capacity) => format!("{count}/{capacity}"),
        None => count.to_string(),
    }
}

fn format_percent(percent: Option<f64>) -> String {
    match percent {
        Some(p) => format!("{p:.0}%"),
        None => UNKNOWN.to_string(),
    }
}

/// Left-aligned columns separated by two spaces
pub fn render_text(table: &ReportTable) -> String {
    let mut widths: Vec<usize> = table.headers.iter().map(|h| h.chars().count()).collect();
    for row in &table.rows {
        for (width, value) in widths.iter_mut().zip(row) {
            *width = (*width).max(value.chars().count());
        }
    }

    let mut text = String::new();
    for row in std::iter::once(&table.headers).chain(table.rows.iter()) {
        let mut line = String::new();
        for (value, width) in row.iter().zip(&widths) {
            line.push_str(value);
            let padding = width.saturating_sub(value.chars().count()) + 2;
            line.extend(std::iter::repeat_n(' ', padding));
        }
        text.push_str(line.trim_end());
        text.push('\n');
    }
    text
}

/// Top-level JSON/YAML document
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityOutput {
    pub metadata: OutputMetadata,
    pub cluster_totals: TotalsView,
    pub nodes: Vec<NodeView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputMetadata {
    pub timestamp: String,
    pub partial: bool,
    pub grouped_by_node: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FetchFailure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalsView {
    pub cpu: ResourceView,
    pub memory: ResourceView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_count: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    pub name: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub unscheduled: bool,
    pub cpu: ResourceView,
    pub memory: ResourceView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_count: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_usage: Option<AmountsView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pods: Option<Vec<PodView>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodView {
    pub name: String,
    pub namespace: String,
    pub cpu: ResourceView,
    pub memory: ResourceView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub containers: Option<Vec<ContainerView>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerView {
    pub name: String,
    pub cpu: ResourceView,
    pub memory: ResourceView,
}

#[derive(Debug, Clone, Serialize)]
pub struct AmountsView {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

/// One resource's values. Hidden columns are omitted; unknown values are
/// `null`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_percent: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits_percent: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utilization: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utilization_percent: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocatable: Option<Option<String>>,
}

impl ResourceView {
    fn new(
        kind: ResourceKind,
        allocation: &ResourceAllocation,
        allocatable: &ResourceAmounts,
        display: &DisplayOptions,
        with_allocatable: bool,
    ) -> Self {
        let base = allocatable.get(kind);
        let value = |shown: bool, v: Option<ResourceQuantity>| {
            shown.then(|| v.map(|v| kind.format(v)))
        };
        let percent = |shown: bool, v: Option<ResourceQuantity>| {
            shown.then(|| percentage(v, base).map(|p| format!("{p:.0}%")))
        };

        let requests = !display.hide_requests;
        let limits = !display.hide_limits;
        let util = display.show_util;

        Self {
            requests: value(requests, allocation.requested),
            requests_percent: percent(requests, allocation.requested),
            limits: value(limits, allocation.limited),
            limits_percent: percent(limits, allocation.limited),
            utilization: value(util, allocation.used),
            utilization_percent: percent(util, allocation.used),
            allocatable: value(with_allocatable, base),
        }
    }
}

impl CapacityOutput {
    pub fn new(cluster: &ClusterMetric, display: &DisplayOptions) -> Self {
        let resource = |kind: ResourceKind,
                        allocation: &ResourceAllocation,
                        allocatable: &ResourceAmounts,
                        with_allocatable: bool| {
            ResourceView::new(kind, allocation, allocatable, display, with_allocatable)
        };

        let nodes = cluster
            .nodes_with_bucket()
            .map(|node| NodeView {
                name: node.name.clone(),
                unscheduled: node.is_unscheduled_bucket(),
                cpu: resource(ResourceKind::Cpu, &node.resources.cpu, &node.allocatable, true),
                memory: resource(
                    ResourceKind::Memory,
                    &node.resources.memory,
                    &node.allocatable,
                    true,
                ),
                pod_count: display
                    .show_pod_count
                    .then(|| count_cell(node.pod_count(), node.pod_capacity)),
                reported_usage: node
                    .reported_usage
                    .filter(|_| display.show_util)
                    .map(|usage| AmountsView {
                        cpu: usage.cpu.map(|q| ResourceKind::Cpu.format(q)),
                        memory: usage.memory.map(|q| ResourceKind::Memory.format(q)),
                    }),
                pods: display.show_pods.then(|| {
                    node.pods
                        .iter()
                        .map(|pod| PodView {
                            name: pod.name.clone(),
                            namespace: pod.namespace.clone(),
                            cpu: resource(
                                ResourceKind::Cpu,
                                &pod.resources.cpu,
                                &node.allocatable,
                                false,
                            ),
                            memory: resource(
                                ResourceKind::Memory,
                                &pod.resources.memory,
                                &node.allocatable,
                                false,
                            ),
                            containers: display.show_containers.then(|| {
                                pod.containers
                                    .iter()
                                    .map(|container| ContainerView {
                                        name: container.name.clone(),
                                        cpu: resource(
                                            ResourceKind::Cpu,
                                            &container.resources.cpu,
                                            &node.allocatable,
                                            false,
                                        ),
                                        memory: resource(
                                            ResourceKind::Memory,
                                            &container.resources.memory,
                                            &node.allocatable,
                                            false,
                                        ),
                                    })
                                    .collect()
                            }),
                        })
                        .collect()
                }),
            })
            .collect();

        Self {
            metadata: OutputMetadata {
                timestamp: chrono::Utc::now().to_rfc3339(),
                partial: cluster.is_partial(),
                grouped_by_node: cluster.grouped_by_node,
                failures: cluster.failures.clone(),
            },
            cluster_totals: TotalsView {
                cpu: resource(
                    ResourceKind::Cpu,
                    &cluster.resources.cpu,
                    &cluster.allocatable,
                    true,
                ),
                memory: resource(
                    ResourceKind::Memory,
                    &cluster.resources.memory,
                    &cluster.allocatable,
                    true,
                ),
                pod_count: display
                    .show_pod_count
                    .then(|| count_cell(cluster.pod_count(), cluster.pod_capacity)),
            },
            nodes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::selector::SelectionFilter;
    use crate::lib::snapshot::{ClusterSnapshot, RawContainer, RawNode, RawPod};
    use crate::lib::tree::build_cluster_metric;

    fn cluster() -> ClusterMetric {
        let snapshot = ClusterSnapshot {
            nodes: Some(vec![RawNode {
                name: "n1".to_string(),
                allocatable_cpu: Some("2".to_string()),
                allocatable_memory: Some("4Gi".to_string()),
                allocatable_pods: Some("110".to_string()),
                ..Default::default()
            }]),
            pods: vec![
                RawPod {
                    name: "web".to_string(),
                    namespace: "shop".to_string(),
                    node_name: "n1".to_string(),
                    containers: vec![RawContainer {
                        name: "app".to_string(),
                        cpu_request: Some("500m".to_string()),
                        memory_request: Some("1Gi".to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
                RawPod {
                    name: "pending".to_string(),
                    namespace: "shop".to_string(),
                    containers: vec![RawContainer {
                        name: "app".to_string(),
                        cpu_request: Some("100m".to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        build_cluster_metric(&snapshot, &SelectionFilter::default())
    }

    #[test]
    fn node_table_has_cluster_row_then_nodes() {
        let table = ReportTable::new(&cluster(), &DisplayOptions::default());

        assert_eq!(
            table.headers,
            vec!["NODE", "CPU REQUESTS", "CPU LIMITS", "MEMORY REQUESTS", "MEMORY LIMITS"]
        );
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[0][0], "*");
        assert_eq!(table.rows[0][1], "600m (30%)");
        assert_eq!(table.rows[1], vec!["n1", "500m (25%)", "—", "1024Mi (25%)", "—"]);
        // bucket has no allocatable, so no percentage
        assert_eq!(table.rows[2][0], "<unscheduled>");
        assert_eq!(table.rows[2][1], "100m (—)");
    }

    #[test]
    fn pod_and_container_rows_follow_their_node() {
        let display = DisplayOptions {
            show_pods: true,
            show_containers: true,
            hide_limits: true,
            show_pod_count: true,
            ..Default::default()
        };
        let table = ReportTable::new(&cluster(), &display);

        assert_eq!(
            table.headers,
            vec![
                "NODE",
                "NAMESPACE",
                "POD",
                "CONTAINER",
                "CPU REQUESTS",
                "MEMORY REQUESTS",
                "POD COUNT"
            ]
        );
        assert_eq!(table.rows[0][6], "2/110");
        assert_eq!(table.rows[1][..4], ["n1", "*", "*", "*"]);
        assert_eq!(table.rows[2][..4], ["n1", "shop", "web", "*"]);
        assert_eq!(table.rows[3][..4], ["n1", "shop", "web", "app"]);
        assert_eq!(table.rows[3][6], "");
    }

    #[test]
    fn available_mode_shows_headroom_for_nodes() {
        let display = DisplayOptions {
            available: true,
            ..Default::default()
        };
        let table = ReportTable::new(&cluster(), &display);
        assert_eq!(table.rows[1][1], "1500m/2000m");
        assert_eq!(table.rows[2][1], "—");
    }

    #[test]
    fn text_rendering_aligns_columns() {
        let table = ReportTable {
            headers: vec!["NODE".to_string(), "CPU".to_string()],
            rows: vec![vec!["a-long-name".to_string(), "—".to_string()]],
        };
        let text = render_text(&table);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "NODE         CPU");
        assert_eq!(lines[1], "a-long-name  —");
    }

    #[test]
    fn json_omits_hidden_columns_and_nulls_unknown_values() {
        let display = DisplayOptions {
            hide_requests: true,
            show_pods: true,
            ..Default::default()
        };
        let value = serde_json::to_value(CapacityOutput::new(&cluster(), &display)).unwrap();

        let totals = &value["clusterTotals"]["cpu"];
        assert!(totals.get("requests").is_none());
        assert!(totals["limits"].is_null());
        assert_eq!(totals["allocatable"], "2000m");

        let n1 = &value["nodes"][0];
        assert_eq!(n1["name"], "n1");
        assert_eq!(n1["pods"][0]["name"], "web");
        assert!(n1["pods"][0]["containers"].is_null());

        let bucket = &value["nodes"][1];
        assert_eq!(bucket["unscheduled"], true);
        assert_eq!(value["metadata"]["partial"], false);
    }
}
