//! The cluster → node → pod → container metric tree.
//!
//! Built bottom-up in a single pass from a [`ClusterSnapshot`]. Every
//! parent's requested/limited/used values are the exact sum of its
//! children; a value stays absent only when it is absent in every child.

use std::collections::{BTreeMap, HashMap};

use log::{debug, warn};

use crate::lib::quantity::{percentage, sum_optional, ResourceKind, ResourceQuantity};
use crate::lib::selector::SelectionFilter;
use crate::lib::snapshot::{
    ClusterSnapshot, FetchFailure, RawContainer, RawContainerUsage, RawNode, RawNodeMetrics,
    RawPod,
};

/// Name of the bucket holding pods without a reportable node
pub const UNSCHEDULED_NODE: &str = "<unscheduled>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationField {
    Requested,
    Limited,
    Used,
}

/// Requested, limited and used amounts of one resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceAllocation {
    pub requested: Option<ResourceQuantity>,
    pub limited: Option<ResourceQuantity>,
    pub used: Option<ResourceQuantity>,
}

impl ResourceAllocation {
    pub fn get(&self, field: AllocationField) -> Option<ResourceQuantity> {
        match field {
            AllocationField::Requested => self.requested,
            AllocationField::Limited => self.limited,
            AllocationField::Used => self.used,
        }
    }

    fn accumulate(&mut self, other: &ResourceAllocation) {
        self.requested = sum_optional(self.requested, other.requested);
        self.limited = sum_optional(self.limited, other.limited);
        self.used = sum_optional(self.used, other.used);
    }

    fn zero(utilization: bool) -> Self {
        Self {
            requested: Some(ResourceQuantity::ZERO),
            limited: Some(ResourceQuantity::ZERO),
            used: utilization.then_some(ResourceQuantity::ZERO),
        }
    }
}

/// CPU and memory allocation of one tree entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Resources {
    pub cpu: ResourceAllocation,
    pub memory: ResourceAllocation,
}

impl Resources {
    pub fn get(&self, kind: ResourceKind) -> &ResourceAllocation {
        match kind {
            ResourceKind::Cpu => &self.cpu,
            ResourceKind::Memory => &self.memory,
        }
    }

    fn accumulate(&mut self, other: &Resources) {
        self.cpu.accumulate(&other.cpu);
        self.memory.accumulate(&other.memory);
    }

    /// Sum of `children`. A childless parent is known to be zero, not absent.
    fn rollup<'a>(children: impl IntoIterator<Item = &'a Resources>, utilization: bool) -> Self {
        let mut total = Resources::default();
        let mut any = false;
        for child in children {
            total.accumulate(child);
            any = true;
        }
        if any {
            total
        } else {
            Resources {
                cpu: ResourceAllocation::zero(utilization),
                memory: ResourceAllocation::zero(utilization),
            }
        }
    }
}

/// A plain CPU/memory pair, used for allocatable capacity and node samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceAmounts {
    pub cpu: Option<ResourceQuantity>,
    pub memory: Option<ResourceQuantity>,
}

impl ResourceAmounts {
    pub fn get(&self, kind: ResourceKind) -> Option<ResourceQuantity> {
        match kind {
            ResourceKind::Cpu => self.cpu,
            ResourceKind::Memory => self.memory,
        }
    }

    fn accumulate(&mut self, other: &ResourceAmounts) {
        self.cpu = sum_optional(self.cpu, other.cpu);
        self.memory = sum_optional(self.memory, other.memory);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerMetric {
    pub name: String,
    pub resources: Resources,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PodMetric {
    pub name: String,
    pub namespace: String,
    pub resources: Resources,
    pub containers: Vec<ContainerMetric>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeMetric {
    pub name: String,
    /// Absent for the unscheduled bucket and for unparsable node status
    pub allocatable: ResourceAmounts,
    pub pod_capacity: Option<i64>,
    /// metrics-server's own node sample; includes system daemons, so it is
    /// shown alongside the pod totals rather than summed into them
    pub reported_usage: Option<ResourceAmounts>,
    pub resources: Resources,
    pub pods: Vec<PodMetric>,
}

impl NodeMetric {
    fn shell(name: &str) -> Self {
        Self {
            name: name.to_string(),
            allocatable: ResourceAmounts::default(),
            pod_capacity: None,
            reported_usage: None,
            resources: Resources::default(),
            pods: Vec::new(),
        }
    }

    pub fn is_unscheduled_bucket(&self) -> bool {
        self.name == UNSCHEDULED_NODE
    }

    pub fn pod_count(&self) -> usize {
        self.pods.len()
    }

    pub fn percent(&self, kind: ResourceKind, field: AllocationField) -> Option<f64> {
        percentage(self.resources.get(kind).get(field), self.allocatable.get(kind))
    }

    /// Allocatable minus the given field, floored at zero
    pub fn available(&self, kind: ResourceKind, field: AllocationField) -> Option<ResourceQuantity> {
        available(&self.allocatable, &self.resources, kind, field)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMetric {
    pub allocatable: ResourceAmounts,
    pub pod_capacity: Option<i64>,
    pub resources: Resources,
    pub nodes: Vec<NodeMetric>,
    /// Pods whose node is unknown, excluded or not listed
    pub unscheduled: Option<NodeMetric>,
    /// False when no node list was available and pods were not grouped
    pub grouped_by_node: bool,
    pub utilization: bool,
    pub failures: Vec<FetchFailure>,
}

impl ClusterMetric {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn pod_count(&self) -> usize {
        self.nodes_with_bucket().map(NodeMetric::pod_count).sum()
    }

    /// Regular nodes followed by the unscheduled bucket, if any
    pub fn nodes_with_bucket(&self) -> impl Iterator<Item = &NodeMetric> {
        self.nodes.iter().chain(self.unscheduled.iter())
    }

    pub fn percent(&self, kind: ResourceKind, field: AllocationField) -> Option<f64> {
        percentage(self.resources.get(kind).get(field), self.allocatable.get(kind))
    }

    pub fn available(&self, kind: ResourceKind, field: AllocationField) -> Option<ResourceQuantity> {
        available(&self.allocatable, &self.resources, kind, field)
    }
}

impl PodMetric {
    /// Share of the owning node's allocatable capacity
    pub fn percent(
        &self,
        allocatable: &ResourceAmounts,
        kind: ResourceKind,
        field: AllocationField,
    ) -> Option<f64> {
        percentage(self.resources.get(kind).get(field), allocatable.get(kind))
    }
}

impl ContainerMetric {
    pub fn percent(
        &self,
        allocatable: &ResourceAmounts,
        kind: ResourceKind,
        field: AllocationField,
    ) -> Option<f64> {
        percentage(self.resources.get(kind).get(field), allocatable.get(kind))
    }
}

fn available(
    allocatable: &ResourceAmounts,
    resources: &Resources,
    kind: ResourceKind,
    field: AllocationField,
) -> Option<ResourceQuantity> {
    let total = allocatable.get(kind)?;
    let taken = resources.get(kind).get(field).unwrap_or(ResourceQuantity::ZERO);
    Some(total.saturating_sub(taken))
}

type UsageKey<'a> = (&'a str, &'a str, &'a str);

/// Build the metric tree for everything in `snapshot` that passes `filter`.
///
/// Never fails: malformed quantities become absent values and missing
/// metrics samples leave `used` absent.
pub fn build_cluster_metric(snapshot: &ClusterSnapshot, filter: &SelectionFilter) -> ClusterMetric {
    let utilization = snapshot.pod_metrics.is_some();

    let namespace_labels: HashMap<&str, &BTreeMap<String, String>> = snapshot
        .namespaces
        .iter()
        .flatten()
        .map(|ns| (ns.name.as_str(), &ns.labels))
        .collect();

    let usage: Option<HashMap<UsageKey<'_>, &RawContainerUsage>> =
        snapshot.pod_metrics.as_ref().map(|samples| {
            samples
                .iter()
                .flat_map(|pm| {
                    pm.containers.iter().map(move |c| {
                        ((pm.namespace.as_str(), pm.name.as_str(), c.name.as_str()), c)
                    })
                })
                .collect()
        });

    let node_samples: HashMap<&str, &RawNodeMetrics> = snapshot
        .node_metrics
        .iter()
        .flatten()
        .map(|nm| (nm.name.as_str(), nm))
        .collect();

    let mut nodes: Vec<NodeMetric> = Vec::new();
    let mut slots: HashMap<&str, usize> = HashMap::new();
    if let Some(raw_nodes) = &snapshot.nodes {
        for raw in raw_nodes.iter().filter(|n| filter.includes_node(n)) {
            if slots.contains_key(raw.name.as_str()) {
                debug!("Skipping duplicate node {}", raw.name);
                continue;
            }
            slots.insert(raw.name.as_str(), nodes.len());
            nodes.push(node_shell(raw, node_samples.get(raw.name.as_str()).copied()));
        }
        debug!("{} of {} nodes selected", nodes.len(), raw_nodes.len());
    }

    let mut unscheduled = NodeMetric::shell(UNSCHEDULED_NODE);
    let mut selected_pods = 0usize;
    for raw in &snapshot.pods {
        let labels = namespace_labels.get(raw.namespace.as_str()).copied();
        if !filter.includes_pod(raw, labels) {
            continue;
        }
        selected_pods += 1;

        let pod = build_pod(raw, usage.as_ref());
        match slots.get(raw.node_name.as_str()) {
            Some(&index) => nodes[index].pods.push(pod),
            None => unscheduled.pods.push(pod),
        }
    }
    debug!("{} of {} pods selected", selected_pods, snapshot.pods.len());

    for node in nodes.iter_mut() {
        node.resources = Resources::rollup(node.pods.iter().map(|p| &p.resources), utilization);
    }

    let unscheduled = if unscheduled.pods.is_empty() {
        None
    } else {
        unscheduled.resources =
            Resources::rollup(unscheduled.pods.iter().map(|p| &p.resources), utilization);
        Some(unscheduled)
    };

    let resources = Resources::rollup(
        nodes
            .iter()
            .chain(unscheduled.iter())
            .map(|n| &n.resources),
        utilization,
    );

    let mut allocatable = ResourceAmounts::default();
    let mut pod_capacity: Option<i64> = None;
    for node in &nodes {
        allocatable.accumulate(&node.allocatable);
        if let Some(capacity) = node.pod_capacity {
            pod_capacity = Some(pod_capacity.unwrap_or(0).saturating_add(capacity));
        }
    }

    ClusterMetric {
        allocatable,
        pod_capacity,
        resources,
        nodes,
        unscheduled,
        grouped_by_node: snapshot.nodes.is_some(),
        utilization,
        failures: snapshot.failures.clone(),
    }
}

fn node_shell(raw: &RawNode, sample: Option<&RawNodeMetrics>) -> NodeMetric {
    let context = format!("node {}", raw.name);
    NodeMetric {
        allocatable: ResourceAmounts {
            cpu: parse_quantity(&context, "allocatable cpu", raw.allocatable_cpu.as_deref()),
            memory: parse_quantity(
                &context,
                "allocatable memory",
                raw.allocatable_memory.as_deref(),
            ),
        },
        pod_capacity: raw
            .allocatable_pods
            .as_deref()
            .and_then(|p| parse_quantity(&context, "allocatable pods", Some(p)))
            .and_then(|q| i64::try_from(q.units()).ok()),
        reported_usage: sample.map(|s| ResourceAmounts {
            cpu: parse_quantity(&context, "cpu usage", s.cpu.as_deref()),
            memory: parse_quantity(&context, "memory usage", s.memory.as_deref()),
        }),
        ..NodeMetric::shell(&raw.name)
    }
}

fn build_pod(raw: &RawPod, usage: Option<&HashMap<UsageKey<'_>, &RawContainerUsage>>) -> PodMetric {
    let containers: Vec<ContainerMetric> = raw
        .containers
        .iter()
        .map(|container| {
            let sample = usage.and_then(|index| {
                index
                    .get(&(raw.namespace.as_str(), raw.name.as_str(), container.name.as_str()))
                    .copied()
            });
            build_container(raw, container, sample)
        })
        .collect();

    if usage.is_some() && containers.iter().all(|c| c.resources.cpu.used.is_none()) {
        debug!("No metrics sample for pod {}/{}", raw.namespace, raw.name);
    }

    PodMetric {
        name: raw.name.clone(),
        namespace: raw.namespace.clone(),
        resources: Resources::rollup(containers.iter().map(|c| &c.resources), usage.is_some()),
        containers,
    }
}

fn build_container(
    pod: &RawPod,
    container: &RawContainer,
    sample: Option<&RawContainerUsage>,
) -> ContainerMetric {
    let context = format!("container {}/{}/{}", pod.namespace, pod.name, container.name);
    ContainerMetric {
        name: container.name.clone(),
        resources: Resources {
            cpu: ResourceAllocation {
                requested: parse_quantity(&context, "cpu request", container.cpu_request.as_deref()),
                limited: parse_quantity(&context, "cpu limit", container.cpu_limit.as_deref()),
                used: sample.and_then(|s| parse_quantity(&context, "cpu usage", s.cpu.as_deref())),
            },
            memory: ResourceAllocation {
                requested: parse_quantity(
                    &context,
                    "memory request",
                    container.memory_request.as_deref(),
                ),
                limited: parse_quantity(&context, "memory limit", container.memory_limit.as_deref()),
                used: sample
                    .and_then(|s| parse_quantity(&context, "memory usage", s.memory.as_deref())),
            },
        },
    }
}

/// Unparsable values are treated as absent, never as zero
fn parse_quantity(context: &str, what: &str, value: Option<&str>) -> Option<ResourceQuantity> {
    let value = value?;
    match ResourceQuantity::parse(value) {
        Ok(quantity) => Some(quantity),
        Err(e) => {
            warn!("Ignoring {what} of {context}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::snapshot::{RawContainerUsage, RawPodMetrics};

    fn q(s: &str) -> ResourceQuantity {
        ResourceQuantity::parse(s).unwrap()
    }

    fn container(name: &str, cpu_req: Option<&str>, cpu_lim: Option<&str>) -> RawContainer {
        RawContainer {
            name: name.to_string(),
            cpu_request: cpu_req.map(str::to_string),
            cpu_limit: cpu_lim.map(str::to_string),
            memory_request: Some("64Mi".to_string()),
            memory_limit: None,
        }
    }

    fn pod(name: &str, node: &str, containers: Vec<RawContainer>) -> RawPod {
        RawPod {
            name: name.to_string(),
            namespace: "default".to_string(),
            node_name: node.to_string(),
            containers,
            ..Default::default()
        }
    }

    fn node(name: &str, cpu: &str, memory: &str) -> RawNode {
        RawNode {
            name: name.to_string(),
            allocatable_cpu: Some(cpu.to_string()),
            allocatable_memory: Some(memory.to_string()),
            allocatable_pods: Some("110".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn limit_is_absent_only_when_every_container_lacks_one() {
        let snapshot = ClusterSnapshot {
            pods: vec![
                pod("none", "", vec![container("a", Some("100m"), None), container("b", None, None)]),
                pod(
                    "some",
                    "",
                    vec![container("a", Some("100m"), Some("300m")), container("b", None, None)],
                ),
            ],
            ..Default::default()
        };
        let cluster = build_cluster_metric(&snapshot, &SelectionFilter::default());
        let bucket = cluster.unscheduled.as_ref().unwrap();

        assert_eq!(bucket.pods[0].resources.cpu.limited, None);
        assert_eq!(bucket.pods[0].resources.cpu.requested, Some(q("100m")));
        assert_eq!(bucket.pods[1].resources.cpu.limited, Some(q("300m")));
        assert_eq!(cluster.resources.cpu.limited, Some(q("300m")));
    }

    #[test]
    fn malformed_quantity_is_absent_not_zero() {
        let snapshot = ClusterSnapshot {
            pods: vec![pod("p", "", vec![container("a", Some("lots"), Some("1"))])],
            ..Default::default()
        };
        let cluster = build_cluster_metric(&snapshot, &SelectionFilter::default());
        let pod = &cluster.unscheduled.as_ref().unwrap().pods[0];
        assert_eq!(pod.resources.cpu.requested, None);
        assert_eq!(pod.resources.cpu.limited, Some(q("1")));
    }

    #[test]
    fn pods_group_under_their_nodes_and_roll_up() {
        let snapshot = ClusterSnapshot {
            nodes: Some(vec![node("n1", "4", "8Gi"), node("n2", "2", "4Gi")]),
            pods: vec![
                pod("a", "n1", vec![container("c", Some("500m"), Some("1"))]),
                pod("b", "n1", vec![container("c", Some("250m"), None)]),
                pod("c", "n2", vec![container("c", Some("1"), None)]),
            ],
            ..Default::default()
        };
        let cluster = build_cluster_metric(&snapshot, &SelectionFilter::default());

        assert!(cluster.grouped_by_node);
        assert!(cluster.unscheduled.is_none());
        assert_eq!(cluster.nodes[0].pod_count(), 2);
        assert_eq!(cluster.nodes[0].resources.cpu.requested, Some(q("750m")));
        assert_eq!(cluster.nodes[1].resources.cpu.requested, Some(q("1")));
        assert_eq!(cluster.resources.cpu.requested, Some(q("1750m")));
        assert_eq!(cluster.resources.memory.requested, Some(q("192Mi")));
        assert_eq!(cluster.allocatable.cpu, Some(q("6")));
        assert_eq!(cluster.pod_capacity, Some(220));

        let pct = cluster.nodes[0].percent(ResourceKind::Cpu, AllocationField::Requested);
        assert_eq!(pct, Some(18.75));
        assert_eq!(
            cluster.nodes[0].available(ResourceKind::Cpu, AllocationField::Requested),
            Some(q("3250m"))
        );
    }

    #[test]
    fn node_without_pods_reports_zero() {
        let snapshot = ClusterSnapshot {
            nodes: Some(vec![node("idle", "2", "4Gi")]),
            ..Default::default()
        };
        let cluster = build_cluster_metric(&snapshot, &SelectionFilter::default());
        let idle = &cluster.nodes[0];
        assert_eq!(idle.resources.cpu.requested, Some(ResourceQuantity::ZERO));
        assert_eq!(idle.resources.cpu.used, None);
        assert_eq!(idle.percent(ResourceKind::Cpu, AllocationField::Requested), Some(0.0));
    }

    #[test]
    fn unknown_allocatable_gives_no_percentage() {
        let mut raw = node("n1", "2", "4Gi");
        raw.allocatable_cpu = None;
        let snapshot = ClusterSnapshot {
            nodes: Some(vec![raw]),
            pods: vec![pod("a", "n1", vec![container("c", Some("1"), None)])],
            ..Default::default()
        };
        let cluster = build_cluster_metric(&snapshot, &SelectionFilter::default());
        assert_eq!(cluster.nodes[0].percent(ResourceKind::Cpu, AllocationField::Requested), None);
        assert_eq!(cluster.allocatable.cpu, None);
        assert!(cluster.allocatable.memory.is_some());
    }

    #[test]
    fn usage_is_matched_per_container_and_absent_when_unsampled() {
        let snapshot = ClusterSnapshot {
            nodes: Some(vec![node("n1", "4", "8Gi")]),
            pods: vec![
                pod("sampled", "n1", vec![container("app", Some("100m"), None)]),
                pod("missing", "n1", vec![container("app", Some("100m"), None)]),
            ],
            pod_metrics: Some(vec![RawPodMetrics {
                name: "sampled".to_string(),
                namespace: "default".to_string(),
                containers: vec![RawContainerUsage {
                    name: "app".to_string(),
                    cpu: Some("12345678n".to_string()),
                    memory: Some("10Mi".to_string()),
                }],
            }]),
            ..Default::default()
        };
        let cluster = build_cluster_metric(&snapshot, &SelectionFilter::default());
        let n1 = &cluster.nodes[0];

        assert!(cluster.utilization);
        assert_eq!(n1.pods[0].resources.cpu.used, Some(q("12345678n")));
        assert_eq!(n1.pods[1].resources.cpu.used, None);
        assert_eq!(n1.resources.cpu.used, Some(q("12345678n")));
        assert_eq!(n1.resources.memory.used, Some(q("10Mi")));
    }

    #[test]
    fn usage_stays_absent_outside_utilization_mode() {
        let snapshot = ClusterSnapshot {
            nodes: Some(vec![node("n1", "4", "8Gi")]),
            ..Default::default()
        };
        let cluster = build_cluster_metric(&snapshot, &SelectionFilter::default());
        assert!(!cluster.utilization);
        assert_eq!(cluster.resources.cpu.used, None);
    }

    #[test]
    fn node_samples_are_reported_but_not_summed() {
        let snapshot = ClusterSnapshot {
            nodes: Some(vec![node("n1", "4", "8Gi")]),
            pods: vec![pod("a", "n1", vec![container("c", Some("1"), None)])],
            pod_metrics: Some(Vec::new()),
            node_metrics: Some(vec![RawNodeMetrics {
                name: "n1".to_string(),
                cpu: Some("1500m".to_string()),
                memory: Some("2Gi".to_string()),
            }]),
            ..Default::default()
        };
        let cluster = build_cluster_metric(&snapshot, &SelectionFilter::default());
        let n1 = &cluster.nodes[0];
        assert_eq!(n1.reported_usage.unwrap().cpu, Some(q("1500m")));
        assert_eq!(n1.resources.cpu.used, None);
    }

    #[test]
    fn duplicate_node_names_keep_the_first() {
        let snapshot = ClusterSnapshot {
            nodes: Some(vec![node("n1", "4", "8Gi"), node("n1", "8", "16Gi")]),
            ..Default::default()
        };
        let cluster = build_cluster_metric(&snapshot, &SelectionFilter::default());
        assert_eq!(cluster.nodes.len(), 1);
        assert_eq!(cluster.allocatable.cpu, Some(q("4")));
    }
}
