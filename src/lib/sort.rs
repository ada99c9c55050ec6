//! Sibling ordering for the metric tree.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::lib::error::ConfigError;
use crate::lib::quantity::{ResourceKind, ResourceQuantity};
use crate::lib::tree::{
    AllocationField, ClusterMetric, ContainerMetric, NodeMetric, PodMetric, ResourceAmounts,
    Resources,
};

/// Key used to order siblings in the report.
///
/// Parsed from `name`, `pod.count` or `<cpu|mem>.<request|limit|util>`
/// with an optional `.percentage` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    #[default]
    Name,
    PodCount,
    Resource {
        kind: ResourceKind,
        field: AllocationField,
        percentage: bool,
    },
}

impl SortBy {
    /// Every accepted key, for help text
    pub fn variants() -> Vec<String> {
        let mut keys = vec!["name".to_string(), "pod.count".to_string()];
        for kind in [ResourceKind::Cpu, ResourceKind::Memory] {
            for field in [
                AllocationField::Used,
                AllocationField::Requested,
                AllocationField::Limited,
            ] {
                for percentage in [false, true] {
                    keys.push(
                        SortBy::Resource {
                            kind,
                            field,
                            percentage,
                        }
                        .to_string(),
                    );
                }
            }
        }
        keys
    }
}

impl FromStr for SortBy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            ConfigError::InvalidValue(format!(
                "unknown sort key '{s}', expected one of: {}",
                SortBy::variants().join(", ")
            ))
        };

        match s.trim() {
            "name" => return Ok(SortBy::Name),
            "pod.count" => return Ok(SortBy::PodCount),
            _ => {}
        }

        let parts: Vec<&str> = s.trim().split('.').collect();
        let (resource, field, percentage) = match parts.as_slice() {
            [resource, field] => (*resource, *field, false),
            [resource, field, "percentage"] => (*resource, *field, true),
            _ => return Err(invalid()),
        };
        let kind = match resource {
            "cpu" => ResourceKind::Cpu,
            "mem" | "memory" => ResourceKind::Memory,
            _ => return Err(invalid()),
        };
        let field = match field {
            "request" => AllocationField::Requested,
            "limit" => AllocationField::Limited,
            "util" => AllocationField::Used,
            _ => return Err(invalid()),
        };

        Ok(SortBy::Resource {
            kind,
            field,
            percentage,
        })
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortBy::Name => write!(f, "name"),
            SortBy::PodCount => write!(f, "pod.count"),
            SortBy::Resource {
                kind,
                field,
                percentage,
            } => {
                let resource = match kind {
                    ResourceKind::Cpu => "cpu",
                    ResourceKind::Memory => "mem",
                };
                let field = match field {
                    AllocationField::Requested => "request",
                    AllocationField::Limited => "limit",
                    AllocationField::Used => "util",
                };
                write!(f, "{resource}.{field}")?;
                if *percentage {
                    write!(f, ".percentage")?;
                }
                Ok(())
            }
        }
    }
}

trait Sortable {
    /// (namespace, name); namespace is empty for nodes and containers
    fn sort_name(&self) -> (&str, &str);
    fn resources(&self) -> &Resources;
    fn pod_count(&self) -> Option<usize> {
        None
    }
}

impl Sortable for NodeMetric {
    fn sort_name(&self) -> (&str, &str) {
        ("", &self.name)
    }

    fn resources(&self) -> &Resources {
        &self.resources
    }

    fn pod_count(&self) -> Option<usize> {
        Some(self.pods.len())
    }
}

impl Sortable for PodMetric {
    fn sort_name(&self) -> (&str, &str) {
        (&self.namespace, &self.name)
    }

    fn resources(&self) -> &Resources {
        &self.resources
    }
}

impl Sortable for ContainerMetric {
    fn sort_name(&self) -> (&str, &str) {
        ("", &self.name)
    }

    fn resources(&self) -> &Resources {
        &self.resources
    }
}

/// Sort every level of the tree in place.
///
/// Only siblings are reordered. Name sorts ascending; everything else sorts
/// descending with absent values last. Ties keep listing order. The
/// unscheduled bucket stays after the regular nodes.
pub fn sort_cluster(cluster: &mut ClusterMetric, sort_by: SortBy) {
    cluster
        .nodes
        .sort_by(|a, b| compare(a, &a.allocatable, b, &b.allocatable, sort_by));

    for node in cluster.nodes.iter_mut().chain(cluster.unscheduled.iter_mut()) {
        let allocatable = node.allocatable;
        node.pods
            .sort_by(|a, b| compare(a, &allocatable, b, &allocatable, sort_by));
        for pod in node.pods.iter_mut() {
            pod.containers
                .sort_by(|a, b| compare(a, &allocatable, b, &allocatable, sort_by));
        }
    }
}

fn compare<T: Sortable>(
    a: &T,
    a_allocatable: &ResourceAmounts,
    b: &T,
    b_allocatable: &ResourceAmounts,
    sort_by: SortBy,
) -> Ordering {
    match sort_by {
        SortBy::Name => a.sort_name().cmp(&b.sort_name()),
        SortBy::PodCount => descending(a.pod_count(), b.pod_count(), |x, y| x.cmp(y)),
        SortBy::Resource {
            kind,
            field,
            percentage: false,
        } => descending(
            quantity(a, kind, field),
            quantity(b, kind, field),
            ResourceQuantity::cmp,
        ),
        SortBy::Resource {
            kind,
            field,
            percentage: true,
        } => descending(
            percent(a, a_allocatable, kind, field),
            percent(b, b_allocatable, kind, field),
            f64::total_cmp,
        ),
    }
}

fn quantity<T: Sortable>(
    item: &T,
    kind: ResourceKind,
    field: AllocationField,
) -> Option<ResourceQuantity> {
    item.resources().get(kind).get(field)
}

fn percent<T: Sortable>(
    item: &T,
    allocatable: &ResourceAmounts,
    kind: ResourceKind,
    field: AllocationField,
) -> Option<f64> {
    crate::lib::quantity::percentage(quantity(item, kind, field), allocatable.get(kind))
}

/// Largest first; absent values after every present one
fn descending<T>(a: Option<T>, b: Option<T>, cmp: impl Fn(&T, &T) -> Ordering) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => cmp(&b, &a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
