//! Kubernetes Capacity Report Library
//!
//! This library merges pod specs, node allocatable capacity and live
//! metrics-server samples into a cluster → node → pod → container tree of
//! CPU and memory requests, limits and utilization.

pub mod lib {
    pub mod capacity;
    pub mod cli;
    pub mod config;
    pub mod error;
    pub mod kubernetes;
    pub mod logger;
    pub mod metrics;
    pub mod output;
    pub mod quantity;
    pub mod selector;
    pub mod snapshot;
    pub mod sort;
    pub mod tree;
    pub mod tui;
}

// Re-export commonly used types at the root level for convenience
pub use lib::capacity::{build_report, collect_snapshot, run};
pub use lib::cli::{Cli, OutputFormat};
pub use lib::config::{Config, ConnectionConfig, DisplayOptions};
pub use lib::error::{
    CapacityError, ConfigError, KubernetesError, MetricsError, OutputError, Result,
};
pub use lib::kubernetes::KubernetesLoader;
pub use lib::logger::init_logger;
pub use lib::metrics::{MetricsLoader, NodeMetrics, PodMetrics};
pub use lib::output::{CapacityOutput, ReportTable, emit, render_text};
pub use lib::quantity::{ResourceKind, ResourceQuantity, percentage};
pub use lib::selector::{LabelSelector, SelectionFilter, TaintSelector};
pub use lib::snapshot::{
    ClusterSnapshot, FetchFailure, FetchSource, RawContainer, RawContainerUsage, RawNamespace,
    RawNode, RawNodeMetrics, RawPod, RawPodMetrics, RawTaint,
};
pub use lib::sort::{SortBy, sort_cluster};
pub use lib::tree::{
    AllocationField, ClusterMetric, ContainerMetric, NodeMetric, PodMetric, ResourceAllocation,
    ResourceAmounts, Resources, UNSCHEDULED_NODE, build_cluster_metric,
};
pub use lib::tui::display_table;
