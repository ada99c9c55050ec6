use std::path::PathBuf;

use log::warn;

use crate::lib::cli::{Cli, OutputFormat};
use crate::lib::selector::{LabelSelector, SelectionFilter, TaintSelector};
use crate::lib::tree::AllocationField;
use crate::{Result, SortBy};

/// How to reach the cluster
#[derive(Clone, Debug, Default)]
pub struct ConnectionConfig {
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    pub insecure_skip_tls_verify: bool,
    pub impersonate_user: Option<String>,
    pub impersonate_groups: Vec<String>,
}

/// What the report shows. Only `show_util` changes what is fetched.
#[derive(Clone, Debug, Default)]
pub struct DisplayOptions {
    pub show_pods: bool,
    pub show_containers: bool,
    pub show_util: bool,
    pub show_pod_count: bool,
    pub hide_requests: bool,
    pub hide_limits: bool,
    pub available: bool,
    pub output: OutputFormat,
}

#[derive(Clone, Debug, Default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub filter: SelectionFilter,
    pub display: DisplayOptions,
    pub sort_by: SortBy,
}

impl Config {
    pub fn new(
        connection: ConnectionConfig,
        filter: SelectionFilter,
        display: DisplayOptions,
        sort_by: SortBy,
    ) -> Self {
        Self {
            connection,
            filter,
            display,
            sort_by,
        }
    }

    /// Validate command line arguments; selector syntax errors surface here
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let filter = SelectionFilter {
            pod_labels: LabelSelector::parse(&cli.pod_labels)?,
            node_labels: LabelSelector::parse(&cli.node_labels)?,
            node_taints: TaintSelector::parse(&cli.node_taints)?,
            exclude_tainted: cli.no_taint,
            namespace_labels: LabelSelector::parse(&cli.namespace_labels)?,
            namespaces: cli
                .namespace
                .iter()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
        };

        if cli.no_taint && !filter.node_taints.is_empty() {
            warn!("--no-taint excludes every tainted node; --node-taints has no effect");
        }

        let display = DisplayOptions {
            show_pods: cli.pods || cli.containers,
            show_containers: cli.containers,
            show_util: cli.util,
            show_pod_count: cli.pod_count,
            hide_requests: cli.hide_requests,
            hide_limits: cli.hide_limits,
            available: cli.available,
            output: cli.output,
        };

        if let SortBy::Resource {
            field: AllocationField::Used,
            ..
        } = cli.sort
        {
            if !cli.util {
                warn!("Sorting by utilization without --util; usage is not fetched");
            }
        }

        let connection = ConnectionConfig {
            kubeconfig: cli.kubeconfig.clone(),
            context: cli.context.clone(),
            insecure_skip_tls_verify: cli.insecure_skip_tls_verify,
            impersonate_user: cli.impersonate_user.clone(),
            impersonate_groups: cli.impersonate_group.clone(),
        };

        Ok(Self::new(connection, filter, display, cli.sort))
    }
}
