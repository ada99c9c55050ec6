use std::path::PathBuf;

use clap::Parser;

use crate::SortBy;

/// Kubernetes Capacity Report
///
/// Shows CPU and memory requests, limits and live utilization for each
/// node, and optionally each pod and container, as absolute values and as
/// a share of node allocatable capacity.
#[derive(Parser, Debug)]
#[command(name = "kube-capacity", author, version, about, styles=get_styles())]
pub struct Cli {
    /// Include pods in the output
    #[arg(short, long)]
    pub pods: bool,

    /// Include containers in the output (implies --pods)
    #[arg(short, long)]
    pub containers: bool,

    /// Include live utilization from metrics-server
    #[arg(short, long)]
    pub util: bool,

    /// Include the number of pods on each node
    #[arg(long)]
    pub pod_count: bool,

    /// Show node and cluster values as available/allocatable
    #[arg(short, long)]
    pub available: bool,

    /// Hide request columns
    #[arg(long)]
    pub hide_requests: bool,

    /// Hide limit columns
    #[arg(long)]
    pub hide_limits: bool,

    /// Label selector for pods (e.g. app=web,tier!=db)
    #[arg(short = 'l', long, default_value = "")]
    pub pod_labels: String,

    /// Label selector for nodes
    #[arg(long, default_value = "")]
    pub node_labels: String,

    /// Taint selector for nodes: key[=value][:effect], append '-' to exclude
    #[arg(long, default_value = "")]
    pub node_taints: String,

    /// Exclude every node that carries any taint
    #[arg(long)]
    pub no_taint: bool,

    /// Label selector for namespaces
    #[arg(long, default_value = "")]
    pub namespace_labels: String,

    /// Only include pods from these namespaces (repeat or comma-separate)
    #[arg(short, long, value_delimiter = ',')]
    pub namespace: Vec<String>,

    /// Attribute to sort results by
    ///
    /// One of: name, pod.count, cpu.util, cpu.request, cpu.limit, mem.util,
    /// mem.request, mem.limit; resource keys accept a .percentage suffix
    #[arg(long, default_value = "name", value_parser = parse_sort_by)]
    pub sort: SortBy,

    /// Output format
    #[arg(short, long, value_name = "FORMAT", default_value = "table")]
    pub output: OutputFormat,

    /// Provide context name
    ///
    /// Use if you have multiple clusters in your kubeconfig
    #[arg(long)]
    pub context: Option<String>,

    /// Path to the kubeconfig file (defaults to $KUBECONFIG or ~/.kube/config)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Skip verification of the API server's TLS certificate
    #[arg(long)]
    pub insecure_skip_tls_verify: bool,

    /// User to impersonate for the operation
    #[arg(long = "as", value_name = "USER")]
    pub impersonate_user: Option<String>,

    /// Group to impersonate for the operation (repeatable)
    #[arg(long = "as-group", value_name = "GROUP")]
    pub impersonate_group: Vec<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress log output on stderr (logs still written to file)
    #[arg(short, long)]
    pub quiet: bool,
}

/// Output format for the capacity report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Plain aligned text table
    #[default]
    Table,
    /// Interactive table (TUI)
    Tui,
    /// Output results as JSON
    Json,
    /// Output results as YAML
    Yaml,
}

fn parse_sort_by(value: &str) -> Result<SortBy, String> {
    value.parse().map_err(|e: crate::ConfigError| e.to_string())
}

/// Set color and variants for help description
///
/// Thanks to [Praveen Perera](https://stackoverflow.com/a/76916424)
fn get_styles() -> clap::builder::Styles {
    let heading = anstyle::Style::new()
        .bold()
        .underline()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
    let failure = anstyle::Style::new()
        .bold()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

    clap::builder::Styles::styled()
        .usage(heading)
        .header(heading)
        .literal(
            anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        )
        .invalid(failure)
        .error(failure)
        .valid(
            anstyle::Style::new()
                .bold()
                .underline()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        )
        .placeholder(
            anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::White))),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_flags_and_defaults() {
        let cli = Cli::try_parse_from([
            "kube-capacity",
            "-pcu",
            "-n",
            "kube-system,default",
            "--sort",
            "cpu.util.percentage",
            "--as-group",
            "ops",
            "--as-group",
            "dev",
        ])
        .unwrap();

        assert!(cli.pods && cli.containers && cli.util);
        assert_eq!(cli.namespace, vec!["kube-system", "default"]);
        assert_eq!(cli.sort.to_string(), "cpu.util.percentage");
        assert_eq!(cli.impersonate_group, vec!["ops", "dev"]);
        assert_eq!(cli.output, OutputFormat::Table);
        assert!(cli.pod_labels.is_empty());
    }

    #[test]
    fn rejects_unknown_sort_key() {
        assert!(Cli::try_parse_from(["kube-capacity", "--sort", "disk.request"]).is_err());
    }
}
