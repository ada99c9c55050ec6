use thiserror::Error;

/// Main error type for the capacity report
#[derive(Error, Debug)]
pub enum CapacityError {
    /// Kubernetes API errors
    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] KubernetesError),

    /// metrics.k8s.io errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Report rendering errors
    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Kubernetes-specific errors
#[derive(Error, Debug)]
pub enum KubernetesError {
    /// Kubeconfig unusable, API server unreachable or credentials rejected
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Listing pods failed in every requested namespace
    #[error("Listing pods failed: {0}")]
    PodListFailed(String),

    /// Listing nodes failed while a node selector needed them
    #[error("Listing nodes failed: {0}")]
    NodeListFailed(String),

    /// Listing namespaces failed while a namespace selector needed them
    #[error("Listing namespaces failed: {0}")]
    NamespaceListFailed(String),
}

/// metrics-server errors
#[derive(Error, Debug)]
pub enum MetricsError {
    /// metrics.k8s.io is not served by the cluster
    #[error("Metrics API unavailable: {0}")]
    ConnectionFailed(String),

    /// Pod metrics could not be listed in any requested namespace
    #[error("Pod metrics unavailable: {0}")]
    PodMetricsUnavailable(String),
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Label selector could not be parsed
    #[error("Invalid label selector '{selector}': {reason}")]
    InvalidLabelSelector { selector: String, reason: String },

    /// Taint selector could not be parsed
    #[error("Invalid taint selector '{selector}': {reason}")]
    InvalidTaintSelector { selector: String, reason: String },
}

/// Report rendering errors
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML encoding failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Terminal error: {0}")]
    Terminal(String),
}

impl CapacityError {
    /// Process exit code for this failure class.
    ///
    /// Codes are stable; scripts rely on them to tell a missing
    /// metrics-server apart from an unreachable cluster.
    pub fn exit_code(&self) -> i32 {
        match self {
            CapacityError::Kubernetes(KubernetesError::ConnectionFailed(_)) => 1,
            CapacityError::Config(_) => 2,
            CapacityError::Kubernetes(KubernetesError::PodListFailed(_)) => 3,
            CapacityError::Metrics(MetricsError::ConnectionFailed(_)) => 4,
            CapacityError::Kubernetes(KubernetesError::NodeListFailed(_)) => 5,
            CapacityError::Metrics(MetricsError::PodMetricsUnavailable(_)) => 6,
            CapacityError::Kubernetes(KubernetesError::NamespaceListFailed(_)) => 7,
            CapacityError::Output(_) | CapacityError::Io(_) => 8,
        }
    }
}

/// Helper type alias for Results
pub type Result<T> = std::result::Result<T, CapacityError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn exit_codes_are_distinct_per_failure_class() {
        let errors: Vec<CapacityError> = vec![
            KubernetesError::ConnectionFailed("x".into()).into(),
            ConfigError::InvalidValue("x".into()).into(),
            KubernetesError::PodListFailed("x".into()).into(),
            MetricsError::ConnectionFailed("x".into()).into(),
            KubernetesError::NodeListFailed("x".into()).into(),
            MetricsError::PodMetricsUnavailable("x".into()).into(),
            KubernetesError::NamespaceListFailed("x".into()).into(),
            OutputError::Terminal("x".into()).into(),
        ];

        let codes: HashSet<i32> = errors.iter().map(|e| e.exit_code()).collect();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn config_errors_share_one_code() {
        let a: CapacityError = ConfigError::InvalidValue("unknown sort key".into()).into();
        let b: CapacityError = ConfigError::InvalidLabelSelector {
            selector: "a in".into(),
            reason: "unterminated".into(),
        }
        .into();
        assert_eq!(a.exit_code(), 2);
        assert_eq!(b.exit_code(), 2);
    }
}
