//! metrics-server access (`metrics.k8s.io/v1beta1`).
//!
//! k8s-openapi does not ship the metrics API types, so the two resources
//! are declared here and served through the regular `kube::Api`.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, ListParams, ObjectMeta};
use kube::Client;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::lib::quantity::ResourceKind;
use crate::lib::snapshot::{
    FetchFailure, FetchSource, RawContainerUsage, RawNodeMetrics, RawPodMetrics,
    merge_namespace_results,
};
use crate::{
    MetricsError::{ConnectionFailed, PodMetricsUnavailable},
    Result,
};

pub const METRICS_API_VERSION: &str = "metrics.k8s.io/v1beta1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMetrics {
    pub name: String,
    #[serde(default)]
    pub usage: BTreeMap<String, Quantity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodMetrics {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub window: Option<String>,
    #[serde(default)]
    pub containers: Vec<ContainerMetrics>,
}

impl k8s_openapi::Resource for PodMetrics {
    const API_VERSION: &'static str = METRICS_API_VERSION;
    const GROUP: &'static str = "metrics.k8s.io";
    const KIND: &'static str = "PodMetrics";
    const VERSION: &'static str = "v1beta1";
    const URL_PATH_SEGMENT: &'static str = "pods";
    type Scope = k8s_openapi::NamespaceResourceScope;
}

impl k8s_openapi::Metadata for PodMetrics {
    type Ty = ObjectMeta;

    fn metadata(&self) -> &Self::Ty {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Self::Ty {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub window: Option<String>,
    #[serde(default)]
    pub usage: BTreeMap<String, Quantity>,
}

impl k8s_openapi::Resource for NodeMetrics {
    const API_VERSION: &'static str = METRICS_API_VERSION;
    const GROUP: &'static str = "metrics.k8s.io";
    const KIND: &'static str = "NodeMetrics";
    const VERSION: &'static str = "v1beta1";
    const URL_PATH_SEGMENT: &'static str = "nodes";
    type Scope = k8s_openapi::ClusterResourceScope;
}

impl k8s_openapi::Metadata for NodeMetrics {
    type Ty = ObjectMeta;

    fn metadata(&self) -> &Self::Ty {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Self::Ty {
        &mut self.metadata
    }
}

pub struct MetricsLoader {
    client: Client,
}

impl MetricsLoader {
    /// Confirm the cluster serves the metrics API at all.
    pub async fn new(client: Client) -> Result<Self> {
        client
            .list_api_group_resources(METRICS_API_VERSION)
            .await
            .map_err(|e| {
                ConnectionFailed(format!(
                    "{e}; for this to work, metrics-server needs to be running in your cluster"
                ))
            })?;
        debug!("Metrics API {METRICS_API_VERSION} is available");
        Ok(Self { client })
    }

    /// Pod samples for the given namespaces (all when empty).
    ///
    /// Namespaces that fail are recorded in `failures`; failing everywhere
    /// is fatal because utilization was explicitly asked for.
    pub async fn list_pod_metrics(
        &self,
        namespaces: &[String],
        failures: &mut Vec<FetchFailure>,
    ) -> Result<Vec<RawPodMetrics>> {
        let lp = ListParams::default();

        if namespaces.is_empty() {
            let api: Api<PodMetrics> = Api::all(self.client.clone());
            let list = api
                .list(&lp)
                .await
                .map_err(|e| PodMetricsUnavailable(e.to_string()))?;
            info!("Retrieved metrics for {} pods", list.items.len());
            return Ok(list.items.into_iter().map(raw_pod_metrics).collect());
        }

        let mut results = Vec::with_capacity(namespaces.len());
        for namespace in namespaces {
            let api: Api<PodMetrics> = Api::namespaced(self.client.clone(), namespace);
            let listed: std::result::Result<Vec<RawPodMetrics>, String> = api
                .list(&lp)
                .await
                .map(|list| list.items.into_iter().map(raw_pod_metrics).collect())
                .map_err(|e| e.to_string());
            results.push((namespace.clone(), listed));
        }

        let samples = merge_namespace_results(results, FetchSource::PodMetrics, failures)
            .map_err(PodMetricsUnavailable)?;

        info!("Retrieved metrics for {} pods", samples.len());
        Ok(samples)
    }

    /// Node samples; a failure here only loses the node usage column
    pub async fn list_node_metrics(
        &self,
        failures: &mut Vec<FetchFailure>,
    ) -> Option<Vec<RawNodeMetrics>> {
        let api: Api<NodeMetrics> = Api::all(self.client.clone());
        match api.list(&ListParams::default()).await {
            Ok(list) => {
                debug!("Retrieved metrics for {} nodes", list.items.len());
                Some(list.items.into_iter().map(raw_node_metrics).collect())
            }
            Err(e) => {
                warn!("Error getting node metrics: {e}");
                failures.push(FetchFailure {
                    source: FetchSource::NodeMetrics,
                    namespace: None,
                    message: e.to_string(),
                });
                None
            }
        }
    }
}

fn usage_string(usage: &BTreeMap<String, Quantity>, key: &str) -> Option<String> {
    usage.get(key).map(|q| q.0.clone())
}

pub(crate) fn raw_pod_metrics(metrics: PodMetrics) -> RawPodMetrics {
    RawPodMetrics {
        name: metrics.metadata.name.unwrap_or_default(),
        namespace: metrics.metadata.namespace.unwrap_or_default(),
        containers: metrics
            .containers
            .into_iter()
            .map(|c| RawContainerUsage {
                cpu: usage_string(&c.usage, ResourceKind::Cpu.key()),
                memory: usage_string(&c.usage, ResourceKind::Memory.key()),
                name: c.name,
            })
            .collect(),
    }
}

pub(crate) fn raw_node_metrics(metrics: NodeMetrics) -> RawNodeMetrics {
    RawNodeMetrics {
        name: metrics.metadata.name.unwrap_or_default(),
        cpu: usage_string(&metrics.usage, ResourceKind::Cpu.key()),
        memory: usage_string(&metrics.usage, ResourceKind::Memory.key()),
    }
}
