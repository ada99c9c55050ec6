use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, Namespace, Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use log::{debug, info, warn};

use crate::lib::config::ConnectionConfig;
use crate::lib::quantity::ResourceKind;
use crate::lib::selector::{LabelSelector, SelectionFilter};
use crate::lib::snapshot::{
    FetchFailure, FetchSource, RawContainer, RawNamespace, RawNode, RawPod, RawTaint,
    merge_namespace_results,
};
use crate::{
    KubernetesError::{ConnectionFailed, NamespaceListFailed, NodeListFailed, PodListFailed},
    Result,
};

/// Terminated pods hold no resources
const ACTIVE_POD_FIELDS: &str = "status.phase!=Succeeded,status.phase!=Failed";

pub struct KubernetesLoader {
    client: Client,
}

impl KubernetesLoader {
    /// Build a client for the configured context and check that the API
    /// server answers. Any failure on the way, including an unreadable
    /// kubeconfig, is a connection failure.
    pub async fn new(connection: &ConnectionConfig) -> Result<Self> {
        let options = KubeConfigOptions {
            context: connection.context.clone(),
            ..Default::default()
        };

        let mut config = if let Some(path) = &connection.kubeconfig {
            debug!("Reading kubeconfig from {}", path.display());
            let kubeconfig =
                Kubeconfig::read_from(path).map_err(|e| ConnectionFailed(e.to_string()))?;
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| ConnectionFailed(e.to_string()))?
        } else if connection.context.is_some() {
            debug!("Using custom context for Kubeconfig");
            Config::from_kubeconfig(&options)
                .await
                .map_err(|e| ConnectionFailed(e.to_string()))?
        } else {
            debug!("Inferring Kubernetes configuration");
            Config::infer()
                .await
                .map_err(|e| ConnectionFailed(e.to_string()))?
        };

        if connection.insecure_skip_tls_verify {
            warn!("TLS certificate verification is disabled");
            config.accept_invalid_certs = true;
        }
        if let Some(user) = &connection.impersonate_user {
            debug!("Impersonating user {user}");
            config.auth_info.impersonate = Some(user.clone());
        }
        if !connection.impersonate_groups.is_empty() {
            config.auth_info.impersonate_groups = Some(connection.impersonate_groups.clone());
        }

        let client = Client::try_from(config).map_err(|e| ConnectionFailed(e.to_string()))?;

        let version = client
            .apiserver_version()
            .await
            .map_err(|e| ConnectionFailed(e.to_string()))?;
        info!("Connected to Kubernetes {}.{}", version.major, version.minor);

        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// List active pods in every selected namespace.
    ///
    /// A namespace that fails to list is recorded in `failures` and
    /// skipped; only a failure in every namespace is fatal.
    pub async fn list_pods(
        &self,
        filter: &SelectionFilter,
        failures: &mut Vec<FetchFailure>,
    ) -> Result<Vec<RawPod>> {
        let lp = ListParams::default()
            .labels(filter.pod_labels.as_str())
            .fields(ACTIVE_POD_FIELDS);

        if filter.namespaces.is_empty() {
            debug!("Listing pods in all namespaces");
            let api: Api<Pod> = Api::all(self.client.clone());
            let pods = api.list(&lp).await.map_err(|e| PodListFailed(e.to_string()))?;
            info!("Retrieved {} pods", pods.items.len());
            return Ok(pods.items.into_iter().map(raw_pod).collect());
        }

        let mut results = Vec::with_capacity(filter.namespaces.len());
        for namespace in &filter.namespaces {
            debug!("Listing pods in {namespace} namespace");
            let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
            let listed: std::result::Result<Vec<RawPod>, String> = api
                .list(&lp)
                .await
                .map(|pods| pods.items.into_iter().map(raw_pod).collect())
                .map_err(|e| e.to_string());
            results.push((namespace.clone(), listed));
        }

        let raw_pods = merge_namespace_results(results, FetchSource::Pods, failures)
            .map_err(PodListFailed)?;

        info!(
            "Retrieved {} pods from {} namespaces",
            raw_pods.len(),
            filter.namespaces.len()
        );
        Ok(raw_pods)
    }

    pub async fn list_nodes(&self, filter: &SelectionFilter) -> Result<Vec<RawNode>> {
        let lp = ListParams::default().labels(filter.node_labels.as_str());
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&lp).await.map_err(|e| NodeListFailed(e.to_string()))?;
        info!("Retrieved {} nodes", nodes.items.len());
        Ok(nodes.items.into_iter().map(raw_node).collect())
    }

    pub async fn list_namespaces(&self, selector: &LabelSelector) -> Result<Vec<RawNamespace>> {
        let lp = ListParams::default().labels(selector.as_str());
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespaces = api
            .list(&lp)
            .await
            .map_err(|e| NamespaceListFailed(e.to_string()))?;
        debug!("Retrieved {} namespaces", namespaces.items.len());
        Ok(namespaces
            .items
            .into_iter()
            .map(|ns| RawNamespace {
                name: ns.metadata.name.unwrap_or_default(),
                labels: ns.metadata.labels.unwrap_or_default(),
            })
            .collect())
    }
}

fn quantity_string(map: Option<&BTreeMap<String, Quantity>>, key: &str) -> Option<String> {
    map.and_then(|m| m.get(key)).map(|q| q.0.clone())
}

fn raw_container(container: &Container) -> RawContainer {
    let resources = container.resources.as_ref();
    let requests = resources.and_then(|r| r.requests.as_ref());
    let limits = resources.and_then(|r| r.limits.as_ref());
    RawContainer {
        name: container.name.clone(),
        cpu_request: quantity_string(requests, ResourceKind::Cpu.key()),
        cpu_limit: quantity_string(limits, ResourceKind::Cpu.key()),
        memory_request: quantity_string(requests, ResourceKind::Memory.key()),
        memory_limit: quantity_string(limits, ResourceKind::Memory.key()),
    }
}

pub(crate) fn raw_pod(pod: Pod) -> RawPod {
    let spec = pod.spec.unwrap_or_default();
    RawPod {
        name: pod.metadata.name.unwrap_or_default(),
        namespace: pod.metadata.namespace.unwrap_or_default(),
        node_name: spec.node_name.clone().unwrap_or_default(),
        labels: pod.metadata.labels.unwrap_or_default(),
        containers: spec.containers.iter().map(raw_container).collect(),
    }
}

pub(crate) fn raw_node(node: Node) -> RawNode {
    let allocatable = node.status.and_then(|s| s.allocatable);
    RawNode {
        name: node.metadata.name.unwrap_or_default(),
        labels: node.metadata.labels.unwrap_or_default(),
        taints: node
            .spec
            .and_then(|s| s.taints)
            .unwrap_or_default()
            .into_iter()
            .map(|t| RawTaint {
                key: t.key,
                value: t.value,
                effect: t.effect,
            })
            .collect(),
        allocatable_cpu: quantity_string(allocatable.as_ref(), ResourceKind::Cpu.key()),
        allocatable_memory: quantity_string(allocatable.as_ref(), ResourceKind::Memory.key()),
        allocatable_pods: quantity_string(allocatable.as_ref(), "pods"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeSpec, NodeStatus, PodSpec, ResourceRequirements, Taint};
    use kube::api::ObjectMeta;

    fn quantities(pairs: &[(&str, &str)]) -> BTreeMap<String, Quantity> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
            .collect()
    }

    #[test]
    fn converts_pod_spec_resources() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("web-0".to_string()),
                namespace: Some("shop".to_string()),
                labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("n1".to_string()),
                containers: vec![
                    Container {
                        name: "app".to_string(),
                        resources: Some(ResourceRequirements {
                            requests: Some(quantities(&[("cpu", "250m"), ("memory", "128Mi")])),
                            limits: Some(quantities(&[("memory", "256Mi")])),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    Container {
                        name: "sidecar".to_string(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }),
            ..Default::default()
        };

        let raw = raw_pod(pod);
        assert_eq!(raw.name, "web-0");
        assert_eq!(raw.namespace, "shop");
        assert_eq!(raw.node_name, "n1");
        assert_eq!(raw.labels.get("app").map(String::as_str), Some("web"));
        assert_eq!(raw.containers.len(), 2);
        assert_eq!(raw.containers[0].cpu_request.as_deref(), Some("250m"));
        assert_eq!(raw.containers[0].cpu_limit, None);
        assert_eq!(raw.containers[0].memory_limit.as_deref(), Some("256Mi"));
        assert_eq!(raw.containers[1].memory_request, None);
    }

    #[test]
    fn unscheduled_pod_has_empty_node_name() {
        let raw = raw_pod(Pod {
            metadata: ObjectMeta {
                name: Some("pending".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec::default()),
            ..Default::default()
        });
        assert!(raw.node_name.is_empty());
    }

    #[test]
    fn converts_node_allocatable_and_taints() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("gpu-1".to_string()),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                taints: Some(vec![Taint {
                    key: "dedicated".to_string(),
                    value: Some("gpu".to_string()),
                    effect: "NoSchedule".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: Some(NodeStatus {
                allocatable: Some(quantities(&[
                    ("cpu", "3920m"),
                    ("memory", "15Gi"),
                    ("pods", "110"),
                ])),
                ..Default::default()
            }),
        };

        let raw = raw_node(node);
        assert_eq!(raw.name, "gpu-1");
        assert_eq!(raw.allocatable_cpu.as_deref(), Some("3920m"));
        assert_eq!(raw.allocatable_pods.as_deref(), Some("110"));
        assert_eq!(
            raw.taints,
            vec![RawTaint {
                key: "dedicated".to_string(),
                value: Some("gpu".to_string()),
                effect: "NoSchedule".to_string(),
            }]
        );
    }

    #[test]
    fn node_without_status_has_unknown_allocatable() {
        let raw = raw_node(Node::default());
        assert_eq!(raw.allocatable_cpu, None);
        assert_eq!(raw.allocatable_memory, None);
        assert!(raw.taints.is_empty());
    }

    #[tokio::test]
    async fn unreadable_kubeconfig_is_a_connection_failure() {
        let connection = ConnectionConfig {
            kubeconfig: Some("/nonexistent/kube-capacity/config".into()),
            ..Default::default()
        };

        let err = KubernetesLoader::new(&connection)
            .await
            .err()
            .expect("missing kubeconfig must not connect");

        assert!(matches!(
            err,
            crate::CapacityError::Kubernetes(crate::KubernetesError::ConnectionFailed(_))
        ));
        assert_eq!(err.exit_code(), 1);
    }
}
