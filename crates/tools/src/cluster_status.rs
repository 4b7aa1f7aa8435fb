//! Cluster status tool: node health for a Kubernetes cluster.
//!
//! Answers from the `[tools.clusters]` inventory in the configuration, so
//! the agent can be exercised without a live cluster.

use async_trait::async_trait;
use opsloop_config::ClusterConfig;
use opsloop_core::{Tool, ToolError, ToolOutput};
use serde::Serialize;

pub struct ClusterStatusTool {
    clusters: Vec<ClusterConfig>,
}

impl ClusterStatusTool {
    pub fn new(clusters: Vec<ClusterConfig>) -> Self {
        Self { clusters }
    }
}

#[derive(Debug, Serialize)]
struct ClusterReport {
    cluster_id: String,
    status: &'static str,
    nodes_total: usize,
    nodes_active: usize,
    nodes_not_ready: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<NodeReport>>,
}

#[derive(Debug, Serialize)]
struct NodeReport {
    name: String,
    ready: bool,
    cpu: String,
    memory: String,
}

fn report(cluster: &ClusterConfig, verbose: bool) -> ClusterReport {
    let total = cluster.nodes.len();
    let ready = cluster.nodes.iter().filter(|n| n.ready).count();
    let status = if total > 0 && ready == total {
        "HEALTHY"
    } else {
        "DEGRADED"
    };

    ClusterReport {
        cluster_id: cluster.id.clone(),
        status,
        nodes_total: total,
        nodes_active: ready,
        nodes_not_ready: total - ready,
        details: verbose.then(|| {
            cluster
                .nodes
                .iter()
                .map(|n| NodeReport {
                    name: n.name.clone(),
                    ready: n.ready,
                    cpu: n.cpu.clone(),
                    memory: n.memory.clone(),
                })
                .collect()
        }),
    }
}

#[async_trait]
impl Tool for ClusterStatusTool {
    fn name(&self) -> &str {
        "get_cluster_status"
    }

    fn description(&self) -> &str {
        "Get the status of a Kubernetes cluster and its nodes."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "cluster_id": {
                    "type": "string",
                    "description": "The ID of the cluster to check. Common values: 'prod', 'dev', 'staging'. If the user says 'production', use 'prod'."
                },
                "verbose": {
                    "type": "boolean",
                    "description": "Set to true to include per-node details."
                }
            },
            "required": ["cluster_id"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let cluster_id = arguments["cluster_id"].as_str().unwrap_or_default();
        let verbose = arguments["verbose"].as_bool().unwrap_or(false);
        tracing::info!(cluster_id, verbose, "Checking cluster status");

        let cluster = self
            .clusters
            .iter()
            .find(|c| c.id == cluster_id)
            .ok_or_else(|| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!(
                    "unknown cluster '{cluster_id}' (known: {})",
                    self.clusters
                        .iter()
                        .map(|c| c.id.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            })?;

        let report = report(cluster, verbose);
        let data = serde_json::to_value(&report).map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: e.to_string(),
        })?;
        Ok(ToolOutput::json(data))
    }
}
