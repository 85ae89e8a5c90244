//! SearchCluster Custom Resource Definition
//!
//! A SearchCluster declares a managed search cluster: the engine version,
//! the HTTP layer and an ordered list of node sets.

use std::collections::BTreeSet;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, HttpConfig, NodeSetSpec};
use crate::controller::version::Version;

pub const DEFAULT_IMAGE: &str = "docker.elastic.co/elasticsearch/elasticsearch";

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "search.operator.io",
    version = "v1alpha1",
    kind = "SearchCluster",
    namespaced,
    status = "SearchClusterStatus",
    shortname = "sc",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Nodes","type":"integer","jsonPath":".status.availableNodes"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SearchClusterSpec {
    pub version: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default)]
    pub http: HttpConfig,

    pub node_sets: Vec<NodeSetSpec>,
}

impl SearchClusterSpec {
    /// Validate the spec before any resource is touched
    pub fn validate(&self) -> Result<(), String> {
        self.version
            .parse::<Version>()
            .map_err(|e| format!("spec.version: {e}"))?;

        if self.node_sets.is_empty() {
            return Err("spec.nodeSets must contain at least one node set".to_string());
        }

        let mut names = BTreeSet::new();
        for node_set in &self.node_sets {
            if node_set.name.is_empty() {
                return Err("spec.nodeSets[].name must not be empty".to_string());
            }
            if !names.insert(node_set.name.as_str()) {
                return Err(format!("duplicate node set name: {}", node_set.name));
            }
            if node_set.count < 0 {
                return Err(format!(
                    "node set {} has a negative count: {}",
                    node_set.name, node_set.count
                ));
            }
        }

        if !self
            .node_sets
            .iter()
            .any(|ns| ns.roles.master && ns.count > 0)
        {
            return Err("at least one node set must run master-eligible nodes".to_string());
        }

        Ok(())
    }

    pub fn image_ref(&self) -> String {
        format!(
            "{}:{}",
            self.image.as_deref().unwrap_or(DEFAULT_IMAGE),
            self.version
        )
    }
}

/// Observed state of a SearchCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchClusterStatus {
    #[serde(default)]
    pub phase: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Pods running the current revision of their node set
    #[serde(default)]
    pub available_nodes: i32,

    /// Node sets whose template change has not rolled out yet
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_update: Vec<String>,

    /// Base URL the operator uses to reach the cluster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}
