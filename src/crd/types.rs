//! Shared types for the SearchCluster CRD

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Roles a node set's nodes take in the cluster. Roles are not exclusive.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeRoles {
    #[serde(default = "default_true")]
    pub master: bool,
    #[serde(default = "default_true")]
    pub data: bool,
    #[serde(default = "default_true")]
    pub ingest: bool,
    #[serde(default)]
    pub ml: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NodeRoles {
    fn default() -> Self {
        Self {
            master: true,
            data: true,
            ingest: true,
            ml: false,
        }
    }
}

/// A homogeneous group of nodes, rendered as one StatefulSet
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSetSpec {
    /// Name of the node set, unique within the cluster
    pub name: String,

    /// Number of nodes in the set
    #[serde(default = "default_count")]
    pub count: i32,

    #[serde(default)]
    pub roles: NodeRoles,

    /// Node configuration settings, rendered into the node's config file
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}

fn default_count() -> i32 {
    1
}

/// TLS mode for the HTTP layer
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum TlsMode {
    #[default]
    Enabled,
    Disabled,
}

/// HTTP layer settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    #[serde(default)]
    pub tls: TlsMode,

    #[serde(default)]
    pub service: ServiceTemplate,
}

impl HttpConfig {
    /// URL scheme nodes serve HTTP on
    pub fn scheme(&self) -> &'static str {
        match self.tls {
            TlsMode::Enabled => "https",
            TlsMode::Disabled => "http",
        }
    }
}

/// User overrides for the external Service
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTemplate {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Service type, e.g. ClusterIP or LoadBalancer (default: ClusterIP)
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

/// Kubernetes-style condition for status reporting
///
/// # Example
///
/// ```rust
/// use search_k8s::crd::Condition;
///
/// let condition = Condition::ready(true, "Ready", "Cluster is ready");
/// ```
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., "Ready", "Progressing")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition: "True", "False", or "Unknown"
    pub status: String,
    /// Last time the condition transitioned
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    pub reason: String,
    /// Human-readable message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new Ready condition
    pub fn ready(status: bool, reason: &str, message: &str) -> Self {
        Self {
            type_: "Ready".to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            last_transition_time: chrono::Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: None,
        }
    }

    /// Set the observed generation for this condition
    pub fn with_observed_generation(mut self, generation: i64) -> Self {
        self.observed_generation = Some(generation);
        self
    }
}
