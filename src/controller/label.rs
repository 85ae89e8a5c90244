//! Label keys and label builders for search cluster resources
//!
//! Labels are the only link between a cluster, its StatefulSets and their
//! pods: membership is always recomputed from these tags, never cached.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;

use super::version::Version;
use crate::crd::{NodeRoles, SearchCluster};
use crate::error::{Error, Result};

/// Name of the cluster a resource belongs to
pub const CLUSTER_NAME_LABEL: &str = "search.operator.io/cluster-name";
/// Kind of resource owner, always `TYPE_VALUE` for this operator
pub const TYPE_LABEL: &str = "search.operator.io/type";
/// Engine version a pod template runs
pub const VERSION_LABEL: &str = "search.operator.io/version";
/// Name of the StatefulSet a pod belongs to
pub const STATEFULSET_NAME_LABEL: &str = "search.operator.io/statefulset-name";
/// Fingerprint of the node configuration, rotates pods on config change
pub const CONFIG_HASH_LABEL: &str = "search.operator.io/config-hash";
/// Fingerprint of the expected StatefulSet spec
pub const TEMPLATE_HASH_LABEL: &str = "search.operator.io/template-hash";
/// Scheme the pod serves HTTP on
pub const HTTP_SCHEME_LABEL: &str = "search.operator.io/http-scheme";
/// Revision set on pods by the StatefulSet controller
pub const STATEFULSET_REVISION_LABEL: &str = "controller-revision-hash";

pub const TYPE_VALUE: &str = "search-cluster";

pub const NODE_MASTER_LABEL: TrueFalseLabel = TrueFalseLabel("search.operator.io/node-master");
pub const NODE_DATA_LABEL: TrueFalseLabel = TrueFalseLabel("search.operator.io/node-data");
pub const NODE_INGEST_LABEL: TrueFalseLabel = TrueFalseLabel("search.operator.io/node-ingest");
pub const NODE_ML_LABEL: TrueFalseLabel = TrueFalseLabel("search.operator.io/node-ml");

/// A label whose value is either "true" or "false"
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrueFalseLabel(pub &'static str);

impl TrueFalseLabel {
    pub fn key(&self) -> &'static str {
        self.0
    }

    pub fn set(&self, value: bool, labels: &mut BTreeMap<String, String>) {
        set_label(self.0, &value.to_string(), labels);
    }

    pub fn has_value(&self, value: bool, labels: &BTreeMap<String, String>) -> bool {
        has_label(self.0, &value.to_string(), labels)
    }
}

pub fn has_label(key: &str, value: &str, labels: &BTreeMap<String, String>) -> bool {
    labels.get(key).map(String::as_str) == Some(value)
}

pub fn set_label(key: &str, value: &str, labels: &mut BTreeMap<String, String>) {
    labels.insert(key.to_string(), value.to_string());
}

/// Labels shared by every resource of a cluster
pub fn new_labels(cluster_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    set_label(CLUSTER_NAME_LABEL, cluster_name, &mut labels);
    set_label(TYPE_LABEL, TYPE_VALUE, &mut labels);
    labels
}

pub fn new_statefulset_labels(cluster_name: &str, sset_name: &str) -> BTreeMap<String, String> {
    let mut labels = new_labels(cluster_name);
    set_label(STATEFULSET_NAME_LABEL, sset_name, &mut labels);
    labels
}

/// Labels applied to the pod template of a node set
pub fn new_pod_labels(
    cluster_name: &str,
    sset_name: &str,
    version: &Version,
    roles: &NodeRoles,
    config_hash: &str,
    scheme: &str,
) -> BTreeMap<String, String> {
    let mut labels = new_statefulset_labels(cluster_name, sset_name);
    set_label(VERSION_LABEL, &version.to_string(), &mut labels);

    NODE_MASTER_LABEL.set(roles.master, &mut labels);
    NODE_DATA_LABEL.set(roles.data, &mut labels);
    NODE_INGEST_LABEL.set(roles.ingest, &mut labels);
    NODE_ML_LABEL.set(roles.ml, &mut labels);

    set_label(CONFIG_HASH_LABEL, config_hash, &mut labels);
    set_label(HTTP_SCHEME_LABEL, scheme, &mut labels);
    labels
}

/// Selector matching every resource built from `new_labels`
pub fn cluster_selector(cluster_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    set_label(CLUSTER_NAME_LABEL, cluster_name, &mut labels);
    labels
}

/// Version declared by a set of labels
pub fn extract_version(labels: &BTreeMap<String, String>) -> Result<Version> {
    let value = labels
        .get(VERSION_LABEL)
        .ok_or_else(|| Error::ParseError(format!("version label {VERSION_LABEL} is missing")))?;
    value.parse::<Version>().map_err(|e| {
        Error::ParseError(format!("version label {VERSION_LABEL} is invalid: {value}: {e}"))
    })
}

pub fn is_master_node(pod: &Pod) -> bool {
    NODE_MASTER_LABEL.has_value(true, pod.labels())
}

pub fn is_data_node(pod: &Pod) -> bool {
    NODE_DATA_LABEL.has_value(true, pod.labels())
}

pub fn is_master_node_set(sset: &StatefulSet) -> bool {
    sset.spec
        .as_ref()
        .and_then(|spec| spec.template.metadata.as_ref())
        .and_then(|meta| meta.labels.as_ref())
        .map(|labels| NODE_MASTER_LABEL.has_value(true, labels))
        .unwrap_or(false)
}

pub fn filter_master_node_pods(pods: &[Pod]) -> Vec<Pod> {
    pods.iter().filter(|p| is_master_node(p)).cloned().collect()
}

/// Maps a labelled child resource back to its owning cluster.
///
/// The cluster is assumed to live in the child's namespace. Used as a watch
/// mapper so pod changes trigger a reconcile of their cluster.
pub fn cluster_from_resource_labels<K: ResourceExt>(obj: &K) -> Option<ObjectRef<SearchCluster>> {
    let cluster_name = obj.labels().get(CLUSTER_NAME_LABEL)?;
    let namespace = obj.namespace().unwrap_or_default();
    Some(ObjectRef::new(cluster_name).within(&namespace))
}
