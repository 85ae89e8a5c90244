//! StatefulSet fleet tracking
//!
//! A cluster runs one StatefulSet per node set. This module answers the
//! questions a rolling upgrade needs: which sets still have to roll, which
//! version a set runs, and whether the pods actually running match what the
//! StatefulSets declare.
//!
//! Revision fingerprints computed by the StatefulSet controller are used
//! instead of deep spec comparison; pods are tied to their set by label and
//! are listed fresh on every query.

use std::collections::BTreeSet;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::debug;

use super::client::PlatformClient;
use super::label::{self, STATEFULSET_NAME_LABEL, STATEFULSET_REVISION_LABEL};
use super::version::Version;
use crate::error::{Error, Result};

/// Ordered collection of a cluster's StatefulSets
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatefulSetList(pub Vec<StatefulSet>);

impl From<Vec<StatefulSet>> for StatefulSetList {
    fn from(items: Vec<StatefulSet>) -> Self {
        Self(items)
    }
}

impl std::ops::Deref for StatefulSetList {
    type Target = [StatefulSet];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Declared replicas, defaulting to 1 like the API server does
pub fn replicas(sset: &StatefulSet) -> i32 {
    sset.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1)
}

pub fn current_revision(sset: &StatefulSet) -> &str {
    sset.status
        .as_ref()
        .and_then(|s| s.current_revision.as_deref())
        .unwrap_or_default()
}

pub fn update_revision(sset: &StatefulSet) -> &str {
    sset.status
        .as_ref()
        .and_then(|s| s.update_revision.as_deref())
        .unwrap_or_default()
}

pub fn pod_revision(pod: &Pod) -> Option<&str> {
    pod.labels()
        .get(STATEFULSET_REVISION_LABEL)
        .map(String::as_str)
}

/// A set needs an update once the platform has observed a template change
/// that is not yet the current revision.
pub fn needs_update(sset: &StatefulSet) -> bool {
    let update = update_revision(sset);
    !update.is_empty() && update != current_revision(sset)
}

/// The StatefulSet controller has not yet observed the latest spec, so its
/// revisions still describe the previous template.
pub fn spec_unobserved(sset: &StatefulSet) -> bool {
    let observed = sset.status.as_ref().and_then(|s| s.observed_generation);
    match (sset.metadata.generation, observed) {
        (Some(generation), Some(observed)) => observed < generation,
        (Some(_), None) => true,
        _ => false,
    }
}

/// True if the pod template declares a version accepted by `pred`.
///
/// A missing or invalid version label means the set has not converged yet,
/// so it never matches.
pub fn version_matches(sset: &StatefulSet, pred: impl Fn(&Version) -> bool) -> bool {
    sset.spec
        .as_ref()
        .and_then(|spec| spec.template.metadata.as_ref())
        .and_then(|meta| meta.labels.as_ref())
        .and_then(|labels| label::extract_version(labels).ok())
        .map(|v| pred(&v))
        .unwrap_or(false)
}

/// Pods labelled as members of `sset`, in its namespace
pub async fn pods_of<C: PlatformClient>(client: &C, sset: &StatefulSet) -> Result<Vec<Pod>> {
    let namespace = sset.namespace().unwrap_or_default();
    let name = sset.name_any();
    let mut selector = std::collections::BTreeMap::new();
    label::set_label(STATEFULSET_NAME_LABEL, &name, &mut selector);

    client
        .list::<Pod>(&namespace, &selector)
        .await
        .map_err(|source| Error::IoError {
            operation: "list",
            kind: "Pod".to_string(),
            namespace,
            name,
            source,
        })
}

/// Number of `pods` running the current revision of `sset`
pub fn count_current(sset: &StatefulSet, pods: &[Pod]) -> usize {
    let current = current_revision(sset);
    if current.is_empty() {
        return 0;
    }
    pods.iter()
        .filter(|p| pod_revision(p) == Some(current))
        .count()
}

/// True once `sset` has at least its declared replicas running the current revision
pub async fn rollout_complete_for<C: PlatformClient>(client: &C, sset: &StatefulSet) -> Result<bool> {
    let pods = pods_of(client, sset).await?;
    let up_to_date = count_current(sset, &pods);
    let expected = replicas(sset);

    debug!(
        statefulset = %sset.name_any(),
        up_to_date,
        expected,
        "Checked pod revisions"
    );
    Ok(up_to_date as i64 >= i64::from(expected))
}

impl StatefulSetList {
    /// Read the cluster's StatefulSets from the API
    pub async fn retrieve_actual<C: PlatformClient>(
        client: &C,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Self> {
        let items = client
            .list::<StatefulSet>(namespace, &label::cluster_selector(cluster_name))
            .await
            .map_err(|source| Error::IoError {
                operation: "list",
                kind: "StatefulSet".to_string(),
                namespace: namespace.to_string(),
                name: cluster_name.to_string(),
                source,
            })?;
        Ok(Self(items))
    }

    pub fn get_by_name(&self, name: &str) -> Option<&StatefulSet> {
        self.0
            .iter()
            .find(|s| s.metadata.name.as_deref() == Some(name))
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.0.iter().map(|s| s.name_any()).collect()
    }

    /// Sum of the declared replicas of every set
    pub fn expected_pod_count(&self) -> i32 {
        self.0.iter().map(replicas).sum()
    }

    /// Sets with a pending template change, in their original order
    pub fn to_update(&self) -> StatefulSetList {
        Self(self.0.iter().filter(|s| needs_update(s)).cloned().collect())
    }

    /// Sets still rolling: a revision is pending or the latest spec has not
    /// been observed yet
    pub fn rolling(&self) -> StatefulSetList {
        Self(
            self.0
                .iter()
                .filter(|s| needs_update(s) || spec_unobserved(s))
                .cloned()
                .collect(),
        )
    }

    pub fn any_version_matches(&self, pred: impl Fn(&Version) -> bool) -> bool {
        self.0.iter().any(|s| version_matches(s, &pred))
    }

    /// Every pod belonging to any set of the list, in no particular order
    pub async fn actual_pods<C: PlatformClient>(&self, client: &C) -> Result<Vec<Pod>> {
        let mut pods = Vec::new();
        for sset in &self.0 {
            pods.extend(pods_of(client, sset).await?);
        }
        Ok(pods)
    }

    /// True once every set runs its declared replicas at its current revision.
    /// An empty list has nothing to wait for.
    pub async fn rollout_complete<C: PlatformClient>(&self, client: &C) -> Result<bool> {
        for sset in &self.0 {
            if !rollout_complete_for(client, sset).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
