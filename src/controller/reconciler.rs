//! Main reconciler for SearchCluster resources
//!
//! Implements the controller pattern using kube-rs runtime.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::{
    api::{Api, ListParams, Patch, PatchParams},
    client::Client,
    core::NamespaceResourceScope,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, instrument, warn};

use super::client::{KubeClient, PlatformClient};
use super::conditions::{
    new_condition, set_condition, CONDITION_TYPE_APPLYING_CHANGES, CONDITION_TYPE_READY,
    CONDITION_TYPE_SERVICE_READY,
};
use super::label::{self, cluster_from_resource_labels, TYPE_LABEL, TYPE_VALUE};
use super::resources::{self, TemplateChange};
use super::services;
use super::sset::{self, StatefulSetList};
use crate::crd::{SearchCluster, SearchClusterStatus};
use crate::error::{Error, Result};

pub const PHASE_READY: &str = "Ready";
pub const PHASE_APPLYING_CHANGES: &str = "ApplyingChanges";
pub const PHASE_FAILED: &str = "Failed";

const FIELD_MANAGER: &str = "search-operator";

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub platform: KubeClient,
    /// Namespace to watch, every namespace when unset
    pub namespace: Option<String>,
}

impl ControllerState {
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self {
            platform: KubeClient::new(client.clone()),
            client,
            namespace,
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + DeserializeOwned,
    {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let clusters: Api<SearchCluster> = state.api();

    info!(namespace = ?state.namespace, "Starting SearchCluster controller");

    // Verify CRD exists
    match clusters.list(&ListParams::default().limit(1)).await {
        Ok(_) => info!("SearchCluster CRD is available"),
        Err(e) => {
            error!(error = %e, "SearchCluster CRD not found, install it first");
            return Err(Error::ConfigError(
                "SearchCluster CRD not installed".to_string(),
            ));
        }
    }

    let pod_config = Config::default().labels(&format!("{TYPE_LABEL}={TYPE_VALUE}"));

    Controller::new(clusters, Config::default())
        .owns::<StatefulSet>(state.api(), Config::default())
        .owns::<Service>(state.api(), Config::default())
        .watches(state.api::<Pod>(), pod_config, |pod| {
            cluster_from_resource_labels(&pod)
        })
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

/// The main reconciliation function
///
/// This function is called whenever:
/// - A SearchCluster is created or updated
/// - An owned StatefulSet or Service changes
/// - A pod of the cluster changes
/// - The requeue timer expires
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<SearchCluster>, ctx: Arc<ControllerState>) -> Result<Action> {
    info!("Reconciling SearchCluster");

    if let Err(e) = obj.spec.validate() {
        warn!(error = %e, "Validation failed");
        let status = failed_status(&obj, &e);
        patch_status(&ctx.client, &obj, &status).await?;
        return Err(Error::ValidationError(e));
    }

    let status = apply_cluster(&ctx.platform, &obj).await?;
    if let Err(e) = patch_status(&ctx.client, &obj, &status).await {
        if e.is_not_found() {
            debug!("SearchCluster deleted before its status was written");
            return Ok(Action::await_change());
        }
        return Err(e);
    }

    let requeue = if status.phase == PHASE_READY {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(10)
    };
    Ok(Action::requeue(requeue))
}

/// Drive every resource of a valid cluster toward its spec and compute the
/// resulting status.
///
/// Template changes are rolled out one node set at a time: while a node set
/// is rolling, template changes to the others are held back and reported as
/// pending. A node set whose new template is written in this pass counts as
/// rolling for the rest of the pass.
pub async fn apply_cluster<C: PlatformClient>(
    client: &C,
    cluster: &SearchCluster,
) -> Result<SearchClusterStatus> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();

    let service = services::reconcile_external_service(client, cluster).await?;

    let actual = StatefulSetList::retrieve_actual(client, &namespace, &name).await?;
    let mut rolling = actual.rolling().names();
    let mut rollout_in_progress = !rolling.is_empty() || !actual.rollout_complete(client).await?;
    if rollout_in_progress {
        debug!(?rolling, "Rollout in progress");
    }

    let mut applied = BTreeSet::new();
    let mut deferred = BTreeSet::new();
    for node_set in &cluster.spec.node_sets {
        let sset_name = resources::statefulset_name(&name, &node_set.name);
        resources::reconcile_headless_service(client, cluster, node_set).await?;

        let defer = rollout_in_progress && !rolling.contains(&sset_name);
        let (_, change) =
            resources::reconcile_statefulset(client, cluster, node_set, defer).await?;
        match change {
            TemplateChange::Applied => {
                rollout_in_progress = true;
                rolling.insert(sset_name.clone());
                applied.insert(sset_name);
            }
            TemplateChange::Deferred => {
                deferred.insert(sset_name);
            }
            TemplateChange::Unchanged => {}
        }
    }

    let actual = StatefulSetList::retrieve_actual(client, &namespace, &name).await?;
    let mut pods = Vec::new();
    let mut available = 0;
    for sset in actual.iter() {
        let sset_pods = sset::pods_of(client, sset).await?;
        available += sset::count_current(sset, &sset_pods);
        pods.extend(sset_pods);
    }

    let mut pending = actual.rolling().names();
    pending.extend(applied);
    pending.extend(deferred);
    let rollout_complete = actual.rollout_complete(client).await?;
    let service_ready = services::is_service_ready(client, &service).await?;

    let expected_masters: i32 = actual
        .iter()
        .filter(|s| label::is_master_node_set(s))
        .map(sset::replicas)
        .sum();
    let masters = label::filter_master_node_pods(&pods).len();
    let data_nodes = pods.iter().filter(|p| label::is_data_node(p)).count();
    let masters_ready = expected_masters == 0 || masters > 0;

    let ready = pending.is_empty() && rollout_complete && service_ready && masters_ready;

    let generation = cluster.metadata.generation;
    let mut conditions = cluster
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    let mut set = |mut condition: crate::crd::Condition| {
        condition.observed_generation = generation;
        set_condition(&mut conditions, condition);
    };

    let message = if ready {
        "All node sets are running their declared revision".to_string()
    } else if !pending.is_empty() {
        format!(
            "Rolling out node sets: {}",
            pending.iter().cloned().collect::<Vec<_>>().join(", ")
        )
    } else if !rollout_complete {
        "Waiting for pods to run their declared revision".to_string()
    } else if !masters_ready {
        format!("Waiting for master-eligible pods ({masters}/{expected_masters})")
    } else {
        "Waiting for the HTTP service to have ready endpoints".to_string()
    };

    set(new_condition(
        CONDITION_TYPE_READY,
        ready,
        if ready { "ClusterReady" } else { "ClusterNotReady" },
        &message,
    ));
    set(new_condition(
        CONDITION_TYPE_APPLYING_CHANGES,
        !pending.is_empty() || !rollout_complete,
        if pending.is_empty() { "Converged" } else { "Rolling" },
        &message,
    ));
    set(new_condition(
        CONDITION_TYPE_SERVICE_READY,
        service_ready,
        if service_ready {
            "EndpointsReady"
        } else {
            "NoEndpoints"
        },
        &services::external_service_name(&name),
    ));

    info!(
        ready,
        available,
        masters,
        expected_masters,
        data_nodes,
        pending = pending.len(),
        "Computed cluster status"
    );

    Ok(SearchClusterStatus {
        phase: if ready {
            PHASE_READY
        } else {
            PHASE_APPLYING_CHANGES
        }
        .to_string(),
        message: Some(message),
        observed_generation: generation,
        available_nodes: i32::try_from(available).unwrap_or(i32::MAX),
        pending_update: pending.into_iter().collect(),
        url: Some(services::base_url(cluster, &pods)),
        conditions,
    })
}

fn failed_status(cluster: &SearchCluster, message: &str) -> SearchClusterStatus {
    let mut status = cluster.status.clone().unwrap_or_default();
    let mut condition = new_condition(CONDITION_TYPE_READY, false, "InvalidSpec", message);
    condition.observed_generation = cluster.metadata.generation;
    set_condition(&mut status.conditions, condition);

    SearchClusterStatus {
        phase: PHASE_FAILED.to_string(),
        message: Some(message.to_string()),
        observed_generation: cluster.metadata.generation,
        ..status
    }
}

async fn patch_status(
    client: &Client,
    cluster: &SearchCluster,
    status: &SearchClusterStatus,
) -> Result<()> {
    let namespace = cluster.namespace().unwrap_or_default();
    let api: Api<SearchCluster> = Api::namespaced(client.clone(), &namespace);

    // Every field is written so that a merge patch also clears stale values
    let patch = serde_json::json!({
        "status": {
            "phase": status.phase,
            "message": status.message,
            "observedGeneration": status.observed_generation,
            "availableNodes": status.available_nodes,
            "pendingUpdate": status.pending_update,
            "url": status.url,
            "conditions": status.conditions,
        }
    });

    api.patch_status(
        &cluster.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await
    .map_err(Error::KubeError)?;

    Ok(())
}

/// Error policy for the controller
fn error_policy(cluster: Arc<SearchCluster>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!(name = %cluster.name_any(), error = %error, "Reconciliation error");

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::SearchClusterSpec;

    #[test]
    fn test_failed_status_keeps_other_conditions() {
        let mut cluster = SearchCluster::new(
            "es",
            SearchClusterSpec {
                version: "7.1.0".to_string(),
                image: None,
                http: Default::default(),
                node_sets: vec![],
            },
        );
        cluster.metadata.generation = Some(4);
        cluster.status = Some(SearchClusterStatus {
            phase: PHASE_READY.to_string(),
            conditions: vec![new_condition(
                CONDITION_TYPE_SERVICE_READY,
                true,
                "EndpointsReady",
                "",
            )],
            ..Default::default()
        });

        let status = failed_status(&cluster, "no node sets");
        assert_eq!(status.phase, PHASE_FAILED);
        assert_eq!(status.message.as_deref(), Some("no node sets"));
        assert_eq!(status.observed_generation, Some(4));
        assert_eq!(status.conditions.len(), 2);
        let ready = &status.conditions[1];
        assert_eq!(ready.type_, CONDITION_TYPE_READY);
        assert_eq!(ready.reason, "InvalidSpec");
        assert_eq!(ready.observed_generation, Some(4));
    }
}
