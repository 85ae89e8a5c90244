//! Kubernetes resource builders for node sets
//!
//! Each node set is rendered as a StatefulSet plus a headless Service of the
//! same name, so pods resolve as `<pod>.<statefulset>.<namespace>`.

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector, PodSpec,
    PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use super::client::PlatformClient;
use super::generic::{reconcile_resource, Owner, ReconcileOutcome, ReconcileParams};
use super::label::{self, TEMPLATE_HASH_LABEL};
use super::services::{self, HTTP_PORT};
use super::version::Version;
use crate::crd::{NodeRoles, NodeSetSpec, SearchCluster};
use crate::error::Result;

/// Port nodes talk to each other on
pub const TRANSPORT_PORT: i32 = 9300;

const CONTAINER_NAME: &str = "search";

pub fn statefulset_name(cluster_name: &str, node_set: &str) -> String {
    format!("{cluster_name}-{node_set}")
}

/// Hex of the first 16 bytes of the SHA-256 digest, short enough for a label value
fn short_hash(bytes: &[u8]) -> String {
    hex::encode(&Sha256::digest(bytes)[..16])
}

/// Fingerprint of a node set's configuration
pub fn config_hash(node_set: &NodeSetSpec) -> Result<String> {
    Ok(short_hash(&serde_json::to_vec(&node_set.config)?))
}

/// Template fingerprint recorded on a StatefulSet
pub fn template_hash_of(sset: &StatefulSet) -> Option<&str> {
    sset.labels().get(TEMPLATE_HASH_LABEL).map(String::as_str)
}

fn role_list(roles: &NodeRoles) -> String {
    [
        (roles.master, "master"),
        (roles.data, "data"),
        (roles.ingest, "ingest"),
        (roles.ml, "ml"),
    ]
    .iter()
    .filter(|(enabled, _)| *enabled)
    .map(|(_, name)| *name)
    .collect::<Vec<_>>()
    .join(",")
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn build_container(cluster: &SearchCluster, node_set: &NodeSetSpec) -> Container {
    let mut env = vec![
        EnvVar {
            name: "node.name".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.name".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        env_var("node.roles", &role_list(&node_set.roles)),
        env_var(
            "http.ssl.enabled",
            &(cluster.spec.http.scheme() == "https").to_string(),
        ),
    ];
    env.extend(node_set.config.iter().map(|(k, v)| env_var(k, v)));

    Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(cluster.spec.image_ref()),
        ports: Some(vec![
            ContainerPort {
                name: Some("http".to_string()),
                container_port: HTTP_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                name: Some("transport".to_string()),
                container_port: TRANSPORT_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        env: Some(env),
        ..Default::default()
    }
}

/// Expected StatefulSet of a node set, labelled with its template fingerprint
pub fn build_statefulset(cluster: &SearchCluster, node_set: &NodeSetSpec) -> Result<StatefulSet> {
    let cluster_name = cluster.name_any();
    let name = statefulset_name(&cluster_name, &node_set.name);
    let version: Version = cluster.spec.version.parse()?;

    let selector = label::new_statefulset_labels(&cluster_name, &name);
    let pod_labels = label::new_pod_labels(
        &cluster_name,
        &name,
        &version,
        &node_set.roles,
        &config_hash(node_set)?,
        cluster.spec.http.scheme(),
    );

    let spec = StatefulSetSpec {
        replicas: Some(node_set.count),
        service_name: name.clone(),
        pod_management_policy: Some("Parallel".to_string()),
        update_strategy: Some(StatefulSetUpdateStrategy {
            type_: Some("RollingUpdate".to_string()),
            ..Default::default()
        }),
        selector: LabelSelector {
            match_labels: Some(selector.clone()),
            ..Default::default()
        },
        template: PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(pod_labels),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![build_container(cluster, node_set)],
                ..Default::default()
            }),
        },
        ..Default::default()
    };

    // Replicas are excluded so that scaling alone is not a template change
    let hashed = StatefulSetSpec {
        replicas: None,
        ..spec.clone()
    };
    let mut labels = selector;
    labels.insert(
        TEMPLATE_HASH_LABEL.to_string(),
        short_hash(&serde_json::to_vec(&hashed)?),
    );

    Ok(StatefulSet {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: cluster.namespace(),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    })
}

/// Headless Service giving the node set's pods stable DNS names
pub fn build_headless_service(cluster: &SearchCluster, node_set: &NodeSetSpec) -> Service {
    let cluster_name = cluster.name_any();
    let name = statefulset_name(&cluster_name, &node_set.name);
    let labels = label::new_statefulset_labels(&cluster_name, &name);

    Service {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: cluster.namespace(),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(labels),
            ports: Some(vec![
                ServicePort {
                    name: Some("http".to_string()),
                    protocol: Some("TCP".to_string()),
                    port: HTTP_PORT,
                    ..Default::default()
                },
                ServicePort {
                    name: Some("transport".to_string()),
                    protocol: Some("TCP".to_string()),
                    port: TRANSPORT_PORT,
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        status: None,
    }
}

#[instrument(skip(client, cluster, node_set), fields(name = %cluster.name_any(), node_set = %node_set.name))]
pub async fn reconcile_headless_service<C: PlatformClient>(
    client: &C,
    cluster: &SearchCluster,
    node_set: &NodeSetSpec,
) -> Result<ReconcileOutcome> {
    let expected = build_headless_service(cluster, node_set);
    let mut reconciled = Service::default();

    reconcile_resource(
        ReconcileParams::new(client)
            .owner(Owner::of(cluster))
            .expected(&expected)
            .reconciled(&mut reconciled)
            .needs_update(services::service_needs_update)
            .update_reconciled(services::update_reconciled_service),
    )
    .await
}

fn replicas_differ(expected: &StatefulSet, live: &StatefulSet) -> bool {
    expected.spec.as_ref().and_then(|s| s.replicas) != live.spec.as_ref().and_then(|s| s.replicas)
}

fn template_differs(expected: &StatefulSet, live: &StatefulSet) -> bool {
    template_hash_of(expected) != template_hash_of(live)
}

/// What happened to a node set's pod template during reconciliation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemplateChange {
    /// Live template already matches, or the StatefulSet was just created
    Unchanged,
    /// A new template was written, starting a rollout of this node set
    Applied,
    /// A template change is pending but was held back
    Deferred,
}

/// Create or update a node set's StatefulSet and return its live state.
///
/// With `defer_template` set, a template change on an existing StatefulSet is
/// held back while replica changes still apply.
#[instrument(skip(client, cluster, node_set), fields(name = %cluster.name_any(), node_set = %node_set.name))]
pub async fn reconcile_statefulset<C: PlatformClient>(
    client: &C,
    cluster: &SearchCluster,
    node_set: &NodeSetSpec,
    defer_template: bool,
) -> Result<(StatefulSet, TemplateChange)> {
    let expected = build_statefulset(cluster, node_set)?;
    let mut reconciled = StatefulSet::default();
    let mut template_applied = false;
    let applied = &mut template_applied;

    reconcile_resource(
        ReconcileParams::new(client)
            .owner(Owner::of(cluster))
            .expected(&expected)
            .reconciled(&mut reconciled)
            .needs_update(move |expected: &StatefulSet, live: &StatefulSet| {
                replicas_differ(expected, live)
                    || (!defer_template && template_differs(expected, live))
            })
            .update_reconciled(move |expected: &StatefulSet, live: &mut StatefulSet| {
                let replicas = expected.spec.as_ref().and_then(|s| s.replicas);
                if !defer_template && template_differs(expected, live) {
                    let selector = live.spec.as_ref().map(|s| s.selector.clone());
                    live.metadata.labels = expected.metadata.labels.clone();
                    live.spec = expected.spec.clone();
                    // selector is immutable once created
                    if let (Some(spec), Some(selector)) = (live.spec.as_mut(), selector) {
                        spec.selector = selector;
                    }
                    *applied = true;
                }
                live.metadata.owner_references = expected.metadata.owner_references.clone();
                if let Some(spec) = live.spec.as_mut() {
                    spec.replicas = replicas;
                }
            }),
    )
    .await?;

    let change = if template_applied {
        info!(statefulset = %reconciled.name_any(), "Applied template change");
        TemplateChange::Applied
    } else if defer_template && template_differs(&expected, &reconciled) {
        info!(
            statefulset = %reconciled.name_any(),
            "Deferring template change until the ongoing rollout completes"
        );
        TemplateChange::Deferred
    } else {
        TemplateChange::Unchanged
    };
    Ok((reconciled, change))
}
