//! External HTTP Service of a search cluster
//!
//! Every cluster is reachable through one Service named `<cluster>-http`.
//! While the HTTP scheme is being toggled the Service may point at pods that
//! still speak the old scheme, so `base_url` can bypass it and address a pod
//! directly.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Endpoints, Pod, Service, ServicePort, ServiceSpec};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use rand::seq::SliceRandom;
use tracing::{debug, instrument};

use super::client::PlatformClient;
use super::generic::{reconcile_resource, Owner, ReconcileParams};
use super::label::{self, HTTP_SCHEME_LABEL, STATEFULSET_NAME_LABEL};
use crate::crd::SearchCluster;
use crate::error::{Error, Result};

/// Port the engine serves HTTP on
pub const HTTP_PORT: i32 = 9200;

const GLOBAL_SERVICE_SUFFIX: &str = ".svc";
const DEFAULT_SERVICE_TYPE: &str = "ClusterIP";

pub fn external_service_name(cluster_name: &str) -> String {
    format!("{cluster_name}-http")
}

/// Stable in-cluster URL of the external Service
pub fn external_service_url(cluster: &SearchCluster) -> String {
    format!(
        "{}://{}.{}{}:{}",
        cluster.spec.http.scheme(),
        external_service_name(&cluster.name_any()),
        cluster.namespace().unwrap_or_default(),
        GLOBAL_SERVICE_SUFFIX,
        HTTP_PORT
    )
}

/// Expected external Service, built from the user's service template
pub fn new_external_service(cluster: &SearchCluster) -> Service {
    let template = &cluster.spec.http.service;
    let cluster_labels = label::new_labels(&cluster.name_any());

    let mut labels = template.labels.clone();
    labels.extend(cluster_labels.clone());

    Service {
        metadata: ObjectMeta {
            name: Some(external_service_name(&cluster.name_any())),
            namespace: cluster.namespace(),
            labels: Some(labels),
            annotations: if template.annotations.is_empty() {
                None
            } else {
                Some(template.annotations.clone())
            },
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: template.type_.clone(),
            selector: Some(cluster_labels),
            ports: Some(vec![ServicePort {
                name: Some(cluster.spec.http.scheme().to_string()),
                protocol: Some("TCP".to_string()),
                port: HTTP_PORT,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

fn is_subset(
    expected: Option<&BTreeMap<String, String>>,
    actual: Option<&BTreeMap<String, String>>,
) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    expected
        .iter()
        .all(|(k, v)| actual.and_then(|a| a.get(k)) == Some(v))
}

fn service_type(spec: Option<&ServiceSpec>) -> &str {
    spec.and_then(|s| s.type_.as_deref())
        .unwrap_or(DEFAULT_SERVICE_TYPE)
}

/// Name, port and protocol of each port; the API server fills in the rest
fn port_keys(spec: Option<&ServiceSpec>) -> Vec<(Option<String>, i32, String)> {
    spec.and_then(|s| s.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .map(|p| {
                    (
                        p.name.clone(),
                        p.port,
                        p.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

/// True when the live Service misses expected labels or annotations, or
/// routes differently
pub fn service_needs_update(expected: &Service, live: &Service) -> bool {
    let expected_spec = expected.spec.as_ref();
    let live_spec = live.spec.as_ref();

    !is_subset(expected.metadata.labels.as_ref(), live.metadata.labels.as_ref())
        || !is_subset(
            expected.metadata.annotations.as_ref(),
            live.metadata.annotations.as_ref(),
        )
        || expected_spec.and_then(|s| s.selector.as_ref())
            != live_spec.and_then(|s| s.selector.as_ref())
        || service_type(expected_spec) != service_type(live_spec)
        || port_keys(expected_spec) != port_keys(live_spec)
}

/// Apply the expected routing onto the live Service, keeping fields
/// allocated by the API server such as the cluster IP
pub fn update_reconciled_service(expected: &Service, live: &mut Service) {
    live.metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(expected.metadata.labels.clone().unwrap_or_default());
    if let Some(annotations) = &expected.metadata.annotations {
        live.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(annotations.clone());
    }
    live.metadata.owner_references = expected.metadata.owner_references.clone();

    let expected_spec = expected.spec.clone().unwrap_or_default();
    let live_spec = live.spec.get_or_insert_with(ServiceSpec::default);
    let type_changed = service_type(Some(&expected_spec)) != service_type(Some(&*live_spec));

    let previous_ports = live_spec.ports.take().unwrap_or_default();
    let ports = expected_spec
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|mut port| {
            if !type_changed {
                port.node_port = previous_ports
                    .iter()
                    .find(|p| p.name == port.name)
                    .and_then(|p| p.node_port);
            }
            port
        })
        .collect();

    live_spec.ports = Some(ports);
    live_spec.selector = expected_spec.selector;
    live_spec.type_ = expected_spec.type_;
}

/// Create or update the cluster's external Service and return its live state
#[instrument(skip(client, cluster), fields(name = %cluster.name_any(), namespace = cluster.namespace()))]
pub async fn reconcile_external_service<C: PlatformClient>(
    client: &C,
    cluster: &SearchCluster,
) -> Result<Service> {
    let expected = new_external_service(cluster);
    let mut reconciled = Service::default();

    let outcome = reconcile_resource(
        ReconcileParams::new(client)
            .owner(Owner::of(cluster))
            .expected(&expected)
            .reconciled(&mut reconciled)
            .needs_update(service_needs_update)
            .update_reconciled(update_reconciled_service),
    )
    .await?;

    debug!(?outcome, "Reconciled external service");
    Ok(reconciled)
}

pub async fn get_external_service<C: PlatformClient>(
    client: &C,
    cluster: &SearchCluster,
) -> Result<Option<Service>> {
    let namespace = cluster.namespace().unwrap_or_default();
    let name = external_service_name(&cluster.name_any());
    client
        .get::<Service>(&namespace, &name)
        .await
        .map_err(|source| Error::IoError {
            operation: "get",
            kind: "Service".to_string(),
            namespace,
            name,
            source,
        })
}

/// True if the Service has at least one ready endpoint address
pub async fn is_service_ready<C: PlatformClient>(client: &C, service: &Service) -> Result<bool> {
    let namespace = service.namespace().unwrap_or_default();
    let name = service.name_any();
    let endpoints = client
        .get::<Endpoints>(&namespace, &name)
        .await
        .map_err(|source| Error::IoError {
            operation: "get",
            kind: "Endpoints".to_string(),
            namespace,
            name,
            source,
        })?;

    Ok(endpoints
        .and_then(|e| e.subsets)
        .unwrap_or_default()
        .iter()
        .any(|subset| subset.addresses.as_ref().is_some_and(|a| !a.is_empty())))
}

/// URL the operator should use to reach the cluster.
///
/// When some pod still serves a scheme other than the one declared, requests
/// go to a random pod addressed through its StatefulSet's headless Service.
/// Otherwise, or when no pod carries the labels needed to address it, the
/// stable Service URL is returned.
pub fn base_url(cluster: &SearchCluster, pods: &[Pod]) -> String {
    let scheme = cluster.spec.http.scheme();
    let scheme_change = pods.iter().any(|p| {
        p.labels()
            .get(HTTP_SCHEME_LABEL)
            .is_some_and(|s| s != scheme)
    });

    if scheme_change {
        let addressable: Vec<(&Pod, &String, &String)> = pods
            .iter()
            .filter_map(|p| {
                let pod_scheme = p.labels().get(HTTP_SCHEME_LABEL)?;
                let sset = p.labels().get(STATEFULSET_NAME_LABEL)?;
                Some((p, pod_scheme, sset))
            })
            .collect();

        if let Some((pod, pod_scheme, sset)) = addressable.choose(&mut rand::thread_rng()) {
            debug!(pod = %pod.name_any(), "HTTP scheme change in progress, targeting pod directly");
            return format!(
                "{}://{}.{}.{}:{}",
                pod_scheme,
                pod.name_any(),
                sset,
                pod.namespace().unwrap_or_default(),
                HTTP_PORT
            );
        }
    }

    external_service_url(cluster)
}
