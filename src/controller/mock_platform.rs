//! Helpers for driving `MockPlatformClient` in unit tests

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use k8s_openapi::api::apps::v1::StatefulSet;
use kube::core::ErrorResponse;
use kube::ResourceExt;

use super::client::{ManagedResource, MockPlatformClient};

pub fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("mock platform: {reason}"),
        reason: reason.to_string(),
        code,
    })
}

fn selected<K: ManagedResource>(obj: &K, namespace: &str, labels: &BTreeMap<String, String>) -> bool {
    obj.namespace().as_deref() == Some(namespace)
        && labels.iter().all(|(k, v)| obj.labels().get(k) == Some(v))
}

fn named<K: ManagedResource>(objects: &[K], namespace: &str, name: &str) -> Option<K> {
    objects
        .iter()
        .find(|o| o.namespace().as_deref() == Some(namespace) && o.name_any() == name)
        .cloned()
}

/// Answer every get and list of `K` from a fixed set of live objects
pub fn serve<K: ManagedResource>(mock: &mut MockPlatformClient, objects: Vec<K>) {
    let live = objects.clone();
    mock.expect_get::<K>()
        .returning(move |namespace: &str, name: &str| Ok(named(&live, namespace, name)));
    mock.expect_list::<K>()
        .returning(move |namespace: &str, labels: &BTreeMap<String, String>| {
            Ok(objects
                .iter()
                .filter(|o| selected(*o, namespace, labels))
                .cloned()
                .collect())
        });
}

/// Serve StatefulSets as they are before this pass writes anything, then as
/// the platform reports them afterwards.
///
/// Gets and the first list return `before`; later lists return `after`.
pub fn serve_statefulsets(
    mock: &mut MockPlatformClient,
    before: Vec<StatefulSet>,
    after: Vec<StatefulSet>,
) {
    let lists = Arc::new(AtomicUsize::new(0));
    let live = before.clone();
    mock.expect_get::<StatefulSet>()
        .returning(move |namespace: &str, name: &str| Ok(named(&live, namespace, name)));
    mock.expect_list::<StatefulSet>()
        .returning(move |namespace: &str, labels: &BTreeMap<String, String>| {
            let items = if lists.fetch_add(1, Ordering::SeqCst) == 0 {
                &before
            } else {
                &after
            };
            Ok(items
                .iter()
                .filter(|o| selected(*o, namespace, labels))
                .cloned()
                .collect())
        });
}

/// Echo the written object back with a fresh resourceVersion
pub fn echo<K: ManagedResource>(obj: &K) -> Result<K, kube::Error> {
    let mut written = obj.clone();
    let next = written
        .meta()
        .resource_version
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    written.meta_mut().resource_version = Some(next.to_string());
    if written.meta().uid.is_none() {
        written.meta_mut().uid = Some(format!("uid-{}", written.name_any()));
    }
    Ok(written)
}
