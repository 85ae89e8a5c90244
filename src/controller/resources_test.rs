//! Unit tests for node set resource builders.
//!
//! Run with: `cargo test -p search-k8s resources_test`

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::apps::v1::StatefulSet;
    use k8s_openapi::api::core::v1::Service;

    use crate::controller::client::MockPlatformClient;
    use crate::controller::generic::ReconcileOutcome;
    use crate::controller::label::{
        has_label, CONFIG_HASH_LABEL, HTTP_SCHEME_LABEL, NODE_MASTER_LABEL, VERSION_LABEL,
    };
    use crate::controller::mock_platform::{echo, serve};
    use crate::controller::resources::{
        build_headless_service, build_statefulset, config_hash, reconcile_headless_service,
        reconcile_statefulset, statefulset_name, template_hash_of, TemplateChange,
    };
    use crate::crd::{NodeRoles, NodeSetSpec, SearchCluster, SearchClusterSpec};

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn node_set(name: &str, count: i32) -> NodeSetSpec {
        NodeSetSpec {
            name: name.to_string(),
            count,
            roles: NodeRoles::default(),
            config: BTreeMap::new(),
        }
    }

    fn cluster(version: &str) -> SearchCluster {
        let mut cluster = SearchCluster::new(
            "es",
            SearchClusterSpec {
                version: version.to_string(),
                image: None,
                http: Default::default(),
                node_sets: vec![node_set("default", 3)],
            },
        );
        cluster.metadata.namespace = Some("ns".to_string());
        cluster.metadata.uid = Some("cluster-uid".to_string());
        cluster
    }

    fn replicas(sset: &StatefulSet) -> Option<i32> {
        sset.spec.as_ref().and_then(|s| s.replicas)
    }

    fn image(sset: &StatefulSet) -> Option<String> {
        sset.spec.as_ref().and_then(|s| {
            s.template
                .spec
                .as_ref()
                .and_then(|p| p.containers[0].image.clone())
        })
    }

    const IMAGE_7_1: &str = "docker.elastic.co/elasticsearch/elasticsearch:7.1.0";
    const IMAGE_7_2: &str = "docker.elastic.co/elasticsearch/elasticsearch:7.2.0";

    /// StatefulSet as stored after an earlier pass at `version`
    fn live_statefulset(version: &str, count: i32) -> StatefulSet {
        let mut sset = build_statefulset(&cluster(version), &node_set("default", count)).unwrap();
        sset.metadata.resource_version = Some("5".to_string());
        sset
    }

    // -----------------------------------------------------------------------
    // Builders
    // -----------------------------------------------------------------------

    #[test]
    fn test_statefulset_name() {
        assert_eq!(statefulset_name("es", "masters"), "es-masters");
    }

    #[test]
    fn test_build_statefulset() {
        let es = cluster("7.1.0");
        let sset = build_statefulset(&es, &node_set("default", 3)).unwrap();

        assert_eq!(sset.metadata.name.as_deref(), Some("es-default"));
        assert_eq!(sset.metadata.namespace.as_deref(), Some("ns"));
        assert!(template_hash_of(&sset).is_some());

        let spec = sset.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(3));
        assert_eq!(spec.service_name, "es-default");
        assert_eq!(
            spec.update_strategy.as_ref().and_then(|s| s.type_.as_deref()),
            Some("RollingUpdate")
        );

        let pod_labels = spec
            .template
            .metadata
            .as_ref()
            .and_then(|m| m.labels.clone())
            .unwrap();
        assert!(has_label(VERSION_LABEL, "7.1.0", &pod_labels));
        assert!(has_label(HTTP_SCHEME_LABEL, "https", &pod_labels));
        assert!(NODE_MASTER_LABEL.has_value(true, &pod_labels));
        assert!(pod_labels.contains_key(CONFIG_HASH_LABEL));

        let selector = spec.selector.match_labels.clone().unwrap();
        assert!(selector.iter().all(|(k, v)| pod_labels.get(k) == Some(v)));

        assert_eq!(image(&sset).as_deref(), Some(IMAGE_7_1));
    }

    #[test]
    fn test_build_statefulset_rejects_bad_version() {
        assert!(build_statefulset(&cluster("seven"), &node_set("default", 1)).is_err());
    }

    #[test]
    fn test_template_hash_ignores_replicas() {
        let es = cluster("7.1.0");
        let three = build_statefulset(&es, &node_set("default", 3)).unwrap();
        let five = build_statefulset(&es, &node_set("default", 5)).unwrap();
        assert_eq!(template_hash_of(&three), template_hash_of(&five));

        let upgraded = build_statefulset(&cluster("7.2.0"), &node_set("default", 3)).unwrap();
        assert_ne!(template_hash_of(&three), template_hash_of(&upgraded));
    }

    #[test]
    fn test_config_hash_tracks_config() {
        let plain = node_set("default", 1);
        let mut tuned = node_set("default", 1);
        tuned
            .config
            .insert("indices.memory.index_buffer_size".to_string(), "20%".to_string());

        assert_eq!(config_hash(&plain).unwrap(), config_hash(&plain).unwrap());
        assert_ne!(config_hash(&plain).unwrap(), config_hash(&tuned).unwrap());
        assert!(config_hash(&plain).unwrap().len() <= 63);
    }

    #[test]
    fn test_fingerprints_are_lowercase_hex() {
        let hash = config_hash(&node_set("default", 1)).unwrap();
        assert_eq!(hash.len(), 32);
        assert!(hash
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));

        let sset = build_statefulset(&cluster("7.1.0"), &node_set("default", 1)).unwrap();
        assert_eq!(template_hash_of(&sset).map(str::len), Some(32));
    }

    #[test]
    fn test_build_headless_service() {
        let svc = build_headless_service(&cluster("7.1.0"), &node_set("default", 3));
        assert_eq!(svc.metadata.name.as_deref(), Some("es-default"));

        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.ports.unwrap().len(), 2);
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_reconcile_headless_service_creates_then_settles() {
        let es = cluster("7.1.0");
        let ns = node_set("default", 3);

        let mut client = MockPlatformClient::new();
        serve::<Service>(&mut client, vec![]);
        client
            .expect_create::<Service>()
            .times(1)
            .withf(|svc: &Service| {
                svc.spec.as_ref().and_then(|s| s.cluster_ip.as_deref()) == Some("None")
            })
            .returning(echo);
        assert_eq!(
            reconcile_headless_service(&client, &es, &ns).await.unwrap(),
            ReconcileOutcome::Created
        );

        let mut client = MockPlatformClient::new();
        serve(&mut client, vec![build_headless_service(&es, &ns)]);
        assert_eq!(
            reconcile_headless_service(&client, &es, &ns).await.unwrap(),
            ReconcileOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn test_reconcile_statefulset_create_is_not_a_template_change() {
        let mut client = MockPlatformClient::new();
        serve::<StatefulSet>(&mut client, vec![]);
        client.expect_create::<StatefulSet>().times(1).returning(echo);

        let (created, change) =
            reconcile_statefulset(&client, &cluster("7.1.0"), &node_set("default", 3), false)
                .await
                .unwrap();

        assert_eq!(change, TemplateChange::Unchanged);
        assert_eq!(
            created.metadata.owner_references.unwrap()[0].uid,
            "cluster-uid"
        );
    }

    #[tokio::test]
    async fn test_reconcile_statefulset_applies_template_change() {
        let mut client = MockPlatformClient::new();
        serve(&mut client, vec![live_statefulset("7.1.0", 3)]);
        client
            .expect_update::<StatefulSet>()
            .times(1)
            .withf(|sset: &StatefulSet| image(sset).as_deref() == Some(IMAGE_7_2))
            .returning(echo);

        let (updated, change) =
            reconcile_statefulset(&client, &cluster("7.2.0"), &node_set("default", 3), false)
                .await
                .unwrap();

        assert_eq!(change, TemplateChange::Applied);
        assert_eq!(image(&updated).as_deref(), Some(IMAGE_7_2));
        assert_eq!(updated.metadata.resource_version.as_deref(), Some("6"));
    }

    #[tokio::test]
    async fn test_reconcile_statefulset_defers_template_change() {
        let mut client = MockPlatformClient::new();
        serve(&mut client, vec![live_statefulset("7.1.0", 3)]);

        let (live, change) =
            reconcile_statefulset(&client, &cluster("7.2.0"), &node_set("default", 3), true)
                .await
                .unwrap();

        assert_eq!(change, TemplateChange::Deferred);
        assert_eq!(image(&live).as_deref(), Some(IMAGE_7_1));
    }

    #[tokio::test]
    async fn test_reconcile_statefulset_scales_while_deferring() {
        let mut client = MockPlatformClient::new();
        serve(&mut client, vec![live_statefulset("7.1.0", 3)]);
        client
            .expect_update::<StatefulSet>()
            .times(1)
            .withf(|sset: &StatefulSet| {
                replicas(sset) == Some(5) && image(sset).as_deref() == Some(IMAGE_7_1)
            })
            .returning(echo);

        let (live, change) =
            reconcile_statefulset(&client, &cluster("7.2.0"), &node_set("default", 5), true)
                .await
                .unwrap();

        assert_eq!(change, TemplateChange::Deferred);
        assert_eq!(replicas(&live), Some(5), "replica changes always apply");
        assert_eq!(image(&live).as_deref(), Some(IMAGE_7_1));
    }

    #[tokio::test]
    async fn test_reconcile_statefulset_creates_while_deferring() {
        let mut client = MockPlatformClient::new();
        serve::<StatefulSet>(&mut client, vec![]);
        client
            .expect_create::<StatefulSet>()
            .times(1)
            .withf(|sset: &StatefulSet| sset.metadata.name.as_deref() == Some("es-data"))
            .returning(echo);

        let (created, change) =
            reconcile_statefulset(&client, &cluster("7.1.0"), &node_set("data", 2), true)
                .await
                .unwrap();

        assert_eq!(change, TemplateChange::Unchanged);
        assert_eq!(replicas(&created), Some(2));
    }
}
