//! # Reconciliation Scenario Tests
//!
//! Full passes against an in-memory cluster.
//!
//! These tests verify:
//! - Validation errors are sticky and keep the last good value published
//! - Scale-from-zero capacity resolution
//! - CRI defaults and the containerd version gate
//! - updateEpoch stepping
//! - Idempotence of repeated passes
//! - InstanceClass consumers
//! - Following InstanceClass kind changes

mod common;

use common::*;
use node_manager_controller::controller::reconciler::derivation::epoch::{
    epoch_drift, update_epoch,
};
use node_manager_controller::controller::reconciler::snapshot::CloudProviderConfig;
use node_manager_controller::controller::reconciler::values::{
    InternalValues, NodeGroupValue, ValuesDocument,
};
use node_manager_controller::controller::reconciler::{
    run_pass, PassOutcome, ReconcilerError, TriggerSource,
};
use node_manager_controller::crd::{CriSpec, CriType, InstanceType, NodeType};
use serde_json::json;

const ACME: &str = "AcmeInstanceClass";

#[tokio::test]
async fn test_unknown_zones_keep_last_good_value() {
    let mut state = openstack_state();
    state.node_groups = vec![cloud_node_group(
        "worker",
        OPENSTACK,
        "worker-big",
        1,
        3,
        Some(&["eu-a", "eu-z"]),
    )];
    let (store, reconciler) = reconciler(state);

    // No earlier value: excluded, plain error
    converge(&reconciler).await;
    assert_eq!(
        last_status_error(&store, "worker").as_deref(),
        Some("unknown cloudInstances.zones: [eu-z]")
    );
    assert_eq!(published(&store, "worker"), None);

    // Fixed: published, error cleared
    store.state().node_groups[0]
        .spec
        .cloud_instances
        .as_mut()
        .unwrap()
        .zones = Some(vec!["eu-a".to_string()]);
    run_pass(&reconciler, TriggerSource::NodeGroupEvent).await.unwrap();
    assert_eq!(last_status_error(&store, "worker").as_deref(), Some(""));
    let good = published(&store, "worker").unwrap();
    assert_eq!(good.kubernetes_version, "1.29");
    assert_eq!(good.instance_class, Some(json!({"flavorName": "m1.large"})));

    // Broken again: error carries the suffix and the good value stays
    store.state().node_groups[0]
        .spec
        .cloud_instances
        .as_mut()
        .unwrap()
        .zones = Some(vec!["eu-a".to_string(), "eu-z".to_string()]);
    run_pass(&reconciler, TriggerSource::NodeGroupEvent).await.unwrap();
    assert_eq!(
        last_status_error(&store, "worker").as_deref(),
        Some("unknown cloudInstances.zones: [eu-z] Earlier stored version of NG is in use now!")
    );
    assert_eq!(published(&store, "worker"), Some(good));
    let status = store.state().node_groups[0].status.clone().unwrap();
    assert_eq!(status.kubernetes_version.as_deref(), Some("1.29"));
}

#[tokio::test]
async fn test_seeded_value_is_carried_after_restart() {
    let mut state = openstack_state();
    state.node_groups = vec![cloud_node_group(
        "worker",
        OPENSTACK,
        "missing",
        1,
        3,
        None,
    )];
    let previous = NodeGroupValue {
        name: "worker".to_string(),
        node_type: NodeType::CloudEphemeral,
        cri: CriSpec {
            cri_type: Some(CriType::Containerd),
            ..CriSpec::default()
        },
        static_instances: None,
        cloud_instances: None,
        node_template: None,
        chaos: None,
        operating_system: None,
        disruptions: None,
        kubelet: None,
        fencing: None,
        manual_rollout_id: None,
        kubernetes_version: "1.28".to_string(),
        update_epoch: "1".to_string(),
        instance_class: None,
        node_capacity: None,
    };
    state.published = Some(ValuesDocument::new(InternalValues {
        node_groups: vec![previous.clone()],
        ..InternalValues::default()
    }));
    let (store, reconciler) = reconciler(state);

    assert_eq!(reconciler.seed_last_published().await.unwrap(), 1);
    converge(&reconciler).await;

    assert_eq!(
        last_status_error(&store, "worker").as_deref(),
        Some(
            "Wrong classReference: There is no valid instance class missing of type OpenStackInstanceClass. Earlier stored version of NG is in use now!"
        )
    );
    assert_eq!(published(&store, "worker"), Some(previous));
}

#[tokio::test]
async fn test_scale_from_zero_without_capacity() {
    let mut state = base_state("v1.29.4");
    state.cloud_provider = Some(CloudProviderConfig {
        instance_class_kind: ACME.to_string(),
        zones: Vec::new(),
    });
    state
        .instance_classes
        .insert(ACME.to_string(), vec![instance_class("small", json!({"type": "s1"}))]);
    state.node_groups = vec![cloud_node_group("w0", ACME, "small", 0, 3, None)];
    let (store, reconciler) = reconciler(state);

    converge(&reconciler).await;
    let error = last_status_error(&store, "w0").unwrap();
    assert!(error.contains("capacity is not set"), "{error}");
    assert_eq!(published(&store, "w0"), None);

    // A catalog entry makes the group valid and fills nodeCapacity
    store.state().catalog.instance_types.push(InstanceType {
        name: "s1".to_string(),
        cpu: k8s_openapi::apimachinery::pkg::api::resource::Quantity("2".to_string()),
        memory: k8s_openapi::apimachinery::pkg::api::resource::Quantity("4Gi".to_string()),
        root_disk: None,
    });
    run_pass(&reconciler, TriggerSource::CatalogEvent).await.unwrap();
    assert_eq!(last_status_error(&store, "w0").as_deref(), Some(""));
    let capacity = published(&store, "w0").unwrap().node_capacity.unwrap();
    assert_eq!(capacity.name, "s1");
    assert_eq!(capacity.memory.0, "4Gi");
}

#[tokio::test]
async fn test_docker_is_default_before_containerd() {
    let mut state = base_state("v1.18.3");
    state.node_groups = vec![node_group("static0", NodeType::Static)];
    let (store, reconciler) = reconciler(state);

    converge(&reconciler).await;
    assert_eq!(last_status_error(&store, "static0").as_deref(), Some(""));
    let value = published(&store, "static0").unwrap();
    assert_eq!(value.cri_type(), "Docker");
    assert_eq!(value.kubernetes_version, "1.18");
}

#[tokio::test]
async fn test_containerd_on_old_cluster_aborts_pass() {
    let mut state = base_state("v1.18.3");
    let mut ng = node_group("static0", NodeType::Static);
    ng.spec.cri = Some(CriSpec {
        cri_type: Some(CriType::Containerd),
        ..CriSpec::default()
    });
    state.node_groups = vec![ng];
    let (store, reconciler) = reconciler(state);

    let err = run_pass(&reconciler, TriggerSource::Startup).await.unwrap_err();
    assert_eq!(err.to_string(), "cri type Containerd is allowed only for kubernetes 1.19+");

    let state = store.state();
    assert_eq!(state.publish_count, 0);
    assert!(state.status_patches.is_empty());
    assert!(state.created_tokens.is_empty());
}

#[test]
fn test_update_epoch_steps_every_window() {
    let drift = epoch_drift(CLUSTER_UUID, "w");
    let window = 4 * 60 * 60;
    let ts1 = drift + window * 120_000;
    let ts2 = ts1 + window;

    assert!(update_epoch(ts1, CLUSTER_UUID, "w") < update_epoch(ts2, CLUSTER_UUID, "w"));
    assert_eq!(
        update_epoch(ts2, CLUSTER_UUID, "w") - update_epoch(ts1, CLUSTER_UUID, "w"),
        window
    );
    // Constant between the steps
    assert_eq!(update_epoch(ts1 + 1, CLUSTER_UUID, "w"), update_epoch(ts2, CLUSTER_UUID, "w"));
    assert_eq!(update_epoch(ts2 - 1, CLUSTER_UUID, "w"), update_epoch(ts2, CLUSTER_UUID, "w"));
}

#[tokio::test]
async fn test_control_plane_caps_version() {
    let mut state = base_state("v1.29.4");
    state.globals.control_plane_versions = vec!["1.28.9".parse().unwrap(), "1.27.5".parse().unwrap()];
    state.node_groups = vec![node_group("static0", NodeType::Static)];
    let (store, reconciler) = reconciler(state);

    converge(&reconciler).await;
    assert_eq!(published(&store, "static0").unwrap().kubernetes_version, "1.27");
}

#[tokio::test]
async fn test_repeated_pass_is_idempotent() {
    let mut state = openstack_state();
    state.node_groups = vec![
        cloud_node_group("worker", OPENSTACK, "worker-big", 1, 3, Some(&["eu-a"])),
        node_group("static0", NodeType::Static),
    ];
    let (store, reconciler) = reconciler(state);

    converge(&reconciler).await;
    let first = store.state().clone();
    run_pass(&reconciler, TriggerSource::Resync).await.unwrap();
    let second = store.state().clone();

    let without_epoch = |doc: &ValuesDocument| {
        let mut doc = doc.clone();
        for value in &mut doc.node_manager.internal.node_groups {
            value.update_epoch.clear();
        }
        doc
    };
    assert_eq!(
        without_epoch(first.published.as_ref().unwrap()),
        without_epoch(second.published.as_ref().unwrap())
    );
    assert_eq!(first.created_tokens, second.created_tokens);
    assert_eq!(first.deleted_tokens, second.deleted_tokens);
    assert_eq!(
        second.status_patches[first.status_patches.len()..],
        first.status_patches[first.status_patches.len() - 2..]
    );
}

#[tokio::test]
async fn test_instance_class_consumers() {
    let mut state = openstack_state();
    state.instance_classes.get_mut(OPENSTACK).unwrap().push(instance_class("spare", json!({})));
    state.node_groups = vec![
        cloud_node_group("b", OPENSTACK, "worker-big", 1, 1, None),
        cloud_node_group("a", OPENSTACK, "worker-big", 1, 1, None),
        node_group("c", NodeType::Static),
    ];
    let (store, reconciler) = reconciler(state);

    converge(&reconciler).await;
    let state = store.state();
    assert_eq!(
        state.instance_class_consumers[&(OPENSTACK.to_string(), "worker-big".to_string())],
        vec!["a".to_string(), "b".to_string()]
    );
    assert!(state.instance_class_consumers[&(OPENSTACK.to_string(), "spare".to_string())].is_empty());
}

#[tokio::test]
async fn test_kind_changes_rebind_before_reconciling() {
    let mut state = openstack_state();
    state.node_groups = vec![cloud_node_group("worker", OPENSTACK, "worker-big", 1, 3, None)];
    state
        .instance_classes
        .insert(ACME.to_string(), vec![instance_class("worker-big", json!({}))]);
    let (store, reconciler) = reconciler(state);

    // Enable
    assert_eq!(
        run_pass(&reconciler, TriggerSource::Startup).await.unwrap(),
        PassOutcome::Rebound
    );
    assert_eq!(store.state().publish_count, 0);
    assert_eq!(
        run_pass(&reconciler, TriggerSource::InstanceClassEvent).await.unwrap(),
        PassOutcome::Completed
    );
    assert!(published(&store, "worker").is_some());

    // UpdateKind: the group now references the wrong kind
    store.state().cloud_provider.as_mut().unwrap().instance_class_kind = ACME.to_string();
    assert_eq!(
        run_pass(&reconciler, TriggerSource::SecretEvent).await.unwrap(),
        PassOutcome::Rebound
    );
    converge(&reconciler).await;
    assert_eq!(
        last_status_error(&store, "worker").as_deref(),
        Some(
            "Wrong classReference: Kind OpenStackInstanceClass is not allowed, the only allowed kind is AcmeInstanceClass. Earlier stored version of NG is in use now!"
        )
    );

    // Disable: no kind, no InstanceClass checks
    store.state().cloud_provider = None;
    assert_eq!(
        run_pass(&reconciler, TriggerSource::SecretEvent).await.unwrap(),
        PassOutcome::Rebound
    );
    converge(&reconciler).await;
    assert_eq!(last_status_error(&store, "worker").as_deref(), Some(""));
    assert_eq!(reconciler.kind_resolver.subscribed(), None);
}

#[tokio::test]
async fn test_values_failure_keeps_previous_state() {
    let mut state = base_state("v1.29.4");
    state.node_groups = vec![node_group("static0", NodeType::Static)];
    state.failing_writes.insert("values".to_string());
    let (store, reconciler) = reconciler(state);

    let err = run_pass(&reconciler, TriggerSource::Startup).await.unwrap_err();
    assert!(matches!(err, ReconcilerError::Store(_)), "{err:?}");
    assert_eq!(err.to_string(), "Cluster store error: injected write failure for values");
    assert!(reconciler.last_published.lock().await.is_empty());

    store.state().failing_writes.clear();
    converge(&reconciler).await;
    assert!(reconciler.last_published.lock().await.contains_key("static0"));
}

#[tokio::test]
async fn test_status_patch_failure_is_not_fatal() {
    let mut state = base_state("v1.29.4");
    state.node_groups = vec![node_group("static0", NodeType::Static)];
    state.failing_writes.insert("static0".to_string());
    let (store, reconciler) = reconciler(state);

    converge(&reconciler).await;
    assert!(published(&store, "static0").is_some());
    assert!(store.state().status_patches.is_empty());
}

#[tokio::test]
async fn test_unknown_version_fails_pass() {
    let mut state = base_state("v1.29.4");
    state.globals.discovery_version = None;
    state.node_groups = vec![node_group("static0", NodeType::Static)];
    let (_store, reconciler) = reconciler(state);

    let err = run_pass(&reconciler, TriggerSource::Startup).await.unwrap_err();
    assert!(err.to_string().contains("kubernetes version is unknown"));
}
