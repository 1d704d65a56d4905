//! Common test utilities for reconciliation tests
//!
//! Builds in-memory clusters and drives passes against them.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use chrono::{Duration, Utc};
use node_manager_controller::cluster::{ClusterStore, MemoryClusterStore, MemoryState};
use node_manager_controller::config::ControllerConfig;
use node_manager_controller::controller::bootstrap_token::BootstrapTokenSecret;
use node_manager_controller::controller::reconciler::snapshot::CloudProviderConfig;
use node_manager_controller::controller::reconciler::values::NodeGroupValue;
use node_manager_controller::controller::reconciler::{
    run_pass, PassOutcome, Reconciler, TriggerSource,
};
use node_manager_controller::crd::{
    ClassReference, CloudInstances, InstanceClassInfo, NodeGroup, NodeGroupSpec, NodeType,
};
use std::sync::Arc;

pub const CLUSTER_UUID: &str = "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa";
pub const OPENSTACK: &str = "OpenStackInstanceClass";

pub fn node_group(name: &str, node_type: NodeType) -> NodeGroup {
    let mut ng = NodeGroup::new(
        name,
        NodeGroupSpec {
            node_type,
            ..NodeGroupSpec::default()
        },
    );
    ng.metadata.generation = Some(1);
    ng
}

pub fn cloud_node_group(
    name: &str,
    kind: &str,
    instance_class: &str,
    min_per_zone: i32,
    max_per_zone: i32,
    zones: Option<&[&str]>,
) -> NodeGroup {
    let mut ng = node_group(name, NodeType::CloudEphemeral);
    ng.spec.cloud_instances = Some(CloudInstances {
        class_reference: ClassReference {
            kind: kind.to_string(),
            name: instance_class.to_string(),
        },
        min_per_zone: Some(min_per_zone),
        max_per_zone: Some(max_per_zone),
        zones: zones.map(|z| z.iter().map(ToString::to_string).collect()),
        ..CloudInstances::default()
    });
    ng
}

pub fn instance_class(name: &str, spec: serde_json::Value) -> InstanceClassInfo {
    InstanceClassInfo {
        name: name.to_string(),
        spec,
    }
}

/// A cluster running `version` with no cloud provider
pub fn base_state(version: &str) -> MemoryState {
    let mut state = MemoryState::default();
    state.globals.discovery_version = Some(version.parse().unwrap());
    state.globals.cluster_uuid = CLUSTER_UUID.to_string();
    state
}

/// An OpenStack cluster with zones `eu-a`, `eu-b` and the IC `worker-big`
pub fn openstack_state() -> MemoryState {
    let mut state = base_state("v1.29.4");
    state.cloud_provider = Some(CloudProviderConfig {
        instance_class_kind: OPENSTACK.to_string(),
        zones: vec!["eu-a".to_string(), "eu-b".to_string()],
    });
    state.instance_classes.insert(
        OPENSTACK.to_string(),
        vec![instance_class("worker-big", serde_json::json!({"flavorName": "m1.large"}))],
    );
    state
}

pub fn reconciler(state: MemoryState) -> (Arc<MemoryClusterStore>, Reconciler) {
    let store = Arc::new(MemoryClusterStore::new(state));
    let reconciler = Reconciler::new(
        store.clone() as Arc<dyn ClusterStore>,
        Arc::new(ControllerConfig::default()),
    );
    (store, reconciler)
}

/// Run passes until one completes, following kind rebinds
pub async fn converge(reconciler: &Reconciler) {
    for _ in 0..3 {
        match run_pass(reconciler, TriggerSource::Resync).await.unwrap() {
            PassOutcome::Completed => return,
            PassOutcome::Rebound => {}
        }
    }
    panic!("reconciler kept rebinding");
}

/// Published value of `name`, if any
pub fn published(store: &MemoryClusterStore, name: &str) -> Option<NodeGroupValue> {
    store
        .state()
        .published
        .as_ref()?
        .node_manager
        .internal
        .node_groups
        .iter()
        .find(|v| v.name == name)
        .cloned()
}

/// Error written by the latest status patch of `name`
pub fn last_status_error(store: &MemoryClusterStore, name: &str) -> Option<String> {
    store
        .state()
        .status_patches
        .iter()
        .rev()
        .find(|p| p.name == name)
        .map(|p| p.error.clone())
}

/// Token created `created_ago` seconds ago, expiring in `expires_in` seconds
pub fn token(node_group: &str, id: &str, expires_in: i64, created_ago: i64) -> BootstrapTokenSecret {
    let now = Utc::now();
    BootstrapTokenSecret::new(
        node_group,
        id.to_string(),
        "0123456789abcdef".to_string(),
        now + Duration::seconds(expires_in),
        now - Duration::seconds(created_ago),
    )
}
