//! # Value Emitter
//!
//! The value tree consumed by the node bootstrap templates. It is rebuilt from
//! scratch on every pass and published as a whole under
//! `nodeManager.internal`.

use crate::controller::reconciler::snapshot::Snapshot;
use crate::crd::{
    Chaos, CloudInstances, CriSpec, Disruptions, Fencing, InstanceType, KubeletSpec, NodeGroup,
    NodeTemplate, NodeType, OperatingSystem, StaticInstances,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Derived value of one NodeGroup
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupValue {
    pub name: String,
    pub node_type: NodeType,
    /// Input `cri` block with the resolved `type`
    pub cri: CriSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_instances: Option<StaticInstances>,
    /// Input `cloudInstances` block with resolved `zones`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_instances: Option<CloudInstances>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_template: Option<NodeTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chaos: Option<Chaos>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operating_system: Option<OperatingSystem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disruptions: Option<Disruptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubelet: Option<KubeletSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fencing: Option<Fencing>,
    #[serde(rename = "manualRolloutID", default, skip_serializing_if = "Option::is_none")]
    pub manual_rollout_id: Option<String>,
    /// Effective `major.minor` version
    pub kubernetes_version: String,
    /// Unix timestamp (decimal string) closing the current rollout window
    pub update_epoch: String,
    /// Embedded InstanceClass spec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_class: Option<serde_json::Value>,
    /// Simulated node for scale-from-zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_capacity: Option<InstanceType>,
}

impl NodeGroupValue {
    /// Resolved runtime, as published
    #[must_use]
    pub fn cri_type(&self) -> &'static str {
        self.cri.cri_type.map_or("", |c| c.as_str())
    }
}

/// `nodeManager.internal`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalValues {
    #[serde(default)]
    pub node_groups: Vec<NodeGroupValue>,
    /// `<ngName>` -> `<tokenId>.<tokenSecret>`
    #[serde(default)]
    pub bootstrap_tokens: BTreeMap<String, String>,
    /// Priority -> node name patterns; absent when no group declares a priority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_autoscaler_priorities: Option<BTreeMap<i32, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_status_update_frequency: Option<i64>,
    #[serde(default)]
    pub allowed_kubelet_feature_gates: Vec<String>,
    #[serde(default)]
    pub upmeter_discovery: UpmeterDiscovery,
    #[serde(default)]
    pub packages_proxy: PackagesProxy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpmeterDiscovery {
    #[serde(default)]
    pub ephemeral_node_group_names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PackagesProxy {
    #[serde(default)]
    pub port: u16,
}

/// Root of the published document
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuesDocument {
    pub node_manager: NodeManagerValues,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct NodeManagerValues {
    pub internal: InternalValues,
}

impl ValuesDocument {
    #[must_use]
    pub fn new(internal: InternalValues) -> Self {
        Self {
            node_manager: NodeManagerValues { internal },
        }
    }
}

/// Assemble the cluster-scoped values around the reconciled NodeGroup list
#[must_use]
pub fn build_internal_values(
    node_groups: Vec<NodeGroupValue>,
    bootstrap_tokens: BTreeMap<String, String>,
    snapshot: &Snapshot,
    packages_proxy_port: u16,
) -> InternalValues {
    let prefix = snapshot
        .globals
        .cluster_configuration
        .cluster_prefix()
        .unwrap_or_default();
    let arguments = snapshot.control_plane_arguments.as_ref();

    InternalValues {
        node_groups,
        bootstrap_tokens,
        cluster_autoscaler_priorities: autoscaler_priorities(&snapshot.node_groups, prefix),
        node_status_update_frequency: arguments.and_then(|a| a.node_status_update_frequency()),
        allowed_kubelet_feature_gates: arguments
            .map(|a| a.kubelet_feature_gates.clone())
            .unwrap_or_default(),
        upmeter_discovery: UpmeterDiscovery {
            ephemeral_node_group_names: ephemeral_node_group_names(&snapshot.node_groups),
        },
        packages_proxy: PackagesProxy {
            port: packages_proxy_port,
        },
    }
}

/// Expander priorities for the cluster autoscaler
///
/// Every group with a priority contributes a pattern matching its machine
/// names. The lowest bucket always catches everything else.
#[must_use]
pub fn autoscaler_priorities(
    node_groups: &[NodeGroup],
    prefix: &str,
) -> Option<BTreeMap<i32, Vec<String>>> {
    let mut buckets: BTreeMap<i32, Vec<String>> = BTreeMap::new();
    for ng in node_groups {
        if ng.spec.node_type != NodeType::CloudEphemeral {
            continue;
        }
        let Some(priority) = ng.spec.cloud_instances.as_ref().and_then(|c| c.priority) else {
            continue;
        };
        let name = ng.metadata.name.as_deref().unwrap_or_default();
        buckets
            .entry(priority)
            .or_default()
            .push(format!("^{prefix}-{name}-[0-9a-zA-Z]+$"));
    }

    if buckets.is_empty() {
        return None;
    }

    for patterns in buckets.values_mut() {
        patterns.sort();
    }
    buckets.entry(1).or_default().push(".*".to_string());
    Some(buckets)
}

/// Groups upmeter probes for ephemeral node availability
#[must_use]
pub fn ephemeral_node_group_names(node_groups: &[NodeGroup]) -> Vec<String> {
    let mut names: Vec<String> = node_groups
        .iter()
        .filter(|ng| ng.spec.node_type == NodeType::CloudEphemeral)
        .filter(|ng| {
            ng.spec
                .cloud_instances
                .as_ref()
                .and_then(|c| c.min_per_zone)
                .is_some_and(|min| min >= 1)
        })
        .filter_map(|ng| ng.metadata.name.clone())
        .collect();
    names.sort();
    names
}
