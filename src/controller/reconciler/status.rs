//! # Status Writer
//!
//! NodeGroup and InstanceClass status merge patches. A failed patch is
//! logged and counted; the next pass writes the same content again.

use crate::cluster::ClusterStore;
use crate::crd::{InstanceClassKind, NodeGroup, NodeType};
use crate::observability::metrics;
use crate::controller::reconciler::snapshot::Snapshot;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// `status` of one NodeGroup after a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeGroupStatusPatch {
    pub name: String,
    /// Empty string clears a previous error
    pub error: String,
    /// Only set for groups that reconciled successfully
    pub kubernetes_version: Option<String>,
    pub observed_generation: Option<i64>,
}

impl NodeGroupStatusPatch {
    #[must_use]
    pub fn success(ng: &NodeGroup, kubernetes_version: String) -> Self {
        Self {
            name: ng.metadata.name.clone().unwrap_or_default(),
            error: String::new(),
            kubernetes_version: Some(kubernetes_version),
            observed_generation: ng.metadata.generation,
        }
    }

    #[must_use]
    pub fn failure(ng: &NodeGroup, error: String) -> Self {
        Self {
            name: ng.metadata.name.clone().unwrap_or_default(),
            error,
            kubernetes_version: None,
            observed_generation: ng.metadata.generation,
        }
    }

    /// Merge patch body for the status subresource
    #[must_use]
    pub fn to_patch(&self) -> Value {
        let mut status = json!({ "error": self.error });
        if let Some(version) = &self.kubernetes_version {
            status["kubernetesVersion"] = json!(version);
        }
        if let Some(generation) = self.observed_generation {
            status["observedGeneration"] = json!(generation);
        }
        json!({ "status": status })
    }
}

/// Sorted CloudEphemeral consumers of every InstanceClass in the snapshot
///
/// Classes nobody references get an empty list.
#[must_use]
pub fn instance_class_consumers(snapshot: &Snapshot) -> BTreeMap<String, Vec<String>> {
    let mut consumers: BTreeMap<String, Vec<String>> = snapshot
        .instance_classes
        .iter()
        .map(|ic| (ic.name.clone(), Vec::new()))
        .collect();

    for ng in &snapshot.node_groups {
        if ng.spec.node_type != NodeType::CloudEphemeral {
            continue;
        }
        let Some(cloud) = &ng.spec.cloud_instances else {
            continue;
        };
        if let Some(names) = consumers.get_mut(&cloud.class_reference.name) {
            names.extend(ng.metadata.name.clone());
        }
    }

    for names in consumers.values_mut() {
        names.sort();
    }
    consumers
}

/// Merge patch body for an InstanceClass status
#[must_use]
pub fn consumers_patch(consumers: &[String]) -> Value {
    json!({ "status": { "nodeGroupConsumers": consumers } })
}

/// Flush status patches, never failing the pass
pub async fn write_statuses(
    store: &dyn ClusterStore,
    node_groups: &[NodeGroupStatusPatch],
    kind: Option<&InstanceClassKind>,
    consumers: &BTreeMap<String, Vec<String>>,
) {
    for patch in node_groups {
        if let Err(e) = store.patch_node_group_status(patch).await {
            warn!(node_group = %patch.name, "Failed to patch NodeGroup status: {e:#}");
            metrics::increment_status_patch_failures();
        }
    }

    let Some(kind) = kind else {
        return;
    };
    for (name, names) in consumers {
        if let Err(e) = store.patch_instance_class_status(kind, name, names).await {
            warn!(instance_class = %name, kind = %kind.kind, "Failed to patch InstanceClass status: {e:#}");
            metrics::increment_status_patch_failures();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ClassReference, CloudInstances, InstanceClassInfo, NodeGroupSpec};
    use chrono::Utc;

    fn cloud_ng(name: &str, ic: &str, node_type: NodeType) -> NodeGroup {
        NodeGroup::new(
            name,
            NodeGroupSpec {
                node_type,
                cloud_instances: Some(CloudInstances {
                    class_reference: ClassReference {
                        kind: "OpenStackInstanceClass".to_string(),
                        name: ic.to_string(),
                    },
                    ..CloudInstances::default()
                }),
                ..NodeGroupSpec::default()
            },
        )
    }

    #[test]
    fn test_patch_bodies() {
        let mut ng = cloud_ng("worker", "big", NodeType::CloudEphemeral);
        ng.metadata.generation = Some(3);

        let ok = NodeGroupStatusPatch::success(&ng, "1.29".to_string()).to_patch();
        assert_eq!(
            ok,
            json!({"status": {"error": "", "kubernetesVersion": "1.29", "observedGeneration": 3}})
        );

        let failed = NodeGroupStatusPatch::failure(&ng, "boom".to_string()).to_patch();
        assert_eq!(failed, json!({"status": {"error": "boom", "observedGeneration": 3}}));
    }

    #[test]
    fn test_consumers() {
        let mut snapshot = Snapshot::empty(Utc::now());
        for name in ["big", "small", "unused"] {
            snapshot.instance_classes.push(InstanceClassInfo {
                name: name.to_string(),
                spec: json!({}),
            });
        }
        snapshot.node_groups = vec![
            cloud_ng("zeta", "big", NodeType::CloudEphemeral),
            cloud_ng("alpha", "big", NodeType::CloudEphemeral),
            cloud_ng("perm", "small", NodeType::CloudPermanent),
            cloud_ng("lost", "missing", NodeType::CloudEphemeral),
        ];

        let consumers = instance_class_consumers(&snapshot);
        assert_eq!(consumers["big"], vec!["alpha", "zeta"]);
        assert!(consumers["small"].is_empty());
        assert!(consumers["unused"].is_empty());
        assert!(!consumers.contains_key("missing"));
        assert_eq!(
            consumers_patch(&consumers["unused"]),
            json!({"status": {"nodeGroupConsumers": []}})
        );
    }
}
