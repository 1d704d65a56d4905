//! # NodeGroup Spec
//!
//! Declarative description of a homogeneous set of nodes.

use crate::crd::schema::{int_or_string, preserve_unknown_fields};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// NodeGroup Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: deckhouse.io/v1
/// kind: NodeGroup
/// metadata:
///   name: worker
/// spec:
///   nodeType: CloudEphemeral
///   cloudInstances:
///     classReference:
///       kind: OpenStackInstanceClass
///       name: worker-big
///     minPerZone: 1
///     maxPerZone: 3
///     zones: [eu-a]
/// ```
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "NodeGroup",
    group = "deckhouse.io",
    version = "v1",
    status = "crate::crd::NodeGroupStatus",
    shortname = "ng",
    printcolumn = r#"{"name":"Type", "type":"string", "jsonPath":".spec.nodeType"}, {"name":"Ready", "type":"integer", "jsonPath":".status.ready"}, {"name":"Nodes", "type":"integer", "jsonPath":".status.nodes"}, {"name":"UpToDate", "type":"integer", "jsonPath":".status.upToDate"}, {"name":"Error", "type":"string", "jsonPath":".status.error"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupSpec {
    /// How nodes of the group are provisioned
    pub node_type: NodeType,
    /// Container runtime settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cri: Option<CriSpec>,
    /// Static instances managed through StaticInstance objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_instances: Option<StaticInstances>,
    /// Autoscaled cloud instances, required for `CloudEphemeral`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_instances: Option<CloudInstances>,
    /// Labels, annotations and taints applied to every node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_template: Option<NodeTemplate>,
    /// Chaos monkey settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chaos: Option<Chaos>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operating_system: Option<OperatingSystem>,
    /// How disruptive updates are approved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disruptions: Option<Disruptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubelet: Option<KubeletSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fencing: Option<Fencing>,
}

/// Provisioning model of a NodeGroup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum NodeType {
    CloudEphemeral,
    CloudPermanent,
    CloudStatic,
    #[default]
    Static,
}

impl NodeType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::CloudEphemeral => "CloudEphemeral",
            NodeType::CloudPermanent => "CloudPermanent",
            NodeType::CloudStatic => "CloudStatic",
            NodeType::Static => "Static",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container runtime flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum CriType {
    Docker,
    Containerd,
    ContainerdV2,
    NotManaged,
}

impl CriType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CriType::Docker => "Docker",
            CriType::Containerd => "Containerd",
            CriType::ContainerdV2 => "ContainerdV2",
            CriType::NotManaged => "NotManaged",
        }
    }

    /// Containerd flavours need kubelet 1.19+
    #[must_use]
    pub fn is_containerd(&self) -> bool {
        matches!(self, CriType::Containerd | CriType::ContainerdV2)
    }
}

impl fmt::Display for CriType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CriType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Docker" => Ok(CriType::Docker),
            "Containerd" => Ok(CriType::Containerd),
            "ContainerdV2" => Ok(CriType::ContainerdV2),
            "NotManaged" => Ok(CriType::NotManaged),
            other => Err(format!("unknown cri type {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CriSpec {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub cri_type: Option<CriType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containerd: Option<ContainerdSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_managed: Option<NotManagedSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerdSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_downloads: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DockerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_downloads: Option<i32>,
    /// `false` hands the runtime over to the operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manage: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotManagedSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cri_socket_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StaticInstances {
    #[serde(default)]
    pub count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub label_selector: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudInstances {
    pub class_reference: ClassReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_per_zone: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_zone: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable_per_zone: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_surge_per_zone: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zones: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "int_or_string")]
    pub standby: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standby_holder: Option<StandbyHolder>,
    /// Cluster autoscaler expander priority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quick_shutdown: Option<bool>,
}

impl CloudInstances {
    /// Scale-from-zero needs a known capacity to simulate an empty group
    #[must_use]
    pub fn scales_from_zero(&self) -> bool {
        self.min_per_zone == Some(0) && self.max_per_zone.is_some_and(|max| max > 0)
    }
}

/// Reference to an InstanceClass of a dynamic kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassReference {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StandbyHolder {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "int_or_string")]
    pub overprovisioning_rate: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub not_held_resources: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeTemplate {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<NodeTaint>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeTaint {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub effect: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Chaos {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatingSystem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manage_kernel: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Disruptions {
    /// Manual, Automatic or RollingUpdate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automatic: Option<AutomaticDisruptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_update: Option<RollingUpdateDisruptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutomaticDisruptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain_before_approval: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub windows: Vec<DisruptionWindow>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdateDisruptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub windows: Vec<DisruptionWindow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DisruptionWindow {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubeletSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pods: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_log_max_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_log_max_files: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub resource_reservation: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Fencing {
    /// Watchdog or Notify
    pub mode: String,
}
