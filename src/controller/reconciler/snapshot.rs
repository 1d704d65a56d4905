//! # Snapshot
//!
//! Everything a reconciliation pass reads, captured once at the start of the
//! pass. Components downstream of the watcher never talk to the API server,
//! they only see this value.

use crate::controller::bootstrap_token::BootstrapTokenSecret;
use crate::controller::reconciler::version::KubeVersion;
use crate::crd::{InstanceClassInfo, InstanceTypesCatalog, MachineDeploymentInfo, NodeGroup};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Errors decoding auxiliary inputs
///
/// These are reported per object, the pass continues without the input.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("key {key}: invalid JSON: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("key {key}: invalid YAML: {source}")]
    Yaml {
        key: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("key {key}: value is not valid UTF-8")]
    Utf8 { key: String },
}

/// Input tuple of one reconciliation pass
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// NodeGroups sorted by name
    pub node_groups: Vec<NodeGroup>,
    /// InstanceClasses of the currently subscribed kind
    pub instance_classes: Vec<InstanceClassInfo>,
    pub machine_deployments: Vec<MachineDeploymentInfo>,
    pub cloud_provider: Option<CloudProviderConfig>,
    pub catalog: InstanceTypesCatalog,
    pub globals: GlobalSettings,
    pub control_plane_arguments: Option<ControlPlaneArguments>,
    pub bootstrap_tokens: Vec<BootstrapTokenSecret>,
    pub timestamp: DateTime<Utc>,
}

impl Snapshot {
    /// An empty cluster at `timestamp`
    #[must_use]
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            node_groups: Vec::new(),
            instance_classes: Vec::new(),
            machine_deployments: Vec::new(),
            cloud_provider: None,
            catalog: InstanceTypesCatalog::default(),
            globals: GlobalSettings::default(),
            control_plane_arguments: None,
            bootstrap_tokens: Vec::new(),
            timestamp,
        }
    }

    /// Zones NodeGroups may use: MachineDeployment zones plus the provider defaults
    #[must_use]
    pub fn default_zones(&self) -> BTreeSet<String> {
        let mut zones: BTreeSet<String> = self
            .machine_deployments
            .iter()
            .filter_map(|md| md.zone.clone())
            .collect();
        if let Some(cloud) = &self.cloud_provider {
            zones.extend(cloud.zones.iter().cloned());
        }
        zones
    }

    #[must_use]
    pub fn instance_class(&self, name: &str) -> Option<&InstanceClassInfo> {
        self.instance_classes.iter().find(|ic| ic.name == name)
    }
}

/// Cluster-wide settings gathered from discovery and configuration objects
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalSettings {
    /// Version reported by the API server
    pub discovery_version: Option<KubeVersion>,
    /// Kubelet versions of the control-plane nodes
    pub control_plane_versions: Vec<KubeVersion>,
    pub cluster_configuration: ClusterConfiguration,
    pub cluster_uuid: String,
}

/// Relevant fields of `cluster-configuration.yaml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfiguration {
    /// Pinned version, `Automatic` means "follow the control plane"
    #[serde(default)]
    pub kubernetes_version: Option<String>,
    #[serde(default, rename = "defaultCRI")]
    pub default_cri: Option<String>,
    #[serde(default)]
    pub cloud: Option<CloudSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudSettings {
    #[serde(default)]
    pub prefix: Option<String>,
}

impl ClusterConfiguration {
    pub fn from_yaml(raw: &str) -> Result<Self, InputError> {
        serde_yaml::from_str(raw).map_err(|source| InputError::Yaml {
            key: crate::constants::CLUSTER_CONFIGURATION_KEY.to_string(),
            source,
        })
    }

    /// Explicitly pinned version, if any
    #[must_use]
    pub fn pinned_kubernetes_version(&self) -> Option<&str> {
        self.kubernetes_version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty() && *v != "Automatic")
    }

    #[must_use]
    pub fn cluster_prefix(&self) -> Option<&str> {
        self.cloud
            .as_ref()
            .and_then(|c| c.prefix.as_deref())
            .filter(|p| !p.is_empty())
    }
}

/// Decoded `d8-node-manager-cloud-provider` secret
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloudProviderConfig {
    /// Declared InstanceClass kind, empty when the provider has none
    pub instance_class_kind: String,
    /// Provider default zones
    pub zones: Vec<String>,
}

impl CloudProviderConfig {
    /// Every key of the secret holds either JSON or a bare string
    pub fn from_secret_data(data: &BTreeMap<String, Vec<u8>>) -> Result<Self, InputError> {
        let kind = match data.get("instanceClassKind") {
            Some(raw) => match decode_json_or_string("instanceClassKind", raw)? {
                serde_json::Value::String(s) => s,
                _ => String::new(),
            },
            None => String::new(),
        };

        let zones = match data.get("zones") {
            Some(raw) => match decode_json_or_string("zones", raw)? {
                serde_json::Value::Array(items) => items
                    .into_iter()
                    .filter_map(|z| z.as_str().map(ToString::to_string))
                    .collect(),
                serde_json::Value::String(s) if !s.is_empty() => vec![s],
                _ => Vec::new(),
            },
            None => Vec::new(),
        };

        Ok(Self {
            instance_class_kind: kind.trim().to_string(),
            zones,
        })
    }
}

/// Decoded `d8-control-plane-manager-control-plane-arguments` secret
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlPlaneArguments {
    /// `--node-monitor-grace-period` of the controller manager, in seconds
    pub node_monitor_grace_period: Option<i64>,
    /// Feature gates the control plane allows on kubelets
    pub kubelet_feature_gates: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArgumentsJson {
    #[serde(default)]
    node_monitor_grace_period: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct FeatureGatesJson {
    #[serde(default)]
    kubelet: Vec<String>,
}

impl ControlPlaneArguments {
    pub fn from_secret_data(data: &BTreeMap<String, Vec<u8>>) -> Result<Self, InputError> {
        let arguments: ArgumentsJson = match data.get("arguments.json") {
            Some(raw) => parse_json("arguments.json", raw)?,
            None => ArgumentsJson::default(),
        };
        let feature_gates: FeatureGatesJson = match data.get("featureGates.json") {
            Some(raw) => parse_json("featureGates.json", raw)?,
            None => FeatureGatesJson::default(),
        };
        Ok(Self {
            node_monitor_grace_period: arguments.node_monitor_grace_period,
            kubelet_feature_gates: feature_gates.kubelet,
        })
    }

    /// Kubelets report status four times per grace period
    #[must_use]
    pub fn node_status_update_frequency(&self) -> Option<i64> {
        self.node_monitor_grace_period
            .map(|grace| (grace as f64 / 4.0).round() as i64)
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(key: &str, raw: &[u8]) -> Result<T, InputError> {
    serde_json::from_slice(raw).map_err(|source| InputError::Json {
        key: key.to_string(),
        source,
    })
}

fn decode_json_or_string(key: &str, raw: &[u8]) -> Result<serde_json::Value, InputError> {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(raw) {
        return Ok(value);
    }
    let text = std::str::from_utf8(raw).map_err(|_| InputError::Utf8 {
        key: key.to_string(),
    })?;
    Ok(serde_json::Value::String(text.to_string()))
}
