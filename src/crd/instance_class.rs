//! # InstanceClass
//!
//! InstanceClasses are provider-specific and their kind is only known at
//! runtime (`instanceClassKind` in the cloud provider secret), so they are
//! handled as [`DynamicObject`]s and reduced to the parts the reconciler uses.

use crate::constants::INSTANCE_CLASS_GROUP;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::ResourceExt;

/// Kinds that are still served at `v1alpha1`
///
/// Every other InstanceClass kind is served at `deckhouse.io/v1`.
pub const V1ALPHA1_INSTANCE_CLASS_KINDS: &[&str] = &[
    "DVPInstanceClass",
    "DynamixInstanceClass",
    "HuaweiCloudInstanceClass",
    "ZvirtInstanceClass",
];

/// A bound InstanceClass kind together with the version it is served at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceClassKind {
    pub kind: String,
    pub version: String,
}

impl InstanceClassKind {
    /// Resolve the served version of `kind` from the static table
    #[must_use]
    pub fn new(kind: &str) -> Self {
        let version = if V1ALPHA1_INSTANCE_CLASS_KINDS.contains(&kind) {
            "v1alpha1"
        } else {
            "v1"
        };
        Self {
            kind: kind.to_string(),
            version: version.to_string(),
        }
    }

    /// `deckhouse.io/<version>`
    #[must_use]
    pub fn api_version(&self) -> String {
        format!("{INSTANCE_CLASS_GROUP}/{}", self.version)
    }

    #[must_use]
    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk(
            INSTANCE_CLASS_GROUP,
            &self.version,
            &self.kind,
        ))
    }
}

/// The parts of an InstanceClass the reconciler cares about
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceClassInfo {
    pub name: String,
    /// Opaque provider spec, embedded into the NodeGroup value as `instanceClass`
    pub spec: serde_json::Value,
}

impl InstanceClassInfo {
    #[must_use]
    pub fn from_dynamic(obj: &DynamicObject) -> Self {
        Self {
            name: obj.name_any(),
            spec: obj
                .data
                .get("spec")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({})),
        }
    }
}
