//! # Derivation Engine
//!
//! Turns a validated NodeGroup into the value published for it.
//!
//! ## Module Structure
//!
//! - `capacity.rs` - simulated node for scale-from-zero
//! - `cri.rs` - container runtime selection
//! - `epoch.rs` - per-group rollout windows

pub mod capacity;
pub mod cri;
pub mod epoch;

use crate::constants::MANUAL_ROLLOUT_ID_ANNOTATION;
use crate::controller::reconciler::snapshot::GlobalSettings;
use crate::controller::reconciler::types::ReconcilerError;
use crate::controller::reconciler::values::NodeGroupValue;
use crate::controller::reconciler::version::KubeVersion;
use crate::crd::{CriSpec, CriType, InstanceType, NodeGroup};
use cri::UnsupportedCri;
use std::collections::BTreeSet;
use tracing::warn;

/// Version every node of the cluster is bootstrapped with
///
/// The cluster configuration pin beats discovery. Nodes never run ahead of
/// the oldest control-plane kubelet.
pub fn effective_kubernetes_version(globals: &GlobalSettings) -> Result<KubeVersion, ReconcilerError> {
    let pinned = match globals.cluster_configuration.pinned_kubernetes_version() {
        Some(raw) => Some(raw.parse::<KubeVersion>().map_err(|source| {
            ReconcilerError::MalformedVersion {
                value: raw.to_string(),
                source,
            }
        })?),
        None => None,
    };
    let base = pinned.or(globals.discovery_version);
    let control_plane_min = globals.control_plane_versions.iter().min().copied();

    match (base, control_plane_min) {
        (Some(base), Some(min)) => Ok(base.min(min)),
        (Some(v), None) | (None, Some(v)) => Ok(v),
        (None, None) => Err(ReconcilerError::UnknownKubernetesVersion),
    }
}

/// Cluster-wide `defaultCRI`, unknown values are ignored
#[must_use]
pub fn default_cri(globals: &GlobalSettings) -> Option<CriType> {
    let raw = globals.cluster_configuration.default_cri.as_deref()?.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<CriType>() {
        Ok(cri) => Some(cri),
        Err(e) => {
            warn!(default_cri = raw, "Ignoring defaultCRI from cluster configuration: {e}");
            None
        }
    }
}

/// Inputs shared by every group of one pass
#[derive(Debug, Clone)]
pub struct DerivationContext<'a> {
    pub version: KubeVersion,
    pub default_cri: Option<CriType>,
    pub default_zones: &'a BTreeSet<String>,
    pub cluster_uuid: &'a str,
    /// Unix seconds of the snapshot
    pub now: i64,
}

/// What validation resolved about the group's InstanceClass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInstanceClass {
    /// Embedded spec of the referenced InstanceClass
    pub spec: Option<serde_json::Value>,
    pub node_capacity: Option<InstanceType>,
}

/// Derived value of a group that passed validation
pub fn derive_node_group(
    ng: &NodeGroup,
    resolved: ResolvedInstanceClass,
    ctx: &DerivationContext<'_>,
) -> Result<NodeGroupValue, UnsupportedCri> {
    let name = ng.metadata.name.clone().unwrap_or_default();
    let spec = &ng.spec;

    let cri_type = cri::resolve_cri(spec.cri.as_ref(), ctx.default_cri, ctx.version)?;
    let mut cri = spec.cri.clone().unwrap_or_else(CriSpec::default);
    cri.cri_type = Some(cri_type);

    let cloud_instances = spec.cloud_instances.clone().map(|mut ci| {
        if ci.zones.is_none() {
            ci.zones = Some(ctx.default_zones.iter().cloned().collect());
        }
        ci
    });

    let manual_rollout_id = ng
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(MANUAL_ROLLOUT_ID_ANNOTATION))
        .cloned();

    Ok(NodeGroupValue {
        update_epoch: epoch::update_epoch(ctx.now, ctx.cluster_uuid, &name).to_string(),
        name,
        node_type: spec.node_type,
        cri,
        static_instances: spec.static_instances.clone(),
        cloud_instances,
        node_template: spec.node_template.clone(),
        chaos: spec.chaos.clone(),
        operating_system: spec.operating_system.clone(),
        disruptions: spec.disruptions.clone(),
        kubelet: spec.kubelet.clone(),
        fencing: spec.fencing.clone(),
        manual_rollout_id,
        kubernetes_version: ctx.version.major_minor(),
        instance_class: resolved.spec,
        node_capacity: resolved.node_capacity,
    })
}
