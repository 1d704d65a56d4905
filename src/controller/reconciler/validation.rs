//! # Validator
//!
//! CloudEphemeral groups depend on an InstanceClass of the subscribed kind.
//! The checks run in a fixed order and the first failure wins:
//! kind, name, capacity (scale-from-zero only), zones.

use crate::controller::reconciler::derivation::capacity::compute_capacity;
use crate::controller::reconciler::derivation::ResolvedInstanceClass;
use crate::controller::reconciler::snapshot::Snapshot;
use crate::crd::{ClassReference, InstanceClassKind, NodeGroup, NodeType};
use std::collections::BTreeSet;
use tracing::debug;

/// Appended to the error of a group whose previous value is still published
pub const EARLIER_VERSION_SUFFIX: &str = " Earlier stored version of NG is in use now!";

/// Check `ng` against the snapshot
///
/// Returns the InstanceClass data the derivation embeds, or the message for
/// `status.error`.
pub fn validate_node_group(
    ng: &NodeGroup,
    snapshot: &Snapshot,
    subscribed: Option<&InstanceClassKind>,
    default_zones: &BTreeSet<String>,
) -> Result<ResolvedInstanceClass, String> {
    if ng.spec.node_type != NodeType::CloudEphemeral {
        return Ok(ResolvedInstanceClass::default());
    }
    let Some(active) = subscribed else {
        debug!(
            node_group = ng.metadata.name.as_deref().unwrap_or_default(),
            "No InstanceClass kind is active, skipping class checks"
        );
        return Ok(ResolvedInstanceClass::default());
    };

    let default_reference = ClassReference::default();
    let cloud = ng.spec.cloud_instances.as_ref();
    let reference = cloud.map_or(&default_reference, |c| &c.class_reference);

    if reference.kind != active.kind {
        return Err(format!(
            "Wrong classReference: Kind {} is not allowed, the only allowed kind is {}.",
            reference.kind, active.kind
        ));
    }

    let Some(instance_class) = snapshot.instance_class(&reference.name) else {
        return Err(format!(
            "Wrong classReference: There is no valid instance class {} of type {}.",
            reference.name, reference.kind
        ));
    };

    let mut resolved = ResolvedInstanceClass {
        spec: Some(instance_class.spec.clone()),
        node_capacity: None,
    };

    if cloud.is_some_and(|c| c.scales_from_zero()) {
        match compute_capacity(&instance_class.name, &instance_class.spec, &snapshot.catalog) {
            Ok(capacity) => resolved.node_capacity = Some(capacity),
            Err(e) => {
                debug!(instance_class = %instance_class.name, "Capacity lookup failed: {e}");
                return Err(format!(
                    "{kind} capacity is not set and instance type could not be found in the built-in types. ScaleFromZero would not work until you set a capacity spec into the {kind}/{name}",
                    kind = reference.kind,
                    name = reference.name
                ));
            }
        }
    }

    if !default_zones.is_empty() {
        let unknown: Vec<&str> = cloud
            .and_then(|c| c.zones.as_deref())
            .unwrap_or_default()
            .iter()
            .filter(|zone| !default_zones.contains(*zone))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(format!("unknown cloudInstances.zones: [{}]", unknown.join(" ")));
        }
    }

    Ok(resolved)
}

/// Error text written to status when validation fails
#[must_use]
pub fn sticky_error(message: &str, has_previous: bool) -> String {
    if has_previous {
        format!("{message}{EARLIER_VERSION_SUFFIX}")
    } else {
        message.to_string()
    }
}
