//! # Node capacity
//!
//! Scaling a group up from zero nodes requires the autoscaler to know what a
//! node of the group would look like. The capacity comes from the instance
//! type catalog when the InstanceClass names a known type, otherwise from an
//! explicit `spec.capacity` block of the InstanceClass.

use crate::crd::{quantity_from_value, InstanceType, InstanceTypesCatalog};
use serde_json::Value;
use thiserror::Error;

/// InstanceClass spec fields naming the instance type, by provider
const INSTANCE_TYPE_FIELDS: &[&str] = &["instanceType", "machineType", "flavorName", "type"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CapacityError {
    #[error("instance type {0:?} is not in the catalog and spec.capacity is not set")]
    UnknownInstanceType(String),
    #[error("spec.capacity is not set")]
    NoCapacity,
    #[error("spec.capacity.{0} is missing or invalid")]
    InvalidCapacity(&'static str),
}

/// Instance type named by the InstanceClass spec, if any
#[must_use]
pub fn instance_type_of(ic_spec: &Value) -> Option<&str> {
    INSTANCE_TYPE_FIELDS
        .iter()
        .find_map(|field| ic_spec.get(*field).and_then(Value::as_str))
        .filter(|t| !t.is_empty())
}

/// Capacity of a node built from `ic_spec`
///
/// A catalog match wins over `spec.capacity`.
pub fn compute_capacity(
    ic_name: &str,
    ic_spec: &Value,
    catalog: &InstanceTypesCatalog,
) -> Result<InstanceType, CapacityError> {
    let instance_type = instance_type_of(ic_spec);

    if let Some(found) = instance_type.and_then(|t| catalog.get(t)) {
        return Ok(found.clone());
    }

    let Some(capacity) = ic_spec.get("capacity").filter(|c| c.is_object()) else {
        return Err(match instance_type {
            Some(t) => CapacityError::UnknownInstanceType(t.to_string()),
            None => CapacityError::NoCapacity,
        });
    };

    let cpu = capacity
        .get("cpu")
        .and_then(quantity_from_value)
        .ok_or(CapacityError::InvalidCapacity("cpu"))?;
    let memory = capacity
        .get("memory")
        .and_then(quantity_from_value)
        .ok_or(CapacityError::InvalidCapacity("memory"))?;
    let root_disk = capacity.get("rootDisk").and_then(quantity_from_value);

    Ok(InstanceType {
        name: instance_type.unwrap_or(ic_name).to_string(),
        cpu,
        memory,
        root_disk,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use serde_json::json;

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    fn catalog() -> InstanceTypesCatalog {
        InstanceTypesCatalog {
            instance_types: vec![InstanceType {
                name: "test".to_string(),
                cpu: q("8"),
                memory: q("16Gi"),
                root_disk: Some(q("20Gi")),
            }],
        }
    }

    #[test]
    fn test_catalog_wins_over_spec_capacity() {
        let spec = json!({"type": "test", "capacity": {"cpu": 4, "memory": "8Gi"}});
        let capacity = compute_capacity("cap", &spec, &catalog()).unwrap();
        assert_eq!(capacity.name, "test");
        assert_eq!(capacity.cpu, q("8"));
        assert_eq!(capacity.memory, q("16Gi"));
    }

    #[test]
    fn test_spec_capacity_fallback() {
        let spec = json!({"flavorName": "m1.custom", "capacity": {"cpu": 4, "memory": "8Gi"}});
        let capacity = compute_capacity("cap", &spec, &catalog()).unwrap();
        assert_eq!(capacity.name, "m1.custom");
        assert_eq!(capacity.cpu, q("4"));
        assert_eq!(capacity.memory, q("8Gi"));
        assert_eq!(capacity.root_disk, None);

        let anonymous = json!({"capacity": {"cpu": "2", "memory": "4Gi"}});
        assert_eq!(compute_capacity("cap", &anonymous, &catalog()).unwrap().name, "cap");
    }

    #[test]
    fn test_missing_capacity() {
        assert_eq!(
            compute_capacity("small", &json!({"instanceType": "t3.nano"}), &InstanceTypesCatalog::default()),
            Err(CapacityError::UnknownInstanceType("t3.nano".to_string()))
        );
        assert_eq!(
            compute_capacity("small", &json!({}), &InstanceTypesCatalog::default()),
            Err(CapacityError::NoCapacity)
        );
        assert_eq!(
            compute_capacity("small", &json!({"capacity": {"cpu": 2}}), &InstanceTypesCatalog::default()),
            Err(CapacityError::InvalidCapacity("memory"))
        );
    }
}
