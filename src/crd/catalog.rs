//! # InstanceTypesCatalog
//!
//! Capacities of the provider's built-in instance types. The catalog is a
//! cluster-scoped `deckhouse.io/v1alpha1` object whose payload lives at the top
//! level (`instanceTypes`), not under `spec`.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use serde::{Deserialize, Deserializer, Serialize};

#[must_use]
pub fn catalog_api_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        "deckhouse.io",
        "v1alpha1",
        "InstanceTypesCatalog",
    ))
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceTypesCatalog {
    #[serde(default)]
    pub instance_types: Vec<InstanceType>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceType {
    pub name: String,
    #[serde(deserialize_with = "quantity")]
    pub cpu: Quantity,
    #[serde(deserialize_with = "quantity")]
    pub memory: Quantity,
    #[serde(default, deserialize_with = "optional_quantity", skip_serializing_if = "Option::is_none")]
    pub root_disk: Option<Quantity>,
}

impl InstanceTypesCatalog {
    /// Parse the catalog payload out of a dynamic object
    pub fn from_dynamic(obj: &DynamicObject) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(
            obj.data
                .as_object()
                .cloned()
                .unwrap_or_default(),
        ))
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&InstanceType> {
        self.instance_types.iter().find(|t| t.name == name)
    }
}

/// Quantities are strings in canonical form but users also write bare numbers
pub(crate) fn quantity<'de, D>(deserializer: D) -> Result<Quantity, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    quantity_from_value(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid quantity {value}")))
}

fn optional_quantity<'de, D>(deserializer: D) -> Result<Option<Quantity>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => quantity_from_value(&v)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid quantity {v}"))),
    }
}

/// Accept `"4"`, `"8Gi"` and `4`
#[must_use]
pub fn quantity_from_value(value: &serde_json::Value) -> Option<Quantity> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(Quantity(s.trim().to_string())),
        serde_json::Value::Number(n) => Some(Quantity(n.to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_catalog_from_dynamic() {
        let mut obj = DynamicObject::new("for-cluster-autoscaler", &catalog_api_resource());
        obj.data = json!({
            "instanceTypes": [
                {"name": "m5.large", "cpu": 2, "memory": "8Gi", "rootDisk": "20Gi"},
                {"name": "c5.xlarge", "cpu": "4", "memory": "8Gi"}
            ]
        });

        let catalog = InstanceTypesCatalog::from_dynamic(&obj).unwrap();
        assert_eq!(catalog.instance_types.len(), 2);
        let large = catalog.get("m5.large").unwrap();
        assert_eq!(large.cpu, Quantity("2".to_string()));
        assert_eq!(large.root_disk, Some(Quantity("20Gi".to_string())));
        assert!(catalog.get("c5.xlarge").unwrap().root_disk.is_none());
        assert!(catalog.get("t3.nano").is_none());
    }

    #[test]
    fn test_catalog_rejects_missing_cpu() {
        let mut obj = DynamicObject::new("for-cluster-autoscaler", &catalog_api_resource());
        obj.data = json!({"instanceTypes": [{"name": "broken", "memory": "1Gi"}]});
        assert!(InstanceTypesCatalog::from_dynamic(&obj).is_err());
    }
}
