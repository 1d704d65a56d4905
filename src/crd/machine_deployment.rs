//! # MachineDeployment
//!
//! Only the zone annotation of machine-controller-manager deployments is used,
//! it extends the set of zones NodeGroups may be placed in.

use crate::constants::MACHINE_DEPLOYMENT_ZONE_ANNOTATION;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::ResourceExt;

#[must_use]
pub fn machine_deployment_api_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        "machine.sapcloud.io",
        "v1alpha1",
        "MachineDeployment",
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineDeploymentInfo {
    pub name: String,
    pub zone: Option<String>,
}

impl MachineDeploymentInfo {
    #[must_use]
    pub fn from_dynamic(obj: &DynamicObject) -> Self {
        Self {
            name: obj.name_any(),
            zone: obj
                .annotations()
                .get(MACHINE_DEPLOYMENT_ZONE_ANNOTATION)
                .filter(|z| !z.is_empty())
                .cloned(),
        }
    }
}
