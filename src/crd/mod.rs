//! # Custom Resource Definitions
//!
//! Resource types the node manager reads and writes.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `NodeGroup` CRD and its spec blocks
//! - `status.rs` - `NodeGroup` status
//! - `instance_class.rs` - dynamic InstanceClass kinds
//! - `machine_deployment.rs` - MachineDeployment zone view
//! - `catalog.rs` - InstanceTypesCatalog capacities

mod catalog;
mod instance_class;
mod machine_deployment;
mod schema;
mod spec;
mod status;

pub use catalog::{
    catalog_api_resource, quantity_from_value, InstanceType, InstanceTypesCatalog,
};
pub use instance_class::{InstanceClassInfo, InstanceClassKind, V1ALPHA1_INSTANCE_CLASS_KINDS};
pub use machine_deployment::{machine_deployment_api_resource, MachineDeploymentInfo};
pub use spec::{
    AutomaticDisruptions, Chaos, ClassReference, CloudInstances, ContainerdSpec, CriSpec,
    CriType, DisruptionWindow, Disruptions, DockerSpec, Fencing, KubeletSpec, NodeGroup,
    NodeGroupSpec, NodeTaint, NodeTemplate, NodeType, NotManagedSpec, OperatingSystem,
    RollingUpdateDisruptions, StandbyHolder, StaticInstances,
};
pub use status::{ConditionSummary, NodeGroupCondition, NodeGroupStatus};
