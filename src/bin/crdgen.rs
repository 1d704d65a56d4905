//! # CRD Generator
//!
//! Generates the `NodeGroup` CustomResourceDefinition YAML from the Rust type definitions.
//!
//! ## Usage
//!
//! ```bash
//! # Generate CRD YAML
//! cargo run --bin crdgen > config/crd/nodegroup.yaml
//!
//! # Generate and apply directly
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::core::CustomResourceExt;
use node_manager_controller::crd::NodeGroup;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&NodeGroup::crd())?);
    Ok(())
}
