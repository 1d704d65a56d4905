//! # Cluster store
//!
//! Every read and write of the NodeGroup loop goes through [`ClusterStore`].
//! [`KubeClusterStore`] talks to the API server, [`MemoryClusterStore`] keeps
//! the same objects in memory for tests and dry runs.

mod kubernetes;
mod memory;

pub use kubernetes::KubeClusterStore;
pub use memory::{MemoryClusterStore, MemoryState};

use crate::controller::bootstrap_token::BootstrapTokenSecret;
use crate::controller::reconciler::snapshot::{CloudProviderConfig, Snapshot};
use crate::controller::reconciler::status::NodeGroupStatusPatch;
use crate::controller::reconciler::values::ValuesDocument;
use crate::crd::InstanceClassKind;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// The cloud provider secret, `None` on clusters without one
    async fn load_cloud_provider_config(&self) -> Result<Option<CloudProviderConfig>>;

    /// Everything a pass reads
    ///
    /// InstanceClasses are listed for `kind` only. Objects that fail to decode
    /// are logged and skipped.
    async fn load_snapshot(
        &self,
        kind: Option<&InstanceClassKind>,
        cloud_provider: Option<CloudProviderConfig>,
        now: DateTime<Utc>,
    ) -> Result<Snapshot>;

    /// Merge-patch a NodeGroup status, a missing group is not an error
    async fn patch_node_group_status(&self, patch: &NodeGroupStatusPatch) -> Result<()>;

    /// Merge-patch `status.nodeGroupConsumers`, a missing class is not an error
    async fn patch_instance_class_status(
        &self,
        kind: &InstanceClassKind,
        name: &str,
        consumers: &[String],
    ) -> Result<()>;

    async fn delete_bootstrap_token(&self, name: &str) -> Result<()>;

    async fn create_bootstrap_token(&self, token: &BootstrapTokenSecret) -> Result<()>;

    /// Replace the published value tree
    async fn publish_values(&self, values: &ValuesDocument) -> Result<()>;

    /// The value tree a previous process published, if any
    async fn load_published_values(&self) -> Result<Option<ValuesDocument>>;
}
