//! # In-memory store
//!
//! Holds the pass inputs as plain values and applies writes the way the API
//! server would: status patches land on the NodeGroup, tokens appear and
//! disappear, values replace the previous document. Every write is also
//! recorded so callers can assert on what a pass did.

use super::ClusterStore;
use crate::controller::bootstrap_token::BootstrapTokenSecret;
use crate::controller::reconciler::snapshot::{
    CloudProviderConfig, ControlPlaneArguments, GlobalSettings, Snapshot,
};
use crate::controller::reconciler::status::NodeGroupStatusPatch;
use crate::controller::reconciler::values::ValuesDocument;
use crate::crd::{
    InstanceClassInfo, InstanceClassKind, InstanceTypesCatalog, MachineDeploymentInfo, NodeGroup,
    NodeGroupStatus,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

/// Objects held by a [`MemoryClusterStore`]
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub node_groups: Vec<NodeGroup>,
    /// InstanceClasses by kind
    pub instance_classes: BTreeMap<String, Vec<InstanceClassInfo>>,
    pub machine_deployments: Vec<MachineDeploymentInfo>,
    pub cloud_provider: Option<CloudProviderConfig>,
    pub catalog: InstanceTypesCatalog,
    pub globals: GlobalSettings,
    pub control_plane_arguments: Option<ControlPlaneArguments>,
    pub bootstrap_tokens: Vec<BootstrapTokenSecret>,
    pub published: Option<ValuesDocument>,

    /// `status.nodeGroupConsumers` by (kind, name)
    pub instance_class_consumers: BTreeMap<(String, String), Vec<String>>,
    pub status_patches: Vec<NodeGroupStatusPatch>,
    pub deleted_tokens: Vec<String>,
    pub created_tokens: Vec<String>,
    pub publish_count: usize,

    /// Names whose writes fail, to exercise error paths
    pub failing_writes: BTreeSet<String>,
}

/// [`ClusterStore`] without an API server
#[derive(Debug, Default)]
pub struct MemoryClusterStore {
    state: Mutex<MemoryState>,
}

impl MemoryClusterStore {
    #[must_use]
    pub fn new(state: MemoryState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Inspect or modify the held objects
    pub fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test panicked while holding it
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_write(state: &MemoryState, name: &str) -> Result<()> {
        if state.failing_writes.contains(name) {
            return Err(anyhow!("injected write failure for {name}"));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterStore for MemoryClusterStore {
    async fn load_cloud_provider_config(&self) -> Result<Option<CloudProviderConfig>> {
        Ok(self.state().cloud_provider.clone())
    }

    async fn load_snapshot(
        &self,
        kind: Option<&InstanceClassKind>,
        cloud_provider: Option<CloudProviderConfig>,
        now: DateTime<Utc>,
    ) -> Result<Snapshot> {
        let state = self.state();
        let mut node_groups = state.node_groups.clone();
        node_groups.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));

        Ok(Snapshot {
            node_groups,
            instance_classes: kind
                .and_then(|k| state.instance_classes.get(&k.kind))
                .cloned()
                .unwrap_or_default(),
            machine_deployments: state.machine_deployments.clone(),
            cloud_provider,
            catalog: state.catalog.clone(),
            globals: state.globals.clone(),
            control_plane_arguments: state.control_plane_arguments.clone(),
            bootstrap_tokens: state.bootstrap_tokens.clone(),
            timestamp: now,
        })
    }

    async fn patch_node_group_status(&self, patch: &NodeGroupStatusPatch) -> Result<()> {
        let mut state = self.state();
        Self::check_write(&state, &patch.name)?;
        state.status_patches.push(patch.clone());

        let Some(ng) = state
            .node_groups
            .iter_mut()
            .find(|ng| ng.metadata.name.as_deref() == Some(patch.name.as_str()))
        else {
            return Ok(());
        };
        let status = ng.status.get_or_insert_with(NodeGroupStatus::default);
        status.error = Some(patch.error.clone());
        if let Some(version) = &patch.kubernetes_version {
            status.kubernetes_version = Some(version.clone());
        }
        if patch.observed_generation.is_some() {
            status.observed_generation = patch.observed_generation;
        }
        Ok(())
    }

    async fn patch_instance_class_status(
        &self,
        kind: &InstanceClassKind,
        name: &str,
        consumers: &[String],
    ) -> Result<()> {
        let mut state = self.state();
        Self::check_write(&state, name)?;
        let exists = state
            .instance_classes
            .get(&kind.kind)
            .is_some_and(|ics| ics.iter().any(|ic| ic.name == name));
        if exists {
            state
                .instance_class_consumers
                .insert((kind.kind.clone(), name.to_string()), consumers.to_vec());
        }
        Ok(())
    }

    async fn delete_bootstrap_token(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        Self::check_write(&state, name)?;
        state.bootstrap_tokens.retain(|t| t.name != name);
        state.deleted_tokens.push(name.to_string());
        Ok(())
    }

    async fn create_bootstrap_token(&self, token: &BootstrapTokenSecret) -> Result<()> {
        let mut state = self.state();
        Self::check_write(&state, &token.name)?;
        if state.bootstrap_tokens.iter().any(|t| t.name == token.name) {
            return Err(anyhow!("secret {} already exists", token.name));
        }
        state.bootstrap_tokens.push(token.clone());
        state.created_tokens.push(token.name.clone());
        Ok(())
    }

    async fn publish_values(&self, values: &ValuesDocument) -> Result<()> {
        let mut state = self.state();
        Self::check_write(&state, "values")?;
        state.published = Some(values.clone());
        state.publish_count += 1;
        Ok(())
    }

    async fn load_published_values(&self) -> Result<Option<ValuesDocument>> {
        Ok(self.state().published.clone())
    }
}
