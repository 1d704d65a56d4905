//! # Types
//!
//! Core types for the reconciler.

use crate::cluster::ClusterStore;
use crate::config::SharedControllerConfig;
use crate::controller::reconciler::derivation::cri::UnsupportedCri;
use crate::controller::reconciler::kind::KindResolver;
use crate::controller::reconciler::values::NodeGroupValue;
use crate::controller::reconciler::version::VersionError;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error(transparent)]
    UnsupportedCri(#[from] UnsupportedCri),
    #[error("kubernetes version is unknown: neither discovery nor control-plane nodes report one")]
    UnknownKubernetesVersion,
    #[error("cluster configuration kubernetesVersion {value:?} is malformed: {source}")]
    MalformedVersion {
        value: String,
        #[source]
        source: VersionError,
    },
    /// Reads and writes through the [`ClusterStore`]; API errors arrive here with context
    #[error("Cluster store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// Trigger source for a reconciliation pass
/// Tracks why a pass ran for logs and debugging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerSource {
    /// First pass after startup
    Startup,
    NodeGroupEvent,
    /// InstanceClass of the subscribed kind changed (or the watcher was rebound)
    InstanceClassEvent,
    MachineDeploymentEvent,
    /// Cloud provider, control-plane arguments or bootstrap token secret changed
    SecretEvent,
    CatalogEvent,
    /// Periodic resync tick
    Resync,
    /// Hourly bootstrap token tick
    TokenCron,
    /// Backoff retry after a failed pass
    Retry,
}

impl TriggerSource {
    /// Get human-readable string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Startup => "startup",
            TriggerSource::NodeGroupEvent => "node-group-event",
            TriggerSource::InstanceClassEvent => "instance-class-event",
            TriggerSource::MachineDeploymentEvent => "machine-deployment-event",
            TriggerSource::SecretEvent => "secret-event",
            TriggerSource::CatalogEvent => "catalog-event",
            TriggerSource::Resync => "resync",
            TriggerSource::TokenCron => "token-cron",
            TriggerSource::Retry => "retry",
        }
    }
}

/// How a pass ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Every side effect of the pass was flushed
    Completed,
    /// The InstanceClass watcher must be rebound first; nothing was flushed
    Rebound,
}

impl PassOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PassOutcome::Completed => "completed",
            PassOutcome::Rebound => "rebound",
        }
    }
}

/// State carried between passes
///
/// The only mutable state of the NodeGroup loop: the subscribed InstanceClass
/// kind and the last value published for each group.
#[derive(Clone)]
pub struct Reconciler {
    pub store: Arc<dyn ClusterStore>,
    pub kind_resolver: Arc<KindResolver>,
    // Passes are serial; the lock also keeps a slow flush from overlapping the next pass
    pub last_published: Arc<AsyncMutex<BTreeMap<String, NodeGroupValue>>>,
    pub config: SharedControllerConfig,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("kind_resolver", &self.kind_resolver)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(store: Arc<dyn ClusterStore>, config: SharedControllerConfig) -> Self {
        Self {
            store,
            kind_resolver: Arc::new(KindResolver::new()),
            last_published: Arc::new(AsyncMutex::new(BTreeMap::new())),
            config,
        }
    }

    /// Seed the previous-good values from what an earlier process published
    pub async fn seed_last_published(&self) -> Result<usize, ReconcilerError> {
        let Some(document) = self.store.load_published_values().await? else {
            return Ok(0);
        };
        let mut last = self.last_published.lock().await;
        for value in document.node_manager.internal.node_groups {
            last.insert(value.name.clone(), value);
        }
        Ok(last.len())
    }
}
