//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ## Usage
//!
//! ```rust
//! use node_manager_controller::prelude::*;
//! ```
//!
//! This brings into scope:
//! - All CRD types (NodeGroup, InstanceClassKind, etc.)
//! - The cluster store seam and its implementations
//! - Reconciler types (Reconciler, ReconcilerError, etc.)
//! - Config types (ControllerConfig, ServerConfig)

// CRD types - most commonly used
pub use crate::crd::*;

// I/O seam
pub use crate::cluster::{ClusterStore, KubeClusterStore, MemoryClusterStore, MemoryState};

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{
    compute_pass, run_pass, PassOutcome, PassPlan, Reconciler, ReconcilerError, TriggerSource,
};

pub use crate::controller::bootstrap_token::BootstrapTokenSecret;
pub use crate::controller::csr::{CsrError, Decision, ParsedCsr};

// Config types - for configuration management
pub use crate::config::{ControllerConfig, ServerConfig, SharedControllerConfig};
