//! # Reconciler
//!
//! Core reconciliation logic for `NodeGroup` resources.
//!
//! The reconciler:
//! - Follows the InstanceClass kind declared by the cloud provider secret
//! - Validates every NodeGroup against its InstanceClass, the zones and the
//!   instance type catalog
//! - Derives the values node bootstrap is rendered from
//! - Keeps one fresh bootstrap token per NodeGroup
//! - Writes NodeGroup and InstanceClass status
//!
//! ## Reconciliation Flow
//!
//! 1. Resolve the InstanceClass kind (`kind.rs`), stopping early on a rebind
//! 2. Read the snapshot (`snapshot.rs`)
//! 3. Validate (`validation.rs`) and derive (`derivation/`) each NodeGroup
//! 4. Plan bootstrap tokens
//! 5. Flush status (`status.rs`), tokens and values (`values.rs`)

pub mod derivation;
pub mod kind;
pub mod pass;
pub mod snapshot;
pub mod status;
pub mod types;
pub mod validation;
pub mod values;
pub mod version;

// Re-export public API
pub use kind::{BindingAction, KindResolver};
pub use pass::{compute_pass, run_pass, PassPlan};
pub use types::{PassOutcome, Reconciler, ReconcilerError, TriggerSource};
