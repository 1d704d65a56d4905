//! Node Manager Controller Library
//!
//! Reconciles `NodeGroup` resources into the values node bootstrap is rendered
//! from, keeps one bootstrap token per NodeGroup fresh and auto-approves
//! kubelet serving certificates.
//!
//! ## Quick Start
//!
//! ```rust
//! use node_manager_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod cluster;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
