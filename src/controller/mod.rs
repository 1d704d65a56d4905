//! # Controller
//!
//! Core controller modules for the node manager.
//!
//! - `backoff`: Fibonacci backoff mechanism for retries
//! - `bootstrap_token`: Join tokens for NodeGroup nodes
//! - `csr`: Kubelet serving certificate approval
//! - `reconciler`: NodeGroup reconciliation pass
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod bootstrap_token;
pub mod csr;
pub mod reconciler;
pub mod server;
