//! # Runtime
//!
//! Process wiring around the reconciler.
//!
//! - `initialization.rs` - startup: TLS, tracing, metrics, server, client
//! - `watch_loop.rs` - trigger sources and the serial pass loop, CSR controller
//! - `error_policy.rs` - retry and watch error handling

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
