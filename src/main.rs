//! # Node Manager Controller
//!
//! Kubernetes controller behind the node manager of a Deckhouse cluster.
//!
//! ## Overview
//!
//! 1. **Reconciles NodeGroups** - validates every NodeGroup against its
//!    InstanceClass and derives the values node bootstrap is rendered from
//! 2. **Follows the cloud provider** - rebinds the InstanceClass watch when the
//!    declared kind changes
//! 3. **Bootstrap tokens** - keeps one fresh join token per NodeGroup
//! 4. **CSR approval** - auto-approves well-formed kubelet serving certificates
//!
//! Metrics and probes are served on `METRICS_PORT` (default 5000).

use anyhow::Result;
use node_manager_controller::runtime::initialization::initialize;
use node_manager_controller::runtime::watch_loop::{run_csr_approver, run_watch_loop};
use tracing::error;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    let csr_approver = tokio::spawn(run_csr_approver(
        init.client.clone(),
        init.controller_config.clone(),
    ));

    run_watch_loop(
        init.client,
        init.reconciler,
        init.server_state,
        init.controller_config,
    )
    .await?;

    match csr_approver.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("CSR approver failed: {e}"),
        Err(e) => error!("CSR approver task panicked: {e}"),
    }
    Ok(())
}
