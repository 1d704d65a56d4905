//! # Approver
//!
//! Reconcile function driven by a kube-runtime `Controller` over
//! CertificateSigningRequests. Each request is handled on its own, so requests
//! are approved concurrently and independently of the NodeGroup pass.

use crate::config::SharedControllerConfig;
use crate::constants::{CSR_APPROVAL_MESSAGE, CSR_APPROVAL_REASON};
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::csr::{evaluate, CsrError, Decision};
use crate::observability::metrics;
use k8s_openapi::api::certificates::v1::{
    CertificateSigningRequest, CertificateSigningRequestCondition,
};
use kube::api::{Api, Patch, PatchParams};
use kube_runtime::controller::Action;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

/// Per-request retry state for failed approval calls
///
/// A failing request is retried at least every `backoff_max`, so an entry
/// untouched for twice that belongs to a request that was deleted or decided
/// elsewhere, and is dropped on the next failure of any request.
#[derive(Debug)]
pub struct RetryStates {
    start_secs: u64,
    max_secs: u64,
    entries: HashMap<String, (FibonacciBackoff, Instant)>,
}

impl RetryStates {
    #[must_use]
    pub fn new(start_secs: u64, max_secs: u64) -> Self {
        Self {
            start_secs,
            max_secs,
            entries: HashMap::new(),
        }
    }

    fn idle_limit(&self) -> Duration {
        Duration::from_secs(self.max_secs.saturating_mul(2))
    }

    /// Next retry delay for `name` at `now`
    pub fn next_backoff(&mut self, name: &str, now: Instant) -> Duration {
        let idle_limit = self.idle_limit();
        self.entries
            .retain(|_, (_, touched)| now.saturating_duration_since(*touched) <= idle_limit);
        let (start, max) = (self.start_secs, self.max_secs);
        let (backoff, touched) = self
            .entries
            .entry(name.to_string())
            .or_insert_with(|| (FibonacciBackoff::new(start, max), now));
        *touched = now;
        backoff.next_backoff()
    }

    pub fn forget(&mut self, name: &str) {
        self.entries.remove(name);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Context shared by all CSR reconciles
pub struct CsrApprover {
    pub api: Api<CertificateSigningRequest>,
    pub config: SharedControllerConfig,
    pub retry_states: Mutex<RetryStates>,
}

impl std::fmt::Debug for CsrApprover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrApprover")
            .field("signers", &self.config.csr_signer_names)
            .finish_non_exhaustive()
    }
}

impl CsrApprover {
    #[must_use]
    pub fn new(api: Api<CertificateSigningRequest>, config: SharedControllerConfig) -> Self {
        let retry_states = RetryStates::new(config.backoff_start_secs, config.backoff_max_secs);
        Self {
            api,
            config,
            retry_states: Mutex::new(retry_states),
        }
    }

    /// Next retry delay for `name`
    pub fn next_backoff(&self, name: &str) -> Duration {
        match self.retry_states.lock() {
            Ok(mut states) => states.next_backoff(name, Instant::now()),
            Err(e) => {
                warn!("Failed to lock CSR backoff states: {e}, using maximum backoff");
                Duration::from_secs(self.config.backoff_max_secs)
            }
        }
    }

    fn forget(&self, name: &str) {
        if let Ok(mut states) = self.retry_states.lock() {
            states.forget(name);
        }
    }
}

/// Reconcile one CertificateSigningRequest
///
/// # Errors
///
/// Only the approval call fails the reconcile, parse problems are logged and
/// leave the request pending.
pub async fn reconcile_csr(
    csr: Arc<CertificateSigningRequest>,
    ctx: Arc<CsrApprover>,
) -> Result<Action, CsrError> {
    let name = csr.metadata.name.clone().unwrap_or_default();
    let span = info_span!("csr", name = name.as_str());
    async move {
        let decision = evaluate(&csr, &ctx.config);
        match &decision {
            Decision::Skip(reason) => debug!("Skipping CSR: {reason}"),
            Decision::Reject(reason) => {
                warn!(signer = csr.spec.signer_name.as_str(), "CSR not approved: {reason}");
            }
            Decision::Approve => {
                approve(&ctx.api, &csr).await?;
                info!(
                    signer = csr.spec.signer_name.as_str(),
                    username = csr.spec.username.as_deref().unwrap_or_default(),
                    "✅ CSR approved"
                );
            }
        }
        metrics::increment_csr_decisions(decision.as_str());
        ctx.forget(&name);
        Ok(Action::await_change())
    }
    .instrument(span)
    .await
}

/// Append the `Approved` condition and submit it via the approval subresource
///
/// # Errors
///
/// Returns the API error of the approval call.
pub async fn approve(
    api: &Api<CertificateSigningRequest>,
    csr: &CertificateSigningRequest,
) -> Result<(), CsrError> {
    let name = csr.metadata.name.as_deref().unwrap_or_default();
    let mut conditions = csr
        .status
        .as_ref()
        .and_then(|s| s.conditions.clone())
        .unwrap_or_default();
    conditions.push(approved_condition());

    let patch = json!({ "status": { "conditions": conditions } });
    api.patch_approval(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

fn approved_condition() -> CertificateSigningRequestCondition {
    CertificateSigningRequestCondition {
        type_: "Approved".to_string(),
        status: "True".to_string(),
        reason: Some(CSR_APPROVAL_REASON.to_string()),
        message: Some(CSR_APPROVAL_MESSAGE.to_string()),
        ..CertificateSigningRequestCondition::default()
    }
}
