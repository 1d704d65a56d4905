//! # Error Policy
//!
//! Retry decisions for failed reconciliation passes, failed CSR approvals and
//! watch stream errors.

use crate::controller::backoff::FibonacciBackoff;
use crate::controller::csr::{CsrApprover, CsrError};
use crate::controller::reconciler::ReconcilerError;
use crate::observability::metrics;
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Schedule the retry of a failed pass
///
/// Returns the delay until the retry pass.
pub fn handle_pass_error(error: &ReconcilerError, backoff: &mut FibonacciBackoff) -> Duration {
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.reconcile_pass.error",
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation pass failed: {:?}", error);

    let delay = backoff.next_backoff();
    log_next_retry(delay);
    delay
}

/// Requeue a CSR whose approval call failed, with per-CSR Fibonacci backoff
pub fn handle_csr_error(
    csr: Arc<CertificateSigningRequest>,
    error: &CsrError,
    ctx: Arc<CsrApprover>,
) -> Action {
    let name = csr.metadata.name.as_deref().unwrap_or("unknown");
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.csr.error",
        csr.name = name,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("CSR approval failed for {}: {:?}", name, error);
    metrics::increment_csr_decisions("error");

    let delay = ctx.next_backoff(name);
    log_next_retry(delay);
    Action::requeue(delay)
}

fn log_next_retry(delay: Duration) {
    let secs = i64::try_from(delay.as_secs()).unwrap_or(i64::MAX);
    let next_trigger_time = chrono::Utc::now() + chrono::Duration::seconds(secs);
    info!(
        "🔄 Retrying with Fibonacci backoff: {}s, next retry at {}",
        delay.as_secs(),
        next_trigger_time.to_rfc3339()
    );
}

/// Broad class of a watch stream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorClass {
    Unauthorized,
    Expired,
    Throttled,
    NotFound,
    Other,
}

impl WatchErrorClass {
    /// Classify a formatted watch error
    ///
    /// 404 is checked before 401: a plain-text 404 body surfaces as a decode
    /// error whose chain mentions the watch as well.
    #[must_use]
    pub fn classify(error_string: &str) -> Self {
        let is_not_found = error_string.contains("ObjectNotFound")
            || error_string.contains("404")
            || error_string.contains("not found");
        if (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found {
            Self::Unauthorized
        } else if error_string.contains("410")
            || error_string.contains("too old resource version")
            || error_string.contains("Expired")
            || error_string.contains("Gone")
        {
            Self::Expired
        } else if error_string.contains("429")
            || error_string.contains("storage is (re)initializing")
            || error_string.contains("TooManyRequests")
        {
            Self::Throttled
        } else if is_not_found {
            Self::NotFound
        } else {
            Self::Other
        }
    }
}

/// Log a watch stream error
///
/// The stream itself retries with backoff, this only reports what happened.
pub fn handle_watch_stream_error(resource: &str, error_string: &str) -> WatchErrorClass {
    let class = WatchErrorClass::classify(error_string);
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        resource = resource,
        error = %error_string
    );
    let _error_guard = error_span.enter();

    match class {
        WatchErrorClass::Unauthorized => {
            error!(
                "❌ Watch on {} failed (401 Unauthorized), RBAC may have been revoked or the token expired",
                resource
            );
            error!("   Check the node-manager ClusterRole and ClusterRoleBinding are still in place");
        }
        WatchErrorClass::Expired => {
            warn!("Watch on {} resource version expired (410), watch will restart", resource);
        }
        WatchErrorClass::Throttled => {
            warn!("API server throttling watch on {} (429), backing off", resource);
        }
        WatchErrorClass::NotFound => {
            warn!(
                "{} not found (404), the CRD may not be installed. Error: {}",
                resource, error_string
            );
        }
        WatchErrorClass::Other => error!("Watch stream error on {}: {}", resource, error_string),
    }
    class
}
