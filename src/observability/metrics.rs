//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! NodeGroup state, rebuilt from scratch on every pass:
//!
//! - `d8_node_group_{ready,nodes,instances,desired,min,max,up_to_date,standby}` - status counters
//! - `d8_node_group_has_errors` - 1 when an `Error` condition is `True`
//! - `node_group_info` - 1 per reconciled NodeGroup, labelled with its runtime
//!
//! Controller health:
//!
//! - `node_manager_reconcile_passes_total` - Passes by outcome
//! - `node_manager_reconcile_duration_seconds` - Duration of a pass
//! - `node_manager_status_patch_failures_total` - Status patches that failed
//! - `node_manager_bootstrap_tokens_created_total` - Bootstrap tokens issued
//! - `node_manager_bootstrap_tokens_deleted_total` - Expired bootstrap tokens removed
//! - `node_manager_csr_decisions_total` - CSR decisions by kind
//! - `node_manager_kind_binding_actions_total` - InstanceClass watcher rebinds

use crate::crd::NodeGroup;
use anyhow::Result;
use prometheus::core::Collector;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn node_group_gauge(name: &str, help: &str) -> IntGaugeVec {
    IntGaugeVec::new(Opts::new(name, help), &["node_group_name"])
        .expect("Failed to create node group gauge - this should never happen")
}

static NODE_GROUP_READY: LazyLock<IntGaugeVec> =
    LazyLock::new(|| node_group_gauge("d8_node_group_ready", "Ready nodes of the NodeGroup"));

static NODE_GROUP_NODES: LazyLock<IntGaugeVec> =
    LazyLock::new(|| node_group_gauge("d8_node_group_nodes", "Nodes of the NodeGroup"));

static NODE_GROUP_INSTANCES: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    node_group_gauge("d8_node_group_instances", "Cloud instances of the NodeGroup")
});

static NODE_GROUP_DESIRED: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    node_group_gauge("d8_node_group_desired", "Desired instances of the NodeGroup")
});

static NODE_GROUP_MIN: LazyLock<IntGaugeVec> =
    LazyLock::new(|| node_group_gauge("d8_node_group_min", "Minimum instances of the NodeGroup"));

static NODE_GROUP_MAX: LazyLock<IntGaugeVec> =
    LazyLock::new(|| node_group_gauge("d8_node_group_max", "Maximum instances of the NodeGroup"));

static NODE_GROUP_UP_TO_DATE: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    node_group_gauge("d8_node_group_up_to_date", "Up-to-date nodes of the NodeGroup")
});

static NODE_GROUP_STANDBY: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    node_group_gauge("d8_node_group_standby", "Standby instances of the NodeGroup")
});

static NODE_GROUP_HAS_ERRORS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    node_group_gauge(
        "d8_node_group_has_errors",
        "Whether the NodeGroup has an Error condition",
    )
});

static NODE_GROUP_INFO: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new("node_group_info", "Reconciled NodeGroups and their container runtime"),
        &["name", "cri_type"],
    )
    .expect("Failed to create NODE_GROUP_INFO metric - this should never happen")
});

static RECONCILE_PASSES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "node_manager_reconcile_passes_total",
            "Total number of NodeGroup reconciliation passes by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create RECONCILE_PASSES_TOTAL metric - this should never happen")
});

static RECONCILE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "node_manager_reconcile_duration_seconds",
            "Duration of a reconciliation pass in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
    )
    .expect("Failed to create RECONCILE_DURATION metric - this should never happen")
});

static STATUS_PATCH_FAILURES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "node_manager_status_patch_failures_total",
        "Total number of failed NodeGroup and InstanceClass status patches",
    )
    .expect("Failed to create STATUS_PATCH_FAILURES_TOTAL metric - this should never happen")
});

static BOOTSTRAP_TOKENS_CREATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "node_manager_bootstrap_tokens_created_total",
        "Total number of bootstrap tokens issued",
    )
    .expect("Failed to create BOOTSTRAP_TOKENS_CREATED_TOTAL metric - this should never happen")
});

static BOOTSTRAP_TOKENS_DELETED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "node_manager_bootstrap_tokens_deleted_total",
        "Total number of expired bootstrap tokens deleted",
    )
    .expect("Failed to create BOOTSTRAP_TOKENS_DELETED_TOTAL metric - this should never happen")
});

static CSR_DECISIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "node_manager_csr_decisions_total",
            "Total number of CertificateSigningRequest decisions",
        ),
        &["decision"],
    )
    .expect("Failed to create CSR_DECISIONS_TOTAL metric - this should never happen")
});

static KIND_BINDING_ACTIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "node_manager_kind_binding_actions_total",
            "Total number of InstanceClass watcher rebinds by action",
        ),
        &["action"],
    )
    .expect("Failed to create KIND_BINDING_ACTIONS_TOTAL metric - this should never happen")
});

fn register<C: Collector + Clone + 'static>(collector: &C) -> Result<()> {
    match REGISTRY.register(Box::new(collector.clone())) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Register all metrics with the registry
///
/// Safe to call more than once.
pub fn register_metrics() -> Result<()> {
    register(&*NODE_GROUP_READY)?;
    register(&*NODE_GROUP_NODES)?;
    register(&*NODE_GROUP_INSTANCES)?;
    register(&*NODE_GROUP_DESIRED)?;
    register(&*NODE_GROUP_MIN)?;
    register(&*NODE_GROUP_MAX)?;
    register(&*NODE_GROUP_UP_TO_DATE)?;
    register(&*NODE_GROUP_STANDBY)?;
    register(&*NODE_GROUP_HAS_ERRORS)?;
    register(&*NODE_GROUP_INFO)?;
    register(&*RECONCILE_PASSES_TOTAL)?;
    register(&*RECONCILE_DURATION)?;
    register(&*STATUS_PATCH_FAILURES_TOTAL)?;
    register(&*BOOTSTRAP_TOKENS_CREATED_TOTAL)?;
    register(&*BOOTSTRAP_TOKENS_DELETED_TOTAL)?;
    register(&*CSR_DECISIONS_TOTAL)?;
    register(&*KIND_BINDING_ACTIONS_TOTAL)?;
    Ok(())
}

/// Text exposition of everything registered
pub fn gather_text() -> Result<String> {
    let mut buffer = String::new();
    prometheus::TextEncoder::new().encode_utf8(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}

/// Drop every NodeGroup series; called at the start of every pass
pub fn reset_node_group_metrics() {
    for gauge in [
        &*NODE_GROUP_READY,
        &*NODE_GROUP_NODES,
        &*NODE_GROUP_INSTANCES,
        &*NODE_GROUP_DESIRED,
        &*NODE_GROUP_MIN,
        &*NODE_GROUP_MAX,
        &*NODE_GROUP_UP_TO_DATE,
        &*NODE_GROUP_STANDBY,
        &*NODE_GROUP_HAS_ERRORS,
        &*NODE_GROUP_INFO,
    ] {
        gauge.reset();
    }
}

/// Export the status counters of one NodeGroup
pub fn set_node_group_metrics(ng: &NodeGroup) {
    let name = ng.metadata.name.as_deref().unwrap_or_default();
    let status = ng.status.clone().unwrap_or_default();
    let labels = [name];

    let counters = [
        (&*NODE_GROUP_READY, status.ready),
        (&*NODE_GROUP_NODES, status.nodes),
        (&*NODE_GROUP_INSTANCES, status.instances),
        (&*NODE_GROUP_DESIRED, status.desired),
        (&*NODE_GROUP_MIN, status.min),
        (&*NODE_GROUP_MAX, status.max),
        (&*NODE_GROUP_UP_TO_DATE, status.up_to_date),
        (&*NODE_GROUP_STANDBY, status.standby),
    ];
    for (gauge, value) in counters {
        gauge
            .with_label_values(&labels)
            .set(i64::from(value.unwrap_or_default()));
    }
    NODE_GROUP_HAS_ERRORS
        .with_label_values(&labels)
        .set(i64::from(status.has_error_condition()));
}

pub fn set_node_group_info(name: &str, cri_type: &str) {
    NODE_GROUP_INFO.with_label_values(&[name, cri_type]).set(1);
}

pub fn increment_reconcile_passes(outcome: &str) {
    RECONCILE_PASSES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn observe_reconcile_duration(duration: f64) {
    RECONCILE_DURATION.observe(duration);
}

pub fn increment_status_patch_failures() {
    STATUS_PATCH_FAILURES_TOTAL.inc();
}

pub fn increment_bootstrap_tokens_created() {
    BOOTSTRAP_TOKENS_CREATED_TOTAL.inc();
}

pub fn increment_bootstrap_tokens_deleted() {
    BOOTSTRAP_TOKENS_DELETED_TOTAL.inc();
}

pub fn increment_csr_decisions(decision: &str) {
    CSR_DECISIONS_TOTAL.with_label_values(&[decision]).inc();
}

pub fn increment_kind_binding_actions(action: &str) {
    KIND_BINDING_ACTIONS_TOTAL.with_label_values(&[action]).inc();
}
