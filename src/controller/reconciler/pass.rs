//! # Reconciliation pass
//!
//! One pass runs the pipeline in a fixed order: resolve the InstanceClass
//! kind, read the snapshot, validate and derive every NodeGroup, plan tokens,
//! then flush status patches, token changes, values and metrics.
//!
//! Everything up to the flush is computed in memory by [`compute_pass`], so a
//! pass that fails before flushing leaves the cluster untouched.

use crate::controller::bootstrap_token::{plan_bootstrap_tokens, TokenPlan};
use crate::controller::reconciler::derivation::{
    default_cri, derive_node_group, effective_kubernetes_version, DerivationContext,
};
use crate::controller::reconciler::snapshot::Snapshot;
use crate::controller::reconciler::status::{
    instance_class_consumers, write_statuses, NodeGroupStatusPatch,
};
use crate::controller::reconciler::types::{PassOutcome, Reconciler, ReconcilerError, TriggerSource};
use crate::controller::reconciler::validation::{sticky_error, validate_node_group};
use crate::controller::reconciler::values::{build_internal_values, NodeGroupValue, ValuesDocument};
use crate::crd::InstanceClassKind;
use crate::observability::metrics;
use chrono::Utc;
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Side effects of one pass, computed before anything is written
#[derive(Debug, Clone)]
pub struct PassPlan {
    pub node_group_statuses: Vec<NodeGroupStatusPatch>,
    /// InstanceClass name -> sorted consumer NodeGroups
    pub instance_class_consumers: BTreeMap<String, Vec<String>>,
    pub tokens: TokenPlan,
    pub values: ValuesDocument,
    /// New previous-good map, replaces the reconciler's once flushed
    pub published: BTreeMap<String, NodeGroupValue>,
}

/// Validate, derive and plan a pass over `snapshot`
///
/// A group that fails validation keeps its previously published value. A
/// runtime that the effective version cannot run aborts the whole pass.
pub fn compute_pass<R: Rng + ?Sized>(
    snapshot: &Snapshot,
    subscribed: Option<&InstanceClassKind>,
    last_published: &BTreeMap<String, NodeGroupValue>,
    packages_proxy_port: u16,
    rng: &mut R,
) -> Result<PassPlan, ReconcilerError> {
    let version = effective_kubernetes_version(&snapshot.globals)?;
    let default_zones = snapshot.default_zones();
    let ctx = DerivationContext {
        version,
        default_cri: default_cri(&snapshot.globals),
        default_zones: &default_zones,
        cluster_uuid: &snapshot.globals.cluster_uuid,
        now: snapshot.timestamp.timestamp(),
    };

    let mut statuses = Vec::with_capacity(snapshot.node_groups.len());
    let mut published = BTreeMap::new();

    for ng in &snapshot.node_groups {
        let name = ng.metadata.name.clone().unwrap_or_default();
        match validate_node_group(ng, snapshot, subscribed, &default_zones) {
            Ok(resolved) => {
                let value = derive_node_group(ng, resolved, &ctx)?;
                statuses.push(NodeGroupStatusPatch::success(ng, value.kubernetes_version.clone()));
                published.insert(name, value);
            }
            Err(message) => {
                let previous = last_published.get(&name);
                warn!(node_group = %name, carried = previous.is_some(), "NodeGroup failed validation: {message}");
                statuses.push(NodeGroupStatusPatch::failure(
                    ng,
                    sticky_error(&message, previous.is_some()),
                ));
                if let Some(previous) = previous {
                    published.insert(name, previous.clone());
                }
            }
        }
    }

    let names: Vec<String> = snapshot
        .node_groups
        .iter()
        .filter_map(|ng| ng.metadata.name.clone())
        .collect();
    let tokens = plan_bootstrap_tokens(&names, &snapshot.bootstrap_tokens, snapshot.timestamp, rng);

    let internal = build_internal_values(
        published.values().cloned().collect(),
        tokens.publish.clone(),
        snapshot,
        packages_proxy_port,
    );

    Ok(PassPlan {
        node_group_statuses: statuses,
        instance_class_consumers: instance_class_consumers(snapshot),
        tokens,
        values: ValuesDocument::new(internal),
        published,
    })
}

/// Run one pass against the reconciler's store
pub async fn run_pass(
    reconciler: &Reconciler,
    trigger: TriggerSource,
) -> Result<PassOutcome, ReconcilerError> {
    let span = info_span!("reconcile_pass", trigger = trigger.as_str());
    async move {
        let start = Instant::now();
        let result = run_pass_inner(reconciler).await;
        metrics::observe_reconcile_duration(start.elapsed().as_secs_f64());
        match &result {
            Ok(outcome) => {
                metrics::increment_reconcile_passes(outcome.as_str());
                debug!(outcome = outcome.as_str(), elapsed_ms = start.elapsed().as_millis() as u64, "Pass finished");
            }
            Err(e) => {
                metrics::increment_reconcile_passes("failed");
                warn!("Pass failed: {e}");
            }
        }
        result
    }
    .instrument(span)
    .await
}

async fn run_pass_inner(reconciler: &Reconciler) -> Result<PassOutcome, ReconcilerError> {
    let store = reconciler.store.as_ref();

    // A pass that fails or rebinds exports no NodeGroup series
    metrics::reset_node_group_metrics();

    let cloud_provider = store.load_cloud_provider_config().await?;
    let declared = cloud_provider
        .as_ref()
        .map_or("", |c| c.instance_class_kind.as_str());
    if let Some(action) = reconciler.kind_resolver.resolve(declared) {
        info!(action = action.as_str(), "InstanceClass binding changed: {action}");
        metrics::increment_kind_binding_actions(action.as_str());
        return Ok(PassOutcome::Rebound);
    }
    let subscribed = reconciler.kind_resolver.subscribed();

    // Held until the flush is done so passes never interleave
    let mut last_published = reconciler.last_published.lock().await;

    let snapshot = store
        .load_snapshot(subscribed.as_ref(), cloud_provider, Utc::now())
        .await?;
    let plan = {
        let mut rng = rand::thread_rng();
        compute_pass(
            &snapshot,
            subscribed.as_ref(),
            &last_published,
            reconciler.config.packages_proxy_port,
            &mut rng,
        )?
    };

    write_statuses(
        store,
        &plan.node_group_statuses,
        subscribed.as_ref(),
        &plan.instance_class_consumers,
    )
    .await;

    for name in &plan.tokens.delete {
        store.delete_bootstrap_token(name).await?;
        metrics::increment_bootstrap_tokens_deleted();
    }
    for token in &plan.tokens.create {
        store.create_bootstrap_token(token).await?;
        metrics::increment_bootstrap_tokens_created();
    }

    store.publish_values(&plan.values).await?;

    for ng in &snapshot.node_groups {
        metrics::set_node_group_metrics(ng);
    }
    // Carried-forward values of invalid groups are not reconciled this pass
    let reconciled: BTreeSet<&str> = plan
        .node_group_statuses
        .iter()
        .filter(|status| status.kubernetes_version.is_some())
        .map(|status| status.name.as_str())
        .collect();
    for value in &plan.values.node_manager.internal.node_groups {
        if reconciled.contains(value.name.as_str()) {
            metrics::set_node_group_info(&value.name, value.cri_type());
        }
    }

    info!(
        node_groups = plan.published.len(),
        tokens_created = plan.tokens.create.len(),
        tokens_deleted = plan.tokens.delete.len(),
        "Published node manager values"
    );
    *last_published = plan.published;
    Ok(PassOutcome::Completed)
}
