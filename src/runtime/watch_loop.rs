//! # Watch Loop
//!
//! Watches every input of the NodeGroup pass and funnels the events into one
//! trigger queue. A single consumer drains the queue, so passes never overlap;
//! bursts of events inside the debounce window collapse into one pass.
//!
//! Besides watch events, passes are triggered by a periodic resync, an hourly
//! bootstrap token tick and the backoff retry of a failed pass.
//!
//! CertificateSigningRequests are handled by a separate kube-runtime
//! `Controller` that shares nothing with the NodeGroup loop.

use crate::config::{ControllerConfig, SharedControllerConfig};
use crate::constants::{
    CLOUD_PROVIDER_SECRET_NAME, CLUSTER_CONFIGURATION_SECRET_NAME,
    CONTROL_PLANE_ARGUMENTS_SECRET_NAME, INSTANCE_TYPES_CATALOG_NAME, KUBE_SYSTEM_NAMESPACE,
    MACHINE_DEPLOYMENT_LABEL_SELECTOR, NODE_GROUP_LABEL,
};
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::csr::{reconcile_csr, CsrApprover};
use crate::controller::reconciler::{run_pass, PassOutcome, Reconciler, TriggerSource};
use crate::controller::server::ServerState;
use crate::crd::{catalog_api_resource, machine_deployment_api_resource, InstanceClassKind, NodeGroup};
use crate::runtime::error_policy::{handle_csr_error, handle_pass_error, handle_watch_stream_error};
use chrono::{DateTime, Timelike, Utc};
use futures::{Stream, StreamExt};
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::Client;
use kube_runtime::{controller, watcher, Controller, WatchStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Pending triggers beyond this are dropped, a pass is queued anyway
const TRIGGER_QUEUE_CAPACITY: usize = 64;

/// Run the NodeGroup reconciliation loop until a shutdown signal arrives
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    config: SharedControllerConfig,
) -> Result<(), anyhow::Error> {
    info!("Starting controller watch loop...");

    let (tx, mut rx) = mpsc::channel(TRIGGER_QUEUE_CAPACITY);
    let watchers = spawn_watchers(&client, &reconciler, &config, &tx);

    let mut backoff = FibonacciBackoff::new(config.backoff_start_secs, config.backoff_max_secs);
    let mut retry_at: Option<Instant> = None;
    let mut resync = tokio::time::interval_at(
        Instant::now() + config.resync_interval(),
        config.resync_interval(),
    );
    resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    send_trigger(&tx, TriggerSource::Startup);

    loop {
        let trigger = tokio::select! {
            _ = &mut shutdown => {
                info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
                break;
            }
            Some(trigger) = rx.recv() => trigger,
            _ = resync.tick() => TriggerSource::Resync,
            () = retry_sleep(retry_at) => TriggerSource::Retry,
        };
        if trigger == TriggerSource::Retry {
            retry_at = None;
        }

        tokio::time::sleep(config.debounce()).await;
        let mut coalesced = 0_usize;
        while rx.try_recv().is_ok() {
            coalesced += 1;
        }
        debug!(trigger = trigger.as_str(), coalesced, "Running reconciliation pass");

        match run_pass(&reconciler, trigger).await {
            Ok(PassOutcome::Completed) => {
                backoff.reset();
                retry_at = None;
                if !server_state.is_ready() {
                    info!("First reconciliation pass completed, marking controller ready");
                    server_state.set_ready(true);
                }
            }
            Ok(PassOutcome::Rebound) => {
                // The store lists InstanceClasses directly, the next pass need not wait for the watcher
                send_trigger(&tx, TriggerSource::InstanceClassEvent);
            }
            Err(e) => {
                let delay = handle_pass_error(&e, &mut backoff);
                retry_at = Some(Instant::now() + delay);
            }
        }
    }

    server_state.set_ready(false);
    for handle in watchers {
        handle.abort();
    }
    info!("Controller stopped gracefully");
    Ok(())
}

/// Run the CSR approver until a shutdown signal arrives
pub async fn run_csr_approver(
    client: Client,
    config: SharedControllerConfig,
) -> Result<(), anyhow::Error> {
    if !config.csr_approver_enabled {
        info!("CSR approver disabled");
        return Ok(());
    }

    let api: Api<CertificateSigningRequest> = Api::all(client);
    let ctx = Arc::new(CsrApprover::new(api.clone(), config.clone()));
    info!(
        signers = ?config.csr_signer_names,
        concurrency = config.csr_concurrency,
        "Starting CSR approver"
    );

    Controller::new(api, watcher::Config::default())
        .with_config(controller::Config::default().concurrency(config.csr_concurrency))
        .shutdown_on_signal()
        .run(reconcile_csr, handle_csr_error, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _)) => debug!(csr = %obj.name, "CSR reconciled"),
                Err(e) => {
                    handle_watch_stream_error("CertificateSigningRequest", &format!("{e:?}"));
                }
            }
        })
        .await;

    info!("CSR approver stopped");
    Ok(())
}

fn spawn_watchers(
    client: &Client,
    reconciler: &Reconciler,
    config: &ControllerConfig,
    tx: &mpsc::Sender<TriggerSource>,
) -> Vec<JoinHandle<()>> {
    let restart_delay = config.watch_restart_delay_duration();
    let node_groups: Api<DynamicObject> =
        Api::all_with(client.clone(), &ApiResource::erase::<NodeGroup>(&()));
    let machine_deployments: Api<DynamicObject> = Api::namespaced_with(
        client.clone(),
        &config.controller_namespace,
        &machine_deployment_api_resource(),
    );
    let catalogs: Api<DynamicObject> = Api::all_with(client.clone(), &catalog_api_resource());
    let secrets: Api<Secret> = Api::namespaced(client.clone(), KUBE_SYSTEM_NAMESPACE);

    let mut handles = vec![
        spawn_trigger_watcher(
            "NodeGroup",
            node_groups,
            watcher::Config::default(),
            TriggerSource::NodeGroupEvent,
            restart_delay,
            tx.clone(),
        ),
        spawn_trigger_watcher(
            "MachineDeployment",
            machine_deployments,
            watcher::Config::default().labels(MACHINE_DEPLOYMENT_LABEL_SELECTOR),
            TriggerSource::MachineDeploymentEvent,
            restart_delay,
            tx.clone(),
        ),
        spawn_trigger_watcher(
            "InstanceTypesCatalog",
            catalogs,
            watcher::Config::default().fields(&format!("metadata.name={INSTANCE_TYPES_CATALOG_NAME}")),
            TriggerSource::CatalogEvent,
            restart_delay,
            tx.clone(),
        ),
        spawn_trigger_watcher(
            "bootstrap token Secret",
            secrets.clone(),
            watcher::Config::default().labels(NODE_GROUP_LABEL),
            TriggerSource::SecretEvent,
            restart_delay,
            tx.clone(),
        ),
    ];
    for name in [
        CLOUD_PROVIDER_SECRET_NAME,
        CONTROL_PLANE_ARGUMENTS_SECRET_NAME,
        CLUSTER_CONFIGURATION_SECRET_NAME,
    ] {
        handles.push(spawn_trigger_watcher(
            name,
            secrets.clone(),
            watcher::Config::default().fields(&format!("metadata.name={name}")),
            TriggerSource::SecretEvent,
            restart_delay,
            tx.clone(),
        ));
    }
    handles.push(spawn_instance_class_watcher(
        client.clone(),
        reconciler.kind_resolver.subscribe(),
        restart_delay,
        tx.clone(),
    ));
    handles.push(spawn_token_cron(config.token_cron_minute, tx.clone()));
    handles
}

fn spawn_trigger_watcher<K>(
    resource: &'static str,
    api: Api<K>,
    config: watcher::Config,
    trigger: TriggerSource,
    restart_delay: Duration,
    tx: mpsc::Sender<TriggerSource>,
) -> JoinHandle<()>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let stream = watcher(api.clone(), config.clone()).default_backoff();
            if !forward_events(resource, stream, trigger, &tx).await {
                return;
            }
            warn!(resource, delay_secs = restart_delay.as_secs(), "Watch stream ended, restarting");
            tokio::time::sleep(restart_delay).await;
        }
    })
}

/// Follow the subscribed InstanceClass kind, rewatching whenever it changes
fn spawn_instance_class_watcher(
    client: Client,
    mut subscription: watch::Receiver<Option<InstanceClassKind>>,
    restart_delay: Duration,
    tx: mpsc::Sender<TriggerSource>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let current = subscription.borrow_and_update().clone();
            if let Some(kind) = current {
                info!(kind = %kind.kind, api_version = %kind.api_version(), "Watching InstanceClasses");
                let api: Api<DynamicObject> = Api::all_with(client.clone(), &kind.api_resource());
                let events = forward_events(
                    &kind.kind,
                    watcher(api, watcher::Config::default()).default_backoff(),
                    TriggerSource::InstanceClassEvent,
                    &tx,
                );
                tokio::select! {
                    open = events => {
                        if !open {
                            return;
                        }
                        warn!(kind = %kind.kind, "InstanceClass watch ended, restarting");
                        tokio::time::sleep(restart_delay).await;
                    }
                    changed = subscription.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            } else {
                debug!("No InstanceClass kind subscribed");
                if subscription.changed().await.is_err() {
                    return;
                }
            }
        }
    })
}

fn spawn_token_cron(minute: u32, tx: mpsc::Sender<TriggerSource>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(until_next_token_tick(Utc::now(), minute)).await;
            if !send_trigger(&tx, TriggerSource::TokenCron) {
                return;
            }
        }
    })
}

/// Time until the next `HH:minute:00`
pub fn until_next_token_tick(now: DateTime<Utc>, minute: u32) -> Duration {
    let hour = Duration::from_secs(3600);
    let Some(this_hour) = now
        .with_minute(minute)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
    else {
        return hour;
    };
    let next = if this_hour > now {
        this_hour
    } else {
        this_hour + chrono::Duration::hours(1)
    };
    (next - now).to_std().unwrap_or(hour)
}

/// Turn watch events into triggers until the stream or the queue closes
///
/// Returns false once the queue is closed.
async fn forward_events<K, S>(
    resource: &str,
    stream: S,
    trigger: TriggerSource,
    tx: &mpsc::Sender<TriggerSource>,
) -> bool
where
    S: Stream<Item = Result<watcher::Event<K>, watcher::Error>>,
{
    let mut stream = std::pin::pin!(stream);
    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Apply(_) | watcher::Event::Delete(_) | watcher::Event::InitDone) => {
                if !send_trigger(tx, trigger) {
                    return false;
                }
            }
            Ok(_) => {}
            Err(e) => {
                handle_watch_stream_error(resource, &format!("{e:?}"));
            }
        }
    }
    true
}

/// Queue a trigger; false once the loop is gone
fn send_trigger(tx: &mpsc::Sender<TriggerSource>, trigger: TriggerSource) -> bool {
    match tx.try_send(trigger) {
        Ok(()) | Err(TrySendError::Full(_)) => true,
        Err(TrySendError::Closed(_)) => false,
    }
}

async fn retry_sleep(retry_at: Option<Instant>) {
    match retry_at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
