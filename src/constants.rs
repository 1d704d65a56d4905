//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! Durations, object names and labels that other components of the platform
//! rely on live here. Operational knobs can be overridden via environment
//! variables (see [`crate::config::ControllerConfig`]).

// ---------------------------------------------------------------------------
// HTTP server
// ---------------------------------------------------------------------------

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

// ---------------------------------------------------------------------------
// Reconciliation loop
// ---------------------------------------------------------------------------

/// Periodic resync tick, guarantees convergence when no events fire (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 600;

/// Window in which bursts of watch events are coalesced into one pass (milliseconds)
pub const DEFAULT_DEBOUNCE_MILLIS: u64 = 500;

/// Minute of every hour at which the bootstrap token tick fires
pub const DEFAULT_TOKEN_CRON_MINUTE: u32 = 23;

/// Fibonacci backoff starting value for failed passes (seconds)
pub const DEFAULT_BACKOFF_START_SECS: u64 = 5;

/// Fibonacci backoff maximum value for failed passes (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Default delay before restarting the watch loop after it fails (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Maximum number of CSRs approved concurrently
pub const DEFAULT_CSR_CONCURRENCY: u16 = 8;

// ---------------------------------------------------------------------------
// Cluster objects
// ---------------------------------------------------------------------------

/// Namespace holding cluster-wide secrets and bootstrap tokens
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

/// Namespace of the node manager (MachineDeployments, values Secret)
pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "d8-cloud-instance-manager";

/// Secret the derived value tree is published to
///
/// A Secret because the tree carries live bootstrap tokens.
pub const DEFAULT_VALUES_SECRET_NAME: &str = "d8-node-manager-values";

/// Key of the value tree inside the values Secret
pub const VALUES_KEY: &str = "values.json";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "node-manager-controller";

/// Cloud provider secret carrying `instanceClassKind` and `zones`
pub const CLOUD_PROVIDER_SECRET_NAME: &str = "d8-node-manager-cloud-provider";

/// Control-plane arguments secret (`arguments.json`, `featureGates.json`)
pub const CONTROL_PLANE_ARGUMENTS_SECRET_NAME: &str =
    "d8-control-plane-manager-control-plane-arguments";

/// Cluster configuration secret
pub const CLUSTER_CONFIGURATION_SECRET_NAME: &str = "d8-cluster-configuration";

/// Key of the YAML document inside the cluster configuration secret
pub const CLUSTER_CONFIGURATION_KEY: &str = "cluster-configuration.yaml";

/// ConfigMap holding the cluster UUID
pub const CLUSTER_UUID_CONFIGMAP_NAME: &str = "d8-cluster-uuid";

/// Key of the UUID inside [`CLUSTER_UUID_CONFIGMAP_NAME`]
pub const CLUSTER_UUID_KEY: &str = "cluster-uuid";

/// Name of the InstanceTypesCatalog used for scale-from-zero
pub const INSTANCE_TYPES_CATALOG_NAME: &str = "for-cluster-autoscaler";

/// Label selecting managed MachineDeployments
pub const MACHINE_DEPLOYMENT_LABEL_SELECTOR: &str = "heritage=deckhouse";

/// Label identifying control-plane nodes
pub const CONTROL_PLANE_NODE_LABEL: &str = "node-role.kubernetes.io/control-plane";

/// NodeGroup annotation forcing a rollout
pub const MANUAL_ROLLOUT_ID_ANNOTATION: &str = "manual-rollout-id";

/// MachineDeployment annotation naming its zone
pub const MACHINE_DEPLOYMENT_ZONE_ANNOTATION: &str = "zone";

// ---------------------------------------------------------------------------
// Bootstrap tokens
// ---------------------------------------------------------------------------

/// Label binding a bootstrap token secret to its NodeGroup
pub const NODE_GROUP_LABEL: &str = "node-manager.deckhouse.io/node-group";

/// Secret type of bootstrap tokens
pub const BOOTSTRAP_TOKEN_SECRET_TYPE: &str = "bootstrap.kubernetes.io/token";

/// Name prefix of bootstrap token secrets
pub const BOOTSTRAP_TOKEN_SECRET_PREFIX: &str = "bootstrap-token-";

/// Extra groups granted to nodes joining with the token
pub const BOOTSTRAP_TOKEN_AUTH_EXTRA_GROUPS: &str = "system:bootstrappers:d8-node-manager";

/// Lifetime of a freshly issued token (seconds)
pub const BOOTSTRAP_TOKEN_TTL_SECS: i64 = 4 * 60 * 60;

/// Remaining validity below which a token is rotated (seconds)
pub const BOOTSTRAP_TOKEN_ROTATE_BEFORE_SECS: i64 = 3 * 60 * 60;

/// Length of the public token id
pub const BOOTSTRAP_TOKEN_ID_LEN: usize = 6;

/// Length of the token secret
pub const BOOTSTRAP_TOKEN_SECRET_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// Rollout window that `updateEpoch` shards NodeGroups across (seconds)
pub const UPDATE_EPOCH_WINDOW_SECS: i64 = 4 * 60 * 60;

/// Group all InstanceClass kinds belong to
pub const INSTANCE_CLASS_GROUP: &str = "deckhouse.io";

/// Default package proxy port published to the node bootstrap scripts
pub const DEFAULT_PACKAGES_PROXY_PORT: u16 = 4219;

// ---------------------------------------------------------------------------
// CSR approval
// ---------------------------------------------------------------------------

/// Signer of kubelet serving certificates
pub const KUBELET_SERVING_SIGNER: &str = "kubernetes.io/kubelet-serving";

/// Reason written on auto-approved CSRs
pub const CSR_APPROVAL_REASON: &str = "AutoApproved by node-manager";

/// Message written on auto-approved CSRs
pub const CSR_APPROVAL_MESSAGE: &str = "autoapproved";
