//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::config::{env_var_opt, env_var_or_default, env_var_or_default_bool, env_var_or_default_str};
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace where the node manager runs
    /// MachineDeployments are watched here and the values Secret is written here
    pub controller_namespace: String,
    /// Name of the Secret the derived value tree is published to
    pub values_secret_name: String,
    /// Periodic resync interval (seconds)
    pub resync_interval_secs: u64,
    /// Window in which watch events are coalesced into a single pass (milliseconds)
    pub debounce_millis: u64,
    /// Minute of the hour at which the bootstrap token tick fires
    pub token_cron_minute: u32,
    /// Fibonacci backoff starting value (seconds)
    pub backoff_start_secs: u64,
    /// Fibonacci backoff maximum value (seconds)
    pub backoff_max_secs: u64,
    /// Delay before the watch loop is restarted after an error (seconds)
    pub watch_restart_delay_secs: u64,
    /// Signers whose CSRs are handled by the approver
    /// Only `kubernetes.io/kubelet-serving` requests are validated, others are approved as-is
    pub csr_signer_names: Vec<String>,
    /// Whether the CSR approver runs at all
    pub csr_approver_enabled: bool,
    /// Maximum CSRs reconciled concurrently
    pub csr_concurrency: u16,
    /// Cluster UUID override, takes precedence over the `d8-cluster-uuid` ConfigMap
    pub cluster_uuid: Option<String>,
    /// Port of the packages proxy published to bootstrap scripts
    pub packages_proxy_port: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            controller_namespace: DEFAULT_CONTROLLER_NAMESPACE.to_string(),
            values_secret_name: DEFAULT_VALUES_SECRET_NAME.to_string(),
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            debounce_millis: DEFAULT_DEBOUNCE_MILLIS,
            token_cron_minute: DEFAULT_TOKEN_CRON_MINUTE,
            backoff_start_secs: DEFAULT_BACKOFF_START_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            csr_signer_names: vec![KUBELET_SERVING_SIGNER.to_string()],
            csr_approver_enabled: true,
            csr_concurrency: DEFAULT_CSR_CONCURRENCY,
            cluster_uuid: None,
            packages_proxy_port: DEFAULT_PACKAGES_PROXY_PORT,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        let defaults = Self::default();

        let token_cron_minute =
            env_var_or_default("TOKEN_CRON_MINUTE", DEFAULT_TOKEN_CRON_MINUTE);
        let token_cron_minute = if token_cron_minute < 60 {
            token_cron_minute
        } else {
            tracing::warn!(
                token_cron_minute,
                "TOKEN_CRON_MINUTE must be below 60, using default"
            );
            DEFAULT_TOKEN_CRON_MINUTE
        };

        Self {
            controller_namespace: env_var_or_default_str(
                "CONTROLLER_NAMESPACE",
                DEFAULT_CONTROLLER_NAMESPACE,
            ),
            values_secret_name: env_var_or_default_str(
                "VALUES_SECRET_NAME",
                DEFAULT_VALUES_SECRET_NAME,
            ),
            resync_interval_secs: env_var_or_default(
                "RESYNC_INTERVAL_SECS",
                DEFAULT_RESYNC_INTERVAL_SECS,
            ),
            debounce_millis: env_var_or_default("DEBOUNCE_MILLIS", DEFAULT_DEBOUNCE_MILLIS),
            token_cron_minute,
            backoff_start_secs: env_var_or_default(
                "BACKOFF_START_SECS",
                DEFAULT_BACKOFF_START_SECS,
            ),
            backoff_max_secs: env_var_or_default("BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            csr_signer_names: env_var_opt("CSR_SIGNER_NAMES")
                .map(|raw| parse_signer_names(&raw))
                .filter(|names| !names.is_empty())
                .unwrap_or(defaults.csr_signer_names),
            csr_approver_enabled: env_var_or_default_bool("CSR_APPROVER_ENABLED", true),
            csr_concurrency: env_var_or_default("CSR_CONCURRENCY", DEFAULT_CSR_CONCURRENCY),
            cluster_uuid: env_var_opt("CLUSTER_UUID"),
            packages_proxy_port: env_var_or_default(
                "PACKAGES_PROXY_PORT",
                DEFAULT_PACKAGES_PROXY_PORT,
            ),
        }
    }

    /// Get periodic resync duration
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    /// Get debounce window
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_millis)
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Whether CSRs issued by `signer` are handled by the approver
    pub fn handles_signer(&self, signer: &str) -> bool {
        self.csr_signer_names.iter().any(|s| s == signer)
    }
}

fn parse_signer_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
