//! # Kubernetes-backed store
//!
//! Reads the pass inputs with plain list/get calls and writes with merge
//! patches. Auxiliary inputs that fail to decode are logged and treated as
//! absent so one broken object does not stall every NodeGroup.

use super::ClusterStore;
use crate::config::SharedControllerConfig;
use crate::constants::{
    CLOUD_PROVIDER_SECRET_NAME, CLUSTER_CONFIGURATION_KEY, CLUSTER_CONFIGURATION_SECRET_NAME,
    CLUSTER_UUID_CONFIGMAP_NAME, CLUSTER_UUID_KEY, CONTROL_PLANE_ARGUMENTS_SECRET_NAME,
    CONTROL_PLANE_NODE_LABEL, FIELD_MANAGER, INSTANCE_TYPES_CATALOG_NAME, KUBE_SYSTEM_NAMESPACE,
    MACHINE_DEPLOYMENT_LABEL_SELECTOR, NODE_GROUP_LABEL, VALUES_KEY,
};
use crate::controller::bootstrap_token::BootstrapTokenSecret;
use crate::controller::reconciler::snapshot::{
    CloudProviderConfig, ClusterConfiguration, ControlPlaneArguments, GlobalSettings, Snapshot,
};
use crate::controller::reconciler::status::{consumers_patch, NodeGroupStatusPatch};
use crate::controller::reconciler::values::ValuesDocument;
use crate::controller::reconciler::version::KubeVersion;
use crate::crd::{
    catalog_api_resource, machine_deployment_api_resource, InstanceClassInfo, InstanceClassKind,
    InstanceTypesCatalog, MachineDeploymentInfo, NodeGroup,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::Client;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// [`ClusterStore`] backed by the API server
#[derive(Clone)]
pub struct KubeClusterStore {
    client: Client,
    config: SharedControllerConfig,
}

impl std::fmt::Debug for KubeClusterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterStore")
            .field("namespace", &self.config.controller_namespace)
            .finish_non_exhaustive()
    }
}

fn secret_data(secret: &Secret) -> BTreeMap<String, Vec<u8>> {
    secret
        .data
        .as_ref()
        .map(|data| data.iter().map(|(k, v)| (k.clone(), v.0.clone())).collect())
        .unwrap_or_default()
}

/// Secret carrying the serialized value tree under [`VALUES_KEY`]
pub fn values_secret(name: &str, namespace: &str, values: &ValuesDocument) -> Result<Secret> {
    let body = serde_json::to_vec(values).context("Failed to serialize values")?;
    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(BTreeMap::from([(VALUES_KEY.to_string(), ByteString(body))])),
        ..Secret::default()
    })
}

/// Value tree held by a values Secret, if it decodes
pub fn decode_values_secret(secret: &Secret) -> Option<ValuesDocument> {
    let raw = secret_data(secret).remove(VALUES_KEY)?;
    match serde_json::from_slice(&raw) {
        Ok(document) => Some(document),
        Err(e) => {
            warn!("Previously published values do not decode, starting without them: {e}");
            None
        }
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(api_err) if api_err.code == 404)
}

impl KubeClusterStore {
    #[must_use]
    pub fn new(client: Client, config: SharedControllerConfig) -> Self {
        Self { client, config }
    }

    fn kube_system_secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), KUBE_SYSTEM_NAMESPACE)
    }

    fn node_groups_api(&self) -> Api<NodeGroup> {
        Api::all(self.client.clone())
    }

    fn values_api(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.config.controller_namespace)
    }

    async fn list_node_groups(&self) -> Result<Vec<NodeGroup>> {
        let ar = ApiResource::erase::<NodeGroup>(&());
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        let list = api
            .list(&ListParams::default())
            .await
            .context("Failed to list NodeGroups")?;

        let mut node_groups: Vec<NodeGroup> = list
            .items
            .into_iter()
            .filter_map(|obj| {
                let name = obj.metadata.name.clone().unwrap_or_default();
                match obj.try_parse::<NodeGroup>() {
                    Ok(ng) => Some(ng),
                    Err(e) => {
                        warn!(node_group = %name, "Skipping NodeGroup that does not decode: {e}");
                        None
                    }
                }
            })
            .collect();
        node_groups.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(node_groups)
    }

    async fn list_instance_classes(&self, kind: &InstanceClassKind) -> Result<Vec<InstanceClassInfo>> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &kind.api_resource());
        match api.list(&ListParams::default()).await {
            Ok(list) => Ok(list.items.iter().map(InstanceClassInfo::from_dynamic).collect()),
            Err(e) if is_not_found(&e) => {
                warn!(kind = %kind.kind, "InstanceClass kind is not served by the API server");
                Ok(Vec::new())
            }
            Err(e) => Err(e).context(format!("Failed to list {}", kind.kind)),
        }
    }

    async fn list_machine_deployments(&self) -> Result<Vec<MachineDeploymentInfo>> {
        let api: Api<DynamicObject> = Api::namespaced_with(
            self.client.clone(),
            &self.config.controller_namespace,
            &machine_deployment_api_resource(),
        );
        match api
            .list(&ListParams::default().labels(MACHINE_DEPLOYMENT_LABEL_SELECTOR))
            .await
        {
            Ok(list) => Ok(list.items.iter().map(MachineDeploymentInfo::from_dynamic).collect()),
            Err(e) if is_not_found(&e) => Ok(Vec::new()),
            Err(e) => Err(e).context("Failed to list MachineDeployments"),
        }
    }

    async fn load_catalog(&self) -> InstanceTypesCatalog {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &catalog_api_resource());
        match api.get_opt(INSTANCE_TYPES_CATALOG_NAME).await {
            Ok(Some(obj)) => InstanceTypesCatalog::from_dynamic(&obj).unwrap_or_else(|e| {
                warn!("InstanceTypesCatalog {INSTANCE_TYPES_CATALOG_NAME} does not decode: {e}");
                InstanceTypesCatalog::default()
            }),
            Ok(None) => InstanceTypesCatalog::default(),
            Err(e) => {
                warn!("Failed to read InstanceTypesCatalog: {e}");
                InstanceTypesCatalog::default()
            }
        }
    }

    async fn load_globals(&self) -> Result<GlobalSettings> {
        let discovery_version = match self.client.apiserver_version().await {
            Ok(info) => match info.git_version.parse::<KubeVersion>() {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("Discovery returned an unusable version: {e}");
                    None
                }
            },
            Err(e) => {
                warn!("Failed to query apiserver version: {e}");
                None
            }
        };

        let nodes: Api<Node> = Api::all(self.client.clone());
        let control_plane_versions = nodes
            .list(&ListParams::default().labels(CONTROL_PLANE_NODE_LABEL))
            .await
            .context("Failed to list control-plane nodes")?
            .items
            .iter()
            .filter_map(|node| {
                let raw = node.status.as_ref()?.node_info.as_ref()?.kubelet_version.clone();
                match raw.parse::<KubeVersion>() {
                    Ok(v) => Some(v),
                    Err(e) => {
                        warn!(node = node.metadata.name.as_deref().unwrap_or_default(), "Skipping kubelet version: {e}");
                        None
                    }
                }
            })
            .collect();

        let cluster_configuration = match self
            .kube_system_secrets()
            .get_opt(CLUSTER_CONFIGURATION_SECRET_NAME)
            .await
            .context("Failed to read cluster configuration secret")?
        {
            Some(secret) => {
                let data = secret_data(&secret);
                match data.get(CLUSTER_CONFIGURATION_KEY).map(|raw| {
                    String::from_utf8_lossy(raw).into_owned()
                }) {
                    Some(raw) => ClusterConfiguration::from_yaml(&raw).unwrap_or_else(|e| {
                        warn!("Ignoring cluster configuration: {e}");
                        ClusterConfiguration::default()
                    }),
                    None => ClusterConfiguration::default(),
                }
            }
            None => ClusterConfiguration::default(),
        };

        let cluster_uuid = match &self.config.cluster_uuid {
            Some(uuid) => uuid.clone(),
            None => {
                let config_maps: Api<ConfigMap> =
                    Api::namespaced(self.client.clone(), KUBE_SYSTEM_NAMESPACE);
                config_maps
                    .get_opt(CLUSTER_UUID_CONFIGMAP_NAME)
                    .await
                    .context("Failed to read cluster uuid ConfigMap")?
                    .and_then(|cm| cm.data)
                    .and_then(|data| data.get(CLUSTER_UUID_KEY).cloned())
                    .unwrap_or_default()
            }
        };
        if cluster_uuid.is_empty() {
            warn!("Cluster UUID is unknown, updateEpoch drift falls back to the group name only");
        }

        Ok(GlobalSettings {
            discovery_version,
            control_plane_versions,
            cluster_configuration,
            cluster_uuid,
        })
    }

    async fn load_control_plane_arguments(&self) -> Result<Option<ControlPlaneArguments>> {
        let Some(secret) = self
            .kube_system_secrets()
            .get_opt(CONTROL_PLANE_ARGUMENTS_SECRET_NAME)
            .await
            .context("Failed to read control-plane arguments secret")?
        else {
            return Ok(None);
        };
        match ControlPlaneArguments::from_secret_data(&secret_data(&secret)) {
            Ok(arguments) => Ok(Some(arguments)),
            Err(e) => {
                warn!("Ignoring control-plane arguments: {e}");
                Ok(None)
            }
        }
    }

    async fn list_bootstrap_tokens(&self) -> Result<Vec<BootstrapTokenSecret>> {
        let secrets = self
            .kube_system_secrets()
            .list(&ListParams::default().labels(NODE_GROUP_LABEL))
            .await
            .context("Failed to list bootstrap token secrets")?;
        Ok(secrets
            .items
            .iter()
            .filter_map(BootstrapTokenSecret::from_secret)
            .collect())
    }
}

#[async_trait]
impl ClusterStore for KubeClusterStore {
    async fn load_cloud_provider_config(&self) -> Result<Option<CloudProviderConfig>> {
        let Some(secret) = self
            .kube_system_secrets()
            .get_opt(CLOUD_PROVIDER_SECRET_NAME)
            .await
            .context("Failed to read cloud provider secret")?
        else {
            debug!("No cloud provider secret, static cluster");
            return Ok(None);
        };
        match CloudProviderConfig::from_secret_data(&secret_data(&secret)) {
            Ok(config) => Ok(Some(config)),
            Err(e) => {
                warn!("Cloud provider secret does not decode: {e}");
                Ok(None)
            }
        }
    }

    async fn load_snapshot(
        &self,
        kind: Option<&InstanceClassKind>,
        cloud_provider: Option<CloudProviderConfig>,
        now: DateTime<Utc>,
    ) -> Result<Snapshot> {
        let instance_classes = match kind {
            Some(kind) => self.list_instance_classes(kind).await?,
            None => Vec::new(),
        };

        Ok(Snapshot {
            node_groups: self.list_node_groups().await?,
            instance_classes,
            machine_deployments: self.list_machine_deployments().await?,
            cloud_provider,
            catalog: self.load_catalog().await,
            globals: self.load_globals().await?,
            control_plane_arguments: self.load_control_plane_arguments().await?,
            bootstrap_tokens: self.list_bootstrap_tokens().await?,
            timestamp: now,
        })
    }

    async fn patch_node_group_status(&self, patch: &NodeGroupStatusPatch) -> Result<()> {
        match self
            .node_groups_api()
            .patch_status(&patch.name, &PatchParams::default(), &Patch::Merge(patch.to_patch()))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(node_group = %patch.name, "NodeGroup is gone, skipping status patch");
                Ok(())
            }
            Err(e) => Err(e).context(format!("Failed to patch status of NodeGroup {}", patch.name)),
        }
    }

    async fn patch_instance_class_status(
        &self,
        kind: &InstanceClassKind,
        name: &str,
        consumers: &[String],
    ) -> Result<()> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &kind.api_resource());
        match api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(consumers_patch(consumers)))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e).context(format!("Failed to patch status of {}/{name}", kind.kind)),
        }
    }

    async fn delete_bootstrap_token(&self, name: &str) -> Result<()> {
        match self
            .kube_system_secrets()
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                info!(secret = %name, "Deleted expired bootstrap token");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e).context(format!("Failed to delete bootstrap token {name}")),
        }
    }

    async fn create_bootstrap_token(&self, token: &BootstrapTokenSecret) -> Result<()> {
        self.kube_system_secrets()
            .create(&PostParams::default(), &token.to_secret(KUBE_SYSTEM_NAMESPACE))
            .await
            .context(format!(
                "Failed to create bootstrap token {} for NodeGroup {}",
                token.name, token.node_group
            ))?;
        Ok(())
    }

    async fn publish_values(&self, values: &ValuesDocument) -> Result<()> {
        let name = &self.config.values_secret_name;
        let secret = values_secret(name, &self.config.controller_namespace, values)?;
        self.values_api()
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&secret),
            )
            .await
            .context(format!(
                "Failed to publish values to Secret {}/{name}",
                self.config.controller_namespace
            ))?;
        Ok(())
    }

    async fn load_published_values(&self) -> Result<Option<ValuesDocument>> {
        let secret = self
            .values_api()
            .get_opt(&self.config.values_secret_name)
            .await
            .context("Failed to read values Secret")?;
        Ok(secret.as_ref().and_then(decode_values_secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::reconciler::values::InternalValues;

    fn document() -> ValuesDocument {
        let mut internal = InternalValues::default();
        internal
            .bootstrap_tokens
            .insert("worker".to_string(), "abcdef.0123456789abcdef".to_string());
        ValuesDocument::new(internal)
    }

    #[test]
    fn test_values_are_published_as_secret_data() {
        let secret = values_secret("d8-node-manager-values", "d8-cloud-instance-manager", &document()).unwrap();

        assert_eq!(secret.metadata.name.as_deref(), Some("d8-node-manager-values"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("d8-cloud-instance-manager"));
        assert_eq!(secret.type_.as_deref(), Some("Opaque"));
        assert!(secret.string_data.is_none());

        // Serialized for the API server, the token only appears base64 encoded
        let wire = serde_json::to_value(&secret).unwrap();
        assert_eq!(wire["kind"], "Secret");
        assert_eq!(wire["apiVersion"], "v1");
        assert!(!wire.to_string().contains("abcdef.0123456789abcdef"));
    }

    #[test]
    fn test_values_secret_decodes_back() {
        let secret = values_secret("values", "ns", &document()).unwrap();
        let decoded = decode_values_secret(&secret).unwrap();
        assert_eq!(
            decoded.node_manager.internal.bootstrap_tokens["worker"],
            "abcdef.0123456789abcdef"
        );

        let mut broken = secret;
        broken.data = Some(BTreeMap::from([(VALUES_KEY.to_string(), ByteString(b"{".to_vec()))]));
        assert!(decode_values_secret(&broken).is_none());
        assert!(decode_values_secret(&Secret::default()).is_none());
    }
}
