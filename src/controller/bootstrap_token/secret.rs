//! # Bootstrap token secrets
//!
//! Conversion between `bootstrap.kubernetes.io/token` Secrets and the view the
//! token planner works with.

use crate::constants::{
    BOOTSTRAP_TOKEN_AUTH_EXTRA_GROUPS, BOOTSTRAP_TOKEN_SECRET_PREFIX, BOOTSTRAP_TOKEN_SECRET_TYPE,
    NODE_GROUP_LABEL,
};
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use tracing::warn;

/// A bootstrap token Secret labelled with its NodeGroup
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapTokenSecret {
    pub name: String,
    pub node_group: String,
    pub token_id: String,
    pub token_secret: String,
    /// `None` when the field is missing or unparseable
    pub expiration: Option<DateTime<Utc>>,
    pub creation_timestamp: Option<DateTime<Utc>>,
}

// Keep the secret half out of logs
impl std::fmt::Debug for BootstrapTokenSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapTokenSecret")
            .field("name", &self.name)
            .field("node_group", &self.node_group)
            .field("token_id", &self.token_id)
            .field("token_secret", &"***")
            .field("expiration", &self.expiration)
            .field("creation_timestamp", &self.creation_timestamp)
            .finish()
    }
}

impl BootstrapTokenSecret {
    /// A fresh token, named after its id
    #[must_use]
    pub fn new(
        node_group: &str,
        token_id: String,
        token_secret: String,
        expiration: DateTime<Utc>,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            name: format!("{BOOTSTRAP_TOKEN_SECRET_PREFIX}{token_id}"),
            node_group: node_group.to_string(),
            token_id,
            token_secret,
            expiration: Some(expiration),
            creation_timestamp: Some(created),
        }
    }

    /// `<tokenId>.<tokenSecret>`, the form kubeadm joins with
    #[must_use]
    pub fn token(&self) -> String {
        format!("{}.{}", self.token_id, self.token_secret)
    }

    /// Seconds until expiration, `None` when it is unknown
    #[must_use]
    pub fn valid_for(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expiration.map(|e| (e - now).num_seconds())
    }

    /// Read a labelled token Secret, `None` for Secrets without the label
    #[must_use]
    pub fn from_secret(secret: &Secret) -> Option<Self> {
        let name = secret.metadata.name.clone()?;
        let node_group = secret.metadata.labels.as_ref()?.get(NODE_GROUP_LABEL)?.clone();
        let data = secret.data.clone().unwrap_or_default();
        let field = |key: &str| -> String {
            data.get(key)
                .and_then(|v| String::from_utf8(v.0.clone()).ok())
                .unwrap_or_default()
        };

        let raw_expiration = field("expiration");
        let expiration = match DateTime::parse_from_rfc3339(raw_expiration.trim()) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                warn!(secret = %name, "Bootstrap token expiration {raw_expiration:?} is not RFC3339: {e}");
                None
            }
        };

        Some(Self {
            token_id: field("token-id"),
            token_secret: field("token-secret"),
            expiration,
            creation_timestamp: secret.metadata.creation_timestamp.as_ref().and_then(|t| {
                DateTime::<Utc>::from_timestamp(t.0.timestamp(), 0)
            }),
            name,
            node_group,
        })
    }

    /// The Secret to create in `namespace`
    #[must_use]
    pub fn to_secret(&self, namespace: &str) -> Secret {
        let expiration = self
            .expiration
            .map(|e| e.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default();
        let data: BTreeMap<String, ByteString> = [
            ("auth-extra-groups", BOOTSTRAP_TOKEN_AUTH_EXTRA_GROUPS.to_string()),
            ("expiration", expiration),
            ("token-id", self.token_id.clone()),
            ("token-secret", self.token_secret.clone()),
            ("usage-bootstrap-authentication", "true".to_string()),
            ("usage-bootstrap-signing", "true".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), ByteString(v.into_bytes())))
        .collect();

        Secret {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(
                    NODE_GROUP_LABEL.to_string(),
                    self.node_group.clone(),
                )])),
                ..ObjectMeta::default()
            },
            type_: Some(BOOTSTRAP_TOKEN_SECRET_TYPE.to_string()),
            data: Some(data),
            ..Secret::default()
        }
    }
}
