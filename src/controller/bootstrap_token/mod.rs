//! # Bootstrap Token Manager
//!
//! Every NodeGroup gets a join token. Tokens are issued for
//! [`BOOTSTRAP_TOKEN_TTL_SECS`] and replaced once less than
//! [`BOOTSTRAP_TOKEN_ROTATE_BEFORE_SECS`] remain, so the hourly tick rotates a
//! group's token at most once per hour.
//!
//! Planning is pure; the pass flushes the plan through the cluster store.

mod secret;

pub use secret::BootstrapTokenSecret;

use crate::constants::{
    BOOTSTRAP_TOKEN_ID_LEN, BOOTSTRAP_TOKEN_ROTATE_BEFORE_SECS, BOOTSTRAP_TOKEN_SECRET_LEN,
    BOOTSTRAP_TOKEN_TTL_SECS,
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::BTreeMap;
use tracing::{debug, info};

const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Token side effects of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenPlan {
    /// Names of expired Secrets
    pub delete: Vec<String>,
    pub create: Vec<BootstrapTokenSecret>,
    /// `<ngName>` -> `<tokenId>.<tokenSecret>`
    pub publish: BTreeMap<String, String>,
}

/// Random lowercase alphanumeric string
pub fn random_token_part<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| char::from(TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())]))
        .collect()
}

/// Decide which tokens to delete, create and publish
///
/// Expired tokens are deleted whatever group they belong to. Each group
/// publishes its newest live token when it still has more than the rotation
/// lead time left, otherwise a new token is issued and published. Older live
/// tokens stay in the cluster until they expire.
pub fn plan_bootstrap_tokens<R: Rng + ?Sized>(
    node_groups: &[String],
    secrets: &[BootstrapTokenSecret],
    now: DateTime<Utc>,
    rng: &mut R,
) -> TokenPlan {
    let mut plan = TokenPlan::default();

    for secret in secrets {
        if secret.valid_for(now).is_some_and(|v| v < 0) {
            debug!(secret = %secret.name, node_group = %secret.node_group, "Bootstrap token expired");
            plan.delete.push(secret.name.clone());
        }
    }

    for ng in node_groups {
        let newest = secrets
            .iter()
            .filter(|s| &s.node_group == ng)
            .filter(|s| s.valid_for(now).is_some_and(|v| v >= 0))
            .max_by(|a, b| {
                a.creation_timestamp
                    .cmp(&b.creation_timestamp)
                    .then_with(|| a.name.cmp(&b.name))
            });

        if let Some(token) = newest.filter(|t| {
            t.valid_for(now)
                .is_some_and(|v| v > BOOTSTRAP_TOKEN_ROTATE_BEFORE_SECS)
        }) {
            plan.publish.insert(ng.clone(), token.token());
            continue;
        }

        let token = BootstrapTokenSecret::new(
            ng,
            random_token_part(rng, BOOTSTRAP_TOKEN_ID_LEN),
            random_token_part(rng, BOOTSTRAP_TOKEN_SECRET_LEN),
            now + Duration::seconds(BOOTSTRAP_TOKEN_TTL_SECS),
            now,
        );
        info!(node_group = %ng, secret = %token.name, "Issuing bootstrap token");
        plan.publish.insert(ng.clone(), token.token());
        plan.create.push(token);
    }

    plan
}
