//! # CSR Approver
//!
//! Auto-approves kubelet serving certificate requests that pass a fixed set of
//! rules. Requests that fail a rule are logged and left pending, nothing is
//! ever denied here.
//!
//! - `parse.rs` - PEM/PKCS#10 decoding
//! - `approver.rs` - kube-runtime reconcile function and approval call

mod approver;
mod parse;

pub use approver::{approve, reconcile_csr, CsrApprover};
pub use parse::ParsedCsr;

use crate::config::ControllerConfig;
use crate::constants::KUBELET_SERVING_SIGNER;
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use std::collections::BTreeSet;
use thiserror::Error;

/// Organization every kubelet serving request must carry, and nothing else
pub const NODES_ORGANIZATION: &str = "system:nodes";

/// Prefix of kubelet common names
pub const NODE_COMMON_NAME_PREFIX: &str = "system:node:";

const USAGE_KEY_ENCIPHERMENT: &str = "key encipherment";
const USAGE_DIGITAL_SIGNATURE: &str = "digital signature";
const USAGE_SERVER_AUTH: &str = "server auth";

#[derive(Debug, Error)]
pub enum CsrError {
    #[error("PEM block type must be CERTIFICATE REQUEST")]
    WrongPemType,

    #[error("failed to decode PEM: {0}")]
    Pem(#[from] ::pem::PemError),

    #[error("failed to decode certificate request: {0}")]
    Der(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// Kubelet serving rule a request broke
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Organization(Vec<String>),
    NoSubjectAltNames,
    EmailAddresses,
    Uris,
    Usages(Vec<String>),
    CommonNamePrefix(String),
    UsernameMismatch { username: String, common_name: String },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Organization(orgs) => {
                write!(f, "organization must be [{NODES_ORGANIZATION}], got {orgs:?}")
            }
            Self::NoSubjectAltNames => write!(f, "at least one DNS name or IP address is required"),
            Self::EmailAddresses => write!(f, "email addresses are not allowed"),
            Self::Uris => write!(f, "URIs are not allowed"),
            Self::Usages(usages) => write!(f, "usages {usages:?} are not allowed"),
            Self::CommonNamePrefix(cn) => {
                write!(f, "common name {cn:?} must start with {NODE_COMMON_NAME_PREFIX:?}")
            }
            Self::UsernameMismatch {
                username,
                common_name,
            } => write!(
                f,
                "username {username:?} does not match common name {common_name:?}"
            ),
        }
    }
}

/// What the approver does with one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Already decided, already issued or not ours
    Skip(&'static str),
    Approve,
    /// Left pending, with the reason logged
    Reject(String),
}

impl Decision {
    /// Label for the decisions metric
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skip(_) => "skipped",
            Self::Approve => "approved",
            Self::Reject(_) => "rejected",
        }
    }
}

/// Check a parsed kubelet serving request against every rule
///
/// # Errors
///
/// Returns the first rule the request breaks.
pub fn validate_kubelet_serving(
    csr: &ParsedCsr,
    username: &str,
    usages: &[String],
) -> Result<(), Rejection> {
    if csr.organizations != [NODES_ORGANIZATION] {
        return Err(Rejection::Organization(csr.organizations.clone()));
    }
    if csr.dns_names.len() + csr.ip_addresses.len() < 1 {
        return Err(Rejection::NoSubjectAltNames);
    }
    if !csr.email_addresses.is_empty() {
        return Err(Rejection::EmailAddresses);
    }
    if !csr.uris.is_empty() {
        return Err(Rejection::Uris);
    }
    if !usages_allowed(usages) {
        return Err(Rejection::Usages(usages.to_vec()));
    }
    let common_name = csr.common_name.as_deref().unwrap_or_default();
    if !common_name.starts_with(NODE_COMMON_NAME_PREFIX) {
        return Err(Rejection::CommonNamePrefix(common_name.to_string()));
    }
    if username != common_name {
        return Err(Rejection::UsernameMismatch {
            username: username.to_string(),
            common_name: common_name.to_string(),
        });
    }
    Ok(())
}

/// Usages must be exactly one of the RSA or non-RSA serving sets
fn usages_allowed(usages: &[String]) -> bool {
    let requested: BTreeSet<&str> = usages.iter().map(String::as_str).collect();
    let rsa = BTreeSet::from([
        USAGE_KEY_ENCIPHERMENT,
        USAGE_DIGITAL_SIGNATURE,
        USAGE_SERVER_AUTH,
    ]);
    let non_rsa = BTreeSet::from([USAGE_DIGITAL_SIGNATURE, USAGE_SERVER_AUTH]);
    requested.len() == usages.len() && (requested == rsa || requested == non_rsa)
}

/// Decide what to do with a request as observed in the cluster
pub fn evaluate(csr: &CertificateSigningRequest, config: &ControllerConfig) -> Decision {
    if let Some(status) = &csr.status {
        if status.certificate.as_ref().is_some_and(|c| !c.0.is_empty()) {
            return Decision::Skip("certificate already issued");
        }
        let decided = status
            .conditions
            .iter()
            .flatten()
            .any(|c| c.type_ == "Approved" || c.type_ == "Denied");
        if decided {
            return Decision::Skip("already approved or denied");
        }
    }

    let signer = csr.spec.signer_name.as_str();
    if !config.handles_signer(signer) {
        return Decision::Skip("signer not handled");
    }

    let parsed = match ParsedCsr::from_pem(&csr.spec.request.0) {
        Ok(parsed) => parsed,
        Err(e) => return Decision::Reject(e.to_string()),
    };
    if signer != KUBELET_SERVING_SIGNER {
        return Decision::Approve;
    }

    let username = csr.spec.username.as_deref().unwrap_or_default();
    let usages = csr.spec.usages.clone().unwrap_or_default();
    match validate_kubelet_serving(&parsed, username, &usages) {
        Ok(()) => Decision::Approve,
        Err(rejection) => Decision::Reject(rejection.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::certificates::v1::{
        CertificateSigningRequestCondition, CertificateSigningRequestSpec,
        CertificateSigningRequestStatus,
    };
    use k8s_openapi::ByteString;

    fn valid() -> ParsedCsr {
        ParsedCsr {
            common_name: Some("system:node:node-1".to_string()),
            organizations: vec!["system:nodes".to_string()],
            dns_names: vec!["node-1".to_string()],
            ..ParsedCsr::default()
        }
    }

    fn usages(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    fn serving() -> Vec<String> {
        usages(&["digital signature", "server auth"])
    }

    #[test]
    fn test_valid_request() {
        assert_eq!(
            validate_kubelet_serving(&valid(), "system:node:node-1", &serving()),
            Ok(())
        );
        assert_eq!(
            validate_kubelet_serving(
                &valid(),
                "system:node:node-1",
                &usages(&["key encipherment", "digital signature", "server auth"])
            ),
            Ok(())
        );
    }

    #[test]
    fn test_organization_must_be_exact() {
        let mut csr = valid();
        csr.organizations.push("extra".to_string());
        assert!(matches!(
            validate_kubelet_serving(&csr, "system:node:node-1", &serving()),
            Err(Rejection::Organization(_))
        ));
        csr.organizations.clear();
        assert!(matches!(
            validate_kubelet_serving(&csr, "system:node:node-1", &serving()),
            Err(Rejection::Organization(_))
        ));
    }

    #[test]
    fn test_alt_names() {
        let mut csr = valid();
        csr.dns_names.clear();
        assert_eq!(
            validate_kubelet_serving(&csr, "system:node:node-1", &serving()),
            Err(Rejection::NoSubjectAltNames)
        );
        csr.ip_addresses.push("10.0.0.1".parse().unwrap());
        assert_eq!(
            validate_kubelet_serving(&csr, "system:node:node-1", &serving()),
            Ok(())
        );
        csr.email_addresses.push("a@b.c".to_string());
        assert_eq!(
            validate_kubelet_serving(&csr, "system:node:node-1", &serving()),
            Err(Rejection::EmailAddresses)
        );
        csr.email_addresses.clear();
        csr.uris.push("spiffe://x".to_string());
        assert_eq!(
            validate_kubelet_serving(&csr, "system:node:node-1", &serving()),
            Err(Rejection::Uris)
        );
    }

    #[test]
    fn test_usages_are_exact_sets() {
        for bad in [
            usages(&["digital signature"]),
            usages(&["server auth", "digital signature", "client auth"]),
            usages(&["key encipherment", "server auth"]),
            usages(&["digital signature", "server auth", "server auth"]),
            Vec::new(),
        ] {
            assert!(
                matches!(
                    validate_kubelet_serving(&valid(), "system:node:node-1", &bad),
                    Err(Rejection::Usages(_))
                ),
                "{bad:?}"
            );
        }
        // Order does not matter
        assert!(usages_allowed(&usages(&["server auth", "digital signature"])));
    }

    #[test]
    fn test_common_name_and_username() {
        let mut csr = valid();
        csr.common_name = Some("node-1".to_string());
        assert!(matches!(
            validate_kubelet_serving(&csr, "node-1", &serving()),
            Err(Rejection::CommonNamePrefix(_))
        ));
        assert_eq!(
            validate_kubelet_serving(&valid(), "system:node:node-2", &serving()),
            Err(Rejection::UsernameMismatch {
                username: "system:node:node-2".to_string(),
                common_name: "system:node:node-1".to_string(),
            })
        );
    }

    fn request(signer: &str, status: Option<CertificateSigningRequestStatus>) -> CertificateSigningRequest {
        CertificateSigningRequest {
            spec: CertificateSigningRequestSpec {
                signer_name: signer.to_string(),
                request: ByteString(b"garbage".to_vec()),
                ..CertificateSigningRequestSpec::default()
            },
            status,
            ..CertificateSigningRequest::default()
        }
    }

    #[test]
    fn test_evaluate_skips() {
        let config = ControllerConfig::default();
        let issued = CertificateSigningRequestStatus {
            certificate: Some(ByteString(b"cert".to_vec())),
            ..CertificateSigningRequestStatus::default()
        };
        assert_eq!(
            evaluate(&request(KUBELET_SERVING_SIGNER, Some(issued)), &config).as_str(),
            "skipped"
        );

        let denied = CertificateSigningRequestStatus {
            conditions: Some(vec![CertificateSigningRequestCondition {
                type_: "Denied".to_string(),
                status: "True".to_string(),
                ..CertificateSigningRequestCondition::default()
            }]),
            ..CertificateSigningRequestStatus::default()
        };
        assert_eq!(
            evaluate(&request(KUBELET_SERVING_SIGNER, Some(denied)), &config).as_str(),
            "skipped"
        );

        assert_eq!(
            evaluate(&request("kubernetes.io/kube-apiserver-client", None), &config),
            Decision::Skip("signer not handled")
        );
    }

    #[test]
    fn test_evaluate_parse_error_rejects() {
        let decision = evaluate(
            &request(KUBELET_SERVING_SIGNER, None),
            &ControllerConfig::default(),
        );
        assert!(matches!(decision, Decision::Reject(_)));
    }
}
