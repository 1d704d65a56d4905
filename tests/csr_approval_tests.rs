//! # CSR Approval Tests
//!
//! Decisions on real PKCS#10 requests generated with rcgen.
//!
//! These tests verify:
//! - A well-formed kubelet serving request is approved
//! - Each kubelet serving rule rejects on its own
//! - Other handled signers are approved as-is
//! - Decided, issued and foreign requests are skipped

use k8s_openapi::api::certificates::v1::{
    CertificateSigningRequest, CertificateSigningRequestCondition, CertificateSigningRequestSpec,
    CertificateSigningRequestStatus,
};
use k8s_openapi::ByteString;
use node_manager_controller::config::ControllerConfig;
use node_manager_controller::constants::KUBELET_SERVING_SIGNER;
use node_manager_controller::controller::csr::{evaluate, Decision};
use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, KeyPair, SanType};

struct Request {
    common_name: &'static str,
    organizations: Vec<&'static str>,
    sans: Vec<SanType>,
    username: &'static str,
    usages: Vec<&'static str>,
    signer: &'static str,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            common_name: "system:node:node-1",
            organizations: vec!["system:nodes"],
            sans: vec![SanType::DnsName("node-1".try_into().unwrap())],
            username: "system:node:node-1",
            usages: vec!["digital signature", "server auth"],
            signer: KUBELET_SERVING_SIGNER,
        }
    }
}

impl Request {
    fn pem(&self) -> String {
        let key_pair = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(self.common_name.to_string()),
        );
        for org in &self.organizations {
            dn.push(DnType::OrganizationName, DnValue::Utf8String((*org).to_string()));
        }
        params.distinguished_name = dn;
        params.subject_alt_names = self.sans.clone();
        params.serialize_request(&key_pair).unwrap().pem().unwrap()
    }

    fn build(&self) -> CertificateSigningRequest {
        self.build_with_request(self.pem().into_bytes())
    }

    fn build_with_request(&self, request: Vec<u8>) -> CertificateSigningRequest {
        let mut csr = CertificateSigningRequest {
            spec: CertificateSigningRequestSpec {
                request: ByteString(request),
                signer_name: self.signer.to_string(),
                username: Some(self.username.to_string()),
                usages: Some(self.usages.iter().map(ToString::to_string).collect()),
                ..CertificateSigningRequestSpec::default()
            },
            ..CertificateSigningRequest::default()
        };
        csr.metadata.name = Some("csr-node-1".to_string());
        csr
    }
}

fn decide(csr: &CertificateSigningRequest) -> Decision {
    evaluate(csr, &ControllerConfig::default())
}

fn assert_rejected(request: Request, needle: &str) {
    match decide(&request.build()) {
        Decision::Reject(reason) => assert!(reason.contains(needle), "{reason}"),
        other => panic!("expected rejection containing {needle:?}, got {other:?}"),
    }
}

#[test]
fn test_well_formed_kubelet_request_is_approved() {
    assert_eq!(decide(&Request::default().build()), Decision::Approve);

    let rsa_usages = Request {
        usages: vec!["key encipherment", "digital signature", "server auth"],
        ..Request::default()
    };
    assert_eq!(decide(&rsa_usages.build()), Decision::Approve);

    let ip_only = Request {
        sans: vec![SanType::IpAddress("10.0.0.7".parse().unwrap())],
        ..Request::default()
    };
    assert_eq!(decide(&ip_only.build()), Decision::Approve);
}

#[test]
fn test_username_must_match_common_name() {
    assert_rejected(
        Request {
            username: "system:node:node-2",
            ..Request::default()
        },
        "does not match common name",
    );
}

#[test]
fn test_each_rule_rejects() {
    assert_rejected(
        Request {
            organizations: vec!["system:masters"],
            ..Request::default()
        },
        "organization",
    );
    assert_rejected(
        Request {
            organizations: vec!["system:nodes", "system:masters"],
            ..Request::default()
        },
        "organization",
    );
    assert_rejected(
        Request {
            sans: Vec::new(),
            ..Request::default()
        },
        "DNS name or IP address",
    );
    assert_rejected(
        Request {
            sans: vec![
                SanType::DnsName("node-1".try_into().unwrap()),
                SanType::Rfc822Name("admin@example.com".try_into().unwrap()),
            ],
            ..Request::default()
        },
        "email",
    );
    assert_rejected(
        Request {
            sans: vec![
                SanType::DnsName("node-1".try_into().unwrap()),
                SanType::URI("spiffe://cluster/node-1".try_into().unwrap()),
            ],
            ..Request::default()
        },
        "URIs",
    );
    assert_rejected(
        Request {
            usages: vec!["digital signature", "server auth", "client auth"],
            ..Request::default()
        },
        "usages",
    );
    assert_rejected(
        Request {
            common_name: "node-1",
            username: "node-1",
            ..Request::default()
        },
        "must start with",
    );
}

#[test]
fn test_wrong_pem_block_is_rejected() {
    let key_pem = KeyPair::generate().unwrap().serialize_pem();
    let csr = Request::default().build_with_request(key_pem.into_bytes());
    assert_eq!(
        decide(&csr),
        Decision::Reject("PEM block type must be CERTIFICATE REQUEST".to_string())
    );
}

#[test]
fn test_other_handled_signer_is_approved_as_is() {
    let config = ControllerConfig {
        csr_signer_names: vec![
            KUBELET_SERVING_SIGNER.to_string(),
            "example.com/custom".to_string(),
        ],
        ..ControllerConfig::default()
    };
    let request = Request {
        organizations: vec!["anything"],
        usages: vec!["client auth"],
        username: "someone",
        signer: "example.com/custom",
        ..Request::default()
    };
    assert_eq!(evaluate(&request.build(), &config), Decision::Approve);

    // Not in the handled list
    assert_eq!(
        decide(&request.build()),
        Decision::Skip("signer not handled")
    );
}

#[test]
fn test_decided_requests_are_skipped() {
    let mut approved = Request::default().build();
    approved.status = Some(CertificateSigningRequestStatus {
        conditions: Some(vec![CertificateSigningRequestCondition {
            type_: "Approved".to_string(),
            status: "True".to_string(),
            ..CertificateSigningRequestCondition::default()
        }]),
        ..CertificateSigningRequestStatus::default()
    });
    assert!(matches!(decide(&approved), Decision::Skip(_)));

    let mut issued = Request::default().build();
    issued.status = Some(CertificateSigningRequestStatus {
        certificate: Some(ByteString(b"-----BEGIN CERTIFICATE-----".to_vec())),
        ..CertificateSigningRequestStatus::default()
    });
    assert!(matches!(decide(&issued), Decision::Skip(_)));

    // A Failed condition alone does not count as a decision
    let mut failed = Request::default().build();
    failed.status = Some(CertificateSigningRequestStatus {
        conditions: Some(vec![CertificateSigningRequestCondition {
            type_: "Failed".to_string(),
            status: "True".to_string(),
            ..CertificateSigningRequestCondition::default()
        }]),
        ..CertificateSigningRequestStatus::default()
    });
    assert_eq!(decide(&failed), Decision::Approve);
}
