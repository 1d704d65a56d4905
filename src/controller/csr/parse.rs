//! # CSR Parsing
//!
//! Extracts the subject and subject alternative names the approval rules look
//! at from a PEM-encoded PKCS#10 request.

use crate::controller::csr::CsrError;
use std::net::IpAddr;
use x509_parser::prelude::*;

/// PEM tag of a PKCS#10 request
const CERTIFICATE_REQUEST_TAG: &str = "CERTIFICATE REQUEST";

/// Fields of a certificate request relevant for approval
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCsr {
    pub common_name: Option<String>,
    pub organizations: Vec<String>,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub email_addresses: Vec<String>,
    pub uris: Vec<String>,
}

impl ParsedCsr {
    /// Parse a PEM block holding a certificate request
    ///
    /// # Errors
    ///
    /// Fails if the data is not PEM, the block is not a `CERTIFICATE REQUEST`
    /// or the DER inside does not decode.
    pub fn from_pem(data: &[u8]) -> Result<Self, CsrError> {
        let block = ::pem::parse(data)?;
        if block.tag() != CERTIFICATE_REQUEST_TAG {
            return Err(CsrError::WrongPemType);
        }
        Self::from_der(block.contents())
    }

    fn from_der(der: &[u8]) -> Result<Self, CsrError> {
        let (_, request) = X509CertificationRequest::from_der(der)
            .map_err(|e| CsrError::Der(e.to_string()))?;
        let subject = &request.certification_request_info.subject;

        let mut parsed = Self {
            common_name: subject
                .iter_common_name()
                .next()
                .and_then(|cn| cn.as_str().ok())
                .map(ToString::to_string),
            organizations: subject
                .iter_organization()
                .filter_map(|o| o.as_str().ok())
                .map(ToString::to_string)
                .collect(),
            ..Self::default()
        };

        let Some(extensions) = request.requested_extensions() else {
            return Ok(parsed);
        };
        for extension in extensions {
            let ParsedExtension::SubjectAlternativeName(san) = extension else {
                continue;
            };
            for name in &san.general_names {
                match name {
                    GeneralName::DNSName(dns) => parsed.dns_names.push((*dns).to_string()),
                    GeneralName::RFC822Name(email) => {
                        parsed.email_addresses.push((*email).to_string());
                    }
                    GeneralName::URI(uri) => parsed.uris.push((*uri).to_string()),
                    GeneralName::IPAddress(bytes) => {
                        if let Some(ip) = ip_from_bytes(bytes) {
                            parsed.ip_addresses.push(ip);
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(parsed)
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}
