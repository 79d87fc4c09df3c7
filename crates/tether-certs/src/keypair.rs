//! CA and leaf certificate minting.
//!
//! The rotation loop that feeds minted material into a secret store lives
//! outside this crate; here is only the PKI itself: create a CA, sign leaf
//! certificates with per-role SANs, and validate what comes back out of the
//! store before trusting it.

use std::time::Duration;

use rcgen::{BasicConstraints, CertificateParams, DnType, DnValue, IsCa, KeyUsagePurpose};
use time::OffsetDateTime;

use crate::error::CertificateError;
use crate::names::{
    data_plane_edge_name, data_plane_routing_name, CONTROL_PLANE_NAME, LEGACY_FAKE_DNS_NAME,
};

const ORGANIZATION: &str = "tether.internal";
const CA_COMMON_NAME: &str = "tether-control-protocol-ca";

/// A PEM-encoded certificate plus its private key, as produced by the minting
/// functions and consumed by the secret store.
#[derive(Debug, Clone)]
pub struct KeyPair {
    cert_pem: Vec<u8>,
    private_key_pem: Vec<u8>,
}

impl KeyPair {
    pub fn new(cert_pem: Vec<u8>, private_key_pem: Vec<u8>) -> Self {
        Self { cert_pem, private_key_pem }
    }

    /// Certificate in PEM.
    pub fn cert_bytes(&self) -> &[u8] {
        &self.cert_pem
    }

    /// Private key in PEM (PKCS#8).
    pub fn private_key_bytes(&self) -> &[u8] {
        &self.private_key_pem
    }

    /// Parse the certificate into an owned summary of the fields the
    /// reconciliation side cares about.
    pub fn parse(&self) -> Result<ParsedCert, CertificateError> {
        parse_cert(&self.cert_pem)
    }
}

/// Owned view of the interesting parts of an X.509 certificate.
#[derive(Debug, Clone)]
pub struct ParsedCert {
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    pub dns_names: Vec<String>,
    pub is_ca: bool,
}

impl ParsedCert {
    pub fn has_san(&self, san: &str) -> bool {
        self.dns_names.iter().any(|n| n.eq_ignore_ascii_case(san))
    }
}

/// Mint a self-signed CA keypair. The standard lifetime is
/// [`crate::names::CA_EXPIRATION_INTERVAL`].
pub fn create_ca_certs(lifetime: Duration) -> Result<KeyPair, CertificateError> {
    let mut params = CertificateParams::new(Vec::<String>::new())?;
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, DnValue::Utf8String(CA_COMMON_NAME.to_string()));
    params
        .distinguished_name
        .push(DnType::OrganizationName, DnValue::Utf8String(ORGANIZATION.to_string()));
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    set_validity(&mut params, lifetime);

    let key_pair = rcgen::KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    Ok(KeyPair::new(
        cert.pem().into_bytes(),
        key_pair.serialize_pem().into_bytes(),
    ))
}

/// Mint a leaf certificate signed by `ca`, valid for `lifetime`, presenting
/// the given SANs. The standard lifetime is
/// [`crate::names::EXPIRATION_INTERVAL`].
pub fn create_cert(ca: &KeyPair, lifetime: Duration, sans: &[String]) -> Result<KeyPair, CertificateError> {
    let ca_key = rcgen::KeyPair::from_pem(pem_str(ca.private_key_bytes())?)
        .map_err(|e| CertificateError::InvalidPem(e.to_string()))?;
    let ca_params = CertificateParams::from_ca_cert_pem(pem_str(ca.cert_bytes())?)
        .map_err(|e| CertificateError::InvalidPem(e.to_string()))?;
    let ca_cert = ca_params.self_signed(&ca_key)?;

    let mut params = CertificateParams::new(sans.to_vec())?;
    params.distinguished_name = rcgen::DistinguishedName::new();
    let common_name = sans.first().cloned().unwrap_or_else(|| ORGANIZATION.to_string());
    params
        .distinguished_name
        .push(DnType::CommonName, DnValue::Utf8String(common_name));
    params
        .distinguished_name
        .push(DnType::OrganizationName, DnValue::Utf8String(ORGANIZATION.to_string()));
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
    set_validity(&mut params, lifetime);

    let key_pair = rcgen::KeyPair::generate()?;
    let cert = params.signed_by(&key_pair, &ca_cert, &ca_key)?;

    Ok(KeyPair::new(
        cert.pem().into_bytes(),
        key_pair.serialize_pem().into_bytes(),
    ))
}

/// Leaf for control-plane components.
pub fn create_control_plane_cert(ca: &KeyPair, lifetime: Duration) -> Result<KeyPair, CertificateError> {
    create_cert(ca, lifetime, &[CONTROL_PLANE_NAME.to_string()])
}

/// Leaf for data-plane routing elements.
pub fn create_data_plane_routing_cert(
    ca: &KeyPair,
    lifetime: Duration,
    routing_id: &str,
) -> Result<KeyPair, CertificateError> {
    create_cert(
        ca,
        lifetime,
        &[data_plane_routing_name(routing_id), LEGACY_FAKE_DNS_NAME.to_string()],
    )
}

/// Leaf for data-plane edges in `namespace`.
pub fn create_data_plane_edge_cert(
    ca: &KeyPair,
    lifetime: Duration,
    namespace: &str,
) -> Result<KeyPair, CertificateError> {
    create_cert(
        ca,
        lifetime,
        &[data_plane_edge_name(namespace), LEGACY_FAKE_DNS_NAME.to_string()],
    )
}

/// Parse a PEM certificate into an owned summary.
pub fn parse_cert(cert_pem: &[u8]) -> Result<ParsedCert, CertificateError> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem)
        .map_err(|e| CertificateError::InvalidPem(e.to_string()))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| CertificateError::InvalidCertificate(e.to_string()))?;

    let mut dns_names = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            if let x509_parser::extensions::GeneralName::DNSName(dns) = name {
                dns_names.push((*dns).to_string());
            }
        }
    }

    Ok(ParsedCert {
        not_before: cert.validity().not_before.to_datetime(),
        not_after: cert.validity().not_after.to_datetime(),
        dns_names,
        is_ca: cert.is_ca(),
    })
}

/// Check that a certificate is not within `rotation_threshold` of expiry and
/// presents every required SAN. The standard threshold is
/// [`crate::names::ROTATION_THRESHOLD`].
pub fn validate_cert(
    cert_pem: &[u8],
    rotation_threshold: Duration,
    required_sans: &[String],
) -> Result<(), CertificateError> {
    let parsed = parse_cert(cert_pem)?;

    let deadline = OffsetDateTime::now_utc() + rotation_threshold;
    if parsed.not_after < deadline {
        return Err(CertificateError::ExpiringSoon {
            not_after: parsed.not_after.to_string(),
        });
    }

    for san in required_sans {
        if !parsed.has_san(san) {
            return Err(CertificateError::MissingSan(san.clone()));
        }
    }

    Ok(())
}

fn set_validity(params: &mut CertificateParams, lifetime: Duration) {
    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + lifetime;
}

fn pem_str(bytes: &[u8]) -> Result<&str, CertificateError> {
    std::str::from_utf8(bytes).map_err(|e| CertificateError::InvalidPem(e.to_string()))
}
