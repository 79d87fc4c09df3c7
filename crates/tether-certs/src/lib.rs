//! PKI for tether control channels: CA and leaf minting, certificate
//! validation, the secret layout both planes mount, and the SAN naming
//! scheme that maps peer roles to verifiable identities.

pub mod error;
pub mod keypair;
pub mod names;
pub mod secret;

pub use error::CertificateError;
pub use keypair::{
    create_ca_certs, create_cert, create_control_plane_cert, create_data_plane_edge_cert,
    create_data_plane_routing_cert, parse_cert, validate_cert, KeyPair, ParsedCert,
};
pub use names::{
    data_plane_edge_name, data_plane_routing_name, CA_EXPIRATION_INTERVAL, CONTROL_PLANE_NAME,
    EXPIRATION_INTERVAL, LEGACY_CERT_NAME, LEGACY_FAKE_DNS_NAME, LEGACY_PK_NAME,
    ROTATION_THRESHOLD, SECRET_CA_CERT_KEY, SECRET_CERT_KEY, SECRET_PK_KEY,
};
pub use secret::{require_key, SecretData, SecretEvent, SecretStore};
