//! Secret layout and SAN naming scheme shared by both planes.

use std::time::Duration;

/// Secret key holding the CA certificate in PEM.
pub const SECRET_CA_CERT_KEY: &str = "ca-cert.pem";
/// Secret key holding the leaf certificate in PEM.
pub const SECRET_CERT_KEY: &str = "tls.crt";
/// Secret key holding the leaf private key in PEM (PKCS#1 or PKCS#8 RSA).
pub const SECRET_PK_KEY: &str = "tls.key";

/// Older deployments mount the same material under these names; writers keep
/// both sets populated.
pub const LEGACY_CERT_NAME: &str = "public-cert.pem";
pub const LEGACY_PK_NAME: &str = "private-key.pem";

/// Validity window for the CA certificate.
pub const CA_EXPIRATION_INTERVAL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);
/// Validity window for leaf certificates.
pub const EXPIRATION_INTERVAL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
/// Certificates are rotated when this close to expiry.
pub const ROTATION_THRESHOLD: Duration = Duration::from_secs(10 * 60);

/// SAN presented by control-plane components.
pub const CONTROL_PLANE_NAME: &str = "control-plane.tether.internal";

/// SAN accepted by any data-plane element; kept for peers minted before the
/// per-role names existed.
pub const LEGACY_FAKE_DNS_NAME: &str = "data-plane.tether.internal";

/// SAN for trusted data-plane routing elements. An empty `routing_id` names
/// the default routing tier.
pub fn data_plane_routing_name(routing_id: &str) -> String {
    if routing_id.is_empty() {
        "data-plane-routing.tether.internal".to_string()
    } else {
        format!("data-plane-routing-{routing_id}.tether.internal")
    }
}

/// SAN for data-plane edges (senders/receivers) in a namespace.
pub fn data_plane_edge_name(namespace: &str) -> String {
    format!("data-plane.{namespace}.tether.internal")
}
