//! Read-through secret access, as consumed by the certificate rotation loop.
//!
//! The rotation loop itself (issuing leaves, committing them back, requeueing
//! before expiry) lives with the platform integration; the protocol side only
//! needs a way to read secrets and observe changes.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::CertificateError;

/// One named secret: key → raw bytes, matching the
/// [`crate::names`] layout (`ca-cert.pem`, `tls.crt`, `tls.key`).
pub type SecretData = HashMap<String, Vec<u8>>;

/// Change notification for a watched secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretEvent {
    Updated(String),
    Removed(String),
}

/// A read-through secret source with change notifications.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch a secret by name.
    async fn get(&self, name: &str) -> Result<SecretData, CertificateError>;

    /// Stream of change events. Every `Updated`/`Removed` delivery reflects a
    /// state the store has already applied, so a `get` after an event never
    /// observes older material.
    fn watch(&self) -> mpsc::Receiver<SecretEvent>;
}

/// Pull a required key out of secret data.
pub fn require_key<'d>(
    name: &str,
    data: &'d SecretData,
    key: &str,
) -> Result<&'d [u8], CertificateError> {
    data.get(key)
        .map(|v| v.as_slice())
        .ok_or_else(|| CertificateError::MissingSecretKey {
            name: name.to_string(),
            key: key.to_string(),
        })
}
