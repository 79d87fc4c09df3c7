use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("certificate generation failed: {0}")]
    Generation(String),

    #[error("invalid PEM material: {0}")]
    InvalidPem(String),

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("certificate expires at {not_after}, inside the rotation threshold")]
    ExpiringSoon { not_after: String },

    #[error("certificate is missing required SAN {0:?}")]
    MissingSan(String),

    #[error("secret {name:?} is missing key {key:?}")]
    MissingSecretKey { name: String, key: String },
}

impl From<rcgen::Error> for CertificateError {
    fn from(err: rcgen::Error) -> Self {
        CertificateError::Generation(err.to_string())
    }
}
