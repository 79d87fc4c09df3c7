//! Mutual TLS wiring for control channels.
//!
//! Both sides verify the peer: the server requires a client certificate
//! signed by the shared CA (optionally checking the leaf's SAN), the client
//! verifies the server against the expected SAN. Configs are produced by
//! factories and rebuilt on every dial / accept, so rotated certificates
//! take effect on the next connection without a restart.

use std::io::{BufReader, Cursor};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::client::danger::HandshakeSignatureValid;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, DigitallySignedStruct, DistinguishedName, RootCertStore, ServerConfig, SignatureScheme};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

use tether_certs::{data_plane_routing_name, SECRET_CA_CERT_KEY, SECRET_CERT_KEY, SECRET_PK_KEY};

use crate::dial::{set_keep_alive, ControlStream, Dialer, KEEP_ALIVE};

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid certificate material: {0}")]
    InvalidCertificate(String),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("tls configuration error: {0}")]
    Config(String),
}

impl From<rustls::Error> for TlsError {
    fn from(err: rustls::Error) -> Self {
        TlsError::Config(err.to_string())
    }
}

/// Client-side material for one dial: the config plus the SAN the server
/// must present.
pub struct TlsClientSetup {
    pub config: ClientConfig,
    pub server_name: String,
}

/// Produces a fresh client config per dial, so certificate rotation takes
/// effect on reconnect.
pub trait TlsClientConfigFactory: Send + Sync {
    fn client_setup(&self) -> Result<TlsClientSetup, TlsError>;
}

/// Produces a fresh server config per accepted connection.
pub trait TlsServerConfigFactory: Send + Sync {
    fn server_config(&self) -> Result<ServerConfig, TlsError>;
}

/// Mutually-authenticated server config from PEM material.
///
/// Client certificates must chain to `ca_pem`; when `verify_san` is set the
/// presented leaf must additionally carry that DNS SAN.
pub fn server_tls_config(
    cert_pem: &[u8],
    key_pem: &[u8],
    ca_pem: &[u8],
    verify_san: Option<&str>,
) -> Result<ServerConfig, TlsError> {
    let certs = parse_certs(cert_pem)?;
    let key = parse_key(key_pem)?;
    let roots = root_store(ca_pem)?;

    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| TlsError::Config(format!("client verifier: {e}")))?;
    let verifier: Arc<dyn ClientCertVerifier> = match verify_san {
        Some(san) => Arc::new(SanVerifyingClientVerifier {
            inner: verifier,
            expected_san: san.to_string(),
        }),
        None => verifier,
    };

    ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(Into::into)
}

/// Mutually-authenticated client config from PEM material. The caller still
/// picks the server name to verify, per dial.
pub fn client_tls_config(cert_pem: &[u8], key_pem: &[u8], ca_pem: &[u8]) -> Result<ClientConfig, TlsError> {
    let certs = parse_certs(cert_pem)?;
    let key = parse_key(key_pem)?;
    let roots = root_store(ca_pem)?;

    ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(Into::into)
}

/// Server config from the mounted secret layout
/// (`ca-cert.pem` / `tls.crt` / `tls.key`). Presented client leaves must
/// carry the data-plane routing SAN.
pub fn server_tls_config_from_dir(dir: impl AsRef<Path>) -> Result<ServerConfig, TlsError> {
    let dir = dir.as_ref();
    server_tls_config(
        &read(dir, SECRET_CERT_KEY)?,
        &read(dir, SECRET_PK_KEY)?,
        &read(dir, SECRET_CA_CERT_KEY)?,
        Some(&data_plane_routing_name("")),
    )
}

/// Client setup from the mounted secret layout, verifying the server against
/// `server_name`.
pub fn client_tls_setup_from_dir(
    dir: impl AsRef<Path>,
    server_name: impl Into<String>,
) -> Result<TlsClientSetup, TlsError> {
    let dir = dir.as_ref();
    Ok(TlsClientSetup {
        config: client_tls_config(
            &read(dir, SECRET_CERT_KEY)?,
            &read(dir, SECRET_PK_KEY)?,
            &read(dir, SECRET_CA_CERT_KEY)?,
        )?,
        server_name: server_name.into(),
    })
}

/// Factory that rebuilds configs from in-memory PEM material on every call.
pub struct PemTlsClientConfigFactory {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
    pub ca_pem: Vec<u8>,
    pub server_name: String,
}

impl TlsClientConfigFactory for PemTlsClientConfigFactory {
    fn client_setup(&self) -> Result<TlsClientSetup, TlsError> {
        Ok(TlsClientSetup {
            config: client_tls_config(&self.cert_pem, &self.key_pem, &self.ca_pem)?,
            server_name: self.server_name.clone(),
        })
    }
}

pub struct PemTlsServerConfigFactory {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
    pub ca_pem: Vec<u8>,
    pub verify_san: Option<String>,
}

impl TlsServerConfigFactory for PemTlsServerConfigFactory {
    fn server_config(&self) -> Result<ServerConfig, TlsError> {
        server_tls_config(
            &self.cert_pem,
            &self.key_pem,
            &self.ca_pem,
            self.verify_san.as_deref(),
        )
    }
}

/// TLS dialer: plain TCP underneath, a fresh client config per attempt.
pub struct TlsDialer {
    factory: Arc<dyn TlsClientConfigFactory>,
    keep_alive: Duration,
}

impl TlsDialer {
    pub fn new(factory: Arc<dyn TlsClientConfigFactory>) -> Self {
        Self {
            factory,
            keep_alive: KEEP_ALIVE,
        }
    }
}

#[async_trait]
impl Dialer for TlsDialer {
    async fn dial(&self, target: &str) -> std::io::Result<Box<dyn ControlStream>> {
        let setup = self.factory.client_setup().map_err(std::io::Error::other)?;

        let tcp = TcpStream::connect(target).await?;
        if let Err(e) = set_keep_alive(&tcp, self.keep_alive) {
            debug!(error = %e, %target, "failed to enable tcp keep-alive");
        }

        let server_name = ServerName::try_from(setup.server_name.clone())
            .map_err(|e| std::io::Error::other(format!("invalid server name {:?}: {e}", setup.server_name)))?;
        let connector = tokio_rustls::TlsConnector::from(Arc::new(setup.config));
        let stream = connector.connect(server_name, tcp).await?;

        Ok(Box::new(stream))
    }
}

/// Delegates chain verification and additionally requires a DNS SAN on the
/// presented leaf.
#[derive(Debug)]
struct SanVerifyingClientVerifier {
    inner: Arc<dyn ClientCertVerifier>,
    expected_san: String,
}

impl ClientCertVerifier for SanVerifyingClientVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        let verified = self.inner.verify_client_cert(end_entity, intermediates, now)?;

        let (_, cert) = x509_parser::parse_x509_certificate(end_entity.as_ref())
            .map_err(|e| rustls::Error::General(format!("unparseable client certificate: {e}")))?;
        let has_san = cert
            .subject_alternative_name()
            .ok()
            .flatten()
            .map(|san| {
                san.value.general_names.iter().any(|name| {
                    matches!(name, x509_parser::extensions::GeneralName::DNSName(dns)
                        if dns.eq_ignore_ascii_case(&self.expected_san))
                })
            })
            .unwrap_or(false);

        if !has_san {
            return Err(rustls::Error::General(format!(
                "client certificate does not carry SAN {:?}",
                self.expected_san
            )));
        }
        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(Cursor::new(pem)))
        .collect::<Result<_, _>>()
        .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
    if certs.is_empty() {
        return Err(TlsError::InvalidCertificate("no certificates in PEM data".to_string()));
    }
    Ok(certs)
}

fn parse_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut BufReader::new(Cursor::new(pem)))
        .map_err(|e| TlsError::InvalidPrivateKey(e.to_string()))?
        .ok_or_else(|| TlsError::InvalidPrivateKey("no private key in PEM data".to_string()))
}

fn root_store(ca_pem: &[u8]) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in parse_certs(ca_pem)? {
        roots
            .add(cert)
            .map_err(|e| TlsError::InvalidCertificate(format!("bad CA certificate: {e}")))?;
    }
    Ok(roots)
}

fn read(dir: &Path, file: &str) -> Result<Vec<u8>, TlsError> {
    let path = dir.join(file);
    std::fs::read(&path).map_err(|source| TlsError::Read {
        path: path.display().to_string(),
        source,
    })
}
