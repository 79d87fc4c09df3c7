//! Shared fixtures: mutually-authenticated cert material and ready-made
//! server/client pairs.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tether_certs::{
    create_ca_certs, create_control_plane_cert, create_data_plane_routing_cert, KeyPair,
    LEGACY_FAKE_DNS_NAME,
};
use tether_core::Service;
use tether_net::{
    client_tls_config, server_tls_config, start_control_client, start_control_server,
    start_insecure_control_server, ControlClient, ControlServer, Dialer, ServerOptions,
    TcpDialer, TlsClientConfigFactory, TlsClientSetup, TlsDialer, TlsError,
    TlsServerConfigFactory,
};

const TEST_CERT_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Install a test subscriber; repeated calls are fine.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

/// TLS material for one test: both factories share a CA and mint a fresh
/// leaf on every config request, the way rotating deployments do.
pub struct TestTls {
    pub server_factory: Arc<dyn TlsServerConfigFactory>,
    pub client_dialer: Arc<dyn Dialer>,
}

pub fn generate_test_tls() -> TestTls {
    let ca = create_ca_certs(TEST_CERT_LIFETIME).expect("generate test CA");
    TestTls {
        server_factory: Arc::new(MintingServerFactory { ca: ca.clone() }),
        client_dialer: Arc::new(TlsDialer::new(Arc::new(MintingClientFactory { ca }))),
    }
}

struct MintingServerFactory {
    ca: KeyPair,
}

impl TlsServerConfigFactory for MintingServerFactory {
    fn server_config(&self) -> Result<rustls::ServerConfig, TlsError> {
        let leaf = create_data_plane_routing_cert(&self.ca, TEST_CERT_LIFETIME, "")
            .map_err(|e| TlsError::Config(e.to_string()))?;
        server_tls_config(
            leaf.cert_bytes(),
            leaf.private_key_bytes(),
            self.ca.cert_bytes(),
            None,
        )
    }
}

struct MintingClientFactory {
    ca: KeyPair,
}

impl TlsClientConfigFactory for MintingClientFactory {
    fn client_setup(&self) -> Result<TlsClientSetup, TlsError> {
        let leaf = create_control_plane_cert(&self.ca, TEST_CERT_LIFETIME)
            .map_err(|e| TlsError::Config(e.to_string()))?;
        Ok(TlsClientSetup {
            config: client_tls_config(
                leaf.cert_bytes(),
                leaf.private_key_bytes(),
                self.ca.cert_bytes(),
            )?,
            server_name: LEGACY_FAKE_DNS_NAME.to_string(),
        })
    }
}

/// A connected server/client pair plus the scopes driving each side.
pub struct ControlPair {
    pub server: ControlServer,
    pub client: ControlClient,
    pub server_cancel: CancellationToken,
    pub client_cancel: CancellationToken,
}

impl ControlPair {
    /// Cancel both sides and wait for full teardown.
    pub async fn teardown(self) {
        self.client_cancel.cancel();
        self.server_cancel.cancel();
        self.client.closed().await;
        self.server.closed().await;
    }
}

pub async fn setup_secure_control_pair() -> ControlPair {
    init_logging();
    let tls = generate_test_tls();

    let server_cancel = CancellationToken::new();
    let server = start_control_server(
        server_cancel.clone(),
        tls.server_factory,
        ServerOptions::default().with_port(0),
    )
    .await
    .expect("start tls control server");

    let client_cancel = CancellationToken::new();
    let client = start_control_client(
        client_cancel.clone(),
        tls.client_dialer,
        format!("127.0.0.1:{}", server.listening_port()),
    )
    .await
    .expect("start tls control client");

    ControlPair {
        server,
        client,
        server_cancel,
        client_cancel,
    }
}

pub async fn setup_insecure_control_pair() -> ControlPair {
    init_logging();

    let server_cancel = CancellationToken::new();
    let server = start_insecure_control_server(server_cancel.clone(), ServerOptions::default().with_port(0))
        .await
        .expect("start control server");

    let client_cancel = CancellationToken::new();
    let client = start_control_client(
        client_cancel.clone(),
        Arc::new(TcpDialer::default()),
        format!("127.0.0.1:{}", server.listening_port()),
    )
    .await
    .expect("start control client");

    ControlPair {
        server,
        client,
        server_cancel,
        client_cancel,
    }
}

/// One message from `sender` to `receiver`, acked by the receiver's handler.
pub async fn send_receive_test(sender: &(impl Service + ?Sized), receiver: &(impl Service + ?Sized)) {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = parking_lot::Mutex::new(Some(tx));
    receiver.set_message_handler(tether_core::handler_fn(move |message| {
        assert_eq!(message.opcode(), 1);
        assert_eq!(&message.payload()[..], b"Funky!");
        message.ack();
        if let Some(tx) = tx.lock().take() {
            let _ = tx.send(());
        }
    }));

    tokio::time::timeout(
        Duration::from_secs(5),
        sender.send_and_wait_for_ack(1, bytes::Bytes::from_static(b"Funky!")),
    )
    .await
    .expect("send timed out")
    .expect("send failed");

    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("handler was never invoked")
        .unwrap();
}
