//! Connection layer of the tether control protocol: the base reader/writer
//! pair over one byte stream, the auto-reconnecting client, the single-peer
//! server, and the TCP/TLS dialers they run on.

pub mod base;
pub mod client;
pub mod control_client;
pub mod dial;
pub mod errors;
pub mod queue;
pub mod server;
pub mod tls;

pub use base::BaseConnection;
pub use client::{BackoffPolicy, ClientConnection};
pub use control_client::{start_control_client, ControlClient};
pub use dial::{set_keep_alive, ControlStream, Dialer, TcpDialer, KEEP_ALIVE};
pub use errors::{is_transient, DialError};
pub use queue::MessageQueue;
pub use server::{
    start_control_server, start_insecure_control_server, ControlServer, ServerOptions,
};
pub use tls::{
    client_tls_config, client_tls_setup_from_dir, server_tls_config, server_tls_config_from_dir,
    PemTlsClientConfigFactory, PemTlsServerConfigFactory, TlsClientConfigFactory, TlsClientSetup,
    TlsDialer, TlsError, TlsServerConfigFactory,
};
