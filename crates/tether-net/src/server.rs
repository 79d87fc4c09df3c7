//! Listening side of a control channel.
//!
//! The server speaks to exactly one peer at a time. The accept loop adopts
//! the newest connection: whoever dials in replaces the previous peer, which
//! keeps a restarted client from being locked out by its own half-dead
//! predecessor.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tether_core::{
    ErrorHandler, MessageHandler, OpCode, Service, ServiceError, DEFAULT_MAX_PAYLOAD,
};
use tether_service::ControlService;

use crate::base::BaseConnection;
use crate::dial::{set_keep_alive, ControlStream, KEEP_ALIVE};
use crate::tls::TlsServerConfigFactory;

/// Pause after a failed `accept` before trying again.
const ACCEPT_RETRY_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Port to listen on; 0 asks the OS for an ephemeral one, discoverable
    /// through [`ControlServer::listening_port`].
    pub port: u16,
    pub keep_alive: Duration,
    pub max_payload: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: 9090,
            keep_alive: KEEP_ALIVE,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl ServerOptions {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// A running control server. Exposes the [`Service`] surface of whatever
/// peer is currently connected.
pub struct ControlServer {
    service: Arc<ControlService>,
    listening_port: u16,
    closed_rx: watch::Receiver<bool>,
}

impl ControlServer {
    /// The bound port, stable for the lifetime of the server. With
    /// `ServerOptions::port == 0` this is the OS-assigned one.
    pub fn listening_port(&self) -> u16 {
        self.listening_port
    }

    /// Resolves only after the accept loop and any active connection have
    /// fully terminated.
    pub async fn closed(&self) {
        let mut closed_rx = self.closed_rx.clone();
        while !*closed_rx.borrow() {
            if closed_rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[async_trait]
impl Service for ControlServer {
    async fn send_and_wait_for_ack(&self, opcode: OpCode, payload: Bytes) -> Result<(), ServiceError> {
        self.service.send_and_wait_for_ack(opcode, payload).await
    }

    fn set_message_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.service.set_message_handler(handler)
    }

    fn set_error_handler(&self, handler: Arc<dyn ErrorHandler>) {
        self.service.set_error_handler(handler)
    }
}

/// Start a plaintext control server.
pub async fn start_insecure_control_server(
    cancel: CancellationToken,
    options: ServerOptions,
) -> io::Result<ControlServer> {
    start(cancel, None, options).await
}

/// Start a mutually-authenticated TLS control server. The factory is asked
/// for a fresh config on every accepted connection, so certificate rotation
/// needs no restart.
pub async fn start_control_server(
    cancel: CancellationToken,
    tls: Arc<dyn TlsServerConfigFactory>,
    options: ServerOptions,
) -> io::Result<ControlServer> {
    start(cancel, Some(tls), options).await
}

async fn start(
    cancel: CancellationToken,
    tls: Option<Arc<dyn TlsServerConfigFactory>>,
    options: ServerOptions,
) -> io::Result<ControlServer> {
    let cancel = cancel.child_token();
    let listener = TcpListener::bind(("0.0.0.0", options.port)).await?;
    let listening_port = listener.local_addr()?.port();
    info!(port = listening_port, tls = tls.is_some(), "control server listening");

    let base = BaseConnection::with_max_payload(cancel.clone(), options.max_payload);
    let service = ControlService::new(cancel.clone(), base.clone());

    let (closed_tx, closed_rx) = watch::channel(false);
    tokio::spawn(accept_loop(
        cancel,
        listener,
        base,
        tls,
        options.keep_alive,
        closed_tx,
    ));

    Ok(ControlServer {
        service,
        listening_port,
        closed_rx,
    })
}

async fn accept_loop(
    cancel: CancellationToken,
    listener: TcpListener,
    base: Arc<BaseConnection>,
    tls: Option<Arc<dyn TlsServerConfigFactory>>,
    keep_alive: Duration,
    closed_tx: watch::Sender<bool>,
) {
    let mut active: Option<(CancellationToken, JoinHandle<()>)> = None;

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (tcp, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "accept failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_RETRY_PAUSE) => continue,
                }
            }
        };

        if let Err(e) = set_keep_alive(&tcp, keep_alive) {
            debug!(error = %e, %peer, "failed to enable tcp keep-alive");
        }

        let stream: Box<dyn ControlStream> = match &tls {
            None => Box::new(tcp),
            Some(factory) => match handshake(factory.as_ref(), tcp).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, %peer, "rejecting connection");
                    continue;
                }
            },
        };
        info!(%peer, "control peer connected");

        // Single-peer policy, newest wins: shut the previous connection down
        // before adopting this one.
        if let Some((token, handle)) = active.take() {
            debug!("replacing active control peer");
            // An already-cancelled token means the loops died and reported
            // on their own.
            let was_live = !token.is_cancelled();
            token.cancel();
            let _ = handle.await;
            if was_live {
                base.notify_reset("connection replaced by a newer peer");
            }
        }

        let incarnation = base.incarnation_token();
        let handle = tokio::spawn({
            let base = base.clone();
            let incarnation = incarnation.clone();
            async move { base.consume_stream(incarnation, stream).await }
        });
        active = Some((incarnation, handle));
    }

    if let Some((token, handle)) = active.take() {
        token.cancel();
        let _ = handle.await;
    }
    base.close_reads();
    let _ = closed_tx.send(true);
}

async fn handshake(
    factory: &dyn TlsServerConfigFactory,
    tcp: TcpStream,
) -> Result<Box<dyn ControlStream>, io::Error> {
    let config = factory.server_config().map_err(io::Error::other)?;
    let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(config));
    let stream = acceptor.accept(tcp).await?;
    Ok(Box::new(stream))
}
