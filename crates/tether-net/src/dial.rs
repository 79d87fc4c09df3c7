//! Pluggable dialers producing the byte streams a connection runs over.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// Idle interval for TCP keep-alive probes on every dialed and accepted
/// socket, so half-dead peers are noticed instead of waiting on application
/// traffic.
pub const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Object-safe alias for the full-duplex byte streams connections run over.
pub trait ControlStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> ControlStream for T {}

#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, target: &str) -> io::Result<Box<dyn ControlStream>>;
}

/// Plain TCP dialer.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    pub keep_alive: Duration,
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self { keep_alive: KEEP_ALIVE }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, target: &str) -> io::Result<Box<dyn ControlStream>> {
        let stream = TcpStream::connect(target).await?;
        if let Err(e) = set_keep_alive(&stream, self.keep_alive) {
            debug!(error = %e, %target, "failed to enable tcp keep-alive");
        }
        Ok(Box::new(stream))
    }
}

/// Enable keep-alive probes on a socket.
pub fn set_keep_alive(stream: &TcpStream, idle: Duration) -> io::Result<()> {
    let sock_ref = socket2::SockRef::from(stream);
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(idle)
        .with_interval(idle / 3);
    sock_ref.set_tcp_keepalive(&keepalive)
}
