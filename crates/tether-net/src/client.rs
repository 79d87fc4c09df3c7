//! Dialing client with a reconnect supervisor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_core::{Connection, ConnectionError, Message};

use crate::base::BaseConnection;
use crate::dial::{ControlStream, Dialer};
use crate::errors::DialError;

/// Exponential backoff with jitter for the dial loop.
///
/// Retries are unbounded: as long as the owning scope lives, the supervisor
/// keeps trying. Terminal giveup happens only on cancellation.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Fractional jitter applied to every delay, e.g. 0.2 for ±20%.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            max: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max.as_secs_f64());
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64(capped * (1.0 + spread))
    }
}

/// A connection that dials out and keeps itself alive.
///
/// All stream incarnations share one [`BaseConnection`], so the outbound
/// queue survives reconnects: a message enqueued while the link is down goes
/// out on the next successful dial, ahead of anything enqueued later.
pub struct ClientConnection {
    base: Arc<BaseConnection>,
    cancel: CancellationToken,
    closed_rx: watch::Receiver<bool>,
}

impl ClientConnection {
    /// Dial `target` and hand the connection to a background supervisor that
    /// redials on every fatal connection error. Returns after the first
    /// successful dial; fails only if the scope is cancelled first.
    pub async fn connect(
        cancel: CancellationToken,
        dialer: Arc<dyn Dialer>,
        target: impl Into<String>,
        backoff: BackoffPolicy,
    ) -> Result<Arc<Self>, DialError> {
        let target = target.into();
        let cancel = cancel.child_token();
        let base = BaseConnection::new(cancel.clone());

        let first = dial_with_backoff(&cancel, dialer.as_ref(), &target, &backoff).await?;
        info!(%target, "control client connected");

        let (closed_tx, closed_rx) = watch::channel(false);
        tokio::spawn(supervise(
            cancel.clone(),
            base.clone(),
            dialer,
            target,
            backoff,
            first,
            closed_tx,
        ));

        Ok(Arc::new(Self { base, cancel, closed_rx }))
    }

    /// Cancel this connection's scope.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the supervisor and both connection loops have fully
    /// terminated.
    pub async fn closed(&self) {
        let mut closed_rx = self.closed_rx.clone();
        while !*closed_rx.borrow() {
            if closed_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Outbound messages not yet on the wire.
    pub fn outbound_backlog(&self) -> usize {
        self.base.outbound_backlog()
    }
}

#[async_trait]
impl Connection for ClientConnection {
    fn write_message(&self, message: Message) {
        self.base.write_message(message)
    }

    async fn read_message(&self) -> Option<Message> {
        self.base.read_message().await
    }

    fn errors(&self) -> broadcast::Receiver<ConnectionError> {
        self.base.errors()
    }
}

async fn supervise(
    cancel: CancellationToken,
    base: Arc<BaseConnection>,
    dialer: Arc<dyn Dialer>,
    target: String,
    backoff: BackoffPolicy,
    first: Box<dyn ControlStream>,
    closed_tx: watch::Sender<bool>,
) {
    let mut stream = Some(first);

    loop {
        let current = match stream.take() {
            Some(stream) => stream,
            None => match dial_with_backoff(&cancel, dialer.as_ref(), &target, &backoff).await {
                Ok(stream) => {
                    info!(%target, "control client reconnected");
                    stream
                }
                Err(DialError::Cancelled) => break,
            },
        };

        base.consume_stream(base.incarnation_token(), current).await;

        if cancel.is_cancelled() {
            break;
        }
        debug!(%target, "connection incarnation ended, redialing");
    }

    base.close_reads();
    let _ = closed_tx.send(true);
}

async fn dial_with_backoff(
    cancel: &CancellationToken,
    dialer: &dyn Dialer,
    target: &str,
    backoff: &BackoffPolicy,
) -> Result<Box<dyn ControlStream>, DialError> {
    let mut attempt = 0u32;
    loop {
        let dialed = tokio::select! {
            _ = cancel.cancelled() => return Err(DialError::Cancelled),
            dialed = dialer.dial(target) => dialed,
        };

        match dialed {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                let delay = backoff.delay(attempt);
                warn!(error = %e, %target, attempt, ?delay, "dial failed, backing off");
                attempt = attempt.saturating_add(1);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(DialError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
