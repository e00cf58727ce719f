// ABOUTME: Public handle for a single nsqd TCP connection
// ABOUTME: A cheap, Clone-able front for the background actor task that owns the socket

mod actor;
mod state;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};

use crate::codec::{Command, Payload};
use crate::error::{ConnectionError, NsqError, NsqResult};
use crate::frame::{Frame, MessageId};

pub use state::{ConnectionFeatures, ConnectionStatus, IdentifyConfig};

pub(crate) use actor::MessageSink;
use actor::{ActorCommand, ActorConfig, ConnectionActor};

/// Options governing how a `Connection` identifies itself, whether it
/// subscribes on connect, and how it behaves across reconnects.
#[derive(Clone)]
pub struct ConnectOptions {
    pub identify: IdentifyConfig,
    pub auth_secret: Option<String>,
    pub subscription: Option<(String, String)>,
    pub auto_reconnect: bool,
    pub initial_rdy: u32,
    pub(crate) message_sink: Option<Arc<MessageSink>>,
    pub(crate) on_close: Option<Arc<dyn Fn() + Send + Sync>>,
    pub(crate) on_error: Option<Arc<dyn Fn(NsqError) + Send + Sync>>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            identify: IdentifyConfig::default(),
            auth_secret: None,
            subscription: None,
            auto_reconnect: true,
            initial_rdy: 1,
            message_sink: None,
            on_close: None,
            on_error: None,
        }
    }
}

impl ConnectOptions {
    pub fn with_subscription(mut self, topic: impl Into<String>, channel: impl Into<String>) -> Self {
        self.subscription = Some((topic.into(), channel.into()));
        self
    }

    pub fn with_auth_secret(mut self, secret: impl Into<String>) -> Self {
        self.auth_secret = Some(secret.into());
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_initial_rdy(mut self, count: u32) -> Self {
        self.initial_rdy = count;
        self
    }

    pub fn on_error(mut self, hook: impl Fn(NsqError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

/// A handle to a single connection to a broker. Cheap to clone; clones share
/// the same underlying background task and socket.
#[derive(Debug, Clone)]
pub struct Connection {
    addr: Arc<str>,
    commands: mpsc::UnboundedSender<ActorCommand>,
    status: watch::Receiver<ConnectionStatus>,
    features: watch::Receiver<ConnectionFeatures>,
    in_flight: Arc<AtomicU32>,
    auth_secret_configured: bool,
}

impl Connection {
    /// Open a TCP connection to `addr` (`host:port`), send the magic
    /// preamble, `IDENTIFY`, optionally `AUTH` and `SUB`, and return once the
    /// handshake has completed. If it fails and `auto_reconnect` is set the
    /// connection keeps retrying in the background; `connect` itself still
    /// reports the outcome of the first attempt.
    pub async fn connect(addr: impl Into<String>, options: ConnectOptions) -> NsqResult<Self> {
        let addr: Arc<str> = Arc::from(addr.into());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, mut status_rx) = watch::channel(ConnectionStatus::Init);
        let (features_tx, features_rx) = watch::channel(ConnectionFeatures::default());
        let in_flight = Arc::new(AtomicU32::new(0));
        let auth_secret_configured = options.auth_secret.is_some();

        let handle = Connection {
            addr: addr.clone(),
            commands: cmd_tx,
            status: status_rx.clone(),
            features: features_rx,
            in_flight: in_flight.clone(),
            auth_secret_configured,
        };

        let config = ActorConfig {
            addr: addr.to_string(),
            identify: options.identify,
            auth_secret: options.auth_secret,
            subscription: options.subscription,
            auto_reconnect: options.auto_reconnect,
            initial_rdy: options.initial_rdy,
            message_sink: options.message_sink,
            on_close: options.on_close,
            on_error: options.on_error,
        };

        let actor = ConnectionActor::new(
            config,
            cmd_rx,
            status_tx,
            features_tx,
            handle.clone(),
            in_flight,
        );
        tokio::spawn(actor.run());

        loop {
            match *status_rx.borrow() {
                ConnectionStatus::Connected => return Ok(handle),
                ConnectionStatus::Closed => {
                    return Err(NsqError::Connection(ConnectionError::Closed))
                }
                _ => {}
            }
            if status_rx.changed().await.is_err() {
                return Err(NsqError::Connection(ConnectionError::Closed));
            }
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn features(&self) -> ConnectionFeatures {
        self.features.borrow().clone()
    }

    /// Number of messages delivered by the broker that have not yet been
    /// finished or requeued. Incremented optimistically when a `Message`
    /// frame arrives, decremented optimistically when `FIN`/`REQ` is sent
    /// (before any broker acknowledgement), matching NSQ's client-library
    /// guidance.
    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Send an arbitrary command and wait for the response nsqd sends back.
    /// Use this for commands this type doesn't already wrap. An `Error`
    /// frame is surfaced as `Err(NsqError::Broker(..))` rather than handed
    /// back as a successful `Frame::Error`.
    pub async fn execute(&self, command: Command) -> NsqResult<Frame> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(ActorCommand::Execute {
                command,
                expects_response: true,
                responder: tx,
            })
            .map_err(|_| NsqError::Connection(ConnectionError::Closed))?;
        let frame = rx
            .await
            .map_err(|_| NsqError::Connection(ConnectionError::Closed))?
            .map_err(NsqError::Connection)?;

        if let Frame::Error(body) = &frame {
            let (code, message) = Frame::error_parts(body);
            return Err(NsqError::Broker(
                crate::error::BrokerErrorCode::parse(code, message),
            ));
        }
        Ok(frame)
    }

    /// Fail synchronously, without touching the wire, when the broker has
    /// told us (via `IDENTIFY`'s response) that auth is required and we
    /// never configured an `auth_secret` to satisfy it. Letting the command
    /// reach nsqd would just earn the same rejection one round-trip later.
    fn require_authorized(&self) -> NsqResult<()> {
        if self.features().auth_required == Some(true) && !self.auth_secret_configured {
            return Err(NsqError::Unauthorized(
                "broker requires AUTH but no auth_secret was configured".to_string(),
            ));
        }
        Ok(())
    }

    async fn fire_and_forget(&self, command: Command) -> NsqResult<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(ActorCommand::Execute {
                command,
                expects_response: false,
                responder: tx,
            })
            .map_err(|_| NsqError::Connection(ConnectionError::Closed))?;
        rx.await
            .map_err(|_| NsqError::Connection(ConnectionError::Closed))?
            .map_err(NsqError::Connection)?;
        Ok(())
    }

    pub async fn identify(&self, config: IdentifyConfig) -> NsqResult<ConnectionFeatures> {
        let payload = serde_json::to_vec(&config)
            .map_err(|e| NsqError::InvalidArgument(e.to_string()))?;
        let command = Command::new("IDENTIFY").body(Payload::Single(Bytes::from(payload)));
        self.execute(command).await?;
        Ok(self.features())
    }

    pub async fn auth(&self, secret: &str) -> NsqResult<()> {
        let command = Command::new("AUTH").body(Payload::Single(Bytes::copy_from_slice(
            secret.as_bytes(),
        )));
        self.execute(command).await.map(|_| ())
    }

    /// Subscribe and wait for nsqd's acknowledgement.
    pub async fn subscribe(&self, topic: &str, channel: &str) -> NsqResult<()> {
        self.require_authorized()?;
        crate::validation::validate_name(topic)?;
        crate::validation::validate_name(channel)?;
        let command = Command::new("SUB").arg(topic).arg(channel);
        self.execute(command).await.map(|_| ())
    }

    /// Issue `SUB` without waiting for the response (fire-and-forget; use
    /// `subscribe` when you need confirmation).
    pub async fn sub(&self, topic: &str, channel: &str) -> NsqResult<()> {
        self.require_authorized()?;
        crate::validation::validate_name(topic)?;
        crate::validation::validate_name(channel)?;
        let command = Command::new("SUB").arg(topic).arg(channel);
        self.fire_and_forget(command).await
    }

    pub async fn publish(&self, topic: &str, body: impl Into<Bytes>) -> NsqResult<()> {
        self.require_authorized()?;
        crate::validation::validate_name(topic)?;
        let command = Command::new("PUB")
            .arg(topic)
            .body(Payload::Single(body.into()));
        self.execute(command).await.map(|_| ())
    }

    pub async fn mpub(&self, topic: &str, bodies: Vec<Bytes>) -> NsqResult<()> {
        self.require_authorized()?;
        crate::validation::validate_name(topic)?;
        let command = Command::new("MPUB").arg(topic).body(Payload::Multi(bodies));
        self.execute(command).await.map(|_| ())
    }

    /// Deferred publish: nsqd holds the message for `delay` before making it
    /// available to consumers.
    pub async fn dpub(&self, topic: &str, delay: Duration, body: impl Into<Bytes>) -> NsqResult<()> {
        self.require_authorized()?;
        crate::validation::validate_name(topic)?;
        let command = Command::new("DPUB")
            .arg(topic)
            .arg(delay.as_millis() as u64)
            .body(Payload::Single(body.into()));
        self.execute(command).await.map(|_| ())
    }

    pub async fn rdy(&self, count: u32) -> NsqResult<()> {
        let command = Command::new("RDY").arg(count);
        self.fire_and_forget(command).await
    }

    pub async fn fin(&self, id: MessageId) -> NsqResult<()> {
        let command = Command::new("FIN").arg(id.to_string());
        self.fire_and_forget(command).await
    }

    pub async fn req(&self, id: MessageId, delay: Duration) -> NsqResult<()> {
        let command = Command::new("REQ")
            .arg(id.to_string())
            .arg(delay.as_millis() as u64);
        self.fire_and_forget(command).await
    }

    pub async fn touch(&self, id: MessageId) -> NsqResult<()> {
        let command = Command::new("TOUCH").arg(id.to_string());
        self.fire_and_forget(command).await
    }

    pub async fn nop(&self) -> NsqResult<()> {
        self.fire_and_forget(Command::new("NOP")).await
    }

    /// Close the connection and wait for its background actor task to
    /// finish tearing down (socket flushed and dropped, `on_close` hook
    /// run). Idempotent; pending operations resolve with a `Closed` error.
    pub async fn close(&self) {
        let _ = self.commands.send(ActorCommand::Close);
        let mut status = self.status.clone();
        while *status.borrow() != ConnectionStatus::Closed {
            if status.changed().await.is_err() {
                return;
            }
        }
    }

    /// Force an immediate reconnect attempt, bypassing backoff. Used after a
    /// cooperative socket swap (e.g. a TLS upgrade) or to recover eagerly
    /// instead of waiting out the current backoff delay.
    pub async fn reconnect(&self) -> NsqResult<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(ActorCommand::Reconnect { responder: tx })
            .map_err(|_| NsqError::Connection(ConnectionError::Closed))?;
        rx.await
            .map_err(|_| NsqError::Connection(ConnectionError::Closed))?
            .map_err(NsqError::Connection)
            .map(|_| ())
    }

    /// Wait until the connection reaches `Connected` status (or observe that
    /// it never will because the watch channel closed).
    pub async fn wait_connected(&self) {
        let mut status = self.status.clone();
        while *status.borrow() != ConnectionStatus::Connected {
            if status.changed().await.is_err() {
                return;
            }
        }
    }

    /// A handle with no actor behind it, for unit-testing code that needs a
    /// `Connection` to exist but never actually calls into it (e.g.
    /// `Message`'s deadline/one-shot bookkeeping).
    #[cfg(test)]
    pub(crate) fn disconnected_stub() -> Self {
        let (cmd_tx, _cmd_rx) = mpsc::unbounded_channel();
        let (_status_tx, status_rx) = watch::channel(ConnectionStatus::Closed);
        let (_features_tx, features_rx) = watch::channel(ConnectionFeatures::default());
        Connection {
            addr: Arc::from("stub"),
            commands: cmd_tx,
            status: status_rx,
            features: features_rx,
            in_flight: Arc::new(AtomicU32::new(0)),
            auth_secret_configured: false,
        }
    }
}
