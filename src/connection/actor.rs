// ABOUTME: The background task that owns a Connection's socket: read loop, dispatch, heartbeat reply
// ABOUTME: and auto-reconnect. Generalizes the teacher's per-connection task from tokio's mini-redis lineage.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};

use crate::codec::{Command, Payload};
use crate::connection::state::{ConnectionFeatures, ConnectionStatus, IdentifyConfig};
use crate::connection::Connection;
use crate::error::{ConnectionError, NsqError};
use crate::frame::{Frame, FrameDecoder, MAGIC_V2};
use crate::message::Message;

pub(crate) type ResponseResult = Result<Frame, ConnectionError>;

pub(crate) enum ActorCommand {
    Execute {
        command: Command,
        expects_response: bool,
        responder: oneshot::Sender<ResponseResult>,
    },
    Reconnect {
        responder: oneshot::Sender<ResponseResult>,
    },
    Close,
}

/// Exponential backoff between reconnect attempts: doubles on every failure,
/// resets once a connection succeeds, capped at `max`.
#[derive(Debug, Clone)]
pub(crate) struct ReconnectPolicy {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl ReconnectPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        ReconnectPolicy {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::new(Duration::from_secs(2), Duration::from_secs(2048))
    }
}

/// Hook invoked for every message pushed by the broker, and the queue
/// in-flight counter it shares with its `Consumer`/`Producer` owner.
pub(crate) struct MessageSink {
    pub push: Box<dyn Fn(Message) + Send + Sync>,
}

pub(crate) struct ActorConfig {
    pub addr: String,
    pub identify: IdentifyConfig,
    pub auth_secret: Option<String>,
    pub subscription: Option<(String, String)>,
    pub auto_reconnect: bool,
    pub initial_rdy: u32,
    pub message_sink: Option<Arc<MessageSink>>,
    pub on_close: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(NsqError) + Send + Sync>>,
}

pub(crate) struct ConnectionActor {
    config: ActorConfig,
    cmd_rx: mpsc::UnboundedReceiver<ActorCommand>,
    status_tx: watch::Sender<ConnectionStatus>,
    features_tx: watch::Sender<ConnectionFeatures>,
    self_handle: Connection,
    stream: Option<BufWriter<TcpStream>>,
    decoder: FrameDecoder,
    pending: VecDeque<oneshot::Sender<ResponseResult>>,
    in_flight: Arc<AtomicU32>,
    backoff: ReconnectPolicy,
}

impl ConnectionActor {
    pub(crate) fn new(
        config: ActorConfig,
        cmd_rx: mpsc::UnboundedReceiver<ActorCommand>,
        status_tx: watch::Sender<ConnectionStatus>,
        features_tx: watch::Sender<ConnectionFeatures>,
        self_handle: Connection,
        in_flight: Arc<AtomicU32>,
    ) -> Self {
        ConnectionActor {
            config,
            cmd_rx,
            status_tx,
            features_tx,
            self_handle,
            stream: None,
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            in_flight,
            backoff: ReconnectPolicy::default(),
        }
    }

    pub(crate) async fn run(mut self) {
        // The very first handshake is never subject to `auto_reconnect`: a
        // connection that has never succeeded has nothing to recover to, so
        // a failure here is terminal regardless of the reconnect policy.
        // `auto_reconnect` only governs connections that have to recover
        // from a drop after having been `Connected` at least once, handled
        // below by `reconnect_or_shutdown`.
        if self.open().await.is_err() {
            let _ = self.status_tx.send(ConnectionStatus::Closed);
            return;
        }

        let mut read_buf = [0u8; 4096];
        loop {
            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => {
                    eprintln!("DEBUG: got cmd");
                    match cmd {
                        Some(ActorCommand::Execute { command, expects_response, responder }) => {
                            self.handle_execute(command, expects_response, responder).await;
                        }
                        Some(ActorCommand::Reconnect { responder }) => {
                            self.stream = None;
                            self.fail_pending(ConnectionError::Closed);
                            let result = self.open().await;
                            let _ = responder.send(result.map(|_| Frame::Response(Bytes::new())));
                        }
                        Some(ActorCommand::Close) | None => {
                            self.shutdown().await;
                            return;
                        }
                    }
                }

                read_result = read_from_stream(&mut self.stream, &mut read_buf) => {
                    match read_result {
                        Ok(0) => {
                            if !self.reconnect_or_shutdown().await {
                                return;
                            }
                        }
                        Ok(n) => {
                            self.decoder.buffer_mut().extend_from_slice(&read_buf[..n]);
                            if let Err(err) = self.drain_frames().await {
                                self.fail_pending(ConnectionError::Protocol(err.to_string()));
                                if !self.reconnect_or_shutdown().await {
                                    return;
                                }
                            }
                        }
                        Err(_err) => {
                            if !self.reconnect_or_shutdown().await {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn handle_execute(
        &mut self,
        command: Command,
        expects_response: bool,
        responder: oneshot::Sender<ResponseResult>,
    ) {
        if self.stream.is_none() {
            let _ = responder.send(Err(ConnectionError::Closed));
            return;
        }

        let mut buf = BytesMut::new();
        command.encode(&mut buf);
        let write_result = self.stream.as_mut().unwrap().write_all(&buf).await;

        if let Err(err) = write_result {
            let _ = responder.send(Err(ConnectionError::Io(err)));
            self.reconnect_or_shutdown().await;
            return;
        }
        let _ = self.stream.as_mut().unwrap().flush().await;

        if command.name == "FIN" || command.name == "REQ" {
            self.in_flight.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            }).ok();
        }

        if expects_response {
            self.pending.push_back(responder);
        } else {
            let _ = responder.send(Ok(Frame::Response(Bytes::new())));
        }
    }

    async fn drain_frames(&mut self) -> Result<(), crate::frame::CodecError> {
        while let Some(frame) = self.decoder.decode()? {
            self.dispatch(frame).await;
        }
        Ok(())
    }

    async fn dispatch(&mut self, frame: Frame) {
        if frame.is_heartbeat() {
            self.write_nop().await;
            return;
        }

        if let Frame::Message {
            timestamp_ns,
            attempts,
            id,
            body,
        } = &frame
        {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            if let Some(sink) = &self.config.message_sink {
                let msg_timeout = Duration::from_millis(self.config.identify.msg_timeout as u64);
                let message = Message::new(
                    *id,
                    body.clone(),
                    *timestamp_ns,
                    *attempts,
                    msg_timeout,
                    self.self_handle.clone(),
                );
                (sink.push)(message);
            }
            return;
        }

        if let Frame::Error(body) = &frame {
            let (code, message) = Frame::error_parts(body);
            let broker_error = crate::error::BrokerErrorCode::parse(code, message);
            if let Some(responder) = self.pending.pop_front() {
                let _ = responder.send(Ok(frame));
            } else if let Some(hook) = &self.config.on_error {
                hook(NsqError::Broker(broker_error));
            }
            return;
        }

        if let Some(responder) = self.pending.pop_front() {
            let _ = responder.send(Ok(frame));
        }
    }

    async fn write_nop(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            let mut buf = BytesMut::new();
            Command::new("NOP").encode(&mut buf);
            let _ = stream.write_all(&buf).await;
            let _ = stream.flush().await;
        }
    }

    async fn open(&mut self) -> Result<(), ConnectionError> {
        let tcp = TcpStream::connect(&self.config.addr).await?;
        let mut stream = BufWriter::new(tcp);
        stream.write_all(MAGIC_V2).await?;
        stream.flush().await?;
        self.stream = Some(stream);
        self.decoder = FrameDecoder::new();

        self.identify().await?;
        if let Some(secret) = self.config.auth_secret.clone() {
            self.auth(&secret).await?;
        }
        if let Some((topic, channel)) = self.config.subscription.clone() {
            self.subscribe(&topic, &channel).await?;
            self.send_rdy(self.config.initial_rdy).await?;
        }

        let _ = self.status_tx.send(ConnectionStatus::Connected);
        self.backoff.reset();
        Ok(())
    }

    async fn identify(&mut self) -> Result<(), ConnectionError> {
        let payload = serde_json::to_vec(&self.config.identify)
            .map_err(|e| ConnectionError::Protocol(e.to_string()))?;
        let command =
            Command::new("IDENTIFY").body(Payload::Single(Bytes::from(payload)));
        let frame = self.write_and_await(command).await?;
        if let Frame::Response(body) = frame_as_result(frame)? {
            if let Ok(features) = serde_json::from_slice::<ConnectionFeatures>(&body) {
                let _ = self.features_tx.send(features);
            }
        }
        Ok(())
    }

    async fn auth(&mut self, secret: &str) -> Result<(), ConnectionError> {
        let command = Command::new("AUTH").body(Payload::Single(Bytes::copy_from_slice(
            secret.as_bytes(),
        )));
        let frame = self.write_and_await(command).await?;
        frame_as_result(frame)?;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, channel: &str) -> Result<(), ConnectionError> {
        let command = Command::new("SUB").arg(topic.to_string()).arg(channel.to_string());
        let frame = self.write_and_await(command).await?;
        frame_as_result(frame)?;
        Ok(())
    }

    async fn send_rdy(&mut self, count: u32) -> Result<(), ConnectionError> {
        let command = Command::new("RDY").arg(count);
        self.write_fire_and_forget(command).await
    }

    async fn write_and_await(&mut self, command: Command) -> Result<Frame, ConnectionError> {
        let mut buf = BytesMut::new();
        command.encode(&mut buf);
        let stream = self.stream.as_mut().ok_or(ConnectionError::Closed)?;
        stream.write_all(&buf).await?;
        stream.flush().await?;

        loop {
            if let Some(frame) = self.decoder.decode()? {
                return Ok(frame);
            }
            let mut tmp = [0u8; 4096];
            let n = self
                .stream
                .as_mut()
                .ok_or(ConnectionError::Closed)?
                .read(&mut tmp)
                .await?;
            if n == 0 {
                return Err(ConnectionError::Closed);
            }
            self.decoder.buffer_mut().extend_from_slice(&tmp[..n]);
        }
    }

    async fn write_fire_and_forget(&mut self, command: Command) -> Result<(), ConnectionError> {
        let mut buf = BytesMut::new();
        command.encode(&mut buf);
        let stream = self.stream.as_mut().ok_or(ConnectionError::Closed)?;
        stream.write_all(&buf).await?;
        stream.flush().await?;
        Ok(())
    }

    fn fail_pending(&mut self, err: ConnectionError) {
        while let Some(responder) = self.pending.pop_front() {
            let _ = responder.send(Err(match &err {
                ConnectionError::Protocol(msg) => ConnectionError::Protocol(msg.clone()),
                ConnectionError::Closed => ConnectionError::Closed,
                ConnectionError::Timeout => ConnectionError::Timeout,
                ConnectionError::Io(io_err) => {
                    ConnectionError::Io(std::io::Error::new(io_err.kind(), io_err.to_string()))
                }
            }));
        }
    }

    /// Returns `true` if the actor should keep running (it reconnected, or
    /// reconnect is in progress), `false` if it shut down for good.
    async fn reconnect_or_shutdown(&mut self) -> bool {
        self.stream = None;
        self.fail_pending(ConnectionError::Closed);

        if let Some(on_close) = &self.config.on_close {
            on_close();
        }

        if !self.config.auto_reconnect {
            let _ = self.status_tx.send(ConnectionStatus::Closed);
            return false;
        }

        self.enter_reconnect_or_die().await;
        matches!(*self.status_tx.borrow(), ConnectionStatus::Connected)
    }

    async fn enter_reconnect_or_die(&mut self) {
        let _ = self.status_tx.send(ConnectionStatus::Reconnecting);
        loop {
            let delay = self.backoff.next_delay();
            tokio::time::sleep(delay).await;

            match self.open().await {
                Ok(()) => return,
                Err(err) => {
                    tracing::warn!(addr = %self.config.addr, error = %err, "reconnect attempt failed");
                    if let Some(hook) = &self.config.on_error {
                        hook(NsqError::Connection(err));
                    }
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        let _ = self.status_tx.send(ConnectionStatus::Closing);
        // Only a connection that actually subscribed has a CLS to send; a
        // Producer connection never issues SUB and closing it is a plain
        // socket teardown.
        if self.config.subscription.is_some() {
            if let Some(stream) = self.stream.as_mut() {
                let mut buf = BytesMut::new();
                Command::new("CLS").encode(&mut buf);
                let _ = stream.write_all(&buf).await;
                let _ = stream.flush().await;
            }
        }
        self.fail_pending(ConnectionError::Closed);
        self.stream = None;
        let _ = self.status_tx.send(ConnectionStatus::Closed);
        if let Some(on_close) = &self.config.on_close {
            on_close();
        }
    }
}

/// Turn an `Error` frame received during the handshake into a `Protocol`
/// error; anything else passes through unchanged.
fn frame_as_result(frame: Frame) -> Result<Frame, ConnectionError> {
    if let Frame::Error(body) = &frame {
        let (code, message) = Frame::error_parts(body);
        let broker_error = crate::error::BrokerErrorCode::parse(code, message);
        return Err(ConnectionError::Protocol(broker_error.to_string()));
    }
    Ok(frame)
}

async fn read_from_stream(
    stream: &mut Option<BufWriter<TcpStream>>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match stream {
        Some(stream) => stream.read(buf).await,
        None => std::future::pending().await,
    }
}

