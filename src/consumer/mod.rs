// ABOUTME: Consumer fans in messages from one connection per broker, optionally discovered via lookupd
// ABOUTME: Distributes RDY credit across its connections and exposes messages through a shared queue

mod lookup;
mod queue;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::connection::{ConnectOptions, Connection, MessageSink};
use crate::error::{NsqError, NsqResult};
use crate::message::Message;

pub use lookup::LookupConfig;
use lookup::LookupPoller;
pub use queue::CloseableQueue;

pub(crate) struct ConsumerInner {
    topic: String,
    channel: String,
    connections: RwLock<HashMap<String, Connection>>,
    queue: Arc<CloseableQueue<Message>>,
    max_in_flight: AtomicU32,
    identify: crate::connection::IdentifyConfig,
    auth_secret: Option<String>,
    auto_reconnect: bool,
    using_lookupd: bool,
}

/// Connect to `addr` if not already connected, subscribing and wiring its
/// message delivery into the shared queue. Takes an owned `Arc` (rather than
/// `&self`) because the connection's `on_close` hook needs to schedule
/// `remove_connection` on its own task after this call returns.
pub(crate) async fn connect_to_nsqd(inner: Arc<ConsumerInner>, addr: String) {
    {
        let connections = inner.connections.read().await;
        if connections.contains_key(&addr) {
            return;
        }
    }

    let queue = inner.queue.clone();
    let sink = Arc::new(MessageSink {
        push: Box::new(move |message: Message| queue.push(message)),
    });

    let inner_for_close = inner.clone();
    let addr_for_close = addr.clone();
    let on_close: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
        let inner = inner_for_close.clone();
        let addr = addr_for_close.clone();
        tokio::spawn(async move {
            remove_connection(inner, &addr).await;
        });
    });

    let options = ConnectOptions {
        identify: inner.identify.clone(),
        auth_secret: inner.auth_secret.clone(),
        subscription: Some((inner.topic.clone(), inner.channel.clone())),
        // Lookupd adds and removes connections itself; disable automatic
        // per-connection reconnect so a dead producer is simply dropped.
        auto_reconnect: inner.auto_reconnect && !inner.using_lookupd,
        initial_rdy: 1,
        message_sink: Some(sink),
        on_close: Some(on_close),
        on_error: None,
    };

    match Connection::connect(addr.clone(), options).await {
        Ok(conn) => {
            inner.connections.write().await.insert(addr, conn);
            redistribute_rdy(&inner).await;
        }
        Err(err) => {
            tracing::warn!(addr = %addr, error = %err, "consumer failed to connect to broker");
        }
    }
}

async fn remove_connection(inner: Arc<ConsumerInner>, addr: &str) {
    let removed = inner.connections.write().await.remove(addr).is_some();
    if removed {
        redistribute_rdy(&inner).await;
    }
}

async fn redistribute_rdy(inner: &ConsumerInner) {
    let connections = inner.connections.read().await;
    let n = connections.len();
    if n == 0 {
        return;
    }
    let max = inner.max_in_flight.load(Ordering::SeqCst) as usize;
    let base = (max / n) as u32;
    let remainder = max % n;

    for (index, conn) in connections.values().enumerate() {
        let rdy = if index < remainder { base + 1 } else { base };
        if let Err(err) = conn.rdy(rdy).await {
            tracing::warn!(addr = conn.addr(), error = %err, "failed to update RDY");
        }
    }
}

/// A consumer of one topic/channel, fanning messages in from every broker it
/// is connected to (directly, or discovered through `nsqlookupd`).
pub struct Consumer {
    inner: Arc<ConsumerInner>,
    lookup: Option<LookupPoller>,
}

impl Consumer {
    /// Subscribe to `topic`/`channel` on a fixed list of `nsqd` addresses.
    pub async fn new(
        topic: impl Into<String>,
        channel: impl Into<String>,
        nsqd_addrs: Vec<String>,
        max_in_flight: u32,
    ) -> NsqResult<Self> {
        Self::build(topic, channel, nsqd_addrs, None, max_in_flight).await
    }

    /// Subscribe to `topic`/`channel`, discovering brokers through
    /// `nsqlookupd` instead of (or in addition to) a fixed address list.
    pub async fn with_lookupd(
        topic: impl Into<String>,
        channel: impl Into<String>,
        nsqd_addrs: Vec<String>,
        lookup: LookupConfig,
        max_in_flight: u32,
    ) -> NsqResult<Self> {
        Self::build(topic, channel, nsqd_addrs, Some(lookup), max_in_flight).await
    }

    async fn build(
        topic: impl Into<String>,
        channel: impl Into<String>,
        nsqd_addrs: Vec<String>,
        lookup_config: Option<LookupConfig>,
        max_in_flight: u32,
    ) -> NsqResult<Self> {
        let topic = topic.into();
        let channel = channel.into();
        crate::validation::validate_name(&topic)?;
        crate::validation::validate_name(&channel)?;

        let nsqd_addrs = if nsqd_addrs.is_empty() && lookup_config.is_none() {
            vec!["localhost:4150".to_string()]
        } else {
            nsqd_addrs
        };

        let inner = Arc::new(ConsumerInner {
            topic,
            channel,
            connections: RwLock::new(HashMap::new()),
            queue: Arc::new(CloseableQueue::new()),
            max_in_flight: AtomicU32::new(max_in_flight),
            identify: crate::connection::IdentifyConfig::default(),
            auth_secret: None,
            auto_reconnect: true,
            using_lookupd: lookup_config.is_some(),
        });

        for addr in nsqd_addrs {
            connect_to_nsqd(inner.clone(), addr).await;
        }

        let lookup = if let Some(config) = lookup_config {
            let poller = LookupPoller::spawn(config, Arc::downgrade(&inner));
            Some(poller)
        } else {
            None
        };

        if inner.connections.read().await.is_empty() && lookup.is_none() {
            return Err(NsqError::NoConnections);
        }

        Ok(Consumer { inner, lookup })
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }

    pub fn max_in_flight(&self) -> u32 {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    pub async fn set_max_in_flight(&self, count: u32) {
        self.inner.max_in_flight.store(count, Ordering::SeqCst);
        redistribute_rdy(&self.inner).await;
    }

    /// Wait for and return the next message, or `None` once `close()` has
    /// been called and the queue has drained. Messages whose client-side
    /// deadline already expired are skipped rather than handed to the
    /// caller.
    pub async fn next_message(&self) -> Option<Message> {
        loop {
            let message = self.inner.queue.pop().await?;
            if message.can_be_processed() {
                return Some(message);
            }
            tracing::warn!("dropping message whose msg_timeout already expired");
        }
    }

    pub async fn close(&self) {
        if let Some(lookup) = &self.lookup {
            lookup.stop();
        }
        let connections = self.inner.connections.read().await;
        for conn in connections.values() {
            conn.close().await;
        }
        self.inner.queue.close();
    }
}
