// ABOUTME: Producer publishes to a pool of broker connections, picking one at random per call
// ABOUTME: Grounded on ansq's Writer: one connection per broker address, no topic affinity

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::seq::SliceRandom;
use tokio::sync::RwLock;

use crate::connection::{ConnectOptions, Connection, ConnectionStatus};
use crate::error::{NsqError, NsqResult};

/// Publishes messages across a fixed set of `nsqd` broker connections.
///
/// One `Connection` is held open per broker address; `publish`/`mpub`/`dpub`
/// pick a uniformly random `Connected` one, the same load-spreading strategy
/// as the reference `ansq` `Writer`.
#[derive(Clone)]
pub struct Producer {
    connections: Arc<RwLock<HashMap<String, Connection>>>,
}

impl Producer {
    /// Connect to every address in `addrs`. Individual connection failures
    /// are logged and skipped; startup only fails if `addrs` is empty or
    /// every address fails to connect.
    pub async fn new<I, S>(addrs: I) -> NsqResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_options(addrs, ConnectOptions::default()).await
    }

    pub async fn with_options<I, S>(addrs: I, options: ConnectOptions) -> NsqResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let addrs: Vec<String> = addrs.into_iter().map(Into::into).collect();
        if addrs.is_empty() {
            return Err(NsqError::NoConnections);
        }

        let mut connections = HashMap::new();
        for addr in addrs {
            let mut opts = options.clone();
            opts.subscription = None;
            match Connection::connect(addr.clone(), opts).await {
                Ok(conn) => {
                    connections.insert(addr, conn);
                }
                Err(err) => {
                    tracing::warn!(addr = %addr, error = %err, "producer failed to connect to broker");
                }
            }
        }

        if connections.is_empty() {
            return Err(NsqError::NoConnections);
        }

        Ok(Producer {
            connections: Arc::new(RwLock::new(connections)),
        })
    }

    pub async fn publish(&self, topic: &str, body: impl Into<Bytes>) -> NsqResult<()> {
        self.pick_connection().await?.publish(topic, body).await
    }

    pub async fn mpub(&self, topic: &str, bodies: Vec<Bytes>) -> NsqResult<()> {
        self.pick_connection().await?.mpub(topic, bodies).await
    }

    pub async fn dpub(&self, topic: &str, delay: Duration, body: impl Into<Bytes>) -> NsqResult<()> {
        self.pick_connection().await?.dpub(topic, delay, body).await
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn close(&self) {
        let connections = self.connections.read().await;
        for conn in connections.values() {
            conn.close().await;
        }
    }

    async fn pick_connection(&self) -> NsqResult<Connection> {
        let connections = self.connections.read().await;
        let candidates: Vec<&Connection> = connections
            .values()
            .filter(|c| c.status() == ConnectionStatus::Connected)
            .collect();

        candidates
            .choose(&mut rand::thread_rng())
            .map(|c| (*c).clone())
            .ok_or(NsqError::NoConnections)
    }
}
