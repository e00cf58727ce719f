// ABOUTME: Polls nsqlookupd for the producers of a topic and reconciles the consumer's pool
// ABOUTME: Grounded on ansq's Lookupd: round-robin query, startup jitter, malformed-response tolerance

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tokio::task::JoinHandle;

use super::ConsumerInner;

#[derive(Debug, Deserialize)]
struct LookupResponse {
    producers: Vec<LookupProducer>,
}

#[derive(Debug, Deserialize)]
struct LookupProducer {
    broadcast_address: String,
    tcp_port: u16,
}

/// Config for discovering producers of a topic via one or more `nsqlookupd`
/// HTTP endpoints instead of a fixed `nsqd` address list.
#[derive(Debug, Clone)]
pub struct LookupConfig {
    pub addresses: Vec<String>,
    pub poll_interval: Duration,
    pub poll_jitter: f64,
}

impl LookupConfig {
    pub fn new(addresses: Vec<String>) -> Self {
        LookupConfig {
            addresses,
            poll_interval: Duration::from_secs(60),
            poll_jitter: 0.3,
        }
    }
}

pub(crate) struct LookupPoller {
    task: JoinHandle<()>,
}

impl LookupPoller {
    pub(crate) fn spawn(config: LookupConfig, inner: Weak<ConsumerInner>) -> Self {
        let http = reqwest::Client::new();
        let task = tokio::spawn(poll_loop(config, http, inner));
        LookupPoller { task }
    }

    pub(crate) fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for LookupPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop(config: LookupConfig, http: reqwest::Client, inner: Weak<ConsumerInner>) {
    let Some(strong) = inner.upgrade() else { return };
    query_once(&config, &http, 0, &strong).await;
    drop(strong);

    let jitter_ceiling = config.poll_interval.mul_f64(config.poll_jitter);
    let jitter = if jitter_ceiling.is_zero() {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..jitter_ceiling.as_secs_f64()))
    };
    tokio::time::sleep(jitter).await;

    let attempt = AtomicUsize::new(0);
    loop {
        tokio::time::sleep(config.poll_interval).await;
        let Some(strong) = inner.upgrade() else { return };
        let index = attempt.fetch_add(1, Ordering::SeqCst);
        query_once(&config, &http, index, &strong).await;
    }
}

async fn query_once(
    config: &LookupConfig,
    http: &reqwest::Client,
    attempt: usize,
    inner: &Arc<ConsumerInner>,
) {
    if config.addresses.is_empty() {
        return;
    }
    let address = &config.addresses[attempt % config.addresses.len()];
    let url = format!("{}/lookup?topic={}", address.trim_end_matches('/'), inner.topic);

    let response = match http.get(&url).send().await {
        Ok(resp) => resp,
        Err(err) => {
            tracing::error!(lookupd = %address, error = %err, "failed to query lookupd");
            return;
        }
    };

    let parsed: LookupResponse = match response.json().await {
        Ok(body) => body,
        Err(err) => {
            tracing::error!(lookupd = %address, error = %err, "malformed lookupd response");
            return;
        }
    };

    for producer in parsed.producers {
        let addr = format!("{}:{}", producer.broadcast_address, producer.tcp_port);
        super::connect_to_nsqd(inner.clone(), addr).await;
    }
}
