// ABOUTME: Connection status, the IDENTIFY config a client sends, and the features a broker negotiates

use serde::{Deserialize, Serialize};

/// Where a `Connection` is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Init,
    Connected,
    Reconnecting,
    Closing,
    Closed,
}

/// What we tell nsqd about ourselves in the `IDENTIFY` command.
///
/// Serializes to the compact JSON body nsqd expects; fields left at their
/// default (`None`/`false`) are omitted so that identifying does not
/// implicitly opt into features we never asked for.
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyConfig {
    pub client_id: String,
    pub hostname: String,
    pub user_agent: String,
    pub feature_negotiation: bool,
    pub heartbeat_interval: i32,
    pub msg_timeout: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u8>,
    pub tls_v1: bool,
    pub snappy: bool,
    pub deflate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deflate_level: Option<i32>,
}

impl Default for IdentifyConfig {
    fn default() -> Self {
        let hostname = hostname_or_unknown();
        IdentifyConfig {
            client_id: hostname.clone(),
            hostname,
            user_agent: format!("nsq-rs/{}", env!("CARGO_PKG_VERSION")),
            feature_negotiation: true,
            heartbeat_interval: 30_000,
            msg_timeout: 60_000,
            sample_rate: None,
            tls_v1: false,
            snappy: false,
            deflate: false,
            deflate_level: None,
        }
    }
}

impl IdentifyConfig {
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_heartbeat_interval_ms(mut self, interval_ms: i32) -> Self {
        self.heartbeat_interval = interval_ms;
        self
    }

    pub fn with_msg_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.msg_timeout = timeout_ms;
        self
    }

    pub fn with_sample_rate(mut self, rate: u8) -> Self {
        self.sample_rate = Some(rate);
        self
    }
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

/// What nsqd reports back in its `IDENTIFY` response, when feature
/// negotiation is enabled. Every field is optional because a broker may omit
/// any of them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionFeatures {
    pub max_rdy_count: Option<i64>,
    pub max_msg_timeout: Option<i64>,
    pub msg_timeout: Option<i64>,
    pub tls_v1: Option<bool>,
    pub deflate: Option<bool>,
    pub snappy: Option<bool>,
    pub auth_required: Option<bool>,
}
