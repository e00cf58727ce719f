//! An async client library for [NSQ](https://nsq.io), a realtime distributed
//! messaging platform.
//!
//! `Producer` publishes to a pool of `nsqd` connections; `Consumer` fans
//! messages in from one connection per broker, discovered either from a
//! fixed address list or via `nsqlookupd`. Each `Connection` runs its own
//! background task that owns the socket, replies to heartbeats, and
//! reconnects with exponential backoff.
//!
//! # Examples
//!
//! ## Publishing
//!
//! ```rust,no_run
//! use nsq::Producer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let producer = Producer::new(["127.0.0.1:4150"]).await?;
//!     producer.publish("events", "hello world").await?;
//!     producer.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Consuming
//!
//! ```rust,no_run
//! use nsq::Consumer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let consumer = Consumer::new(
//!         "events",
//!         "my-channel",
//!         vec!["127.0.0.1:4150".to_string()],
//!         100,
//!     )
//!     .await?;
//!
//!     while let Some(message) = consumer.next_message().await {
//!         println!("{:?}", message.body());
//!         message.finish().await?;
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod frame;
pub mod message;
pub mod producer;
pub mod validation;


pub use codec::{Command, IntoArg, Payload};
pub use connection::{
    ConnectOptions, Connection, ConnectionFeatures, ConnectionStatus, IdentifyConfig,
};
pub use consumer::{CloseableQueue, Consumer, LookupConfig};
pub use error::{BrokerErrorCode, ConnectionError, NsqError, NsqResult};
pub use frame::{CodecError, Frame, FrameType, MessageId};
pub use message::Message;
pub use producer::Producer;
