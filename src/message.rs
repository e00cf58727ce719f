// ABOUTME: The user-facing Message type handed out by a Consumer's queue
// ABOUTME: Bound to the Connection it arrived on so finish/requeue/touch always reach the right broker

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::connection::Connection;
use crate::error::NsqResult;
use crate::frame::MessageId;

/// A message delivered by a broker, bound to the connection it arrived on.
///
/// `finish` and `requeue` are terminal: after either call the message can no
/// longer be processed, and any further `finish`/`requeue`/`touch` (even on a
/// clone of this `Message`) is a no-op that warns instead of touching the
/// wire. `touch` extends the processing deadline without ending it. A
/// `Message` never outlives the `Connection` it references, since the
/// consumer drains its queue before closing any connection.
#[derive(Debug, Clone)]
pub struct Message {
    id: MessageId,
    body: Bytes,
    timestamp_ns: i64,
    attempts: u16,
    deadline: Instant,
    connection: Connection,
    processed: Arc<AtomicBool>,
}

impl Message {
    pub(crate) fn new(
        id: MessageId,
        body: Bytes,
        timestamp_ns: i64,
        attempts: u16,
        msg_timeout: Duration,
        connection: Connection,
    ) -> Self {
        Message {
            id,
            body,
            timestamp_ns,
            attempts,
            deadline: Instant::now() + msg_timeout,
            connection,
            processed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    /// Number of times nsqd has attempted to deliver this message, including
    /// this delivery.
    pub fn attempts(&self) -> u16 {
        self.attempts
    }

    /// Whether `finish`/`requeue`/`touch` can still legally be sent: the
    /// client-side deadline derived from `msg_timeout` has not yet passed.
    pub fn can_be_processed(&self) -> bool {
        Instant::now() < self.deadline
    }

    pub async fn finish(&self) -> NsqResult<()> {
        if self.processed.swap(true, Ordering::SeqCst) {
            tracing::warn!(id = %self.id, "finish called on an already-processed message, ignoring");
            return Ok(());
        }
        self.check_deadline()?;
        self.connection.fin(self.id).await
    }

    pub async fn requeue(&self, delay: Duration) -> NsqResult<()> {
        if self.processed.swap(true, Ordering::SeqCst) {
            tracing::warn!(id = %self.id, "requeue called on an already-processed message, ignoring");
            return Ok(());
        }
        self.check_deadline()?;
        self.connection.req(self.id, delay).await
    }

    pub async fn touch(&mut self, msg_timeout: Duration) -> NsqResult<()> {
        if self.processed.load(Ordering::SeqCst) {
            tracing::warn!(id = %self.id, "touch called on an already-processed message, ignoring");
            return Ok(());
        }
        self.check_deadline()?;
        self.connection.touch(self.id).await?;
        self.deadline = Instant::now() + msg_timeout;
        Ok(())
    }

    fn check_deadline(&self) -> NsqResult<()> {
        if self.can_be_processed() {
            Ok(())
        } else {
            Err(crate::error::NsqError::MessageExpired)
        }
    }
}
