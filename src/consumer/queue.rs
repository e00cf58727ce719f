// ABOUTME: A FIFO queue that can be closed, unblocking any pending pop with `None`
// ABOUTME: Grounded on ansq's CloseableQueue: non-blocking push, blocking pop, explicit close

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

/// A queue shared by every connection feeding one `Consumer`.
///
/// `push` never blocks. `pop` waits for an item or for the queue to be
/// closed, returning `None` in the latter case rather than a sentinel value
/// mixed into the item stream.
pub struct CloseableQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
    closed: AtomicBool,
}

impl<T> Default for CloseableQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CloseableQueue<T> {
    pub fn new() -> Self {
        CloseableQueue {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn push(&self, item: T) {
        self.items.lock().unwrap().push_back(item);
        self.notify.notify_one();
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Pop the next item, waiting if necessary. Returns `None` once the
    /// queue is closed and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            if let Some(item) = self.items.lock().unwrap().pop_front() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn pop_returns_pushed_items_in_order() {
        let queue: CloseableQueue<u32> = CloseableQueue::new();
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, Some(2));
    }

    #[tokio::test]
    async fn pop_blocks_until_pushed() {
        let queue = Arc::new(CloseableQueue::<u32>::new());
        let reader = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(42);
        assert_eq!(reader.await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn close_unblocks_pending_pop_with_none() {
        let queue = Arc::new(CloseableQueue::<u32>::new());
        let reader = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        assert_eq!(reader.await.unwrap(), None);
    }

    #[tokio::test]
    async fn drains_remaining_items_before_reporting_closed() {
        let queue: CloseableQueue<u32> = CloseableQueue::new();
        queue.push(1);
        queue.close();
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, None);
    }
}
