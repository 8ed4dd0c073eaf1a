//! Secondary dispatch hint. Out of scope per `spec.md` Non-goals is the
//! Redis-backed queue itself; what ships here is the trait boundary plus an
//! in-process reference implementation, so `RunSupervisor` callers have
//! something to drive dispatch ordering with in tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::Mutex;

#[async_trait]
pub trait QueueHint: Send + Sync {
    async fn enqueue(&self, ticket_id: &str, payload: Value);
    async fn dequeue(&self) -> Option<(String, Value)>;
    async fn dead_letter(&self, ticket_id: &str, payload: Value, reason: &str);
    async fn pending_count(&self) -> usize;
}

#[derive(Default)]
pub struct InMemoryQueue {
    pending: Mutex<VecDeque<(String, Value)>>,
    dead_letters: Mutex<Vec<(String, Value, String)>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn dead_letter_count(&self) -> usize {
        self.dead_letters.lock().await.len()
    }
}

#[async_trait]
impl QueueHint for InMemoryQueue {
    async fn enqueue(&self, ticket_id: &str, payload: Value) {
        self.pending.lock().await.push_back((ticket_id.to_string(), payload));
    }

    async fn dequeue(&self) -> Option<(String, Value)> {
        self.pending.lock().await.pop_front()
    }

    async fn dead_letter(&self, ticket_id: &str, payload: Value, reason: &str) {
        self.dead_letters
            .lock()
            .await
            .push((ticket_id.to_string(), payload, reason.to_string()));
    }

    async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn fifo_ordering() {
        let queue = InMemoryQueue::new();
        queue.enqueue("t1", json!({})).await;
        queue.enqueue("t2", json!({})).await;
        assert_eq!(queue.dequeue().await.unwrap().0, "t1");
        assert_eq!(queue.dequeue().await.unwrap().0, "t2");
        assert!(queue.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn dead_letter_is_tracked_separately() {
        let queue = InMemoryQueue::new();
        queue.dead_letter("t1", json!({}), "poison pill").await;
        assert_eq!(queue.dead_letter_count().await, 1);
        assert_eq!(queue.pending_count().await, 0);
    }
}
