//! Steering primitives: the bounded user-message queue and the
//! single-slot human-response rendezvous.
//!
//! Both are single-producer / single-consumer by contract — the HTTP
//! handler pushes, exactly one of the orchestrator session or a
//! specific agent pops.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use ami_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SteeringQueue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SteeringQueue {
    queue: Mutex<VecDeque<String>>,
    notify: Notify,
    bound: usize,
}

impl SteeringQueue {
    pub fn new(bound: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            bound,
        }
    }

    /// FIFO push; overflow is an error the HTTP layer maps to 4xx.
    pub fn push(&self, message: impl Into<String>) -> Result<()> {
        let mut queue = self.queue.lock();
        if queue.len() >= self.bound {
            return Err(Error::InvalidInput(format!(
                "steering queue full ({} messages)",
                self.bound
            )));
        }
        queue.push_back(message.into());
        drop(queue);
        self.notify.notify_waiters();
        Ok(())
    }

    pub fn try_pop(&self) -> Option<String> {
        self.queue.lock().pop_front()
    }

    /// Blocking pop with timeout; `None` on timeout.
    pub async fn pop(&self, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(msg) = self.try_pop() {
                return Some(msg);
            }
            let notified = self.notify.notified();
            if let Some(msg) = self.try_pop() {
                return Some(msg);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ResponseSlot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Single-element rendezvous for `ask_human` replies: at most one
/// pending response; a second write before consumption is rejected.
#[derive(Default)]
pub struct ResponseSlot {
    slot: Mutex<Option<String>>,
    notify: Notify,
}

impl ResponseSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide(&self, text: impl Into<String>) -> Result<()> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(Error::InvalidInput(
                "a human response is already pending".into(),
            ));
        }
        *slot = Some(text.into());
        drop(slot);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Wait for a response; `None` on timeout.
    pub async fn wait(&self, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(text) = self.slot.lock().take() {
                return Some(text);
            }
            let notified = self.notify.notified();
            if let Some(text) = self.slot.lock().take() {
                return Some(text);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn steering_is_fifo() {
        let q = SteeringQueue::new(4);
        q.push("one").unwrap();
        q.push("two").unwrap();
        assert_eq!(q.try_pop().as_deref(), Some("one"));
        assert_eq!(q.try_pop().as_deref(), Some("two"));
        assert_eq!(q.try_pop(), None);
    }

    #[tokio::test]
    async fn steering_overflow_fails() {
        let q = SteeringQueue::new(2);
        q.push("a").unwrap();
        q.push("b").unwrap();
        let err = q.push("c").unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");
        assert_eq!(q.len(), 2);
    }

    #[tokio::test]
    async fn blocking_pop_wakes_on_push() {
        let q = Arc::new(SteeringQueue::new(4));
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.pop(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.push("hello").unwrap();
        assert_eq!(waiter.await.unwrap().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn pop_times_out() {
        let q = SteeringQueue::new(4);
        assert!(q.pop(Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn response_slot_rendezvous() {
        let slot = Arc::new(ResponseSlot::new());
        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.wait(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        slot.provide("yes").unwrap();
        assert_eq!(waiter.await.unwrap().as_deref(), Some("yes"));
    }

    #[tokio::test]
    async fn response_slot_rejects_double_write() {
        let slot = ResponseSlot::new();
        slot.provide("first").unwrap();
        assert!(slot.provide("second").is_err());
        // Consuming frees the slot for the next question.
        assert_eq!(slot.wait(Duration::from_millis(10)).await.as_deref(), Some("first"));
        slot.provide("third").unwrap();
    }

    #[tokio::test]
    async fn response_slot_times_out() {
        let slot = ResponseSlot::new();
        assert!(slot.wait(Duration::from_millis(20)).await.is_none());
    }
}
