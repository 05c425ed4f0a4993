//! Per-task event emitter: an ordered, bounded FIFO with a terminal
//! latch.
//!
//! Producers never block — overflow drops the oldest event with a
//! warning (the SSE consumer reads at wire speed; spikes come from
//! rapid tool chains). A task-level terminal event latches the emitter
//! closed; later emits are dropped with a debug log.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use ami_domain::event::{EventAction, EventSink, TaskEvent};

pub struct EventEmitter {
    queue: Mutex<VecDeque<TaskEvent>>,
    notify: Notify,
    closed: AtomicBool,
    bound: usize,
}

impl EventEmitter {
    pub fn new(bound: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            bound,
        }
    }

    /// Non-blocking append. Dropped (with a debug log) once closed.
    pub fn emit(&self, event: TaskEvent) {
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!(task_id = %event.task_id, action = event.action.name(),
                            "emitter closed, dropping event");
            return;
        }

        let closes = event.closes_stream();
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.bound {
                let dropped = queue.pop_front();
                tracing::warn!(
                    task_id = %event.task_id,
                    dropped = dropped.map(|e| e.action.name()),
                    "event queue full, dropping oldest"
                );
            }
            queue.push_back(event);
        }
        if closes {
            self.closed.store(true, Ordering::Release);
        }
        self.notify.notify_waiters();
    }

    /// Next event, or `None` on timeout (the caller interleaves
    /// heartbeats) and when the emitter is closed and drained.
    pub async fn get_event(&self, timeout: Duration) -> Option<TaskEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(event) = self.queue.lock().pop_front() {
                return Some(event);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            let notified = self.notify.notified();
            // Re-check: an emit may have landed between the pop and the
            // notified() registration.
            if let Some(event) = self.queue.lock().pop_front() {
                return Some(event);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Convenience for the fattest event shape.
    pub fn emit_screenshot(
        &self,
        task_id: &str,
        data_uri: String,
        url: String,
        title: String,
        tab_id: Option<String>,
        webview_id: Option<String>,
    ) {
        self.emit(TaskEvent::new(
            task_id,
            EventAction::Screenshot {
                data_uri,
                url,
                title,
                tab_id,
                webview_id,
            },
        ));
    }

    /// Idempotent close. When no terminal event was ever emitted (GC of
    /// an abandoned task), a synthetic one wakes blocked consumers.
    pub fn close(&self, task_id: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.lock().push_back(TaskEvent::new(
            task_id,
            EventAction::End {
                status: "closed".into(),
                message: None,
            },
        ));
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

impl EventSink for EventEmitter {
    fn emit(&self, event: TaskEvent) {
        EventEmitter::emit(self, event);
    }
}
