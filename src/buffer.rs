// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Bounded multi-producer/single-consumer message buffer.
//!
//! Producers are transport callbacks pushing from arbitrary threads; the
//! single consumer is the recorder's drain thread. The buffer applies
//! back-pressure instead of dropping: a push against a full queue blocks
//! up to [`PUSH_TIMEOUT`] and reports failure, it never discards silently.
//!
//! A per-topic index is maintained in lockstep with the main FIFO under
//! the same mutex, so `len() == Σ topic_len(t)` holds at every instant.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::warn;

use crate::config::BufferConfig;
use crate::core::Message;

/// Bounded wait for a producer when the queue is full.
pub const PUSH_TIMEOUT: Duration = Duration::from_millis(100);

/// Default bounded wait for a consumer when the queue is empty.
pub const POP_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Queues {
    fifo: VecDeque<Arc<Message>>,
    by_topic: HashMap<String, VecDeque<Arc<Message>>>,
}

impl Queues {
    /// Detach one message from both indices, preserving FIFO order.
    fn pop_front(&mut self) -> Option<Arc<Message>> {
        let message = self.fifo.pop_front()?;
        if let Some(queue) = self.by_topic.get_mut(&message.topic) {
            queue.pop_front();
            if queue.is_empty() {
                self.by_topic.remove(&message.topic);
            }
        }
        Some(message)
    }
}

/// Thread-safe bounded FIFO of captured messages with per-topic views.
pub struct MessageBuffer {
    queues: Mutex<Queues>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    running: AtomicBool,
    next_sequence: AtomicU64,
}

impl MessageBuffer {
    /// Create a buffer with the configured capacity, in the running state.
    pub fn new(config: &BufferConfig) -> Self {
        Self {
            queues: Mutex::new(Queues::default()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: config.buffer_size.max(1),
            running: AtomicBool::new(true),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Append a captured payload.
    ///
    /// Blocks up to [`PUSH_TIMEOUT`] when the queue is full. Returns
    /// `false` on timeout or when the buffer is stopped; the caller
    /// decides whether that is worth counting. On success the message
    /// gets the next session sequence number, assigned in push order.
    pub fn push(&self, topic: &str, payload: Vec<u8>, timestamp_us: i64) -> bool {
        if !self.running.load(Ordering::Acquire) {
            return false;
        }

        let mut queues = match self.queues.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };

        if queues.fifo.len() >= self.capacity {
            let (guard, timeout) = match self.not_full.wait_timeout_while(
                queues,
                PUSH_TIMEOUT,
                |q| q.fifo.len() >= self.capacity && self.running.load(Ordering::Acquire),
            ) {
                Ok(result) => result,
                Err(_) => return false,
            };
            queues = guard;

            if timeout.timed_out() && queues.fifo.len() >= self.capacity {
                warn!(topic, capacity = self.capacity, "buffer full, push timed out");
                return false;
            }
            if !self.running.load(Ordering::Acquire) {
                return false;
            }
        }

        let mut message = Message::new(topic, payload, timestamp_us);
        message.sequence = self.next_sequence.fetch_add(1, Ordering::AcqRel);
        let message = Arc::new(message);

        queues.fifo.push_back(Arc::clone(&message));
        queues
            .by_topic
            .entry(message.topic.clone())
            .or_default()
            .push_back(message);

        drop(queues);
        self.not_empty.notify_one();
        true
    }

    /// Remove up to `max` of the oldest messages across all topics.
    ///
    /// Waits up to `timeout` when the buffer is empty and still running.
    /// After [`stop`](Self::stop), remaining messages are still returned
    /// until the buffer is empty (the drain contract).
    pub fn pop_batch(&self, max: usize, timeout: Duration) -> Vec<Arc<Message>> {
        let mut queues = match self.queues.lock() {
            Ok(guard) => guard,
            Err(_) => return Vec::new(),
        };

        if queues.fifo.is_empty() && self.running.load(Ordering::Acquire) {
            queues = match self.not_empty.wait_timeout_while(queues, timeout, |q| {
                q.fifo.is_empty() && self.running.load(Ordering::Acquire)
            }) {
                Ok((guard, _)) => guard,
                Err(_) => return Vec::new(),
            };
        }

        let count = max.min(queues.fifo.len());
        let mut batch = Vec::with_capacity(count);
        for _ in 0..count {
            match queues.pop_front() {
                Some(message) => batch.push(message),
                None => break,
            }
        }

        drop(queues);
        for _ in 0..batch.len() {
            self.not_full.notify_one();
        }
        batch
    }

    /// Remove up to `max` of the oldest messages of one topic.
    ///
    /// Not used on the recorder's hot path; provided for consumers that
    /// drain topics selectively. Removal from the main FIFO is by
    /// pointer identity.
    pub fn pop_batch_topic(&self, topic: &str, max: usize, timeout: Duration) -> Vec<Arc<Message>> {
        let mut queues = match self.queues.lock() {
            Ok(guard) => guard,
            Err(_) => return Vec::new(),
        };

        if !queues.by_topic.contains_key(topic) && self.running.load(Ordering::Acquire) {
            queues = match self.not_empty.wait_timeout_while(queues, timeout, |q| {
                !q.by_topic.contains_key(topic) && self.running.load(Ordering::Acquire)
            }) {
                Ok((guard, _)) => guard,
                Err(_) => return Vec::new(),
            };
        }

        let mut batch = Vec::new();
        if let Some(mut queue) = queues.by_topic.remove(topic) {
            let count = max.min(queue.len());
            for _ in 0..count {
                let message = match queue.pop_front() {
                    Some(m) => m,
                    None => break,
                };
                queues
                    .fifo
                    .retain(|candidate| !Arc::ptr_eq(candidate, &message));
                batch.push(message);
            }
            if !queue.is_empty() {
                queues.by_topic.insert(topic.to_string(), queue);
            }
        }

        drop(queues);
        for _ in 0..batch.len() {
            self.not_full.notify_one();
        }
        batch
    }

    /// Total queued messages.
    pub fn len(&self) -> usize {
        self.queues.lock().map(|q| q.fifo.len()).unwrap_or(0)
    }

    /// Check whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued messages for one topic.
    pub fn topic_len(&self, topic: &str) -> usize {
        self.queues
            .lock()
            .map(|q| q.by_topic.get(topic).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }

    /// Discard all queued messages and restart the session sequence at 0.
    pub fn clear(&self) {
        if let Ok(mut queues) = self.queues.lock() {
            queues.fifo.clear();
            queues.by_topic.clear();
        }
        self.next_sequence.store(0, Ordering::Release);
        self.not_full.notify_all();
    }

    /// Accept pushes again after a stop.
    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Refuse new pushes and release all waiters. Queued messages stay
    /// available to `pop_batch` until drained.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Check whether pushes are being accepted.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
