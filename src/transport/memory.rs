// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! In-process loopback transport.
//!
//! Publishers enqueue payloads onto an unbounded channel; a single
//! dispatcher thread fans each payload out to the subscribers of its
//! topic, so subscription callbacks run on a transport-owned thread
//! exactly like they would with a real middleware. Used by the
//! integration tests and the CLI loopback command.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use tracing::debug;

use crate::core::{BagError, Result};
use crate::transport::{MessageCallback, Publisher, Subscriber, TransportFactory};

enum Dispatch {
    Deliver { topic: String, payload: Vec<u8> },
    Shutdown,
}

struct Registration {
    id: u64,
    callback: MessageCallback,
}

#[derive(Default)]
struct Bus {
    subscribers: Mutex<HashMap<String, Vec<Registration>>>,
    next_id: AtomicU64,
}

impl Bus {
    fn subscribe(&self, topic: &str, callback: MessageCallback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers
                .entry(topic.to_string())
                .or_default()
                .push(Registration { id, callback });
        }
        id
    }

    fn unsubscribe(&self, topic: &str, id: u64) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            if let Some(entries) = subscribers.get_mut(topic) {
                entries.retain(|entry| entry.id != id);
                if entries.is_empty() {
                    subscribers.remove(topic);
                }
            }
        }
    }

    /// Snapshot the callbacks for a topic so delivery happens without
    /// holding the registry lock.
    fn callbacks_for(&self, topic: &str) -> Vec<MessageCallback> {
        self.subscribers
            .lock()
            .map(|subscribers| {
                subscribers
                    .get(topic)
                    .map(|entries| {
                        entries
                            .iter()
                            .map(|entry| Arc::clone(&entry.callback))
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

/// Loopback transport connecting publishers and subscribers inside one
/// process.
pub struct MemoryTransport {
    bus: Arc<Bus>,
    sender: Sender<Dispatch>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryTransport {
    /// Create the transport and start its dispatcher thread.
    pub fn new() -> Self {
        let bus = Arc::new(Bus::default());
        let (sender, receiver) = unbounded::<Dispatch>();

        let dispatcher_bus = Arc::clone(&bus);
        let dispatcher = std::thread::spawn(move || {
            while let Ok(dispatch) = receiver.recv() {
                match dispatch {
                    Dispatch::Deliver { topic, payload } => {
                        for callback in dispatcher_bus.callbacks_for(&topic) {
                            callback(&payload);
                        }
                    }
                    Dispatch::Shutdown => break,
                }
            }
            debug!("memory transport dispatcher stopped");
        });

        Self {
            bus,
            sender,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        let _ = self.sender.send(Dispatch::Shutdown);
        if let Ok(mut dispatcher) = self.dispatcher.lock() {
            if let Some(handle) = dispatcher.take() {
                let _ = handle.join();
            }
        }
    }
}

impl TransportFactory for MemoryTransport {
    fn create_subscriber(
        &self,
        topic: &str,
        callback: MessageCallback,
    ) -> Result<Box<dyn Subscriber>> {
        let id = self.bus.subscribe(topic, callback);
        Ok(Box::new(MemorySubscriber {
            topic: topic.to_string(),
            id,
            bus: Arc::clone(&self.bus),
        }))
    }

    fn create_publisher(&self, topic: &str) -> Result<Box<dyn Publisher>> {
        if topic.is_empty() {
            return Err(BagError::transport(topic, "empty topic name"));
        }
        Ok(Box::new(MemoryPublisher {
            topic: topic.to_string(),
            sender: self.sender.clone(),
        }))
    }
}

struct MemorySubscriber {
    topic: String,
    id: u64,
    bus: Arc<Bus>,
}

impl Subscriber for MemorySubscriber {
    fn topic_name(&self) -> &str {
        &self.topic
    }
}

impl Drop for MemorySubscriber {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.topic, self.id);
    }
}

struct MemoryPublisher {
    topic: String,
    sender: Sender<Dispatch>,
}

impl Publisher for MemoryPublisher {
    fn topic_name(&self) -> &str {
        &self.topic
    }

    fn publish(&self, payload: &[u8]) -> bool {
        self.sender
            .send(Dispatch::Deliver {
                topic: self.topic.clone(),
                payload: payload.to_vec(),
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn wait_for<F: Fn() -> bool>(predicate: F) {
        for _ in 0..100 {
            if predicate() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_publish_reaches_subscriber() {
        let transport = MemoryTransport::new();
        let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&received);
        let _subscriber = transport
            .create_subscriber(
                "/chatter",
                Arc::new(move |payload| sink.lock().unwrap().push(payload.to_vec())),
            )
            .unwrap();

        let publisher = transport.create_publisher("/chatter").unwrap();
        assert!(publisher.publish(b"hello"));

        wait_for(|| !received.lock().unwrap().is_empty());
        assert_eq!(received.lock().unwrap().as_slice(), &[b"hello".to_vec()]);
    }

    #[test]
    fn test_topics_are_isolated() {
        let transport = MemoryTransport::new();
        let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&received);
        let _subscriber = transport
            .create_subscriber(
                "/a",
                Arc::new(move |payload| sink.lock().unwrap().push(payload.to_vec())),
            )
            .unwrap();

        let publisher = transport.create_publisher("/b").unwrap();
        assert!(publisher.publish(b"elsewhere"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(received.lock().unwrap().is_empty());
    }

    #[test]
    fn test_drop_cancels_subscription() {
        let transport = MemoryTransport::new();
        let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&received);
        let subscriber = transport
            .create_subscriber(
                "/t",
                Arc::new(move |payload| sink.lock().unwrap().push(payload.to_vec())),
            )
            .unwrap();
        assert_eq!(subscriber.topic_name(), "/t");
        drop(subscriber);

        let publisher = transport.create_publisher("/t").unwrap();
        assert!(publisher.publish(b"late"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(received.lock().unwrap().is_empty());
    }

    #[test]
    fn test_empty_topic_rejected() {
        let transport = MemoryTransport::new();
        assert!(transport.create_publisher("").is_err());
    }
}
