// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Recording session: subscribe, buffer, drain, stop.
//!
//! Subscription callbacks fan into the bounded buffer from transport
//! threads; one drain thread batches the buffer into storage. Teardown
//! order matters and is fixed: cancel subscribers (no new inflow), join
//! the drain thread (which empties the buffer first), stop the buffer,
//! close the file.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::buffer::{MessageBuffer, POP_TIMEOUT};
use crate::config::BagConfig;
use crate::core::{now_us, BagError, FileInfo, Result};
use crate::storage::Storage;
use crate::transport::{MessageCallback, Subscriber, TransportFactory};

/// Idle sleep of the drain thread when a wait returned nothing.
const DRAIN_IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Recording session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecorderState {
    /// Not recording; terminal until the next start
    Stopped = 0,
    /// Capturing and draining
    Running = 1,
    /// Inbound messages discarded; draining continues
    Paused = 2,
}

impl RecorderState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RecorderState::Running,
            2 => RecorderState::Paused,
            _ => RecorderState::Stopped,
        }
    }
}

/// Topic recording session driven by a transport factory.
pub struct Recorder {
    config: BagConfig,
    factory: Arc<dyn TransportFactory>,
    storage: Arc<Storage>,
    buffer: Arc<MessageBuffer>,

    state: Arc<AtomicU8>,
    running: Arc<AtomicBool>,
    total_messages: Arc<AtomicU64>,
    push_failures: Arc<AtomicU64>,
    write_failures: Arc<AtomicU64>,

    subscribers: Mutex<HashMap<String, Box<dyn Subscriber>>>,
    drain_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Recorder {
    /// Create a recorder. The factory must outlive the session.
    pub fn new(config: BagConfig, factory: Arc<dyn TransportFactory>) -> Self {
        let storage = Arc::new(Storage::new(config.storage.clone()));
        let buffer = Arc::new(MessageBuffer::new(&config.buffer));
        Self {
            config,
            factory,
            storage,
            buffer,
            state: Arc::new(AtomicU8::new(RecorderState::Stopped as u8)),
            running: Arc::new(AtomicBool::new(false)),
            total_messages: Arc::new(AtomicU64::new(0)),
            push_failures: Arc::new(AtomicU64::new(0)),
            write_failures: Arc::new(AtomicU64::new(0)),
            subscribers: Mutex::new(HashMap::new()),
            drain_thread: Mutex::new(None),
        }
    }

    /// Start recording.
    ///
    /// Opens the output file, registers every configured topic, creates
    /// subscribers, and launches the drain thread. On any setup failure
    /// everything already set up is torn down again and the error is
    /// returned.
    pub fn start(&self) -> Result<()> {
        if self.state() == RecorderState::Running {
            return Ok(());
        }
        if self.config.recorder.topics.is_empty() {
            return Err(BagError::config("no topics configured"));
        }

        let file_info = FileInfo {
            prefix: self.config.recorder.filename_prefix.clone(),
            extension: self.config.recorder.output_format.clone(),
            output_dir: self.config.recorder.output_path.clone(),
            ..FileInfo::default()
        };
        self.storage.open(file_info)?;

        self.buffer.clear();
        self.buffer.start();
        self.total_messages.store(0, Ordering::Release);
        self.push_failures.store(0, Ordering::Release);
        self.write_failures.store(0, Ordering::Release);
        self.state
            .store(RecorderState::Running as u8, Ordering::Release);

        for spec in &self.config.recorder.topics {
            let mut topic = spec.to_topic_config();
            if let Err(error) = self.storage.register_topic(&mut topic) {
                error!(topic = %spec.name, %error, "topic registration failed");
                self.teardown();
                return Err(error);
            }

            let callback = self.capture_callback(spec.name.clone());
            match self.factory.create_subscriber(&spec.name, callback) {
                Ok(subscriber) => {
                    if let Ok(mut subscribers) = self.subscribers.lock() {
                        subscribers.insert(spec.name.clone(), subscriber);
                    }
                }
                Err(error) => {
                    error!(topic = %spec.name, %error, "subscriber creation failed");
                    self.teardown();
                    return Err(error);
                }
            }
        }

        self.running.store(true, Ordering::Release);
        match self.spawn_drain_thread() {
            Ok(handle) => {
                if let Ok(mut drain) = self.drain_thread.lock() {
                    *drain = Some(handle);
                }
            }
            Err(error) => {
                error!(%error, "failed to spawn drain thread");
                self.teardown();
                return Err(BagError::config(format!("drain thread: {error}")));
            }
        }

        info!(
            topics = self.config.recorder.topics.len(),
            "recording started"
        );
        Ok(())
    }

    /// The callback handed to the transport for one topic.
    fn capture_callback(&self, topic: String) -> MessageCallback {
        let state = Arc::clone(&self.state);
        let buffer = Arc::clone(&self.buffer);
        let total = Arc::clone(&self.total_messages);
        let failures = Arc::clone(&self.push_failures);

        Arc::new(move |payload: &[u8]| {
            if state.load(Ordering::Acquire) != RecorderState::Running as u8 {
                return;
            }
            if buffer.push(&topic, payload.to_vec(), now_us()) {
                total.fetch_add(1, Ordering::Relaxed);
            } else {
                failures.fetch_add(1, Ordering::Relaxed);
            }
        })
    }

    fn spawn_drain_thread(&self) -> std::io::Result<JoinHandle<()>> {
        let storage = Arc::clone(&self.storage);
        let buffer = Arc::clone(&self.buffer);
        let running = Arc::clone(&self.running);
        let state = Arc::clone(&self.state);
        let write_failures = Arc::clone(&self.write_failures);
        let batch_size = self.config.storage.write_batch_size.max(1);

        std::thread::Builder::new()
            .name("bagpipe-drain".to_string())
            .spawn(move || {
                debug!("drain thread started");
                while running.load(Ordering::Acquire) || !buffer.is_empty() {
                    // On shutdown grab everything that is left at once.
                    let max = if running.load(Ordering::Acquire) {
                        batch_size
                    } else {
                        buffer.len().max(1)
                    };

                    let batch = buffer.pop_batch(max, POP_TIMEOUT);
                    if batch.is_empty() {
                        if running.load(Ordering::Acquire) {
                            std::thread::sleep(DRAIN_IDLE_SLEEP);
                        }
                        continue;
                    }

                    match storage.write_batch(&batch) {
                        Ok(()) => {}
                        Err(error) if error.is_fatal() => {
                            error!(%error, "rotation failed, stopping session");
                            running.store(false, Ordering::Release);
                            state.store(RecorderState::Stopped as u8, Ordering::Release);
                            storage.close();
                            return;
                        }
                        Err(error) => {
                            warn!(%error, batch = batch.len(), "batch write incomplete");
                            write_failures.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                debug!("drain thread finished");
            })
    }

    /// Stop recording: cancel subscribers, flush the buffer through the
    /// drain thread, close the file. A second call is a no-op.
    pub fn stop(&self) {
        let previous = self
            .state
            .swap(RecorderState::Stopped as u8, Ordering::AcqRel);
        if RecorderState::from_u8(previous) != RecorderState::Stopped {
            info!(
                remaining = self.buffer.len(),
                total = self.total_messages.load(Ordering::Acquire),
                "stopping recorder"
            );
        }
        self.teardown();
    }

    fn teardown(&self) {
        self.state
            .store(RecorderState::Stopped as u8, Ordering::Release);

        // 1. No new inflow.
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.clear();
        }

        // 2. Let the drain thread flush the buffer and exit.
        self.running.store(false, Ordering::Release);
        let handle = self.drain_thread.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("drain thread panicked");
            }
        }

        // 3. Now nothing produces or consumes.
        self.buffer.stop();
        self.storage.close();
    }

    /// Discard inbound messages until resumed; draining continues.
    pub fn pause(&self) {
        let _ = self.state.compare_exchange(
            RecorderState::Running as u8,
            RecorderState::Paused as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Resume capturing after a pause.
    pub fn resume(&self) {
        let _ = self.state.compare_exchange(
            RecorderState::Paused as u8,
            RecorderState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Current session state.
    pub fn state(&self) -> RecorderState {
        RecorderState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Successful buffer pushes this session.
    pub fn total_messages(&self) -> u64 {
        self.total_messages.load(Ordering::Acquire)
    }

    /// Pushes that timed out or hit a stopped buffer.
    pub fn push_failures(&self) -> u64 {
        self.push_failures.load(Ordering::Acquire)
    }

    /// Drain batches that completed with dropped messages.
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Acquire)
    }

    /// Estimated size of the current output file.
    pub fn file_size(&self) -> u64 {
        self.storage.file_size()
    }

    /// Topics with live subscriptions.
    pub fn topics(&self) -> Vec<String> {
        self.subscribers
            .lock()
            .map(|subscribers| subscribers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Path of the file currently being written.
    pub fn current_path(&self) -> Option<String> {
        self.storage.current_path()
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}
