// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Playback session: read, pace, publish.
//!
//! One play thread owns the reader and the publishers. Pacing is
//! relative: each record sleeps the gap to its predecessor divided by
//! the playback rate, so drift never accumulates between records. A
//! pause blocks the thread on a condvar and shifts the session origin
//! forward by the pause duration, keeping post-resume gaps intact.
//! Loop playback is an outer loop over the reader's restartable stream.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::PlayerConfig;
use crate::core::{BagError, Result, DEFAULT_ENCODING};
use crate::reader::BagReader;
use crate::transport::{Publisher, TransportFactory};

/// Wait slice while paused; resume and stop both interrupt it sooner
/// via the condvar.
const PAUSE_POLL: Duration = Duration::from_millis(50);

/// Playback session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlayerState {
    /// Not playing; terminal until the next start
    Stopped = 0,
    /// Emitting records
    Playing = 1,
    /// Suspended; resumes where it left off
    Paused = 2,
}

impl PlayerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PlayerState::Playing,
            2 => PlayerState::Paused,
            _ => PlayerState::Stopped,
        }
    }
}

/// Bag playback session driven by a transport factory.
pub struct Player {
    config: PlayerConfig,
    factory: Arc<dyn TransportFactory>,

    state: Arc<AtomicU8>,
    running: Arc<AtomicBool>,
    played: Arc<AtomicU64>,
    publish_failures: Arc<AtomicU64>,
    /// Playback rate as f64 bits, adjustable mid-session
    rate_bits: Arc<AtomicU64>,
    pause_gate: Arc<(Mutex<()>, Condvar)>,

    topics: Mutex<Vec<String>>,
    play_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Player {
    /// Create a player. The factory must outlive the session.
    pub fn new(config: PlayerConfig, factory: Arc<dyn TransportFactory>) -> Self {
        let rate = sanitize_rate(config.playback_rate);
        Self {
            config,
            factory,
            state: Arc::new(AtomicU8::new(PlayerState::Stopped as u8)),
            running: Arc::new(AtomicBool::new(false)),
            played: Arc::new(AtomicU64::new(0)),
            publish_failures: Arc::new(AtomicU64::new(0)),
            rate_bits: Arc::new(AtomicU64::new(rate.to_bits())),
            pause_gate: Arc::new((Mutex::new(()), Condvar::new())),
            topics: Mutex::new(Vec::new()),
            play_thread: Mutex::new(None),
        }
    }

    /// Start playback: open the input bag, create one publisher per
    /// stored topic, and launch the play thread.
    pub fn start(&self) -> Result<()> {
        if self.state() == PlayerState::Playing {
            return Ok(());
        }
        if self.config.input_path.is_empty() {
            return Err(BagError::config("no input file configured"));
        }

        let reader = BagReader::open(&self.config.input_path)?;
        let topics = reader.topics();
        if topics.is_empty() {
            return Err(BagError::reader_open(
                &self.config.input_path,
                "bag contains no topics",
            ));
        }

        let mut publishers = std::collections::HashMap::new();
        for topic in &topics {
            let publisher = self.factory.create_publisher(topic)?;
            publishers.insert(topic.clone(), publisher);
        }
        if let Ok(mut stored) = self.topics.lock() {
            *stored = topics.clone();
        }

        self.played.store(0, Ordering::Release);
        self.publish_failures.store(0, Ordering::Release);
        self.state
            .store(PlayerState::Playing as u8, Ordering::Release);
        self.running.store(true, Ordering::Release);

        let handle = self.spawn_play_thread(reader, publishers);
        match handle {
            Ok(handle) => {
                if let Ok(mut thread) = self.play_thread.lock() {
                    *thread = Some(handle);
                }
                info!(
                    path = %self.config.input_path,
                    topics = topics.len(),
                    rate = self.playback_rate(),
                    "playback started"
                );
                Ok(())
            }
            Err(error) => {
                self.state
                    .store(PlayerState::Stopped as u8, Ordering::Release);
                self.running.store(false, Ordering::Release);
                Err(BagError::config(format!("play thread: {error}")))
            }
        }
    }

    fn spawn_play_thread(
        &self,
        reader: BagReader,
        publishers: std::collections::HashMap<String, Box<dyn Publisher>>,
    ) -> std::io::Result<JoinHandle<()>> {
        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);
        let played = Arc::clone(&self.played);
        let publish_failures = Arc::clone(&self.publish_failures);
        let rate_bits = Arc::clone(&self.rate_bits);
        let pause_gate = Arc::clone(&self.pause_gate);
        let loop_playback = self.config.loop_playback;

        std::thread::Builder::new()
            .name("bagpipe-play".to_string())
            .spawn(move || {
                play_loop(
                    reader,
                    publishers,
                    loop_playback,
                    &state,
                    &running,
                    &played,
                    &publish_failures,
                    &rate_bits,
                    &pause_gate,
                );
            })
    }

    /// Stop playback and join the play thread. A second call is a no-op.
    pub fn stop(&self) {
        self.state
            .store(PlayerState::Stopped as u8, Ordering::Release);
        self.running.store(false, Ordering::Release);
        self.pause_gate.1.notify_all();

        let handle = self.play_thread.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("play thread panicked");
            }
        }
        if let Ok(mut topics) = self.topics.lock() {
            topics.clear();
        }
    }

    /// Suspend emission; the play thread parks on the pause gate.
    pub fn pause(&self) {
        let _ = self.state.compare_exchange(
            PlayerState::Playing as u8,
            PlayerState::Paused as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Resume emission after a pause.
    pub fn resume(&self) {
        let changed = self.state.compare_exchange(
            PlayerState::Paused as u8,
            PlayerState::Playing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if changed.is_ok() {
            self.pause_gate.1.notify_all();
        }
    }

    /// Current session state.
    pub fn state(&self) -> PlayerState {
        PlayerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Records published this session.
    pub fn played_messages(&self) -> u64 {
        self.played.load(Ordering::Acquire)
    }

    /// Publishes the transport rejected.
    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Acquire)
    }

    /// Topics being replayed.
    pub fn topics(&self) -> Vec<String> {
        self.topics
            .lock()
            .map(|topics| topics.clone())
            .unwrap_or_default()
    }

    /// Adjust the playback rate; non-positive values fall back to 1.0.
    pub fn set_playback_rate(&self, rate: f64) {
        self.rate_bits
            .store(sanitize_rate(rate).to_bits(), Ordering::Release);
    }

    /// Current playback rate.
    pub fn playback_rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Acquire))
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sanitize_rate(rate: f64) -> f64 {
    if rate.is_finite() && rate > 0.0 {
        rate
    } else {
        1.0
    }
}

#[allow(clippy::too_many_arguments)]
fn play_loop(
    reader: BagReader,
    publishers: std::collections::HashMap<String, Box<dyn Publisher>>,
    loop_playback: bool,
    state: &AtomicU8,
    running: &AtomicBool,
    played: &AtomicU64,
    publish_failures: &AtomicU64,
    rate_bits: &AtomicU64,
    pause_gate: &(Mutex<()>, Condvar),
) {
    let channels = reader.channels();
    // Origin of active playback; shifted forward across pauses so its
    // elapsed time measures playing time only.
    let mut play_origin = Instant::now();

    'session: loop {
        let stream = match reader.messages() {
            Ok(stream) => stream,
            Err(error) => {
                error!(%error, "failed to open message stream");
                break 'session;
            }
        };

        let mut last_timestamp: Option<u64> = None;
        for item in stream {
            if !running.load(Ordering::Acquire) {
                break 'session;
            }

            if PlayerState::from_u8(state.load(Ordering::Acquire)) == PlayerState::Paused {
                let pause_start = Instant::now();
                let (lock, condvar) = pause_gate;
                if let Ok(mut guard) = lock.lock() {
                    while PlayerState::from_u8(state.load(Ordering::Acquire))
                        == PlayerState::Paused
                        && running.load(Ordering::Acquire)
                    {
                        guard = match condvar.wait_timeout(guard, PAUSE_POLL) {
                            Ok((guard, _)) => guard,
                            Err(_) => break,
                        };
                    }
                }
                if !running.load(Ordering::Acquire) {
                    break 'session;
                }
                play_origin += pause_start.elapsed();
            }

            let record = match item {
                Ok(record) => record,
                Err(error) => {
                    // A damaged record ends the session.
                    error!(%error, "message stream failed");
                    break 'session;
                }
            };

            let Some(channel) = channels.get(&record.channel_id) else {
                continue;
            };
            if channel.encoding != DEFAULT_ENCODING {
                continue;
            }

            if let Some(last) = last_timestamp {
                let delta_ns = record.log_time_ns.saturating_sub(last);
                if delta_ns > 0 {
                    let rate = f64::from_bits(rate_bits.load(Ordering::Acquire));
                    let delay_ms = (delta_ns as f64 / 1e6 / rate) as u64;
                    if delay_ms > 0 {
                        std::thread::sleep(Duration::from_millis(delay_ms));
                    }
                }
            }
            last_timestamp = Some(record.log_time_ns);

            match publishers.get(&channel.topic) {
                Some(publisher) => {
                    if publisher.publish(&record.data) {
                        played.fetch_add(1, Ordering::Relaxed);
                    } else {
                        warn!(topic = %channel.topic, "publish rejected");
                        publish_failures.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => continue,
            }
        }

        if !(running.load(Ordering::Acquire) && loop_playback) {
            break 'session;
        }
        debug!("end of bag, rewinding");
    }

    info!(
        played = played.load(Ordering::Acquire),
        active_ms = play_origin.elapsed().as_millis() as u64,
        "playback finished"
    );
    state.store(PlayerState::Stopped as u8, Ordering::Release);
    running.store(false, Ordering::Release);
}
