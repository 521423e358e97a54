// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Buffer concurrency tests.
//!
//! Covers:
//! - Back-pressure: a full buffer blocks producers instead of dropping
//! - The drain contract after stop
//! - Sequence continuity under concurrent producers
//! - Serialization through a capacity-1 buffer

use std::sync::Arc;
use std::time::{Duration, Instant};

use bagpipe::buffer::PUSH_TIMEOUT;
use bagpipe::config::BufferConfig;
use bagpipe::MessageBuffer;

fn buffer(capacity: usize) -> Arc<MessageBuffer> {
    Arc::new(MessageBuffer::new(&BufferConfig {
        buffer_size: capacity,
    }))
}

// ============================================================================
// Back-pressure
// ============================================================================

#[test]
fn test_backpressure_law() {
    // While the buffer is full, every push either blocks for at least
    // the push timeout or observes free space before succeeding.
    let buf = buffer(4);
    for i in 0..4 {
        assert!(buf.push("/t", vec![i], i as i64));
    }

    // Slow consumer: drain one message after 40 ms.
    let consumer = {
        let buf = Arc::clone(&buf);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(40));
            buf.pop_batch(1, Duration::ZERO)
        })
    };

    // This push starts against a full buffer; space frees mid-wait.
    let start = Instant::now();
    let accepted = buf.push("/t", vec![9], 9);
    let elapsed = start.elapsed();

    assert!(accepted, "push should succeed once space frees");
    assert!(
        elapsed < PUSH_TIMEOUT,
        "push should return as soon as space is observed"
    );
    assert_eq!(consumer.join().unwrap().len(), 1);

    // Now nobody consumes: the push must block the full timeout and fail.
    let start = Instant::now();
    assert!(!buf.push("/t", vec![10], 10));
    assert!(start.elapsed() >= PUSH_TIMEOUT - Duration::from_millis(5));
}

#[test]
fn test_no_silent_drops_under_pressure() {
    // 10 messages through a buffer of 4 with a slow consumer: every
    // accepted message must come out exactly once, in order.
    let buf = buffer(4);

    let consumer = {
        let buf = Arc::clone(&buf);
        std::thread::spawn(move || {
            let mut collected = Vec::new();
            loop {
                let batch = buf.pop_batch(2, Duration::from_millis(50));
                if batch.is_empty() && !buf.is_running() {
                    break;
                }
                for message in batch {
                    collected.push(message.payload[0]);
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            collected
        })
    };

    let mut accepted = Vec::new();
    for i in 0u8..10 {
        if buf.push("/t", vec![i], i as i64) {
            accepted.push(i);
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    // Let the consumer finish the backlog, then stop.
    while !buf.is_empty() {
        std::thread::sleep(Duration::from_millis(10));
    }
    buf.stop();

    let collected = consumer.join().unwrap();
    assert_eq!(collected, accepted, "accepted messages must all be drained in order");
}

// ============================================================================
// Drain contract
// ============================================================================

#[test]
fn test_stop_then_drain_to_empty() {
    let buf = buffer(16);
    for i in 0u8..9 {
        assert!(buf.push("/t", vec![i], i as i64));
    }
    buf.stop();

    assert!(!buf.push("/t", vec![99], 99), "stopped buffer rejects pushes");

    let mut drained = Vec::new();
    loop {
        let batch = buf.pop_batch(4, Duration::from_millis(10));
        if batch.is_empty() {
            break;
        }
        drained.extend(batch);
    }
    assert_eq!(drained.len(), 9);
    let sequences: Vec<u64> = drained.iter().map(|m| m.sequence).collect();
    assert_eq!(sequences, (0..9).collect::<Vec<u64>>());
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_producers_get_unique_contiguous_sequences() {
    let buf = buffer(1024);
    let mut producers = Vec::new();
    for t in 0..4 {
        let buf = Arc::clone(&buf);
        producers.push(std::thread::spawn(move || {
            let topic = format!("/t{t}");
            for i in 0..50u8 {
                assert!(buf.push(&topic, vec![i], i as i64));
            }
        }));
    }
    for producer in producers {
        producer.join().unwrap();
    }

    let batch = buf.pop_batch(1024, Duration::ZERO);
    assert_eq!(batch.len(), 200);

    let mut sequences: Vec<u64> = batch.iter().map(|m| m.sequence).collect();
    sequences.sort_unstable();
    assert_eq!(sequences, (0..200).collect::<Vec<u64>>());

    // Per-topic relative order equals push order.
    for t in 0..4 {
        let topic = format!("/t{t}");
        let payloads: Vec<u8> = batch
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload[0])
            .collect();
        assert_eq!(payloads, (0..50).collect::<Vec<u8>>());
    }
}

#[test]
fn test_capacity_one_serializes_producer_and_consumer() {
    let buf = buffer(1);

    let consumer = {
        let buf = Arc::clone(&buf);
        std::thread::spawn(move || {
            let mut collected = Vec::new();
            while collected.len() < 20 {
                for message in buf.pop_batch(8, Duration::from_millis(50)) {
                    collected.push(message.payload[0]);
                }
            }
            collected
        })
    };

    for i in 0u8..20 {
        assert!(buf.push("/t", vec![i], i as i64), "push {i} should succeed");
    }

    let collected = consumer.join().unwrap();
    assert_eq!(collected, (0..20).collect::<Vec<u8>>());
}

#[test]
fn test_pop_waits_for_data() {
    let buf = buffer(4);

    let producer = {
        let buf = Arc::clone(&buf);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            buf.push("/t", vec![7], 7);
        })
    };

    let start = Instant::now();
    let batch = buf.pop_batch(1, Duration::from_millis(200));
    assert_eq!(batch.len(), 1);
    assert!(start.elapsed() < Duration::from_millis(150));
    producer.join().unwrap();
}
