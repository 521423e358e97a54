// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Recorder end-to-end tests over the in-memory transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bagpipe::config::BagConfig;
use bagpipe::container::ContainerReader;
use bagpipe::transport::{MemoryTransport, TransportFactory};
use bagpipe::{BagError, BagReader, Recorder, RecorderState};
use common::{bag_config, bag_files, wait_for, TestDir};

fn start_recorder(config: &BagConfig, transport: &Arc<MemoryTransport>) -> Recorder {
    let recorder = Recorder::new(config.clone(), transport.clone());
    recorder.start().unwrap();
    recorder
}

// ============================================================================
// Single topic, single message
// ============================================================================

#[test]
fn test_single_message_end_to_end() {
    let dir = TestDir::new("recorder_single");
    let config = bag_config(&dir, &["/t"]);
    let transport = Arc::new(MemoryTransport::new());

    let recorder = start_recorder(&config, &transport);
    assert_eq!(recorder.state(), RecorderState::Running);
    assert_eq!(recorder.topics(), vec!["/t".to_string()]);

    let payload = b"hello\x00world!".to_vec();
    let publisher = transport.create_publisher("/t").unwrap();
    assert!(publisher.publish(&payload));

    assert!(wait_for(|| recorder.total_messages() == 1));
    recorder.stop();
    assert_eq!(recorder.state(), RecorderState::Stopped);

    let files = bag_files(&dir, "mcap");
    assert_eq!(files.len(), 1);

    // Schema: one entry named pkg.Msg with a non-empty descriptor blob.
    let mut container = ContainerReader::open(&files[0]).unwrap();
    container.read_summary(true).unwrap();
    assert_eq!(container.schemas().len(), 1);
    let schema = container.schemas().values().next().unwrap();
    assert_eq!(schema.name, "pkg.Msg");
    assert_eq!(schema.encoding, "protobuf");
    assert!(!schema.data.is_empty());

    // Channel: one entry bound to /t.
    assert_eq!(container.channels().len(), 1);
    let channel = container.channels().values().next().unwrap();
    assert_eq!(channel.topic, "/t");
    assert_eq!(channel.metadata["message_type"], "pkg.Msg");

    // Exactly one record with sequence 0 and the exact bytes.
    let records: Vec<_> = container.messages().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].sequence, 0);
    assert_eq!(records[0].channel_id, channel.id);
    assert_eq!(records[0].data, payload);
}

// ============================================================================
// Setup failures
// ============================================================================

#[test]
fn test_start_without_topics_fails() {
    let dir = TestDir::new("recorder_no_topics");
    let config = bag_config(&dir, &[]);
    let transport = Arc::new(MemoryTransport::new());

    let recorder = Recorder::new(config, transport);
    let err = recorder.start().unwrap_err();
    assert!(matches!(err, BagError::ConfigInvalid { .. }));
    assert_eq!(recorder.state(), RecorderState::Stopped);
    assert!(bag_files(&dir, "mcap").is_empty());
}

#[test]
fn test_start_with_bad_schema_leaves_no_partial_state() {
    let dir = TestDir::new("recorder_bad_schema");
    let mut config = bag_config(&dir, &["/t"]);
    config.recorder.topics[0].schema_file = "missing.proto".to_string();
    let transport = Arc::new(MemoryTransport::new());

    let recorder = Recorder::new(config, transport);
    let err = recorder.start().unwrap_err();
    assert!(matches!(err, BagError::ImportFailed { .. }));
    assert_eq!(recorder.state(), RecorderState::Stopped);
    assert!(recorder.topics().is_empty());
}

// ============================================================================
// State machine
// ============================================================================

#[test]
fn test_stop_twice_is_noop() {
    let dir = TestDir::new("recorder_stop_twice");
    let config = bag_config(&dir, &["/t"]);
    let transport = Arc::new(MemoryTransport::new());

    let recorder = start_recorder(&config, &transport);
    recorder.stop();
    let files_after_first = bag_files(&dir, "mcap").len();
    recorder.stop();
    assert_eq!(bag_files(&dir, "mcap").len(), files_after_first);
    assert_eq!(recorder.state(), RecorderState::Stopped);
}

#[test]
fn test_start_is_idempotent_while_running() {
    let dir = TestDir::new("recorder_start_twice");
    let config = bag_config(&dir, &["/t"]);
    let transport = Arc::new(MemoryTransport::new());

    let recorder = start_recorder(&config, &transport);
    recorder.start().unwrap();
    assert_eq!(bag_files(&dir, "mcap").len(), 1, "no second file opened");
    recorder.stop();
}

#[test]
fn test_pause_discards_resume_captures() {
    let dir = TestDir::new("recorder_pause");
    let config = bag_config(&dir, &["/t"]);
    let transport = Arc::new(MemoryTransport::new());

    let recorder = start_recorder(&config, &transport);
    let publisher = transport.create_publisher("/t").unwrap();

    assert!(publisher.publish(b"before"));
    assert!(wait_for(|| recorder.total_messages() == 1));

    recorder.pause();
    assert_eq!(recorder.state(), RecorderState::Paused);
    assert!(publisher.publish(b"while-paused"));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.total_messages(), 1, "paused messages are discarded");

    recorder.resume();
    assert_eq!(recorder.state(), RecorderState::Running);
    assert!(publisher.publish(b"after"));
    assert!(wait_for(|| recorder.total_messages() == 2));

    recorder.stop();

    let files = bag_files(&dir, "mcap");
    let reader = BagReader::open(&files[0].display().to_string()).unwrap();
    let payloads: Vec<Vec<u8>> = reader
        .messages()
        .unwrap()
        .map(|r| r.unwrap().data)
        .collect();
    assert_eq!(payloads, vec![b"before".to_vec(), b"after".to_vec()]);
}

#[test]
fn test_pause_resume_in_wrong_state_are_noops() {
    let dir = TestDir::new("recorder_wrong_state");
    let config = bag_config(&dir, &["/t"]);
    let transport = Arc::new(MemoryTransport::new());

    let recorder = Recorder::new(config, transport);
    recorder.pause();
    assert_eq!(recorder.state(), RecorderState::Stopped);
    recorder.resume();
    assert_eq!(recorder.state(), RecorderState::Stopped);
}

// ============================================================================
// Drain on stop
// ============================================================================

#[test]
fn test_stop_flushes_buffered_messages() {
    let dir = TestDir::new("recorder_flush");
    let mut config = bag_config(&dir, &["/t"]);
    config.storage.write_batch_size = 4;
    let transport = Arc::new(MemoryTransport::new());

    let recorder = start_recorder(&config, &transport);
    let publisher = transport.create_publisher("/t").unwrap();
    for i in 0..100u8 {
        assert!(publisher.publish(&[i]));
    }
    assert!(wait_for(|| recorder.total_messages() == 100));

    // Stop immediately: the drain contract requires every accepted
    // message to land in the file.
    recorder.stop();

    let files = bag_files(&dir, "mcap");
    let reader = BagReader::open(&files[0].display().to_string()).unwrap();
    let records: Vec<_> = reader.messages().unwrap().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 100);

    let sequences: Vec<u32> = records.iter().map(|r| r.sequence).collect();
    assert_eq!(sequences, (0..100).collect::<Vec<u32>>());

    let payloads: Vec<u8> = records.iter().map(|r| r.data[0]).collect();
    assert_eq!(payloads, (0..100).collect::<Vec<u8>>());
}

#[test]
fn test_total_messages_matches_file_contents() {
    let dir = TestDir::new("recorder_invariant");
    let config = bag_config(&dir, &["/a", "/b"]);
    let transport = Arc::new(MemoryTransport::new());

    let recorder = start_recorder(&config, &transport);
    let pub_a = transport.create_publisher("/a").unwrap();
    let pub_b = transport.create_publisher("/b").unwrap();
    for i in 0..20u8 {
        assert!(pub_a.publish(&[i]));
        assert!(pub_b.publish(&[i]));
    }
    assert!(wait_for(|| recorder.total_messages() == 40));
    recorder.stop();

    let files = bag_files(&dir, "mcap");
    let reader = BagReader::open(&files[0].display().to_string()).unwrap();
    let mut sequences: Vec<u32> = reader
        .messages()
        .unwrap()
        .map(|r| r.unwrap().sequence)
        .collect();
    sequences.sort_unstable();
    assert_eq!(sequences, (0..40).collect::<Vec<u32>>());
}
