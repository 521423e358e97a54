// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use bagpipe::config::{BagConfig, StorageConfig, TopicSpec};

/// A scratch directory removed on drop.
#[derive(Debug)]
pub struct TestDir(pub PathBuf);

impl TestDir {
    pub fn new(tag: &str) -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let thread_id = format!("{:?}", std::thread::current().id());
        let dir = std::env::temp_dir().join(format!(
            "bagpipe_{}_{}_{}_{}",
            tag,
            std::process::id(),
            thread_id.replace(['(', ')'], ""),
            nanos
        ));
        fs::create_dir_all(&dir).unwrap();
        Self(dir)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.0.join(name)
    }

    pub fn as_str(&self) -> String {
        self.0.display().to_string()
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

/// Write the stock test schema (`pkg.Msg` in `pkg.proto`) into `dir`
/// and return the directory as a search path.
pub fn write_test_schema(dir: &TestDir) -> String {
    fs::write(
        dir.join("pkg.proto"),
        "syntax = \"proto3\";\npackage pkg;\nmessage Msg { bytes data = 1; }\n",
    )
    .unwrap();
    dir.as_str()
}

/// Storage config writing into `dir` with rotation disabled and the
/// stock schema on the search path.
pub fn storage_config(dir: &TestDir) -> StorageConfig {
    StorageConfig {
        split_by_size: false,
        schema_search_paths: vec![write_test_schema(dir)],
        ..StorageConfig::default()
    }
}

/// Full config recording `topics` (all typed `pkg.Msg`) into `dir`.
pub fn bag_config(dir: &TestDir, topics: &[&str]) -> BagConfig {
    let mut config = BagConfig::default();
    config.recorder.output_path = dir.as_str();
    config.recorder.filename_prefix = "test".to_string();
    config.recorder.topics = topics
        .iter()
        .map(|name| TopicSpec {
            name: name.to_string(),
            type_name: "pkg.Msg".to_string(),
            schema_file: "pkg.proto".to_string(),
        })
        .collect();
    config.storage = storage_config(dir);
    config
}

/// Bag files (by configured extension) under `dir`, sorted by name.
pub fn bag_files(dir: &TestDir, extension: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| {
            let path = entry.unwrap().path();
            (path.extension().and_then(|e| e.to_str()) == Some(extension)).then_some(path)
        })
        .collect();
    files.sort();
    files
}

/// Spin until `predicate` holds or ~2 seconds pass.
pub fn wait_for<F: Fn() -> bool>(predicate: F) -> bool {
    for _ in 0..400 {
        if predicate() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    false
}
