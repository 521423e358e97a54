// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Schema registry: resolves type names to self-contained descriptor sets.
//!
//! Schema sources are imported from configured search roots; each import
//! pulls in the file's own imports first so type references always
//! resolve against already-known types. [`SchemaRegistry::descriptor_set`]
//! then walks file-level dependencies breadth-first and serializes the
//! closure, so a consumer holding only the container file can decode
//! every recorded payload.
//!
//! Import failures are collected rather than thrown: a bad file poisons
//! only the operation that touched it, and callers inspect
//! [`SchemaRegistry::errors`] for diagnostics.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

use prost::Message as _;
use prost_reflect::DescriptorPool;
use prost_types::{DescriptorProto, FileDescriptorProto, FileDescriptorSet};
use tracing::{debug, warn};

use crate::core::{BagError, Result};
use crate::schema::parser::{parse_proto, TypeIndex};

/// A collected import diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportError {
    /// Schema file, relative to a search path
    pub file: String,
    /// 1-based line, 0 when the failure has no position
    pub line: usize,
    /// 1-based column, 0 when the failure has no position
    pub column: usize,
    /// What went wrong
    pub message: String,
}

impl ImportError {
    /// Convert into the crate error for propagation.
    pub fn to_error(&self) -> BagError {
        BagError::import(&self.file, self.line, self.column, &self.message)
    }
}

#[derive(Default)]
struct RegistryState {
    search_paths: Vec<PathBuf>,
    /// Parsed files by import path
    files: HashMap<String, FileDescriptorProto>,
    /// Fully qualified type name -> defining file
    type_to_file: HashMap<String, String>,
    /// Types known so far, for reference resolution
    index: TypeIndex,
    /// Collected diagnostics
    errors: Vec<ImportError>,
    /// Serialized closure per type name; rebuilds are idempotent
    set_cache: HashMap<String, Vec<u8>>,
}

/// Thread-safe registry of schema sources and their descriptors.
pub struct SchemaRegistry {
    state: Mutex<RegistryState>,
}

impl SchemaRegistry {
    /// Create a registry with the given search roots.
    pub fn new(search_paths: &[String]) -> Self {
        let state = RegistryState {
            search_paths: search_paths.iter().map(PathBuf::from).collect(),
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Append a directory root for schema-source lookup.
    pub fn add_search_path(&self, path: impl Into<PathBuf>) {
        if let Ok(mut state) = self.state.lock() {
            state.search_paths.push(path.into());
        }
    }

    /// Parse a schema source file (and, first, everything it imports).
    ///
    /// Returns `false` and records a diagnostic on failure; already
    /// imported files are a cheap no-op.
    pub fn import(&self, relative_path: &str) -> bool {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };

        let mut in_progress = HashSet::new();
        match import_file(&mut state, relative_path, &mut in_progress) {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    file = %error.file,
                    line = error.line,
                    column = error.column,
                    message = %error.message,
                    "schema import failed"
                );
                state.errors.push(error);
                false
            }
        }
    }

    /// Serialize the descriptor closure for a type.
    ///
    /// The emitted `FileDescriptorSet` starts with the file defining
    /// `type_name` and contains every transitive file dependency exactly
    /// once, in breadth-first order. Output is deterministic for a given
    /// import tree.
    pub fn descriptor_set(&self, type_name: &str) -> Result<Vec<u8>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| BagError::type_not_found(type_name))?;

        if let Some(bytes) = state.set_cache.get(type_name) {
            return Ok(bytes.clone());
        }

        let root = state
            .type_to_file
            .get(type_name)
            .cloned()
            .ok_or_else(|| BagError::type_not_found(type_name))?;

        let mut ordered = Vec::new();
        let mut seen = HashSet::new();
        let mut pending = VecDeque::new();
        pending.push_back(root.clone());
        seen.insert(root);

        while let Some(file_name) = pending.pop_front() {
            let file = match state.files.get(&file_name) {
                Some(file) => file.clone(),
                None => {
                    // A dependency was declared but never imported.
                    return Err(BagError::import(
                        file_name,
                        0,
                        0,
                        "dependency was not imported",
                    ));
                }
            };
            for dependency in &file.dependency {
                if seen.insert(dependency.clone()) {
                    pending.push_back(dependency.clone());
                }
            }
            ordered.push(file);
        }

        let set = FileDescriptorSet { file: ordered };

        // Materializing a pool proves the closure is complete and the
        // named type decodable before anything lands in a file.
        let pool = DescriptorPool::from_file_descriptor_set(set.clone())
            .map_err(|e| BagError::import(type_name, 0, 0, e.to_string()))?;
        if pool.get_message_by_name(type_name).is_none() {
            return Err(BagError::type_not_found(type_name));
        }

        let bytes = set.encode_to_vec();
        debug!(
            type_name,
            files = set.file.len(),
            bytes = bytes.len(),
            "descriptor set built"
        );
        state
            .set_cache
            .insert(type_name.to_string(), bytes.clone());
        Ok(bytes)
    }

    /// Check whether a type has been imported.
    pub fn contains_type(&self, type_name: &str) -> bool {
        self.state
            .lock()
            .map(|state| state.type_to_file.contains_key(type_name))
            .unwrap_or(false)
    }

    /// Snapshot of collected import diagnostics.
    pub fn errors(&self) -> Vec<ImportError> {
        self.state
            .lock()
            .map(|state| state.errors.clone())
            .unwrap_or_default()
    }

    /// Drop collected diagnostics.
    pub fn clear_errors(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.errors.clear();
        }
    }
}

fn import_file(
    state: &mut RegistryState,
    relative_path: &str,
    in_progress: &mut HashSet<String>,
) -> std::result::Result<(), ImportError> {
    if state.files.contains_key(relative_path) {
        return Ok(());
    }
    if !in_progress.insert(relative_path.to_string()) {
        return Err(ImportError {
            file: relative_path.to_string(),
            line: 0,
            column: 0,
            message: "circular import".to_string(),
        });
    }

    let source = read_source(state, relative_path).ok_or_else(|| ImportError {
        file: relative_path.to_string(),
        line: 0,
        column: 0,
        message: "file not found in any search path".to_string(),
    })?;

    // Dependencies must land in the index before this file parses, so
    // its type references resolve.
    for dependency in scan_imports(&source) {
        import_file(state, &dependency, in_progress)?;
    }

    let file =
        parse_proto(relative_path, &source, &state.index).map_err(|error| ImportError {
            file: relative_path.to_string(),
            line: error.line,
            column: error.column,
            message: error.message,
        })?;

    state.index.absorb(&file);
    let package = file.package.clone().unwrap_or_default();
    for message in &file.message_type {
        record_types(state, relative_path, &package, message);
    }
    for enumeration in &file.enum_type {
        let fq = join_scope(&package, enumeration.name());
        state.type_to_file.insert(fq, relative_path.to_string());
    }
    state.files.insert(relative_path.to_string(), file);
    debug!(file = relative_path, "schema imported");

    in_progress.remove(relative_path);
    Ok(())
}

fn record_types(state: &mut RegistryState, file: &str, scope: &str, message: &DescriptorProto) {
    let fq = join_scope(scope, message.name());
    state.type_to_file.insert(fq.clone(), file.to_string());
    for nested in &message.nested_type {
        record_types(state, file, &fq, nested);
    }
    for enumeration in &message.enum_type {
        let nested_fq = join_scope(&fq, enumeration.name());
        state.type_to_file.insert(nested_fq, file.to_string());
    }
}

fn join_scope(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}.{name}")
    }
}

fn read_source(state: &RegistryState, relative_path: &str) -> Option<String> {
    for root in &state.search_paths {
        let candidate = root.join(relative_path);
        if let Ok(source) = std::fs::read_to_string(&candidate) {
            return Some(source);
        }
    }
    None
}

/// Light pre-scan for `import "...";` lines, so dependencies can be
/// imported before the full parse runs.
fn scan_imports(source: &str) -> Vec<String> {
    let mut imports = Vec::new();
    for line in source.lines() {
        let line = line.trim_start();
        let Some(rest) = line.strip_prefix("import") else {
            continue;
        };
        let rest = rest.trim_start();
        let rest = rest
            .strip_prefix("public")
            .or_else(|| rest.strip_prefix("weak"))
            .unwrap_or(rest)
            .trim_start();
        let Some(rest) = rest.strip_prefix('"') else {
            continue;
        };
        if let Some(end) = rest.find('"') {
            imports.push(rest[..end].to_string());
        }
    }
    imports
}
