//! Persisted `raw header -> identifier` decisions.
//!
//! The mapping only grows: an identifier handed out once is returned for the
//! same header on every later run, and no two headers share an identifier.
//! A run holds `<mapping>.lock` from open until drop so that two pipelines
//! never interleave their read-modify-write cycles.

use std::{
    collections::{BTreeMap, HashSet},
    fs::{self, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};

use crate::{
    ident::{self, IdentKind, normalize_header},
    io_utils,
};

#[derive(Debug)]
struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    fn acquire(mapping_path: &Path) -> Result<Self> {
        let mut lock_name = mapping_path.as_os_str().to_owned();
        lock_name.push(".lock");
        let path = PathBuf::from(lock_name);
        io_utils::ensure_parent(&path)?;
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {
                debug!("Acquired mapping lock {path:?}");
                Ok(Self { path })
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => bail!(
                "Identifier mapping is locked by another run ({path:?}); remove the lock file if no run is active"
            ),
            Err(err) => Err(err).with_context(|| format!("Creating lock file {path:?}")),
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!("Failed to release mapping lock {:?}: {err}", self.path);
        }
    }
}

#[derive(Debug)]
pub struct IdentifierStore {
    path: Option<PathBuf>,
    entries: BTreeMap<String, String>,
    used: HashSet<String>,
    added: usize,
    max_len: usize,
    _lock: Option<StoreLock>,
}

impl IdentifierStore {
    /// Store that is never written, for previews and tests.
    pub fn in_memory(max_len: usize) -> Self {
        Self {
            path: None,
            entries: BTreeMap::new(),
            used: HashSet::new(),
            added: 0,
            max_len,
            _lock: None,
        }
    }

    /// Read an existing mapping without taking the lock. Saving is disabled.
    pub fn load_read_only(path: &Path, max_len: usize) -> Result<Self> {
        let mut store = Self::in_memory(max_len);
        store.extend_from(read_mapping(path)?);
        Ok(store)
    }

    /// Lock the mapping at `path` and read it fully. With `force_rebuild`
    /// the cached decisions are discarded and the file is rewritten on save.
    pub fn open(path: &Path, max_len: usize, force_rebuild: bool) -> Result<Self> {
        let lock = StoreLock::acquire(path)?;
        let mut store = Self::in_memory(max_len);
        if force_rebuild {
            info!("Discarding cached identifier mapping {path:?}");
        } else {
            store.extend_from(read_mapping(path)?);
        }
        store.path = Some(path.to_path_buf());
        store._lock = Some(lock);
        Ok(store)
    }

    fn extend_from(&mut self, entries: BTreeMap<String, String>) {
        for (raw, identifier) in entries {
            self.used.insert(identifier.clone());
            self.entries.insert(raw, identifier);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn added(&self) -> usize {
        self.added
    }

    pub fn get(&self, raw_header: &str) -> Option<&str> {
        self.entries
            .get(&normalize_header(raw_header))
            .map(String::as_str)
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    /// Stable identifier for a raw header, allocating a new one on first
    /// sight.
    pub fn identifier_for(&mut self, raw_header: &str) -> String {
        let key = normalize_header(raw_header);
        if let Some(existing) = self.entries.get(&key) {
            return existing.clone();
        }

        let base = ident::sanitize_with(&key, IdentKind::Column, self.max_len);
        let mut candidate = base.clone();
        let mut ordinal = 1usize;
        while self.used.contains(&candidate) {
            candidate = ident::with_suffix(&base, ordinal, self.max_len);
            ordinal += 1;
        }
        if candidate != base {
            warn!("Header '{key}' collides with an existing identifier '{base}'; mapped to '{candidate}'");
        }
        debug!("New identifier mapping '{key}' -> '{candidate}'");
        self.used.insert(candidate.clone());
        self.entries.insert(key, candidate.clone());
        self.added += 1;
        candidate
    }

    /// Write the mapping back atomically. No-op for in-memory stores.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        io_utils::write_json_atomic(path, &self.entries)
            .with_context(|| format!("Saving identifier mapping {path:?}"))?;
        info!(
            "Identifier mapping {path:?} holds {} header(s) ({} new)",
            self.entries.len(),
            self.added
        );
        Ok(())
    }
}

fn read_mapping(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("Reading identifier mapping {path:?}"))?;
    if text.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(&text).with_context(|| format!("Parsing identifier mapping {path:?}"))
}
