//! Durable holding area for captures awaiting confirmed delivery.
//!
//! The filesystem store keeps one file per pending capture in a single
//! directory. Entries are written to a temporary file, synced, then renamed,
//! so enumeration never observes a partially written payload.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::capture::{Capture, CaptureId, CaptureMetadata};

pub const DEFAULT_STORE_DIR: &str = "capture_temp";

const ENTRY_EXTENSION: &str = "capture";
const TMP_EXTENSION: &str = "tmp";
const ENTRY_MAGIC: &[u8; 4] = b"CSPL";
const ENTRY_VERSION: u8 = 1;
const ENTRY_PREFIX_LEN: usize = 9;
const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Handle to a persisted capture.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreRef(String);

impl StoreRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug)]
pub struct StoredCapture {
    pub store_ref: StoreRef,
    pub capture: Capture,
}

/// Lazy snapshot of pending captures, oldest first.
pub type PendingIter<'a> = Box<dyn Iterator<Item = Result<StoredCapture>> + Send + 'a>;

pub trait CaptureStore: Send + Sync {
    /// Persist payload and metadata atomically.
    fn put(&self, capture: &Capture) -> Result<StoreRef>;

    /// Pending captures ordered by `created_at` ascending.
    ///
    /// Each call takes a fresh snapshot. Entries removed while iterating are
    /// skipped; entries inserted while iterating may or may not appear.
    fn list_pending(&self) -> Result<PendingIter<'_>>;

    /// Delete a persisted capture. Removing an absent entry is not an error.
    fn remove(&self, store_ref: &StoreRef) -> Result<()>;

    /// Remove every entry created before `now - retention`; returns the count.
    fn evict_older_than(&self, retention: Duration) -> Result<usize>;

    /// Number of entries currently held.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn eviction_cutoff(retention: Duration) -> Result<DateTime<Utc>> {
    let retention = chrono::Duration::from_std(retention)
        .map_err(|_| anyhow!("retention {:?} is out of range", retention))?;
    Utc::now()
        .checked_sub_signed(retention)
        .ok_or_else(|| anyhow!("retention {:?} is out of range", retention))
}

fn lock_store(lock: &Mutex<()>) -> Result<MutexGuard<'_, ()>> {
    lock.lock().map_err(|_| anyhow!("capture store lock poisoned"))
}

// ----------------------------------------------------------------------------
// Filesystem store
// ----------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    id: CaptureId,
    metadata: CaptureMetadata,
    payload_len: u64,
    payload_sha256: String,
}

pub struct FilesystemCaptureStore {
    root: PathBuf,
    // Serializes all operations, so no two ever interleave on one id.
    lock: Mutex<()>,
}

impl FilesystemCaptureStore {
    /// Open (creating if needed) the store directory and check it is writable.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create capture store directory {}", root.display()))?;
        let probe = root.join(format!(".probe.{}", TMP_EXTENSION));
        File::create(&probe)
            .and_then(|mut file| file.write_all(b"probe"))
            .with_context(|| format!("capture store directory {} is not writable", root.display()))?;
        let _ = fs::remove_file(&probe);
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, stem: &str) -> PathBuf {
        self.root.join(format!("{}.{}", stem, ENTRY_EXTENSION))
    }

    /// Pick a file stem that does not collide with an existing entry.
    fn free_stem(&self, id: &CaptureId) -> String {
        let base = id.as_str().to_string();
        let mut stem = base.clone();
        let mut n = 1u32;
        while self.entry_path(&stem).exists()
            || self.entry_path(&stem).with_extension(TMP_EXTENSION).exists()
        {
            stem = format!("{}-{}", base, n);
            n += 1;
        }
        stem
    }

    /// Entry stems in the directory, with the file's modification time.
    fn scan(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut out = Vec::new();
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("read capture store {}", self.root.display()))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            out.push((stem.to_string(), path));
        }
        Ok(out)
    }

    fn sweep_stale_tmp(&self, cutoff: DateTime<Utc>) -> Result<()> {
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(TMP_EXTENSION) {
                continue;
            }
            if modified_at(&path).is_ok_and(|mtime| mtime < cutoff) {
                log::debug!("removing stale partial entry {}", path.display());
                if let Err(e) = remove_if_present(&path) {
                    log::warn!("cannot remove stale partial entry: {:#}", e);
                }
            }
        }
        Ok(())
    }
}

impl CaptureStore for FilesystemCaptureStore {
    fn put(&self, capture: &Capture) -> Result<StoreRef> {
        let _guard = lock_store(&self.lock)?;
        let stem = self.free_stem(capture.id());
        let path = self.entry_path(&stem);
        let encoded = encode_entry(capture)?;
        write_atomic(&path, &encoded)
            .with_context(|| format!("persist capture {} to {}", capture.id(), path.display()))?;
        Ok(StoreRef(stem))
    }

    fn list_pending(&self) -> Result<PendingIter<'_>> {
        let snapshot = {
            let _guard = lock_store(&self.lock)?;
            let mut snapshot = Vec::new();
            for (stem, path) in self.scan()? {
                match read_header(&path) {
                    Ok(header) => snapshot.push((header.metadata.created_at, stem)),
                    Err(e) => log::warn!("skipping unreadable capture entry {}: {:#}", stem, e),
                }
            }
            snapshot.sort();
            snapshot
        };

        Ok(Box::new(snapshot.into_iter().filter_map(move |(_, stem)| {
            let _guard = match lock_store(&self.lock) {
                Ok(guard) => guard,
                Err(e) => return Some(Err(e)),
            };
            let path = self.entry_path(&stem);
            match read_entry(&path) {
                Ok(capture) => Some(Ok(StoredCapture {
                    store_ref: StoreRef(stem),
                    capture,
                })),
                Err(e) if is_not_found(&e) => None,
                Err(e) => Some(Err(e.context(format!("load capture entry {}", stem)))),
            }
        })))
    }

    fn remove(&self, store_ref: &StoreRef) -> Result<()> {
        validate_stem(store_ref.as_str())?;
        let _guard = lock_store(&self.lock)?;
        remove_if_present(&self.entry_path(store_ref.as_str()))
    }

    fn evict_older_than(&self, retention: Duration) -> Result<usize> {
        let cutoff = eviction_cutoff(retention)?;
        let _guard = lock_store(&self.lock)?;
        let mut evicted = 0usize;
        let mut failed = 0usize;
        for (stem, path) in self.scan()? {
            let created_at = match read_header(&path) {
                Ok(header) => header.metadata.created_at,
                Err(_) => match modified_at(&path) {
                    Ok(mtime) => mtime,
                    Err(e) => {
                        log::error!("cannot date capture entry {} for eviction: {:#}", stem, e);
                        failed += 1;
                        continue;
                    }
                },
            };
            if created_at < cutoff {
                if let Err(e) = remove_if_present(&path) {
                    log::error!("cannot evict expired capture {}: {:#}", stem, e);
                    failed += 1;
                    continue;
                }
                log::warn!(
                    "evicted expired capture {} created_at={}",
                    stem,
                    created_at.to_rfc3339()
                );
                evicted += 1;
            }
        }
        if let Err(e) = self.sweep_stale_tmp(cutoff) {
            log::error!("stale partial entry sweep failed: {:#}", e);
        }
        if failed > 0 {
            log::warn!("{} capture entries could not be evicted this pass", failed);
        }
        Ok(evicted)
    }

    fn len(&self) -> Result<usize> {
        let _guard = lock_store(&self.lock)?;
        Ok(self.scan()?.len())
    }
}

fn validate_stem(stem: &str) -> Result<()> {
    if stem.is_empty()
        || !stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(anyhow!("invalid capture store ref '{}'", stem));
    }
    Ok(())
}

fn encode_entry(capture: &Capture) -> Result<Vec<u8>> {
    let payload = capture.payload();
    let header = EntryHeader {
        id: capture.id().clone(),
        metadata: capture.metadata().clone(),
        payload_len: payload.len() as u64,
        payload_sha256: hex::encode(Sha256::digest(payload)),
    };
    let header_json = serde_json::to_vec(&header)?;
    if header_json.len() > MAX_HEADER_BYTES {
        return Err(anyhow!("capture header exceeds {} bytes", MAX_HEADER_BYTES));
    }

    let mut out = Vec::with_capacity(ENTRY_PREFIX_LEN + header_json.len() + payload.len());
    out.extend_from_slice(ENTRY_MAGIC);
    out.push(ENTRY_VERSION);
    out.extend_from_slice(&(header_json.len() as u32).to_le_bytes());
    out.extend_from_slice(&header_json);
    out.extend_from_slice(payload);
    Ok(out)
}

fn decode_prefix(prefix: &[u8]) -> Result<usize> {
    if prefix.len() < ENTRY_PREFIX_LEN || &prefix[..4] != ENTRY_MAGIC {
        return Err(anyhow!("invalid capture entry encoding"));
    }
    if prefix[4] != ENTRY_VERSION {
        return Err(anyhow!("unsupported capture entry version {}", prefix[4]));
    }
    let header_len = u32::from_le_bytes([prefix[5], prefix[6], prefix[7], prefix[8]]) as usize;
    if header_len > MAX_HEADER_BYTES {
        return Err(anyhow!("capture entry header too large"));
    }
    Ok(header_len)
}

/// Read only the header, leaving the payload on disk.
fn read_header(path: &Path) -> Result<EntryHeader> {
    let mut file = File::open(path)?;
    let mut prefix = [0u8; ENTRY_PREFIX_LEN];
    file.read_exact(&mut prefix)?;
    let header_len = decode_prefix(&prefix)?;
    let mut header = vec![0u8; header_len];
    file.read_exact(&mut header)?;
    Ok(serde_json::from_slice(&header)?)
}

fn read_entry(path: &Path) -> Result<Capture> {
    let bytes = fs::read(path)?;
    let header_len = decode_prefix(&bytes)?;
    let header_end = ENTRY_PREFIX_LEN + header_len;
    if bytes.len() < header_end {
        return Err(anyhow!("truncated capture entry header"));
    }
    let header: EntryHeader = serde_json::from_slice(&bytes[ENTRY_PREFIX_LEN..header_end])?;
    let payload = &bytes[header_end..];
    if payload.len() as u64 != header.payload_len {
        return Err(anyhow!(
            "capture payload length mismatch (expected {}, found {})",
            header.payload_len,
            payload.len()
        ));
    }
    if hex::encode(Sha256::digest(payload)) != header.payload_sha256 {
        return Err(anyhow!("capture payload digest mismatch"));
    }
    Ok(Capture::restore(header.id, payload.to_vec(), header.metadata))
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension(TMP_EXTENSION);
    let written = (|| -> Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow!("remove {}: {}", path.display(), e)),
    }
}

/// Modification time of the entry itself; a symlink is not followed.
fn modified_at(path: &Path) -> Result<DateTime<Utc>> {
    Ok(DateTime::<Utc>::from(fs::symlink_metadata(path)?.modified()?))
}

fn is_not_found(e: &anyhow::Error) -> bool {
    e.downcast_ref::<std::io::Error>()
        .is_some_and(|io| io.kind() == ErrorKind::NotFound)
}

// ----------------------------------------------------------------------------
// In-memory store
// ----------------------------------------------------------------------------

/// Volatile store with the same contract, for tests and diskless runs.
#[derive(Debug, Default)]
pub struct InMemoryCaptureStore {
    entries: Mutex<BTreeMap<String, Capture>>,
}

impl InMemoryCaptureStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, BTreeMap<String, Capture>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("capture store lock poisoned"))
    }
}

impl CaptureStore for InMemoryCaptureStore {
    fn put(&self, capture: &Capture) -> Result<StoreRef> {
        let mut entries = self.entries()?;
        let base = capture.id().as_str().to_string();
        let mut stem = base.clone();
        let mut n = 1u32;
        while entries.contains_key(&stem) {
            stem = format!("{}-{}", base, n);
            n += 1;
        }
        entries.insert(stem.clone(), capture.clone());
        Ok(StoreRef(stem))
    }

    fn list_pending(&self) -> Result<PendingIter<'_>> {
        let mut snapshot = self
            .entries()?
            .iter()
            .map(|(stem, capture)| (capture.created_at(), stem.clone()))
            .collect::<Vec<_>>();
        snapshot.sort();

        Ok(Box::new(snapshot.into_iter().filter_map(move |(_, stem)| {
            let entries = match self.entries() {
                Ok(entries) => entries,
                Err(e) => return Some(Err(e)),
            };
            entries.get(&stem).cloned().map(|capture| {
                Ok(StoredCapture {
                    store_ref: StoreRef(stem),
                    capture,
                })
            })
        })))
    }

    fn remove(&self, store_ref: &StoreRef) -> Result<()> {
        self.entries()?.remove(store_ref.as_str());
        Ok(())
    }

    fn evict_older_than(&self, retention: Duration) -> Result<usize> {
        let cutoff = eviction_cutoff(retention)?;
        let mut entries = self.entries()?;
        let before = entries.len();
        entries.retain(|stem, capture| {
            let keep = capture.created_at() >= cutoff;
            if !keep {
                log::warn!(
                    "evicted expired capture {} created_at={}",
                    stem,
                    capture.created_at().to_rfc3339()
                );
            }
            keep
        });
        Ok(before - entries.len())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }
}
