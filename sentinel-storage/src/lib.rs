//! SENTINEL Storage - Digest Store and Transcript Archive
//!
//! Persistence capabilities consumed by the session facade. The digest
//! store holds a single UTF-8 text blob per campaign; the archive
//! receives blocks pruned at checkpoints. Both are synchronous: packer
//! builds never suspend, and digest saves happen on the already-async
//! command path.

use sentinel_core::{Block, StoreError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::debug;

// ============================================================================
// TRAITS
// ============================================================================

/// Storage for the campaign's digest blob.
pub trait DigestStore: Send + Sync {
    /// Load the digest text, or `None` on a fresh campaign.
    fn load(&self) -> Result<Option<String>, StoreError>;

    /// Replace the digest text atomically.
    fn save(&self, text: &str) -> Result<(), StoreError>;
}

/// Sink for transcript blocks pruned at checkpoints.
pub trait TranscriptArchive: Send + Sync {
    /// Append the given blocks to the archive, oldest first.
    fn archive(&self, blocks: &[Block]) -> Result<(), StoreError>;
}

/// Optional sink for the session summary exported on checkpoint.
pub trait SummaryWriter: Send + Sync {
    fn write_summary(&self, summary: &str) -> Result<(), StoreError>;
}

impl<T: DigestStore + ?Sized> DigestStore for std::sync::Arc<T> {
    fn load(&self) -> Result<Option<String>, StoreError> {
        (**self).load()
    }

    fn save(&self, text: &str) -> Result<(), StoreError> {
        (**self).save(text)
    }
}

impl<T: TranscriptArchive + ?Sized> TranscriptArchive for std::sync::Arc<T> {
    fn archive(&self, blocks: &[Block]) -> Result<(), StoreError> {
        (**self).archive(blocks)
    }
}

impl<T: SummaryWriter + ?Sized> SummaryWriter for std::sync::Arc<T> {
    fn write_summary(&self, summary: &str) -> Result<(), StoreError> {
        (**self).write_summary(summary)
    }
}

// ============================================================================
// FILE-BACKED DIGEST STORE
// ============================================================================

/// Digest store backed by a single file on disk.
///
/// Saves write to a sibling temp file and rename into place, so a
/// crashed save never leaves a half-written digest behind.
#[derive(Debug)]
pub struct FsDigestStore {
    path: PathBuf,
}

impl FsDigestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, err: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

impl DigestStore for FsDigestStore {
    fn load(&self) -> Result<Option<String>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => Ok(Some(text)),
                Err(_) => Err(StoreError::NotUtf8 {
                    path: self.path.display().to_string(),
                }),
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.io_err(err)),
        }
    }

    fn save(&self, text: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp).map_err(|e| self.io_err(e))?;
            file.write_all(text.as_bytes()).map_err(|e| self.io_err(e))?;
            file.sync_all().map_err(|e| self.io_err(e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        debug!(path = %self.path.display(), bytes = text.len(), "digest saved");
        Ok(())
    }
}

// ============================================================================
// IN-MEMORY DIGEST STORE
// ============================================================================

/// In-memory digest store for tests and ephemeral campaigns.
#[derive(Debug, Default)]
pub struct MemoryDigestStore {
    inner: RwLock<Option<String>>,
}

impl MemoryDigestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed the stored digest.
    pub fn with_digest(text: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(Some(text.into())),
        }
    }
}

impl DigestStore for MemoryDigestStore {
    fn load(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn save(&self, text: &str) -> Result<(), StoreError> {
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(text.to_string());
        Ok(())
    }
}

// ============================================================================
// JSONL TRANSCRIPT ARCHIVE
// ============================================================================

/// Archive that appends blocks as JSON lines to a file.
#[derive(Debug)]
pub struct JsonlTranscriptArchive {
    path: PathBuf,
    // Serializes appends from checkpoint calls on different handles
    guard: Mutex<()>,
}

impl JsonlTranscriptArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    fn io_err(&self, err: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

impl TranscriptArchive for JsonlTranscriptArchive {
    fn archive(&self, blocks: &[Block]) -> Result<(), StoreError> {
        let _held = self.guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        for block in blocks {
            let line = serde_json::to_string(block).map_err(|e| StoreError::Serialization {
                reason: e.to_string(),
            })?;
            writeln!(file, "{}", line).map_err(|e| self.io_err(e))?;
        }
        Ok(())
    }
}

// ============================================================================
// IN-MEMORY TRANSCRIPT ARCHIVE
// ============================================================================

/// Archive that collects blocks in memory; tests inspect what was pruned.
#[derive(Debug, Default)]
pub struct MemoryTranscriptArchive {
    inner: RwLock<Vec<Block>>,
}

impl MemoryTranscriptArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything archived so far.
    pub fn archived(&self) -> Vec<Block> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl TranscriptArchive for MemoryTranscriptArchive {
    fn archive(&self, blocks: &[Block]) -> Result<(), StoreError> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend_from_slice(blocks);
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::{BlockId, BlockType, ChatRole};

    fn make_block(id: u64, text: &str) -> Block {
        Block::new(BlockId::new(id), BlockType::Narrative, ChatRole::Assistant, text)
    }

    #[test]
    fn test_fs_store_fresh_campaign_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDigestStore::new(dir.path().join("digest.md"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_fs_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDigestStore::new(dir.path().join("digest.md"));
        store.save("digest-schema: 1\n## Hinge Index\n").unwrap();
        assert_eq!(
            store.load().unwrap().as_deref(),
            Some("digest-schema: 1\n## Hinge Index\n")
        );

        // Overwrite replaces, never appends
        store.save("second").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn test_fs_store_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDigestStore::new(dir.path().join("digest.md"));
        store.save("contents").unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("digest.md")]);
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryDigestStore::new();
        assert_eq!(store.load().unwrap(), None);
        store.save("x").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn test_jsonl_archive_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.jsonl");
        let archive = JsonlTranscriptArchive::new(&path);

        archive.archive(&[make_block(1, "first")]).unwrap();
        archive.archive(&[make_block(2, "second")]).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Block = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.id, BlockId::new(1));
        assert_eq!(first.text, "first");
    }

    #[test]
    fn test_memory_archive_collects() {
        let archive = MemoryTranscriptArchive::new();
        archive
            .archive(&[make_block(1, "a"), make_block(2, "b")])
            .unwrap();
        let archived = archive.archived();
        assert_eq!(archived.len(), 2);
        assert_eq!(archived[1].text, "b");
    }
}
