//! Storage backend trait + default file implementation (spec.md §4.6, §6,
//! component C6)

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Errors raised by a [`StorageBackend`].
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage snapshot corrupt: {0}")]
    Corruption(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// A pluggable key-value persistence capability (spec.md §6).
///
/// The engine treats keys as opaque names — it never inspects the bytes
/// itself except through [`crate::storage::codec`].
pub trait StorageBackend: Send + Sync {
    fn load(&self) -> Result<HashMap<String, Vec<u8>>>;
    fn save(&self, snapshot: HashMap<String, Vec<u8>>) -> Result<()>;
    fn close(&self) -> Result<()>;
}

/// Default file-backed implementation: one file per key under a directory,
/// written via temp-file + fsync + rename, gzipped when the key ends in
/// `.bin` (spec.md §6).
pub struct FileBackend {
    dir: PathBuf,
    compression_level: u32,
    atomic: bool,
}

impl FileBackend {
    /// `compression_level` is clamped to the documented `1..=9` range
    /// (spec.md §6 config: `compressionLevel (1-9)`).
    pub fn new(dir: impl Into<PathBuf>, compression_level: u32, atomic: bool) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, compression_level: compression_level.clamp(1, 9), atomic })
    }

    /// Uses the platform cache directory via `directories`, matching the
    /// teacher's `embeddings/local.rs` default-location convention.
    pub fn default_location() -> Result<Self> {
        let dir = directories::ProjectDirs::from("io", "stacks", "core")
            .map(|p| p.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".stacks"));
        Self::new(dir, 6, true)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if !self.atomic {
            let mut f = File::create(path)?;
            f.write_all(bytes)?;
            f.sync_all()?;
            return Ok(());
        }
        let tmp_path = path.with_extension("tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(bytes)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        if let Some(dir) = path.parent() {
            // Best-effort directory fsync so the rename itself is durable.
            if let Ok(dir_handle) = File::open(dir) {
                let _ = dir_handle.sync_all();
            }
        }
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn load(&self) -> Result<HashMap<String, Vec<u8>>> {
        let mut out = HashMap::new();
        if !self.dir.exists() {
            return Ok(out);
        }
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            if name.ends_with(".tmp") {
                continue;
            }
            let mut raw = Vec::new();
            if File::open(&path).and_then(|mut f| f.read_to_end(&mut raw)).is_err() {
                // Corrupt/unreadable file: spec.md §6 "a corrupt file is
                // treated as empty", never fatal for the whole load.
                continue;
            }
            if name.ends_with(".bin") {
                let mut decoder = GzDecoder::new(&raw[..]);
                let mut decompressed = Vec::new();
                if decoder.read_to_end(&mut decompressed).is_err() {
                    continue;
                }
                out.insert(name.to_string(), decompressed);
            } else {
                out.insert(name.to_string(), raw);
            }
        }
        Ok(out)
    }

    fn save(&self, snapshot: HashMap<String, Vec<u8>>) -> Result<()> {
        for (key, bytes) in snapshot {
            let path = self.path_for(&key);
            if key.ends_with(".bin") {
                let mut encoder =
                    GzEncoder::new(Vec::new(), Compression::new(self.compression_level));
                encoder.write_all(&bytes)?;
                let gz = encoder.finish()?;
                self.write_atomic(&path, &gz)?;
            } else {
                self.write_atomic(&path, &bytes)?;
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn save_then_load_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path(), 6, true).unwrap();

        let mut snapshot = HashMap::new();
        snapshot.insert("volumes.bin".to_string(), b"hello world".to_vec());
        backend.save(snapshot).unwrap();

        let loaded = backend.load().unwrap();
        assert_eq!(loaded.get("volumes.bin").unwrap(), b"hello world");
    }

    #[test]
    fn load_on_empty_directory_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path(), 6, true).unwrap();
        assert!(backend.load().unwrap().is_empty());
    }

    #[test]
    fn corrupt_gzip_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path(), 6, true).unwrap();
        std::fs::write(dir.path().join("volumes.bin"), b"not gzip data").unwrap();
        let loaded = backend.load().unwrap();
        assert!(!loaded.contains_key("volumes.bin"));
    }

    #[test]
    fn save_then_load_then_save_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path(), 6, true).unwrap();
        let mut snapshot = HashMap::new();
        snapshot.insert("learning.bin".to_string(), vec![1, 2, 3, 4]);
        backend.save(snapshot.clone()).unwrap();
        let loaded = backend.load().unwrap();
        backend.save(loaded.clone()).unwrap();
        let reloaded = backend.load().unwrap();
        assert_eq!(loaded, reloaded);
    }
}
