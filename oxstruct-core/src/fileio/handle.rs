//! Template-facing file handles.
//!
//! A [`FileHandle`] is the fixed record exposed to the template renderer for
//! each attached file: path, name, size, encoding, lazily loaded content, and
//! content hash. Content loads go through the shared [`FileCache`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{OxError, Result};
use crate::fileio::cache::{CacheEntry, FileCache};
use crate::fileio::encoding;
use crate::fileio::identity::{HashAlgorithm, hash_bytes};

#[derive(Debug, Clone, Serialize)]
pub struct FileHandle {
    /// Path as the user supplied it.
    pub path: PathBuf,
    /// Normalised absolute path (already through the security gate).
    pub abs_path: PathBuf,
    pub name: String,
    pub size: u64,
    pub encoding: String,
    /// Decoded text content; `None` for opaque binary files.
    pub content: Option<String>,
    /// Content hash under the configured algorithm.
    pub hash: Option<String>,
}

impl FileHandle {
    /// Load a handle, consulting and populating the cache.
    pub fn load(
        given_path: &Path,
        abs_path: &Path,
        cache: &FileCache,
        algorithm: HashAlgorithm,
    ) -> Result<Self> {
        let metadata = std::fs::metadata(abs_path).map_err(|_| OxError::NotFound {
            path: abs_path.to_path_buf(),
        })?;
        let size = metadata.len();
        let mtime_nanos = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        let entry = match cache.get(abs_path, mtime_nanos, size) {
            Some(entry) => entry,
            None => {
                let bytes = std::fs::read(abs_path).map_err(|e| {
                    OxError::Internal(anyhow::anyhow!("read {}: {e}", abs_path.display()))
                })?;
                let detected = encoding::detect(&bytes);
                let hash = detected
                    .content
                    .is_some()
                    .then(|| hash_bytes(algorithm, &bytes));
                let entry = CacheEntry {
                    content: detected.content,
                    encoding: detected.encoding,
                    content_hash: hash,
                    mtime_nanos,
                    size_bytes: size,
                };
                cache.put(abs_path.to_path_buf(), entry.clone());
                Arc::new(entry)
            }
        };

        Ok(Self {
            path: given_path.to_path_buf(),
            abs_path: abs_path.to_path_buf(),
            name: abs_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| abs_path.display().to_string()),
            size,
            encoding: entry.encoding.clone(),
            content: entry.content.clone(),
            hash: entry.content_hash.clone(),
        })
    }

    /// Render the fixed field set for the template context.
    pub fn to_context_value(&self) -> Value {
        json!({
            "path": self.path.display().to_string(),
            "abs_path": self.abs_path.display().to_string(),
            "name": self.name,
            "size": self.size,
            "encoding": self.encoding,
            "content": self.content,
            "hash": self.hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_text_file_with_hash() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "# hello\n").unwrap();
        let cache = FileCache::default();

        let handle =
            FileHandle::load(Path::new("notes.md"), &path, &cache, HashAlgorithm::Sha256).unwrap();
        assert_eq!(handle.name, "notes.md");
        assert_eq!(handle.content.as_deref(), Some("# hello\n"));
        assert_eq!(handle.encoding, "utf-8");
        assert!(handle.hash.is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn second_load_hits_cache() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "payload").unwrap();
        let cache = FileCache::default();

        let first =
            FileHandle::load(Path::new("data.txt"), &path, &cache, HashAlgorithm::Sha256).unwrap();
        let second =
            FileHandle::load(Path::new("data.txt"), &path, &cache, HashAlgorithm::Sha256).unwrap();
        assert_eq!(first.hash, second.hash);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn context_value_has_fixed_field_set() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "x").unwrap();
        let cache = FileCache::default();
        let handle =
            FileHandle::load(Path::new("a.txt"), &path, &cache, HashAlgorithm::Sha256).unwrap();

        let value = handle.to_context_value();
        let object = value.as_object().unwrap();
        let mut keys: Vec<_> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec!["abs_path", "content", "encoding", "hash", "name", "path", "size"]
        );
    }
}
