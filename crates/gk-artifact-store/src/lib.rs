// SPDX-License-Identifier: MIT OR Apache-2.0
//! Content-addressed blob store for opaque artifact payloads (§4.4).
//!
//! Bytes are stored once under a two-level prefix tree keyed by their
//! SHA-256 digest (`<root>/blobs/<hash[0..2]>/<hash>`); every call to
//! [`ArtifactStore::put`] additionally records a small metadata entry
//! (`artifactId`, `mime`, `label`) so the same content can be labeled
//! differently by different callers without duplicating the blob.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use gk_error::{KernelError, KernelErrorCode, KernelResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata recorded for one `put` call: the content digest plus the
/// caller-supplied descriptive fields. Several entries may share the same
/// `sha256` if the same bytes were put under different labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ArtifactEntry {
    /// Identifies this particular `put` call, distinct from the content hash.
    #[serde(rename = "artifactId")]
    pub artifact_id: Uuid,
    /// Lowercase hex SHA-256 digest of the stored bytes.
    pub sha256: String,
    /// Size of the stored bytes, in bytes.
    pub size: u64,
    /// Caller-supplied MIME type.
    pub mime: String,
    /// Caller-supplied human-readable label.
    pub label: String,
}

/// One row of a built manifest: an [`ArtifactEntry`] plus whether its bytes
/// should be inlined into an evidence bundle or merely referenced by hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ManifestEntry {
    /// The artifact this row describes.
    #[serde(flatten)]
    pub entry: ArtifactEntry,
    /// Whether `size` is at or below the manifest's inclusion threshold.
    pub included: bool,
}

/// A deterministic, ordered view over every artifact a store holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Manifest {
    /// Rows sorted by `artifactId`.
    pub entries: Vec<ManifestEntry>,
    /// Sum of every entry's `size`, included or not.
    #[serde(rename = "totalSize")]
    pub total_size: u64,
}

/// A content-addressed blob store rooted at a directory on disk.
///
/// Blobs live under `<root>/blobs/<hash[0..2]>/<hash>`; per-`put` metadata
/// lives under `<root>/entries/<artifactId>.json` so a [`Manifest`] can be
/// rebuilt without re-reading every blob.
pub struct ArtifactStore {
    root: PathBuf,
    index: RwLock<HashMap<Uuid, ArtifactEntry>>,
}

impl ArtifactStore {
    /// Opens (creating if necessary) an artifact store rooted at `root`,
    /// rebuilding its in-memory metadata index from any existing entries.
    ///
    /// # Errors
    /// Returns [`KernelError`] if the root cannot be created or an existing
    /// metadata entry fails to parse.
    pub fn open(root: impl Into<PathBuf>) -> KernelResult<Self> {
        let root = root.into();
        fs::create_dir_all(entries_dir(&root)).map_err(|e| io_error(&root.display().to_string(), e))?;
        fs::create_dir_all(blobs_dir(&root)).map_err(|e| io_error(&root.display().to_string(), e))?;
        let index = rebuild_index(&root)?;
        Ok(Self { root, index: RwLock::new(index) })
    }

    /// Stores `bytes` under their SHA-256 digest (deduplicating the blob if
    /// already present) and records a fresh metadata entry for this call.
    ///
    /// # Errors
    /// Returns [`KernelError`] if the blob or metadata cannot be written.
    pub fn put(
        &self,
        bytes: &[u8],
        mime: impl Into<String>,
        label: impl Into<String>,
    ) -> KernelResult<ArtifactEntry> {
        let sha256 = gk_codec::sha256_hex(bytes);
        let blob_path = blob_path(&self.root, &sha256);
        if !blob_path.exists() {
            if let Some(parent) = blob_path.parent() {
                fs::create_dir_all(parent).map_err(|e| io_error(&sha256, e))?;
            }
            atomic_write(&blob_path, bytes)?;
        }

        let entry = ArtifactEntry {
            artifact_id: Uuid::new_v4(),
            sha256,
            size: bytes.len() as u64,
            mime: mime.into(),
            label: label.into(),
        };
        let entry_path = entries_dir(&self.root).join(format!("{}.json", entry.artifact_id));
        let serialized = serde_json::to_vec_pretty(&entry)
            .map_err(|e| KernelError::new(KernelErrorCode::SchemaInvalid, format!("entry serialization failed: {e}")))?;
        atomic_write(&entry_path, &serialized)?;

        self.index.write().expect("artifact index lock poisoned").insert(entry.artifact_id, entry.clone());
        tracing::debug!(target: "gk_artifact_store", artifact_id = %entry.artifact_id, sha256 = %entry.sha256, size = entry.size, "artifact stored");
        Ok(entry)
    }

    /// Reads back the blob addressed by `sha256`, re-hashing it before
    /// returning; tampered or missing bytes are refused rather than
    /// returned, per §4.4.
    ///
    /// # Errors
    /// Returns [`KernelError`] with code `ArtifactVerificationFailed` if the
    /// blob is missing, unreadable, or its bytes no longer match `sha256`.
    pub fn get_artifact(&self, sha256: &str) -> KernelResult<Vec<u8>> {
        let path = blob_path(&self.root, sha256);
        let bytes = fs::read(&path).map_err(|_| {
            KernelError::new(
                KernelErrorCode::ArtifactVerificationFailed,
                format!("artifact {sha256} could not be read"),
            )
            .with_detail("sha256", sha256)
        })?;
        let recomputed = gk_codec::sha256_hex(&bytes);
        if recomputed != sha256 {
            tracing::warn!(target: "gk_artifact_store", expected = sha256, actual = %recomputed, "artifact hash mismatch on read");
            return Err(KernelError::new(
                KernelErrorCode::ArtifactVerificationFailed,
                format!("artifact {sha256} failed re-hash verification"),
            )
            .with_detail("sha256", sha256)
            .with_detail("actual", recomputed));
        }
        Ok(bytes)
    }

    /// Looks up a previously recorded metadata entry by its `artifactId`.
    pub fn find_entry(&self, artifact_id: Uuid) -> Option<ArtifactEntry> {
        self.index.read().expect("artifact index lock poisoned").get(&artifact_id).cloned()
    }

    /// Builds a deterministic [`Manifest`] over every entry this store
    /// currently knows about, sorted by `artifactId`, marking each row
    /// `included` when its size is at or below `size_threshold_bytes`.
    pub fn build_manifest(&self, size_threshold_bytes: u64) -> Manifest {
        let index = self.index.read().expect("artifact index lock poisoned");
        let mut entries: Vec<ArtifactEntry> = index.values().cloned().collect();
        entries.sort_by(|a, b| a.artifact_id.cmp(&b.artifact_id));
        let total_size = entries.iter().map(|e| e.size).sum();
        let entries = entries
            .into_iter()
            .map(|entry| {
                let included = entry.size <= size_threshold_bytes;
                ManifestEntry { entry, included }
            })
            .collect();
        Manifest { entries, total_size }
    }
}

fn entries_dir(root: &Path) -> PathBuf {
    root.join("entries")
}

fn blobs_dir(root: &Path) -> PathBuf {
    root.join("blobs")
}

fn blob_path(root: &Path, sha256: &str) -> PathBuf {
    let prefix = &sha256[..sha256.len().min(2)];
    blobs_dir(root).join(prefix).join(sha256)
}

fn rebuild_index(root: &Path) -> KernelResult<HashMap<Uuid, ArtifactEntry>> {
    let mut index = HashMap::new();
    let dir = entries_dir(root);
    let read_dir = match fs::read_dir(&dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(index),
        Err(e) => return Err(io_error(&dir.display().to_string(), e)),
    };
    for item in read_dir {
        let item = item.map_err(|e| io_error(&dir.display().to_string(), e))?;
        let path = item.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let bytes = fs::read(&path).map_err(|e| io_error(&path.display().to_string(), e))?;
        let entry: ArtifactEntry = serde_json::from_slice(&bytes).map_err(|e| {
            KernelError::new(KernelErrorCode::SchemaInvalid, format!("unreadable artifact entry {}: {e}", path.display()))
        })?;
        index.insert(entry.artifact_id, entry);
    }
    Ok(index)
}

fn atomic_write(path: &Path, content: &[u8]) -> KernelResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| io_error(&path.display().to_string(), e))?;
    tmp.write_all(content).map_err(|e| io_error(&path.display().to_string(), e))?;
    tmp.flush().map_err(|e| io_error(&path.display().to_string(), e))?;
    tmp.as_file().sync_all().map_err(|e| io_error(&path.display().to_string(), e))?;
    tmp.persist(path).map_err(|e| io_error(&path.display().to_string(), e.error))?;
    Ok(())
}

fn io_error(context: &str, e: std::io::Error) -> KernelError {
    KernelError::new(KernelErrorCode::ArtifactVerificationFailed, format!("artifact store I/O error: {e}"))
        .with_detail("path", context)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (ArtifactStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::open(dir.path()).expect("open store");
        (store, dir)
    }

    #[test]
    fn put_then_get_round_trips_bytes() {
        let (store, _dir) = store();
        let entry = store.put(b"hello world", "text/plain", "greeting").expect("put");
        assert_eq!(entry.size, 11);
        assert_eq!(entry.sha256.len(), 64);
        let bytes = store.get_artifact(&entry.sha256).expect("get");
        assert_eq!(bytes, b"hello world");
    }

    #[test]
    fn same_bytes_different_labels_share_one_blob_but_get_distinct_entries() {
        let (store, _dir) = store();
        let first = store.put(b"payload", "text/plain", "first").expect("put first");
        let second = store.put(b"payload", "text/plain", "second").expect("put second");
        assert_eq!(first.sha256, second.sha256);
        assert_ne!(first.artifact_id, second.artifact_id);
        let blob_path = blob_path(&store.root, &first.sha256);
        assert!(blob_path.exists());
    }

    #[test]
    fn get_artifact_rejects_tampered_bytes() {
        let (store, _dir) = store();
        let entry = store.put(b"original", "text/plain", "doc").expect("put");
        let path = blob_path(&store.root, &entry.sha256);
        std::fs::write(&path, b"tampered!").expect("tamper");
        let result = store.get_artifact(&entry.sha256);
        assert!(matches!(
            result,
            Err(e) if e.code() == KernelErrorCode::ArtifactVerificationFailed
        ));
    }

    #[test]
    fn get_artifact_rejects_missing_blob() {
        let (store, _dir) = store();
        let fake_hash = "a".repeat(64);
        let result = store.get_artifact(&fake_hash);
        assert!(matches!(
            result,
            Err(e) if e.code() == KernelErrorCode::ArtifactVerificationFailed
        ));
    }

    #[test]
    fn manifest_is_sorted_by_artifact_id_and_marks_inclusion_by_threshold() {
        let (store, _dir) = store();
        let small = store.put(b"tiny", "text/plain", "small").expect("put small");
        let large = store.put(&vec![0u8; 2048], "application/octet-stream", "large").expect("put large");

        let manifest = store.build_manifest(1024);
        assert_eq!(manifest.entries.len(), 2);
        assert!(manifest.entries.windows(2).all(|w| w[0].entry.artifact_id <= w[1].entry.artifact_id));
        assert_eq!(manifest.total_size, small.size + large.size);

        let small_row = manifest.entries.iter().find(|e| e.entry.artifact_id == small.artifact_id).unwrap();
        let large_row = manifest.entries.iter().find(|e| e.entry.artifact_id == large.artifact_id).unwrap();
        assert!(small_row.included);
        assert!(!large_row.included);
    }

    #[test]
    fn reopening_a_store_rebuilds_the_metadata_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let entry = {
            let store = ArtifactStore::open(dir.path()).expect("open store");
            store.put(b"persisted", "text/plain", "note").expect("put")
        };
        let reopened = ArtifactStore::open(dir.path()).expect("reopen store");
        let found = reopened.find_entry(entry.artifact_id).expect("entry found after reopen");
        assert_eq!(found, entry);
        let bytes = reopened.get_artifact(&entry.sha256).expect("get after reopen");
        assert_eq!(bytes, b"persisted");
    }

    #[test]
    fn find_entry_returns_none_for_unknown_artifact_id() {
        let (store, _dir) = store();
        assert!(store.find_entry(Uuid::new_v4()).is_none());
    }
}
