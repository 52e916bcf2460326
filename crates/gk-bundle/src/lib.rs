// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic zip evidence-bundle exporter (C13, §4.13).
//!
//! Produces a single zip archive per run, laid out as:
//!
//! ```text
//! evidence/run.json
//! evidence/events.jsonl
//! evidence/schemas/<name>.json
//! evidence/artifacts/manifest.json
//! evidence/artifacts/<sha256>
//! evidence/integrity/chain.json
//! ```
//!
//! Every entry name is built from hard-coded prefixes plus hex digests or a
//! caller-supplied schema name already restricted to `[a-zA-Z0-9_.-]`; no
//! other caller-supplied string ever reaches an entry name. Grounded on
//! `pt-bundle`'s `BundleWriter`: sort everything before writing so the same
//! logical bundle always produces the same bytes, write the summary/manifest
//! entries first, then the content entries.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use gk_error::{KernelError, KernelErrorCode, KernelResult};
use gk_event_store::EventRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

/// Everything needed to export one run's evidence bundle, already loaded
/// into memory from the event store, artifact store, and schema registry.
pub struct ExportInput<'a> {
    /// The run's metadata, serialized verbatim into `evidence/run.json`.
    pub run_summary: serde_json::Value,
    /// Every event row for the run, in `seq` order.
    pub events: &'a [EventRecord],
    /// The run's chain verification report (§4.3), written as-is into
    /// `evidence/integrity/chain.json`.
    pub chain: &'a gk_event_store::ChainVerification,
    /// The artifact store's manifest for this run (§4.4).
    pub manifest: &'a gk_artifact_store::Manifest,
    /// Resolves an included manifest entry's `sha256` to its bytes. Called
    /// only for rows where [`gk_artifact_store::ManifestEntry::included`] is
    /// `true`.
    pub fetch_artifact: &'a dyn Fn(&str) -> KernelResult<Vec<u8>>,
    /// JSON Schema documents to embed, keyed by a name restricted to
    /// `[a-zA-Z0-9_.-]` (validated; any other character rejects the export).
    pub schemas: BTreeMap<String, serde_json::Value>,
}

fn is_safe_schema_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

fn to_json_bytes<T: Serialize>(value: &T) -> KernelResult<Vec<u8>> {
    serde_json::to_vec_pretty(value)
        .map_err(|e| KernelError::new(KernelErrorCode::SchemaInvalid, format!("bundle entry serialization failed: {e}")))
}

fn zip_error(entry: &str, e: zip::result::ZipError) -> KernelError {
    KernelError::new(KernelErrorCode::ChainVerificationFailed, format!("zip write failed for {entry}: {e}"))
        .with_detail("entry", entry)
}

fn io_error(entry: &str, e: std::io::Error) -> KernelError {
    KernelError::new(KernelErrorCode::ChainVerificationFailed, format!("bundle I/O failed for {entry}: {e}"))
        .with_detail("entry", entry)
}

/// Exports `input` as a deterministic zip evidence bundle into an in-memory
/// buffer (§4.13).
///
/// Aborts before writing anything if:
/// - `input.chain` did not pass (`CHAIN_VERIFICATION_FAILED`);
/// - any included artifact's fetched bytes fail to re-hash against its
///   declared `sha256` (`ARTIFACT_VERIFICATION_FAILED`);
/// - a schema name is not restricted to `[a-zA-Z0-9_.-]` (`SCHEMA_INVALID`).
///
/// # Errors
/// Returns [`KernelError`] under the conditions above, or on a zip/IO write
/// failure.
pub fn export_bundle(input: &ExportInput<'_>) -> KernelResult<Vec<u8>> {
    if !input.chain.valid {
        return Err(KernelError::new(
            KernelErrorCode::ChainVerificationFailed,
            "refusing to export a bundle for a run whose event chain failed verification",
        )
        .with_detail("failures", &input.chain.failures));
    }

    for name in input.schemas.keys() {
        if !is_safe_schema_name(name) {
            return Err(KernelError::new(KernelErrorCode::SchemaInvalid, "unsafe schema entry name")
                .with_detail("name", name));
        }
    }

    let mut included_artifacts: Vec<(&str, Vec<u8>)> = Vec::new();
    for row in &input.manifest.entries {
        if !row.included {
            continue;
        }
        let bytes = (input.fetch_artifact)(&row.entry.sha256)?;
        let recomputed = gk_codec::sha256_hex(&bytes);
        if recomputed != row.entry.sha256 {
            return Err(KernelError::new(
                KernelErrorCode::ArtifactVerificationFailed,
                "fetched artifact bytes do not match the manifest's declared digest",
            )
            .with_detail("sha256", &row.entry.sha256)
            .with_detail("actual", recomputed));
        }
        included_artifacts.push((row.entry.sha256.as_str(), bytes));
    }
    included_artifacts.sort_by(|a, b| a.0.cmp(b.0));

    let mut events_jsonl = Vec::new();
    for event in input.events {
        let line = to_json_bytes(event)?;
        events_jsonl.extend_from_slice(&line);
        events_jsonl.push(b'\n');
    }

    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut buffer);
        let options: FileOptions<'_, ()> = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644);

        write_entry(&mut zip, options, "evidence/run.json", &to_json_bytes(&input.run_summary)?)?;
        write_entry(&mut zip, options, "evidence/events.jsonl", &events_jsonl)?;
        write_entry(&mut zip, options, "evidence/integrity/chain.json", &to_json_bytes(input.chain)?)?;
        write_entry(&mut zip, options, "evidence/artifacts/manifest.json", &to_json_bytes(input.manifest)?)?;

        for (name, schema) in &input.schemas {
            let entry = format!("evidence/schemas/{name}.json");
            write_entry(&mut zip, options, &entry, &to_json_bytes(schema)?)?;
        }

        for (sha256, bytes) in &included_artifacts {
            let entry = format!("evidence/artifacts/{sha256}");
            write_entry(&mut zip, options, &entry, bytes)?;
        }

        zip.finish().map_err(|e| zip_error("<finish>", e))?;
    }

    let bytes = buffer.into_inner();
    tracing::info!(
        target: "gk_bundle",
        event_count = input.events.len(),
        artifact_count = included_artifacts.len(),
        bytes = bytes.len(),
        "evidence bundle exported"
    );
    Ok(bytes)
}

fn write_entry<W: std::io::Write + std::io::Seek>(
    zip: &mut ZipWriter<W>,
    options: FileOptions<'_, ()>,
    name: &str,
    bytes: &[u8],
) -> KernelResult<()> {
    zip.start_file(name, options).map_err(|e| zip_error(name, e))?;
    zip.write_all(bytes).map_err(|e| io_error(name, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gk_artifact_store::{ArtifactEntry, Manifest, ManifestEntry};
    use gk_event_store::{ChainFailure, ChainFailureReason, ChainVerification};
    use uuid::Uuid;

    fn sample_event(seq: u64) -> EventRecord {
        EventRecord {
            run_id: "run-1".into(),
            seq,
            event_id: format!("e-{seq}"),
            event_type: if seq == 1 { "RunStarted".into() } else { "StepStarted".into() },
            payload: serde_json::json!({}),
            created_at: chrono::Utc::now(),
            prev_hash: if seq == 1 { None } else { Some("a".repeat(64)) },
            hash: "b".repeat(64),
        }
    }

    fn passing_chain() -> ChainVerification {
        ChainVerification {
            valid: true,
            event_count: 2,
            failures: vec![],
            hashes: vec!["b".repeat(64), "c".repeat(64)],
        }
    }

    fn manifest_with_one_included() -> (Manifest, String, Vec<u8>) {
        let bytes = b"hello evidence".to_vec();
        let sha256 = gk_codec::sha256_hex(&bytes);
        let entry = ArtifactEntry {
            artifact_id: Uuid::new_v4(),
            sha256: sha256.clone(),
            size: bytes.len() as u64,
            mime: "text/plain".into(),
            label: "note".into(),
        };
        let manifest = Manifest {
            entries: vec![ManifestEntry { entry, included: true }],
            total_size: bytes.len() as u64,
        };
        (manifest, sha256, bytes)
    }

    #[test]
    fn exports_a_well_formed_zip_with_every_fixed_entry() {
        let events = [sample_event(1), sample_event(2)];
        let chain = passing_chain();
        let (manifest, sha256, bytes) = manifest_with_one_included();
        let fetch = move |digest: &str| -> KernelResult<Vec<u8>> {
            assert_eq!(digest, sha256);
            Ok(bytes.clone())
        };
        let mut schemas = BTreeMap::new();
        schemas.insert("DefinitionOfDone".to_string(), serde_json::json!({"type": "object"}));

        let input = ExportInput {
            run_summary: serde_json::json!({"runId": "run-1"}),
            events: &events,
            chain: &chain,
            manifest: &manifest,
            fetch_artifact: &fetch,
            schemas,
        };
        let zip_bytes = export_bundle(&input).unwrap();
        assert_eq!(&zip_bytes[0..2], b"PK");

        let cursor = std::io::Cursor::new(zip_bytes);
        let mut archive = zip::ZipArchive::new(cursor).unwrap();
        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        assert!(names.contains(&"evidence/run.json".to_string()));
        assert!(names.contains(&"evidence/events.jsonl".to_string()));
        assert!(names.contains(&"evidence/integrity/chain.json".to_string()));
        assert!(names.contains(&"evidence/artifacts/manifest.json".to_string()));
        assert!(names.contains(&"evidence/schemas/DefinitionOfDone.json".to_string()));
        assert!(names.iter().any(|n| n.starts_with("evidence/artifacts/") && n.len() > "evidence/artifacts/manifest.json".len()));
    }

    #[test]
    fn refuses_to_export_a_failed_chain() {
        let events = [sample_event(1)];
        let chain = ChainVerification {
            valid: false,
            event_count: 1,
            failures: vec![ChainFailure { seq: 1, reason: ChainFailureReason::HashMismatch }],
            hashes: vec!["b".repeat(64)],
        };
        let manifest = Manifest { entries: vec![], total_size: 0 };
        let fetch = |_: &str| -> KernelResult<Vec<u8>> { Ok(vec![]) };
        let input = ExportInput {
            run_summary: serde_json::json!({}),
            events: &events,
            chain: &chain,
            manifest: &manifest,
            fetch_artifact: &fetch,
            schemas: BTreeMap::new(),
        };
        let err = export_bundle(&input).unwrap_err();
        assert_eq!(err.code(), KernelErrorCode::ChainVerificationFailed);
    }

    #[test]
    fn refuses_a_tampered_artifact() {
        let events = [sample_event(1)];
        let chain = passing_chain();
        let (manifest, _sha256, _bytes) = manifest_with_one_included();
        let fetch = |_: &str| -> KernelResult<Vec<u8>> { Ok(b"not the real bytes".to_vec()) };
        let input = ExportInput {
            run_summary: serde_json::json!({}),
            events: &events,
            chain: &chain,
            manifest: &manifest,
            fetch_artifact: &fetch,
            schemas: BTreeMap::new(),
        };
        let err = export_bundle(&input).unwrap_err();
        assert_eq!(err.code(), KernelErrorCode::ArtifactVerificationFailed);
    }

    #[test]
    fn refuses_an_unsafe_schema_name() {
        let events = [sample_event(1)];
        let chain = passing_chain();
        let manifest = Manifest { entries: vec![], total_size: 0 };
        let fetch = |_: &str| -> KernelResult<Vec<u8>> { Ok(vec![]) };
        let mut schemas = BTreeMap::new();
        schemas.insert("../escape".to_string(), serde_json::json!({}));
        let input = ExportInput {
            run_summary: serde_json::json!({}),
            events: &events,
            chain: &chain,
            manifest: &manifest,
            fetch_artifact: &fetch,
            schemas,
        };
        let err = export_bundle(&input).unwrap_err();
        assert_eq!(err.code(), KernelErrorCode::SchemaInvalid);
    }
}
