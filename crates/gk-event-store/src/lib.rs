// SPDX-License-Identifier: MIT OR Apache-2.0
//! Append-only, hash-chained, per-run event log (§4.3).
//!
//! A **run** is a sequence of [`EventRecord`]s keyed by `(runId, seq)`, with
//! `seq` starting at 1 and incrementing by exactly 1. Every record's `hash`
//! covers the record with `hash` and `prevHash` themselves excluded, so the
//! chain is `hash_n = sha256(canonical(record_n \ {hash, prevHash}))` with
//! `prevHash_n = hash_{n-1}` (`null` for `seq == 1`). No row is ever updated
//! or deleted.
//!
//! Persistence is one append-only JSON-lines file per run under a configured
//! root directory, rewritten atomically via write-to-temp-then-rename on
//! every append, with an in-memory, lock-guarded index of append-time
//! bookkeeping (next `seq`, last `hash`, seen `eventId`s) so a conflict or a
//! sequencing precondition can be checked without re-reading the file.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use gk_error::{KernelError, KernelErrorCode, KernelResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

/// The event type required of the first event (`seq == 1`) in every run's
/// log (§4.3).
pub const RUN_STARTED_EVENT_TYPE: &str = "RunStarted";

/// Caller-supplied fields for a new event; `seq`, `prevHash`, and `hash` are
/// assigned by the store on append.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EventDraft {
    /// Caller-chosen identifier, unique within the run (§4.3).
    #[serde(rename = "eventId")]
    pub event_id: String,
    /// Event type discriminator (e.g. `"RunStarted"`, `"StepStarted"`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Free-form event payload.
    pub payload: serde_json::Value,
}

/// A persisted row in a run's event log (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EventRecord {
    /// The run this event belongs to.
    #[serde(rename = "runId")]
    pub run_id: String,
    /// 1-based position within the run, incrementing by exactly 1.
    pub seq: u64,
    /// Caller-chosen identifier, unique within the run.
    #[serde(rename = "eventId")]
    pub event_id: String,
    /// Event type discriminator.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Free-form event payload.
    pub payload: serde_json::Value,
    /// Millisecond-precision UTC timestamp assigned at append time.
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    /// The previous event's `hash`; `None` only for `seq == 1`.
    #[serde(rename = "prevHash", default, skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    /// `sha256(canonical(self \ {hash, prevHash}))`.
    pub hash: String,
}

/// Why a single row failed chain verification (§4.3, §8 S2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChainFailureReason {
    /// The recomputed hash does not match the stored `hash`.
    HashMismatch,
    /// `prevHash` does not match the preceding row's stored `hash`.
    PrevHashMismatch,
    /// The first row (`seq == 1`) carries a non-null `prevHash`.
    FirstEventPrevHashNotNull,
    /// This row's position does not continue the run's `seq` sequence.
    SeqGap,
}

/// One verification failure, anchored to the `seq` of the offending row.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChainFailure {
    /// The `seq` of the row the failure concerns.
    pub seq: u64,
    /// Why this row failed verification.
    pub reason: ChainFailureReason,
}

/// The report produced by [`EventStore::verify_run_chain`] (§4.3, §8 S1/S2).
///
/// Enumerates every failure found, rather than stopping at the first —
/// a tampered `seq` and the hash mismatch it causes are both reported
/// (§9 Open Questions).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChainVerification {
    /// `true` iff `failures` is empty.
    pub valid: bool,
    /// Number of rows examined.
    #[serde(rename = "eventCount")]
    pub event_count: usize,
    /// Every failure found, in row order.
    pub failures: Vec<ChainFailure>,
    /// Every row's stored `hash`, in `seq` order.
    pub hashes: Vec<String>,
}

/// In-memory append-time bookkeeping for one run, guarded by its own mutex
/// so concurrent appends to different runs never contend with each other.
struct RunState {
    next_seq: u64,
    last_hash: Option<String>,
    event_ids: HashSet<String>,
}

/// A hash-chained, append-only, per-run event log backed by JSON-lines
/// files under a configured root directory (§4.3).
pub struct EventStore {
    root: PathBuf,
    runs: RwLock<HashMap<String, Mutex<RunState>>>,
}

impl EventStore {
    /// Opens a store rooted at `root`. Does not touch the filesystem until
    /// a run is created or appended to.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `run_id`, creating its backing file if absent or
    /// rebuilding the in-memory index from an existing one. Idempotent:
    /// calling this twice for the same run is a no-op on the second call.
    ///
    /// # Errors
    /// Returns [`KernelError`] if `run_id` is not filesystem-safe, or if the
    /// run's file cannot be created, read, or parsed.
    pub fn create_run(&self, run_id: &str) -> KernelResult<()> {
        validate_run_id(run_id)?;
        if self.runs.read().unwrap().contains_key(run_id) {
            return Ok(());
        }

        std::fs::create_dir_all(&self.root).map_err(|e| io_error(&self.root.display().to_string(), e))?;
        let path = self.run_path(run_id);
        let state = if path.exists() {
            rebuild_state(&path)?
        } else {
            atomic_write(&path, b"")?;
            RunState {
                next_seq: 1,
                last_hash: None,
                event_ids: HashSet::new(),
            }
        };

        self.runs
            .write()
            .unwrap()
            .entry(run_id.to_string())
            .or_insert_with(|| Mutex::new(state));
        Ok(())
    }

    /// Appends `draft` to `run_id`'s log, assigning `seq`, `prevHash`, and
    /// `hash`, and persisting the row atomically.
    ///
    /// # Errors
    /// - [`KernelErrorCode::SessionNotFound`] if `run_id` was never created.
    /// - [`KernelErrorCode::FirstEventNotRunStarted`] if `seq == 1` and
    ///   `draft.event_type != "RunStarted"`.
    /// - [`KernelErrorCode::EventIdConflict`] if `draft.event_id` was
    ///   already used in this run.
    pub fn append_event(&self, run_id: &str, draft: EventDraft) -> KernelResult<EventRecord> {
        let runs = self.runs.read().unwrap();
        let state_lock = runs.get(run_id).ok_or_else(|| {
            KernelError::new(KernelErrorCode::SessionNotFound, "run does not exist")
                .with_detail("runId", run_id)
        })?;
        let mut state = state_lock.lock().unwrap();

        let seq = state.next_seq;
        if seq == 1 && draft.event_type != RUN_STARTED_EVENT_TYPE {
            return Err(KernelError::new(
                KernelErrorCode::FirstEventNotRunStarted,
                format!("first event must be {RUN_STARTED_EVENT_TYPE}"),
            )
            .with_detail("runId", run_id)
            .with_detail("type", &draft.event_type));
        }
        if state.event_ids.contains(&draft.event_id) {
            return Err(KernelError::new(
                KernelErrorCode::EventIdConflict,
                "eventId already used in this run",
            )
            .with_detail("runId", run_id)
            .with_detail("eventId", &draft.event_id));
        }

        let mut record = EventRecord {
            run_id: run_id.to_string(),
            seq,
            event_id: draft.event_id,
            event_type: draft.event_type,
            payload: draft.payload,
            created_at: gk_core_now(),
            prev_hash: state.last_hash.clone(),
            hash: String::new(),
        };
        record.hash = gk_codec::hash_excluding_many(&record, &["hash", "prevHash"])
            .map_err(|e| codec_error(run_id, e))?;

        append_line(&self.run_path(run_id), &record)?;

        state.next_seq = seq + 1;
        state.last_hash = Some(record.hash.clone());
        state.event_ids.insert(record.event_id.clone());

        tracing::debug!(target: "gk_event_store", run_id, seq, r#type = %record.event_type, "event appended");
        Ok(record)
    }

    /// Loads every row of `run_id`'s log from disk, in `seq` order.
    ///
    /// # Errors
    /// Returns [`KernelError`] if the run's file cannot be read or a row
    /// cannot be parsed as an [`EventRecord`].
    pub fn load_run(&self, run_id: &str) -> KernelResult<Vec<EventRecord>> {
        validate_run_id(run_id)?;
        read_records(&self.run_path(run_id))
    }

    /// Returns every row of `run_id`'s log whose `type` equals `event_type`.
    ///
    /// # Errors
    /// Returns [`KernelError`] under the same conditions as [`Self::load_run`].
    pub fn events_by_type(&self, run_id: &str, event_type: &str) -> KernelResult<Vec<EventRecord>> {
        Ok(self
            .load_run(run_id)?
            .into_iter()
            .filter(|r| r.event_type == event_type)
            .collect())
    }

    /// Returns the row with the given `eventId`, if any.
    ///
    /// # Errors
    /// Returns [`KernelError`] under the same conditions as [`Self::load_run`].
    pub fn find_by_event_id(&self, run_id: &str, event_id: &str) -> KernelResult<Option<EventRecord>> {
        Ok(self
            .load_run(run_id)?
            .into_iter()
            .find(|r| r.event_id == event_id))
    }

    /// Verifies `run_id`'s chain: recomputes every row's hash, and checks
    /// `prevHash` linkage, the first row's `prevHash == null`, and `seq`
    /// continuity. Reports every failure found, not just the first (§9).
    ///
    /// # Errors
    /// Returns [`KernelError`] under the same conditions as [`Self::load_run`].
    pub fn verify_run_chain(&self, run_id: &str) -> KernelResult<ChainVerification> {
        let records = self.load_run(run_id)?;
        let mut failures = Vec::new();
        let mut hashes = Vec::with_capacity(records.len());

        for (i, record) in records.iter().enumerate() {
            let expected_seq = (i as u64) + 1;
            if record.seq != expected_seq {
                failures.push(ChainFailure {
                    seq: record.seq,
                    reason: ChainFailureReason::SeqGap,
                });
            }

            let recomputed = gk_codec::hash_excluding_many(record, &["hash", "prevHash"])
                .map_err(|e| codec_error(run_id, e))?;
            if recomputed != record.hash {
                failures.push(ChainFailure {
                    seq: record.seq,
                    reason: ChainFailureReason::HashMismatch,
                });
            }

            if i == 0 {
                if record.prev_hash.is_some() {
                    failures.push(ChainFailure {
                        seq: record.seq,
                        reason: ChainFailureReason::FirstEventPrevHashNotNull,
                    });
                }
            } else if record.prev_hash.as_deref() != Some(records[i - 1].hash.as_str()) {
                failures.push(ChainFailure {
                    seq: record.seq,
                    reason: ChainFailureReason::PrevHashMismatch,
                });
            }

            hashes.push(record.hash.clone());
        }

        if !failures.is_empty() {
            tracing::warn!(target: "gk_event_store", run_id, failure_count = failures.len(), "chain verification found failures");
        }
        Ok(ChainVerification {
            valid: failures.is_empty(),
            event_count: records.len(),
            failures,
            hashes,
        })
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.root.join(format!("{run_id}.jsonl"))
    }
}

fn validate_run_id(run_id: &str) -> KernelResult<()> {
    if run_id.is_empty()
        || run_id.contains(['/', '\\', '\0'])
        || run_id.split('.').any(|seg| seg == "..")
    {
        return Err(
            KernelError::new(KernelErrorCode::SchemaInvalid, "invalid runId")
                .with_detail("runId", run_id),
        );
    }
    Ok(())
}

/// Millisecond-truncated "now", matching [`gk_core::now_millis`]'s
/// precision without taking a dependency on `gk-core` for one function.
fn gk_core_now() -> DateTime<Utc> {
    use chrono::SubsecRound;
    Utc::now().trunc_subsecs(3)
}

fn io_error(context: &str, e: std::io::Error) -> KernelError {
    KernelError::new(KernelErrorCode::ChainVerificationFailed, format!("event store I/O failed: {e}"))
        .with_detail("path", context)
        .with_source(e)
}

fn codec_error(run_id: &str, e: gk_codec::CodecError) -> KernelError {
    KernelError::new(KernelErrorCode::SchemaInvalid, format!("canonicalization failed: {e}"))
        .with_detail("runId", run_id)
}

/// Rebuilds append-time bookkeeping from an existing run file, used when a
/// store is reopened after a restart.
fn rebuild_state(path: &Path) -> KernelResult<RunState> {
    let records = read_records(path)?;
    let mut event_ids = HashSet::with_capacity(records.len());
    for record in &records {
        event_ids.insert(record.event_id.clone());
    }
    let next_seq = records.last().map_or(1, |r| r.seq + 1);
    let last_hash = records.last().map(|r| r.hash.clone());
    Ok(RunState {
        next_seq,
        last_hash,
        event_ids,
    })
}

fn read_records(path: &Path) -> KernelResult<Vec<EventRecord>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(
                KernelError::new(KernelErrorCode::SessionNotFound, "run does not exist")
                    .with_detail("path", path.display().to_string()),
            );
        }
        Err(e) => return Err(io_error(&path.display().to_string(), e)),
    };
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| io_error(&path.display().to_string(), e))?;
        if line.is_empty() {
            continue;
        }
        let record: EventRecord = serde_json::from_str(&line).map_err(|e| {
            KernelError::new(KernelErrorCode::SchemaInvalid, format!("malformed event row: {e}"))
                .with_detail("path", path.display().to_string())
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Appends one canonical JSON line to `path`, rewriting the whole file into
/// a temp file in the same directory and renaming it into place so a crash
/// mid-write never leaves a truncated or interleaved log (§4.3).
fn append_line(path: &Path, record: &EventRecord) -> KernelResult<()> {
    let mut content = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(io_error(&path.display().to_string(), e)),
    };
    let line = serde_json::to_string(record).map_err(|e| {
        KernelError::new(KernelErrorCode::SchemaInvalid, format!("failed to serialize event: {e}"))
    })?;
    content.extend_from_slice(line.as_bytes());
    content.push(b'\n');
    atomic_write(path, &content)
}

fn atomic_write(path: &Path, content: &[u8]) -> KernelResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| io_error(&path.display().to_string(), e))?;
    tmp.write_all(content)
        .and_then(|()| tmp.flush())
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| io_error(&path.display().to_string(), e))?;
    tmp.persist(path)
        .map_err(|e| io_error(&path.display().to_string(), e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(event_id: &str, event_type: &str, payload: serde_json::Value) -> EventDraft {
        EventDraft {
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            payload,
        }
    }

    #[test]
    fn happy_append_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        store.create_run("r1").unwrap();
        store.append_event("r1", draft("e-1", "RunStarted", serde_json::json!({}))).unwrap();
        store
            .append_event("r1", draft("e-2", "StepStarted", serde_json::json!({"stepId": "s1"})))
            .unwrap();

        let report = store.verify_run_chain("r1").unwrap();
        assert!(report.valid);
        assert_eq!(report.event_count, 2);
        assert!(report.failures.is_empty());
        assert_eq!(report.hashes.len(), 2);
        for hash in &report.hashes {
            assert_eq!(hash.len(), 64);
            assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn first_event_must_be_run_started() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        store.create_run("r1").unwrap();
        let err = store
            .append_event("r1", draft("e-1", "StepStarted", serde_json::json!({})))
            .unwrap_err();
        assert_eq!(err.code(), KernelErrorCode::FirstEventNotRunStarted);
    }

    #[test]
    fn duplicate_event_id_is_rejected_and_state_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        store.create_run("r1").unwrap();
        store.append_event("r1", draft("e-1", "RunStarted", serde_json::json!({}))).unwrap();
        let err = store
            .append_event("r1", draft("e-1", "StepStarted", serde_json::json!({})))
            .unwrap_err();
        assert_eq!(err.code(), KernelErrorCode::EventIdConflict);

        let records = store.load_run("r1").unwrap();
        assert_eq!(records.len(), 1, "rejected append must not be persisted");
    }

    #[test]
    fn append_to_unknown_run_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        let err = store
            .append_event("ghost", draft("e-1", "RunStarted", serde_json::json!({})))
            .unwrap_err();
        assert_eq!(err.code(), KernelErrorCode::SessionNotFound);
    }

    #[test]
    fn tamper_detection_reports_hash_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        store.create_run("r1").unwrap();
        store.append_event("r1", draft("e-1", "RunStarted", serde_json::json!({}))).unwrap();
        store
            .append_event("r1", draft("e-2", "StepStarted", serde_json::json!({"stepId": "s1"})))
            .unwrap();

        let path = dir.path().join("r1.jsonl");
        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = content.lines().map(String::from).collect();
        let mut tampered: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
        tampered["payload"] = serde_json::json!({"tampered": true});
        lines[1] = serde_json::to_string(&tampered).unwrap();
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();

        let report = store.verify_run_chain("r1").unwrap();
        assert!(!report.valid);
        assert!(report.failures.iter().any(|f| f.seq == 2 && f.reason == ChainFailureReason::HashMismatch));
    }

    #[test]
    fn seq_gap_and_hash_mismatch_are_both_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        store.create_run("r1").unwrap();
        store.append_event("r1", draft("e-1", "RunStarted", serde_json::json!({}))).unwrap();
        store.append_event("r1", draft("e-2", "StepStarted", serde_json::json!({}))).unwrap();

        let path = dir.path().join("r1.jsonl");
        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = content.lines().map(String::from).collect();
        let mut tampered: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
        tampered["seq"] = serde_json::json!(5);
        lines[1] = serde_json::to_string(&tampered).unwrap();
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();

        let report = store.verify_run_chain("r1").unwrap();
        assert!(!report.valid);
        assert!(report.failures.iter().any(|f| f.reason == ChainFailureReason::SeqGap));
        assert!(report.failures.iter().any(|f| f.reason == ChainFailureReason::HashMismatch));
    }

    #[test]
    fn prev_hash_mismatch_is_detected_independently_of_hash_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        store.create_run("r1").unwrap();
        store.append_event("r1", draft("e-1", "RunStarted", serde_json::json!({}))).unwrap();
        store.append_event("r1", draft("e-2", "StepStarted", serde_json::json!({}))).unwrap();

        let path = dir.path().join("r1.jsonl");
        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = content.lines().map(String::from).collect();
        let mut tampered: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
        tampered["prevHash"] = serde_json::json!("f".repeat(64));
        lines[1] = serde_json::to_string(&tampered).unwrap();
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();

        let report = store.verify_run_chain("r1").unwrap();
        assert!(!report.valid);
        assert!(
            report
                .failures
                .iter()
                .any(|f| f.seq == 2 && f.reason == ChainFailureReason::PrevHashMismatch)
        );
        // prevHash is excluded from the hash computation, so tampering it
        // alone must not also trip a hash mismatch.
        assert!(!report.failures.iter().any(|f| f.reason == ChainFailureReason::HashMismatch));
    }

    #[test]
    fn reopening_a_store_rebuilds_state_and_rejects_further_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = EventStore::new(dir.path());
            store.create_run("r1").unwrap();
            store.append_event("r1", draft("e-1", "RunStarted", serde_json::json!({}))).unwrap();
        }
        let reopened = EventStore::new(dir.path());
        reopened.create_run("r1").unwrap();
        let err = reopened
            .append_event("r1", draft("e-1", "Irrelevant", serde_json::json!({})))
            .unwrap_err();
        assert_eq!(err.code(), KernelErrorCode::EventIdConflict);

        let record = reopened
            .append_event("r1", draft("e-2", "StepStarted", serde_json::json!({})))
            .unwrap();
        assert_eq!(record.seq, 2);
    }

    #[test]
    fn events_by_type_and_by_event_id_filter_correctly() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        store.create_run("r1").unwrap();
        store.append_event("r1", draft("e-1", "RunStarted", serde_json::json!({}))).unwrap();
        store.append_event("r1", draft("e-2", "StepStarted", serde_json::json!({}))).unwrap();
        store.append_event("r1", draft("e-3", "StepStarted", serde_json::json!({}))).unwrap();

        assert_eq!(store.events_by_type("r1", "StepStarted").unwrap().len(), 2);
        assert_eq!(store.events_by_type("r1", "RunStarted").unwrap().len(), 1);
        assert!(store.find_by_event_id("r1", "e-2").unwrap().is_some());
        assert!(store.find_by_event_id("r1", "e-404").unwrap().is_none());
    }

    #[test]
    fn invalid_run_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        assert!(store.create_run("../escape").is_err());
        assert!(store.create_run("").is_err());
    }
}
