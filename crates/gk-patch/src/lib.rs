// SPDX-License-Identifier: MIT OR Apache-2.0
//! The patch apply prover (C11, §4.11): pure in-memory unified-diff
//! hunk parsing and application. This component never shells out to a
//! diff/patch binary or version-control tool — hunk parsing and
//! application are implemented directly over in-memory strings, the way
//! `gk-codec` implements canonical JSON directly rather than delegating
//! to an external normalizer.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use gk_artifacts::{ChangeType, PatchApplyReport, PatchArtifact, PatchConflict, RepoSnapshot, SelfHashing};
use gk_core::Actor;
use gk_error::{KernelError, KernelErrorCode};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn hunk_header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("hunk header pattern compiles"))
}

#[derive(Debug, Clone)]
enum HunkLine {
    Context(String),
    Removed(String),
    Added(String),
}

#[derive(Debug, Clone)]
struct Hunk {
    old_start: usize,
    lines: Vec<HunkLine>,
}

fn parse_hunks(diff: &str) -> Result<Vec<Hunk>, String> {
    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;

    for raw_line in diff.lines() {
        if let Some(caps) = hunk_header_pattern().captures(raw_line) {
            if let Some(hunk) = current.take() {
                hunks.push(hunk);
            }
            let old_start: usize = caps[1].parse().map_err(|_| format!("malformed hunk header: '{raw_line}'"))?;
            current = Some(Hunk { old_start, lines: Vec::new() });
            continue;
        }
        let Some(hunk) = current.as_mut() else {
            if raw_line.trim().is_empty() {
                continue;
            }
            return Err(format!("diff content before any hunk header: '{raw_line}'"));
        };
        if let Some(rest) = raw_line.strip_prefix(' ') {
            hunk.lines.push(HunkLine::Context(rest.to_string()));
        } else if let Some(rest) = raw_line.strip_prefix('-') {
            hunk.lines.push(HunkLine::Removed(rest.to_string()));
        } else if let Some(rest) = raw_line.strip_prefix('+') {
            hunk.lines.push(HunkLine::Added(rest.to_string()));
        } else if raw_line.is_empty() {
            hunk.lines.push(HunkLine::Context(String::new()));
        } else {
            return Err(format!("unrecognized diff line: '{raw_line}'"));
        }
    }
    if let Some(hunk) = current.take() {
        hunks.push(hunk);
    }
    Ok(hunks)
}

/// Synthesizes the content of a newly created file from its diff: every
/// context and added line, in order, with removed lines rejected (a
/// `create` diff has nothing to remove; §4.11).
fn synthesize_created_content(diff: &str) -> Result<String, String> {
    let hunks = parse_hunks(diff)?;
    let mut lines = Vec::new();
    for hunk in &hunks {
        for line in &hunk.lines {
            match line {
                HunkLine::Context(text) | HunkLine::Added(text) => lines.push(text.clone()),
                HunkLine::Removed(_) => return Err("create diff must not remove lines".to_string()),
            }
        }
    }
    Ok(lines.join("\n"))
}

/// Applies a `modify` diff's hunks against `current`, verifying that
/// every context/removed line matches the indicated 1-based line number
/// exactly before substituting in the added lines (§4.11). Returns the
/// first mismatch encountered, if any, as `(line, reason)`.
fn apply_modify_hunks(current: &str, diff: &str) -> Result<String, (u32, String)> {
    let hunks = parse_hunks(diff).map_err(|e| (1, e))?;
    let original_lines: Vec<&str> = current.lines().collect();
    let mut result: Vec<String> = Vec::with_capacity(original_lines.len());
    let mut cursor = 0usize; // 0-based index into original_lines already emitted

    for hunk in &hunks {
        let hunk_start = hunk.old_start.saturating_sub(1);
        if hunk_start < cursor || hunk_start > original_lines.len() {
            return Err((hunk.old_start as u32, "hunk start is out of order or out of range".to_string()));
        }
        // carry forward unmodified lines before this hunk
        for line in &original_lines[cursor..hunk_start] {
            result.push((*line).to_string());
        }
        let mut old_cursor = hunk_start;
        for line in &hunk.lines {
            match line {
                HunkLine::Context(text) => {
                    let actual = original_lines.get(old_cursor);
                    if actual != Some(&text.as_str()) {
                        return Err((
                            (old_cursor + 1) as u32,
                            format!("context line mismatch: expected '{text}', found {actual:?}"),
                        ));
                    }
                    result.push(text.clone());
                    old_cursor += 1;
                }
                HunkLine::Removed(text) => {
                    let actual = original_lines.get(old_cursor);
                    if actual != Some(&text.as_str()) {
                        return Err((
                            (old_cursor + 1) as u32,
                            format!("removed line mismatch: expected '{text}', found {actual:?}"),
                        ));
                    }
                    old_cursor += 1;
                }
                HunkLine::Added(text) => {
                    result.push(text.clone());
                }
            }
        }
        cursor = old_cursor;
    }
    for line in &original_lines[cursor..] {
        result.push((*line).to_string());
    }
    Ok(result.join("\n"))
}

/// Verifies a `delete` change's exact-byte-match requirement (§4.11): a
/// non-empty delete diff declares the content being removed as
/// context/removed hunk lines (no `+` lines — a delete adds nothing), and
/// that reconstructed content must byte-for-byte match `current`, the
/// file's content per the supplied snapshot contents. An empty diff is the
/// conventional case for a delete (§4.11's doc note) and verifies trivially,
/// same as `allow_deletes` gating the change type itself.
fn verify_delete_content(current: &str, diff: &str) -> Result<(), String> {
    if diff.trim().is_empty() {
        return Ok(());
    }
    let hunks = parse_hunks(diff)?;
    let mut expected = Vec::new();
    for hunk in &hunks {
        for line in &hunk.lines {
            match line {
                HunkLine::Context(text) | HunkLine::Removed(text) => expected.push(text.clone()),
                HunkLine::Added(_) => return Err("delete diff must not add lines".to_string()),
            }
        }
    }
    let expected_content = expected.join("\n");
    if expected_content != current {
        return Err(format!(
            "delete content mismatch: expected {} byte(s), found {} byte(s)",
            expected_content.len(),
            current.len()
        ));
    }
    Ok(())
}

/// The outcome of [`apply_patch`]: the self-hashed [`PatchApplyReport`]
/// plus the new byte content for every file that applied cleanly, keyed
/// by repo-relative path — callers (e.g. the kernel facade) persist
/// these into the next `RepoSnapshot`; `gk-patch` itself never writes to
/// disk.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    /// The self-hashed apply report.
    pub report: PatchApplyReport,
    /// New content for every file that applied without conflict.
    pub new_contents: HashMap<String, Vec<u8>>,
}

/// Applies `patch` against `snapshot`'s declared file state (§4.11).
///
/// `expected_snapshot_hash` is the snapshot hash the patch was prepared
/// against (typically a `StepPacket.snapshotHash`); it is compared
/// against `snapshot.hash` up front as a hard precondition, distinct
/// from the enumerated, non-fatal per-file conflicts below.
///
/// `contents` supplies the current byte content for every file named in
/// `snapshot.includedFiles`, keyed by repo-relative path — `gk-patch`
/// never reads the filesystem itself.
///
/// For each `FileChange`:
/// - `create`: the path must be absent from `snapshot`; content is
///   synthesized from the diff's context/added lines.
/// - `modify`: the path must be present; context and removed lines must
///   match the current content exactly at the hunk's declared position.
/// - `delete`: disabled unless `allow_deletes` is `true`; the path's
///   current content must byte-for-byte match `patch`'s declared diff
///   (conventionally empty for a delete).
///
/// Conflicts are enumerated per file, never fatal; `applied` is
/// `conflicts.is_empty()`.
///
/// # Errors
/// Returns `PATCH_BASE_MISMATCH` if `expected_snapshot_hash` does not
/// match `snapshot.hash`, or propagates hash-stamping errors.
pub fn apply_patch(
    patch: &PatchArtifact,
    snapshot: &RepoSnapshot,
    expected_snapshot_hash: &str,
    contents: &HashMap<String, Vec<u8>>,
    allow_deletes: bool,
    created_by: Actor,
) -> Result<ApplyOutcome, KernelError> {
    if expected_snapshot_hash != snapshot.hash {
        return Err(KernelError::new(
            KernelErrorCode::PatchBaseMismatch,
            "patch was prepared against a different snapshot than the one supplied",
        )
        .with_detail("expectedSnapshotHash", expected_snapshot_hash)
        .with_detail("actualSnapshotHash", &snapshot.hash));
    }

    let existing_paths: std::collections::HashSet<&str> = snapshot.included_files.iter().map(|f| f.path.as_str()).collect();

    let mut conflicts = Vec::new();
    let mut touched_files = Vec::new();
    let mut new_contents = HashMap::new();

    for change in &patch.files_changed {
        match change.change_type {
            ChangeType::Create => {
                if existing_paths.contains(change.path.as_str()) {
                    conflicts.push(PatchConflict {
                        path: change.path.clone(),
                        line: 1,
                        reason: "create target already exists in snapshot".to_string(),
                    });
                    continue;
                }
                match synthesize_created_content(&change.diff) {
                    Ok(content) => {
                        new_contents.insert(change.path.clone(), content.into_bytes());
                        touched_files.push(change.path.clone());
                    }
                    Err(reason) => conflicts.push(PatchConflict { path: change.path.clone(), line: 1, reason }),
                }
            }
            ChangeType::Modify => {
                let Some(current_bytes) = contents.get(&change.path) else {
                    conflicts.push(PatchConflict {
                        path: change.path.clone(),
                        line: 1,
                        reason: "modify target has no current content supplied".to_string(),
                    });
                    continue;
                };
                let current = String::from_utf8_lossy(current_bytes);
                match apply_modify_hunks(&current, &change.diff) {
                    Ok(new_content) => {
                        new_contents.insert(change.path.clone(), new_content.into_bytes());
                        touched_files.push(change.path.clone());
                    }
                    Err((line, reason)) => conflicts.push(PatchConflict { path: change.path.clone(), line, reason }),
                }
            }
            ChangeType::Delete => {
                if !allow_deletes {
                    conflicts.push(PatchConflict {
                        path: change.path.clone(),
                        line: 1,
                        reason: "deletes are disabled for this apply".to_string(),
                    });
                    continue;
                }
                let Some(current_bytes) = contents.get(&change.path) else {
                    conflicts.push(PatchConflict {
                        path: change.path.clone(),
                        line: 1,
                        reason: "delete target has no current content supplied".to_string(),
                    });
                    continue;
                };
                let current = String::from_utf8_lossy(current_bytes);
                match verify_delete_content(&current, &change.diff) {
                    Ok(()) => touched_files.push(change.path.clone()),
                    Err(reason) => conflicts.push(PatchConflict { path: change.path.clone(), line: 1, reason }),
                }
            }
        }
    }

    conflicts.sort_by(|a, b| a.path.cmp(&b.path).then(a.line.cmp(&b.line)));
    touched_files.sort();
    let applied = conflicts.is_empty();

    let mut report = PatchApplyReport {
        meta: gk_core::ArtifactMeta::stamp(created_by),
        patch_hash: patch.hash.clone(),
        snapshot_hash: snapshot.hash.clone(),
        applied,
        touched_files,
        conflicts,
        hash: String::new(),
    };
    report.stamp_hash()?;
    Ok(ApplyOutcome { report, new_contents })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gk_artifacts::{FileChange, IncludedFile};
    use gk_core::ArtifactMeta;
    use uuid::Uuid;

    fn actor() -> Actor {
        Actor::system("gk-patch-tests").unwrap()
    }

    fn snapshot(files: &[(&str, &str)]) -> (RepoSnapshot, HashMap<String, Vec<u8>>) {
        let mut included = Vec::new();
        let mut contents = HashMap::new();
        for (path, content) in files {
            let hash = gk_codec::sha256_hex(content.as_bytes());
            included.push(IncludedFile { path: (*path).to_string(), content_hash: hash });
            contents.insert((*path).to_string(), content.as_bytes().to_vec());
        }
        let mut snap = RepoSnapshot {
            meta: ArtifactMeta::stamp(actor()),
            session_id: Uuid::new_v4(),
            included_files: included,
            root_descriptor: "rev:abc123".into(),
            hash: String::new(),
        };
        snap.stamp_hash().unwrap();
        (snap, contents)
    }

    fn patch_with(files: Vec<FileChange>) -> PatchArtifact {
        let mut patch = PatchArtifact {
            meta: ArtifactMeta::stamp(actor()),
            step_id: "s1".into(),
            session_id: Uuid::new_v4(),
            files_changed: files,
            declared_imports: vec![],
            hash: String::new(),
        };
        patch.stamp_hash().unwrap();
        patch
    }

    #[test]
    fn clean_modify_applies() {
        let (snap, contents) = snapshot(&[("src/lib.rs", "line1\nline2\nline3")]);
        let patch = patch_with(vec![FileChange {
            path: "src/lib.rs".into(),
            change_type: ChangeType::Modify,
            diff: "@@ -2,1 +2,1 @@\n-line2\n+line2-changed\n".into(),
        }]);
        let outcome = apply_patch(&patch, &snap, &snap.hash, &contents, false, actor()).unwrap();
        assert!(outcome.report.applied, "{:?}", outcome.report.conflicts);
        assert_eq!(
            String::from_utf8(outcome.new_contents["src/lib.rs"].clone()).unwrap(),
            "line1\nline2-changed\nline3"
        );
    }

    #[test]
    fn context_mismatch_is_a_conflict_not_fatal() {
        let (snap, contents) = snapshot(&[("src/lib.rs", "line1\nline2\nline3")]);
        let patch = patch_with(vec![FileChange {
            path: "src/lib.rs".into(),
            change_type: ChangeType::Modify,
            diff: "@@ -2,1 +2,1 @@\n-wrong-line\n+line2-changed\n".into(),
        }]);
        let outcome = apply_patch(&patch, &snap, &snap.hash, &contents, false, actor()).unwrap();
        assert!(!outcome.report.applied);
        assert_eq!(outcome.report.conflicts.len(), 1);
        assert!(outcome.report.conflicts[0].reason.contains("removed line mismatch"));
    }

    #[test]
    fn create_rejects_existing_path() {
        let (snap, contents) = snapshot(&[("src/lib.rs", "line1")]);
        let patch = patch_with(vec![FileChange {
            path: "src/lib.rs".into(),
            change_type: ChangeType::Create,
            diff: "@@ -0,0 +1,1 @@\n+hello\n".into(),
        }]);
        let outcome = apply_patch(&patch, &snap, &snap.hash, &contents, false, actor()).unwrap();
        assert!(!outcome.report.applied);
        assert!(outcome.report.conflicts[0].reason.contains("already exists"));
    }

    #[test]
    fn create_synthesizes_new_content() {
        let (snap, contents) = snapshot(&[]);
        let patch = patch_with(vec![FileChange {
            path: "src/new.rs".into(),
            change_type: ChangeType::Create,
            diff: "@@ -0,0 +1,2 @@\n+fn main() {}\n+\n".into(),
        }]);
        let outcome = apply_patch(&patch, &snap, &snap.hash, &contents, false, actor()).unwrap();
        assert!(outcome.report.applied);
        assert_eq!(String::from_utf8(outcome.new_contents["src/new.rs"].clone()).unwrap(), "fn main() {}\n");
    }

    #[test]
    fn delete_disabled_by_default() {
        let (snap, contents) = snapshot(&[("src/old.rs", "junk")]);
        let patch = patch_with(vec![FileChange {
            path: "src/old.rs".into(),
            change_type: ChangeType::Delete,
            diff: String::new(),
        }]);
        let outcome = apply_patch(&patch, &snap, &snap.hash, &contents, false, actor()).unwrap();
        assert!(!outcome.report.applied);
        assert!(outcome.report.conflicts[0].reason.contains("disabled"));
    }

    #[test]
    fn delete_allowed_when_enabled() {
        let (snap, contents) = snapshot(&[("src/old.rs", "junk")]);
        let patch = patch_with(vec![FileChange {
            path: "src/old.rs".into(),
            change_type: ChangeType::Delete,
            diff: String::new(),
        }]);
        let outcome = apply_patch(&patch, &snap, &snap.hash, &contents, true, actor()).unwrap();
        assert!(outcome.report.applied);
        assert_eq!(outcome.report.touched_files, vec!["src/old.rs".to_string()]);
    }

    #[test]
    fn delete_with_matching_declared_content_applies() {
        let (snap, contents) = snapshot(&[("src/old.rs", "line1\nline2")]);
        let patch = patch_with(vec![FileChange {
            path: "src/old.rs".into(),
            change_type: ChangeType::Delete,
            diff: "@@ -1,2 +0,0 @@\n-line1\n-line2\n".into(),
        }]);
        let outcome = apply_patch(&patch, &snap, &snap.hash, &contents, true, actor()).unwrap();
        assert!(outcome.report.applied, "{:?}", outcome.report.conflicts);
        assert_eq!(outcome.report.touched_files, vec!["src/old.rs".to_string()]);
    }

    #[test]
    fn delete_with_stale_declared_content_is_a_conflict() {
        let (snap, contents) = snapshot(&[("src/old.rs", "line1\nline2-tampered")]);
        let patch = patch_with(vec![FileChange {
            path: "src/old.rs".into(),
            change_type: ChangeType::Delete,
            diff: "@@ -1,2 +0,0 @@\n-line1\n-line2\n".into(),
        }]);
        let outcome = apply_patch(&patch, &snap, &snap.hash, &contents, true, actor()).unwrap();
        assert!(!outcome.report.applied);
        assert!(outcome.report.conflicts[0].reason.contains("delete content mismatch"));
        assert!(outcome.report.touched_files.is_empty());
    }

    #[test]
    fn snapshot_hash_mismatch_is_fatal() {
        let (snap, contents) = snapshot(&[("src/lib.rs", "line1")]);
        let patch = patch_with(vec![]);
        let err = apply_patch(&patch, &snap, "deadbeef", &contents, false, actor()).unwrap_err();
        assert_eq!(err.code(), KernelErrorCode::PatchBaseMismatch);
    }
}
