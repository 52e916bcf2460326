// SPDX-License-Identifier: MIT OR Apache-2.0
//! Loads the fixed-filename session directory (§6.1) into a freshly opened
//! [`gk_kernel::Kernel`] by replaying its artifacts through the ordinary
//! `record_*` transaction sequence.
//!
//! The directory is an *interface*, not Kernel-owned state (§6.1): every
//! filename here is part of the stability contract, not an implementation
//! choice of this CLI. Two artifact kinds the directory format does not
//! name a file for — `PatchApplyReport`, raw `Policy` — are simply absent
//! from the resulting session; callers that need them record them through
//! the library directly.

use anyhow::{Context, Result};
use gk_artifacts::{
    ApprovalBundle, ApprovalPolicy, DecisionLock, DefinitionOfDone, ExecutionPlan, PatchArtifact,
    PromptCapsule, RepoSnapshot, ReviewerReport, RunnerAttestation, RunnerEvidence, RunnerIdentity,
    SessionAnchor, StepPacket, SymbolIndex,
};
use gk_core::Actor;
use gk_kernel::Kernel;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// The session directory's own `session.json`, naming the session UUID the
/// rest of the directory's artifacts belong to.
#[derive(Debug, serde::Deserialize)]
struct SessionMarker {
    #[serde(rename = "sessionId")]
    session_id: Uuid,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read '{}'", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parse JSON from '{}'", path.display()))
}

fn read_optional<T: DeserializeOwned>(dir: &Path, filename: &str) -> Result<Option<T>> {
    let path = dir.join(filename);
    if path.is_file() {
        Ok(Some(read_json(&path)?))
    } else {
        Ok(None)
    }
}

/// Lists every filename directly under `dir` matching `pattern`, sorted so
/// replay order is deterministic across platforms.
fn matching_files(dir: &Path, pattern: &Regex) -> Result<Vec<PathBuf>> {
    let mut matches = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("read directory '{}'", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if pattern.is_match(&name) {
            matches.push(entry.path());
        }
    }
    matches.sort();
    Ok(matches)
}

/// Reads `dir`'s `session.json` and returns the session UUID it names,
/// without loading anything else.
pub fn read_session_id(dir: &Path) -> Result<Uuid> {
    let marker: SessionMarker = read_json(&dir.join("session.json"))?;
    Ok(marker.session_id)
}

/// Replays every artifact found in `dir` (§6.1's fixed filenames) into
/// `kernel` via the ordinary `record_*` sequence, in the dependency order
/// the Kernel itself requires. Missing optional files are skipped; a
/// missing `DefinitionOfDone`/`DecisionLock`/`ExecutionPlan`/`RepoSnapshot`
/// surfaces as whatever `KernelError` the first dependent `record_*` call
/// raises, same as it would for any other caller.
///
/// # Errors
/// Propagates the first `KernelError` any `record_*` call raises, or an
/// I/O/parse failure reading a file under `dir`.
pub fn load_into_kernel(kernel: &Kernel, dir: &Path) -> Result<Uuid> {
    let session_id = read_session_id(dir)?;

    if let Some(dod) = read_optional::<DefinitionOfDone>(dir, "dod.json")? {
        kernel.record_dod(session_id, dod).context("record DefinitionOfDone")?;
    }
    if let Some(lock) = read_optional::<DecisionLock>(dir, "decision-lock.json")? {
        kernel.record_decision_lock(session_id, lock).context("record DecisionLock")?;
    }
    if let Some(plan) = read_optional::<ExecutionPlan>(dir, "execution-plan.json")? {
        kernel.record_execution_plan(session_id, plan).context("record ExecutionPlan")?;
    }
    if let Some(snapshot) = read_optional::<RepoSnapshot>(dir, "repo-snapshot.json")? {
        kernel.record_repo_snapshot(session_id, snapshot).context("record RepoSnapshot")?;
    }
    if let Some(index) = read_optional::<SymbolIndex>(dir, "symbol-index.json")? {
        kernel.record_symbol_index(session_id, index).context("record SymbolIndex")?;
    }
    if let Some(capsule) = read_optional::<PromptCapsule>(dir, "prompt-capsule.json")? {
        kernel.record_prompt_capsule(session_id, capsule).context("record PromptCapsule")?;
    }
    if let Some(identity) = read_optional::<RunnerIdentity>(dir, "runner-identity.json")? {
        kernel.record_runner_identity(session_id, identity).context("record RunnerIdentity")?;
    }

    let evidence_pattern = Regex::new(r"^runner-evidence(-\d+)?\.json$").expect("static regex");
    for path in matching_files(dir, &evidence_pattern)? {
        let evidence: RunnerEvidence = read_json(&path)?;
        kernel.record_runner_evidence(session_id, evidence).context("record RunnerEvidence")?;
    }

    let step_packet_pattern = Regex::new(r"^step-packet-(.+)\.json$").expect("static regex");
    for path in matching_files(dir, &step_packet_pattern)? {
        let packet: StepPacket = read_json(&path)?;
        kernel.record_step_packet(session_id, packet).context("record StepPacket")?;
    }

    let patch_pattern = Regex::new(r"^patch-(.+)\.json$").expect("static regex");
    for path in matching_files(dir, &patch_pattern)? {
        let patch: PatchArtifact = read_json(&path)?;
        kernel.record_patch_artifact(session_id, patch).context("record PatchArtifact")?;
    }

    let reviewer_pattern = Regex::new(r"^reviewer-(.+)-(.+)\.json$").expect("static regex");
    for path in matching_files(dir, &reviewer_pattern)? {
        let report: ReviewerReport = read_json(&path)?;
        kernel.record_reviewer_report(session_id, report).context("record ReviewerReport")?;
    }

    if let Some(attestation) = read_optional::<RunnerAttestation>(dir, "runner-attestation.json")? {
        kernel.record_runner_attestation(session_id, attestation).context("record RunnerAttestation")?;
    }
    if let Some(policy) = read_optional::<ApprovalPolicy>(dir, "approval-policy.json")? {
        kernel.record_approval_policy(session_id, policy).context("record ApprovalPolicy")?;
    }
    if let Some(bundle) = read_optional::<ApprovalBundle>(dir, "approval-bundle.json")? {
        kernel.record_approval_bundle(session_id, bundle).context("record ApprovalBundle")?;
    }
    if let Some(anchor) = read_optional::<SessionAnchor>(dir, "session-anchor.json")? {
        kernel.record_session_anchor(session_id, anchor).context("record SessionAnchor")?;
    }

    Ok(session_id)
}

/// Opens an ephemeral [`gk_kernel::Kernel`] backed by fresh temporary store
/// directories. `seal`/`verify-seal`/`replay` only need the Kernel as
/// scratch space to re-run the ordinary binding checks over a
/// self-contained session directory; nothing they produce needs to
/// outlive the CLI invocation.
pub fn open_scratch_kernel(tempdir: &Path) -> Result<Kernel> {
    let mut config = gk_config::KernelConfig::default();
    config.event_store_root = Some(tempdir.join("events").to_string_lossy().into_owned());
    config.artifact_store_root = Some(tempdir.join("artifacts").to_string_lossy().into_owned());
    Kernel::open(config).context("open scratch Kernel")
}

/// Resolves `bundle_dir_or_zip` to a directory `load_into_kernel` can read:
/// if it is already a directory, returns it unchanged; if it names a
/// `.zip` file, extracts it into a fresh subdirectory of `scratch_dir` and
/// returns that instead.
pub fn resolve_session_dir(bundle_dir_or_zip: &Path, scratch_dir: &Path) -> Result<PathBuf> {
    if bundle_dir_or_zip.is_dir() {
        return Ok(bundle_dir_or_zip.to_path_buf());
    }

    let file = std::fs::File::open(bundle_dir_or_zip)
        .with_context(|| format!("open '{}'", bundle_dir_or_zip.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("'{}' is not a directory or a valid zip archive", bundle_dir_or_zip.display()))?;

    let extracted = scratch_dir.join("extracted");
    std::fs::create_dir_all(&extracted)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(enclosed) = entry.enclosed_name() else {
            anyhow::bail!("zip entry '{}' has an unsafe path", entry.name());
        };
        let dest = extracted.join(enclosed);
        if entry.is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = std::fs::File::create(&dest)?;
            std::io::copy(&mut entry, &mut out)?;
        }
    }
    Ok(extracted)
}

/// The default actor stamped on artifacts this CLI itself creates (none at
/// present — every `record_*` artifact arrives from the session directory
/// already built — kept for the operations that do still need one, like
/// [`gk_kernel::Kernel::seal_session`]).
#[must_use]
pub fn cli_actor() -> Actor {
    Actor::new("kernel-verify", gk_core::ActorType::System).expect("static actor id is valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use gk_artifacts::{
        DecisionLockStatus, DodItem, ExecutionStep, NonExecutableGuarantees, SelfHashing,
        VerificationMethod,
    };
    use gk_error::KernelErrorCode;

    fn actor() -> Actor {
        Actor::system("gk-cli-tests").unwrap()
    }

    fn write_json(dir: &Path, filename: &str, value: &impl serde::Serialize) {
        let body = serde_json::to_string_pretty(value).unwrap();
        std::fs::write(dir.join(filename), body).unwrap();
    }

    fn dod(session_id: Uuid) -> DefinitionOfDone {
        let mut dod = DefinitionOfDone {
            meta: gk_core::ArtifactMeta::stamp(actor()),
            session_id,
            title: "Ship feature X".into(),
            items: vec![DodItem {
                id: "i1".into(),
                description: "tests pass".into(),
                method: VerificationMethod::CommandExitCode {
                    verification_command: "pnpm test".into(),
                    expected_exit_code: 0,
                },
                not_done_conditions: vec![],
            }],
            hash: String::new(),
        };
        dod.stamp_hash().unwrap();
        dod
    }

    fn lock(dod: &DefinitionOfDone) -> DecisionLock {
        let mut lock = DecisionLock {
            meta: gk_core::ArtifactMeta::stamp(actor()),
            dod_id: dod.meta.id,
            dod_hash: dod.hash.clone(),
            goal: "Ship feature X".into(),
            non_goals: vec!["perf".into()],
            interfaces: vec![],
            invariants: vec!["no plaintext passwords".into()],
            constraints: vec![],
            failure_modes: vec![],
            risks_and_tradeoffs: vec![],
            status: DecisionLockStatus::Approved,
            plan_hash: None,
            hash: String::new(),
        };
        lock.stamp_hash().unwrap();
        lock
    }

    fn plan(lock: &DecisionLock, dod: &DefinitionOfDone) -> ExecutionPlan {
        let mut plan = ExecutionPlan {
            meta: gk_core::ArtifactMeta::stamp(actor()),
            lock_id: lock.meta.id,
            lock_hash: lock.hash.clone(),
            dod_id: dod.meta.id,
            dod_hash: dod.hash.clone(),
            goal: lock.goal.clone(),
            steps: vec![ExecutionStep {
                step_id: "s1".into(),
                references: vec!["i1".into()],
                required_capabilities: vec![],
                description: "apply the change".into(),
            }],
            allowed_capabilities: vec![],
            non_executable_guarantees: NonExecutableGuarantees::default(),
            completion_criteria: vec!["all tests pass".into()],
            hash: String::new(),
        };
        plan.stamp_hash().unwrap();
        plan
    }

    fn snapshot(session_id: Uuid) -> RepoSnapshot {
        let mut snapshot = RepoSnapshot {
            meta: gk_core::ArtifactMeta::stamp(actor()),
            session_id,
            included_files: vec![],
            root_descriptor: "git:abc123".into(),
            hash: String::new(),
        };
        snapshot.stamp_hash().unwrap();
        snapshot
    }

    fn scratch_kernel() -> (tempfile::TempDir, Kernel) {
        let tmp = tempfile::tempdir().unwrap();
        let kernel = open_scratch_kernel(tmp.path()).unwrap();
        (tmp, kernel)
    }

    #[test]
    fn loads_a_minimal_session_directory() {
        let session_id = Uuid::new_v4();
        let dir = tempfile::tempdir().unwrap();
        write_json(dir.path(), "session.json", &serde_json::json!({ "sessionId": session_id }));

        let dod = dod(session_id);
        let lock = lock(&dod);
        let plan = plan(&lock, &dod);
        let snapshot = snapshot(session_id);
        write_json(dir.path(), "dod.json", &dod);
        write_json(dir.path(), "decision-lock.json", &lock);
        write_json(dir.path(), "execution-plan.json", &plan);
        write_json(dir.path(), "repo-snapshot.json", &snapshot);

        let (_tmp, kernel) = scratch_kernel();
        let loaded_id = load_into_kernel(&kernel, dir.path()).unwrap();
        assert_eq!(loaded_id, session_id);
        assert!(kernel.session(session_id).unwrap().plan.is_some());
    }

    #[test]
    fn session_id_comes_from_session_json_even_without_other_files() {
        let session_id = Uuid::new_v4();
        let dir = tempfile::tempdir().unwrap();
        write_json(dir.path(), "session.json", &serde_json::json!({ "sessionId": session_id }));

        assert_eq!(read_session_id(dir.path()).unwrap(), session_id);
    }

    #[test]
    fn execution_plan_without_a_recorded_lock_surfaces_lock_missing() {
        let session_id = Uuid::new_v4();
        let dir = tempfile::tempdir().unwrap();
        write_json(dir.path(), "session.json", &serde_json::json!({ "sessionId": session_id }));

        let dod = dod(session_id);
        let lock = lock(&dod);
        let plan = plan(&lock, &dod);
        // decision-lock.json is deliberately omitted: dod.json alone opens
        // the session, so execution-plan.json reaches record_execution_plan's
        // own LOCK_MISSING check rather than failing earlier on
        // SESSION_NOT_FOUND.
        write_json(dir.path(), "dod.json", &dod);
        write_json(dir.path(), "execution-plan.json", &plan);

        let (_tmp, kernel) = scratch_kernel();
        let err = load_into_kernel(&kernel, dir.path()).unwrap_err();
        let kernel_err = err
            .downcast_ref::<gk_error::KernelError>()
            .expect("error chain should carry the underlying KernelError");
        assert_eq!(kernel_err.code(), KernelErrorCode::LockMissing);
    }
}
