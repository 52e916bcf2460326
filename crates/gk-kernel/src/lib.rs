// SPDX-License-Identifier: MIT OR Apache-2.0
//! The governance kernel facade: wires the codec, crypto, event store,
//! artifact store, artifact DAG, binding verifier, gate, linters, reviewer
//! pipeline, policy engine, patch prover, replay verifier, bundle exporter,
//! and SCP builder (C1-C14) into the single `record*`/`sealSession`/
//! `replaySession` surface external callers use.
//!
//! Every artifact arrives from the caller already built and self-hashed
//! (§4's "artifacts are created outside the Kernel"); a `record_*` method
//! is always the same three-step transaction named in the design notes:
//! (1) the artifact's own structural/refinement validation, (2) hash-binding
//! verification against whatever this session has already persisted, (3)
//! an atomic commit to both stores plus the in-memory session index. No
//! method ever updates or deletes a previously persisted artifact.
//!
//! Modeled on `abp-daemon`'s `AppState`: a small set of long-lived handles
//! (here, `EventStore`/`ArtifactStore`/`KernelConfig`) plus an
//! `RwLock`-guarded index keyed by identifier, rebuilt from nothing but
//! constructor arguments rather than mutated via interior globals. Unlike
//! `AppState`, there is no `Arc`/Axum/async here: the Kernel is a plain
//! library type used synchronously, per the design notes' "no HTTP, no
//! daemon" non-goal.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod approval;
mod context;
mod planning;
mod policy;
mod runner;
mod seal;
mod session;
mod steps;

pub use session::SessionRecord;

use gk_artifacts::SelfHashing;
use gk_artifact_store::ArtifactStore;
use gk_config::KernelConfig;
use gk_core::{SessionStatus, SessionStatusInputs};
use gk_error::{KernelError, KernelErrorCode, KernelResult};
use gk_event_store::{EventDraft, EventStore};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// The event type every session's log begins with, matching
/// [`gk_event_store::RUN_STARTED_EVENT_TYPE`].
const RUN_STARTED_EVENT_TYPE: &str = gk_event_store::RUN_STARTED_EVENT_TYPE;

/// The governance kernel: owns the event store, artifact store, and
/// runtime configuration, and tracks one [`SessionRecord`] per session
/// UUID seen so far.
///
/// All operations are synchronous (§5 "no `async`/`tokio` in this
/// surface"). Concurrent sessions never contend with each other beyond the
/// single `sessions` index lock, which is held only for the duration of a
/// lookup or insert, never across a store I/O call.
pub struct Kernel {
    event_store: EventStore,
    artifact_store: ArtifactStore,
    config: KernelConfig,
    sessions: RwLock<HashMap<Uuid, SessionRecord>>,
}

impl Kernel {
    /// Opens a Kernel backed by `config`'s store roots.
    ///
    /// `KernelConfig::event_store_root`/`artifact_store_root` are `Option`
    /// because [`gk_config::validate_config`] treats their absence as a
    /// soft warning, not a hard error — that crate's job is to describe
    /// configuration, not to decide what a caller does with an
    /// unconfigured store. The Kernel is that caller, and it needs
    /// somewhere to write: a session with nowhere to persist its event
    /// log or artifacts cannot honor the append-only, replayable contract
    /// this crate exists for, so both roots are required here even though
    /// `gk-config` itself does not demand them.
    ///
    /// # Errors
    /// Returns [`KernelErrorCode::SchemaInvalid`] if either store root is
    /// unset, or propagates an I/O failure opening the artifact store.
    pub fn open(config: KernelConfig) -> KernelResult<Self> {
        let event_store_root = config.event_store_root.clone().ok_or_else(|| {
            KernelError::new(
                KernelErrorCode::SchemaInvalid,
                "eventStoreRoot must be configured to open a Kernel",
            )
        })?;
        let artifact_store_root = config.artifact_store_root.clone().ok_or_else(|| {
            KernelError::new(
                KernelErrorCode::SchemaInvalid,
                "artifactStoreRoot must be configured to open a Kernel",
            )
        })?;

        let event_store = EventStore::new(event_store_root);
        let artifact_store = ArtifactStore::open(artifact_store_root)?;

        Ok(Self {
            event_store,
            artifact_store,
            config,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the configuration this Kernel was opened with.
    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Returns a clone of the session's current cached state, if any
    /// artifact has been recorded for it.
    #[must_use]
    pub fn session(&self, session_id: Uuid) -> Option<SessionRecord> {
        self.sessions.read().expect("session index lock poisoned").get(&session_id).cloned()
    }

    /// Derives the session's current [`SessionStatus`] (§3.4) from its
    /// cached artifacts: whether an approved lock exists, whether the
    /// execution gate last evaluated `passed`, and whether a
    /// `SealedChangePackage` has been recorded. Status is never stored; it
    /// is always recomputed from what has actually been persisted.
    ///
    /// # Errors
    /// Returns [`KernelErrorCode::SessionNotFound`] if no artifact has ever
    /// been recorded for `session_id`.
    pub fn session_status(&self, session_id: Uuid) -> KernelResult<SessionStatus> {
        let record = self.require_session(session_id)?;
        Ok(gk_core::derive_session_status(SessionStatusInputs {
            has_approved_lock: record.lock.as_ref().is_some_and(gk_artifacts::DecisionLock::is_approved),
            gate_passed: record.gate_passed,
            has_sealed_package: record.sealed_change_package.is_some(),
        }))
    }

    /// Re-verifies `session_id`'s event chain (§4.3), delegating directly
    /// to [`EventStore::verify_run_chain`].
    ///
    /// # Errors
    /// Propagates [`KernelError`] if the run's log cannot be read.
    pub fn verify_run_chain(&self, session_id: Uuid) -> KernelResult<gk_event_store::ChainVerification> {
        self.event_store.verify_run_chain(&session_id.to_string())
    }

    // -- internal plumbing shared by every `record_*` method -------------

    fn require_session(&self, session_id: Uuid) -> KernelResult<SessionRecord> {
        self.sessions
            .read()
            .expect("session index lock poisoned")
            .get(&session_id)
            .cloned()
            .ok_or_else(|| {
                KernelError::new(KernelErrorCode::SessionNotFound, "no artifact has been recorded for this session")
                    .with_detail("sessionId", session_id.to_string())
            })
    }

    /// Registers `session_id`'s run if this is the first artifact recorded
    /// for it, appending the mandatory `RunStarted` event.
    fn ensure_session(&self, session_id: Uuid) -> KernelResult<()> {
        let run_id = session_id.to_string();
        let already_known = self.sessions.read().expect("session index lock poisoned").contains_key(&session_id);
        if already_known {
            return Ok(());
        }

        self.event_store.create_run(&run_id)?;
        self.event_store.append_event(
            &run_id,
            EventDraft {
                event_id: format!("{session_id}:run-started"),
                event_type: RUN_STARTED_EVENT_TYPE.to_string(),
                payload: serde_json::json!({ "sessionId": session_id }),
            },
        )?;

        self.sessions
            .write()
            .expect("session index lock poisoned")
            .entry(session_id)
            .or_insert_with(|| SessionRecord::new(session_id));
        Ok(())
    }

    /// Persists one artifact: canonicalizes it into the content-addressed
    /// artifact store, then appends a matching event carrying the same
    /// bytes as its payload. `event_id` must be unique within the
    /// session's run (every artifact's own `meta.id` satisfies this).
    fn persist_artifact<T: SelfHashing>(
        &self,
        session_id: Uuid,
        event_id: &str,
        event_type: &str,
        label: &str,
        artifact: &T,
    ) -> KernelResult<()> {
        let bytes = gk_codec::canonicalize(artifact)
            .map_err(|e| KernelError::new(KernelErrorCode::SchemaInvalid, format!("canonicalization failed: {e}")))?;
        self.artifact_store.put(&bytes, "application/json", label)?;

        let payload = serde_json::to_value(artifact)
            .map_err(|e| KernelError::new(KernelErrorCode::SchemaInvalid, format!("serialization failed: {e}")))?;
        self.event_store.append_event(
            &session_id.to_string(),
            EventDraft { event_id: event_id.to_string(), event_type: event_type.to_string(), payload },
        )?;
        tracing::info!(target: "gk_kernel", %session_id, event_type, "artifact recorded");
        Ok(())
    }

    fn mutate_session<R>(&self, session_id: Uuid, f: impl FnOnce(&mut SessionRecord) -> R) -> KernelResult<R> {
        let mut sessions = self.sessions.write().expect("session index lock poisoned");
        let record = sessions.get_mut(&session_id).ok_or_else(|| {
            KernelError::new(KernelErrorCode::SessionNotFound, "no artifact has been recorded for this session")
                .with_detail("sessionId", session_id.to_string())
        })?;
        Ok(f(record))
    }
}

/// Raises [`KernelErrorCode::IdMismatch`] if `artifact`'s stored self-hash
/// does not match what it recomputes to; used at the top of every
/// `record_*` method before any cross-binding check runs, since a
/// binding check against an artifact whose own hash is already wrong
/// would only compound the confusion.
fn require_self_hash_valid<T: SelfHashing>(name: &str, artifact: &T) -> KernelResult<()> {
    if artifact.verify_self_hash()? {
        Ok(())
    } else {
        Err(KernelError::new(KernelErrorCode::IdMismatch, format!("{name} self-hash does not match its recomputed value"))
            .with_detail("artifact", name))
    }
}

/// Raises the binding report's first failure (already a properly-coded
/// `KernelError`, typically `ID_MISMATCH`) if `report` did not pass;
/// otherwise succeeds. Artifact `validate()` methods already return their
/// own specific `KernelErrorCode` (e.g. `RUNNER_IDENTITY_INVALID`), so
/// unlike binding checks those are propagated via `?` directly rather than
/// rewrapped here.
fn require_binding(report: gk_binding::BindingReport) -> KernelResult<()> {
    if report.passed {
        Ok(())
    } else {
        Err(report.first_error().unwrap_or_else(|| KernelError::new(KernelErrorCode::IdMismatch, "binding verification failed")))
    }
}

pub(crate) use require_binding as binding_ok;
pub(crate) use require_self_hash_valid as self_hash_ok;
