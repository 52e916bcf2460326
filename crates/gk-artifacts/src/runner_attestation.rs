// SPDX-License-Identifier: MIT OR Apache-2.0
//! `RunnerAttestation` (§3.2): a runner's signed claim that it executed a
//! specific plan under a specific lock, ending at a specific evidence
//! chain tail.

use crate::support::{is_sha256_hex, require};
use gk_core::ArtifactMeta;
use gk_error::{KernelError, KernelErrorCode};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The signature algorithm every `RunnerAttestation` must declare (§3.2).
pub const SIGNATURE_ALGORITHM: &str = "RSA-SHA256";

/// The fields a `RunnerAttestation`'s signature covers, canonicalized and
/// signed independently of the attestation's own self-hash.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct AttestationPayload<'a> {
    #[serde(rename = "planHash")]
    plan_hash: &'a str,
    #[serde(rename = "lockId")]
    lock_id: Uuid,
    #[serde(rename = "identityHash")]
    identity_hash: &'a str,
    #[serde(rename = "evidenceChainTailHash")]
    evidence_chain_tail_hash: &'a str,
    nonce: &'a str,
}

/// A runner's signed claim to have executed a plan (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunnerAttestation {
    /// Universal artifact fields (§3.1).
    #[serde(flatten)]
    pub meta: ArtifactMeta,
    /// Self-hash of the `ExecutionPlan` attested to.
    #[serde(rename = "planHash")]
    pub plan_hash: String,
    /// Identity of the `DecisionLock` the plan was built against.
    #[serde(rename = "lockId")]
    pub lock_id: Uuid,
    /// Self-hash of the bound `RunnerIdentity`.
    #[serde(rename = "identityHash")]
    pub identity_hash: String,
    /// Self-hash of the last `RunnerEvidence` item in the run's chain.
    #[serde(rename = "evidenceChainTailHash")]
    pub evidence_chain_tail_hash: String,
    /// Single-use value preventing signature replay across attestations.
    pub nonce: String,
    /// Base64-encoded RSA-SHA256 signature over the canonicalized
    /// `{planHash, lockId, identityHash, evidenceChainTailHash, nonce}`.
    pub signature: String,
    /// Must equal [`SIGNATURE_ALGORITHM`].
    #[serde(rename = "signatureAlgorithm")]
    pub signature_algorithm: String,
    /// Self-hash: `hash(canonical(self ∖ hash))`.
    pub hash: String,
}

crate::impl_self_hashing!(RunnerAttestation);

impl RunnerAttestation {
    fn payload(&self) -> AttestationPayload<'_> {
        AttestationPayload {
            plan_hash: &self.plan_hash,
            lock_id: self.lock_id,
            identity_hash: &self.identity_hash,
            evidence_chain_tail_hash: &self.evidence_chain_tail_hash,
            nonce: &self.nonce,
        }
    }

    /// Structural validation: universal fields, bound-hash shapes,
    /// non-empty `nonce`, and `signatureAlgorithm == RSA-SHA256`.
    pub fn validate(&self) -> Result<(), KernelError> {
        self.meta.validate()?;
        require(is_sha256_hex(&self.plan_hash), "planHash must be a SHA-256 hex digest")?;
        require(is_sha256_hex(&self.identity_hash), "identityHash must be a SHA-256 hex digest")?;
        require(
            is_sha256_hex(&self.evidence_chain_tail_hash),
            "evidenceChainTailHash must be a SHA-256 hex digest",
        )?;
        require(!self.nonce.is_empty(), "nonce must not be empty")?;
        require(
            self.signature_algorithm == SIGNATURE_ALGORITHM,
            format!("signatureAlgorithm must equal '{SIGNATURE_ALGORITHM}'"),
        )?;
        require(!self.signature.is_empty(), "signature must not be empty")?;
        Ok(())
    }

    /// Verifies `signature` against `public_key_pem` over the canonicalized
    /// attestation payload. Returns `Ok(false)` on a bad signature, `Err`
    /// only for a malformed key or payload.
    pub fn verify_signature(&self, public_key_pem: &str) -> Result<bool, KernelError> {
        let payload_bytes = gk_codec::canonicalize(&self.payload()).map_err(|e| {
            KernelError::new(KernelErrorCode::SchemaInvalid, format!("canonicalization failed: {e}"))
        })?;
        gk_crypto::verify_rsa_sha256(&payload_bytes, &self.signature, public_key_pem)
            .map_err(|e| KernelError::new(KernelErrorCode::CryptoKeyInvalid, e.to_string()))
    }
}
