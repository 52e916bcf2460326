// SPDX-License-Identifier: MIT OR Apache-2.0
//! `RunnerIdentity` (§3.2): the identity and public key of the runner
//! executing a session's steps, used to verify `RunnerAttestation`
//! signatures.

use crate::support::{is_sha256_hex, require};
use gk_core::ArtifactMeta;
use gk_error::{KernelError, KernelErrorCode};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The identity and public key of a runner (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunnerIdentity {
    /// Universal artifact fields (§3.1).
    #[serde(flatten)]
    pub meta: ArtifactMeta,
    /// Stable identifier for this runner.
    #[serde(rename = "runnerId")]
    pub runner_id: String,
    /// Runner software version.
    pub version: String,
    /// The runner's public key, PEM-encoded (PKCS#1 or PKCS#8 RSA).
    #[serde(rename = "publicKey")]
    pub public_key: String,
    /// SHA-256 hex digest fingerprinting the runner's execution
    /// environment.
    #[serde(rename = "environmentFingerprint")]
    pub environment_fingerprint: String,
    /// SHA-256 hex digest of the runner build artifact.
    #[serde(rename = "buildHash")]
    pub build_hash: String,
    /// The capability set this runner was configured with at startup.
    #[serde(rename = "allowedCapabilitiesSnapshot")]
    pub allowed_capabilities_snapshot: Vec<String>,
    /// Self-hash: `hash(canonical(self ∖ hash))`.
    pub hash: String,
}

crate::impl_self_hashing!(RunnerIdentity);

impl RunnerIdentity {
    /// Structural validation: universal fields, non-empty
    /// `runnerId`/`version`, a parseable PEM public key, valid
    /// `environmentFingerprint`/`buildHash` digests, and a non-empty
    /// capability snapshot.
    pub fn validate(&self) -> Result<(), KernelError> {
        self.meta.validate()?;
        require(!self.runner_id.is_empty(), "runnerId must not be empty")?;
        require(!self.version.is_empty(), "version must not be empty")?;
        require(
            !self.allowed_capabilities_snapshot.is_empty(),
            "allowedCapabilitiesSnapshot must not be empty",
        )?;
        require(
            is_sha256_hex(&self.environment_fingerprint),
            "environmentFingerprint must be a SHA-256 hex digest",
        )?;
        require(is_sha256_hex(&self.build_hash), "buildHash must be a SHA-256 hex digest")?;

        gk_crypto::parse_public_key(&self.public_key).map_err(|e| {
            KernelError::new(KernelErrorCode::RunnerIdentityInvalid, format!("publicKey invalid: {e}"))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gk_core::Actor;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::{RsaPrivateKey, RsaPublicKey};

    fn sample() -> RunnerIdentity {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public_key = RsaPublicKey::from(&private_key);
        let pem = public_key
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .unwrap();

        let mut identity = RunnerIdentity {
            meta: ArtifactMeta::stamp(Actor::system("gk-kernel").unwrap()),
            runner_id: "runner-1".into(),
            version: "1.0.0".into(),
            public_key: pem,
            environment_fingerprint: "a".repeat(64),
            build_hash: "b".repeat(64),
            allowed_capabilities_snapshot: vec!["read_file".into()],
            hash: String::new(),
        };
        identity.stamp_hash().unwrap();
        identity
    }

    #[test]
    fn valid_identity_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn malformed_public_key_is_rejected() {
        let mut identity = sample();
        identity.public_key = "not a pem key".into();
        assert!(identity.validate().is_err());
    }

    #[test]
    fn empty_capability_snapshot_is_rejected() {
        let mut identity = sample();
        identity.allowed_capabilities_snapshot.clear();
        assert!(identity.validate().is_err());
    }
}
