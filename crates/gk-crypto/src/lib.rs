// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cryptographic primitives for the governance kernel (§4.2): SHA-256
//! hex digests and RSA-SHA256 signing/verification over PEM keys.
//!
//! There is no counterpart to RSA-SHA256 signing anywhere in the
//! reference corpus (the closest analog signs with Ed25519); this crate
//! brings in the RustCrypto `rsa`/`pkcs1`/`pkcs8` family specifically to
//! satisfy the `RunnerAttestation.signatureAlgorithm ≡ "RSA-SHA256"`
//! requirement (§3.2).
#![deny(unsafe_code)]
#![warn(missing_docs)]

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::fmt;

/// Errors from the crypto primitives. Key parsing failures always surface
/// as [`CryptoError::KeyInvalid`]; signature verification never panics or
/// raises — it returns `Ok(false)` (see [`verify_rsa_sha256`]).
#[derive(Debug)]
pub enum CryptoError {
    /// The supplied PEM text could not be parsed as an RSA key in either
    /// PKCS#1 or PKCS#8 form, or is otherwise unfit for signing/verifying.
    KeyInvalid(String),
    /// Signing failed for a reason other than key parsing (e.g. the key is
    /// too small for the payload digest).
    SigningFailed(String),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyInvalid(msg) => write!(f, "invalid RSA key: {msg}"),
            Self::SigningFailed(msg) => write!(f, "RSA signing failed: {msg}"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// The only signature algorithm the kernel recognizes, matching
/// `RunnerAttestation.signatureAlgorithm` (§3.2).
pub const SIGNATURE_ALGORITHM: &str = "RSA-SHA256";

/// Hex-encode the SHA-256 digest of `bytes` as 64 lowercase hex characters.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Parses a PEM-encoded RSA private key, trying PKCS#8 then falling back
/// to PKCS#1.
///
/// # Errors
///
/// Returns [`CryptoError::KeyInvalid`] if `pem` is neither form.
pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, CryptoError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::KeyInvalid(e.to_string()))
}

/// Parses a PEM-encoded RSA public key, trying PKCS#8/SPKI then falling
/// back to PKCS#1. Exposed so artifact validators (`RunnerIdentity`) can
/// confirm a declared `publicKey` is well-formed without performing a
/// signature operation.
///
/// # Errors
///
/// Returns [`CryptoError::KeyInvalid`] if `pem` is neither form.
pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::KeyInvalid(e.to_string()))
}

/// Sign `payload` with RSA-SHA256 (PKCS#1 v1.5 padding) using a PEM-encoded
/// RSA private key (PKCS#1 or PKCS#8), returning the base64-encoded
/// signature.
///
/// # Errors
///
/// Returns [`CryptoError::KeyInvalid`] if `pem_private_key` cannot be
/// parsed, or [`CryptoError::SigningFailed`] if the underlying RSA
/// operation fails (e.g. the modulus is smaller than the digest plus
/// padding overhead requires).
pub fn sign_rsa_sha256(payload: &[u8], pem_private_key: &str) -> Result<String, CryptoError> {
    let private_key = parse_private_key(pem_private_key)?;
    let digest = Sha256::digest(payload);
    let padding = Pkcs1v15Sign::new::<Sha256>();
    let signature = private_key
        .sign(padding, &digest)
        .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
    Ok(BASE64.encode(signature))
}

/// Verify an RSA-SHA256 (PKCS#1 v1.5) signature over `payload` using a
/// PEM-encoded RSA public key (PKCS#1 or PKCS#8).
///
/// Never panics and never raises on a verification failure: an invalid
/// signature, a malformed base64 string, or a key parsing failure all
/// yield `Ok(false)`. Only a malformed *key* surfaces as an error, per
/// §4.2: "verification failure is a boolean result, never throws".
///
/// # Errors
///
/// Returns [`CryptoError::KeyInvalid`] if `pem_public_key` cannot be
/// parsed.
pub fn verify_rsa_sha256(
    payload: &[u8],
    signature_base64: &str,
    pem_public_key: &str,
) -> Result<bool, CryptoError> {
    let public_key = parse_public_key(pem_public_key)?;
    let signature_bytes = match BASE64.decode(signature_base64) {
        Ok(bytes) => bytes,
        Err(_) => return Ok(false),
    };
    let digest = Sha256::digest(payload);
    let padding = Pkcs1v15Sign::new::<Sha256>();
    Ok(public_key
        .verify(padding, &digest, &signature_bytes)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};
    use rsa::pkcs8::LineEnding;

    fn test_keypair() -> (String, String) {
        let mut rng = rand::thread_rng();
        let private_key =
            RsaPrivateKey::new(&mut rng, 2048).expect("generate test RSA key");
        let public_key = RsaPublicKey::from(&private_key);
        let priv_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .expect("encode private key")
            .to_string();
        let pub_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .expect("encode public key");
        (priv_pem, pub_pem)
    }

    #[test]
    fn sha256_hex_is_64_lowercase_hex_chars() {
        let h = sha256_hex(b"governance kernel");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let (priv_pem, pub_pem) = test_keypair();
        let payload = b"evidence chain tail hash binding";
        let sig = sign_rsa_sha256(payload, &priv_pem).expect("sign");
        assert!(verify_rsa_sha256(payload, &sig, &pub_pem).expect("verify"));
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let (priv_pem, pub_pem) = test_keypair();
        let sig = sign_rsa_sha256(b"original payload", &priv_pem).expect("sign");
        assert!(!verify_rsa_sha256(b"tampered payload", &sig, &pub_pem).expect("verify"));
    }

    #[test]
    fn verify_rejects_signature_from_a_different_key() {
        let (priv_pem_a, _pub_pem_a) = test_keypair();
        let (_priv_pem_b, pub_pem_b) = test_keypair();
        let payload = b"cross-key test";
        let sig = sign_rsa_sha256(payload, &priv_pem_a).expect("sign");
        assert!(!verify_rsa_sha256(payload, &sig, &pub_pem_b).expect("verify"));
    }

    #[test]
    fn verify_rejects_malformed_base64_without_erroring() {
        let (_priv_pem, pub_pem) = test_keypair();
        let result = verify_rsa_sha256(b"payload", "not-valid-base64!!!", &pub_pem);
        assert_eq!(result.unwrap(), false);
    }

    #[test]
    fn invalid_pem_is_a_key_error_not_a_panic() {
        let err = sign_rsa_sha256(b"payload", "not a pem at all").unwrap_err();
        assert!(matches!(err, CryptoError::KeyInvalid(_)));

        let err = verify_rsa_sha256(b"payload", "AAAA", "also not a pem").unwrap_err();
        assert!(matches!(err, CryptoError::KeyInvalid(_)));
    }

    #[test]
    fn signature_algorithm_constant_matches_spec() {
        assert_eq!(SIGNATURE_ALGORITHM, "RSA-SHA256");
    }
}
