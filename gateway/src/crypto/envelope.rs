//! AEAD sealing/opening of command payloads.
//!
//! Grounded on `companion_comp/crypto_layer/crypto_gate.py`'s dispatch over
//! encrypt/decrypt failure types (tag mismatch, replay, expired, revoked) and
//! the sibling `encryptor.py`/`decryptor.py` pair, reimplemented on top of
//! the `aes-gcm` crate's AES-256-GCM rather than the Python reference's
//! `cryptography` library binding — same AEAD primitive and nonce shape.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::error::{AegisError, CryptoErrorKind};

/// A sealed command: nonce + ciphertext (tag appended by the AEAD impl).
pub struct SealedEnvelope {
    pub nonce: [u8; super::nonce::NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

/// Seals `plaintext` under `key`, authenticating `aad` (session id, sender
/// address, or other context that must not be tamperable but need not be
/// secret).
pub fn seal(
    key: &[u8; 32],
    nonce: [u8; super::nonce::NONCE_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<SealedEnvelope, AegisError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| AegisError::Crypto {
            kind: CryptoErrorKind::TagMismatch,
        })?;
    Ok(SealedEnvelope { nonce, ciphertext })
}

/// Opens a sealed envelope under `key`. A failed tag check is the only
/// failure mode at this layer; replay and key-lifecycle failures are the
/// caller's responsibility (checked against the `ReplayWindow` / `KeyManager`
/// before or after this call, per their own failure tables).
pub fn open(
    key: &[u8; 32],
    nonce: [u8; super::nonce::NONCE_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, AegisError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| AegisError::Crypto {
            kind: CryptoErrorKind::TagMismatch,
        })
}

/// Tries the active key first, falling back to the grace-period previous
/// key if the manager has one. Mirrors `crypto_gate.py`'s acceptance of
/// frames signed under the outgoing generation during rotation.
pub fn open_with_rotation(
    manager: &super::keys::KeyManager,
    nonce: [u8; super::nonce::NONCE_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, AegisError> {
    let active = manager.active_session_key()?;
    if let Ok(plain) = open(active, nonce, aad, ciphertext) {
        return Ok(plain);
    }
    if let Some(grace) = manager.grace_session_key() {
        if let Ok(plain) = open(grace, nonce, aad, ciphertext) {
            return Ok(plain);
        }
    }
    Err(AegisError::Crypto {
        kind: CryptoErrorKind::TagMismatch,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::nonce::NonceIssuer;

    #[test]
    fn seal_then_open_roundtrips() {
        let key = [7u8; 32];
        let issuer = NonceIssuer::new();
        let nonce = issuer.issue_nonce();
        let aad = b"session-1";
        let sealed = seal(&key, nonce, aad, b"ARM").unwrap();
        let opened = open(&key, sealed.nonce, aad, &sealed.ciphertext).unwrap();
        assert_eq!(opened, b"ARM");
    }

    #[test]
    fn wrong_key_fails_tag_check() {
        let key = [7u8; 32];
        let other = [9u8; 32];
        let nonce = NonceIssuer::new().issue_nonce();
        let sealed = seal(&key, nonce, b"aad", b"DISARM").unwrap();
        let err = open(&other, sealed.nonce, b"aad", &sealed.ciphertext).unwrap_err();
        assert!(matches!(
            err,
            AegisError::Crypto {
                kind: CryptoErrorKind::TagMismatch
            }
        ));
    }

    #[test]
    fn mismatched_aad_fails_tag_check() {
        let key = [1u8; 32];
        let nonce = NonceIssuer::new().issue_nonce();
        let sealed = seal(&key, nonce, b"aad-a", b"RTL").unwrap();
        assert!(open(&key, sealed.nonce, b"aad-b", &sealed.ciphertext).is_err());
    }

    #[test]
    fn open_with_rotation_accepts_grace_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr =
            super::super::keys::KeyManager::load_or_provision(dir.path(), 1800, 1000, 300)
                .unwrap();
        let old_key = *mgr.active_session_key().unwrap();
        let nonce = NonceIssuer::new().issue_nonce();
        let sealed = seal(&old_key, nonce, b"aad", b"LAND").unwrap();

        mgr.rotate("manual");
        let opened = open_with_rotation(&mgr, sealed.nonce, b"aad", &sealed.ciphertext).unwrap();
        assert_eq!(opened, b"LAND");
    }
}
