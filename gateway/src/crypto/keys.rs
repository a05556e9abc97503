//! Key manager: root/session key hierarchy, derivation, rotation, revocation.
//!
//! Grounded on `companion_comp/crypto_layer/key_manager.py`'s `KeyManager`:
//! `KeyState` transitions (`active -> grace -> {expired, revoked}`), the HKDF
//! info string (`session-id || "session-key-derivation"`), and the rotation
//! triggers (time, command-count, risk-escalation). The Python reference
//! anchors the root key in an EC keypair for ECDH; AEGIS has no peer-side key
//! exchange in scope (crypto key provisioning UI is out of scope here),
//! so the root key here is a raw 32-byte symmetric secret used
//! directly as HKDF input keying material — same derivation shape, simpler
//! anchor.

use hkdf::Hkdf;
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::AegisError;

const ROOT_KEY_LIFETIME_SEC: u64 = 365 * 24 * 3600;
const ROTATION_CHECK_INTERVAL_SEC: u64 = 60;
const HKDF_INFO_SUFFIX: &[u8] = b"session-key-derivation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyState {
    Active,
    Grace,
    Expired,
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct KeyMetadata {
    pub state: KeyState,
    pub session_id: String,
    pub created_at_unix: u64,
    pub expires_at_unix: u64,
    pub command_count: u64,
    pub risk_level: RiskLevel,
}

#[derive(ZeroizeOnDrop)]
struct SessionKey {
    #[zeroize(skip)]
    session_id: String,
    bytes: [u8; 32],
}

pub struct KeyManager {
    root_key: RootKey,
    session: SessionKey,
    metadata: KeyMetadata,
    previous_session: Option<SessionKey>,
    previous_expires_at_unix: u64,
    last_rotation_check_unix: u64,
    max_commands_per_session: u64,
    session_lifetime_sec: u64,
    grace_period_sec: u64,
    key_dir: PathBuf,
}

#[derive(ZeroizeOnDrop)]
struct RootKey {
    bytes: [u8; 32],
    #[zeroize(skip)]
    created_at_unix: u64,
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

impl KeyManager {
    /// Loads keys from `key_dir` if present, provisioning fresh ones otherwise.
    pub fn load_or_provision(
        key_dir: impl AsRef<Path>,
        session_lifetime_sec: u64,
        max_commands_per_session: u64,
        grace_period_sec: u64,
    ) -> Result<Self, AegisError> {
        let key_dir = key_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&key_dir)
            .map_err(|e| AegisError::Storage(format!("cannot create key dir: {e}")))?;

        let root = Self::load_or_provision_root(&key_dir)?;
        let session_id = random_session_id();
        let session_bytes = derive_session_key(&root.bytes, &session_id);
        let created = now_unix();
        let metadata = KeyMetadata {
            state: KeyState::Active,
            session_id: session_id.clone(),
            created_at_unix: created,
            expires_at_unix: created + session_lifetime_sec,
            command_count: 0,
            risk_level: RiskLevel::Low,
        };

        let mgr = Self {
            root_key: root,
            session: SessionKey {
                session_id,
                bytes: session_bytes,
            },
            metadata,
            previous_session: None,
            previous_expires_at_unix: 0,
            last_rotation_check_unix: created,
            max_commands_per_session,
            session_lifetime_sec,
            grace_period_sec,
            key_dir,
        };
        mgr.persist_metadata()?;
        Ok(mgr)
    }

    fn load_or_provision_root(key_dir: &Path) -> Result<RootKey, AegisError> {
        let path = key_dir.join("root_key.pem");
        if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| AegisError::Storage(format!("cannot read root key: {e}")))?;
            let bytes = decode_pem_body(&text)
                .ok_or_else(|| AegisError::Storage("malformed root_key.pem".into()))?;
            Ok(RootKey {
                bytes,
                created_at_unix: now_unix(),
            })
        } else {
            let mut bytes = [0u8; 32];
            rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
            let pem = encode_pem_body(&bytes);
            std::fs::write(&path, pem)
                .map_err(|e| AegisError::Storage(format!("cannot write root key: {e}")))?;
            Ok(RootKey {
                bytes,
                created_at_unix: now_unix(),
            })
        }
    }

    /// Active session key, rejecting if expired or revoked.
    pub fn active_session_key(&self) -> Result<&[u8; 32], AegisError> {
        let now = now_unix();
        match self.metadata.state {
            KeyState::Revoked => Err(AegisError::Crypto {
                kind: crate::error::CryptoErrorKind::KeyRevoked,
            }),
            _ if now > self.metadata.expires_at_unix => Err(AegisError::Crypto {
                kind: crate::error::CryptoErrorKind::KeyExpired,
            }),
            _ => Ok(&self.session.bytes),
        }
    }

    /// Returns the grace-period previous-generation key, if one is still
    /// within its grace window — ingress may still accept frames under it.
    pub fn grace_session_key(&self) -> Option<&[u8; 32]> {
        let now = now_unix();
        if self.metadata.state == KeyState::Grace && now <= self.previous_expires_at_unix {
            self.previous_session.as_ref().map(|s| &s.bytes)
        } else {
            None
        }
    }

    pub fn metadata(&self) -> &KeyMetadata {
        &self.metadata
    }

    pub fn increment_command_counter(&mut self) {
        self.metadata.command_count += 1;
        let _ = self.persist_metadata();
    }

    pub fn update_risk_level(&mut self, level: RiskLevel) {
        self.metadata.risk_level = level;
        let _ = self.persist_metadata();
    }

    /// Periodic check (rate-limited to `ROTATION_CHECK_INTERVAL_SEC`) for
    /// whether rotation should fire, and performs it if so.
    pub fn maybe_rotate(&mut self) -> Option<&'static str> {
        let now = now_unix();
        if now - self.last_rotation_check_unix < ROTATION_CHECK_INTERVAL_SEC {
            return None;
        }
        self.last_rotation_check_unix = now;

        let reason = if now > self.metadata.expires_at_unix.saturating_sub(self.grace_period_sec) {
            Some("time-based")
        } else if self.metadata.command_count >= self.max_commands_per_session {
            Some("command-count")
        } else if matches!(
            self.metadata.risk_level,
            RiskLevel::High | RiskLevel::Critical
        ) {
            Some("risk-escalation")
        } else {
            None
        };

        if let Some(r) = reason {
            self.rotate(r);
        }
        reason
    }

    /// Seamless rotation: old key enters `Grace` for `grace_period_sec`; a
    /// fresh session key generation is derived and activated.
    pub fn rotate(&mut self, _reason: &str) {
        let now = now_unix();
        let old_session_id = self.session.session_id.clone();
        let mut old_bytes = [0u8; 32];
        old_bytes.copy_from_slice(&self.session.bytes);

        let new_session_id = random_session_id();
        let new_bytes = derive_session_key(&self.root_key.bytes, &new_session_id);

        self.previous_session = Some(SessionKey {
            session_id: old_session_id,
            bytes: old_bytes,
        });
        self.previous_expires_at_unix = now + self.grace_period_sec;

        self.session = SessionKey {
            session_id: new_session_id.clone(),
            bytes: new_bytes,
        };
        self.metadata = KeyMetadata {
            state: KeyState::Grace,
            session_id: new_session_id,
            created_at_unix: now,
            expires_at_unix: now + self.session_lifetime_sec,
            command_count: 0,
            risk_level: RiskLevel::Low,
        };
        self.persist_grace_key();
        let _ = self.persist_metadata();
    }

    /// Emergency revocation: the session key is destroyed immediately.
    pub fn revoke(&mut self, _reason: &str) {
        self.metadata.state = KeyState::Revoked;
        self.session.bytes.zeroize();
        if let Some(prev) = self.previous_session.as_mut() {
            prev.bytes.zeroize();
        }
        self.previous_session = None;
        let _ = std::fs::remove_file(self.key_dir.join("session_key.bin"));
        let _ = self.persist_metadata();
    }

    fn persist_grace_key(&self) {
        if let Some(prev) = &self.previous_session {
            let _ = std::fs::write(self.key_dir.join("session_key.bin"), prev.bytes);
        }
    }

    fn persist_metadata(&self) -> Result<(), AegisError> {
        let text = serde_json::to_string_pretty(&self.metadata)
            .map_err(|e| AegisError::Storage(format!("metadata serialize: {e}")))?;
        std::fs::write(self.key_dir.join("key_metadata.json"), text)
            .map_err(|e| AegisError::Storage(format!("metadata write: {e}")))
    }
}

fn derive_session_key(root: &[u8; 32], session_id: &str) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, root);
    let mut info = Vec::with_capacity(session_id.len() + HKDF_INFO_SUFFIX.len());
    info.extend_from_slice(session_id.as_bytes());
    info.extend_from_slice(HKDF_INFO_SUFFIX);
    let mut out = [0u8; 32];
    hk.expand(&info, &mut out)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    out
}

fn random_session_id() -> String {
    use rand::Rng;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn encode_pem_body(bytes: &[u8; 32]) -> String {
    format!(
        "-----BEGIN AEGIS ROOT KEY-----\n{}\n-----END AEGIS ROOT KEY-----\n",
        base64_encode(bytes)
    )
}

fn decode_pem_body(text: &str) -> Option<[u8; 32]> {
    let body: String = text
        .lines()
        .filter(|l| !l.starts_with("-----"))
        .collect::<Vec<_>>()
        .join("");
    let decoded = base64_decode(&body)?;
    decoded.try_into().ok()
}

const B64_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn base64_encode(data: &[u8]) -> String {
    let mut out = String::new();
    for chunk in data.chunks(3) {
        let b0 = chunk[0];
        let b1 = *chunk.get(1).unwrap_or(&0);
        let b2 = *chunk.get(2).unwrap_or(&0);
        let n = ((b0 as u32) << 16) | ((b1 as u32) << 8) | (b2 as u32);
        out.push(B64_ALPHABET[((n >> 18) & 0x3F) as usize] as char);
        out.push(B64_ALPHABET[((n >> 12) & 0x3F) as usize] as char);
        out.push(if chunk.len() > 1 {
            B64_ALPHABET[((n >> 6) & 0x3F) as usize] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            B64_ALPHABET[(n & 0x3F) as usize] as char
        } else {
            '='
        });
    }
    out
}

fn base64_decode(s: &str) -> Option<Vec<u8>> {
    let rev = |c: u8| -> Option<u32> { B64_ALPHABET.iter().position(|&x| x == c).map(|p| p as u32) };
    let mut out = Vec::new();
    let chars: Vec<u8> = s.bytes().filter(|&b| b != b'=').collect();
    for chunk in chars.chunks(4) {
        let mut n = 0u32;
        for (i, &c) in chunk.iter().enumerate() {
            n |= rev(c)? << (18 - 6 * i);
        }
        let nbytes = chunk.len() - 1;
        out.push((n >> 16) as u8);
        if nbytes >= 2 {
            out.push((n >> 8) as u8);
        }
        if nbytes >= 3 {
            out.push(n as u8);
        }
    }
    Some(out)
}
