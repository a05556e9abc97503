//! Error kinds and their propagation, per the gateway's error-handling design:
//! config/bind errors are fatal at startup; per-frame errors never escape the
//! ingress loop and are instead folded into a `drop`/`hold` decision.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AegisError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("frame parse error: {0}")]
    Parse(String),

    #[error("crypto error: {kind}")]
    Crypto { kind: CryptoErrorKind },

    #[error("detector fault in {detector}: {reason}")]
    DetectorFault { detector: &'static str, reason: String },

    #[error("ML intent engine unavailable: {0}")]
    MlUnavailable(String),

    #[error("ML intent engine timed out after {0:?}")]
    MlTimeout(std::time::Duration),

    #[error("ML intent engine confidence below threshold ({0:.2})")]
    MlLowConfidence(f64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoErrorKind {
    TagMismatch,
    Replay,
    KeyExpired,
    KeyRevoked,
}

impl std::fmt::Display for CryptoErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CryptoErrorKind::TagMismatch => "tag-mismatch",
            CryptoErrorKind::Replay => "replay",
            CryptoErrorKind::KeyExpired => "key-expired",
            CryptoErrorKind::KeyRevoked => "key-revoked",
        };
        f.write_str(s)
    }
}

/// Process exit codes, per the CLI's documented contract.
pub mod exit_code {
    pub const CLEAN: i32 = 0;
    pub const CONFIG: i32 = 1;
    pub const BIND: i32 = 2;
    pub const CRYPTO: i32 = 3;
}

impl AegisError {
    pub fn exit_code(&self) -> i32 {
        match self {
            AegisError::Config(_) => exit_code::CONFIG,
            AegisError::Bind { .. } => exit_code::BIND,
            AegisError::Crypto {
                kind: CryptoErrorKind::KeyRevoked,
            } => exit_code::CRYPTO,
            _ => exit_code::CLEAN,
        }
    }
}
