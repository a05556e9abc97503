//! Crypto gate: key lifecycle, nonce issuance/replay, and AEAD
//! sealing, grounded on `companion_comp/crypto_layer/` as a whole.

pub mod envelope;
pub mod keys;
pub mod nonce;

pub use envelope::{open, open_with_rotation, seal, SealedEnvelope};
pub use keys::{KeyManager, KeyMetadata, KeyState, RiskLevel};
pub use nonce::{NonceIssuer, ReplayMetrics, ReplayReason, ReplayVerdict, ReplayWindow, NONCE_SIZE};
