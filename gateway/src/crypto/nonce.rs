//! Nonce issuance and replay detection.
//!
//! Grounded on `companion_comp/crypto_layer/nonce_manager.py` (12-byte
//! big-endian counter nonces) and `src/ai_layer/attack_detection/replay_detector.py`
//! (layered detection precedence), restated here as an explicit five-rule
//! cascade used as the normative ordering.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub const NONCE_SIZE: usize = 12;

/// Monotonic nonce issuer used on egress. Single atomic counter; the
/// trailing 8 bytes of the nonce are the big-endian counter value.
pub struct NonceIssuer {
    counter: AtomicU64,
}

impl Default for NonceIssuer {
    fn default() -> Self {
        Self::new()
    }
}

impl NonceIssuer {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    pub fn issue_nonce(&self) -> [u8; NONCE_SIZE] {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[NONCE_SIZE - 8..].copy_from_slice(&n.to_be_bytes());
        nonce
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayVerdict {
    Clean,
    Replay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayMetrics {
    pub verdict: ReplayVerdict,
    pub confidence: f64,
    pub reason: ReplayReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayReason {
    Clean,
    NonceReused,
    TimestampOutOfTolerance,
    TimestampOutOfOrder,
    SemanticDuplicate,
}

struct Inner {
    nonces: HashSet<[u8; NONCE_SIZE]>,
    nonce_order: VecDeque<[u8; NONCE_SIZE]>,
    max_accepted_timestamp_ns: u64,
    recent_hashes: VecDeque<(u64, u64)>, // (payload_hash, timestamp_ns)
}

/// Bounded, single-writer replay window. Five-layer cascade, first
/// decisive rule wins.
pub struct ReplayWindow {
    capacity: usize,
    timestamp_tolerance_ns: u64,
    reorder_tolerance_ns: u64,
    hash_window_ns: u64,
    inner: Mutex<Inner>,
}

const REORDER_TOLERANCE_NS: u64 = 5_000_000_000;
const HASH_DEDUP_WINDOW_NS: u64 = 5_000_000_000;

impl ReplayWindow {
    pub fn new(capacity: usize, timestamp_tolerance_sec: f64) -> Self {
        Self {
            capacity: capacity.max(1),
            timestamp_tolerance_ns: (timestamp_tolerance_sec * 1e9) as u64,
            reorder_tolerance_ns: REORDER_TOLERANCE_NS,
            hash_window_ns: HASH_DEDUP_WINDOW_NS,
            inner: Mutex::new(Inner {
                nonces: HashSet::new(),
                nonce_order: VecDeque::new(),
                max_accepted_timestamp_ns: 0,
                recent_hashes: VecDeque::new(),
            }),
        }
    }

    /// Checks `(nonce, timestamp_ns, payload_hash)` against the window and,
    /// if clean, records it. `now_ns` is the gateway's current monotonic
    /// clock reading, used for the timestamp-tolerance check.
    pub fn check(
        &self,
        nonce: [u8; NONCE_SIZE],
        timestamp_ns: u64,
        payload_hash: u64,
        now_ns: u64,
    ) -> ReplayMetrics {
        let mut inner = self.inner.lock().unwrap();

        // Rule 1: exact nonce reuse is cryptographic certainty.
        if inner.nonces.contains(&nonce) {
            return ReplayMetrics {
                verdict: ReplayVerdict::Replay,
                confidence: 1.0,
                reason: ReplayReason::NonceReused,
            };
        }

        // Rule 2: timestamp too far from now (past or future).
        let age = now_ns.abs_diff(timestamp_ns);
        if age > self.timestamp_tolerance_ns {
            return ReplayMetrics {
                verdict: ReplayVerdict::Replay,
                confidence: 0.85,
                reason: ReplayReason::TimestampOutOfTolerance,
            };
        }

        // Rule 3: timestamp older than the highest accepted minus reorder tolerance.
        if timestamp_ns + self.reorder_tolerance_ns < inner.max_accepted_timestamp_ns {
            return ReplayMetrics {
                verdict: ReplayVerdict::Replay,
                confidence: 0.85,
                reason: ReplayReason::TimestampOutOfOrder,
            };
        }

        // Rule 4: semantic dedup via recent (hash, timestamp) pairs within 5s.
        let dup = inner.recent_hashes.iter().any(|&(h, t)| {
            h == payload_hash && timestamp_ns.abs_diff(t) < self.hash_window_ns
        });
        if dup {
            return ReplayMetrics {
                verdict: ReplayVerdict::Replay,
                confidence: 0.70,
                reason: ReplayReason::SemanticDuplicate,
            };
        }

        // Rule 5: clean — record.
        if inner.nonce_order.len() >= self.capacity {
            if let Some(oldest) = inner.nonce_order.pop_front() {
                inner.nonces.remove(&oldest);
            }
        }
        inner.nonce_order.push_back(nonce);
        inner.nonces.insert(nonce);
        inner.max_accepted_timestamp_ns = inner.max_accepted_timestamp_ns.max(timestamp_ns);
        inner.recent_hashes.push_back((payload_hash, timestamp_ns));
        while inner
            .recent_hashes
            .front()
            .is_some_and(|&(_, t)| timestamp_ns.saturating_sub(t) > self.hash_window_ns)
        {
            inner.recent_hashes.pop_front();
        }

        ReplayMetrics {
            verdict: ReplayVerdict::Clean,
            confidence: 0.0,
            reason: ReplayReason::Clean,
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.nonces.clear();
        inner.nonce_order.clear();
        inner.max_accepted_timestamp_ns = 0;
        inner.recent_hashes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_nonces_strictly_increase() {
        let issuer = NonceIssuer::new();
        let a = issuer.issue_nonce();
        let b = issuer.issue_nonce();
        assert!(b > a);
        assert_eq!(a.len(), NONCE_SIZE);
    }

    #[test]
    fn first_use_of_nonce_is_clean() {
        let w = ReplayWindow::new(100, 30.0);
        let m = w.check([1u8; NONCE_SIZE], 1_000_000_000, 42, 1_000_000_000);
        assert_eq!(m.verdict, ReplayVerdict::Clean);
    }

    #[test]
    fn reused_nonce_is_replay_with_full_confidence() {
        let w = ReplayWindow::new(100, 30.0);
        let nonce = [2u8; NONCE_SIZE];
        assert_eq!(
            w.check(nonce, 1_000_000_000, 1, 1_000_000_000).verdict,
            ReplayVerdict::Clean
        );
        let m = w.check(nonce, 2_000_000_000, 2, 2_000_000_000);
        assert_eq!(m.verdict, ReplayVerdict::Replay);
        assert_eq!(m.confidence, 1.0);
        assert_eq!(m.reason, ReplayReason::NonceReused);
    }

    #[test]
    fn stale_timestamp_beyond_tolerance_is_replay() {
        let w = ReplayWindow::new(100, 30.0);
        let now = 100_000_000_000u64;
        let old_ts = now - 60_000_000_000; // 60s old vs 30s tolerance
        let m = w.check([3u8; NONCE_SIZE], old_ts, 99, now);
        assert_eq!(m.verdict, ReplayVerdict::Replay);
        assert_eq!(m.reason, ReplayReason::TimestampOutOfTolerance);
    }

    #[test]
    fn out_of_order_beyond_reorder_tolerance_is_replay() {
        let w = ReplayWindow::new(100, 30.0);
        let now = 0u64;
        assert_eq!(
            w.check([4u8; NONCE_SIZE], 10_000_000_000, 1, now).verdict,
            ReplayVerdict::Clean
        );
        // second frame 6s behind the max accepted -> beyond 5s reorder tolerance
        let m = w.check([5u8; NONCE_SIZE], 4_000_000_000, 2, now);
        assert_eq!(m.verdict, ReplayVerdict::Replay);
        assert_eq!(m.reason, ReplayReason::TimestampOutOfOrder);
    }

    #[test]
    fn semantic_duplicate_within_window_is_detected() {
        let w = ReplayWindow::new(100, 30.0);
        let now = 0u64;
        assert_eq!(
            w.check([6u8; NONCE_SIZE], 1_000_000_000, 777, now).verdict,
            ReplayVerdict::Clean
        );
        let m = w.check([7u8; NONCE_SIZE], 2_000_000_000, 777, now);
        assert_eq!(m.verdict, ReplayVerdict::Replay);
        assert_eq!(m.reason, ReplayReason::SemanticDuplicate);
    }

    #[test]
    fn eviction_is_strict_fifo_at_capacity() {
        let w = ReplayWindow::new(2, 30.0);
        let now = 0u64;
        let _ = w.check([10u8; NONCE_SIZE], 1, 1, now);
        let _ = w.check([11u8; NONCE_SIZE], 2, 2, now);
        let _ = w.check([12u8; NONCE_SIZE], 3, 3, now);
        // [10u8;..] should have been evicted, so re-using it is clean again
        let m = w.check([10u8; NONCE_SIZE], 4, 4, now);
        assert_eq!(m.verdict, ReplayVerdict::Clean);
    }
}
