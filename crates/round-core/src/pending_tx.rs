use serde::{Deserialize, Serialize};
use vault_round_types::{Timestamp, TxHash};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTx {
    pub hash: TxHash,
    pub submitted_at: Timestamp,
}

/// Holds at most one unconfirmed state-changing transaction.
///
/// Preventing concurrent submissions is the caller's job: a second `submit` replaces the
/// tracked transaction and hands back the displaced one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingTxTracker {
    pending: Option<PendingTx>,
}

impl PendingTxTracker {
    pub fn current(&self) -> Option<&TxHash> {
        self.pending.as_ref().map(|pending| &pending.hash)
    }

    pub fn pending(&self) -> Option<&PendingTx> {
        self.pending.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn submit(&mut self, hash: TxHash, submitted_at: Timestamp) -> Option<PendingTx> {
        self.pending.replace(PendingTx { hash, submitted_at })
    }

    /// Clears the tracker only when `hash` is the tracked transaction.
    pub fn confirm(&mut self, hash: &TxHash) -> bool {
        if self.current() == Some(hash) {
            self.pending = None;
            return true;
        }
        false
    }

    pub fn reset(&mut self) -> Option<PendingTx> {
        self.pending.take()
    }

    /// Caller-driven timeout policy: drops the tracked transaction once it has been pending
    /// for at least `max_age` seconds.
    pub fn expire_if_older_than(&mut self, now: Timestamp, max_age: u64) -> Option<PendingTx> {
        let expired = self
            .pending
            .as_ref()
            .is_some_and(|pending| now.saturating_sub(pending.submitted_at) >= max_age);
        if expired { self.pending.take() } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(raw: &str) -> TxHash {
        TxHash::parse(raw).expect("valid tx hash")
    }

    #[test]
    fn confirm_only_clears_matching_hash() {
        let mut tracker = PendingTxTracker::default();
        tracker.submit(hash("0xabc"), 100);

        assert!(!tracker.confirm(&hash("0xdef")));
        assert_eq!(tracker.current(), Some(&hash("0xabc")));

        assert!(tracker.confirm(&hash("0x0abc")));
        assert!(!tracker.is_pending());
    }

    #[test]
    fn second_submit_replaces_and_returns_displaced_tx() {
        let mut tracker = PendingTxTracker::default();
        assert_eq!(tracker.submit(hash("0x1"), 10), None);
        let displaced = tracker.submit(hash("0x2"), 12).expect("displaced tx");
        assert_eq!(displaced.hash, hash("0x1"));
        assert_eq!(tracker.current(), Some(&hash("0x2")));
    }

    #[test]
    fn expiry_respects_caller_supplied_age() {
        let mut tracker = PendingTxTracker::default();
        tracker.submit(hash("0x1"), 1_000);

        assert_eq!(tracker.expire_if_older_than(1_299, 300), None);
        assert!(tracker.is_pending());

        let expired = tracker.expire_if_older_than(1_300, 300).expect("expired");
        assert_eq!(expired.submitted_at, 1_000);
        assert!(!tracker.is_pending());
    }

    #[test]
    fn clock_skew_never_expires_early() {
        let mut tracker = PendingTxTracker::default();
        tracker.submit(hash("0x1"), 1_000);
        assert_eq!(tracker.expire_if_older_than(900, 60), None);
        assert_eq!(tracker.reset().map(|pending| pending.hash), Some(hash("0x1")));
    }
}
