use serde::{Deserialize, Serialize};
use vault_round_types::{ConnectionMode, PermissionSet, RoundState, Timestamp};

/// Seconds to wait after `option_settle_date` before settlement-dependent actions unlock.
pub const DEFAULT_FOSSIL_DELAY_SECS: u64 = 3_600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionPolicy {
    pub fossil_delay_secs: u64,
    /// Demo deployments skip the oracle delay entirely.
    pub demo: bool,
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self {
            fossil_delay_secs: DEFAULT_FOSSIL_DELAY_SECS,
            demo: false,
        }
    }
}

impl PermissionPolicy {
    pub fn for_mode(mode: ConnectionMode, fossil_delay_secs: u64) -> Self {
        Self {
            fossil_delay_secs,
            demo: mode.is_demo(),
        }
    }

    pub fn effective_delay(&self) -> u64 {
        if self.demo { 0 } else { self.fossil_delay_secs }
    }

    fn settlement_unlocks_at(&self, round: &RoundState) -> Timestamp {
        round
            .option_settle_date
            .saturating_add(self.effective_delay())
    }
}

/// Computes every permission for `timestamp`. With no round selected nothing is permitted.
pub fn compute_permissions(
    timestamp: Timestamp,
    round: Option<&RoundState>,
    policy: &PermissionPolicy,
) -> PermissionSet {
    let Some(round) = round else {
        return PermissionSet::NONE;
    };
    PermissionSet {
        can_auction_start: timestamp >= round.auction_start_date,
        can_auction_end: timestamp >= round.auction_end_date,
        can_round_settle: can_round_settle(timestamp, round, policy),
        can_send_fossil_request: can_send_fossil_request(timestamp, round, policy),
    }
}

pub fn can_round_settle(
    timestamp: Timestamp,
    round: &RoundState,
    policy: &PermissionPolicy,
) -> bool {
    timestamp >= policy.settlement_unlocks_at(round)
}

// Shares the settle threshold until the oracle request window is defined separately.
pub fn can_send_fossil_request(
    timestamp: Timestamp,
    round: &RoundState,
    policy: &PermissionPolicy,
) -> bool {
    timestamp >= policy.settlement_unlocks_at(round)
}

/// Earliest timestamp at which each permission becomes true for `round`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSchedule {
    pub auction_start_at: Timestamp,
    pub auction_end_at: Timestamp,
    pub round_settle_at: Timestamp,
    pub fossil_request_at: Timestamp,
}

impl PermissionSchedule {
    pub fn for_round(round: &RoundState, policy: &PermissionPolicy) -> Self {
        let settle = policy.settlement_unlocks_at(round);
        Self {
            auction_start_at: round.auction_start_date,
            auction_end_at: round.auction_end_date,
            round_settle_at: settle,
            fossil_request_at: settle,
        }
    }

    /// Next unlock strictly after `timestamp`, if any permission is still locked.
    pub fn next_unlock_after(&self, timestamp: Timestamp) -> Option<Timestamp> {
        [
            self.auction_start_at,
            self.auction_end_at,
            self.round_settle_at,
            self.fossil_request_at,
        ]
        .into_iter()
        .filter(|unlock| *unlock > timestamp)
        .min()
    }
}
