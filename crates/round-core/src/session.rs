use serde::{Deserialize, Serialize};
use vault_round_types::{
    ConnectionMode, EffectiveState, LifecycleTag, OptionBuyerState, OracleStatus, PermissionSet,
    RoundId, RoundState, Timestamp, TxHash,
};

use crate::oracle_monitor::OracleMonitor;
use crate::pending_tx::{PendingTx, PendingTxTracker};
use crate::permissions::{PermissionPolicy, PermissionSchedule, compute_permissions};
use crate::reconciler::{EffectiveStateTracker, ReconcileInputs, StateTransition};
use crate::source_selector::{ProviderOutputs, ProviderSnapshot, SnapshotSource, SourceSelector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub mode: ConnectionMode,
    pub selector: SourceSelector,
    pub policy: PermissionPolicy,
}

impl SessionConfig {
    pub fn new(mode: ConnectionMode, fossil_delay_secs: u64) -> Self {
        Self {
            mode,
            selector: SourceSelector::default(),
            policy: PermissionPolicy::for_mode(mode, fossil_delay_secs),
        }
    }
}

/// Everything a consumer renders, recomputed as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundView {
    pub source: SnapshotSource,
    pub round_id: Option<RoundId>,
    pub lifecycle_tag: Option<LifecycleTag>,
    pub effective_state: EffectiveState,
    pub prev_effective_state: EffectiveState,
    pub permissions: PermissionSet,
    pub schedule: Option<PermissionSchedule>,
    pub timestamp: Timestamp,
    pub oracle_status: Option<OracleStatus>,
    pub oracle_error: Option<String>,
    pub pending_tx: Option<TxHash>,
    pub expected_next_state: Option<LifecycleTag>,
}

/// Result of polling the oracle job that was outstanding when a poll started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleOutcome {
    Status {
        round_id: RoundId,
        status: OracleStatus,
    },
    Error {
        round_id: RoundId,
        error: String,
    },
}

/// One poll's inputs. [`RoundSession::apply_poll`] folds them in with a single
/// reconciliation, so `prev_effective_state` reports the state before the poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollUpdate {
    pub timestamp: Timestamp,
    pub source: SnapshotSource,
    pub snapshot: ProviderSnapshot,
    pub pending_tx_max_age: Option<u64>,
    pub oracle: Option<OracleOutcome>,
}

/// Owns every leaf input for one user session and keeps the derived [`RoundView`] in step
/// with them. Each mutator recomputes the reconciler and the permission engine together.
#[derive(Debug, Clone)]
pub struct RoundSession {
    config: SessionConfig,
    rpc: ProviderSnapshot,
    live_feed: ProviderSnapshot,
    mock: ProviderSnapshot,
    oracle: OracleMonitor,
    pending: PendingTxTracker,
    expected_next_state: Option<LifecycleTag>,
    timestamp: Timestamp,
    tracker: EffectiveStateTracker,
    view: RoundView,
}

impl RoundSession {
    pub fn new(config: SessionConfig) -> Self {
        let mut session = Self {
            config,
            rpc: ProviderSnapshot::default(),
            live_feed: ProviderSnapshot::default(),
            mock: ProviderSnapshot::default(),
            oracle: OracleMonitor::default(),
            pending: PendingTxTracker::default(),
            expected_next_state: None,
            timestamp: 0,
            tracker: EffectiveStateTracker::default(),
            view: RoundView {
                source: config.selector.source_for(config.mode),
                round_id: None,
                lifecycle_tag: None,
                effective_state: EffectiveState::Settled,
                prev_effective_state: EffectiveState::Settled,
                permissions: PermissionSet::NONE,
                schedule: None,
                timestamp: 0,
                oracle_status: None,
                oracle_error: None,
                pending_tx: None,
                expected_next_state: None,
            },
        };
        session.recompute();
        session
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn view(&self) -> &RoundView {
        &self.view
    }

    pub fn active_source(&self) -> SnapshotSource {
        self.config.selector.source_for(self.config.mode)
    }

    pub fn selected(&self) -> &ProviderSnapshot {
        self.config.selector.select(
            self.config.mode,
            ProviderOutputs {
                rpc: &self.rpc,
                live_feed: &self.live_feed,
                mock: &self.mock,
            },
        )
    }

    pub fn selected_round(&self) -> Option<&RoundState> {
        self.selected().round.as_ref()
    }

    pub fn selected_buyer(&self) -> Option<&OptionBuyerState> {
        self.selected().buyer.as_ref()
    }

    pub fn oracle(&self) -> &OracleMonitor {
        &self.oracle
    }

    pub fn pending_tx(&self) -> Option<&PendingTx> {
        self.pending.pending()
    }

    /// Replaces one provider's output wholesale.
    pub fn apply_snapshot(
        &mut self,
        source: SnapshotSource,
        snapshot: ProviderSnapshot,
    ) -> StateTransition {
        self.store_snapshot(source, snapshot);
        self.recompute()
    }

    fn store_snapshot(&mut self, source: SnapshotSource, snapshot: ProviderSnapshot) {
        match source {
            SnapshotSource::Rpc => self.rpc = snapshot,
            SnapshotSource::LiveFeed => self.live_feed = snapshot,
            SnapshotSource::Mock => self.mock = snapshot,
        }
    }

    /// Applies clock, snapshot, pending-tx expiry and oracle result, then reconciles once.
    pub fn apply_poll(&mut self, update: PollUpdate) -> StateTransition {
        self.timestamp = update.timestamp;
        self.store_snapshot(update.source, update.snapshot);
        let round_id = self.selected_round().map(|round| round.round_id);
        self.oracle.track_round(round_id);
        if let Some(max_age) = update.pending_tx_max_age {
            self.pending.expire_if_older_than(self.timestamp, max_age);
        }
        match update.oracle {
            Some(OracleOutcome::Status { round_id, status }) => {
                self.oracle.record_status(round_id, status);
            }
            Some(OracleOutcome::Error { round_id, error }) => {
                self.oracle.record_error(round_id, error);
            }
            None => {}
        }
        self.recompute()
    }

    pub fn set_timestamp(&mut self, timestamp: Timestamp) -> StateTransition {
        self.timestamp = timestamp;
        self.recompute()
    }

    /// Tracks a submitted transaction and, for transition calls, the state it should
    /// produce.
    pub fn submit_tx(
        &mut self,
        hash: TxHash,
        expected_next_state: Option<LifecycleTag>,
    ) -> StateTransition {
        self.pending.submit(hash, self.timestamp);
        if expected_next_state.is_some() {
            self.expected_next_state = expected_next_state;
        }
        self.recompute()
    }

    pub fn confirm_tx(&mut self, hash: &TxHash) -> StateTransition {
        self.pending.confirm(hash);
        self.recompute()
    }

    /// Drops the tracked transaction after `max_age` seconds, as chosen by the caller.
    pub fn expire_pending_tx(&mut self, max_age: u64) -> StateTransition {
        self.pending.expire_if_older_than(self.timestamp, max_age);
        self.recompute()
    }

    /// Abandons the in-flight flow: clears the pending transaction and the expected state.
    pub fn abandon_transition(&mut self) -> StateTransition {
        self.pending.reset();
        self.expected_next_state = None;
        self.recompute()
    }

    pub fn set_expected_next_state(&mut self, expected: Option<LifecycleTag>) -> StateTransition {
        self.expected_next_state = expected;
        self.recompute()
    }

    /// Binds a Fossil job. Ignored unless `round_id` is the currently selected round.
    pub fn bind_oracle_job(
        &mut self,
        round_id: RoundId,
        job_id: impl Into<String>,
    ) -> StateTransition {
        if self.selected_round().map(|round| round.round_id) == Some(round_id) {
            self.oracle.bind_job(round_id, job_id);
        }
        self.recompute()
    }

    pub fn record_oracle_status(
        &mut self,
        round_id: RoundId,
        status: OracleStatus,
    ) -> StateTransition {
        self.oracle.record_status(round_id, status);
        self.recompute()
    }

    pub fn record_oracle_error(
        &mut self,
        round_id: RoundId,
        error: impl Into<String>,
    ) -> StateTransition {
        self.oracle.record_error(round_id, error);
        self.recompute()
    }

    fn recompute(&mut self) -> StateTransition {
        let source = self.active_source();
        let (round_id, tag) = match self.selected_round() {
            Some(round) => (Some(round.round_id), Some(round.lifecycle_tag)),
            None => (None, None),
        };

        self.oracle.track_round(round_id);
        let oracle_visible = round_id.is_some();
        if tag.is_some() && self.expected_next_state == tag {
            self.expected_next_state = None;
        }

        let inputs = ReconcileInputs {
            lifecycle_tag: tag,
            oracle_status: self.oracle.status(),
            oracle_error: self.oracle.error(),
            pending_tx: self.pending.current(),
            expected_next_state: self.expected_next_state,
        };
        let transition = self.tracker.reconcile_and_observe(&inputs);

        let policy = self.config.policy;
        let round = self.selected_round();
        let permissions = compute_permissions(self.timestamp, round, &policy);
        let schedule = round.map(|round| PermissionSchedule::for_round(round, &policy));

        self.view = RoundView {
            source,
            round_id,
            lifecycle_tag: tag,
            effective_state: transition.current,
            prev_effective_state: transition.previous,
            permissions,
            schedule,
            timestamp: self.timestamp,
            oracle_status: self.oracle.status().filter(|_| oracle_visible),
            oracle_error: self
                .oracle
                .error()
                .filter(|_| oracle_visible)
                .map(str::to_string),
            pending_tx: self.pending.current().cloned(),
            expected_next_state: self.expected_next_state,
        };
        transition
    }
}

#[cfg(test)]
mod tests {
    use vault_round_types::{ContractAddress, OracleJobStatus};

    use super::*;

    fn round(round_id: RoundId, tag: LifecycleTag) -> RoundState {
        RoundState {
            vault_address: ContractAddress::parse("0x5").expect("valid address"),
            round_id,
            lifecycle_tag: tag,
            deployment_date: 500,
            auction_start_date: 1_000,
            auction_end_date: 2_000,
            option_settle_date: 3_000,
            strike_price: 100,
            reserve_price: 10,
            cap_level: 5_000,
            clearing_price: None,
            settlement_price: None,
            starting_liquidity: 1_000,
            locked_liquidity: 1_000,
            unlocked_liquidity: 0,
            stashed_liquidity: 0,
            available_options: 10,
            options_sold: 0,
            premiums: 0,
            payout_per_option: 0,
            performance_lp: 0,
            performance_ob: 0,
        }
    }

    fn rpc_session() -> RoundSession {
        RoundSession::new(SessionConfig::new(ConnectionMode::Rpc, 3_600))
    }

    fn tx(raw: &str) -> TxHash {
        TxHash::parse(raw).expect("valid tx hash")
    }

    #[test]
    fn empty_session_is_settled_with_no_permissions() {
        let session = rpc_session();
        assert_eq!(session.view().effective_state, EffectiveState::Settled);
        assert_eq!(session.view().permissions, PermissionSet::NONE);
        assert_eq!(session.view().schedule, None);
    }

    #[test]
    fn start_auction_flow_holds_pending_until_chain_catches_up() {
        let mut session = rpc_session();
        session.set_timestamp(1_000);
        session.apply_snapshot(
            SnapshotSource::Rpc,
            ProviderSnapshot::with_round(round(1, LifecycleTag::Open)),
        );
        assert_eq!(session.view().effective_state, EffectiveState::Open);
        assert!(session.view().permissions.can_auction_start);

        let submitted = session.submit_tx(tx("0xaa"), Some(LifecycleTag::Auctioning));
        assert!(submitted.entered(EffectiveState::Pending));

        // Confirmed, but the next poll still reports the old tag.
        session.confirm_tx(&tx("0xaa"));
        assert_eq!(session.view().effective_state, EffectiveState::Pending);
        assert_eq!(session.view().expected_next_state, Some(LifecycleTag::Auctioning));

        let landed = session.apply_snapshot(
            SnapshotSource::Rpc,
            ProviderSnapshot::with_round(round(1, LifecycleTag::Auctioning)),
        );
        assert!(landed.entered(EffectiveState::Auctioning));
        assert_eq!(landed.previous, EffectiveState::Pending);
        assert_eq!(session.view().expected_next_state, None);
    }

    #[test]
    fn settlement_flow_walks_through_fossil_states() {
        let mut session = rpc_session();
        session.set_timestamp(6_600);
        session.apply_snapshot(
            SnapshotSource::Rpc,
            ProviderSnapshot::with_round(round(2, LifecycleTag::Running)),
        );
        assert_eq!(session.view().effective_state, EffectiveState::FossilReady);
        assert!(session.view().permissions.can_send_fossil_request);

        session.bind_oracle_job(2, "job-2");
        assert_eq!(session.view().effective_state, EffectiveState::Pending);

        session.record_oracle_error(2, "502 bad gateway");
        assert_eq!(session.view().effective_state, EffectiveState::Pending);

        session.record_oracle_status(2, OracleStatus::new(OracleJobStatus::Completed));
        assert_eq!(session.view().effective_state, EffectiveState::Running);
        assert!(session.view().permissions.can_round_settle);

        session.set_expected_next_state(Some(LifecycleTag::Open));
        assert_eq!(session.view().effective_state, EffectiveState::Pending);

        session.apply_snapshot(
            SnapshotSource::Rpc,
            ProviderSnapshot::with_round(round(3, LifecycleTag::Open)),
        );
        assert_eq!(session.view().effective_state, EffectiveState::Open);
        assert_eq!(session.view().oracle_status, None);
    }

    #[test]
    fn failed_oracle_job_returns_to_fossil_ready() {
        let mut session = rpc_session();
        session.apply_snapshot(
            SnapshotSource::Rpc,
            ProviderSnapshot::with_round(round(2, LifecycleTag::Running)),
        );
        session.bind_oracle_job(2, "job-2");
        let failed = session.record_oracle_status(2, OracleStatus::new(OracleJobStatus::Failed));
        assert!(failed.entered(EffectiveState::FossilReady));
    }

    #[test]
    fn inactive_provider_updates_do_not_change_view() {
        let mut session = rpc_session();
        session.apply_snapshot(
            SnapshotSource::Rpc,
            ProviderSnapshot::with_round(round(1, LifecycleTag::Open)),
        );
        let transition = session.apply_snapshot(
            SnapshotSource::LiveFeed,
            ProviderSnapshot::with_round(round(1, LifecycleTag::Running)),
        );
        assert!(!transition.changed());
        assert_eq!(session.view().lifecycle_tag, Some(LifecycleTag::Open));
    }

    #[test]
    fn abandon_and_expiry_clear_pending_state() {
        let mut session = rpc_session();
        session.set_timestamp(1_000);
        session.apply_snapshot(
            SnapshotSource::Rpc,
            ProviderSnapshot::with_round(round(1, LifecycleTag::Open)),
        );
        session.submit_tx(tx("0x1"), Some(LifecycleTag::Auctioning));
        session.abandon_transition();
        assert_eq!(session.view().effective_state, EffectiveState::Open);

        session.submit_tx(tx("0x2"), None);
        session.set_timestamp(1_100);
        assert_eq!(session.expire_pending_tx(300).current, EffectiveState::Pending);
        session.set_timestamp(1_300);
        assert_eq!(session.expire_pending_tx(300).current, EffectiveState::Open);
    }

    #[test]
    fn outage_keeps_completed_oracle_job_for_same_round() {
        let mut session = rpc_session();
        let running = ProviderSnapshot::with_round(round(2, LifecycleTag::Running));
        session.apply_snapshot(SnapshotSource::Rpc, running.clone());
        session.bind_oracle_job(2, "job-2");
        session.record_oracle_status(2, OracleStatus::new(OracleJobStatus::Completed));
        assert_eq!(session.view().effective_state, EffectiveState::Running);

        session.apply_snapshot(SnapshotSource::Rpc, ProviderSnapshot::UNAVAILABLE);
        assert_eq!(session.view().effective_state, EffectiveState::Settled);
        assert_eq!(session.view().oracle_status, None);
        assert!(!session.oracle().needs_poll());

        let recovered = session.apply_snapshot(SnapshotSource::Rpc, running);
        assert_eq!(recovered.current, EffectiveState::Running);
        assert_eq!(
            session.view().oracle_status,
            Some(OracleStatus::new(OracleJobStatus::Completed))
        );
    }

    #[test]
    fn oracle_job_binds_only_to_selected_round() {
        let mut session = rpc_session();
        session.apply_snapshot(
            SnapshotSource::Rpc,
            ProviderSnapshot::with_round(round(2, LifecycleTag::Running)),
        );
        session.apply_snapshot(SnapshotSource::Rpc, ProviderSnapshot::UNAVAILABLE);
        session.bind_oracle_job(2, "job-2");
        assert_eq!(session.oracle().job(), None);
    }

    #[test]
    fn apply_poll_reconciles_once_per_poll() {
        let mut session = rpc_session();
        session.apply_poll(PollUpdate {
            timestamp: 1_000,
            source: SnapshotSource::Rpc,
            snapshot: ProviderSnapshot::with_round(round(1, LifecycleTag::Open)),
            pending_tx_max_age: Some(300),
            oracle: None,
        });
        let transition = session.apply_poll(PollUpdate {
            timestamp: 1_500,
            source: SnapshotSource::Rpc,
            snapshot: ProviderSnapshot::with_round(round(1, LifecycleTag::Auctioning)),
            pending_tx_max_age: Some(300),
            oracle: None,
        });
        assert_eq!(transition.previous, EffectiveState::Open);
        assert_eq!(transition.current, EffectiveState::Auctioning);
        assert_eq!(session.view().prev_effective_state, EffectiveState::Open);
        assert_eq!(session.view().effective_state, EffectiveState::Auctioning);
        assert_eq!(session.view().timestamp, 1_500);
    }

    #[test]
    fn apply_poll_records_oracle_outcome_after_snapshot() {
        let mut session = rpc_session();
        session.set_timestamp(6_600);
        session.apply_snapshot(
            SnapshotSource::Rpc,
            ProviderSnapshot::with_round(round(2, LifecycleTag::Running)),
        );
        session.bind_oracle_job(2, "job-2");

        let completed = session.apply_poll(PollUpdate {
            timestamp: 6_700,
            source: SnapshotSource::Rpc,
            snapshot: ProviderSnapshot::with_round(round(2, LifecycleTag::Running)),
            pending_tx_max_age: None,
            oracle: Some(OracleOutcome::Status {
                round_id: 2,
                status: OracleStatus::new(OracleJobStatus::Completed),
            }),
        });
        assert_eq!(completed.previous, EffectiveState::Pending);
        assert_eq!(completed.current, EffectiveState::Running);

        // A result for the round that was just replaced is dropped.
        let next_round = session.apply_poll(PollUpdate {
            timestamp: 6_800,
            source: SnapshotSource::Rpc,
            snapshot: ProviderSnapshot::with_round(round(3, LifecycleTag::Open)),
            pending_tx_max_age: None,
            oracle: Some(OracleOutcome::Error {
                round_id: 2,
                error: "late".to_string(),
            }),
        });
        assert_eq!(next_round.current, EffectiveState::Open);
        assert_eq!(session.view().oracle_error, None);
    }

    #[test]
    fn demo_mode_reads_rpc_and_skips_delay() {
        let mut session = RoundSession::new(SessionConfig::new(ConnectionMode::Demo, 3_600));
        session.set_timestamp(3_000);
        session.apply_snapshot(
            SnapshotSource::Rpc,
            ProviderSnapshot::with_round(round(1, LifecycleTag::Running)),
        );
        assert_eq!(session.view().source, SnapshotSource::Rpc);
        assert!(session.view().permissions.can_round_settle);
    }
}
