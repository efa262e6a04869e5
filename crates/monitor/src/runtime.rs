use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use vault_round_core::{
    ChainClock, OracleOutcome, PollUpdate, ProviderSnapshot, StateTransition, TimeSource,
};
use vault_round_providers::{BlockClockSource, OracleStatusSource, RoundSnapshotSource};

use crate::SharedRoundSession;

const MAX_RECENT_ERRORS: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorDiagnostics {
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u64,
    pub clock_failures: u64,
    pub oracle_failures: u64,
    pub state_changes: u64,
    pub last_error: Option<String>,
    pub recent_errors: Vec<String>,
}

/// Where the session's "now" comes from.
#[derive(Clone)]
pub enum RuntimeClock {
    /// Follows the latest block timestamp; a failed refresh keeps the previous value.
    Chain {
        source: Arc<dyn BlockClockSource>,
        clock: Arc<ChainClock>,
    },
    Local(Arc<dyn TimeSource>),
}

impl RuntimeClock {
    pub fn chain(source: Arc<dyn BlockClockSource>) -> Self {
        Self::Chain {
            source,
            clock: Arc::new(ChainClock::default()),
        }
    }
}

/// Drives one [`SharedRoundSession`] from its providers.
pub struct MonitorRuntime {
    session: SharedRoundSession,
    snapshots: Arc<dyn RoundSnapshotSource>,
    oracle: Option<Arc<dyn OracleStatusSource>>,
    clock: RuntimeClock,
    pending_tx_max_age_secs: Option<u64>,
    diagnostics: Arc<Mutex<MonitorDiagnostics>>,
    recent_errors: VecDeque<String>,
}

impl MonitorRuntime {
    pub fn new(
        session: SharedRoundSession,
        snapshots: Arc<dyn RoundSnapshotSource>,
        clock: RuntimeClock,
    ) -> Self {
        Self {
            session,
            snapshots,
            oracle: None,
            clock,
            pending_tx_max_age_secs: None,
            diagnostics: Arc::new(Mutex::new(MonitorDiagnostics::default())),
            recent_errors: VecDeque::new(),
        }
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn OracleStatusSource>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_pending_tx_max_age(mut self, max_age_secs: Option<u64>) -> Self {
        self.pending_tx_max_age_secs = max_age_secs;
        self
    }

    pub fn session(&self) -> SharedRoundSession {
        self.session.clone()
    }

    pub fn diagnostics_handle(&self) -> Arc<Mutex<MonitorDiagnostics>> {
        Arc::clone(&self.diagnostics)
    }

    pub fn diagnostics(&self) -> Result<MonitorDiagnostics, String> {
        self.diagnostics
            .lock()
            .map(|guard| guard.clone())
            .map_err(|_| "monitor diagnostics lock poisoned".to_string())
    }

    /// Refreshes the clock, the active provider and the oracle job, then folds the results
    /// into the session with a single reconciliation. Provider failures degrade to an
    /// unavailable snapshot; only a poisoned lock is returned as an error.
    #[instrument(skip(self), fields(source = ?self.snapshots.source()))]
    pub async fn poll_once(&mut self) -> Result<StateTransition, String> {
        let now = self.refresh_clock().await?;

        let source = self.snapshots.source();
        let (snapshot, fetch_error) = match self.snapshots.fetch_snapshot().await {
            Ok(snapshot) => (snapshot, None),
            Err(error) => {
                warn!(error = %error, "snapshot fetch failed; marking provider unavailable");
                (ProviderSnapshot::UNAVAILABLE, Some(error.to_string()))
            }
        };
        let oracle = self.poll_oracle().await?;

        let update = PollUpdate {
            timestamp: now,
            source,
            snapshot,
            pending_tx_max_age: self.pending_tx_max_age_secs,
            oracle,
        };
        let (transition, round_id) = self.session.with(|session| {
            let transition = session.apply_poll(update);
            (transition, session.view().round_id)
        })?;

        if transition.changed() {
            info!(
                previous = %transition.previous,
                current = %transition.current,
                round_id = ?round_id,
                "effective state changed"
            );
        }

        match fetch_error {
            Some(message) => self.record_failure(message)?,
            None => self.record_success(transition.changed())?,
        }
        Ok(transition)
    }

    async fn refresh_clock(&mut self) -> Result<u64, String> {
        let (source, clock) = match &self.clock {
            RuntimeClock::Local(time) => return Ok(time.now()),
            RuntimeClock::Chain { source, clock } => (Arc::clone(source), Arc::clone(clock)),
        };
        match source.fetch_block_timestamp().await {
            Ok(timestamp) => Ok(clock.observe_block_timestamp(timestamp)),
            Err(error) => {
                warn!(error = %error, "block timestamp refresh failed; keeping previous clock");
                self.update_diagnostics(|diagnostics| {
                    diagnostics.clock_failures = diagnostics.clock_failures.saturating_add(1);
                })?;
                Ok(clock.now())
            }
        }
    }

    /// Polls the job that is outstanding when the poll starts. The session drops the
    /// outcome if the selected round changes in the same poll.
    async fn poll_oracle(&mut self) -> Result<Option<OracleOutcome>, String> {
        let Some(oracle) = self.oracle.clone() else {
            return Ok(None);
        };
        let job = self.session.with(|session| {
            let monitor = session.oracle();
            monitor
                .needs_poll()
                .then(|| monitor.job().cloned())
                .flatten()
        })?;
        let Some(job) = job else {
            return Ok(None);
        };

        debug!(round_id = job.round_id, job_id = %job.job_id, "polling oracle job");
        match oracle.fetch_status(&job.job_id).await {
            Ok(status) => Ok(Some(OracleOutcome::Status {
                round_id: job.round_id,
                status,
            })),
            Err(error) => {
                warn!(error = %error, job_id = %job.job_id, "oracle status request failed");
                self.update_diagnostics(|diagnostics| {
                    diagnostics.oracle_failures = diagnostics.oracle_failures.saturating_add(1);
                })?;
                Ok(Some(OracleOutcome::Error {
                    round_id: job.round_id,
                    error: error.to_string(),
                }))
            }
        }
    }

    fn record_failure(&mut self, message: String) -> Result<(), String> {
        if self.recent_errors.len() >= MAX_RECENT_ERRORS {
            let _ = self.recent_errors.pop_front();
        }
        self.recent_errors.push_back(message.clone());
        let recent: Vec<String> = self.recent_errors.iter().cloned().collect();
        self.update_diagnostics(|diagnostics| {
            diagnostics.failure_count = diagnostics.failure_count.saturating_add(1);
            diagnostics.consecutive_failures = diagnostics.consecutive_failures.saturating_add(1);
            diagnostics.last_error = Some(message);
            diagnostics.recent_errors = recent;
        })
    }

    fn record_success(&mut self, state_changed: bool) -> Result<(), String> {
        self.update_diagnostics(|diagnostics| {
            diagnostics.success_count = diagnostics.success_count.saturating_add(1);
            diagnostics.consecutive_failures = 0;
            diagnostics.last_error = None;
            if state_changed {
                diagnostics.state_changes = diagnostics.state_changes.saturating_add(1);
            }
        })
    }

    fn update_diagnostics(
        &self,
        update: impl FnOnce(&mut MonitorDiagnostics),
    ) -> Result<(), String> {
        let mut guard = self
            .diagnostics
            .lock()
            .map_err(|_| "monitor diagnostics lock poisoned".to_string())?;
        update(&mut guard);
        Ok(())
    }
}
