use serde::{Deserialize, Serialize};
use vault_round_types::{OracleJobStatus, OracleStatus, RoundId};

/// Longest transport error message retained for display.
const MAX_ORACLE_ERROR_LEN: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleJob {
    pub round_id: RoundId,
    pub job_id: String,
}

/// Fossil job state for the currently selected round.
///
/// Status and error are reset when a different round is selected, and late responses for
/// a different round are dropped. Losing the snapshot is not a round change: the job stays
/// bound to the last selected round until another round shows up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OracleMonitor {
    round_id: Option<RoundId>,
    job: Option<OracleJob>,
    status: Option<OracleStatus>,
    error: Option<String>,
}

impl OracleMonitor {
    pub fn round_id(&self) -> Option<RoundId> {
        self.round_id
    }

    pub fn job(&self) -> Option<&OracleJob> {
        self.job.as_ref()
    }

    pub fn status(&self) -> Option<OracleStatus> {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Follows the selected round. Returns true when a different round was selected and
    /// state was reset.
    pub fn track_round(&mut self, round_id: Option<RoundId>) -> bool {
        let Some(round_id) = round_id else {
            return false;
        };
        if self.round_id == Some(round_id) {
            return false;
        }
        *self = Self {
            round_id: Some(round_id),
            ..Self::default()
        };
        true
    }

    /// Binds a submitted job to the tracked round. The job starts out `Pending`.
    pub fn bind_job(&mut self, round_id: RoundId, job_id: impl Into<String>) -> bool {
        if self.round_id != Some(round_id) {
            return false;
        }
        self.job = Some(OracleJob {
            round_id,
            job_id: job_id.into(),
        });
        self.status = Some(OracleStatus::new(OracleJobStatus::Pending));
        self.error = None;
        true
    }

    /// Records a polled job status. A successful poll clears any earlier transport error.
    pub fn record_status(&mut self, round_id: RoundId, status: OracleStatus) -> bool {
        if self.round_id != Some(round_id) {
            return false;
        }
        self.status = Some(status);
        self.error = None;
        true
    }

    /// Records a transport-level failure of the status request itself. The last known job
    /// status is kept.
    pub fn record_error(&mut self, round_id: RoundId, error: impl Into<String>) -> bool {
        if self.round_id != Some(round_id) {
            return false;
        }
        let mut error = error.into();
        if error.len() > MAX_ORACLE_ERROR_LEN {
            let mut cut = MAX_ORACLE_ERROR_LEN;
            while !error.is_char_boundary(cut) {
                cut -= 1;
            }
            error.truncate(cut);
        }
        self.error = Some(error);
        true
    }

    /// True while a bound job has not reached a terminal status.
    pub fn needs_poll(&self) -> bool {
        self.job.is_some()
            && !matches!(
                self.status.map(|status| status.status),
                Some(OracleJobStatus::Completed | OracleJobStatus::Failed)
            )
    }
}
