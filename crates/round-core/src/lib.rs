#![forbid(unsafe_code)]
//! Round-state reconciliation and transition permissions for options-vault rounds.
//!
//! Everything here is synchronous and free of I/O. Providers deliver already-fetched
//! values; this crate only decides how they combine.

pub mod oracle_monitor;
pub mod pending_tx;
pub mod permissions;
pub mod reconciler;
pub mod session;
pub mod source_selector;
pub mod time_source;

pub use oracle_monitor::{OracleJob, OracleMonitor};
pub use pending_tx::{PendingTx, PendingTxTracker};
pub use permissions::{
    DEFAULT_FOSSIL_DELAY_SECS, PermissionPolicy, PermissionSchedule, can_round_settle,
    can_send_fossil_request, compute_permissions,
};
pub use reconciler::{EffectiveStateTracker, ReconcileInputs, StateTransition, reconcile};
pub use session::{OracleOutcome, PollUpdate, RoundSession, RoundView, SessionConfig};
pub use source_selector::{
    ProviderOutputs, ProviderSnapshot, SnapshotSource, SourceSelector, select_snapshot,
};
pub use time_source::{ChainClock, MockClock, SystemClock, TimeSource};
