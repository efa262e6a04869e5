use vault_round_types::{
    EffectiveState, LifecycleTag, OracleJobStatus, OracleStatus, RoundState, TxHash,
};

/// Every signal the reconciler combines. Absence is a first-class value for each field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileInputs<'a> {
    pub lifecycle_tag: Option<LifecycleTag>,
    pub oracle_status: Option<OracleStatus>,
    pub oracle_error: Option<&'a str>,
    pub pending_tx: Option<&'a TxHash>,
    pub expected_next_state: Option<LifecycleTag>,
}

impl<'a> ReconcileInputs<'a> {
    pub fn for_round(round: Option<&RoundState>) -> Self {
        Self {
            lifecycle_tag: round.map(|round| round.lifecycle_tag),
            ..Self::default()
        }
    }

    pub fn with_oracle(mut self, status: Option<OracleStatus>, error: Option<&'a str>) -> Self {
        self.oracle_status = status;
        self.oracle_error = error;
        self
    }

    pub fn with_pending_tx(mut self, pending_tx: Option<&'a TxHash>) -> Self {
        self.pending_tx = pending_tx;
        self
    }

    pub fn with_expected_next_state(mut self, expected: Option<LifecycleTag>) -> Self {
        self.expected_next_state = expected;
        self
    }
}

/// Derives the display state. Rules are applied in precedence order and the first match
/// wins:
///
/// 1. no round selected: `Settled`
/// 2. a pending transaction or a pending oracle job: `Pending`
/// 3. `Open`/`Auctioning`/`Settled`: `Pending` while an expected transition has not been
///    observed, otherwise the tag itself
/// 4. `Running`: `Running` once the oracle job completed (or `Pending` if settlement is
///    expected), `FossilReady` while the job is absent, failed, or errored
pub fn reconcile(inputs: &ReconcileInputs<'_>) -> EffectiveState {
    let Some(tag) = inputs.lifecycle_tag else {
        return EffectiveState::Settled;
    };

    let oracle_job = inputs.oracle_status.map(|oracle| oracle.status);
    if inputs.pending_tx.is_some() || oracle_job == Some(OracleJobStatus::Pending) {
        return EffectiveState::Pending;
    }

    match tag {
        LifecycleTag::Open | LifecycleTag::Auctioning | LifecycleTag::Settled => {
            match inputs.expected_next_state {
                Some(expected) if expected != tag => EffectiveState::Pending,
                _ => EffectiveState::from(tag),
            }
        }
        LifecycleTag::Running => match oracle_job {
            Some(OracleJobStatus::Completed) => {
                if inputs.expected_next_state == Some(LifecycleTag::Open) {
                    EffectiveState::Pending
                } else {
                    EffectiveState::Running
                }
            }
            None | Some(OracleJobStatus::Failed) => EffectiveState::FossilReady,
            // Caught by the pending rule above; kept so the match stays total.
            Some(OracleJobStatus::Pending) => EffectiveState::Pending,
        },
    }
}

/// Edge between two consecutive reconciler results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub previous: EffectiveState,
    pub current: EffectiveState,
}

impl StateTransition {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }

    /// True exactly when this transition flipped into `state`.
    pub fn entered(&self, state: EffectiveState) -> bool {
        self.changed() && self.current == state
    }

    /// True exactly when this transition flipped out of `state`.
    pub fn left(&self, state: EffectiveState) -> bool {
        self.changed() && self.previous == state
    }
}

/// `{current, previous}` pair of reconciler outputs.
///
/// The previous value is only for edge detection by consumers and never feeds back into
/// [`reconcile`]. Before the first observation both sides report `Settled`, the same value
/// an empty session reconciles to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveStateTracker {
    current: EffectiveState,
    previous: EffectiveState,
    observed: bool,
}

impl Default for EffectiveStateTracker {
    fn default() -> Self {
        Self {
            current: EffectiveState::Settled,
            previous: EffectiveState::Settled,
            observed: false,
        }
    }
}

impl EffectiveStateTracker {
    pub fn current(&self) -> EffectiveState {
        self.current
    }

    pub fn previous(&self) -> EffectiveState {
        self.previous
    }

    /// Records a freshly computed state. The first observation reports no edge.
    pub fn observe(&mut self, next: EffectiveState) -> StateTransition {
        self.previous = if self.observed { self.current } else { next };
        self.current = next;
        self.observed = true;
        StateTransition {
            previous: self.previous,
            current: self.current,
        }
    }

    /// Runs [`reconcile`] and records the result in one step.
    pub fn reconcile_and_observe(&mut self, inputs: &ReconcileInputs<'_>) -> StateTransition {
        self.observe(reconcile(inputs))
    }
}
