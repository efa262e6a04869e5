use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use vault_round_core::{MockClock, ProviderSnapshot, SessionConfig, TimeSource};
use vault_round_monitor::{MonitorRuntime, RuntimeClock, SharedRoundSession};
use vault_round_providers::{
    LiveFeedProvider, MockRoundProvider, OracleClientError, OracleFuture, OracleStatusSource,
};
use vault_round_types::{
    ConnectionMode, ContractAddress, EffectiveState, LifecycleTag, OracleJobStatus, OracleStatus,
    RoundId, RoundState, TxHash,
};

fn round(round_id: RoundId, tag: LifecycleTag) -> RoundState {
    let base = (round_id - 1) * 10_000;
    RoundState {
        vault_address: ContractAddress::parse("0x5").expect("valid address"),
        round_id,
        lifecycle_tag: tag,
        deployment_date: base + 500,
        auction_start_date: base + 1_000,
        auction_end_date: base + 2_000,
        option_settle_date: base + 3_000,
        strike_price: 2_500,
        reserve_price: 10,
        cap_level: 7_500,
        clearing_price: None,
        settlement_price: None,
        starting_liquidity: 1_000_000,
        locked_liquidity: 1_000_000,
        unlocked_liquidity: 0,
        stashed_liquidity: 0,
        available_options: 400,
        options_sold: 0,
        premiums: 0,
        payout_per_option: 0,
        performance_lp: 0,
        performance_ob: 0,
    }
}

fn tx(raw: &str) -> TxHash {
    TxHash::parse(raw).expect("valid tx hash")
}

struct ScriptedOracle {
    statuses: Mutex<VecDeque<OracleJobStatus>>,
    calls: AtomicU32,
}

impl ScriptedOracle {
    fn new(statuses: impl IntoIterator<Item = OracleJobStatus>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into_iter().collect()),
            calls: AtomicU32::new(0),
        }
    }
}

impl OracleStatusSource for ScriptedOracle {
    fn fetch_status<'a>(&'a self, job_id: &'a str) -> OracleFuture<'a, OracleStatus> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .statuses
                .lock()
                .expect("oracle script lock")
                .pop_front()
                .ok_or_else(|| OracleClientError::UnknownJob {
                    job_id: job_id.to_string(),
                })?;
            Ok(OracleStatus::new(next))
        })
    }
}

#[tokio::test]
async fn full_round_cycle_through_runtime() {
    let frames = [
        round(1, LifecycleTag::Open),
        round(1, LifecycleTag::Auctioning),
        round(1, LifecycleTag::Running),
        round(1, LifecycleTag::Running),
        round(1, LifecycleTag::Running),
        round(1, LifecycleTag::Running),
        round(2, LifecycleTag::Open),
    ]
    .map(ProviderSnapshot::with_round);
    let clock = Arc::new(MockClock::new(1_000));
    let oracle = Arc::new(ScriptedOracle::new([
        OracleJobStatus::Pending,
        OracleJobStatus::Completed,
    ]));
    let session = SharedRoundSession::new(SessionConfig::new(ConnectionMode::Mock, 3_600));
    let mut runtime = MonitorRuntime::new(
        session.clone(),
        Arc::new(MockRoundProvider::new(frames)),
        RuntimeClock::Local(clock.clone()),
    )
    .with_oracle(oracle.clone());

    // Open round, auction start unlocked at exactly auction_start_date.
    runtime.poll_once().await.expect("poll 1");
    let view = session.view().expect("view");
    assert_eq!(view.effective_state, EffectiveState::Open);
    assert!(view.permissions.can_auction_start);

    session
        .with(|session| {
            session.submit_tx(tx("0xa1"), Some(LifecycleTag::Auctioning));
            session.confirm_tx(&tx("0xa1"));
        })
        .expect("session lock");
    assert_eq!(
        session.view().expect("view").effective_state,
        EffectiveState::Pending
    );

    let transition = runtime.poll_once().await.expect("poll 2");
    assert_eq!(transition.previous, EffectiveState::Pending);
    assert_eq!(transition.current, EffectiveState::Auctioning);
    assert_eq!(session.view().expect("view").expected_next_state, None);

    clock.set(2_000);
    let transition = runtime.poll_once().await.expect("poll 3");
    assert!(transition.entered(EffectiveState::FossilReady));
    assert!(!session.view().expect("view").permissions.can_send_fossil_request);

    clock.set(6_600);
    runtime.poll_once().await.expect("poll 4");
    let view = session.view().expect("view");
    assert!(view.permissions.can_send_fossil_request);
    assert!(view.permissions.can_round_settle);

    session
        .with(|session| session.bind_oracle_job(1, "job-1"))
        .expect("session lock");
    runtime.poll_once().await.expect("poll 5");
    let view = session.view().expect("view");
    assert_eq!(view.effective_state, EffectiveState::Pending);
    assert_eq!(
        view.oracle_status,
        Some(OracleStatus::new(OracleJobStatus::Pending))
    );

    let transition = runtime.poll_once().await.expect("poll 6");
    assert_eq!(transition.current, EffectiveState::Running);

    session
        .with(|session| {
            session.submit_tx(tx("0xb2"), Some(LifecycleTag::Open));
            session.confirm_tx(&tx("0xb2"));
        })
        .expect("session lock");
    assert_eq!(
        session.view().expect("view").effective_state,
        EffectiveState::Pending
    );

    let transition = runtime.poll_once().await.expect("poll 7");
    assert_eq!(transition.previous, EffectiveState::Pending);
    assert_eq!(transition.current, EffectiveState::Open);
    let view = session.view().expect("view");
    assert_eq!(view.round_id, Some(2));
    assert_eq!(view.oracle_status, None);
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);

    let diagnostics = runtime.diagnostics().expect("diagnostics");
    assert_eq!(diagnostics.success_count, 7);
    assert_eq!(diagnostics.failure_count, 0);
    assert_eq!(clock.now(), 6_600);
}

#[tokio::test]
async fn oracle_transport_errors_keep_job_pending() {
    let session = SharedRoundSession::new(SessionConfig::new(ConnectionMode::Mock, 3_600));
    let oracle = Arc::new(ScriptedOracle::new([]));
    let mut runtime = MonitorRuntime::new(
        session.clone(),
        Arc::new(MockRoundProvider::new([ProviderSnapshot::with_round(round(
            1,
            LifecycleTag::Running,
        ))])),
        RuntimeClock::Local(Arc::new(MockClock::new(7_000))),
    )
    .with_oracle(oracle);

    runtime.poll_once().await.expect("first poll");
    session
        .with(|session| session.bind_oracle_job(1, "job-1"))
        .expect("session lock");
    runtime.poll_once().await.expect("second poll");

    let view = session.view().expect("view");
    assert_eq!(view.effective_state, EffectiveState::Pending);
    assert!(
        view.oracle_error
            .as_deref()
            .is_some_and(|error| error.contains("job-1"))
    );
    assert_eq!(runtime.diagnostics().expect("diagnostics").oracle_failures, 1);
}

#[tokio::test]
async fn live_feed_mode_tracks_pushed_frames() {
    let (frames, receiver) = mpsc::channel(8);
    let feed = Arc::new(LiveFeedProvider::spawn(receiver));
    let session = SharedRoundSession::new(SessionConfig::new(ConnectionMode::LiveFeed, 3_600));
    let mut runtime = MonitorRuntime::new(
        session.clone(),
        feed.clone(),
        RuntimeClock::Local(Arc::new(MockClock::new(1_500))),
    );

    let message = serde_json::json!({
        "type": "round",
        "round": round(1, LifecycleTag::Auctioning),
    });
    let mut updates = feed.subscribe();
    frames
        .send(message.to_string())
        .await
        .expect("feed task alive");
    tokio::time::timeout(Duration::from_secs(1), updates.changed())
        .await
        .expect("frame applied in time")
        .expect("feed still open");

    let transition = runtime.poll_once().await.expect("poll");
    assert_eq!(transition.current, EffectiveState::Auctioning);
    assert!(!session.view().expect("view").permissions.can_auction_end);

    frames
        .send(r#"{"type":"unavailable"}"#.to_string())
        .await
        .expect("feed task alive");
    tokio::time::timeout(Duration::from_secs(1), updates.changed())
        .await
        .expect("frame applied in time")
        .expect("feed still open");

    let transition = runtime.poll_once().await.expect("poll");
    assert!(transition.entered(EffectiveState::Settled));
    assert_eq!(session.view().expect("view").round_id, None);
}

#[tokio::test]
async fn provider_outage_keeps_completed_oracle_job() {
    let running = ProviderSnapshot::with_round(round(1, LifecycleTag::Running));
    let frames = [
        running.clone(),
        running.clone(),
        ProviderSnapshot::UNAVAILABLE,
        running,
    ];
    let oracle = Arc::new(ScriptedOracle::new([OracleJobStatus::Completed]));
    let session = SharedRoundSession::new(SessionConfig::new(ConnectionMode::Mock, 3_600));
    let mut runtime = MonitorRuntime::new(
        session.clone(),
        Arc::new(MockRoundProvider::new(frames)),
        RuntimeClock::Local(Arc::new(MockClock::new(7_000))),
    )
    .with_oracle(oracle.clone());

    let transition = runtime.poll_once().await.expect("poll 1");
    assert_eq!(transition.current, EffectiveState::FossilReady);
    session
        .with(|session| session.bind_oracle_job(1, "job-1"))
        .expect("session lock");

    let transition = runtime.poll_once().await.expect("poll 2");
    assert_eq!(transition.current, EffectiveState::Running);

    let transition = runtime.poll_once().await.expect("poll 3");
    assert_eq!(transition.current, EffectiveState::Settled);

    let transition = runtime.poll_once().await.expect("poll 4");
    assert_eq!(transition.previous, EffectiveState::Settled);
    assert_eq!(transition.current, EffectiveState::Running);
    let view = session.view().expect("view");
    assert_eq!(
        view.oracle_status,
        Some(OracleStatus::new(OracleJobStatus::Completed))
    );
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn status_view_reports_state_before_the_poll() {
    let frames = [
        round(1, LifecycleTag::Open),
        round(1, LifecycleTag::Auctioning),
    ]
    .map(ProviderSnapshot::with_round);
    let session = SharedRoundSession::new(SessionConfig::new(ConnectionMode::Mock, 3_600));
    let mut runtime = MonitorRuntime::new(
        session.clone(),
        Arc::new(MockRoundProvider::new(frames)),
        RuntimeClock::Local(Arc::new(MockClock::new(1_200))),
    )
    .with_pending_tx_max_age(Some(300))
    .with_oracle(Arc::new(ScriptedOracle::new([])));

    runtime.poll_once().await.expect("poll 1");
    let transition = runtime.poll_once().await.expect("poll 2");
    assert_eq!(transition.previous, EffectiveState::Open);
    assert_eq!(transition.current, EffectiveState::Auctioning);

    let view = session.view().expect("view");
    assert_eq!(view.prev_effective_state, EffectiveState::Open);
    assert_eq!(view.effective_state, EffectiveState::Auctioning);
}
