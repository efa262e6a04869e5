use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use vault_round_core::RoundView;
use vault_round_types::{ConnectionMode, LifecycleTag, RoundId, TxHash};

use crate::SharedRoundSession;
use crate::runtime::MonitorDiagnostics;

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

#[derive(Clone)]
pub struct ApiState {
    pub mode: ConnectionMode,
    pub session: SharedRoundSession,
    pub diagnostics: Arc<Mutex<MonitorDiagnostics>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub mode: ConnectionMode,
    pub view: RoundView,
    pub diagnostics: MonitorDiagnostics,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitTxRequest {
    pub tx_hash: String,
    #[serde(default)]
    pub expected_next_state: Option<LifecycleTag>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmTxRequest {
    pub tx_hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleJobRequest {
    #[serde(with = "vault_round_types::decimal")]
    pub round_id: RoundId,
    pub job_id: String,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/tx", post(submit_tx).delete(abandon_tx))
        .route("/tx/confirm", post(confirm_tx))
        .route("/oracle-job", post(bind_oracle_job))
        .with_state(state)
}

pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

pub async fn status(State(state): State<ApiState>) -> ApiResult<StatusPayload> {
    let view = state.session.view().map_err(internal)?;
    let diagnostics = state
        .diagnostics
        .lock()
        .map_err(|_| internal("monitor diagnostics lock poisoned".to_string()))?
        .clone();
    Ok(Json(StatusPayload {
        mode: state.mode,
        view,
        diagnostics,
    }))
}

pub async fn submit_tx(
    State(state): State<ApiState>,
    Json(request): Json<SubmitTxRequest>,
) -> ApiResult<RoundView> {
    let hash = parse_tx_hash(&request.tx_hash)?;
    state
        .session
        .with(|session| {
            session.submit_tx(hash, request.expected_next_state);
            session.view().clone()
        })
        .map(Json)
        .map_err(internal)
}

pub async fn confirm_tx(
    State(state): State<ApiState>,
    Json(request): Json<ConfirmTxRequest>,
) -> ApiResult<RoundView> {
    let hash = parse_tx_hash(&request.tx_hash)?;
    state
        .session
        .with(|session| {
            session.confirm_tx(&hash);
            session.view().clone()
        })
        .map(Json)
        .map_err(internal)
}

pub async fn abandon_tx(State(state): State<ApiState>) -> ApiResult<RoundView> {
    state
        .session
        .with(|session| {
            session.abandon_transition();
            session.view().clone()
        })
        .map(Json)
        .map_err(internal)
}

/// Binds a submitted Fossil job to the selected round. Rejected when the round is not the
/// one currently selected.
pub async fn bind_oracle_job(
    State(state): State<ApiState>,
    Json(request): Json<OracleJobRequest>,
) -> ApiResult<RoundView> {
    if request.job_id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "job_id cannot be empty".to_string()));
    }
    let bound = state
        .session
        .with(|session| {
            session.bind_oracle_job(request.round_id, request.job_id.clone());
            let bound = session.oracle().job().is_some_and(|job| {
                job.round_id == request.round_id && job.job_id == request.job_id
            });
            bound.then(|| session.view().clone())
        })
        .map_err(internal)?;
    bound.map(Json).ok_or_else(|| {
        (
            StatusCode::CONFLICT,
            format!("round {} is not the selected round", request.round_id),
        )
    })
}

fn parse_tx_hash(raw: &str) -> Result<TxHash, (StatusCode, String)> {
    TxHash::parse(raw).map_err(|error| (StatusCode::BAD_REQUEST, error.to_string()))
}

fn internal(message: String) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, message)
}

#[cfg(test)]
mod tests {
    use vault_round_core::{ProviderSnapshot, SessionConfig, SnapshotSource};
    use vault_round_types::{ContractAddress, EffectiveState, RoundState};

    use super::*;

    fn running_round() -> RoundState {
        RoundState {
            vault_address: ContractAddress::parse("0x5").expect("valid address"),
            round_id: 2,
            lifecycle_tag: LifecycleTag::Running,
            deployment_date: 100,
            auction_start_date: 200,
            auction_end_date: 300,
            option_settle_date: 400,
            strike_price: 1,
            reserve_price: 1,
            cap_level: 1,
            clearing_price: Some(1),
            settlement_price: None,
            starting_liquidity: 1,
            locked_liquidity: 1,
            unlocked_liquidity: 0,
            stashed_liquidity: 0,
            available_options: 1,
            options_sold: 1,
            premiums: 1,
            payout_per_option: 0,
            performance_lp: 0,
            performance_ob: 0,
        }
    }

    fn state() -> ApiState {
        let session = SharedRoundSession::new(SessionConfig::new(ConnectionMode::Rpc, 3_600));
        session
            .with(|session| {
                session.apply_snapshot(
                    SnapshotSource::Rpc,
                    ProviderSnapshot::with_round(running_round()),
                )
            })
            .expect("session lock");
        ApiState {
            mode: ConnectionMode::Rpc,
            session,
            diagnostics: Arc::new(Mutex::new(MonitorDiagnostics::default())),
        }
    }

    #[tokio::test]
    async fn submit_and_abandon_tx() {
        let state = state();
        let Json(view) = submit_tx(
            State(state.clone()),
            Json(SubmitTxRequest {
                tx_hash: "0x0beef".to_string(),
                expected_next_state: Some(LifecycleTag::Open),
            }),
        )
        .await
        .expect("submit accepted");
        assert_eq!(view.effective_state, EffectiveState::Pending);
        assert_eq!(view.pending_tx.as_deref(), Some("0xbeef"));

        let Json(view) = abandon_tx(State(state)).await.expect("abandon accepted");
        assert_eq!(view.effective_state, EffectiveState::FossilReady);
    }

    #[tokio::test]
    async fn rejects_malformed_tx_hash() {
        let (code, _) = confirm_tx(
            State(state()),
            Json(ConfirmTxRequest {
                tx_hash: "not-hex".to_string(),
            }),
        )
        .await
        .expect_err("must fail");
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oracle_job_must_target_selected_round() {
        let state = state();
        let (code, _) = bind_oracle_job(
            State(state.clone()),
            Json(OracleJobRequest {
                round_id: 1,
                job_id: "job-1".to_string(),
            }),
        )
        .await
        .expect_err("must fail");
        assert_eq!(code, StatusCode::CONFLICT);

        let Json(view) = bind_oracle_job(
            State(state.clone()),
            Json(OracleJobRequest {
                round_id: 2,
                job_id: "job-2".to_string(),
            }),
        )
        .await
        .expect("job bound");
        assert_eq!(view.effective_state, EffectiveState::Pending);

        let Json(payload) = status(State(state)).await.expect("status");
        assert_eq!(payload.view.round_id, Some(2));
        assert_eq!(payload.diagnostics, MonitorDiagnostics::default());
    }
}
