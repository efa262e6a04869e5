use std::env;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vault_round_core::{MockClock, SnapshotSource, SystemClock};
use vault_round_monitor::config::DEFAULT_ORACLE_TIMEOUT_SECS;
use vault_round_monitor::{
    ApiState, ConfigError, MonitorConfig, MonitorRuntime, RuntimeClock, SharedRoundSession,
    help_text, router,
};
use vault_round_providers::{
    FossilClient, LiveFeedProvider, MockRoundProvider, RoundEntryPoints, RoundSnapshotSource,
    RoundTarget, RpcRoundProvider,
};

const LIVE_FEED_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match MonitorConfig::from_args(env::args().skip(1), |name| env::var(name).ok())
    {
        Ok(config) => config,
        Err(ConfigError::HelpRequested) => {
            println!("{}", help_text());
            return Ok(());
        }
        Err(error) => return Err(format!("{error}\n\n{}", help_text())),
    };

    let session = SharedRoundSession::new(config.session_config());
    let (snapshots, clock) = build_sources(&config)?;
    let mut runtime = MonitorRuntime::new(session.clone(), snapshots, clock)
        .with_pending_tx_max_age(config.pending_tx_max_age_secs);
    if let Some(fossil_url) = &config.fossil_url {
        let fossil = FossilClient::new(
            fossil_url.clone(),
            config.fossil_api_key.clone(),
            Duration::from_secs(DEFAULT_ORACLE_TIMEOUT_SECS),
        )
        .map_err(|error| format!("failed to build Fossil client: {error}"))?;
        runtime = runtime.with_oracle(Arc::new(fossil));
    }

    let app = router(ApiState {
        mode: config.mode,
        session,
        diagnostics: runtime.diagnostics_handle(),
    });
    let listener = TcpListener::bind(&config.status_bind).await.map_err(|error| {
        format!(
            "failed to bind status endpoint {}: {error}",
            config.status_bind
        )
    })?;

    let rpc_url = config
        .rpc_url
        .as_deref()
        .map(redact_rpc_url)
        .unwrap_or_default();
    info!(
        mode = config.mode.as_str(),
        source = ?config.active_source(),
        rpc_url = %rpc_url,
        fossil_delay_secs = config.session_config().policy.effective_delay(),
        status_bind = %config.status_bind,
        poll_ms = config.poll_interval.as_millis() as u64,
        "round-monitor starting"
    );

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .map_err(|error| format!("status server failed: {error}"))
    });

    if let Err(error) = runtime.poll_once().await {
        warn!(error = %error, "initial poll failed");
    }

    let mut ticker = interval(config.poll_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                if let Err(error) = runtime.poll_once().await {
                    warn!(error = %error, "poll failed");
                }
            }
        }
    }

    server_handle.abort();
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => warn!(error = %error, "status server exited with error"),
        Err(error) if error.is_cancelled() => {}
        Err(error) => warn!(error = %error, "status server task join error"),
    }

    Ok(())
}

fn build_sources(
    config: &MonitorConfig,
) -> Result<(Arc<dyn RoundSnapshotSource>, RuntimeClock), String> {
    match config.active_source() {
        SnapshotSource::Rpc => {
            let provider = Arc::new(build_rpc_provider(config)?);
            let clock = RuntimeClock::chain(provider.clone());
            let snapshots: Arc<dyn RoundSnapshotSource> = provider;
            Ok((snapshots, clock))
        }
        SnapshotSource::LiveFeed => {
            let (frames, receiver) = mpsc::channel(LIVE_FEED_BUFFER);
            tokio::spawn(async move {
                let mut lines = BufReader::new(tokio::io::stdin()).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) if line.trim().is_empty() => {}
                        Ok(Some(line)) => {
                            if frames.send(line).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(error) => {
                            warn!(error = %error, "failed reading live feed from stdin");
                            break;
                        }
                    }
                }
            });
            let snapshots: Arc<dyn RoundSnapshotSource> =
                Arc::new(LiveFeedProvider::spawn(receiver));
            Ok((snapshots, local_clock(config)))
        }
        SnapshotSource::Mock => {
            let path = config
                .mock_file
                .as_deref()
                .ok_or_else(|| "mock mode requires --mock-file".to_string())?;
            let provider = MockRoundProvider::from_json_file(path)
                .map_err(|error| format!("failed to load mock script: {error}"))?;
            let snapshots: Arc<dyn RoundSnapshotSource> = Arc::new(provider);
            Ok((snapshots, local_clock(config)))
        }
    }
}

fn build_rpc_provider(config: &MonitorConfig) -> Result<RpcRoundProvider, String> {
    let rpc_url = config
        .rpc_url
        .clone()
        .ok_or_else(|| "rpc mode requires --rpc-url".to_string())?;
    let vault_address = config
        .vault_address
        .clone()
        .ok_or_else(|| "rpc mode requires --vault-address".to_string())?;
    let round_state = config
        .round_selector
        .ok_or_else(|| "rpc mode requires --round-selector".to_string())?;
    RpcRoundProvider::new(
        rpc_url,
        config.rpc_timeout,
        RoundTarget {
            vault_address,
            round_id: config.round_id,
            buyer_address: config.buyer_address.clone(),
        },
        RoundEntryPoints {
            round_state,
            buyer_state: config.buyer_selector,
        },
        config.retry,
    )
    .map_err(|error| format!("failed to build RPC provider: {error}"))
}

fn local_clock(config: &MonitorConfig) -> RuntimeClock {
    match config.mock_now {
        Some(now) => RuntimeClock::Local(Arc::new(MockClock::new(now))),
        None => RuntimeClock::Local(Arc::new(SystemClock)),
    }
}

fn redact_rpc_url(raw: &str) -> String {
    match reqwest::Url::parse(raw) {
        Ok(url) => {
            let host = url.host_str().unwrap_or("unknown-host");
            let port = url
                .port()
                .map(|value| format!(":{value}"))
                .unwrap_or_default();
            format!("{}://{}{port}", url.scheme(), host)
        }
        Err(_) => "<invalid-rpc-url>".to_string(),
    }
}
