#![forbid(unsafe_code)]

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use vault_round_core::{ProviderSnapshot, SnapshotSource};
use vault_round_types::{OracleStatus, RoundDecodeError, RoundValidationError, Timestamp};

pub mod fossil;
mod http;
pub mod live_feed;
pub mod mock;
pub mod rpc;

pub use fossil::{FossilClient, OracleClientError};
pub use http::BodyReadError;
pub use live_feed::{FeedMessage, LiveFeedProvider, LiveFeedStats};
pub use mock::MockRoundProvider;
pub use rpc::{
    RoundEntryPoints, RoundTarget, RpcRoundProvider, decode_buyer_layout, decode_round_layout,
};

pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RPC_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RPC_RETRY_BACKOFF_MS: u64 = 250;
const MAX_RETRY_BACKOFF_MS: u128 = 5_000;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{method} request failed: {message}")]
    Transport { method: String, message: String },
    #[error("{method} returned HTTP {status}: {body}")]
    HttpStatus {
        method: String,
        status: u16,
        body: String,
    },
    #[error("{method} error payload: {payload}")]
    Rpc { method: String, payload: String },
    #[error("{method} response too large: {size} exceeds {max} bytes")]
    ResponseTooLarge {
        method: String,
        size: u64,
        max: usize,
    },
    #[error("{method} invalid response: {message}")]
    InvalidResponse { method: String, message: String },
    #[error(transparent)]
    Decode(#[from] RoundDecodeError),
    #[error(transparent)]
    Validation(#[from] RoundValidationError),
    #[error("{method} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        method: String,
        attempts: u32,
        last: Box<ProviderError>,
    },
    #[error("{0}")]
    Internal(String),
}

pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;
pub type OracleFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, OracleClientError>> + Send + 'a>>;

/// A provider that yields a complete snapshot per fetch.
pub trait RoundSnapshotSource: Send + Sync {
    fn source(&self) -> SnapshotSource;
    fn fetch_snapshot(&self) -> SourceFuture<'_, ProviderSnapshot>;
}

pub trait BlockClockSource: Send + Sync {
    fn fetch_block_timestamp(&self) -> SourceFuture<'_, Timestamp>;
}

pub trait OracleStatusSource: Send + Sync {
    fn fetch_status<'a>(&'a self, job_id: &'a str) -> OracleFuture<'a, OracleStatus>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_RPC_MAX_RETRIES,
            base_backoff: Duration::from_millis(DEFAULT_RPC_RETRY_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    pub const NONE: RetryPolicy = RetryPolicy {
        max_retries: 0,
        base_backoff: Duration::ZERO,
    };

    pub fn backoff(&self, attempt: u32) -> Duration {
        if self.base_backoff.is_zero() {
            return Duration::ZERO;
        }
        let factor = 1_u128 << attempt.min(20);
        let base_ms = self.base_backoff.as_millis();
        let backoff_ms = base_ms.saturating_mul(factor).min(MAX_RETRY_BACKOFF_MS);
        Duration::from_millis(backoff_ms as u64)
    }

    /// Runs `op` until it succeeds or the retry budget is spent.
    pub async fn run<T, F, Fut>(&self, method: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0_u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= self.max_retries {
                        if self.max_retries == 0 {
                            return Err(error);
                        }
                        return Err(ProviderError::RetriesExhausted {
                            method: method.to_string(),
                            attempts: self.max_retries.saturating_add(1),
                            last: Box::new(error),
                        });
                    }
                    let backoff = self.backoff(attempt);
                    tracing::debug!(
                        method,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        %error,
                        "retrying provider call"
                    );
                    if !backoff.is_zero() {
                        tokio::time::sleep(backoff).await;
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}
