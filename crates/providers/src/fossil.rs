use std::time::Duration;

use serde_json::Value;
use vault_round_types::{OracleJobStatus, OracleStatus};

use crate::http::{BodyReadError, decode_json_body, error_body_excerpt, read_body_with_limit};
use crate::{OracleFuture, OracleStatusSource};

const MAX_STATUS_RESPONSE_BYTES: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum OracleClientError {
    #[error("invalid job id '{job_id}'")]
    InvalidJobId { job_id: String },
    #[error("job_status request failed: {0}")]
    Transport(String),
    #[error("unknown oracle job '{job_id}'")]
    UnknownJob { job_id: String },
    #[error("job_status returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("job_status invalid response: {0}")]
    InvalidResponse(String),
    #[error("job_status {0}")]
    Body(#[from] BodyReadError),
}

/// HTTP client for the Fossil job-status endpoint.
#[derive(Clone)]
pub struct FossilClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl FossilClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, OracleClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                OracleClientError::Transport(format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn status_url(&self, job_id: &str) -> Result<String, OracleClientError> {
        let valid = !job_id.is_empty()
            && job_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
        if !valid {
            return Err(OracleClientError::InvalidJobId {
                job_id: job_id.to_string(),
            });
        }
        Ok(format!("{}/job_status/{job_id}", self.base_url))
    }

    pub async fn job_status(&self, job_id: &str) -> Result<OracleStatus, OracleClientError> {
        let mut request = self.http.get(self.status_url(job_id)?);
        if let Some(api_key) = &self.api_key {
            request = request.header("x-api-key", api_key);
        }
        let mut response = request
            .send()
            .await
            .map_err(|error| OracleClientError::Transport(error.to_string()))?;
        let http_status = response.status();
        let body = read_body_with_limit(&mut response, MAX_STATUS_RESPONSE_BYTES).await?;
        interpret_status_response(job_id, http_status, &body)
    }
}

impl OracleStatusSource for FossilClient {
    fn fetch_status<'a>(&'a self, job_id: &'a str) -> OracleFuture<'a, OracleStatus> {
        Box::pin(self.job_status(job_id))
    }
}

/// Checks the HTTP status before requiring a JSON body, so gateway error pages surface as
/// `HttpStatus` rather than as a decode failure.
fn interpret_status_response(
    job_id: &str,
    http_status: reqwest::StatusCode,
    body: &[u8],
) -> Result<OracleStatus, OracleClientError> {
    if http_status == reqwest::StatusCode::NOT_FOUND {
        return Err(OracleClientError::UnknownJob {
            job_id: job_id.to_string(),
        });
    }
    if !http_status.is_success() {
        return Err(OracleClientError::HttpStatus {
            status: http_status.as_u16(),
            body: error_body_excerpt(body),
        });
    }
    parse_status_body(&decode_json_body(body)?)
}

fn parse_status_body(body: &Value) -> Result<OracleStatus, OracleClientError> {
    let raw = body
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| OracleClientError::InvalidResponse(format!("missing `status`: {body}")))?;
    Ok(OracleStatus::new(OracleJobStatus::from_raw(raw)))
}
