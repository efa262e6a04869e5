use std::path::PathBuf;
use std::time::Duration;

use vault_round_core::{DEFAULT_FOSSIL_DELAY_SECS, SessionConfig, SnapshotSource, SourceSelector};
use vault_round_providers::{
    DEFAULT_RPC_MAX_RETRIES, DEFAULT_RPC_RETRY_BACKOFF_MS, DEFAULT_RPC_TIMEOUT_SECS, RetryPolicy,
};
use vault_round_types::{ConnectionMode, ContractAddress, RoundId, StarknetFelt, Timestamp};

pub const DEFAULT_STATUS_BIND: &str = "127.0.0.1:9646";
pub const DEFAULT_POLL_MS: u64 = 4_000;
pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{flag} requires a value")]
    MissingValue { flag: String },
    #[error("unknown flag `{flag}`")]
    UnknownFlag { flag: String },
    #[error("invalid {field} value `{value}`: {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
    #[error("missing {field}; pass {flag} or set {env}")]
    Missing {
        field: &'static str,
        flag: &'static str,
        env: &'static str,
    },
    #[error("{field} must be > 0")]
    Zero { field: &'static str },
    #[error("help requested")]
    HelpRequested,
}

/// Daemon settings. CLI flags win over `VAULT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub mode: ConnectionMode,
    pub demo_source: SnapshotSource,
    pub rpc_url: Option<String>,
    pub vault_address: Option<ContractAddress>,
    pub round_id: Option<RoundId>,
    pub round_selector: Option<StarknetFelt>,
    pub buyer_selector: Option<StarknetFelt>,
    pub buyer_address: Option<ContractAddress>,
    pub fossil_url: Option<String>,
    pub fossil_api_key: Option<String>,
    pub fossil_delay_secs: u64,
    pub mock_file: Option<PathBuf>,
    pub mock_now: Option<Timestamp>,
    pub pending_tx_max_age_secs: Option<u64>,
    pub poll_interval: Duration,
    pub status_bind: String,
    pub rpc_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::Rpc,
            demo_source: SnapshotSource::Rpc,
            rpc_url: None,
            vault_address: None,
            round_id: None,
            round_selector: None,
            buyer_selector: None,
            buyer_address: None,
            fossil_url: None,
            fossil_api_key: None,
            fossil_delay_secs: DEFAULT_FOSSIL_DELAY_SECS,
            mock_file: None,
            mock_now: None,
            pending_tx_max_age_secs: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_MS),
            status_bind: DEFAULT_STATUS_BIND.to_string(),
            rpc_timeout: Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

impl MonitorConfig {
    pub fn selector(&self) -> SourceSelector {
        SourceSelector::with_demo_source(self.demo_source)
    }

    pub fn active_source(&self) -> SnapshotSource {
        self.selector().source_for(self.mode)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            selector: self.selector(),
            ..SessionConfig::new(self.mode, self.fossil_delay_secs)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Zero {
                field: "poll_interval",
            });
        }
        if self.rpc_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "rpc_timeout",
            });
        }
        if self.pending_tx_max_age_secs == Some(0) {
            return Err(ConfigError::Zero {
                field: "pending_tx_max_age_secs",
            });
        }
        match self.active_source() {
            SnapshotSource::Rpc => {
                require_text(self.rpc_url.as_deref(), "rpc_url", "--rpc-url", "VAULT_RPC_URL")?;
                if self.vault_address.is_none() {
                    return Err(ConfigError::Missing {
                        field: "vault_address",
                        flag: "--vault-address",
                        env: "VAULT_ADDRESS",
                    });
                }
                if self.round_selector.is_none() {
                    return Err(ConfigError::Missing {
                        field: "round_selector",
                        flag: "--round-selector",
                        env: "VAULT_ROUND_SELECTOR",
                    });
                }
            }
            SnapshotSource::Mock => {
                if self.mock_file.is_none() {
                    return Err(ConfigError::Missing {
                        field: "mock_file",
                        flag: "--mock-file",
                        env: "VAULT_MOCK_FILE",
                    });
                }
            }
            SnapshotSource::LiveFeed => {}
        }
        if let Some(url) = self.fossil_url.as_deref()
            && url.trim().is_empty()
        {
            return Err(ConfigError::InvalidValue {
                field: "fossil_url".to_string(),
                value: url.to_string(),
                reason: "cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Parses CLI arguments (without the program name) with `env` as the fallback lookup.
    pub fn from_args<I, E>(args: I, env: E) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = String>,
        E: Fn(&str) -> Option<String>,
    {
        let mut cli = CliValues::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let flag = arg.as_str();
            match flag {
                "--help" | "-h" => return Err(ConfigError::HelpRequested),
                "--mode" | "--rpc-url" | "--vault-address" | "--round-id" | "--round-selector"
                | "--buyer-selector" | "--buyer-address" | "--fossil-url" | "--fossil-api-key"
                | "--fossil-delay-secs" | "--demo-source" | "--mock-file" | "--mock-now"
                | "--pending-tx-max-age-secs" | "--poll-ms" | "--status-bind"
                | "--rpc-timeout-secs" | "--rpc-max-retries" | "--rpc-retry-backoff-ms" => {
                    let value = args.next().ok_or_else(|| ConfigError::MissingValue {
                        flag: flag.to_string(),
                    })?;
                    cli.set(flag, value);
                }
                unknown => {
                    return Err(ConfigError::UnknownFlag {
                        flag: unknown.to_string(),
                    });
                }
            }
        }

        let lookup = |flag: &str, env_name: &str| cli.get(flag).or_else(|| env(env_name));
        let defaults = Self::default();

        let config = Self {
            mode: match lookup("--mode", "VAULT_MODE") {
                Some(raw) => raw
                    .parse::<ConnectionMode>()
                    .map_err(|error| invalid("--mode", &raw, error.to_string()))?,
                None => defaults.mode,
            },
            demo_source: match lookup("--demo-source", "VAULT_DEMO_SOURCE") {
                Some(raw) => parse_demo_source(&raw)?,
                None => defaults.demo_source,
            },
            rpc_url: lookup("--rpc-url", "VAULT_RPC_URL"),
            vault_address: lookup("--vault-address", "VAULT_ADDRESS")
                .map(|raw| parse_address("--vault-address", &raw))
                .transpose()?,
            round_id: lookup("--round-id", "VAULT_ROUND_ID")
                .map(|raw| parse_positive_u64(&raw, "--round-id"))
                .transpose()?,
            round_selector: lookup("--round-selector", "VAULT_ROUND_SELECTOR")
                .map(|raw| parse_selector("--round-selector", &raw))
                .transpose()?,
            buyer_selector: lookup("--buyer-selector", "VAULT_BUYER_SELECTOR")
                .map(|raw| parse_selector("--buyer-selector", &raw))
                .transpose()?,
            buyer_address: lookup("--buyer-address", "VAULT_BUYER_ADDRESS")
                .map(|raw| parse_address("--buyer-address", &raw))
                .transpose()?,
            fossil_url: lookup("--fossil-url", "VAULT_FOSSIL_URL"),
            fossil_api_key: lookup("--fossil-api-key", "VAULT_FOSSIL_API_KEY"),
            fossil_delay_secs: lookup("--fossil-delay-secs", "VAULT_FOSSIL_DELAY_SECS")
                .map(|raw| parse_u64(&raw, "--fossil-delay-secs"))
                .transpose()?
                .unwrap_or(defaults.fossil_delay_secs),
            mock_file: lookup("--mock-file", "VAULT_MOCK_FILE").map(PathBuf::from),
            mock_now: lookup("--mock-now", "VAULT_MOCK_NOW")
                .map(|raw| parse_u64(&raw, "--mock-now"))
                .transpose()?,
            pending_tx_max_age_secs: lookup(
                "--pending-tx-max-age-secs",
                "VAULT_PENDING_TX_MAX_AGE_SECS",
            )
            .map(|raw| parse_positive_u64(&raw, "--pending-tx-max-age-secs"))
            .transpose()?,
            poll_interval: lookup("--poll-ms", "VAULT_POLL_MS")
                .map(|raw| parse_positive_u64(&raw, "--poll-ms"))
                .transpose()?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            status_bind: lookup("--status-bind", "VAULT_STATUS_BIND")
                .unwrap_or(defaults.status_bind),
            rpc_timeout: lookup("--rpc-timeout-secs", "VAULT_RPC_TIMEOUT_SECS")
                .map(|raw| parse_positive_u64(&raw, "--rpc-timeout-secs"))
                .transpose()?
                .map(Duration::from_secs)
                .unwrap_or(defaults.rpc_timeout),
            retry: RetryPolicy {
                max_retries: lookup("--rpc-max-retries", "VAULT_RPC_MAX_RETRIES")
                    .map(|raw| parse_non_negative_u32(&raw, "--rpc-max-retries"))
                    .transpose()?
                    .unwrap_or(DEFAULT_RPC_MAX_RETRIES),
                base_backoff: Duration::from_millis(
                    lookup("--rpc-retry-backoff-ms", "VAULT_RPC_RETRY_BACKOFF_MS")
                        .map(|raw| parse_positive_u64(&raw, "--rpc-retry-backoff-ms"))
                        .transpose()?
                        .unwrap_or(DEFAULT_RPC_RETRY_BACKOFF_MS),
                ),
            },
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Default)]
struct CliValues {
    values: Vec<(String, String)>,
}

impl CliValues {
    fn set(&mut self, flag: &str, value: String) {
        self.values.retain(|(existing, _)| existing != flag);
        self.values.push((flag.to_string(), value));
    }

    fn get(&self, flag: &str) -> Option<String> {
        self.values
            .iter()
            .find(|(existing, _)| existing == flag)
            .map(|(_, value)| value.clone())
    }
}

fn require_text(
    value: Option<&str>,
    field: &'static str,
    flag: &'static str,
    env: &'static str,
) -> Result<(), ConfigError> {
    match value {
        Some(text) if !text.trim().is_empty() => Ok(()),
        _ => Err(ConfigError::Missing { field, flag, env }),
    }
}

fn invalid(field: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_demo_source(raw: &str) -> Result<SnapshotSource, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "rpc" => Ok(SnapshotSource::Rpc),
        "live-feed" | "live_feed" | "ws" => Ok(SnapshotSource::LiveFeed),
        "mock" => Ok(SnapshotSource::Mock),
        _ => Err(invalid("--demo-source", raw, "expected rpc, live-feed or mock")),
    }
}

fn parse_address(field: &str, raw: &str) -> Result<ContractAddress, ConfigError> {
    ContractAddress::parse(raw).map_err(|error| invalid(field, raw, error.to_string()))
}

fn parse_selector(field: &str, raw: &str) -> Result<StarknetFelt, ConfigError> {
    StarknetFelt::from_hex(raw.trim()).map_err(|error| invalid(field, raw, error.to_string()))
}

fn parse_u64(raw: &str, field: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|error| invalid(field, raw, error.to_string()))
}

fn parse_positive_u64(raw: &str, field: &str) -> Result<u64, ConfigError> {
    let parsed = parse_u64(raw, field)?;
    if parsed == 0 {
        return Err(invalid(field, raw, "must be > 0"));
    }
    Ok(parsed)
}

fn parse_non_negative_u32(raw: &str, field: &str) -> Result<u32, ConfigError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|error| invalid(field, raw, error.to_string()))
}

pub fn help_text() -> String {
    format!(
        "usage: round-monitor [options]\n\
options:\n\
  --mode <rpc|live-feed|mock|demo>    Snapshot source (default: rpc)\n\
  --demo-source <rpc|live-feed|mock>  Provider read in demo mode (default: rpc)\n\
  --rpc-url <url>                     Starknet JSON-RPC endpoint\n\
  --vault-address <felt>              Vault contract address\n\
  --round-id <id>                     Round to follow (default: the vault's current round)\n\
  --round-selector <felt>             Entry point selector of the round-state view\n\
  --buyer-selector <felt>             Entry point selector of the buyer-state view\n\
  --buyer-address <felt>              Option buyer to follow\n\
  --fossil-url <url>                  Fossil API base URL\n\
  --fossil-api-key <key>              Fossil API key\n\
  --fossil-delay-secs <secs>          Settlement delay (default: {DEFAULT_FOSSIL_DELAY_SECS})\n\
  --mock-file <path>                  JSON array of scripted snapshots for mock mode\n\
  --mock-now <secs>                   Fixed clock for mock mode\n\
  --pending-tx-max-age-secs <secs>    Drop tracked transactions older than this\n\
  --poll-ms <ms>                      Poll interval (default: {DEFAULT_POLL_MS})\n\
  --status-bind <addr>                Status endpoint bind (default: {DEFAULT_STATUS_BIND})\n\
  --rpc-timeout-secs <secs>           RPC timeout (default: {DEFAULT_RPC_TIMEOUT_SECS})\n\
  --rpc-max-retries <n>               RPC max retries (default: {DEFAULT_RPC_MAX_RETRIES})\n\
  --rpc-retry-backoff-ms <ms>         Backoff base (default: {DEFAULT_RPC_RETRY_BACKOFF_MS})\n\
environment:\n\
  VAULT_MODE, VAULT_DEMO_SOURCE, VAULT_RPC_URL, VAULT_ADDRESS, VAULT_ROUND_ID,\n\
  VAULT_ROUND_SELECTOR, VAULT_BUYER_SELECTOR, VAULT_BUYER_ADDRESS, VAULT_FOSSIL_URL,\n\
  VAULT_FOSSIL_API_KEY, VAULT_FOSSIL_DELAY_SECS, VAULT_MOCK_FILE, VAULT_MOCK_NOW,\n\
  VAULT_PENDING_TX_MAX_AGE_SECS, VAULT_POLL_MS, VAULT_STATUS_BIND, VAULT_RPC_TIMEOUT_SECS,\n\
  VAULT_RPC_MAX_RETRIES, VAULT_RPC_RETRY_BACKOFF_MS\n\
  RUST_LOG                            Log filter (default: info)"
    )
}
