#![forbid(unsafe_code)]

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use starknet_types_core::felt::Felt;

pub type RoundId = u64;
pub type Timestamp = u64;
pub type StarknetFelt = Felt;

macro_rules! felt_identifier {
    ($name:ident) => {
        /// Canonical lowercase hex felt. Deserialization goes through `parse`.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn parse(raw: impl AsRef<str>) -> Result<Self, IdentifierValidationError> {
                let canonical = canonicalize_felt_hex(stringify!($name), raw.as_ref())?;
                Ok(Self(canonical))
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdentifierValidationError;

            fn try_from(raw: String) -> Result<Self, Self::Error> {
                Self::parse(raw)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = IdentifierValidationError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                Self::parse(raw)
            }
        }
    };
}

felt_identifier!(TxHash);
felt_identifier!(ContractAddress);

/// Upper bound for any round timestamp accepted from a provider.
pub const MAX_REASONABLE_ROUND_TIMESTAMP: Timestamp = 4_000_000_000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentifierValidationError {
    #[error("invalid {field} '{value}': {error}")]
    InvalidHexFelt {
        field: &'static str,
        value: String,
        error: String,
    },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoundDecodeError {
    #[error("unknown lifecycle variant index {index}")]
    UnknownLifecycleVariant { index: u64 },
    #[error("unknown lifecycle tag '{value}'")]
    UnknownLifecycleTag { value: String },
    #[error("felt value {value} for {field} does not fit into {target}")]
    FeltOutOfRange {
        field: &'static str,
        value: String,
        target: &'static str,
    },
    #[error("round layout has {actual} felts, expected at least {expected}")]
    TruncatedLayout { expected: usize, actual: usize },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoundValidationError {
    #[error("invalid timestamp {timestamp} for {field} in round {round_id}: {reason}")]
    InvalidTimestamp {
        round_id: RoundId,
        field: &'static str,
        timestamp: Timestamp,
        reason: &'static str,
    },
    #[error(
        "round {round_id} timeline is out of order: {earlier} ({earlier_ts}) after {later} ({later_ts})"
    )]
    TimelineOutOfOrder {
        round_id: RoundId,
        earlier: &'static str,
        earlier_ts: Timestamp,
        later: &'static str,
        later_ts: Timestamp,
    },
    #[error("round id must be > 0")]
    ZeroRoundId,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown connection mode '{value}': expected one of rpc, live-feed, ws, mock, demo")]
pub struct ConnectionModeParseError {
    pub value: String,
}

/// Coarse phase a round reports on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LifecycleTag {
    Open,
    Auctioning,
    Running,
    Settled,
}

impl LifecycleTag {
    pub const ALL: [LifecycleTag; 4] = [
        LifecycleTag::Open,
        LifecycleTag::Auctioning,
        LifecycleTag::Running,
        LifecycleTag::Settled,
    ];

    /// Decodes the contract enum's active variant index.
    pub fn from_variant_index(index: u64) -> Result<Self, RoundDecodeError> {
        match index {
            0 => Ok(Self::Open),
            1 => Ok(Self::Auctioning),
            2 => Ok(Self::Running),
            3 => Ok(Self::Settled),
            _ => Err(RoundDecodeError::UnknownLifecycleVariant { index }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Auctioning => "Auctioning",
            Self::Running => "Running",
            Self::Settled => "Settled",
        }
    }
}

impl fmt::Display for LifecycleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleTag {
    type Err = RoundDecodeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "auctioning" => Ok(Self::Auctioning),
            "running" => Ok(Self::Running),
            "settled" => Ok(Self::Settled),
            _ => Err(RoundDecodeError::UnknownLifecycleTag {
                value: raw.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OracleJobStatus {
    Pending,
    Completed,
    Failed,
}

impl OracleJobStatus {
    /// Maps a raw job status string. Anything unrecognised is reported as `Failed` so the
    /// request can be re-issued.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "completed" => Self::Completed,
            _ => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OracleStatus {
    pub status: OracleJobStatus,
}

impl OracleStatus {
    pub fn new(status: OracleJobStatus) -> Self {
        Self { status }
    }
}

/// Client-side display state: the lifecycle tags plus the `Pending` and `FossilReady`
/// overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectiveState {
    Open,
    Auctioning,
    Running,
    Settled,
    Pending,
    FossilReady,
}

impl EffectiveState {
    pub const ALL: [EffectiveState; 6] = [
        EffectiveState::Open,
        EffectiveState::Auctioning,
        EffectiveState::Running,
        EffectiveState::Settled,
        EffectiveState::Pending,
        EffectiveState::FossilReady,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Auctioning => "Auctioning",
            Self::Running => "Running",
            Self::Settled => "Settled",
            Self::Pending => "Pending",
            Self::FossilReady => "FossilReady",
        }
    }
}

impl From<LifecycleTag> for EffectiveState {
    fn from(tag: LifecycleTag) -> Self {
        match tag {
            LifecycleTag::Open => Self::Open,
            LifecycleTag::Auctioning => Self::Auctioning,
            LifecycleTag::Running => Self::Running,
            LifecycleTag::Settled => Self::Settled,
        }
    }
}

impl fmt::Display for EffectiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionSet {
    pub can_auction_start: bool,
    pub can_auction_end: bool,
    pub can_round_settle: bool,
    pub can_send_fossil_request: bool,
}

impl PermissionSet {
    pub const NONE: PermissionSet = PermissionSet {
        can_auction_start: false,
        can_auction_end: false,
        can_round_settle: false,
        can_send_fossil_request: false,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionMode {
    Rpc,
    LiveFeed,
    Mock,
    Demo,
}

impl ConnectionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rpc => "rpc",
            Self::LiveFeed => "live-feed",
            Self::Mock => "mock",
            Self::Demo => "demo",
        }
    }

    pub fn is_demo(self) -> bool {
        matches!(self, Self::Demo)
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionMode {
    type Err = ConnectionModeParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "rpc" => Ok(Self::Rpc),
            "live-feed" | "live_feed" | "ws" => Ok(Self::LiveFeed),
            "mock" => Ok(Self::Mock),
            "demo" => Ok(Self::Demo),
            _ => Err(ConnectionModeParseError {
                value: raw.to_string(),
            }),
        }
    }
}

/// Immutable snapshot of one vault round. Integers travel as decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundState {
    pub vault_address: ContractAddress,
    #[serde(with = "decimal")]
    pub round_id: RoundId,
    pub lifecycle_tag: LifecycleTag,
    #[serde(with = "decimal")]
    pub deployment_date: Timestamp,
    #[serde(with = "decimal")]
    pub auction_start_date: Timestamp,
    #[serde(with = "decimal")]
    pub auction_end_date: Timestamp,
    #[serde(with = "decimal")]
    pub option_settle_date: Timestamp,
    #[serde(with = "decimal")]
    pub strike_price: u128,
    #[serde(with = "decimal")]
    pub reserve_price: u128,
    /// Cap level in basis points.
    #[serde(with = "decimal")]
    pub cap_level: u128,
    #[serde(default, with = "decimal::option")]
    pub clearing_price: Option<u128>,
    #[serde(default, with = "decimal::option")]
    pub settlement_price: Option<u128>,
    #[serde(with = "decimal")]
    pub starting_liquidity: u128,
    #[serde(with = "decimal")]
    pub locked_liquidity: u128,
    #[serde(with = "decimal")]
    pub unlocked_liquidity: u128,
    #[serde(with = "decimal")]
    pub stashed_liquidity: u128,
    #[serde(with = "decimal")]
    pub available_options: u128,
    #[serde(with = "decimal")]
    pub options_sold: u128,
    #[serde(with = "decimal")]
    pub premiums: u128,
    #[serde(with = "decimal")]
    pub payout_per_option: u128,
    /// Liquidity-provider performance in basis points.
    #[serde(with = "decimal")]
    pub performance_lp: i64,
    /// Option-buyer performance in basis points.
    #[serde(with = "decimal")]
    pub performance_ob: i64,
}

impl RoundState {
    pub fn validate(&self) -> Result<(), RoundValidationError> {
        if self.round_id == 0 {
            return Err(RoundValidationError::ZeroRoundId);
        }
        let timeline = [
            ("deployment_date", self.deployment_date),
            ("auction_start_date", self.auction_start_date),
            ("auction_end_date", self.auction_end_date),
            ("option_settle_date", self.option_settle_date),
        ];
        for (field, timestamp) in timeline {
            if timestamp > MAX_REASONABLE_ROUND_TIMESTAMP {
                return Err(RoundValidationError::InvalidTimestamp {
                    round_id: self.round_id,
                    field,
                    timestamp,
                    reason: "exceeds maximum reasonable timestamp",
                });
            }
        }
        for pair in timeline.windows(2) {
            let (earlier, earlier_ts) = pair[0];
            let (later, later_ts) = pair[1];
            if earlier_ts > later_ts {
                return Err(RoundValidationError::TimelineOutOfOrder {
                    round_id: self.round_id,
                    earlier,
                    earlier_ts,
                    later,
                    later_ts,
                });
            }
        }
        Ok(())
    }
}

/// Per-account view of a round for an option buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionBuyerState {
    pub address: ContractAddress,
    #[serde(with = "decimal")]
    pub round_id: RoundId,
    #[serde(default)]
    pub bids: Vec<Bid>,
    #[serde(with = "decimal")]
    pub mintable_options: u128,
    #[serde(with = "decimal")]
    pub refundable_balance: u128,
    #[serde(with = "decimal")]
    pub total_options: u128,
    #[serde(default)]
    pub has_minted: bool,
    #[serde(default)]
    pub has_refunded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub bid_id: String,
    #[serde(with = "decimal")]
    pub amount: u128,
    #[serde(with = "decimal")]
    pub price: u128,
}

fn canonicalize_felt_hex(
    field: &'static str,
    value: &str,
) -> Result<String, IdentifierValidationError> {
    let normalized = value.trim();
    let prefixed = if normalized.starts_with("0x") || normalized.starts_with("0X") {
        normalized.to_string()
    } else {
        format!("0x{normalized}")
    };
    StarknetFelt::from_str(&prefixed)
        .map(|felt| format!("{:#x}", felt))
        .map_err(|error| IdentifierValidationError::InvalidHexFelt {
            field,
            value: value.to_string(),
            error: error.to_string(),
        })
}

/// Serde adapter for integers carried as decimal strings. JSON numbers are accepted on input.
pub mod decimal {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawInteger {
        Text(String),
        Unsigned(u64),
        Signed(i64),
    }

    impl RawInteger {
        fn into_text(self) -> String {
            match self {
                RawInteger::Text(text) => text,
                RawInteger::Unsigned(value) => value.to_string(),
                RawInteger::Signed(value) => value.to_string(),
            }
        }
    }

    fn parse<T, E>(raw: RawInteger) -> Result<T, E>
    where
        T: FromStr,
        T::Err: Display,
        E: serde::de::Error,
    {
        let text = raw.into_text();
        text.trim()
            .parse::<T>()
            .map_err(|error| E::custom(format!("invalid decimal integer '{text}': {error}")))
    }

    pub fn serialize<T: Display, S: Serializer>(
        value: &T,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        let raw = RawInteger::deserialize(deserializer)
            .map_err(|_| D::Error::custom("expected a decimal string or integer"))?;
        parse(raw)
    }

    pub mod option {
        use super::*;

        pub fn serialize<T: Display, S: Serializer>(
            value: &Option<T>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => serializer.collect_str(value),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
        where
            T: FromStr,
            T::Err: Display,
            D: Deserializer<'de>,
        {
            match Option::<RawInteger>::deserialize(deserializer)? {
                Some(raw) => parse(raw).map(Some),
                None => Ok(None),
            }
        }
    }
}
