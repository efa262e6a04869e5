use std::time::Duration;

use serde_json::{Value, json};
use vault_round_core::{ProviderSnapshot, SnapshotSource};
use vault_round_types::{
    ContractAddress, LifecycleTag, OptionBuyerState, RoundDecodeError, RoundId, RoundState,
    StarknetFelt, Timestamp,
};

use crate::http::{
    BodyReadError, MAX_RESPONSE_BYTES, decode_json_body, error_body_excerpt, read_body_with_limit,
};
use crate::{BlockClockSource, ProviderError, RetryPolicy, RoundSnapshotSource, SourceFuture};

pub const ROUND_LAYOUT_LEN: usize = 33;
pub const BUYER_LAYOUT_LEN: usize = 9;

/// Selectors of the vault's read entry points, as hex felts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundEntryPoints {
    pub round_state: StarknetFelt,
    pub buyer_state: Option<StarknetFelt>,
}

/// Which vault and round to read. `round_id: None` asks the vault for its current round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundTarget {
    pub vault_address: ContractAddress,
    pub round_id: Option<RoundId>,
    pub buyer_address: Option<ContractAddress>,
}

#[derive(Clone)]
pub struct RpcRoundProvider {
    http: reqwest::Client,
    rpc_url: String,
    target: RoundTarget,
    entry_points: RoundEntryPoints,
    retry: RetryPolicy,
}

impl RpcRoundProvider {
    pub fn new(
        rpc_url: String,
        timeout: Duration,
        target: RoundTarget,
        entry_points: RoundEntryPoints,
        retry: RetryPolicy,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                ProviderError::Internal(format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self {
            http,
            rpc_url,
            target,
            entry_points,
            retry,
        })
    }

    pub fn target(&self) -> &RoundTarget {
        &self.target
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let mut response = self
            .http
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|error| ProviderError::Transport {
                method: method.to_string(),
                message: error.to_string(),
            })?;
        let http_status = response.status();
        let raw = read_body_with_limit(&mut response, MAX_RESPONSE_BYTES)
            .await
            .map_err(|error| body_error(method, error))?;

        if !http_status.is_success() {
            return Err(ProviderError::HttpStatus {
                method: method.to_string(),
                status: http_status.as_u16(),
                body: error_body_excerpt(&raw),
            });
        }
        let body = decode_json_body(&raw).map_err(|error| body_error(method, error))?;
        if let Some(error) = body.get("error") {
            return Err(ProviderError::Rpc {
                method: method.to_string(),
                payload: error.to_string(),
            });
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| ProviderError::InvalidResponse {
                method: method.to_string(),
                message: format!("missing `result`: {body}"),
            })
    }

    async fn contract_call(
        &self,
        selector: &StarknetFelt,
        calldata: Vec<String>,
    ) -> Result<Vec<StarknetFelt>, ProviderError> {
        let params = json!([
            {
                "contract_address": self.target.vault_address.as_ref(),
                "entry_point_selector": format!("{selector:#x}"),
                "calldata": calldata,
            },
            "latest"
        ]);
        let result = self.call("starknet_call", params).await?;
        parse_felt_array("starknet_call", &result)
    }

    fn round_calldata(&self) -> String {
        format!("{:#x}", self.target.round_id.unwrap_or(0))
    }

    pub async fn fetch_round(&self) -> Result<RoundState, ProviderError> {
        let felts = self
            .contract_call(&self.entry_points.round_state, vec![self.round_calldata()])
            .await?;
        let round = decode_round_layout(self.target.vault_address.clone(), &felts)?;
        round.validate()?;
        Ok(round)
    }

    pub async fn fetch_buyer(&self) -> Result<Option<OptionBuyerState>, ProviderError> {
        let (Some(selector), Some(buyer)) = (
            self.entry_points.buyer_state.as_ref(),
            self.target.buyer_address.as_ref(),
        ) else {
            return Ok(None);
        };
        let felts = self
            .contract_call(selector, vec![self.round_calldata(), buyer.to_string()])
            .await?;
        Ok(Some(decode_buyer_layout(buyer.clone(), &felts)?))
    }

    async fn fetch_snapshot_once(&self) -> Result<ProviderSnapshot, ProviderError> {
        let (round, buyer) = tokio::try_join!(self.fetch_round(), self.fetch_buyer())?;
        Ok(ProviderSnapshot {
            round: Some(round),
            buyer,
        })
    }

    pub async fn fetch_latest_block_timestamp(&self) -> Result<Timestamp, ProviderError> {
        let method = "starknet_getBlockWithTxHashes";
        let block = self.call(method, json!(["latest"])).await?;
        block
            .get("timestamp")
            .and_then(Value::as_u64)
            .ok_or_else(|| ProviderError::InvalidResponse {
                method: method.to_string(),
                message: format!("missing numeric `timestamp`: {block}"),
            })
    }
}

impl RoundSnapshotSource for RpcRoundProvider {
    fn source(&self) -> SnapshotSource {
        SnapshotSource::Rpc
    }

    fn fetch_snapshot(&self) -> SourceFuture<'_, ProviderSnapshot> {
        Box::pin(async move {
            self.retry
                .run("starknet_call", move || self.fetch_snapshot_once())
                .await
        })
    }
}

impl BlockClockSource for RpcRoundProvider {
    fn fetch_block_timestamp(&self) -> SourceFuture<'_, Timestamp> {
        Box::pin(async move {
            self.retry
                .run("starknet_getBlockWithTxHashes", move || {
                    self.fetch_latest_block_timestamp()
                })
                .await
        })
    }
}

fn body_error(method: &str, error: BodyReadError) -> ProviderError {
    match error {
        BodyReadError::TooLarge { size, max } => ProviderError::ResponseTooLarge {
            method: method.to_string(),
            size,
            max,
        },
        other => ProviderError::InvalidResponse {
            method: method.to_string(),
            message: other.to_string(),
        },
    }
}

fn parse_felt_array(method: &str, result: &Value) -> Result<Vec<StarknetFelt>, ProviderError> {
    let items = result
        .as_array()
        .ok_or_else(|| ProviderError::InvalidResponse {
            method: method.to_string(),
            message: format!("expected felt array, got {result}"),
        })?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .and_then(|raw| StarknetFelt::from_hex(raw).ok())
                .ok_or_else(|| ProviderError::InvalidResponse {
                    method: method.to_string(),
                    message: format!("invalid felt {item}"),
                })
        })
        .collect()
}

/// Decodes the vault's flat round layout. u256 values arrive as `(low, high)` felt pairs and
/// must have a zero high half. A zero clearing or settlement price means "not yet known".
pub fn decode_round_layout(
    vault_address: ContractAddress,
    felts: &[StarknetFelt],
) -> Result<RoundState, RoundDecodeError> {
    if felts.len() < ROUND_LAYOUT_LEN {
        return Err(RoundDecodeError::TruncatedLayout {
            expected: ROUND_LAYOUT_LEN,
            actual: felts.len(),
        });
    }
    let mut cursor = FeltCursor::new(felts);
    let round_id = cursor.u64("round_id")?;
    let lifecycle_tag = LifecycleTag::from_variant_index(cursor.u64("lifecycle_tag")?)?;
    Ok(RoundState {
        vault_address,
        round_id,
        lifecycle_tag,
        deployment_date: cursor.u64("deployment_date")?,
        auction_start_date: cursor.u64("auction_start_date")?,
        auction_end_date: cursor.u64("auction_end_date")?,
        option_settle_date: cursor.u64("option_settle_date")?,
        strike_price: cursor.u256("strike_price")?,
        reserve_price: cursor.u256("reserve_price")?,
        cap_level: cursor.u128("cap_level")?,
        clearing_price: non_zero(cursor.u256("clearing_price")?),
        settlement_price: non_zero(cursor.u256("settlement_price")?),
        starting_liquidity: cursor.u256("starting_liquidity")?,
        locked_liquidity: cursor.u256("locked_liquidity")?,
        unlocked_liquidity: cursor.u256("unlocked_liquidity")?,
        stashed_liquidity: cursor.u256("stashed_liquidity")?,
        available_options: cursor.u256("available_options")?,
        options_sold: cursor.u256("options_sold")?,
        premiums: cursor.u256("premiums")?,
        payout_per_option: cursor.u256("payout_per_option")?,
        performance_lp: cursor.i64("performance_lp")?,
        performance_ob: cursor.i64("performance_ob")?,
    })
}

pub fn decode_buyer_layout(
    address: ContractAddress,
    felts: &[StarknetFelt],
) -> Result<OptionBuyerState, RoundDecodeError> {
    if felts.len() < BUYER_LAYOUT_LEN {
        return Err(RoundDecodeError::TruncatedLayout {
            expected: BUYER_LAYOUT_LEN,
            actual: felts.len(),
        });
    }
    let mut cursor = FeltCursor::new(felts);
    Ok(OptionBuyerState {
        address,
        round_id: cursor.u64("round_id")?,
        bids: Vec::new(),
        mintable_options: cursor.u256("mintable_options")?,
        refundable_balance: cursor.u256("refundable_balance")?,
        total_options: cursor.u256("total_options")?,
        has_minted: cursor.bool("has_minted")?,
        has_refunded: cursor.bool("has_refunded")?,
    })
}

fn non_zero(value: u128) -> Option<u128> {
    (value != 0).then_some(value)
}

struct FeltCursor<'a> {
    felts: &'a [StarknetFelt],
    position: usize,
}

impl<'a> FeltCursor<'a> {
    fn new(felts: &'a [StarknetFelt]) -> Self {
        Self { felts, position: 0 }
    }

    fn next(&mut self) -> Result<&'a StarknetFelt, RoundDecodeError> {
        let felt = self
            .felts
            .get(self.position)
            .ok_or(RoundDecodeError::TruncatedLayout {
                expected: self.position + 1,
                actual: self.felts.len(),
            })?;
        self.position += 1;
        Ok(felt)
    }

    fn u128(&mut self, field: &'static str) -> Result<u128, RoundDecodeError> {
        felt_to_u128(field, self.next()?)
    }

    fn u64(&mut self, field: &'static str) -> Result<u64, RoundDecodeError> {
        let felt = self.next()?;
        let value = felt_to_u128(field, felt)?;
        u64::try_from(value).map_err(|_| out_of_range(field, felt, "u64"))
    }

    fn u256(&mut self, field: &'static str) -> Result<u128, RoundDecodeError> {
        let low = self.u128(field)?;
        let high = self.next()?;
        if *high != StarknetFelt::ZERO {
            return Err(out_of_range(field, high, "u128"));
        }
        Ok(low)
    }

    fn i64(&mut self, field: &'static str) -> Result<i64, RoundDecodeError> {
        let felt = self.next()?;
        if let Ok(positive) = felt_to_u128(field, felt)
            && let Ok(value) = i64::try_from(positive)
        {
            return Ok(value);
        }
        let magnitude =
            felt_to_u128(field, &(-*felt)).map_err(|_| out_of_range(field, felt, "i64"))?;
        i64::try_from(-(magnitude as i128)).map_err(|_| out_of_range(field, felt, "i64"))
    }

    fn bool(&mut self, field: &'static str) -> Result<bool, RoundDecodeError> {
        let felt = self.next()?;
        match felt_to_u128(field, felt)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(out_of_range(field, felt, "bool")),
        }
    }
}

fn felt_to_u128(field: &'static str, felt: &StarknetFelt) -> Result<u128, RoundDecodeError> {
    let bytes = felt.to_bytes_be();
    let (high, low) = bytes.split_at(16);
    if high.iter().any(|byte| *byte != 0) {
        return Err(out_of_range(field, felt, "u128"));
    }
    let mut buffer = [0_u8; 16];
    buffer.copy_from_slice(low);
    Ok(u128::from_be_bytes(buffer))
}

fn out_of_range(
    field: &'static str,
    felt: &StarknetFelt,
    target: &'static str,
) -> RoundDecodeError {
    RoundDecodeError::FeltOutOfRange {
        field,
        value: format!("{felt:#x}"),
        target,
    }
}
