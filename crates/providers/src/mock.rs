use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use vault_round_core::{ProviderSnapshot, SnapshotSource};

use crate::{ProviderError, RoundSnapshotSource, SourceFuture};

const MAX_MOCK_SCRIPT_BYTES: u64 = 16 * 1024 * 1024;

/// Serves scripted snapshots one per fetch, then keeps repeating the last one.
#[derive(Debug, Default)]
pub struct MockRoundProvider {
    script: Mutex<MockScript>,
}

#[derive(Debug, Default)]
struct MockScript {
    queued: VecDeque<ProviderSnapshot>,
    last: ProviderSnapshot,
}

impl MockRoundProvider {
    pub fn new(frames: impl IntoIterator<Item = ProviderSnapshot>) -> Self {
        Self {
            script: Mutex::new(MockScript {
                queued: frames.into_iter().collect(),
                last: ProviderSnapshot::UNAVAILABLE,
            }),
        }
    }

    /// Loads a JSON array of snapshots. Every round in the script must validate.
    pub fn from_json_file(path: &Path) -> Result<Self, ProviderError> {
        let metadata = std::fs::metadata(path).map_err(|error| {
            ProviderError::Internal(format!("failed to stat {}: {error}", path.display()))
        })?;
        if metadata.len() > MAX_MOCK_SCRIPT_BYTES {
            return Err(ProviderError::Internal(format!(
                "mock script {} is {} bytes; max is {MAX_MOCK_SCRIPT_BYTES}",
                path.display(),
                metadata.len()
            )));
        }
        let raw = std::fs::read_to_string(path).map_err(|error| {
            ProviderError::Internal(format!("failed to read {}: {error}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ProviderError> {
        let frames: Vec<ProviderSnapshot> =
            serde_json::from_str(raw).map_err(|error| ProviderError::InvalidResponse {
                method: "mock_script".to_string(),
                message: error.to_string(),
            })?;
        for round in frames.iter().filter_map(|frame| frame.round.as_ref()) {
            round.validate()?;
        }
        Ok(Self::new(frames))
    }

    pub fn push(&self, frame: ProviderSnapshot) -> Result<(), ProviderError> {
        self.lock()?.queued.push_back(frame);
        Ok(())
    }

    pub fn remaining(&self) -> Result<usize, ProviderError> {
        Ok(self.lock()?.queued.len())
    }

    fn next_frame(&self) -> Result<ProviderSnapshot, ProviderError> {
        let mut script = self.lock()?;
        if let Some(frame) = script.queued.pop_front() {
            script.last = frame;
        }
        Ok(script.last.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockScript>, ProviderError> {
        self.script
            .lock()
            .map_err(|_| ProviderError::Internal("mock script lock poisoned".to_string()))
    }
}

impl RoundSnapshotSource for MockRoundProvider {
    fn source(&self) -> SnapshotSource {
        SnapshotSource::Mock
    }

    fn fetch_snapshot(&self) -> SourceFuture<'_, ProviderSnapshot> {
        Box::pin(async move { self.next_frame() })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use vault_round_types::LifecycleTag;

    use super::*;

    fn script() -> String {
        let round = |tag: &str| {
            json!({
                "vault_address": "0x5",
                "round_id": "4",
                "lifecycle_tag": tag,
                "deployment_date": 100,
                "auction_start_date": 200,
                "auction_end_date": 300,
                "option_settle_date": 400,
                "strike_price": "1",
                "reserve_price": "1",
                "cap_level": "1",
                "starting_liquidity": "1",
                "locked_liquidity": "1",
                "unlocked_liquidity": "0",
                "stashed_liquidity": "0",
                "available_options": "1",
                "options_sold": "0",
                "premiums": "0",
                "payout_per_option": "0",
                "performance_lp": "0",
                "performance_ob": "0"
            })
        };
        json!([
            { "round": round("Open") },
            { "round": round("Auctioning"), "buyer": null }
        ])
        .to_string()
    }

    #[tokio::test]
    async fn serves_frames_in_order_then_repeats_last() {
        let provider = MockRoundProvider::from_json_str(&script()).expect("valid script");
        let tags = [
            LifecycleTag::Open,
            LifecycleTag::Auctioning,
            LifecycleTag::Auctioning,
        ];
        for expected in tags {
            let snapshot = provider.fetch_snapshot().await.expect("mock snapshot");
            assert_eq!(
                snapshot.round.map(|round| round.lifecycle_tag),
                Some(expected)
            );
        }
        assert_eq!(provider.remaining().expect("lock"), 0);
    }

    #[tokio::test]
    async fn empty_script_is_unavailable() {
        let provider = MockRoundProvider::default();
        let snapshot = provider.fetch_snapshot().await.expect("mock snapshot");
        assert!(!snapshot.is_available());

        provider
            .push(ProviderSnapshot::UNAVAILABLE)
            .expect("push frame");
        assert_eq!(provider.remaining().expect("lock"), 1);
    }

    #[test]
    fn loads_script_from_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("script.json");
        std::fs::write(&path, script()).expect("write script");
        let provider = MockRoundProvider::from_json_file(&path).expect("script loads");
        assert_eq!(provider.remaining().expect("lock"), 2);

        let missing = MockRoundProvider::from_json_file(&dir.path().join("missing.json"))
            .expect_err("must fail");
        assert!(missing.to_string().contains("failed to stat"));
    }

    #[test]
    fn rejects_scripts_with_invalid_rounds() {
        let broken = script().replace("\"option_settle_date\":400", "\"option_settle_date\":50");
        let error = MockRoundProvider::from_json_str(&broken).expect_err("must fail");
        assert!(matches!(error, ProviderError::Validation(_)));
    }
}
