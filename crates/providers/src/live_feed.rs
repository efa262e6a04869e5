use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use vault_round_core::{ProviderSnapshot, SnapshotSource};
use vault_round_types::{OptionBuyerState, RoundState};

use crate::{ProviderError, RoundSnapshotSource, SourceFuture};

/// One frame pushed by the live feed, as JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    Round { round: RoundState },
    Buyer { buyer: OptionBuyerState },
    Unavailable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LiveFeedStats {
    pub frames_applied: u64,
    pub frames_rejected: u64,
}

#[derive(Debug, Default)]
struct FeedCounters {
    applied: AtomicU64,
    rejected: AtomicU64,
}

/// Folds pushed frames into the latest snapshot. Malformed frames are logged and dropped so
/// the last good snapshot stays visible.
pub struct LiveFeedProvider {
    latest: watch::Receiver<ProviderSnapshot>,
    counters: Arc<FeedCounters>,
    task: JoinHandle<()>,
}

impl LiveFeedProvider {
    pub fn spawn(mut frames: mpsc::Receiver<String>) -> Self {
        let (sender, latest) = watch::channel(ProviderSnapshot::default());
        let counters = Arc::new(FeedCounters::default());
        let task_counters = Arc::clone(&counters);
        let task = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                let next = match parse_frame(&frame) {
                    Ok(message) => apply_message(&sender.borrow(), message),
                    Err(error) => {
                        task_counters.rejected.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %error, "dropping malformed live-feed frame");
                        continue;
                    }
                };
                task_counters.applied.fetch_add(1, Ordering::Relaxed);
                sender.send_replace(next);
                if sender.is_closed() {
                    break;
                }
            }
            debug!("live feed closed");
        });
        Self {
            latest,
            counters,
            task,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProviderSnapshot> {
        self.latest.clone()
    }

    pub fn latest(&self) -> ProviderSnapshot {
        self.latest.borrow().clone()
    }

    pub fn stats(&self) -> LiveFeedStats {
        LiveFeedStats {
            frames_applied: self.counters.applied.load(Ordering::Relaxed),
            frames_rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for LiveFeedProvider {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl RoundSnapshotSource for LiveFeedProvider {
    fn source(&self) -> SnapshotSource {
        SnapshotSource::LiveFeed
    }

    fn fetch_snapshot(&self) -> SourceFuture<'_, ProviderSnapshot> {
        Box::pin(async move { Ok(self.latest()) })
    }
}

fn parse_frame(frame: &str) -> Result<FeedMessage, ProviderError> {
    let message: FeedMessage =
        serde_json::from_str(frame).map_err(|error| ProviderError::InvalidResponse {
            method: "live_feed".to_string(),
            message: error.to_string(),
        })?;
    if let FeedMessage::Round { round } = &message {
        round.validate()?;
    }
    Ok(message)
}

fn apply_message(current: &ProviderSnapshot, message: FeedMessage) -> ProviderSnapshot {
    match message {
        FeedMessage::Round { round } => {
            let buyer = current
                .buyer
                .as_ref()
                .filter(|buyer| buyer.round_id == round.round_id)
                .cloned();
            ProviderSnapshot {
                round: Some(round),
                buyer,
            }
        }
        FeedMessage::Buyer { buyer } => ProviderSnapshot {
            round: current.round.clone(),
            buyer: Some(buyer),
        },
        FeedMessage::Unavailable => ProviderSnapshot::UNAVAILABLE,
    }
}
