use serde::{Deserialize, Serialize};
use vault_round_types::{ConnectionMode, OptionBuyerState, RoundState};

/// Complete output of one snapshot provider. `round == None` is the "unavailable" sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSnapshot {
    pub round: Option<RoundState>,
    pub buyer: Option<OptionBuyerState>,
}

impl ProviderSnapshot {
    pub const UNAVAILABLE: ProviderSnapshot = ProviderSnapshot {
        round: None,
        buyer: None,
    };

    pub fn with_round(round: RoundState) -> Self {
        Self {
            round: Some(round),
            buyer: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.round.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotSource {
    Rpc,
    LiveFeed,
    Mock,
}

/// Borrowed view of all provider outputs at one instant.
#[derive(Debug, Clone, Copy)]
pub struct ProviderOutputs<'a> {
    pub rpc: &'a ProviderSnapshot,
    pub live_feed: &'a ProviderSnapshot,
    pub mock: &'a ProviderSnapshot,
}

impl<'a> ProviderOutputs<'a> {
    pub fn get(&self, source: SnapshotSource) -> &'a ProviderSnapshot {
        match source {
            SnapshotSource::Rpc => self.rpc,
            SnapshotSource::LiveFeed => self.live_feed,
            SnapshotSource::Mock => self.mock,
        }
    }
}

/// Maps a connection mode to exactly one provider. Stateless; never merges fields across
/// providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSelector {
    pub demo_source: SnapshotSource,
}

impl Default for SourceSelector {
    fn default() -> Self {
        Self {
            demo_source: SnapshotSource::Rpc,
        }
    }
}

impl SourceSelector {
    pub fn with_demo_source(demo_source: SnapshotSource) -> Self {
        Self { demo_source }
    }

    pub fn source_for(&self, mode: ConnectionMode) -> SnapshotSource {
        match mode {
            ConnectionMode::Rpc => SnapshotSource::Rpc,
            ConnectionMode::LiveFeed => SnapshotSource::LiveFeed,
            ConnectionMode::Mock => SnapshotSource::Mock,
            ConnectionMode::Demo => self.demo_source,
        }
    }

    pub fn select<'a>(
        &self,
        mode: ConnectionMode,
        outputs: ProviderOutputs<'a>,
    ) -> &'a ProviderSnapshot {
        outputs.get(self.source_for(mode))
    }
}

/// Selection with the default demo routing.
pub fn select_snapshot<'a>(
    mode: ConnectionMode,
    rpc: &'a ProviderSnapshot,
    live_feed: &'a ProviderSnapshot,
    mock: &'a ProviderSnapshot,
) -> &'a ProviderSnapshot {
    SourceSelector::default().select(
        mode,
        ProviderOutputs {
            rpc,
            live_feed,
            mock,
        },
    )
}
