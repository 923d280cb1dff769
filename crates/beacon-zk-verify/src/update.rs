//! Light-client update data model.

use std::fmt;

use beacon_ssz::serde_utils::hex_array;
use beacon_ssz::Root;
use serde::{Deserialize, Serialize};

use crate::groth16::ProofJson;
use crate::key::VkId;

/// Half-open slot interval covered by one update: from the last published header to the
/// newly finalized header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotRange {
    pub from: u64,
    pub to: u64,
}

impl SlotRange {
    /// Returns `None` unless `from < to`
    pub fn new(from: u64, to: u64) -> Option<Self> {
        (from < to).then_some(Self { from, to })
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.from, self.to)
    }
}

/// Finalized header transition as observed on the beacon chain, before a proof is attached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderTransition {
    pub range: SlotRange,
    pub attested_slot: u64,
    pub finalized_slot: u64,
    #[serde(with = "hex_array")]
    pub prev_header_root: Root,
    #[serde(with = "hex_array")]
    pub next_header_root: Root,
    #[serde(with = "hex_array")]
    pub sync_committee_root: Root,
    pub participation: Vec<bool>,
}

impl HeaderTransition {
    pub fn participants(&self) -> usize {
        beacon_ssz::popcount(&self.participation)
    }

    pub fn into_update(
        self,
        proof: ProofJson,
        public_signals: Vec<String>,
        vk_id: Option<VkId>,
    ) -> LightClientUpdate {
        LightClientUpdate {
            range: self.range,
            attested_slot: self.attested_slot,
            finalized_slot: self.finalized_slot,
            prev_header_root: self.prev_header_root,
            next_header_root: self.next_header_root,
            sync_committee_root: self.sync_committee_root,
            participation: self.participation,
            proof,
            public_signals,
            vk_id,
        }
    }
}

/// Header transition together with the proof attesting to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightClientUpdate {
    pub range: SlotRange,
    pub attested_slot: u64,
    pub finalized_slot: u64,
    #[serde(with = "hex_array")]
    pub prev_header_root: Root,
    #[serde(with = "hex_array")]
    pub next_header_root: Root,
    #[serde(with = "hex_array")]
    pub sync_committee_root: Root,
    pub participation: Vec<bool>,
    pub proof: ProofJson,
    pub public_signals: Vec<String>,
    /// Key the proof was produced under, when the artifact records it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vk_id: Option<VkId>,
}

impl LightClientUpdate {
    pub fn participants(&self) -> usize {
        beacon_ssz::popcount(&self.participation)
    }
}

/// Last header the relay has published on-chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishCursor {
    pub last_published_slot: u64,
    #[serde(with = "hex_array")]
    pub last_header_root: Root,
}

impl PublishCursor {
    pub fn new(last_published_slot: u64, last_header_root: Root) -> Self {
        Self {
            last_published_slot,
            last_header_root,
        }
    }

    /// Range still to be published given the current finalized head
    pub fn next_range(&self, finalized_head: u64) -> Option<SlotRange> {
        SlotRange::new(self.last_published_slot, finalized_head)
    }

    pub fn advanced_by(&self, update: &LightClientUpdate) -> Self {
        Self {
            last_published_slot: update.finalized_slot,
            last_header_root: update.next_header_root,
        }
    }
}

impl fmt::Display for PublishCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slot {} ({})",
            self.last_published_slot,
            beacon_ssz::to_hex(&self.last_header_root)
        )
    }
}
