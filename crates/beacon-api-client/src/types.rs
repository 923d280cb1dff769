//! Beacon node REST response shapes.
//!
//! Every response wraps its payload in `{ "data": ... }`; integers are quoted and byte
//! strings are 0x-prefixed hex.

use beacon_ssz::serde_utils::{hex_array, hex_bytes, quoted_u64};
use beacon_ssz::{BeaconBlockHeader, Root, SyncCommittee};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// `GET /eth/v1/beacon/headers/{block_id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderData {
    #[serde(with = "hex_array")]
    pub root: Root,
    #[serde(default)]
    pub canonical: bool,
    pub header: SignedHeader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedHeader {
    pub message: BeaconBlockHeader,
}

/// `GET /eth/v2/beacon/blocks/{block_id}`, only the fields the relay reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockData {
    pub message: BlockMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockMessage {
    #[serde(with = "quoted_u64")]
    pub slot: u64,
    pub body: BlockBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockBody {
    /// Absent before Altair
    #[serde(default)]
    pub sync_aggregate: Option<SyncAggregate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncAggregate {
    #[serde(with = "hex_bytes")]
    pub sync_committee_bits: Vec<u8>,
}

/// One element of `GET /eth/v1/beacon/light_client/updates`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightClientUpdateItem {
    #[serde(default)]
    pub version: Option<String>,
    pub data: LightClientUpdateData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightClientUpdateData {
    pub next_sync_committee: SyncCommittee,
}

/// Header together with its root, recomputed and checked against the node's claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderInfo {
    pub header: BeaconBlockHeader,
    pub root: Root,
}
