//! Beacon chain containers and their hash tree roots.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hash::hash_two;
use crate::merkle::{bool_leaf, merkleize, pack_bytes, uint64_leaf};
use crate::serde_utils::{hex_array, quoted_u64};
use crate::{Root, SszError};

/// Beacon block header, the object whose root the light client tracks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconBlockHeader {
    #[serde(with = "quoted_u64")]
    pub slot: u64,
    #[serde(with = "quoted_u64")]
    pub proposer_index: u64,
    #[serde(with = "hex_array")]
    pub parent_root: Root,
    #[serde(with = "hex_array")]
    pub state_root: Root,
    #[serde(with = "hex_array")]
    pub body_root: Root,
}

impl BeaconBlockHeader {
    /// SSZ hash tree root: five fields padded to eight leaves
    pub fn hash_tree_root(&self) -> Root {
        let leaves = [
            uint64_leaf(self.slot),
            uint64_leaf(self.proposer_index),
            self.parent_root,
            self.state_root,
            self.body_root,
        ];
        // Five leaves never exceed their own length
        merkleize(&leaves, None).unwrap_or_default()
    }
}

/// Compressed BLS12-381 G1 public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlsPubkey(#[serde(with = "hex_array")] pub [u8; 48]);

impl BlsPubkey {
    /// A 48-byte vector packs into two chunks
    pub fn hash_tree_root(&self) -> Root {
        let chunks = pack_bytes(&self.0);
        hash_two(&chunks[0], &chunks[1])
    }
}

impl fmt::Debug for BlsPubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsPubkey({})", crate::to_hex(&self.0))
    }
}

/// Sync committee roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCommittee {
    pub pubkeys: Vec<BlsPubkey>,
    pub aggregate_pubkey: BlsPubkey,
}

impl SyncCommittee {
    /// Committee root, treating `pubkeys` as a fixed-length vector of its current size.
    ///
    /// For a full committee this is the canonical `Vector[BLSPubkey, 512]` root.
    pub fn hash_tree_root(&self) -> Result<Root, SszError> {
        let pubkey_roots: Vec<Root> = self.pubkeys.iter().map(|pk| pk.hash_tree_root()).collect();
        let pubkeys_root = merkleize(&pubkey_roots, None)?;
        Ok(hash_two(&pubkeys_root, &self.aggregate_pubkey.hash_tree_root()))
    }

    pub fn len(&self) -> usize {
        self.pubkeys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pubkeys.is_empty()
    }
}

/// Validator record as stored in the beacon state registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub pubkey: BlsPubkey,
    #[serde(with = "hex_array")]
    pub withdrawal_credentials: Root,
    #[serde(with = "quoted_u64")]
    pub effective_balance: u64,
    pub slashed: bool,
    #[serde(with = "quoted_u64")]
    pub activation_eligibility_epoch: u64,
    #[serde(with = "quoted_u64")]
    pub activation_epoch: u64,
    #[serde(with = "quoted_u64")]
    pub exit_epoch: u64,
    #[serde(with = "quoted_u64")]
    pub withdrawable_epoch: u64,
}

impl Validator {
    pub fn hash_tree_root(&self) -> Root {
        let leaves = [
            self.pubkey.hash_tree_root(),
            self.withdrawal_credentials,
            uint64_leaf(self.effective_balance),
            bool_leaf(self.slashed),
            uint64_leaf(self.activation_eligibility_epoch),
            uint64_leaf(self.activation_epoch),
            uint64_leaf(self.exit_epoch),
            uint64_leaf(self.withdrawable_epoch),
        ];
        merkleize(&leaves, None).unwrap_or_default()
    }
}
