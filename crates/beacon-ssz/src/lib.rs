//! Beacon chain SSZ primitives
//!
//! This crate provides the hashing and merkleization routines shared by the verifier,
//! the beacon API client and the circuit conformance suite: SSZ merkleization of
//! containers, beacon block header / sync committee / validator roots, signing domains
//! and signing roots, and the bit-vector helpers used for participation accounting.

pub mod bits;
pub mod containers;
pub mod hash;
pub mod merkle;
pub mod serde_utils;
pub mod signing;

use thiserror::Error;

pub use bits::{is_supermajority, popcount};
pub use containers::{BeaconBlockHeader, BlsPubkey, SyncCommittee, Validator};
pub use hash::{hash_two, sha256};
pub use merkle::{merkleize, uint64_leaf};
pub use signing::{compute_domain, compute_signing_root, DOMAIN_SYNC_COMMITTEE};

/// A 32-byte SSZ root
pub type Root = [u8; 32];

/// A 4-byte fork version
pub type Version = [u8; 4];

/// Number of slots in a sync committee period
pub const SLOTS_PER_SYNC_COMMITTEE_PERIOD: u64 = 8192;

/// Number of slots in an epoch
pub const SLOTS_PER_EPOCH: u64 = 32;

/// Size of the sync committee on every public network
pub const SYNC_COMMITTEE_SIZE: usize = 512;

/// Errors produced while encoding or merkleizing SSZ values
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SszError {
    #[error("Invalid hex string: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("Expected {expected} bytes, got {got}")]
    Length { expected: usize, got: usize },
    #[error("{chunks} chunks exceed the merkleization limit of {limit}")]
    ChunkLimit { chunks: usize, limit: usize },
    #[error("Value does not fit in {bits} bits")]
    Overflow { bits: usize },
    #[error("Unsupported bit length {0}")]
    BitLength(usize),
    #[error("Bitvector has {got} bits, expected {expected}")]
    BitvectorLength { expected: usize, got: usize },
}

/// Format bytes as a 0x-prefixed lowercase hex string
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decode an optionally 0x-prefixed hex string
pub fn decode_hex(s: &str) -> Result<Vec<u8>, SszError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    Ok(hex::decode(s)?)
}

/// Decode an optionally 0x-prefixed hex string into a fixed-size byte array
pub fn decode_hex_array<const N: usize>(s: &str) -> Result<[u8; N], SszError> {
    let bytes = decode_hex(s)?;
    bytes.try_into().map_err(|bytes: Vec<u8>| SszError::Length {
        expected: N,
        got: bytes.len(),
    })
}
