//! SSZ merkleization of chunk sequences.

use crate::hash::{hash_two, zero_hashes};
use crate::{Root, SszError};

/// Size of an SSZ chunk in bytes
pub const BYTES_PER_CHUNK: usize = 32;

/// Pack bytes into 32-byte chunks, right-padding the last chunk with zeros
pub fn pack_bytes(bytes: &[u8]) -> Vec<Root> {
    bytes
        .chunks(BYTES_PER_CHUNK)
        .map(|chunk| {
            let mut padded = [0u8; 32];
            padded[..chunk.len()].copy_from_slice(chunk);
            padded
        })
        .collect()
}

/// Encode a u64 as a 32-byte SSZ leaf (little-endian, zero-padded)
pub fn uint64_leaf(value: u64) -> Root {
    let mut leaf = [0u8; 32];
    leaf[..8].copy_from_slice(&value.to_le_bytes());
    leaf
}

/// Encode a boolean as a 32-byte SSZ leaf
pub fn bool_leaf(value: bool) -> Root {
    let mut leaf = [0u8; 32];
    leaf[0] = value as u8;
    leaf
}

/// Merkleize a sequence of chunks.
///
/// The tree width is the next power of two of `limit` (or of the number of chunks when
/// no limit is given); missing leaves are zero chunks. Fails if there are more chunks
/// than the limit allows.
pub fn merkleize(chunks: &[Root], limit: Option<usize>) -> Result<Root, SszError> {
    let limit = limit.unwrap_or(chunks.len());
    if chunks.len() > limit {
        return Err(SszError::ChunkLimit {
            chunks: chunks.len(),
            limit,
        });
    }

    let width = limit.max(1).next_power_of_two();
    let depth = width.trailing_zeros() as usize;
    let zeros = zero_hashes(depth);

    if chunks.is_empty() {
        return Ok(zeros[depth]);
    }

    let mut layer = chunks.to_vec();
    for zero in zeros.iter().take(depth) {
        if layer.len() % 2 == 1 {
            layer.push(*zero);
        }
        layer = layer
            .chunks(2)
            .map(|pair| hash_two(&pair[0], &pair[1]))
            .collect();
    }

    Ok(layer[0])
}
