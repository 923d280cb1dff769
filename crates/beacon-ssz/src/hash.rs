//! SHA-256 helpers.

use sha2::{Digest, Sha256};

use crate::Root;

/// SHA-256 of arbitrary data
pub fn sha256(data: &[u8]) -> Root {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// SHA-256 of two 32-byte values concatenated (`hash_two_256`)
pub fn hash_two(left: &Root, right: &Root) -> Root {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left);
    data[32..].copy_from_slice(right);
    sha256(&data)
}

/// Roots of all-zero subtrees for depths `0..=depth`
pub fn zero_hashes(depth: usize) -> Vec<Root> {
    let mut hashes = Vec::with_capacity(depth + 1);
    hashes.push([0u8; 32]);
    for i in 0..depth {
        let next = hash_two(&hashes[i], &hashes[i]);
        hashes.push(next);
    }
    hashes
}
