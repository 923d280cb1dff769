//! Bit-vector helpers: participation bitmasks, numeric decompositions, supermajority.

use num_bigint::BigUint;

use crate::SszError;

/// Decode an SSZ `Bitvector[len]` (bit `i` is bit `i % 8` of byte `i / 8`)
pub fn bitvector_from_bytes(bytes: &[u8], len: usize) -> Result<Vec<bool>, SszError> {
    if bytes.len() != len.div_ceil(8) {
        return Err(SszError::BitvectorLength {
            expected: len,
            got: bytes.len() * 8,
        });
    }
    let bits: Vec<bool> = (0..bytes.len() * 8)
        .map(|i| (bytes[i / 8] >> (i % 8)) & 1 == 1)
        .collect();
    // Padding bits past `len` must be zero
    if bits[len..].iter().any(|bit| *bit) {
        return Err(SszError::BitvectorLength {
            expected: len,
            got: bits.len(),
        });
    }
    Ok(bits[..len].to_vec())
}

pub fn popcount(bits: &[bool]) -> usize {
    bits.iter().filter(|bit| **bit).count()
}

/// `participants >= 2/3 * committee_size`, evaluated without division
pub fn is_supermajority(participants: usize, committee_size: usize) -> bool {
    committee_size > 0 && participants * 3 >= committee_size * 2
}

/// Big-endian 256-bit decomposition of a number (`numbersTo256Bits`)
pub fn number_to_256_bits(value: &BigUint) -> Result<Vec<bool>, SszError> {
    if value.bits() > 256 {
        return Err(SszError::Overflow { bits: 256 });
    }
    Ok((0..256u64).rev().map(|i| value.bit(i)).collect())
}

/// Bits of the SSZ leaf of an unsigned integer of `bit_len` bits (`ssz_num`).
///
/// The value is laid out little-endian by byte, most significant bit first within each
/// byte, and zero-padded to 256 bits.
pub fn ssz_num_to_bits(value: u64, bit_len: usize) -> Result<Vec<bool>, SszError> {
    if bit_len == 0 || bit_len > 64 || bit_len % 8 != 0 {
        return Err(SszError::BitLength(bit_len));
    }
    if bit_len < 64 && value >> bit_len != 0 {
        return Err(SszError::Overflow { bits: bit_len });
    }
    let mut bits: Vec<bool> = value.to_le_bytes()[..bit_len / 8]
        .iter()
        .flat_map(|byte| (0..8).rev().map(move |i| (byte >> i) & 1 == 1))
        .collect();
    bits.resize(256, false);
    Ok(bits)
}
