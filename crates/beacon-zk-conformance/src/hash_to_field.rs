//! Hashing to the BLS12-381 G2 base field (RFC 9380, section 5).
//!
//! `expand_message_xmd` with SHA-256 and `hash_to_field` over Fp2 with `count = 2`,
//! `L = 64`, the parameters of the `BLS12381G2_XMD:SHA-256_SSWU_RO_` suite.

use num_bigint::BigUint;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

use crate::ConformanceError;

/// Ethereum proof-of-possession signature DST
pub const ETH_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// Bytes per field element draw: ceil((ceil(log2(p)) + k) / 8) with k = 128
pub const L: usize = 64;

const B_IN_BYTES: usize = 32;
const R_IN_BYTES: usize = 64;

const P_HEX: &str = "1a0111ea397fe69a4b1ba7b6434bacd764774b84f38512bf6730d2a0f6b0f6241eabfffeb153ffffb9feffffffffaaab";

/// BLS12-381 base field modulus
pub fn modulus() -> &'static BigUint {
    static P: OnceLock<BigUint> = OnceLock::new();
    P.get_or_init(|| BigUint::parse_bytes(P_HEX.as_bytes(), 16).unwrap_or_default())
}

/// Fp2 element as `(c0, c1)`
pub type Fp2 = (BigUint, BigUint);

pub fn expand_message_xmd(msg: &[u8], dst: &[u8], len_in_bytes: usize) -> Result<Vec<u8>, ConformanceError> {
    let ell = len_in_bytes.div_ceil(B_IN_BYTES);
    if ell == 0 || ell > 255 || len_in_bytes > u16::MAX as usize {
        return Err(ConformanceError::InvalidInput(format!(
            "cannot expand to {len_in_bytes} bytes"
        )));
    }
    if dst.len() > 255 {
        return Err(ConformanceError::InvalidInput("DST longer than 255 bytes".into()));
    }

    let mut dst_prime = dst.to_vec();
    dst_prime.push(dst.len() as u8);

    let b_0: [u8; 32] = Sha256::new()
        .chain_update([0u8; R_IN_BYTES])
        .chain_update(msg)
        .chain_update((len_in_bytes as u16).to_be_bytes())
        .chain_update([0u8])
        .chain_update(&dst_prime)
        .finalize()
        .into();

    let mut b_i: [u8; 32] = Sha256::new()
        .chain_update(b_0)
        .chain_update([1u8])
        .chain_update(&dst_prime)
        .finalize()
        .into();

    let mut uniform = Vec::with_capacity(ell * B_IN_BYTES);
    uniform.extend_from_slice(&b_i);
    for i in 2..=ell {
        let mixed: Vec<u8> = b_0.iter().zip(b_i.iter()).map(|(a, b)| a ^ b).collect();
        b_i = Sha256::new()
            .chain_update(&mixed)
            .chain_update([i as u8])
            .chain_update(&dst_prime)
            .finalize()
            .into();
        uniform.extend_from_slice(&b_i);
    }
    uniform.truncate(len_in_bytes);
    Ok(uniform)
}

/// Two Fp2 elements derived from `msg`
pub fn hash_to_field(msg: &[u8], dst: &[u8]) -> Result<[Fp2; 2], ConformanceError> {
    const COUNT: usize = 2;
    const M: usize = 2;
    let uniform = expand_message_xmd(msg, dst, COUNT * M * L)?;
    let element = |offset: usize| BigUint::from_bytes_be(&uniform[offset..offset + L]) % modulus();
    Ok([
        (element(0), element(L)),
        (element(2 * L), element(3 * L)),
    ])
}
