//! Public signal schema of the light-client circuit.
//!
//! Nine BN254 scalar field elements, in order:
//!
//! | index | value                                   |
//! |-------|-----------------------------------------|
//! | 0, 1  | previous header root, high / low 128 bits |
//! | 2, 3  | next header root, high / low 128 bits     |
//! | 4, 5  | sync committee root, high / low 128 bits  |
//! | 6, 7  | signing domain, high / low 128 bits       |
//! | 8     | participation count                     |
//!
//! Roots are split because 256-bit values do not fit in the scalar field.

use ark_bn254::Fr;
use beacon_ssz::Root;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::groth16::parse_decimal;

pub const PUBLIC_SIGNAL_COUNT: usize = 9;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalsError {
    #[error("Expected {PUBLIC_SIGNAL_COUNT} public signals, got {0}")]
    Arity(usize),
    #[error("Public signal {index} is not a decimal number: {value:?}")]
    InvalidNumber { index: usize, value: String },
    #[error("Public signal {index} does not fit in {bits} bits")]
    Overflow { index: usize, bits: u32 },
}

/// Decoded public signals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicSignals {
    #[serde(with = "beacon_ssz::serde_utils::hex_array")]
    pub prev_header_root: Root,
    #[serde(with = "beacon_ssz::serde_utils::hex_array")]
    pub next_header_root: Root,
    #[serde(with = "beacon_ssz::serde_utils::hex_array")]
    pub sync_committee_root: Root,
    #[serde(with = "beacon_ssz::serde_utils::hex_array")]
    pub domain: Root,
    pub participation: u64,
}

fn split_root(root: &Root) -> [u128; 2] {
    let mut hi = [0u8; 16];
    let mut lo = [0u8; 16];
    hi.copy_from_slice(&root[..16]);
    lo.copy_from_slice(&root[16..]);
    [u128::from_be_bytes(hi), u128::from_be_bytes(lo)]
}

fn join_root(hi: u128, lo: u128) -> Root {
    let mut root = [0u8; 32];
    root[..16].copy_from_slice(&hi.to_be_bytes());
    root[16..].copy_from_slice(&lo.to_be_bytes());
    root
}

impl PublicSignals {
    fn limbs(&self) -> [u128; PUBLIC_SIGNAL_COUNT] {
        let [p0, p1] = split_root(&self.prev_header_root);
        let [n0, n1] = split_root(&self.next_header_root);
        let [c0, c1] = split_root(&self.sync_committee_root);
        let [d0, d1] = split_root(&self.domain);
        [p0, p1, n0, n1, c0, c1, d0, d1, self.participation as u128]
    }

    pub fn to_field_elements(&self) -> Vec<Fr> {
        self.limbs().into_iter().map(Fr::from).collect()
    }

    /// snarkjs `public.json` representation
    pub fn to_decimal_strings(&self) -> Vec<String> {
        self.limbs().iter().map(|limb| limb.to_string()).collect()
    }

    pub fn from_decimal_strings(signals: &[String]) -> Result<Self, SignalsError> {
        if signals.len() != PUBLIC_SIGNAL_COUNT {
            return Err(SignalsError::Arity(signals.len()));
        }
        let mut limbs = [0u128; PUBLIC_SIGNAL_COUNT];
        for (index, value) in signals.iter().enumerate() {
            let number = parse_decimal(value).ok_or_else(|| SignalsError::InvalidNumber {
                index,
                value: value.clone(),
            })?;
            let bits = if index == PUBLIC_SIGNAL_COUNT - 1 { 64 } else { 128 };
            if number.bits() > bits as u64 {
                return Err(SignalsError::Overflow { index, bits });
            }
            limbs[index] = to_u128(&number);
        }
        Ok(Self {
            prev_header_root: join_root(limbs[0], limbs[1]),
            next_header_root: join_root(limbs[2], limbs[3]),
            sync_committee_root: join_root(limbs[4], limbs[5]),
            domain: join_root(limbs[6], limbs[7]),
            participation: limbs[8] as u64,
        })
    }
}

fn to_u128(number: &BigUint) -> u128 {
    number
        .iter_u64_digits()
        .take(2)
        .enumerate()
        .fold(0u128, |acc, (i, digit)| acc | (digit as u128) << (64 * i))
}
