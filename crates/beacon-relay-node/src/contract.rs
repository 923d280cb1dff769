//! ABI encoding for the light-client contract.

use beacon_zk_verify::{LightClientUpdate, ProofJson};
use num_bigint::BigUint;
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

pub const UPDATE_SIGNATURE: &str =
    "lightClientUpdate((uint64,uint64,bytes32,bytes32,bytes32,uint256,uint256[2],uint256[2][2],uint256[2]))";
pub const HEAD_SLOT_SIGNATURE: &str = "optimisticHeaderSlot()";

/// Words in the inline encoding of the update tuple
const UPDATE_WORDS: usize = 14;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("Invalid number: {0}")]
    InvalidNumber(String),
    #[error("Number does not fit in 256 bits: {0}")]
    Overflow(String),
    #[error("Malformed proof: {0}")]
    MalformedProof(&'static str),
    #[error("Invalid hex data: {0}")]
    InvalidHex(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Return data too short: {0} bytes")]
    ShortReturn(usize),
    #[error("Return value does not fit in uint64")]
    ReturnOverflow,
}

type Word = [u8; 32];

pub fn selector(signature: &str) -> [u8; 4] {
    let mut hasher = Keccak::v256();
    hasher.update(signature.as_bytes());
    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);
    [hash[0], hash[1], hash[2], hash[3]]
}

fn uint_word(value: u64) -> Word {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

fn decimal_word(value: &str) -> Result<Word, ContractError> {
    let number = BigUint::parse_bytes(value.as_bytes(), 10)
        .ok_or_else(|| ContractError::InvalidNumber(value.to_string()))?;
    let bytes = number.to_bytes_be();
    if bytes.len() > 32 {
        return Err(ContractError::Overflow(value.to_string()));
    }
    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(word)
}

fn coordinate<'a>(coords: &'a [String], index: usize, what: &'static str) -> Result<&'a str, ContractError> {
    coords
        .get(index)
        .map(String::as_str)
        .ok_or(ContractError::MalformedProof(what))
}

/// a, b, c in Solidity verifier order; G2 coordinates go `[c1, c0]`
fn proof_words(proof: &ProofJson) -> Result<Vec<Word>, ContractError> {
    let mut words = Vec::with_capacity(8);
    for i in 0..2 {
        words.push(decimal_word(coordinate(&proof.pi_a, i, "pi_a")?)?);
    }
    for i in 0..2 {
        let point = proof.pi_b.get(i).ok_or(ContractError::MalformedProof("pi_b"))?;
        words.push(decimal_word(coordinate(point, 1, "pi_b")?)?);
        words.push(decimal_word(coordinate(point, 0, "pi_b")?)?);
    }
    for i in 0..2 {
        words.push(decimal_word(coordinate(&proof.pi_c, i, "pi_c")?)?);
    }
    Ok(words)
}

/// Calldata for `lightClientUpdate(update)`; the tuple is fully static so it is encoded inline
pub fn encode_update(update: &LightClientUpdate) -> Result<Vec<u8>, ContractError> {
    let mut words: Vec<Word> = Vec::with_capacity(UPDATE_WORDS);
    words.push(uint_word(update.attested_slot));
    words.push(uint_word(update.finalized_slot));
    words.push(update.prev_header_root);
    words.push(update.next_header_root);
    words.push(update.sync_committee_root);
    words.push(uint_word(update.participants() as u64));
    words.extend(proof_words(&update.proof)?);

    let mut calldata = selector(UPDATE_SIGNATURE).to_vec();
    for word in &words {
        calldata.extend_from_slice(word);
    }
    Ok(calldata)
}

pub fn encode_head_slot_call() -> Vec<u8> {
    selector(HEAD_SLOT_SIGNATURE).to_vec()
}

/// Decode a `uint64` return value from `eth_call` output
pub fn decode_head_slot(data: &str) -> Result<u64, ContractError> {
    let bytes = hex::decode(data.trim_start_matches("0x"))
        .map_err(|err| ContractError::InvalidHex(err.to_string()))?;
    if bytes.len() < 32 {
        return Err(ContractError::ShortReturn(bytes.len()));
    }
    let word = &bytes[..32];
    if word[..24].iter().any(|byte| *byte != 0) {
        return Err(ContractError::ReturnOverflow);
    }
    let mut slot = [0u8; 8];
    slot.copy_from_slice(&word[24..]);
    Ok(u64::from_be_bytes(slot))
}

/// Normalize a 20-byte hex address to lowercase `0x` form
pub fn parse_address(address: &str) -> Result<String, ContractError> {
    let mut bytes = [0u8; 20];
    hex::decode_to_slice(address.trim_start_matches("0x"), &mut bytes)
        .map_err(|_| ContractError::InvalidAddress(address.to_string()))?;
    Ok(format!("0x{}", hex::encode(bytes)))
}

pub fn to_data(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_zk_verify::testing::{transition, TestProver};

    #[test]
    fn test_known_selectors() {
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
        assert_eq!(hex::encode(selector("balanceOf(address)")), "70a08231");
    }

    #[test]
    fn test_update_layout() {
        let mut prover = TestProver::new(13);
        let update = prover.prove_transition(transition(5609044, 5609069, 400), [7u8; 32]);
        let calldata = encode_update(&update).unwrap();
        assert_eq!(calldata.len(), 4 + 32 * UPDATE_WORDS);
        assert_eq!(&calldata[..4], &selector(UPDATE_SIGNATURE));

        let word = |i: usize| &calldata[4 + 32 * i..4 + 32 * (i + 1)];
        assert_eq!(word(0), &uint_word(5609070));
        assert_eq!(word(1), &uint_word(5609069));
        assert_eq!(word(3), &update.next_header_root);
        assert_eq!(word(5), &uint_word(400));
        assert_eq!(word(6), &decimal_word(&update.proof.pi_a[0]).unwrap());
        // G2 x coordinate is swapped into [c1, c0]
        assert_eq!(word(8), &decimal_word(&update.proof.pi_b[0][1]).unwrap());
        assert_eq!(word(9), &decimal_word(&update.proof.pi_b[0][0]).unwrap());
        assert_eq!(word(13), &decimal_word(&update.proof.pi_c[1]).unwrap());
    }

    #[test]
    fn test_malformed_proof() {
        let mut prover = TestProver::new(14);
        let mut update = prover.prove_transition(transition(1, 2, 400), [7u8; 32]);
        update.proof.pi_b.truncate(1);
        assert_eq!(encode_update(&update), Err(ContractError::MalformedProof("pi_b")));
        update.proof.pi_a[0] = "0x12".to_string();
        assert!(matches!(encode_update(&update), Err(ContractError::InvalidNumber(_))));
    }

    #[test]
    fn test_decimal_word_bounds() {
        let max = BigUint::from(2u8).pow(256) - 1u8;
        assert_eq!(decimal_word(&max.to_string()).unwrap(), [0xff; 32]);
        let over = max + 1u8;
        assert!(matches!(decimal_word(&over.to_string()), Err(ContractError::Overflow(_))));
    }

    #[test]
    fn test_decode_head_slot() {
        let data = to_data(&uint_word(5609069));
        assert_eq!(decode_head_slot(&data), Ok(5609069));
        assert_eq!(decode_head_slot("0x"), Err(ContractError::ShortReturn(0)));
        assert_eq!(decode_head_slot(&to_data(&[0xff; 32])), Err(ContractError::ReturnOverflow));
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(
            parse_address("0xAbCdEf0000000000000000000000000000000001").unwrap(),
            "0xabcdef0000000000000000000000000000000001"
        );
        assert!(parse_address("0x1234").is_err());
    }
}
