//! Reference models of the light-client sub-circuits.
//!
//! Each module maps a JSON input document to the JSON output the circuit must produce.
//! Roots and byte strings are 0x-prefixed hex, bit arrays are arrays of 0/1, field
//! elements are decimal strings.

use std::fmt;
use std::str::FromStr;

use beacon_ssz::bits::{number_to_256_bits, ssz_num_to_bits};
use beacon_ssz::serde_utils::quoted_u64;
use beacon_ssz::{
    compute_domain, compute_signing_root, decode_hex, decode_hex_array, hash_two, is_supermajority, merkleize,
    popcount, to_hex, BeaconBlockHeader, Root, SyncCommittee, Validator, DOMAIN_SYNC_COMMITTEE,
};
use num_bigint::BigUint;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::bls;
use crate::hash_to_field::{expand_message_xmd, hash_to_field, ETH_DST};
use crate::ConformanceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CircuitModule {
    HashTreeRoot,
    HashTreeRootBeaconHeader,
    HashTwo256,
    ComputeDomain,
    ComputeSigningRoot,
    ExpandMessage,
    HashToField,
    AggregateBitmaskN1,
    AggregateBitmaskN3,
    Compress,
    AreEqualHashes,
    IsSupermajority,
    NumbersTo256Bits,
    SszNum,
    SyncCommitteeHashTreeRoot,
    ValidatorHashTreeRoot,
}

impl CircuitModule {
    pub const ALL: [CircuitModule; 16] = [
        CircuitModule::HashTreeRoot,
        CircuitModule::HashTreeRootBeaconHeader,
        CircuitModule::HashTwo256,
        CircuitModule::ComputeDomain,
        CircuitModule::ComputeSigningRoot,
        CircuitModule::ExpandMessage,
        CircuitModule::HashToField,
        CircuitModule::AggregateBitmaskN1,
        CircuitModule::AggregateBitmaskN3,
        CircuitModule::Compress,
        CircuitModule::AreEqualHashes,
        CircuitModule::IsSupermajority,
        CircuitModule::NumbersTo256Bits,
        CircuitModule::SszNum,
        CircuitModule::SyncCommitteeHashTreeRoot,
        CircuitModule::ValidatorHashTreeRoot,
    ];

    /// Circuit name, also the vector directory name
    pub fn name(&self) -> &'static str {
        match self {
            CircuitModule::HashTreeRoot => "hash_tree_root",
            CircuitModule::HashTreeRootBeaconHeader => "hash_tree_root_beacon_header",
            CircuitModule::HashTwo256 => "hash_two_256",
            CircuitModule::ComputeDomain => "compute_domain",
            CircuitModule::ComputeSigningRoot => "compute_signing_root",
            CircuitModule::ExpandMessage => "expand_message",
            CircuitModule::HashToField => "hash_to_field",
            CircuitModule::AggregateBitmaskN1 => "aggregate_bitmask_N1",
            CircuitModule::AggregateBitmaskN3 => "aggregate_bitmask_N3",
            CircuitModule::Compress => "compress",
            CircuitModule::AreEqualHashes => "are_equal_hashes",
            CircuitModule::IsSupermajority => "is_supermajority",
            CircuitModule::NumbersTo256Bits => "numbersTo256Bits",
            CircuitModule::SszNum => "ssz_num",
            CircuitModule::SyncCommitteeHashTreeRoot => "sync_committee_hash_tree_root",
            CircuitModule::ValidatorHashTreeRoot => "validator_hash_tree_root",
        }
    }

    /// Compute the output the circuit must produce for `input`
    pub fn evaluate(&self, input: &Value) -> Result<Value, ConformanceError> {
        match self {
            CircuitModule::HashTreeRoot => {
                let input: LeavesInput = parse(input)?;
                let leaves = input
                    .leaves
                    .iter()
                    .map(|leaf| root(leaf))
                    .collect::<Result<Vec<_>, _>>()?;
                if leaves.is_empty() {
                    return Err(ConformanceError::InvalidInput("no leaves".into()));
                }
                let out = merkleize(&leaves, None).map_err(invalid)?;
                Ok(json!({ "out": to_hex(&out) }))
            }
            CircuitModule::HashTreeRootBeaconHeader => {
                let header: BeaconBlockHeader = parse(input)?;
                Ok(json!({ "out": to_hex(&header.hash_tree_root()) }))
            }
            CircuitModule::HashTwo256 => {
                let input: PairInput = parse(input)?;
                let out = hash_two(&root(&input.left)?, &root(&input.right)?);
                Ok(json!({ "out": to_hex(&out) }))
            }
            CircuitModule::ComputeDomain => {
                let input: DomainInput = parse(input)?;
                let domain_type = match &input.domain_type {
                    Some(domain_type) => decode_hex_array(domain_type).map_err(invalid)?,
                    None => DOMAIN_SYNC_COMMITTEE,
                };
                let fork_version = decode_hex_array(&input.fork_version).map_err(invalid)?;
                let domain = compute_domain(&domain_type, &fork_version, &root(&input.genesis_validators_root)?);
                Ok(json!({ "domain": to_hex(&domain) }))
            }
            CircuitModule::ComputeSigningRoot => {
                let input: SigningRootInput = parse(input)?;
                let out = compute_signing_root(&root(&input.header_root)?, &root(&input.domain)?);
                Ok(json!({ "signing_root": to_hex(&out) }))
            }
            CircuitModule::ExpandMessage => {
                let input: ExpandInput = parse(input)?;
                let out = expand_message_xmd(&hex_bytes(&input.msg)?, input.dst(), input.len_in_bytes)?;
                Ok(json!({ "out": to_hex(&out) }))
            }
            CircuitModule::HashToField => {
                let input: ExpandInput = parse(input)?;
                let u = hash_to_field(&hex_bytes(&input.msg)?, input.dst())?;
                let u: Vec<[String; 2]> = u
                    .iter()
                    .map(|(c0, c1)| [c0.to_string(), c1.to_string()])
                    .collect();
                Ok(json!({ "u": u }))
            }
            CircuitModule::AggregateBitmaskN1 => aggregate(input, 1),
            CircuitModule::AggregateBitmaskN3 => aggregate(input, 3),
            CircuitModule::Compress => {
                let input: CompressInput = parse(input)?;
                let compressed = bls::compress(&hex_bytes(&input.point)?)?;
                Ok(json!({ "compressed": to_hex(&compressed) }))
            }
            CircuitModule::AreEqualHashes => {
                let input: EqualInput = parse(input)?;
                Ok(json!({ "out": root(&input.a)? == root(&input.b)? }))
            }
            CircuitModule::IsSupermajority => {
                let input: BitmaskInput = parse(input)?;
                let bitmask = bits_from_json(&input.bitmask)?;
                Ok(json!({ "out": is_supermajority(popcount(&bitmask), bitmask.len()) }))
            }
            CircuitModule::NumbersTo256Bits => {
                let input: NumberInput = parse(input)?;
                let number = BigUint::parse_bytes(input.number.as_bytes(), 10)
                    .ok_or_else(|| ConformanceError::InvalidInput(format!("not a number: {}", input.number)))?;
                let bits = number_to_256_bits(&number).map_err(invalid)?;
                Ok(json!({ "bits": bits_to_json(&bits) }))
            }
            CircuitModule::SszNum => {
                let input: SszNumInput = parse(input)?;
                let bits = ssz_num_to_bits(input.value, input.bit_length).map_err(invalid)?;
                Ok(json!({ "bits": bits_to_json(&bits) }))
            }
            CircuitModule::SyncCommitteeHashTreeRoot => {
                let committee: SyncCommittee = parse(input)?;
                if committee.is_empty() || !committee.len().is_power_of_two() {
                    return Err(ConformanceError::InvalidInput(format!(
                        "committee size {} is not a power of two",
                        committee.len()
                    )));
                }
                let out = committee.hash_tree_root().map_err(invalid)?;
                Ok(json!({ "out": to_hex(&out) }))
            }
            CircuitModule::ValidatorHashTreeRoot => {
                let validator: Validator = parse(input)?;
                Ok(json!({ "out": to_hex(&validator.hash_tree_root()) }))
            }
        }
    }
}

impl fmt::Display for CircuitModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CircuitModule {
    type Err = ConformanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CircuitModule::ALL
            .into_iter()
            .find(|module| module.name() == s)
            .ok_or_else(|| ConformanceError::UnknownModule(s.to_string()))
    }
}

#[derive(Deserialize)]
struct LeavesInput {
    leaves: Vec<String>,
}

#[derive(Deserialize)]
struct PairInput {
    left: String,
    right: String,
}

#[derive(Deserialize)]
struct DomainInput {
    #[serde(default)]
    domain_type: Option<String>,
    fork_version: String,
    genesis_validators_root: String,
}

#[derive(Deserialize)]
struct SigningRootInput {
    header_root: String,
    domain: String,
}

#[derive(Deserialize)]
struct ExpandInput {
    msg: String,
    #[serde(default)]
    dst: Option<String>,
    #[serde(default = "default_expand_len")]
    len_in_bytes: usize,
}

impl ExpandInput {
    fn dst(&self) -> &[u8] {
        self.dst.as_deref().map(str::as_bytes).unwrap_or(ETH_DST)
    }
}

fn default_expand_len() -> usize {
    256
}

#[derive(Deserialize)]
struct AggregateInput {
    pubkeys: Vec<String>,
    bitmask: Vec<u8>,
}

#[derive(Deserialize)]
struct CompressInput {
    point: String,
}

#[derive(Deserialize)]
struct EqualInput {
    a: String,
    b: String,
}

#[derive(Deserialize)]
struct BitmaskInput {
    bitmask: Vec<u8>,
}

#[derive(Deserialize)]
struct NumberInput {
    number: String,
}

#[derive(Deserialize)]
struct SszNumInput {
    #[serde(with = "quoted_u64")]
    value: u64,
    bit_length: usize,
}

fn parse<T: DeserializeOwned>(input: &Value) -> Result<T, ConformanceError> {
    T::deserialize(input).map_err(|err| ConformanceError::InvalidInput(err.to_string()))
}

fn invalid(err: impl fmt::Display) -> ConformanceError {
    ConformanceError::InvalidInput(err.to_string())
}

fn root(s: &str) -> Result<Root, ConformanceError> {
    decode_hex_array(s).map_err(invalid)
}

fn hex_bytes(s: &str) -> Result<Vec<u8>, ConformanceError> {
    decode_hex(s).map_err(invalid)
}

pub fn bits_to_json(bits: &[bool]) -> Vec<u8> {
    bits.iter().map(|bit| *bit as u8).collect()
}

fn bits_from_json(bits: &[u8]) -> Result<Vec<bool>, ConformanceError> {
    bits.iter()
        .map(|bit| match bit {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ConformanceError::InvalidInput(format!("{other} is not a bit"))),
        })
        .collect()
}

fn aggregate(input: &Value, n: usize) -> Result<Value, ConformanceError> {
    let input: AggregateInput = parse(input)?;
    if input.pubkeys.len() != n {
        return Err(ConformanceError::InvalidInput(format!(
            "expected {n} public keys, got {}",
            input.pubkeys.len()
        )));
    }
    let pubkeys = input
        .pubkeys
        .iter()
        .map(|pk| hex_bytes(pk))
        .collect::<Result<Vec<_>, _>>()?;
    let aggregate = bls::aggregate_bitmask(&pubkeys, &bits_from_json(&input.bitmask)?)?;
    Ok(json!({ "aggregate": to_hex(&aggregate) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_ssz::hash::zero_hashes;

    #[test]
    fn test_names_roundtrip() {
        for module in CircuitModule::ALL {
            assert_eq!(module.name().parse::<CircuitModule>().unwrap(), module);
        }
        assert!("sha256".parse::<CircuitModule>().is_err());
    }

    #[test]
    fn test_hash_tree_root_of_zero_leaves() {
        let zero = to_hex(&[0u8; 32]);
        let out = CircuitModule::HashTreeRoot
            .evaluate(&json!({ "leaves": [zero, zero, zero, zero] }))
            .unwrap();
        assert_eq!(out["out"], to_hex(&zero_hashes(2)[2]));
    }

    #[test]
    fn test_is_supermajority_module() {
        let mut bitmask = vec![1u8; 342];
        bitmask.extend(vec![0u8; 170]);
        let out = CircuitModule::IsSupermajority
            .evaluate(&json!({ "bitmask": bitmask }))
            .unwrap();
        assert_eq!(out["out"], true);

        bitmask[0] = 0;
        let out = CircuitModule::IsSupermajority
            .evaluate(&json!({ "bitmask": bitmask }))
            .unwrap();
        assert_eq!(out["out"], false);

        assert!(CircuitModule::IsSupermajority
            .evaluate(&json!({ "bitmask": [2] }))
            .is_err());
    }

    #[test]
    fn test_compute_domain_defaults_to_sync_committee() {
        let gvr = to_hex(&[0x4b; 32]);
        let implicit = CircuitModule::ComputeDomain
            .evaluate(&json!({ "fork_version": "0x03000000", "genesis_validators_root": gvr }))
            .unwrap();
        let explicit = CircuitModule::ComputeDomain
            .evaluate(&json!({
                "domain_type": "0x07000000",
                "fork_version": "0x03000000",
                "genesis_validators_root": gvr
            }))
            .unwrap();
        assert_eq!(implicit, explicit);
        assert!(implicit["domain"].as_str().unwrap().starts_with("0x07000000"));
    }

    #[test]
    fn test_aggregate_arity_is_fixed() {
        let pk = to_hex(&bls::keypair(1).unwrap().1.compress());
        assert!(CircuitModule::AggregateBitmaskN1
            .evaluate(&json!({ "pubkeys": [pk], "bitmask": [1] }))
            .is_ok());
        assert!(CircuitModule::AggregateBitmaskN3
            .evaluate(&json!({ "pubkeys": [pk], "bitmask": [1] }))
            .is_err());
    }

    #[test]
    fn test_ssz_num_accepts_quoted_values() {
        let out = CircuitModule::SszNum
            .evaluate(&json!({ "value": "5609044", "bit_length": 64 }))
            .unwrap();
        assert_eq!(out["bits"].as_array().unwrap().len(), 256);
    }

    #[test]
    fn test_malformed_input_is_an_error() {
        assert!(CircuitModule::HashTwo256.evaluate(&json!({ "left": "0x00" })).is_err());
        assert!(CircuitModule::NumbersTo256Bits
            .evaluate(&json!({ "number": "-3" }))
            .is_err());
    }
}
