//! Test vectors: built-in cases, on-disk layout and tampering.
//!
//! On disk a vector lives at `<dir>/<module>/data/<case>/{input,output}.json`.

use std::path::Path;

use beacon_ssz::hash::zero_hashes;
use beacon_ssz::{to_hex, BeaconBlockHeader, BlsPubkey, SyncCommittee, Validator};
use num_bigint::BigUint;
use serde_json::{json, Value};
use tracing::debug;

use crate::bls;
use crate::modules::CircuitModule;
use crate::ConformanceError;

#[derive(Debug, Clone, PartialEq)]
pub struct TestVector {
    pub module: CircuitModule,
    pub case: String,
    pub input: Value,
    pub output: Value,
}

impl TestVector {
    fn computed(module: CircuitModule, case: &str, input: Value) -> Result<Self, ConformanceError> {
        let output = module.evaluate(&input)?;
        Ok(Self {
            module,
            case: case.to_string(),
            input,
            output,
        })
    }

    fn known(module: CircuitModule, case: &str, input: Value, output: Value) -> Self {
        Self {
            module,
            case: case.to_string(),
            input,
            output,
        }
    }
}

fn pubkey(seed: u8) -> Result<[u8; 48], ConformanceError> {
    Ok(bls::keypair(seed)?.1.compress())
}

/// Cases grouped by module. A module whose cases could not be built or loaded carries
/// that error instead of failing the others.
pub type ModuleVectors = Vec<(CircuitModule, Result<Vec<TestVector>, ConformanceError>)>;

pub fn builtin_by_module(modules: &[CircuitModule]) -> ModuleVectors {
    modules
        .iter()
        .map(|module| (*module, builtin_module_vectors(*module)))
        .collect()
}

/// Every built-in case, in module order
pub fn builtin_vectors() -> Result<Vec<TestVector>, ConformanceError> {
    let mut vectors = Vec::new();
    for module in CircuitModule::ALL {
        vectors.extend(builtin_module_vectors(module)?);
    }
    Ok(vectors)
}

const MAINNET_GENESIS_VALIDATORS_ROOT: &str =
    "0x4b363db94e286120d76eb905340fdd4e54bfe9f06bf33ff6cf5ad27f511bfe95";

fn sample_header() -> BeaconBlockHeader {
    BeaconBlockHeader {
        slot: 5609044,
        proposer_index: 254_190,
        parent_root: [0x11; 32],
        state_root: [0x22; 32],
        body_root: [0x33; 32],
    }
}

/// Positive cases of one module.
///
/// Outputs are fixed known answers (zero hashes, RFC 9380 vectors, mainnet domains,
/// roots of fixed byte patterns) except for the multi-key aggregate, which is
/// computed by the reference model.
pub fn builtin_module_vectors(module: CircuitModule) -> Result<Vec<TestVector>, ConformanceError> {
    let zero = to_hex(&[0u8; 32]);
    let zh = zero_hashes(3);

    let vectors = match module {
        CircuitModule::HashTreeRoot => vec![TestVector::known(
            module,
            "zero_leaves",
            json!({ "leaves": [zero, zero, zero, zero] }),
            json!({ "out": to_hex(&zh[2]) }),
        )],
        CircuitModule::HashTreeRootBeaconHeader => vec![
            TestVector::known(
                module,
                "zero_header",
                serde_json::to_value(BeaconBlockHeader::default())?,
                json!({ "out": to_hex(&zh[3]) }),
            ),
            TestVector::known(
                module,
                "slot_5609044",
                serde_json::to_value(sample_header())?,
                json!({ "out": "0xbaa13d3f3a38c5bb77fd89f52e9e74e74e6384f8a05ed644e4dc7d32a6582179" }),
            ),
        ],
        CircuitModule::HashTwo256 => vec![TestVector::known(
            module,
            "zero_pair",
            json!({ "left": zero, "right": zero }),
            json!({ "out": to_hex(&zh[1]) }),
        )],
        // Bytes 4..8 of a domain are the fork digest, bba4da96 for mainnet Capella
        CircuitModule::ComputeDomain => vec![TestVector::known(
            module,
            "mainnet_capella",
            json!({
                "fork_version": "0x03000000",
                "genesis_validators_root": MAINNET_GENESIS_VALIDATORS_ROOT
            }),
            json!({ "domain": "0x07000000bba4da96354c9f25476cf1bc69bf583a7f9e0af049305b62de676640" }),
        )],
        CircuitModule::ComputeSigningRoot => vec![TestVector::known(
            module,
            "header_root",
            json!({
                "header_root": "0xbaa13d3f3a38c5bb77fd89f52e9e74e74e6384f8a05ed644e4dc7d32a6582179",
                "domain": to_hex(&[0x07; 32])
            }),
            json!({ "signing_root": "0xcb60f8dadc70e1b2cd54674da3806d177d8168fd1478834c7383c424008bf921" }),
        )],
        CircuitModule::ExpandMessage => vec![TestVector::known(
            module,
            "rfc9380_abc",
            json!({
                "msg": to_hex(b"abc"),
                "dst": "QUUX-V01-CS02-with-expander-SHA256-128",
                "len_in_bytes": 32
            }),
            json!({ "out": "0xd8ccab23b5985ccea865c6c97b6e5b8350e794e603b4b97902f53a8a0d605615" }),
        )],
        // RFC 9380 J.10.1, BLS12381G2_XMD:SHA-256_SSWU_RO_ with an empty message
        CircuitModule::HashToField => vec![TestVector::known(
            module,
            "rfc9380_empty",
            json!({
                "msg": "0x",
                "dst": "QUUX-V01-CS02-with-BLS12381G2_XMD:SHA-256_SSWU_RO_"
            }),
            json!({ "u": [
                [
                    "593868448310005448561172252387029516360409945786457439875974315031640021389835649561235021338510064922970633805048",
                    "867375309489067512797459860887365951877054038763818448057326190302701649888849997836339069389536967202878289851290"
                ],
                [
                    "457889704519948843474026022562641969443315715595459159112874498082953431971323809145630315884223143822925947137684",
                    "3132697209754082586339430915081913810572071485832539443682634025529375380328136128542015469873094481703191673087029"
                ]
            ] }),
        )],
        // Aggregating a single selected key yields that key
        CircuitModule::AggregateBitmaskN1 => {
            let pk = to_hex(&pubkey(1)?);
            vec![TestVector::known(
                module,
                "single",
                json!({ "pubkeys": [pk], "bitmask": [1] }),
                json!({ "aggregate": pk }),
            )]
        }
        CircuitModule::AggregateBitmaskN3 => vec![TestVector::computed(
            module,
            "two_of_three",
            json!({
                "pubkeys": [to_hex(&pubkey(1)?), to_hex(&pubkey(2)?), to_hex(&pubkey(3)?)],
                "bitmask": [1, 0, 1]
            }),
        )?],
        CircuitModule::Compress => vec![TestVector::known(
            module,
            "generated_key",
            json!({ "point": to_hex(&bls::keypair(7)?.1.serialize()) }),
            json!({ "compressed": to_hex(&pubkey(7)?) }),
        )],
        CircuitModule::AreEqualHashes => vec![TestVector::known(
            module,
            "equal",
            json!({ "a": to_hex(&zh[1]), "b": to_hex(&zh[1]) }),
            json!({ "out": true }),
        )],
        CircuitModule::IsSupermajority => {
            let mut bitmask = vec![1u8; 342];
            bitmask.extend(vec![0u8; 170]);
            vec![TestVector::known(
                module,
                "boundary_342_of_512",
                json!({ "bitmask": bitmask }),
                json!({ "out": true }),
            )]
        }
        CircuitModule::NumbersTo256Bits => {
            let mut five = vec![0u8; 253];
            five.extend([1, 0, 1]);
            vec![TestVector::known(
                module,
                "five",
                json!({ "number": "5" }),
                json!({ "bits": five }),
            )]
        }
        CircuitModule::SszNum => {
            let mut bits = vec![0u8; 256];
            // 0x0102 little-endian: byte 0 is 0x02, byte 1 is 0x01
            bits[6] = 1;
            bits[15] = 1;
            vec![TestVector::known(
                module,
                "u64_0x0102",
                json!({ "value": "258", "bit_length": 64 }),
                json!({ "bits": bits }),
            )]
        }
        CircuitModule::SyncCommitteeHashTreeRoot => {
            let committee = SyncCommittee {
                pubkeys: (1..=4).map(|i| BlsPubkey([i; 48])).collect(),
                aggregate_pubkey: BlsPubkey([5; 48]),
            };
            vec![TestVector::known(
                module,
                "four_members",
                serde_json::to_value(&committee)?,
                json!({ "out": "0x97753230e3aab9e9536b63848920eb7da7c216ee9b727d1a33c0196220fa140d" }),
            )]
        }
        CircuitModule::ValidatorHashTreeRoot => {
            let validator = Validator {
                pubkey: BlsPubkey([6; 48]),
                withdrawal_credentials: [0x01; 32],
                effective_balance: 32_000_000_000,
                slashed: false,
                activation_eligibility_epoch: 0,
                activation_epoch: 0,
                exit_epoch: u64::MAX,
                withdrawable_epoch: u64::MAX,
            };
            vec![TestVector::known(
                module,
                "active_validator",
                serde_json::to_value(&validator)?,
                json!({ "out": "0x04b4ca621c1720234bcebec7b40585c019188da9401474b7a93d6cd425edee02" }),
            )]
        }
    };
    Ok(vectors)
}

/// Negative counterpart of a vector: the same input with a corrupted expected output
pub fn tampered(vector: &TestVector) -> Result<TestVector, ConformanceError> {
    let mut output = vector.output.clone();
    if !tamper_value(&mut output) {
        return Err(ConformanceError::InvalidInput(format!(
            "{}/{}: output has nothing to tamper with",
            vector.module, vector.case
        )));
    }
    Ok(TestVector {
        module: vector.module,
        case: format!("{}_tampered", vector.case),
        input: vector.input.clone(),
        output,
    })
}

/// Corrupt the first scalar found in `value`, returns false if there is none
fn tamper_value(value: &mut Value) -> bool {
    match value {
        Value::Bool(b) => {
            *b = !*b;
            true
        }
        Value::Number(n) => match n.as_u64() {
            Some(n_u64) => {
                *value = json!(n_u64 ^ 1);
                true
            }
            None => false,
        },
        Value::String(s) => {
            if let Some(hex) = s.strip_prefix("0x") {
                let Some(last) = hex.chars().last().and_then(|c| c.to_digit(16)) else {
                    return false;
                };
                let flipped = std::char::from_digit(last ^ 1, 16).unwrap_or('0');
                *s = format!("0x{}{}", &hex[..hex.len() - 1], flipped);
                true
            } else if let Some(n) = BigUint::parse_bytes(s.as_bytes(), 10) {
                *s = (n + 1u32).to_string();
                true
            } else {
                false
            }
        }
        Value::Array(items) => items.iter_mut().any(tamper_value),
        Value::Object(map) => map.values_mut().any(tamper_value),
        Value::Null => false,
    }
}

/// Load every case of one module, sorted by case name
pub fn load_module_vectors(dir: &Path, module: CircuitModule) -> Result<Vec<TestVector>, ConformanceError> {
    let data_dir = dir.join(module.name()).join("data");
    if !data_dir.is_dir() {
        return Err(ConformanceError::MissingVectors(module.name().to_string()));
    }
    let mut cases: Vec<_> = std::fs::read_dir(&data_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .collect();
    cases.sort_by_key(|entry| entry.file_name());

    let mut vectors = Vec::with_capacity(cases.len());
    for entry in cases {
        let case_dir = entry.path();
        let input = serde_json::from_slice(&std::fs::read(case_dir.join("input.json"))?)?;
        let output = serde_json::from_slice(&std::fs::read(case_dir.join("output.json"))?)?;
        vectors.push(TestVector {
            module,
            case: entry.file_name().to_string_lossy().into_owned(),
            input,
            output,
        });
    }
    if vectors.is_empty() {
        return Err(ConformanceError::MissingVectors(module.name().to_string()));
    }
    debug!("Loaded {} vectors for {}", vectors.len(), module);
    Ok(vectors)
}

/// Write a vector to `case_dir/{input,output}.json`
pub fn write_case(case_dir: &Path, vector: &TestVector) -> Result<(), ConformanceError> {
    std::fs::create_dir_all(case_dir)?;
    std::fs::write(case_dir.join("input.json"), serde_json::to_vec_pretty(&vector.input)?)?;
    std::fs::write(case_dir.join("output.json"), serde_json::to_vec_pretty(&vector.output)?)?;
    Ok(())
}

pub fn write_vectors(dir: &Path, vectors: &[TestVector]) -> Result<(), ConformanceError> {
    for vector in vectors {
        let case_dir = dir.join(vector.module.name()).join("data").join(&vector.case);
        write_case(&case_dir, vector)?;
    }
    Ok(())
}
