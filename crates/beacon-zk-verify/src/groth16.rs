//! Groth16 over BN254 in the snarkjs JSON layout.
//!
//! Points are encoded as decimal coordinate strings: G1 as `[x, y, z]`, G2 as
//! `[[x.c0, x.c1], [y.c0, y.c1], [z.c0, z.c1]]`, with `z` either one (affine) or zero
//! (the point at infinity). Every coordinate is range checked against the base field and
//! every decoded point is checked to be on the curve and in the prime-order subgroup.

use ark_bn254::{Bn254, Fq, Fq2, Fr, G1Affine, G2Affine};
use ark_ec::AffineRepr;
use ark_ff::{One, PrimeField, Zero};
use ark_groth16::{Groth16, Proof, VerifyingKey};
use ark_snark::SNARK;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::key::VerificationKey;

pub const PROTOCOL: &str = "groth16";
pub const CURVE: &str = "bn128";

/// Errors decoding proofs, keys and field elements
#[derive(Error, Debug)]
pub enum ProofFormatError {
    #[error("Invalid decimal field element: {0:?}")]
    InvalidNumber(String),
    #[error("Field element {0} is not below the field modulus")]
    OutOfRange(String),
    #[error("Malformed point: {0}")]
    MalformedPoint(&'static str),
    #[error("Point is not on the curve")]
    NotOnCurve,
    #[error("Point is not in the prime-order subgroup")]
    NotInSubgroup,
    #[error("Unsupported protocol {0}")]
    Protocol(String),
    #[error("Unsupported curve {0}")]
    Curve(String),
    #[error("Verification key declares {declared} public inputs but has {ic} input commitments")]
    InputCount { declared: usize, ic: usize },
    #[error("Public signal count mismatch: circuit expects {expected}, got {got}")]
    Arity { expected: usize, got: usize },
    #[error("Pairing check could not be evaluated: {0}")]
    Synthesis(String),
    #[error("Pairing check failed")]
    PairingCheck,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn default_protocol() -> String {
    PROTOCOL.to_string()
}

fn default_curve() -> String {
    CURVE.to_string()
}

/// snarkjs `proof.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofJson {
    pub pi_a: Vec<String>,
    pub pi_b: Vec<Vec<String>>,
    pub pi_c: Vec<String>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_curve")]
    pub curve: String,
}

/// snarkjs `verification_key.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationKeyJson {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_curve")]
    pub curve: String,
    #[serde(rename = "nPublic")]
    pub n_public: usize,
    pub vk_alpha_1: Vec<String>,
    pub vk_beta_2: Vec<Vec<String>>,
    pub vk_gamma_2: Vec<Vec<String>>,
    pub vk_delta_2: Vec<Vec<String>>,
    #[serde(rename = "IC")]
    pub ic: Vec<Vec<String>>,
}

/// Parse an unsigned decimal integer, digits only
pub(crate) fn parse_decimal(s: &str) -> Option<BigUint> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    BigUint::parse_bytes(s.as_bytes(), 10)
}

/// Parse a decimal field element, rejecting values at or above the modulus
pub fn parse_field<F: PrimeField>(s: &str) -> Result<F, ProofFormatError> {
    let value = parse_decimal(s).ok_or_else(|| ProofFormatError::InvalidNumber(s.to_string()))?;
    let element = F::from(value.clone());
    // Reduction changes the value iff it was not canonical
    let canonical: BigUint = element.into();
    if canonical != value {
        return Err(ProofFormatError::OutOfRange(s.to_string()));
    }
    Ok(element)
}

pub(crate) fn field_to_decimal<F: PrimeField>(element: &F) -> String {
    let value: BigUint = (*element).into();
    value.to_string()
}

fn parse_fq2(coords: &[String]) -> Result<Fq2, ProofFormatError> {
    let [c0, c1] = coords else {
        return Err(ProofFormatError::MalformedPoint(
            "G2 coordinate needs two components",
        ));
    };
    Ok(Fq2::new(parse_field(c0)?, parse_field(c1)?))
}

pub fn parse_g1(coords: &[String]) -> Result<G1Affine, ProofFormatError> {
    let [x, y, z] = coords else {
        return Err(ProofFormatError::MalformedPoint(
            "G1 point needs three coordinates",
        ));
    };
    let z: Fq = parse_field(z)?;
    if z.is_zero() {
        return Ok(G1Affine::zero());
    }
    if !z.is_one() {
        return Err(ProofFormatError::MalformedPoint("G1 point is not affine"));
    }
    let point = G1Affine::new_unchecked(parse_field(x)?, parse_field(y)?);
    if !point.is_on_curve() {
        return Err(ProofFormatError::NotOnCurve);
    }
    if !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(ProofFormatError::NotInSubgroup);
    }
    Ok(point)
}

pub fn parse_g2(coords: &[Vec<String>]) -> Result<G2Affine, ProofFormatError> {
    let [x, y, z] = coords else {
        return Err(ProofFormatError::MalformedPoint(
            "G2 point needs three coordinates",
        ));
    };
    let z = parse_fq2(z)?;
    if z.is_zero() {
        return Ok(G2Affine::zero());
    }
    if !z.is_one() {
        return Err(ProofFormatError::MalformedPoint("G2 point is not affine"));
    }
    let point = G2Affine::new_unchecked(parse_fq2(x)?, parse_fq2(y)?);
    if !point.is_on_curve() {
        return Err(ProofFormatError::NotOnCurve);
    }
    if !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(ProofFormatError::NotInSubgroup);
    }
    Ok(point)
}

pub fn g1_to_json(point: &G1Affine) -> Vec<String> {
    if point.infinity {
        return vec!["0".into(), "1".into(), "0".into()];
    }
    vec![
        field_to_decimal(&point.x),
        field_to_decimal(&point.y),
        "1".into(),
    ]
}

pub fn g2_to_json(point: &G2Affine) -> Vec<Vec<String>> {
    if point.infinity {
        return vec![
            vec!["0".into(), "0".into()],
            vec!["1".into(), "0".into()],
            vec!["0".into(), "0".into()],
        ];
    }
    vec![
        vec![field_to_decimal(&point.x.c0), field_to_decimal(&point.x.c1)],
        vec![field_to_decimal(&point.y.c0), field_to_decimal(&point.y.c1)],
        vec!["1".into(), "0".into()],
    ]
}

fn check_tags(protocol: &str, curve: &str) -> Result<(), ProofFormatError> {
    if protocol != PROTOCOL {
        return Err(ProofFormatError::Protocol(protocol.to_string()));
    }
    if curve != CURVE {
        return Err(ProofFormatError::Curve(curve.to_string()));
    }
    Ok(())
}

impl ProofJson {
    /// Decode into an arkworks proof with curve and subgroup checks
    pub fn to_proof(&self) -> Result<Proof<Bn254>, ProofFormatError> {
        check_tags(&self.protocol, &self.curve)?;
        Ok(Proof {
            a: parse_g1(&self.pi_a)?,
            b: parse_g2(&self.pi_b)?,
            c: parse_g1(&self.pi_c)?,
        })
    }
}

impl From<&Proof<Bn254>> for ProofJson {
    fn from(proof: &Proof<Bn254>) -> Self {
        Self {
            pi_a: g1_to_json(&proof.a),
            pi_b: g2_to_json(&proof.b),
            pi_c: g1_to_json(&proof.c),
            protocol: default_protocol(),
            curve: default_curve(),
        }
    }
}

impl VerificationKeyJson {
    pub fn to_verifying_key(&self) -> Result<VerifyingKey<Bn254>, ProofFormatError> {
        check_tags(&self.protocol, &self.curve)?;
        if self.ic.len() != self.n_public + 1 {
            return Err(ProofFormatError::InputCount {
                declared: self.n_public,
                ic: self.ic.len(),
            });
        }
        Ok(VerifyingKey {
            alpha_g1: parse_g1(&self.vk_alpha_1)?,
            beta_g2: parse_g2(&self.vk_beta_2)?,
            gamma_g2: parse_g2(&self.vk_gamma_2)?,
            delta_g2: parse_g2(&self.vk_delta_2)?,
            gamma_abc_g1: self
                .ic
                .iter()
                .map(|point| parse_g1(point))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }
}

impl From<&VerifyingKey<Bn254>> for VerificationKeyJson {
    fn from(vk: &VerifyingKey<Bn254>) -> Self {
        Self {
            protocol: default_protocol(),
            curve: default_curve(),
            n_public: vk.gamma_abc_g1.len().saturating_sub(1),
            vk_alpha_1: g1_to_json(&vk.alpha_g1),
            vk_beta_2: g2_to_json(&vk.beta_g2),
            vk_gamma_2: g2_to_json(&vk.gamma_g2),
            vk_delta_2: g2_to_json(&vk.delta_g2),
            ic: vk.gamma_abc_g1.iter().map(g1_to_json).collect(),
        }
    }
}

/// Check a proof against a verification key and the public signals it attests to.
///
/// Returns an error describing the first failed check: signal arity, field range,
/// point decoding, or the pairing equation.
pub fn try_verify(
    vk: &VerificationKey,
    proof: &ProofJson,
    public_signals: &[String],
) -> Result<(), ProofFormatError> {
    if public_signals.len() != vk.n_public() {
        return Err(ProofFormatError::Arity {
            expected: vk.n_public(),
            got: public_signals.len(),
        });
    }
    let inputs = public_signals
        .iter()
        .map(|signal| parse_field::<Fr>(signal))
        .collect::<Result<Vec<_>, _>>()?;
    let proof = proof.to_proof()?;

    let valid = Groth16::<Bn254>::verify_with_processed_vk(vk.prepared(), &inputs, &proof)
        .map_err(|err| ProofFormatError::Synthesis(err.to_string()))?;
    if !valid {
        return Err(ProofFormatError::PairingCheck);
    }
    Ok(())
}

/// Verify a proof: strict boolean, true only if every check passes.
///
/// Pure and deterministic; safe to call concurrently with a shared key.
pub fn verify(vk: &VerificationKey, proof: &ProofJson, public_signals: &[String]) -> bool {
    match try_verify(vk, proof, public_signals) {
        Ok(()) => true,
        Err(err) => {
            debug!("Proof rejected under key {}: {}", vk.id(), err);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::PublicSignals;
    use crate::testing::TestProver;

    fn signals() -> PublicSignals {
        PublicSignals {
            prev_header_root: [1u8; 32],
            next_header_root: [2u8; 32],
            sync_committee_root: [3u8; 32],
            domain: [4u8; 32],
            participation: 400,
        }
    }

    /// Flip the lowest bit of a decimal number
    fn flip_low_bit(decimal: &str) -> String {
        let value = parse_decimal(decimal).unwrap();
        (value ^ BigUint::from(1u8)).to_string()
    }

    #[test]
    fn test_valid_proof_verifies() {
        let mut prover = TestProver::new(1);
        let vk = prover.verification_key();
        let signals = signals();
        let proof = prover.prove(&signals);
        assert!(verify(&vk, &proof, &signals.to_decimal_strings()));
    }

    #[test]
    fn test_single_bit_corruption_of_signals_fails() {
        let mut prover = TestProver::new(2);
        let vk = prover.verification_key();
        let signals = signals().to_decimal_strings();
        let proof = prover.prove(&PublicSignals::from_decimal_strings(&signals).unwrap());

        for i in 0..signals.len() {
            let mut tampered = signals.clone();
            tampered[i] = flip_low_bit(&tampered[i]);
            assert!(!verify(&vk, &proof, &tampered), "signal {i} corruption accepted");
        }
    }

    #[test]
    fn test_single_bit_corruption_of_proof_fails() {
        let mut prover = TestProver::new(3);
        let vk = prover.verification_key();
        let signals = signals();
        let proof = prover.prove(&signals);
        let public = signals.to_decimal_strings();

        let mut tampered = proof.clone();
        tampered.pi_a[0] = flip_low_bit(&tampered.pi_a[0]);
        assert!(!verify(&vk, &tampered, &public));

        let mut tampered = proof.clone();
        tampered.pi_c[1] = flip_low_bit(&tampered.pi_c[1]);
        assert!(!verify(&vk, &tampered, &public));

        let mut tampered = proof.clone();
        tampered.pi_b[0][1] = flip_low_bit(&tampered.pi_b[0][1]);
        assert!(!verify(&vk, &tampered, &public));
    }

    #[test]
    fn test_proof_for_other_signals_fails() {
        let mut prover = TestProver::new(4);
        let vk = prover.verification_key();
        let mut other = signals();
        other.participation += 1;
        let proof = prover.prove(&other);
        assert!(!verify(&vk, &proof, &signals().to_decimal_strings()));
    }

    #[test]
    fn test_arity_mismatch_fails() {
        let mut prover = TestProver::new(5);
        let vk = prover.verification_key();
        let signals = signals();
        let proof = prover.prove(&signals);
        let mut public = signals.to_decimal_strings();

        public.push("0".into());
        assert!(matches!(
            try_verify(&vk, &proof, &public),
            Err(ProofFormatError::Arity { .. })
        ));
        public.truncate(8);
        assert!(!verify(&vk, &proof, &public));
    }

    #[test]
    fn test_out_of_range_signal_fails() {
        let mut prover = TestProver::new(6);
        let vk = prover.verification_key();
        let signals = signals();
        let proof = prover.prove(&signals);
        let mut public = signals.to_decimal_strings();

        // Adding the scalar modulus keeps the value congruent but non-canonical
        let modulus: BigUint = Fr::MODULUS.into();
        let shifted = parse_decimal(&public[8]).unwrap() + modulus;
        public[8] = shifted.to_string();
        assert!(matches!(
            try_verify(&vk, &proof, &public),
            Err(ProofFormatError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_parse_field_rejects_garbage() {
        assert!(parse_field::<Fr>("").is_err());
        assert!(parse_field::<Fr>("-1").is_err());
        assert!(parse_field::<Fr>("0x10").is_err());
        assert_eq!(parse_field::<Fr>("7").unwrap(), Fr::from(7u64));
    }

    #[test]
    fn test_key_json_roundtrip() {
        let prover = TestProver::new(7);
        let json = prover.verification_key_json();
        let vk = json.to_verifying_key().unwrap();
        assert_eq!(VerificationKeyJson::from(&vk), json);
    }

    #[test]
    fn test_rejects_wrong_protocol() {
        let mut prover = TestProver::new(8);
        let vk = prover.verification_key();
        let signals = signals();
        let mut proof = prover.prove(&signals);
        proof.protocol = "plonk".into();
        assert!(!verify(&vk, &proof, &signals.to_decimal_strings()));
    }
}
