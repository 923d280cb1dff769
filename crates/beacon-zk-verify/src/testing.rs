//! Deterministic Groth16 prover for the public signal schema.
//!
//! The circuit only binds each public input to a witness, which is enough to produce
//! real BN254 proofs that verify against a real key and fail for any other signal tuple.

use ark_bn254::{Bn254, Fr};
use ark_groth16::{Groth16, ProvingKey, VerifyingKey};
use ark_relations::lc;
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystemRef, SynthesisError, Variable};
use ark_snark::SNARK;
use ark_std::rand::rngs::StdRng;
use ark_std::rand::SeedableRng;
use beacon_ssz::{hash_two, uint64_leaf, Root, SYNC_COMMITTEE_SIZE};

use crate::groth16::{ProofJson, VerificationKeyJson};
use crate::key::VerificationKey;
use crate::signals::{PublicSignals, PUBLIC_SIGNAL_COUNT};
use crate::update::{HeaderTransition, LightClientUpdate, SlotRange};

#[derive(Clone)]
struct SignalsCircuit {
    inputs: [Fr; PUBLIC_SIGNAL_COUNT],
}

impl ConstraintSynthesizer<Fr> for SignalsCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        for value in self.inputs {
            let input = cs.new_input_variable(|| Ok(value))?;
            let witness = cs.new_witness_variable(|| Ok(value))?;
            cs.enforce_constraint(lc!() + input, lc!() + Variable::One, lc!() + witness)?;
        }
        Ok(())
    }
}

pub struct TestProver {
    pk: ProvingKey<Bn254>,
    vk: VerifyingKey<Bn254>,
    rng: StdRng,
}

impl TestProver {
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let circuit = SignalsCircuit {
            inputs: [Fr::from(0u64); PUBLIC_SIGNAL_COUNT],
        };
        let (pk, vk) = Groth16::<Bn254>::circuit_specific_setup(circuit, &mut rng)
            .expect("setup of the signals circuit");
        Self { pk, vk, rng }
    }

    pub fn verification_key_json(&self) -> VerificationKeyJson {
        VerificationKeyJson::from(&self.vk)
    }

    pub fn verification_key(&self) -> VerificationKey {
        VerificationKey::from_json(&self.verification_key_json()).expect("generated key decodes")
    }

    pub fn prove(&mut self, signals: &PublicSignals) -> ProofJson {
        let inputs: [Fr; PUBLIC_SIGNAL_COUNT] = signals
            .to_field_elements()
            .try_into()
            .expect("nine public signals");
        let proof = Groth16::<Bn254>::prove(&self.pk, SignalsCircuit { inputs }, &mut self.rng)
            .expect("proving the signals circuit");
        ProofJson::from(&proof)
    }

    /// Attach a proof whose signals are bound to the transition's own fields
    pub fn prove_transition(&mut self, transition: HeaderTransition, domain: Root) -> LightClientUpdate {
        let signals = PublicSignals {
            prev_header_root: transition.prev_header_root,
            next_header_root: transition.next_header_root,
            sync_committee_root: transition.sync_committee_root,
            domain,
            participation: transition.participants() as u64,
        };
        let proof = self.prove(&signals);
        let vk_id = self.verification_key().id();
        transition.into_update(proof, signals.to_decimal_strings(), Some(vk_id))
    }
}

/// Deterministic stand-in for the root of the header at `slot`
pub fn header_root(slot: u64) -> Root {
    hash_two(&uint64_leaf(slot), &[0x42; 32])
}

/// Transition from the header at `from` to the header at `to`, attested one slot later,
/// signed by the first `participants` committee members
pub fn transition(from: u64, to: u64, participants: usize) -> HeaderTransition {
    HeaderTransition {
        range: SlotRange::new(from, to).expect("from < to"),
        attested_slot: to + 1,
        finalized_slot: to,
        prev_header_root: header_root(from),
        next_header_root: header_root(to),
        sync_committee_root: [0x5c; 32],
        participation: (0..SYNC_COMMITTEE_SIZE).map(|i| i < participants).collect(),
    }
}
