//! Update verification: everything a relay checks before it publishes an update.

use std::sync::Arc;

use beacon_ssz::{is_supermajority, to_hex, Root};
use thiserror::Error;

use crate::groth16::{self, ProofJson};
use crate::key::{VerificationKey, VkId};
use crate::signals::{PublicSignals, SignalsError};
use crate::update::{LightClientUpdate, PublishCursor};

/// Reasons an update is refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateRejection {
    #[error("Proof was produced under key {artifact}, relay runs key {expected}")]
    KeyMismatch { expected: VkId, artifact: VkId },
    #[error("Finalized slot {finalized} does not advance past the published slot {published}")]
    StaleSlot { published: u64, finalized: u64 },
    #[error("Attested slot {attested} is not after finalized slot {finalized}")]
    AttestedNotAfterFinalized { attested: u64, finalized: u64 },
    #[error("Update range {from}..{to} does not match cursor slot {cursor} and finalized slot {finalized}")]
    RangeMismatch {
        from: u64,
        to: u64,
        cursor: u64,
        finalized: u64,
    },
    #[error("Chain of custody broken: expected previous header {expected}, got {got}")]
    CustodyViolation { expected: String, got: String },
    #[error("Participation bitmask covers {got} members, committee has {expected}")]
    CommitteeSize { expected: usize, got: usize },
    #[error("Insufficient participation: {participants} of {committee_size}")]
    InsufficientParticipation {
        participants: usize,
        committee_size: usize,
    },
    #[error("Malformed public signals: {0}")]
    Signals(#[from] SignalsError),
    #[error("Public signal {field} does not match the update")]
    SignalMismatch { field: &'static str },
    #[error("Proof verification failed")]
    InvalidProof,
}

/// What the relay knows independently of the artifact
#[derive(Debug, Clone)]
pub struct UpdateExpectations {
    pub cursor: PublishCursor,
    pub committee_size: usize,
    /// Sync committee signing domain of the attested slot's fork
    pub domain: Root,
}

/// Shared, immutable verifier bound to one verification key version
#[derive(Debug, Clone)]
pub struct ProofVerifier {
    key: Arc<VerificationKey>,
}

impl ProofVerifier {
    pub fn new(key: VerificationKey) -> Self {
        Self { key: Arc::new(key) }
    }

    pub fn key(&self) -> &VerificationKey {
        &self.key
    }

    pub fn verify(&self, proof: &ProofJson, public_signals: &[String]) -> bool {
        groth16::verify(&self.key, proof, public_signals)
    }

    /// Run every check on an update, in order, stopping at the first failure:
    /// key version, slot ordering, chain of custody, range, participation,
    /// signal binding and finally the pairing check.
    ///
    /// Custody comes before the range check so an update applied out of order is
    /// reported as a custody violation.
    pub fn verify_update(
        &self,
        update: &LightClientUpdate,
        expectations: &UpdateExpectations,
    ) -> Result<(), UpdateRejection> {
        if let Some(artifact) = update.vk_id {
            if artifact != self.key.id() {
                return Err(UpdateRejection::KeyMismatch {
                    expected: self.key.id(),
                    artifact,
                });
            }
        }

        let cursor = &expectations.cursor;
        check_ordering(cursor, update)?;
        check_custody(cursor, update)?;
        if update.range.from != cursor.last_published_slot || update.range.to != update.finalized_slot
        {
            return Err(UpdateRejection::RangeMismatch {
                from: update.range.from,
                to: update.range.to,
                cursor: cursor.last_published_slot,
                finalized: update.finalized_slot,
            });
        }

        if update.participation.len() != expectations.committee_size {
            return Err(UpdateRejection::CommitteeSize {
                expected: expectations.committee_size,
                got: update.participation.len(),
            });
        }
        let participants = update.participants();
        if !is_supermajority(participants, expectations.committee_size) {
            return Err(UpdateRejection::InsufficientParticipation {
                participants,
                committee_size: expectations.committee_size,
            });
        }

        let signals = PublicSignals::from_decimal_strings(&update.public_signals)?;
        let bindings = [
            ("prev_header_root", signals.prev_header_root == update.prev_header_root),
            ("next_header_root", signals.next_header_root == update.next_header_root),
            (
                "sync_committee_root",
                signals.sync_committee_root == update.sync_committee_root,
            ),
            ("domain", signals.domain == expectations.domain),
            ("participation", signals.participation == participants as u64),
        ];
        if let Some((field, _)) = bindings.into_iter().find(|(_, bound)| !bound) {
            return Err(UpdateRejection::SignalMismatch { field });
        }

        if !self.verify(&update.proof, &update.public_signals) {
            return Err(UpdateRejection::InvalidProof);
        }
        Ok(())
    }
}

fn check_ordering(cursor: &PublishCursor, update: &LightClientUpdate) -> Result<(), UpdateRejection> {
    if update.finalized_slot <= cursor.last_published_slot {
        return Err(UpdateRejection::StaleSlot {
            published: cursor.last_published_slot,
            finalized: update.finalized_slot,
        });
    }
    if update.attested_slot <= update.finalized_slot {
        return Err(UpdateRejection::AttestedNotAfterFinalized {
            attested: update.attested_slot,
            finalized: update.finalized_slot,
        });
    }
    Ok(())
}

fn check_custody(cursor: &PublishCursor, update: &LightClientUpdate) -> Result<(), UpdateRejection> {
    if update.prev_header_root != cursor.last_header_root {
        return Err(UpdateRejection::CustodyViolation {
            expected: to_hex(&cursor.last_header_root),
            got: to_hex(&update.prev_header_root),
        });
    }
    Ok(())
}

/// Apply a sequence of updates to a cursor, checking slot ordering and chain of custody.
///
/// Returns the cursor after the last update.
pub fn check_chain_of_custody(
    start: PublishCursor,
    updates: &[LightClientUpdate],
) -> Result<PublishCursor, UpdateRejection> {
    updates.iter().try_fold(start, |cursor, update| {
        check_ordering(&cursor, update)?;
        check_custody(&cursor, update)?;
        Ok(cursor.advanced_by(update))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{header_root, transition, TestProver};

    const DOMAIN: Root = [0x07; 32];

    fn expectations(cursor: PublishCursor) -> UpdateExpectations {
        UpdateExpectations {
            cursor,
            committee_size: 512,
            domain: DOMAIN,
        }
    }

    fn verifier(prover: &TestProver) -> ProofVerifier {
        ProofVerifier::new(prover.verification_key())
    }

    #[test]
    fn test_valid_update_passes() {
        let mut prover = TestProver::new(21);
        let update = prover.prove_transition(transition(5601823, 5609044, 400), DOMAIN);
        let cursor = PublishCursor::new(5601823, header_root(5601823));
        assert_eq!(verifier(&prover).verify_update(&update, &expectations(cursor)), Ok(()));
    }

    #[test]
    fn test_custody_sequence() {
        let mut prover = TestProver::new(22);
        let first = prover.prove_transition(transition(5601823, 5609044, 400), DOMAIN);
        let second = prover.prove_transition(transition(5609044, 5609069, 400), DOMAIN);
        let start = PublishCursor::new(5601823, header_root(5601823));

        let end = check_chain_of_custody(start, &[first.clone(), second.clone()]).unwrap();
        assert_eq!(end, PublishCursor::new(5609069, header_root(5609069)));

        // Applying the second update first breaks custody
        assert!(matches!(
            check_chain_of_custody(start, &[second.clone()]),
            Err(UpdateRejection::CustodyViolation { .. })
        ));
        let verifier = verifier(&prover);
        assert!(matches!(
            verifier.verify_update(&second, &expectations(start)),
            Err(UpdateRejection::CustodyViolation { .. })
        ));

        // Replaying the first update after the second is stale
        assert!(matches!(
            check_chain_of_custody(start, &[first.clone(), second, first]),
            Err(UpdateRejection::StaleSlot { .. })
        ));
    }

    #[test]
    fn test_custody_violation_with_matching_range() {
        let mut prover = TestProver::new(23);
        let mut t = transition(5601823, 5609044, 400);
        t.prev_header_root = [0xee; 32];
        let update = prover.prove_transition(t, DOMAIN);
        let cursor = PublishCursor::new(5601823, header_root(5601823));
        assert!(matches!(
            verifier(&prover).verify_update(&update, &expectations(cursor)),
            Err(UpdateRejection::CustodyViolation { .. })
        ));
    }

    #[test]
    fn test_supermajority_boundary() {
        let mut prover = TestProver::new(24);
        let verifier = verifier(&prover);
        let cursor = PublishCursor::new(100, header_root(100));

        let update = prover.prove_transition(transition(100, 164, 342), DOMAIN);
        assert_eq!(verifier.verify_update(&update, &expectations(cursor)), Ok(()));

        let update = prover.prove_transition(transition(100, 164, 341), DOMAIN);
        assert_eq!(
            verifier.verify_update(&update, &expectations(cursor)),
            Err(UpdateRejection::InsufficientParticipation {
                participants: 341,
                committee_size: 512
            })
        );
    }

    #[test]
    fn test_tampered_next_root_in_signals() {
        let mut prover = TestProver::new(25);
        let verifier = verifier(&prover);
        let cursor = PublishCursor::new(100, header_root(100));
        let update = prover.prove_transition(transition(100, 164, 400), DOMAIN);

        // Signals tampered after proving: the pairing check fails
        let mut signals = PublicSignals::from_decimal_strings(&update.public_signals).unwrap();
        signals.next_header_root[31] ^= 1;
        let mut tampered = update.clone();
        tampered.public_signals = signals.to_decimal_strings();
        assert!(!verifier.verify(&tampered.proof, &tampered.public_signals));

        // Proof consistent with the tampered signals: algebraically valid, but not bound
        tampered.proof = prover.prove(&signals);
        assert!(verifier.verify(&tampered.proof, &tampered.public_signals));
        assert_eq!(
            verifier.verify_update(&tampered, &expectations(cursor)),
            Err(UpdateRejection::SignalMismatch {
                field: "next_header_root"
            })
        );
    }

    #[test]
    fn test_domain_and_participation_binding() {
        let mut prover = TestProver::new(26);
        let verifier = verifier(&prover);
        let cursor = PublishCursor::new(100, header_root(100));

        let update = prover.prove_transition(transition(100, 164, 400), [0x08; 32]);
        assert_eq!(
            verifier.verify_update(&update, &expectations(cursor)),
            Err(UpdateRejection::SignalMismatch { field: "domain" })
        );

        let mut update = prover.prove_transition(transition(100, 164, 400), DOMAIN);
        update.participation[511] = !update.participation[511];
        assert_eq!(
            verifier.verify_update(&update, &expectations(cursor)),
            Err(UpdateRejection::SignalMismatch {
                field: "participation"
            })
        );
    }

    #[test]
    fn test_key_version_binding() {
        let mut prover = TestProver::new(27);
        let other = TestProver::new(28);
        let cursor = PublishCursor::new(100, header_root(100));
        let update = prover.prove_transition(transition(100, 164, 400), DOMAIN);

        let verifier = ProofVerifier::new(other.verification_key());
        assert!(matches!(
            verifier.verify_update(&update, &expectations(cursor)),
            Err(UpdateRejection::KeyMismatch { .. })
        ));

        // Without a recorded key id the pairing check still catches it
        let mut unlabelled = update.clone();
        unlabelled.vk_id = None;
        assert_eq!(
            verifier.verify_update(&unlabelled, &expectations(cursor)),
            Err(UpdateRejection::InvalidProof)
        );
    }

    #[test]
    fn test_ordering_checks() {
        let mut prover = TestProver::new(29);
        let verifier = verifier(&prover);
        let cursor = PublishCursor::new(100, header_root(100));

        let mut t = transition(100, 164, 400);
        t.attested_slot = 164;
        let update = prover.prove_transition(t, DOMAIN);
        assert!(matches!(
            verifier.verify_update(&update, &expectations(cursor)),
            Err(UpdateRejection::AttestedNotAfterFinalized { .. })
        ));

        let update = prover.prove_transition(transition(100, 164, 400), DOMAIN);
        let mut wrong_size = expectations(cursor);
        wrong_size.committee_size = 256;
        assert!(matches!(
            verifier.verify_update(&update, &wrong_size),
            Err(UpdateRejection::CommitteeSize { expected: 256, got: 512 })
        ));
    }

    #[test]
    fn test_range_must_end_at_finalized_slot() {
        let mut prover = TestProver::new(30);
        let mut update = prover.prove_transition(transition(100, 164, 400), DOMAIN);
        update.range = crate::SlotRange::new(100, 150).unwrap();
        let cursor = PublishCursor::new(100, header_root(100));
        assert!(matches!(
            verifier(&prover).verify_update(&update, &expectations(cursor)),
            Err(UpdateRejection::RangeMismatch { to: 150, finalized: 164, .. })
        ));
    }
}
