//! Beacon light-client proof verification library
//!
//! This crate holds the light-client data model and the checks a relay performs before it
//! trusts an update: Groth16 verification of the proof against a versioned verification key,
//! decoding of the public signal schema, and the update invariants (slot ordering, chain of
//! custody, supermajority, binding of the public signals to the update's own fields).

pub mod groth16;
pub mod key;
pub mod signals;
pub mod update;
pub mod verify;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use groth16::{verify, ProofFormatError, ProofJson, VerificationKeyJson};
pub use key::{VerificationKey, VkId};
pub use signals::{PublicSignals, SignalsError, PUBLIC_SIGNAL_COUNT};
pub use update::{HeaderTransition, LightClientUpdate, PublishCursor, SlotRange};
pub use verify::{check_chain_of_custody, ProofVerifier, UpdateExpectations, UpdateRejection};
