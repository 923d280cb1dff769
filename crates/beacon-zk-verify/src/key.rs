//! Versioned verification keys.
//!
//! A key is identified by the BLAKE2s-256 digest of its canonical JSON encoding, so a relay
//! can refuse updates produced under a different circuit build.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use ark_bn254::Bn254;
use ark_groth16::{Groth16, PreparedVerifyingKey};
use ark_snark::SNARK;
use blake2::{Blake2s256, Digest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::groth16::{ProofFormatError, VerificationKeyJson};

/// Content identifier of a verification key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VkId(pub [u8; 32]);

impl VkId {
    pub fn of(json: &VerificationKeyJson) -> Result<Self, ProofFormatError> {
        let canonical = serde_json::to_vec(json)?;
        Ok(Self(Blake2s256::digest(&canonical).into()))
    }
}

impl fmt::Display for VkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for VkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VkId({self})")
    }
}

impl FromStr for VkId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim_start_matches("0x"), &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for VkId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VkId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Verification key prepared for repeated pairing checks
#[derive(Clone)]
pub struct VerificationKey {
    id: VkId,
    n_public: usize,
    prepared: PreparedVerifyingKey<Bn254>,
}

impl VerificationKey {
    pub fn from_json(json: &VerificationKeyJson) -> Result<Self, ProofFormatError> {
        let vk = json.to_verifying_key()?;
        let prepared = Groth16::<Bn254>::process_vk(&vk)
            .map_err(|err| ProofFormatError::Synthesis(err.to_string()))?;
        Ok(Self {
            id: VkId::of(json)?,
            n_public: json.n_public,
            prepared,
        })
    }

    /// Load a snarkjs `verification_key.json`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProofFormatError> {
        let bytes = std::fs::read(path)?;
        let json: VerificationKeyJson = serde_json::from_slice(&bytes)?;
        Self::from_json(&json)
    }

    pub fn id(&self) -> VkId {
        self.id
    }

    /// Number of public signals the circuit expects
    pub fn n_public(&self) -> usize {
        self.n_public
    }

    pub(crate) fn prepared(&self) -> &PreparedVerifyingKey<Bn254> {
        &self.prepared
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("id", &self.id)
            .field("n_public", &self.n_public)
            .finish_non_exhaustive()
    }
}
