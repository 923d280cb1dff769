//! Proof artifacts: produced proofs and their public signals, looked up by slot range.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use beacon_zk_verify::{ProofJson, SlotRange, VkId};
use blake2::{Blake2s256, Digest};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed artifact {name}: {reason}")]
    Malformed { name: String, reason: String },
    #[error("Artifact backend failure: {0}")]
    Backend(String),
}

/// Content identifier of an artifact: BLAKE2s-256 over its proof and signals
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactId(pub [u8; 32]);

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArtifactId({self})")
    }
}

/// A proof for the header transition over `range`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofArtifact {
    pub range: SlotRange,
    pub proof: ProofJson,
    pub public_signals: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vk_id: Option<VkId>,
}

impl ProofArtifact {
    pub fn id(&self) -> ArtifactId {
        let mut hasher = Blake2s256::new();
        for coord in self.proof.pi_a.iter().chain(self.proof.pi_c.iter()) {
            hasher.update(coord.as_bytes());
            hasher.update([0u8]);
        }
        for coord in self.proof.pi_b.iter().flatten() {
            hasher.update(coord.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update([0xffu8]);
        for signal in &self.public_signals {
            hasher.update(signal.as_bytes());
            hasher.update([0u8]);
        }
        ArtifactId(hasher.finalize().into())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Every readable artifact starting at `range.from` and ending at or before `range.to`,
    /// furthest-reaching first
    async fn candidates(&self, range: SlotRange) -> Result<Vec<ProofArtifact>, ArtifactError>;

    /// Artifact starting at `range.from` whose end is the furthest slot not past `range.to`
    async fn get_proof(&self, range: SlotRange) -> Result<Option<ProofArtifact>, ArtifactError> {
        Ok(self.candidates(range).await?.into_iter().next())
    }
}

/// Ranges answering `range`, furthest-reaching first
pub fn matching_ranges(range: SlotRange, candidates: impl IntoIterator<Item = SlotRange>) -> Vec<SlotRange> {
    let mut matching: Vec<_> = candidates
        .into_iter()
        .filter(|candidate| candidate.from == range.from && candidate.to <= range.to)
        .collect();
    matching.sort_by(|a, b| b.to.cmp(&a.to));
    matching.dedup();
    matching
}

/// Drop malformed artifacts so they do not hide readable ones.
/// Fails with the first malformed error only when nothing readable is left.
pub fn keep_readable(
    loaded: impl IntoIterator<Item = Result<ProofArtifact, ArtifactError>>,
) -> Result<Vec<ProofArtifact>, ArtifactError> {
    let mut readable = Vec::new();
    let mut malformed = None;
    for artifact in loaded {
        match artifact {
            Ok(artifact) => readable.push(artifact),
            Err(err @ ArtifactError::Malformed { .. }) => {
                warn!("Skipping artifact: {}", err);
                if malformed.is_none() {
                    malformed = Some(err);
                }
            }
            Err(err) => return Err(err),
        }
    }
    match malformed {
        Some(err) if readable.is_empty() => Err(err),
        _ => Ok(readable),
    }
}

/// Directory of snarkjs outputs named `proof_<from>_<to>.json` and `public_<from>_<to>.json`
#[derive(Debug, Clone)]
pub struct DirectoryArtifactStore {
    dir: PathBuf,
}

impl DirectoryArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn parse_name(name: &str) -> Option<SlotRange> {
        let (from, to) = name.strip_prefix("proof_")?.strip_suffix(".json")?.split_once('_')?;
        SlotRange::new(from.parse().ok()?, to.parse().ok()?)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, ArtifactError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| ArtifactError::Malformed {
                name: path.display().to_string(),
                reason: err.to_string(),
            })
    }

    async fn load(&self, found: SlotRange) -> Result<Option<ProofArtifact>, ArtifactError> {
        let proof_path = self.dir.join(format!("proof_{}_{}.json", found.from, found.to));
        let public_path = self.dir.join(format!("public_{}_{}.json", found.from, found.to));
        let Some(proof) = Self::read_json::<ProofJson>(&proof_path).await? else {
            return Ok(None);
        };
        // The prover writes the proof first; signals may not be there yet
        let Some(public_signals) = Self::read_json::<Vec<String>>(&public_path).await? else {
            debug!("Proof for {} has no public signals yet", found);
            return Ok(None);
        };
        Ok(Some(ProofArtifact {
            range: found,
            proof,
            public_signals,
            vk_id: None,
        }))
    }
}

#[async_trait]
impl ArtifactStore for DirectoryArtifactStore {
    async fn candidates(&self, range: SlotRange) -> Result<Vec<ProofArtifact>, ArtifactError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut ranges = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(candidate) = entry.file_name().to_str().and_then(Self::parse_name) {
                ranges.push(candidate);
            }
        }

        let mut loaded = Vec::new();
        for found in matching_ranges(range, ranges) {
            if let Some(artifact) = self.load(found).await.transpose() {
                loaded.push(artifact);
            }
        }
        keep_readable(loaded)
    }
}
