//! CLI wrapper for queueing a proof artifact in the relay database

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use beacon_zk_verify::{ProofJson, PublicSignals, SlotRange, VkId};
use clap::Args;
use tracing::info;

use crate::artifacts::ProofArtifact;
use crate::store::RelayStore;

/// CLI arguments for the `import-artifact` subcommand
#[derive(Clone, Debug, Args)]
pub struct ImportArtifactArgs {
    /// Path to the relay database
    #[arg(long, default_value = "./.relay_data/relay.db")]
    db_path: PathBuf,
    /// snarkjs proof.json
    #[arg(long)]
    proof: PathBuf,
    /// snarkjs public.json
    #[arg(long)]
    public: PathBuf,
    /// Slot of the last published header the proof starts from
    #[arg(long)]
    from: u64,
    /// Slot of the finalized header the proof reaches
    #[arg(long)]
    to: u64,
    /// Id of the verification key the proof was produced under
    #[arg(long)]
    vk_id: Option<VkId>,
}

pub async fn run(args: ImportArtifactArgs) -> Result<(), anyhow::Error> {
    let range = SlotRange::new(args.from, args.to)
        .ok_or_else(|| anyhow!("Empty range {}..{}", args.from, args.to))?;

    let proof_bytes = tokio::fs::read(&args.proof)
        .await
        .with_context(|| format!("reading {}", args.proof.display()))?;
    let proof: ProofJson = serde_json::from_slice(&proof_bytes)?;
    proof.to_proof()?;

    let public_bytes = tokio::fs::read(&args.public)
        .await
        .with_context(|| format!("reading {}", args.public.display()))?;
    let public_signals: Vec<String> = serde_json::from_slice(&public_bytes)?;
    PublicSignals::from_decimal_strings(&public_signals)?;

    let artifact = ProofArtifact {
        range,
        proof,
        public_signals,
        vk_id: args.vk_id,
    };
    let store = RelayStore::single_atomic_writer(&args.db_path).await?;
    store.insert_artifact(&artifact).await?;
    info!("Artifact {} for {} queued", artifact.id(), range);
    Ok(())
}
