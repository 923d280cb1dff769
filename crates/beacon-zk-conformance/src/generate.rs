//! CLI wrapper for writing the built-in vectors

use clap::Args;
use std::path::PathBuf;
use tracing::info;

use beacon_zk_conformance::{builtin_vectors, write_vectors};

/// CLI arguments for the `generate` subcommand
#[derive(Clone, Debug, Args)]
pub struct GenerateArgs {
    /// Directory to write `<module>/data/<case>/{input,output}.json` into
    #[arg(long)]
    out: PathBuf,
}

pub async fn run(args: GenerateArgs) -> Result<(), anyhow::Error> {
    let vectors = builtin_vectors()?;
    write_vectors(&args.out, &vectors)?;
    info!("Wrote {} vectors to {}", vectors.len(), args.out.display());
    Ok(())
}
