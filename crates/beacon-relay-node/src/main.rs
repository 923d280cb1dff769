#![doc = include_str!("../README.md")]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use beacon_api_client::BeaconClient;
use beacon_zk_verify::{ProofVerifier, VerificationKey};
use clap::{command, Args, Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing::{error, info, subscriber::set_global_default};
use tracing_subscriber::filter::EnvFilter;

use crate::{
    artifacts::{ArtifactStore, DirectoryArtifactStore},
    contract::parse_address,
    network::Network,
    publisher::{EthPublisher, EthPublisherConfig},
    relay::{restore_cursor, Relay, RelayConfig},
    shutdown::Shutdown,
    source::BeaconUpdateSource,
    store::RelayStore,
};

mod artifacts;
mod contract;
mod import;
mod network;
mod publisher;
mod relay;
mod shutdown;
mod source;
mod store;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Logging level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Clone, Debug)]
enum Commands {
    /// Follow the beacon chain and publish updates to the light-client contract
    Run(RunArgs),
    /// Queue a proof artifact in the relay database
    ImportArtifact(import::ImportArtifactArgs),
}

#[derive(Clone, Debug, Args)]
struct RunArgs {
    /// Followed network
    #[arg(long, env = "FOLLOW_NETWORK", value_enum)]
    network: Network,
    /// Beacon node REST API URL
    #[arg(long, env = "BEACON_REST_API")]
    beacon_api_url: String,
    /// Ethereum JSON-RPC URL
    #[arg(long, env = "ETH_RPC")]
    eth_rpc_url: String,
    /// Ethereum RPC user:password (optional)
    #[arg(long, env = "USERPWD")]
    eth_rpc_userpwd: Option<String>,
    /// Light-client contract address
    #[arg(long, env = "LIGHT_CLIENT_ADDRESS")]
    light_client: String,
    /// Node-managed account that sends the updates
    #[arg(long, env = "PUBLISHER_ADDRESS")]
    publisher: String,
    /// snarkjs verification key of the deployed circuit version
    #[arg(long, env = "VERIFICATION_KEY")]
    verification_key: PathBuf,
    /// Path to the relay database (cursor and artifact queue)
    #[arg(long, default_value = "./.relay_data/relay.db")]
    db_path: PathBuf,
    /// Read artifacts from a directory of snarkjs outputs instead of the database queue
    #[arg(long)]
    artifacts_dir: Option<PathBuf>,
    /// Start slot when no cursor is persisted; the network checkpoint by default
    #[arg(long)]
    checkpoint_slot: Option<u64>,
    /// Base poll interval
    #[arg(long, default_value = "12")]
    poll_interval_secs: u64,
    /// Poll backoff cap
    #[arg(long, default_value = "384")]
    max_poll_interval_secs: u64,
    /// Deadline for a single backend call
    #[arg(long, default_value = "300")]
    call_timeout_secs: u64,
    /// How long to wait for a transaction receipt
    #[arg(long, default_value = "180")]
    receipt_timeout_secs: u64,
    /// Warn when blocked this many slots behind the finalized head
    #[arg(long, default_value = "256")]
    stall_warn_slots: u64,
}

fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber_builder =
        tracing_subscriber::fmt::Subscriber::builder().with_env_filter(env_filter);

    let subscriber = subscriber_builder.with_writer(std::io::stderr).finish();
    set_global_default(subscriber).expect("Failed to set subscriber");
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let res = match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::ImportArtifact(args) => import::run(args).await,
    };

    match res {
        Ok(()) => {
            info!("Beacon relay node has shut down");
            std::process::exit(0);
        }
        Err(err) => {
            error!("Beacon relay node has exited with error: {}", err);
            std::process::exit(1);
        }
    }
}

async fn run_node(args: RunArgs) -> Result<(), anyhow::Error> {
    let network = args.network.config();
    info!("Beacon relay node is launching for {:?}...", network.network);

    // Instantiating components and wiring them together
    let verification_key = VerificationKey::load(&args.verification_key)?;
    info!("Verification key {} loaded", verification_key.id());

    let store = Arc::new(RelayStore::single_atomic_writer(&args.db_path).await?);
    let source = Arc::new(BeaconUpdateSource::new(
        BeaconClient::new(args.beacon_api_url)?,
        network.clone(),
    ));
    let artifacts: Arc<dyn ArtifactStore> = match args.artifacts_dir {
        Some(dir) => Arc::new(DirectoryArtifactStore::new(dir)),
        None => store.clone(),
    };
    let publisher = Arc::new(EthPublisher::new(EthPublisherConfig {
        rpc_url: args.eth_rpc_url,
        rpc_userpwd: args.eth_rpc_userpwd,
        light_client: parse_address(&args.light_client)?,
        from: parse_address(&args.publisher)?,
        receipt_timeout: Duration::from_secs(args.receipt_timeout_secs),
        receipt_poll_interval: Duration::from_secs(args.poll_interval_secs),
    })?);

    let checkpoint_slot = args.checkpoint_slot.unwrap_or(network.checkpoint_slot);
    let cursor = restore_cursor(store.as_ref(), source.as_ref(), checkpoint_slot).await?;

    let shutdown = Shutdown::default();
    let relay_config = RelayConfig {
        poll_interval: Duration::from_secs(args.poll_interval_secs),
        max_poll_interval: Duration::from_secs(args.max_poll_interval_secs),
        call_timeout: Duration::from_secs(args.call_timeout_secs),
        stall_warn_slots: args.stall_warn_slots,
        network,
    };
    let mut relay = Relay::new(
        relay_config,
        source,
        artifacts,
        publisher,
        store,
        ProofVerifier::new(verification_key),
        cursor,
        shutdown.subscribe(),
    );

    // Launching threads for each component
    let relay_handle = tokio::spawn(async move { relay.run().await });
    let shutdown_handle = tokio::spawn(async move { shutdown.run().await });

    // If at least one component exits with an error, the node will exit with an error
    tokio::try_join!(flatten(relay_handle), flatten(shutdown_handle))
        .map(|_| ())
        .map_err(|_| anyhow!("a component has exited with error"))
}

async fn flatten<T>(handle: JoinHandle<Result<T, ()>>) -> Result<T, ()> {
    match handle.await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(()),
    }
}
