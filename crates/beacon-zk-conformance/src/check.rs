//! CLI wrapper for the conformance suite

use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use beacon_zk_conformance::{
    builtin_by_module, load_module_vectors, run_suite, CircuitChecker, CircuitModule, CommandChecker,
    ConformanceError, ModuleVectors, NativeChecker,
};
use beacon_zk_verify::VerificationKey;

/// CLI arguments for the `check` subcommand
#[derive(Clone, Debug, Args)]
pub struct CheckArgs {
    /// Vector directory; the built-in vectors are used when omitted
    #[arg(long)]
    vectors: Option<PathBuf>,
    /// External circuit tester, e.g. `snarkit2 check {module} --backend native -f`
    #[arg(long)]
    checker_cmd: Option<String>,
    /// Timeout of a single external check
    #[arg(long, default_value = "300")]
    timeout_secs: u64,
    /// Only check these modules
    #[arg(long = "module", value_parser = parse_module)]
    modules: Vec<CircuitModule>,
    /// Verification key to promote when every module passes
    #[arg(long)]
    verification_key: Option<PathBuf>,
}

fn parse_module(s: &str) -> Result<CircuitModule, String> {
    s.parse().map_err(|err: ConformanceError| err.to_string())
}

fn collect_vectors(args: &CheckArgs, modules: &[CircuitModule]) -> ModuleVectors {
    match &args.vectors {
        Some(dir) => modules
            .iter()
            .map(|module| (*module, load_module_vectors(dir, *module)))
            .collect(),
        None => builtin_by_module(modules),
    }
}

/// Run the `check` subcommand: fails unless every selected module passes
pub async fn run(args: CheckArgs) -> Result<(), anyhow::Error> {
    // Load the key up front so a bad path fails before the suite runs
    let key = args
        .verification_key
        .as_ref()
        .map(VerificationKey::load)
        .transpose()?;

    let modules = if args.modules.is_empty() {
        CircuitModule::ALL.to_vec()
    } else {
        args.modules.clone()
    };
    let vectors = collect_vectors(&args, &modules);

    let checker: Arc<dyn CircuitChecker> = match &args.checker_cmd {
        Some(template) => Arc::new(CommandChecker::new(
            template.clone(),
            Duration::from_secs(args.timeout_secs),
        )),
        None => Arc::new(NativeChecker),
    };

    let report = run_suite(checker, vectors).await;
    for module in &report.modules {
        match &module.detail {
            None => println!("{} is okay", module.module),
            Some(detail) => println!("{} failed: {}", module.module, detail),
        }
    }

    if !report.all_passed() {
        anyhow::bail!(
            "{} of {} modules failed",
            report.failed().count(),
            report.modules.len()
        );
    }

    if let Some(key) = key {
        info!("Verification key {} passed conformance", key.id());
        println!("{}", key.id());
    }
    Ok(())
}
