//! Folio CLI - chat with a local model about a portfolio owner.

use clap::{Parser, Subcommand};
use folio_chat::eval::{EvalSuite, DEFAULT_SEED};
use folio_chat::ModelTier;
use std::path::PathBuf;

mod commands;

/// Folio - a local, private portfolio assistant
#[derive(Parser)]
#[command(name = "folio")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat
    Chat {
        /// Model tier to load (small, medium, large)
        #[arg(short, long)]
        tier: Option<ModelTier>,
        /// Print worker events as JSON lines
        #[arg(long)]
        json: bool,
        /// Add this GitHub user's bio to the prompt context
        #[arg(long)]
        github: Option<String>,
    },

    /// List model tiers and the models behind them
    Tiers,

    /// Show the detected device profile and the tier it suggests
    Device,

    /// Forget the stored tier preference
    Reset,

    /// Show information about the Folio installation
    Info,

    /// Score model tiers against the curated evaluation sets
    Eval {
        /// Tiers to evaluate (default: all)
        #[arg(short, long, value_delimiter = ',')]
        tier: Vec<ModelTier>,
        /// smoke samples each set, full runs every case
        #[arg(long, default_value = "smoke")]
        suite: EvalSuite,
        /// Cases per set, overriding the suite
        #[arg(long)]
        limit: Option<usize>,
        /// Sampling seed
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
        /// Directory with golden.jsonl, adversarial.jsonl and ood.jsonl
        #[arg(long)]
        eval_dir: Option<PathBuf>,
        /// Where report directories are created
        #[arg(long)]
        report_dir: Option<PathBuf>,
        /// JSON file overriding the default thresholds
        #[arg(long)]
        thresholds: Option<PathBuf>,
        /// Earlier report directory to compare against
        #[arg(long)]
        compare_to: Option<PathBuf>,
        /// Exit with an error when any threshold fails
        #[arg(long)]
        fail_on_threshold: bool,
    },
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose { "debug" } else { "warn" };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    match cli.command {
        Commands::Chat { tier, json, github } => tokio::runtime::Runtime::new()
            .map_err(|e| miette::miette!("Failed to start async runtime: {}", e))?
            .block_on(commands::chat::run(tier, json, github.as_deref())),
        Commands::Tiers => commands::tiers::run(),
        Commands::Device => commands::device::run(),
        Commands::Reset => commands::prefs::reset(),
        Commands::Info => commands::info::run(),
        Commands::Eval {
            tier,
            suite,
            limit,
            seed,
            eval_dir,
            report_dir,
            thresholds,
            compare_to,
            fail_on_threshold,
        } => tokio::runtime::Runtime::new()
            .map_err(|e| miette::miette!("Failed to start async runtime: {}", e))?
            .block_on(commands::eval::run(commands::eval::EvalOptions {
                tiers: tier,
                suite,
                limit,
                seed,
                eval_dir,
                report_dir,
                thresholds,
                compare_to,
                fail_on_threshold,
            })),
    }
}
