//! akh-mine CLI: parallel rule mining over a knowledge graph.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use akh_mine::config::{InputConfig, MineConfig, ReadConfig};
use akh_mine::error::LearnError;
use akh_mine::graph::{GraphIndex, ReadOptions};
use akh_mine::learn::Learner;
use akh_mine::rule::ReadFilter;
use akh_mine::rule::filter::read_rules;
use akh_mine::symbol::SymbolTable;

#[derive(Parser)]
#[command(name = "akh-mine", version, about = "Mine logical rules from a knowledge graph")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mine rules as configured, writing snapshots on schedule.
    Learn {
        /// TOML run configuration.
        #[arg(long)]
        config: PathBuf,

        /// Override `learn.workers`.
        #[arg(long)]
        workers: Option<usize>,

        /// Override `learn.seed`.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print the rules of a snapshot that pass the read filter.
    Filter {
        /// Rule snapshot file.
        #[arg(long)]
        rules: PathBuf,

        #[arg(long)]
        min_confidence: Option<f64>,

        #[arg(long)]
        min_correct: Option<usize>,
    },

    /// Load a triple file and print its index counts.
    Stats {
        /// Triple file.
        #[arg(long)]
        training: PathBuf,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Learn {
            config,
            workers,
            seed,
        } => {
            let mut config = MineConfig::load(&config)?;
            if let Some(n) = workers {
                config.learn.workers = n;
            }
            if seed.is_some() {
                config.learn.seed = seed;
            }
            config.validate()?;

            let stop = Arc::new(AtomicBool::new(false));
            signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&stop)).map_err(
                |e| LearnError::Signal {
                    message: e.to_string(),
                },
            )?;

            let learner = Learner::from_config(config)?;
            let summary = learner.run_until(&stop)?;
            println!("{}", serde_json::to_string_pretty(&summary).into_diagnostic()?);
        }

        Commands::Filter {
            rules,
            min_confidence,
            min_correct,
        } => {
            let mut filter = ReadFilter::from(&ReadConfig::default());
            if let Some(c) = min_confidence {
                filter.min_confidence = c;
            }
            if let Some(n) = min_correct {
                filter.min_correct = n;
            }
            let symbols = SymbolTable::new();
            for rule in read_rules(&rules, &symbols, &filter)? {
                println!("{}", rule.to_line(&symbols));
            }
        }

        Commands::Stats { training } => {
            let opts = ReadOptions::from(&InputConfig::default());
            let graph = GraphIndex::load(&training, &opts)?;
            println!("{}", serde_json::to_string_pretty(&graph.stats()).into_diagnostic()?);
        }
    }

    Ok(())
}
