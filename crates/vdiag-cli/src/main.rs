//! vdiag - Command-line tool for the diagnostic command engine
//!
//! Compiles rule files, decodes captured frames offline, shows danger
//! classification, and runs commands against a vehicle transport with
//! operator confirmation.

mod commands;
mod config;
mod output;
mod prompt;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vdiag_core::{Intent, VehicleId};

use crate::config::Config;
use crate::output::{OutputContext, OutputFormat};

/// Default log filter; `RUST_LOG` overrides it
const DEFAULT_FILTER: &str = "vdiag=info,vdiag_engine=info,vdiag_store=info";

#[derive(Parser)]
#[command(name = "vdiag")]
#[command(author, version, about = "Vehicle diagnostic command engine")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "VDIAG_CONFIG")]
    config: Option<PathBuf>,

    /// Knowledge directory (overrides the config file)
    #[arg(short, long, env = "VDIAG_KNOWLEDGE_DIR")]
    knowledge_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a rule file and list its modules and commands
    Check {
        /// Rule file
        rules: PathBuf,
    },

    /// Decode captured response frames offline
    Decode {
        /// Rule file
        #[arg(long)]
        rules: PathBuf,

        /// Command identifier (MODULE.ACTION)
        command: String,

        /// Response frames as hex, one argument per frame
        #[arg(required = true)]
        frames: Vec<String>,
    },

    /// Show a command's danger tier and confirmation steps
    Classify {
        /// Rule file
        #[arg(long)]
        rules: PathBuf,

        /// Command identifier (MODULE.ACTION)
        command: String,
    },

    /// Resolve a command through the knowledge tiers
    Lookup {
        /// Vehicle as make/model/year
        #[arg(long)]
        vehicle: VehicleId,

        /// Command identifier (MODULE.ACTION)
        command: String,
    },

    /// Confirm, send and decode a command, learning it on success
    Run {
        /// Vehicle as make/model/year
        #[arg(long)]
        vehicle: VehicleId,

        /// Command identifier (MODULE.ACTION)
        command: String,

        /// Original free-text question, passed on to research
        #[arg(long)]
        query: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load()?
    };

    // Merge CLI args with config
    let merged = config.merge_with_args(cli.knowledge_dir.as_deref(), cli.output, cli.no_color);

    // Create output context
    let ctx = OutputContext::new(merged.output, merged.no_color, cli.quiet);

    // Execute command
    let succeeded = match cli.command {
        Commands::Check { rules } => commands::check(&rules, &ctx).map(|_| true)?,

        Commands::Decode {
            rules,
            command,
            frames,
        } => commands::decode(&rules, &command, &frames, &ctx).map(|_| true)?,

        Commands::Classify { rules, command } => {
            commands::classify(&rules, &command, &ctx).map(|_| true)?
        }

        Commands::Lookup { vehicle, command } => {
            commands::lookup(&merged.engine, &vehicle, &command, &ctx).await?
        }

        Commands::Run {
            vehicle,
            command,
            query,
        } => {
            let mut intent = Intent::new(vehicle, command);
            if let Some(query) = query {
                intent = intent.with_query(query);
            }
            commands::run(&merged.engine, intent, &ctx).await?
        }
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}
