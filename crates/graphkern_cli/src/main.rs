//! Graphkern CLI
//!
//! Command-line tools for exercising online index population.
//!
//! # Commands
//!
//! - `populate` - Populate indexes over a generated graph while writers run
//! - `contention` - Measure lock waits under contention
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Graphkern index population tools.
#[derive(Parser)]
#[command(name = "graphkern")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Populate indexes over a generated graph while writers modify it
    Populate {
        /// Number of nodes in the generated graph
        #[arg(short, long, default_value = "10000")]
        entities: u64,

        /// Number of concurrent writer threads
        #[arg(short, long, default_value = "2")]
        writers: usize,

        /// Writes per writer thread
        #[arg(long, default_value = "1000")]
        writes: usize,

        /// Entities per scan batch
        #[arg(short, long, default_value = "100")]
        batch_size: usize,

        /// Queue length that triggers an opportunistic drain
        #[arg(short, long, default_value = "1000")]
        queue_threshold: usize,

        /// Seed for the generated graph and writes
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Measure lock waits under contention
    Contention {
        /// Number of competing threads
        #[arg(short, long, default_value = "8")]
        threads: usize,

        /// Lock acquisitions per thread
        #[arg(short, long, default_value = "200")]
        iterations: usize,

        /// Number of distinct resources
        #[arg(short, long, default_value = "4")]
        resources: u64,

        /// How long each lock is held, in microseconds
        #[arg(long, default_value = "100")]
        hold_micros: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Populate {
            entities,
            writers,
            writes,
            batch_size,
            queue_threshold,
            seed,
            format,
        } => {
            let options = commands::populate::PopulateOptions {
                entities,
                writers,
                writes,
                batch_size,
                queue_threshold,
                seed,
            };
            commands::populate::run(&options, &format)?;
        }
        Commands::Contention {
            threads,
            iterations,
            resources,
            hold_micros,
            format,
        } => {
            if resources == 0 {
                return Err("at least one resource is required".into());
            }
            commands::contention::run(threads, iterations, resources, hold_micros, &format)?;
        }
        Commands::Version => {
            println!("Graphkern CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Graphkern Core v{}", graphkern_core::VERSION);
        }
    }

    Ok(())
}
