//! Orderline CLI - Database migrations and test data tools.
//!
//! # Usage
//!
//! ```bash
//! # Run order database migrations
//! orderline-cli migrate
//!
//! # Publish 50 random orders to the inbound topic
//! orderline-cli seed --count 50
//!
//! # Publish 10 orders with exactly 2 items each
//! orderline-cli seed --count 10 --items 2
//!
//! # Print one random order as JSON (e.g. for POST /order)
//! orderline-cli sample
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `seed` - Publish random orders to Kafka
//! - `sample` - Print a random order

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "orderline-cli")]
#[command(author, version, about = "Orderline CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Publish random orders to the inbound topic
    Seed {
        /// Number of orders to publish
        #[arg(short, long, default_value_t = 10)]
        count: usize,

        /// Items per order (random 1-3 if omitted)
        #[arg(short, long)]
        items: Option<usize>,
    },
    /// Print one random order as JSON
    Sample {
        /// Items in the order
        #[arg(short, long, default_value_t = 2)]
        items: usize,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Seed { count, items } => {
            let summary = commands::seed::run(count, items).await?;
            if summary.failed > 0 {
                return Err(format!("{} of {count} orders failed to publish", summary.failed).into());
            }
        }
        Commands::Sample { items } => commands::sample::run(items)?,
    }
    Ok(())
}
