use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{ConfigCommand, DietCommand, FootprintCommand, ProductsCommand, StatsCommand};
use ecocatalyst::config::Config;
use ecocatalyst::session::Session;

#[derive(Parser)]
#[command(name = "ecocatalyst")]
#[command(version)]
#[command(about = "Track your carbon footprint, diet and sustainable shopping", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record and review carbon footprint entries
    Footprint(FootprintCommand),

    /// Manage diet plans, meals and the diet assistant
    Diet(DietCommand),

    /// Scan products and find alternatives
    Products(ProductsCommand),

    /// Points, achievements and the leaderboard
    Stats(StatsCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "ecocatalyst=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    let command = match cli.command {
        Some(Commands::Config(cmd)) => return cmd.run(&config),
        Some(command) => command,
        None => {
            println!("Use --help to see available commands");
            return Ok(());
        }
    };

    let session = Session::open(&config).await?;
    let result = match command {
        Commands::Footprint(cmd) => cmd.run(&session).await,
        Commands::Diet(cmd) => cmd.run(&session).await,
        Commands::Products(cmd) => cmd.run(&session).await,
        Commands::Stats(cmd) => cmd.run(&session).await,
        Commands::Config(_) => Ok(()),
    };
    session.close().await;

    result
}
