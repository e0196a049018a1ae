use clap::{Args, Subcommand};

use super::OutputFormat;
use ecocatalyst::config::Config;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => print_config(config),
                }
                Ok(())
            }
        }
    }
}

fn print_config(config: &Config) {
    println!("Configuration");
    println!("=============\n");

    match &config.config_file {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!(
            "Config file: {} (not found)",
            Config::default_config_path().display()
        ),
    }
    println!();

    println!("database_path: {}", config.database_path.value.display());
    println!("  source: {}", config.database_path.source);
    println!();

    println!("local_store: {}", config.local_store.value);
    println!("  source: {}", config.local_store.source);
    println!();

    println!(
        "server_url: {}",
        config.server_url.value.as_deref().unwrap_or("(local only)")
    );
    println!("  source: {}", config.server_url.source);
    println!();

    println!(
        "user_id: {}",
        config.user_id.value.as_deref().unwrap_or("(anonymous)")
    );
    println!("  source: {}", config.user_id.source);
    println!();

    println!("utc_offset_minutes: {}", config.utc_offset_minutes.value);
    println!("  source: {}", config.utc_offset_minutes.source);
}
