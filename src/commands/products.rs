use clap::{Args, Subcommand};

use ecocatalyst_core::models::{Location, Product, ProductScan, RequirementType};
use ecocatalyst_core::Domain;

use super::{domain_failure, CommandResult, OutputFormat};
use ecocatalyst::session::Session;

#[derive(Args)]
pub struct ProductsCommand {
    #[command(subcommand)]
    pub command: ProductsSubcommand,
}

#[derive(Subcommand)]
pub enum ProductsSubcommand {
    /// Look a product up by barcode and record the scan
    Scan {
        barcode: String,

        #[arg(long, requires = "longitude", allow_negative_numbers = true)]
        latitude: Option<f64>,

        #[arg(long, requires = "latitude", allow_negative_numbers = true)]
        longitude: Option<f64>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show product details
    Show {
        /// Product ID
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List more sustainable alternatives for a product
    Alternatives {
        /// Product ID
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List recent scans, newest first
    Scans {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Forget every recorded scan
    ClearScans,
}

impl ProductsCommand {
    pub async fn run(&self, session: &Session) -> CommandResult {
        let products = session.engine().products();
        let scans = products.scans_cache();
        session.settle(scans).await;

        match &self.command {
            ProductsSubcommand::Scan {
                barcode,
                latitude,
                longitude,
                format,
            } => {
                let product = match products.scan_product(barcode).await {
                    Some(product) => product,
                    None => {
                        return Err(domain_failure(
                            session,
                            &format!("No product found for barcode {}", barcode),
                        ))
                    }
                };

                let location = match (latitude, longitude) {
                    (Some(latitude), Some(longitude)) => Some(Location {
                        latitude: *latitude,
                        longitude: *longitude,
                    }),
                    _ => None,
                };
                let seen = scans.snapshot_count();
                if !products.add_scan(&product.id, location).await {
                    return Err(domain_failure(session, "Failed to save scan"));
                }
                session.confirm(scans, seen).await;

                let gamification = session.engine().gamification();
                session.settle(gamification.stats_cache()).await;
                if !gamification
                    .record_activity(RequirementType::ScanProducts, 1.0)
                    .await
                {
                    tracing::warn!("Scan was saved but could not be counted");
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&product)?);
                    }
                    OutputFormat::Text => print_product(&product),
                }
                Ok(())
            }
            ProductsSubcommand::Show { id, format } => {
                let product = products
                    .product_by_id(id)
                    .await
                    .ok_or_else(|| domain_failure(session, &format!("Product not found: {}", id)))?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&product)?);
                    }
                    OutputFormat::Text => print_product(&product),
                }
                Ok(())
            }
            ProductsSubcommand::Alternatives { id, format } => {
                let alternatives = products.alternatives_for(id).await;
                if let Some(message) = products.error() {
                    return Err(message.into());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&alternatives)?);
                    }
                    OutputFormat::Text => {
                        if alternatives.is_empty() {
                            println!("No alternatives found.");
                        }
                        for alternative in &alternatives {
                            let name = products
                                .product_by_id(&alternative.alternative_product_id)
                                .await
                                .map(|p| p.to_string())
                                .unwrap_or_else(|| alternative.alternative_product_id.clone());
                            println!(
                                "{} (+{:.0}%)",
                                name, alternative.sustainability_improvement
                            );
                            if !alternative.reason.is_empty() {
                                println!("  {}", alternative.reason);
                            }
                        }
                    }
                }
                Ok(())
            }
            ProductsSubcommand::Scans { format } => {
                let recent = products.recent_scans();
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&*recent)?);
                    }
                    OutputFormat::Text => print_scans(&recent),
                }
                Ok(())
            }
            ProductsSubcommand::ClearScans => {
                if !products.clear_recent_scans().await {
                    return Err(domain_failure(session, "Failed to clear scan history"));
                }
                println!("Scan history cleared");
                Ok(())
            }
        }
    }
}

fn print_product(product: &Product) {
    println!("{}", product);
    println!("ID: {}", product.id);
    if !product.category.is_empty() {
        println!("Category: {}", product.category);
    }
    println!();
    println!("Sustainability score: {:.0}/100", product.sustainability_score);
    println!("Carbon footprint:     {:.2} kg CO2e", product.carbon_footprint);
    println!("Water usage:          {:.1} L", product.water_usage);
    println!(
        "Recyclable: {}  Biodegradable: {}",
        yes_no(product.recyclable),
        yes_no(product.biodegradable)
    );
    if !product.packaging.is_empty() {
        println!("Packaging: {}", product.packaging);
    }
    if !product.certifications.is_empty() {
        println!("Certifications: {}", product.certifications.join(", "));
    }
    if !product.ingredients.is_empty() {
        println!("Ingredients: {}", product.ingredients.join(", "));
    }
}

fn print_scans(scans: &[ProductScan]) {
    if scans.is_empty() {
        println!("No recent scans.");
        return;
    }

    println!("{:<24} {:<24} {:<20}", "ID", "PRODUCT", "SCANNED");
    println!("{}", "-".repeat(70));
    for scan in scans {
        let scanned = chrono::DateTime::from_timestamp_millis(scan.timestamp)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("{:<24} {:<24} {:<20}", scan.id, scan.product_id, scanned);
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
