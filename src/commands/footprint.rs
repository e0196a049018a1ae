use clap::{Args, Subcommand};

use ecocatalyst_core::models::{
    FootprintCategory, FootprintEntry, FootprintPatch, FootprintSummary, Location,
    NewFootprintEntry,
};

use super::{domain_failure, parse_date, today, CommandResult, OutputFormat};
use ecocatalyst::session::Session;

#[derive(Args)]
pub struct FootprintCommand {
    #[command(subcommand)]
    pub command: FootprintSubcommand,
}

#[derive(Subcommand)]
pub enum FootprintSubcommand {
    /// Record a carbon footprint entry
    Add {
        /// Category (transportation, food, housing, products, services, other)
        category: String,

        /// Activity, e.g. "bus" or "beef burger"
        activity: String,

        /// Carbon amount in kg CO2e
        amount: f64,

        /// Date (YYYY-MM-DD), defaults to today
        #[arg(long, short)]
        date: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Latitude of the activity
        #[arg(long, requires = "longitude", allow_negative_numbers = true)]
        latitude: Option<f64>,

        /// Longitude of the activity
        #[arg(long, requires = "latitude", allow_negative_numbers = true)]
        longitude: Option<f64>,
    },

    /// List entries, newest first
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Only this category
        #[arg(long, short)]
        category: Option<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(long, requires = "to")]
        from: Option<String>,

        /// End date (YYYY-MM-DD), inclusive
        #[arg(long, requires = "from")]
        to: Option<String>,
    },

    /// Update fields of an entry
    Update {
        id: String,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        activity: Option<String>,

        #[arg(long)]
        amount: Option<f64>,

        #[arg(long, short)]
        date: Option<String>,

        #[arg(long)]
        description: Option<String>,
    },

    /// Delete an entry
    Delete { id: String },

    /// Show daily, weekly, monthly and yearly totals
    Summary {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl FootprintCommand {
    pub async fn run(&self, session: &Session) -> CommandResult {
        let footprint = session.engine().footprint();
        let cache = footprint.cache();
        session.settle(cache).await;

        match &self.command {
            FootprintSubcommand::Add {
                category,
                activity,
                amount,
                date,
                description,
                latitude,
                longitude,
            } => {
                let category: FootprintCategory = category.parse()?;
                let date = match date {
                    Some(d) => parse_date(d)?,
                    None => today(session),
                };

                let mut entry = NewFootprintEntry::new(date, category, activity, *amount);
                if let Some(d) = description {
                    entry = entry.with_description(d);
                }
                if let (Some(latitude), Some(longitude)) = (latitude, longitude) {
                    entry = entry.with_location(Location {
                        latitude: *latitude,
                        longitude: *longitude,
                    });
                }

                let seen = cache.snapshot_count();
                let id = footprint
                    .add_entry(entry)
                    .await
                    .ok_or_else(|| domain_failure(session, "Failed to add footprint entry"))?;
                session.confirm(cache, seen).await;

                println!("Recorded {} kg CO2e ({}, {})", amount, category, activity);
                println!("ID: {}", id);
                Ok(())
            }
            FootprintSubcommand::List {
                format,
                category,
                from,
                to,
            } => {
                let mut entries: Vec<FootprintEntry> = match (from, to) {
                    (Some(from), Some(to)) => {
                        footprint.entries_in_range(parse_date(from)?, parse_date(to)?)
                    }
                    _ => footprint.entries().to_vec(),
                };
                if let Some(category) = category {
                    let category: FootprintCategory = category.parse()?;
                    entries.retain(|e| e.category == category);
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&entries)?);
                    }
                    OutputFormat::Text => print_entries(&entries),
                }
                Ok(())
            }
            FootprintSubcommand::Update {
                id,
                category,
                activity,
                amount,
                date,
                description,
            } => {
                let patch = FootprintPatch {
                    date: date.as_deref().map(parse_date).transpose()?,
                    category: category
                        .as_deref()
                        .map(str::parse::<FootprintCategory>)
                        .transpose()?,
                    activity_type: activity.clone(),
                    carbon_amount: *amount,
                    description: description.clone(),
                    location: None,
                };

                let seen = cache.snapshot_count();
                if !footprint.update_entry(id, patch).await {
                    return Err(domain_failure(session, "Failed to update footprint entry"));
                }
                session.confirm(cache, seen).await;

                println!("Updated entry {}", id);
                Ok(())
            }
            FootprintSubcommand::Delete { id } => {
                let seen = cache.snapshot_count();
                if !footprint.delete_entry(id).await {
                    return Err(domain_failure(session, "Failed to delete footprint entry"));
                }
                session.confirm(cache, seen).await;

                println!("Deleted entry {}", id);
                Ok(())
            }
            FootprintSubcommand::Summary { format } => {
                let summary = footprint.summary();
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&summary)?);
                    }
                    OutputFormat::Text => print_summary(&summary),
                }
                Ok(())
            }
        }
    }
}

fn print_entries(entries: &[FootprintEntry]) {
    if entries.is_empty() {
        println!("No footprint entries found.");
        return;
    }

    println!(
        "{:<24} {:<12} {:<16} {:<24} {:>10}",
        "ID", "DATE", "CATEGORY", "ACTIVITY", "KG CO2E"
    );
    println!("{}", "-".repeat(90));
    for entry in entries {
        println!(
            "{:<24} {:<12} {:<16} {:<24} {:>10.2}",
            entry.id,
            entry.date.to_string(),
            entry.category.to_string(),
            truncate(&entry.activity_type, 24),
            entry.carbon_amount
        );
    }
}

fn print_summary(summary: &FootprintSummary) {
    println!("Carbon footprint (kg CO2e)");
    println!("==========================\n");
    println!("Today:      {:>10.2}", summary.daily);
    println!("This week:  {:>10.2}", summary.weekly);
    println!("This month: {:>10.2}", summary.monthly);
    println!("This year:  {:>10.2}", summary.yearly);
    println!("Per day:    {:>10.2}", summary.average_per_day);
    println!();
    println!("By category:");
    for category in FootprintCategory::ALL {
        println!(
            "  {:<16} {:>10.2}",
            category.to_string(),
            summary.category(category)
        );
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("bus", 24), "bus");
        assert_eq!(truncate("a very long activity name", 10), "a very ...");
    }
}
