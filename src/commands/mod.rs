mod config_cmd;
mod diet;
mod footprint;
mod products;
mod stats;

use chrono::NaiveDate;
use clap::ValueEnum;

use ecocatalyst::session::Session;

pub use config_cmd::ConfigCommand;
pub use diet::DietCommand;
pub use footprint::FootprintCommand;
pub use products::ProductsCommand;
pub use stats::StatsCommand;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

type CommandResult = Result<(), Box<dyn std::error::Error>>;

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("Invalid date format '{}'. Use YYYY-MM-DD.", value))
}

/// Today in the session's calendar.
fn today(session: &Session) -> NaiveDate {
    let ctx = session.engine().context();
    ctx.calendar.day_of(ctx.now())
}

/// Turns a failed domain operation into a command error carrying the
/// domain's message.
fn domain_failure(session: &Session, fallback: &str) -> Box<dyn std::error::Error> {
    match session.errors().into_iter().next() {
        Some((_, message)) => message.into(),
        None => fallback.into(),
    }
}

fn split_list(values: &Option<String>) -> Vec<String> {
    values
        .as_deref()
        .map(|s| {
            s.split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
