use clap::{Args, Subcommand};

use ecocatalyst_core::models::{
    Achievement, AchievementCategory, LeaderboardEntry, RequirementType, UserAchievement,
    UserStats,
};
use ecocatalyst_core::Domain;

use super::{domain_failure, CommandResult, OutputFormat};
use ecocatalyst::session::Session;

#[derive(Args)]
pub struct StatsCommand {
    #[command(subcommand)]
    pub command: StatsSubcommand,
}

#[derive(Subcommand)]
pub enum StatsSubcommand {
    /// Show points, level and activity counters
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Record an activity and check achievements
    Activity {
        /// Activity type (scan_products, use_alternatives, reduce_carbon, consecutive_days, ...)
        kind: String,

        /// Amount to add to the matching counter
        #[arg(default_value = "1")]
        value: f64,
    },

    /// List achievements with your progress
    Achievements {
        /// Only this category (scanner, footprint, diet, community, streak)
        #[arg(long, short)]
        category: Option<String>,

        /// Only completed achievements
        #[arg(long, conflicts_with = "in_progress")]
        completed: bool,

        /// Only started but unfinished achievements
        #[arg(long)]
        in_progress: bool,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the top users by points
    Leaderboard {
        #[arg(long, short, default_value = "10")]
        limit: usize,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl StatsCommand {
    pub async fn run(&self, session: &Session) -> CommandResult {
        let gamification = session.engine().gamification();
        session.settle(gamification.stats_cache()).await;

        match &self.command {
            StatsSubcommand::Show { format } => {
                let stats = gamification
                    .user_stats()
                    .ok_or_else(|| domain_failure(session, "No stats available yet"))?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&stats)?);
                    }
                    OutputFormat::Text => print_stats(&stats),
                }
                Ok(())
            }
            StatsSubcommand::Activity { kind, value } => {
                let kind: RequirementType = kind.parse()?;
                session.settle(gamification.achievements_cache()).await;
                session.settle(gamification.user_achievements_cache()).await;

                let before: Vec<String> = gamification
                    .completed_achievements()
                    .into_iter()
                    .map(|(achievement, _)| achievement.id)
                    .collect();

                let cache = gamification.stats_cache();
                let seen = cache.snapshot_count();
                if !gamification.record_activity(kind, *value).await {
                    return Err(domain_failure(session, "Failed to record activity"));
                }
                session.confirm(cache, seen).await;

                println!("Recorded {} {}", value, kind);
                for (achievement, _) in gamification.completed_achievements() {
                    if !before.contains(&achievement.id) {
                        println!("Achievement unlocked: {}", achievement);
                    }
                }
                Ok(())
            }
            StatsSubcommand::Achievements {
                category,
                completed,
                in_progress,
                format,
            } => {
                session.settle(gamification.achievements_cache()).await;
                session.settle(gamification.user_achievements_cache()).await;

                let mut rows: Vec<(Achievement, Option<UserAchievement>)> = if *completed {
                    with_progress(gamification.completed_achievements())
                } else if *in_progress {
                    with_progress(gamification.in_progress_achievements())
                } else {
                    let progress = gamification.user_achievements();
                    gamification
                        .achievements()
                        .iter()
                        .map(|achievement| {
                            let mine = progress
                                .iter()
                                .find(|p| p.achievement_id == achievement.id)
                                .cloned();
                            (achievement.clone(), mine)
                        })
                        .collect()
                };
                if let Some(category) = category {
                    let category: AchievementCategory = category.parse()?;
                    rows.retain(|(achievement, _)| achievement.category == category);
                }

                match format {
                    OutputFormat::Json => {
                        let json: Vec<_> = rows
                            .iter()
                            .map(|(achievement, progress)| {
                                serde_json::json!({
                                    "achievement": achievement,
                                    "progress": progress,
                                })
                            })
                            .collect();
                        println!("{}", serde_json::to_string_pretty(&json)?);
                    }
                    OutputFormat::Text => print_achievements(&rows),
                }
                Ok(())
            }
            StatsSubcommand::Leaderboard { limit, format } => {
                let entries = gamification.leaderboard(*limit).await;
                if let Some(message) = gamification.error() {
                    return Err(message.into());
                }
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&entries)?);
                    }
                    OutputFormat::Text => print_leaderboard(&entries),
                }
                Ok(())
            }
        }
    }
}

fn with_progress(
    rows: Vec<(Achievement, UserAchievement)>,
) -> Vec<(Achievement, Option<UserAchievement>)> {
    rows.into_iter()
        .map(|(achievement, progress)| (achievement, Some(progress)))
        .collect()
}

fn print_stats(stats: &UserStats) {
    if let Some(name) = &stats.display_name {
        println!("{}", name);
    }
    println!("Level {} ({} points)", stats.level, stats.total_points);
    println!();
    println!("Products scanned:      {:>8.0}", stats.products_scanned);
    println!("Eco alternatives used: {:>8.0}", stats.eco_alternatives_used);
    println!("Carbon saved (kg):     {:>8.2}", stats.carbon_saved);
    println!("Day streak:            {:>8}", stats.consecutive_days);
}

fn print_achievements(rows: &[(Achievement, Option<UserAchievement>)]) {
    if rows.is_empty() {
        println!("No achievements found.");
        return;
    }
    for (achievement, progress) in rows {
        let percent = progress.as_ref().map(|p| p.progress).unwrap_or(0);
        let marker = if percent >= 100 { "x" } else { " " };
        println!("[{}] {} {:>3}%", marker, achievement, percent);
        if !achievement.description.is_empty() {
            println!("      {}", achievement.description);
        }
    }
}

fn print_leaderboard(entries: &[LeaderboardEntry]) {
    if entries.is_empty() {
        println!("Leaderboard is empty.");
        return;
    }
    println!("{:>4}  {:<24} {:>8} {:>6}", "#", "NAME", "POINTS", "LEVEL");
    println!("{}", "-".repeat(46));
    for (rank, entry) in entries.iter().enumerate() {
        println!(
            "{:>4}  {:<24} {:>8} {:>6}",
            rank + 1,
            entry.display_name,
            entry.total_points,
            entry.level
        );
    }
}
