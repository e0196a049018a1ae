use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::{Entity, Frozen, Patch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AchievementCategory {
    Scanner,
    Footprint,
    Diet,
    Community,
    Streak,
}

impl fmt::Display for AchievementCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AchievementCategory::Scanner => write!(f, "scanner"),
            AchievementCategory::Footprint => write!(f, "footprint"),
            AchievementCategory::Diet => write!(f, "diet"),
            AchievementCategory::Community => write!(f, "community"),
            AchievementCategory::Streak => write!(f, "streak"),
        }
    }
}

impl FromStr for AchievementCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scanner" => Ok(AchievementCategory::Scanner),
            "footprint" => Ok(AchievementCategory::Footprint),
            "diet" => Ok(AchievementCategory::Diet),
            "community" => Ok(AchievementCategory::Community),
            "streak" => Ok(AchievementCategory::Streak),
            _ => Err(format!(
                "Invalid achievement category '{}'. Valid options: scanner, footprint, diet, community, streak",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementType {
    ScanProducts,
    UseAlternatives,
    ReduceCarbon,
    CompleteDietDays,
    ConsecutiveDays,
    ShareResults,
}

impl fmt::Display for RequirementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequirementType::ScanProducts => write!(f, "scan_products"),
            RequirementType::UseAlternatives => write!(f, "use_alternatives"),
            RequirementType::ReduceCarbon => write!(f, "reduce_carbon"),
            RequirementType::CompleteDietDays => write!(f, "complete_diet_days"),
            RequirementType::ConsecutiveDays => write!(f, "consecutive_days"),
            RequirementType::ShareResults => write!(f, "share_results"),
        }
    }
}

impl FromStr for RequirementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "scan_products" => Ok(RequirementType::ScanProducts),
            "use_alternatives" => Ok(RequirementType::UseAlternatives),
            "reduce_carbon" => Ok(RequirementType::ReduceCarbon),
            "complete_diet_days" => Ok(RequirementType::CompleteDietDays),
            "consecutive_days" => Ok(RequirementType::ConsecutiveDays),
            "share_results" => Ok(RequirementType::ShareResults),
            _ => Err(format!(
                "Invalid activity type '{}'. Valid options: scan_products, use_alternatives, reduce_carbon, complete_diet_days, consecutive_days, share_results",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementRequirement {
    #[serde(rename = "type")]
    pub kind: RequirementType,
    pub target: f64,
    #[serde(default)]
    pub description: String,
}

impl AchievementRequirement {
    pub fn new(kind: RequirementType, target: f64) -> Self {
        Self {
            kind,
            target,
            description: String::new(),
        }
    }
}

/// Achievement definition, shared by every user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: AchievementCategory,
    #[serde(default)]
    pub icon: String,
    pub points: i64,
    #[serde(default)]
    pub requirements: Vec<AchievementRequirement>,
    #[serde(default)]
    pub is_secret: bool,
    #[serde(default)]
    pub created_at: i64,
}

impl fmt::Display for Achievement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} pts, {})", self.title, self.points, self.category)
    }
}

impl Entity for Achievement {
    const KIND: &'static str = "Achievement";
    type Patch = Frozen;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

/// Progress of one user towards one achievement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAchievement {
    pub id: String,
    pub user_id: String,
    pub achievement_id: String,
    /// 0 until completed
    #[serde(default)]
    pub completed_at: i64,
    /// 0-100
    #[serde(default)]
    pub progress: i64,
}

impl UserAchievement {
    pub fn is_complete(&self) -> bool {
        self.progress >= 100
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UserAchievementPatch {
    pub progress: Option<i64>,
    pub completed_at: Option<i64>,
}

impl Patch<UserAchievement> for UserAchievementPatch {
    fn apply_to(self, target: &mut UserAchievement, _now: i64) {
        if let Some(progress) = self.progress {
            target.progress = progress;
        }
        if let Some(completed_at) = self.completed_at {
            target.completed_at = completed_at;
        }
    }
}

impl Entity for UserAchievement {
    const KIND: &'static str = "User achievement";
    type Patch = UserAchievementPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn owner_id(&self) -> Option<&str> {
        Some(&self.user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub total_points: i64,
    #[serde(default = "default_level")]
    pub level: i64,
    #[serde(default)]
    pub products_scanned: f64,
    #[serde(default)]
    pub eco_alternatives_used: f64,
    /// kg CO2e
    #[serde(default)]
    pub carbon_saved: f64,
    #[serde(default)]
    pub consecutive_days: i64,
    #[serde(default)]
    pub last_active: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, rename = "photoURL", skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

fn default_level() -> i64 {
    1
}

impl UserStats {
    /// Stats of a user who has not done anything yet.
    pub fn initial(user_id: impl Into<String>, now: i64) -> Self {
        let user_id = user_id.into();
        Self {
            id: user_id.clone(),
            user_id,
            total_points: 0,
            level: 1,
            products_scanned: 0.0,
            eco_alternatives_used: 0.0,
            carbon_saved: 0.0,
            consecutive_days: 0,
            last_active: now,
            updated_at: now,
            display_name: None,
            photo_url: None,
        }
    }

    /// Current value measured by a requirement type.
    pub fn counter(&self, kind: RequirementType) -> f64 {
        match kind {
            RequirementType::ScanProducts => self.products_scanned,
            RequirementType::UseAlternatives => self.eco_alternatives_used,
            RequirementType::ReduceCarbon => self.carbon_saved,
            RequirementType::ConsecutiveDays => self.consecutive_days as f64,
            RequirementType::CompleteDietDays | RequirementType::ShareResults => 0.0,
        }
    }
}

impl Entity for UserStats {
    const KIND: &'static str = "User stats";
    type Patch = UserStatsPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn owner_id(&self) -> Option<&str> {
        Some(&self.user_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UserStatsPatch {
    pub total_points: Option<i64>,
    pub level: Option<i64>,
    pub products_scanned: Option<f64>,
    pub eco_alternatives_used: Option<f64>,
    pub carbon_saved: Option<f64>,
    pub consecutive_days: Option<i64>,
    pub last_active: Option<i64>,
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}

impl Patch<UserStats> for UserStatsPatch {
    fn apply_to(self, stats: &mut UserStats, now: i64) {
        if let Some(v) = self.total_points {
            stats.total_points = v;
        }
        if let Some(v) = self.level {
            stats.level = v;
        }
        if let Some(v) = self.products_scanned {
            stats.products_scanned = v;
        }
        if let Some(v) = self.eco_alternatives_used {
            stats.eco_alternatives_used = v;
        }
        if let Some(v) = self.carbon_saved {
            stats.carbon_saved = v;
        }
        if let Some(v) = self.consecutive_days {
            stats.consecutive_days = v;
        }
        if let Some(v) = self.last_active {
            stats.last_active = v;
        }
        if self.display_name.is_some() {
            stats.display_name = self.display_name;
        }
        if self.photo_url.is_some() {
            stats.photo_url = self.photo_url;
        }
        stats.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub display_name: String,
    #[serde(default, rename = "photoURL", skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub total_points: i64,
    pub level: i64,
}
