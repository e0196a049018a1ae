use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::cache::{Entity, Patch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FootprintCategory {
    Transportation,
    Food,
    Housing,
    Products,
    Services,
    Other,
}

impl FootprintCategory {
    pub const ALL: [FootprintCategory; 6] = [
        FootprintCategory::Transportation,
        FootprintCategory::Food,
        FootprintCategory::Housing,
        FootprintCategory::Products,
        FootprintCategory::Services,
        FootprintCategory::Other,
    ];
}

impl fmt::Display for FootprintCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FootprintCategory::Transportation => write!(f, "transportation"),
            FootprintCategory::Food => write!(f, "food"),
            FootprintCategory::Housing => write!(f, "housing"),
            FootprintCategory::Products => write!(f, "products"),
            FootprintCategory::Services => write!(f, "services"),
            FootprintCategory::Other => write!(f, "other"),
        }
    }
}

impl FromStr for FootprintCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "transportation" => Ok(FootprintCategory::Transportation),
            "food" => Ok(FootprintCategory::Food),
            "housing" => Ok(FootprintCategory::Housing),
            "products" => Ok(FootprintCategory::Products),
            "services" => Ok(FootprintCategory::Services),
            "other" => Ok(FootprintCategory::Other),
            _ => Err(format!(
                "Invalid category '{}'. Valid options: transportation, food, housing, products, services, other",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FootprintEntry {
    pub id: String,
    pub user_id: String,
    pub date: NaiveDate,
    pub timestamp: i64,
    pub category: FootprintCategory,
    pub activity_type: String,
    /// kg CO2e
    pub carbon_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl fmt::Display for FootprintEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {:.2} kg",
            self.date, self.category, self.activity_type, self.carbon_amount
        )
    }
}

impl Entity for FootprintEntry {
    const KIND: &'static str = "Footprint entry";
    type Patch = FootprintPatch;

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

/// Caller input for a new entry. The owner, timestamp and id are stamped by
/// the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFootprintEntry {
    pub date: NaiveDate,
    pub category: FootprintCategory,
    pub activity_type: String,
    pub carbon_amount: f64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<Location>,
}

impl NewFootprintEntry {
    pub fn new(
        date: NaiveDate,
        category: FootprintCategory,
        activity_type: impl Into<String>,
        carbon_amount: f64,
    ) -> Self {
        Self {
            date,
            category,
            activity_type: activity_type.into(),
            carbon_amount,
            description: None,
            location: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn into_entry(self, user_id: String, timestamp: i64) -> FootprintEntry {
        FootprintEntry {
            id: String::new(),
            user_id,
            date: self.date,
            timestamp,
            category: self.category,
            activity_type: self.activity_type,
            carbon_amount: self.carbon_amount,
            description: self.description,
            location: self.location,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FootprintPatch {
    pub date: Option<NaiveDate>,
    pub category: Option<FootprintCategory>,
    pub activity_type: Option<String>,
    pub carbon_amount: Option<f64>,
    pub description: Option<String>,
    pub location: Option<Location>,
}

impl Patch<FootprintEntry> for FootprintPatch {
    fn apply_to(self, entry: &mut FootprintEntry, now: i64) {
        if let Some(date) = self.date {
            entry.date = date;
        }
        if let Some(category) = self.category {
            entry.category = category;
        }
        if let Some(activity_type) = self.activity_type {
            entry.activity_type = activity_type;
        }
        if let Some(carbon_amount) = self.carbon_amount {
            entry.carbon_amount = carbon_amount;
        }
        if self.description.is_some() {
            entry.description = self.description;
        }
        if self.location.is_some() {
            entry.location = self.location;
        }
        entry.timestamp = now;
    }
}

/// Carbon totals derived from the full entry collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FootprintSummary {
    pub daily: f64,
    pub weekly: f64,
    pub monthly: f64,
    pub yearly: f64,
    pub by_category: BTreeMap<FootprintCategory, f64>,
    pub total_saved: f64,
    pub average_per_day: f64,
}

impl Default for FootprintSummary {
    fn default() -> Self {
        Self {
            daily: 0.0,
            weekly: 0.0,
            monthly: 0.0,
            yearly: 0.0,
            by_category: FootprintCategory::ALL.iter().map(|c| (*c, 0.0)).collect(),
            total_saved: 0.0,
            average_per_day: 0.0,
        }
    }
}

impl FootprintSummary {
    pub fn category(&self, category: FootprintCategory) -> f64 {
        self.by_category.get(&category).copied().unwrap_or(0.0)
    }
}
