use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::cache::{Entity, Frozen, Patch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DietType {
    Balanced,
    Vegetarian,
    Vegan,
    Keto,
    Paleo,
    Mediterranean,
    Custom,
}

impl fmt::Display for DietType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DietType::Balanced => write!(f, "balanced"),
            DietType::Vegetarian => write!(f, "vegetarian"),
            DietType::Vegan => write!(f, "vegan"),
            DietType::Keto => write!(f, "keto"),
            DietType::Paleo => write!(f, "paleo"),
            DietType::Mediterranean => write!(f, "mediterranean"),
            DietType::Custom => write!(f, "custom"),
        }
    }
}

impl FromStr for DietType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "balanced" => Ok(DietType::Balanced),
            "vegetarian" => Ok(DietType::Vegetarian),
            "vegan" => Ok(DietType::Vegan),
            "keto" => Ok(DietType::Keto),
            "paleo" => Ok(DietType::Paleo),
            "mediterranean" => Ok(DietType::Mediterranean),
            "custom" => Ok(DietType::Custom),
            _ => Err(format!(
                "Invalid diet type '{}'. Valid options: balanced, vegetarian, vegan, keto, paleo, mediterranean, custom",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealType {
    /// Position within a day.
    pub fn rank(&self) -> u8 {
        match self {
            MealType::Breakfast => 0,
            MealType::Lunch => 1,
            MealType::Dinner => 2,
            MealType::Snack => 3,
        }
    }
}

impl fmt::Display for MealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MealType::Breakfast => write!(f, "breakfast"),
            MealType::Lunch => write!(f, "lunch"),
            MealType::Dinner => write!(f, "dinner"),
            MealType::Snack => write!(f, "snack"),
        }
    }
}

impl FromStr for MealType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "breakfast" => Ok(MealType::Breakfast),
            "lunch" => Ok(MealType::Lunch),
            "dinner" => Ok(MealType::Dinner),
            "snack" => Ok(MealType::Snack),
            _ => Err(format!(
                "Invalid meal type '{}'. Valid options: breakfast, lunch, dinner, snack",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DietPlan {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub diet_type: DietType,
    #[serde(default)]
    pub calorie_target: f64,
    #[serde(default)]
    pub protein_target: f64,
    #[serde(default)]
    pub carb_target: f64,
    #[serde(default)]
    pub fat_target: f64,
    #[serde(default)]
    pub restrictions: Vec<String>,
    #[serde(default)]
    pub preferences: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl fmt::Display for DietPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {} to {})",
            self.name, self.diet_type, self.start_date, self.end_date
        )
    }
}

impl Entity for DietPlan {
    const KIND: &'static str = "Diet plan";
    type Patch = DietPlanPatch;

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
pub struct NewDietPlan {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub diet_type: DietType,
    #[serde(default)]
    pub calorie_target: f64,
    #[serde(default)]
    pub protein_target: f64,
    #[serde(default)]
    pub carb_target: f64,
    #[serde(default)]
    pub fat_target: f64,
    #[serde(default)]
    pub restrictions: Vec<String>,
    #[serde(default)]
    pub preferences: Vec<String>,
}

impl NewDietPlan {
    pub fn new(
        name: impl Into<String>,
        diet_type: DietType,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            start_date,
            end_date,
            diet_type,
            calorie_target: 0.0,
            protein_target: 0.0,
            carb_target: 0.0,
            fat_target: 0.0,
            restrictions: Vec::new(),
            preferences: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_targets(mut self, calories: f64, protein: f64, carbs: f64, fat: f64) -> Self {
        self.calorie_target = calories;
        self.protein_target = protein;
        self.carb_target = carbs;
        self.fat_target = fat;
        self
    }

    pub fn with_restrictions(mut self, restrictions: Vec<String>) -> Self {
        self.restrictions = restrictions;
        self
    }

    pub fn with_preferences(mut self, preferences: Vec<String>) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn into_plan(self, user_id: String, now: i64) -> DietPlan {
        DietPlan {
            id: String::new(),
            user_id,
            name: self.name,
            description: self.description,
            start_date: self.start_date,
            end_date: self.end_date,
            diet_type: self.diet_type,
            calorie_target: self.calorie_target,
            protein_target: self.protein_target,
            carb_target: self.carb_target,
            fat_target: self.fat_target,
            restrictions: self.restrictions,
            preferences: self.preferences,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DietPlanPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub diet_type: Option<DietType>,
    pub calorie_target: Option<f64>,
    pub protein_target: Option<f64>,
    pub carb_target: Option<f64>,
    pub fat_target: Option<f64>,
    pub restrictions: Option<Vec<String>>,
    pub preferences: Option<Vec<String>>,
}

impl Patch<DietPlan> for DietPlanPatch {
    fn apply_to(self, plan: &mut DietPlan, now: i64) {
        if let Some(name) = self.name {
            plan.name = name;
        }
        if self.description.is_some() {
            plan.description = self.description;
        }
        if let Some(start_date) = self.start_date {
            plan.start_date = start_date;
        }
        if let Some(end_date) = self.end_date {
            plan.end_date = end_date;
        }
        if let Some(diet_type) = self.diet_type {
            plan.diet_type = diet_type;
        }
        if let Some(v) = self.calorie_target {
            plan.calorie_target = v;
        }
        if let Some(v) = self.protein_target {
            plan.protein_target = v;
        }
        if let Some(v) = self.carb_target {
            plan.carb_target = v;
        }
        if let Some(v) = self.fat_target {
            plan.fat_target = v;
        }
        if let Some(restrictions) = self.restrictions {
            plan.restrictions = restrictions;
        }
        if let Some(preferences) = self.preferences {
            plan.preferences = preferences;
        }
        plan.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodItem {
    pub id: String,
    pub name: String,
    pub serving_size: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    /// 0-100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sustainability_score: Option<f64>,
    /// kg CO2e
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbon_footprint: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealEntry {
    pub id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diet_plan_id: Option<String>,
    pub date: NaiveDate,
    pub meal_type: MealType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub foods: Vec<FoodItem>,
    #[serde(default)]
    pub total_calories: f64,
    #[serde(default)]
    pub total_protein: f64,
    #[serde(default)]
    pub total_carbs: f64,
    #[serde(default)]
    pub total_fat: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl fmt::Display for MealEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {} ({:.0} kcal)",
            self.date, self.meal_type, self.name, self.total_calories
        )
    }
}

impl Entity for MealEntry {
    const KIND: &'static str = "Meal entry";
    type Patch = MealEntryPatch;

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
pub struct NewMealEntry {
    #[serde(default)]
    pub diet_plan_id: Option<String>,
    pub date: NaiveDate,
    pub meal_type: MealType,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub foods: Vec<FoodItem>,
    #[serde(default)]
    pub total_calories: f64,
    #[serde(default)]
    pub total_protein: f64,
    #[serde(default)]
    pub total_carbs: f64,
    #[serde(default)]
    pub total_fat: f64,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl NewMealEntry {
    pub fn new(date: NaiveDate, meal_type: MealType, name: impl Into<String>) -> Self {
        Self {
            diet_plan_id: None,
            date,
            meal_type,
            name: name.into(),
            description: None,
            foods: Vec::new(),
            total_calories: 0.0,
            total_protein: 0.0,
            total_carbs: 0.0,
            total_fat: 0.0,
            image_url: None,
        }
    }

    pub fn with_plan(mut self, diet_plan_id: impl Into<String>) -> Self {
        self.diet_plan_id = Some(diet_plan_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_totals(mut self, calories: f64, protein: f64, carbs: f64, fat: f64) -> Self {
        self.total_calories = calories;
        self.total_protein = protein;
        self.total_carbs = carbs;
        self.total_fat = fat;
        self
    }

    /// Adds foods and sums their nutrition into the totals.
    pub fn with_foods(mut self, foods: Vec<FoodItem>) -> Self {
        self.total_calories = foods.iter().map(|f| f.calories).sum();
        self.total_protein = foods.iter().map(|f| f.protein).sum();
        self.total_carbs = foods.iter().map(|f| f.carbs).sum();
        self.total_fat = foods.iter().map(|f| f.fat).sum();
        self.foods = foods;
        self
    }

    pub fn into_entry(self, user_id: String, now: i64) -> MealEntry {
        MealEntry {
            id: String::new(),
            user_id,
            diet_plan_id: self.diet_plan_id,
            date: self.date,
            meal_type: self.meal_type,
            name: self.name,
            description: self.description,
            foods: self.foods,
            total_calories: self.total_calories,
            total_protein: self.total_protein,
            total_carbs: self.total_carbs,
            total_fat: self.total_fat,
            image_url: self.image_url,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MealEntryPatch {
    pub diet_plan_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub meal_type: Option<MealType>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub foods: Option<Vec<FoodItem>>,
    pub total_calories: Option<f64>,
    pub total_protein: Option<f64>,
    pub total_carbs: Option<f64>,
    pub total_fat: Option<f64>,
    pub image_url: Option<String>,
}

impl Patch<MealEntry> for MealEntryPatch {
    fn apply_to(self, meal: &mut MealEntry, now: i64) {
        if self.diet_plan_id.is_some() {
            meal.diet_plan_id = self.diet_plan_id;
        }
        if let Some(date) = self.date {
            meal.date = date;
        }
        if let Some(meal_type) = self.meal_type {
            meal.meal_type = meal_type;
        }
        if let Some(name) = self.name {
            meal.name = name;
        }
        if self.description.is_some() {
            meal.description = self.description;
        }
        if let Some(foods) = self.foods {
            meal.foods = foods;
        }
        if let Some(v) = self.total_calories {
            meal.total_calories = v;
        }
        if let Some(v) = self.total_protein {
            meal.total_protein = v;
        }
        if let Some(v) = self.total_carbs {
            meal.total_carbs = v;
        }
        if let Some(v) = self.total_fat {
            meal.total_fat = v;
        }
        if self.image_url.is_some() {
            meal.image_url = self.image_url;
        }
        meal.updated_at = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::User => write!(f, "user"),
            Sender::Ai => write!(f, "ai"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelatedKind {
    Meal,
    Plan,
    Food,
}

impl FromStr for RelatedKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "meal" => Ok(RelatedKind::Meal),
            "plan" => Ok(RelatedKind::Plan),
            "food" => Ok(RelatedKind::Food),
            _ => Err(format!(
                "Invalid related type '{}'. Valid options: meal, plan, food",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedTo {
    #[serde(rename = "type")]
    pub kind: RelatedKind,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub sender: Sender,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_to: Option<RelatedTo>,
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.sender, self.content)
    }
}

impl Entity for ChatMessage {
    const KIND: &'static str = "Chat message";
    type Patch = Frozen;

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
