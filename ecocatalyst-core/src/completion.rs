//! Text-completion collaborator.
//!
//! The diet domain asks an external service for chat replies and structured
//! meal suggestions. This module defines that seam and the deterministic
//! fallback used whenever the service cannot answer.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GenerationError;
use crate::models::{FoodItem, MealType, Sender};

/// Number of prior chat messages handed to the collaborator.
pub const CHAT_HISTORY_WINDOW: usize = 10;

/// Sustainability score given to suggested foods that carry none.
pub const DEFAULT_FOOD_SCORE: f64 = 80.0;

/// One prior chat message, as seen by the collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub content: String,
    pub sender: Sender,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedFood {
    pub name: String,
    #[serde(default = "default_serving_size")]
    pub serving_size: String,
    #[serde(default)]
    pub calories: f64,
    #[serde(default)]
    pub protein: f64,
    #[serde(default)]
    pub carbs: f64,
    #[serde(default)]
    pub fat: f64,
    #[serde(default = "default_parsed_score")]
    pub sustainability_score: f64,
}

fn default_serving_size() -> String {
    "100g".to_string()
}

fn default_parsed_score() -> f64 {
    75.0
}

/// Structured meal suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealSuggestion {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub foods: Vec<SuggestedFood>,
    #[serde(default)]
    pub total_calories: f64,
    #[serde(default)]
    pub total_protein: f64,
    #[serde(default)]
    pub total_carbs: f64,
    #[serde(default)]
    pub total_fat: f64,
}

impl MealSuggestion {
    /// Placeholder meal returned when no suggestion can be generated.
    pub fn fallback(meal_type: MealType) -> Self {
        Self {
            name: format!("Suggested {}", meal_type),
            description: "Unable to generate suggestion. Using fallback meal.".to_string(),
            foods: vec![SuggestedFood {
                name: "Placeholder Food Item".to_string(),
                serving_size: "100g".to_string(),
                calories: 200.0,
                protein: 10.0,
                carbs: 20.0,
                fat: 5.0,
                sustainability_score: DEFAULT_FOOD_SCORE,
            }],
            total_calories: 200.0,
            total_protein: 10.0,
            total_carbs: 20.0,
            total_fat: 5.0,
        }
    }

    /// Food items with freshly generated ids.
    pub fn food_items(&self) -> Vec<FoodItem> {
        self.foods
            .iter()
            .map(|food| FoodItem {
                id: food_id(),
                name: food.name.clone(),
                serving_size: food.serving_size.clone(),
                calories: food.calories,
                protein: food.protein,
                carbs: food.carbs,
                fat: food.fat,
                sustainability_score: Some(if food.sustainability_score > 0.0 {
                    food.sustainability_score
                } else {
                    DEFAULT_FOOD_SCORE
                }),
                carbon_footprint: None,
            })
            .collect()
    }
}

/// Parses a JSON answer into a suggestion, filling in missing fields.
pub fn parse_meal_suggestion(answer: &str) -> Result<MealSuggestion, GenerationError> {
    let value: Value =
        serde_json::from_str(answer.trim()).map_err(|e| GenerationError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(GenerationError::Malformed(
            "expected a JSON object".to_string(),
        ));
    }
    serde_json::from_value(value).map_err(|e| GenerationError::Malformed(e.to_string()))
}

/// `food_` followed by seven random base-36 characters.
pub fn food_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    let suffix: String = (0..7)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect();
    format!("food_{}", suffix)
}

#[async_trait]
pub trait TextCompletion: Send + Sync {
    /// Free-form reply to `prompt` given the most recent prior messages.
    async fn chat_reply(&self, prompt: &str, history: &[ChatTurn])
        -> Result<String, GenerationError>;

    async fn suggest_meal(
        &self,
        meal_type: MealType,
        preferences: &[String],
        restrictions: &[String],
    ) -> Result<MealSuggestion, GenerationError>;
}

/// Collaborator for sessions without a text-completion service.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompletion;

#[async_trait]
impl TextCompletion for NoCompletion {
    async fn chat_reply(
        &self,
        _prompt: &str,
        _history: &[ChatTurn],
    ) -> Result<String, GenerationError> {
        Err(GenerationError::Unavailable)
    }

    async fn suggest_meal(
        &self,
        _meal_type: MealType,
        _preferences: &[String],
        _restrictions: &[String],
    ) -> Result<MealSuggestion, GenerationError> {
        Err(GenerationError::Unavailable)
    }
}
