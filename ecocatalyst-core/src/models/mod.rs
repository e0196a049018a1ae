mod diet;
mod footprint;
mod gamification;
mod product;

pub use diet::{
    ChatMessage, DietPlan, DietPlanPatch, DietType, FoodItem, MealEntry, MealEntryPatch,
    MealType, NewDietPlan, NewMealEntry, RelatedKind, RelatedTo, Sender,
};
pub use footprint::{
    FootprintCategory, FootprintEntry, FootprintPatch, FootprintSummary, Location,
    NewFootprintEntry,
};
pub use gamification::{
    Achievement, AchievementCategory, AchievementRequirement, LeaderboardEntry, RequirementType,
    UserAchievement, UserAchievementPatch, UserStats, UserStatsPatch,
};
pub use product::{AlternativeProduct, Product, ProductScan};
