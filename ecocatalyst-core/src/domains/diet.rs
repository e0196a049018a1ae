use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use super::{attach, report, Domain};
use crate::cache::{CollectionSpec, EntityCache, RemotePath, Shape};
use crate::clock::{Calendar, DAY_MS};
use crate::completion::{ChatTurn, MealSuggestion, TextCompletion, CHAT_HISTORY_WINDOW};
use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::identity::Owner;
use crate::local::Namespace;
use crate::models::{
    ChatMessage, DietPlan, DietPlanPatch, MealEntry, MealEntryPatch, MealType, NewDietPlan,
    NewMealEntry, RelatedTo, Sender,
};
use crate::reconcile::SubscriptionSet;
use crate::remote::Query;
use crate::status::DomainStatus;

/// Chat messages kept in the subscribed window.
pub const CHAT_WINDOW: usize = 50;

/// Days of meal history kept in the subscribed window.
pub const MEAL_HISTORY_DAYS: i64 = 30;

fn latest_start_first(a: &DietPlan, b: &DietPlan) -> Ordering {
    b.start_date.cmp(&a.start_date)
}

fn meal_order(a: &MealEntry, b: &MealEntry) -> Ordering {
    b.date
        .cmp(&a.date)
        .then_with(|| a.meal_type.rank().cmp(&b.meal_type.rank()))
}

fn oldest_first(a: &ChatMessage, b: &ChatMessage) -> Ordering {
    a.timestamp.cmp(&b.timestamp)
}

fn active_plans(calendar: &Calendar, now: i64) -> Query {
    Query::new()
        .order_by_child("endDate")
        .start_at(calendar.iso_date(now))
}

fn recent_meals(calendar: &Calendar, now: i64) -> Query {
    Query::new()
        .order_by_child("date")
        .start_at(calendar.iso_date(now - MEAL_HISTORY_DAYS * DAY_MS))
}

fn chat_window(_calendar: &Calendar, _now: i64) -> Query {
    Query::new()
        .order_by_child("timestamp")
        .limit_to_last(CHAT_WINDOW)
}

pub const PLANS: CollectionSpec<DietPlan> = CollectionSpec {
    namespace: Namespace::CurrentDietPlan,
    remote: RemotePath::PerOwner("dietPlans"),
    shape: Shape::Collection,
    order: latest_start_first,
    query: active_plans,
    local_capacity: Some(1),
};

pub const MEALS: CollectionSpec<MealEntry> = CollectionSpec {
    namespace: Namespace::MealEntries,
    remote: RemotePath::PerOwner("mealEntries"),
    shape: Shape::Collection,
    order: meal_order,
    query: recent_meals,
    local_capacity: None,
};

pub const CHAT: CollectionSpec<ChatMessage> = CollectionSpec {
    namespace: Namespace::DietChatHistory,
    remote: RemotePath::PerOwner("dietChat"),
    shape: Shape::Collection,
    order: oldest_first,
    query: chat_window,
    local_capacity: None,
};

/// Diet plans, meal log and the diet assistant chat.
pub struct DietService {
    ctx: SyncContext,
    status: Arc<DomainStatus>,
    plans: Arc<EntityCache<DietPlan>>,
    meals: Arc<EntityCache<MealEntry>>,
    chat: Arc<EntityCache<ChatMessage>>,
    completion: Arc<dyn TextCompletion>,
    subscriptions: SubscriptionSet,
}

impl DietService {
    pub fn new(ctx: SyncContext, completion: Arc<dyn TextCompletion>) -> Self {
        let status = Arc::new(DomainStatus::new("diet"));
        Self {
            plans: EntityCache::new(PLANS, ctx.clone(), status.clone()),
            meals: EntityCache::new(MEALS, ctx.clone(), status.clone()),
            chat: EntityCache::new(CHAT, ctx.clone(), status.clone()),
            ctx,
            status,
            completion,
            subscriptions: SubscriptionSet::new(),
        }
    }

    pub fn plans_cache(&self) -> &Arc<EntityCache<DietPlan>> {
        &self.plans
    }

    pub fn meals_cache(&self) -> &Arc<EntityCache<MealEntry>> {
        &self.meals
    }

    pub fn chat_cache(&self) -> &Arc<EntityCache<ChatMessage>> {
        &self.chat
    }

    // ---- plans ----

    /// Active plan with the latest start date.
    pub fn current_plan(&self) -> Option<DietPlan> {
        self.plans.first()
    }

    pub async fn create_plan(&self, plan: NewDietPlan) -> Option<String> {
        // Without a user the new plan simply becomes the current one
        if !self.ctx.identity.is_connected() {
            self.plans.clear().await;
        }
        let result = self
            .plans
            .create(|stamp| plan.into_plan(stamp.owner_id, stamp.now))
            .await
            .map(|created| created.id);
        report(
            &self.status,
            "Failed to create diet plan. Please try again.",
            result,
        )
    }

    pub async fn update_plan(&self, id: &str, patch: DietPlanPatch) -> bool {
        let result = self.plans.update(id, patch).await;
        report(
            &self.status,
            "Failed to update diet plan. Please try again.",
            result,
        )
        .is_some()
    }

    pub async fn delete_plan(&self, id: &str) -> bool {
        let result = self.plans.delete(id).await;
        report(
            &self.status,
            "Failed to delete diet plan. Please try again.",
            result,
        )
        .is_some()
    }

    // ---- meals ----

    /// Meals by date, newest day first and in meal order within a day.
    pub fn meals(&self) -> Arc<Vec<MealEntry>> {
        self.meals.items()
    }

    pub async fn add_meal(&self, meal: NewMealEntry) -> Option<String> {
        let result = self
            .meals
            .create(|stamp| meal.into_entry(stamp.owner_id, stamp.now))
            .await
            .map(|created| created.id);
        report(
            &self.status,
            "Failed to save meal entry. Please try again.",
            result,
        )
    }

    pub async fn update_meal(&self, id: &str, patch: MealEntryPatch) -> bool {
        let result = self.meals.update(id, patch).await;
        report(
            &self.status,
            "Failed to update meal entry. Please try again.",
            result,
        )
        .is_some()
    }

    pub async fn delete_meal(&self, id: &str) -> bool {
        let result = self.meals.delete(id).await;
        report(
            &self.status,
            "Failed to delete meal entry. Please try again.",
            result,
        )
        .is_some()
    }

    pub fn meals_by_date(&self, date: NaiveDate) -> Vec<MealEntry> {
        self.meals.filter(|meal| meal.date == date)
    }

    /// Meals from `start` through `end`, both inclusive.
    pub fn meals_by_date_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<MealEntry> {
        self.meals
            .filter(|meal| meal.date >= start && meal.date <= end)
    }

    // ---- chat ----

    pub fn chat_history(&self) -> Arc<Vec<ChatMessage>> {
        self.chat.items()
    }

    /// Sends a message to the diet assistant and appends its reply.
    ///
    /// The user message is shown at once. Returns false when either message
    /// could not be stored or no reply could be generated.
    pub async fn send_chat_message(&self, content: &str, related_to: Option<RelatedTo>) -> bool {
        let owner = self.ctx.identity.current();
        let timestamp = self.ctx.now();
        let history: Vec<ChatTurn> = {
            let items = self.chat.items();
            let skip = items.len().saturating_sub(CHAT_HISTORY_WINDOW);
            items
                .iter()
                .skip(skip)
                .map(|m| ChatTurn {
                    content: m.content.clone(),
                    sender: m.sender,
                })
                .collect()
        };

        let message = |sender: Sender, content: String, timestamp: i64| ChatMessage {
            id: String::new(),
            user_id: owner.id().to_string(),
            content,
            sender,
            timestamp,
            related_to: related_to.clone(),
        };

        self.status.set_loading(true);
        let sent = self
            .append_message(&owner, message(Sender::User, content.to_string(), timestamp))
            .await;
        if report(
            &self.status,
            "Failed to send message. Please try again.",
            sent,
        )
        .is_none()
        {
            self.status.set_loading(false);
            return false;
        }

        let replied = match self.completion.chat_reply(content, &history).await {
            Ok(reply) => {
                self.append_message(&owner, message(Sender::Ai, reply, timestamp + 1))
                    .await
            }
            Err(e) => Err(e.into()),
        };
        self.status.set_loading(false);
        report(
            &self.status,
            "Failed to get AI response. Please try again.",
            replied,
        )
        .is_some()
    }

    async fn append_message(&self, owner: &Owner, mut message: ChatMessage) -> SyncResult<()> {
        if owner.is_anonymous() {
            let prefix = match message.sender {
                Sender::User => "user",
                Sender::Ai => "ai",
            };
            message.id = self.chat.unique_id(prefix, message.timestamp);
            self.chat.insert_local(message).await;
            Ok(())
        } else {
            self.chat.push_record(message).await.map(|_| ())
        }
    }

    pub async fn clear_chat_history(&self) -> bool {
        self.chat.clear().await;
        let owner = self.ctx.identity.current();
        let Some(path) = self.chat.write_base(&owner) else {
            return true;
        };
        let result = self.ctx.remote.remove(&path).await.map_err(Into::into);
        report(
            &self.status,
            "Failed to clear chat history. Please try again.",
            result,
        )
        .is_some()
    }

    /// Suggests a meal that fits the current plan. Falls back to a fixed
    /// placeholder meal when no suggestion can be generated, so there is
    /// always a result. The suggestion is not saved.
    pub async fn generate_meal_suggestion(&self, meal_type: MealType, date: NaiveDate) -> MealEntry {
        self.status.set_loading(true);
        let timestamp = self.ctx.now();
        let (preferences, restrictions) = self
            .current_plan()
            .map(|plan| (plan.preferences, plan.restrictions))
            .unwrap_or_default();

        let suggestion = match self
            .completion
            .suggest_meal(meal_type, &preferences, &restrictions)
            .await
        {
            Ok(suggestion) => suggestion,
            Err(e) => {
                tracing::warn!(error = %e, %meal_type, "Meal suggestion failed, using fallback");
                MealSuggestion::fallback(meal_type)
            }
        };
        self.status.set_loading(false);

        MealEntry {
            id: format!("suggestion_{}", timestamp),
            user_id: self.ctx.identity.current().id().to_string(),
            diet_plan_id: None,
            date,
            meal_type,
            foods: suggestion.food_items(),
            name: suggestion.name,
            description: Some(suggestion.description),
            total_calories: suggestion.total_calories,
            total_protein: suggestion.total_protein,
            total_carbs: suggestion.total_carbs,
            total_fat: suggestion.total_fat,
            image_url: None,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }
}

#[async_trait]
impl Domain for DietService {
    fn name(&self) -> &'static str {
        "diet"
    }

    fn status(&self) -> &DomainStatus {
        &self.status
    }

    async fn start(&self) {
        self.plans.warm_start().await;
        self.meals.warm_start().await;
        self.chat.warm_start().await;
    }

    async fn bind_identity(&self, owner: &Owner) {
        self.subscriptions.cancel_all().await;
        self.plans.evict_foreign(owner).await;
        self.meals.evict_foreign(owner).await;
        self.chat.evict_foreign(owner).await;
        attach(&self.subscriptions, &self.plans, owner, None).await;
        attach(&self.subscriptions, &self.meals, owner, None).await;
        attach(&self.subscriptions, &self.chat, owner, None).await;
    }

    async fn shutdown(&self) {
        self.subscriptions.cancel_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::completion::{NoCompletion, SuggestedFood};
    use crate::error::GenerationError;
    use crate::identity::IdentityGate;
    use crate::local::MemoryLocalStore;
    use crate::models::{DietType, FoodItem};
    use crate::remote::{MemoryRemoteStore, RemoteStore};
    use std::sync::Mutex;

    // 2024-03-15T10:00:00Z
    const T: i64 = 1_710_496_800_000;

    /// Replies with a fixed answer and remembers the history it was given.
    #[derive(Default)]
    struct ScriptedCompletion {
        seen_history: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl TextCompletion for ScriptedCompletion {
        async fn chat_reply(
            &self,
            prompt: &str,
            history: &[ChatTurn],
        ) -> Result<String, GenerationError> {
            self.seen_history.lock().unwrap().push(history.len());
            Ok(format!("About {}: try lentils", prompt))
        }

        async fn suggest_meal(
            &self,
            meal_type: MealType,
            preferences: &[String],
            _restrictions: &[String],
        ) -> Result<MealSuggestion, GenerationError> {
            Ok(MealSuggestion {
                name: format!("{} with {}", meal_type, preferences.join(", ")),
                description: "Fresh".into(),
                foods: vec![SuggestedFood {
                    name: "Tofu".into(),
                    serving_size: "150g".into(),
                    calories: 180.0,
                    protein: 20.0,
                    carbs: 4.0,
                    fat: 9.0,
                    sustainability_score: 0.0,
                }],
                total_calories: 180.0,
                total_protein: 20.0,
                total_carbs: 4.0,
                total_fat: 9.0,
            })
        }
    }

    fn service(
        remote: Arc<MemoryRemoteStore>,
        completion: Arc<dyn TextCompletion>,
    ) -> (DietService, IdentityGate, Arc<ManualClock>) {
        let identity = IdentityGate::new();
        let clock = Arc::new(ManualClock::new(T));
        let ctx = SyncContext::new(Arc::new(MemoryLocalStore::new()), remote, identity.clone())
            .with_clock(clock.clone());
        (DietService::new(ctx, completion), identity, clock)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[tokio::test]
    async fn test_local_chat_echoes_and_replies() {
        let completion = Arc::new(ScriptedCompletion::default());
        let (diet, _, clock) = service(Arc::new(MemoryRemoteStore::new()), completion.clone());

        assert!(diet.send_chat_message("breakfast", None).await);
        clock.advance(1_000);
        assert!(diet.send_chat_message("dinner", None).await);

        let chat = diet.chat_history();
        let ids: Vec<_> = chat.iter().map(|m| m.id.clone()).collect();
        assert_eq!(
            ids,
            vec![
                format!("user_{}", T),
                format!("ai_{}", T + 1),
                format!("user_{}", T + 1_000),
                format!("ai_{}", T + 1_001),
            ]
        );
        assert_eq!(chat[1].content, "About breakfast: try lentils");
        assert_eq!(chat[1].sender, Sender::Ai);
        assert_eq!(*completion.seen_history.lock().unwrap(), vec![0, 2]);
        assert!(!diet.is_loading());
    }

    #[tokio::test]
    async fn test_local_chat_ids_stay_unique_within_a_millisecond() {
        let completion = Arc::new(ScriptedCompletion::default());
        let (diet, _, _) = service(Arc::new(MemoryRemoteStore::new()), completion);

        assert!(diet.send_chat_message("lunch", None).await);
        assert!(diet.send_chat_message("snack", None).await);

        let chat = diet.chat_history();
        assert_eq!(chat.len(), 4);
        let mut ids: Vec<_> = chat.iter().map(|m| m.id.clone()).collect();
        ids.sort();
        let mut expected = vec![
            format!("user_{}", T),
            format!("user_{}_1", T),
            format!("ai_{}", T + 1),
            format!("ai_{}_1", T + 1),
        ];
        expected.sort();
        assert_eq!(ids, expected);
        assert!(chat.iter().any(|m| m.content == "lunch"));
        assert!(chat.iter().any(|m| m.content == "About snack: try lentils"));
    }

    #[tokio::test]
    async fn test_chat_history_window_is_bounded() {
        let completion = Arc::new(ScriptedCompletion::default());
        let (diet, _, clock) = service(Arc::new(MemoryRemoteStore::new()), completion.clone());
        for i in 0..7 {
            assert!(diet.send_chat_message(&format!("q{}", i), None).await);
            clock.advance(10);
        }
        let seen = completion.seen_history.lock().unwrap().clone();
        assert_eq!(*seen.last().unwrap(), CHAT_HISTORY_WINDOW);
    }

    #[tokio::test]
    async fn test_chat_without_assistant_keeps_user_message() {
        let (diet, _, _) = service(Arc::new(MemoryRemoteStore::new()), Arc::new(NoCompletion));
        assert!(!diet.send_chat_message("hello", None).await);
        assert_eq!(
            diet.error().as_deref(),
            Some("Failed to get AI response. Please try again.")
        );
        assert_eq!(diet.chat_history().len(), 1);
        assert!(diet.clear_chat_history().await);
        assert!(diet.chat_history().is_empty());
    }

    #[tokio::test]
    async fn test_connected_chat_pushes_both_messages() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let (diet, identity, _) = service(remote.clone(), Arc::new(ScriptedCompletion::default()));
        identity.sign_in("u1");
        diet.bind_identity(&identity.current()).await;

        assert!(diet.send_chat_message("snack?", None).await);
        let stored = remote.read_once("dietChat/u1", None).await.unwrap().unwrap();
        assert_eq!(stored.as_object().unwrap().len(), 2);
        assert_eq!(diet.chat_history().len(), 2);
        assert!(diet.chat_history().iter().all(|m| m.user_id == "u1"));
        diet.shutdown().await;
    }

    #[tokio::test]
    async fn test_suggestion_falls_back() {
        let (diet, _, _) = service(Arc::new(MemoryRemoteStore::new()), Arc::new(NoCompletion));
        let meal = diet.generate_meal_suggestion(MealType::Lunch, day(15)).await;
        assert_eq!(meal.id, format!("suggestion_{}", T));
        assert_eq!(meal.name, "Suggested lunch");
        assert_eq!(meal.foods.len(), 1);
        assert_eq!(meal.foods[0].sustainability_score, Some(80.0));
        assert_eq!(meal.total_calories, 200.0);
        assert!(diet.error().is_none());
        assert!(diet.meals().is_empty());
    }

    #[tokio::test]
    async fn test_suggestion_uses_plan_preferences() {
        let (diet, _, _) = service(
            Arc::new(MemoryRemoteStore::new()),
            Arc::new(ScriptedCompletion::default()),
        );
        diet.create_plan(
            NewDietPlan::new("Plants", DietType::Vegan, day(1), day(31))
                .with_preferences(vec!["tofu".into()]),
        )
        .await
        .unwrap();
        let meal = diet.generate_meal_suggestion(MealType::Dinner, day(15)).await;
        assert_eq!(meal.name, "dinner with tofu");
        assert!(meal.foods[0].id.starts_with("food_"));
        assert_eq!(meal.foods[0].sustainability_score, Some(80.0));
    }

    #[tokio::test]
    async fn test_local_plan_is_replaced() {
        let (diet, _, clock) = service(Arc::new(MemoryRemoteStore::new()), Arc::new(NoCompletion));
        diet.create_plan(NewDietPlan::new("Later", DietType::Keto, day(10), day(20)))
            .await
            .unwrap();
        clock.advance(1);
        let id = diet
            .create_plan(NewDietPlan::new("Earlier", DietType::Paleo, day(1), day(20)))
            .await
            .unwrap();
        let current = diet.current_plan().unwrap();
        assert_eq!(current.id, id);
        assert_eq!(current.name, "Earlier");

        assert!(diet
            .update_plan(
                &id,
                DietPlanPatch {
                    calorie_target: Some(2000.0),
                    ..Default::default()
                }
            )
            .await);
        assert_eq!(diet.current_plan().unwrap().calorie_target, 2000.0);
        assert!(diet.delete_plan(&id).await);
        assert!(diet.current_plan().is_none());
    }

    #[tokio::test]
    async fn test_meals_sorted_and_filtered() {
        let (diet, _, clock) = service(Arc::new(MemoryRemoteStore::new()), Arc::new(NoCompletion));
        for (date, meal_type) in [
            (day(14), MealType::Dinner),
            (day(15), MealType::Snack),
            (day(15), MealType::Breakfast),
            (day(14), MealType::Lunch),
        ] {
            diet.add_meal(NewMealEntry::new(date, meal_type, "meal"))
                .await
                .unwrap();
            clock.advance(1);
        }
        let order: Vec<_> = diet
            .meals()
            .iter()
            .map(|m| (m.date, m.meal_type))
            .collect();
        assert_eq!(
            order,
            vec![
                (day(15), MealType::Breakfast),
                (day(15), MealType::Snack),
                (day(14), MealType::Lunch),
                (day(14), MealType::Dinner),
            ]
        );
        assert_eq!(diet.meals_by_date(day(14)).len(), 2);
        assert_eq!(diet.meals_by_date_range(day(1), day(14)).len(), 2);
        assert_eq!(diet.meals_by_date_range(day(14), day(15)).len(), 4);

        let id = diet.meals()[0].id.clone();
        let food = FoodItem {
            id: "f1".into(),
            name: "Eggs".into(),
            serving_size: "2".into(),
            calories: 140.0,
            protein: 12.0,
            carbs: 1.0,
            fat: 10.0,
            sustainability_score: None,
            carbon_footprint: None,
        };
        assert!(diet
            .update_meal(
                &id,
                MealEntryPatch {
                    foods: Some(vec![food]),
                    total_calories: Some(140.0),
                    ..Default::default()
                }
            )
            .await);
        assert_eq!(diet.meals_cache().find_by_id(&id).unwrap().total_calories, 140.0);
        assert!(diet.delete_meal(&id).await);
        assert!(!diet.delete_meal(&id).await);
        assert_eq!(
            diet.error().as_deref(),
            Some("Failed to delete meal entry. Please try again.")
        );
    }
}
