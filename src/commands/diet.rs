use clap::{Args, Subcommand};

use ecocatalyst_core::models::{
    ChatMessage, DietPlan, DietPlanPatch, DietType, MealEntry, MealType, NewDietPlan,
    NewMealEntry, RelatedKind, RelatedTo,
};

use super::{domain_failure, parse_date, split_list, today, CommandResult, OutputFormat};
use ecocatalyst::session::Session;

#[derive(Args)]
pub struct DietCommand {
    #[command(subcommand)]
    pub command: DietSubcommand,
}

#[derive(Subcommand)]
pub enum DietSubcommand {
    /// Manage the current diet plan
    Plan {
        #[command(subcommand)]
        command: PlanSubcommand,
    },

    /// Manage logged meals
    Meal {
        #[command(subcommand)]
        command: MealSubcommand,
    },

    /// Talk to the diet assistant, or show the conversation
    Chat {
        /// Message to send; omit to print the history
        message: Option<String>,

        /// What the message refers to (meal, plan, food)
        #[arg(long, requires = "related_id")]
        related_type: Option<String>,

        /// ID of the referenced item
        #[arg(long, requires = "related_type")]
        related_id: Option<String>,

        /// Delete the conversation
        #[arg(long, conflicts_with = "message")]
        clear: bool,
    },

    /// Suggest a meal that fits the current plan
    Suggest {
        /// Meal type (breakfast, lunch, dinner, snack)
        #[arg(long = "type", short = 't', value_name = "TYPE")]
        meal_type: String,

        /// Date (YYYY-MM-DD), defaults to today
        #[arg(long, short)]
        date: Option<String>,

        /// Log the suggestion as a meal
        #[arg(long)]
        save: bool,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
pub enum PlanSubcommand {
    /// Create a diet plan
    Create {
        name: String,

        /// Diet type (balanced, vegetarian, vegan, keto, paleo, mediterranean, custom)
        #[arg(long = "type", short = 't', value_name = "TYPE", default_value = "balanced")]
        diet_type: String,

        /// Start date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: String,

        #[arg(long)]
        description: Option<String>,

        /// Daily calorie target
        #[arg(long, default_value = "0")]
        calories: f64,

        /// Daily protein target (g)
        #[arg(long, default_value = "0")]
        protein: f64,

        /// Daily carbohydrate target (g)
        #[arg(long, default_value = "0")]
        carbs: f64,

        /// Daily fat target (g)
        #[arg(long, default_value = "0")]
        fat: f64,

        /// Comma-separated restrictions, e.g. "nuts,dairy"
        #[arg(long)]
        restrictions: Option<String>,

        /// Comma-separated preferences
        #[arg(long)]
        preferences: Option<String>,
    },

    /// Show the current diet plan
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Update fields of a plan
    Update {
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long = "type", short = 't', value_name = "TYPE")]
        diet_type: Option<String>,

        #[arg(long)]
        end: Option<String>,

        #[arg(long)]
        calories: Option<f64>,

        #[arg(long)]
        restrictions: Option<String>,

        #[arg(long)]
        preferences: Option<String>,
    },

    /// Delete a plan
    Delete { id: String },
}

#[derive(Subcommand)]
pub enum MealSubcommand {
    /// Log a meal
    Add {
        name: String,

        /// Meal type (breakfast, lunch, dinner, snack)
        #[arg(long = "type", short = 't', value_name = "TYPE")]
        meal_type: String,

        /// Date (YYYY-MM-DD), defaults to today
        #[arg(long, short)]
        date: Option<String>,

        /// Diet plan the meal belongs to
        #[arg(long)]
        plan: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long, default_value = "0")]
        calories: f64,

        #[arg(long, default_value = "0")]
        protein: f64,

        #[arg(long, default_value = "0")]
        carbs: f64,

        #[arg(long, default_value = "0")]
        fat: f64,
    },

    /// List meals, newest first
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// End date (YYYY-MM-DD), defaults to --from
        #[arg(long, requires = "from")]
        to: Option<String>,
    },

    /// Delete a meal
    Delete { id: String },
}

impl DietCommand {
    pub async fn run(&self, session: &Session) -> CommandResult {
        match &self.command {
            DietSubcommand::Plan { command } => run_plan(command, session).await,
            DietSubcommand::Meal { command } => run_meal(command, session).await,
            DietSubcommand::Chat {
                message,
                related_type,
                related_id,
                clear,
            } => {
                let diet = session.engine().diet();
                let cache = diet.chat_cache();
                session.settle(cache).await;

                if *clear {
                    if !diet.clear_chat_history().await {
                        return Err(domain_failure(session, "Failed to clear chat history"));
                    }
                    println!("Chat history cleared");
                    return Ok(());
                }

                let Some(message) = message else {
                    print_chat(&diet.chat_history());
                    return Ok(());
                };

                let related_to = match (related_type, related_id) {
                    (Some(kind), Some(id)) => Some(RelatedTo {
                        kind: kind.parse::<RelatedKind>()?,
                        id: id.clone(),
                    }),
                    _ => None,
                };

                let seen = cache.snapshot_count();
                let replied = diet.send_chat_message(message, related_to).await;
                session.confirm(cache, seen).await;
                if !replied {
                    return Err(domain_failure(session, "Failed to send message"));
                }

                if let Some(reply) = diet.chat_history().last() {
                    println!("{}", reply.content);
                }
                Ok(())
            }
            DietSubcommand::Suggest {
                meal_type,
                date,
                save,
                format,
            } => {
                let diet = session.engine().diet();
                session.settle(diet.plans_cache()).await;

                let meal_type: MealType = meal_type.parse()?;
                let date = match date {
                    Some(d) => parse_date(d)?,
                    None => today(session),
                };
                let suggestion = diet.generate_meal_suggestion(meal_type, date).await;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&suggestion)?);
                    }
                    OutputFormat::Text => print_meal_details(&suggestion),
                }

                if *save {
                    let mut meal =
                        NewMealEntry::new(suggestion.date, suggestion.meal_type, &suggestion.name)
                            .with_foods(suggestion.foods.clone());
                    if let Some(d) = &suggestion.description {
                        meal = meal.with_description(d);
                    }
                    if let Some(plan) = diet.current_plan() {
                        meal = meal.with_plan(plan.id);
                    }
                    let id = diet
                        .add_meal(meal)
                        .await
                        .ok_or_else(|| domain_failure(session, "Failed to save meal"))?;
                    println!("Saved as meal {}", id);
                }
                Ok(())
            }
        }
    }
}

async fn run_plan(command: &PlanSubcommand, session: &Session) -> CommandResult {
    let diet = session.engine().diet();
    let cache = diet.plans_cache();
    session.settle(cache).await;

    match command {
        PlanSubcommand::Create {
            name,
            diet_type,
            start,
            end,
            description,
            calories,
            protein,
            carbs,
            fat,
            restrictions,
            preferences,
        } => {
            let diet_type: DietType = diet_type.parse()?;
            let start_date = match start {
                Some(d) => parse_date(d)?,
                None => today(session),
            };
            let end_date = parse_date(end)?;
            if end_date < start_date {
                return Err("End date must not be before the start date".into());
            }

            let mut plan = NewDietPlan::new(name, diet_type, start_date, end_date)
                .with_targets(*calories, *protein, *carbs, *fat)
                .with_restrictions(split_list(restrictions))
                .with_preferences(split_list(preferences));
            if let Some(d) = description {
                plan = plan.with_description(d);
            }

            let seen = cache.snapshot_count();
            let id = diet
                .create_plan(plan)
                .await
                .ok_or_else(|| domain_failure(session, "Failed to create diet plan"))?;
            session.confirm(cache, seen).await;

            println!("Created diet plan '{}'", name);
            println!("ID: {}", id);
            Ok(())
        }
        PlanSubcommand::Show { format } => {
            let plan = diet.current_plan();
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&plan)?);
                }
                OutputFormat::Text => match &plan {
                    Some(plan) => print_plan(plan),
                    None => println!("No active diet plan."),
                },
            }
            Ok(())
        }
        PlanSubcommand::Update {
            id,
            name,
            diet_type,
            end,
            calories,
            restrictions,
            preferences,
        } => {
            let patch = DietPlanPatch {
                name: name.clone(),
                diet_type: diet_type.as_deref().map(str::parse::<DietType>).transpose()?,
                end_date: end.as_deref().map(parse_date).transpose()?,
                calorie_target: *calories,
                restrictions: restrictions.as_ref().map(|_| split_list(restrictions)),
                preferences: preferences.as_ref().map(|_| split_list(preferences)),
                ..Default::default()
            };

            let seen = cache.snapshot_count();
            if !diet.update_plan(id, patch).await {
                return Err(domain_failure(session, "Failed to update diet plan"));
            }
            session.confirm(cache, seen).await;

            println!("Updated diet plan {}", id);
            Ok(())
        }
        PlanSubcommand::Delete { id } => {
            let seen = cache.snapshot_count();
            if !diet.delete_plan(id).await {
                return Err(domain_failure(session, "Failed to delete diet plan"));
            }
            session.confirm(cache, seen).await;

            println!("Deleted diet plan {}", id);
            Ok(())
        }
    }
}

async fn run_meal(command: &MealSubcommand, session: &Session) -> CommandResult {
    let diet = session.engine().diet();
    let cache = diet.meals_cache();
    session.settle(cache).await;

    match command {
        MealSubcommand::Add {
            name,
            meal_type,
            date,
            plan,
            description,
            calories,
            protein,
            carbs,
            fat,
        } => {
            let meal_type: MealType = meal_type.parse()?;
            let date = match date {
                Some(d) => parse_date(d)?,
                None => today(session),
            };

            let mut meal = NewMealEntry::new(date, meal_type, name)
                .with_totals(*calories, *protein, *carbs, *fat);
            if let Some(plan) = plan {
                meal = meal.with_plan(plan);
            }
            if let Some(d) = description {
                meal = meal.with_description(d);
            }

            let seen = cache.snapshot_count();
            let id = diet
                .add_meal(meal)
                .await
                .ok_or_else(|| domain_failure(session, "Failed to add meal"))?;
            session.confirm(cache, seen).await;

            println!("Logged {} '{}' on {}", meal_type, name, date);
            println!("ID: {}", id);
            Ok(())
        }
        MealSubcommand::List { format, from, to } => {
            let meals: Vec<MealEntry> = match from {
                Some(from) => {
                    let start = parse_date(from)?;
                    let end = match to {
                        Some(to) => parse_date(to)?,
                        None => start,
                    };
                    diet.meals_by_date_range(start, end)
                }
                None => diet.meals().to_vec(),
            };

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&meals)?);
                }
                OutputFormat::Text => print_meals(&meals),
            }
            Ok(())
        }
        MealSubcommand::Delete { id } => {
            let seen = cache.snapshot_count();
            if !diet.delete_meal(id).await {
                return Err(domain_failure(session, "Failed to delete meal"));
            }
            session.confirm(cache, seen).await;

            println!("Deleted meal {}", id);
            Ok(())
        }
    }
}

fn print_plan(plan: &DietPlan) {
    println!("{}", plan);
    println!("ID: {}", plan.id);
    if let Some(description) = &plan.description {
        println!("{}", description);
    }
    println!();
    println!(
        "Targets: {} kcal, {} g protein, {} g carbs, {} g fat",
        plan.calorie_target, plan.protein_target, plan.carb_target, plan.fat_target
    );
    if !plan.restrictions.is_empty() {
        println!("Restrictions: {}", plan.restrictions.join(", "));
    }
    if !plan.preferences.is_empty() {
        println!("Preferences: {}", plan.preferences.join(", "));
    }
}

fn print_meals(meals: &[MealEntry]) {
    if meals.is_empty() {
        println!("No meals found.");
        return;
    }

    println!(
        "{:<24} {:<12} {:<10} {:<28} {:>8}",
        "ID", "DATE", "TYPE", "NAME", "KCAL"
    );
    println!("{}", "-".repeat(86));
    for meal in meals {
        println!(
            "{:<24} {:<12} {:<10} {:<28} {:>8.0}",
            meal.id,
            meal.date.to_string(),
            meal.meal_type.to_string(),
            meal.name,
            meal.total_calories
        );
    }
}

fn print_meal_details(meal: &MealEntry) {
    println!("{} ({}, {})", meal.name, meal.meal_type, meal.date);
    if let Some(description) = &meal.description {
        println!("{}", description);
    }
    println!();
    for food in &meal.foods {
        println!(
            "  - {} ({}): {} kcal, {} g protein, {} g carbs, {} g fat",
            food.name, food.serving_size, food.calories, food.protein, food.carbs, food.fat
        );
    }
    println!();
    println!(
        "Total: {} kcal, {} g protein, {} g carbs, {} g fat",
        meal.total_calories, meal.total_protein, meal.total_carbs, meal.total_fat
    );
}

fn print_chat(messages: &[ChatMessage]) {
    if messages.is_empty() {
        println!("No messages yet.");
        return;
    }
    for message in messages {
        println!("[{}] {}", message.sender, message.content);
    }
}
