use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

pub const MIN_COOKING_TIME: u32 = 10;
pub const MAX_COOKING_TIME: u32 = 300;
pub const DEFAULT_MAX_COOKING_TIME: u32 = 60;
/// Upper bound for a single dish, in minutes.
pub const MAX_DISH_TIME: u32 = 600;
pub const OTHER_CATEGORY: &str = "other";
pub const CREATED_BY: &str = "meal_planner";

// --- Enumerations ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyLevel {
    #[default]
    Easy,
    Medium,
    Hard,
    Expert,
}

impl DifficultyLevel {
    pub fn score(self) -> u8 {
        match self {
            DifficultyLevel::Easy => 1,
            DifficultyLevel::Medium => 2,
            DifficultyLevel::Hard => 3,
            DifficultyLevel::Expert => 4,
        }
    }

    /// Maps a mean difficulty score back onto a level (thresholds 1.5 / 2.5 / 3.5).
    pub fn from_mean_score(mean: f64) -> Self {
        if mean <= 1.5 {
            DifficultyLevel::Easy
        } else if mean <= 2.5 {
            DifficultyLevel::Medium
        } else if mean <= 3.5 {
            DifficultyLevel::Hard
        } else {
            DifficultyLevel::Expert
        }
    }

    pub fn parse_lenient(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "easy" => Some(DifficultyLevel::Easy),
            "medium" => Some(DifficultyLevel::Medium),
            "hard" => Some(DifficultyLevel::Hard),
            "expert" => Some(DifficultyLevel::Expert),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DifficultyLevel::Easy => "easy",
            DifficultyLevel::Medium => "medium",
            DifficultyLevel::Hard => "hard",
            DifficultyLevel::Expert => "expert",
        }
    }
}

impl fmt::Display for DifficultyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryPriority {
    Urgent,
    Soon,
    #[default]
    Fresh,
    LongTerm,
}

impl ExpiryPriority {
    pub fn from_days_until_expiry(days: i64) -> Self {
        match days {
            d if d <= 1 => ExpiryPriority::Urgent,
            2..=3 => ExpiryPriority::Soon,
            4..=7 => ExpiryPriority::Fresh,
            _ => ExpiryPriority::LongTerm,
        }
    }

    /// Lower is more urgent.
    pub fn score(self) -> u8 {
        match self {
            ExpiryPriority::Urgent => 1,
            ExpiryPriority::Soon => 2,
            ExpiryPriority::Fresh => 3,
            ExpiryPriority::LongTerm => 4,
        }
    }

    pub fn parse_lenient(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "urgent" => Some(ExpiryPriority::Urgent),
            "soon" => Some(ExpiryPriority::Soon),
            "fresh" => Some(ExpiryPriority::Fresh),
            "long_term" | "longterm" => Some(ExpiryPriority::LongTerm),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExpiryPriority::Urgent => "urgent",
            ExpiryPriority::Soon => "soon",
            ExpiryPriority::Fresh => "fresh",
            ExpiryPriority::LongTerm => "long_term",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealPlanStatus {
    #[default]
    Suggested,
    Accepted,
    Rejected,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DishCategory {
    Main,
    Side,
    Soup,
    #[serde(alias = "rice")]
    Staple,
}

impl DishCategory {
    pub const ALL: [DishCategory; 4] = [
        DishCategory::Main,
        DishCategory::Side,
        DishCategory::Soup,
        DishCategory::Staple,
    ];

    /// Key under which a model reply carries this dish.
    pub fn reply_key(self) -> &'static str {
        match self {
            DishCategory::Main => "main_dish",
            DishCategory::Side => "side_dish",
            DishCategory::Soup => "soup",
            DishCategory::Staple => "staple",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DishCategory::Main => "main",
            DishCategory::Side => "side",
            DishCategory::Soup => "soup",
            DishCategory::Staple => "staple",
        }
    }
}

/// Which branch of the model-call protocol produced a stage result.
/// Results handed in by API clients carry no provenance and read as `Model`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    #[default]
    Model,
    Fallback,
}

// --- Inventory and ingredients ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: String,
    pub name: String,
    pub category: String,
    pub quantity: f64,
    pub unit: String,
    pub expiry_date: NaiveDate,
    pub days_until_expiry: i64,
    #[serde(default, alias = "current_image_url", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl InventoryItem {
    pub fn days_from(expiry_date: NaiveDate, today: NaiveDate) -> i64 {
        (expiry_date - today).num_days()
    }
}

fn default_true() -> bool {
    true
}

fn default_category() -> String {
    OTHER_CATEGORY.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    pub quantity: String,
    pub unit: String,
    #[serde(default = "default_true")]
    pub available: bool,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default)]
    pub shopping_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default)]
    pub priority: ExpiryPriority,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Ingredient {
    pub fn priority_score(&self) -> u8 {
        self.priority.score()
    }
}

/// Canonical lowercase English category for an inventory category.
/// Japanese labels used by the mobile client map onto the same names.
pub fn normalize_category(raw: &str) -> String {
    let trimmed = raw.trim();
    let canonical = match trimmed.to_lowercase().as_str() {
        "vegetables" | "vegetable" | "野菜" => "vegetables",
        "fruits" | "fruit" | "果物" => "fruits",
        "meat" | "肉" => "meat",
        "fish" | "seafood" | "魚" => "fish",
        "dairy" | "乳製品" => "dairy",
        "grains" | "grain" | "rice" | "主食" | "米" => "grains",
        "seasonings" | "seasoning" | "調味料" => "seasonings",
        "beverages" | "beverage" | "飲み物" => "beverages",
        "snacks" | "snack" | "お菓子" => "snacks",
        "frozen" | "冷凍食品" => "frozen",
        "" | "その他" => OTHER_CATEGORY,
        other => return other.to_string(),
    };
    canonical.to_string()
}

// --- Dishes and plans ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NutritionInfo {
    pub calories: f64,
    pub protein: f64,
    pub carbohydrates: f64,
    pub fat: f64,
    pub fiber: f64,
    pub sugar: f64,
    pub sodium: f64,
}

impl NutritionInfo {
    pub fn macros(calories: f64, protein: f64, carbohydrates: f64, fat: f64) -> Self {
        Self {
            calories,
            protein,
            carbohydrates,
            fat,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeStep {
    pub step_number: u32,
    pub description: String,
}

impl RecipeStep {
    pub fn numbered<I, S>(descriptions: I) -> Vec<RecipeStep>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        descriptions
            .into_iter()
            .enumerate()
            .map(|(idx, description)| RecipeStep {
                step_number: idx as u32 + 1,
                description: description.into(),
            })
            .collect()
    }
}

fn default_prep_time() -> u32 {
    10
}

fn default_serving_size() -> u32 {
    4
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishPlan {
    pub name: String,
    pub category: DishCategory,
    pub description: String,
    pub ingredients: Vec<Ingredient>,
    pub steps: Vec<RecipeStep>,
    #[serde(default)]
    pub tips: Vec<String>,
    pub cooking_time: u32,
    #[serde(default = "default_prep_time")]
    pub prep_time: u32,
    #[serde(default = "default_serving_size")]
    pub serving_size: u32,
    #[serde(default)]
    pub difficulty: DifficultyLevel,
    #[serde(default)]
    pub nutrition: NutritionInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl DishPlan {
    pub fn with_image_url(self, image_url: Option<String>) -> Self {
        Self { image_url, ..self }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlan {
    pub household_id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub status: MealPlanStatus,
    pub main_dish: DishPlan,
    pub side_dish: DishPlan,
    pub soup: DishPlan,
    #[serde(alias = "rice")]
    pub staple: DishPlan,
    pub total_cooking_time: u32,
    pub difficulty: DifficultyLevel,
    pub nutrition_score: f64,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl MealPlan {
    /// Builds a plan from its four dishes. Total cooking time and difficulty
    /// are always derived from the dishes here.
    pub fn assemble(
        household_id: impl Into<String>,
        date: NaiveDate,
        dishes: [DishPlan; 4],
        nutrition_score: f64,
        confidence: f64,
    ) -> Self {
        let total_cooking_time = dishes.iter().map(|d| d.cooking_time).fold(0u32, u32::saturating_add);
        let mean_difficulty = dishes
            .iter()
            .map(|d| f64::from(d.difficulty.score()))
            .sum::<f64>()
            / dishes.len() as f64;
        let [main_dish, side_dish, soup, staple] = dishes;

        Self {
            household_id: household_id.into(),
            date,
            status: MealPlanStatus::Suggested,
            main_dish,
            side_dish,
            soup,
            staple,
            total_cooking_time,
            difficulty: DifficultyLevel::from_mean_score(mean_difficulty),
            nutrition_score: nutrition_score.clamp(0.0, 100.0),
            confidence: confidence.clamp(0.0, 1.0),
            created_at: Utc::now(),
            created_by: CREATED_BY.to_string(),
        }
    }

    pub fn dishes(&self) -> [&DishPlan; 4] {
        [&self.main_dish, &self.side_dish, &self.soup, &self.staple]
    }

    pub fn into_dishes(self) -> [DishPlan; 4] {
        [self.main_dish, self.side_dish, self.soup, self.staple]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShoppingItem {
    pub name: String,
    pub quantity: String,
    pub unit: String,
    pub category: String,
    pub is_custom: bool,
    pub added_by: String,
    pub added_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

// --- Preferences and requests ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    pub max_cooking_time: u32,
    pub preferred_difficulty: DifficultyLevel,
    pub dietary_restrictions: Vec<String>,
    pub allergies: Vec<String>,
    pub disliked_ingredients: Vec<String>,
    pub preferred_cuisines: Vec<String>,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            max_cooking_time: DEFAULT_MAX_COOKING_TIME,
            preferred_difficulty: DifficultyLevel::Easy,
            dietary_restrictions: Vec::new(),
            allergies: Vec::new(),
            disliked_ingredients: Vec::new(),
            preferred_cuisines: Vec::new(),
        }
    }
}

impl UserPreferences {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(MIN_COOKING_TIME..=MAX_COOKING_TIME).contains(&self.max_cooking_time) {
            return Err(ValidationError::CookingTimeOutOfRange(self.max_cooking_time));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealPlanningRequest {
    #[serde(alias = "refrigerator_items")]
    pub inventory: Vec<InventoryItem>,
    pub household_id: String,
    #[serde(default, alias = "user_preferences")]
    pub preferences: UserPreferences,
}

impl MealPlanningRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.inventory.is_empty() {
            return Err(ValidationError::EmptyInventory);
        }
        if self.household_id.trim().is_empty() {
            return Err(ValidationError::MissingHouseholdId);
        }
        self.preferences.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealPlanningResponse {
    pub meal_plan: MealPlan,
    pub shopping_list: Vec<ShoppingItem>,
    pub processing_time: f64,
    pub stages_used: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlternativesRequest {
    pub original_plan: MealPlan,
    pub request: MealPlanningRequest,
    #[serde(alias = "reason")]
    pub feedback: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlternativesResponse {
    pub alternatives: Vec<MealPlan>,
    pub processing_time: f64,
}
