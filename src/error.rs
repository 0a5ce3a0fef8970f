use serde_json::{json, Map, Value};
use std::fmt;
use thiserror::Error;

use crate::api_connection::connection::ApiConnectionError;

/// Structurally invalid input, rejected before any model call is made.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("inventory must contain at least one item")]
    EmptyInventory,
    #[error("household_id must not be empty")]
    MissingHouseholdId,
    #[error("max_cooking_time must be between 10 and 300 minutes, got {0}")]
    CookingTimeOutOfRange(u32),
    #[error("ingredient list must not be empty")]
    EmptyIngredients,
    #[error("expected {expected} recipes, got {actual}")]
    RecipeCount { expected: String, actual: usize },
    #[error("recipe {position} must be the {expected} dish, got {actual}")]
    RecipeOrder {
        position: usize,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("recipe list must not be empty")]
    EmptyRecipes,
    #[error("user input must not be empty")]
    EmptyUserInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    IngredientAnalysis,
    NutritionBalance,
    RecipeSuggestion,
    CookingOptimization,
    MealTheme,
    ImageGeneration,
    UserPreference,
}

impl StageKind {
    pub fn name(self) -> &'static str {
        match self {
            StageKind::IngredientAnalysis => "ingredient_analysis",
            StageKind::NutritionBalance => "nutrition_balance",
            StageKind::RecipeSuggestion => "recipe_suggestion",
            StageKind::CookingOptimization => "cooking_optimization",
            StageKind::MealTheme => "meal_theme",
            StageKind::ImageGeneration => "image_generation",
            StageKind::UserPreference => "user_preference",
        }
    }

    pub fn error_code(self) -> &'static str {
        match self {
            StageKind::IngredientAnalysis => "INGREDIENT_ANALYSIS_ERROR",
            StageKind::NutritionBalance => "NUTRITION_ANALYSIS_ERROR",
            StageKind::RecipeSuggestion => "RECIPE_SUGGESTION_ERROR",
            StageKind::CookingOptimization => "COOKING_OPTIMIZATION_ERROR",
            StageKind::MealTheme => "MEAL_THEME_ERROR",
            StageKind::ImageGeneration => "IMAGE_GENERATION_ERROR",
            StageKind::UserPreference => "USER_PREFERENCE_ERROR",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum StageFailure {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] ValidationError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
#[error("{kind} stage failed: {failure}")]
pub struct StageError {
    pub kind: StageKind,
    #[source]
    pub failure: StageFailure,
}

impl StageError {
    pub fn new(kind: StageKind, failure: impl Into<StageFailure>) -> Self {
        Self {
            kind,
            failure: failure.into(),
        }
    }

    pub fn is_invalid_request(&self) -> bool {
        matches!(self.failure, StageFailure::InvalidRequest(_))
    }
}

/// Raised by the planner when one of its fatal stages fails.
#[derive(Debug, Error)]
#[error("meal planning failed: {source}")]
pub struct PipelineError {
    #[from]
    pub source: StageError,
}

#[derive(Debug, Error)]
pub enum MealPlannerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("external model API error: {0}")]
    ExternalApi(#[from] ApiConnectionError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl MealPlannerError {
    pub fn error_code(&self) -> &'static str {
        match self {
            MealPlannerError::Validation(_) => "VALIDATION_ERROR",
            MealPlannerError::Stage(err) => err.kind.error_code(),
            MealPlannerError::Pipeline(_) => "MEAL_PLANNING_FAILED",
            MealPlannerError::ExternalApi(_) => "EXTERNAL_API_ERROR",
            MealPlannerError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            MealPlannerError::Validation(_) => 400,
            MealPlannerError::Stage(err) if err.is_invalid_request() => 400,
            MealPlannerError::Stage(_) => 500,
            MealPlannerError::Pipeline(_) => 500,
            MealPlannerError::ExternalApi(_) => 502,
            MealPlannerError::Internal(_) => 500,
        }
    }

    /// Structured context for error responses. Internal errors only expose
    /// their cause when `debug` is set.
    pub fn details(&self, debug: bool) -> Map<String, Value> {
        let mut details = Map::new();
        match self {
            MealPlannerError::Validation(err) => {
                details.insert("reason".to_string(), json!(err.to_string()));
            }
            MealPlannerError::Stage(err) => {
                details.insert("stage".to_string(), json!(err.kind.name()));
            }
            MealPlannerError::Pipeline(err) => {
                details.insert("stage".to_string(), json!(err.source.kind.name()));
                details.insert("stage_error_code".to_string(), json!(err.source.kind.error_code()));
            }
            MealPlannerError::ExternalApi(_) | MealPlannerError::Internal(_) => {}
        }
        if debug {
            details.insert("cause".to_string(), json!(format!("{:#}", self)));
        }
        details
    }

    /// Message safe to show to API clients.
    pub fn public_message(&self) -> String {
        match self {
            MealPlannerError::Internal(_) => "An unexpected error occurred".to_string(),
            other => other.to_string(),
        }
    }
}
