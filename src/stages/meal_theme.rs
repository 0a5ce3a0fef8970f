use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::info;

use super::model_call::{field_f64, field_object, field_str, field_str_list, ModelCall, ModelReply};
use super::nutrition_balance::join_or_none;
use super::Stage;
use crate::api_connection::TextGenerator;
use crate::config::StageConfig;
use crate::error::{StageKind, ValidationError};
use crate::models::{DishCategory, DishPlan, MealPlan, ResultSource, UserPreferences};

const FALLBACK_NUTRITION_SCORE: f64 = 85.0;
const FALLBACK_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Autumn,
}

impl Season {
    pub fn from_date(date: NaiveDate) -> Self {
        match date.month() {
            12 | 1 | 2 => Season::Winter,
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            _ => Season::Autumn,
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Season::Winter => "Winter",
            Season::Spring => "Spring",
            Season::Summer => "Summer",
            Season::Autumn => "Autumn",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualStyle {
    pub color_palette: Vec<String>,
    pub mood: String,
    pub presentation_style: String,
}

impl Default for VisualStyle {
    fn default() -> Self {
        Self {
            color_palette: vec!["green".to_string(), "white".to_string(), "brown".to_string()],
            mood: "warm, homely atmosphere".to_string(),
            presentation_style: "simple, beautiful plating".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealThemeRequest {
    /// Main, side, soup and staple, in that order.
    pub recipes: Vec<DishPlan>,
    #[serde(default, alias = "user_preferences")]
    pub preferences: UserPreferences,
    pub current_date: NaiveDate,
    pub household_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealThemeResult {
    pub theme_name: String,
    pub theme_description: String,
    pub unified_meal_plan: MealPlan,
    pub visual_style: VisualStyle,
    pub season: Season,
    #[serde(default)]
    pub source: ResultSource,
}

const THEME_RULES: [(&[&str], &str, &str); 3] = [
    (
        &["和", "味噌", "miso", "japanese"],
        "Japanese home cooking",
        "Home cooking unified by soy sauce and miso flavours",
    ),
    (
        &["中華", "炒め", "stir-fry", "chinese"],
        "Chinese-style stir-fry",
        "A stir-fry centred meal seasoned with oyster sauce and doubanjiang",
    ),
    (
        &["野菜", "サラダ", "salad", "vegetable"],
        "Healthy vegetable-centred",
        "Light seasoning that lets the vegetables take the lead",
    ),
];

/// Keyword rules over the dish names, first rule wins; otherwise a seasonal
/// home-cooking theme.
pub fn fallback_theme(recipes: &[DishPlan], season: Season) -> (String, String) {
    let names: Vec<String> = recipes.iter().map(|d| d.name.to_lowercase()).collect();
    THEME_RULES
        .iter()
        .find(|(keywords, _, _)| names.iter().any(|name| keywords.iter().any(|k| name.contains(k))))
        .map(|(_, name, description)| (name.to_string(), description.to_string()))
        .unwrap_or_else(|| {
            (
                format!("{} home cooking", season),
                format!("Warm home cooking that makes the most of {} ingredients", season.to_string().to_lowercase()),
            )
        })
}

fn parse_visual_style(reply: &Map<String, Value>) -> VisualStyle {
    let fallback = VisualStyle::default();
    let Some(style) = field_object(reply, "visual_style") else {
        return fallback;
    };
    let color_palette = field_str_list(style, "color_palette");
    VisualStyle {
        color_palette: if color_palette.is_empty() { fallback.color_palette } else { color_palette },
        mood: field_str(style, "mood").unwrap_or(fallback.mood),
        presentation_style: field_str(style, "presentation_style").unwrap_or(fallback.presentation_style),
    }
}

#[derive(Debug, Clone)]
pub struct MealThemeStage {
    model: ModelCall,
}

impl MealThemeStage {
    pub fn new(generator: Arc<dyn TextGenerator>, config: StageConfig) -> Self {
        Self {
            model: ModelCall::new(StageKind::MealTheme, generator, config),
        }
    }

    fn build_prompt(&self, request: &MealThemeRequest, season: Season) -> String {
        let recipes: Vec<String> = request
            .recipes
            .iter()
            .map(|d| format!("- {}: {} ({} minutes)", d.name, d.description, d.cooking_time))
            .collect();
        let prefs = &request.preferences;

        format!(
            "You are an expert in meal themes and concepts. Decide a unified theme for the following meal.

Dishes:
{recipes}

Preferences:
- Max cooking time: {max_time} minutes
- Difficulty: {difficulty}
- Preferred cuisines: {cuisines}
- Dietary restrictions: {restrictions}

Date: {date} ({season})

Consider consistency of seasoning and technique, seasonal ingredients, the user's tastes, visual harmony and nutritional balance.

Respond with a JSON object of exactly this shape:
{{
  \"theme_name\": \"theme name\",
  \"theme_description\": \"theme concept\",
  \"unified_meal_plan\": {{\"nutrition_score\": 0-100 number, \"confidence\": 0-1 number}},
  \"visual_style\": {{
    \"color_palette\": [\"colour 1\", \"colour 2\", \"colour 3\"],
    \"mood\": \"atmosphere\",
    \"presentation_style\": \"plating style\"
  }}
}}",
            recipes = recipes.join("\n"),
            max_time = prefs.max_cooking_time,
            difficulty = prefs.preferred_difficulty,
            cuisines = join_or_none(&prefs.preferred_cuisines),
            restrictions = join_or_none(&prefs.dietary_restrictions),
            date = request.current_date,
            season = season,
        )
    }
}

#[async_trait]
impl Stage for MealThemeStage {
    type Request = MealThemeRequest;
    type Output = MealThemeResult;

    fn kind(&self) -> StageKind {
        StageKind::MealTheme
    }

    fn validate(&self, request: &MealThemeRequest) -> Result<(), ValidationError> {
        if request.recipes.len() != 4 {
            return Err(ValidationError::RecipeCount {
                expected: "exactly 4".to_string(),
                actual: request.recipes.len(),
            });
        }
        // Slots are main, side, soup, staple.
        for (position, (dish, expected)) in request.recipes.iter().zip(DishCategory::ALL).enumerate() {
            if dish.category != expected {
                return Err(ValidationError::RecipeOrder {
                    position,
                    expected: expected.as_str(),
                    actual: dish.category.as_str(),
                });
            }
        }
        Ok(())
    }

    async fn execute(&self, request: &MealThemeRequest) -> anyhow::Result<MealThemeResult> {
        let season = Season::from_date(request.current_date);
        info!(household_id = %request.household_id, season = %season, "Determining meal theme");

        let dishes: [DishPlan; 4] = request
            .recipes
            .clone()
            .try_into()
            .map_err(|rest: Vec<DishPlan>| anyhow!("expected 4 recipes, got {}", rest.len()))?;
        let (fallback_name, fallback_description) = fallback_theme(&request.recipes, season);

        let prompt = self.build_prompt(request, season);
        let (theme_name, theme_description, visual_style, score, confidence, source) =
            match self.model.ask(&prompt).await {
                ModelReply::Parsed(reply) => {
                    let unified = field_object(&reply, "unified_meal_plan");
                    let read = |key: &str, default: f64, max: f64| {
                        unified.map_or(default, |u| field_f64(u, key, default, 0.0, max))
                    };
                    (
                        field_str(&reply, "theme_name").unwrap_or(fallback_name),
                        field_str(&reply, "theme_description").unwrap_or(fallback_description),
                        parse_visual_style(&reply),
                        read("nutrition_score", FALLBACK_NUTRITION_SCORE, 100.0),
                        read("confidence", FALLBACK_CONFIDENCE, 1.0),
                        ResultSource::Model,
                    )
                }
                ModelReply::Unusable(_) => (
                    fallback_name,
                    fallback_description,
                    VisualStyle::default(),
                    FALLBACK_NUTRITION_SCORE,
                    FALLBACK_CONFIDENCE,
                    ResultSource::Fallback,
                ),
            };

        Ok(MealThemeResult {
            theme_name,
            theme_description,
            unified_meal_plan: MealPlan::assemble(
                request.household_id.clone(),
                request.current_date,
                dishes,
                score,
                confidence,
            ),
            visual_style,
            season,
            source,
        })
    }
}
