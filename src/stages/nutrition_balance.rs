use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

use super::model_call::{as_f64, field_f64, field_object, field_str_list, ModelCall, ModelReply};
use super::Stage;
use crate::api_connection::TextGenerator;
use crate::config::StageConfig;
use crate::error::{StageKind, ValidationError};
use crate::models::{normalize_category, Ingredient, ResultSource, UserPreferences};

const DEFAULT_MODEL_SCORE: f64 = 75.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NutritionAnalysisRequest {
    pub ingredients: Vec<Ingredient>,
    #[serde(default, alias = "user_preferences")]
    pub preferences: UserPreferences,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NutritionAnalysisResult {
    pub nutrition_score: f64,
    pub recommended_nutrients: BTreeMap<String, f64>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub source: ResultSource,
}

/// Coarse per-category estimate summed over all ingredients.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NutritionEstimate {
    pub calories: f64,
    pub protein: f64,
    pub carbohydrates: f64,
    pub fat: f64,
    pub distinct_categories: usize,
}

pub fn estimate_nutrition(ingredients: &[Ingredient]) -> NutritionEstimate {
    let mut estimate = NutritionEstimate::default();
    let mut categories = BTreeSet::new();

    for ingredient in ingredients {
        let category = normalize_category(&ingredient.category);
        // (kcal, protein g, carbohydrate g, fat g)
        let (calories, protein, carbohydrates, fat) = match category.as_str() {
            "vegetables" | "fruits" => (25.0, 0.0, 5.0, 0.0),
            "meat" | "fish" => (200.0, 20.0, 0.0, 10.0),
            "dairy" => (150.0, 8.0, 0.0, 8.0),
            "grains" => (350.0, 0.0, 75.0, 0.0),
            _ => (100.0, 0.0, 15.0, 0.0),
        };
        estimate.calories += calories;
        estimate.protein += protein;
        estimate.carbohydrates += carbohydrates;
        estimate.fat += fat;
        categories.insert(category);
    }

    estimate.distinct_categories = categories.len();
    estimate
}

pub fn default_recommended_nutrients() -> BTreeMap<String, f64> {
    [
        ("protein", 60.0),
        ("carbohydrates", 200.0),
        ("fat", 50.0),
        ("fiber", 25.0),
    ]
    .into_iter()
    .map(|(name, grams)| (name.to_string(), grams))
    .collect()
}

pub fn fallback_score(estimate: &NutritionEstimate) -> f64 {
    let diversity = (estimate.distinct_categories as f64 * 15.0).min(100.0);
    let protein = (estimate.protein * 2.0).min(30.0);
    let carbohydrates = (estimate.carbohydrates / 5.0).min(30.0);
    let fat = (estimate.fat * 3.0).min(30.0);
    (diversity + protein + carbohydrates + fat).min(100.0)
}

pub fn fallback_analysis(estimate: &NutritionEstimate) -> NutritionAnalysisResult {
    let mut warnings = Vec::new();
    let mut suggestions = Vec::new();

    if estimate.protein < 30.0 {
        warnings.push(format!("Protein is low ({:.0} g)", estimate.protein));
        suggestions.push("Add meat, fish, eggs or tofu".to_string());
    }
    if estimate.carbohydrates < 100.0 {
        warnings.push(format!("Carbohydrates are low ({:.0} g)", estimate.carbohydrates));
        suggestions.push("Add rice, bread or noodles".to_string());
    }
    if estimate.distinct_categories < 4 {
        warnings.push(format!(
            "Only {} food group(s) available",
            estimate.distinct_categories
        ));
        suggestions.push("Add ingredients from more food groups".to_string());
    }
    if warnings.is_empty() {
        suggestions.push("Nutritional balance looks good".to_string());
    }

    NutritionAnalysisResult {
        nutrition_score: fallback_score(estimate),
        recommended_nutrients: default_recommended_nutrients(),
        warnings,
        suggestions,
        source: ResultSource::Fallback,
    }
}

#[derive(Debug, Clone)]
pub struct NutritionBalanceStage {
    model: ModelCall,
}

impl NutritionBalanceStage {
    pub fn new(generator: Arc<dyn TextGenerator>, config: StageConfig) -> Self {
        Self {
            model: ModelCall::new(StageKind::NutritionBalance, generator, config),
        }
    }

    fn build_prompt(&self, request: &NutritionAnalysisRequest, estimate: &NutritionEstimate) -> String {
        let ingredient_lines: Vec<String> = request
            .ingredients
            .iter()
            .map(|i| format!("- {} {} {} ({})", i.name, i.quantity, i.unit, i.category))
            .collect();
        let prefs = &request.preferences;

        format!(
            "Assess the nutritional balance of a meal built from these ingredients.

Ingredients:
{ingredients}

Rough estimate: {calories:.0} kcal, protein {protein:.0} g, carbohydrates {carbs:.0} g, fat {fat:.0} g, {categories} food group(s).
Dietary restrictions: {restrictions}
Allergies: {allergies}

Respond with a JSON object of exactly this shape:
{{
  \"nutrition_score\": 0-100 number,
  \"recommended_nutrients\": {{\"protein\": grams, \"carbohydrates\": grams, \"fat\": grams, \"fiber\": grams}},
  \"warnings\": [\"warning\"],
  \"suggestions\": [\"suggestion\"]
}}
Numbers must not be quoted. Text must be double-quoted strings.",
            ingredients = ingredient_lines.join("\n"),
            calories = estimate.calories,
            protein = estimate.protein,
            carbs = estimate.carbohydrates,
            fat = estimate.fat,
            categories = estimate.distinct_categories,
            restrictions = join_or_none(&prefs.dietary_restrictions),
            allergies = join_or_none(&prefs.allergies),
        )
    }
}

pub(crate) fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

#[async_trait]
impl Stage for NutritionBalanceStage {
    type Request = NutritionAnalysisRequest;
    type Output = NutritionAnalysisResult;

    fn kind(&self) -> StageKind {
        StageKind::NutritionBalance
    }

    fn validate(&self, request: &NutritionAnalysisRequest) -> Result<(), ValidationError> {
        if request.ingredients.is_empty() {
            return Err(ValidationError::EmptyIngredients);
        }
        request.preferences.validate()
    }

    async fn execute(&self, request: &NutritionAnalysisRequest) -> anyhow::Result<NutritionAnalysisResult> {
        let estimate = estimate_nutrition(&request.ingredients);
        info!(
            ingredient_count = request.ingredients.len(),
            categories = estimate.distinct_categories,
            "Analysing nutrition balance"
        );

        let prompt = self.build_prompt(request, &estimate);
        let result = match self.model.ask(&prompt).await {
            ModelReply::Parsed(reply) => {
                let recommended_nutrients = field_object(&reply, "recommended_nutrients")
                    .map(|nutrients| {
                        nutrients
                            .iter()
                            .filter_map(|(name, value)| as_f64(value).map(|v| (name.clone(), v.max(0.0))))
                            .collect()
                    })
                    .unwrap_or_default();
                NutritionAnalysisResult {
                    nutrition_score: field_f64(&reply, "nutrition_score", DEFAULT_MODEL_SCORE, 0.0, 100.0),
                    recommended_nutrients,
                    warnings: field_str_list(&reply, "warnings"),
                    suggestions: field_str_list(&reply, "suggestions"),
                    source: ResultSource::Model,
                }
            }
            ModelReply::Unusable(_) => fallback_analysis(&estimate),
        };
        Ok(result)
    }
}
