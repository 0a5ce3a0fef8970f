use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::model_call::{field_str_list, FallbackReason, ModelCall, ModelReply};
use super::Stage;
use crate::api_connection::TextGenerator;
use crate::config::StageConfig;
use crate::error::{StageKind, ValidationError};
use crate::models::{normalize_category, ExpiryPriority, Ingredient, InventoryItem, ResultSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngredientAnalysisRequest {
    pub products: Vec<InventoryItem>,
    #[serde(default)]
    pub current_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngredientAnalysisResult {
    /// Sorted ascending by priority score, URGENT first.
    pub analyzed_ingredients: Vec<Ingredient>,
    /// URGENT and SOON ingredients.
    pub priority_ingredients: Vec<Ingredient>,
    /// URGENT ingredients only.
    pub expiring_soon: Vec<Ingredient>,
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub source: ResultSource,
}

#[derive(Debug, Clone)]
pub struct IngredientPriorityStage {
    model: ModelCall,
}

impl IngredientPriorityStage {
    pub fn new(generator: Arc<dyn TextGenerator>, config: StageConfig) -> Self {
        Self {
            model: ModelCall::new(StageKind::IngredientAnalysis, generator, config),
        }
    }
}

fn to_ingredient(item: &InventoryItem) -> Ingredient {
    Ingredient {
        name: item.name.clone(),
        quantity: item.quantity.to_string(),
        unit: item.unit.clone(),
        available: true,
        expiry_date: Some(item.expiry_date),
        shopping_required: false,
        product_id: Some(item.id.clone()),
        priority: ExpiryPriority::from_days_until_expiry(item.days_until_expiry),
        category: normalize_category(&item.category),
        image_url: item.image_url.clone(),
        notes: Some(format!("{} days until expiry", item.days_until_expiry)),
    }
}

/// Converts inventory into ingredients ordered by urgency. The sort is
/// stable, so items in the same band keep their inventory order.
pub fn prioritize(products: &[InventoryItem]) -> Vec<Ingredient> {
    let mut ingredients: Vec<Ingredient> = products.iter().map(to_ingredient).collect();
    ingredients.sort_by_key(Ingredient::priority_score);
    ingredients
}

pub fn fallback_recommendations(ingredients: &[Ingredient]) -> Vec<String> {
    let count = |band: ExpiryPriority| ingredients.iter().filter(|i| i.priority == band).count();
    let urgent = count(ExpiryPriority::Urgent);
    let soon = count(ExpiryPriority::Soon);

    let mut recommendations = Vec::new();
    if urgent > 0 {
        recommendations.push(format!("Use the {} urgent ingredient(s) first", urgent));
    }
    if soon > 0 {
        recommendations.push(format!(
            "Plan to cook the {} ingredient(s) expiring within 2-3 days",
            soon
        ));
    }
    recommendations.push("Combine vegetables and protein for a balanced menu".to_string());
    recommendations
}

fn priority_tag(priority: ExpiryPriority) -> &'static str {
    match priority {
        ExpiryPriority::Urgent => "[URGENT] ",
        ExpiryPriority::Soon => "[SOON] ",
        _ => "",
    }
}

fn build_prompt(ingredients: &[Ingredient], current_date: Option<NaiveDate>) -> String {
    let summary: Vec<String> = ingredients
        .iter()
        .map(|ing| {
            format!(
                "- {}{} {} {} ({}, {})",
                priority_tag(ing.priority),
                ing.name,
                ing.quantity,
                ing.unit,
                ing.category,
                ing.notes.as_deref().unwrap_or("expiry unknown")
            )
        })
        .collect();
    let date_line = current_date
        .map(|d| format!("Today is {}.\n", d))
        .unwrap_or_default();

    format!(
        "Analyse the following refrigerator inventory and give three concrete, practical recommendations for using it.
{date_line}
Inventory:
{inventory}

Respond with a JSON object of exactly this shape:
{{
  \"recommendations\": [\"recommendation 1\", \"recommendation 2\", \"recommendation 3\"]
}}
Every recommendation must be a double-quoted string. Prioritise [URGENT] and [SOON] items.",
        date_line = date_line,
        inventory = summary.join("\n"),
    )
}

#[async_trait]
impl Stage for IngredientPriorityStage {
    type Request = IngredientAnalysisRequest;
    type Output = IngredientAnalysisResult;

    fn kind(&self) -> StageKind {
        StageKind::IngredientAnalysis
    }

    fn validate(&self, request: &IngredientAnalysisRequest) -> Result<(), ValidationError> {
        if request.products.is_empty() {
            return Err(ValidationError::EmptyInventory);
        }
        Ok(())
    }

    async fn execute(&self, request: &IngredientAnalysisRequest) -> anyhow::Result<IngredientAnalysisResult> {
        info!(product_count = request.products.len(), "Analysing ingredients");
        let analyzed = prioritize(&request.products);

        let prompt = build_prompt(&analyzed, request.current_date);
        let (recommendations, source) = match self.model.ask(&prompt).await {
            ModelReply::Parsed(reply) => {
                let recommendations = field_str_list(&reply, "recommendations");
                if recommendations.is_empty() {
                    self.model
                        .note_fallback(&FallbackReason::Incomplete("recommendations".to_string()));
                    (fallback_recommendations(&analyzed), ResultSource::Fallback)
                } else {
                    (recommendations, ResultSource::Model)
                }
            }
            ModelReply::Unusable(_) => (fallback_recommendations(&analyzed), ResultSource::Fallback),
        };

        let priority_ingredients = analyzed
            .iter()
            .filter(|i| matches!(i.priority, ExpiryPriority::Urgent | ExpiryPriority::Soon))
            .cloned()
            .collect();
        let expiring_soon = analyzed
            .iter()
            .filter(|i| i.priority == ExpiryPriority::Urgent)
            .cloned()
            .collect();

        Ok(IngredientAnalysisResult {
            analyzed_ingredients: analyzed,
            priority_ingredients,
            expiring_soon,
            recommendations,
            source,
        })
    }
}
