use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

use super::ingredient_priority::IngredientAnalysisResult;
use super::model_call::{
    field_bool, field_f64, field_object, field_str, field_str_list, field_u32, FallbackReason,
    ModelCall, ModelReply,
};
use super::nutrition_balance::{join_or_none, NutritionAnalysisResult};
use super::Stage;
use crate::api_connection::TextGenerator;
use crate::config::StageConfig;
use crate::error::{StageKind, ValidationError};
use crate::models::{
    DifficultyLevel, DishCategory, DishPlan, ExpiryPriority, Ingredient, NutritionInfo,
    RecipeStep, ResultSource, UserPreferences, MAX_DISH_TIME, OTHER_CATEGORY,
};

const DEFAULT_DISH_TIME: u32 = 30;
const FALLBACK_TOTAL_TIME: u32 = 30;
const FALLBACK_SCORE: f64 = 80.0;
const FALLBACK_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeSuggestionRequest {
    pub ingredient_analysis: IngredientAnalysisResult,
    pub nutrition_analysis: NutritionAnalysisResult,
    #[serde(default, alias = "user_preferences")]
    pub preferences: UserPreferences,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeSuggestionResult {
    pub main_dish: DishPlan,
    pub side_dish: DishPlan,
    pub soup: DishPlan,
    #[serde(alias = "rice")]
    pub staple: DishPlan,
    pub total_cooking_time: u32,
    pub difficulty: DifficultyLevel,
    pub nutrition_score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub source: ResultSource,
}

impl RecipeSuggestionResult {
    /// The four dishes in main, side, soup, staple order.
    pub fn dishes(&self) -> Vec<DishPlan> {
        vec![
            self.main_dish.clone(),
            self.side_dish.clone(),
            self.soup.clone(),
            self.staple.clone(),
        ]
    }
}

/// An ingredient as named by a suggestion, before it is matched against
/// what is actually available.
#[derive(Debug, Clone, PartialEq)]
pub struct SuggestedIngredient {
    pub name: String,
    pub quantity: Option<String>,
    pub unit: Option<String>,
    pub available: Option<bool>,
    pub priority: Option<ExpiryPriority>,
}

impl SuggestedIngredient {
    fn template(name: &str, quantity: &str, unit: &str, priority: ExpiryPriority) -> Self {
        Self {
            name: name.to_string(),
            quantity: Some(quantity.to_string()),
            unit: Some(unit.to_string()),
            available: None,
            priority: Some(priority),
        }
    }
}

/// Exact-name lookup in the available list. A match is copied with the
/// suggested quantity, unit and availability; anything else is a new
/// ingredient that has to be bought.
pub fn resolve_ingredient(suggested: &SuggestedIngredient, available: &[Ingredient]) -> Ingredient {
    match available.iter().find(|i| i.name == suggested.name) {
        Some(found) => Ingredient {
            quantity: suggested.quantity.clone().unwrap_or_else(|| found.quantity.clone()),
            unit: suggested.unit.clone().unwrap_or_else(|| found.unit.clone()),
            available: suggested.available.unwrap_or(true),
            ..found.clone()
        },
        None => Ingredient {
            name: suggested.name.clone(),
            quantity: suggested.quantity.clone().unwrap_or_else(|| "as needed".to_string()),
            unit: suggested.unit.clone().unwrap_or_else(|| "g".to_string()),
            available: false,
            expiry_date: None,
            shopping_required: true,
            product_id: None,
            priority: suggested.priority.unwrap_or_default(),
            category: OTHER_CATEGORY.to_string(),
            image_url: None,
            notes: None,
        },
    }
}

fn parse_suggested_ingredients(dish: &Map<String, Value>) -> Vec<SuggestedIngredient> {
    let Some(Value::Array(entries)) = dish.get("ingredients") else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(name) if !name.trim().is_empty() => Some(SuggestedIngredient {
                name: name.trim().to_string(),
                quantity: None,
                unit: None,
                available: None,
                priority: None,
            }),
            Value::Object(fields) => Some(SuggestedIngredient {
                name: field_str(fields, "name")?,
                quantity: field_str(fields, "quantity"),
                unit: field_str(fields, "unit"),
                available: field_bool(fields, "available"),
                priority: field_str(fields, "priority").and_then(|p| ExpiryPriority::parse_lenient(&p)),
            }),
            _ => None,
        })
        .collect()
}

fn parse_nutrition(dish: &Map<String, Value>) -> NutritionInfo {
    let Some(info) = field_object(dish, "nutrition_info").or_else(|| field_object(dish, "nutrition")) else {
        return NutritionInfo::default();
    };
    let amount = |key: &str| field_f64(info, key, 0.0, 0.0, f64::MAX);
    NutritionInfo {
        calories: amount("calories"),
        protein: amount("protein"),
        carbohydrates: amount("carbohydrates"),
        fat: amount("fat"),
        fiber: amount("fiber"),
        sugar: amount("sugar"),
        sodium: amount("sodium"),
    }
}

/// Reads one dish leniently. Returns `None` when the dish has no name.
fn parse_dish(dish: &Map<String, Value>, category: DishCategory, available: &[Ingredient]) -> Option<DishPlan> {
    let name = field_str(dish, "name")?;
    let recipe = field_object(dish, "recipe");
    let list = |key: &str| {
        recipe
            .map(|r| field_str_list(r, key))
            .filter(|items| !items.is_empty())
            .unwrap_or_else(|| field_str_list(dish, key))
    };

    let ingredients = parse_suggested_ingredients(dish)
        .iter()
        .map(|suggested| resolve_ingredient(suggested, available))
        .collect();

    Some(DishPlan {
        name,
        category,
        description: field_str(dish, "description").unwrap_or_default(),
        ingredients,
        steps: RecipeStep::numbered(list("steps")),
        tips: list("tips"),
        cooking_time: field_u32(dish, "cooking_time", DEFAULT_DISH_TIME, 1, MAX_DISH_TIME),
        prep_time: 10,
        serving_size: 4,
        difficulty: field_str(dish, "difficulty")
            .and_then(|d| DifficultyLevel::parse_lenient(&d))
            .unwrap_or_default(),
        nutrition: parse_nutrition(dish),
        image_url: None,
    })
}

fn parse_suggestion(
    reply: &Map<String, Value>,
    available: &[Ingredient],
) -> Result<RecipeSuggestionResult, FallbackReason> {
    let dish = |category: DishCategory| -> Result<DishPlan, FallbackReason> {
        let key = category.reply_key();
        let object = field_object(reply, key)
            .or_else(|| match category {
                DishCategory::Staple => field_object(reply, "rice"),
                _ => None,
            })
            .ok_or_else(|| FallbackReason::Incomplete(format!("missing {}", key)))?;
        parse_dish(object, category, available)
            .ok_or_else(|| FallbackReason::Incomplete(format!("{} has no name", key)))
    };

    let main_dish = dish(DishCategory::Main)?;
    let side_dish = dish(DishCategory::Side)?;
    let soup = dish(DishCategory::Soup)?;
    let staple = dish(DishCategory::Staple)?;

    let dishes = [&main_dish, &side_dish, &soup, &staple];
    let time_sum: u32 = dishes.iter().map(|d| d.cooking_time).sum();
    let mean_difficulty =
        dishes.iter().map(|d| f64::from(d.difficulty.score())).sum::<f64>() / dishes.len() as f64;

    Ok(RecipeSuggestionResult {
        total_cooking_time: field_u32(reply, "total_cooking_time", time_sum.max(1), 1, MAX_DISH_TIME * 4),
        difficulty: field_str(reply, "difficulty")
            .and_then(|d| DifficultyLevel::parse_lenient(&d))
            .unwrap_or_else(|| DifficultyLevel::from_mean_score(mean_difficulty)),
        nutrition_score: field_f64(reply, "nutrition_score", FALLBACK_SCORE, 0.0, 100.0),
        confidence: field_f64(reply, "confidence", FALLBACK_CONFIDENCE, 0.0, 1.0),
        main_dish,
        side_dish,
        soup,
        staple,
        source: ResultSource::Model,
    })
}

struct DishTemplate<'a> {
    category: DishCategory,
    name: String,
    description: String,
    cooking_time: u32,
    ingredient: SuggestedIngredient,
    steps: &'a [&'a str],
    tips: &'a [&'a str],
    nutrition: NutritionInfo,
}

impl DishTemplate<'_> {
    fn build(self, available: &[Ingredient]) -> DishPlan {
        DishPlan {
            name: self.name,
            category: self.category,
            description: self.description,
            ingredients: vec![resolve_ingredient(&self.ingredient, available)],
            steps: RecipeStep::numbered(self.steps.iter().copied()),
            tips: self.tips.iter().map(|t| t.to_string()).collect(),
            cooking_time: self.cooking_time,
            prep_time: 10,
            serving_size: 4,
            difficulty: DifficultyLevel::Easy,
            nutrition: self.nutrition,
            image_url: None,
        }
    }
}

/// Generic stir-fry around the most urgent ingredient plus fixed side, soup
/// and staple templates.
pub fn fallback_suggestion(analysis: &IngredientAnalysisResult) -> RecipeSuggestionResult {
    let available = &analysis.analyzed_ingredients;
    let basis = available
        .iter()
        .find(|i| matches!(i.priority, ExpiryPriority::Urgent | ExpiryPriority::Soon))
        .or_else(|| available.first());

    let (main_name, main_description, main_ingredient) = match basis {
        Some(ingredient) => (
            format!("{} stir-fry", ingredient.name),
            format!("Nutritious stir-fry made with {}", ingredient.name),
            SuggestedIngredient::template(&ingredient.name, "as needed", "g", ingredient.priority),
        ),
        None => (
            "Vegetable stir-fry".to_string(),
            "Colourful mixed vegetable stir-fry".to_string(),
            SuggestedIngredient::template("vegetables", "as needed", "g", ExpiryPriority::Fresh),
        ),
    };

    let main_dish = DishTemplate {
        category: DishCategory::Main,
        name: main_name,
        description: main_description,
        cooking_time: 15,
        ingredient: main_ingredient,
        steps: &["Cut the ingredients", "Stir-fry in a hot pan", "Season to taste"],
        tips: &["Stir-fry over high heat for a short time", "Add soy sauce at the end"],
        nutrition: NutritionInfo::macros(200.0, 15.0, 10.0, 8.0),
    }
    .build(available);

    let side_dish = DishTemplate {
        category: DishCategory::Side,
        name: "Green salad".to_string(),
        description: "Fresh vegetable salad".to_string(),
        cooking_time: 5,
        ingredient: SuggestedIngredient::template("lettuce", "1", "head", ExpiryPriority::Fresh),
        steps: &["Wash the vegetables", "Cut into bite-sized pieces", "Add dressing"],
        tips: &["Drain the leaves well", "Dress just before serving"],
        nutrition: NutritionInfo::macros(50.0, 2.0, 8.0, 1.0),
    }
    .build(available);

    let soup = DishTemplate {
        category: DishCategory::Soup,
        name: "Miso soup".to_string(),
        description: "Hearty miso soup".to_string(),
        cooking_time: 10,
        ingredient: SuggestedIngredient::template("tofu", "1/2", "block", ExpiryPriority::Fresh),
        steps: &["Make the dashi stock", "Add the ingredients", "Dissolve the miso"],
        tips: &["Add the miso last", "Do not let it boil"],
        nutrition: NutritionInfo::macros(80.0, 5.0, 6.0, 3.0),
    }
    .build(available);

    let staple = DishTemplate {
        category: DishCategory::Staple,
        name: "Steamed rice".to_string(),
        description: "Fluffy steamed white rice".to_string(),
        cooking_time: 30,
        ingredient: SuggestedIngredient::template("rice", "2", "cup", ExpiryPriority::LongTerm),
        steps: &["Rinse the rice", "Adjust the water", "Cook in a rice cooker"],
        tips: &["Rinse thoroughly", "Measure the water precisely"],
        nutrition: NutritionInfo::macros(300.0, 6.0, 65.0, 1.0),
    }
    .build(available);

    RecipeSuggestionResult {
        main_dish,
        side_dish,
        soup,
        staple,
        total_cooking_time: FALLBACK_TOTAL_TIME,
        difficulty: DifficultyLevel::Easy,
        nutrition_score: FALLBACK_SCORE,
        confidence: FALLBACK_CONFIDENCE,
        source: ResultSource::Fallback,
    }
}

#[derive(Debug, Clone)]
pub struct RecipeSuggestionStage {
    model: ModelCall,
}

impl RecipeSuggestionStage {
    pub fn new(generator: Arc<dyn TextGenerator>, config: StageConfig) -> Self {
        Self {
            model: ModelCall::new(StageKind::RecipeSuggestion, generator, config),
        }
    }

    fn build_prompt(&self, request: &RecipeSuggestionRequest) -> String {
        let ingredients: Vec<String> = request
            .ingredient_analysis
            .analyzed_ingredients
            .iter()
            .map(|i| {
                let tag = match i.priority {
                    ExpiryPriority::Urgent => "[URGENT] ",
                    ExpiryPriority::Soon => "[SOON] ",
                    _ => "",
                };
                format!("- {}{} {} {} ({})", tag, i.name, i.quantity, i.unit, i.category)
            })
            .collect();
        let prefs = &request.preferences;
        let nutrients: Vec<String> = request
            .nutrition_analysis
            .recommended_nutrients
            .iter()
            .map(|(name, grams)| format!("{} {:.0} g", name, grams))
            .collect();

        format!(
            "You are a cooking expert. Suggest a home-cooked meal of exactly four dishes: a main dish, a side dish, a soup and a staple.
Principles:
1. Use ingredients marked [URGENT] and [SOON] first.
2. Keep the meal nutritionally balanced.
3. Respect the cooking time and difficulty limits.

Available ingredients:
{ingredients}

Preferences:
- Max cooking time: {max_time} minutes
- Difficulty: {difficulty}
- Dietary restrictions: {restrictions}
- Allergies: {allergies}
- Disliked ingredients: {disliked}
- Preferred cuisines: {cuisines}

Nutrition: current score {score:.0}; recommended {nutrients}

Respond with a JSON object of exactly this shape:
{{
  \"main_dish\": {{
    \"name\": \"dish name\",
    \"description\": \"short description\",
    \"cooking_time\": minutes,
    \"difficulty\": \"easy|medium|hard|expert\",
    \"ingredients\": [{{\"name\": \"onion\", \"quantity\": \"1\", \"unit\": \"pc\", \"available\": true, \"priority\": \"urgent|soon|fresh|long_term\"}}],
    \"recipe\": {{\"steps\": [\"step 1\", \"step 2\"], \"tips\": [\"tip 1\"]}},
    \"nutrition_info\": {{\"calories\": number, \"protein\": grams, \"carbohydrates\": grams, \"fat\": grams}}
  }},
  \"side_dish\": {{ same structure }},
  \"soup\": {{ same structure }},
  \"staple\": {{ same structure }},
  \"total_cooking_time\": minutes,
  \"difficulty\": \"easy|medium|hard|expert\",
  \"nutrition_score\": 0-100 number,
  \"confidence\": 0-1 number
}}
Rules: text fields are double-quoted strings; numeric fields are unquoted numbers; \"available\" is true or false.
Use the exact ingredient names from the list when you use an available ingredient.",
            ingredients = ingredients.join("\n"),
            max_time = prefs.max_cooking_time,
            difficulty = prefs.preferred_difficulty,
            restrictions = join_or_none(&prefs.dietary_restrictions),
            allergies = join_or_none(&prefs.allergies),
            disliked = join_or_none(&prefs.disliked_ingredients),
            cuisines = join_or_none(&prefs.preferred_cuisines),
            score = request.nutrition_analysis.nutrition_score,
            nutrients = if nutrients.is_empty() { "n/a".to_string() } else { nutrients.join(", ") },
        )
    }
}

#[async_trait]
impl Stage for RecipeSuggestionStage {
    type Request = RecipeSuggestionRequest;
    type Output = RecipeSuggestionResult;

    fn kind(&self) -> StageKind {
        StageKind::RecipeSuggestion
    }

    fn validate(&self, request: &RecipeSuggestionRequest) -> Result<(), ValidationError> {
        if request.ingredient_analysis.analyzed_ingredients.is_empty() {
            return Err(ValidationError::EmptyIngredients);
        }
        request.preferences.validate()
    }

    async fn execute(&self, request: &RecipeSuggestionRequest) -> anyhow::Result<RecipeSuggestionResult> {
        info!(
            ingredient_count = request.ingredient_analysis.analyzed_ingredients.len(),
            nutrition_score = request.nutrition_analysis.nutrition_score,
            "Suggesting recipes"
        );

        let prompt = self.build_prompt(request);
        let available = &request.ingredient_analysis.analyzed_ingredients;
        let result = match self.model.ask(&prompt).await {
            ModelReply::Parsed(reply) => parse_suggestion(&reply, available).unwrap_or_else(|reason| {
                self.model.note_fallback(&reason);
                fallback_suggestion(&request.ingredient_analysis)
            }),
            ModelReply::Unusable(_) => fallback_suggestion(&request.ingredient_analysis),
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_connection::fake::{FakeModel, FakeReply};
    use crate::models::InventoryItem;
    use crate::stages::ingredient_priority::prioritize;
    use crate::stages::nutrition_balance::{estimate_nutrition, fallback_analysis};
    use chrono::NaiveDate;

    fn analysis(items: &[(&str, &str, i64)]) -> IngredientAnalysisResult {
        let products: Vec<InventoryItem> = items
            .iter()
            .map(|(name, category, days)| InventoryItem {
                id: format!("p-{}", name),
                name: name.to_string(),
                category: category.to_string(),
                quantity: 2.0,
                unit: "pc".to_string(),
                expiry_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                days_until_expiry: *days,
                image_url: None,
            })
            .collect();
        let analyzed = prioritize(&products);
        IngredientAnalysisResult {
            priority_ingredients: vec![],
            expiring_soon: vec![],
            recommendations: vec![],
            analyzed_ingredients: analyzed,
            source: ResultSource::Fallback,
        }
    }

    fn request(analysis: IngredientAnalysisResult) -> RecipeSuggestionRequest {
        let nutrition = fallback_analysis(&estimate_nutrition(&analysis.analyzed_ingredients));
        RecipeSuggestionRequest {
            ingredient_analysis: analysis,
            nutrition_analysis: nutrition,
            preferences: UserPreferences::default(),
        }
    }

    fn stage(model: FakeModel) -> RecipeSuggestionStage {
        RecipeSuggestionStage::new(Arc::new(model), StageConfig::new("fake", 0.7, 100))
    }

    fn dish_json(name: &str, minutes: i64, ingredients: &str) -> String {
        format!(
            r#"{{"name": "{}", "description": "d", "cooking_time": {}, "difficulty": "medium",
                "ingredients": {},
                "recipe": {{"steps": ["one", "two"], "tips": ["tip"]}},
                "nutrition_info": {{"calories": 120, "protein": "9", "carbohydrates": -4, "fat": 3}}}}"#,
            name, minutes, ingredients
        )
    }

    #[test]
    fn test_fallback_uses_most_urgent_ingredient() {
        let analysis = analysis(&[("cabbage", "vegetables", 9), ("chicken", "meat", 1)]);
        let result = fallback_suggestion(&analysis);

        assert_eq!(result.main_dish.name, "chicken stir-fry");
        let chicken = &result.main_dish.ingredients[0];
        assert!(chicken.available);
        assert!(!chicken.shopping_required);
        assert_eq!(chicken.product_id.as_deref(), Some("p-chicken"));
        assert_eq!(chicken.quantity, "as needed");

        let lettuce = &result.side_dish.ingredients[0];
        assert!(!lettuce.available);
        assert!(lettuce.shopping_required);
        assert_eq!(lettuce.category, OTHER_CATEGORY);

        assert_eq!(result.staple.category, DishCategory::Staple);
        assert_eq!(result.total_cooking_time, 30);
        assert_eq!(result.nutrition_score, 80.0);
        assert_eq!(result.confidence, 0.8);
        assert_eq!(result.source, ResultSource::Fallback);
    }

    #[test]
    fn test_fallback_without_urgent_items_uses_first_ingredient() {
        let result = fallback_suggestion(&analysis(&[("onion", "vegetables", 20), ("leek", "vegetables", 12)]));
        assert_eq!(result.main_dish.name, "onion stir-fry");
    }

    #[test]
    fn test_resolution_copies_available_ingredient() {
        let available = analysis(&[("egg", "dairy", 2)]).analyzed_ingredients;
        let suggested = SuggestedIngredient {
            name: "egg".to_string(),
            quantity: Some("3".to_string()),
            unit: None,
            available: None,
            priority: None,
        };
        let resolved = resolve_ingredient(&suggested, &available);
        assert_eq!(resolved.quantity, "3");
        assert_eq!(resolved.unit, "pc");
        assert_eq!(resolved.priority, ExpiryPriority::Soon);
        assert_eq!(resolved.category, "dairy");
    }

    #[test]
    fn test_resolution_is_exact_name_match() {
        let available = analysis(&[("Egg", "dairy", 2)]).analyzed_ingredients;
        let suggested = SuggestedIngredient::template("egg", "1", "pc", ExpiryPriority::Urgent);
        let resolved = resolve_ingredient(&suggested, &available);
        assert!(resolved.shopping_required);
        assert!(!resolved.available);
        assert_eq!(resolved.priority, ExpiryPriority::Urgent);
    }

    #[tokio::test]
    async fn test_model_reply_is_parsed_and_clamped() {
        let reply = format!(
            r#"Here you go: {{"main_dish": {}, "side_dish": {}, "soup": {}, "rice": {},
                "total_cooking_time": 0, "difficulty": "weird", "nutrition_score": 90, "confidence": 1.7}}"#,
            dish_json("Ginger pork", 20, r#"[{"name": "pork", "quantity": "200", "unit": "g", "available": true}]"#),
            dish_json("Spinach", 0, r#"["spinach"]"#),
            dish_json("Clear soup", 10, "[]"),
            dish_json("Rice", 30, "[]"),
        );
        let model = FakeModel::new().with_default_reply(FakeReply::Text(reply));
        let result = stage(model)
            .process(request(analysis(&[("pork", "meat", 1)])))
            .await
            .unwrap();

        assert_eq!(result.source, ResultSource::Model);
        assert_eq!(result.main_dish.name, "Ginger pork");
        assert_eq!(result.main_dish.ingredients[0].quantity, "200");
        assert!(!result.main_dish.ingredients[0].shopping_required);
        assert!(result.side_dish.ingredients[0].shopping_required);
        assert_eq!(result.side_dish.cooking_time, 1);
        assert_eq!(result.staple.name, "Rice");
        assert_eq!(result.main_dish.steps[1].step_number, 2);
        assert_eq!(result.main_dish.nutrition.protein, 9.0);
        assert_eq!(result.main_dish.nutrition.carbohydrates, 0.0);
        assert_eq!(result.total_cooking_time, 1);
        assert_eq!(result.difficulty, DifficultyLevel::Medium);
        assert_eq!(result.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_missing_dish_falls_back() {
        let reply = format!(
            r#"{{"main_dish": {}, "side_dish": {}, "staple": {}}}"#,
            dish_json("A", 10, "[]"),
            dish_json("B", 10, "[]"),
            dish_json("C", 10, "[]"),
        );
        let model = FakeModel::new().with_default_reply(FakeReply::Text(reply));
        let result = stage(model)
            .process(request(analysis(&[("pork", "meat", 1)])))
            .await
            .unwrap();
        assert_eq!(result.source, ResultSource::Fallback);
        assert_eq!(result.main_dish.name, "pork stir-fry");
    }

    #[tokio::test]
    async fn test_unavailable_model_falls_back() {
        let result = stage(FakeModel::unavailable())
            .process(request(analysis(&[("tofu", "dairy", 0)])))
            .await
            .unwrap();
        assert_eq!(result.source, ResultSource::Fallback);
        assert_eq!(result.dishes().len(), 4);
    }
}
