use anyhow::anyhow;
use async_trait::async_trait;
use chrono::NaiveDate;
use meal_planner::api_connection::fake::{FakeModel, FakeReply};
use meal_planner::config::Settings;
use meal_planner::error::{MealPlannerError, StageKind};
use meal_planner::models::{
    AlternativesRequest, DifficultyLevel, DishCategory, InventoryItem, MealPlanningRequest, UserPreferences,
    MAX_DISH_TIME,
};
use meal_planner::planner::{MealPlanner, Stages};
use meal_planner::stages::image_generation::{placeholder_url, ImageGenerationRequest, ImageGenerationResult};
use meal_planner::stages::nutrition_balance::{NutritionAnalysisRequest, NutritionAnalysisResult};
use meal_planner::stages::Stage;
use std::sync::Arc;

const RECIPE_PROMPT_MARKER: &str = "Suggest a home-cooked meal";
const IMAGE_URL: &str = "https://cdn.example.com/dish.png";

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

fn item(id: &str, name: &str, category: &str, days: i64) -> InventoryItem {
    InventoryItem {
        id: id.to_string(),
        name: name.to_string(),
        category: category.to_string(),
        quantity: 2.0,
        unit: "pc".to_string(),
        expiry_date: today() + chrono::Duration::days(days),
        days_until_expiry: days,
        image_url: None,
    }
}

fn request(inventory: Vec<InventoryItem>) -> MealPlanningRequest {
    MealPlanningRequest {
        inventory,
        household_id: "household-42".to_string(),
        preferences: UserPreferences::default(),
    }
}

fn fridge() -> Vec<InventoryItem> {
    vec![
        item("p1", "cabbage", "vegetables", 10),
        item("p2", "pork", "meat", 5),
        item("p3", "egg", "dairy", 0),
        item("p4", "carrot", "vegetables", 2),
    ]
}

fn planner(text: Arc<FakeModel>, images: Arc<FakeModel>, settings: &Settings) -> MealPlanner {
    MealPlanner::new(text, images, settings)
}

#[derive(Debug)]
struct OfflineNutrition;

#[async_trait]
impl Stage for OfflineNutrition {
    type Request = NutritionAnalysisRequest;
    type Output = NutritionAnalysisResult;

    fn kind(&self) -> StageKind {
        StageKind::NutritionBalance
    }

    async fn execute(&self, _request: &NutritionAnalysisRequest) -> anyhow::Result<NutritionAnalysisResult> {
        Err(anyhow!("nutrition tables could not be loaded"))
    }
}

#[derive(Debug)]
struct OfflineImages;

#[async_trait]
impl Stage for OfflineImages {
    type Request = ImageGenerationRequest;
    type Output = ImageGenerationResult;

    fn kind(&self) -> StageKind {
        StageKind::ImageGeneration
    }

    async fn execute(&self, _request: &ImageGenerationRequest) -> anyhow::Result<ImageGenerationResult> {
        Err(anyhow!("image backend rejected the batch"))
    }
}

fn image_model() -> Arc<FakeModel> {
    Arc::new(FakeModel::new().with_default_reply(FakeReply::Image(IMAGE_URL.to_string())))
}

#[tokio::test]
async fn test_unavailable_model_still_produces_a_plan() {
    let planner = planner(Arc::new(FakeModel::unavailable()), image_model(), &Settings::default());
    let response = planner.suggest_on(&request(fridge()), today()).await.unwrap();

    let plan = &response.meal_plan;
    assert_eq!(plan.household_id, "household-42");
    assert_eq!(plan.date, today());
    // The most urgent item (0 days) anchors the main dish.
    assert_eq!(plan.main_dish.name, "egg stir-fry");
    assert_eq!(plan.staple.category, DishCategory::Staple);
    assert_eq!(plan.total_cooking_time, plan.dishes().iter().map(|d| d.cooking_time).sum::<u32>());
    assert_eq!(plan.difficulty, DifficultyLevel::Easy);
    assert_eq!(plan.confidence, 0.8);
    assert!((0.0..=100.0).contains(&plan.nutrition_score));
    assert!(plan.dishes().iter().all(|d| d.image_url.as_deref() == Some(IMAGE_URL)));

    assert_eq!(
        response.stages_used,
        vec![
            "ingredient_analysis",
            "nutrition_balance",
            "recipe_suggestion",
            "cooking_optimization",
            "meal_theme",
            "image_generation",
        ]
    );

    let shopping: Vec<&str> = response.shopping_list.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(shopping, vec!["lettuce", "tofu", "rice"]);
}

#[tokio::test]
async fn test_garbage_replies_fall_back_everywhere() {
    let text = Arc::new(FakeModel::new().with_default_reply(FakeReply::Text(
        "Sorry, I'd rather talk about the weather. {not json".to_string(),
    )));
    let planner = planner(text.clone(), image_model(), &Settings::default());
    let response = planner.suggest_on(&request(fridge()), today()).await.unwrap();

    assert_eq!(response.meal_plan.main_dish.name, "egg stir-fry");
    // One text prompt per text stage: ingredients, nutrition, recipes, cooking, theme.
    assert_eq!(text.prompts().len(), 5);
}

#[tokio::test]
async fn test_fallback_optimization_shapes_the_final_plan() {
    let planner = planner(Arc::new(FakeModel::unavailable()), image_model(), &Settings::default());
    let response = planner.suggest_on(&request(fridge()), today()).await.unwrap();

    // Fallback templates are 15/5/10/30 minutes, shortened by a fifth with a five minute floor.
    let times: Vec<u32> = response.meal_plan.dishes().iter().map(|d| d.cooking_time).collect();
    assert_eq!(times, vec![12, 5, 8, 24]);
    assert_eq!(response.meal_plan.total_cooking_time, 49);
    assert!(response
        .meal_plan
        .main_dish
        .tips
        .contains(&"Prepare all ingredients in advance".to_string()));
}

#[tokio::test]
async fn test_urgency_bands_drive_the_main_dish() {
    let inventory = vec![
        item("a", "leek", "vegetables", 10),
        item("b", "salmon", "fish", 5),
        item("c", "spinach", "vegetables", 2),
        item("d", "tofu", "soy", 0),
    ];
    let planner = planner(Arc::new(FakeModel::unavailable()), image_model(), &Settings::default());
    let response = planner.suggest_on(&request(inventory), today()).await.unwrap();

    assert_eq!(response.meal_plan.main_dish.name, "tofu stir-fry");
    let tofu = &response.meal_plan.main_dish.ingredients[0];
    assert_eq!(tofu.product_id.as_deref(), Some("d"));
    assert!(!tofu.shopping_required);
    // Soup template uses tofu too, and it is on hand, so nothing is bought for it.
    let shopping: Vec<&str> = response.shopping_list.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(shopping, vec!["lettuce", "rice"]);
}

#[tokio::test]
async fn test_image_failure_is_isolated_to_one_dish() {
    let images = Arc::new(
        FakeModel::new()
            .with_reply("of Miso soup", FakeReply::Fail("content filtered".to_string()))
            .with_default_reply(FakeReply::Image(IMAGE_URL.to_string())),
    );
    let planner = planner(Arc::new(FakeModel::unavailable()), images.clone(), &Settings::default());
    let response = planner.suggest_on(&request(fridge()), today()).await.unwrap();

    let plan = &response.meal_plan;
    assert_eq!(plan.soup.image_url, Some(placeholder_url("Miso soup")));
    assert_eq!(plan.main_dish.image_url.as_deref(), Some(IMAGE_URL));
    assert_eq!(plan.staple.image_url.as_deref(), Some(IMAGE_URL));
    assert_eq!(images.prompts().len(), 4);
    assert!(response.stages_used.contains(&"image_generation".to_string()));
}

#[tokio::test]
async fn test_disabled_images_skip_the_stage() {
    let settings = Settings {
        generate_images: false,
        ..Settings::default()
    };
    let images = image_model();
    let planner = planner(Arc::new(FakeModel::unavailable()), images.clone(), &settings);
    let response = planner.suggest_on(&request(fridge()), today()).await.unwrap();

    assert!(images.prompts().is_empty());
    assert!(!response.stages_used.contains(&"image_generation".to_string()));
    assert!(response.meal_plan.dishes().iter().all(|d| d.image_url.is_none()));
}

#[tokio::test]
async fn test_model_plan_uses_stage_scores_and_keeps_duplicate_shopping_items() {
    let dish = |name: &str, minutes: u32| {
        format!(
            r#"{{"name": "{}", "description": "d", "cooking_time": {}, "difficulty": "easy",
                "ingredients": [{{"name": "ginger", "quantity": "1", "unit": "knob"}}, {{"name": "pork", "quantity": "200", "unit": "g"}}],
                "recipe": {{"steps": ["cook"], "tips": []}}}}"#,
            name, minutes
        )
    };
    let recipe_reply = format!(
        r#"{{"main_dish": {}, "side_dish": {}, "soup": {}, "staple": {}, "nutrition_score": 70, "confidence": 0.9}}"#,
        dish("Ginger pork", 20),
        dish("Pickled ginger", 5),
        dish("Ginger broth", 15),
        dish("Ginger rice", 30),
    );
    let text = Arc::new(
        FakeModel::new()
            .with_reply(RECIPE_PROMPT_MARKER, FakeReply::Text(recipe_reply))
            .with_reply("Assess the nutritional balance", FakeReply::Text(r#"{"nutrition_score": 64}"#.to_string()))
            .with_reply(
                "meal themes and concepts",
                FakeReply::Text(r#"{"theme_name": "Ginger night", "unified_meal_plan": {"nutrition_score": 99, "confidence": 0.1}}"#.to_string()),
            )
            .with_default_reply(FakeReply::Fail("offline".to_string())),
    );
    let planner = planner(text, image_model(), &Settings::default());
    let response = planner.suggest_on(&request(fridge()), today()).await.unwrap();

    let plan = &response.meal_plan;
    assert_eq!(plan.main_dish.name, "Ginger pork");
    assert_eq!(plan.nutrition_score, 64.0);
    assert_eq!(plan.confidence, 0.9);

    let ginger_count = response.shopping_list.iter().filter(|i| i.name == "ginger").count();
    assert_eq!(ginger_count, 4);
    assert!(response.shopping_list.iter().all(|i| i.name != "pork"));
}

#[tokio::test]
async fn test_invalid_request_runs_no_stage() {
    let text = Arc::new(FakeModel::unavailable());
    let planner = planner(text.clone(), image_model(), &Settings::default());

    let err = planner.suggest_on(&request(vec![]), today()).await.unwrap_err();
    assert!(matches!(err, MealPlannerError::Validation(_)));
    assert_eq!(err.status_code(), 400);

    let mut bad_time = request(fridge());
    bad_time.preferences.max_cooking_time = 5;
    assert!(planner.suggest_on(&bad_time, today()).await.is_err());

    let mut no_household = request(fridge());
    no_household.household_id = "  ".to_string();
    assert!(planner.suggest_on(&no_household, today()).await.is_err());

    assert!(text.prompts().is_empty());
}

#[tokio::test]
async fn test_simpler_feedback_forces_easy_on_every_alternative() {
    let text = Arc::new(FakeModel::unavailable());
    let planner = planner(text.clone(), image_model(), &Settings::default());
    let mut original = request(fridge());
    original.preferences.preferred_difficulty = DifficultyLevel::Expert;
    let first = planner.suggest_on(&original, today()).await.unwrap();

    let response = planner
        .alternatives_on(
            &AlternativesRequest {
                original_plan: first.meal_plan,
                request: original,
                feedback: "もっと簡単に".to_string(),
            },
            today(),
        )
        .await
        .unwrap();

    assert_eq!(response.alternatives.len(), 3);
    assert!(response.alternatives.iter().all(|p| p.difficulty == DifficultyLevel::Easy));

    let recipe_prompts: Vec<String> = text
        .prompts()
        .into_iter()
        .filter(|p| p.contains(RECIPE_PROMPT_MARKER))
        .collect();
    // One for the original plan, then three alternatives.
    assert_eq!(recipe_prompts.len(), 4);
    assert!(recipe_prompts[0].contains("- Difficulty: expert"));
    assert!(recipe_prompts[1..].iter().all(|p| p.contains("- Difficulty: easy")));
}

#[tokio::test]
async fn test_core_stage_failure_aborts_the_run() {
    let text = Arc::new(FakeModel::unavailable());
    let mut stages = Stages::new(text.clone(), image_model(), &Settings::default());
    stages.nutrition_balance = Arc::new(OfflineNutrition);
    let planner = MealPlanner::from_stages(stages);

    let err = planner.suggest_on(&request(fridge()), today()).await.unwrap_err();
    match &err {
        MealPlannerError::Pipeline(pipeline) => assert_eq!(pipeline.source.kind, StageKind::NutritionBalance),
        other => panic!("expected a pipeline error, got {:?}", other),
    }
    assert_eq!(err.status_code(), 500);
    assert_eq!(err.error_code(), "MEAL_PLANNING_FAILED");
    // Only the ingredient stage reached the model before the failure.
    assert_eq!(text.prompts().len(), 1);
}

#[tokio::test]
async fn test_image_stage_failure_keeps_the_plan() {
    let mut stages = Stages::new(Arc::new(FakeModel::unavailable()), image_model(), &Settings::default());
    stages.image_generation = Arc::new(OfflineImages);
    let planner = MealPlanner::from_stages(stages);

    let response = planner.suggest_on(&request(fridge()), today()).await.unwrap();
    assert_eq!(response.stages_used.len(), 5);
    assert!(!response.stages_used.contains(&"image_generation".to_string()));
    assert!(response.meal_plan.dishes().iter().all(|d| d.image_url.is_none()));
    assert_eq!(response.meal_plan.main_dish.name, "egg stir-fry");
    assert_eq!(response.shopping_list.len(), 3);
}

#[tokio::test]
async fn test_oversized_optimized_times_are_capped() {
    let names = ["egg stir-fry", "Green salad", "Miso soup", "Steamed rice"];
    let entries: Vec<String> = names
        .iter()
        .map(|name| format!(r#"{{"name": "{}", "optimized_cooking_time": 99999999999}}"#, name))
        .collect();
    let reply = format!(r#"{{"optimized_recipes": [{}], "total_time": 99999999999}}"#, entries.join(", "));
    let text = Arc::new(
        FakeModel::new()
            .with_reply("kitchen efficiency expert", FakeReply::Text(reply))
            .with_default_reply(FakeReply::Fail("offline".to_string())),
    );
    let planner = planner(text, image_model(), &Settings::default());
    let response = planner.suggest_on(&request(fridge()), today()).await.unwrap();

    assert!(response.meal_plan.dishes().iter().all(|d| d.cooking_time == MAX_DISH_TIME));
    assert_eq!(response.meal_plan.total_cooking_time, MAX_DISH_TIME * 4);
}
