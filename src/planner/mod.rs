//! End-to-end meal planning: runs the stages in order and turns their output
//! into a plan plus a shopping list.

pub mod alternatives;
pub mod shopping_list;

use chrono::{Local, NaiveDate};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::api_connection::{ImageGenerator, TextGenerator};
use crate::config::{Settings, StageConfig};
use crate::error::{MealPlannerError, PipelineError, StageKind};
use crate::models::{
    AlternativesRequest, AlternativesResponse, MealPlan, MealPlanningRequest, MealPlanningResponse,
};
use crate::stages::cooking_optimization::{
    CookingConstraints, CookingOptimizationRequest, CookingOptimizationResult, CookingOptimizationStage,
};
use crate::stages::image_generation::{
    ImageGenerationRequest, ImageGenerationResult, ImageGenerationStage, ImageStyle, ImageTheme,
};
use crate::stages::ingredient_priority::{
    IngredientAnalysisRequest, IngredientAnalysisResult, IngredientPriorityStage,
};
use crate::stages::meal_theme::{MealThemeRequest, MealThemeResult, MealThemeStage};
use crate::stages::nutrition_balance::{NutritionAnalysisRequest, NutritionAnalysisResult, NutritionBalanceStage};
use crate::stages::recipe_suggestion::{RecipeSuggestionRequest, RecipeSuggestionResult, RecipeSuggestionStage};
use crate::stages::user_preference::{UserPreferenceRequest, UserPreferenceResult, UserPreferenceStage};
use crate::stages::{SharedStage, Stage};
use alternatives::preferences_from_feedback;
use shopping_list::build_shopping_list;

const ALTERNATIVE_COUNT: usize = 3;

/// One configured instance of every stage. Fields are public so callers can
/// swap in their own implementation of any stage.
#[derive(Debug, Clone)]
pub struct Stages {
    pub ingredient_priority: SharedStage<IngredientAnalysisRequest, IngredientAnalysisResult>,
    pub nutrition_balance: SharedStage<NutritionAnalysisRequest, NutritionAnalysisResult>,
    pub recipe_suggestion: SharedStage<RecipeSuggestionRequest, RecipeSuggestionResult>,
    pub cooking_optimization: SharedStage<CookingOptimizationRequest, CookingOptimizationResult>,
    pub meal_theme: SharedStage<MealThemeRequest, MealThemeResult>,
    pub image_generation: SharedStage<ImageGenerationRequest, ImageGenerationResult>,
    pub user_preference: SharedStage<UserPreferenceRequest, UserPreferenceResult>,
    /// When false the planner skips the image stage entirely.
    pub generate_images: bool,
}

impl Stages {
    pub fn new(text: Arc<dyn TextGenerator>, images: Arc<dyn ImageGenerator>, settings: &Settings) -> Self {
        let configs = &settings.stages;

        let mut image_generation = ImageGenerationStage::new(images, configs.image_generation.clone())
            .with_generation(settings.generate_images);
        if settings.refine_image_prompts {
            // Refinement is a text call: theme model, image sampling parameters.
            let refine_config = StageConfig::new(
                configs.meal_theme.model.clone(),
                configs.image_generation.temperature,
                configs.image_generation.max_tokens,
            );
            image_generation = image_generation.with_prompt_refinement(text.clone(), refine_config);
        }

        Self {
            ingredient_priority: Arc::new(IngredientPriorityStage::new(
                text.clone(),
                configs.ingredient_analysis.clone(),
            )),
            nutrition_balance: Arc::new(NutritionBalanceStage::new(text.clone(), configs.nutrition_balance.clone())),
            recipe_suggestion: Arc::new(RecipeSuggestionStage::new(text.clone(), configs.recipe_suggestion.clone())),
            cooking_optimization: Arc::new(CookingOptimizationStage::new(
                text.clone(),
                configs.cooking_optimization.clone(),
            )),
            meal_theme: Arc::new(MealThemeStage::new(text.clone(), configs.meal_theme.clone())),
            generate_images: image_generation.is_enabled(),
            image_generation: Arc::new(image_generation),
            user_preference: Arc::new(UserPreferenceStage::new(text, configs.user_preference.clone())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MealPlanner {
    stages: Stages,
}

impl MealPlanner {
    pub fn new(text: Arc<dyn TextGenerator>, images: Arc<dyn ImageGenerator>, settings: &Settings) -> Self {
        Self {
            stages: Stages::new(text, images, settings),
        }
    }

    pub fn from_stages(stages: Stages) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &Stages {
        &self.stages
    }

    /// Plans a meal for today's local date.
    pub async fn suggest(&self, request: &MealPlanningRequest) -> Result<MealPlanningResponse, MealPlannerError> {
        self.suggest_on(request, Local::now().date_naive()).await
    }

    pub async fn suggest_on(
        &self,
        request: &MealPlanningRequest,
        today: NaiveDate,
    ) -> Result<MealPlanningResponse, MealPlannerError> {
        request.validate()?;
        let started = Instant::now();
        let household_id = request.household_id.as_str();
        let preferences = &request.preferences;
        let mut stages_used = Vec::new();

        info!(household_id, inventory_count = request.inventory.len(), "Starting meal planning");

        let ingredient_analysis = self
            .stages
            .ingredient_priority
            .process(IngredientAnalysisRequest {
                products: request.inventory.clone(),
                current_date: Some(today),
            })
            .await
            .map_err(PipelineError::from)?;
        stages_used.push(StageKind::IngredientAnalysis);
        info!(
            household_id,
            priority_count = ingredient_analysis.priority_ingredients.len(),
            "Ingredient analysis complete"
        );

        let nutrition_analysis = self
            .stages
            .nutrition_balance
            .process(NutritionAnalysisRequest {
                ingredients: ingredient_analysis.analyzed_ingredients.clone(),
                preferences: preferences.clone(),
            })
            .await
            .map_err(PipelineError::from)?;
        stages_used.push(StageKind::NutritionBalance);
        let nutrition_score = nutrition_analysis.nutrition_score;
        info!(household_id, nutrition_score, "Nutrition analysis complete");

        let suggestion = self
            .stages
            .recipe_suggestion
            .process(RecipeSuggestionRequest {
                ingredient_analysis,
                nutrition_analysis,
                preferences: preferences.clone(),
            })
            .await
            .map_err(PipelineError::from)?;
        stages_used.push(StageKind::RecipeSuggestion);
        info!(household_id, main_dish = %suggestion.main_dish.name, "Recipe suggestion complete");

        let optimization = self
            .stages
            .cooking_optimization
            .process(CookingOptimizationRequest {
                recipes: suggestion.dishes(),
                constraints: CookingConstraints {
                    max_cooking_time: preferences.max_cooking_time,
                    difficulty: preferences.preferred_difficulty,
                },
            })
            .await
            .map_err(PipelineError::from)?;
        stages_used.push(StageKind::CookingOptimization);
        info!(household_id, total_time = optimization.total_time, "Cooking optimization complete");

        let theme = self
            .stages
            .meal_theme
            .process(MealThemeRequest {
                recipes: optimization.optimized_recipes,
                preferences: preferences.clone(),
                current_date: today,
                household_id: request.household_id.clone(),
            })
            .await
            .map_err(PipelineError::from)?;
        stages_used.push(StageKind::MealTheme);
        info!(household_id, theme = %theme.theme_name, "Meal theme complete");

        let image_urls = if self.stages.generate_images {
            let image_request = ImageGenerationRequest {
                recipes: theme.unified_meal_plan.dishes().into_iter().cloned().collect(),
                meal_theme: ImageTheme::from(&theme),
                image_style: ImageStyle::default(),
            };
            match self.stages.image_generation.process(image_request).await {
                Ok(images) => {
                    stages_used.push(StageKind::ImageGeneration);
                    images.image_urls
                }
                Err(err) => {
                    warn!(household_id, error = %err, "Image generation failed, continuing without images");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let mut image_urls = image_urls.into_iter();
        let dishes = theme
            .unified_meal_plan
            .into_dishes()
            .map(|dish| dish.with_image_url(image_urls.next()));
        let meal_plan = MealPlan::assemble(
            request.household_id.clone(),
            today,
            dishes,
            nutrition_score,
            suggestion.confidence,
        );
        let shopping_list = build_shopping_list(&meal_plan, &request.inventory);

        let processing_time = started.elapsed().as_secs_f64();
        info!(
            household_id,
            shopping_items = shopping_list.len(),
            processing_time,
            "Meal planning complete"
        );

        Ok(MealPlanningResponse {
            meal_plan,
            shopping_list,
            processing_time,
            stages_used: stages_used.iter().map(|kind| kind.name().to_string()).collect(),
        })
    }

    pub async fn alternatives(&self, request: &AlternativesRequest) -> Result<AlternativesResponse, MealPlannerError> {
        self.alternatives_on(request, Local::now().date_naive()).await
    }

    /// Re-plans three times with preferences adjusted by the feedback.
    pub async fn alternatives_on(
        &self,
        request: &AlternativesRequest,
        today: NaiveDate,
    ) -> Result<AlternativesResponse, MealPlannerError> {
        request.request.validate()?;
        let started = Instant::now();

        let adjusted = MealPlanningRequest {
            preferences: preferences_from_feedback(&request.request.preferences, &request.feedback),
            ..request.request.clone()
        };
        info!(
            household_id = %adjusted.household_id,
            original_main_dish = %request.original_plan.main_dish.name,
            max_cooking_time = adjusted.preferences.max_cooking_time,
            difficulty = %adjusted.preferences.preferred_difficulty,
            "Generating alternative plans"
        );

        let mut alternatives = Vec::with_capacity(ALTERNATIVE_COUNT);
        for _ in 0..ALTERNATIVE_COUNT {
            let response = self.suggest_on(&adjusted, today).await?;
            alternatives.push(response.meal_plan);
        }

        Ok(AlternativesResponse {
            alternatives,
            processing_time: started.elapsed().as_secs_f64(),
        })
    }
}
