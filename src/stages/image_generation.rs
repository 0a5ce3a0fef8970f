use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::meal_theme::{MealThemeResult, VisualStyle};
use super::model_call::ModelCall;
use super::Stage;
use crate::api_connection::{ImageGenerator, TextGenerator};
use crate::config::StageConfig;
use crate::error::{StageKind, ValidationError};
use crate::models::DishPlan;

const PLACEHOLDER_BASE: &str = "https://via.placeholder.com/400x400";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageStyle {
    pub mood: String,
    pub lighting: String,
    pub composition: String,
}

impl Default for ImageStyle {
    fn default() -> Self {
        Self {
            mood: "appetizing".to_string(),
            lighting: "natural".to_string(),
            composition: "professional".to_string(),
        }
    }
}

/// The parts of a theme result that shape the photos. A full
/// [`MealThemeResult`] deserializes into this as well.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageTheme {
    pub theme_name: String,
    #[serde(default)]
    pub visual_style: VisualStyle,
}

impl From<&MealThemeResult> for ImageTheme {
    fn from(theme: &MealThemeResult) -> Self {
        Self {
            theme_name: theme.theme_name.clone(),
            visual_style: theme.visual_style.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGenerationRequest {
    pub recipes: Vec<DishPlan>,
    pub meal_theme: ImageTheme,
    #[serde(default)]
    pub image_style: ImageStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub recipe_name: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refined_prompt: Option<String>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_len: Option<usize>,
    pub placeholder: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGenerationResult {
    /// One entry per recipe, in recipe order.
    pub image_urls: Vec<String>,
    pub image_metadata: Vec<ImageMetadata>,
    /// Seconds.
    pub generation_time: f64,
}

pub fn placeholder_url(recipe_name: &str) -> String {
    match Url::parse_with_params(PLACEHOLDER_BASE, &[("text", recipe_name)]) {
        Ok(url) => url.to_string(),
        Err(_) => PLACEHOLDER_BASE.to_string(),
    }
}

pub fn build_image_prompt(dish: &DishPlan, theme: &ImageTheme, style: &ImageStyle) -> String {
    let visual = &theme.visual_style;
    format!(
        "Professional food photography of {name}: {description}

Style: {mood}, {lighting} lighting, {composition} composition
Theme: {theme}
Color palette: {palette}
Mood: {visual_mood}
Presentation: {presentation}

Requirements: high resolution, clean uncluttered background, focus on the food, appetizing appearance suitable for a menu.
Avoid: artificial lighting, overly processed look, cluttered background.",
        name = dish.name,
        description = dish.description,
        mood = style.mood,
        lighting = style.lighting,
        composition = style.composition,
        theme = theme.theme_name,
        palette = visual.color_palette.join(", "),
        visual_mood = visual.mood,
        presentation = visual.presentation_style,
    )
}

/// Best-effort photos, one per dish. A failing dish gets a placeholder and
/// never affects the others.
#[derive(Debug, Clone)]
pub struct ImageGenerationStage {
    generator: Arc<dyn ImageGenerator>,
    config: StageConfig,
    refiner: Option<ModelCall>,
    enabled: bool,
}

impl ImageGenerationStage {
    pub fn new(generator: Arc<dyn ImageGenerator>, config: StageConfig) -> Self {
        Self {
            generator,
            config,
            refiner: None,
            enabled: true,
        }
    }

    /// When disabled every dish gets a placeholder and no model is called.
    pub fn with_generation(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Rewrites each prompt through a text model before generating.
    pub fn with_prompt_refinement(mut self, text: Arc<dyn TextGenerator>, config: StageConfig) -> Self {
        self.refiner = Some(ModelCall::new(StageKind::ImageGeneration, text, config));
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn refine(&self, prompt: &str) -> Option<String> {
        let refiner = self.refiner.as_ref()?;
        let request = format!(
            "Improve the following food photography prompt for an image generation model. \
             Describe the dish vividly and include the elements of a high-quality food photo. \
             Reply with the improved prompt only.\n\n{}",
            prompt
        );
        match refiner.ask_text(&request).await {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "Prompt refinement failed, using the original prompt");
                None
            }
        }
    }

    async fn generate_one(&self, dish: &DishPlan, prompt: String) -> (String, ImageMetadata) {
        let refined_prompt = self.refine(&prompt).await;
        let final_prompt = refined_prompt.as_deref().unwrap_or(&prompt);

        let (url, byte_len, error) = match self.generator.generate_image(final_prompt, &self.config).await {
            Ok(image) => {
                debug!(recipe = %dish.name, byte_len = ?image.byte_len, "Image generated");
                (image.url, image.byte_len, None)
            }
            Err(err) => {
                warn!(recipe = %dish.name, error = %err, "Image generation failed, using placeholder");
                (placeholder_url(&dish.name), None, Some(err.to_string()))
            }
        };

        let metadata = ImageMetadata {
            recipe_name: dish.name.clone(),
            prompt,
            refined_prompt,
            model: self.config.model.clone(),
            byte_len,
            placeholder: error.is_some(),
            error,
        };
        (url, metadata)
    }
}

#[async_trait]
impl Stage for ImageGenerationStage {
    type Request = ImageGenerationRequest;
    type Output = ImageGenerationResult;

    fn kind(&self) -> StageKind {
        StageKind::ImageGeneration
    }

    fn validate(&self, request: &ImageGenerationRequest) -> Result<(), ValidationError> {
        if request.recipes.is_empty() {
            return Err(ValidationError::EmptyRecipes);
        }
        Ok(())
    }

    async fn execute(&self, request: &ImageGenerationRequest) -> anyhow::Result<ImageGenerationResult> {
        let started = Instant::now();
        info!(
            recipe_count = request.recipes.len(),
            enabled = self.enabled,
            "Generating dish images"
        );

        let mut image_urls = Vec::with_capacity(request.recipes.len());
        let mut image_metadata = Vec::with_capacity(request.recipes.len());
        for dish in &request.recipes {
            let prompt = build_image_prompt(dish, &request.meal_theme, &request.image_style);
            let (url, metadata) = if self.enabled {
                self.generate_one(dish, prompt).await
            } else {
                let metadata = ImageMetadata {
                    recipe_name: dish.name.clone(),
                    prompt,
                    refined_prompt: None,
                    model: self.config.model.clone(),
                    byte_len: None,
                    placeholder: true,
                    error: None,
                };
                (placeholder_url(&dish.name), metadata)
            };
            image_urls.push(url);
            image_metadata.push(metadata);
        }

        Ok(ImageGenerationResult {
            image_urls,
            image_metadata,
            generation_time: started.elapsed().as_secs_f64(),
        })
    }
}
