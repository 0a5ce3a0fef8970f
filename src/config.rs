//! Process settings loaded from the environment.

use serde::Serialize;
use std::env;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_API_KEY_ENV_VAR: &str = "OPENROUTER_API_KEY";
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_TEXT_MODEL: &str = "qwen/qwen3-32b";
pub const DEFAULT_IMAGE_MODEL: &str = "google/gemini-2.5-flash-image-preview";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;

const ENV_PREFIX: &str = "MEAL_PLANNER";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}'")]
    InvalidValue { var: String, value: String },
}

/// Model parameters for one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl StageConfig {
    pub fn new(model: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            temperature,
            max_tokens,
        }
    }

    /// Applies `MEAL_PLANNER_<STAGE>_{MODEL,TEMPERATURE,MAX_TOKENS}` overrides.
    fn with_env_overrides(mut self, stage: &str) -> Result<Self, ConfigError> {
        if let Ok(model) = env::var(format!("{ENV_PREFIX}_{stage}_MODEL")) {
            self.model = model;
        }
        if let Some(temperature) = parse_env(&format!("{ENV_PREFIX}_{stage}_TEMPERATURE"))? {
            self.temperature = temperature;
        }
        if let Some(max_tokens) = parse_env(&format!("{ENV_PREFIX}_{stage}_MAX_TOKENS"))? {
            self.max_tokens = max_tokens;
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSettings {
    pub ingredient_analysis: StageConfig,
    pub nutrition_balance: StageConfig,
    pub recipe_suggestion: StageConfig,
    pub cooking_optimization: StageConfig,
    pub meal_theme: StageConfig,
    pub image_generation: StageConfig,
    pub user_preference: StageConfig,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            ingredient_analysis: StageConfig::new(DEFAULT_TEXT_MODEL, 0.3, 2000),
            nutrition_balance: StageConfig::new(DEFAULT_TEXT_MODEL, 0.2, 1500),
            recipe_suggestion: StageConfig::new(DEFAULT_TEXT_MODEL, 0.7, 3000),
            cooking_optimization: StageConfig::new(DEFAULT_TEXT_MODEL, 0.4, 2000),
            meal_theme: StageConfig::new(DEFAULT_TEXT_MODEL, 0.8, 1000),
            image_generation: StageConfig::new(DEFAULT_IMAGE_MODEL, 0.9, 500),
            user_preference: StageConfig::new(DEFAULT_TEXT_MODEL, 0.6, 2000),
        }
    }
}

impl StageSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            ingredient_analysis: defaults.ingredient_analysis.with_env_overrides("INGREDIENT")?,
            nutrition_balance: defaults.nutrition_balance.with_env_overrides("NUTRITION")?,
            recipe_suggestion: defaults.recipe_suggestion.with_env_overrides("RECIPE")?,
            cooking_optimization: defaults.cooking_optimization.with_env_overrides("COOKING")?,
            meal_theme: defaults.meal_theme.with_env_overrides("THEME")?,
            image_generation: defaults.image_generation.with_env_overrides("IMAGE")?,
            user_preference: defaults.user_preference.with_env_overrides("USER_PREFERENCE")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Name of the variable holding the API key; the key itself is read per call.
    pub api_key_env_var: String,
    pub base_url: String,
    pub host: String,
    pub port: u16,
    /// Adds error causes to API error responses.
    pub debug: bool,
    pub generate_images: bool,
    pub refine_image_prompts: bool,
    pub stages: StageSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key_env_var: DEFAULT_API_KEY_ENV_VAR.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            debug: false,
            generate_images: true,
            refine_image_prompts: false,
            stages: StageSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from environment variables, falling back to defaults.
    ///
    /// - `MEAL_PLANNER_API_KEY_ENV`: variable holding the API key (default: `OPENROUTER_API_KEY`)
    /// - `MEAL_PLANNER_BASE_URL`, `MEAL_PLANNER_HOST`, `MEAL_PLANNER_PORT`
    /// - `MEAL_PLANNER_DEBUG`, `MEAL_PLANNER_GENERATE_IMAGES`, `MEAL_PLANNER_REFINE_IMAGE_PROMPTS`
    /// - `MEAL_PLANNER_<STAGE>_MODEL` / `_TEMPERATURE` / `_MAX_TOKENS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            api_key_env_var: env::var(format!("{ENV_PREFIX}_API_KEY_ENV"))
                .unwrap_or(defaults.api_key_env_var),
            base_url: env::var(format!("{ENV_PREFIX}_BASE_URL")).unwrap_or(defaults.base_url),
            host: env::var(format!("{ENV_PREFIX}_HOST")).unwrap_or(defaults.host),
            port: parse_env(&format!("{ENV_PREFIX}_PORT"))?.unwrap_or(defaults.port),
            debug: parse_flag(&format!("{ENV_PREFIX}_DEBUG"))?.unwrap_or(defaults.debug),
            generate_images: parse_flag(&format!("{ENV_PREFIX}_GENERATE_IMAGES"))?
                .unwrap_or(defaults.generate_images),
            refine_image_prompts: parse_flag(&format!("{ENV_PREFIX}_REFINE_IMAGE_PROMPTS"))?
                .unwrap_or(defaults.refine_image_prompts),
            stages: StageSettings::from_env()?,
        })
    }
}

fn parse_env<T: FromStr>(var: &str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                var: var.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

fn parse_flag(var: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(var) {
        Ok(value) => match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                var: var.to_string(),
                value,
            }),
        },
        Err(_) => Ok(None),
    }
}
