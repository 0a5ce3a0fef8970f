use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;

use super::model_call::{
    field_f64, field_object, field_str, field_str_list, field_u32, FallbackReason, ModelCall, ModelReply,
};
use super::Stage;
use crate::api_connection::TextGenerator;
use crate::config::StageConfig;
use crate::error::{StageKind, ValidationError};
use crate::models::{
    DifficultyLevel, Ingredient, ResultSource, UserPreferences, DEFAULT_MAX_COOKING_TIME, MAX_COOKING_TIME,
    MIN_COOKING_TIME,
};

const FALLBACK_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferenceRequest {
    pub user_input: String,
    #[serde(default)]
    pub existing_profile: Option<Map<String, Value>>,
    #[serde(default)]
    pub available_ingredients: Vec<Ingredient>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferenceResult {
    pub structured_preferences: UserPreferences,
    pub confidence_score: f64,
    pub next_questions: Vec<String>,
    pub updated_profile: Map<String, Value>,
    #[serde(default)]
    pub source: ResultSource,
}

// (keywords, minutes); first match wins.
const TIME_RULES: [(&[&str], u32); 3] = [
    (&["30分", "30 min", "half an hour"], 30),
    (&["1時間", "60分", "1 hour", "one hour", "60 min"], 60),
    (&["15分", "15 min"], 15),
];

const DIFFICULTY_RULES: [(&[&str], DifficultyLevel); 2] = [
    (&["難しい", "上級", "hard", "difficult"], DifficultyLevel::Hard),
    (&["普通", "中級", "medium", "normal"], DifficultyLevel::Medium),
];

const ALLERGY_MARKERS: [&str; 2] = ["アレルギー", "allerg"];
const ALLERGENS: [(&[&str], &str); 2] = [(&["エビ", "shrimp"], "shrimp"), (&["卵", "egg"], "egg")];

const DISLIKE_MARKERS: [&str; 5] = ["嫌い", "苦手", "dislike", "hate", "don't like"];
const DISLIKES: [(&[&str], &str); 2] = [(&["にんじん", "carrot"], "carrot"), (&["魚", "fish"], "fish")];

const CUISINES: [(&[&str], &str); 3] = [
    (&["和食", "日本料理", "japanese"], "japanese"),
    (&["イタリアン", "パスタ", "italian", "pasta"], "italian"),
    (&["中華", "中国料理", "chinese"], "chinese"),
];

fn mentions(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

fn matched_values(text: &str, table: &[(&[&str], &str)]) -> Vec<String> {
    table
        .iter()
        .filter(|(keywords, _)| mentions(text, keywords))
        .map(|(_, value)| value.to_string())
        .collect()
}

/// Keyword extraction used when the model cannot answer.
pub fn extract_preferences(user_input: &str) -> UserPreferences {
    let text = user_input.to_lowercase();

    let max_cooking_time = TIME_RULES
        .iter()
        .find(|(keywords, _)| mentions(&text, keywords))
        .map_or(DEFAULT_MAX_COOKING_TIME, |(_, minutes)| *minutes);
    let preferred_difficulty = DIFFICULTY_RULES
        .iter()
        .find(|(keywords, _)| mentions(&text, keywords))
        .map_or(DifficultyLevel::Easy, |(_, level)| *level);

    let allergies = if mentions(&text, &ALLERGY_MARKERS) {
        matched_values(&text, &ALLERGENS)
    } else {
        Vec::new()
    };
    let disliked_ingredients = if mentions(&text, &DISLIKE_MARKERS) {
        matched_values(&text, &DISLIKES)
    } else {
        Vec::new()
    };

    UserPreferences {
        max_cooking_time,
        preferred_difficulty,
        dietary_restrictions: Vec::new(),
        allergies,
        disliked_ingredients,
        preferred_cuisines: matched_values(&text, &CUISINES),
    }
}

pub fn next_questions(preferences: &UserPreferences) -> Vec<String> {
    let mut questions = Vec::new();
    if preferences.allergies.is_empty() {
        questions.push("Do you have any food allergies?".to_string());
    }
    if preferences.disliked_ingredients.is_empty() {
        questions.push("Are there any ingredients you dislike?".to_string());
    }
    if preferences.preferred_cuisines.is_empty() {
        questions.push("Which cuisines do you enjoy?".to_string());
    }
    if questions.is_empty() {
        questions.push("Anything else you would like?".to_string());
    }
    questions
}

/// Profile with the new preferences, the conversation so far plus this input,
/// and a fresh timestamp.
fn build_profile(request: &UserPreferenceRequest, preferences: &UserPreferences) -> Map<String, Value> {
    let mut history = request
        .existing_profile
        .as_ref()
        .map(|profile| field_str_list(profile, "conversation_history"))
        .unwrap_or_default();
    history.push(request.user_input.clone());

    let mut profile = request.existing_profile.clone().unwrap_or_default();
    profile.insert("preferences".to_string(), json!(preferences));
    profile.insert("conversation_history".to_string(), json!(history));
    profile.insert("last_updated".to_string(), json!(Utc::now().to_rfc3339()));
    profile
}

fn parse_preferences(structured: &Map<String, Value>) -> UserPreferences {
    UserPreferences {
        max_cooking_time: field_u32(
            structured,
            "max_cooking_time",
            DEFAULT_MAX_COOKING_TIME,
            MIN_COOKING_TIME,
            MAX_COOKING_TIME,
        ),
        preferred_difficulty: field_str(structured, "preferred_difficulty")
            .and_then(|d| DifficultyLevel::parse_lenient(&d))
            .unwrap_or_default(),
        dietary_restrictions: field_str_list(structured, "dietary_restrictions"),
        allergies: field_str_list(structured, "allergies"),
        disliked_ingredients: field_str_list(structured, "disliked_ingredients"),
        preferred_cuisines: field_str_list(structured, "preferred_cuisines"),
    }
}

#[derive(Debug, Clone)]
pub struct UserPreferenceStage {
    model: ModelCall,
}

impl UserPreferenceStage {
    pub fn new(generator: Arc<dyn TextGenerator>, config: StageConfig) -> Self {
        Self {
            model: ModelCall::new(StageKind::UserPreference, generator, config),
        }
    }

    fn build_prompt(&self, request: &UserPreferenceRequest) -> String {
        let ingredients: Vec<String> = request
            .available_ingredients
            .iter()
            .map(|i| format!("- {} ({})", i.name, i.category))
            .collect();
        let existing = request
            .existing_profile
            .as_ref()
            .and_then(|p| serde_json::to_string(p).ok())
            .map(|p| format!("\nExisting profile: {}\n", p))
            .unwrap_or_default();

        format!(
            "You collect a household's cooking preferences from natural conversation.
User said: \"{input}\"

Available ingredients:
{ingredients}
{existing}
Extract or update the settings needed for meal planning. Convert phrases such as \"within 30 minutes\" or \"about an hour\" into minutes.

Respond with a JSON object of exactly this shape:
{{
  \"structured_preferences\": {{
    \"max_cooking_time\": minutes between 10 and 300,
    \"preferred_difficulty\": \"easy|medium|hard|expert\",
    \"dietary_restrictions\": [\"restriction\"],
    \"allergies\": [\"allergy\"],
    \"disliked_ingredients\": [\"ingredient\"],
    \"preferred_cuisines\": [\"cuisine\"]
  }},
  \"confidence_score\": 0-1 number,
  \"next_questions\": [\"question\"]
}}
Confidence guide: 0.9-1.0 clear and specific, 0.5-0.6 inferred, 0.0-0.2 unclear.",
            input = request.user_input,
            ingredients = if ingredients.is_empty() { "none listed".to_string() } else { ingredients.join("\n") },
            existing = existing,
        )
    }

    fn fallback(&self, request: &UserPreferenceRequest) -> UserPreferenceResult {
        let preferences = extract_preferences(&request.user_input);
        UserPreferenceResult {
            next_questions: next_questions(&preferences),
            updated_profile: build_profile(request, &preferences),
            structured_preferences: preferences,
            confidence_score: FALLBACK_CONFIDENCE,
            source: ResultSource::Fallback,
        }
    }
}

#[async_trait]
impl Stage for UserPreferenceStage {
    type Request = UserPreferenceRequest;
    type Output = UserPreferenceResult;

    fn kind(&self) -> StageKind {
        StageKind::UserPreference
    }

    fn validate(&self, request: &UserPreferenceRequest) -> Result<(), ValidationError> {
        if request.user_input.trim().is_empty() {
            return Err(ValidationError::EmptyUserInput);
        }
        Ok(())
    }

    async fn execute(&self, request: &UserPreferenceRequest) -> anyhow::Result<UserPreferenceResult> {
        info!(input_length = request.user_input.chars().count(), "Structuring user preferences");

        let prompt = self.build_prompt(request);
        let reply = match self.model.ask(&prompt).await {
            ModelReply::Parsed(reply) => reply,
            ModelReply::Unusable(_) => return Ok(self.fallback(request)),
        };
        let Some(structured) = field_object(&reply, "structured_preferences") else {
            self.model
                .note_fallback(&FallbackReason::Incomplete("structured_preferences".to_string()));
            return Ok(self.fallback(request));
        };

        let preferences = parse_preferences(structured);
        let questions = field_str_list(&reply, "next_questions");
        Ok(UserPreferenceResult {
            next_questions: if questions.is_empty() { next_questions(&preferences) } else { questions },
            updated_profile: build_profile(request, &preferences),
            confidence_score: field_f64(&reply, "confidence_score", 0.5, 0.0, 1.0),
            structured_preferences: preferences,
            source: ResultSource::Model,
        })
    }
}
