use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

use super::model_call::{field_bool, field_f64, field_str, field_str_list, field_u32, ModelCall, ModelReply};
use super::Stage;
use crate::api_connection::TextGenerator;
use crate::config::StageConfig;
use crate::error::{StageKind, ValidationError};
use crate::models::{DifficultyLevel, DishPlan, ResultSource, DEFAULT_MAX_COOKING_TIME, MAX_DISH_TIME};

const MAX_RECIPES: usize = 4;
const FALLBACK_TIPS: [&str; 2] = [
    "Prepare all ingredients in advance",
    "Cook over high heat for a short time",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookingConstraints {
    pub max_cooking_time: u32,
    pub difficulty: DifficultyLevel,
}

impl Default for CookingConstraints {
    fn default() -> Self {
        Self {
            max_cooking_time: DEFAULT_MAX_COOKING_TIME,
            difficulty: DifficultyLevel::Easy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookingOptimizationRequest {
    pub recipes: Vec<DishPlan>,
    #[serde(default)]
    pub constraints: CookingConstraints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleStep {
    pub start_minute: u32,
    pub action: String,
    pub duration: u32,
    pub parallel: bool,
    pub preparation_order: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookingOptimizationResult {
    /// Same dishes, same order as the request.
    pub optimized_recipes: Vec<DishPlan>,
    pub cooking_schedule: Vec<ScheduleStep>,
    pub total_time: u32,
    pub efficiency_score: f64,
    #[serde(default)]
    pub source: ResultSource,
}

fn append_tips(dish: &mut DishPlan, tips: impl IntoIterator<Item = String>) {
    dish.tips.extend(tips);
}

/// Shortens every dish by a fifth (never below five minutes) and schedules
/// the longest first so that all dishes finish together.
pub fn fallback_optimization(recipes: &[DishPlan]) -> CookingOptimizationResult {
    let optimized_time = |t: u32| u32::try_from(u64::from(t) * 4 / 5).unwrap_or(u32::MAX).max(5);

    let mut by_duration: Vec<&DishPlan> = recipes.iter().collect();
    by_duration.sort_by(|a, b| b.cooking_time.cmp(&a.cooking_time));

    let total_time = recipes
        .iter()
        .map(|d| optimized_time(d.cooking_time))
        .max()
        .unwrap_or(0);

    let cooking_schedule = by_duration
        .iter()
        .enumerate()
        .map(|(order, dish)| {
            let duration = optimized_time(dish.cooking_time);
            ScheduleStep {
                start_minute: total_time - duration,
                action: format!("Start cooking {}", dish.name),
                duration,
                parallel: order > 0,
                preparation_order: order as u32 + 1,
            }
        })
        .collect();

    let optimized_recipes = recipes
        .iter()
        .map(|dish| {
            let mut dish = dish.clone();
            dish.cooking_time = optimized_time(dish.cooking_time);
            append_tips(&mut dish, FALLBACK_TIPS.iter().map(|t| t.to_string()));
            dish
        })
        .collect();

    let original_sum: u64 = recipes.iter().map(|d| u64::from(d.cooking_time)).sum();
    let efficiency_score = if original_sum == 0 {
        70.0
    } else {
        let saved = original_sum as f64 - f64::from(total_time);
        (saved / original_sum as f64 * 100.0 + 70.0).round().clamp(0.0, 100.0)
    };

    CookingOptimizationResult {
        optimized_recipes,
        cooking_schedule,
        total_time,
        efficiency_score,
        source: ResultSource::Fallback,
    }
}

fn parse_schedule_step(entry: &Map<String, Value>, index: usize) -> Option<ScheduleStep> {
    let action = field_str(entry, "action")
        .or_else(|| field_str(entry, "step"))
        .or_else(|| field_str(entry, "description"))?;
    let start_minute = if entry.contains_key("start_minute") {
        field_u32(entry, "start_minute", 0, 0, u32::MAX)
    } else {
        field_u32(entry, "time", 0, 0, u32::MAX)
    };
    Some(ScheduleStep {
        start_minute,
        action,
        duration: field_u32(entry, "duration", 0, 0, u32::MAX),
        parallel: field_bool(entry, "parallel").unwrap_or(false),
        preparation_order: field_u32(entry, "preparation_order", index as u32 + 1, 0, u32::MAX),
    })
}

/// Merges per-dish entries into copies of the input dishes by exact name.
fn merge_optimized(recipes: &[DishPlan], reply: &Map<String, Value>) -> Vec<DishPlan> {
    let entries: Vec<&Map<String, Value>> = match reply.get("optimized_recipes") {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    };

    recipes
        .iter()
        .map(|dish| {
            let mut dish = dish.clone();
            let entry = entries
                .iter()
                .find(|entry| field_str(entry, "name").as_deref() == Some(dish.name.as_str()));
            if let Some(entry) = entry {
                dish.cooking_time = field_u32(
                    entry,
                    "optimized_cooking_time",
                    dish.cooking_time,
                    1,
                    MAX_DISH_TIME,
                );
                append_tips(&mut dish, field_str_list(entry, "cooking_tips"));
            }
            dish
        })
        .collect()
}

fn parse_optimization(recipes: &[DishPlan], reply: &Map<String, Value>) -> CookingOptimizationResult {
    let cooking_schedule = match reply.get("cooking_schedule") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_object)
            .enumerate()
            .filter_map(|(index, entry)| parse_schedule_step(entry, index))
            .collect(),
        _ => Vec::new(),
    };

    CookingOptimizationResult {
        optimized_recipes: merge_optimized(recipes, reply),
        cooking_schedule,
        total_time: field_u32(reply, "total_time", 30, 1, MAX_DISH_TIME * 4),
        efficiency_score: field_f64(reply, "efficiency_score", 75.0, 0.0, 100.0),
        source: ResultSource::Model,
    }
}

#[derive(Debug, Clone)]
pub struct CookingOptimizationStage {
    model: ModelCall,
}

impl CookingOptimizationStage {
    pub fn new(generator: Arc<dyn TextGenerator>, config: StageConfig) -> Self {
        Self {
            model: ModelCall::new(StageKind::CookingOptimization, generator, config),
        }
    }

    fn build_prompt(&self, request: &CookingOptimizationRequest) -> String {
        let recipes: Vec<String> = request
            .recipes
            .iter()
            .map(|dish| {
                let steps: Vec<&str> = dish.steps.iter().map(|s| s.description.as_str()).collect();
                format!(
                    "- {} ({}): {} minutes, {}. Steps: {}",
                    dish.name,
                    dish.category.as_str(),
                    dish.cooking_time,
                    dish.difficulty,
                    if steps.is_empty() { "n/a".to_string() } else { steps.join(" / ") }
                )
            })
            .collect();

        format!(
            "You are a kitchen efficiency expert. Optimise how the following dishes are cooked together.
Maximum total time: {max_time} minutes. Target difficulty: {difficulty}.

Dishes:
{recipes}

Respond with a JSON object of exactly this shape:
{{
  \"optimized_recipes\": [
    {{\"name\": \"exact dish name\", \"optimized_cooking_time\": minutes, \"cooking_tips\": [\"tip\"]}}
  ],
  \"cooking_schedule\": [
    {{\"start_minute\": 0, \"action\": \"what to do\", \"duration\": minutes, \"parallel\": false, \"preparation_order\": 1}}
  ],
  \"total_time\": minutes,
  \"efficiency_score\": 0-100 number
}}
Use the exact dish names given above. Numbers must be unquoted.",
            max_time = request.constraints.max_cooking_time,
            difficulty = request.constraints.difficulty,
            recipes = recipes.join("\n"),
        )
    }
}

#[async_trait]
impl Stage for CookingOptimizationStage {
    type Request = CookingOptimizationRequest;
    type Output = CookingOptimizationResult;

    fn kind(&self) -> StageKind {
        StageKind::CookingOptimization
    }

    fn validate(&self, request: &CookingOptimizationRequest) -> Result<(), ValidationError> {
        let count = request.recipes.len();
        if count == 0 || count > MAX_RECIPES {
            return Err(ValidationError::RecipeCount {
                expected: format!("1 to {}", MAX_RECIPES),
                actual: count,
            });
        }
        Ok(())
    }

    async fn execute(&self, request: &CookingOptimizationRequest) -> anyhow::Result<CookingOptimizationResult> {
        info!(
            recipe_count = request.recipes.len(),
            max_cooking_time = request.constraints.max_cooking_time,
            "Optimising cooking process"
        );

        let prompt = self.build_prompt(request);
        let result = match self.model.ask(&prompt).await {
            ModelReply::Parsed(reply) => parse_optimization(&request.recipes, &reply),
            ModelReply::Unusable(_) => fallback_optimization(&request.recipes),
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_connection::fake::{FakeModel, FakeReply};
    use crate::models::{DishCategory, NutritionInfo};

    fn dish(name: &str, minutes: u32) -> DishPlan {
        DishPlan {
            name: name.to_string(),
            category: DishCategory::Main,
            description: String::new(),
            ingredients: vec![],
            steps: vec![],
            tips: vec!["Existing tip".to_string()],
            cooking_time: minutes,
            prep_time: 10,
            serving_size: 4,
            difficulty: DifficultyLevel::Easy,
            nutrition: NutritionInfo::default(),
            image_url: None,
        }
    }

    fn stage(model: FakeModel) -> CookingOptimizationStage {
        CookingOptimizationStage::new(Arc::new(model), StageConfig::new("fake", 0.4, 100))
    }

    fn request(recipes: Vec<DishPlan>) -> CookingOptimizationRequest {
        CookingOptimizationRequest {
            recipes,
            constraints: CookingConstraints::default(),
        }
    }

    #[test]
    fn test_fallback_scenario() {
        let recipes = vec![dish("a", 30), dish("b", 20), dish("c", 10), dish("d", 40)];
        let result = fallback_optimization(&recipes);

        let times: Vec<u32> = result.optimized_recipes.iter().map(|d| d.cooking_time).collect();
        assert_eq!(times, vec![24, 16, 8, 32]);
        let names: Vec<&str> = result.optimized_recipes.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
        assert_eq!(result.total_time, 32);
        assert_eq!(result.efficiency_score, 100.0);

        let schedule = &result.cooking_schedule;
        assert_eq!(schedule[0].action, "Start cooking d");
        assert_eq!(schedule[0].start_minute, 0);
        assert!(!schedule[0].parallel);
        assert!(schedule[1..].iter().all(|s| s.parallel));
        assert_eq!(schedule[3].start_minute, 24);
        assert!(schedule.iter().all(|s| s.start_minute + s.duration == result.total_time));
    }

    #[test]
    fn test_fallback_never_goes_below_five_minutes() {
        let result = fallback_optimization(&[dish("quick", 3), dish("short", 6)]);
        let times: Vec<u32> = result.optimized_recipes.iter().map(|d| d.cooking_time).collect();
        assert_eq!(times, vec![5, 5]);
        assert!((0.0..=100.0).contains(&result.efficiency_score));
    }

    #[test]
    fn test_fallback_handles_huge_cooking_times() {
        let result = fallback_optimization(&[dish("slow", 2_000_000_000), dish("max", u32::MAX)]);
        let times: Vec<u32> = result.optimized_recipes.iter().map(|d| d.cooking_time).collect();
        assert_eq!(times, vec![1_600_000_000, 3_435_973_836]);
        assert_eq!(result.total_time, 3_435_973_836);
        assert!((0.0..=100.0).contains(&result.efficiency_score));
    }

    #[test]
    fn test_fallback_appends_tips() {
        let result = fallback_optimization(&[dish("a", 10)]);
        assert_eq!(
            result.optimized_recipes[0].tips,
            vec!["Existing tip", FALLBACK_TIPS[0], FALLBACK_TIPS[1]]
        );
    }

    #[tokio::test]
    async fn test_model_entries_merge_by_name() {
        let reply = r#"{
            "optimized_recipes": [
                {"name": "b", "optimized_cooking_time": 0, "cooking_tips": ["Use the lid"]},
                {"name": "a", "optimized_cooking_time": "12"},
                {"name": "ghost", "optimized_cooking_time": 1}
            ],
            "cooking_schedule": [{"time": 3, "action": "Boil water", "duration": 5, "parallel": "true"}, {"nothing": 1}],
            "efficiency_score": 180
        }"#;
        let model = FakeModel::new().with_default_reply(FakeReply::Text(reply.to_string()));
        let result = stage(model)
            .process(request(vec![dish("a", 30), dish("b", 20), dish("c", 15)]))
            .await
            .unwrap();

        let times: Vec<u32> = result.optimized_recipes.iter().map(|d| d.cooking_time).collect();
        assert_eq!(times, vec![12, 1, 15]);
        assert_eq!(result.optimized_recipes[1].tips, vec!["Existing tip", "Use the lid"]);
        assert_eq!(result.cooking_schedule.len(), 1);
        assert_eq!(result.cooking_schedule[0].start_minute, 3);
        assert!(result.cooking_schedule[0].parallel);
        assert_eq!(result.total_time, 30);
        assert_eq!(result.efficiency_score, 100.0);
        assert_eq!(result.source, ResultSource::Model);
    }

    #[tokio::test]
    async fn test_model_times_are_capped_per_dish() {
        let reply = r#"{
            "optimized_recipes": [{"name": "a", "optimized_cooking_time": 99999999999}],
            "total_time": 99999999999
        }"#;
        let model = FakeModel::new().with_default_reply(FakeReply::Text(reply.to_string()));
        let result = stage(model).process(request(vec![dish("a", 30)])).await.unwrap();
        assert_eq!(result.optimized_recipes[0].cooking_time, MAX_DISH_TIME);
        assert_eq!(result.total_time, MAX_DISH_TIME * 4);
    }

    #[tokio::test]
    async fn test_recipe_count_is_validated() {
        let err = stage(FakeModel::unavailable())
            .process(request(vec![]))
            .await
            .unwrap_err();
        assert!(err.is_invalid_request());

        let five = (0..5).map(|i| dish(&format!("d{}", i), 10)).collect();
        assert!(stage(FakeModel::unavailable()).process(request(five)).await.is_err());
    }

    #[tokio::test]
    async fn test_garbage_reply_falls_back() {
        let model = FakeModel::new().with_default_reply(FakeReply::Text("no idea".to_string()));
        let result = stage(model).process(request(vec![dish("a", 20)])).await.unwrap();
        assert_eq!(result.source, ResultSource::Fallback);
        assert_eq!(result.total_time, 16);
    }
}
