//! HTTP surface: the meal-planning endpoints, one endpoint per stage, and
//! health checks.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Settings;
use crate::error::{MealPlannerError, StageKind};
use crate::models::{AlternativesRequest, AlternativesResponse, MealPlanningRequest, MealPlanningResponse};
use crate::planner::MealPlanner;
use crate::stages::cooking_optimization::{CookingOptimizationRequest, CookingOptimizationResult};
use crate::stages::image_generation::{ImageGenerationRequest, ImageGenerationResult};
use crate::stages::ingredient_priority::{IngredientAnalysisRequest, IngredientAnalysisResult};
use crate::stages::meal_theme::{MealThemeRequest, MealThemeResult};
use crate::stages::nutrition_balance::{NutritionAnalysisRequest, NutritionAnalysisResult};
use crate::stages::recipe_suggestion::{RecipeSuggestionRequest, RecipeSuggestionResult};
use crate::stages::user_preference::{UserPreferenceRequest, UserPreferenceResult};
use crate::stages::Stage;

#[derive(Debug, Clone)]
pub struct AppState {
    pub planner: Arc<MealPlanner>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(planner: MealPlanner, settings: Settings) -> Self {
        Self {
            planner: Arc::new(planner),
            settings: Arc::new(settings),
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Map<String, Value>,
}

impl ApiError {
    pub fn from_error(err: MealPlannerError, debug: bool) -> Self {
        Self {
            status: StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            code: err.error_code(),
            message: err.public_message(),
            details: err.details(debug),
        }
    }

    fn bad_body(rejection: JsonRejection) -> Self {
        let mut details = Map::new();
        details.insert("reason".to_string(), json!(rejection.body_text()));
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "VALIDATION_ERROR",
            message: "request body is not valid".to_string(),
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = json!({
            "error": self.code,
            "message": self.message,
            "details": self.details,
        });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(service_health))
        .route("/api/v1/meal-planning/suggest", post(suggest))
        .route("/api/v1/meal-planning/alternatives", post(alternatives))
        .route("/api/v1/meal-planning/health", get(meal_planning_health))
        .route("/api/v1/agents/ingredient-analysis", post(ingredient_analysis))
        .route("/api/v1/agents/nutrition-balance", post(nutrition_balance))
        .route("/api/v1/agents/recipe-suggestion", post(recipe_suggestion))
        .route("/api/v1/agents/cooking-optimization", post(cooking_optimization))
        .route("/api/v1/agents/meal-theme", post(meal_theme))
        .route("/api/v1/agents/image-generation", post(image_generation))
        .route("/api/v1/agents/user-preferences", post(user_preferences))
        .route("/api/v1/agents/health", get(agents_health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(state: AppState, host: &str, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    tracing::info!("meal planner listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("meal planner shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install Ctrl+C handler");
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn suggest(
    State(state): State<AppState>,
    payload: Result<Json<MealPlanningRequest>, JsonRejection>,
) -> Result<Json<MealPlanningResponse>, ApiError> {
    let Json(request) = payload.map_err(ApiError::bad_body)?;
    state
        .planner
        .suggest(&request)
        .await
        .map(Json)
        .map_err(|err| ApiError::from_error(err, state.settings.debug))
}

async fn alternatives(
    State(state): State<AppState>,
    payload: Result<Json<AlternativesRequest>, JsonRejection>,
) -> Result<Json<AlternativesResponse>, ApiError> {
    let Json(request) = payload.map_err(ApiError::bad_body)?;
    state
        .planner
        .alternatives(&request)
        .await
        .map(Json)
        .map_err(|err| ApiError::from_error(err, state.settings.debug))
}

/// Runs one stage on its own request body.
async fn run_stage<S>(
    stage: &S,
    payload: Result<Json<S::Request>, JsonRejection>,
    debug: bool,
) -> Result<Json<S::Output>, ApiError>
where
    S: Stage + ?Sized,
    S::Output: Serialize,
{
    let Json(request) = payload.map_err(ApiError::bad_body)?;
    stage
        .process(request)
        .await
        .map(Json)
        .map_err(|err| ApiError::from_error(MealPlannerError::from(err), debug))
}

async fn ingredient_analysis(
    State(state): State<AppState>,
    payload: Result<Json<IngredientAnalysisRequest>, JsonRejection>,
) -> Result<Json<IngredientAnalysisResult>, ApiError> {
    run_stage(state.planner.stages().ingredient_priority.as_ref(), payload, state.settings.debug).await
}

async fn nutrition_balance(
    State(state): State<AppState>,
    payload: Result<Json<NutritionAnalysisRequest>, JsonRejection>,
) -> Result<Json<NutritionAnalysisResult>, ApiError> {
    run_stage(state.planner.stages().nutrition_balance.as_ref(), payload, state.settings.debug).await
}

async fn recipe_suggestion(
    State(state): State<AppState>,
    payload: Result<Json<RecipeSuggestionRequest>, JsonRejection>,
) -> Result<Json<RecipeSuggestionResult>, ApiError> {
    run_stage(state.planner.stages().recipe_suggestion.as_ref(), payload, state.settings.debug).await
}

async fn cooking_optimization(
    State(state): State<AppState>,
    payload: Result<Json<CookingOptimizationRequest>, JsonRejection>,
) -> Result<Json<CookingOptimizationResult>, ApiError> {
    run_stage(state.planner.stages().cooking_optimization.as_ref(), payload, state.settings.debug).await
}

async fn meal_theme(
    State(state): State<AppState>,
    payload: Result<Json<MealThemeRequest>, JsonRejection>,
) -> Result<Json<MealThemeResult>, ApiError> {
    run_stage(state.planner.stages().meal_theme.as_ref(), payload, state.settings.debug).await
}

async fn image_generation(
    State(state): State<AppState>,
    payload: Result<Json<ImageGenerationRequest>, JsonRejection>,
) -> Result<Json<ImageGenerationResult>, ApiError> {
    run_stage(state.planner.stages().image_generation.as_ref(), payload, state.settings.debug).await
}

async fn user_preferences(
    State(state): State<AppState>,
    payload: Result<Json<UserPreferenceRequest>, JsonRejection>,
) -> Result<Json<UserPreferenceResult>, ApiError> {
    run_stage(state.planner.stages().user_preference.as_ref(), payload, state.settings.debug).await
}

async fn service_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "images_enabled": state.settings.generate_images,
    }))
}

async fn meal_planning_health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "meal_planning",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn agents_health() -> impl IntoResponse {
    let stages = [
        StageKind::IngredientAnalysis,
        StageKind::NutritionBalance,
        StageKind::RecipeSuggestion,
        StageKind::CookingOptimization,
        StageKind::MealTheme,
        StageKind::ImageGeneration,
        StageKind::UserPreference,
    ];
    Json(json!({
        "status": "healthy",
        "agents": stages.iter().map(|kind| kind.name()).collect::<Vec<_>>(),
    }))
}
