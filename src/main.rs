use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use meal_planner::api_connection::endpoints::Provider;
use meal_planner::cli::{parse_args, Command};
use meal_planner::config::Settings;
use meal_planner::inventory_loader::load_inventory_csv;
use meal_planner::models::{AlternativesRequest, MealPlanningRequest, UserPreferences};
use meal_planner::planner::MealPlanner;
use meal_planner::server::{run_serve, AppState};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "meal_planner=info,tower_http=info";

fn build_planner(settings: &Settings) -> MealPlanner {
    let provider = Arc::new(Provider::openrouter_with_base_url(
        &settings.api_key_env_var,
        &settings.base_url,
    ));
    MealPlanner::new(provider.clone(), provider, settings)
}

fn planning_request(
    inventory: &Path,
    household: String,
    preferences: UserPreferences,
    today: NaiveDate,
) -> Result<MealPlanningRequest> {
    let inventory = load_inventory_csv(inventory, today)
        .with_context(|| format!("Failed to load inventory from '{}'", inventory.display()))?;
    info!(item_count = inventory.len(), "Inventory loaded");
    Ok(MealPlanningRequest {
        inventory,
        household_id: household,
        preferences,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok(); // Load .env file for API keys

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli_args = parse_args();
    let settings = Settings::from_env().context("Invalid meal planner configuration")?;

    match cli_args.command {
        Command::Suggest {
            inventory,
            household,
            max_cooking_time,
            difficulty,
            date,
        } => {
            let today = date.unwrap_or_else(|| Local::now().date_naive());
            let defaults = UserPreferences::default();
            let preferences = UserPreferences {
                max_cooking_time: max_cooking_time.unwrap_or(defaults.max_cooking_time),
                preferred_difficulty: difficulty.unwrap_or(defaults.preferred_difficulty),
                ..defaults
            };
            let request = planning_request(&inventory, household, preferences, today)?;

            let planner = build_planner(&settings);
            let response = planner.suggest_on(&request, today).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Alternatives {
            inventory,
            household,
            feedback,
            date,
        } => {
            let today = date.unwrap_or_else(|| Local::now().date_naive());
            let request = planning_request(&inventory, household, UserPreferences::default(), today)?;

            let planner = build_planner(&settings);
            let original = planner.suggest_on(&request, today).await?;
            let alternatives = planner
                .alternatives_on(
                    &AlternativesRequest {
                        original_plan: original.meal_plan,
                        request,
                        feedback,
                    },
                    today,
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&alternatives)?);
        }
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| settings.host.clone());
            let port = port.unwrap_or(settings.port);
            let planner = build_planner(&settings);
            run_serve(AppState::new(planner, settings), &host, port).await?;
        }
    }

    Ok(())
}
