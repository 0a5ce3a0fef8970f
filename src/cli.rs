use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::models::DifficultyLevel;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Suggest a meal plan from a refrigerator inventory CSV
    Suggest {
        /// Path to the inventory CSV (id,name,category,quantity,unit,expiry_date)
        #[arg(short, long)]
        inventory: PathBuf,
        #[arg(long)]
        household: String,
        /// Maximum cooking time in minutes (10-300)
        #[arg(long)]
        max_cooking_time: Option<u32>,
        #[arg(long, value_parser = parse_difficulty)]
        difficulty: Option<DifficultyLevel>,
        /// Plan for this date instead of today (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Re-plan three times after feedback such as "too spicy" or "simpler"
    Alternatives {
        #[arg(short, long)]
        inventory: PathBuf,
        #[arg(long)]
        household: String,
        #[arg(long)]
        feedback: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Start the HTTP API
    Serve {
        /// Defaults to MEAL_PLANNER_HOST
        #[arg(long)]
        host: Option<String>,
        /// Defaults to MEAL_PLANNER_PORT
        #[arg(long)]
        port: Option<u16>,
    },
}

fn parse_difficulty(value: &str) -> Result<DifficultyLevel, String> {
    DifficultyLevel::parse_lenient(value)
        .ok_or_else(|| format!("unknown difficulty '{}', expected easy, medium, hard or expert", value))
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
