use crate::models::{DifficultyLevel, UserPreferences, MIN_COOKING_TIME};

const SPICY_RESTRICTION: &str = "spicy_food";

const SPICY_KEYWORDS: [&str; 4] = ["辛い", "辛すぎ", "too spicy", "spicy"];
const TIME_KEYWORDS: [&str; 5] = ["時間", "長い", "too long", "takes too long", "time"];
const SIMPLICITY_KEYWORDS: [&str; 5] = ["簡単", "too easy", "simple", "easier", "simpler"];

fn mentions(feedback: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| feedback.contains(k))
}

/// Adjusts a copy of `preferences` according to free-text feedback on a plan.
pub fn preferences_from_feedback(preferences: &UserPreferences, feedback: &str) -> UserPreferences {
    let feedback = feedback.to_lowercase();
    let mut adjusted = preferences.clone();

    if mentions(&feedback, &SPICY_KEYWORDS)
        && !adjusted.dietary_restrictions.iter().any(|r| r == SPICY_RESTRICTION)
    {
        adjusted.dietary_restrictions.push(SPICY_RESTRICTION.to_string());
    }
    if mentions(&feedback, &TIME_KEYWORDS) {
        adjusted.max_cooking_time = adjusted.max_cooking_time.saturating_sub(10).max(MIN_COOKING_TIME);
    }
    if mentions(&feedback, &SIMPLICITY_KEYWORDS) {
        adjusted.preferred_difficulty = DifficultyLevel::Easy;
    }
    adjusted
}
