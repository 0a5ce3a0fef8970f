use chrono::Utc;
use std::collections::HashSet;

use crate::models::{InventoryItem, MealPlan, ShoppingItem, CREATED_BY};

/// Everything the plan needs that the household does not have.
///
/// Ingredients are taken from main, side, soup and staple in that order. An
/// ingredient is listed when it is flagged as requiring shopping or when no
/// inventory item carries its name (case-insensitive). The same ingredient
/// used by two dishes is listed twice.
pub fn build_shopping_list(plan: &MealPlan, inventory: &[InventoryItem]) -> Vec<ShoppingItem> {
    let on_hand: HashSet<String> = inventory.iter().map(|item| item.name.to_lowercase()).collect();
    let added_at = Utc::now();

    plan.dishes()
        .into_iter()
        .flat_map(|dish| dish.ingredients.iter())
        .filter(|ingredient| ingredient.shopping_required || !on_hand.contains(&ingredient.name.to_lowercase()))
        .map(|ingredient| ShoppingItem {
            name: ingredient.name.clone(),
            quantity: ingredient.quantity.clone(),
            unit: ingredient.unit.clone(),
            category: ingredient.category.clone(),
            is_custom: false,
            added_by: CREATED_BY.to_string(),
            added_at,
            notes: ingredient.notes.clone(),
        })
        .collect()
}
