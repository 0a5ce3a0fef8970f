use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use std::path::Path;

use crate::models::InventoryItem;

// Expected column headers
const ID_COL: &str = "id";
const NAME_COL: &str = "name";
const CATEGORY_COL: &str = "category";
const QUANTITY_COL: &str = "quantity";
const UNIT_COL: &str = "unit";
const EXPIRY_COL: &str = "expiry_date";
const IMAGE_COL: &str = "image_url";

fn column_index(headers: &StringRecord, column: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim() == column)
        .ok_or_else(|| anyhow::anyhow!("Column '{}' not found", column))
}

/// Loads refrigerator inventory from a CSV file with the columns
/// `id,name,category,quantity,unit,expiry_date` (plus an optional `image_url`).
/// Expiry dates are `YYYY-MM-DD`; days until expiry are counted from `today`.
pub fn load_inventory_csv(csv_path: &Path, today: NaiveDate) -> Result<Vec<InventoryItem>> {
    if !csv_path.exists() {
        return Err(anyhow::anyhow!("Inventory CSV file not found at: {:?}", csv_path));
    }

    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open inventory CSV file at {:?}", csv_path))?;
    let mut rdr = ReaderBuilder::new().has_headers(true).trim(csv::Trim::All).from_reader(file);

    let headers = rdr.headers()?.clone();
    let id_idx = column_index(&headers, ID_COL)?;
    let name_idx = column_index(&headers, NAME_COL)?;
    let category_idx = column_index(&headers, CATEGORY_COL)?;
    let quantity_idx = column_index(&headers, QUANTITY_COL)?;
    let unit_idx = column_index(&headers, UNIT_COL)?;
    let expiry_idx = column_index(&headers, EXPIRY_COL)?;
    let image_idx = headers.iter().position(|h| h.trim() == IMAGE_COL);

    let mut inventory = Vec::new();
    for (row_index, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read record at row index {}", row_index))?;
        let field = |idx: usize| record.get(idx).unwrap_or("").to_string();

        let name = field(name_idx);
        if name.is_empty() {
            continue;
        }

        let quantity_text = field(quantity_idx);
        let quantity = quantity_text
            .parse::<f64>()
            .with_context(|| format!("Invalid quantity '{}' for '{}' at row {}", quantity_text, name, row_index))?;
        let expiry_text = field(expiry_idx);
        let expiry_date = NaiveDate::parse_from_str(&expiry_text, "%Y-%m-%d")
            .with_context(|| format!("Invalid expiry date '{}' for '{}' at row {}", expiry_text, name, row_index))?;

        let id = field(id_idx);
        inventory.push(InventoryItem {
            id: if id.is_empty() { format!("item-{}", row_index + 1) } else { id },
            name,
            category: field(category_idx),
            quantity,
            unit: field(unit_idx),
            expiry_date,
            days_until_expiry: InventoryItem::days_from(expiry_date, today),
            image_url: image_idx.map(|idx| field(idx)).filter(|url| !url.is_empty()),
        });
    }

    if inventory.is_empty() {
        return Err(anyhow::anyhow!("No inventory items loaded from {:?}", csv_path));
    }

    Ok(inventory)
}
