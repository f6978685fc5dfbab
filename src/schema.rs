// 📐 Source Schemas - which tags each upstream model uses
//
// The two document models describe the same receipt with different tag
// vocabularies (`menu/nm/price` vs `line_items/item_name/item_value`).
// One extractor reads both; the difference lives here, as data.

use serde::{Deserialize, Serialize};

/// Path of tag names from the root (e.g. `["total", "total_price"]`)
pub type FieldPath = Vec<String>;

// ============================================================================
// SOURCE ROLE
// ============================================================================

/// Which of the two upstream models produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceRole {
    /// General-purpose model (good at layout, merchant, item names)
    General,
    /// Numerically-specialized model (good at dates, totals, prices)
    Numeric,
}

impl SourceRole {
    pub fn name(&self) -> &str {
        match self {
            SourceRole::General => "General",
            SourceRole::Numeric => "Numeric",
        }
    }

    pub fn code(&self) -> &str {
        match self {
            SourceRole::General => "A",
            SourceRole::Numeric => "B",
        }
    }
}

// ============================================================================
// SOURCE SCHEMA
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSchema {
    /// Label for logs
    pub name: String,

    /// Container holding the purchased items
    pub items: FieldPath,

    /// Name tag inside an item; alternatives tried in order
    pub item_name: Vec<String>,

    /// Price tag inside an item; alternatives tried in order
    pub item_price: Vec<String>,

    /// Count tag inside an item
    #[serde(default)]
    pub item_quantity: Vec<String>,

    /// Tag holding nested sub-items of an item
    #[serde(default)]
    pub item_children: Option<String>,

    /// Item tag where the model sometimes puts the receipt date
    #[serde(default)]
    pub item_date: Option<String>,

    #[serde(default)]
    pub total: Vec<FieldPath>,

    #[serde(default)]
    pub subtotal: Vec<FieldPath>,

    #[serde(default)]
    pub date: Vec<FieldPath>,

    /// Header fields naming the store
    #[serde(default)]
    pub merchant: Vec<FieldPath>,

    /// Secondary list mixing dates, store names and stray items
    #[serde(default)]
    pub auxiliary_items: Option<FieldPath>,

    /// First unpriced, non-noise item is the store name
    #[serde(default)]
    pub merchant_from_first_item: bool,

    /// Keep items without a plausible price (amount "0.00")
    #[serde(default)]
    pub keep_unpriced_items: bool,

    /// Placeholder names the model emits for empty rows (compared uppercase)
    #[serde(default)]
    pub ignored_item_names: Vec<String>,
}

fn path(parts: &[&str]) -> FieldPath {
    parts.iter().map(|p| p.to_string()).collect()
}

fn names(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

impl SourceSchema {
    /// CORD-v2 vocabulary (general-purpose source)
    pub fn cord_v2() -> Self {
        SourceSchema {
            name: "cord-v2".to_string(),
            items: path(&["menu"]),
            item_name: names(&["nm"]),
            item_price: names(&["price"]),
            item_quantity: names(&["cnt"]),
            item_children: Some("sub".to_string()),
            item_date: Some("num".to_string()),
            total: vec![path(&["total", "total_price"]), path(&["total", "cashprice"])],
            subtotal: vec![path(&["sub_total", "subtotal_price"])],
            date: Vec::new(),
            merchant: Vec::new(),
            auxiliary_items: Some(path(&["sub_total", "etc"])),
            merchant_from_first_item: true,
            keep_unpriced_items: false,
            ignored_item_names: Vec::new(),
        }
    }

    /// Invoice/receipt vocabulary (numerically-specialized source)
    pub fn invoice_receipts() -> Self {
        SourceSchema {
            name: "invoice-receipts".to_string(),
            items: path(&["line_items"]),
            item_name: names(&["item_name", "item_desc", "name"]),
            item_price: names(&["item_value", "item_gross_worth", "price"]),
            item_quantity: names(&["item_quantity", "item_qty", "qty"]),
            item_children: None,
            item_date: None,
            total: vec![path(&["total"]), path(&["summary", "total_gross_worth"])],
            subtotal: vec![path(&["subtotal"]), path(&["summary", "total_net_worth"])],
            date: vec![
                path(&["date"]),
                path(&["invoice_date"]),
                path(&["receipt_date"]),
                path(&["transaction_date"]),
            ],
            merchant: vec![path(&["store_name"]), path(&["store_addr"]), path(&["seller"])],
            auxiliary_items: None,
            merchant_from_first_item: false,
            keep_unpriced_items: true,
            ignored_item_names: names(&["NAME", "*"]),
        }
    }

    pub fn is_ignored_name(&self, name: &str) -> bool {
        let upper = name.trim().to_uppercase();
        self.ignored_item_names.iter().any(|n| n.to_uppercase() == upper)
    }

    /// Check the schema can drive an extraction
    pub fn validate(&self) -> SchemaResult {
        let mut errors = Vec::new();

        if self.items.is_empty() || self.items.iter().any(|p| p.is_empty()) {
            errors.push(SchemaError::new(&self.name, "items", "Path is empty"));
        }

        if self.item_name.is_empty() {
            errors.push(SchemaError::new(&self.name, "item_name", "No tag names given"));
        }

        if self.item_price.is_empty() {
            errors.push(SchemaError::new(&self.name, "item_price", "No tag names given"));
        }

        let all_paths = self
            .total
            .iter()
            .chain(&self.subtotal)
            .chain(&self.date)
            .chain(&self.merchant)
            .chain(self.auxiliary_items.iter());
        for field_path in all_paths {
            if field_path.is_empty() {
                errors.push(SchemaError::new(&self.name, "path", "Empty field path"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

// ============================================================================
// VALIDATION RESULT
// ============================================================================

#[derive(Debug, Clone)]
pub struct SchemaError {
    pub field: String,
    pub message: String,
    pub context: String,
}

impl SchemaError {
    fn new(context: &str, field: &str, message: &str) -> Self {
        SchemaError {
            field: field.to_string(),
            message: message.to_string(),
            context: context.to_string(),
        }
    }
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.context, self.field, self.message)
    }
}

impl std::error::Error for SchemaError {}

pub type SchemaResult = Result<(), Vec<SchemaError>>;

// ============================================================================
// TESTS
// ============================================================================
