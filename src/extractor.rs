// 🧾 Candidate Extractor - parsed tree → partial receipt
//
// One extractor for every upstream model. The tag vocabulary comes from a
// `SourceSchema`; the rules are the same for all of them:
//   1. first unpriced, non-noise item → merchant (removed from items)
//   2. noise entries dropped
//   3. priced entries → line items ("2 Coffee" when count > 1)
//   4. sub-items flattened one level, same rules
//   5. total from total field, else subtotal, implausible → absent
//   6. still absent → sum of valid item prices

use log::{debug, trace};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::normalizer::{format_amount, parse_price, parse_quantity, FieldNormalizer};
use crate::parser::TagValue;
use crate::rules::RuleEngine;
use crate::schema::{FieldPath, SourceSchema};

// ============================================================================
// DATA STRUCTURES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Item name, quantity-prefixed when the count is above one
    pub description: String,

    /// Fixed two-decimal text
    pub amount: String,

    /// False for items kept without a plausible price (amount "0.00")
    pub source_valid_price: bool,
}

impl LineItem {
    pub fn priced(description: impl Into<String>, amount: Decimal) -> Self {
        LineItem {
            description: description.into(),
            amount: format_amount(amount),
            source_valid_price: true,
        }
    }

    pub fn unpriced(description: impl Into<String>) -> Self {
        LineItem {
            description: description.into(),
            amount: format_amount(Decimal::ZERO),
            source_valid_price: false,
        }
    }

    /// Key used for de-duplication across sources
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.description)
    }

    /// Parsed amount for priced items
    pub fn value(&self) -> Option<Decimal> {
        if self.source_valid_price {
            parse_price(&self.amount)
        } else {
            None
        }
    }
}

/// Lowercase, collapse inner whitespace
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Per-source extraction result, before reconciliation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCandidate {
    pub merchant: Option<String>,
    pub date: Option<String>,

    /// Fixed two-decimal text
    pub total: Option<String>,

    pub line_items: Vec<LineItem>,
}

impl RawCandidate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set merchant
    pub fn with_merchant(mut self, merchant: impl Into<String>) -> Self {
        self.merchant = Some(merchant.into());
        self
    }

    /// Builder: set date
    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// Builder: set total (canonicalized)
    pub fn with_total(mut self, total: &str) -> Self {
        self.total = parse_price(total).map(format_amount);
        self
    }

    /// Builder: append an item
    pub fn with_item(mut self, item: LineItem) -> Self {
        self.line_items.push(item);
        self
    }

    pub fn valid_item_count(&self) -> usize {
        self.line_items.iter().filter(|i| i.source_valid_price).count()
    }

    /// Sum of valid item prices; `None` when there are none
    pub fn valid_item_sum(&self) -> Option<Decimal> {
        sum_valid(&self.line_items)
    }

    pub fn has_item(&self, name: &str) -> bool {
        let key = normalize_name(name);
        self.line_items.iter().any(|i| i.normalized_name() == key)
    }

    /// Nothing at all was found
    pub fn is_empty(&self) -> bool {
        self.merchant.is_none()
            && self.date.is_none()
            && self.total.is_none()
            && self.line_items.is_empty()
    }
}

/// `None` when no item is priced or the sum overflows
pub(crate) fn sum_valid(items: &[LineItem]) -> Option<Decimal> {
    let mut values = items.iter().filter_map(LineItem::value).peekable();
    values.peek()?;
    values.try_fold(Decimal::ZERO, |acc, value| acc.checked_add(value))
}

// ============================================================================
// MERCHANT EXTRACTOR TRAIT
// ============================================================================

/// Turn a store header line into a merchant name
pub trait MerchantExtractor {
    fn extract_merchant(&self, header: &str) -> Option<String>;
}

fn leading_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z\s'\-&]+").expect("leading name pattern is valid"))
}

// ============================================================================
// CANDIDATE EXTRACTOR
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct CandidateExtractor {
    normalizer: FieldNormalizer,
    rules: RuleEngine,
}

/// One item entry, already read out of the tree
struct ItemFields<'a> {
    name: Option<&'a str>,
    price: Option<&'a str>,
    quantity: Option<&'a str>,
}

impl CandidateExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_normalizer(mut self, normalizer: FieldNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_rules(mut self, rules: RuleEngine) -> Self {
        self.rules = rules;
        self
    }

    /// Extract one partial receipt. Never fails; an empty tree gives an
    /// all-absent candidate.
    pub fn extract(&self, tree: &TagValue, schema: &SourceSchema) -> RawCandidate {
        let mut candidate = RawCandidate::new();

        candidate.merchant = self.header_merchant(tree, &schema.merchant);
        candidate.date = header_date(tree, &schema.date);

        if let Some(items) = tree.lookup(&schema.items) {
            for (idx, entry) in items.entries().into_iter().enumerate() {
                self.extract_entry(entry, schema, idx == 0, 0, &mut candidate);
            }
        }

        if let Some(path) = &schema.auxiliary_items {
            if let Some(section) = tree.lookup(path) {
                for entry in section.entries() {
                    self.extract_auxiliary(entry, schema, &mut candidate);
                }
            }
        }

        candidate.total = self
            .header_total(tree, schema)
            .or_else(|| candidate.valid_item_sum())
            .map(format_amount);

        debug!(
            "[{}] merchant={:?} date={:?} total={:?} items={} ({} priced)",
            schema.name,
            candidate.merchant,
            candidate.date,
            candidate.total,
            candidate.line_items.len(),
            candidate.valid_item_count()
        );

        candidate
    }

    fn extract_entry(
        &self,
        entry: &TagValue,
        schema: &SourceSchema,
        is_first: bool,
        depth: usize,
        candidate: &mut RawCandidate,
    ) {
        let fields = read_item(entry, schema);

        if let Some(date_tag) = &schema.item_date {
            if candidate.date.is_none() {
                candidate.date = entry
                    .get(date_tag)
                    .and_then(TagValue::text)
                    .and_then(|t| self.normalizer.extract_date_substring(t));
            }
        }

        let added = self.classify_item(&fields, schema, is_first, candidate);

        // Sub-items of a merchant header are not purchases
        if added == Some(ItemRole::Merchant) || depth > 0 {
            return;
        }
        if let Some(children_tag) = &schema.item_children {
            if let Some(children) = entry.get(children_tag) {
                for child in children.entries() {
                    self.extract_entry(child, schema, false, depth + 1, candidate);
                }
            }
        }
    }

    fn classify_item(
        &self,
        fields: &ItemFields<'_>,
        schema: &SourceSchema,
        is_first: bool,
        candidate: &mut RawCandidate,
    ) -> Option<ItemRole> {
        let name = fields.name?.trim();
        if name.is_empty() || schema.is_ignored_name(name) {
            return None;
        }

        let price = fields.price.and_then(|p| self.normalizer.plausible_price(p));
        let noise = self.normalizer.looks_like_noise(name);

        // 1. merchant header
        if is_first
            && schema.merchant_from_first_item
            && candidate.merchant.is_none()
            && price.is_none()
            && !noise
            && is_merchant_like(name)
        {
            trace!("[{}] first item {:?} taken as merchant", schema.name, name);
            candidate.merchant = Some(name.to_string());
            return Some(ItemRole::Merchant);
        }

        // 2. noise
        if noise {
            trace!("[{}] dropped noise {:?}", schema.name, name);
            return None;
        }

        // 3. priced item
        let description = describe(name, fields.quantity);
        match price {
            Some(value) => {
                candidate.line_items.push(LineItem::priced(description, value));
                Some(ItemRole::Item)
            }
            None if schema.keep_unpriced_items => {
                candidate.line_items.push(LineItem::unpriced(description));
                Some(ItemRole::Item)
            }
            None => None,
        }
    }

    /// Secondary list: dates, a store name, and the odd missed item
    fn extract_auxiliary(&self, entry: &TagValue, schema: &SourceSchema, candidate: &mut RawCandidate) {
        let fields = read_item(entry, schema);
        let name = match fields.name.map(str::trim) {
            Some(n) if !n.is_empty() => n,
            _ => return,
        };
        let price_text = fields.price.unwrap_or("");

        if let Some(date) = self.normalizer.extract_date_substring(name) {
            if candidate.date.is_none() {
                candidate.date = Some(date);
            }
            return;
        }

        let priced = self.normalizer.is_plausible_price(price_text) && price_text.trim() != name;
        if candidate.merchant.is_none()
            && !priced
            && is_merchant_like(name)
            && !self.normalizer.looks_like_noise(name)
        {
            candidate.merchant = Some(name.to_string());
            return;
        }

        let description = describe(name, fields.quantity);
        if self.normalizer.is_likely_line_item(name, price_text) && !candidate.has_item(&description) {
            if let Some(value) = self.normalizer.plausible_price(price_text) {
                candidate.line_items.push(LineItem::priced(description, value));
            }
        }
    }

    fn header_merchant(&self, tree: &TagValue, paths: &[FieldPath]) -> Option<String> {
        paths
            .iter()
            .filter_map(|path| tree.text_at(path))
            .find_map(|text| self.extract_merchant(text))
    }

    /// Total paths first, then subtotal; zero or implausible values are skipped
    fn header_total(&self, tree: &TagValue, schema: &SourceSchema) -> Option<Decimal> {
        schema
            .total
            .iter()
            .chain(&schema.subtotal)
            .filter_map(|path| tree.text_at(path))
            .filter_map(parse_price)
            .find(|value| !value.is_zero() && self.normalizer.is_plausible_total_value(*value))
    }
}

impl MerchantExtractor for CandidateExtractor {
    /// Known chain first, else the leading run of letters
    fn extract_merchant(&self, header: &str) -> Option<String> {
        let line = header.lines().map(str::trim).find(|l| !l.is_empty())?;

        if let Some(hit) = self.rules.classify(line) {
            return Some(hit.merchant);
        }

        leading_name_regex()
            .find(line)
            .map(|m| m.as_str().trim())
            .filter(|name| name.chars().count() > 2)
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemRole {
    Merchant,
    Item,
}

fn read_item<'a>(entry: &'a TagValue, schema: &SourceSchema) -> ItemFields<'a> {
    match entry {
        TagValue::Map(_) => ItemFields {
            name: first_text(entry, &schema.item_name),
            price: first_text(entry, &schema.item_price),
            quantity: first_text(entry, &schema.item_quantity),
        },
        TagValue::Leaf(_) | TagValue::List(_) => ItemFields {
            name: entry.text(),
            price: None,
            quantity: None,
        },
    }
}

fn first_text<'a>(entry: &'a TagValue, tags: &[String]) -> Option<&'a str> {
    tags.iter().find_map(|tag| entry.get(tag).and_then(TagValue::text))
}

/// Item text with a `"2 "` prefix when more than one was bought
fn describe(name: &str, quantity: Option<&str>) -> String {
    match quantity.and_then(parse_quantity) {
        Some(count) if count > 1 => format!("{} {}", count, name),
        _ => name.to_string(),
    }
}

/// Not digit-first, longer than two characters
fn is_merchant_like(name: &str) -> bool {
    let starts_with_digit = name.chars().next().map_or(true, |c| c.is_ascii_digit());
    !starts_with_digit && name.chars().count() > 2
}

fn header_date(tree: &TagValue, paths: &[FieldPath]) -> Option<String> {
    let text = paths.iter().find_map(|path| tree.text_at(path))?;
    crate::normalizer::extract_date_substring(text)
        .or_else(|| text.split_whitespace().next().map(str::to_string))
}

// ============================================================================
// TESTS
// ============================================================================
