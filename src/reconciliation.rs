// ⚖️ Reconciliation Engine - two partial receipts → one canonical receipt
//
// Field precedence is fixed:
//   merchant: A (general model) then B
//   date:     B (numeric model) then A
//   total:    B then A, then the sum of the merged items
// Items go through `LineItemMerger`. The reconciled total is checked against
// the plausibility bound once more and cleared if it fails.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::deduplication::{LineItemMerger, MergeStrategy};
use crate::extractor::{sum_valid, LineItem, RawCandidate};
use crate::normalizer::{format_amount, parse_price, FieldNormalizer};
use crate::schema::SourceRole;

// ============================================================================
// CANONICAL RECEIPT
// ============================================================================

/// The reconciled record handed to storage/API callers.
///
/// Absent fields serialize as `""`; reading `""` back gives `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalReceipt {
    #[serde(default, with = "blank_as_none")]
    pub merchant: Option<String>,

    #[serde(default, with = "blank_as_none")]
    pub date: Option<String>,

    /// Fixed two-decimal text
    #[serde(default, with = "blank_as_none")]
    pub total: Option<String>,

    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

impl CanonicalReceipt {
    pub fn is_empty(&self) -> bool {
        self.merchant.is_none()
            && self.date.is_none()
            && self.total.is_none()
            && self.line_items.is_empty()
    }

    /// Sum of the items that carried a valid price
    pub fn line_item_sum(&self) -> Option<Decimal> {
        sum_valid(&self.line_items)
    }

    pub fn total_value(&self) -> Option<Decimal> {
        self.total.as_deref().and_then(parse_price)
    }

    /// SHA-256 over merchant, date, total and items; lets a store spot re-scans
    pub fn compute_idempotency_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}",
            self.merchant.as_deref().unwrap_or(""),
            self.date.as_deref().unwrap_or(""),
            self.total.as_deref().unwrap_or("")
        ));
        for item in &self.line_items {
            hasher.update(format!("|{}:{}", item.normalized_name(), item.amount));
        }
        format!("{:x}", hasher.finalize())
    }
}

mod blank_as_none {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.as_deref().unwrap_or(""))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value.filter(|s| !s.trim().is_empty()))
    }
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

/// Where a canonical field came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldSource {
    SourceA,
    SourceB,
    LineItemSum,
    Absent,
}

impl FieldSource {
    pub fn name(&self) -> &str {
        match self {
            FieldSource::SourceA => "A",
            FieldSource::SourceB => "B",
            FieldSource::LineItemSum => "item-sum",
            FieldSource::Absent => "absent",
        }
    }
}

impl From<SourceRole> for FieldSource {
    fn from(role: SourceRole) -> Self {
        match role {
            SourceRole::General => FieldSource::SourceA,
            SourceRole::Numeric => FieldSource::SourceB,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub receipt: CanonicalReceipt,
    pub merchant_source: FieldSource,
    pub date_source: FieldSource,
    pub total_source: FieldSource,
    pub strategy: MergeStrategy,
    pub a_valid_items: usize,
    pub b_valid_items: usize,
    pub duplicates_removed: usize,
    pub discrepancies: Vec<Discrepancy>,
    pub reconciled_at: DateTime<Utc>,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Receipt from {} on {}: total {} (from {}), {} items via {} (A {} / B {} priced), {} discrepancies",
            self.receipt.merchant.as_deref().unwrap_or("-"),
            self.receipt.date.as_deref().unwrap_or("-"),
            self.receipt.total.as_deref().unwrap_or("-"),
            self.total_source.name(),
            self.receipt.line_items.len(),
            self.strategy.name(),
            self.a_valid_items,
            self.b_valid_items,
            self.discrepancies.len()
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discrepancy {
    pub description: String,
    pub amount: Option<Decimal>,
    pub category: DiscrepancyCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscrepancyCategory {
    /// Both sources report a total and they differ
    SourceTotalsDisagree,

    /// Priced items do not add up to the total
    ItemSumMismatch,

    /// Reconciled total failed the plausibility bound and was cleared
    ImplausibleTotal,
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ReconciliationEngine {
    normalizer: FieldNormalizer,
    merger: LineItemMerger,

    /// Tolerance for amount comparisons (default: 0.01)
    pub tolerance: Decimal,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            normalizer: FieldNormalizer::new(),
            merger: LineItemMerger::new(),
            tolerance: Decimal::new(1, 2),
        }
    }

    pub fn with_normalizer(mut self, normalizer: FieldNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_dominance_ratio(mut self, ratio: f64) -> Self {
        self.merger = LineItemMerger::with_ratio(ratio);
        self
    }

    pub fn with_tolerance(mut self, tolerance: Decimal) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Combine the general-model candidate `a` with the numeric-model candidate `b`
    pub fn reconcile(&self, a: &RawCandidate, b: &RawCandidate) -> CanonicalReceipt {
        self.reconcile_with_report(a, b).receipt
    }

    pub fn reconcile_with_report(&self, a: &RawCandidate, b: &RawCandidate) -> ReconciliationReport {
        let (merchant, merchant_source) = prefer(&a.merchant, &b.merchant, SourceRole::General);
        let (date, date_source) = prefer(&b.date, &a.date, SourceRole::Numeric);

        let merged = self.merger.merge(&a.line_items, &b.line_items);
        let item_sum = sum_valid(&merged.items);

        let (mut total, mut total_source) = prefer(&b.total, &a.total, SourceRole::Numeric);
        if total.is_none() {
            if let Some(sum) = item_sum {
                total = Some(format_amount(sum));
                total_source = FieldSource::LineItemSum;
            }
        }

        let mut discrepancies = Vec::new();

        if let (Some(a_total), Some(b_total)) = (
            a.total.as_deref().and_then(parse_price),
            b.total.as_deref().and_then(parse_price),
        ) {
            let difference = a_total.checked_sub(b_total).map(|d| d.abs());
            if let Some(difference) = difference.filter(|d| *d > self.tolerance) {
                discrepancies.push(Discrepancy {
                    description: format!("Sources disagree on total: A {} vs B {}", a_total, b_total),
                    amount: Some(difference),
                    category: DiscrepancyCategory::SourceTotalsDisagree,
                });
            }
        }

        // Final plausibility check on whatever won
        if let Some(text) = total.take() {
            match parse_price(&text) {
                Some(value) if self.normalizer.is_plausible_total_value(value) => {
                    total = Some(format_amount(value));
                }
                _ => {
                    warn!("clearing implausible total {:?} from {}", text, total_source.name());
                    discrepancies.push(Discrepancy {
                        description: format!("Total {} cleared as implausible", text),
                        amount: parse_price(&text),
                        category: DiscrepancyCategory::ImplausibleTotal,
                    });
                    total_source = FieldSource::Absent;
                }
            }
        }

        if let (Some(total_value), Some(sum)) = (total.as_deref().and_then(parse_price), item_sum) {
            let difference = total_value.checked_sub(sum).map(|d| d.abs());
            if let Some(difference) = difference.filter(|d| *d > self.tolerance) {
                discrepancies.push(Discrepancy {
                    description: format!("Line items sum to {} but total is {}", format_amount(sum), format_amount(total_value)),
                    amount: Some(difference),
                    category: DiscrepancyCategory::ItemSumMismatch,
                });
            }
        }

        let receipt = CanonicalReceipt {
            merchant,
            date,
            total,
            line_items: merged.items,
        };

        debug!(
            "reconciled: merchant from {}, date from {}, total from {}, {} discrepancies",
            merchant_source.name(),
            date_source.name(),
            total_source.name(),
            discrepancies.len()
        );

        ReconciliationReport {
            receipt,
            merchant_source,
            date_source,
            total_source,
            strategy: merged.strategy,
            a_valid_items: merged.a_valid,
            b_valid_items: merged.b_valid,
            duplicates_removed: merged.duplicates.len(),
            discrepancies,
            reconciled_at: Utc::now(),
        }
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// First non-blank value; `first_role` names where `first` came from
fn prefer(
    first: &Option<String>,
    second: &Option<String>,
    first_role: SourceRole,
) -> (Option<String>, FieldSource) {
    let second_role = match first_role {
        SourceRole::General => SourceRole::Numeric,
        SourceRole::Numeric => SourceRole::General,
    };

    let present = |v: &Option<String>| v.as_ref().filter(|s| !s.trim().is_empty()).cloned();

    match (present(first), present(second)) {
        (Some(value), _) => (Some(value), first_role.into()),
        (None, Some(value)) => (Some(value), second_role.into()),
        (None, None) => (None, FieldSource::Absent),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn priced(name: &str, cents: i64) -> LineItem {
        LineItem::priced(name, Decimal::new(cents, 2))
    }

    fn descriptions(receipt: &CanonicalReceipt) -> Vec<&str> {
        receipt.line_items.iter().map(|i| i.description.as_str()).collect()
    }

    #[test]
    fn test_field_precedence() {
        let a = RawCandidate::new().with_merchant("Diner").with_date("1/1/2020").with_total("10.00");
        let b = RawCandidate::new().with_merchant("DINER INC").with_date("1/2/2020").with_total("11.00");

        let report = ReconciliationEngine::new().reconcile_with_report(&a, &b);

        assert_eq!(report.receipt.merchant, Some("Diner".to_string()));
        assert_eq!(report.receipt.date, Some("1/2/2020".to_string()));
        assert_eq!(report.receipt.total, Some("11.00".to_string()));
        assert_eq!(report.merchant_source, FieldSource::SourceA);
        assert_eq!(report.date_source, FieldSource::SourceB);
        assert_eq!(report.total_source, FieldSource::SourceB);
    }

    #[test]
    fn test_fallbacks_to_other_source() {
        let a = RawCandidate::new().with_date("3/3/2021").with_total("4.00");
        let b = RawCandidate::new().with_merchant("Cafe Luna");

        let report = ReconciliationEngine::new().reconcile_with_report(&a, &b);

        assert_eq!(report.receipt.merchant, Some("Cafe Luna".to_string()));
        assert_eq!(report.merchant_source, FieldSource::SourceB);
        assert_eq!(report.receipt.date, Some("3/3/2021".to_string()));
        assert_eq!(report.total_source, FieldSource::SourceA);
    }

    #[test]
    fn test_merge_dominance() {
        let mut a = RawCandidate::new();
        for n in 1..=5 {
            a = a.with_item(priced(&format!("Dish {}", n), 500 + n));
        }
        let b = RawCandidate::new().with_item(priced("Dish 1", 501));

        let report = ReconciliationEngine::new().reconcile_with_report(&a, &b);

        assert_eq!(report.strategy, MergeStrategy::DominantA);
        assert_eq!(report.receipt.line_items, a.line_items);
    }

    #[test]
    fn test_merge_balance() {
        let a = RawCandidate::new().with_item(priced("Coffee", 300));
        let b = RawCandidate::new()
            .with_item(priced("Coffee", 300))
            .with_item(priced("Tea", 250));

        let receipt = ReconciliationEngine::new().reconcile(&a, &b);

        assert_eq!(descriptions(&receipt), vec!["Coffee", "Tea"]);
        assert_eq!(receipt.line_items[1].amount, "2.50");
    }

    #[test]
    fn test_total_fallback_to_item_sum() {
        let a = RawCandidate::new().with_item(priced("Soup", 600));
        let b = RawCandidate::new().with_item(priced("Bread", 250));

        let report = ReconciliationEngine::new().reconcile_with_report(&a, &b);

        assert_eq!(report.receipt.total, Some("8.50".to_string()));
        assert_eq!(report.total_source, FieldSource::LineItemSum);
        assert!(report.is_consistent());
    }

    #[test]
    fn test_implausible_total_cleared() {
        let a = RawCandidate::new().with_item(priced("Soup", 600));
        let b = RawCandidate::new().with_total("15000");

        let report = ReconciliationEngine::new().reconcile_with_report(&a, &b);

        assert_eq!(report.receipt.total, None);
        assert_eq!(report.total_source, FieldSource::Absent);
        assert!(report
            .discrepancies
            .iter()
            .any(|d| d.category == DiscrepancyCategory::ImplausibleTotal));
    }

    #[test]
    fn test_discrepancies_reported() {
        let a = RawCandidate::new().with_total("12.00").with_item(priced("Pasta", 1000));
        let b = RawCandidate::new().with_total("12.50");

        let report = ReconciliationEngine::new().reconcile_with_report(&a, &b);
        let categories: Vec<DiscrepancyCategory> = report.discrepancies.iter().map(|d| d.category).collect();

        assert_eq!(
            categories,
            vec![DiscrepancyCategory::SourceTotalsDisagree, DiscrepancyCategory::ItemSumMismatch]
        );
        assert_eq!(report.discrepancies[0].amount, Some(Decimal::new(50, 2)));
        assert!(report.summary().contains("2 discrepancies"));
    }

    #[test]
    fn test_extreme_amounts_do_not_panic() {
        let huge = "79228162514264337593543950335".to_string();
        let mut a = RawCandidate::new().with_item(priced("Soup", 600));
        a.total = Some(huge.clone());
        a.line_items.push(LineItem {
            description: "Glitch".to_string(),
            amount: huge.clone(),
            source_valid_price: true,
        });
        let mut b = RawCandidate::new();
        b.total = Some(format!("-{}", huge));

        let report = ReconciliationEngine::new().reconcile_with_report(&a, &b);

        assert_eq!(report.receipt.total, None);
        assert_eq!(report.total_source, FieldSource::Absent);
        assert!(!report
            .discrepancies
            .iter()
            .any(|d| d.category == DiscrepancyCategory::SourceTotalsDisagree));
    }

    #[test]
    fn test_both_empty_gives_empty_receipt() {
        let receipt = ReconciliationEngine::new().reconcile(&RawCandidate::new(), &RawCandidate::new());
        assert!(receipt.is_empty());
    }

    #[test]
    fn test_blank_strings_count_as_absent() {
        let a = RawCandidate::new().with_merchant("  ");
        let b = RawCandidate::new().with_merchant("Deli");

        let receipt = ReconciliationEngine::new().reconcile(&a, &b);
        assert_eq!(receipt.merchant, Some("Deli".to_string()));
    }

    #[test]
    fn test_canonical_receipt_json_uses_empty_strings() {
        let receipt = CanonicalReceipt {
            merchant: Some("Diner".to_string()),
            date: None,
            total: Some("3.00".to_string()),
            line_items: vec![priced("Coffee", 300)],
        };

        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["date"], "");
        assert_eq!(json["line_items"][0]["amount"], "3.00");

        let back: CanonicalReceipt = serde_json::from_value(json).unwrap();
        assert_eq!(back, receipt);
    }

    #[test]
    fn test_idempotency_hash() {
        let receipt = CanonicalReceipt {
            merchant: Some("Diner".to_string()),
            date: Some("1/1/2020".to_string()),
            total: Some("3.00".to_string()),
            line_items: vec![priced("Coffee", 300)],
        };
        let mut changed = receipt.clone();
        changed.total = Some("3.01".to_string());

        let hash = receipt.compute_idempotency_hash();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, receipt.clone().compute_idempotency_hash());
        assert_ne!(hash, changed.compute_idempotency_hash());
    }
}
