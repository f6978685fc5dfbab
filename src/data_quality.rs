// ✅ Receipt Quality Engine - expectation-style checks on reconciled receipts
//
// Reconciliation never fails; this is where a caller learns that a receipt
// came out empty, half-read, or internally inconsistent.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::normalizer::{format_amount, normalize_date, parse_price};
use crate::reconciliation::CanonicalReceipt;

// ============================================================================
// VALIDATION RESULT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub rule_name: String,
    pub field: String,
    pub message: String,
    pub confidence: f64,
    pub severity: Severity,
}

impl ValidationResult {
    pub fn pass(rule_name: &str, field: &str, message: &str) -> Self {
        ValidationResult {
            passed: true,
            rule_name: rule_name.to_string(),
            field: field.to_string(),
            message: message.to_string(),
            confidence: 1.0,
            severity: Severity::Info,
        }
    }

    pub fn fail(rule_name: &str, field: &str, message: &str, severity: Severity) -> Self {
        ValidationResult {
            passed: false,
            rule_name: rule_name.to_string(),
            field: field.to_string(),
            message: message.to_string(),
            confidence: match severity {
                Severity::Critical => 0.0,
                Severity::Warning => 0.5,
                Severity::Info => 0.8,
            },
            severity,
        }
    }
}

// ============================================================================
// QUALITY REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    /// Idempotency hash of the receipt
    pub receipt_id: String,
    pub overall_quality: f64,
    pub overall_confidence: f64,
    pub validations: Vec<ValidationResult>,
    pub issues: Vec<QualityIssue>,
    pub passed_count: usize,
    pub failed_count: usize,
    pub needs_review: bool,
    pub usable: bool,
}

impl QualityReport {
    pub fn summary(&self) -> String {
        format!(
            "Quality: {:.1}%, Confidence: {:.1}%, Issues: {} ({} critical)",
            self.overall_quality * 100.0,
            self.overall_confidence * 100.0,
            self.issues.len(),
            self.issues
                .iter()
                .filter(|i| i.severity == Severity::Critical)
                .count()
        )
    }

    pub fn is_high_quality(&self) -> bool {
        self.overall_quality >= 0.8 && self.overall_confidence >= 0.7
    }

    pub fn has_critical_issues(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.severity == Severity::Critical)
    }

    /// False when nothing at all was extracted
    pub fn has_usable_data(&self) -> bool {
        self.usable
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityIssue {
    pub severity: Severity,
    pub field: String,
    pub issue: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Receipt is missing what a caller needs
    Warning,  // Receipt is questionable or incomplete
    Info,     // Receipt is usable but could be better
}

// ============================================================================
// RECEIPT QUALITY ENGINE
// ============================================================================

pub struct ReceiptQualityEngine {
    /// Allowed gap between item sum and total (default: 0.01)
    sum_tolerance: Decimal,

    /// Minimum confidence before "needs_review"
    review_threshold: f64,
}

impl ReceiptQualityEngine {
    pub fn new() -> Self {
        ReceiptQualityEngine {
            sum_tolerance: Decimal::new(1, 2),
            review_threshold: 0.7,
        }
    }

    pub fn with_sum_tolerance(mut self, tolerance: Decimal) -> Self {
        self.sum_tolerance = tolerance;
        self
    }

    pub fn with_review_threshold(mut self, threshold: f64) -> Self {
        self.review_threshold = threshold;
        self
    }

    /// Run every rule against a reconciled receipt
    pub fn validate(&self, receipt: &CanonicalReceipt) -> QualityReport {
        let checks = [
            (
                self.validate_merchant(receipt.merchant.as_deref()),
                "Check the header lines or add a merchant rule for this store",
            ),
            (
                self.validate_date(receipt.date.as_deref()),
                "Enter the date as MM/DD/YYYY or YYYY-MM-DD",
            ),
            (
                self.validate_total(receipt.total.as_deref()),
                "Enter the total by hand; neither model produced a usable amount",
            ),
            (
                self.validate_items_present(receipt),
                "Re-scan with better lighting or add items manually",
            ),
            (
                self.validate_items_priced(receipt),
                "Fill in the missing prices",
            ),
            (
                self.validate_item_sum(receipt),
                "Compare item prices with the printed total",
            ),
        ];

        let mut validations = Vec::new();
        let mut issues = Vec::new();

        for (result, recommendation) in checks {
            if !result.passed {
                issues.push(QualityIssue {
                    severity: result.severity,
                    field: result.field.clone(),
                    issue: result.message.clone(),
                    recommendation: recommendation.to_string(),
                });
            }
            validations.push(result);
        }

        let passed_count = validations.iter().filter(|v| v.passed).count();
        let failed_count = validations.len() - passed_count;
        let overall_quality = passed_count as f64 / validations.len() as f64;

        let overall_confidence: f64 =
            validations.iter().map(|v| v.confidence).sum::<f64>() / validations.len() as f64;

        let needs_review = overall_confidence < self.review_threshold;

        QualityReport {
            receipt_id: receipt.compute_idempotency_hash(),
            overall_quality,
            overall_confidence,
            validations,
            issues,
            passed_count,
            failed_count,
            needs_review,
            usable: has_usable_data(receipt),
        }
    }

    pub fn validate_batch(&self, receipts: &[CanonicalReceipt]) -> Vec<QualityReport> {
        receipts.iter().map(|r| self.validate(r)).collect()
    }

    /// Summary statistics for a batch
    pub fn batch_summary(&self, reports: &[QualityReport]) -> BatchSummary {
        let total = reports.len();
        let high_quality = reports.iter().filter(|r| r.is_high_quality()).count();
        let needs_review = reports.iter().filter(|r| r.needs_review).count();
        let has_critical = reports.iter().filter(|r| r.has_critical_issues()).count();
        let unusable = reports.iter().filter(|r| !r.usable).count();

        let (avg_quality, avg_confidence) = if total == 0 {
            (0.0, 0.0)
        } else {
            (
                reports.iter().map(|r| r.overall_quality).sum::<f64>() / total as f64,
                reports.iter().map(|r| r.overall_confidence).sum::<f64>() / total as f64,
            )
        };

        BatchSummary {
            total_receipts: total,
            high_quality_count: high_quality,
            needs_review_count: needs_review,
            critical_issues_count: has_critical,
            unusable_count: unusable,
            average_quality: avg_quality,
            average_confidence: avg_confidence,
        }
    }

    // ========================================================================
    // VALIDATION RULES
    // ========================================================================

    fn validate_merchant(&self, merchant: Option<&str>) -> ValidationResult {
        match merchant {
            Some(name) if !name.trim().is_empty() => {
                ValidationResult::pass("merchant_present", "merchant", "Merchant found")
            }
            _ => ValidationResult::fail(
                "merchant_present",
                "merchant",
                "Merchant is empty",
                Severity::Warning,
            ),
        }
    }

    fn validate_date(&self, date: Option<&str>) -> ValidationResult {
        let date = match date {
            Some(d) if !d.trim().is_empty() => d,
            _ => {
                return ValidationResult::fail(
                    "date_present",
                    "date",
                    "Date is empty",
                    Severity::Warning,
                )
            }
        };

        match normalize_date(date) {
            Some(parsed) if parsed <= latest_plausible_date() => {
                ValidationResult::pass("date_valid", "date", &format!("Date {}", parsed))
            }
            Some(parsed) => ValidationResult::fail(
                "date_valid",
                "date",
                &format!("Date {} is in the future", parsed),
                Severity::Warning,
            ),
            None => ValidationResult::fail(
                "date_valid",
                "date",
                &format!("Date '{}' does not parse", date),
                Severity::Warning,
            ),
        }
    }

    fn validate_total(&self, total: Option<&str>) -> ValidationResult {
        match total {
            Some(t) if !t.trim().is_empty() => match parse_price(t) {
                Some(_) => ValidationResult::pass("total_present", "total", &format!("Total {}", t)),
                None => ValidationResult::fail(
                    "total_present",
                    "total",
                    &format!("Total {} is not an amount", t),
                    Severity::Warning,
                ),
            },
            _ => ValidationResult::fail(
                "total_present",
                "total",
                "Total is empty",
                Severity::Critical,
            ),
        }
    }

    fn validate_items_present(&self, receipt: &CanonicalReceipt) -> ValidationResult {
        if receipt.line_items.is_empty() {
            ValidationResult::fail(
                "items_present",
                "line_items",
                "No line items",
                Severity::Warning,
            )
        } else {
            ValidationResult::pass(
                "items_present",
                "line_items",
                &format!("{} line items", receipt.line_items.len()),
            )
        }
    }

    fn validate_items_priced(&self, receipt: &CanonicalReceipt) -> ValidationResult {
        let unpriced = receipt
            .line_items
            .iter()
            .filter(|i| !i.source_valid_price)
            .count();

        if unpriced == 0 {
            ValidationResult::pass("items_priced", "line_items", "Every item has a price")
        } else {
            ValidationResult::fail(
                "items_priced",
                "line_items",
                &format!("{} of {} items have no price", unpriced, receipt.line_items.len()),
                Severity::Info,
            )
        }
    }

    /// Items above the total are wrong; below it is usually tax or tip
    fn validate_item_sum(&self, receipt: &CanonicalReceipt) -> ValidationResult {
        let (total, sum) = match (receipt.total_value(), receipt.line_item_sum()) {
            (Some(total), Some(sum)) => (total, sum),
            _ => {
                return ValidationResult::pass(
                    "item_sum_consistent",
                    "total",
                    "Nothing to compare",
                )
            }
        };

        let difference = match sum.checked_sub(total) {
            Some(difference) => difference,
            None => {
                return ValidationResult::fail(
                    "item_sum_consistent",
                    "total",
                    "Item sum and total are out of range",
                    Severity::Warning,
                )
            }
        };
        if difference.abs() <= self.sum_tolerance {
            ValidationResult::pass("item_sum_consistent", "total", "Items add up to total")
        } else if difference.is_sign_positive() {
            ValidationResult::fail(
                "item_sum_consistent",
                "total",
                &format!("Items sum to {}, above total {}", format_amount(sum), format_amount(total)),
                Severity::Warning,
            )
        } else {
            ValidationResult::fail(
                "item_sum_consistent",
                "total",
                &format!("Items sum to {}, {} below total", format_amount(sum), format_amount(-difference)),
                Severity::Info,
            )
        }
    }
}

impl Default for ReceiptQualityEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Anything at all was extracted
pub fn has_usable_data(receipt: &CanonicalReceipt) -> bool {
    !receipt.is_empty()
}

fn latest_plausible_date() -> NaiveDate {
    // One day of slack for receipts scanned across a timezone boundary
    chrono::Utc::now().date_naive() + chrono::Duration::days(1)
}

// ============================================================================
// BATCH SUMMARY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_receipts: usize,
    pub high_quality_count: usize,
    pub needs_review_count: usize,
    pub critical_issues_count: usize,
    pub unusable_count: usize,
    pub average_quality: f64,
    pub average_confidence: f64,
}

impl BatchSummary {
    pub fn summary(&self) -> String {
        format!(
            "{} receipts: {:.1}% quality, {:.1}% confidence | {} high quality, {} need review, {} critical, {} empty",
            self.total_receipts,
            self.average_quality * 100.0,
            self.average_confidence * 100.0,
            self.high_quality_count,
            self.needs_review_count,
            self.critical_issues_count,
            self.unusable_count
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
