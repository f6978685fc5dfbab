// 🔍 Line-Item Merge - combine two item lists without duplicates
// Two strategies: one source dominates, or both are merged by normalized name

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::extractor::LineItem;

/// Default dominance ratio
pub const DEFAULT_DOMINANCE_RATIO: f64 = 1.5;

// ============================================================================
// MERGE STRATEGY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// Source A had clearly more priced items; its list is used as-is
    DominantA,

    /// Source B had clearly more priced items; its list is used as-is
    DominantB,

    /// Priced items from both, then unpriced items with unseen names
    Merged,
}

impl MergeStrategy {
    pub fn name(&self) -> &str {
        match self {
            MergeStrategy::DominantA => "dominant-a",
            MergeStrategy::DominantB => "dominant-b",
            MergeStrategy::Merged => "merged",
        }
    }
}

// ============================================================================
// MERGE RESULT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub items: Vec<LineItem>,
    pub strategy: MergeStrategy,

    /// Items with a valid price in source A
    pub a_valid: usize,

    /// Items with a valid price in source B
    pub b_valid: usize,

    /// Descriptions skipped because the name was already present
    pub duplicates: Vec<String>,
}

// ============================================================================
// MERGE ENGINE
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct LineItemMerger {
    /// A source dominates when its priced count exceeds the other's times this (default: 1.5)
    pub dominance_ratio: f64,
}

impl LineItemMerger {
    /// Create merger with the default ratio
    pub fn new() -> Self {
        LineItemMerger {
            dominance_ratio: DEFAULT_DOMINANCE_RATIO,
        }
    }

    pub fn with_ratio(dominance_ratio: f64) -> Self {
        LineItemMerger { dominance_ratio }
    }

    /// Which strategy applies to these priced-item counts
    pub fn choose_strategy(&self, a_valid: usize, b_valid: usize) -> MergeStrategy {
        if a_valid as f64 > b_valid as f64 * self.dominance_ratio {
            MergeStrategy::DominantA
        } else if b_valid as f64 > a_valid as f64 * self.dominance_ratio {
            MergeStrategy::DominantB
        } else {
            MergeStrategy::Merged
        }
    }

    /// Merge items from source A (general) and source B (numeric)
    pub fn merge(&self, a: &[LineItem], b: &[LineItem]) -> MergeOutcome {
        let a_valid = count_valid(a);
        let b_valid = count_valid(b);
        let strategy = self.choose_strategy(a_valid, b_valid);

        debug!(
            "merging items: A {} priced of {}, B {} priced of {} → {}",
            a_valid,
            a.len(),
            b_valid,
            b.len(),
            strategy.name()
        );

        let (items, duplicates) = match strategy {
            MergeStrategy::DominantA => (a.to_vec(), Vec::new()),
            MergeStrategy::DominantB => (b.to_vec(), Vec::new()),
            MergeStrategy::Merged => merge_by_name(a, b),
        };

        MergeOutcome {
            items,
            strategy,
            a_valid,
            b_valid,
            duplicates,
        }
    }
}

impl Default for LineItemMerger {
    fn default() -> Self {
        Self::new()
    }
}

fn count_valid(items: &[LineItem]) -> usize {
    items.iter().filter(|i| i.source_valid_price).count()
}

/// Priced items first (A then B), then unpriced ones; first occurrence of a name wins
fn merge_by_name(a: &[LineItem], b: &[LineItem]) -> (Vec<LineItem>, Vec<String>) {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    let mut duplicates = Vec::new();

    let priced = a.iter().chain(b).filter(|i| i.source_valid_price);
    let unpriced = a.iter().chain(b).filter(|i| !i.source_valid_price);

    for item in priced.chain(unpriced) {
        if seen.insert(item.normalized_name()) {
            merged.push(item.clone());
        } else {
            duplicates.push(item.description.clone());
        }
    }

    (merged, duplicates)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn priced(name: &str, cents: i64) -> LineItem {
        LineItem::priced(name, Decimal::new(cents, 2))
    }

    fn descriptions(items: &[LineItem]) -> Vec<&str> {
        items.iter().map(|i| i.description.as_str()).collect()
    }

    #[test]
    fn test_dominant_source_used_exclusively() {
        let a: Vec<LineItem> = (1..=5).map(|n| priced(&format!("Item {}", n), 100 * n)).collect();
        let b = vec![priced("Something Else", 999)];

        let outcome = LineItemMerger::new().merge(&a, &b);

        assert_eq!(outcome.strategy, MergeStrategy::DominantA);
        assert_eq!(outcome.items, a);
        assert_eq!((outcome.a_valid, outcome.b_valid), (5, 1));
    }

    #[test]
    fn test_dominant_b() {
        let a = vec![priced("Coffee", 300)];
        let b = vec![priced("Coffee", 300), priced("Tea", 250)];

        let outcome = LineItemMerger::new().merge(&a, &b);

        assert_eq!(outcome.strategy, MergeStrategy::DominantB);
        assert_eq!(descriptions(&outcome.items), vec!["Coffee", "Tea"]);
    }

    #[test]
    fn test_balanced_sources_merge_by_name() {
        let a = vec![priced("Coffee", 300), priced("Bagel", 200), LineItem::unpriced("Water")];
        let b = vec![
            LineItem::unpriced("Napkin"),
            priced("COFFEE", 310),
            priced("Tea", 250),
            LineItem::unpriced("water"),
        ];

        let outcome = LineItemMerger::new().merge(&a, &b);

        assert_eq!(outcome.strategy, MergeStrategy::Merged);
        assert_eq!(
            descriptions(&outcome.items),
            vec!["Coffee", "Bagel", "Tea", "Water", "Napkin"]
        );
        assert_eq!(outcome.items[0].amount, "3.00");
        assert_eq!(outcome.duplicates, vec!["COFFEE".to_string(), "water".to_string()]);
    }

    #[test]
    fn test_priced_copy_beats_earlier_unpriced_copy() {
        let a = vec![LineItem::unpriced("Fries")];
        let b = vec![priced("Fries", 199)];

        let outcome = LineItemMerger::new().merge(&a, &b);

        // 0 priced vs 1 priced: B dominates outright
        assert_eq!(outcome.strategy, MergeStrategy::DominantB);
        assert!(outcome.items[0].source_valid_price);

        let a = vec![LineItem::unpriced("Fries"), priced("Shake", 350)];
        let b = vec![priced("fries", 199)];
        let outcome = LineItemMerger::new().merge(&a, &b);
        assert_eq!(outcome.strategy, MergeStrategy::Merged);
        assert_eq!(descriptions(&outcome.items), vec!["Shake", "fries"]);
    }

    #[test]
    fn test_threshold_is_strict() {
        let merger = LineItemMerger::new();

        assert_eq!(merger.choose_strategy(3, 2), MergeStrategy::Merged);
        assert_eq!(merger.choose_strategy(4, 2), MergeStrategy::DominantA);
        assert_eq!(merger.choose_strategy(0, 0), MergeStrategy::Merged);
        assert_eq!(merger.choose_strategy(0, 1), MergeStrategy::DominantB);
    }

    #[test]
    fn test_custom_ratio() {
        let merger = LineItemMerger::with_ratio(3.0);
        assert_eq!(merger.choose_strategy(5, 2), MergeStrategy::Merged);
        assert_eq!(merger.choose_strategy(7, 2), MergeStrategy::DominantA);
    }
}
