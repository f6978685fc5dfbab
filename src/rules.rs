// 🏷️ Merchant Rules - Rules as Data
// Pattern matching that maps noisy store header lines to canonical chain names

use serde::{Deserialize, Serialize};
use anyhow::{Result, Context as AnyhowContext};
use std::fs;
use std::path::Path;

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantRule {
    /// Rule ID for tracking
    pub id: String,

    /// Pattern to match (supports wildcards with *)
    pub pattern: String,

    /// Canonical merchant name
    pub merchant: String,

    /// Confidence score (0.0 - 1.0)
    #[serde(default = "default_confidence")]
    pub confidence: f64,

    /// Description/notes about this rule
    #[serde(default)]
    pub description: Option<String>,

    /// Priority (higher = applied first)
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_confidence() -> f64 {
    0.9
}

fn default_priority() -> i32 {
    0
}

/// Lowercase and drop everything but letters, digits and `*`.
/// "TACO  BELL #0231" and "Taco Bell" compare equal; so do "WENDY'S" and "wendys".
fn fold(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || *c == '*')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

impl MerchantRule {
    pub fn new(id: &str, pattern: &str, merchant: &str) -> Self {
        MerchantRule {
            id: id.to_string(),
            pattern: pattern.to_string(),
            merchant: merchant.to_string(),
            confidence: default_confidence(),
            description: None,
            priority: default_priority(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Check if pattern matches the given text
    pub fn matches(&self, text: &str) -> bool {
        let pattern = fold(&self.pattern);
        let text = fold(text);

        if pattern.is_empty() {
            return false;
        }

        if pattern.contains('*') {
            let parts: Vec<&str> = pattern.split('*').collect();
            let first = parts[0];
            let last = parts[parts.len() - 1];

            if !text.starts_with(first) {
                return false;
            }
            if text.len() < first.len() + last.len() || !text.ends_with(last) {
                return false;
            }

            // Middle parts appear in order between the anchors
            let end = text.len() - last.len();
            let mut current_pos = first.len();
            for part in &parts[1..parts.len() - 1] {
                if part.is_empty() {
                    continue;
                }
                match text[current_pos..end].find(part) {
                    Some(pos) => current_pos += pos + part.len(),
                    None => return false,
                }
            }

            true
        } else {
            text.contains(&pattern)
        }
    }
}

// ============================================================================
// MATCH RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct MerchantMatch {
    pub merchant: String,
    pub confidence: f64,
    pub rule_id: String,
}

// ============================================================================
// RULE ENGINE
// ============================================================================

/// Chains that show up on restaurant receipts often enough to be worth naming
const BUILTIN_CHAINS: &[(&str, &str, &str)] = &[
    ("taco-bell", "taco bell", "Taco Bell"),
    ("mcdonalds", "mcdonald", "McDonald's"),
    ("burger-king", "burger king", "Burger King"),
    ("wendys", "wendy", "Wendy's"),
    ("kfc", "kfc", "KFC"),
    ("subway", "subway", "Subway"),
    ("starbucks", "starbucks", "Starbucks"),
    ("chipotle", "chipotle", "Chipotle"),
    ("chilis", "chilis", "Chili's"),
    ("applebees", "applebee", "Applebee's"),
    ("olive-garden", "olive garden", "Olive Garden"),
    ("outback", "outback", "Outback"),
    ("panda-express", "panda express", "Panda Express"),
];

#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<MerchantRule>,
}

impl RuleEngine {
    /// Create a new empty rule engine
    pub fn new() -> Self {
        RuleEngine { rules: Vec::new() }
    }

    /// Engine preloaded with the common restaurant chains
    pub fn with_builtin_chains() -> Self {
        let rules = BUILTIN_CHAINS
            .iter()
            .map(|(id, pattern, merchant)| MerchantRule::new(id, pattern, merchant))
            .collect();
        RuleEngine::from_rules(rules)
    }

    /// Load rules from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read rules file: {:?}", path.as_ref()))?;

        let rules: Vec<MerchantRule> = serde_json::from_str(&content)
            .context("Failed to parse rules JSON")?;

        Ok(RuleEngine::from_rules(rules))
    }

    /// Create engine from a list of rules
    pub fn from_rules(mut rules: Vec<MerchantRule>) -> Self {
        // Stable sort keeps file order among equal priorities
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        RuleEngine { rules }
    }

    pub fn add_rule(&mut self, rule: MerchantRule) {
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Extend with rules from another engine (e.g. a user rules file)
    pub fn merge(&mut self, other: RuleEngine) {
        self.rules.extend(other.rules);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// First matching rule, highest priority first
    pub fn classify(&self, text: &str) -> Option<MerchantMatch> {
        self.rules.iter().find(|rule| rule.matches(text)).map(|rule| MerchantMatch {
            merchant: rule.merchant.clone(),
            confidence: rule.confidence,
            rule_id: rule.id.clone(),
        })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::with_builtin_chains()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_pattern_match() {
        let rule = MerchantRule::new("sb", "STARBUCKS", "Starbucks");

        assert!(rule.matches("STARBUCKS COFFEE #4521"));
        assert!(rule.matches("starbucks"));
        assert!(!rule.matches("PEETS COFFEE"));
    }

    #[test]
    fn test_whitespace_and_punctuation_insensitive() {
        let rule = MerchantRule::new("tb", "taco bell", "Taco Bell");
        assert!(rule.matches("TACOBELL #031"));
        assert!(rule.matches("Taco   Bell 1200 Main St"));

        let chilis = MerchantRule::new("ch", "chilis", "Chili's");
        assert!(chilis.matches("CHILI'S GRILL & BAR"));
    }

    #[test]
    fn test_wildcard_pattern() {
        let rule = MerchantRule::new("sb", "STARBUCKS*", "Starbucks");

        assert!(rule.matches("STARBUCKS COFFEE"));
        assert!(rule.matches("starbucks downtown"));
        assert!(!rule.matches("COFFEE STARBUCKS"));

        let anchored = MerchantRule::new("og", "OLIVE*GARDEN", "Olive Garden");
        assert!(anchored.matches("Olive Garden"));
        assert!(!anchored.matches("Olive Oil Shop"));
    }

    #[test]
    fn test_builtin_chains() {
        let engine = RuleEngine::with_builtin_chains();

        assert_eq!(engine.rule_count(), 13);
        let hit = engine.classify("MCDONALD'S #12345 OAK AVE").unwrap();
        assert_eq!(hit.merchant, "McDonald's");
        assert_eq!(hit.rule_id, "mcdonalds");
        assert!(engine.classify("Joe's Diner").is_none());
    }

    #[test]
    fn test_rule_priority() {
        let mut engine = RuleEngine::new();

        engine.add_rule(MerchantRule::new("general", "PANDA*", "Panda").with_priority(1));
        engine.add_rule(
            MerchantRule::new("specific", "PANDA EXPRESS", "Panda Express")
                .with_priority(100)
                .with_confidence(0.98),
        );

        let hit = engine.classify("PANDA EXPRESS #1881").unwrap();
        assert_eq!(hit.merchant, "Panda Express");
        assert_eq!(hit.confidence, 0.98);
    }

    #[test]
    fn test_rules_deserialize_with_defaults() {
        let json = r#"[{"id": "local", "pattern": "joes diner", "merchant": "Joe's Diner", "priority": 5}]"#;
        let rules: Vec<MerchantRule> = serde_json::from_str(json).unwrap();
        let mut engine = RuleEngine::with_builtin_chains();
        engine.merge(RuleEngine::from_rules(rules));

        let hit = engine.classify("JOES DINER 42 ELM").unwrap();
        assert_eq!(hit.merchant, "Joe's Diner");
        assert_eq!(hit.confidence, 0.9);
    }

    #[test]
    fn test_no_match() {
        let engine = RuleEngine::new();
        assert!(engine.classify("UNKNOWN MERCHANT").is_none());
    }
}
