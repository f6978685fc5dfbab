// ⚙️ Pipeline Configuration - thresholds and schemas as data
//
// Every field has a default, so a config file only needs the keys it changes:
//
//   { "dominance_ratio": 2.0, "bounds": { "total_ceiling": "5000" } }

use anyhow::{bail, Context as AnyhowContext, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::deduplication::DEFAULT_DOMINANCE_RATIO;
use crate::normalizer::PriceBounds;
use crate::rules::RuleEngine;
use crate::schema::SourceSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tag vocabulary of the general-purpose model (source A)
    pub general_schema: SourceSchema,

    /// Tag vocabulary of the numerically-specialized model (source B)
    pub numeric_schema: SourceSchema,

    pub bounds: PriceBounds,

    /// A source's items win outright above this priced-count ratio
    pub dominance_ratio: f64,

    /// Amount comparisons in reports
    pub amount_tolerance: Decimal,

    /// Quality confidence below this marks a receipt for review
    pub review_threshold: f64,

    /// Task markers stripped besides `<s_cord-v2>`
    pub extra_task_markers: Vec<String>,

    pub use_builtin_chains: bool,

    /// JSON list of merchant rules, relative to the working directory
    pub merchant_rules_file: Option<PathBuf>,

    /// Threads for batch scans; 0 = available parallelism
    pub batch_workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            general_schema: SourceSchema::cord_v2(),
            numeric_schema: SourceSchema::invoice_receipts(),
            bounds: PriceBounds::default(),
            dominance_ratio: DEFAULT_DOMINANCE_RATIO,
            amount_tolerance: Decimal::new(1, 2),
            review_threshold: 0.7,
            extra_task_markers: Vec::new(),
            use_builtin_chains: true,
            merchant_rules_file: None,
            batch_workers: 0,
        }
    }
}

impl PipelineConfig {
    /// Load config from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: PipelineConfig = serde_json::from_str(&content)
            .context("Failed to parse config JSON")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.dominance_ratio >= 1.0) {
            bail!("dominance_ratio must be at least 1.0, got {}", self.dominance_ratio);
        }

        let bounds = &self.bounds;
        for (name, value) in [
            ("price_ceiling", bounds.price_ceiling),
            ("total_ceiling", bounds.total_ceiling),
            ("line_item_ceiling", bounds.line_item_ceiling),
        ] {
            if value <= Decimal::ZERO {
                bail!("bounds.{} must be positive, got {}", name, value);
            }
        }

        if self.amount_tolerance.is_sign_negative() {
            bail!("amount_tolerance must not be negative");
        }

        if !(0.0..=1.0).contains(&self.review_threshold) {
            bail!("review_threshold must be within 0.0..=1.0, got {}", self.review_threshold);
        }

        for schema in [&self.general_schema, &self.numeric_schema] {
            if let Err(errors) = schema.validate() {
                let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                bail!("Invalid source schema: {}", messages.join("; "));
            }
        }

        Ok(())
    }

    /// Built-in chains plus the rules file, if any
    pub fn merchant_rules(&self) -> Result<RuleEngine> {
        let mut engine = if self.use_builtin_chains {
            RuleEngine::with_builtin_chains()
        } else {
            RuleEngine::new()
        };

        if let Some(path) = &self.merchant_rules_file {
            engine.merge(RuleEngine::from_file(path)?);
        }

        Ok(engine)
    }

    pub fn worker_count(&self) -> usize {
        if self.batch_workers > 0 {
            return self.batch_workers;
        }
        std::thread::available_parallelism().map_or(1, |n| n.get())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.dominance_ratio, 1.5);
        assert_eq!(config.general_schema, SourceSchema::cord_v2());
        assert!(config.worker_count() >= 1);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{ "dominance_ratio": 2.0, "batch_workers": 3, "bounds": { "total_ceiling": "5000" } }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.dominance_ratio, 2.0);
        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.bounds.total_ceiling, Decimal::new(5000, 0));
        assert_eq!(config.bounds.price_ceiling, Decimal::new(10_000, 0));
        assert_eq!(config.numeric_schema, SourceSchema::invoice_receipts());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = PipelineConfig::default();
        config.dominance_ratio = 0.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.bounds.total_ceiling = Decimal::ZERO;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("total_ceiling"));

        let mut config = PipelineConfig::default();
        config.review_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.numeric_schema.item_price.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_files_are_errors() {
        assert!(PipelineConfig::from_file("/nonexistent/config.json").is_err());

        let mut config = PipelineConfig::default();
        config.merchant_rules_file = Some(PathBuf::from("/nonexistent/rules.json"));
        assert!(config.merchant_rules().is_err());
    }

    #[test]
    fn test_merchant_rules_builtin_toggle() {
        let mut config = PipelineConfig::default();
        assert_eq!(config.merchant_rules().unwrap().rule_count(), 13);

        config.use_builtin_chains = false;
        assert_eq!(config.merchant_rules().unwrap().rule_count(), 0);
    }
}
