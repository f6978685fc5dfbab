// Receipt Reconciler - Core Library
// Tag-sequence parsing, field normalization, per-source extraction and
// two-source reconciliation for receipt-understanding model output

pub mod parser;         // Tag grammar → TagValue tree
pub mod normalizer;     // Prices, dates, noise lines
pub mod schema;         // Per-source tag vocabularies
pub mod rules;          // Merchant rules
pub mod extractor;      // Tree → RawCandidate
pub mod deduplication;  // Line-item merge
pub mod reconciliation; // Two candidates → CanonicalReceipt
pub mod data_quality;   // Receipt quality checks
pub mod config;
pub mod pipeline;

// Re-export commonly used types
pub use parser::{parse, TagTreeParser, TagValue};
pub use normalizer::{
    canonicalize_price, extract_date_substring, format_amount, looks_like_noise,
    normalize_date, parse_price, parse_quantity, FieldNormalizer, PriceBounds,
};
pub use schema::{FieldPath, SchemaError, SourceRole, SourceSchema};
pub use rules::{MerchantMatch, MerchantRule, RuleEngine};
pub use extractor::{CandidateExtractor, LineItem, MerchantExtractor, RawCandidate};
pub use deduplication::{LineItemMerger, MergeOutcome, MergeStrategy};
pub use reconciliation::{
    CanonicalReceipt, Discrepancy, DiscrepancyCategory, FieldSource,
    ReconciliationEngine, ReconciliationReport,
};
pub use data_quality::{
    BatchSummary, QualityIssue, QualityReport, ReceiptQualityEngine, Severity,
    ValidationResult as QualityValidationResult,
};
pub use config::PipelineConfig;
pub use pipeline::{ReceiptPipeline, ScanInput, ScanOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
