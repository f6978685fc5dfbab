// 🔄 Receipt Pipeline - token strings → canonical receipt
//
//   sequence A ─ parse ─ extract(general schema) ─┐
//                                                  ├─ reconcile ─ quality
//   sequence B ─ parse ─ extract(numeric schema) ─┘
//
// Every stage is pure, so receipts in a batch are independent and are spread
// over scoped threads.

use anyhow::Result;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::thread;

use crate::config::PipelineConfig;
use crate::data_quality::{BatchSummary, QualityReport, ReceiptQualityEngine};
use crate::extractor::{CandidateExtractor, RawCandidate};
use crate::normalizer::FieldNormalizer;
use crate::parser::TagTreeParser;
use crate::reconciliation::{CanonicalReceipt, ReconciliationEngine, ReconciliationReport};
use crate::schema::{SourceRole, SourceSchema};

// ============================================================================
// INPUT / OUTPUT
// ============================================================================

/// One receipt's decoded model outputs (one CSV row in batch mode)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanInput {
    pub receipt_id: String,
    pub general_sequence: String,
    pub numeric_sequence: String,
}

impl ScanInput {
    pub fn new(receipt_id: impl Into<String>, general: impl Into<String>, numeric: impl Into<String>) -> Self {
        ScanInput {
            receipt_id: receipt_id.into(),
            general_sequence: general.into(),
            numeric_sequence: numeric.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub receipt_id: String,
    pub report: ReconciliationReport,
    pub quality: QualityReport,
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct ReceiptPipeline {
    parser: TagTreeParser,
    extractor: CandidateExtractor,
    engine: ReconciliationEngine,
    quality: ReceiptQualityEngine,
    general_schema: SourceSchema,
    numeric_schema: SourceSchema,
    workers: usize,
}

impl ReceiptPipeline {
    /// Pipeline with default schemas, bounds and built-in merchant rules
    pub fn new() -> Self {
        let config = PipelineConfig::default();
        ReceiptPipeline {
            parser: TagTreeParser::new(),
            extractor: CandidateExtractor::new(),
            engine: ReconciliationEngine::new(),
            quality: ReceiptQualityEngine::new(),
            workers: config.worker_count(),
            general_schema: config.general_schema,
            numeric_schema: config.numeric_schema,
        }
    }

    /// Build from config; fails only on an invalid config or unreadable rules file
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;

        let normalizer = FieldNormalizer::with_bounds(config.bounds);
        let rules = config.merchant_rules()?;
        info!(
            "pipeline: {} merchant rules, schemas {} / {}, {} workers",
            rules.rule_count(),
            config.general_schema.name,
            config.numeric_schema.name,
            config.worker_count()
        );

        let parser = config
            .extra_task_markers
            .iter()
            .fold(TagTreeParser::new(), |parser, marker| parser.with_task_marker(marker.clone()));

        Ok(ReceiptPipeline {
            parser,
            extractor: CandidateExtractor::new()
                .with_normalizer(normalizer)
                .with_rules(rules),
            engine: ReconciliationEngine::new()
                .with_normalizer(normalizer)
                .with_dominance_ratio(config.dominance_ratio)
                .with_tolerance(config.amount_tolerance),
            quality: ReceiptQualityEngine::new()
                .with_sum_tolerance(config.amount_tolerance)
                .with_review_threshold(config.review_threshold),
            general_schema: config.general_schema.clone(),
            numeric_schema: config.numeric_schema.clone(),
            workers: config.worker_count(),
        })
    }

    pub fn schema(&self, role: SourceRole) -> &SourceSchema {
        match role {
            SourceRole::General => &self.general_schema,
            SourceRole::Numeric => &self.numeric_schema,
        }
    }

    /// Parse and extract one source's sequence
    pub fn extract(&self, role: SourceRole, sequence: &str) -> RawCandidate {
        let tree = self.parser.parse(sequence);
        let candidate = self.extractor.extract(&tree, self.schema(role));
        if candidate.is_empty() {
            debug!("source {} produced nothing", role.code());
        }
        candidate
    }

    pub fn scan(&self, general_sequence: &str, numeric_sequence: &str) -> CanonicalReceipt {
        self.scan_with_report(general_sequence, numeric_sequence).receipt
    }

    pub fn scan_with_report(&self, general_sequence: &str, numeric_sequence: &str) -> ReconciliationReport {
        let a = self.extract(SourceRole::General, general_sequence);
        let b = self.extract(SourceRole::Numeric, numeric_sequence);
        self.engine.reconcile_with_report(&a, &b)
    }

    /// Reconcile and grade one receipt
    pub fn scan_one(&self, input: &ScanInput) -> ScanOutcome {
        let report = self.scan_with_report(&input.general_sequence, &input.numeric_sequence);
        let quality = self.quality.validate(&report.receipt);

        if !quality.has_usable_data() {
            warn!("receipt {}: no usable data extracted", input.receipt_id);
        } else {
            debug!("receipt {}: {}", input.receipt_id, report.summary());
        }

        ScanOutcome {
            receipt_id: input.receipt_id.clone(),
            report,
            quality,
        }
    }

    /// Scan many receipts in parallel; outcomes come back in input order
    pub fn scan_batch(&self, inputs: &[ScanInput]) -> Vec<ScanOutcome> {
        if inputs.is_empty() {
            return Vec::new();
        }

        let workers = self.workers.clamp(1, inputs.len());
        let chunk_size = inputs.len().div_ceil(workers);
        info!("scanning {} receipts on {} threads", inputs.len(), workers);

        thread::scope(|scope| {
            let handles: Vec<_> = inputs
                .chunks(chunk_size)
                .map(|chunk| scope.spawn(move || chunk.iter().map(|input| self.scan_one(input)).collect::<Vec<_>>()))
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| match handle.join() {
                    Ok(outcomes) => outcomes,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }

    pub fn batch_summary(&self, outcomes: &[ScanOutcome]) -> BatchSummary {
        let reports: Vec<QualityReport> = outcomes.iter().map(|o| o.quality.clone()).collect();
        self.quality.batch_summary(&reports)
    }
}

impl Default for ReceiptPipeline {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
