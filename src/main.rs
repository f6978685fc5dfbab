use anyhow::{bail, Context, Result};
use log::info;
use std::env;
use std::fs;
use std::path::Path;

use receipt_reconciler::{PipelineConfig, ReceiptPipeline, ScanInput, TagTreeParser, VERSION};

const USAGE: &str = "Usage:
  receipt-reconciler parse <sequence_file>
  receipt-reconciler reconcile <general_file> <numeric_file> [config.json]
  receipt-reconciler batch <receipts.csv> [config.json]

Log level via RUST_LOG (default: info).";

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("parse") if args.len() == 3 => run_parse(&args[2]),
        Some("reconcile") if args.len() == 4 || args.len() == 5 => {
            run_reconcile(&args[2], &args[3], args.get(4))
        }
        Some("batch") if args.len() == 3 || args.len() == 4 => run_batch(&args[2], args.get(3)),
        Some("--version") => {
            println!("receipt-reconciler {}", VERSION);
            Ok(())
        }
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

fn load_config(path: Option<&String>) -> Result<PipelineConfig> {
    match path {
        Some(p) => PipelineConfig::from_file(p),
        None => Ok(PipelineConfig::default()),
    }
}

fn read_sequence(path: &str) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read sequence file: {}", path))
}

/// Print the parsed tree as JSON
fn run_parse(path: &str) -> Result<()> {
    let sequence = read_sequence(path)?;
    let tree = TagTreeParser::new().parse(&sequence);

    println!("{}", serde_json::to_string_pretty(&tree)?);
    Ok(())
}

/// Print the reconciliation report for one receipt
fn run_reconcile(general_path: &str, numeric_path: &str, config_path: Option<&String>) -> Result<()> {
    let config = load_config(config_path)?;
    let pipeline = ReceiptPipeline::from_config(&config)?;

    let general = read_sequence(general_path)?;
    let numeric = read_sequence(numeric_path)?;

    let report = pipeline.scan_with_report(&general, &numeric);
    info!("🧾 {}", report.summary());

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// CSV in (receipt_id, general_sequence, numeric_sequence), JSON lines out
fn run_batch(csv_path: &str, config_path: Option<&String>) -> Result<()> {
    let config = load_config(config_path)?;
    let pipeline = ReceiptPipeline::from_config(&config)?;

    let path = Path::new(csv_path);
    if !path.exists() {
        bail!("Receipts file not found: {}", csv_path);
    }

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open receipts file: {}", csv_path))?;

    let mut inputs = Vec::new();
    for (line, record) in reader.deserialize::<ScanInput>().enumerate() {
        let input = record.with_context(|| format!("Bad CSV record at row {}", line + 2))?;
        inputs.push(input);
    }
    info!("📂 Loaded {} receipts from {}", inputs.len(), csv_path);

    let outcomes = pipeline.scan_batch(&inputs);

    for outcome in &outcomes {
        let line = serde_json::json!({
            "receipt_id": outcome.receipt_id,
            "receipt": outcome.report.receipt,
            "strategy": outcome.report.strategy,
            "discrepancies": outcome.report.discrepancies.len(),
            "quality": outcome.quality.overall_quality,
            "needs_review": outcome.quality.needs_review,
        });
        println!("{}", line);
    }

    let summary = pipeline.batch_summary(&outcomes);
    eprintln!("✅ {}", summary.summary());

    Ok(())
}
