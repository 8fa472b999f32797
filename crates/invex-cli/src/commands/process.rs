//! Process command - extract data from a single invoice file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use invex_core::{FieldKey, Strategy};

use super::output::{OutputFormat, format_invoice};
use super::{build_pipeline, load_config, read_document};

/// Arguments for the process command.
#[derive(Args)]
pub struct ProcessArgs {
    /// Input file (PDF, PNG or JPEG)
    #[arg(required = true)]
    input: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Model directory
    #[arg(short, long)]
    model_dir: Option<PathBuf>,

    /// OCR language hint (e.g. fra, eng)
    #[arg(short, long)]
    language: Option<String>,

    /// Page confidence below which OCR is retried
    #[arg(long)]
    confidence_threshold: Option<f32>,

    /// Skip the consistency checks
    #[arg(long)]
    no_validation: bool,

    /// Field strategy order
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Only extract these fields (comma separated paths, e.g. invoice.number)
    #[arg(long, value_delimiter = ',')]
    fields: Vec<String>,

    /// Include the per-field extraction trace
    #[arg(long)]
    trace: bool,

    /// Show confidence and timing after the output
    #[arg(long)]
    show_confidence: bool,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum StrategyArg {
    /// Rules first, model fallback
    RuleFirst,
    /// Model first, rule fallback
    ModelFirst,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::RuleFirst => Strategy::RuleFirst,
            StrategyArg::ModelFirst => Strategy::ModelFirst,
        }
    }
}

/// Parse `--fields` into keys.
pub fn parse_fields(fields: &[String]) -> anyhow::Result<Vec<FieldKey>> {
    fields
        .iter()
        .map(|f| {
            f.trim()
                .parse::<FieldKey>()
                .map_err(|_| anyhow::anyhow!("Unknown field: {}", f))
        })
        .collect()
}

pub async fn run(args: ProcessArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let document = read_document(&args.input)?;

    info!("Processing file: {}", args.input.display());

    let pipeline = build_pipeline(config, args.model_dir.clone());
    let mut options = pipeline.default_options();
    if let Some(language) = &args.language {
        options.language = language.clone();
    }
    if let Some(threshold) = args.confidence_threshold {
        options.confidence_threshold = threshold.clamp(0.0, 1.0);
    }
    if let Some(strategy) = args.strategy {
        options.strategy = strategy.into();
    }
    if !args.fields.is_empty() {
        options.field_schema = parse_fields(&args.fields)?;
    }
    options.enable_validation = !args.no_validation;
    options.include_trace = args.trace;

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message(format!("Extracting {}", args.input.display()));
    pb.enable_steady_tick(Duration::from_millis(100));

    let result = pipeline.submit(document, options).await;
    pb.finish_and_clear();
    let invoice = result?;

    let output = format_invoice(&invoice, args.format)?;

    if let Some(output_path) = &args.output {
        fs::write(output_path, &output)?;
        eprintln!(
            "{} Output written to {}",
            style("✓").green(),
            output_path.display()
        );
    } else {
        println!("{}", output);
    }

    if let Some(report) = &invoice.record.validation {
        if !report.anomalies.is_empty() {
            eprintln!("{}", style("Validation issues:").yellow());
            for anomaly in &report.anomalies {
                eprintln!("  - {}: {}", anomaly.field, anomaly.issue);
            }
        }
    }

    if args.show_confidence {
        eprintln!();
        eprintln!(
            "{} Confidence: {:.1}%",
            style("ℹ").blue(),
            invoice.metadata.confidence_score * 100.0
        );
        eprintln!(
            "{} Processing time: {:.2}s",
            style("ℹ").blue(),
            invoice.metadata.processing_time
        );
        if !invoice.metadata.low_confidence_pages.is_empty() {
            eprintln!(
                "{} Low OCR confidence on page(s) {:?}",
                style("⚠").yellow(),
                invoice.metadata.low_confidence_pages
            );
        }
    }

    debug!("Processed with {}", invoice.metadata.ocr_backend);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fields() {
        let keys = parse_fields(&["invoice.number".to_string(), " totals.total_incl_vat".to_string()]).unwrap();
        assert_eq!(keys, vec![FieldKey::InvoiceNumber, FieldKey::TotalInclVat]);
        assert!(parse_fields(&["invoice.colour".to_string()]).is_err());
    }
}
