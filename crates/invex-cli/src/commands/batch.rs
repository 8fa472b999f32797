//! Batch processing command for multiple invoice files.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Args;
use console::style;
use futures_util::StreamExt;
use futures_util::stream;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, warn};

use invex_core::{Pipeline, PipelineError, ProcessedInvoice};

use super::output::{OutputFormat, format_invoice};
use super::{build_pipeline, load_config, read_document};

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Glob pattern of input files
    #[arg(required = true)]
    input: String,

    /// Output directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Output format for each file
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Also generate a summary CSV
    #[arg(long)]
    summary: bool,

    /// Files submitted at once (default: pool workers)
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Continue on error
    #[arg(long)]
    continue_on_error: bool,

    /// Skip the consistency checks
    #[arg(long)]
    no_validation: bool,

    /// Model directory
    #[arg(short, long)]
    model_dir: Option<PathBuf>,
}

/// Result of processing a single file.
struct ProcessResult {
    path: PathBuf,
    invoice: Option<ProcessedInvoice>,
    error: Option<String>,
    code: Option<&'static str>,
    processing_time_ms: u64,
}

pub async fn run(args: BatchArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = load_config(config_path)?;

    let files: Vec<PathBuf> = glob(&args.input)?
        .filter_map(|r| r.ok())
        .filter(|p| {
            let ext = p.extension().and_then(|e| e.to_str()).unwrap_or("");
            matches!(ext.to_lowercase().as_str(), "pdf" | "png" | "jpg" | "jpeg")
        })
        .collect();

    if files.is_empty() {
        anyhow::bail!("No matching files found for pattern: {}", args.input);
    }

    println!(
        "{} Found {} files to process",
        style("ℹ").blue(),
        files.len()
    );

    if let Some(ref output_dir) = args.output_dir {
        fs::create_dir_all(output_dir)?;
    }

    let pipeline = build_pipeline(config, args.model_dir.clone());
    // More in flight than workers + queue would be refused with Capacity
    let health = pipeline.health();
    let jobs = args
        .jobs
        .unwrap_or(health.workers)
        .clamp(1, health.workers + health.queue_depth);
    debug!("Submitting up to {} files at once", jobs);

    let overall_pb = ProgressBar::new(files.len() as u64);
    overall_pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files")?
            .progress_chars("=>-"),
    );

    let mut pending = stream::iter(files)
        .map(|path| process_file(&pipeline, path, !args.no_validation))
        .buffer_unordered(jobs);

    let mut results = Vec::new();
    while let Some((result, outcome)) = pending.next().await {
        overall_pb.inc(1);
        match outcome {
            Ok(()) => results.push(result),
            Err(e) if args.continue_on_error => {
                warn!("Failed to process {}: {:#}", result.path.display(), e);
                results.push(result);
            }
            Err(e) => {
                overall_pb.abandon();
                error!("Failed to process {}: {:#}", result.path.display(), e);
                return Err(e);
            }
        }
    }
    overall_pb.finish_with_message("Complete");

    results.sort_by(|a, b| a.path.cmp(&b.path));
    let successful: Vec<_> = results.iter().filter(|r| r.invoice.is_some()).collect();
    let failed: Vec<_> = results.iter().filter(|r| r.error.is_some()).collect();

    if let Some(output_dir) = &args.output_dir {
        for result in &successful {
            if let Some(invoice) = &result.invoice {
                let stem = result.path.file_stem().and_then(|s| s.to_str()).unwrap_or("invoice");
                let output_path = output_dir.join(format!("{}.{}", stem, args.format.extension()));
                fs::write(&output_path, format_invoice(invoice, args.format)?)?;
                debug!("Wrote output to {}", output_path.display());
            }
        }
    }

    if args.summary {
        let summary_path = args
            .output_dir
            .as_ref()
            .map(|d| d.join("summary.csv"))
            .unwrap_or_else(|| PathBuf::from("summary.csv"));

        write_summary(&summary_path, &results)?;
        println!(
            "{} Summary written to {}",
            style("✓").green(),
            summary_path.display()
        );
    }

    println!();
    println!(
        "{} Processed {} files in {:?}",
        style("✓").green(),
        results.len(),
        start.elapsed()
    );
    println!(
        "   {} successful, {} failed",
        style(successful.len()).green(),
        style(failed.len()).red()
    );

    if !failed.is_empty() {
        println!();
        println!("{}", style("Failed files:").red());
        for result in &failed {
            println!(
                "  - {}: {}",
                result.path.display(),
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

/// Submit one file. The record is filled either way so failures can be
/// reported in the summary.
async fn process_file(pipeline: &Pipeline, path: PathBuf, validate: bool) -> (ProcessResult, anyhow::Result<()>) {
    let started = Instant::now();
    let mut options = pipeline.default_options();
    options.enable_validation = validate;

    let outcome = match read_document(&path) {
        Ok(document) => pipeline.submit(document, options).await.map_err(anyhow::Error::from),
        Err(e) => Err(e),
    };

    let processing_time_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(invoice) => (
            ProcessResult {
                path,
                invoice: Some(invoice),
                error: None,
                code: None,
                processing_time_ms,
            },
            Ok(()),
        ),
        Err(e) => (
            ProcessResult {
                path,
                invoice: None,
                error: Some(format!("{:#}", e)),
                code: e.downcast_ref::<PipelineError>().map(PipelineError::code),
                processing_time_ms,
            },
            Err(e),
        ),
    }
}

fn write_summary(path: &Path, results: &[ProcessResult]) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "filename",
        "status",
        "invoice_number",
        "invoice_date",
        "supplier_name",
        "total_incl_vat",
        "currency",
        "confidence",
        "calculation_check",
        "processing_time_ms",
        "code",
        "error",
    ])?;

    for result in results {
        let filename = result.path.file_name().and_then(|s| s.to_str()).unwrap_or("");
        let time = result.processing_time_ms.to_string();

        if let Some(invoice) = &result.invoice {
            let record = &invoice.record;
            let check = record
                .validation
                .as_ref()
                .map(|v| v.calculation_check.to_string())
                .unwrap_or_default();
            wtr.write_record([
                filename,
                "success",
                record.invoice.number.as_deref().unwrap_or(""),
                &record.invoice.date.map(|d| d.to_string()).unwrap_or_default(),
                record.supplier.name.as_deref().unwrap_or(""),
                &record.totals.total_incl_vat.map(|t| t.to_string()).unwrap_or_default(),
                record.invoice.currency.as_deref().unwrap_or(""),
                &format!("{:.2}", invoice.metadata.confidence_score),
                &check,
                &time,
                "",
                "",
            ])?;
        } else {
            wtr.write_record([
                filename,
                "error",
                "",
                "",
                "",
                "",
                "",
                "",
                "",
                &time,
                result.code.unwrap_or(""),
                result.error.as_deref().unwrap_or(""),
            ])?;
        }
    }

    wtr.flush()?;
    Ok(())
}
