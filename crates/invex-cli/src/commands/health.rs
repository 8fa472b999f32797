//! Health command - report OCR backend reachability and pool sizing.

use std::path::{Path, PathBuf};

use clap::Args;
use console::style;

use super::{build_pipeline, load_config};

/// Arguments for the health command.
#[derive(Args)]
pub struct HealthArgs {
    /// Model directory
    #[arg(short, long)]
    model_dir: Option<PathBuf>,

    /// Print the status as JSON
    #[arg(long)]
    json: bool,
}

pub async fn run(args: HealthArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let pipeline = build_pipeline(config, args.model_dir);
    let status = pipeline.health();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        let reachable = if status.ocr_backend_reachable {
            style("reachable").green()
        } else {
            style("unreachable").red()
        };
        println!("OCR backend: {} ({})", status.backend, reachable);
        println!("Workers:     {}", status.workers);
        println!("Queue depth: {}", status.queue_depth);
        println!("In flight:   {}", status.in_flight);
    }

    if !status.ocr_backend_reachable {
        anyhow::bail!("OCR backend is not reachable, run 'invex models download'");
    }
    Ok(())
}
