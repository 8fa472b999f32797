//! Models command - download and manage the PaddleOCR model files.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use console::style;
use futures_util::StreamExt;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::debug;

use invex_core::models::config::ModelConfig;

use super::load_config;

/// Arguments for the models command.
#[derive(Args)]
pub struct ModelsArgs {
    #[command(subcommand)]
    command: ModelsCommand,
}

#[derive(Subcommand)]
enum ModelsCommand {
    /// List available model variants
    List,

    /// Download models
    Download(DownloadArgs),

    /// Check which model files are present
    Status(StatusArgs),

    /// Remove downloaded models
    Clean(CleanArgs),

    /// Set the active model variant
    Use(UseArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModelVariant {
    /// Mobile detection model - smaller, faster
    Mobile,
    /// Server detection model - better on dense invoices
    Server,
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelVariant::Mobile => write!(f, "mobile"),
            ModelVariant::Server => write!(f, "server"),
        }
    }
}

impl ModelVariant {
    const ALL: [ModelVariant; 2] = [ModelVariant::Mobile, ModelVariant::Server];
}

#[derive(Args)]
struct DownloadArgs {
    /// Model variant to download
    #[arg(short, long, value_enum, default_value = "mobile")]
    variant: ModelVariant,

    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Force re-download even if files exist
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct StatusArgs {
    /// Check specific variant only
    #[arg(short, long, value_enum)]
    variant: Option<ModelVariant>,
}

#[derive(Args)]
struct CleanArgs {
    /// Clean specific variant only
    #[arg(short, long, value_enum)]
    variant: Option<ModelVariant>,

    /// Clean all variants
    #[arg(long)]
    all: bool,
}

#[derive(Args)]
struct UseArgs {
    /// Variant to set as active
    #[arg(value_enum)]
    variant: ModelVariant,
}

/// One downloadable model file.
struct ModelFile {
    /// File name, matching the `models.*` config entries.
    filename: String,
    size_bytes: u64,
    description: &'static str,
    url: String,
}

const MODEL_BASE_URL: &str = "https://github.com/jakubmatias/incr/raw/main/models";

/// Files of a variant, named after the configured model files.
fn variant_files(variant: ModelVariant, models: &ModelConfig) -> Vec<ModelFile> {
    let (det_size, det_description) = match variant {
        ModelVariant::Mobile => (4_500_000, "PP-OCRv3 mobile text detection"),
        ModelVariant::Server => (84_000_000, "PP-OCRv5 server text detection"),
    };
    let url = |file: &str| format!("{}/{}/{}", MODEL_BASE_URL, variant, file);

    vec![
        ModelFile {
            filename: models.detection_model.clone(),
            size_bytes: det_size,
            description: det_description,
            url: url("det.onnx"),
        },
        ModelFile {
            filename: models.recognition_model.clone(),
            size_bytes: 7_500_000,
            description: "Latin text recognition",
            url: url("latin_rec.onnx"),
        },
        ModelFile {
            filename: models.dictionary.clone(),
            size_bytes: 2_000,
            description: "Latin character dictionary",
            url: url("latin_dict.txt"),
        },
    ]
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("invex")
}

/// Directory holding a variant's files.
pub fn get_variant_dir(variant: ModelVariant) -> PathBuf {
    data_dir().join("models").join(variant.to_string())
}

/// The variant selected with `invex models use`, mobile by default.
pub fn get_active_variant() -> ModelVariant {
    match fs::read_to_string(data_dir().join("active_variant")) {
        Ok(content) if content.trim() == "server" => ModelVariant::Server,
        _ => ModelVariant::Mobile,
    }
}

fn set_active_variant(variant: ModelVariant) -> anyhow::Result<()> {
    let dir = data_dir();
    fs::create_dir_all(&dir)?;
    fs::write(dir.join("active_variant"), variant.to_string())?;
    Ok(())
}

/// A file counts as present when it has at least half its expected size.
fn is_complete(path: &Path, model: &ModelFile) -> bool {
    fs::metadata(path).is_ok_and(|m| m.len() > model.size_bytes / 2)
}

pub async fn run(args: ModelsArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let models = &config.models;
    match args.command {
        ModelsCommand::List => list_models(models),
        ModelsCommand::Download(download_args) => download_models(download_args, models).await,
        ModelsCommand::Status(status_args) => check_status(status_args, models),
        ModelsCommand::Clean(clean_args) => clean_models(clean_args, models),
        ModelsCommand::Use(use_args) => use_variant(use_args, models),
    }
}

fn list_models(models: &ModelConfig) -> anyhow::Result<()> {
    println!("{}", style("Available Model Variants").bold());
    println!();

    let active = get_active_variant();
    for variant in ModelVariant::ALL {
        let files = variant_files(variant, models);
        let total: u64 = files.iter().map(|f| f.size_bytes).sum();
        let marker = if variant == active { " (active)" } else { "" };

        println!(
            "{} {}{}",
            style(format!("▸ {}", variant)).bold().cyan(),
            format_size(total),
            style(marker).green().bold()
        );
        for file in &files {
            println!(
                "    {:<20} {:>10}  {}",
                file.filename,
                format_size(file.size_bytes),
                file.description
            );
        }
        println!();
    }

    println!("Commands:");
    println!("  invex models download -v mobile    Download mobile models");
    println!("  invex models download -v server    Download server models");
    println!("  invex models use <variant>         Switch active variant");
    Ok(())
}

fn use_variant(args: UseArgs, models: &ModelConfig) -> anyhow::Result<()> {
    let dir = get_variant_dir(args.variant);
    let missing = variant_files(args.variant, models)
        .iter()
        .any(|f| !is_complete(&dir.join(&f.filename), f));

    if missing {
        println!(
            "{} {} models not downloaded yet.",
            style("⚠").yellow(),
            args.variant
        );
        println!("Run: invex models download -v {}", args.variant);
        return Ok(());
    }

    set_active_variant(args.variant)?;
    println!(
        "{} Switched to {} models",
        style("✓").green(),
        style(args.variant.to_string()).cyan().bold()
    );
    Ok(())
}

async fn download_models(args: DownloadArgs, models: &ModelConfig) -> anyhow::Result<()> {
    let variant = args.variant;
    let output_dir = args.output.unwrap_or_else(|| get_variant_dir(variant));
    fs::create_dir_all(&output_dir)?;

    println!(
        "{} Downloading {} models to {}",
        style("ℹ").blue(),
        style(variant.to_string()).cyan().bold(),
        output_dir.display()
    );
    println!();

    let client = reqwest::Client::builder()
        .user_agent(concat!("invex-cli/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(300))
        .build()?;

    let multi_progress = MultiProgress::new();
    let style_template = ProgressStyle::default_bar()
        .template("  {spinner:.green} {msg:<30} [{bar:25.cyan/blue}] {bytes}/{total_bytes}")?
        .progress_chars("=>-");

    let (mut downloaded, mut skipped, mut failed) = (0, 0, 0);
    for model in variant_files(variant, models) {
        let path = output_dir.join(&model.filename);
        if !args.force && is_complete(&path, &model) {
            println!("  {} {} (already present)", style("✓").green(), model.filename);
            skipped += 1;
            continue;
        }

        let pb = multi_progress.add(ProgressBar::new(model.size_bytes));
        pb.set_style(style_template.clone());
        pb.set_message(model.filename.clone());

        match download_file(&client, &model.url, &path, &pb).await {
            Ok(()) => {
                pb.finish_with_message(format!("{} {}", style("✓").green(), model.filename));
                downloaded += 1;
            }
            Err(e) => {
                pb.finish_with_message(format!("{} {} - {}", style("✗").red(), model.filename, e));
                failed += 1;
            }
        }
    }

    println!();
    if failed == 0 {
        println!(
            "{} {} models ready ({} downloaded, {} already present)",
            style("✓").green().bold(),
            variant,
            downloaded,
            skipped
        );
        if get_active_variant() != variant {
            println!(
                "{} To use these models, run: invex models use {}",
                style("ℹ").blue(),
                variant
            );
        }
    } else {
        println!(
            "{} {} downloaded, {} skipped, {} failed",
            style("⚠").yellow().bold(),
            downloaded,
            skipped,
            failed
        );
        println!("Retry with: invex models download -v {} --force", variant);
    }

    println!();
    check_status(StatusArgs { variant: Some(variant) }, models)
}

/// Stream a file to `path` through a temporary file.
async fn download_file(client: &reqwest::Client, url: &str, path: &Path, pb: &ProgressBar) -> anyhow::Result<()> {
    debug!("GET {}", url);
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        anyhow::bail!("HTTP {}", response.status());
    }
    if let Some(length) = response.content_length() {
        pb.set_length(length);
    }

    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)?;
    let mut stream = response.bytes_stream();
    let mut received: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)?;
        received += chunk.len() as u64;
        pb.set_position(received);
    }
    file.flush()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    Ok(())
}

fn check_status(args: StatusArgs, models: &ModelConfig) -> anyhow::Result<()> {
    let active = get_active_variant();
    println!("{}", style("Model Status").bold());
    println!("Active variant: {}", style(active.to_string()).cyan().bold());
    println!();

    let variants = match args.variant {
        Some(v) => vec![v],
        None => ModelVariant::ALL.to_vec(),
    };

    for variant in variants {
        let dir = get_variant_dir(variant);
        let marker = if variant == active {
            style(" ◀ active").green().to_string()
        } else {
            String::new()
        };
        println!("{} {}{}", style(format!("▸ {}", variant)).bold(), dir.display(), marker);

        let mut ready = true;
        for model in variant_files(variant, models) {
            let path = dir.join(&model.filename);
            let (status, detail) = match fs::metadata(&path) {
                Ok(meta) if is_complete(&path, &model) => (style("✓").green(), format_size(meta.len())),
                Ok(meta) => {
                    ready = false;
                    (style("⚠").yellow(), format!("{} (incomplete?)", format_size(meta.len())))
                }
                Err(_) => {
                    ready = false;
                    (style("✗").red(), "missing".to_string())
                }
            };
            println!("    {} {:<25} {:>10}", status, model.filename, detail);
        }

        if ready {
            println!("    {} Ready", style("✓").green());
        } else {
            println!(
                "    {} Run 'invex models download -v {}' to download",
                style("⚠").yellow(),
                variant
            );
        }
        println!();
    }
    Ok(())
}

fn clean_models(args: CleanArgs, models: &ModelConfig) -> anyhow::Result<()> {
    let variants = if args.all {
        ModelVariant::ALL.to_vec()
    } else if let Some(v) = args.variant {
        vec![v]
    } else {
        println!(
            "{} Specify --all to remove all models or -v <variant> for one variant",
            style("ℹ").blue()
        );
        return Ok(());
    };

    let mut removed = 0;
    let mut freed: u64 = 0;
    for variant in variants {
        let dir = get_variant_dir(variant);
        if !dir.exists() {
            continue;
        }

        for model in variant_files(variant, models) {
            let path = dir.join(&model.filename);
            if let Ok(meta) = fs::metadata(&path) {
                fs::remove_file(&path)?;
                removed += 1;
                freed += meta.len();
                println!("  {} Removed {}/{}", style("✓").green(), variant, model.filename);
            }
        }

        // Leftovers of interrupted downloads
        for entry in fs::read_dir(&dir)?.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "tmp") {
                let _ = fs::remove_file(&path);
            }
        }
    }

    if removed > 0 {
        println!();
        println!(
            "{} Removed {} files, freed {}",
            style("✓").green(),
            removed,
            format_size(freed)
        );
    } else {
        println!("{} No model files to remove.", style("ℹ").blue());
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    match bytes {
        b if b >= 1_000_000_000 => format!("{:.1}GB", b as f64 / 1e9),
        b if b >= 1_000_000 => format!("{:.1}MB", b as f64 / 1e6),
        b if b >= 1_000 => format!("{:.1}KB", b as f64 / 1e3),
        b => format!("{}B", b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(2_000), "2.0KB");
        assert_eq!(format_size(84_000_000), "84.0MB");
    }

    #[test]
    fn test_variant_files_follow_config_names() {
        let models = ModelConfig {
            recognition_model: "rec.onnx".to_string(),
            ..ModelConfig::default()
        };
        let files = variant_files(ModelVariant::Server, &models);
        assert_eq!(files[1].filename, "rec.onnx");
        assert!(files[1].url.ends_with("/server/latin_rec.onnx"));
        assert!(files[0].size_bytes > variant_files(ModelVariant::Mobile, &models)[0].size_bytes);
    }
}
