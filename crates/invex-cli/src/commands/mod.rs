//! CLI subcommands and the helpers they share.

pub mod batch;
pub mod config;
pub mod health;
pub mod models;
pub mod output;
pub mod process;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use invex_core::{Document, DocumentFormat, InvexConfig, Pipeline};

/// Load the configuration: an explicit path, else the user config file,
/// else defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<InvexConfig> {
    if let Some(path) = path {
        return InvexConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("Cannot read config {}: {}", path.display(), e));
    }

    let user_config = config::default_config_path();
    if user_config.exists() {
        debug!("Using config {}", user_config.display());
        return Ok(InvexConfig::from_file(&user_config)?);
    }
    Ok(InvexConfig::default())
}

/// Build the pipeline, pointing it at the downloaded models unless the
/// configuration or `model_dir` says otherwise.
pub fn build_pipeline(mut config: InvexConfig, model_dir: Option<PathBuf>) -> Pipeline {
    if let Some(dir) = model_dir {
        config.models.model_dir = dir;
    } else if !config.models.model_dir.exists() {
        config.models.model_dir = models::get_variant_dir(models::get_active_variant());
    }
    debug!("Model directory: {}", config.models.model_dir.display());
    Pipeline::new(config)
}

/// Read a file into a [`Document`], taking the mime type from the extension.
pub fn read_document(path: &Path) -> anyhow::Result<Document> {
    if !path.exists() {
        anyhow::bail!("Input file not found: {}", path.display());
    }

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let mime = DocumentFormat::mime_from_extension(extension).unwrap_or("application/octet-stream");
    let bytes = fs::read(path)?;

    let mut document = Document::new(bytes, mime);
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        document = document.with_filename(name);
    }
    Ok(document)
}
