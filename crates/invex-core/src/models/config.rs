//! Configuration structures for the extraction pipeline.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::invoice::fields::FieldKey;

/// Main configuration for the invex pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InvexConfig {
    /// Image normalization configuration.
    pub normalize: NormalizeConfig,

    /// OCR configuration.
    pub ocr: OcrConfig,

    /// Layout assembly configuration.
    pub layout: LayoutConfig,

    /// Field extraction configuration.
    pub extraction: ExtractionConfig,

    /// Consistency validation configuration.
    pub validation: ValidationConfig,

    /// Worker pool and request limits.
    pub runtime: RuntimeConfig,

    /// Model configuration.
    pub models: ModelConfig,
}

/// Binarization algorithm used to produce the page bitmap handed to OCR.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum BinarizationMode {
    /// Local mean threshold over a square window.
    Adaptive { block_size: u32, c: i32 },
    /// Global Otsu threshold.
    Otsu,
}

impl Default for BinarizationMode {
    fn default() -> Self {
        BinarizationMode::Adaptive {
            block_size: 11,
            c: 2,
        }
    }
}

/// Image normalizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// DPI used when rasterizing PDF pages and deciding on upscaling.
    pub target_dpi: u32,

    /// Maximum image dimension (longer side) after normalization.
    pub max_image_size: u32,

    /// Maximum pages processed per document.
    pub max_pages: usize,

    /// Detect 90 degree rotations.
    pub orientation: bool,

    /// Correct small skew angles.
    pub deskew: bool,

    /// Largest skew angle searched, in degrees.
    pub max_skew_degrees: f32,

    /// Angle search increment, in degrees.
    pub skew_step_degrees: f32,

    /// Apply a median filter.
    pub denoise: bool,

    /// Stretch the intensity histogram.
    pub contrast: bool,

    /// Binarize the page.
    pub binarize: bool,

    /// Primary binarization mode.
    pub binarization: BinarizationMode,

    /// Upscale images that are too small for the target DPI.
    pub upscale: bool,

    /// Use a PDF page's embedded text when it has no raster image.
    pub prefer_text_layer: bool,

    /// Minimum text length for a text layer to be trusted.
    pub min_text_length: usize,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            target_dpi: 300,
            max_image_size: 4096,
            max_pages: 20,
            orientation: true,
            deskew: true,
            max_skew_degrees: 5.0,
            skew_step_degrees: 0.5,
            denoise: true,
            contrast: true,
            binarize: true,
            binarization: BinarizationMode::default(),
            upscale: true,
            prefer_text_layer: true,
            min_text_length: 50,
        }
    }
}

/// OCR configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Default recognition language hint.
    pub language: String,

    /// Aggregate page confidence below which recognition is retried.
    pub confidence_threshold: f32,

    /// Binarization used for the single retry.
    pub retry_binarization: BinarizationMode,

    /// Tokens below this confidence are discarded.
    pub min_token_confidence: f32,

    /// Pages with less ink than this ratio are treated as blank.
    pub blank_ink_ratio: f32,

    /// Keep `[UNK]` markers emitted by the recognizer.
    pub keep_unk: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: "fra".to_string(),
            confidence_threshold: 0.8,
            retry_binarization: BinarizationMode::Otsu,
            min_token_confidence: 0.0, // CTC scores are low on short words, keep everything
            blank_ink_ratio: 0.0005,
            keep_unk: false,
        }
    }
}

/// Layout assembly configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Minimum vertical overlap ratio for a token to join a line.
    pub line_overlap_threshold: f32,

    /// Gap (in median token heights) that separates two cells.
    pub cell_gap_factor: f32,

    /// Gap (as a share of page width) that splits a non-table line in two blocks.
    pub column_split_ratio: f32,

    /// Tolerance (as a share of page width) for column edges to align.
    pub column_tolerance_ratio: f32,

    /// Aligned rows needed to call a run without a header a table.
    pub min_table_rows: usize,

    /// Share of the page height considered header.
    pub header_ratio: f32,

    /// Share of the page height considered footer.
    pub footer_ratio: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            line_overlap_threshold: 0.5,
            cell_gap_factor: 1.2,
            column_split_ratio: 0.25,
            column_tolerance_ratio: 0.015,
            min_table_rows: 2,
            header_ratio: 0.3,
            footer_ratio: 0.12,
        }
    }
}

/// Order in which field strategies are consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Rules first, model for whatever stays unresolved.
    #[default]
    RuleFirst,
    /// Model first, rules as fallback.
    ModelFirst,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::RuleFirst => write!(f, "rule_first"),
            Strategy::ModelFirst => write!(f, "model_first"),
        }
    }
}

/// Field extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Default strategy order.
    pub strategy: Strategy,

    /// Below this confidence the next strategy is consulted.
    pub confidence_floor: f32,

    /// How strongly page quality scales field confidence down (0 = not at all).
    pub quality_weight: f32,

    /// Reject SIRET/SIREN numbers failing the Luhn check.
    pub validate_siret: bool,

    /// Reject French VAT numbers whose key does not match the SIREN.
    pub validate_vat_number: bool,

    /// Currency used when none is detected.
    pub default_currency: String,

    /// Country used when an address has none.
    pub default_country: String,

    /// VAT rate assumed for line items without a rate column.
    pub default_vat_rate: Decimal,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::RuleFirst,
            confidence_floor: 0.6,
            quality_weight: 0.5,
            validate_siret: true,
            validate_vat_number: true,
            default_currency: "EUR".to_string(),
            default_country: "France".to_string(),
            default_vat_rate: Decimal::new(20, 2),
        }
    }
}

/// Consistency validation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Arithmetic tolerance in currency units.
    pub epsilon: Decimal,

    /// Fields whose absence fails the required-field check.
    pub required_fields: Vec<FieldKey>,

    /// Weight of a required field in the quality score.
    pub required_weight: f32,

    /// Score divisor growth per anomaly.
    pub anomaly_penalty: f32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            epsilon: Decimal::new(1, 2),
            required_fields: vec![
                FieldKey::SupplierName,
                FieldKey::InvoiceNumber,
                FieldKey::InvoiceDate,
                FieldKey::TotalInclVat,
            ],
            required_weight: 2.0,
            anomaly_penalty: 0.1,
        }
    }
}

/// Worker pool and request limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Concurrent requests. 0 means available parallelism.
    pub workers: usize,

    /// Requests allowed to wait for a worker.
    pub queue_depth: usize,

    /// Overall per-request timeout in milliseconds.
    pub timeout_ms: u64,

    /// Largest accepted payload.
    pub max_payload_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_depth: 16,
            timeout_ms: 60_000,
            max_payload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl RuntimeConfig {
    /// Worker count with `0` resolved to the machine's parallelism.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Remote chat-completions model used as the last extraction strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteModelConfig {
    /// Chat completions endpoint.
    pub endpoint: String,

    /// Model name sent with each request.
    pub model: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Confidence reported for fields the model returns.
    pub confidence: f32,
}

impl Default for RemoteModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "INVEX_MODEL_API_KEY".to_string(),
            timeout_secs: 30,
            confidence: 0.7,
        }
    }
}

/// Model file paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory containing OCR model files.
    pub model_dir: PathBuf,

    /// Text detection model file name.
    pub detection_model: String,

    /// Text recognition model file name.
    pub recognition_model: String,

    /// Character dictionary file name.
    pub dictionary: String,

    /// Optional JSON weight file for the field model.
    pub field_model: Option<PathBuf>,

    /// Optional remote model, only used with the `remote-model` feature.
    pub remote: Option<RemoteModelConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            detection_model: "det.onnx".to_string(),
            recognition_model: "latin_rec.onnx".to_string(),
            dictionary: "latin_dict.txt".to_string(),
            field_model: None,
            remote: None,
        }
    }
}

impl InvexConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)
    }

    /// Get full path to a model file.
    pub fn model_path(&self, model_name: &str) -> PathBuf {
        self.models.model_dir.join(model_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "layout": { "line_overlap_threshold": 0.7 }, "runtime": { "workers": 2 } }"#;
        let config: InvexConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.layout.line_overlap_threshold, 0.7);
        assert_eq!(config.layout.min_table_rows, 2);
        assert_eq!(config.runtime.effective_workers(), 2);
        assert_eq!(config.validation.epsilon, Decimal::new(1, 2));
        assert_eq!(config.ocr.language, "fra");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = InvexConfig::default();
        config.extraction.strategy = Strategy::ModelFirst;
        config.normalize.binarization = BinarizationMode::Otsu;
        config.save(&path).unwrap();

        let loaded = InvexConfig::from_file(&path).unwrap();
        assert_eq!(loaded.extraction.strategy, Strategy::ModelFirst);
        assert_eq!(loaded.normalize.binarization, BinarizationMode::Otsu);
        assert_eq!(
            loaded.validation.required_fields,
            config.validation.required_fields
        );
    }

    #[test]
    fn test_binarization_mode_json_shape() {
        let mode: BinarizationMode =
            serde_json::from_str(r#"{ "mode": "adaptive", "block_size": 15, "c": 5 }"#).unwrap();
        assert_eq!(
            mode,
            BinarizationMode::Adaptive {
                block_size: 15,
                c: 5
            }
        );
    }
}
