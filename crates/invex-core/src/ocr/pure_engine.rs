//! Pure Rust OCR backend using `pure-onnx-ocr`.

use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use image::{DynamicImage, GrayImage};
use tracing::{debug, info};

use crate::error::OcrError;
use crate::models::config::InvexConfig;
use crate::models::document::{BoundingBox, Token};

use super::{OcrBackend, RecognitionParams, split_line};

/// PaddleOCR detection and recognition models run by `pure-onnx-ocr`
/// (pure Rust, no external ONNX Runtime).
pub struct PureOcrBackend {
    engine: Mutex<pure_onnx_ocr::engine::OcrEngine>,
}

impl PureOcrBackend {
    /// Load the models named in the configuration.
    pub fn from_config(config: &InvexConfig) -> Result<Self, OcrError> {
        Self::from_paths(
            &config.model_path(&config.models.detection_model),
            &config.model_path(&config.models.recognition_model),
            &config.model_path(&config.models.dictionary),
        )
    }

    /// Load an engine from explicit model paths.
    pub fn from_paths(det_path: &Path, rec_path: &Path, dict_path: &Path) -> Result<Self, OcrError> {
        for path in [det_path, rec_path, dict_path] {
            if !path.exists() {
                return Err(OcrError::ModelLoad(format!(
                    "model file not found: {}",
                    path.display()
                )));
            }
        }

        let engine = pure_onnx_ocr::engine::OcrEngineBuilder::new()
            .det_model_path(det_path)
            .rec_model_path(rec_path)
            .dictionary_path(dict_path)
            .build()
            .map_err(|e| OcrError::ModelLoad(format!("pure-onnx-ocr: {}", e)))?;

        info!(
            "Loaded pure-onnx-ocr engine from {}",
            det_path.parent().unwrap_or(det_path).display()
        );

        Ok(Self {
            engine: Mutex::new(engine),
        })
    }
}

impl OcrBackend for PureOcrBackend {
    fn name(&self) -> &str {
        "pure-onnx-ocr"
    }

    fn recognize(&self, image: &GrayImage, params: &RecognitionParams) -> Result<Vec<Token>, OcrError> {
        let start = Instant::now();
        // The detector expects a three-channel image
        let input = DynamicImage::ImageRgb8(DynamicImage::ImageLuma8(image.clone()).to_rgb8());

        let results = {
            let engine = self
                .engine
                .lock()
                .map_err(|_| OcrError::Crashed("engine lock poisoned".to_string()))?;
            engine
                .run_from_image(&input)
                .map_err(|e| OcrError::Recognition(format!("pure-onnx-ocr: {}", e)))?
        };

        debug!("pure-onnx-ocr returned {} text regions", results.len());

        let mut tokens = Vec::new();
        for region in &results {
            let text = if params.keep_unk {
                region.text.clone()
            } else {
                region.text.replace("[UNK]", " ")
            };
            let bbox = polygon_to_bbox(&region.bounding_box);
            tokens.extend(split_line(&text, bbox, region.confidence));
        }

        // The loaded dictionary decides the script; the language hint is only logged
        debug!(
            "OCR complete: {} tokens in {}ms (hint {}, unused)",
            tokens.len(),
            start.elapsed().as_millis(),
            params.language
        );
        Ok(tokens)
    }
}

/// Axis-aligned box around a detection polygon.
fn polygon_to_bbox(polygon: &pure_onnx_ocr::Polygon<f64>) -> BoundingBox {
    let (mut left, mut top) = (f64::INFINITY, f64::INFINITY);
    let (mut right, mut bottom) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for coord in polygon.exterior().coords() {
        left = left.min(coord.x);
        top = top.min(coord.y);
        right = right.max(coord.x);
        bottom = bottom.max(coord.y);
    }
    if !left.is_finite() {
        return BoundingBox::default();
    }
    BoundingBox::new(left as f32, top as f32, right as f32, bottom as f32)
}
