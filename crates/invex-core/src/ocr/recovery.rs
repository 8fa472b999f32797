//! Per-page text recovery with a single bounded retry.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use image::GrayImage;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{OcrError, PipelineError, Result};
use crate::models::config::OcrConfig;
use crate::models::document::{BoundingBox, Page, RecoveredPage, Token};
use crate::normalize::filters;
use crate::pipeline::deadline::Deadline;

use super::{OcrBackend, RecognitionParams, weighted_confidence};

/// Per-request recovery options.
#[derive(Debug, Clone)]
pub struct RecoveryOptions {
    pub language: String,
    /// Aggregate confidence below which a page is retried.
    pub confidence_threshold: f32,
}

/// Runs the OCR backend over normalized pages.
pub struct TextRecovery {
    backend: Arc<dyn OcrBackend>,
    config: OcrConfig,
}

struct Attempt {
    tokens: Vec<Token>,
    confidence: f32,
}

impl TextRecovery {
    pub fn new(backend: Arc<dyn OcrBackend>, config: OcrConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Recover every page in parallel. Output keeps page order.
    pub fn recover_all(
        &self,
        pages: Vec<Page>,
        options: &RecoveryOptions,
        deadline: &Deadline,
    ) -> Result<Vec<RecoveredPage>> {
        if !self.backend.is_available() {
            return Err(PipelineError::OcrBackendUnavailable(format!(
                "backend {} is not available",
                self.backend.name()
            )));
        }

        let recovered: Vec<RecoveredPage> = pages
            .into_par_iter()
            .map(|page| self.recover(page, options, deadline))
            .collect::<Result<_>>()?;

        let tokens: usize = recovered.iter().map(|p| p.tokens.len()).sum();
        info!("Recovered {} tokens from {} page(s)", tokens, recovered.len());
        Ok(recovered)
    }

    /// Recover one page, consuming its bitmaps.
    pub fn recover(&self, page: Page, options: &RecoveryOptions, deadline: &Deadline) -> Result<RecoveredPage> {
        deadline.check("ocr page")?;

        let (width, height) = (page.width(), page.height());
        if let Some(text) = &page.text_layer {
            let tokens = text_layer_tokens(text, width, height);
            debug!("Page {}: {} tokens from text layer", page.index, tokens.len());
            return Ok(RecoveredPage {
                index: page.index,
                width,
                height,
                mean_confidence: weighted_confidence(&tokens),
                tokens,
                quality_score: page.quality_score,
                low_confidence: false,
                attempts: 0,
                from_text_layer: true,
            });
        }

        let ink = filters::ink_ratio(&page.image);
        if ink < self.config.blank_ink_ratio {
            debug!("Page {}: blank (ink ratio {:.5})", page.index, ink);
            return Ok(RecoveredPage {
                index: page.index,
                width,
                height,
                tokens: Vec::new(),
                quality_score: page.quality_score,
                mean_confidence: 0.0,
                low_confidence: false,
                attempts: 0,
                from_text_layer: false,
            });
        }

        let params = RecognitionParams {
            language: options.language.clone(),
            keep_unk: self.config.keep_unk,
        };

        let mut best = self.attempt(&page.image, &params)?;
        let mut attempts = 1;

        if best.confidence < options.confidence_threshold {
            debug!(
                "Page {}: confidence {:.2} below {:.2}, retrying with {:?}",
                page.index, best.confidence, options.confidence_threshold, self.config.retry_binarization
            );
            deadline.check("ocr retry")?;
            let retry_image = filters::binarize(&page.gray, self.config.retry_binarization);
            let retry = self.attempt(&retry_image, &params)?;
            attempts = 2;
            if retry.confidence > best.confidence
                || (retry.confidence == best.confidence && retry.tokens.len() > best.tokens.len())
            {
                best = retry;
            }
        }

        let low_confidence = best.confidence < options.confidence_threshold;
        if low_confidence {
            warn!(
                "Page {}: low OCR confidence {:.2} after {} attempt(s)",
                page.index, best.confidence, attempts
            );
        }

        Ok(RecoveredPage {
            index: page.index,
            width,
            height,
            tokens: best.tokens,
            quality_score: page.quality_score,
            mean_confidence: best.confidence,
            low_confidence,
            attempts,
            from_text_layer: false,
        })
    }

    fn attempt(&self, image: &GrayImage, params: &RecognitionParams) -> Result<Attempt> {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.backend.recognize(image, params)));
        let tokens = match outcome {
            Ok(result) => result?,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                return Err(OcrError::Crashed(message).into());
            }
        };

        let tokens: Vec<Token> = tokens
            .into_iter()
            .filter(|t| !t.text.trim().is_empty() && t.confidence >= self.config.min_token_confidence)
            .collect();
        let confidence = weighted_confidence(&tokens);
        Ok(Attempt { tokens, confidence })
    }
}

/// Lay embedded text out on a virtual page: one line per text line,
/// fixed-pitch characters.
fn text_layer_tokens(text: &str, width: u32, height: u32) -> Vec<Token> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let margin = width as f32 * 0.05;
    let line_pitch = ((height as f32 * 0.9) / lines.len() as f32).min(50.0);
    let glyph_height = line_pitch * 0.7;
    let char_width = glyph_height * 0.6;

    let mut tokens = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let top = margin + i as f32 * line_pitch;
        let chars = line.chars().count() as f32;
        let bbox = BoundingBox::new(margin, top, margin + chars * char_width, top + glyph_height);
        tokens.extend(super::split_line(line, bbox, 1.0));
    }
    tokens
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::resources::Lease;
    use image::Luma;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Backend returning a fixed token list with a confidence per attempt.
    pub(crate) struct ScriptedBackend {
        pub tokens: Vec<Token>,
        pub confidences: Vec<f32>,
        pub calls: AtomicUsize,
        pub languages: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(tokens: Vec<Token>, confidences: Vec<f32>) -> Self {
            Self {
                tokens,
                confidences,
                calls: AtomicUsize::new(0),
                languages: Mutex::new(Vec::new()),
            }
        }
    }

    impl OcrBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn recognize(&self, _image: &GrayImage, params: &RecognitionParams) -> std::result::Result<Vec<Token>, OcrError> {
            self.languages.lock().unwrap().push(params.language.clone());
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let confidence = self
                .confidences
                .get(call)
                .or(self.confidences.last())
                .copied()
                .unwrap_or(1.0);
            Ok(self
                .tokens
                .iter()
                .map(|t| Token::new(t.text.clone(), t.bbox, confidence))
                .collect())
        }
    }

    struct PanickingBackend;

    impl OcrBackend for PanickingBackend {
        fn name(&self) -> &str {
            "panicking"
        }

        fn recognize(&self, _image: &GrayImage, _params: &RecognitionParams) -> std::result::Result<Vec<Token>, OcrError> {
            panic!("onnx session exploded");
        }
    }

    pub(crate) fn inked_page(index: usize) -> Page {
        let image = GrayImage::from_fn(200, 100, |x, y| {
            if y > 40 && y < 50 && x > 20 && x < 180 { Luma([0]) } else { Luma([255]) }
        });
        Page {
            index,
            gray: image.clone(),
            image,
            quality_score: 0.8,
            steps_applied: Vec::new(),
            text_layer: None,
            _lease: Lease::detached(0),
        }
    }

    fn options(threshold: f32) -> RecoveryOptions {
        RecoveryOptions {
            language: "fra".to_string(),
            confidence_threshold: threshold,
        }
    }

    fn word(text: &str) -> Token {
        Token::new(text, BoundingBox::new(10.0, 10.0, 50.0, 20.0), 1.0)
    }

    #[test]
    fn test_confident_page_single_attempt() {
        let backend = Arc::new(ScriptedBackend::new(vec![word("Facture")], vec![0.95]));
        let recovery = TextRecovery::new(backend.clone(), OcrConfig::default());

        let page = recovery
            .recover(inked_page(0), &options(0.8), &Deadline::new(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(page.attempts, 1);
        assert!(!page.low_confidence);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_language_hint_reaches_backend_on_every_attempt() {
        let backend = Arc::new(ScriptedBackend::new(vec![word("Invoice")], vec![0.5, 0.9]));
        let recovery = TextRecovery::new(backend.clone(), OcrConfig::default());
        let options = RecoveryOptions {
            language: "eng".to_string(),
            confidence_threshold: 0.8,
        };

        recovery
            .recover(inked_page(0), &options, &Deadline::new(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(*backend.languages.lock().unwrap(), vec!["eng", "eng"]);
    }

    #[test]
    fn test_retry_keeps_better_attempt() {
        let backend = Arc::new(ScriptedBackend::new(vec![word("Facture")], vec![0.5, 0.9]));
        let recovery = TextRecovery::new(backend, OcrConfig::default());

        let page = recovery
            .recover(inked_page(0), &options(0.8), &Deadline::new(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(page.attempts, 2);
        assert!(!page.low_confidence);
        assert!((page.mean_confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_still_low_after_retry_is_flagged() {
        let backend = Arc::new(ScriptedBackend::new(vec![word("Facture")], vec![0.5, 0.4]));
        let recovery = TextRecovery::new(backend, OcrConfig::default());

        let page = recovery
            .recover(inked_page(3), &options(0.8), &Deadline::new(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(page.attempts, 2);
        assert!(page.low_confidence);
        assert!((page.mean_confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_blank_page_skips_backend() {
        let backend = Arc::new(ScriptedBackend::new(vec![word("ghost")], vec![1.0]));
        let recovery = TextRecovery::new(backend.clone(), OcrConfig::default());

        let mut page = inked_page(0);
        page.image = GrayImage::from_pixel(200, 100, Luma([255]));
        let page = recovery
            .recover(page, &options(0.8), &Deadline::new(Duration::from_secs(5)))
            .unwrap();
        assert!(page.tokens.is_empty());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panic_maps_to_unavailable() {
        let recovery = TextRecovery::new(Arc::new(PanickingBackend), OcrConfig::default());
        let err = recovery
            .recover(inked_page(0), &options(0.8), &Deadline::new(Duration::from_secs(5)))
            .unwrap_err();
        assert!(matches!(err, PipelineError::OcrBackendUnavailable(_)));
    }

    #[test]
    fn test_text_layer_tokens() {
        let backend = Arc::new(ScriptedBackend::new(Vec::new(), vec![1.0]));
        let recovery = TextRecovery::new(backend.clone(), OcrConfig::default());

        let mut page = inked_page(0);
        page.text_layer = Some("Facture N° FAC-2024-001\n\nTotal TTC 1200,00".to_string());
        let page = recovery
            .recover(page, &options(0.8), &Deadline::new(Duration::from_secs(5)))
            .unwrap();

        assert!(page.from_text_layer);
        assert_eq!(page.tokens.len(), 6);
        assert_eq!(page.tokens[3].text, "Total");
        assert!(page.tokens[3].bbox.top > page.tokens[0].bbox.bottom);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_recover_all_keeps_page_order() {
        let backend = Arc::new(ScriptedBackend::new(vec![word("x")], vec![0.9]));
        let recovery = TextRecovery::new(backend, OcrConfig::default());
        let pages = (0..4).map(inked_page).collect();

        let recovered = recovery
            .recover_all(pages, &options(0.8), &Deadline::new(Duration::from_secs(5)))
            .unwrap();
        let indices: Vec<usize> = recovered.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }
}
