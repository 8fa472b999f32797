//! Text recovery: OCR backends and the per-page recovery engine.

#[cfg(feature = "native")]
mod pure_engine;
mod recovery;

#[cfg(feature = "native")]
pub use pure_engine::PureOcrBackend;
pub use recovery::{RecoveryOptions, TextRecovery};

use std::sync::Arc;

use image::GrayImage;
use tracing::warn;

use crate::error::OcrError;
use crate::models::config::InvexConfig;
use crate::models::document::{BoundingBox, Token};

/// Per-call recognition parameters.
#[derive(Debug, Clone)]
pub struct RecognitionParams {
    /// Language hint, e.g. `fra` or `eng`.
    ///
    /// Advisory only. [`PureOcrBackend`] recognizes with whatever
    /// dictionary its models were loaded with and ignores the hint, so
    /// changing it does not change its output.
    pub language: String,
    /// Keep `[UNK]` markers in recognized text.
    pub keep_unk: bool,
}

impl Default for RecognitionParams {
    fn default() -> Self {
        Self {
            language: "fra".to_string(),
            keep_unk: false,
        }
    }
}

/// An OCR engine producing positioned word tokens.
///
/// Implementations are created once and shared across requests.
pub trait OcrBackend: Send + Sync {
    /// Short backend name reported in metadata.
    fn name(&self) -> &str;

    /// Recognize the words on a page bitmap.
    fn recognize(&self, image: &GrayImage, params: &RecognitionParams) -> Result<Vec<Token>, OcrError>;

    /// Whether the backend can currently serve requests.
    fn is_available(&self) -> bool {
        true
    }
}

/// Placeholder backend used when the real one failed to load.
pub struct UnavailableBackend {
    reason: String,
}

impl UnavailableBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl OcrBackend for UnavailableBackend {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn recognize(&self, _image: &GrayImage, _params: &RecognitionParams) -> Result<Vec<Token>, OcrError> {
        Err(OcrError::Unavailable(self.reason.clone()))
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Load the configured backend, falling back to [`UnavailableBackend`] when
/// the models cannot be loaded.
pub fn create_backend(config: &InvexConfig) -> Arc<dyn OcrBackend> {
    #[cfg(feature = "native")]
    {
        match PureOcrBackend::from_config(config) {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                warn!("OCR backend unavailable: {}", e);
                Arc::new(UnavailableBackend::new(e.to_string()))
            }
        }
    }

    #[cfg(not(feature = "native"))]
    {
        let _ = config;
        warn!("Built without the `native` feature, no OCR backend");
        Arc::new(UnavailableBackend::new("built without an OCR backend"))
    }
}

/// Split a recognized line into word tokens.
///
/// Each word gets a share of the line width proportional to its position in
/// the character sequence.
pub fn split_line(text: &str, bbox: BoundingBox, confidence: f32) -> Vec<Token> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    if total == 0 {
        return Vec::new();
    }
    let char_width = bbox.width() / total as f32;

    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    for i in 0..=total {
        let is_space = i == total || chars[i].is_whitespace();
        match (start, is_space) {
            (None, false) => start = Some(i),
            (Some(s), true) => {
                let word: String = chars[s..i].iter().collect();
                let word_box = BoundingBox::new(
                    bbox.left + s as f32 * char_width,
                    bbox.top,
                    bbox.left + i as f32 * char_width,
                    bbox.bottom,
                );
                tokens.push(Token::new(word, word_box, confidence));
                start = None;
            }
            _ => {}
        }
    }
    tokens
}

/// Character-weighted mean confidence of a token set.
pub fn weighted_confidence(tokens: &[Token]) -> f32 {
    let (sum, weight) = tokens.iter().fold((0.0f32, 0usize), |(sum, weight), t| {
        let chars = t.text.chars().count().max(1);
        (sum + t.confidence * chars as f32, weight + chars)
    });
    if weight == 0 { 0.0 } else { sum / weight as f32 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_line_positions() {
        let bbox = BoundingBox::new(0.0, 10.0, 110.0, 30.0);
        let tokens = split_line("Total TTC 1200", bbox, 0.9);
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["Total", "TTC", "1200"]);

        // 14 chars over 110px
        let w = 110.0 / 14.0;
        assert!((tokens[1].bbox.left - 6.0 * w).abs() < 1e-3);
        assert!((tokens[2].bbox.right - 110.0).abs() < 1e-3);
        assert_eq!(tokens[0].bbox.top, 10.0);
    }

    #[test]
    fn test_split_line_blank() {
        assert!(split_line("   ", BoundingBox::default(), 1.0).is_empty());
    }

    #[test]
    fn test_weighted_confidence_favors_long_tokens() {
        let tokens = vec![
            Token::new("a", BoundingBox::default(), 0.1),
            Token::new("abcdefghi", BoundingBox::default(), 0.9),
        ];
        let conf = weighted_confidence(&tokens);
        assert!((conf - 0.82).abs() < 1e-4);
        assert_eq!(weighted_confidence(&[]), 0.0);
    }

    #[test]
    fn test_unavailable_backend() {
        let backend = UnavailableBackend::new("models missing");
        assert!(!backend.is_available());
        let err = backend
            .recognize(&GrayImage::new(1, 1), &RecognitionParams::default())
            .unwrap_err();
        assert!(matches!(err, OcrError::Unavailable(_)));
    }
}
