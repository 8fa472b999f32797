//! Documents, pages and positioned tokens.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::pipeline::resources::Lease;

/// Input formats the pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Png,
    Jpeg,
    Pdf,
}

impl DocumentFormat {
    /// Resolve a declared mime type.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => Some(DocumentFormat::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(DocumentFormat::Jpeg),
            "application/pdf" | "application/x-pdf" => Some(DocumentFormat::Pdf),
            _ => None,
        }
    }

    /// Guess a mime type from a file extension.
    pub fn mime_from_extension(ext: &str) -> Option<&'static str> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some("image/png"),
            "jpg" | "jpeg" => Some("image/jpeg"),
            "pdf" => Some("application/pdf"),
            _ => None,
        }
    }

    /// Whether the payload's magic bytes agree with the format.
    pub fn matches_magic(&self, bytes: &[u8]) -> bool {
        match self {
            DocumentFormat::Png => bytes.starts_with(&[0x89, b'P', b'N', b'G']),
            DocumentFormat::Jpeg => bytes.starts_with(&[0xFF, 0xD8, 0xFF]),
            DocumentFormat::Pdf => {
                // Some producers put junk before the header
                let head = &bytes[..bytes.len().min(1024)];
                head.windows(5).any(|w| w == b"%PDF-")
            }
        }
    }
}

/// Raw submitted document. Immutable once created.
#[derive(Debug, Clone)]
pub struct Document {
    bytes: Vec<u8>,
    mime_type: String,
    filename: Option<String>,
}

impl Document {
    pub fn new(bytes: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
            filename: None,
        }
    }

    /// Attach the original file name, reported in metadata.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Axis-aligned box in page pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left: left.min(right),
            top: top.min(bottom),
            right: right.max(left),
            bottom: bottom.max(top),
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn center_x(&self) -> f32 {
        (self.left + self.right) / 2.0
    }

    pub fn center_y(&self) -> f32 {
        (self.top + self.bottom) / 2.0
    }

    /// Length of the vertical intersection with `other`.
    pub fn vertical_overlap(&self, other: &BoundingBox) -> f32 {
        (self.bottom.min(other.bottom) - self.top.max(other.top)).max(0.0)
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    /// Smallest box containing every box in the iterator.
    pub fn enclosing<'a>(boxes: impl IntoIterator<Item = &'a BoundingBox>) -> Option<BoundingBox> {
        boxes.into_iter().copied().reduce(|acc, b| acc.union(&b))
    }
}

/// OCR-recognized text unit with position and confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub bbox: BoundingBox,
    /// Recognition confidence in [0, 1].
    pub confidence: f32,
}

impl Token {
    pub fn new(text: impl Into<String>, bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            text: text.into(),
            bbox,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Non-owning reference to a token of a recovered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenId {
    pub page: usize,
    pub index: usize,
}

impl TokenId {
    pub fn new(page: usize, index: usize) -> Self {
        Self { page, index }
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}:{}", self.page, self.index)
    }
}

/// One normalized page, ready for text recovery.
#[derive(Debug)]
pub struct Page {
    /// Zero-based page index within the document.
    pub index: usize,
    /// Contrast-normalized grayscale, kept for re-binarization.
    pub gray: GrayImage,
    /// Bitmap handed to OCR.
    pub image: GrayImage,
    /// Heuristic quality in [0, 1] (sharpness and contrast).
    pub quality_score: f32,
    /// Names of the normalization steps that were applied.
    pub steps_applied: Vec<String>,
    /// Embedded text for PDF pages without a raster image.
    pub text_layer: Option<String>,
    pub(crate) _lease: Lease,
}

impl Page {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Tokens recovered from one page, after the page bitmap was released.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveredPage {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub tokens: Vec<Token>,
    pub quality_score: f32,
    /// Character-weighted mean token confidence.
    pub mean_confidence: f32,
    /// Confidence stayed below the threshold after the retry.
    pub low_confidence: bool,
    /// Number of recognition passes (1 or 2).
    pub attempts: u8,
    /// Tokens were synthesized from a PDF text layer.
    pub from_text_layer: bool,
}

impl RecoveredPage {
    pub fn token(&self, index: usize) -> Option<&Token> {
        self.tokens.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_mime() {
        assert_eq!(DocumentFormat::from_mime("image/png"), Some(DocumentFormat::Png));
        assert_eq!(
            DocumentFormat::from_mime("application/pdf; charset=binary"),
            Some(DocumentFormat::Pdf)
        );
        assert_eq!(DocumentFormat::from_mime("IMAGE/JPG"), Some(DocumentFormat::Jpeg));
        assert_eq!(DocumentFormat::from_mime("text/plain"), None);
    }

    #[test]
    fn test_magic_bytes() {
        assert!(DocumentFormat::Pdf.matches_magic(b"%PDF-1.7\n..."));
        assert!(!DocumentFormat::Png.matches_magic(b"%PDF-1.7"));
        assert!(DocumentFormat::Jpeg.matches_magic(&[0xFF, 0xD8, 0xFF, 0xE0]));
    }

    #[test]
    fn test_bbox_overlap_and_union() {
        let a = BoundingBox::new(0.0, 10.0, 50.0, 30.0);
        let b = BoundingBox::new(60.0, 20.0, 90.0, 40.0);
        assert_eq!(a.vertical_overlap(&b), 10.0);

        let u = a.union(&b);
        assert_eq!(u, BoundingBox::new(0.0, 10.0, 90.0, 40.0));

        let c = BoundingBox::new(0.0, 50.0, 10.0, 60.0);
        assert_eq!(a.vertical_overlap(&c), 0.0);
    }

    #[test]
    fn test_token_confidence_is_clamped() {
        let token = Token::new("x", BoundingBox::default(), 1.7);
        assert_eq!(token.confidence, 1.0);
    }
}
