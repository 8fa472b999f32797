//! Error types for the invex-core library.

use std::time::Duration;

use thiserror::Error;

/// Request-level failure returned by the pipeline.
///
/// Stage-local problems (a low-confidence page, an unparsable table row, a
/// missing optional field) never surface here; they are recorded as anomalies
/// on the validation report instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The declared mime type is neither an image nor a PDF.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// No page of the document could be rasterized.
    #[error("corrupt document: {0}")]
    CorruptDocument(String),

    /// The OCR engine is missing or crashed.
    #[error("OCR backend unavailable: {0}")]
    OcrBackendUnavailable(String),

    /// Every normalized page came back without a single token.
    #[error("no extractable content in document")]
    NoExtractableContent,

    /// The payload exceeds the configured size limit.
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// The request ran past its deadline. Carries the configured budget.
    #[error("processing exceeded its {0:?} budget")]
    Timeout(Duration),

    /// The worker pool and its queue are full.
    #[error("pipeline at capacity ({queued} requests already queued)")]
    Capacity { queued: usize },

    /// The worker running the request died unexpectedly.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Machine-readable error code for API layers.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::UnsupportedFormat(_) => "INVALID_FILE_FORMAT",
            PipelineError::CorruptDocument(_) => "CORRUPT_DOCUMENT",
            PipelineError::OcrBackendUnavailable(_) => "OCR_UNAVAILABLE",
            PipelineError::NoExtractableContent => "NO_EXTRACTABLE_CONTENT",
            PipelineError::PayloadTooLarge { .. } => "FILE_TOO_LARGE",
            PipelineError::Timeout(_) => "TIMEOUT",
            PipelineError::Capacity { .. } => "CAPACITY_EXCEEDED",
            PipelineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP-style status an API layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            PipelineError::UnsupportedFormat(_) => 400,
            PipelineError::PayloadTooLarge { .. } => 413,
            PipelineError::CorruptDocument(_) | PipelineError::NoExtractableContent => 422,
            PipelineError::Capacity { .. } => 429,
            PipelineError::Internal(_) => 500,
            PipelineError::OcrBackendUnavailable(_) => 503,
            PipelineError::Timeout(_) => 504,
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::Capacity { .. }
                | PipelineError::Timeout(_)
                | PipelineError::OcrBackendUnavailable(_)
        )
    }
}

/// Errors related to PDF processing.
#[derive(Error, Debug)]
pub enum PdfError {
    /// Failed to open/parse the PDF file.
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// The PDF is encrypted with a non-empty password.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The PDF is empty or has no pages.
    #[error("PDF has no pages")]
    NoPages,

    /// Invalid page number requested.
    #[error("invalid page number: {0}")]
    InvalidPage(u32),

    /// A page carries neither a decodable image nor a text layer.
    #[error("page {0} has no raster image or text layer")]
    EmptyPage(u32),
}

/// Errors raised by an OCR backend.
#[derive(Error, Debug)]
pub enum OcrError {
    /// Failed to load OCR models.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// The engine failed while recognizing a page.
    #[error("recognition failed: {0}")]
    Recognition(String),

    /// The engine panicked.
    #[error("backend crashed: {0}")]
    Crashed(String),

    /// The backend reports itself as unreachable.
    #[error("backend {0} is not available")]
    Unavailable(String),
}

/// A single normalization step that could not be applied.
#[derive(Error, Debug)]
pub enum NormalizeError {
    /// The image is too small for the step to produce a meaningful result.
    #[error("{step}: image {width}x{height} is too small")]
    TooSmall {
        step: &'static str,
        width: u32,
        height: u32,
    },

    /// The step's estimate was not trustworthy.
    #[error("{step}: {reason}")]
    Unreliable { step: &'static str, reason: String },
}

impl From<PdfError> for PipelineError {
    fn from(err: PdfError) -> Self {
        PipelineError::CorruptDocument(err.to_string())
    }
}

impl From<OcrError> for PipelineError {
    fn from(err: OcrError) -> Self {
        PipelineError::OcrBackendUnavailable(err.to_string())
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        PipelineError::CorruptDocument(err.to_string())
    }
}

/// Result type for the invex library.
pub type Result<T> = std::result::Result<T, PipelineError>;
