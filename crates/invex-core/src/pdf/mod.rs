//! PDF processing module.

pub(crate) mod rasterizer;

pub use rasterizer::{PageRaster, PdfRasterizer};

use crate::error::PdfError;

/// Result type for PDF operations.
pub type Result<T> = std::result::Result<T, PdfError>;
