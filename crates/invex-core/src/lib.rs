//! Core library for invoice extraction and validation.
//!
//! This crate provides:
//! - Page normalization (rasterization, orientation, deskew, cleanup)
//! - OCR text recovery using PaddleOCR models
//! - Layout assembly into lines, blocks and tables
//! - Invoice field extraction (SIRET, VAT numbers, dates, amounts, line items)
//! - Arithmetic consistency validation and confidence scoring
//!
//! The entry point is [`Pipeline`]: `submit` a [`Document`] and get back a
//! [`ProcessedInvoice`], or ask for its `health`.

pub mod assemble;
pub mod error;
pub mod invoice;
pub mod layout;
pub mod models;
pub mod normalize;
pub mod ocr;
pub mod pdf;
pub mod pipeline;
pub mod validation;

pub use error::{PipelineError, Result};
pub use invoice::{ExtractedField, FieldKey, FieldValue, InvoiceExtractor, StrategyKind};
pub use models::config::{InvexConfig, Strategy};
pub use models::document::{Document, DocumentFormat};
pub use models::invoice::{
    Address, Anomaly, Contact, Customer, InvoiceInfo, InvoiceRecord, LineItem, ProcessedInvoice,
    ProcessingMetadata, Supplier, Totals, ValidationReport,
};
pub use ocr::{OcrBackend, create_backend};
#[cfg(feature = "native")]
pub use ocr::PureOcrBackend;
pub use pipeline::{HealthStatus, Pipeline, SubmitOptions};
