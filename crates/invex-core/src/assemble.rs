//! Final output assembly.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::invoice::Extraction;
use crate::models::config::Strategy;
use crate::models::invoice::{ProcessedInvoice, ProcessingMetadata, ValidationReport};

/// Facts about the run that end up in the metadata.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub filename: Option<String>,
    pub started: DateTime<Utc>,
    pub elapsed: Duration,
    pub page_count: usize,
    pub low_confidence_pages: Vec<usize>,
    pub ocr_backend: String,
    pub strategy: Strategy,
    pub include_trace: bool,
}

/// Merge the extraction, its validation report and the run metadata.
///
/// Without a report, extraction anomalies become metadata warnings and the
/// confidence score is the mean field confidence.
pub fn assemble(extraction: Extraction, report: Option<ValidationReport>, run: RunSummary) -> ProcessedInvoice {
    let Extraction {
        mut record,
        fields,
        anomalies,
    } = extraction;

    let (confidence_score, warnings) = match &report {
        Some(report) => (report.data_quality_score, Vec::new()),
        None => {
            let mean = if fields.is_empty() {
                0.0
            } else {
                fields.iter().map(|f| f.confidence).sum::<f32>() / fields.len() as f32
            };
            let warnings = anomalies
                .iter()
                .map(|a| format!("{}: {}", a.field, a.issue))
                .collect();
            (mean, warnings)
        }
    };
    record.validation = report;

    ProcessedInvoice {
        metadata: ProcessingMetadata {
            filename: run.filename,
            processing_date: run.started,
            confidence_score,
            processing_time: run.elapsed.as_secs_f64(),
            page_count: run.page_count,
            low_confidence_pages: run.low_confidence_pages,
            ocr_backend: run.ocr_backend,
            strategy: run.strategy,
            warnings,
        },
        record,
        fields: run.include_trace.then_some(fields),
    }
}
