//! Request entry points: admission, stage sequencing and health.

pub mod deadline;
pub mod pool;
pub mod resources;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::assemble::{RunSummary, assemble};
use crate::error::{PipelineError, Result};
use crate::invoice::{FieldKey, InvoiceExtractor};
use crate::layout::LayoutAssembler;
use crate::models::config::{InvexConfig, Strategy};
use crate::models::document::{Document, DocumentFormat};
use crate::models::invoice::{Anomaly, ProcessedInvoice};
use crate::normalize::Normalizer;
use crate::ocr::{self, OcrBackend, RecoveryOptions, TextRecovery};
use crate::validation::Validator;

use deadline::Deadline;
use pool::WorkerPool;
use resources::ResourceLedger;

/// Per-request options.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// OCR language hint, passed to the backend. The bundled backend ignores it.
    pub language: String,
    /// Aggregate page confidence below which OCR is retried once.
    pub confidence_threshold: f32,
    pub enable_validation: bool,
    pub strategy: Strategy,
    /// Fields to extract.
    pub field_schema: Vec<FieldKey>,
    /// Include the per-field trace in the output.
    pub include_trace: bool,
}

impl SubmitOptions {
    pub fn from_config(config: &InvexConfig) -> Self {
        Self {
            language: config.ocr.language.clone(),
            confidence_threshold: config.ocr.confidence_threshold,
            enable_validation: true,
            strategy: config.extraction.strategy,
            field_schema: FieldKey::ALL.to_vec(),
            include_trace: false,
        }
    }
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self::from_config(&InvexConfig::default())
    }
}

/// Pipeline health snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub ocr_backend_reachable: bool,
    pub backend: String,
    pub workers: usize,
    pub queue_depth: usize,
    pub in_flight: usize,
}

/// The invoice pipeline. Cheap to clone; clones share the OCR backend,
/// the field models and the worker pool.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Stages>,
}

struct Stages {
    config: InvexConfig,
    backend: Arc<dyn OcrBackend>,
    normalizer: Normalizer,
    recovery: TextRecovery,
    layout: LayoutAssembler,
    extractor: InvoiceExtractor,
    validator: Validator,
    pool: WorkerPool,
    ledger: ResourceLedger,
}

impl Pipeline {
    /// Build a pipeline, loading the configured OCR backend.
    pub fn new(config: InvexConfig) -> Self {
        let backend = ocr::create_backend(&config);
        Self::with_backend(config, backend)
    }

    /// Build a pipeline around an already loaded backend.
    pub fn with_backend(config: InvexConfig, backend: Arc<dyn OcrBackend>) -> Self {
        let extractor = InvoiceExtractor::new(&config);
        Self::with_parts(config, backend, extractor)
    }

    /// Build a pipeline from a backend and an extractor.
    pub fn with_parts(config: InvexConfig, backend: Arc<dyn OcrBackend>, extractor: InvoiceExtractor) -> Self {
        let ledger = ResourceLedger::new();
        let pool = WorkerPool::new(config.runtime.effective_workers(), config.runtime.queue_depth);
        info!(
            "Pipeline ready: backend {}, {} workers, queue depth {}",
            backend.name(),
            pool.workers(),
            pool.queue_depth()
        );

        let stages = Stages {
            normalizer: Normalizer::new(config.normalize.clone(), ledger.clone()),
            recovery: TextRecovery::new(Arc::clone(&backend), config.ocr.clone()),
            layout: LayoutAssembler::new(config.layout.clone()),
            validator: Validator::new(config.validation.clone()),
            extractor,
            backend,
            pool,
            ledger,
            config,
        };
        Self {
            inner: Arc::new(stages),
        }
    }

    pub fn config(&self) -> &InvexConfig {
        &self.inner.config
    }

    /// Options populated from the pipeline configuration.
    pub fn default_options(&self) -> SubmitOptions {
        SubmitOptions::from_config(&self.inner.config)
    }

    /// Process one document.
    ///
    /// The payload is checked before admission. Stage work runs on the
    /// blocking pool while holding a worker slot, and the deadline is
    /// checked between stages.
    pub async fn submit(&self, document: Document, options: SubmitOptions) -> Result<ProcessedInvoice> {
        let runtime = &self.inner.config.runtime;
        if document.len() > runtime.max_payload_bytes {
            return Err(PipelineError::PayloadTooLarge {
                size: document.len(),
                limit: runtime.max_payload_bytes,
            });
        }
        if DocumentFormat::from_mime(document.mime_type()).is_none() {
            return Err(PipelineError::UnsupportedFormat(document.mime_type().to_string()));
        }

        let deadline = Deadline::new(Duration::from_millis(runtime.timeout_ms));
        let slot = self.inner.pool.acquire(&deadline).await?;

        let stages = Arc::clone(&self.inner);
        let task = tokio::task::spawn_blocking(move || {
            let _slot = slot;
            stages.run(&document, &options, &deadline)
        });

        match task.await {
            Ok(result) => result,
            Err(e) => Err(PipelineError::Internal(format!("pipeline task failed: {}", e))),
        }
    }

    pub fn health(&self) -> HealthStatus {
        let pool = &self.inner.pool;
        HealthStatus {
            ocr_backend_reachable: self.inner.backend.is_available(),
            backend: self.inner.backend.name().to_string(),
            workers: pool.workers(),
            queue_depth: pool.queue_depth(),
            in_flight: pool.in_flight(),
        }
    }

    /// Per-request artifacts currently alive across all requests.
    pub fn live_artifacts(&self) -> usize {
        self.inner.ledger.live()
    }
}

impl Stages {
    fn run(&self, document: &Document, options: &SubmitOptions, deadline: &Deadline) -> Result<ProcessedInvoice> {
        let started = Utc::now();
        info!(
            "Processing {} ({} bytes, {})",
            document.filename().unwrap_or("<unnamed>"),
            document.len(),
            document.mime_type()
        );

        deadline.check("normalize")?;
        let pages = self.normalizer.normalize(document, deadline)?;

        deadline.check("text recovery")?;
        let recovery = RecoveryOptions {
            language: options.language.clone(),
            confidence_threshold: options.confidence_threshold,
        };
        let recovered = self.recovery.recover_all(pages, &recovery, deadline)?;

        let page_count = recovered.len();
        let mut page_anomalies = Vec::new();
        let mut low_confidence_pages = Vec::new();
        for page in recovered.iter().filter(|p| p.low_confidence) {
            low_confidence_pages.push(page.index);
            page_anomalies.push(Anomaly::new(
                format!("page[{}]", page.index),
                format!(
                    "OCR confidence {:.2} below {:.2} after {} attempt(s)",
                    page.mean_confidence, options.confidence_threshold, page.attempts
                ),
            ));
        }

        deadline.check("layout")?;
        let layout = self.layout.assemble(recovered);

        deadline.check("extraction")?;
        let mut extraction = self.extractor.extract(&layout, options.strategy, &options.field_schema)?;
        drop(layout);
        extraction.anomalies.extend(page_anomalies);

        let report = if options.enable_validation {
            deadline.check("validation")?;
            Some(
                self.validator
                    .validate(&extraction.record, &extraction.fields, &extraction.anomalies),
            )
        } else {
            None
        };

        deadline.check("assemble")?;
        let summary = RunSummary {
            filename: document.filename().map(str::to_string),
            started,
            elapsed: deadline.elapsed(),
            page_count,
            low_confidence_pages,
            ocr_backend: self.recovery.backend_name().to_string(),
            strategy: options.strategy,
            include_trace: options.include_trace,
        };
        let processed = assemble(extraction, report, summary);
        debug!(
            "Done in {:.3}s, confidence {:.3}",
            processed.metadata.processing_time, processed.metadata.confidence_score
        );
        Ok(processed)
    }
}
