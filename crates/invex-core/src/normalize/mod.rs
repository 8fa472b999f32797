//! Image normalization: rasterize, straighten and clean up pages before OCR.

pub mod filters;
pub mod geometry;
pub mod quality;

use image::{DynamicImage, GrayImage, Luma, imageops};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{NormalizeError, PipelineError, Result};
use crate::models::config::NormalizeConfig;
use crate::models::document::{Document, DocumentFormat, Page};
use crate::pdf::{PageRaster, PdfRasterizer};
use crate::pipeline::deadline::Deadline;
use crate::pipeline::resources::ResourceLedger;

use geometry::Orientation;

/// A4 width in inches.
const A4_WIDTH_INCHES: f32 = 8.27;

/// Pages narrower than this share of A4 at the target DPI get upscaled.
const UPSCALE_BELOW: f32 = 0.6;

/// Skew below this many degrees is left alone.
const MIN_SKEW_DEGREES: f32 = 0.5;

/// A page as decoded, before normalization.
enum RawPage {
    Image(DynamicImage),
    TextLayer { text: String, width: u32, height: u32 },
}

/// Turns a [`Document`] into normalized [`Page`]s.
pub struct Normalizer {
    config: NormalizeConfig,
    ledger: ResourceLedger,
}

impl Normalizer {
    pub fn new(config: NormalizeConfig, ledger: ResourceLedger) -> Self {
        Self { config, ledger }
    }

    /// Decode and normalize every page of a document, in page order.
    pub fn normalize(&self, document: &Document, deadline: &Deadline) -> Result<Vec<Page>> {
        let format = DocumentFormat::from_mime(document.mime_type())
            .ok_or_else(|| PipelineError::UnsupportedFormat(document.mime_type().to_string()))?;

        if !format.matches_magic(document.bytes()) {
            return Err(PipelineError::CorruptDocument(format!(
                "payload is not a valid {:?} file",
                format
            )));
        }

        let raw_pages = match format {
            DocumentFormat::Png | DocumentFormat::Jpeg => {
                let image_format = match format {
                    DocumentFormat::Png => image::ImageFormat::Png,
                    _ => image::ImageFormat::Jpeg,
                };
                let image = image::load_from_memory_with_format(document.bytes(), image_format)?;
                vec![(0, RawPage::Image(image))]
            }
            DocumentFormat::Pdf => self.rasterize_pdf(document.bytes())?,
        };

        info!("Normalizing {} page(s)", raw_pages.len());

        raw_pages
            .into_par_iter()
            .map(|(index, raw)| {
                deadline.check("normalize page")?;
                Ok(self.normalize_page(index, raw))
            })
            .collect()
    }

    fn rasterize_pdf(&self, bytes: &[u8]) -> Result<Vec<(usize, RawPage)>> {
        let pdf = PdfRasterizer::load(bytes)?;
        let mut page_count = pdf.page_count() as usize;
        if page_count > self.config.max_pages {
            warn!(
                "PDF has {} pages, only the first {} are processed",
                page_count, self.config.max_pages
            );
            page_count = self.config.max_pages;
        }

        let min_text = self.config.prefer_text_layer.then_some(self.config.min_text_length);
        let mut pages = Vec::with_capacity(page_count);
        for number in 1..=page_count as u32 {
            match pdf.rasterize_page(number, self.config.target_dpi, self.config.max_image_size, min_text) {
                Ok(PageRaster::Image(image)) => pages.push((number as usize - 1, RawPage::Image(image))),
                Ok(PageRaster::TextLayer { text, width, height }) => pages.push((
                    number as usize - 1,
                    RawPage::TextLayer { text, width, height },
                )),
                Err(e) => warn!("Could not rasterize page {}: {}", number, e),
            }
        }

        if pages.is_empty() {
            return Err(PipelineError::CorruptDocument(
                "no page could be rasterized".to_string(),
            ));
        }
        Ok(pages)
    }

    fn normalize_page(&self, index: usize, raw: RawPage) -> Page {
        let (text, width, height) = match raw {
            RawPage::Image(image) => return self.normalize_image(index, image.to_luma8()),
            RawPage::TextLayer { text, width, height } => (text, width, height),
        };

        debug!("Page {}: text layer with {} chars", index, text.len());
        let blank = GrayImage::from_pixel(width, height, Luma([255]));
        let lease = self.ledger.lease(blank.len() * 2);
        Page {
            index,
            gray: blank.clone(),
            image: blank,
            quality_score: 1.0,
            steps_applied: vec!["text_layer".to_string()],
            text_layer: Some(text),
            _lease: lease,
        }
    }

    fn normalize_image(&self, index: usize, mut gray: GrayImage) -> Page {
        let config = &self.config;
        let mut steps = Vec::new();
        let quality_score = quality::quality_score(&gray);

        if config.orientation {
            match geometry::detect_orientation(&gray) {
                Ok(Orientation::Sideways) => {
                    gray = geometry::rotate_quarter(&gray);
                    steps.push("orientation".to_string());
                }
                Ok(Orientation::Upright) => {}
                Err(e) => skipped(index, e),
            }
        }

        if config.deskew {
            match geometry::estimate_skew(&gray, config.max_skew_degrees, config.skew_step_degrees) {
                Ok(angle) if angle.abs() > MIN_SKEW_DEGREES => {
                    debug!("Page {}: correcting {:.1}° skew", index, angle);
                    gray = geometry::deskew(&gray, angle);
                    steps.push("deskew".to_string());
                }
                Ok(_) => {}
                Err(e) => skipped(index, e),
            }
        }

        if config.denoise {
            match filters::median_3x3(&gray) {
                Ok(filtered) => {
                    gray = filtered;
                    steps.push("denoise".to_string());
                }
                Err(e) => skipped(index, e),
            }
        }

        if config.contrast {
            match filters::stretch_contrast(&gray) {
                Ok(stretched) => {
                    gray = stretched;
                    steps.push("contrast".to_string());
                }
                Err(e) => skipped(index, e),
            }
        }

        let mut image = if config.binarize {
            steps.push("binarize".to_string());
            filters::binarize(&gray, config.binarization)
        } else {
            gray.clone()
        };

        if config.upscale {
            if let Some((width, height)) = self.upscale_target(gray.width(), gray.height()) {
                debug!(
                    "Page {}: upscaling {}x{} to {}x{}",
                    index,
                    gray.width(),
                    gray.height(),
                    width,
                    height
                );
                gray = imageops::resize(&gray, width, height, imageops::FilterType::Lanczos3);
                image = imageops::resize(&image, width, height, imageops::FilterType::Lanczos3);
                if config.binarize {
                    image = filters::threshold_image(&image, 127);
                }
                steps.push("upscale".to_string());
            }
        }

        debug!(
            "Page {}: {}x{}, quality {:.2}, steps {:?}",
            index,
            image.width(),
            image.height(),
            quality_score,
            steps
        );

        let lease = self.ledger.lease(gray.len() + image.len());
        Page {
            index,
            gray,
            image,
            quality_score,
            steps_applied: steps,
            text_layer: None,
            _lease: lease,
        }
    }

    /// Target size when a page is too narrow for the configured DPI.
    fn upscale_target(&self, width: u32, height: u32) -> Option<(u32, u32)> {
        let a4_width = A4_WIDTH_INCHES * self.config.target_dpi as f32;
        if width as f32 >= a4_width * UPSCALE_BELOW {
            return None;
        }
        let longest = width.max(height) as f32;
        let factor = (a4_width / width as f32).min(self.config.max_image_size as f32 / longest);
        if factor <= 1.0 {
            return None;
        }
        Some((
            (width as f32 * factor).round() as u32,
            (height as f32 * factor).round() as u32,
        ))
    }
}

fn skipped(index: usize, err: NormalizeError) {
    warn!("Page {}: skipping step, {}", index, err);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    pub(crate) fn png_bytes(image: &GrayImage) -> Vec<u8> {
        let mut out = Vec::new();
        DynamicImage::ImageLuma8(image.clone())
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    fn text_like_page() -> GrayImage {
        GrayImage::from_fn(1500, 2000, |x, y| {
            let in_line = (y % 60) < 12 && (150..1350).contains(&x);
            if in_line && (x / 9) % 3 != 0 { Luma([10]) } else { Luma([245]) }
        })
    }

    fn normalizer(config: NormalizeConfig) -> (Normalizer, ResourceLedger) {
        let ledger = ResourceLedger::new();
        (Normalizer::new(config, ledger.clone()), ledger)
    }

    #[test]
    fn test_unsupported_mime() {
        let (normalizer, _) = normalizer(NormalizeConfig::default());
        let doc = Document::new(b"hello".to_vec(), "text/plain");
        let err = normalizer
            .normalize(&doc, &Deadline::new(Duration::from_secs(10)))
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_mismatched_magic_is_corrupt() {
        let (normalizer, _) = normalizer(NormalizeConfig::default());
        let doc = Document::new(b"%PDF-1.4 not really".to_vec(), "image/png");
        let err = normalizer
            .normalize(&doc, &Deadline::new(Duration::from_secs(10)))
            .unwrap_err();
        assert!(matches!(err, PipelineError::CorruptDocument(_)));
    }

    #[test]
    fn test_truncated_pdf_is_corrupt() {
        let (normalizer, ledger) = normalizer(NormalizeConfig::default());
        let doc = Document::new(b"%PDF-1.7\n1 0 obj <<".to_vec(), "application/pdf");
        let err = normalizer
            .normalize(&doc, &Deadline::new(Duration::from_secs(10)))
            .unwrap_err();
        assert!(matches!(err, PipelineError::CorruptDocument(_)));
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn test_png_page_is_normalized() {
        let (normalizer, ledger) = normalizer(NormalizeConfig::default());
        let doc = Document::new(png_bytes(&text_like_page()), "image/png");

        let pages = normalizer
            .normalize(&doc, &Deadline::new(Duration::from_secs(60)))
            .unwrap();
        assert_eq!(pages.len(), 1);
        let page = &pages[0];
        assert_eq!(page.index, 0);
        assert!(page.steps_applied.contains(&"binarize".to_string()));
        assert!(page.steps_applied.contains(&"contrast".to_string()));
        assert!(!page.steps_applied.contains(&"upscale".to_string()));
        assert!(page.quality_score > 0.0);
        assert_eq!(ledger.live(), 1);

        drop(pages);
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn test_small_image_is_upscaled() {
        let config = NormalizeConfig {
            target_dpi: 150,
            orientation: false,
            deskew: false,
            denoise: false,
            ..Default::default()
        };
        let (normalizer, _) = normalizer(config);
        let small = GrayImage::from_fn(400, 560, |x, y| {
            if (y % 20) < 4 && x > 40 && x < 360 { Luma([0]) } else { Luma([255]) }
        });
        let doc = Document::new(png_bytes(&small), "image/png");

        let pages = normalizer
            .normalize(&doc, &Deadline::new(Duration::from_secs(60)))
            .unwrap();
        assert!(pages[0].width() > 400);
        assert!(pages[0].steps_applied.contains(&"upscale".to_string()));
        assert_eq!(pages[0].gray.dimensions(), pages[0].image.dimensions());
    }

    #[test]
    fn test_pdf_image_page() {
        let config = NormalizeConfig {
            target_dpi: 72,
            ..Default::default()
        };
        let (normalizer, _) = normalizer(config);
        let bytes = crate::pdf::rasterizer::tests::pdf_with_gray_image(120, 170, 250);
        let doc = Document::new(bytes, "application/pdf");

        let pages = normalizer
            .normalize(&doc, &Deadline::new(Duration::from_secs(60)))
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].text_layer.is_none());
    }

    #[test]
    fn test_expired_deadline() {
        let (normalizer, ledger) = normalizer(NormalizeConfig::default());
        let doc = Document::new(png_bytes(&GrayImage::from_pixel(50, 50, Luma([255]))), "image/png");
        let deadline = Deadline::starting_at(
            std::time::Instant::now() - Duration::from_secs(2),
            Duration::from_secs(1),
        );
        let err = normalizer.normalize(&doc, &deadline).unwrap_err();
        assert!(matches!(err, PipelineError::Timeout(_)));
        assert_eq!(ledger.live(), 0);
    }
}
