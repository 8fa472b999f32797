//! Pixel filters applied to grayscale pages.

use image::{GrayImage, Luma};
use imageproc::contrast::{ThresholdType, otsu_level, threshold};
use imageproc::filter::{box_filter, median_filter};
use imageproc::stats::histogram;

use crate::error::NormalizeError;
use crate::models::config::BinarizationMode;

/// 3x3 median filter.
pub fn median_3x3(image: &GrayImage) -> Result<GrayImage, NormalizeError> {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return Err(NormalizeError::TooSmall {
            step: "denoise",
            width,
            height,
        });
    }
    Ok(median_filter(image, 1, 1))
}

/// Stretch intensities so the 1st and 99th percentiles map to 0 and 255.
pub fn stretch_contrast(image: &GrayImage) -> Result<GrayImage, NormalizeError> {
    let total = image.width() as u64 * image.height() as u64;
    if total == 0 {
        return Err(NormalizeError::TooSmall {
            step: "contrast",
            width: image.width(),
            height: image.height(),
        });
    }

    let counts = histogram(image).channels[0];
    let low = percentile(&counts, total, 0.01);
    let high = percentile(&counts, total, 0.99);
    if high <= low {
        return Err(NormalizeError::Unreliable {
            step: "contrast",
            reason: format!("flat histogram (p1={}, p99={})", low, high),
        });
    }

    let range = (high - low) as f32;
    let mut lut = [0u8; 256];
    for (v, slot) in lut.iter_mut().enumerate() {
        let stretched = (v as f32 - low as f32) * 255.0 / range;
        *slot = stretched.round().clamp(0.0, 255.0) as u8;
    }

    let mut result = image.clone();
    for pixel in result.pixels_mut() {
        pixel[0] = lut[pixel[0] as usize];
    }
    Ok(result)
}

/// Binarize with the given mode. Ink is 0, paper is 255.
pub fn binarize(image: &GrayImage, mode: BinarizationMode) -> GrayImage {
    match mode {
        BinarizationMode::Adaptive { block_size, c } => adaptive_threshold(image, block_size, c),
        BinarizationMode::Otsu => threshold_image(image, otsu_threshold(image)),
    }
}

/// Ink where a pixel is darker than its `block_size` neighbourhood mean minus `c`.
pub fn adaptive_threshold(image: &GrayImage, block_size: u32, c: i32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return GrayImage::new(width, height);
    }

    let radius = block_size.max(3) / 2;
    let means = box_filter(image, radius, radius);
    GrayImage::from_fn(width, height, |x, y| {
        let value = image.get_pixel(x, y)[0] as i32;
        let mean = means.get_pixel(x, y)[0] as i32;
        Luma([if value > mean - c { 255 } else { 0 }])
    })
}

/// Global threshold maximizing between-class variance.
pub fn otsu_threshold(image: &GrayImage) -> u8 {
    if image.width() == 0 || image.height() == 0 {
        return 128;
    }
    otsu_level(image)
}

/// Pixels at or below `level` become ink.
pub fn threshold_image(image: &GrayImage, level: u8) -> GrayImage {
    threshold(image, level, ThresholdType::Binary)
}

/// Share of dark pixels in a bitmap.
pub fn ink_ratio(image: &GrayImage) -> f32 {
    let total = image.width() as usize * image.height() as usize;
    if total == 0 {
        return 0.0;
    }
    let dark = image.pixels().filter(|p| p[0] < 128).count();
    dark as f32 / total as f32
}

fn percentile(histogram: &[u32; 256], total: u64, q: f64) -> u8 {
    let target = (total as f64 * q).ceil() as u64;
    let mut seen = 0u64;
    for (v, &n) in histogram.iter().enumerate() {
        seen += n as u64;
        if seen >= target.max(1) {
            return v as u8;
        }
    }
    255
}
