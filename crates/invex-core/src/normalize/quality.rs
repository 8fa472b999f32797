//! Page quality estimate from sharpness and contrast.

use image::GrayImage;

/// Laplacian variance treated as perfectly sharp.
const SHARPNESS_SCALE: f64 = 1000.0;

/// Intensity standard deviation treated as full contrast.
const CONTRAST_SCALE: f64 = 80.0;

/// Quality in [0, 1]: the mean of normalized sharpness and contrast.
pub fn quality_score(gray: &GrayImage) -> f32 {
    let score = 0.5 * sharpness(gray) + 0.5 * contrast(gray);
    score.clamp(0.0, 1.0) as f32
}

/// Variance of the 4-neighbour Laplacian, normalized.
pub fn sharpness(gray: &GrayImage) -> f64 {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let mut values = Vec::with_capacity(((width - 2) * (height - 2)) as usize);
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let p = |px: u32, py: u32| gray.get_pixel(px, py)[0] as f64;
            let laplacian =
                p(x - 1, y) + p(x + 1, y) + p(x, y - 1) + p(x, y + 1) - 4.0 * p(x, y);
            values.push(laplacian);
        }
    }

    (variance(&values) / SHARPNESS_SCALE).min(1.0)
}

/// Standard deviation of intensities, normalized.
pub fn contrast(gray: &GrayImage) -> f64 {
    let values: Vec<f64> = gray.pixels().map(|p| p[0] as f64).collect();
    (variance(&values).sqrt() / CONTRAST_SCALE).min(1.0)
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_flat_page_scores_zero() {
        let flat = GrayImage::from_pixel(50, 50, Luma([128]));
        assert_eq!(quality_score(&flat), 0.0);
    }

    #[test]
    fn test_sharp_text_scores_high() {
        let text = GrayImage::from_fn(60, 60, |x, y| {
            if (x / 3 + y / 3) % 2 == 0 { Luma([0]) } else { Luma([255]) }
        });
        assert!(quality_score(&text) > 0.9);
    }

    #[test]
    fn test_blur_lowers_score() {
        let sharp = GrayImage::from_fn(60, 60, |x, _| if x % 6 < 3 { Luma([0]) } else { Luma([255]) });
        let blurred = image::imageops::blur(&sharp, 2.0);
        assert!(quality_score(&blurred) < quality_score(&sharp));
    }
}
