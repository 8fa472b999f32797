//! Orientation and skew estimation from projection profiles.

use image::{GrayImage, Luma, imageops};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};

use super::filters;
use crate::error::NormalizeError;

/// Images wider than this are downscaled before angle search.
const ANALYSIS_WIDTH: u32 = 1000;

/// Minimum dark pixels for a profile to mean anything.
const MIN_INK_PIXELS: usize = 200;

/// Coarse page orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Upright,
    /// Text lines run vertically.
    Sideways,
}

/// Compare row and column projection variance to tell upright from sideways text.
pub fn detect_orientation(gray: &GrayImage) -> Result<Orientation, NormalizeError> {
    let binary = analysis_bitmap(gray, "orientation")?;
    let (width, height) = binary.dimensions();

    let mut rows = vec![0f64; height as usize];
    let mut cols = vec![0f64; width as usize];
    for (x, y, pixel) in binary.enumerate_pixels() {
        if pixel[0] == 0 {
            rows[y as usize] += 1.0;
            cols[x as usize] += 1.0;
        }
    }

    let row_var = variance(&rows);
    let col_var = variance(&cols);
    if row_var == 0.0 && col_var == 0.0 {
        return Err(NormalizeError::Unreliable {
            step: "orientation",
            reason: "empty projection profiles".to_string(),
        });
    }

    // Normalize by profile length so tall and wide pages compare fairly
    let row_score = row_var / width as f64;
    let col_score = col_var / height as f64;
    if col_score > row_score * 1.5 {
        Ok(Orientation::Sideways)
    } else {
        Ok(Orientation::Upright)
    }
}

/// Find the angle (degrees) whose row projection is the most peaked.
///
/// A positive angle means lines descend to the right.
pub fn estimate_skew(gray: &GrayImage, max_degrees: f32, step_degrees: f32) -> Result<f32, NormalizeError> {
    if step_degrees <= 0.0 || max_degrees <= 0.0 {
        return Err(NormalizeError::Unreliable {
            step: "deskew",
            reason: format!("invalid search range ±{}° step {}°", max_degrees, step_degrees),
        });
    }

    let binary = analysis_bitmap(gray, "deskew")?;
    let ink: Vec<(f64, f64)> = binary
        .enumerate_pixels()
        .filter(|(_, _, p)| p[0] == 0)
        .map(|(x, y, _)| (x as f64, y as f64))
        .collect();

    let (width, height) = binary.dimensions();
    let span = (width + height) as usize * 2 + 1;
    let offset = width as f64 + height as f64;

    let steps = (max_degrees / step_degrees).round() as i32;
    let mut best = (0.0f32, f64::MIN);
    for i in -steps..=steps {
        let angle = i as f32 * step_degrees;
        let (sin, cos) = (angle as f64).to_radians().sin_cos();

        let mut profile = vec![0f64; span];
        for &(x, y) in &ink {
            let row = (y * cos - x * sin + offset).round() as usize;
            if let Some(slot) = profile.get_mut(row) {
                *slot += 1.0;
            }
        }
        let score = variance(&profile);
        // Prefer the smallest angle on ties
        if score > best.1 + f64::EPSILON || (score == best.1 && angle.abs() < best.0.abs()) {
            best = (angle, score);
        }
    }

    Ok(best.0)
}

/// Rotate content by `-degrees` around the center, undoing a measured skew.
///
/// Bilinear sampling; uncovered corners are filled with white.
pub fn deskew(gray: &GrayImage, degrees: f32) -> GrayImage {
    rotate_about_center(gray, -degrees.to_radians(), Interpolation::Bilinear, Luma([255]))
}

/// Quarter turn clockwise.
pub fn rotate_quarter(gray: &GrayImage) -> GrayImage {
    imageops::rotate90(gray)
}

/// Downscaled Otsu bitmap used for angle analysis.
fn analysis_bitmap(gray: &GrayImage, step: &'static str) -> Result<GrayImage, NormalizeError> {
    let (width, height) = gray.dimensions();
    if width < 16 || height < 16 {
        return Err(NormalizeError::TooSmall { step, width, height });
    }

    let small = if width > ANALYSIS_WIDTH {
        let new_height = ((height as f32 * ANALYSIS_WIDTH as f32 / width as f32) as u32).max(1);
        imageops::resize(gray, ANALYSIS_WIDTH, new_height, imageops::FilterType::Triangle)
    } else {
        gray.clone()
    };

    let binary = filters::threshold_image(&small, filters::otsu_threshold(&small));
    let ink = binary.pixels().filter(|p| p[0] == 0).count();
    if ink < MIN_INK_PIXELS {
        return Err(NormalizeError::Unreliable {
            step,
            reason: format!("only {} ink pixels", ink),
        });
    }
    Ok(binary)
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

    /// White page with dark horizontal bars tilted by `degrees`.
    fn ruled_page(width: u32, height: u32, degrees: f32) -> GrayImage {
        let slope = degrees.to_radians().tan();
        let mut image = GrayImage::from_pixel(width, height, Luma([255]));
        for line in 0..6 {
            let y0 = 40.0 + line as f32 * 40.0;
            for x in 20..width - 20 {
                let y = y0 + x as f32 * slope;
                for t in 0..4 {
                    let py = y as u32 + t;
                    if py < height {
                        image.put_pixel(x, py, Luma([0]));
                    }
                }
            }
        }
        image
    }

    #[test]
    fn test_estimates_known_skew() {
        let page = ruled_page(400, 320, 2.0);
        let angle = estimate_skew(&page, 5.0, 0.5).unwrap();
        assert!((angle - 2.0).abs() <= 0.5, "estimated {}", angle);
    }

    #[test]
    fn test_straight_page_has_no_skew() {
        let page = ruled_page(400, 320, 0.0);
        assert_eq!(estimate_skew(&page, 5.0, 0.5).unwrap(), 0.0);
    }

    #[test]
    fn test_deskew_flattens_lines() {
        let page = ruled_page(400, 320, 3.0);
        let fixed = deskew(&page, 3.0);
        let angle = estimate_skew(&fixed, 5.0, 0.5).unwrap();
        assert!(angle.abs() <= 0.5, "residual {}", angle);
    }

    #[test]
    fn test_orientation() {
        let upright = ruled_page(400, 320, 0.0);
        assert_eq!(detect_orientation(&upright).unwrap(), Orientation::Upright);

        let sideways = rotate_quarter(&upright);
        assert_eq!(detect_orientation(&sideways).unwrap(), Orientation::Sideways);
    }

    #[test]
    fn test_blank_page_is_unreliable() {
        let blank = GrayImage::from_pixel(100, 100, Luma([255]));
        assert!(estimate_skew(&blank, 5.0, 0.5).is_err());
    }
}
