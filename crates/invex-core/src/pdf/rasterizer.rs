//! PDF page rasterization using lopdf.
//!
//! Scanned invoices carry one image XObject per page; that image is the page
//! raster. Born-digital pages without images fall back to their text layer.

use image::{DynamicImage, ImageBuffer, Luma, Rgb, imageops::FilterType};
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, trace, warn};

use super::Result;
use crate::error::PdfError;

/// Points per inch in PDF user space.
const PDF_POINTS_PER_INCH: f32 = 72.0;

/// A4 portrait, used when a page has no usable MediaBox.
const DEFAULT_MEDIA_BOX: (f32, f32) = (595.0, 842.0);

/// What a single page rasterized to.
#[derive(Debug, Clone)]
pub enum PageRaster {
    /// Decoded page image, resampled to the requested DPI.
    Image(DynamicImage),
    /// Embedded text for a page without any raster image.
    TextLayer {
        text: String,
        width: u32,
        height: u32,
    },
}

/// Loaded PDF document.
pub struct PdfRasterizer {
    document: Document,
}

impl PdfRasterizer {
    /// Parse a PDF, decrypting documents protected by an empty password.
    pub fn load(data: &[u8]) -> Result<Self> {
        let mut document = Document::load_mem(data).map_err(|e| PdfError::Parse(e.to_string()))?;

        if document.is_encrypted() {
            if document.decrypt("").is_err() {
                return Err(PdfError::Encrypted);
            }
            debug!("Decrypted PDF with empty password");
        }

        let page_count = document.get_pages().len();
        if page_count == 0 {
            return Err(PdfError::NoPages);
        }

        debug!("Loaded PDF with {} pages", page_count);
        Ok(Self { document })
    }

    pub fn page_count(&self) -> u32 {
        self.document.get_pages().len() as u32
    }

    /// Rasterize a page (1-indexed) at `dpi`.
    ///
    /// `min_text_length` bounds how much embedded text a page needs before its
    /// text layer is used; `None` disables the text-layer fallback.
    pub fn rasterize_page(
        &self,
        page: u32,
        dpi: u32,
        max_size: u32,
        min_text_length: Option<usize>,
    ) -> Result<PageRaster> {
        let pages = self.document.get_pages();
        let page_id = *pages.get(&page).ok_or(PdfError::InvalidPage(page))?;

        let (media_w, media_h) = self.media_box(page_id).unwrap_or(DEFAULT_MEDIA_BOX);
        let scale = dpi as f32 / PDF_POINTS_PER_INCH;
        let target_w = ((media_w * scale).round() as u32).clamp(1, max_size);
        let target_h = ((media_h * scale).round() as u32).clamp(1, max_size);

        let largest = self
            .page_images(page_id)
            .into_iter()
            .max_by_key(|img| img.width() as u64 * img.height() as u64);

        if let Some(img) = largest {
            trace!(
                "Page {} raster {}x{}, target {}x{}",
                page,
                img.width(),
                img.height(),
                target_w,
                target_h
            );
            return Ok(PageRaster::Image(resample(img, target_w, max_size)));
        }

        if let Some(min_len) = min_text_length {
            let text = self.document.extract_text(&[page]).unwrap_or_default();
            if text.trim().chars().count() >= min_len {
                debug!("Page {} has no raster image, using its text layer", page);
                return Ok(PageRaster::TextLayer {
                    text,
                    width: target_w,
                    height: target_h,
                });
            }
        }

        Err(PdfError::EmptyPage(page))
    }

    fn media_box(&self, page_id: ObjectId) -> Option<(f32, f32)> {
        let value = self.inherited_attribute(page_id, b"MediaBox")?;
        let Object::Array(coords) = value else {
            return None;
        };
        let nums: Vec<f32> = coords.iter().filter_map(|o| o.as_float().ok()).collect();
        if nums.len() != 4 {
            return None;
        }
        let (w, h) = ((nums[2] - nums[0]).abs(), (nums[3] - nums[1]).abs());
        (w > 1.0 && h > 1.0).then_some((w, h))
    }

    /// Look up a page attribute, walking up the page tree for inherited values.
    fn inherited_attribute(&self, node_id: ObjectId, key: &[u8]) -> Option<Object> {
        let mut current = node_id;
        // Page trees are shallow; the bound guards against reference cycles.
        for _ in 0..32 {
            let dict = self.document.get_object(current).ok()?.as_dict().ok()?;
            if let Ok(value) = dict.get(key) {
                return self
                    .document
                    .dereference(value)
                    .ok()
                    .map(|(_, obj)| obj.clone());
            }
            match dict.get(b"Parent") {
                Ok(Object::Reference(parent)) => current = *parent,
                _ => return None,
            }
        }
        None
    }

    fn page_images(&self, page_id: ObjectId) -> Vec<DynamicImage> {
        let Some(Object::Dictionary(resources)) = self.inherited_attribute(page_id, b"Resources")
        else {
            return Vec::new();
        };
        self.xobject_images(&resources)
    }

    fn xobject_images(&self, resources: &Dictionary) -> Vec<DynamicImage> {
        let mut images = Vec::new();
        let Ok(xobjects) = resources.get(b"XObject") else {
            return images;
        };
        let Ok((_, Object::Dictionary(xobj_dict))) = self.document.dereference(xobjects) else {
            return images;
        };

        for (name, obj_ref) in xobj_dict.iter() {
            let Ok((_, obj)) = self.document.dereference(obj_ref) else {
                continue;
            };
            match self.decode_image(obj) {
                Some(img) => images.push(img),
                None => trace!("XObject {} is not a decodable image", String::from_utf8_lossy(name)),
            }
        }
        images
    }

    fn decode_image(&self, obj: &Object) -> Option<DynamicImage> {
        let Object::Stream(stream) = obj else {
            return None;
        };
        let dict = &stream.dict;
        if dict.get(b"Subtype").ok()?.as_name().ok()? != b"Image" {
            return None;
        }

        let width = dict.get(b"Width").ok()?.as_i64().ok()? as u32;
        let height = dict.get(b"Height").ok()?.as_i64().ok()? as u32;

        let filter = dict.get(b"Filter").ok().and_then(|f| match f {
            Object::Name(name) => Some(name.as_slice()),
            Object::Array(arr) => arr.last().and_then(|o| o.as_name().ok()),
            _ => None,
        });

        match filter {
            Some(b"DCTDecode") => {
                return image::load_from_memory_with_format(&stream.content, image::ImageFormat::Jpeg)
                    .ok();
            }
            Some(b"JPXDecode") | Some(b"CCITTFaxDecode") | Some(b"JBIG2Decode") => {
                warn!(
                    "Skipping {}x{} image with unsupported filter {}",
                    width,
                    height,
                    String::from_utf8_lossy(filter.unwrap_or_default())
                );
                return None;
            }
            _ => {}
        }

        let data = stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone());
        let color_space = dict
            .get(b"ColorSpace")
            .ok()
            .and_then(|o| match o {
                Object::Name(name) => Some(name.clone()),
                Object::Array(arr) => arr.first().and_then(|o| o.as_name().ok()).map(<[u8]>::to_vec),
                Object::Reference(r) => self
                    .document
                    .get_object(*r)
                    .ok()
                    .and_then(|o| o.as_name().ok())
                    .map(<[u8]>::to_vec),
                _ => None,
            })
            .unwrap_or_else(|| b"DeviceRGB".to_vec());
        let bits = dict
            .get(b"BitsPerComponent")
            .ok()
            .and_then(|o| o.as_i64().ok())
            .unwrap_or(8);

        decode_raw(&data, width, height, &color_space, bits)
    }
}

fn decode_raw(
    data: &[u8],
    width: u32,
    height: u32,
    color_space: &[u8],
    bits: i64,
) -> Option<DynamicImage> {
    if bits != 8 {
        trace!("Unsupported bits per component: {}", bits);
        return None;
    }
    let pixels = width as usize * height as usize;

    match color_space {
        b"DeviceRGB" | b"RGB" | b"CalRGB" if data.len() >= pixels * 3 => {
            ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, data[..pixels * 3].to_vec())
                .map(DynamicImage::ImageRgb8)
        }
        b"DeviceGray" | b"G" | b"CalGray" if data.len() >= pixels => {
            ImageBuffer::<Luma<u8>, _>::from_raw(width, height, data[..pixels].to_vec())
                .map(DynamicImage::ImageLuma8)
        }
        _ => {
            trace!(
                "Could not decode raw image: colorspace={}, data_len={}, pixels={}",
                String::from_utf8_lossy(color_space),
                data.len(),
                pixels
            );
            None
        }
    }
}

/// Resample a page image to `target_width`, keeping aspect ratio.
fn resample(img: DynamicImage, target_width: u32, max_size: u32) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    let ratio = target_width as f32 / w as f32;
    // Within 10% of the target resolution is close enough.
    if (0.9..=1.1).contains(&ratio) {
        return img;
    }
    let mut new_w = target_width.max(1);
    let mut new_h = ((h as f32 * ratio).round() as u32).max(1);
    let longest = new_w.max(new_h);
    if longest > max_size {
        let shrink = max_size as f32 / longest as f32;
        new_w = ((new_w as f32 * shrink) as u32).max(1);
        new_h = ((new_h as f32 * shrink) as u32).max(1);
    }
    img.resize_exact(new_w, new_h, FilterType::Lanczos3)
}
