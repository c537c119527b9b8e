//! Image preprocessing
//!
//! Region cropping and the two OCR variants (grayscale, Otsu binary), plus
//! tensor conversion for the ONNX detection and recognition models.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use ndarray::Array4;

use super::BoundingBox;

/// Gray level used to pad letterboxed detector input
const LETTERBOX_FILL: u8 = 114;

/// Copy the pixels inside `bbox` out of the frame
pub fn crop(frame: &RgbImage, bbox: &BoundingBox) -> RgbImage {
    imageops::crop_imm(frame, bbox.x1, bbox.y1, bbox.width(), bbox.height()).to_image()
}

/// Convert RGB to single channel luminance
pub fn to_grayscale(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        // BT.601 luminance weights
        let gray = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        Luma([gray.round().clamp(0.0, 255.0) as u8])
    })
}

/// Global Otsu binarization: pixels above the Otsu level become 255, the rest 0
pub fn binarize_otsu(gray: &GrayImage) -> GrayImage {
    let level = otsu_level(gray);
    threshold(gray, level, ThresholdType::Binary)
}

/// Both OCR variants of one detection region
pub struct RegionVariants {
    /// Grayscale crop
    pub gray: GrayImage,
    /// Otsu-thresholded crop
    pub binary: GrayImage,
}

/// Crop a region and build its grayscale and binary variants
pub fn region_variants(frame: &RgbImage, bbox: &BoundingBox) -> RegionVariants {
    let gray = to_grayscale(&crop(frame, bbox));
    let binary = binarize_otsu(&gray);
    RegionVariants { gray, binary }
}

/// Geometry of a letterboxed image, used to map model boxes back to the frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Scale applied to the source image
    pub scale: f32,
    /// Horizontal padding on the left, in model pixels
    pub pad_x: f32,
    /// Vertical padding on the top, in model pixels
    pub pad_y: f32,
}

impl Letterbox {
    /// Map a point from model input space back to source image space
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Resize preserving aspect ratio into a `size` x `size` square, centered and padded
pub fn letterbox(image: &RgbImage, size: u32) -> (RgbImage, Letterbox) {
    let (w, h) = image.dimensions();
    let scale = (size as f32 / w as f32).min(size as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, size);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;
    let mut canvas = RgbImage::from_pixel(size, size, image::Rgb([LETTERBOX_FILL; 3]));
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    (
        canvas,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

/// Convert an RGB image to a NCHW tensor (batch size 1) scaled to [0, 1]
pub fn rgb_to_nchw(image: &RgbImage) -> Array4<f32> {
    let (w, h) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel.0[c] as f32 / 255.0;
        }
    }

    tensor
}

/// Resize a grayscale region to a fixed height for the recognizer and
/// convert it to a 3 channel NCHW tensor normalized to [-1, 1]
pub fn gray_to_recognition_tensor(region: &GrayImage, target_height: u32, max_width: u32) -> Array4<f32> {
    let (w, h) = region.dimensions();
    let scale = target_height as f32 / h.max(1) as f32;
    let new_w = ((w as f32 * scale).ceil() as u32).clamp(1, max_width);

    let resized = imageops::resize(region, new_w, target_height, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, target_height as usize, new_w as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        // (v / 255 - 0.5) / 0.5
        let value = pixel.0[0] as f32 / 127.5 - 1.0;
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = value;
        }
    }

    tensor
}
