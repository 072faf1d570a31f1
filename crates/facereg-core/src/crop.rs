//! Face region clamping, cropping and resizing.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Integer pixel rectangle fully inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Clamp a detector box to `width` × `height`.
///
/// Corner coordinates are truncated toward zero, then clamped to the image.
/// Returns `None` when nothing of the box remains inside the image.
pub fn clamp_to_bounds(bbox: &BoundingBox, width: u32, height: u32) -> Option<FaceRegion> {
    let clamp = |v: f32, max: u32| -> u32 { (v as i64).clamp(0, max as i64) as u32 };

    let x1 = clamp(bbox.x, width);
    let y1 = clamp(bbox.y, height);
    let x2 = clamp(bbox.x + bbox.width, width);
    let y2 = clamp(bbox.y + bbox.height, height);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    Some(FaceRegion {
        x: x1,
        y: y1,
        width: x2 - x1,
        height: y2 - y1,
    })
}

/// Crop the clamped face region out of `image`, or `None` if it is empty.
pub fn crop_face(image: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let region = clamp_to_bounds(bbox, image.width(), image.height())?;
    Some(imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image())
}

/// Bilinear resize to exactly `width` × `height`.
pub fn resize_to(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Triangle)
}

/// Proportionally downscale images wider than `max_width`. Narrower images
/// are returned unchanged.
pub fn limit_width(image: RgbImage, max_width: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    if max_width == 0 || w <= max_width {
        return image;
    }
    let scale = max_width as f32 / w as f32;
    let new_h = ((h as f32 * scale) as u32).max(1);
    tracing::debug!(from_width = w, from_height = h, width = max_width, height = new_h, "downscaling for detection");
    imageops::resize(&image, max_width, new_h, FilterType::Triangle)
}
