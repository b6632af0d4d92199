// pixie-batch/src/processors/resizer.rs
use crate::core::ResizeAlgorithm;
use image::{imageops, imageops::FilterType, RgbImage};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResizeTarget {
    /// Fit inside the box keeping aspect; a zero side follows from the other.
    Fit { width: u32, height: u32 },
    /// Stretch to these dimensions; a zero side keeps the source size.
    Exact { width: u32, height: u32 },
    /// Percentage of the source dimensions.
    Percent(f32),
}

impl ResizeTarget {
    pub fn dimensions(&self, (src_w, src_h): (u32, u32)) -> (u32, u32) {
        if src_w == 0 || src_h == 0 {
            return (src_w, src_h);
        }

        let scaled = |side: u32, factor: f32| ((side as f32 * factor).round() as u32).max(1);
        match *self {
            ResizeTarget::Fit { width: 0, height: 0 }
            | ResizeTarget::Exact { width: 0, height: 0 } => (src_w, src_h),
            ResizeTarget::Fit { width: 0, height } => {
                (scaled(src_w, height as f32 / src_h as f32), height)
            }
            ResizeTarget::Fit { width, height: 0 } => {
                (width, scaled(src_h, width as f32 / src_w as f32))
            }
            ResizeTarget::Fit { width, height } => {
                let factor = (width as f32 / src_w as f32).min(height as f32 / src_h as f32);
                (scaled(src_w, factor), scaled(src_h, factor))
            }
            ResizeTarget::Exact { width, height } => (
                if width == 0 { src_w } else { width },
                if height == 0 { src_h } else { height },
            ),
            ResizeTarget::Percent(percent) if percent > 0.0 => {
                (scaled(src_w, percent / 100.0), scaled(src_h, percent / 100.0))
            }
            ResizeTarget::Percent(_) => (src_w, src_h),
        }
    }
}

impl From<ResizeAlgorithm> for FilterType {
    fn from(algorithm: ResizeAlgorithm) -> Self {
        match algorithm {
            ResizeAlgorithm::Nearest => FilterType::Nearest,
            ResizeAlgorithm::Bilinear => FilterType::Triangle,
            ResizeAlgorithm::Bicubic => FilterType::CatmullRom,
            ResizeAlgorithm::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Resizer {
    target: ResizeTarget,
    filter: FilterType,
}

impl Resizer {
    pub fn new(target: ResizeTarget, algorithm: ResizeAlgorithm) -> Self {
        Self {
            target,
            filter: algorithm.into(),
        }
    }

    pub fn resize(&self, image: RgbImage) -> RgbImage {
        let (width, height) = self.target.dimensions(image.dimensions());
        if (width, height) == image.dimensions() {
            return image;
        }

        log::debug!(
            "Resizing {}x{} to {}x{}",
            image.width(),
            image.height(),
            width,
            height
        );
        imageops::resize(&image, width, height, self.filter)
    }
}
