// pixie-batch/src/processors/transform.rs
use super::resizer::Resizer;
use anyhow::{bail, Result};
use image::{imageops, DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use std::str::FromStr;

pub trait Transform {
    fn apply(&self, image: RgbImage) -> Result<RgbImage>;

    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> Transform for F
where
    F: Fn(RgbImage) -> Result<RgbImage>,
{
    fn apply(&self, image: RgbImage) -> Result<RgbImage> {
        self(image)
    }
}

/// Rectangular region of interest, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FromStr for Roi {
    type Err = String;

    /// Parses `x,y,width,height`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid ROI {:?}: {}", s, e))?;

        match parts.as_slice() {
            [x, y, width, height] if *width > 0 && *height > 0 => Ok(Roi {
                x: *x,
                y: *y,
                width: *width,
                height: *height,
            }),
            [_, _, _, _] => Err(format!("ROI {:?} must have a non-zero size", s)),
            _ => Err(format!("ROI {:?} must be x,y,width,height", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum BuiltinTransform {
    Identity,
    Grayscale,
    Invert,
    /// Fill the region with black; the rest of the image is untouched.
    BlackRoi(Roi),
    Resize(Resizer),
}

impl Transform for BuiltinTransform {
    fn apply(&self, mut image: RgbImage) -> Result<RgbImage> {
        match self {
            BuiltinTransform::Identity => Ok(image),
            BuiltinTransform::Grayscale => {
                let gray = imageops::grayscale(&image);
                Ok(DynamicImage::ImageLuma8(gray).into_rgb8())
            }
            BuiltinTransform::Invert => {
                imageops::invert(&mut image);
                Ok(image)
            }
            BuiltinTransform::BlackRoi(roi) => {
                if roi.x >= image.width() || roi.y >= image.height() {
                    bail!(
                        "ROI at ({}, {}) lies outside the {}x{} image",
                        roi.x,
                        roi.y,
                        image.width(),
                        image.height()
                    );
                }
                let rect = Rect::at(roi.x as i32, roi.y as i32).of_size(roi.width, roi.height);
                draw_filled_rect_mut(&mut image, rect, Rgb([0, 0, 0]));
                Ok(image)
            }
            BuiltinTransform::Resize(resizer) => Ok(resizer.resize(image)),
        }
    }

    fn name(&self) -> &str {
        match self {
            BuiltinTransform::Identity => "identity",
            BuiltinTransform::Grayscale => "grayscale",
            BuiltinTransform::Invert => "invert",
            BuiltinTransform::BlackRoi(_) => "black-roi",
            BuiltinTransform::Resize(_) => "resize",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ResizeAlgorithm;
    use crate::processors::ResizeTarget;

    fn sample() -> RgbImage {
        RgbImage::from_pixel(6, 4, Rgb([200, 100, 50]))
    }

    #[test]
    fn closures_are_transforms() {
        let flip = |image: RgbImage| -> Result<RgbImage> { Ok(imageops::flip_horizontal(&image)) };
        assert_eq!(flip.apply(sample()).unwrap().dimensions(), (6, 4));
        assert_eq!(flip.name(), "custom");

        let failing = |_: RgbImage| -> Result<RgbImage> { bail!("no thanks") };
        assert_eq!(failing.apply(sample()).unwrap_err().to_string(), "no thanks");
    }

    #[test]
    fn black_roi_only_touches_the_region() {
        let roi: Roi = "1,1,2,2".parse().unwrap();
        let out = BuiltinTransform::BlackRoi(roi).apply(sample()).unwrap();
        assert_eq!(out.get_pixel(1, 1).0, [0, 0, 0]);
        assert_eq!(out.get_pixel(2, 2).0, [0, 0, 0]);
        assert_eq!(out.get_pixel(0, 0).0, [200, 100, 50]);
        assert_eq!(out.get_pixel(3, 3).0, [200, 100, 50]);
    }

    #[test]
    fn black_roi_is_clipped_and_rejects_outside_regions() {
        let roi: Roi = "4,2,100,100".parse().unwrap();
        let out = BuiltinTransform::BlackRoi(roi).apply(sample()).unwrap();
        assert_eq!(out.get_pixel(5, 3).0, [0, 0, 0]);
        assert_eq!(out.get_pixel(3, 1).0, [200, 100, 50]);

        let outside: Roi = "10,10,2,2".parse().unwrap();
        assert!(BuiltinTransform::BlackRoi(outside).apply(sample()).is_err());
    }

    #[test]
    fn roi_parsing() {
        assert_eq!(
            "1, 2, 3, 4".parse::<Roi>().unwrap(),
            Roi {
                x: 1,
                y: 2,
                width: 3,
                height: 4
            }
        );
        assert!("1,2,0,4".parse::<Roi>().is_err());
        assert!("1,2,3".parse::<Roi>().is_err());
        assert!("a,b,c,d".parse::<Roi>().is_err());
    }

    #[test]
    fn grayscale_and_invert() {
        let gray = BuiltinTransform::Grayscale.apply(sample()).unwrap();
        let [r, g, b] = gray.get_pixel(0, 0).0;
        assert!(r == g && g == b);

        let inverted = BuiltinTransform::Invert.apply(sample()).unwrap();
        assert_eq!(inverted.get_pixel(0, 0).0, [55, 155, 205]);
    }

    #[test]
    fn resize_keeps_aspect() {
        let target = ResizeTarget::Fit {
            width: 3,
            height: 0,
        };
        let out = BuiltinTransform::Resize(Resizer::new(target, ResizeAlgorithm::Nearest))
            .apply(sample())
            .unwrap();
        assert_eq!(out.dimensions(), (3, 2));
    }
}
