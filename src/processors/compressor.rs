// pixie-batch/src/processors/compressor.rs
use crate::core::{ImageToolError, Result};
use crate::utils::get_file_extension;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use oxipng::{optimize_from_memory, Options};
use std::io::Cursor;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct Compressor {
    quality: u8,
    optimize_png: bool,
}

impl Compressor {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            optimize_png: false,
        }
    }

    pub fn with_png_optimization(mut self, optimize: bool) -> Self {
        self.optimize_png = optimize;
        self
    }

    /// Encode for the format implied by `path`'s extension and write the file.
    /// Encoding happens in memory first, so a failed encode leaves nothing on disk.
    pub fn save(&self, image: &RgbImage, path: &Path) -> Result<u64> {
        let format = self.detect_format(path)?;
        let data = self.compress_to_bytes(image, format)?;
        std::fs::write(path, &data)?;

        log::debug!(
            "Saved image: {} ({} bytes, {:?})",
            path.display(),
            data.len(),
            format
        );
        Ok(data.len() as u64)
    }

    pub fn compress_to_bytes(&self, image: &RgbImage, format: ImageFormat) -> Result<Vec<u8>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ImageToolError::EncodeError(format!(
                "cannot encode an empty {}x{} image",
                width, height
            )));
        }

        let mut buffer = Cursor::new(Vec::new());

        match format {
            ImageFormat::Jpeg => {
                JpegEncoder::new_with_quality(&mut buffer, self.quality)
                    .encode_image(image)
                    .map_err(encode_error)?;
            }
            ImageFormat::Png => {
                image
                    .write_to(&mut buffer, ImageFormat::Png)
                    .map_err(encode_error)?;
                if self.optimize_png {
                    return self.optimize_png_bytes(&buffer.into_inner());
                }
            }
            _ => {
                image.write_to(&mut buffer, format).map_err(encode_error)?;
            }
        }

        Ok(buffer.into_inner())
    }

    fn optimize_png_bytes(&self, data: &[u8]) -> Result<Vec<u8>> {
        optimize_from_memory(data, &Options::default())
            .map_err(|e| ImageToolError::EncodeError(format!("PNG optimization failed: {}", e)))
    }

    pub fn detect_format(&self, path: &Path) -> Result<ImageFormat> {
        match get_file_extension(path).as_deref() {
            Some("jpg") | Some("jpeg") => Ok(ImageFormat::Jpeg),
            Some("png") => Ok(ImageFormat::Png),
            Some("gif") => Ok(ImageFormat::Gif),
            Some("bmp") => Ok(ImageFormat::Bmp),
            Some("webp") => Ok(ImageFormat::WebP),
            Some("tiff") | Some("tif") => Ok(ImageFormat::Tiff),
            _ => Err(ImageToolError::UnsupportedFormat(format!(
                "no encoder for {}",
                path.display()
            ))),
        }
    }
}

fn encode_error(e: image::ImageError) -> ImageToolError {
    ImageToolError::EncodeError(e.to_string())
}
