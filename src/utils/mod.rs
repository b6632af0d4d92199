// pixie-batch/src/utils/mod.rs
pub mod naming;

use image::ImageFormat;
use std::any::Any;
use std::path::Path;

/// Extensions (lowercase, no dot) that make a file a batch candidate.
pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "tiff", "tif", "gif"];

pub fn is_supported_format(path: &Path) -> bool {
    get_file_extension(path)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

pub fn get_file_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_lowercase())
}

/// Format token derived from a file extension: `jpg` becomes `JPEG`, anything else is uppercased.
pub fn format_token(extension: &str) -> String {
    let ext = extension.trim_start_matches('.');
    if ext.eq_ignore_ascii_case("jpg") {
        "JPEG".to_string()
    } else {
        ext.to_uppercase()
    }
}

pub fn format_from_token(token: &str) -> Option<ImageFormat> {
    match token {
        "JPEG" => Some(ImageFormat::Jpeg),
        "PNG" => Some(ImageFormat::Png),
        "BMP" => Some(ImageFormat::Bmp),
        "TIFF" | "TIF" => Some(ImageFormat::Tiff),
        "GIF" => Some(ImageFormat::Gif),
        "WEBP" => Some(ImageFormat::WebP),
        _ => None,
    }
}

/// Decoder format implied by the extension alone, ignoring file content.
pub fn forced_format(path: &Path) -> Option<ImageFormat> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| format_from_token(&format_token(ext)))
}

/// Format recognized from magic bytes, if any.
pub fn sniff_format(header: &[u8]) -> Option<ImageFormat> {
    if header.is_empty() {
        return None;
    }
    image::guess_format(header).ok()
}

pub fn success_rate(processed: usize, scanned: usize) -> f64 {
    if scanned == 0 {
        0.0
    } else {
        processed as f64 / scanned as f64 * 100.0
    }
}

pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let base = 1024_f64;
    let bytes_f64 = bytes as f64;
    let exponent = ((bytes_f64.log10() / base.log10()).floor() as usize).min(UNITS.len() - 1);
    let size = bytes_f64 / base.powi(exponent as i32);

    format!("{:.2} {}", size, UNITS[exponent])
}

pub fn image_format_to_string(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "JPEG",
        ImageFormat::Png => "PNG",
        ImageFormat::Gif => "GIF",
        ImageFormat::WebP => "WebP",
        ImageFormat::Tiff => "TIFF",
        ImageFormat::Bmp => "BMP",
        ImageFormat::Pnm => "PNM",
        ImageFormat::Tga => "TGA",
        ImageFormat::Ico => "ICO",
        ImageFormat::Hdr => "HDR",
        ImageFormat::OpenExr => "OpenEXR",
        ImageFormat::Avif => "AVIF",
        ImageFormat::Qoi => "QOI",
        _ => "Unknown",
    }
    .to_string()
}

/// Best-effort text for a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
