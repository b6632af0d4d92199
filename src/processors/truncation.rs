// pixie-batch/src/processors/truncation.rs
use image::{DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use std::fmt;
use std::io::Cursor;

const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const GIF_TRAILER: u8 = 0x3B;
const PNG_IEND: [u8; 12] = [
    0x00, 0x00, 0x00, 0x00, b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82,
];

const TIFF_STRIP_OFFSETS: u16 = 273;
const TIFF_STRIP_BYTE_COUNTS: u16 = 279;
const TIFF_TILE_OFFSETS: u16 = 324;
const TIFF_TILE_BYTE_COUNTS: u16 = 325;

/// How an encoded stream falls short of the end its format requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shortfall {
    MissingEnd(ImageFormat),
    ShortData { declared: usize, actual: usize },
    DirectoryPastEnd { offset: usize, actual: usize },
}

impl fmt::Display for Shortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shortfall::MissingEnd(ImageFormat::Jpeg) => {
                f.write_str("missing JPEG end-of-image marker")
            }
            Shortfall::MissingEnd(ImageFormat::Png) => f.write_str("missing PNG IEND chunk"),
            Shortfall::MissingEnd(ImageFormat::Gif) => f.write_str("missing GIF trailer"),
            Shortfall::MissingEnd(format) => write!(f, "missing {:?} end marker", format),
            Shortfall::ShortData { declared, actual } => {
                write!(f, "{} of {} declared bytes present", actual, declared)
            }
            Shortfall::DirectoryPastEnd { offset, actual } => write!(
                f,
                "image directory at byte {} lies past the end of a {}-byte file",
                offset, actual
            ),
        }
    }
}

/// Check `bytes` against the end `format` requires. `None` means the stream
/// looks complete, its format has no checkable end, or its header is not
/// `format` at all.
pub fn inspect(bytes: &[u8], format: ImageFormat) -> Option<Shortfall> {
    if image::guess_format(bytes).ok() != Some(format) {
        return None;
    }

    match format {
        ImageFormat::Jpeg if !bytes.ends_with(&JPEG_EOI) => Some(Shortfall::MissingEnd(format)),
        ImageFormat::Png if !bytes.ends_with(&PNG_IEND) => Some(Shortfall::MissingEnd(format)),
        ImageFormat::Gif if bytes.last() != Some(&GIF_TRAILER) => {
            Some(Shortfall::MissingEnd(format))
        }
        ImageFormat::Bmp => short_of(bytes, bmp_declared_len(bytes)?),
        ImageFormat::WebP => short_of(bytes, webp_declared_len(bytes)?),
        ImageFormat::Tiff => tiff_shortfall(bytes),
        _ => None,
    }
}

/// Bytes that finish the stream: the missing end marker appended, or pixel data
/// zero-padded to the size the header declares. Padding larger than `max_pad`
/// is refused.
pub fn complete(bytes: &[u8], shortfall: &Shortfall, max_pad: u64) -> Option<Vec<u8>> {
    let mut completed = bytes.to_vec();
    match shortfall {
        Shortfall::MissingEnd(ImageFormat::Jpeg) => completed.extend_from_slice(&JPEG_EOI),
        Shortfall::MissingEnd(ImageFormat::Png) => completed.extend_from_slice(&PNG_IEND),
        Shortfall::MissingEnd(ImageFormat::Gif) => completed.push(GIF_TRAILER),
        Shortfall::ShortData { declared, actual } => {
            if (declared - actual) as u64 > max_pad {
                return None;
            }
            completed.resize(*declared, 0);
        }
        _ => return None,
    }
    Some(completed)
}

/// Decode a PNG row by row until the data runs out, leaving missing rows black.
pub fn salvage_png(
    bytes: &[u8],
    max_dimensions: (u32, u32),
    max_alloc: u64,
) -> Result<DynamicImage, String> {
    let mut limits = png::Limits::default();
    limits.bytes = usize::try_from(max_alloc).unwrap_or(usize::MAX);
    let mut decoder = png::Decoder::new_with_limits(Cursor::new(bytes), limits);
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder.read_info().map_err(|e| e.to_string())?;

    let (width, height, interlaced) = {
        let info = reader.info();
        (info.width, info.height, info.interlaced)
    };
    if interlaced {
        return Err("interlaced rows cannot be salvaged".to_string());
    }
    if width > max_dimensions.0 || height > max_dimensions.1 {
        return Err(format!("{}x{} exceeds decoder limits", width, height));
    }

    let (color_type, bit_depth) = reader.output_color_type();
    if bit_depth != png::BitDepth::Eight {
        return Err(format!("unexpected {:?} output depth", bit_depth));
    }
    let line_size = reader.output_line_size(width);
    let mut buffer = vec![0u8; line_size * height as usize];

    let mut rows = 0usize;
    for line in buffer.chunks_exact_mut(line_size) {
        match reader.next_row() {
            Ok(Some(row)) => {
                let data = row.data();
                let len = data.len().min(line.len());
                line[..len].copy_from_slice(&data[..len]);
                rows += 1;
            }
            Ok(None) => break,
            Err(e) => {
                log::debug!("PNG row salvage stopped after {} of {} rows: {}", rows, height, e);
                break;
            }
        }
    }
    if rows == 0 {
        return Err("no rows could be decoded".to_string());
    }

    let image = match color_type {
        png::ColorType::Grayscale => {
            GrayImage::from_raw(width, height, buffer).map(DynamicImage::ImageLuma8)
        }
        png::ColorType::GrayscaleAlpha => {
            GrayAlphaImage::from_raw(width, height, buffer).map(DynamicImage::ImageLumaA8)
        }
        png::ColorType::Rgb => {
            RgbImage::from_raw(width, height, buffer).map(DynamicImage::ImageRgb8)
        }
        png::ColorType::Rgba => {
            RgbaImage::from_raw(width, height, buffer).map(DynamicImage::ImageRgba8)
        }
        png::ColorType::Indexed => None,
    };
    image.ok_or_else(|| format!("cannot assemble {:?} rows into an image", color_type))
}

fn short_of(bytes: &[u8], declared: usize) -> Option<Shortfall> {
    (bytes.len() < declared).then(|| Shortfall::ShortData {
        declared,
        actual: bytes.len(),
    })
}

fn le_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// Larger of the file size field and pixel offset plus image size.
fn bmp_declared_len(bytes: &[u8]) -> Option<usize> {
    let file_size = le_u32(bytes, 2)? as usize;
    let pixel_offset = le_u32(bytes, 10)? as usize;
    let image_size = le_u32(bytes, 34).unwrap_or(0) as usize;
    Some(file_size.max(pixel_offset.saturating_add(image_size)))
}

fn webp_declared_len(bytes: &[u8]) -> Option<usize> {
    Some((le_u32(bytes, 4)? as usize).saturating_add(8))
}

struct TiffBytes<'a> {
    bytes: &'a [u8],
    little_endian: bool,
}

impl TiffBytes<'_> {
    fn u16_at(&self, at: usize) -> Option<u16> {
        let raw = self.bytes.get(at..at + 2)?;
        let pair = [raw[0], raw[1]];
        Some(if self.little_endian {
            u16::from_le_bytes(pair)
        } else {
            u16::from_be_bytes(pair)
        })
    }

    fn u32_at(&self, at: usize) -> Option<u32> {
        let raw = self.bytes.get(at..at + 4)?;
        let quad = [raw[0], raw[1], raw[2], raw[3]];
        Some(if self.little_endian {
            u32::from_le_bytes(quad)
        } else {
            u32::from_be_bytes(quad)
        })
    }

    /// SHORT or LONG values of the directory entry at `entry`.
    fn values(&self, entry: usize) -> Option<Vec<usize>> {
        let kind = self.u16_at(entry + 2)?;
        let count = self.u32_at(entry + 4)? as usize;
        let width = match kind {
            3 => 2,
            4 => 4,
            _ => return None,
        };
        let start = if count.checked_mul(width)? <= 4 {
            entry + 8
        } else {
            self.u32_at(entry + 8)? as usize
        };

        (0..count)
            .map(|i| {
                let at = start + i * width;
                if width == 2 {
                    self.u16_at(at).map(usize::from)
                } else {
                    self.u32_at(at).map(|v| v as usize)
                }
            })
            .collect()
    }
}

fn tiff_shortfall(bytes: &[u8]) -> Option<Shortfall> {
    let little_endian = match bytes.get(0..2)? {
        b"II" => true,
        b"MM" => false,
        _ => return None,
    };
    let tiff = TiffBytes {
        bytes,
        little_endian,
    };

    let ifd = tiff.u32_at(4)? as usize;
    let Some(entries) = tiff.u16_at(ifd) else {
        return Some(Shortfall::DirectoryPastEnd {
            offset: ifd,
            actual: bytes.len(),
        });
    };
    let directory_end = ifd + 2 + usize::from(entries) * 12;
    if directory_end > bytes.len() {
        return Some(Shortfall::DirectoryPastEnd {
            offset: ifd,
            actual: bytes.len(),
        });
    }

    let mut offsets = None;
    let mut counts = None;
    for index in 0..usize::from(entries) {
        let entry = ifd + 2 + index * 12;
        match tiff.u16_at(entry)? {
            TIFF_STRIP_OFFSETS | TIFF_TILE_OFFSETS => offsets = tiff.values(entry),
            TIFF_STRIP_BYTE_COUNTS | TIFF_TILE_BYTE_COUNTS => counts = tiff.values(entry),
            _ => {}
        }
    }

    let declared = offsets?
        .iter()
        .zip(counts?.iter())
        .map(|(offset, count)| offset.saturating_add(*count))
        .max()?;
    short_of(bytes, declared)
}
