// pixie-batch/src/processors/loader.rs
use super::truncation::{self, Shortfall};
use crate::core::{ImageToolError, Result as ToolResult};
use crate::utils::{format_token, forced_format, image_format_to_string, panic_message, sniff_format};
use image::{DynamicImage, ImageFormat, ImageReader, Limits, RgbImage};
use std::cell::OnceCell;
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

/// Bytes read for the signature check.
const SNIFF_LEN: u64 = 64;

const EXHAUSTIVE_FORMATS: [ImageFormat; 6] = [
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Bmp,
    ImageFormat::Tiff,
    ImageFormat::Gif,
    ImageFormat::WebP,
];

static DECODER_SETTINGS: OnceLock<DecoderSettings> = OnceLock::new();

/// Process-wide decoder configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderSettings {
    /// Lenient: complete or salvage truncated streams. Strict: every strategy
    /// refuses them.
    pub tolerate_truncated: bool,
    pub max_dimensions: (u32, u32),
    pub max_alloc: u64,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            tolerate_truncated: true,
            max_dimensions: (100_000, 100_000),
            max_alloc: 512 * 1024 * 1024,
        }
    }
}

impl DecoderSettings {
    /// Install these settings for the process. Returns `false` if settings were
    /// already installed (or read), in which case the existing ones stay.
    pub fn install(self) -> bool {
        DECODER_SETTINGS.set(self).is_ok()
    }

    pub fn current() -> &'static DecoderSettings {
        DECODER_SETTINGS.get_or_init(DecoderSettings::default)
    }

    pub fn validate(&self) -> ToolResult<()> {
        let (width, height) = self.max_dimensions;
        if width == 0 || height == 0 {
            return Err(ImageToolError::InvalidParameter(format!(
                "Decoder dimension limits must be non-zero, got {}x{}",
                width, height
            )));
        }
        if self.max_alloc == 0 {
            return Err(ImageToolError::InvalidParameter(
                "Decoder allocation limit must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    fn limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimensions.0);
        limits.max_image_height = Some(self.max_dimensions.1);
        limits.max_alloc = Some(self.max_alloc);
        limits
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    ByteBuffer,
    ForcedFormat,
    Exhaustive,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Direct => "direct decode",
            Strategy::ByteBuffer => "byte-buffer decode",
            Strategy::ForcedFormat => "forced-format decode",
            Strategy::Exhaustive => "exhaustive-format decode",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    pub strategy: Strategy,
    pub reason: String,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.reason)
    }
}

pub fn describe_failures(failures: &[StrategyFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" | ")
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Unusable {
    #[error("not an image: {reason}")]
    NotAnImage { reason: String },

    #[error("unreadable: {reason}")]
    Unreadable { reason: String },

    #[error("decode exhausted: {}", describe_failures(.attempts))]
    DecodeExhausted { attempts: Vec<StrategyFailure> },
}

/// A successfully acquired image.
#[derive(Debug)]
pub struct Acquired {
    pub image: RgbImage,
    /// Format recognized from the header.
    pub sniffed: ImageFormat,
    /// Format the winning decoder used, when known.
    pub decoded_as: Option<ImageFormat>,
    pub strategy: Strategy,
    /// Failures of the strategies tried before `strategy`.
    pub failures: Vec<StrategyFailure>,
}

impl Acquired {
    pub fn recovered(&self) -> bool {
        !self.failures.is_empty()
    }
}

type Decoded = (DynamicImage, Option<ImageFormat>);
type StrategyFn = fn(&Loader, &Source<'_>) -> Result<Decoded, String>;

const CASCADE: [(Strategy, StrategyFn); 4] = [
    (Strategy::Direct, decode_direct),
    (Strategy::ByteBuffer, decode_buffer),
    (Strategy::ForcedFormat, decode_forced),
    (Strategy::Exhaustive, decode_exhaustive),
];

/// File contents, read at most once and only when a strategy asks for them.
struct Source<'a> {
    path: &'a Path,
    bytes: OnceCell<Vec<u8>>,
}

impl<'a> Source<'a> {
    fn new(path: &'a Path) -> Self {
        Self {
            path,
            bytes: OnceCell::new(),
        }
    }

    fn bytes(&self) -> Result<&[u8], String> {
        if self.bytes.get().is_none() {
            let data = std::fs::read(self.path).map_err(|e| format!("read failed: {}", e))?;
            let _ = self.bytes.set(data);
        }
        Ok(self.bytes.get().map(Vec::as_slice).unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
pub struct Loader {
    settings: DecoderSettings,
}

impl Loader {
    /// A loader using the process-wide [`DecoderSettings`].
    pub fn new() -> Self {
        Self::with_settings(DecoderSettings::current().clone())
    }

    pub fn with_settings(settings: DecoderSettings) -> Self {
        Self { settings }
    }

    pub fn acquire(&self, path: &Path) -> Result<Acquired, Unusable> {
        log::debug!("Acquiring image from: {}", path.display());

        let sniffed = self.sniff(path)?;
        let source = Source::new(path);
        let mut failures = Vec::new();

        for (strategy, attempt) in CASCADE {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| attempt(self, &source)))
                .unwrap_or_else(|payload| {
                    Err(format!("decoder panicked: {}", panic_message(payload.as_ref())))
                });

            match outcome {
                Ok((image, decoded_as)) => {
                    if !failures.is_empty() {
                        log::debug!(
                            "Recovered {} via {} after {} failed attempt(s)",
                            path.display(),
                            strategy,
                            failures.len()
                        );
                    }
                    let image = image.into_rgb8();
                    log::debug!(
                        "Decoded {}: {}x{} via {}",
                        path.display(),
                        image.width(),
                        image.height(),
                        strategy
                    );
                    return Ok(Acquired {
                        image,
                        sniffed,
                        decoded_as,
                        strategy,
                        failures,
                    });
                }
                Err(reason) => {
                    log::debug!("{} failed for {}: {}", strategy, path.display(), reason);
                    failures.push(StrategyFailure { strategy, reason });
                }
            }
        }

        Err(Unusable::DecodeExhausted { attempts: failures })
    }

    /// Recognize the file's signature without decoding anything.
    pub fn sniff(&self, path: &Path) -> Result<ImageFormat, Unusable> {
        let mut header = Vec::with_capacity(SNIFF_LEN as usize);
        File::open(path)
            .and_then(|file| file.take(SNIFF_LEN).read_to_end(&mut header))
            .map_err(|e| Unusable::Unreadable {
                reason: e.to_string(),
            })?;

        if header.is_empty() {
            return Err(Unusable::NotAnImage {
                reason: "file is empty".to_string(),
            });
        }

        sniff_format(&header).ok_or_else(|| Unusable::NotAnImage {
            reason: "no recognizable image signature".to_string(),
        })
    }

    fn shortfall(&self, bytes: &[u8], format: ImageFormat) -> Result<Option<Shortfall>, String> {
        match truncation::inspect(bytes, format) {
            Some(shortfall) if !self.settings.tolerate_truncated => {
                Err(format!("truncated stream: {}", shortfall))
            }
            found => Ok(found),
        }
    }

    fn decode_bytes_as(&self, bytes: &[u8], format: ImageFormat) -> Result<Decoded, String> {
        let shortfall = self.shortfall(bytes, format)?;
        let completed = shortfall
            .as_ref()
            .and_then(|shortfall| truncation::complete(bytes, shortfall, self.settings.max_alloc));
        if let (Some(shortfall), Some(_)) = (&shortfall, &completed) {
            log::debug!(
                "Completing truncated {} stream: {}",
                image_format_to_string(format),
                shortfall
            );
        }

        let data = completed.as_deref().unwrap_or(bytes);
        let mut reader = ImageReader::with_format(Cursor::new(data), format);
        reader.limits(self.settings.limits());
        match reader.decode() {
            Ok(image) => Ok((image, Some(format))),
            Err(e) if format == ImageFormat::Png && shortfall.is_some() => {
                truncation::salvage_png(bytes, self.settings.max_dimensions, self.settings.max_alloc)
                    .map(|image| (image, Some(format)))
                    .map_err(|salvage| format!("{}; row salvage failed: {}", e, salvage))
            }
            Err(e) => Err(e.to_string()),
        }
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_direct(loader: &Loader, source: &Source<'_>) -> Result<Decoded, String> {
    if !loader.settings.tolerate_truncated {
        let bytes = source.bytes()?;
        if let Some(format) = sniff_format(bytes) {
            loader.shortfall(bytes, format)?;
        }
    }

    let mut reader = ImageReader::open(source.path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| format!("open failed: {}", e))?;
    reader.limits(loader.settings.limits());
    let format = reader.format();
    reader
        .decode()
        .map(|image| (image, format))
        .map_err(|e| e.to_string())
}

fn decode_buffer(loader: &Loader, source: &Source<'_>) -> Result<Decoded, String> {
    let bytes = source.bytes()?;
    let format =
        sniff_format(bytes).ok_or_else(|| "no recognizable image signature".to_string())?;
    loader.decode_bytes_as(bytes, format)
}

fn decode_forced(loader: &Loader, source: &Source<'_>) -> Result<Decoded, String> {
    let format = forced_format(source.path).ok_or_else(|| {
        let token = source
            .path
            .extension()
            .map(|ext| format_token(&ext.to_string_lossy()))
            .unwrap_or_default();
        format!("no decoder for format token {:?}", token)
    })?;
    loader.decode_bytes_as(source.bytes()?, format)
}

fn decode_exhaustive(loader: &Loader, source: &Source<'_>) -> Result<Decoded, String> {
    let bytes = source.bytes()?;
    let mut reasons = Vec::with_capacity(EXHAUSTIVE_FORMATS.len());

    for format in EXHAUSTIVE_FORMATS {
        match loader.decode_bytes_as(bytes, format) {
            Ok(decoded) => return Ok(decoded),
            Err(e) => reasons.push(format!("{}: {}", image_format_to_string(format), e)),
        }
    }

    Err(reasons.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgba, RgbaImage};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn encoded(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, format).unwrap();
        buffer.into_inner()
    }

    fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn rgb(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 10) as u8, (y * 10) as u8, 128])
        }))
    }

    fn loader() -> Loader {
        Loader::with_settings(DecoderSettings::default())
    }

    #[test]
    fn empty_file_is_not_an_image() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "empty.png", &[]);
        assert_eq!(
            loader().acquire(&path).unwrap_err(),
            Unusable::NotAnImage {
                reason: "file is empty".to_string()
            }
        );
    }

    #[test]
    fn text_with_image_extension_is_not_an_image() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "notes.jpg", b"this is definitely not a jpeg");
        assert!(matches!(
            loader().acquire(&path),
            Err(Unusable::NotAnImage { .. })
        ));
    }

    #[test]
    fn missing_file_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.png");
        assert!(matches!(
            loader().acquire(&path),
            Err(Unusable::Unreadable { .. })
        ));
    }

    #[test]
    fn png_decodes_directly() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "ok.png", &encoded(&rgb(8, 4), ImageFormat::Png));
        let acquired = loader().acquire(&path).unwrap();
        assert_eq!(acquired.strategy, Strategy::Direct);
        assert_eq!(acquired.sniffed, ImageFormat::Png);
        assert_eq!(acquired.image.dimensions(), (8, 4));
        assert!(!acquired.recovered());
    }

    #[test]
    fn png_with_jpg_extension_is_usable() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "mislabeled.jpg", &encoded(&rgb(5, 5), ImageFormat::Png));
        let acquired = loader().acquire(&path).unwrap();
        assert_eq!(acquired.sniffed, ImageFormat::Png);
        assert_eq!(acquired.decoded_as, Some(ImageFormat::Png));
        assert_eq!(acquired.image.dimensions(), (5, 5));
    }

    #[test]
    fn alpha_and_grayscale_are_normalized_to_rgb() {
        let dir = TempDir::new().unwrap();
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 0])));
        let path = write(&dir, "alpha.png", &encoded(&rgba, ImageFormat::Png));
        let acquired = loader().acquire(&path).unwrap();
        assert_eq!(acquired.image.get_pixel(0, 0).0, [10, 20, 30]);

        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(2, 2, Luma([77])));
        let path = write(&dir, "gray.png", &encoded(&gray, ImageFormat::Png));
        let acquired = loader().acquire(&path).unwrap();
        assert_eq!(acquired.image.get_pixel(1, 1).0, [77, 77, 77]);
    }

    #[test]
    fn corrupt_body_exhausts_every_strategy_in_order() {
        let dir = TempDir::new().unwrap();
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend_from_slice(&[0xAB; 40]);
        let path = write(&dir, "broken.png", &bytes);

        match loader().acquire(&path) {
            Err(Unusable::DecodeExhausted { attempts }) => {
                let order: Vec<Strategy> = attempts.iter().map(|a| a.strategy).collect();
                assert_eq!(order, CASCADE.map(|(strategy, _)| strategy).to_vec());
                assert!(attempts.iter().all(|a| !a.reason.is_empty()));
            }
            other => panic!("expected exhausted decode, got {:?}", other),
        }
    }

    #[test]
    fn forced_format_follows_extension() {
        let dir = TempDir::new().unwrap();
        let png = encoded(&rgb(4, 4), ImageFormat::Png);

        let matching = write(&dir, "a.png", &png);
        let (image, format) = decode_forced(&loader(), &Source::new(&matching)).unwrap();
        assert_eq!(format, Some(ImageFormat::Png));
        assert_eq!(image.width(), 4);

        let mismatched = write(&dir, "a.bmp", &png);
        assert!(decode_forced(&loader(), &Source::new(&mismatched)).is_err());

        let unknown = write(&dir, "a.raw", &png);
        let err = decode_forced(&loader(), &Source::new(&unknown)).unwrap_err();
        assert!(err.contains("RAW"), "{err}");
    }

    #[test]
    fn exhaustive_tries_formats_until_one_fits() {
        let dir = TempDir::new().unwrap();
        let bmp = encoded(&rgb(6, 3), ImageFormat::Bmp);
        let path = write(&dir, "mystery.dat", &bmp);
        let (image, format) = decode_exhaustive(&loader(), &Source::new(&path)).unwrap();
        assert_eq!(format, Some(ImageFormat::Bmp));
        assert_eq!((image.width(), image.height()), (6, 3));
    }

    #[test]
    fn limits_apply_to_every_strategy() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "big.png", &encoded(&rgb(20, 20), ImageFormat::Png));
        let strict = Loader::with_settings(DecoderSettings {
            max_dimensions: (10, 10),
            ..DecoderSettings::default()
        });
        assert!(matches!(
            strict.acquire(&path),
            Err(Unusable::DecodeExhausted { .. })
        ));
    }

    fn strict() -> Loader {
        Loader::with_settings(DecoderSettings {
            tolerate_truncated: false,
            ..DecoderSettings::default()
        })
    }

    fn noisy(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            let h = (x * 7919 + y * 104_729) ^ (x * y * 31);
            image::Rgb([h as u8, (h >> 8) as u8, (h >> 16) as u8])
        }))
    }

    #[test]
    fn png_missing_iend_is_recovered_from_memory() {
        let dir = TempDir::new().unwrap();
        let original = rgb(8, 4);
        let png = encoded(&original, ImageFormat::Png);
        let path = write(&dir, "cut.png", &png[..png.len() - 12]);

        let acquired = loader().acquire(&path).unwrap();
        assert!(acquired.recovered());
        assert_eq!(acquired.failures[0].strategy, Strategy::Direct);
        assert_eq!(acquired.strategy, Strategy::ByteBuffer);
        assert_eq!(acquired.image, original.into_rgb8());
    }

    #[test]
    fn strict_settings_refuse_what_lenient_settings_recover() {
        let dir = TempDir::new().unwrap();
        let png = encoded(&rgb(8, 4), ImageFormat::Png);
        let path = write(&dir, "cut.png", &png[..png.len() - 12]);
        assert!(loader().acquire(&path).is_ok());

        match strict().acquire(&path) {
            Err(Unusable::DecodeExhausted { attempts }) => {
                assert_eq!(attempts.len(), 4);
                for attempt in &attempts[..3] {
                    assert!(
                        attempt.reason.contains("truncated stream: missing PNG IEND chunk"),
                        "{}",
                        attempt
                    );
                }
            }
            other => panic!("expected strict rejection, got {:?}", other),
        }
    }

    #[test]
    fn jpeg_without_end_marker_depends_on_tolerance() {
        let dir = TempDir::new().unwrap();
        let jpeg = encoded(&rgb(16, 16), ImageFormat::Jpeg);
        let path = write(&dir, "open.jpg", &jpeg[..jpeg.len() - 2]);

        let acquired = loader().acquire(&path).unwrap();
        assert_eq!(acquired.image.dimensions(), (16, 16));
        assert!(matches!(
            strict().acquire(&path),
            Err(Unusable::DecodeExhausted { .. })
        ));
    }

    #[test]
    fn truncated_png_rows_are_salvaged() {
        let dir = TempDir::new().unwrap();
        let original = noisy(256, 256).into_rgb8();
        let png = encoded(&DynamicImage::ImageRgb8(original.clone()), ImageFormat::Png);
        let path = write(&dir, "partial.png", &png[..png.len() * 2 / 3]);

        let acquired = loader().acquire(&path).unwrap();
        assert!(acquired.recovered());
        assert_eq!(acquired.strategy, Strategy::ByteBuffer);
        assert_eq!(acquired.image.dimensions(), (256, 256));
        assert_eq!(acquired.image.get_pixel(0, 0), original.get_pixel(0, 0));
        assert_eq!(acquired.image.get_pixel(255, 255).0, [0, 0, 0]);

        assert!(strict().acquire(&path).is_err());
    }

    #[test]
    fn short_bmp_is_padded_after_direct_decode_fails() {
        let dir = TempDir::new().unwrap();
        let bmp = encoded(&rgb(16, 16), ImageFormat::Bmp);
        let path = write(&dir, "short.bmp", &bmp[..bmp.len() - 100]);

        let acquired = loader().acquire(&path).unwrap();
        assert!(acquired.recovered());
        assert_eq!(acquired.image.dimensions(), (16, 16));
        assert!(strict().acquire(&path).is_err());
    }

    #[test]
    fn decoder_limits_must_be_non_zero() {
        assert!(DecoderSettings::default().validate().is_ok());
        let flat = DecoderSettings {
            max_dimensions: (0, 10),
            ..DecoderSettings::default()
        };
        assert!(flat.validate().is_err());
        let starved = DecoderSettings {
            max_alloc: 0,
            ..DecoderSettings::default()
        };
        assert!(starved.validate().is_err());
    }

    #[test]
    fn describe_failures_keeps_order() {
        let failures = vec![
            StrategyFailure {
                strategy: Strategy::Direct,
                reason: "bad header".to_string(),
            },
            StrategyFailure {
                strategy: Strategy::Exhaustive,
                reason: "nothing fits".to_string(),
            },
        ];
        assert_eq!(
            describe_failures(&failures),
            "direct decode: bad header | exhaustive-format decode: nothing fits"
        );
    }
}
