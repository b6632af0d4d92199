// pixie-batch/src/core/mod.rs
pub mod processor;

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::processors::DecoderSettings;
use crate::utils::naming::{output_file_name, SideChannel};

pub use processor::{FileOutcome, ImageProcessor, SkipReason};

/// Name of the run log written inside the output root.
pub const LOG_FILE_NAME: &str = "process_log.txt";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResizeAlgorithm {
    Nearest,
    Bilinear,
    Bicubic,
    Lanczos3,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Subdirectory of the input root that receives the mirrored output tree.
    pub output_dir_name: String,
    pub quality: u8,
    pub optimize_png: bool,
    /// Truncate `process_log.txt` instead of appending to it.
    pub fresh_log: bool,
    pub show_progress: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_dir_name: "output".to_string(),
            quality: 90,
            optimize_png: false,
            fresh_log: false,
            show_progress: false,
        }
    }
}

impl RunConfig {
    pub fn with_output_dir_name(mut self, name: impl Into<String>) -> Self {
        self.output_dir_name = name.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        let mut components = Path::new(&self.output_dir_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => {
                return Err(ImageToolError::SecurityError(format!(
                    "Output directory name must be a single path component: {:?}",
                    self.output_dir_name
                )));
            }
        }

        if self.quality == 0 || self.quality > 100 {
            return Err(ImageToolError::InvalidParameter(
                "Quality must be between 1 and 100".to_string(),
            ));
        }

        DecoderSettings::current().validate()
    }
}

/// An image candidate found under the input root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub relative: PathBuf,
    pub stem: String,
    /// Extension as found on disk, without the dot.
    pub extension: String,
}

impl SourceFile {
    pub fn new(root: &Path, path: &Path) -> Result<Self> {
        let relative = path
            .strip_prefix(root)
            .map_err(|_| {
                ImageToolError::InvalidParameter(format!(
                    "{} is not under {}",
                    path.display(),
                    root.display()
                ))
            })?
            .to_path_buf();

        let stem = relative
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ImageToolError::InvalidParameter(format!("Invalid file name: {}", path.display()))
            })?;
        let extension = relative
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            path: path.to_path_buf(),
            relative,
            stem,
            extension,
        })
    }

    pub fn relative_dir(&self) -> &Path {
        self.relative.parent().unwrap_or_else(|| Path::new(""))
    }

    /// Mirrored destination under `output_root`, with the OCR prefix applied when available.
    pub fn output_path(&self, output_root: &Path, side_channel: Option<&SideChannel>) -> PathBuf {
        output_root
            .join(self.relative_dir())
            .join(output_file_name(&self.stem, &self.extension, side_channel))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub scanned: usize,
    pub processed: usize,
    pub skipped: usize,
}

impl RunCounters {
    /// Percentage of scanned files that were processed; 0.0 when nothing was scanned.
    pub fn success_rate(&self) -> f64 {
        crate::utils::success_rate(self.processed, self.scanned)
    }

    pub fn is_balanced(&self) -> bool {
        self.scanned == self.processed + self.skipped
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    /// Stems of processed files, in walk order.
    pub processed_stems: Vec<String>,
    pub counters: RunCounters,
    pub output_root: PathBuf,
    pub log_path: PathBuf,
    pub skipped: Vec<SkippedFile>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn new(output_root: PathBuf) -> Self {
        let log_path = output_root.join(LOG_FILE_NAME);
        Self {
            processed_stems: Vec::new(),
            counters: RunCounters::default(),
            output_root,
            log_path,
            skipped: Vec::new(),
            cancelled: false,
        }
    }
}

/// Shared flag checked between files; cancelling stops the run after the current file.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Error, Debug)]
pub enum ImageToolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Side channel error: {0}")]
    SideChannel(#[from] serde_json::Error),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Security error: {0}")]
    SecurityError(String),

    #[error("Encode error: {0}")]
    EncodeError(String),
}

pub type Result<T> = std::result::Result<T, ImageToolError>;
