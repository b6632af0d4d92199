// pixie-batch/src/cli.rs
use crate::core::ResizeAlgorithm;
use crate::processors::{BuiltinTransform, ResizeTarget, Resizer, Roi};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pixie-batch", version, about = "Resilient batch image processing")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process every image under a directory into a mirrored output subdirectory
    Run {
        /// Input directory
        input: PathBuf,

        /// Name of the output subdirectory created inside the input directory
        #[arg(short = 'o', long, default_value = "output")]
        output_name: String,

        /// Transform applied to each image
        #[arg(short, long, value_enum, default_value_t = TransformKind::Identity)]
        transform: TransformKind,

        /// Region for black-roi, as x,y,width,height
        #[arg(long)]
        roi: Option<Roi>,

        #[command(flatten)]
        resize: ResizeArgs,

        /// JSON file mapping file stems to OCR records used for name prefixes
        #[arg(long)]
        ocr: Option<PathBuf>,

        /// JPEG output quality (1-100)
        #[arg(short, long, default_value_t = 90)]
        quality: u8,

        /// Losslessly optimize PNG output
        #[arg(long)]
        optimize_png: bool,

        /// Reject truncated streams instead of decoding what is there
        #[arg(long)]
        strict: bool,

        /// Truncate process_log.txt instead of appending
        #[arg(long)]
        fresh_log: bool,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Show how a single file would be acquired
    Inspect {
        /// Image file
        input: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ResizeArgs {
    /// Target width for resize (0 follows the height)
    #[arg(long, default_value_t = 0)]
    pub width: u32,

    /// Target height for resize (0 follows the width)
    #[arg(long, default_value_t = 0)]
    pub height: u32,

    /// Resize to this percentage of the source instead of a width/height
    #[arg(long, conflicts_with_all = ["width", "height"])]
    pub scale: Option<f32>,

    /// Stretch to exactly --width x --height instead of fitting inside them
    #[arg(long)]
    pub exact: bool,

    /// Resize filter
    #[arg(short, long, value_enum, default_value_t = Algorithm::Lanczos3)]
    pub algorithm: Algorithm,
}

impl ResizeArgs {
    pub fn target(&self) -> Result<ResizeTarget, String> {
        let (width, height) = (self.width, self.height);
        match self.scale {
            Some(percent) if percent > 0.0 => Ok(ResizeTarget::Percent(percent)),
            Some(percent) => Err(format!("--scale must be positive, got {}", percent)),
            None if width == 0 && height == 0 => {
                Err("resize requires --width and/or --height, or --scale".to_string())
            }
            None if self.exact => Ok(ResizeTarget::Exact { width, height }),
            None => Ok(ResizeTarget::Fit { width, height }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Algorithm {
    Nearest,
    Bilinear,
    Bicubic,
    Lanczos3,
}

impl From<Algorithm> for ResizeAlgorithm {
    fn from(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Nearest => ResizeAlgorithm::Nearest,
            Algorithm::Bilinear => ResizeAlgorithm::Bilinear,
            Algorithm::Bicubic => ResizeAlgorithm::Bicubic,
            Algorithm::Lanczos3 => ResizeAlgorithm::Lanczos3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransformKind {
    Identity,
    Grayscale,
    Invert,
    BlackRoi,
    Resize,
}

impl TransformKind {
    pub fn build(self, roi: Option<Roi>, resize: &ResizeArgs) -> Result<BuiltinTransform, String> {
        match self {
            TransformKind::Identity => Ok(BuiltinTransform::Identity),
            TransformKind::Grayscale => Ok(BuiltinTransform::Grayscale),
            TransformKind::Invert => Ok(BuiltinTransform::Invert),
            TransformKind::BlackRoi => roi
                .map(BuiltinTransform::BlackRoi)
                .ok_or_else(|| "black-roi requires --roi x,y,width,height".to_string()),
            TransformKind::Resize => {
                let target = resize.target()?;
                Ok(BuiltinTransform::Resize(Resizer::new(target, resize.algorithm.into())))
            }
        }
    }
}
