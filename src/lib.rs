mod cli;
mod core;
mod processors;
mod utils;

pub use crate::cli::{Algorithm, Cli, Commands, ResizeArgs, TransformKind};
pub use crate::core::{
    CancelToken, FileOutcome, ImageProcessor, ImageToolError, ResizeAlgorithm,
    Result, RunConfig, RunCounters, RunReport, SkipReason, SkippedFile, SourceFile, LOG_FILE_NAME,
};
pub use crate::processors::{
    describe_failures, run, summary_block, Acquired, BatchProcessor, BuiltinTransform, Compressor,
    DecoderSettings, Loader, ResizeTarget, Resizer, Roi, RunLog, Status, Strategy, StrategyFailure,
    Transform, Unusable,
};
pub use crate::utils::naming::{
    load_side_channel, ocr_prefix, output_file_name, parse_side_channel, OcrRecord, SideChannel,
};
pub use crate::utils::{
    format_file_size, format_token, image_format_to_string, is_supported_format, success_rate,
    IMAGE_EXTENSIONS,
};

pub mod prelude {
    pub use crate::{
        run, BatchProcessor, BuiltinTransform, DecoderSettings, Loader, RunConfig, RunReport,
        SideChannel, Transform,
    };
}

// Re-export commonly used types
pub use image::RgbImage;
