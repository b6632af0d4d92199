// pixie-batch/src/core/processor.rs
use super::{ImageToolError, RunConfig};
use crate::processors::{Compressor, Loader, Strategy, StrategyFailure, Transform, Unusable};
use crate::utils::panic_message;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why a single file was skipped. Never fatal to the run.
#[derive(Error, Debug)]
pub enum SkipReason {
    #[error(transparent)]
    Unusable(#[from] Unusable),

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("unencodable result: {0}")]
    Encode(String),

    #[error("write failed: {0}")]
    Write(String),
}

#[derive(Debug)]
pub enum FileOutcome {
    Processed {
        output: PathBuf,
        strategy: Strategy,
        /// Strategies that failed before `strategy` succeeded.
        recovered_from: Vec<StrategyFailure>,
        bytes_written: u64,
    },
    Skipped(SkipReason),
}

/// Acquire, transform and save one image.
pub struct ImageProcessor {
    loader: Loader,
    compressor: Compressor,
}

impl ImageProcessor {
    pub fn new(config: &RunConfig) -> Self {
        Self::with_loader(config, Loader::new())
    }

    pub fn with_loader(config: &RunConfig, loader: Loader) -> Self {
        Self {
            loader,
            compressor: Compressor::new(config.quality).with_png_optimization(config.optimize_png),
        }
    }

    pub fn process_single(
        &self,
        input_path: &Path,
        output_path: &Path,
        transform: &dyn Transform,
    ) -> FileOutcome {
        let acquired = match self.loader.acquire(input_path) {
            Ok(acquired) => acquired,
            Err(unusable) => return FileOutcome::Skipped(unusable.into()),
        };
        let strategy = acquired.strategy;
        let recovered_from = acquired.failures;

        let transformed = match panic::catch_unwind(AssertUnwindSafe(|| transform.apply(acquired.image))) {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => return FileOutcome::Skipped(SkipReason::Transform(format!("{:#}", e))),
            Err(payload) => {
                return FileOutcome::Skipped(SkipReason::Transform(format!(
                    "{} panicked: {}",
                    transform.name(),
                    panic_message(payload.as_ref())
                )))
            }
        };

        let bytes_written = match self.compressor.save(&transformed, output_path) {
            Ok(bytes) => bytes,
            Err(ImageToolError::Io(e)) => {
                return FileOutcome::Skipped(SkipReason::Write(format!(
                    "{}: {}",
                    output_path.display(),
                    e
                )))
            }
            Err(e) => return FileOutcome::Skipped(SkipReason::Encode(e.to_string())),
        };

        FileOutcome::Processed {
            output: output_path.to_path_buf(),
            strategy,
            recovered_from,
            bytes_written,
        }
    }
}
