// pixie-batch/src/processors/mod.rs
mod batch;
mod compressor;
mod loader;
mod resizer;
mod run_log;
mod transform;
mod truncation;

pub use batch::{run, BatchProcessor};
pub use compressor::Compressor;
pub use loader::{
    describe_failures, Acquired, DecoderSettings, Loader, Strategy, StrategyFailure, Unusable,
};
pub use resizer::{ResizeTarget, Resizer};
pub use run_log::{summary_block, RunLog, Status};
pub use transform::{BuiltinTransform, Roi, Transform};

