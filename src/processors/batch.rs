// pixie-batch/src/processors/batch.rs
use super::loader::describe_failures;
use super::run_log::{RunLog, Status};
use super::transform::Transform;
use super::Unusable;
use crate::core::{
    CancelToken, FileOutcome, ImageProcessor, ImageToolError, Result, RunConfig, RunReport,
    SkipReason, SkippedFile, SourceFile, LOG_FILE_NAME,
};
use crate::utils::is_supported_format;
use crate::utils::naming::SideChannel;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Walks an input tree and processes every candidate image into a mirrored
/// output subtree, one file at a time.
pub struct BatchProcessor {
    config: RunConfig,
    processor: ImageProcessor,
    cancel: CancelToken,
}

impl BatchProcessor {
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        let processor = ImageProcessor::new(&config);
        Ok(Self {
            config,
            processor,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn output_root(&self, input_root: &Path) -> PathBuf {
        input_root.join(&self.config.output_dir_name)
    }

    pub fn run(
        &self,
        input_root: &Path,
        transform: &dyn Transform,
        side_channel: Option<&SideChannel>,
    ) -> Result<RunReport> {
        self.validate_paths(input_root)?;

        let output_root = self.output_root(input_root);
        std::fs::create_dir_all(&output_root)?;
        let mut run_log = RunLog::open(&output_root.join(LOG_FILE_NAME), !self.config.fresh_log)?;

        let (candidates, walk_errors) = self.collect_image_paths(input_root, &output_root);
        for error in walk_errors {
            run_log.record(Status::Warning, format!("Cannot read directory entry: {}", error));
        }
        run_log.record(
            Status::Info,
            format!(
                "Found {} images to process in {} (transform: {})",
                candidates.len(),
                input_root.display(),
                transform.name()
            ),
        );

        let pb = self.create_progress_bar(candidates.len());
        let mut report = RunReport::new(output_root.clone());

        for path in &candidates {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                run_log.record(
                    Status::Warning,
                    format!(
                        "Run cancelled after {} of {} images",
                        report.counters.scanned,
                        candidates.len()
                    ),
                );
                break;
            }

            report.counters.scanned += 1;
            if let Some(name) = path.file_name() {
                pb.set_message(name.to_string_lossy().into_owned());
            }

            let outcome = match SourceFile::new(input_root, path) {
                Ok(source) => {
                    let output_path = source.output_path(&output_root, side_channel);
                    self.process_candidate(&source, &output_path, transform)
                        .map(|outcome| (source.stem, outcome))
                }
                Err(e) => Err(SkipReason::Write(e.to_string())),
            };

            match outcome {
                Ok((stem, FileOutcome::Processed { output, strategy, recovered_from, .. })) => {
                    if !recovered_from.is_empty() {
                        run_log.record(
                            Status::Recovered,
                            format!(
                                "{} decoded via {} after: {}",
                                path.display(),
                                strategy,
                                describe_failures(&recovered_from)
                            ),
                        );
                    }
                    run_log.record(Status::Info, format!("Saved: {}", output.display()));
                    report.processed_stems.push(stem);
                    report.counters.processed += 1;
                }
                Ok((_, FileOutcome::Skipped(reason))) | Err(reason) => {
                    let status = match &reason {
                        SkipReason::Unusable(Unusable::NotAnImage { .. }) => Status::Warning,
                        _ => Status::Error,
                    };
                    run_log.record(status, skip_message(path, &reason));
                    report.skipped.push(SkippedFile {
                        path: path.clone(),
                        reason: reason.to_string(),
                    });
                    report.counters.skipped += 1;
                }
            }

            pb.inc(1);
        }

        pb.finish_and_clear();

        if let Err(e) = run_log.write_summary(&report.counters) {
            log::warn!("Failed to write summary to {}: {}", run_log.path().display(), e);
        }
        if let Err(e) = run_log.finish() {
            log::warn!("Failed to flush run log: {}", e);
        }

        Ok(report)
    }

    fn process_candidate(
        &self,
        source: &SourceFile,
        output_path: &Path,
        transform: &dyn Transform,
    ) -> std::result::Result<FileOutcome, SkipReason> {
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SkipReason::Write(format!("{}: {}", parent.display(), e)))?;
        }

        Ok(self.processor.process_single(&source.path, output_path, transform))
    }

    /// Candidate images under `input_root` in walk order, following symlinks but
    /// never descending into `output_root`, even through a link. Unreadable
    /// entries and broken links are returned as messages.
    pub fn collect_image_paths(
        &self,
        input_root: &Path,
        output_root: &Path,
    ) -> (Vec<PathBuf>, Vec<String>) {
        let mut paths = Vec::new();
        let mut errors = Vec::new();

        let resolved_output = std::fs::canonicalize(output_root).ok();
        let walker = WalkDir::new(input_root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !leads_to(entry, output_root, resolved_output.as_deref()));

        for entry in walker {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() && is_supported_format(entry.path()) {
                        paths.push(entry.into_path());
                    }
                }
                Err(e) => errors.push(e.to_string()),
            }
        }

        (paths, errors)
    }

    fn create_progress_bar(&self, total: usize) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        pb.set_style(style);
        pb
    }

    pub fn validate_paths(&self, input_root: &Path) -> Result<()> {
        if !input_root.exists() {
            return Err(ImageToolError::InvalidParameter(format!(
                "Input directory does not exist: {}",
                input_root.display()
            )));
        }

        if !input_root.is_dir() {
            return Err(ImageToolError::InvalidParameter(format!(
                "Input path is not a directory: {}",
                input_root.display()
            )));
        }

        let output_root = self.output_root(input_root);
        if output_root.exists() && !output_root.is_dir() {
            return Err(ImageToolError::InvalidParameter(format!(
                "Output path exists but is not a directory: {}",
                output_root.display()
            )));
        }

        Ok(())
    }
}

fn leads_to(entry: &DirEntry, output_root: &Path, resolved_output: Option<&Path>) -> bool {
    if entry.path() == output_root {
        return true;
    }
    entry.path_is_symlink()
        && resolved_output.is_some()
        && std::fs::canonicalize(entry.path()).ok().as_deref() == resolved_output
}

fn skip_message(path: &Path, reason: &SkipReason) -> String {
    match reason {
        SkipReason::Unusable(Unusable::NotAnImage { reason }) => {
            format!("Not a valid image: {} ({})", path.display(), reason)
        }
        SkipReason::Unusable(Unusable::DecodeExhausted { attempts }) => format!(
            "Failed to decode {}: {}",
            path.display(),
            describe_failures(attempts)
        ),
        other => format!("Failed: {} - {}", path.display(), other),
    }
}

/// Process `input_root` into `input_root/output_dir_name` with default settings.
pub fn run(
    input_root: &Path,
    transform: &dyn Transform,
    output_dir_name: &str,
    side_channel: Option<&SideChannel>,
) -> Result<RunReport> {
    let config = RunConfig::default().with_output_dir_name(output_dir_name);
    BatchProcessor::new(config)?.run(input_root, transform, side_channel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    #[test]
    fn collection_prunes_output_root_and_filters_extensions() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::create_dir_all(root.join("output/sub")).unwrap();
        for name in ["b.png", "a.JPG", "notes.txt", "sub/c.tif", "output/old.png", "output/sub/d.png"] {
            std::fs::write(root.join(name), b"x").unwrap();
        }

        let batch = BatchProcessor::new(RunConfig::default()).unwrap();
        let (paths, errors) = batch.collect_image_paths(root, &batch.output_root(root));
        assert!(errors.is_empty());
        let relative: Vec<PathBuf> = paths
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            relative,
            vec![
                PathBuf::from("a.JPG"),
                PathBuf::from("b.png"),
                PathBuf::from("sub/c.tif"),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_followed_except_into_the_output_root() {
        use std::os::unix::fs::symlink;

        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("real.png"), b"x").unwrap();
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        symlink(outside.path().join("real.png"), root.join("link.png")).unwrap();
        std::fs::create_dir_all(root.join("output")).unwrap();
        std::fs::write(root.join("output/old.png"), b"x").unwrap();
        symlink(root.join("output"), root.join("mirror")).unwrap();
        symlink(root.join("gone.png"), root.join("dangling.png")).unwrap();

        let batch = BatchProcessor::new(RunConfig::default()).unwrap();
        let (paths, errors) = batch.collect_image_paths(root, &batch.output_root(root));
        assert_eq!(paths, vec![root.join("link.png")]);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn input_must_be_a_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("x.png");
        std::fs::write(&file, b"").unwrap();
        let batch = BatchProcessor::new(RunConfig::default()).unwrap();
        assert!(matches!(
            batch.validate_paths(&file),
            Err(ImageToolError::InvalidParameter(_))
        ));
        assert!(batch.validate_paths(&dir.path().join("missing")).is_err());
        assert!(batch.validate_paths(dir.path()).is_ok());
    }

    #[test]
    fn output_root_occupied_by_a_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("output"), b"").unwrap();
        let batch = BatchProcessor::new(RunConfig::default()).unwrap();
        let identity = |image: RgbImage| -> anyhow::Result<RgbImage> { Ok(image) };
        assert!(batch.run(dir.path(), &identity, None).is_err());
    }

    #[test]
    fn skip_messages_name_the_file() {
        let path = Path::new("in/a.png");
        let not_image = SkipReason::Unusable(Unusable::NotAnImage {
            reason: "file is empty".to_string(),
        });
        assert_eq!(
            skip_message(path, &not_image),
            "Not a valid image: in/a.png (file is empty)"
        );
        let transform = SkipReason::Transform("boom".to_string());
        assert_eq!(
            skip_message(path, &transform),
            "Failed: in/a.png - transform failed: boom"
        );
    }

    #[test]
    fn run_records_a_summary() {
        let dir = TempDir::new().unwrap();
        RgbImage::from_pixel(2, 2, Rgb([9, 9, 9]))
            .save(dir.path().join("one.png"))
            .unwrap();
        let identity = |image: RgbImage| -> anyhow::Result<RgbImage> { Ok(image) };

        let report = run(dir.path(), &identity, "out", None).unwrap();
        assert_eq!(report.processed_stems, vec!["one".to_string()]);
        let log = std::fs::read_to_string(&report.log_path).unwrap();
        assert!(log.contains("Found 1 images to process"));
        assert!(log.contains("Success rate          : 100.0%"));
    }
}
