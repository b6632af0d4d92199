// pixie-batch/src/processors/run_log.rs
use crate::core::{Result, RunCounters};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};

const BANNER_WIDTH: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Info,
    Recovered,
    Warning,
    Error,
}

impl Status {
    pub fn marker(&self) -> &'static str {
        match self {
            Status::Info => "[INFO]",
            Status::Recovered => "[RECOVERED]",
            Status::Warning => "[WARNING]",
            Status::Error => "[ERROR]",
        }
    }

    fn level(&self) -> log::Level {
        match self {
            Status::Info | Status::Recovered => log::Level::Info,
            Status::Warning => log::Level::Warn,
            Status::Error => log::Level::Error,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// Append-only text log of a run. Every line is flushed as it is written, so
/// an interrupted run still leaves a readable file.
pub struct RunLog {
    path: PathBuf,
    writer: LineWriter<File>,
}

impl RunLog {
    pub fn open(path: &Path, append: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: LineWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one event line. A failing write is reported through `log` and
    /// otherwise ignored; it never aborts the run.
    pub fn record(&mut self, status: Status, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::log!(status.level(), "{} {}", status.marker(), message);

        if let Err(e) = writeln!(self.writer, "{} {}", status.marker(), message) {
            log::warn!("Failed to write to {}: {}", self.path.display(), e);
        }
    }

    pub fn write_summary(&mut self, counters: &RunCounters) -> Result<()> {
        let summary = summary_block(counters);
        log::info!("{}", summary.trim_end());
        self.writer.write_all(summary.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

pub fn summary_block(counters: &RunCounters) -> String {
    let banner = "=".repeat(BANNER_WIDTH);
    format!(
        "\n{banner}\nPROCESS SUMMARY\n{banner}\n\
         Total images scanned  : {}\n\
         Successfully processed: {}\n\
         Skipped (errors)      : {}\n\
         Success rate          : {:.1}%\n\
         {banner}\n",
        counters.scanned,
        counters.processed,
        counters.skipped,
        counters.success_rate(),
    )
}
