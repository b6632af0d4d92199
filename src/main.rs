use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::LevelFilter;
use pixie_batch::{
    format_file_size, image_format_to_string, load_side_channel, BatchProcessor, Cli, Commands,
    DecoderSettings, Loader, ResizeArgs, Roi, RunConfig, TransformKind, Unusable,
};
use std::path::PathBuf;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    env_logger::Builder::new()
        .filter_level(if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .init();

    match cli.command {
        Commands::Run {
            input,
            output_name,
            transform,
            roi,
            resize,
            ocr,
            quality,
            optimize_png,
            strict,
            fresh_log,
            no_progress,
        } => {
            DecoderSettings {
                tolerate_truncated: !strict,
                ..DecoderSettings::default()
            }
            .install();

            let config = RunConfig {
                output_dir_name: output_name,
                quality,
                optimize_png,
                fresh_log,
                show_progress: !no_progress,
            };
            process_run(input, config, transform, roi, &resize, ocr)?;
        }
        Commands::Inspect { input } => {
            process_inspect(input)?;
        }
    }

    Ok(())
}

fn process_run(
    input: PathBuf,
    config: RunConfig,
    transform: TransformKind,
    roi: Option<Roi>,
    resize: &ResizeArgs,
    ocr: Option<PathBuf>,
) -> Result<()> {
    let transform = transform
        .build(roi, resize)
        .map_err(|e| anyhow!(e))?;

    let side_channel = ocr
        .map(|path| {
            load_side_channel(&path)
                .with_context(|| format!("Failed to load OCR side channel from {}", path.display()))
        })
        .transpose()?;

    let processor = BatchProcessor::new(config)?;
    let report = processor
        .run(&input, &transform, side_channel.as_ref())
        .with_context(|| format!("Batch run over {} aborted", input.display()))?;

    println!(
        "Batch processing {}. Processed {} of {} images ({:.1}%), skipped {}. Output: {}",
        if report.cancelled { "cancelled" } else { "complete" },
        report.counters.processed,
        report.counters.scanned,
        report.counters.success_rate(),
        report.counters.skipped,
        report.output_root.display()
    );
    println!("Log: {}", report.log_path.display());

    Ok(())
}

fn process_inspect(input: PathBuf) -> Result<()> {
    if !input.is_file() {
        return Err(anyhow!("File does not exist: {}", input.display()));
    }

    let file_size = std::fs::metadata(&input)?.len();
    let loader = Loader::new();

    println!("=== Image Information ===");
    println!("File: {}", input.display());
    println!("Size: {}", format_file_size(file_size));

    match loader.acquire(&input) {
        Ok(acquired) => {
            println!("Signature: {}", image_format_to_string(acquired.sniffed));
            if let Some(format) = acquired.decoded_as {
                println!("Decoded as: {}", image_format_to_string(format));
            }
            println!("Strategy: {}", acquired.strategy);
            println!(
                "Dimensions: {} x {} pixels",
                acquired.image.width(),
                acquired.image.height()
            );
            for failure in &acquired.failures {
                println!("  failed first: {}", failure);
            }
        }
        Err(Unusable::DecodeExhausted { attempts }) => {
            println!("Verdict: unusable, decode exhausted");
            for attempt in &attempts {
                println!("  {}", attempt);
            }
        }
        Err(other) => println!("Verdict: {}", other),
    }

    Ok(())
}
