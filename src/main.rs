//! trapcache command line tool
//!
//! Computes difference images and darkness reports for a folder of
//! camera-trap images.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use trapcache::config::LogLevel;
use trapcache::{
    CacheConfig, CacheError, ConfigError, DifferenceResult, DifferenceState, DiskDecoder,
    FileTable, ImageCache, InMemoryFileTable,
};

#[derive(Parser, Debug)]
#[command(name = "trapcache")]
#[command(about = "Difference images and darkness checks for camera-trap image folders")]
#[command(version)]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log verbosity: error, warn, info, debug or trace
    #[arg(long, global = true, value_parser = parse_log_level)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the difference image of one file as PNG
    Difference {
        /// Folder holding the images
        folder: PathBuf,

        /// Row of the file, in name order
        #[arg(short, long)]
        index: usize,

        #[arg(short, long, value_enum, default_value_t = Mode::Combined)]
        mode: Mode,

        /// Combined difference threshold (overrides the configuration)
        #[arg(short, long)]
        threshold: Option<u8>,

        #[arg(short, long)]
        output: PathBuf,
    },
    /// Classify every image in a folder as dark, light or color
    Darkness {
        /// Folder holding the images
        folder: PathBuf,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Previous,
    Next,
    Combined,
}

impl Mode {
    fn state(self) -> DifferenceState {
        match self {
            Mode::Previous => DifferenceState::Previous,
            Mode::Next => DifferenceState::Next,
            Mode::Combined => DifferenceState::Combined,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write image: {0}")]
    Image(#[from] image::ImageError),

    #[error("Row {row} is out of range, folder has {count} files")]
    RowOutOfRange { row: usize, count: usize },
}

fn parse_log_level(value: &str) -> Result<LogLevel, String> {
    LogLevel::from_name(value).ok_or_else(|| format!("unknown log level '{}'", value))
}

fn load_config(path: Option<&Path>) -> Result<CacheConfig, ConfigError> {
    match path {
        Some(path) => CacheConfig::load_from_path(path),
        None => Ok(CacheConfig::load_from_default_path().unwrap_or_default()),
    }
}

fn open_cache(
    folder: &Path,
    config: &CacheConfig,
) -> Result<ImageCache<InMemoryFileTable, DiskDecoder>, CliError> {
    let table = Arc::new(InMemoryFileTable::from_folder(folder)?);
    Ok(ImageCache::new(table, DiskDecoder::new(), config)?)
}

/// Step the difference view until it shows `target`.
fn cycle_to(cache: &mut ImageCache<InMemoryFileTable, DiskDecoder>, target: DifferenceState) {
    if target == DifferenceState::Combined {
        cache.advance_combined_cycle();
        return;
    }
    for _ in 0..DifferenceState::ALL.len() {
        if cache.advance_previous_next_cycle() == target {
            return;
        }
    }
}

fn run_difference(
    config: &CacheConfig,
    folder: &Path,
    index: usize,
    mode: Mode,
    threshold: Option<u8>,
    output: &Path,
) -> Result<ExitCode, CliError> {
    let mut cache = open_cache(folder, config)?;
    if !cache.move_to_file(index).is_success() {
        return Err(CliError::RowOutOfRange {
            row: index,
            count: cache.table().row_count(),
        });
    }

    cycle_to(&mut cache, mode.state());
    let result = if cache.current_difference_state() != mode.state() {
        match mode {
            Mode::Previous => DifferenceResult::PreviousImageNotAvailable,
            Mode::Next => DifferenceResult::NextImageNotAvailable,
            Mode::Combined => DifferenceResult::CurrentImageNotAvailable,
        }
    } else if let Some(threshold) = threshold.filter(|_| mode == Mode::Combined) {
        cache.compute_combined_difference(threshold)
    } else {
        cache.compute_difference()
    };

    if !result.is_success() {
        eprintln!("{}: {}", mode.state(), result);
        return Ok(ExitCode::FAILURE);
    }

    let Some(image) = cache.current_image() else {
        eprintln!("{}: {}", mode.state(), DifferenceResult::CurrentImageNotAvailable);
        return Ok(ExitCode::FAILURE);
    };
    image.to_rgba_image().save(output)?;
    log::info!("Wrote {} difference to {:?}", mode.state(), output);
    Ok(ExitCode::SUCCESS)
}

fn run_darkness(config: &CacheConfig, folder: &Path) -> Result<ExitCode, CliError> {
    let mut cache = open_cache(folder, config)?;
    for row in 0..cache.table().row_count() {
        if !cache.move_to_file(row).is_success() {
            continue;
        }
        let Some(record) = cache.current().cloned() else {
            continue;
        };

        let line = match cache.classify_current_darkness(&config.darkness) {
            None => "video".to_string(),
            Some(Err(e)) => format!("unsupported ({})", e),
            Some(Ok(_)) if cache.current_image().is_some_and(|i| i.is_placeholder()) => {
                "unreadable".to_string()
            }
            Some(Ok(report)) => {
                let label = if report.is_color {
                    "color"
                } else if report.is_dark {
                    "dark"
                } else {
                    "light"
                };
                format!("{}\t{:.3}", label, report.dark_pixel_fraction)
            }
        };
        println!("{}\t{}", record.file_name(), line);
    }

    cache.wait_for_prefetches();
    let stats = cache.stats();
    log::debug!("{} of {} bitmaps cached at exit", stats.cached, stats.capacity);
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let level = args.log_level.unwrap_or(config.log_level);
    env_logger::Builder::new()
        .filter_level(level.to_level_filter())
        .parse_default_env()
        .init();

    let result = match &args.command {
        Command::Difference {
            folder,
            index,
            mode,
            threshold,
            output,
        } => run_difference(&config, folder, *index, *mode, *threshold, output),
        Command::Darkness { folder } => run_darkness(&config, folder),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
