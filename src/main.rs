// SPDX-License-Identifier: GPL-3.0-only

use cameraview::capture::{CaptureEngine, CaptureSummary, wake_channel};
use cameraview::constants::APP_NAME;
use cameraview::errors::CaptureResult;
use cameraview::terminal::{self, SHORTCUTS};
use cameraview::{Config, MirrorMode};
use clap::Parser;
use std::fs::{self, File, OpenOptions};
use std::process::ExitCode;
use std::sync::Mutex;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "cameraview")]
#[command(about = "Live preview for V4L2 cameras")]
#[command(version)]
#[command(after_help = SHORTCUTS)]
struct Cli {
    /// Use DEVICE [default: /dev/video0]
    #[arg(short = 'd', value_name = "DEVICE")]
    device: Option<String>,

    /// Rotate the image by ANGLE degrees [default: 0]
    #[arg(short = 'r', value_name = "ANGLE", allow_negative_numbers = true)]
    rotation: Option<i32>,

    /// Mirror the image: no, h, v, hv [default: no]
    #[arg(short = 'm', value_name = "FLIP")]
    mirror: Option<MirrorMode>,

    /// Colormap for GREY streams: grayscale, inferno, ironblack [default: grayscale]
    #[arg(short = 'c', value_name = "COLORMAP")]
    colormap: Option<String>,
}

impl Cli {
    /// Command-line values override the config file
    fn apply(self, config: &mut Config) {
        if let Some(device) = self.device {
            config.device = device;
        }
        if let Some(rotation) = self.rotation {
            config.rotation = rotation;
        }
        if let Some(mirror) = self.mirror {
            config.mirror = mirror;
        }
        if let Some(colormap) = self.colormap {
            config.colormap = colormap;
        }
    }
}

/// Log file under the user cache directory, if it can be opened
fn open_log_file() -> Option<File> {
    let dir = dirs::cache_dir()?.join(APP_NAME);
    fs::create_dir_all(&dir).ok()?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(format!("{}.log", APP_NAME)))
        .ok()
}

fn init_logging() {
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=cameraview=debug, RUST_LOG=info
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true);

    // The preview owns the terminal, so logs go to a file when possible
    match open_log_file() {
        Some(file) => builder.with_ansi(false).with_writer(Mutex::new(file)).init(),
        None => builder.with_writer(std::io::stderr).init(),
    }
}

fn run(cli: Cli) -> CaptureResult<CaptureSummary> {
    let mut config = Config::load();
    cli.apply(&mut config);
    let transform = config.transform_state();

    let engine = CaptureEngine::open(&config.device, config.capture_settings())?;
    let (notifier, wakes) = wake_channel();
    let (handle, consumer) = engine.start(notifier)?;
    terminal::run(handle, consumer, wakes, transform)
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(summary) => {
            info!(
                captured = summary.frames_captured,
                delivered = summary.frames_delivered,
                dropped = summary.frames_dropped,
                decode_failures = summary.decode_failures,
                timeouts = summary.timeouts,
                "Preview finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Preview failed");
            eprintln!("{}: {}", APP_NAME, e);
            ExitCode::from(e.exit_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "cameraview", "-d", "/dev/video2", "-r", "-90", "-m", "hv", "-c", "inferno",
        ])
        .unwrap();
        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.device, "/dev/video2");
        assert_eq!(config.rotation, -90);
        assert_eq!(config.mirror, MirrorMode::Both);
        assert_eq!(config.transform_state().rotation(), 270);
        assert_eq!(config.colormap, "inferno");
    }

    #[test]
    fn test_defaults_keep_config() {
        let cli = Cli::try_parse_from(["cameraview"]).unwrap();
        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_mirror_is_a_usage_error() {
        let err = Cli::try_parse_from(["cameraview", "-m", "diagonal"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        assert_ne!(err.exit_code(), 0);
    }

    #[test]
    fn test_help_lists_shortcuts() {
        let help = Cli::command().render_long_help().to_string();
        assert!(help.contains("shift+r -90"));
    }
}
