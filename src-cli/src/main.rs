//! Acid Cam command-line interface.
//!
//! Captures from a camera or video file, runs every frame through the effect
//! chain and records the result.

mod colors;
mod commands;
mod console;
mod exit_codes;

use clap::{Parser, Subcommand};
use exit_codes::ExitCode;

/// Acid Cam - live video effects recorder
#[derive(Parser, Debug)]
#[command(name = "acidcam")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture, apply effects and record
    Record(RecordOptions),
    /// List camera devices
    Devices,
    /// Show or change saved settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Check for FFmpeg
    Ffmpeg {
        /// Download a static build if FFmpeg is missing
        #[arg(long)]
        download: bool,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the current settings
    Show,
    /// Print the config file location
    Path,
    /// Set a value, e.g. `effects.pass2_alpha 0.5`
    Set { key: String, value: String },
}

#[derive(Parser, Debug, Clone)]
pub struct RecordOptions {
    /// Video file to read instead of a camera
    #[arg(short, long, conflicts_with = "device")]
    input: Option<String>,

    /// Camera index (use 'acidcam devices' to find)
    #[arg(long)]
    device: Option<u32>,

    /// Output type: mpeg4 (0, .mov) or h264 (1, .mp4)
    #[arg(short = 't', long = "type")]
    output_type: Option<String>,

    /// Process frames without writing a file
    #[arg(long)]
    no_record: bool,

    /// Copy the input file's audio into the recording
    #[arg(long)]
    audio: bool,

    /// Output name without suffix (default: timestamped)
    #[arg(short, long)]
    output: Option<String>,

    /// Output directory (overrides the configured directory)
    #[arg(long)]
    dir: Option<String>,

    /// Capture width in pixels
    #[arg(long, requires = "height")]
    width: Option<u32>,

    /// Capture height in pixels
    #[arg(long, requires = "width")]
    height: Option<u32>,

    /// Stop after this many frames
    #[arg(short = 'n', long)]
    frames: Option<u32>,

    /// Second pass blend factor between 0 and 1
    #[arg(short, long)]
    alpha: Option<f32>,

    /// Auto-stop after duration (seconds)
    #[arg(short, long)]
    duration: Option<u64>,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let log_guard = acidcam_lib::logging::init(level, matches!(cli.command, Commands::Record(_)));

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}", colors::error(&format!("Failed to create Tokio runtime: {}", e)));
            std::process::exit(ExitCode::GeneralError.as_i32());
        }
    };

    let exit_code = runtime.block_on(run(cli));
    drop(log_guard);
    std::process::exit(exit_code.as_i32());
}

async fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Commands::Record(options) => {
            commands::record(options, cli.json, cli.quiet, cli.verbose).await
        }
        Commands::Devices => commands::devices(cli.json, cli.quiet),
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(cli.json),
            ConfigAction::Path => commands::config_path(cli.json),
            ConfigAction::Set { key, value } => {
                commands::config_set(&key, &value, cli.json, cli.quiet)
            }
        },
        Commands::Ffmpeg { download } => commands::ffmpeg(download, cli.json, cli.quiet).await,
        Commands::Version => {
            commands::version(cli.json);
            ExitCode::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_record_defaults() {
        let cli = Cli::try_parse_from(["acidcam", "record"]).unwrap();
        match cli.command {
            Commands::Record(options) => {
                assert!(options.input.is_none());
                assert!(options.device.is_none());
                assert!(!options.no_record);
                assert!(!options.audio);
                assert!(options.duration.is_none());
            }
            _ => panic!("Expected Record command"),
        }
    }

    #[test]
    fn parse_record_file_with_options() {
        let cli = Cli::try_parse_from([
            "acidcam", "record", "-i", "clip.mov", "--type", "h264", "--audio", "-o", "out",
            "-n", "300", "-a", "0.5", "-d", "10",
        ])
        .unwrap();
        match cli.command {
            Commands::Record(options) => {
                assert_eq!(options.input.as_deref(), Some("clip.mov"));
                assert_eq!(options.output_type.as_deref(), Some("h264"));
                assert!(options.audio);
                assert_eq!(options.output.as_deref(), Some("out"));
                assert_eq!(options.frames, Some(300));
                assert_eq!(options.alpha, Some(0.5));
                assert_eq!(options.duration, Some(10));
            }
            _ => panic!("Expected Record command"),
        }
    }

    #[test]
    fn parse_record_input_conflicts_with_device() {
        let result = Cli::try_parse_from(["acidcam", "record", "-i", "a.mov", "--device", "1"]);
        assert!(result.is_err());
    }

    #[test]
    fn parse_record_width_requires_height() {
        assert!(Cli::try_parse_from(["acidcam", "record", "--width", "640"]).is_err());
        assert!(
            Cli::try_parse_from(["acidcam", "record", "--width", "640", "--height", "480"]).is_ok()
        );
    }

    #[test]
    fn parse_devices_with_json() {
        let cli = Cli::try_parse_from(["acidcam", "--json", "devices"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Devices));
    }

    #[test]
    fn parse_config_set() {
        let cli =
            Cli::try_parse_from(["acidcam", "config", "set", "capture.device", "1"]).unwrap();
        match cli.command {
            Commands::Config {
                action: ConfigAction::Set { key, value },
            } => {
                assert_eq!(key, "capture.device");
                assert_eq!(value, "1");
            }
            _ => panic!("Expected Config Set command"),
        }
    }

    #[test]
    fn parse_ffmpeg_download() {
        let cli = Cli::try_parse_from(["acidcam", "ffmpeg", "--download"]).unwrap();
        assert!(matches!(cli.command, Commands::Ffmpeg { download: true }));
    }

    #[test]
    fn parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["acidcam", "devices", "--json", "-q"]).unwrap();
        assert!(cli.json);
        assert!(cli.quiet);
    }

    #[test]
    fn parse_invalid_command() {
        assert!(Cli::try_parse_from(["acidcam", "invalid"]).is_err());
    }
}
