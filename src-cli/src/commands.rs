//! CLI command implementations.

use crate::colors;
use crate::console;
use crate::exit_codes::ExitCode;
use crate::RecordOptions;
use acidcam_lib::capture::list_devices;
use acidcam_lib::config::{self, AppConfig, CONFIG_KEYS};
use acidcam_lib::encoder::ensure_ffmpeg_blocking;
use acidcam_lib::{
    run_program, FrameCounters, OutputType, ProcessorChain, ProgramControl, ProgramOptions,
    RunSummary, StatusReport,
};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Merge command-line options over the saved configuration.
pub fn build_program_options(
    opts: &RecordOptions,
    config: &AppConfig,
) -> Result<ProgramOptions, String> {
    let output_type = match &opts.output_type {
        Some(name) => OutputType::parse(name).ok_or_else(|| {
            format!("Invalid output type '{}'. Valid types: mpeg4 (0), h264 (1)", name)
        })?,
        None => config.output.output_type,
    };

    Ok(ProgramOptions {
        output_type: output_type.index(),
        input_file: opts.input.clone().unwrap_or_default(),
        no_record: opts.no_record,
        rec_audio: opts.audio || config.audio.enabled,
        output_file_name: opts.output.clone().unwrap_or_default(),
        capture_width: to_i32("width", opts.width.unwrap_or(config.capture.width))?,
        capture_height: to_i32("height", opts.height.unwrap_or(config.capture.height))?,
        capture_device: to_i32("device", opts.device.unwrap_or(config.capture.device))?,
        frame_count: to_i32("frames", opts.frames.unwrap_or(0))?,
        pass2_alpha: opts.alpha.unwrap_or(config.effects.pass2_alpha),
        file_path: opts
            .dir
            .clone()
            .or_else(|| config.output.directory.clone())
            .unwrap_or_default(),
    })
}

fn to_i32(name: &str, value: u32) -> Result<i32, String> {
    i32::try_from(value).map_err(|_| format!("--{} is out of range: {}", name, value))
}

/// Capture, process and record until the source ends or the user stops.
pub async fn record(opts: RecordOptions, json: bool, quiet: bool, verbose: bool) -> ExitCode {
    let config = config::load_config();
    let options = match build_program_options(&opts, &config) {
        Ok(options) => options,
        Err(msg) => {
            if !quiet {
                eprintln!("{}", colors::error(&msg));
            }
            return ExitCode::InvalidArguments;
        }
    };

    match tokio::task::spawn_blocking(|| ensure_ffmpeg_blocking(false)).await {
        Ok(Ok(path)) => {
            if verbose && !quiet {
                eprintln!("Using FFmpeg at {}", path.display());
            }
        }
        Ok(Err(e)) => {
            if !quiet {
                eprintln!("{}", colors::error(&e.to_string()));
                eprintln!("Run 'acidcam ffmpeg --download' to fetch a static build.");
            }
            return ExitCode::FfmpegUnavailable;
        }
        Err(e) => {
            if !quiet {
                eprintln!("{}", colors::error(&e.to_string()));
            }
            return ExitCode::GeneralError;
        }
    }

    let control = Arc::new(ProgramControl::new());
    let counters = Arc::new(FrameCounters::new());
    let chain = ProcessorChain::with_pass2(options.pass2_alpha);

    console::spawn_signal_handler(control.clone(), quiet);
    let interactive_input = std::io::IsTerminal::is_terminal(&std::io::stdin());
    if interactive_input && !json {
        console::spawn_key_reader(control.clone(), quiet);
        if !quiet {
            eprintln!(
                "{}",
                colors::dim("Keys (then Enter): p pause, s snapshot, q stop, b abort")
            );
        }
    }

    if let Some(secs) = opts.duration {
        let control = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            tracing::info!("[Record] Duration limit of {}s reached", secs);
            control.stop_cv();
        });
    }

    let show_status = !quiet && !json && colors::is_interactive();
    let start = Instant::now();
    let run = run_program(&options, control.clone(), counters.clone(), chain);
    tokio::pin!(run);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            _ = ticker.tick() => {
                if show_status && control.is_running() {
                    let report = StatusReport::capture(&control, &counters, start.elapsed());
                    print!(
                        "\r{}   ",
                        colors::status_line(report.state.as_str(), &report.to_string())
                    );
                    std::io::stdout().flush().ok();
                }
            }
        }
    };

    if show_status {
        println!();
    }

    match result {
        Ok(summary) => {
            print_summary(&summary, json, quiet);
            ExitCode::Success
        }
        Err(e) => {
            if json {
                println!("{}", json!({ "status": "error", "error": e.to_string() }));
            } else if !quiet {
                eprintln!("{}", colors::error(&e.to_string()));
            }
            ExitCode::from(&e)
        }
    }
}

fn print_summary(summary: &RunSummary, json: bool, quiet: bool) {
    if json {
        match serde_json::to_string_pretty(summary) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("{}", colors::error(&e.to_string())),
        }
        return;
    }
    if quiet {
        return;
    }

    match &summary.output {
        Some(path) => println!(
            "{} {}",
            colors::success("Recording saved:"),
            colors::path(&path.display().to_string())
        ),
        None => println!("{}", colors::success("Done (not recorded).")),
    }
    println!(
        "{} {} in {:.1}s",
        colors::bold("Frames:"),
        summary.frames,
        summary.elapsed.as_secs_f64()
    );
    if summary.dropped_frames > 0 {
        eprintln!(
            "{}",
            colors::warning(&format!(
                "{} frames were dropped because processing fell behind",
                summary.dropped_frames
            ))
        );
    }
    for snapshot in &summary.snapshots {
        println!(
            "{} {}",
            colors::bold("Snapshot:"),
            colors::path(&snapshot.display().to_string())
        );
    }
}

/// List capture devices.
pub fn devices(json: bool, quiet: bool) -> ExitCode {
    let devices = list_devices();

    if json {
        match serde_json::to_string_pretty(&devices) {
            Ok(s) => println!("{}", s),
            Err(e) => {
                eprintln!("{}", colors::error(&e.to_string()));
                return ExitCode::GeneralError;
            }
        }
    } else if devices.is_empty() {
        if !quiet {
            println!("{}", colors::dim("No capture devices found."));
        }
    } else {
        let name_width = devices.iter().map(|d| d.name.len()).max().unwrap_or(4).max(4);

        println!(
            "{}  {}  {}",
            colors::pad_left("INDEX", 5, colors::header),
            colors::pad_left("NAME", name_width, colors::header),
            colors::header("PATH")
        );
        println!("{}  {}  {}", "-".repeat(5), "-".repeat(name_width), "-".repeat(4));

        for device in devices {
            println!(
                "{}  {:<name_width$}  {}",
                colors::pad_left(&device.index.to_string(), 5, colors::number),
                device.name,
                device.path.as_deref().unwrap_or("-")
            );
        }
    }
    ExitCode::Success
}

/// Dotted key/value pairs of a config, in `CONFIG_KEYS` order.
fn config_entries(config: &AppConfig) -> Vec<(&'static str, String)> {
    CONFIG_KEYS
        .iter()
        .map(|&key| {
            let value = match key {
                "output.directory" => config.output.directory.clone().unwrap_or_default(),
                "output.output_type" => {
                    format!("{:?}", config.output.output_type).to_lowercase()
                }
                "capture.device" => config.capture.device.to_string(),
                "capture.width" => config.capture.width.to_string(),
                "capture.height" => config.capture.height.to_string(),
                "effects.pass2_alpha" => config.effects.pass2_alpha.to_string(),
                "audio.enabled" => config.audio.enabled.to_string(),
                _ => String::new(),
            };
            (key, value)
        })
        .collect()
}

/// Print the current configuration.
pub fn config_show(json: bool) -> ExitCode {
    let config = config::load_config();

    if json {
        return match serde_json::to_string_pretty(&config) {
            Ok(s) => {
                println!("{}", s);
                ExitCode::Success
            }
            Err(e) => {
                eprintln!("{}", colors::error(&e.to_string()));
                ExitCode::GeneralError
            }
        };
    }

    let key_width = CONFIG_KEYS.iter().map(|k| k.len()).max().unwrap_or(3);
    for (key, value) in config_entries(&config) {
        let value = if value.is_empty() {
            colors::dim("(default)")
        } else {
            value
        };
        println!("{}  {}", colors::pad_left(key, key_width, colors::bold), value);
    }
    ExitCode::Success
}

/// Print the config file location.
pub fn config_path(json: bool) -> ExitCode {
    match config::get_config_path() {
        Ok(path) => {
            if json {
                println!("{}", json!({ "path": path }));
            } else {
                println!("{}", path.display());
            }
            ExitCode::Success
        }
        Err(e) => {
            eprintln!("{}", colors::error(&e.to_string()));
            ExitCode::GeneralError
        }
    }
}

/// Update one config value and save.
pub fn config_set(key: &str, value: &str, json: bool, quiet: bool) -> ExitCode {
    let mut config = config::load_config();

    if let Err(e) = config.set_value(key, value) {
        if !quiet {
            eprintln!("{}", colors::error(&e.to_string()));
            eprintln!("Valid keys: {}", CONFIG_KEYS.join(", "));
        }
        return ExitCode::InvalidArguments;
    }

    if key == "output.directory" && !value.is_empty() {
        if let Err(e) = config::validate_directory(std::path::Path::new(value)) {
            if !quiet {
                eprintln!("{}", colors::error(&e.to_string()));
            }
            return ExitCode::InvalidArguments;
        }
    }

    match config::save_config(&config) {
        Ok(path) => {
            if json {
                println!(
                    "{}",
                    json!({ "status": "saved", "key": key, "value": value, "path": path })
                );
            } else if !quiet {
                println!("{} {} = {}", colors::success("Saved"), key, value);
            }
            ExitCode::Success
        }
        Err(e) => {
            if !quiet {
                eprintln!("{}", colors::error(&e.to_string()));
            }
            ExitCode::GeneralError
        }
    }
}

/// Check for FFmpeg, optionally downloading it.
pub async fn ffmpeg(download: bool, json: bool, quiet: bool) -> ExitCode {
    match tokio::task::spawn_blocking(move || ensure_ffmpeg_blocking(download)).await {
        Ok(Ok(path)) => {
            if json {
                println!("{}", json!({ "status": "available", "path": path }));
            } else if !quiet {
                println!(
                    "{} {}",
                    colors::success("FFmpeg available:"),
                    colors::path(&path.display().to_string())
                );
            }
            ExitCode::Success
        }
        Ok(Err(e)) => {
            if json {
                println!("{}", json!({ "status": "unavailable", "error": e.to_string() }));
            } else if !quiet {
                eprintln!("{}", colors::error(&e.to_string()));
                if !download {
                    eprintln!("Run 'acidcam ffmpeg --download' to fetch a static build.");
                }
            }
            ExitCode::FfmpegUnavailable
        }
        Err(e) => {
            if !quiet {
                eprintln!("{}", colors::error(&e.to_string()));
            }
            ExitCode::GeneralError
        }
    }
}

/// Show version information.
pub fn version(json: bool) {
    let version = env!("CARGO_PKG_VERSION");
    if json {
        println!("{}", json!({ "version": version }));
    } else {
        println!("{} {}", colors::bold("acidcam"), version);
    }
}
