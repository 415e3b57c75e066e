//! Log setup: stderr output plus a daily rolling session log file.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Returns the platform-appropriate directory for log files.
///
/// | Platform | Directory |
/// |----------|-----------|
/// | Linux | `$XDG_STATE_HOME/acidcam/logs` or `~/.local/state/acidcam/logs` |
/// | macOS | `~/Library/Logs/acidcam` |
/// | Windows | `%LOCALAPPDATA%\acidcam\acidcam\logs` |
pub fn log_dir() -> Option<PathBuf> {
    let base = directories::ProjectDirs::from("", "", "acidcam")?;

    #[cfg(target_os = "linux")]
    {
        Some(
            base.state_dir()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| base.data_local_dir().join("state"))
                .join("logs"),
        )
    }

    #[cfg(target_os = "macos")]
    {
        // data_local_dir is ~/Library/Application Support/acidcam
        let library = base
            .data_local_dir()
            .parent()
            .and_then(|p| p.parent())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| base.data_local_dir().to_path_buf());
        Some(library.join("Logs").join("acidcam"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Some(base.data_local_dir().join("logs"))
    }
}

/// File name prefix of the rolling session log (`acidcam.log.YYYY-MM-DD`).
pub const LOG_FILE_PREFIX: &str = "acidcam.log";

/// Level written to the session log file unless `RUST_LOG` overrides it.
pub const FILE_LOG_LEVEL: &str = "info";

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `stderr_level`. When `to_file` is set and
/// the log directory can be created, events at [`FILE_LOG_LEVEL`] and above
/// are also written to the session log; keep the returned guard alive for the
/// life of the process so buffered lines are flushed.
pub fn init(stderr_level: &str, to_file: bool) -> Option<WorkerGuard> {
    let filter = |level: &str| {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter(stderr_level));

    let file_dir = if to_file {
        log_dir().filter(|dir| std::fs::create_dir_all(dir).is_ok())
    } else {
        None
    };

    match file_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter(FILE_LOG_LEVEL));
            let _ = tracing_subscriber::registry()
                .with(stderr_layer)
                .with(file_layer)
                .try_init();
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::registry().with(stderr_layer).try_init();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_dir_is_app_specific() {
        if let Some(dir) = log_dir() {
            assert!(dir.to_string_lossy().contains("acidcam"));
        }
    }
}
