//! Interactive controls while a run is active: console keys and signals.

use crate::colors;
use acidcam_lib::{KeyAction, ProgramControl};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

/// Key typed on a console line. Keys are read one per line since stdin is
/// line buffered; an empty line carries no key.
pub fn key_from_line(line: &str) -> Option<char> {
    let line = line.trim_end_matches(['\r', '\n']);
    match line.trim() {
        "" if line.is_empty() => None,
        // A line of blanks is a space press.
        "" => Some(' '),
        key => key.chars().next(),
    }
}

fn describe(action: KeyAction) -> Option<&'static str> {
    match action {
        KeyAction::Pause(true) => Some("Paused. Press p to resume."),
        KeyAction::Pause(false) => Some("Resumed."),
        KeyAction::Stop => Some("Stopping..."),
        KeyAction::Break => Some("Aborting..."),
        KeyAction::Snapshot => Some("Snapshot requested."),
        KeyAction::Ignored => None,
    }
}

/// Read keys from stdin and apply them to `control` until stdin closes.
pub fn spawn_key_reader(control: Arc<ProgramControl>, quiet: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Some(key) = key_from_line(&line) else {
                continue;
            };
            let action = control.handle_key(key);
            tracing::debug!("[Console] key {:?} -> {:?}", key, action);
            if let (false, Some(msg)) = (quiet, describe(action)) {
                eprintln!("\n{}", colors::notice(msg));
            }
            if matches!(action, KeyAction::Stop | KeyAction::Break) {
                break;
            }
        }
    })
}

/// First interrupt stops gracefully, a second one breaks immediately.
pub fn spawn_signal_handler(control: Arc<ProgramControl>, quiet: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut signals = match ShutdownSignals::new() {
            Ok(signals) => signals,
            Err(e) => {
                tracing::warn!("[Console] Failed to install signal handlers: {}", e);
                return;
            }
        };

        signals.recv().await;
        control.stop_cv();
        if !quiet {
            eprintln!(
                "\n{}",
                colors::notice("Stopping recording... press Ctrl+C again to abort.")
            );
        }

        signals.recv().await;
        control.break_now();
        if !quiet {
            eprintln!("\n{}", colors::notice("Aborting."));
        }
    })
}

#[cfg(unix)]
struct ShutdownSignals {
    sigint: tokio::signal::unix::Signal,
    sigterm: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = self.sigint.recv() => {}
            _ = self.sigterm.recv() => {}
        }
    }
}

#[cfg(not(unix))]
struct ShutdownSignals;

#[cfg(not(unix))]
impl ShutdownSignals {
    fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_line() {
        assert_eq!(key_from_line("p"), Some('p'));
        assert_eq!(key_from_line("q\r\n"), Some('q'));
        assert_eq!(key_from_line("  s  "), Some('s'));
        assert_eq!(key_from_line(" "), Some(' '));
        assert_eq!(key_from_line(""), None);
        assert_eq!(key_from_line("\n"), None);
    }

    #[test]
    fn test_keys_drive_control() {
        let control = ProgramControl::new();
        assert_eq!(control.handle_key(key_from_line("p").unwrap()), KeyAction::Pause(true));
        assert!(control.is_paused());
        assert_eq!(control.handle_key(key_from_line(" ").unwrap()), KeyAction::Pause(false));
        assert_eq!(control.handle_key(key_from_line("q").unwrap()), KeyAction::Stop);
        assert!(control.stop_requested());
    }

    #[test]
    fn test_describe_ignored_key() {
        assert!(describe(KeyAction::Ignored).is_none());
        assert!(describe(KeyAction::Snapshot).is_some());
    }
}
