//! Run-wide control flags and counters.
//!
//! These are shared between the program loop, signal handlers and the
//! console via `Arc`, so every field is an atomic.

use crate::program::ProgramError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

/// Coarse state of a run, derived from the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Not running, ready to start
    Idle,
    /// Capturing and writing frames
    Running,
    /// Running but not pulling frames
    Paused,
    /// A stop or break was requested and the run is finishing
    Stopping,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "recording",
            RunState::Paused => "paused",
            RunState::Stopping => "stopping",
        }
    }
}

/// What a console key did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Pause toggled; carries the new paused state
    Pause(bool),
    Stop,
    Break,
    Snapshot,
    Ignored,
}

/// Start/stop/pause flags for a run.
#[derive(Debug, Default)]
pub struct ProgramControl {
    program_running: AtomicBool,
    stop_program: AtomicBool,
    break_program: AtomicBool,
    is_paused: AtomicBool,
    snapshot_requested: AtomicBool,
    last_key: AtomicU32,
}

impl ProgramControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a run as started. Fails if one is already active.
    pub fn begin_run(&self) -> Result<(), ProgramError> {
        if self
            .program_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ProgramError::AlreadyRunning);
        }
        Ok(())
    }

    /// Request a graceful stop. Also lifts a pause so the loop can see it.
    pub fn stop_cv(&self) {
        info!("[Control] Stop requested");
        self.stop_program.store(true, Ordering::SeqCst);
        self.is_paused.store(false, Ordering::SeqCst);
    }

    /// Request an immediate break: no audio mux, writer is still finalized.
    pub fn break_now(&self) {
        info!("[Control] Break requested");
        self.break_program.store(true, Ordering::SeqCst);
        self.is_paused.store(false, Ordering::SeqCst);
    }

    /// Reset every flag so controls are ready for the next run.
    pub fn set_enabled_prog(&self) {
        self.program_running.store(false, Ordering::SeqCst);
        self.stop_program.store(false, Ordering::SeqCst);
        self.break_program.store(false, Ordering::SeqCst);
        self.is_paused.store(false, Ordering::SeqCst);
        self.snapshot_requested.store(false, Ordering::SeqCst);
        self.last_key.store(0, Ordering::SeqCst);
    }

    pub fn set_paused(&self, paused: bool) {
        self.is_paused.store(paused, Ordering::SeqCst);
    }

    /// Flip the pause flag, returning the new state.
    pub fn toggle_pause(&self) -> bool {
        !self.is_paused.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn request_snapshot(&self) {
        self.snapshot_requested.store(true, Ordering::SeqCst);
    }

    /// Consume a pending snapshot request.
    pub fn take_snapshot_request(&self) -> bool {
        self.snapshot_requested.swap(false, Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.program_running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused.load(Ordering::SeqCst)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_program.load(Ordering::SeqCst)
    }

    pub fn break_requested(&self) -> bool {
        self.break_program.load(Ordering::SeqCst)
    }

    /// Last console key, if any.
    pub fn last_key(&self) -> Option<char> {
        match self.last_key.load(Ordering::SeqCst) {
            0 => None,
            code => char::from_u32(code),
        }
    }

    /// Apply a console key.
    ///
    /// `p` or space toggles pause, `q`/`x` stops, `b` breaks, `s` saves a
    /// snapshot. Keys are case-insensitive.
    pub fn handle_key(&self, key: char) -> KeyAction {
        self.last_key.store(key as u32, Ordering::SeqCst);
        match key.to_ascii_lowercase() {
            'p' | ' ' => KeyAction::Pause(self.toggle_pause()),
            'q' | 'x' => {
                self.stop_cv();
                KeyAction::Stop
            }
            'b' => {
                self.break_now();
                KeyAction::Break
            }
            's' => {
                self.request_snapshot();
                KeyAction::Snapshot
            }
            _ => KeyAction::Ignored,
        }
    }

    pub fn state(&self) -> RunState {
        if !self.is_running() {
            RunState::Idle
        } else if self.stop_requested() || self.break_requested() {
            RunState::Stopping
        } else if self.is_paused() {
            RunState::Paused
        } else {
            RunState::Running
        }
    }
}

/// Frame and output counters for the current run.
#[derive(Debug, Default)]
pub struct FrameCounters {
    frame_cnt: AtomicU64,
    total_frames: AtomicU64,
    file_size: AtomicU64,
}

impl FrameCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.frame_cnt.store(0, Ordering::Relaxed);
        self.total_frames.store(0, Ordering::Relaxed);
        self.file_size.store(0, Ordering::Relaxed);
    }

    /// Count one processed frame, returning the new count.
    pub fn increment_frame(&self) -> u64 {
        self.frame_cnt.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn frame_cnt(&self) -> u64 {
        self.frame_cnt.load(Ordering::Relaxed)
    }

    /// Set the known frame total; 0 means unknown.
    pub fn set_total_frames(&self, total: u64) {
        self.total_frames.store(total, Ordering::Relaxed);
    }

    pub fn total_frames(&self) -> Option<u64> {
        match self.total_frames.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }

    pub fn set_file_size(&self, bytes: u64) {
        self.file_size.store(bytes, Ordering::Relaxed);
    }

    pub fn file_size(&self) -> u64 {
        self.file_size.load(Ordering::Relaxed)
    }

    /// Completion percentage, capped at 100. `None` when the total is unknown.
    pub fn progress_percent(&self) -> Option<f64> {
        let total = self.total_frames()?;
        Some((self.frame_cnt() as f64 / total as f64 * 100.0).min(100.0))
    }
}

/// Point-in-time view of a run, rendered as the one-line status.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: RunState,
    pub frames: u64,
    pub total_frames: Option<u64>,
    pub percent: Option<f64>,
    pub file_size: u64,
    pub elapsed_secs: u64,
}

impl StatusReport {
    pub fn capture(control: &ProgramControl, counters: &FrameCounters, elapsed: Duration) -> Self {
        Self {
            state: control.state(),
            frames: counters.frame_cnt(),
            total_frames: counters.total_frames(),
            percent: counters.progress_percent(),
            file_size: counters.file_size(),
            elapsed_secs: elapsed.as_secs(),
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.total_frames, self.percent) {
            (Some(total), Some(percent)) => {
                write!(f, "frame {}/{} ({:.1}%)", self.frames, total, percent)?
            }
            _ => write!(f, "frame {}", self.frames)?,
        }
        write!(
            f,
            " | {} | {:02}:{:02} | {}",
            format_bytes(self.file_size),
            self.elapsed_secs / 60,
            self.elapsed_secs % 60,
            self.state.as_str()
        )
    }
}

/// `"True"` or `"False"`.
pub fn bool_str(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

/// Human readable byte count (1024 based).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_run_twice_fails() {
        let control = ProgramControl::new();
        control.begin_run().unwrap();
        assert!(matches!(control.begin_run(), Err(ProgramError::AlreadyRunning)));
        control.set_enabled_prog();
        assert!(control.begin_run().is_ok());
    }

    #[test]
    fn test_state_transitions() {
        let control = ProgramControl::new();
        assert_eq!(control.state(), RunState::Idle);
        control.begin_run().unwrap();
        assert_eq!(control.state(), RunState::Running);
        assert!(control.toggle_pause());
        assert_eq!(control.state(), RunState::Paused);
        control.stop_cv();
        assert!(!control.is_paused());
        assert_eq!(control.state(), RunState::Stopping);
        control.set_enabled_prog();
        assert_eq!(control.state(), RunState::Idle);
        assert!(!control.stop_requested());
    }

    #[test]
    fn test_toggle_pause_returns_new_state() {
        let control = ProgramControl::new();
        assert!(control.toggle_pause());
        assert!(!control.toggle_pause());
    }

    #[test]
    fn test_handle_key() {
        let control = ProgramControl::new();
        assert_eq!(control.handle_key('p'), KeyAction::Pause(true));
        assert_eq!(control.handle_key(' '), KeyAction::Pause(false));
        assert_eq!(control.handle_key('z'), KeyAction::Ignored);
        assert_eq!(control.last_key(), Some('z'));
        assert_eq!(control.handle_key('S'), KeyAction::Snapshot);
        assert!(control.take_snapshot_request());
        assert!(!control.take_snapshot_request());
        assert_eq!(control.handle_key('b'), KeyAction::Break);
        assert!(control.break_requested());
        assert_eq!(control.handle_key('q'), KeyAction::Stop);
        assert!(control.stop_requested());
        control.set_enabled_prog();
        assert_eq!(control.last_key(), None);
    }

    #[test]
    fn test_counters_progress() {
        let counters = FrameCounters::new();
        assert_eq!(counters.progress_percent(), None);
        counters.set_total_frames(200);
        for _ in 0..50 {
            counters.increment_frame();
        }
        assert_eq!(counters.progress_percent(), Some(25.0));
        for _ in 0..200 {
            counters.increment_frame();
        }
        assert_eq!(counters.progress_percent(), Some(100.0));
        counters.reset();
        assert_eq!(counters.frame_cnt(), 0);
        assert_eq!(counters.total_frames(), None);
    }

    #[test]
    fn test_status_line() {
        let control = ProgramControl::new();
        control.begin_run().unwrap();
        let counters = FrameCounters::new();
        counters.set_total_frames(300);
        for _ in 0..120 {
            counters.increment_frame();
        }
        counters.set_file_size(1_258_291);
        let report = StatusReport::capture(&control, &counters, Duration::from_secs(64));
        assert_eq!(
            report.to_string(),
            "frame 120/300 (40.0%) | 1.2 MB | 01:04 | recording"
        );
    }

    #[test]
    fn test_status_line_unknown_total() {
        let control = ProgramControl::new();
        let counters = FrameCounters::new();
        counters.increment_frame();
        let report = StatusReport::capture(&control, &counters, Duration::ZERO);
        assert_eq!(report.to_string(), "frame 1 | 0 B | 00:00 | idle");
    }

    #[test]
    fn test_bool_str() {
        assert_eq!(bool_str(true), "True");
        assert_eq!(bool_str(false), "False");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.0 GB");
    }
}
