//! Program entry point: capture, process and record until the source ends or
//! the run is stopped.

use crate::capture::{
    CaptureError, CaptureRequest, CaptureSource, CaptureStream, Frame, StreamInfo,
};
use crate::config;
use crate::effects::{proc_frame, ProcessorChain};
use crate::encoder::{self, EncoderError, OutputType, VideoWriter};
use crate::session::{bool_str, format_bytes, FrameCounters, ProgramControl, StatusReport};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// How long the loop waits for a frame before re-checking the control flags.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How often the output size is refreshed and a status line logged.
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("A run is already in progress")]
    AlreadyRunning,
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot failed: {0}")]
    Snapshot(String),
    #[error("Background task failed: {0}")]
    Task(String),
}

impl ProgramError {
    /// Process exit status for this error.
    pub fn exit_status(&self) -> i32 {
        match self {
            ProgramError::InvalidArguments(_) => 2,
            _ => 1,
        }
    }
}

impl From<tokio::task::JoinError> for ProgramError {
    fn from(err: tokio::task::JoinError) -> Self {
        ProgramError::Task(err.to_string())
    }
}

/// Arguments of a run, one field per entry-point parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramOptions {
    /// 0 = MPEG-4 (.mov), 1 = H.264 (.mp4)
    pub output_type: i32,
    /// Video file to read; empty selects the capture device
    pub input_file: String,
    /// Process frames without writing a file
    pub no_record: bool,
    /// Copy the input file's audio into the recording
    pub rec_audio: bool,
    /// Output name without suffix; empty generates a timestamped name
    pub output_file_name: String,
    /// Requested capture width, 0 for the source size
    pub capture_width: i32,
    /// Requested capture height, 0 for the source size
    pub capture_height: i32,
    /// Camera index used when `input_file` is empty
    pub capture_device: i32,
    /// Stop after this many frames, 0 for no limit
    pub frame_count: i32,
    /// Second pass blend factor in `[0, 1]`
    pub pass2_alpha: f32,
    /// Output directory; empty uses the configured directory
    pub file_path: String,
}

impl ProgramOptions {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        output_type: i32,
        input_file: impl Into<String>,
        no_record: bool,
        rec_audio: bool,
        output_file_name: impl Into<String>,
        capture_width: i32,
        capture_height: i32,
        capture_device: i32,
        frame_count: i32,
        pass2_alpha: f32,
        file_path: impl Into<String>,
    ) -> Self {
        Self {
            output_type,
            input_file: input_file.into(),
            no_record,
            rec_audio,
            output_file_name: output_file_name.into(),
            capture_width,
            capture_height,
            capture_device,
            frame_count,
            pass2_alpha,
            file_path: file_path.into(),
        }
    }

    /// Validate the options and resolve the source and output locations.
    pub fn plan(&self) -> Result<RunPlan, ProgramError> {
        let invalid = |msg: String| ProgramError::InvalidArguments(msg);

        let output_type = OutputType::from_index(self.output_type)
            .map_err(|e| invalid(e.to_string()))?;

        let width = non_negative("capture width", self.capture_width)?;
        let height = non_negative("capture height", self.capture_height)?;
        if (width == 0) != (height == 0) {
            return Err(invalid(format!(
                "capture size must set both width and height (got {}x{})",
                width, height
            )));
        }
        let device = non_negative("capture device", self.capture_device)?;
        let frame_count = non_negative("frame count", self.frame_count)?;

        if !self.pass2_alpha.is_finite() || !(0.0..=1.0).contains(&self.pass2_alpha) {
            return Err(invalid(format!(
                "pass2 alpha must be between 0 and 1 (got {})",
                self.pass2_alpha
            )));
        }

        let source = if self.input_file.is_empty() {
            CaptureSource::Device { index: device }
        } else {
            CaptureSource::File {
                path: PathBuf::from(&self.input_file),
            }
        };

        let output_dir = self.resolve_output_dir()?;
        if !self.no_record {
            config::validate_directory(&output_dir).map_err(|e| invalid(e.to_string()))?;
        }

        let base_name = if self.output_file_name.is_empty() {
            encoder::generate_output_name()
        } else {
            self.output_file_name
                .strip_suffix(output_type.suffix())
                .unwrap_or(&self.output_file_name)
                .to_string()
        };
        if base_name.is_empty() {
            return Err(invalid(format!(
                "output name must not be just the {} suffix",
                output_type.suffix()
            )));
        }
        if base_name.contains(['/', '\\']) {
            return Err(invalid(format!(
                "output name must not contain path separators: {}",
                base_name
            )));
        }

        let output_path = (!self.no_record)
            .then(|| output_dir.join(format!("{}{}", base_name, output_type.suffix())));

        if self.rec_audio && !source.is_file() {
            warn!("[Program] Audio can only be copied from a file source; recording video only");
        }

        Ok(RunPlan {
            source,
            request: CaptureRequest { width, height },
            output_type,
            output_dir,
            base_name,
            output_path,
            frame_limit: (frame_count > 0).then_some(frame_count as u64),
            rec_audio: self.rec_audio,
        })
    }

    fn resolve_output_dir(&self) -> Result<PathBuf, ProgramError> {
        if !self.file_path.is_empty() {
            return Ok(PathBuf::from(&self.file_path));
        }
        match config::get_output_dir(&config::load_config()) {
            Ok(dir) => Ok(dir),
            Err(e) if self.no_record => {
                debug!("[Program] No output directory ({}), using current directory", e);
                Ok(PathBuf::from("."))
            }
            Err(e) => Err(ProgramError::InvalidArguments(e.to_string())),
        }
    }
}

fn non_negative(name: &str, value: i32) -> Result<u32, ProgramError> {
    u32::try_from(value).map_err(|_| {
        ProgramError::InvalidArguments(format!("{} must not be negative (got {})", name, value))
    })
}

/// Validated, resolved form of [`ProgramOptions`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub source: CaptureSource,
    pub request: CaptureRequest,
    pub output_type: OutputType,
    /// Directory for the recording and snapshots
    pub output_dir: PathBuf,
    /// Output name without suffix
    pub base_name: String,
    /// Recording path, `None` when not recording
    pub output_path: Option<PathBuf>,
    pub frame_limit: Option<u64>,
    pub rec_audio: bool,
}

impl RunPlan {
    fn snapshot_path(&self, frame_number: u64) -> PathBuf {
        self.output_dir
            .join(format!("{}_snapshot_{:06}.png", self.base_name, frame_number))
    }
}

/// Why the frame loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    SourceEnded,
    FrameLimit,
    Stopped,
    Break,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub frames: u64,
    pub output: Option<PathBuf>,
    pub file_size: u64,
    pub elapsed: Duration,
    pub ended_by: EndReason,
    pub audio_muxed: bool,
    pub dropped_frames: u64,
    pub snapshots: Vec<PathBuf>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames in {:.1}s ({:?})",
            self.frames,
            self.elapsed.as_secs_f64(),
            self.ended_by
        )?;
        if let Some(output) = &self.output {
            write!(f, ", wrote {} ({})", output.display(), format_bytes(self.file_size))?;
        }
        Ok(())
    }
}

/// Run with fresh controls and the default processor chain.
///
/// Returns `0` on success, `2` for invalid arguments and `1` for any other
/// failure.
pub fn program_main(options: ProgramOptions) -> i32 {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("[Program] Failed to create Tokio runtime: {}", e);
            return 1;
        }
    };

    let control = Arc::new(ProgramControl::new());
    let counters = Arc::new(FrameCounters::new());
    let chain = ProcessorChain::with_pass2(options.pass2_alpha);

    match runtime.block_on(run_program(&options, control, counters, chain)) {
        Ok(summary) => {
            info!("[Program] {}", summary);
            0
        }
        Err(e) => {
            error!("[Program] {}", e);
            e.exit_status()
        }
    }
}

/// Validate `options`, open the source and run the frame loop.
///
/// `control` and `counters` may be shared with signal handlers and UI; the
/// controls are reset with `set_enabled_prog` when the run ends, whatever the
/// outcome.
pub async fn run_program(
    options: &ProgramOptions,
    control: Arc<ProgramControl>,
    counters: Arc<FrameCounters>,
    chain: ProcessorChain,
) -> Result<RunSummary, ProgramError> {
    let plan = options.plan()?;
    control.begin_run()?;
    counters.reset();

    info!(
        "[Program] Starting: {}, record={}, audio={}, type={}, alpha={}",
        plan.source.describe(),
        bool_str(plan.output_path.is_some()),
        bool_str(plan.rec_audio),
        plan.output_type.display_name(),
        options.pass2_alpha
    );

    let result = open_and_run(&plan, &control, &counters, chain).await;
    control.set_enabled_prog();
    result
}

async fn open_and_run(
    plan: &RunPlan,
    control: &ProgramControl,
    counters: &FrameCounters,
    chain: ProcessorChain,
) -> Result<RunSummary, ProgramError> {
    let source = plan.source.clone();
    let request = plan.request;
    let stream = tokio::task::spawn_blocking(move || source.open(&request)).await??;
    run_stream(plan, stream, control, counters, chain).await
}

/// Frame loop over an opened stream.
pub async fn run_stream(
    plan: &RunPlan,
    mut stream: CaptureStream,
    control: &ProgramControl,
    counters: &FrameCounters,
    mut chain: ProcessorChain,
) -> Result<RunSummary, ProgramError> {
    let info = stream.info().clone();
    let total = match (info.total_frames, plan.frame_limit) {
        (Some(total), Some(limit)) => total.min(limit),
        (Some(total), None) => total,
        (None, Some(limit)) => limit,
        (None, None) => 0,
    };
    counters.set_total_frames(total);

    let mut writer = match &plan.output_path {
        Some(path) => {
            let mut writer = VideoWriter::new(
                info.width,
                info.height,
                info.fps,
                plan.output_type,
                path.clone(),
            )?;
            writer.start()?;
            Some(writer)
        }
        None => None,
    };

    chain.reset();
    let start = Instant::now();
    let mut last_status = start;
    let mut snapshots = Vec::new();

    let loop_result: Result<EndReason, ProgramError> = async {
        loop {
            if control.break_requested() {
                break Ok(EndReason::Break);
            }
            if control.stop_requested() {
                break Ok(EndReason::Stopped);
            }

            if last_status.elapsed() >= STATUS_INTERVAL {
                last_status = Instant::now();
                if let Some(path) = &plan.output_path {
                    counters.set_file_size(file_size(path));
                }
                log_status(control, counters, start.elapsed());
            }

            if control.is_paused() {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }

            let mut frame = match tokio::time::timeout(POLL_INTERVAL, stream.recv()).await {
                Ok(Some(frame)) => frame,
                Ok(None) => break Ok(EndReason::SourceEnded),
                Err(_) => continue,
            };

            proc_frame(&mut chain, &mut frame);
            if let Some(writer) = writer.as_mut() {
                if let Err(e) = writer.write_frame(&frame) {
                    break Err(ProgramError::from(e));
                }
            }
            let n = counters.increment_frame();

            if control.take_snapshot_request() {
                let path = plan.snapshot_path(n);
                match save_snapshot(&frame, &path) {
                    Ok(()) => {
                        info!("[Program] Snapshot saved to {}", path.display());
                        snapshots.push(path);
                    }
                    Err(e) => warn!("[Program] {}", e),
                }
            }

            if plan.frame_limit.is_some_and(|limit| n >= limit) {
                break Ok(EndReason::FrameLimit);
            }
        }
    }
    .await;

    let dropped_frames = stream.dropped_frames();
    let closing = tokio::task::spawn_blocking(move || stream.close());

    let finish_result = match writer {
        Some(writer) => Some(tokio::task::spawn_blocking(move || writer.finish()).await),
        None => None,
    };
    if closing.await.is_err() {
        warn!("[Program] Capture shutdown task failed");
    }

    let ended_by = loop_result?;
    let output = match finish_result {
        Some(joined) => Some(joined??),
        None => None,
    };

    let mut audio_muxed = false;
    if let (Some(video_path), CaptureSource::File { path: source_path }) = (&output, &plan.source)
    {
        if should_mux(plan, &info, ended_by) {
            let video_path = video_path.clone();
            let source_path = source_path.clone();
            let muxed = tokio::task::spawn_blocking(move || {
                encoder::mux_source_audio(&video_path, &source_path)
            })
            .await?;
            audio_muxed = mux_succeeded(muxed);
        }
    }

    let size = output.as_deref().map(file_size).unwrap_or(0);
    counters.set_file_size(size);

    let summary = RunSummary {
        frames: counters.frame_cnt(),
        output,
        file_size: size,
        elapsed: start.elapsed(),
        ended_by,
        audio_muxed,
        dropped_frames,
        snapshots,
    };
    info!("[Program] Finished: {}", summary);
    Ok(summary)
}

/// Periodic progress line, logged at info so it reaches the session log.
fn log_status(control: &ProgramControl, counters: &FrameCounters, elapsed: Duration) {
    info!("[Program] {}", StatusReport::capture(control, counters, elapsed));
}

/// Whether the source's audio track is copied into the finished recording.
/// A break skips the mux; device sources and silent files have nothing to copy.
fn should_mux(plan: &RunPlan, info: &StreamInfo, ended_by: EndReason) -> bool {
    if !plan.rec_audio || ended_by == EndReason::Break || !plan.source.is_file() {
        return false;
    }
    if !info.has_audio {
        info!("[Program] Source has no audio track, keeping video only");
        return false;
    }
    true
}

/// A failed mux leaves the video-only recording in place.
fn mux_succeeded(result: Result<PathBuf, EncoderError>) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => {
            warn!("[Program] Keeping video without audio: {}", e);
            false
        }
    }
}

/// Save a frame as PNG.
pub fn save_snapshot(frame: &Frame, path: &Path) -> Result<(), ProgramError> {
    let image = image::RgbImage::from_raw(frame.width, frame.height, frame.data.clone())
        .ok_or_else(|| ProgramError::Snapshot("frame buffer does not match its size".into()))?;
    image
        .save(path)
        .map_err(|e| ProgramError::Snapshot(format!("{}: {}", path.display(), e)))
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
