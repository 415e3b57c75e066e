//! Frame capture from files and camera devices, decoded by FFmpeg.
//!
//! FFmpeg writes raw RGB24 frames to stdout; a dedicated thread parses them
//! with ffmpeg-sidecar and forwards them through a bounded channel.

use super::error::CaptureError;
use super::types::{
    CaptureRequest, CaptureSource, DeviceInfo, Frame, FrameReceiver, StopHandle, StreamInfo,
};
use crate::encoder::{ffmpeg_command_at, resolve_ffmpeg_path};
use ffmpeg_sidecar::child::FfmpegChild;
use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Frames buffered between the decoder thread and the consumer (~1s at 30fps).
pub const FRAME_CHANNEL_CAPACITY: usize = 30;

/// Frame rate assumed when FFmpeg does not report one.
pub const DEFAULT_FPS: f64 = 30.0;

/// How long `open` waits for FFmpeg to report the output stream.
const OPEN_TIMEOUT: Duration = Duration::from_secs(15);

/// An opened capture: stream properties plus the receiving end of the decoder.
pub struct CaptureStream {
    source: CaptureSource,
    info: StreamInfo,
    frame_rx: FrameReceiver,
    stop_handle: StopHandle,
    dropped: Arc<AtomicU64>,
    ffmpeg: Option<Arc<Mutex<FfmpegChild>>>,
    decoder: Option<JoinHandle<()>>,
}

impl CaptureStream {
    /// Wrap an existing frame channel. Used for sources that are not backed
    /// by FFmpeg, such as generated or in-memory frames.
    pub fn from_channel(source: CaptureSource, info: StreamInfo, frame_rx: FrameReceiver) -> Self {
        Self {
            source,
            info,
            frame_rx,
            stop_handle: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
            ffmpeg: None,
            decoder: None,
        }
    }

    pub fn source(&self) -> &CaptureSource {
        &self.source
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Wait for the next frame. `None` once the source has ended or been stopped.
    pub async fn recv(&mut self) -> Option<Frame> {
        if self.stop_handle.load(Ordering::Relaxed) {
            return None;
        }
        self.frame_rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Result<Frame, mpsc::error::TryRecvError> {
        self.frame_rx.try_recv()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }

    /// Frames discarded because the consumer fell behind (device sources only).
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Signal the decoder to stop.
    pub fn stop(&self) {
        self.stop_handle.store(true, Ordering::Relaxed);
    }

    /// Stop the decoder, kill FFmpeg and wait for the decoder thread to exit.
    ///
    /// Killing the process closes its pipes, which ends the decoder even when
    /// FFmpeg has stopped producing output.
    pub fn close(mut self) {
        self.stop();
        // Closing the receiver unblocks a decoder waiting on a full channel.
        self.frame_rx.close();
        if let Some(ffmpeg) = self.ffmpeg.take() {
            kill_ffmpeg(&ffmpeg);
        }
        if let Some(handle) = self.decoder.take() {
            if handle.join().is_err() {
                warn!("[Capture] Decoder thread panicked");
            }
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.stop_handle.store(true, Ordering::Relaxed);
        if let Some(ffmpeg) = self.ffmpeg.take() {
            kill_ffmpeg(&ffmpeg);
        }
    }
}

fn kill_ffmpeg(ffmpeg: &Mutex<FfmpegChild>) {
    match ffmpeg.lock() {
        Ok(mut child) => {
            if let Err(e) = child.kill() {
                debug!("[Capture] FFmpeg already exited: {}", e);
            }
        }
        Err(_) => warn!("[Capture] FFmpeg handle poisoned"),
    }
}

impl CaptureSource {
    /// Open the source and start decoding.
    ///
    /// Blocks until FFmpeg reports the decoded stream (size and frame rate),
    /// so call it from a blocking context.
    pub fn open(&self, request: &CaptureRequest) -> Result<CaptureStream, CaptureError> {
        self.open_with(request, &resolve_ffmpeg_path(), OPEN_TIMEOUT)
    }

    fn open_with(
        &self,
        request: &CaptureRequest,
        ffmpeg_path: &Path,
        open_timeout: Duration,
    ) -> Result<CaptureStream, CaptureError> {
        if let CaptureSource::File { path } = self {
            if !path.is_file() {
                return Err(CaptureError::SourceNotFound(path.display().to_string()));
            }
        }

        let args = build_decoder_args(self, request)?;
        debug!("[Capture] ffmpeg {}", args.join(" "));

        let mut command = ffmpeg_command_at(ffmpeg_path);
        command.args(&args);
        let mut child = command
            .spawn()
            .map_err(|e| CaptureError::PlatformError(format!("Failed to start FFmpeg: {}", e)))?;
        let events = match child.iter() {
            Ok(events) => events,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CaptureError::PlatformError(format!(
                    "Failed to read FFmpeg output: {}",
                    e
                )));
            }
        };
        let ffmpeg = Arc::new(Mutex::new(child));

        let (frame_tx, frame_rx) = mpsc::channel::<Frame>(FRAME_CHANNEL_CAPACITY);
        let (info_tx, info_rx) = std::sync::mpsc::channel::<Result<StreamInfo, CaptureError>>();
        let stop_handle: StopHandle = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));

        let decoder = Decoder {
            frame_tx,
            info_tx: Some(info_tx),
            stop_handle: stop_handle.clone(),
            dropped: dropped.clone(),
            ffmpeg: ffmpeg.clone(),
            // File sources must not lose frames; live devices may.
            is_file: self.is_file(),
        };
        let decoder = std::thread::Builder::new()
            .name("acidcam-decoder".into())
            .spawn(move || decoder.run(events));
        let decoder = match decoder {
            Ok(handle) => handle,
            Err(e) => {
                kill_ffmpeg(&ffmpeg);
                return Err(CaptureError::PlatformError(format!(
                    "Failed to spawn decoder thread: {}",
                    e
                )));
            }
        };

        let info = match info_rx.recv_timeout(open_timeout) {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                let _ = decoder.join();
                return Err(e);
            }
            Err(_) => {
                warn!("[Capture] No stream from FFmpeg after {:?}, killing it", open_timeout);
                stop_handle.store(true, Ordering::Relaxed);
                kill_ffmpeg(&ffmpeg);
                if decoder.join().is_err() {
                    warn!("[Capture] Decoder thread panicked");
                }
                return Err(CaptureError::PlatformError(format!(
                    "Timed out opening {}",
                    self.describe()
                )));
            }
        };

        info!(
            "[Capture] Opened {}: {}x{} @ {:.2}fps{}",
            self.describe(),
            info.width,
            info.height,
            info.fps,
            info.total_frames
                .map(|n| format!(", {} frames", n))
                .unwrap_or_default()
        );

        Ok(CaptureStream {
            source: self.clone(),
            info,
            frame_rx,
            stop_handle,
            dropped,
            ffmpeg: Some(ffmpeg),
            decoder: Some(decoder),
        })
    }
}

type InfoSender = std::sync::mpsc::Sender<Result<StreamInfo, CaptureError>>;

/// Decoder thread state: turns FFmpeg events into frames on the channel.
struct Decoder {
    frame_tx: mpsc::Sender<Frame>,
    info_tx: Option<InfoSender>,
    stop_handle: StopHandle,
    dropped: Arc<AtomicU64>,
    ffmpeg: Arc<Mutex<FfmpegChild>>,
    is_file: bool,
}

impl Decoder {
    fn run(mut self, events: impl Iterator<Item = FfmpegEvent>) {
        let mut probe = StreamProbe::default();
        let mut frames = 0u64;

        for event in events {
            if self.stop_handle.load(Ordering::Relaxed) {
                debug!("[Capture] Stop requested, ending decoder");
                break;
            }
            match event {
                FfmpegEvent::ParsedInputStream(stream) => {
                    if let Some(video) = stream.video_data() {
                        probe.input_fps = Some(video.fps as f64);
                    } else if stream.is_audio() {
                        probe.has_audio = true;
                    }
                }
                FfmpegEvent::ParsedDuration(duration) => {
                    probe.duration = Some(duration.duration);
                }
                FfmpegEvent::ParsedOutputStream(stream) => {
                    if let Some(video) = stream.video_data() {
                        probe.output_fps = Some(video.fps as f64);
                        self.send_info(&probe, video.width, video.height);
                    }
                }
                FfmpegEvent::OutputFrame(output) => {
                    self.send_info(&probe, output.width, output.height);
                    let Some(frame) = Frame::from_rgb(output.width, output.height, output.data)
                    else {
                        warn!("[Capture] Skipping malformed frame {}", output.frame_num);
                        continue;
                    };
                    frames += 1;
                    if !self.forward(frame) {
                        debug!("[Capture] Receiver closed");
                        break;
                    }
                }
                FfmpegEvent::Error(message)
                | FfmpegEvent::Log(LogLevel::Error | LogLevel::Fatal, message) => {
                    debug!("[FFmpeg] {}", message);
                    probe.last_error = Some(message);
                }
                FfmpegEvent::Done => break,
                _ => {}
            }
        }

        if let Some(tx) = self.info_tx.take() {
            let err = match probe.last_error.take() {
                Some(message) => CaptureError::PlatformError(message),
                None => CaptureError::NoFrames,
            };
            let _ = tx.send(Err(err));
        }

        match self.ffmpeg.lock() {
            Ok(mut child) => {
                if let Err(e) = child.kill() {
                    debug!("[Capture] FFmpeg already exited: {}", e);
                }
                let _ = child.wait();
            }
            Err(_) => warn!("[Capture] FFmpeg handle poisoned"),
        }
        info!(
            "[Capture] Decoder finished: {} frames, {} dropped",
            frames,
            self.dropped.load(Ordering::Relaxed)
        );
    }

    /// Report the stream properties once, on the first output stream or frame.
    fn send_info(&mut self, probe: &StreamProbe, width: u32, height: u32) {
        if let Some(tx) = self.info_tx.take() {
            let _ = tx.send(Ok(probe.stream_info(width, height, self.is_file)));
        }
    }

    /// Returns `false` once the receiver is gone.
    fn forward(&self, frame: Frame) -> bool {
        if self.is_file {
            return self.frame_tx.blocking_send(frame).is_ok();
        }
        match self.frame_tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Stream facts collected from FFmpeg's log before the first frame.
#[derive(Default)]
struct StreamProbe {
    input_fps: Option<f64>,
    output_fps: Option<f64>,
    duration: Option<f64>,
    has_audio: bool,
    last_error: Option<String>,
}

impl StreamProbe {
    fn stream_info(&self, width: u32, height: u32, is_file: bool) -> StreamInfo {
        let fps = [self.output_fps, self.input_fps]
            .into_iter()
            .flatten()
            .find(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or(DEFAULT_FPS);
        let total_frames = if is_file {
            self.duration
                .filter(|d| d.is_finite() && *d > 0.0)
                .map(|d| (d * fps).round() as u64)
        } else {
            None
        };
        StreamInfo {
            width,
            height,
            fps,
            total_frames,
            has_audio: self.has_audio,
        }
    }
}

/// Build the FFmpeg argument list that decodes `source` to raw RGB24 on stdout.
pub fn build_decoder_args(
    source: &CaptureSource,
    request: &CaptureRequest,
) -> Result<Vec<String>, CaptureError> {
    let mut args: Vec<String> = Vec::new();
    let size = format!("{}x{}", request.width, request.height);

    match source {
        CaptureSource::File { path } => {
            args.extend(["-i".into(), path.to_string_lossy().into_owned()]);
            if request.has_size() {
                args.extend(["-vf".into(), format!("scale={}:{}", request.width, request.height)]);
            }
        }
        CaptureSource::Device { index } => {
            let (format, input) = device_input(*index)?;
            args.extend(["-f".into(), format.into()]);
            if request.has_size() {
                args.extend(["-video_size".into(), size]);
            }
            if cfg!(target_os = "macos") {
                args.extend(["-framerate".into(), "30".into()]);
            }
            args.extend(["-i".into(), input]);
        }
    }

    args.extend(
        ["-an", "-sn", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"]
            .into_iter()
            .map(String::from),
    );
    Ok(args)
}

/// Platform input format and input name for a camera index.
fn device_input(index: u32) -> Result<(&'static str, String), CaptureError> {
    #[cfg(target_os = "linux")]
    {
        Ok(("v4l2", format!("/dev/video{}", index)))
    }
    #[cfg(target_os = "macos")]
    {
        Ok(("avfoundation", format!("{}:none", index)))
    }
    #[cfg(target_os = "windows")]
    {
        Ok(("vfwcap", index.to_string()))
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        Err(CaptureError::NotImplemented(format!(
            "camera capture (device #{}) on this platform",
            index
        )))
    }
}

/// List capture devices.
///
/// Linux enumerates `/dev/video*`; other platforms return an empty list since
/// their FFmpeg device inputs only report devices through log output.
pub fn list_devices() -> Vec<DeviceInfo> {
    #[cfg(target_os = "linux")]
    {
        let Ok(entries) = std::fs::read_dir("/dev") else {
            return Vec::new();
        };
        let mut devices: Vec<DeviceInfo> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let index = parse_video_node(&name)?;
                let label = std::fs::read_to_string(format!(
                    "/sys/class/video4linux/{}/name",
                    name
                ))
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| name.clone());
                Some(DeviceInfo {
                    index,
                    name: label,
                    path: Some(entry.path().display().to_string()),
                })
            })
            .collect();
        devices.sort_by_key(|d| d.index);
        devices
    }
    #[cfg(not(target_os = "linux"))]
    {
        Vec::new()
    }
}

/// Parse `videoN` into `N`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_video_node(name: &str) -> Option<u32> {
    name.strip_prefix("video")?.parse().ok()
}
