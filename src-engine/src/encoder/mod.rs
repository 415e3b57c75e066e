//! Video writing through FFmpeg via ffmpeg-sidecar.
//!
//! Processed frames are piped to FFmpeg as raw RGB24 on stdin. The system
//! FFmpeg from PATH is preferred; otherwise the binary next to the executable
//! (where `ffmpeg_sidecar::download` places it) is used.

use crate::capture::types::{Frame, BYTES_PER_PIXEL};
use chrono::Local;
use ffmpeg_sidecar::command::FfmpegCommand;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Error type for encoding operations.
#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("Invalid dimensions: {0}x{1}")]
    InvalidDimensions(u32, u32),
    #[error("Invalid frame rate: {0}")]
    InvalidFrameRate(f64),
    #[error("Unknown output type: {0}")]
    UnknownOutputType(i32),
    #[error("Encoder not started")]
    NotStarted,
    #[error("Failed to start FFmpeg: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Failed to write frame: {0}")]
    Write(#[source] std::io::Error),
    #[error("FFmpeg failed: {0}")]
    Ffmpeg(String),
    #[error("FFmpeg unavailable: {0}")]
    Unavailable(String),
}

/// Resolve the path to the FFmpeg binary.
pub fn resolve_ffmpeg_path() -> PathBuf {
    which::which("ffmpeg").unwrap_or_else(|_| ffmpeg_sidecar::paths::ffmpeg_path())
}

/// Create a new FfmpegCommand using the resolved FFmpeg path.
pub(crate) fn new_ffmpeg_command() -> FfmpegCommand {
    ffmpeg_command_at(&resolve_ffmpeg_path())
}

pub(crate) fn ffmpeg_command_at(ffmpeg_path: &Path) -> FfmpegCommand {
    let mut command = FfmpegCommand::new_with_path(ffmpeg_path);
    command.hide_banner();
    command
}

/// Output codec/container selection (the numeric `outputType` argument).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    /// MPEG-4 Part 2 in a QuickTime container
    #[default]
    Mpeg4,
    /// H.264 in an MP4 container
    H264,
}

impl OutputType {
    /// Map the numeric output type. `0` is MPEG-4, `1` is H.264.
    pub fn from_index(index: i32) -> Result<Self, EncoderError> {
        match index {
            0 => Ok(OutputType::Mpeg4),
            1 => Ok(OutputType::H264),
            other => Err(EncoderError::UnknownOutputType(other)),
        }
    }

    pub fn index(self) -> i32 {
        match self {
            OutputType::Mpeg4 => 0,
            OutputType::H264 => 1,
        }
    }

    /// Parse from a name or numeric string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "0" | "mpeg4" | "mp4v" | "mov" => Some(OutputType::Mpeg4),
            "1" | "h264" | "avc" | "avc1" | "mp4" => Some(OutputType::H264),
            _ => None,
        }
    }

    /// Suffix appended to the output name.
    pub fn suffix(self) -> &'static str {
        match self {
            OutputType::Mpeg4 => ".mov",
            OutputType::H264 => ".mp4",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            OutputType::Mpeg4 => "MPEG-4 (.mov)",
            OutputType::H264 => "H.264 (.mp4)",
        }
    }
}

/// Detect the best available H.264 encoder.
/// Returns the encoder name to use with FFmpeg.
fn detect_h264_encoder() -> &'static str {
    let output = Command::new(resolve_ffmpeg_path())
        .args(["-encoders", "-hide_banner"])
        .output();

    let encoders_output = match output {
        Ok(o) => String::from_utf8_lossy(&o.stdout).to_string(),
        Err(e) => {
            warn!("[Encoder] Failed to run ffmpeg -encoders: {}", e);
            String::new()
        }
    };

    pick_h264_encoder(&encoders_output).unwrap_or_else(|| {
        warn!(
            "[Encoder] No H.264 encoder detected (found: {}), trying libx264",
            encoders_output
                .lines()
                .filter(|l| l.contains("264"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        "libx264"
    })
}

/// Pick an H.264 encoder from `ffmpeg -encoders` output.
fn pick_h264_encoder(encoders_output: &str) -> Option<&'static str> {
    // libx264 first for quality/compatibility; distro builds without it
    // usually still ship OpenH264 or a hardware encoder. Only encoders that
    // accept system-memory yuv420p input are listed: VAAPI, QSV and Vulkan
    // need an hwupload filter chain.
    const PREFERENCES: [&str; 5] = [
        "libx264",
        "libopenh264",
        "h264_nvenc",
        "h264_amf",
        "h264_v4l2m2m",
    ];

    PREFERENCES.into_iter().find(|name| {
        encoders_output
            .lines()
            .any(|line| line.split_whitespace().nth(1) == Some(*name))
    })
}

/// Build the FFmpeg arguments for writing raw RGB24 frames from stdin.
pub fn build_encoder_args(
    width: u32,
    height: u32,
    fps: f64,
    output_type: OutputType,
    video_encoder: &str,
    output_path: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = [
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgb24",
        "-s",
        &format!("{}x{}", width, height),
        "-r",
        &format!("{}", fps),
        "-i",
        "-",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    match output_type {
        OutputType::Mpeg4 => {
            push(&["-c:v", "mpeg4", "-vtag", "mp4v", "-q:v", "3"]);
        }
        OutputType::H264 => {
            push(&["-c:v", video_encoder]);
            match video_encoder {
                "libx264" => push(&["-preset", "ultrafast", "-crf", "23"]),
                "libopenh264" => push(&["-b:v", "4M"]),
                "h264_nvenc" | "h264_amf" => push(&["-preset", "p1", "-rc", "vbr", "-cq", "23"]),
                _ => {}
            }
            push(&["-movflags", "+faststart"]);
        }
    }

    push(&["-pix_fmt", "yuv420p", "-y"]);
    args.push(output_path.to_string_lossy().into_owned());
    args
}

/// Write the top-left `width`x`height` region of `frame` as packed RGB24.
///
/// Frames can be one pixel larger than the writer after even rounding.
/// Returns `false` without writing when the frame is smaller than the region.
fn write_cropped(
    out: &mut impl Write,
    frame: &Frame,
    width: u32,
    height: u32,
) -> std::io::Result<bool> {
    if frame.width < width || frame.height < height {
        warn!(
            "[Encoder] Skipping frame: {}x{} smaller than writer {}x{}",
            frame.width, frame.height, width, height
        );
        return Ok(false);
    }

    if frame.width == width && frame.height == height {
        out.write_all(&frame.data)?;
    } else {
        let dst_row_bytes = width as usize * BYTES_PER_PIXEL;
        for row in frame.data.chunks_exact(frame.stride()).take(height as usize) {
            out.write_all(&row[..dst_row_bytes])?;
        }
    }
    Ok(true)
}

/// Writer that receives processed frames and encodes them to a file.
pub struct VideoWriter {
    stdin: Option<ChildStdin>,
    child: Option<Child>,
    output_path: PathBuf,
    output_type: OutputType,
    width: u32,
    height: u32,
    fps: f64,
    frames_written: u64,
    last_stderr: Arc<Mutex<Option<String>>>,
    stderr_drain: Option<JoinHandle<()>>,
}

impl VideoWriter {
    /// Create a writer for frames of the given size.
    /// Dimensions are rounded down to even numbers for codec compatibility.
    pub fn new(
        width: u32,
        height: u32,
        fps: f64,
        output_type: OutputType,
        output_path: PathBuf,
    ) -> Result<Self, EncoderError> {
        let width = width & !1;
        let height = height & !1;

        if width == 0 || height == 0 {
            return Err(EncoderError::InvalidDimensions(width, height));
        }
        if !fps.is_finite() || fps <= 0.0 {
            return Err(EncoderError::InvalidFrameRate(fps));
        }

        Ok(Self {
            stdin: None,
            child: None,
            output_path,
            output_type,
            width,
            height,
            fps,
            frames_written: 0,
            last_stderr: Arc::new(Mutex::new(None)),
            stderr_drain: None,
        })
    }

    /// Start the FFmpeg encoding process.
    pub fn start(&mut self) -> Result<(), EncoderError> {
        let encoder = match self.output_type {
            OutputType::H264 => detect_h264_encoder(),
            OutputType::Mpeg4 => "mpeg4",
        };
        info!(
            "[Encoder] Writing {}x{} @ {:.2}fps with {} to {}",
            self.width,
            self.height,
            self.fps,
            encoder,
            self.output_path.display()
        );

        let mut command = new_ffmpeg_command();
        command.args(build_encoder_args(
            self.width,
            self.height,
            self.fps,
            self.output_type,
            encoder,
            &self.output_path,
        ));

        let inner_command = command.as_inner_mut();
        inner_command.stdin(Stdio::piped());
        inner_command.stdout(Stdio::null());
        inner_command.stderr(Stdio::piped());

        let mut child = inner_command.spawn().map_err(EncoderError::Spawn)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncoderError::Ffmpeg("stdin unavailable".into()))?;

        if let Some(stderr) = child.stderr.take() {
            let last_stderr = self.last_stderr.clone();
            self.stderr_drain = Some(std::thread::spawn(move || {
                let reader = BufReader::new(stderr);
                for line in reader.lines().map_while(Result::ok) {
                    debug!("[FFmpeg] {}", line);
                    if let Ok(mut last) = last_stderr.lock() {
                        *last = Some(line);
                    }
                }
            }));
        }

        self.stdin = Some(stdin);
        self.child = Some(child);
        Ok(())
    }

    /// Write a frame to the encoder.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), EncoderError> {
        let stdin = self.stdin.as_mut().ok_or(EncoderError::NotStarted)?;
        if write_cropped(stdin, frame, self.width, self.height).map_err(EncoderError::Write)? {
            self.frames_written += 1;
        }
        Ok(())
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Size of the frames actually encoded.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Close the input and wait for FFmpeg to finish the file.
    pub fn finish(mut self) -> Result<PathBuf, EncoderError> {
        drop(self.stdin.take());

        let mut child = self.child.take().ok_or(EncoderError::NotStarted)?;
        let status = child
            .wait()
            .map_err(|e| EncoderError::Ffmpeg(format!("process error: {}", e)))?;
        // FFmpeg has exited, so the drain ends at EOF; join it so the last
        // stderr line is recorded before it is read.
        if let Some(drain) = self.stderr_drain.take() {
            let _ = drain.join();
        }

        if !status.success() {
            let last = self.last_stderr.lock().ok().and_then(|l| l.clone());
            return Err(EncoderError::Ffmpeg(last.unwrap_or_else(|| {
                format!("exit code {:?}", status.code())
            })));
        }

        info!(
            "[Encoder] Finished {} ({} frames)",
            self.output_path.display(),
            self.frames_written
        );
        Ok(self.output_path.clone())
    }
}

impl Drop for VideoWriter {
    fn drop(&mut self) {
        // Abandoned without finish(): let FFmpeg see EOF and reap it.
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.wait();
        }
    }
}

/// Copy the audio track of `source_path` into the recorded video.
///
/// The video stream is copied as-is and audio is encoded to AAC. The recorded
/// file is replaced in place.
pub fn mux_source_audio(video_path: &Path, source_path: &Path) -> Result<PathBuf, EncoderError> {
    let extension = video_path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mov".into());
    let temp_path = video_path.with_extension(format!("mux.{}", extension));

    info!(
        "[Mux] Adding audio from {} to {}",
        source_path.display(),
        video_path.display()
    );

    let mut command = new_ffmpeg_command();
    command
        .args(["-i", video_path.to_string_lossy().as_ref()])
        .args(["-i", source_path.to_string_lossy().as_ref()])
        .args(["-map", "0:v:0", "-map", "1:a:0?"])
        .args(["-c:v", "copy", "-c:a", "aac", "-b:a", "192k"])
        .args(["-shortest", "-y"])
        .arg(temp_path.to_string_lossy().to_string());

    let output = command
        .as_inner_mut()
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(EncoderError::Spawn)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let _ = std::fs::remove_file(&temp_path);
        return Err(EncoderError::Ffmpeg(format!(
            "muxing failed: {}",
            stderr.lines().last().unwrap_or("unknown error")
        )));
    }

    std::fs::rename(&temp_path, video_path)
        .map_err(|e| EncoderError::Ffmpeg(format!("replacing muxed file: {}", e)))?;

    info!("[Mux] Audio added");
    Ok(video_path.to_path_buf())
}

/// Timestamped output name used when none is given.
pub fn generate_output_name() -> String {
    format!("acidcam_{}", Local::now().format("%Y-%m-%d_%H%M%S"))
}

/// Ensure FFmpeg is available, downloading it next to the executable when it
/// is missing and `download` is set.
pub fn ensure_ffmpeg_blocking(download: bool) -> Result<PathBuf, EncoderError> {
    let ffmpeg = resolve_ffmpeg_path();
    debug!("[FFmpeg] Resolved path: {}", ffmpeg.display());

    match Command::new(&ffmpeg)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => Ok(ffmpeg),
        Ok(status) => Err(EncoderError::Unavailable(format!(
            "{} exited with status: {}",
            ffmpeg.display(),
            status
        ))),
        Err(e) if download => {
            info!("[FFmpeg] Not found at {} ({}), downloading...", ffmpeg.display(), e);
            ffmpeg_sidecar::download::auto_download()
                .map_err(|e| EncoderError::Unavailable(format!("auto-download failed: {}", e)))?;
            Ok(ffmpeg_sidecar::paths::ffmpeg_path())
        }
        Err(e) => Err(EncoderError::Unavailable(format!(
            "{} not found: {}",
            ffmpeg.display(),
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_type_from_index() {
        assert_eq!(OutputType::from_index(0).unwrap(), OutputType::Mpeg4);
        assert_eq!(OutputType::from_index(1).unwrap(), OutputType::H264);
        assert!(matches!(
            OutputType::from_index(7),
            Err(EncoderError::UnknownOutputType(7))
        ));
        assert_eq!(OutputType::H264.index(), 1);
    }

    #[test]
    fn test_output_type_parse() {
        assert_eq!(OutputType::parse("MPEG4"), Some(OutputType::Mpeg4));
        assert_eq!(OutputType::parse("1"), Some(OutputType::H264));
        assert_eq!(OutputType::parse("avc1"), Some(OutputType::H264));
        assert_eq!(OutputType::parse("webm"), None);
    }

    #[test]
    fn test_output_type_suffix() {
        assert_eq!(OutputType::Mpeg4.suffix(), ".mov");
        assert_eq!(OutputType::H264.suffix(), ".mp4");
    }

    #[test]
    fn test_writer_rounds_dimensions() {
        let writer =
            VideoWriter::new(641, 481, 30.0, OutputType::Mpeg4, PathBuf::from("out.mov")).unwrap();
        assert_eq!(writer.dimensions(), (640, 480));
    }

    #[test]
    fn test_writer_rejects_bad_parameters() {
        assert!(matches!(
            VideoWriter::new(1, 480, 30.0, OutputType::Mpeg4, PathBuf::from("x.mov")),
            Err(EncoderError::InvalidDimensions(0, 480))
        ));
        assert!(matches!(
            VideoWriter::new(640, 480, 0.0, OutputType::Mpeg4, PathBuf::from("x.mov")),
            Err(EncoderError::InvalidFrameRate(_))
        ));
    }

    #[test]
    fn test_write_before_start_fails() {
        let mut writer =
            VideoWriter::new(2, 2, 30.0, OutputType::Mpeg4, PathBuf::from("x.mov")).unwrap();
        let frame = Frame::filled(2, 2, [9, 9, 9]);
        assert!(matches!(writer.write_frame(&frame), Err(EncoderError::NotStarted)));
        assert_eq!(writer.frames_written(), 0);
    }

    #[test]
    fn test_mpeg4_args() {
        let args = build_encoder_args(
            640,
            480,
            29.97,
            OutputType::Mpeg4,
            "mpeg4",
            Path::new("/videos/clip.mov"),
        );
        let joined = args.join(" ");
        assert!(joined.starts_with("-f rawvideo -pix_fmt rgb24 -s 640x480 -r 29.97 -i -"));
        assert!(joined.contains("-c:v mpeg4 -vtag mp4v"));
        assert!(!joined.contains("faststart"));
        assert_eq!(args.last().unwrap(), "/videos/clip.mov");
    }

    #[test]
    fn test_h264_args_use_detected_encoder() {
        let args = build_encoder_args(
            1280,
            720,
            30.0,
            OutputType::H264,
            "libopenh264",
            Path::new("clip.mp4"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-c:v libopenh264 -b:v 4M"));
        assert!(joined.contains("-movflags +faststart"));
        assert!(joined.contains("-pix_fmt yuv420p -y"));
    }

    #[test]
    fn test_pick_h264_encoder() {
        let listing = "Encoders:\n V....D h264_vaapi           H.264/AVC (VAAPI)\n \
                       V....D libopenh264           OpenH264 H.264\n";
        assert_eq!(pick_h264_encoder(listing), Some("libopenh264"));
        assert_eq!(pick_h264_encoder(" V....D mpeg4  MPEG-4 part 2\n"), None);
    }

    #[test]
    fn test_pick_h264_encoder_skips_hwupload_encoders() {
        let listing = " V....D h264_vaapi           H.264/AVC (VAAPI)\n \
                       V..... h264_qsv             H.264 (Intel Quick Sync Video)\n \
                       V....D h264_vulkan          H.264/AVC (Vulkan)\n";
        assert_eq!(pick_h264_encoder(listing), None);

        let with_nvenc = format!("{} V....D h264_nvenc           NVIDIA NVENC H.264\n", listing);
        assert_eq!(pick_h264_encoder(&with_nvenc), Some("h264_nvenc"));
    }

    fn numbered_frame(width: u32, height: u32) -> Frame {
        let data = (0..width * height * BYTES_PER_PIXEL as u32)
            .map(|i| (i % 251) as u8)
            .collect();
        Frame::from_rgb(width, height, data).unwrap()
    }

    #[test]
    fn test_write_cropped_trims_odd_edge() {
        let frame = numbered_frame(5, 3);
        let mut out = Vec::new();
        assert!(write_cropped(&mut out, &frame, 4, 2).unwrap());

        assert_eq!(out.len(), 4 * 2 * BYTES_PER_PIXEL);
        let stride = frame.stride();
        assert_eq!(&out[..12], &frame.data[..12]);
        assert_eq!(&out[12..], &frame.data[stride..stride + 12]);
    }

    #[test]
    fn test_write_cropped_passes_exact_frame() {
        let frame = numbered_frame(4, 2);
        let mut out = Vec::new();
        assert!(write_cropped(&mut out, &frame, 4, 2).unwrap());
        assert_eq!(out, frame.data);
    }

    #[test]
    fn test_write_cropped_skips_smaller_frame() {
        let frame = numbered_frame(3, 2);
        let mut out = Vec::new();
        assert!(!write_cropped(&mut out, &frame, 4, 2).unwrap());
        assert!(out.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_finish_reports_last_stderr_line() {
        let mut writer =
            VideoWriter::new(2, 2, 30.0, OutputType::Mpeg4, PathBuf::from("x.mov")).unwrap();
        let mut child = Command::new("sh")
            .args(["-c", "cat >/dev/null; echo first >&2; echo 'bad encoder' >&2; exit 3"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        writer.stdin = child.stdin.take();
        let stderr = child.stderr.take().unwrap();
        writer.child = Some(child);
        let last_stderr = writer.last_stderr.clone();
        writer.stderr_drain = Some(std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                std::thread::sleep(std::time::Duration::from_millis(50));
                *last_stderr.lock().unwrap() = Some(line);
            }
        }));

        match writer.finish() {
            Err(EncoderError::Ffmpeg(message)) => assert_eq!(message, "bad encoder"),
            other => panic!("expected FFmpeg error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_generate_output_name() {
        let name = generate_output_name();
        assert!(name.starts_with("acidcam_"));
        assert_eq!(name.len(), "acidcam_2024-01-01_120000".len());
    }
}
