//! Shared types for capture operations.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Bytes per pixel of a decoded frame (packed RGB24).
pub const BYTES_PER_PIXEL: usize = 3;

/// A decoded video frame with its dimensions and pixel data.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Packed RGB24 pixel data, row-major, no padding
    pub data: Vec<u8>,
}

impl Frame {
    /// Create a frame filled with a single RGB color.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * BYTES_PER_PIXEL);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Wrap raw RGB24 bytes. Returns `None` if the buffer length does not
    /// match the dimensions.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != Self::byte_len(width, height) {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    /// Number of bytes a frame of the given size occupies.
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    /// Bytes in a single row.
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    pub fn same_size(&self, other: &Frame) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// RGB value at (x, y).
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = y as usize * self.stride() + x as usize * BYTES_PER_PIXEL;
        Some([self.data[i], self.data[i + 1], self.data[i + 2]])
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Where frames come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CaptureSource {
    /// A camera device by index
    Device { index: u32 },
    /// A video file
    File { path: PathBuf },
}

impl CaptureSource {
    pub fn is_file(&self) -> bool {
        matches!(self, CaptureSource::File { .. })
    }

    /// Human readable description for logs and the CLI.
    pub fn describe(&self) -> String {
        match self {
            CaptureSource::Device { index } => format!("device #{}", index),
            CaptureSource::File { path } => format!("file {}", path.display()),
        }
    }
}

/// Requested capture size. Zero keeps the source's native size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureRequest {
    pub width: u32,
    pub height: u32,
}

impl CaptureRequest {
    pub fn native() -> Self {
        Self::default()
    }

    /// Whether a specific size was requested.
    pub fn has_size(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Stream properties reported by the decoder before the first frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    /// Frames per second of the decoded output
    pub fps: f64,
    /// Known frame count (file sources only)
    pub total_frames: Option<u64>,
    /// Whether the input carries an audio stream
    pub has_audio: bool,
}

/// A capture device found on this machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Index accepted by `CaptureSource::Device`
    pub index: u32,
    /// Display name for UI
    pub name: String,
    /// Platform path (e.g. `/dev/video0`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Handle to stop an ongoing capture.
pub type StopHandle = Arc<AtomicBool>;

/// Receiver for decoded frames.
pub type FrameReceiver = mpsc::Receiver<Frame>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filled_frame() {
        let frame = Frame::filled(4, 2, [1, 2, 3]);
        assert_eq!(frame.data.len(), 24);
        assert_eq!(frame.pixel(3, 1), Some([1, 2, 3]));
        assert_eq!(frame.pixel(4, 0), None);
    }

    #[test]
    fn test_from_rgb_rejects_wrong_length() {
        assert!(Frame::from_rgb(2, 2, vec![0; 12]).is_some());
        assert!(Frame::from_rgb(2, 2, vec![0; 11]).is_none());
    }

    #[test]
    fn test_capture_request_native() {
        assert!(!CaptureRequest::native().has_size());
        assert!(CaptureRequest { width: 640, height: 480 }.has_size());
        assert!(!CaptureRequest { width: 640, height: 0 }.has_size());
    }

    #[test]
    fn test_source_serialization() {
        let source = CaptureSource::Device { index: 2 };
        let json = serde_json::to_string(&source).unwrap();
        assert_eq!(json, r#"{"kind":"device","index":2}"#);
        let parsed: CaptureSource = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, source);
    }
}
