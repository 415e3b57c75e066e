//! Frame sources: video files and camera devices.

pub mod error;
pub mod source;
pub mod types;

pub use error::CaptureError;
pub use source::{
    build_decoder_args, list_devices, CaptureStream, DEFAULT_FPS, FRAME_CHANNEL_CAPACITY,
};
pub use types::{CaptureRequest, CaptureSource, DeviceInfo, Frame, StopHandle, StreamInfo};
