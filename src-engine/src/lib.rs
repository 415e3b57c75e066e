//! Acid Cam engine: capture frames from a camera or video file, run them
//! through a processor chain and record the result with FFmpeg.

pub mod capture;
pub mod config;
pub mod effects;
pub mod encoder;
pub mod logging;
pub mod program;
pub mod session;

pub use capture::{CaptureError, CaptureRequest, CaptureSource, CaptureStream, Frame};
pub use effects::{proc_frame, FrameProcessor, Pass2Blend, ProcessorChain};
pub use encoder::{EncoderError, OutputType, VideoWriter};
pub use program::{
    program_main, run_program, EndReason, ProgramError, ProgramOptions, RunPlan, RunSummary,
};
pub use session::{bool_str, FrameCounters, KeyAction, ProgramControl, RunState, StatusReport};
