//! Exit codes for the CLI.
//!
//! These codes enable scripting integration by providing structured
//! feedback about operation results.

use acidcam_lib::{EncoderError, ProgramError};

/// Exit codes for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Operation completed successfully
    Success = 0,
    /// General/unspecified error
    GeneralError = 1,
    /// Invalid command-line arguments
    InvalidArguments = 2,
    /// FFmpeg could not be found or downloaded
    FfmpegUnavailable = 3,
    /// The source or the writer could not be opened
    CaptureFailedToStart = 4,
    /// Recording failed after frames started flowing
    RecordingFailedDuringCapture = 5,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl From<&ProgramError> for ExitCode {
    fn from(err: &ProgramError) -> Self {
        match err {
            ProgramError::InvalidArguments(_) => ExitCode::InvalidArguments,
            ProgramError::AlreadyRunning => ExitCode::GeneralError,
            ProgramError::Capture(_) => ExitCode::CaptureFailedToStart,
            ProgramError::Encoder(e) => match e {
                EncoderError::Unavailable(_) => ExitCode::FfmpegUnavailable,
                EncoderError::UnknownOutputType(_) => ExitCode::InvalidArguments,
                EncoderError::InvalidDimensions(..)
                | EncoderError::InvalidFrameRate(_)
                | EncoderError::NotStarted
                | EncoderError::Spawn(_) => ExitCode::CaptureFailedToStart,
                EncoderError::Write(_) | EncoderError::Ffmpeg(_) => {
                    ExitCode::RecordingFailedDuringCapture
                }
            },
            ProgramError::Io(_) | ProgramError::Snapshot(_) | ProgramError::Task(_) => {
                ExitCode::RecordingFailedDuringCapture
            }
        }
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitCode::Success => write!(f, "success"),
            ExitCode::GeneralError => write!(f, "general error"),
            ExitCode::InvalidArguments => write!(f, "invalid arguments"),
            ExitCode::FfmpegUnavailable => write!(f, "ffmpeg unavailable"),
            ExitCode::CaptureFailedToStart => write!(f, "capture failed to start"),
            ExitCode::RecordingFailedDuringCapture => write!(f, "recording failed during capture"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acidcam_lib::CaptureError;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ExitCode::Success.as_i32(), 0);
        assert_eq!(ExitCode::InvalidArguments.as_i32(), 2);
        assert_eq!(ExitCode::FfmpegUnavailable.as_i32(), 3);
        assert_eq!(ExitCode::RecordingFailedDuringCapture.as_i32(), 5);
    }

    #[test]
    fn test_program_error_mapping() {
        let cases = [
            (ProgramError::InvalidArguments("x".into()), ExitCode::InvalidArguments),
            (ProgramError::AlreadyRunning, ExitCode::GeneralError),
            (
                ProgramError::Capture(CaptureError::SourceNotFound("in.mov".into())),
                ExitCode::CaptureFailedToStart,
            ),
            (
                ProgramError::Encoder(EncoderError::Unavailable("missing".into())),
                ExitCode::FfmpegUnavailable,
            ),
            (
                ProgramError::Encoder(EncoderError::Ffmpeg("broken pipe".into())),
                ExitCode::RecordingFailedDuringCapture,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ExitCode::from(&err), expected, "{}", err);
        }
    }
}
