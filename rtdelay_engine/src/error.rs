//! Source, sink and playback error types

use rtdelay_shared::DelayError;
use thiserror::Error;

/// Errors opening or decoding a PCM source
#[derive(Error, Debug)]
pub enum PcmError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed RIFF/WAVE container
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// Only 16 and 24 bit integer PCM is supported
    #[error("Unsupported PCM format: {0}")]
    UnsupportedFormat(String),
}

pub type PcmResult<T> = Result<T, PcmError>;

/// Errors from an audio sink
#[derive(Error, Debug)]
pub enum SinkError {
    /// No audio output device available
    #[error("No audio output device found")]
    NoDevice,

    /// Failed to query or negotiate a device configuration
    #[error("Failed to get device config: {0}")]
    Config(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// Failed to build the output stream
    #[error("Failed to build audio stream: {0}")]
    Build(String),

    /// Failed to start or pause the output stream
    #[error("Failed to control audio stream: {0}")]
    Play(String),

    /// The sink refused a buffer request
    #[error("Sink rejected {requested} frames ({free} free)")]
    Rejected { requested: usize, free: usize },

    /// Write failure in a file-backed sink
    #[error("Sink output error: {0}")]
    Io(String),
}

pub type SinkResult<T> = Result<T, SinkError>;

impl From<hound::Error> for SinkError {
    fn from(err: hound::Error) -> Self {
        SinkError::Io(err.to_string())
    }
}

/// Errors that end a playback run
#[derive(Error, Debug)]
pub enum PlaybackError {
    /// Hardware failure, fatal for the process
    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Engine(#[from] DelayError),

    #[error(transparent)]
    Pcm(#[from] PcmError),

    /// Engine, source and sink shapes disagree
    #[error("Playback configuration mismatch: {0}")]
    Mismatch(String),
}

impl PlaybackError {
    /// Sink failures have no recovery path mid-stream
    pub fn is_fatal(&self) -> bool {
        matches!(self, PlaybackError::Sink(_))
    }
}
