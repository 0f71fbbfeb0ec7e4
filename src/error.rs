//! Error types for the conversion pipeline.

use thiserror::Error;

/// Failure to turn a blob into per-channel float samples.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unrecognized container: {0}")]
    Probe(String),

    #[error("no decodable audio track found")]
    NoAudioTrack,

    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("stream does not report a sample rate")]
    MissingSampleRate,

    #[error("invalid sample layout: {0}")]
    InvalidLayout(String),

    #[error("decoder panicked: {0}")]
    Panicked(String),

    #[error("decoding cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("invalid sample rates: {rate_in} Hz -> {rate_out} Hz")]
    InvalidRate { rate_in: u32, rate_out: u32 },

    #[error("failed to set up resampler: {0}")]
    Setup(String),

    #[error("resampling failed: {0}")]
    Process(String),

    #[error("resampling cancelled")]
    Cancelled,
}

/// Failure to serialize the WAV container. Unreachable for well-formed input.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("expected {expected} Hz input, got {actual} Hz")]
    WrongSampleRate { expected: u32, actual: u32 },

    #[error("{frames} frames do not fit in a RIFF container")]
    TooLarge { frames: usize },

    #[error("wav writer error: {0}")]
    Wav(#[from] hound::Error),
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Resample(#[from] ResampleError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("conversion cancelled")]
    Cancelled,

    #[error("conversion task failed: {0}")]
    Task(String),
}

impl ConvertError {
    /// Whether this error came from a stage covered by the fallback policy.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ConvertError::Decode(DecodeError::Cancelled)
            | ConvertError::Resample(ResampleError::Cancelled) => false,
            ConvertError::Decode(_) | ConvertError::Resample(_) => true,
            ConvertError::Encode(_) | ConvertError::Cancelled | ConvertError::Task(_) => false,
        }
    }
}
