//! Normalizes captured or uploaded audio into the 16 kHz mono 16-bit PCM WAV
//! the emotion analysis API accepts, and uploads it.

pub mod audio;
pub mod backend;
pub mod error;
pub mod pipeline;
pub mod settings;

pub use audio::{DecodedAudioBuffer, MonoSampleBuffer, RawAudioBlob, TARGET_SAMPLE_RATE};
pub use error::{ConvertError, DecodeError, EncodeError, ResampleError};
pub use pipeline::{Normalizer, Outcome, PreparedUpload};

/// Convert with default settings, sending the original bytes if conversion fails.
pub fn convert_to_wav16k(blob: RawAudioBlob) -> Result<PreparedUpload, ConvertError> {
    Normalizer::default().prepare(blob)
}
