pub mod decoder;
pub mod mixer;
#[cfg(feature = "opus-codec")]
mod opus_packets;
pub mod resampler;
pub mod wav;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::DecodeError;

/// Sample rate the analysis backend accepts.
pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// Compressed or containerized audio exactly as captured or picked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAudioBlob {
    pub bytes: Vec<u8>,
    /// Declared MIME type, e.g. `audio/webm;codecs=opus`. May be empty.
    pub mime_type: String,
    /// Original file name when the blob came from a file picker.
    pub file_name: Option<String>,
}

impl RawAudioBlob {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// MIME type without parameters, lowercased (`audio/ogg; codecs=opus` -> `audio/ogg`).
    pub fn essence(&self) -> String {
        self.mime_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase()
    }

    /// Lowercased extension of the original file name, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name.as_deref()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// Planar float samples at the source's native rate.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl DecodedAudioBuffer {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Result<Self, DecodeError> {
        if sample_rate == 0 {
            return Err(DecodeError::MissingSampleRate);
        }
        let Some(first) = channels.first() else {
            return Err(DecodeError::InvalidLayout("no channels".into()));
        };
        let frames = first.len();
        if let Some((idx, ch)) = channels.iter().enumerate().find(|(_, c)| c.len() != frames) {
            return Err(DecodeError::InvalidLayout(format!(
                "channel {} has {} frames, expected {}",
                idx,
                ch.len(),
                frames
            )));
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frame_count(&self) -> usize {
        self.channels[0].len()
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    pub(crate) fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }
}

/// Single-channel float samples at a given rate.
#[derive(Debug, Clone, PartialEq)]
pub struct MonoSampleBuffer {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl MonoSampleBuffer {
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            samples,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Shared cancellation flag, checked between packets and between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
