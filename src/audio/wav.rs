use std::io::Cursor;

use super::{MonoSampleBuffer, TARGET_SAMPLE_RATE};
use crate::error::EncodeError;

pub const WAV_HEADER_LEN: usize = 44;
pub const BITS_PER_SAMPLE: u16 = 16;
pub const CHANNELS: u16 = 1;

/// A complete 16 kHz mono 16-bit PCM WAV container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavFile {
    bytes: Vec<u8>,
    frame_count: usize,
}

impl WavFile {
    pub const FILE_NAME: &'static str = "audio.wav";
    pub const MIME_TYPE: &'static str = "audio/wav";

    pub fn sample_rate(&self) -> u32 {
        TARGET_SAMPLE_RATE
    }

    pub fn channel_count(&self) -> u16 {
        CHANNELS
    }

    pub fn bits_per_sample(&self) -> u16 {
        BITS_PER_SAMPLE
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Whole container, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn pcm_data(&self) -> &[u8] {
        &self.bytes[WAV_HEADER_LEN..]
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Map a float sample to signed 16-bit PCM.
///
/// Negative values scale by 32768 and non-negative values by 32767, so both
/// ends of the `[-1.0, 1.0]` range reach the ends of the i16 range.
pub fn quantize_sample(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let s = sample.clamp(-1.0, 1.0) as f64;
    if s < 0.0 {
        (s * 32768.0).round().clamp(-32768.0, 32767.0) as i16
    } else {
        (s * 32767.0).round() as i16
    }
}

/// Quantize a 16 kHz mono buffer and wrap it in a RIFF/WAVE container.
pub fn encode(buffer: &MonoSampleBuffer) -> Result<WavFile, EncodeError> {
    if buffer.sample_rate != TARGET_SAMPLE_RATE {
        return Err(EncodeError::WrongSampleRate {
            expected: TARGET_SAMPLE_RATE,
            actual: buffer.sample_rate,
        });
    }

    let frames = buffer.samples.len();
    let data_size = frames
        .checked_mul(2)
        .filter(|&size| size <= (u32::MAX as usize) - 36)
        .ok_or(EncodeError::TooLarge { frames })?;

    let spec = hound::WavSpec {
        channels: CHANNELS,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(WAV_HEADER_LEN + data_size));
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    for &sample in &buffer.samples {
        writer.write_sample(quantize_sample(sample))?;
    }
    writer.finalize()?;

    let bytes = cursor.into_inner();
    log::debug!("Encoded {} frames into {} WAV bytes", frames, bytes.len());
    Ok(WavFile {
        bytes,
        frame_count: frames,
    })
}
