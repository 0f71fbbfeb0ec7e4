//! Sample rate conversion to the fixed 16 kHz target.
//!
//! The algorithm sits behind the [`Resampler`] trait so it can be swapped
//! without touching the rest of the pipeline. [`SincResampler`] is the
//! band-limited default; [`LinearResampler`] trades aliasing for speed.

use rubato::{
    Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};

use super::{CancelToken, MonoSampleBuffer, TARGET_SAMPLE_RATE};
use crate::error::ResampleError;
use crate::settings::{ResampleQuality, ResamplerSettings};

pub trait Resampler: Send + Sync {
    fn name(&self) -> &str;

    /// Convert `samples` from `rate_in` to `rate_out`.
    ///
    /// Must return exactly [`output_frame_count`] frames, with output frame 0
    /// aligned to input frame 0, and be deterministic.
    fn resample(&self, samples: &[f32], rate_in: u32, rate_out: u32)
        -> Result<Vec<f32>, ResampleError>;

    /// Same as [`Resampler::resample`], but gives up with
    /// [`ResampleError::Cancelled`] once `cancel` trips.
    fn resample_cancellable(
        &self,
        samples: &[f32],
        rate_in: u32,
        rate_out: u32,
        cancel: &CancelToken,
    ) -> Result<Vec<f32>, ResampleError> {
        if cancel.is_cancelled() {
            return Err(ResampleError::Cancelled);
        }
        self.resample(samples, rate_in, rate_out)
    }
}

/// `ceil(frames * rate_out / rate_in)`, computed without floating point.
pub fn output_frame_count(frames: usize, rate_in: u32, rate_out: u32) -> usize {
    if rate_in == 0 {
        return 0;
    }
    let num = frames as u128 * rate_out as u128;
    num.div_ceil(rate_in as u128) as usize
}

fn check_rates(rate_in: u32, rate_out: u32) -> Result<(), ResampleError> {
    if rate_in == 0 || rate_out == 0 {
        return Err(ResampleError::InvalidRate { rate_in, rate_out });
    }
    Ok(())
}

/// Bring a mono buffer to [`TARGET_SAMPLE_RATE`]. A buffer already at the
/// target rate is returned as-is.
pub fn resample_to_target(
    buffer: MonoSampleBuffer,
    resampler: &dyn Resampler,
    cancel: &CancelToken,
) -> Result<MonoSampleBuffer, ResampleError> {
    check_rates(buffer.sample_rate, TARGET_SAMPLE_RATE)?;
    if buffer.sample_rate == TARGET_SAMPLE_RATE {
        return Ok(buffer);
    }

    let samples = resampler.resample_cancellable(
        &buffer.samples,
        buffer.sample_rate,
        TARGET_SAMPLE_RATE,
        cancel,
    )?;
    log::debug!(
        "Resampled {} frames @ {}Hz -> {} frames @ {}Hz ({})",
        buffer.samples.len(),
        buffer.sample_rate,
        samples.len(),
        TARGET_SAMPLE_RATE,
        resampler.name()
    );
    Ok(MonoSampleBuffer::new(TARGET_SAMPLE_RATE, samples))
}

pub fn from_settings(settings: &ResamplerSettings) -> Box<dyn Resampler> {
    match settings.quality {
        ResampleQuality::Sinc => Box::new(SincResampler::from_settings(settings)),
        ResampleQuality::Linear => Box::new(LinearResampler),
    }
}

/// Input frames fed to rubato per call. Cancellation is checked between calls.
const CHUNK_FRAMES: usize = 8192;

/// Windowed-sinc interpolation backed by rubato.
#[derive(Debug, Clone)]
pub struct SincResampler {
    sinc_len: usize,
    f_cutoff: f32,
    oversampling_factor: usize,
}

impl Default for SincResampler {
    fn default() -> Self {
        Self::from_settings(&ResamplerSettings::default())
    }
}

impl SincResampler {
    pub fn from_settings(settings: &ResamplerSettings) -> Self {
        Self {
            sinc_len: settings.sinc_len.max(2),
            f_cutoff: settings.f_cutoff,
            oversampling_factor: settings.oversampling_factor.max(1),
        }
    }

    fn process_chunks(
        &self,
        samples: &[f32],
        rate_in: u32,
        rate_out: u32,
        cancel: &CancelToken,
    ) -> Result<Vec<f32>, ResampleError> {
        check_rates(rate_in, rate_out)?;
        if samples.is_empty() {
            return Ok(Vec::new());
        }
        if rate_in == rate_out {
            return Ok(samples.to_vec());
        }

        let ratio = rate_out as f64 / rate_in as f64;
        let wanted = output_frame_count(samples.len(), rate_in, rate_out);

        let params = SincInterpolationParameters {
            sinc_len: self.sinc_len,
            f_cutoff: self.f_cutoff,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: self.oversampling_factor,
            window: WindowFunction::BlackmanHarris2,
        };

        // Trailing silence flushes the filter tail out of the last chunk.
        let tail = self.sinc_len + (2.0 / ratio).ceil() as usize + 2;
        let total = samples.len() + tail;
        let chunk = total.min(CHUNK_FRAMES);
        let padded_len = total.div_ceil(chunk) * chunk;
        let mut padded = Vec::with_capacity(padded_len);
        padded.extend_from_slice(samples);
        padded.resize(padded_len, 0.0);

        let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, chunk, 1)
            .map_err(|e| ResampleError::Setup(e.to_string()))?;

        // Output frame 0 of a fresh SincFixedIn is aligned with input frame 0.
        let mut result = Vec::with_capacity(wanted + chunk);
        for block in padded.chunks_exact(chunk) {
            if result.len() >= wanted {
                break;
            }
            if cancel.is_cancelled() {
                return Err(ResampleError::Cancelled);
            }
            let mut output = resampler
                .process(&[block], None)
                .map_err(|e| ResampleError::Process(e.to_string()))?;
            if let Some(wave) = output.first_mut() {
                result.append(wave);
            }
        }

        if result.len() < wanted {
            log::warn!(
                "Sinc resampler produced {} frames, padding to {}",
                result.len(),
                wanted
            );
        }
        result.resize(wanted, 0.0);
        Ok(result)
    }
}

impl Resampler for SincResampler {
    fn name(&self) -> &str {
        "windowed sinc"
    }

    fn resample(
        &self,
        samples: &[f32],
        rate_in: u32,
        rate_out: u32,
    ) -> Result<Vec<f32>, ResampleError> {
        self.process_chunks(samples, rate_in, rate_out, &CancelToken::new())
    }

    fn resample_cancellable(
        &self,
        samples: &[f32],
        rate_in: u32,
        rate_out: u32,
        cancel: &CancelToken,
    ) -> Result<Vec<f32>, ResampleError> {
        self.process_chunks(samples, rate_in, rate_out, cancel)
    }
}

/// Linear interpolation between neighbouring input frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearResampler;

impl Resampler for LinearResampler {
    fn name(&self) -> &str {
        "linear"
    }

    fn resample(
        &self,
        samples: &[f32],
        rate_in: u32,
        rate_out: u32,
    ) -> Result<Vec<f32>, ResampleError> {
        check_rates(rate_in, rate_out)?;
        if samples.is_empty() {
            return Ok(Vec::new());
        }
        if rate_in == rate_out {
            return Ok(samples.to_vec());
        }

        let output_len = output_frame_count(samples.len(), rate_in, rate_out);
        let step = rate_in as f64 / rate_out as f64;
        let last = samples.len() - 1;

        let output = (0..output_len)
            .map(|i| {
                let src_pos = i as f64 * step;
                let src_idx = src_pos as usize;
                if src_idx >= last {
                    return samples[last];
                }
                let frac = (src_pos - src_idx as f64) as f32;
                samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac
            })
            .collect();

        Ok(output)
    }
}
