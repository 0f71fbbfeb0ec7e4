use super::{DecodedAudioBuffer, MonoSampleBuffer};

/// Mix down to mono by averaging channels, keeping the native sample rate.
///
/// A single-channel buffer is moved through without touching the samples.
pub fn downmix(buffer: DecodedAudioBuffer) -> MonoSampleBuffer {
    let sample_rate = buffer.sample_rate();
    let mut channels = buffer.into_channels();

    if channels.len() == 1 {
        let samples = channels.pop().unwrap_or_default();
        return MonoSampleBuffer::new(sample_rate, samples);
    }

    let count = channels.len() as f32;
    let frames = channels[0].len();
    let mono: Vec<f32> = (0..frames)
        .map(|i| channels.iter().map(|ch| ch[i]).sum::<f32>() / count)
        .collect();

    log::debug!("Downmixed {} channels x {} frames to mono", channels.len(), frames);
    MonoSampleBuffer::new(sample_rate, mono)
}
