//! Container/codec decoding into planar float samples.
//!
//! Decoding is delegated to symphonia. Opus tracks are demuxed by symphonia
//! and decoded by libopus (the default `opus-codec` feature).

use std::any::Any;
use std::io::Cursor;
use std::panic::{self, AssertUnwindSafe};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{
    CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_NULL, CODEC_TYPE_OPUS,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::{CancelToken, DecodedAudioBuffer, RawAudioBlob};
use crate::error::DecodeError;

/// Capability that turns a compressed blob into per-channel float samples.
pub trait AudioDecoder: Send + Sync {
    fn decode(
        &self,
        blob: &RawAudioBlob,
        cancel: &CancelToken,
    ) -> Result<DecodedAudioBuffer, DecodeError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaDecoder;

impl AudioDecoder for SymphoniaDecoder {
    fn decode(
        &self,
        blob: &RawAudioBlob,
        cancel: &CancelToken,
    ) -> Result<DecodedAudioBuffer, DecodeError> {
        // Malformed input can trip asserts inside codec crates.
        match panic::catch_unwind(AssertUnwindSafe(|| decode_blob(blob, cancel))) {
            Ok(result) => result,
            Err(payload) => Err(DecodeError::Panicked(panic_message(payload))),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".into()
    }
}

fn probe_hint(blob: &RawAudioBlob) -> Hint {
    let mut hint = Hint::new();
    let essence = blob.essence();
    if !essence.is_empty() {
        hint.mime_type(&essence);
    }
    if let Some(ext) = blob.extension() {
        hint.with_extension(&ext);
    }
    hint
}

fn decode_blob(blob: &RawAudioBlob, cancel: &CancelToken) -> Result<DecodedAudioBuffer, DecodeError> {
    // MediaSourceStream needs an owned source. The blob itself stays intact
    // because a failed conversion uploads it unchanged.
    let source = Cursor::new(blob.bytes.clone());
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &probe_hint(blob),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::Probe(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let mut decoder = TrackDecoder::new(&params)?;
    let mut collector = ChannelCollector::new(&params);

    loop {
        if cancel.is_cancelled() {
            return Err(DecodeError::Cancelled);
        }

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                log::debug!("Stream reset requested, stopping after the first track layout");
                break;
            }
            Err(e) if collector.frame_count() > 0 => {
                log::warn!(
                    "Stopping at a damaged packet after {} frames: {}",
                    collector.frame_count(),
                    e
                );
                break;
            }
            Err(e) => return Err(DecodeError::Codec(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }
        decoder.decode(&packet, &mut collector)?;
    }

    decoder.finish(&mut collector);
    let buffer = collector.into_buffer()?;
    log::debug!(
        "Decoded {} frames, {} channel(s) @ {}Hz",
        buffer.frame_count(),
        buffer.channel_count(),
        buffer.sample_rate()
    );
    Ok(buffer)
}

enum TrackDecoder {
    Native(Box<dyn Decoder>),
    #[cfg(feature = "opus-codec")]
    Opus(super::opus_packets::OpusPacketDecoder),
}

impl TrackDecoder {
    fn new(params: &CodecParameters) -> Result<Self, DecodeError> {
        if params.codec == CODEC_TYPE_OPUS {
            #[cfg(feature = "opus-codec")]
            {
                return Ok(TrackDecoder::Opus(
                    super::opus_packets::OpusPacketDecoder::new(params)?,
                ));
            }
            #[cfg(not(feature = "opus-codec"))]
            {
                return Err(DecodeError::UnsupportedCodec(
                    "opus (rebuild with --features opus-codec)".into(),
                ));
            }
        }

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| DecodeError::UnsupportedCodec(e.to_string()))?;
        Ok(TrackDecoder::Native(decoder))
    }

    fn decode(&mut self, packet: &Packet, out: &mut ChannelCollector) -> Result<(), DecodeError> {
        match self {
            TrackDecoder::Native(decoder) => {
                let decoded = match decoder.decode(packet) {
                    Ok(decoded) => decoded,
                    Err(SymphoniaError::DecodeError(e)) => {
                        log::warn!("Skipping undecodable packet: {}", e);
                        return Ok(());
                    }
                    Err(SymphoniaError::IoError(e)) => {
                        log::warn!("Skipping truncated packet: {}", e);
                        return Ok(());
                    }
                    Err(e) => return Err(DecodeError::Codec(e.to_string())),
                };

                let spec = *decoded.spec();
                let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                samples.copy_interleaved_ref(decoded);
                out.push_interleaved(spec.rate, spec.channels.count(), samples.samples())
            }
            #[cfg(feature = "opus-codec")]
            TrackDecoder::Opus(decoder) => decoder.decode(packet.buf(), out),
        }
    }

    fn finish(&mut self, out: &mut ChannelCollector) {
        match self {
            TrackDecoder::Native(_) => {}
            #[cfg(feature = "opus-codec")]
            TrackDecoder::Opus(decoder) => out.trim_front(decoder.pre_skip()),
        }
        #[cfg(not(feature = "opus-codec"))]
        let _ = out;
    }
}

/// Accumulates interleaved packets into per-channel vectors.
pub(crate) struct ChannelCollector {
    declared_rate: Option<u32>,
    declared_channels: Option<usize>,
    sample_rate: Option<u32>,
    channels: Vec<Vec<f32>>,
}

impl ChannelCollector {
    fn new(params: &CodecParameters) -> Self {
        Self {
            declared_rate: params.sample_rate,
            declared_channels: params.channels.map(|c| c.count()),
            sample_rate: None,
            channels: Vec::new(),
        }
    }

    pub(crate) fn push_interleaved(
        &mut self,
        rate: u32,
        channel_count: usize,
        samples: &[f32],
    ) -> Result<(), DecodeError> {
        if channel_count == 0 {
            return Err(DecodeError::InvalidLayout("packet has no channels".into()));
        }

        match self.sample_rate {
            None => self.sample_rate = Some(rate),
            Some(current) if current != rate => {
                return Err(DecodeError::InvalidLayout(format!(
                    "sample rate changed mid-stream from {} to {}",
                    current, rate
                )));
            }
            Some(_) => {}
        }

        if self.channels.is_empty() {
            self.channels = vec![Vec::new(); channel_count];
        } else if self.channels.len() != channel_count {
            return Err(DecodeError::InvalidLayout(format!(
                "channel count changed mid-stream from {} to {}",
                self.channels.len(),
                channel_count
            )));
        }

        for frame in samples.chunks_exact(channel_count) {
            for (channel, &sample) in self.channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        Ok(())
    }

    pub(crate) fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    #[cfg_attr(not(feature = "opus-codec"), allow(dead_code))]
    pub(crate) fn trim_front(&mut self, frames: usize) {
        for channel in &mut self.channels {
            let n = frames.min(channel.len());
            channel.drain(..n);
        }
    }

    fn into_buffer(self) -> Result<DecodedAudioBuffer, DecodeError> {
        if self.channels.is_empty() {
            // Nothing decoded: an empty clip, described by the codec parameters.
            let rate = self.declared_rate.ok_or(DecodeError::MissingSampleRate)?;
            let count = self.declared_channels.unwrap_or(1).max(1);
            return DecodedAudioBuffer::new(rate, vec![Vec::new(); count]);
        }
        let rate = self.sample_rate.ok_or(DecodeError::MissingSampleRate)?;
        DecodedAudioBuffer::new(rate, self.channels)
    }
}
