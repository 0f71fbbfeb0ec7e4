//! libopus decoding for Opus packets demuxed from Ogg or WebM.

use symphonia::core::codecs::CodecParameters;

use super::decoder::ChannelCollector;
use crate::error::DecodeError;

/// Opus always decodes at 48 kHz.
const OPUS_SAMPLE_RATE: u32 = 48000;
/// 120 ms at 48 kHz, the longest Opus frame.
const MAX_FRAME_SAMPLES: usize = 5760;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpusHead {
    channels: usize,
    pre_skip: usize,
}

impl OpusHead {
    /// Parse the identification header carried as codec extra data.
    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 19 || &data[..8] != b"OpusHead" {
            return None;
        }
        Some(Self {
            channels: data[9] as usize,
            pre_skip: u16::from_le_bytes([data[10], data[11]]) as usize,
        })
    }
}

pub(crate) struct OpusPacketDecoder {
    decoder: ::opus::Decoder,
    channels: usize,
    pre_skip: usize,
    pcm: Vec<f32>,
}

impl OpusPacketDecoder {
    pub(crate) fn new(params: &CodecParameters) -> Result<Self, DecodeError> {
        let head = params.extra_data.as_deref().and_then(OpusHead::parse);
        let channels = head
            .map(|h| h.channels)
            .or_else(|| params.channels.map(|c| c.count()))
            .unwrap_or(1);

        let layout = match channels {
            1 => ::opus::Channels::Mono,
            2 => ::opus::Channels::Stereo,
            n => {
                return Err(DecodeError::UnsupportedCodec(format!(
                    "opus multistream with {} channels",
                    n
                )))
            }
        };

        let decoder = ::opus::Decoder::new(OPUS_SAMPLE_RATE, layout)
            .map_err(|e| DecodeError::Codec(e.to_string()))?;

        Ok(Self {
            decoder,
            channels,
            pre_skip: head.map_or(0, |h| h.pre_skip),
            pcm: vec![0.0; MAX_FRAME_SAMPLES * channels],
        })
    }

    pub(crate) fn decode(&mut self, data: &[u8], out: &mut ChannelCollector) -> Result<(), DecodeError> {
        match self.decoder.decode_float(data, &mut self.pcm, false) {
            Ok(frames) => {
                out.push_interleaved(OPUS_SAMPLE_RATE, self.channels, &self.pcm[..frames * self.channels])
            }
            Err(e) => {
                log::warn!("Skipping undecodable opus packet: {}", e);
                Ok(())
            }
        }
    }

    /// Encoder priming frames to drop from the start of the stream.
    pub(crate) fn pre_skip(&self) -> usize {
        self.pre_skip
    }
}
