//! Blob -> 16 kHz mono WAV conversion with the send-the-original fallback.

use std::sync::Arc;

use serde::Serialize;

use crate::audio::decoder::{AudioDecoder, SymphoniaDecoder};
use crate::audio::resampler::{self, Resampler};
use crate::audio::wav::{self, WavFile};
use crate::audio::{mixer, CancelToken, MonoSampleBuffer, RawAudioBlob};
use crate::error::{ConvertError, DecodeError, ResampleError};
use crate::settings::ResamplerSettings;

const WAV_MIME_TYPES: &[&str] = &["audio/wav", "audio/x-wav", "audio/wave", "audio/vnd.wave"];
const DEFAULT_CAPTURE_MIME: &str = "audio/webm";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Converted { frames: usize },
    Fallback { reason: String },
}

/// The file handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub outcome: Outcome,
}

impl PreparedUpload {
    fn converted(wav: WavFile) -> Self {
        let frames = wav.frame_count();
        Self {
            file_name: WavFile::FILE_NAME.into(),
            mime_type: WavFile::MIME_TYPE.into(),
            bytes: wav.into_bytes(),
            outcome: Outcome::Converted { frames },
        }
    }

    /// Original bytes under best-effort naming.
    pub fn fallback(blob: RawAudioBlob, reason: String) -> Self {
        let (file_name, mime_type) = fallback_naming(&blob);
        Self {
            file_name,
            mime_type,
            bytes: blob.bytes,
            outcome: Outcome::Fallback { reason },
        }
    }

    pub fn is_converted(&self) -> bool {
        matches!(self.outcome, Outcome::Converted { .. })
    }
}

fn is_wav_compatible(blob: &RawAudioBlob) -> bool {
    WAV_MIME_TYPES.contains(&blob.essence().as_str()) || blob.extension().as_deref() == Some("wav")
}

fn extension_for_mime(essence: &str) -> &str {
    match essence {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/x-m4a" | "audio/aac" => "m4a",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/ogg" | "audio/opus" => "ogg",
        _ => essence
            .strip_prefix("audio/")
            .or_else(|| essence.strip_prefix("video/"))
            .filter(|sub| !sub.is_empty() && sub.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("webm"),
    }
}

/// `(file_name, mime_type)` used when the original bytes are sent.
pub fn fallback_naming(blob: &RawAudioBlob) -> (String, String) {
    if is_wav_compatible(blob) {
        return (WavFile::FILE_NAME.into(), WavFile::MIME_TYPE.into());
    }

    if let Some(name) = &blob.file_name {
        let mime = if blob.mime_type.trim().is_empty() {
            "application/octet-stream".to_string()
        } else {
            blob.mime_type.clone()
        };
        return (name.clone(), mime);
    }

    let mime = if blob.mime_type.trim().is_empty() {
        DEFAULT_CAPTURE_MIME.to_string()
    } else {
        blob.mime_type.clone()
    };
    let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    (format!("audio.{}", extension_for_mime(&essence)), mime)
}

/// Decoder + resampler pair. Stateless between calls, so one instance can
/// be shared across threads.
pub struct Normalizer {
    decoder: Box<dyn AudioDecoder>,
    resampler: Box<dyn Resampler>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(&ResamplerSettings::default())
    }
}

impl Normalizer {
    pub fn new(settings: &ResamplerSettings) -> Self {
        Self::with_components(Box::new(SymphoniaDecoder), resampler::from_settings(settings))
    }

    pub fn with_components(decoder: Box<dyn AudioDecoder>, resampler: Box<dyn Resampler>) -> Self {
        Self { decoder, resampler }
    }

    /// Decode, downmix and resample to 16 kHz mono float samples.
    pub fn normalize(
        &self,
        blob: &RawAudioBlob,
        cancel: &CancelToken,
    ) -> Result<MonoSampleBuffer, ConvertError> {
        let decoded = self.decoder.decode(blob, cancel)?;
        let native_rate = decoded.sample_rate();
        let channels = decoded.channel_count();
        if cancel.is_cancelled() {
            return Err(ConvertError::Cancelled);
        }

        let mono = mixer::downmix(decoded);
        if cancel.is_cancelled() {
            return Err(ConvertError::Cancelled);
        }

        let resampled = resampler::resample_to_target(mono, self.resampler.as_ref(), cancel)
            .map_err(|e| match e {
                ResampleError::Cancelled => ConvertError::Cancelled,
                other => other.into(),
            })?;

        log::debug!(
            "Normalized {}Hz x{} -> {} frames @ 16kHz",
            native_rate,
            channels,
            resampled.len()
        );
        Ok(resampled)
    }

    /// Strict conversion: every stage failure is returned.
    pub fn to_wav(&self, blob: &RawAudioBlob) -> Result<WavFile, ConvertError> {
        let mono = self.normalize(blob, &CancelToken::new())?;
        Ok(wav::encode(&mono)?)
    }

    /// Convert, falling back to the original bytes when decoding or
    /// resampling fails. Only encoder errors and cancellation are returned.
    pub fn prepare(&self, blob: RawAudioBlob) -> Result<PreparedUpload, ConvertError> {
        self.prepare_cancellable(blob, &CancelToken::new())
    }

    pub fn prepare_cancellable(
        &self,
        blob: RawAudioBlob,
        cancel: &CancelToken,
    ) -> Result<PreparedUpload, ConvertError> {
        let mono = match self.normalize(&blob, cancel) {
            Ok(mono) => mono,
            Err(e) if e.is_recoverable() => {
                log::warn!("Audio conversion failed, sending original file: {}", e);
                return Ok(PreparedUpload::fallback(blob, e.to_string()));
            }
            Err(ConvertError::Decode(DecodeError::Cancelled)) => {
                return Err(ConvertError::Cancelled)
            }
            Err(e) => return Err(e),
        };

        let wav = wav::encode(&mono)?;
        log::info!(
            "Converted {} bytes of {} into {} frames of 16kHz mono WAV",
            blob.bytes.len(),
            if blob.mime_type.is_empty() { "audio" } else { blob.mime_type.as_str() },
            wav.frame_count()
        );
        Ok(PreparedUpload::converted(wav))
    }

    /// Run [`Normalizer::prepare`] on the blocking pool. Dropping the
    /// returned future cancels the conversion.
    pub async fn prepare_async(
        self: Arc<Self>,
        blob: RawAudioBlob,
    ) -> Result<PreparedUpload, ConvertError> {
        let cancel = CancelToken::new();
        let _guard = CancelOnDrop(cancel.clone());

        tokio::task::spawn_blocking(move || self.prepare_cancellable(blob, &cancel))
            .await
            .map_err(|e| {
                log::error!("Conversion task failed: {}", e);
                ConvertError::Task(e.to_string())
            })?
    }
}

struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::resampler::{LinearResampler, SincResampler};
    use crate::audio::DecodedAudioBuffer;
    use std::f32::consts::PI;
    use std::io::Cursor;
    use std::sync::{mpsc, Mutex};
    use std::time::{Duration, Instant};

    fn stereo_sine_wav(rate: u32, frames: usize, freq: f32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            let s = 0.5 * (2.0 * PI * freq * i as f32 / rate as f32).sin();
            let v = (s * i16::MAX as f32) as i16;
            writer.write_sample(v).unwrap();
            writer.write_sample(v).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    fn noise(len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|i| ((i.wrapping_mul(1103515245).wrapping_add(12345) >> 16) & 0x7f) as u8)
            .collect()
    }

    struct FixedDecoder(u32, Vec<Vec<f32>>);

    impl AudioDecoder for FixedDecoder {
        fn decode(
            &self,
            _blob: &RawAudioBlob,
            _cancel: &CancelToken,
        ) -> Result<DecodedAudioBuffer, DecodeError> {
            DecodedAudioBuffer::new(self.0, self.1.clone())
        }
    }

    struct FailingResampler;

    impl Resampler for FailingResampler {
        fn name(&self) -> &str {
            "failing"
        }

        fn resample(&self, _: &[f32], _: u32, _: u32) -> Result<Vec<f32>, ResampleError> {
            Err(ResampleError::Process("boom".into()))
        }
    }

    /// Trips the token on entry, as if the caller gave up mid-resample.
    struct CancellingResampler;

    impl Resampler for CancellingResampler {
        fn name(&self) -> &str {
            "cancelling"
        }

        fn resample(
            &self,
            samples: &[f32],
            rate_in: u32,
            rate_out: u32,
        ) -> Result<Vec<f32>, ResampleError> {
            LinearResampler.resample(samples, rate_in, rate_out)
        }

        fn resample_cancellable(
            &self,
            samples: &[f32],
            rate_in: u32,
            rate_out: u32,
            cancel: &CancelToken,
        ) -> Result<Vec<f32>, ResampleError> {
            cancel.cancel();
            SincResampler::default().resample_cancellable(samples, rate_in, rate_out, cancel)
        }
    }

    /// Blocks until the token trips (or five seconds pass) and reports what it saw.
    struct WaitForCancel(Mutex<mpsc::Sender<bool>>);

    impl Resampler for WaitForCancel {
        fn name(&self) -> &str {
            "wait for cancel"
        }

        fn resample(
            &self,
            samples: &[f32],
            rate_in: u32,
            rate_out: u32,
        ) -> Result<Vec<f32>, ResampleError> {
            LinearResampler.resample(samples, rate_in, rate_out)
        }

        fn resample_cancellable(
            &self,
            samples: &[f32],
            rate_in: u32,
            rate_out: u32,
            cancel: &CancelToken,
        ) -> Result<Vec<f32>, ResampleError> {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !cancel.is_cancelled() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
            let _ = self.0.lock().unwrap().send(cancel.is_cancelled());
            if cancel.is_cancelled() {
                return Err(ResampleError::Cancelled);
            }
            self.resample(samples, rate_in, rate_out)
        }
    }

    /// Cancels the token it is handed, as if the caller gave up mid-decode.
    struct CancellingDecoder;

    impl AudioDecoder for CancellingDecoder {
        fn decode(
            &self,
            _blob: &RawAudioBlob,
            cancel: &CancelToken,
        ) -> Result<DecodedAudioBuffer, DecodeError> {
            cancel.cancel();
            DecodedAudioBuffer::new(44100, vec![vec![0.0; 10]])
        }
    }

    #[test]
    fn test_end_to_end_stereo_sine() {
        let blob = RawAudioBlob::new(stereo_sine_wav(44100, 44100, 440.0), "audio/wav");
        let upload = Normalizer::default().prepare(blob).unwrap();

        assert_eq!(upload.file_name, "audio.wav");
        assert_eq!(upload.mime_type, "audio/wav");
        assert_eq!(upload.outcome, Outcome::Converted { frames: 16000 });

        let bytes = &upload.bytes;
        assert_eq!(u32::from_le_bytes(bytes[24..28].try_into().unwrap()), 16000);
        assert_eq!(u16::from_le_bytes([bytes[22], bytes[23]]), 1);
        assert_eq!(u16::from_le_bytes([bytes[34], bytes[35]]), 16);
        let data_len = u32::from_le_bytes(bytes[40..44].try_into().unwrap()) as i64;
        assert!((data_len - 2 * 16000).abs() <= 2);
        assert_eq!(bytes.len() as i64, 44 + data_len);
    }

    #[test]
    fn test_to_wav_keeps_tone_level() {
        let blob = RawAudioBlob::new(stereo_sine_wav(48000, 24000, 300.0), "audio/wav");
        let wav = Normalizer::default().to_wav(&blob).unwrap();
        assert_eq!(wav.frame_count(), 8000);

        let peak = wav
            .pcm_data()
            .chunks_exact(2)
            .skip(200)
            .take(7600)
            .map(|b| i16::from_le_bytes([b[0], b[1]]).unsigned_abs())
            .max()
            .unwrap();
        // 0.5 full scale, give or take filter ripple.
        assert!((15800..=16900).contains(&peak), "peak = {}", peak);
    }

    #[test]
    fn test_random_bytes_fall_back_to_original() {
        let bytes = noise(8192);
        let blob = RawAudioBlob::new(bytes.clone(), "audio/webm;codecs=opus");
        let upload = Normalizer::default().prepare(blob).unwrap();

        assert_eq!(upload.bytes, bytes);
        assert_eq!(upload.file_name, "audio.webm");
        assert_eq!(upload.mime_type, "audio/webm;codecs=opus");
        assert!(!upload.is_converted());
    }

    #[test]
    fn test_strict_path_reports_decode_error() {
        let blob = RawAudioBlob::new(noise(1024), "audio/ogg");
        let err = Normalizer::default().to_wav(&blob).unwrap_err();
        assert!(matches!(err, ConvertError::Decode(_)));
    }

    #[test]
    fn test_resample_failure_falls_back() {
        let normalizer = Normalizer::with_components(
            Box::new(FixedDecoder(44100, vec![vec![0.1; 100]])),
            Box::new(FailingResampler),
        );
        let blob = RawAudioBlob::new(vec![1, 2, 3], "audio/mpeg");
        let upload = normalizer.prepare(blob).unwrap();
        assert_eq!(upload.bytes, vec![1, 2, 3]);
        assert_eq!(upload.file_name, "audio.mp3");
        match upload.outcome {
            Outcome::Fallback { reason } => assert!(reason.contains("boom")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_native_16k_skips_resampler() {
        let normalizer = Normalizer::with_components(
            Box::new(FixedDecoder(16000, vec![vec![0.5; 320], vec![-0.5; 320]])),
            Box::new(FailingResampler),
        );
        let upload = normalizer.prepare(RawAudioBlob::new(vec![0], "audio/wav")).unwrap();
        assert_eq!(upload.outcome, Outcome::Converted { frames: 320 });
        assert!(upload.bytes[44..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_linear_quality_end_to_end() {
        let normalizer = Normalizer::with_components(
            Box::new(FixedDecoder(8000, vec![vec![0.25; 8000]])),
            Box::new(LinearResampler),
        );
        let wav = normalizer.to_wav(&RawAudioBlob::new(vec![], "")).unwrap();
        assert_eq!(wav.frame_count(), 16000);
    }

    #[test]
    fn test_cancellation_never_falls_back() {
        let normalizer =
            Normalizer::with_components(Box::new(CancellingDecoder), Box::new(LinearResampler));
        let err = normalizer
            .prepare_cancellable(RawAudioBlob::new(vec![9; 16], "audio/webm"), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, ConvertError::Cancelled));
    }

    #[test]
    fn test_cancel_during_resampling_never_falls_back() {
        let normalizer = Normalizer::with_components(
            Box::new(FixedDecoder(44100, vec![vec![0.2; 44100]])),
            Box::new(CancellingResampler),
        );
        let err = normalizer
            .prepare_cancellable(RawAudioBlob::new(vec![1; 8], "audio/mpeg"), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, ConvertError::Cancelled));
    }

    #[test]
    fn test_pre_cancelled_decode_returns_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let blob = RawAudioBlob::new(stereo_sine_wav(16000, 160, 100.0), "audio/wav");
        let err = Normalizer::default().prepare_cancellable(blob, &cancel).unwrap_err();
        assert!(matches!(err, ConvertError::Cancelled));
    }

    #[test]
    fn test_fallback_naming() {
        let cases = [
            (RawAudioBlob::new(vec![], "audio/x-wav"), ("audio.wav", "audio/wav")),
            (
                RawAudioBlob::new(vec![], "").with_file_name("memo.WAV"),
                ("audio.wav", "audio/wav"),
            ),
            (
                RawAudioBlob::new(vec![], "audio/mp4").with_file_name("voice.m4a"),
                ("voice.m4a", "audio/mp4"),
            ),
            (
                RawAudioBlob::new(vec![], "").with_file_name("clip.xyz"),
                ("clip.xyz", "application/octet-stream"),
            ),
            (RawAudioBlob::new(vec![], ""), ("audio.webm", "audio/webm")),
            (
                RawAudioBlob::new(vec![], "audio/ogg; codecs=opus"),
                ("audio.ogg", "audio/ogg; codecs=opus"),
            ),
            (RawAudioBlob::new(vec![], "audio/mp4"), ("audio.m4a", "audio/mp4")),
            (RawAudioBlob::new(vec![], "video/webm"), ("audio.webm", "video/webm")),
        ];
        for (blob, (name, mime)) in cases {
            assert_eq!(fallback_naming(&blob), (name.to_string(), mime.to_string()));
        }
    }

    #[tokio::test]
    async fn test_prepare_async_converts() {
        let normalizer = Arc::new(Normalizer::default());
        let blob = RawAudioBlob::new(stereo_sine_wav(22050, 11025, 500.0), "audio/wav");
        let upload = normalizer.prepare_async(blob).await.unwrap();
        assert_eq!(upload.outcome, Outcome::Converted { frames: 8000 });
    }

    #[tokio::test]
    async fn test_prepare_async_falls_back() {
        let normalizer = Arc::new(Normalizer::default());
        let upload = normalizer
            .prepare_async(RawAudioBlob::new(noise(512), ""))
            .await
            .unwrap();
        assert_eq!(upload.file_name, "audio.webm");
        assert_eq!(upload.mime_type, "audio/webm");
    }

    #[tokio::test]
    async fn test_concurrent_conversions_share_normalizer() {
        let normalizer = Arc::new(Normalizer::default());
        let a = normalizer
            .clone()
            .prepare_async(RawAudioBlob::new(stereo_sine_wav(44100, 4410, 440.0), "audio/wav"));
        let b = normalizer
            .clone()
            .prepare_async(RawAudioBlob::new(stereo_sine_wav(48000, 4800, 440.0), "audio/wav"));
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap().outcome, Outcome::Converted { frames: 1600 });
        assert_eq!(b.unwrap().outcome, Outcome::Converted { frames: 1600 });
    }

    #[tokio::test]
    async fn test_dropping_prepare_async_stops_resampling() {
        let (tx, rx) = mpsc::channel();
        let normalizer = Arc::new(Normalizer::with_components(
            Box::new(FixedDecoder(44100, vec![vec![0.1; 441]])),
            Box::new(WaitForCancel(Mutex::new(tx))),
        ));

        let pending = normalizer.prepare_async(RawAudioBlob::new(vec![1; 8], "audio/wav"));
        let timed_out = tokio::time::timeout(Duration::from_millis(50), pending).await;
        assert!(timed_out.is_err());

        let saw_cancel =
            tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(5)))
                .await
                .unwrap()
                .unwrap();
        assert!(saw_cancel);
    }
}
