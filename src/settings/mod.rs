use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResampleQuality {
    /// Band-limited windowed-sinc interpolation.
    Sinc,
    /// Linear interpolation; faster, aliases when downsampling.
    Linear,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResamplerSettings {
    pub quality: ResampleQuality,
    pub sinc_len: usize,
    /// Cutoff relative to the output Nyquist frequency.
    pub f_cutoff: f32,
    pub oversampling_factor: usize,
}

impl Default for ResamplerSettings {
    fn default() -> Self {
        Self {
            quality: ResampleQuality::Sinc,
            sinc_len: 256,
            f_cutoff: 0.95,
            oversampling_factor: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub content_type: String,
    pub num_recommendations: u32,
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            content_type: "movie".into(),
            num_recommendations: 10,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    pub resampler: ResamplerSettings,
    pub backend: BackendConfig,
}

impl AppSettings {
    /// Read settings from a JSON file. A missing or malformed file yields defaults.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                log::debug!("No settings at {}: {}, using defaults", path.display(), e);
                return Self::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Ignoring malformed settings {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        Ok(())
    }
}
