pub mod http;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::pipeline::PreparedUpload;
use crate::settings::BackendConfig;

/// Form fields sent alongside the audio file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub content_type: String,
    pub num_recommendations: u32,
}

impl Default for AnalysisRequest {
    fn default() -> Self {
        Self {
            content_type: "movie".into(),
            num_recommendations: 10,
        }
    }
}

impl From<&BackendConfig> for AnalysisRequest {
    fn from(config: &BackendConfig) -> Self {
        Self {
            content_type: config.content_type.clone(),
            num_recommendations: config.num_recommendations,
        }
    }
}

/// Emotion analysis plus recommendations. Entries are passed through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResponse {
    pub emotion_analysis: serde_json::Value,
    pub recommendations: Vec<serde_json::Value>,
    pub content_type: String,
    pub num_recommendations: u32,
}

#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn health(&self) -> Result<()>;

    async fn analyze_audio(
        &self,
        upload: &PreparedUpload,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResponse>;
}
