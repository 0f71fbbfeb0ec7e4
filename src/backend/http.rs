use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::multipart;

use super::{AnalysisBackend, AnalysisRequest, AnalysisResponse};
use crate::pipeline::PreparedUpload;
use crate::settings::BackendConfig;

/// Client for the emotion analysis REST API.
pub struct HttpAnalysisBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAnalysisBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(client, &config.base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl AnalysisBackend for HttpAnalysisBackend {
    fn name(&self) -> &str {
        "HTTP analysis API"
    }

    async fn health(&self) -> Result<()> {
        let response = self.client.get(self.url("/health")).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("Health check failed ({})", response.status()));
        }
        Ok(())
    }

    async fn analyze_audio(
        &self,
        upload: &PreparedUpload,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResponse> {
        let start = Instant::now();

        let file_part = multipart::Part::bytes(upload.bytes.clone())
            .file_name(upload.file_name.clone())
            .mime_str(&upload.mime_type)?;

        let form = multipart::Form::new()
            .part("audio_file", file_part)
            .text("content_type", request.content_type.clone())
            .text("num_recommendations", request.num_recommendations.to_string());

        let response = self
            .client
            .post(self.url("/analyze/audio"))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Analysis API error ({}): {}", status, body));
        }

        let result: AnalysisResponse = response
            .json()
            .await
            .context("Malformed analysis response")?;
        log::info!(
            "Analyzed {} ({} bytes) in {}ms, {} recommendations",
            upload.file_name,
            upload.bytes.len(),
            start.elapsed().as_millis(),
            result.recommendations.len()
        );
        Ok(result)
    }
}
