//! Ollama-compatible backend speaking the `/api/generate` protocol

use super::{parse_classification, BackendClassification, BackendError, LanguageBackend};
use super::prompts::{classification_prompt, translation_prompt};
use crate::catalog::SchemaCatalog;
use crate::pipeline::types::ResolvedEntity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct GenerateOptions<'a> {
    temperature: f32,
    num_predict: u32,
    stop: &'a [&'a str],
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions<'a>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    classify_model: String,
    translate_model: String,
    timeout: Duration,
}

impl OllamaBackend {
    pub fn new(
        base_url: impl Into<String>,
        classify_model: impl Into<String>,
        translate_model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            classify_model: classify_model.into(),
            translate_model: translate_model.into(),
            timeout,
        })
    }

    async fn generate(
        &self,
        model: &str,
        system: &str,
        prompt: &str,
        num_predict: u32,
        stop: &[&str],
    ) -> Result<String, BackendError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model,
            system,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: 0.0,
                num_predict,
                stop,
            },
        };

        debug!("🧠 Calling {} with model {}", url, model);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout(self.timeout)
                } else {
                    BackendError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::Unavailable(format!("HTTP {}: {}", status, text)));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        Ok(parsed.response)
    }
}

#[async_trait]
impl LanguageBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn classify(&self, question: &str) -> Result<BackendClassification, BackendError> {
        let (system, prompt) = classification_prompt(question);
        let raw = self
            .generate(&self.classify_model, &system, &prompt, 120, &[])
            .await?;
        parse_classification(&raw)
    }

    async fn translate(
        &self,
        question: &str,
        schema: &SchemaCatalog,
        entities: &[ResolvedEntity],
        feedback: Option<&str>,
    ) -> Result<String, BackendError> {
        let (system, prompt) = translation_prompt(question, schema, entities, feedback);
        self.generate(&self.translate_model, &system, &prompt, 300, &["Note:"])
            .await
    }
}
