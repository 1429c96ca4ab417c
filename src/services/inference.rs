//! The one way the rest of the crate talks to a model.
//!
//! Layering, outermost first: credential refresh, retry, then a single
//! invoke-and-normalize attempt.

use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::Config;
use crate::core::error::LlmError;
use crate::services::classify::ErrorClassifier;
use crate::services::llm::{GenerateRequest, LlmClient};
use crate::services::response::{Plausibility, ResponseNormalizer};
use crate::services::retry::{retry_async, RetryPolicy};
use crate::services::sanitize::Sanitizer;
use crate::utils::text::char_len;

#[derive(Debug)]
pub struct InferenceService {
    client: Arc<dyn LlmClient>,
    retry: RetryPolicy,
    normalizer: ResponseNormalizer,
    sanitizer: Sanitizer,
    max_tokens: u32,
}

impl InferenceService {
    pub fn new(
        client: Arc<dyn LlmClient>,
        retry: RetryPolicy,
        normalizer: ResponseNormalizer,
        sanitizer: Sanitizer,
        max_tokens: u32,
    ) -> Self {
        Self {
            client,
            retry,
            normalizer,
            sanitizer,
            max_tokens,
        }
    }

    pub fn from_config(client: Arc<dyn LlmClient>, config: &Config) -> Self {
        let llm = &config.llm;
        let normalizer = ResponseNormalizer::new(
            Plausibility::from(&llm.plausibility),
            Duration::from_secs(llm.stream_timeout_seconds),
            ErrorClassifier::from(&llm.classifier),
        );
        Self::new(
            client,
            RetryPolicy::from(&llm.retry),
            normalizer,
            Sanitizer::from(&config.script),
            llm.max_tokens,
        )
    }

    pub fn client(&self) -> &Arc<dyn LlmClient> {
        &self.client
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    /// A plain model request with the configured token budget.
    pub fn request(&self, prompt: impl Into<String>) -> GenerateRequest {
        GenerateRequest::new(prompt, self.max_tokens)
    }

    pub async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        match self.generate_with_retry(request).await {
            Err(LlmError::Auth(msg)) => {
                warn!("Authentication failed, refreshing credentials: {}", msg);
                let refreshed = self.client.refresh_credentials().await;
                match self.generate_with_retry(request).await {
                    Err(LlmError::Auth(again)) => Err(LlmError::Connection(format!(
                        "authentication with the {} backend failed again after a credential refresh (refreshed: {}): {}",
                        self.client.name(),
                        refreshed,
                        again
                    ))),
                    other => other,
                }
            }
            Err(LlmError::Authorization(msg)) => Err(LlmError::Authorization(format!(
                "{} (the {} credentials are not allowed to invoke this model)",
                msg,
                self.client.name()
            ))),
            other => other,
        }
    }

    async fn generate_with_retry(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        let operation = format!("{} invoke", self.client.name());
        let text = retry_async(&self.retry, &operation, |attempt| async move {
            let raw = self.client.invoke(request, attempt).await?;
            self.normalizer.normalize(raw).await
        })
        .await?;
        info!("{} returned {} chars", operation, char_len(&text));
        Ok(text)
    }

    /// Generates and sanitizes dialogue. An empty result after sanitizing is `NoContent`.
    pub async fn generate_script_text(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        let text = self.generate(request).await?;
        let clean = self.sanitizer.sanitize(&text);
        if clean.trim().is_empty() {
            return Err(LlmError::no_content("no dialogue lines left after sanitizing"));
        }
        Ok(clean)
    }
}
