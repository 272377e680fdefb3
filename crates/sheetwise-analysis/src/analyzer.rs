//! Per-row analysis: chunking, prompting and result carrying

use std::sync::Arc;
use std::time::Duration;

use sheetwise_providers::{CompletionRequest, CompletionService, ProviderError};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::chunker::Chunker;
use crate::error::CompletionError;
use crate::retry_policy::RetryPolicy;
use crate::templates::Template;
use crate::tokenizer::TokenCounter;

/// Produces one result string per row
///
/// Content over the template's input budget is split into sentence-aligned
/// chunks processed in order, each continuation receiving the previous chunk's
/// result.
pub struct RowAnalyzer {
    completion: Arc<dyn CompletionService>,
    tokenizer: Arc<dyn TokenCounter>,
    call_timeout: Duration,
    temperature: Option<f32>,
    retry: RetryPolicy,
}

impl RowAnalyzer {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        tokenizer: Arc<dyn TokenCounter>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            completion,
            tokenizer,
            call_timeout,
            temperature: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn analyze(
        &self,
        row_id: &str,
        content: &str,
        template: &Template,
    ) -> Result<String, CompletionError> {
        let chunks = self.plan_chunks(row_id, content, template.input_token_budget).await?;
        if chunks.len() > 1 {
            debug!(row_id = %row_id, chunks = chunks.len(), "Content exceeds input budget, chunking");
        }

        let mut previous: Option<String> = None;
        for chunk in &chunks {
            let prompt = match &previous {
                None => template.render_initial(chunk),
                Some(result) => template.render_continuation(result, chunk),
            };
            previous = Some(self.call(row_id, template, prompt).await?);
        }

        // Non-empty content always yields at least one chunk
        Ok(previous.unwrap_or_default())
    }

    /// Token counting and splitting run on the blocking pool
    async fn plan_chunks(
        &self,
        row_id: &str,
        content: &str,
        budget: usize,
    ) -> Result<Vec<String>, CompletionError> {
        let tokenizer = self.tokenizer.clone();
        let content = content.to_string();

        tokio::task::spawn_blocking(move || {
            if tokenizer.count(&content) <= budget {
                vec![content]
            } else {
                Chunker::new(tokenizer.as_ref()).split(&content, budget)
            }
        })
        .await
        .map_err(|e| CompletionError::new(row_id, ProviderError::ProviderError(e.to_string())))
    }

    async fn call(
        &self,
        row_id: &str,
        template: &Template,
        user_prompt: String,
    ) -> Result<String, CompletionError> {
        let mut request = CompletionRequest::new(
            template.system_prompt.clone(),
            user_prompt,
            template.output_token_budget,
        );
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        self.complete(row_id, request).await
    }

    /// One completion under the per-call timeout, retrying transient errors
    ///
    /// `subject` names what the call is for in errors and logs.
    pub async fn complete(
        &self,
        subject: &str,
        request: CompletionRequest,
    ) -> Result<String, CompletionError> {
        let mut attempt = 1;
        loop {
            let error = match timeout(self.call_timeout, self.completion.complete(request.clone())).await {
                Ok(Ok(text)) => return Ok(text.trim().to_string()),
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout(self.call_timeout.as_millis() as u64),
            };

            if !self.retry.should_retry(attempt, &error) {
                return Err(CompletionError::new(subject, error));
            }

            let delay = self.retry.calculate_delay(attempt, &error);
            warn!(
                subject = %subject,
                provider = self.completion.id(),
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient completion error, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
