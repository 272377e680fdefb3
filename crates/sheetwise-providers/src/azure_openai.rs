//! Azure OpenAI provider implementation
//!
//! Sends chat completion requests to an Azure OpenAI deployment.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sheetwise_config::AzureConfig;
use tracing::{debug, error};

use crate::error::ProviderError;
use crate::models::CompletionRequest;
use crate::provider::CompletionService;

/// Azure OpenAI completion service
pub struct AzureOpenAiCompletion {
    api_key: String,
    client: Arc<Client>,
    base_url: String,
    api_version: String,
    deployment_name: String,
}

impl AzureOpenAiCompletion {
    /// Create a new Azure OpenAI provider instance
    pub fn new(
        api_key: String,
        base_url: String,
        deployment_name: String,
        api_version: String,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        if api_key.is_empty() {
            return Err(ProviderError::ConfigError(
                "Azure OpenAI API key is required".to_string(),
            ));
        }

        if base_url.is_empty() {
            return Err(ProviderError::ConfigError(
                "Azure OpenAI base URL is required".to_string(),
            ));
        }

        if deployment_name.is_empty() {
            return Err(ProviderError::ConfigError(
                "Azure OpenAI deployment name is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::ConfigError(e.to_string()))?;

        Ok(Self {
            api_key,
            client: Arc::new(client),
            base_url,
            api_version,
            deployment_name,
        })
    }

    /// Build from the `[azure]` configuration section
    pub fn from_config(config: &AzureConfig) -> Result<Self, ProviderError> {
        Self::new(
            config.api_key.clone(),
            config.endpoint.clone(),
            config.deployment.clone(),
            config.api_version.clone(),
            config.request_timeout(),
        )
    }

    /// Build the chat completions URL
    fn chat_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.base_url.trim_end_matches('/'),
            self.deployment_name,
            self.api_version
        )
    }

    fn error_for_status(status: StatusCode, retry_after: Option<u64>, body: String) -> ProviderError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::AuthError,
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(retry_after.unwrap_or(0)),
            s if s.is_server_error() => {
                ProviderError::NetworkError(format!("Azure OpenAI server error: {} - {}", s, body))
            }
            s => ProviderError::ProviderError(format!("Azure OpenAI API error: {} - {}", s, body)),
        }
    }

    /// Extract the generated text from a response
    fn convert_response(response: AzureOpenAiChatResponse) -> Result<String, ProviderError> {
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| ProviderError::ProviderError("No content in response".to_string()))
    }
}

#[async_trait]
impl CompletionService for AzureOpenAiCompletion {
    fn id(&self) -> &str {
        "azure-openai"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        debug!(
            deployment = %self.deployment_name,
            max_tokens = request.max_output_tokens,
            json_mode = request.json_mode,
            "Sending completion request to Azure OpenAI"
        );

        let body = AzureOpenAiChatRequest {
            messages: vec![
                AzureOpenAiMessage {
                    role: "system".to_string(),
                    content: Some(request.system_prompt),
                },
                AzureOpenAiMessage {
                    role: "user".to_string(),
                    content: Some(request.user_prompt),
                },
            ],
            max_tokens: Some(request.max_output_tokens),
            temperature: request.temperature,
            response_format: request.json_mode.then(|| ResponseFormat {
                kind: "json_object".to_string(),
            }),
        };

        let response = self
            .client
            .post(self.chat_url())
            .header("api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to send request to Azure OpenAI: {}", e);
                ProviderError::from(e)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let error_text = response.text().await.unwrap_or_default();
            error!("Azure OpenAI API error: {} - {}", status, error_text);
            return Err(Self::error_for_status(status, retry_after, error_text));
        }

        let parsed: AzureOpenAiChatResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Azure OpenAI response: {}", e);
            ProviderError::ParseError(e.to_string())
        })?;

        Self::convert_response(parsed)
    }
}

/// Azure OpenAI chat request structure
#[derive(Serialize)]
struct AzureOpenAiChatRequest {
    messages: Vec<AzureOpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

/// Azure OpenAI message structure
#[derive(Serialize, Deserialize)]
struct AzureOpenAiMessage {
    role: String,
    content: Option<String>,
}

/// Azure OpenAI chat response structure
#[derive(Deserialize)]
struct AzureOpenAiChatResponse {
    choices: Vec<AzureOpenAiChoice>,
}

/// Azure OpenAI choice structure
#[derive(Deserialize)]
struct AzureOpenAiChoice {
    message: Option<AzureOpenAiMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> AzureOpenAiCompletion {
        AzureOpenAiCompletion::new(
            "key".to_string(),
            "https://example.openai.azure.com/".to_string(),
            "gpt4".to_string(),
            "2024-02-01".to_string(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_chat_url_trims_trailing_slash() {
        assert_eq!(
            provider().chat_url(),
            "https://example.openai.azure.com/openai/deployments/gpt4/chat/completions?api-version=2024-02-01"
        );
    }

    #[test]
    fn test_missing_settings_rejected() {
        let result = AzureOpenAiCompletion::new(
            String::new(),
            "https://example.openai.azure.com".to_string(),
            "gpt4".to_string(),
            "2024-02-01".to_string(),
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(ProviderError::ConfigError(_))));

        let config = AzureConfig::default();
        assert!(AzureOpenAiCompletion::from_config(&config).is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AzureOpenAiCompletion::error_for_status(StatusCode::UNAUTHORIZED, None, String::new()),
            ProviderError::AuthError
        );
        assert_eq!(
            AzureOpenAiCompletion::error_for_status(StatusCode::TOO_MANY_REQUESTS, Some(7), String::new()),
            ProviderError::RateLimited(7)
        );
        assert!(AzureOpenAiCompletion::error_for_status(
            StatusCode::BAD_GATEWAY,
            None,
            String::new()
        )
        .is_retryable());
        assert!(!AzureOpenAiCompletion::error_for_status(
            StatusCode::BAD_REQUEST,
            None,
            "bad".to_string()
        )
        .is_retryable());
    }
}
