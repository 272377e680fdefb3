//! Data models for providers

use serde::{Deserialize, Serialize};

/// One completion call: a system prompt, a task prompt and an output budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Instructions for the model
    pub system_prompt: String,
    /// The task, with content already substituted
    pub user_prompt: String,
    /// Maximum tokens to generate
    pub max_output_tokens: usize,
    /// Temperature for sampling (0.0 to 2.0)
    pub temperature: Option<f32>,
    /// Ask the service for a JSON object response
    #[serde(default)]
    pub json_mode: bool,
}

impl CompletionRequest {
    pub fn new(
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
        max_output_tokens: usize,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            max_output_tokens,
            temperature: None,
            json_mode: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_json_mode(mut self) -> Self {
        self.json_mode = true;
        self
    }
}
