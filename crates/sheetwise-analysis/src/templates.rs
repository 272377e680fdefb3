//! Prompt templates for each analysis kind
//!
//! Static kinds map to fixed templates. A custom goal is turned into a
//! template by asking the completion service for a system prompt and a task
//! prompt once, at job start.

use serde_json::Value;
use sheetwise_providers::CompletionRequest;
use tracing::{debug, warn};

use crate::analyzer::RowAnalyzer;
use crate::error::{AnalysisError, AnalysisResult};
use crate::models::AnalysisKind;

/// Placeholder replaced with the row (or chunk) text
pub const CONTENT_PLACEHOLDER: &str = "{{content}}";
/// Placeholder replaced with the previous chunk's result
pub const PREVIOUS_RESULT_PLACEHOLDER: &str = "{{previous_result}}";

const TEMPLATE_VERSION: &str = "v1";
const DEFAULT_INPUT_TOKEN_BUDGET: usize = 6000;
const CUSTOM_OUTPUT_TOKEN_BUDGET: usize = 300;
const SYNTHESIS_OUTPUT_TOKEN_BUDGET: usize = 800;

const SYNTHESIS_SYSTEM_PROMPT: &str = "You write prompts for language models. \
Given a goal, produce a system prompt and a task prompt that achieve it on a piece of input text. \
The task prompt must contain the placeholder {{content}} where the input text goes. \
Answer with a JSON object with exactly two string fields: \"system_prompt\" and \"task_prompt\".";

const CUSTOM_CONTINUATION_PROMPT: &str = "Continue the analysis with the next part of the text, \
keeping the result consistent with what was found so far.\n\n\
Result so far: {{previous_result}}\n\nNext part: {{content}}";

/// Prompts and token budgets for one analysis
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub version: String,
    pub system_prompt: String,
    /// First (or only) chunk; takes `{{content}}`
    pub initial_prompt: String,
    /// Later chunks; takes `{{previous_result}}` and `{{content}}`
    pub continuation_prompt: String,
    pub output_token_budget: usize,
    pub input_token_budget: usize,
}

impl Template {
    pub fn render_initial(&self, content: &str) -> String {
        fill(&self.initial_prompt, &[(CONTENT_PLACEHOLDER, content)])
    }

    pub fn render_continuation(&self, previous_result: &str, content: &str) -> String {
        fill(
            &self.continuation_prompt,
            &[
                (PREVIOUS_RESULT_PLACEHOLDER, previous_result),
                (CONTENT_PLACEHOLDER, content),
            ],
        )
    }
}

/// Substitute placeholders in one left-to-right pass
///
/// Inserted values are never scanned again, so a row that happens to contain
/// `{{previous_result}}` is passed through literally.
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    'outer: while let Some(pos) = rest.find("{{") {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        for (placeholder, value) in values {
            if tail.starts_with(placeholder) {
                out.push_str(value);
                rest = &tail[placeholder.len()..];
                continue 'outer;
            }
        }
        out.push_str("{{");
        rest = &tail[2..];
    }
    out.push_str(rest);
    out
}

/// Lookup and synthesis of templates
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    input_token_budget: usize,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_TOKEN_BUDGET)
    }
}

impl TemplateRegistry {
    pub fn new(input_token_budget: usize) -> Self {
        Self { input_token_budget }
    }

    /// Fixed template for a static kind; `None` for custom
    pub fn get(&self, kind: AnalysisKind) -> Option<Template> {
        let (system, initial, continuation, output) = match kind {
            AnalysisKind::Summarize => (
                "You summarize text. Write clear, concise summaries that keep the main points.",
                "Summarize the following text concisely:\n\n{{content}}",
                "Extend the summary below with the additional text, keeping it concise and consistent.\n\n\
                 Summary so far: {{previous_result}}\n\nAdditional text: {{content}}",
                150,
            ),
            AnalysisKind::Sentiment => (
                "You score sentiment. Reply with a single number between -1 and 1 and nothing else.",
                "Score the sentiment of the following text from -1 (most negative) to 1 (most positive). \
                 Reply with the number only:\n\n{{content}}",
                "An earlier part of this text scored {{previous_result}}. Taking that into account, \
                 score the sentiment of the whole text including this part from -1 to 1. \
                 Reply with the number only:\n\n{{content}}",
                10,
            ),
            AnalysisKind::Interpret => (
                "You analyze text and extract the key insights, patterns and notable details.",
                "Extract the key insights from the following text:\n\n{{content}}",
                "Update the insights below with the additional text, keeping them consistent.\n\n\
                 Insights so far: {{previous_result}}\n\nAdditional text: {{content}}",
                300,
            ),
            AnalysisKind::Custom => return None,
        };

        Some(Template {
            version: TEMPLATE_VERSION.to_string(),
            system_prompt: system.to_string(),
            initial_prompt: initial.to_string(),
            continuation_prompt: continuation.to_string(),
            output_token_budget: output,
            input_token_budget: self.input_token_budget,
        })
    }

    /// Resolve the template for a job
    ///
    /// Custom kinds issue one completion through `analyzer`, under its call
    /// timeout and retry policy; static kinds issue none.
    pub async fn resolve(
        &self,
        kind: AnalysisKind,
        custom_goal: Option<&str>,
        analyzer: &RowAnalyzer,
    ) -> AnalysisResult<Template> {
        if let Some(template) = self.get(kind) {
            return Ok(template);
        }

        let goal = custom_goal
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .ok_or_else(|| {
                AnalysisError::Validation("Custom analysis requires a goal".to_string())
            })?;
        self.synthesize(goal, analyzer).await
    }

    async fn synthesize(&self, goal: &str, analyzer: &RowAnalyzer) -> AnalysisResult<Template> {
        debug!("Synthesizing template for custom goal");

        let request = CompletionRequest::new(
            SYNTHESIS_SYSTEM_PROMPT,
            format!("Write the prompts for this goal: {}", goal),
            SYNTHESIS_OUTPUT_TOKEN_BUDGET,
        )
        .with_json_mode();

        let response = analyzer
            .complete("template synthesis", request)
            .await
            .map_err(|e| AnalysisError::TemplateSynthesis(e.source.to_string()))?;

        let (system_prompt, task_prompt) = parse_synthesis_response(&response).map_err(|e| {
            warn!("Rejected synthesized template: {}", e);
            e
        })?;

        Ok(Template {
            version: TEMPLATE_VERSION.to_string(),
            system_prompt,
            initial_prompt: normalize_content_placeholder(&task_prompt),
            continuation_prompt: CUSTOM_CONTINUATION_PROMPT.to_string(),
            output_token_budget: CUSTOM_OUTPUT_TOKEN_BUDGET,
            input_token_budget: self.input_token_budget,
        })
    }
}

fn parse_synthesis_response(response: &str) -> AnalysisResult<(String, String)> {
    let body = strip_code_fence(response);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| AnalysisError::TemplateSynthesis(format!("Response is not JSON: {}", e)))?;

    let field = |name: &str| -> AnalysisResult<String> {
        value
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                AnalysisError::TemplateSynthesis(format!("Missing or empty field: {}", name))
            })
    };

    Ok((field("system_prompt")?, field("task_prompt")?))
}

/// Remove a surrounding Markdown code fence, with or without a language tag
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = match inner.find('\n') {
        Some(newline) => &inner[newline + 1..],
        None => inner,
    };
    inner.trim_end().trim_end_matches("```").trim()
}

/// Rewrite `{content}`, `{{ content }}` and similar spellings to `{{content}}`
///
/// A prompt without any content placeholder gets one appended.
fn normalize_content_placeholder(prompt: &str) -> String {
    let mut out = String::with_capacity(prompt.len() + CONTENT_PLACEHOLDER.len());
    let mut rest = prompt;
    let mut found = false;

    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match match_content_placeholder(tail) {
            Some(len) => {
                out.push_str(CONTENT_PLACEHOLDER);
                rest = &tail[len..];
                found = true;
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);

    if !found {
        out.push_str("\n\n");
        out.push_str(CONTENT_PLACEHOLDER);
    }
    out
}

/// Length of a one- or two-brace `content` placeholder at the start of `text`
fn match_content_placeholder(text: &str) -> Option<usize> {
    let braces = text.chars().take_while(|c| *c == '{').count().min(2);
    let after_open = text[braces..].trim_start_matches(' ');
    let after_name = after_open.strip_prefix("content")?;
    let after_space = after_name.trim_start_matches(' ');
    let closing = "}".repeat(braces);
    let after_close = after_space.strip_prefix(closing.as_str())?;
    Some(text.len() - after_close.len())
}
