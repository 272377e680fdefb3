//! Sheetwise completion providers
//!
//! A narrow text completion abstraction (system prompt, task prompt, output
//! token budget in; generated text out) and its Azure OpenAI implementation.

pub mod azure_openai;
pub mod error;
pub mod models;
pub mod provider;

pub use azure_openai::AzureOpenAiCompletion;
pub use error::ProviderError;
pub use models::CompletionRequest;
pub use provider::CompletionService;
