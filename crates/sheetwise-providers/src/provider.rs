//! Completion service trait

use async_trait::async_trait;

use crate::{error::ProviderError, models::CompletionRequest};

/// Text completion service consumed by the analysis core
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Get the service's identifier
    fn id(&self) -> &str;

    /// Generate text for a request
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError>;
}
