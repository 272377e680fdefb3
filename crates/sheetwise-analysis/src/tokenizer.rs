//! Token counting with tiktoken
//!
//! Counts are taken with the `cl100k_base` encoding used by the GPT-4 and
//! GPT-3.5 family of deployments.

use std::sync::Arc;

use tiktoken_rs::{cl100k_base, CoreBPE};

use crate::error::{AnalysisError, AnalysisResult};

/// Counts tokens in a string
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// `cl100k_base` token counter
#[derive(Clone)]
pub struct Cl100kTokenizer {
    bpe: Arc<CoreBPE>,
}

impl Cl100kTokenizer {
    /// Load the encoding tables
    pub fn new() -> AnalysisResult<Self> {
        let bpe = cl100k_base().map_err(|e| AnalysisError::Tokenizer(e.to_string()))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl TokenCounter for Cl100kTokenizer {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_with_special_tokens(text).len()
    }
}

impl std::fmt::Debug for Cl100kTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cl100kTokenizer").finish_non_exhaustive()
    }
}
