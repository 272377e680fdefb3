//! Token-bounded, sentence-aligned chunking

use crate::tokenizer::TokenCounter;

/// Split `content` into sentences, keeping every delimiter attached
///
/// A sentence ends after `.`, `!` or `?` followed by a whitespace character
/// (the whitespace stays with the sentence) and after every newline. The
/// returned slices concatenate back to `content`.
pub fn split_sentences(content: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut after_terminator = false;

    for (idx, ch) in content.char_indices() {
        let end = idx + ch.len_utf8();
        if ch == '\n' || (after_terminator && ch.is_whitespace()) {
            sentences.push(&content[start..end]);
            start = end;
            after_terminator = false;
            continue;
        }
        after_terminator = matches!(ch, '.' | '!' | '?');
    }

    if start < content.len() {
        sentences.push(&content[start..]);
    }
    sentences
}

/// Packs sentences into chunks that fit a token budget
pub struct Chunker<'a> {
    counter: &'a dyn TokenCounter,
}

impl<'a> Chunker<'a> {
    pub fn new(counter: &'a dyn TokenCounter) -> Self {
        Self { counter }
    }

    /// Split `content` into chunks of at most `max_tokens` tokens
    ///
    /// Each sentence is counted once and chunk sizes are the running sum of
    /// their sentence counts. Sentences are never broken: one that alone
    /// exceeds the budget becomes its own chunk. Empty content yields no
    /// chunks.
    pub fn split(&self, content: &str, max_tokens: usize) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_tokens = 0;

        for sentence in split_sentences(content) {
            let tokens = self.counter.count(sentence);
            if !current.is_empty() && current_tokens + tokens > max_tokens {
                chunks.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            current.push_str(sentence);
            current_tokens += tokens;
        }

        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }
}
