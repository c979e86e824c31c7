//! Input cleanup before classification: character sanitizing and token-budget
//! truncation.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::tokenizer::TextTokenizer;

/// Anything that is not a word character, whitespace or `. , ! ? ' " -`.
static DISALLOWED_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[^\w\s.,!?'"-]"#).expect("static regex"));

/// Tokens kept from the end of an over-long input (closing context plus the
/// tokenizer's end-of-sequence marker).
const TAIL_TOKENS: usize = 2;

#[derive(Debug, Clone, Copy)]
pub struct TextNormalizer {
    max_tokens: usize,
}

impl TextNormalizer {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens: max_tokens.max(TAIL_TOKENS + 1) }
    }

    pub fn sanitize(text: &str) -> String {
        DISALLOWED_CHARS.replace_all(text, "").into_owned()
    }

    /// Sanitizes each item on its own. Non-string items become empty strings.
    pub fn sanitize_batch(items: &[Value]) -> Vec<String> {
        items
            .iter()
            .map(|item| item.as_str().map(Self::sanitize).unwrap_or_default())
            .collect()
    }

    /// Fits `text` into the model's token budget.
    ///
    /// Texts within budget are returned unchanged. Longer ones keep the first
    /// `max - 2` tokens and the final 2, then are decoded without special tokens.
    pub fn truncate(&self, tokenizer: &dyn TextTokenizer, text: &str) -> Result<String> {
        let ids = tokenizer.encode(text)?;
        if ids.len() <= self.max_tokens {
            return Ok(text.to_string());
        }

        let head = self.max_tokens - TAIL_TOKENS;
        let mut kept = Vec::with_capacity(self.max_tokens);
        kept.extend_from_slice(&ids[..head]);
        kept.extend_from_slice(&ids[ids.len() - TAIL_TOKENS..]);

        tracing::debug!(original = ids.len(), kept = kept.len(), "truncated input to token budget");
        tokenizer.decode(&kept)
    }
}
