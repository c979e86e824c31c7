//! Tokenizer seam used for input-length budgeting.

use anyhow::{Context, Result};
use std::path::Path;
use tokenizers::Tokenizer;

pub trait TextTokenizer: Send + Sync {
    /// Token ids for `text`, including the model's special tokens.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Text for `ids`, with special tokens left out.
    fn decode(&self, ids: &[u32]) -> Result<String>;
}

/// HuggingFace `tokenizer.json` loaded through the `tokenizers` crate.
pub struct HfTokenizer {
    inner: Tokenizer,
}

impl HfTokenizer {
    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = Tokenizer::from_file(path)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("failed to load tokenizer from {}", path.display()))?;
        Ok(Self { inner })
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self.inner.encode(text, true).map_err(anyhow::Error::msg)?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner.decode(ids, true).map_err(anyhow::Error::msg)
    }
}
