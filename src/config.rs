//! Service settings loaded from the environment (and `.env` via `dotenv`).

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::sentiment::LabelMap;

pub const DEFAULT_LABEL_MAP: &str = "LABEL_0=negative,LABEL_1=neutral,LABEL_2=positive";

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub tokenizer_path: PathBuf,
    pub classifier_url: String,
    pub lexicon_path: Option<PathBuf>,
    pub labels: LabelMap,
    pub limits: PipelineLimits,
    pub rate_limit: usize,
    pub rate_window: Duration,
    /// Rate-limit on the first `X-Forwarded-For` entry instead of the peer address.
    pub trust_forwarded_for: bool,
    pub static_dir: PathBuf,
}

/// Bounds applied by the analysis pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineLimits {
    /// Model input budget in tokens, special tokens included.
    pub max_input_tokens: usize,
    pub max_batch_size: usize,
    /// Word scoring is skipped once the text reaches this many words.
    pub word_scoring_limit: usize,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            max_input_tokens: 512,
            max_batch_size: 50,
            word_scoring_limit: 500,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let defaults = PipelineLimits::default();

        let labels_raw = env::var("LABEL_MAP").unwrap_or_else(|_| DEFAULT_LABEL_MAP.to_string());
        let labels = labels_raw
            .parse::<LabelMap>()
            .with_context(|| format!("invalid LABEL_MAP: {}", labels_raw))?;

        let limits = PipelineLimits {
            max_input_tokens: parse_var("MAX_INPUT_TOKENS", defaults.max_input_tokens)?,
            max_batch_size: parse_var("MAX_BATCH_SIZE", defaults.max_batch_size)?,
            word_scoring_limit: parse_var("WORD_SCORING_LIMIT", defaults.word_scoring_limit)?,
        };
        if limits.max_input_tokens < 4 {
            anyhow::bail!("MAX_INPUT_TOKENS must be at least 4");
        }

        let rate_limit = parse_var("RATE_LIMIT", 10usize)?;
        if rate_limit == 0 {
            anyhow::bail!("RATE_LIMIT must be greater than zero");
        }
        let window_secs = parse_var("RATE_WINDOW_SECS", 60u64)?;
        if window_secs == 0 {
            anyhow::bail!("RATE_WINDOW_SECS must be greater than zero");
        }

        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:5000".to_string()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://sentiment_analysis.db".to_string()),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 5u32)?,
            tokenizer_path: env::var("TOKENIZER_PATH")
                .unwrap_or_else(|_| "models/twitter-roberta-base-sentiment/tokenizer.json".to_string())
                .into(),
            classifier_url: env::var("CLASSIFIER_URL")
                .unwrap_or_else(|_| "http://localhost:8000/ml/sentiment".to_string()),
            lexicon_path: env::var("LEXICON_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            labels,
            limits,
            rate_limit,
            rate_window: Duration::from_secs(window_secs),
            trust_forwarded_for: parse_var("TRUST_FORWARDED_FOR", false)?,
            static_dir: env::var("STATIC_DIR").unwrap_or_else(|_| "static".to_string()).into(),
        })
    }
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        _ => Ok(default),
    }
}
